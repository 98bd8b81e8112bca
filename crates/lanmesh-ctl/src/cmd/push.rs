//! Public-key push to a discovered host.
//!
//! Delegates to the system `ssh-copy-id`. The remote host key is accepted on
//! first contact and pinned in our own known-hosts file; a changed key on a
//! later push makes ssh refuse the connection.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::process::Command;

use lanmesh_core::config::ConnectConfig;

use super::hosts::{mark_pushed, resolve, HostSelector};

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("public key {0} not found (generate one with ssh-keygen -t ed25519)")]
    PublicKeyMissing(PathBuf),
    #[error("cannot prepare known-hosts file {0}: {1}")]
    KnownHosts(PathBuf, std::io::Error),
    #[error("failed to run ssh-copy-id: {0}")]
    Spawn(std::io::Error),
    #[error("ssh-copy-id exited with {0}")]
    Failed(String),
}

/// Everything ssh-copy-id needs for one push.
#[derive(Debug, Clone)]
pub struct PushTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub public_key: &'a Path,
    pub known_hosts: &'a Path,
}

impl PushTarget<'_> {
    pub fn args(&self) -> Vec<OsString> {
        let mut known_hosts = OsString::from("UserKnownHostsFile=");
        known_hosts.push(self.known_hosts);
        vec![
            "-i".into(),
            self.public_key.into(),
            "-p".into(),
            self.port.to_string().into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            known_hosts,
            format!("{}@{}", self.user, self.host).into(),
        ]
    }
}

/// Copy the public key to the target. Interactive: ssh may prompt for a password.
pub async fn push_key(target: &PushTarget<'_>) -> Result<(), PushError> {
    if !target.public_key.is_file() {
        return Err(PushError::PublicKeyMissing(target.public_key.to_path_buf()));
    }
    if let Some(parent) = target.known_hosts.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PushError::KnownHosts(target.known_hosts.to_path_buf(), e))?;
    }

    let status = Command::new("ssh-copy-id")
        .args(target.args())
        .status()
        .await
        .map_err(PushError::Spawn)?;

    if status.success() {
        Ok(())
    } else {
        Err(PushError::Failed(status.to_string()))
    }
}

pub async fn cmd_push(
    connect: &ConnectConfig,
    selector: &HostSelector,
    user: Option<&str>,
    ssh_port: Option<u16>,
) -> Result<()> {
    let host = resolve(connect.api_port, selector).await?;
    let target = PushTarget {
        host: &host.metadata.ip_address,
        port: ssh_port.unwrap_or(connect.ssh_port),
        user: user.unwrap_or(&connect.default_user),
        public_key: &connect.public_key,
        known_hosts: &connect.known_hosts,
    };

    println!(
        "→ pushing {} to {}@{} ({})",
        connect.public_key.display(),
        target.user,
        target.host,
        host.metadata.hostname
    );
    push_key(&target).await?;

    mark_pushed(connect.api_port, &host.metadata.mac_address).await?;
    println!("✓ key installed on {}", host.metadata.hostname);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_pin_host_key_on_first_use() {
        let target = PushTarget {
            host: "192.168.1.10",
            port: 2222,
            user: "root",
            public_key: Path::new("/home/u/.ssh/id_ed25519.pub"),
            known_hosts: Path::new("/home/u/.config/lanmesh/known_hosts"),
        };
        let args: Vec<String> = target
            .args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "-i",
                "/home/u/.ssh/id_ed25519.pub",
                "-p",
                "2222",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-o",
                "UserKnownHostsFile=/home/u/.config/lanmesh/known_hosts",
                "root@192.168.1.10",
            ]
        );
    }

    #[tokio::test]
    async fn missing_public_key_fails_before_running_ssh() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("missing.pub");
        let known = dir.path().join("known_hosts");
        let target = PushTarget {
            host: "192.168.1.10",
            port: 22,
            user: "root",
            public_key: &key,
            known_hosts: &known,
        };
        let err = push_key(&target).await.unwrap_err();
        assert!(matches!(err, PushError::PublicKeyMissing(p) if p == key));
    }
}
