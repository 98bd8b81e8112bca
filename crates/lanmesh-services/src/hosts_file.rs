//! Managed section of the system hosts file.
//!
//! Discovered hosts are written between two marker lines. Everything outside
//! the markers is left as the operator wrote it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::registry::HostRecord;

pub const BEGIN_MARKER: &str = "# BEGIN LANMESH MANAGED HOSTS";
pub const END_MARKER: &str = "# END LANMESH MANAGED HOSTS";

#[derive(Debug, thiserror::Error)]
pub enum HostsFileError {
    #[error("no permission to write {0} (run as root or disable hosts_file.enabled)")]
    PermissionDenied(PathBuf),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

/// Writer for the managed section. Clones share one lock so concurrent
/// syncs never interleave.
#[derive(Clone)]
pub struct HostsFile {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Rewrite the managed section from `records`. Blocking.
    pub fn sync(&self, records: &[HostRecord]) -> Result<usize, HostsFileError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let existing = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(HostsFileError::PermissionDenied(self.path.clone()))
            }
            Err(e) => return Err(HostsFileError::Read(self.path.clone(), e)),
        };

        let entries = entries(records);
        let rendered = render(&existing, &entries);
        if rendered == existing {
            return Ok(entries.len());
        }

        std::fs::write(&self.path, rendered).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                HostsFileError::PermissionDenied(self.path.clone())
            }
            _ => HostsFileError::Write(self.path.clone(), e),
        })?;

        tracing::debug!(path = %self.path.display(), hosts = entries.len(), "hosts file synced");
        Ok(entries.len())
    }
}

/// Whether the process can normally write system files.
pub fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// `(ip, hostname)` pairs for every record with both set, sorted by hostname.
fn entries(records: &[HostRecord]) -> Vec<(&str, &str)> {
    let mut entries: Vec<_> = records
        .iter()
        .map(|r| (r.metadata.ip_address.as_str(), r.metadata.hostname.as_str()))
        .filter(|(ip, name)| !ip.is_empty() && !name.is_empty())
        .collect();
    entries.sort_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)));
    entries.dedup();
    entries
}

/// Replace (or append) the managed section of `existing`.
fn render(existing: &str, entries: &[(&str, &str)]) -> String {
    let mut kept = Vec::new();
    let mut inside = false;
    for line in existing.lines() {
        match line.trim() {
            BEGIN_MARKER => inside = true,
            END_MARKER => inside = false,
            _ if !inside => kept.push(line),
            _ => {}
        }
    }
    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }

    let mut out = String::new();
    for line in &kept {
        out.push_str(line);
        out.push('\n');
    }
    if !kept.is_empty() {
        out.push('\n');
    }
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    for (ip, name) in entries {
        out.push_str(&format!("{:<16} {}\n", ip, name));
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}
