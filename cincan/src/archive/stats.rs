//! Upload bookkeeping used to skip unchanged downloads.

use std::collections::BTreeMap;
use tracing::debug;

/// What was uploaded for one archive path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadStat {
    pub size: u64,
    /// Modification time of the uploaded entry, whole seconds.
    pub mtime: i64,
    /// Wall clock second the upload happened.
    pub uploaded_at: i64,
}

/// Upload stats keyed by path relative to the container working directory.
#[derive(Clone, Debug, Default)]
pub struct UploadStats {
    entries: BTreeMap<String, UploadStat>,
}

impl UploadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, size: u64, mtime: i64, uploaded_at: i64) {
        self.entries.insert(
            name.to_string(),
            UploadStat {
                size,
                mtime,
                uploaded_at,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&UploadStat> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Has `name` changed since upload, given its current size and mtime.
    ///
    /// Container mtimes have one second resolution. An unchanged mtime that
    /// falls into the upload second or the current second cannot tell a
    /// quick rewrite from no write at all, so it counts as changed.
    pub fn is_changed(&self, name: &str, size: u64, mtime: i64, now: i64) -> bool {
        let Some(up) = self.entries.get(name) else {
            return true;
        };
        if up.size != size {
            debug!("size {} change {} -> {}", name, up.size, size);
            return true;
        }
        if up.mtime != mtime {
            debug!("timestamp {} updated {} -> {}", name, up.mtime, mtime);
            return true;
        }
        if up.mtime == up.uploaded_at || up.mtime == now {
            debug!("timestamp {} {} may or may not be updated", name, mtime);
            return true;
        }
        debug!("timestamp {} not updated {}", name, mtime);
        false
    }
}
