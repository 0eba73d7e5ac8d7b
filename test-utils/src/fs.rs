//! Container filesystem kept in a map of absolute paths.

use cincan::container::{ChangeKind, ContainerChange, PathStat};
use cincan_shared::errors::{CincanError, CincanResult};
use std::collections::BTreeMap;
use std::io::Read;
use tar::{Archive, Builder, EntryType, Header};

/// Directory bit in the mode reported with archives (Go `os.ModeDir`).
const MODE_DIR: u32 = 1 << 31;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    File(Vec<u8>),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub mode: u32,
    pub mtime: i64,
}

/// Filesystem of one fake container.
#[derive(Debug)]
pub struct FakeFs {
    nodes: BTreeMap<String, Node>,
    changes: BTreeMap<String, ChangeKind>,
}

impl Default for FakeFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse `.`, `..`, duplicate and trailing slashes of an absolute path.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl FakeFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                kind: NodeKind::Dir,
                mode: 0o755,
                mtime: 0,
            },
        );
        Self {
            nodes,
            changes: BTreeMap::new(),
        }
    }

    /// Create a directory as part of the image, outside the change list.
    pub fn seed_dir(&mut self, path: &str, mtime: i64) {
        let path = normalize(path);
        let mut missing = Vec::new();
        let mut cur = Some(path.as_str());
        while let Some(p) = cur {
            if self.nodes.contains_key(p) {
                break;
            }
            missing.push(p.to_string());
            cur = parent_of(p);
        }
        for p in missing.into_iter().rev() {
            self.nodes.insert(
                p,
                Node {
                    kind: NodeKind::Dir,
                    mode: 0o755,
                    mtime,
                },
            );
        }
    }

    /// Create a file as part of the image, outside the change list.
    pub fn seed_file(&mut self, path: &str, data: Vec<u8>, mtime: i64) {
        let path = normalize(path);
        if let Some(parent) = parent_of(&path) {
            self.seed_dir(parent, mtime);
        }
        self.nodes.insert(
            path,
            Node {
                kind: NodeKind::File(data),
                mode: 0o644,
                mtime,
            },
        );
    }

    pub fn node(&self, path: &str) -> Option<&Node> {
        self.nodes.get(&normalize(path))
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match &self.node(path)?.kind {
            NodeKind::File(data) => Some(data.clone()),
            NodeKind::Dir => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.node(path).is_some_and(|n| n.kind == NodeKind::Dir)
    }

    fn record(&mut self, path: &str, kind: ChangeKind) {
        match self.changes.get(path) {
            Some(ChangeKind::Added) if kind == ChangeKind::Modified => {}
            _ => {
                self.changes.insert(path.to_string(), kind);
            }
        }
        let mut cur = parent_of(path);
        while let Some(p) = cur {
            if p == "/" {
                break;
            }
            self.changes
                .entry(p.to_string())
                .or_insert(ChangeKind::Modified);
            cur = parent_of(p);
        }
    }

    fn ensure_dirs(&mut self, path: &str, mtime: i64) {
        let mut missing = Vec::new();
        let mut cur = Some(path);
        while let Some(p) = cur {
            if self.nodes.contains_key(p) {
                break;
            }
            missing.push(p.to_string());
            cur = parent_of(p);
        }
        for p in missing.into_iter().rev() {
            self.put_node(&p, NodeKind::Dir, 0o755, mtime);
        }
    }

    fn put_node(&mut self, path: &str, kind: NodeKind, mode: u32, mtime: i64) {
        let change = if self.nodes.contains_key(path) {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        self.nodes.insert(path.to_string(), Node { kind, mode, mtime });
        self.record(path, change);
    }

    pub fn write(&mut self, path: &str, data: Vec<u8>, mtime: i64) {
        let path = normalize(path);
        if let Some(parent) = parent_of(&path) {
            self.ensure_dirs(parent, mtime);
        }
        self.put_node(&path, NodeKind::File(data), 0o644, mtime);
    }

    pub fn mkdir(&mut self, path: &str, mtime: i64) {
        let path = normalize(path);
        self.ensure_dirs(&path, mtime);
    }

    pub fn remove(&mut self, path: &str) -> bool {
        let path = normalize(path);
        let prefix = format!("{}/", path);
        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| **k == path || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &doomed {
            self.nodes.remove(key);
            self.record(key, ChangeKind::Deleted);
        }
        !doomed.is_empty()
    }

    /// Change list in path order, like `docker diff`.
    pub fn changes(&self) -> Vec<ContainerChange> {
        self.changes
            .iter()
            .map(|(path, kind)| ContainerChange {
                path: path.clone(),
                kind: *kind,
            })
            .collect()
    }

    /// Tar of `path` and everything below it, named from its base name.
    pub fn archive(&self, path: &str) -> CincanResult<Option<(PathStat, Vec<u8>)>> {
        let path = normalize(path);
        let Some(node) = self.nodes.get(&path) else {
            return Ok(None);
        };
        let name = base_name(&path).to_string();
        let stat = PathStat {
            name: name.clone(),
            size: match &node.kind {
                NodeKind::File(data) => data.len() as u64,
                NodeKind::Dir => 4096,
            },
            mode: match node.kind {
                NodeKind::Dir => node.mode | MODE_DIR,
                NodeKind::File(_) => node.mode,
            },
            mtime: node.mtime,
        };

        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let mut builder = Builder::new(Vec::new());
        let entries = self
            .nodes
            .iter()
            .filter(|(k, _)| **k == path || k.starts_with(&prefix));
        for (key, node) in entries {
            let rel = if *key == path {
                name.clone()
            } else if name.is_empty() {
                key[prefix.len()..].to_string()
            } else {
                format!("{}/{}", name, &key[prefix.len()..])
            };
            if rel.is_empty() {
                continue;
            }
            append_node(&mut builder, &rel, node)?;
        }
        let data = builder
            .into_inner()
            .map_err(|e| CincanError::Internal(format!("tar: {}", e)))?;
        Ok(Some((stat, data)))
    }

    /// Unpack `tar` below directory `dir`.
    pub fn extract(&mut self, dir: &str, tar: &[u8]) -> CincanResult<()> {
        let dir = normalize(dir);
        if !self.is_dir(&dir) {
            return Err(CincanError::NotFound(format!(
                "Could not find the file {} in container",
                dir
            )));
        }
        let mut archive = Archive::new(tar);
        let entries = archive
            .entries()
            .map_err(|e| CincanError::Transfer(format!("tar: {}", e)))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| CincanError::Transfer(format!("tar: {}", e)))?;
            let name = entry
                .path()
                .map_err(|e| CincanError::Transfer(format!("tar: {}", e)))?
                .to_string_lossy()
                .into_owned();
            let target = normalize(&format!("{}/{}", dir, name));
            let header = entry.header();
            let mtime = header.mtime().unwrap_or(0) as i64;
            let mode = header.mode().unwrap_or(0o644);
            match header.entry_type() {
                EntryType::Directory => {
                    if let Some(parent) = parent_of(&target) {
                        self.ensure_dirs(parent, mtime);
                    }
                    self.put_node(&target, NodeKind::Dir, mode, mtime);
                }
                _ => {
                    let mut data = Vec::new();
                    entry
                        .read_to_end(&mut data)
                        .map_err(|e| CincanError::Transfer(format!("tar: {}", e)))?;
                    if let Some(parent) = parent_of(&target) {
                        self.ensure_dirs(parent, mtime);
                    }
                    self.put_node(&target, NodeKind::File(data), mode, mtime);
                }
            }
        }
        Ok(())
    }
}

fn append_node(builder: &mut Builder<Vec<u8>>, name: &str, node: &Node) -> CincanResult<()> {
    let mut header = Header::new_gnu();
    header.set_mode(node.mode);
    header.set_mtime(node.mtime.max(0) as u64);
    let data: &[u8] = match &node.kind {
        NodeKind::Dir => {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            &[]
        }
        NodeKind::File(data) => {
            header.set_entry_type(EntryType::Regular);
            header.set_size(data.len() as u64);
            data
        }
    };
    builder
        .append_data(&mut header, name, data)
        .map_err(|e| CincanError::Internal(format!("tar: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a//b/./c/"), "/a/b/c");
        assert_eq!(normalize("/a/../b"), "/b");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn test_changes_include_parents() {
        let mut fs = FakeFs::new();
        fs.seed_dir("/work", 0);
        fs.write("/work/out/a.txt", b"a".to_vec(), 10);
        let changes = fs.changes();
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["/work", "/work/out", "/work/out/a.txt"]);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert_eq!(changes[2].kind, ChangeKind::Added);
    }

    #[test]
    fn test_archive_names_from_base() {
        let mut fs = FakeFs::new();
        fs.write("/work/sub/x.bin", b"xyz".to_vec(), 5);
        let (stat, data) = fs.archive("/work/sub").unwrap().unwrap();
        assert_eq!(stat.name, "sub");
        assert_ne!(stat.mode & MODE_DIR, 0);

        let mut archive = Archive::new(data.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string()
            })
            .collect();
        assert_eq!(names, vec!["sub", "sub/x.bin"]);
        assert!(fs.archive("/nope").unwrap().is_none());
    }
}
