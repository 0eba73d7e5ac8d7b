//! Detect host paths in a command line and map them into the container.

use super::FileMatcher;
use super::lexer::split_fragments;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Knobs for [`FileResolver::resolve`].
#[derive(Clone, Debug)]
pub struct ResolveOptions {
    /// Directories created in the container even if absent on the host.
    pub output_dirs: Vec<String>,
    /// Prune the detected upload set (output directories are kept).
    pub input_filters: Vec<FileMatcher>,
    /// `false` when inputs come from an explicit tar: arguments pass
    /// through untouched and only output directories are uploaded.
    pub detect: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            output_dirs: Vec::new(),
            input_filters: Vec::new(),
            detect: true,
        }
    }
}

/// One host path paired with its name inside the upload archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadEntry {
    /// Where to read from on the host.
    pub host: PathBuf,
    /// Relative to the container working directory.
    pub arc_name: String,
}

/// Result of scanning a command line for file references.
#[derive(Debug)]
pub struct FileResolver {
    base: PathBuf,
    host_files: BTreeSet<PathBuf>,
    command_args: Vec<String>,
}

impl FileResolver {
    /// Scan `args`, resolving relative paths against `base`.
    pub fn resolve(args: &[String], base: &Path, options: &ResolveOptions) -> Self {
        let mut resolver = Self {
            base: base.to_path_buf(),
            host_files: BTreeSet::new(),
            command_args: Vec::with_capacity(args.len()),
        };

        if options.detect {
            for arg in args {
                let rewritten = resolver.rewrite_arg(arg, &options.output_dirs);
                resolver.command_args.push(rewritten);
            }
            if !options.input_filters.is_empty() {
                resolver.apply_filters(&options.input_filters);
            }
        } else {
            resolver.command_args = args.to_vec();
        }

        for dir in &options.output_dirs {
            if !is_all_slashes(dir) {
                resolver.host_files.insert(PathBuf::from(normalize(dir)));
            }
        }
        resolver
    }

    /// Arguments with recognized paths replaced by their archive names.
    pub fn command_args(&self) -> &[String] {
        &self.command_args
    }

    /// Host paths slated for upload, as written or resolved to absolute.
    pub fn host_files(&self) -> &BTreeSet<PathBuf> {
        &self.host_files
    }

    /// Host path to archive name pairs, in upload order.
    pub fn upload_entries(&self) -> Vec<UploadEntry> {
        self.host_files
            .iter()
            .map(|path| UploadEntry {
                host: self.base.join(path),
                arc_name: archive_name(path),
            })
            .collect()
    }

    fn rewrite_arg(&mut self, arg: &str, output_dirs: &[String]) -> String {
        if !arg.chars().any(char::is_whitespace)
            && let Some(name) = self.try_path(arg, output_dirs)
        {
            return name;
        }

        let mut rewritten = String::with_capacity(arg.len());
        let mut last = 0;
        for fragment in split_fragments(arg) {
            if let Some(name) = self.try_path(&fragment.text, output_dirs) {
                rewritten.push_str(&arg[last..fragment.range.start]);
                rewritten.push_str(&name);
                last = fragment.range.end;
            }
        }
        rewritten.push_str(&arg[last..]);
        rewritten
    }

    /// Register `text` for upload if it names a host path, returning the
    /// archive name (with trailing slashes kept) it should be replaced with.
    fn try_path(&mut self, text: &str, output_dirs: &[String]) -> Option<String> {
        if text.is_empty() || is_all_slashes(text) {
            return None;
        }
        let has_dotdot = Path::new(text)
            .components()
            .any(|c| c == Component::ParentDir);
        let absolute = Path::new(text).is_absolute();
        let host = self.base.join(text);

        let is_output_dir = output_dirs.iter().any(|d| normalize(d) == normalize(text));
        let exists = host.exists();

        let key = if absolute || has_dotdot {
            fs::canonicalize(&host).unwrap_or_else(|_| PathBuf::from(normalize(&host.to_string_lossy())))
        } else {
            PathBuf::from(normalize(text))
        };

        if exists || is_output_dir {
            if host.is_dir() {
                self.add_tree(&key);
            } else {
                self.host_files.insert(key.clone());
            }
        } else if absolute || has_dotdot {
            return None;
        } else {
            let parent = self.existing_ancestor(&key, output_dirs)?;
            debug!(path = %text, parent = %parent.display(), "new output file");
            self.host_files.insert(parent);
        }

        let mut name = archive_name(&key);
        let trailing = text.len() - text.trim_end_matches('/').len();
        for _ in 0..trailing {
            name.push('/');
        }
        Some(name)
    }

    /// Nearest existing non-empty ancestor of a relative path, if it is a
    /// directory. Output directories count as existing directories.
    fn existing_ancestor(&self, relative: &Path, output_dirs: &[String]) -> Option<PathBuf> {
        let mut current = relative.parent();
        while let Some(parent) = current {
            if parent.as_os_str().is_empty() {
                return None;
            }
            let text = parent.to_string_lossy();
            if output_dirs.iter().any(|d| normalize(d) == text) {
                return Some(parent.to_path_buf());
            }
            let host = self.base.join(parent);
            if host.exists() {
                return host.is_dir().then(|| parent.to_path_buf());
            }
            current = parent.parent();
        }
        None
    }

    fn add_tree(&mut self, key: &Path) {
        let root = self.base.join(key);
        if key != Path::new(".") {
            self.host_files.insert(key.to_path_buf());
        }
        for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let Ok(entry) = entry else { continue };
            if let Ok(suffix) = entry.path().strip_prefix(&root) {
                let path = if key == Path::new(".") {
                    suffix.to_path_buf()
                } else {
                    key.join(suffix)
                };
                self.host_files.insert(path);
            }
        }
    }

    fn apply_filters(&mut self, filters: &[FileMatcher]) {
        let mut work_dir = self.base.to_string_lossy().into_owned();
        if !work_dir.ends_with('/') {
            work_dir.push('/');
        }
        let candidates: Vec<(String, PathBuf)> = self
            .host_files
            .iter()
            .map(|p| (self.base.join(p).to_string_lossy().into_owned(), p.clone()))
            .collect();
        let keys: Vec<String> = candidates.iter().map(|(k, _)| k.clone()).collect();
        let kept: BTreeSet<String> = FileMatcher::filter_all(filters, keys, &work_dir)
            .into_iter()
            .collect();
        self.host_files = candidates
            .into_iter()
            .filter(|(k, _)| kept.contains(k))
            .map(|(_, p)| p)
            .collect();
    }
}

fn is_all_slashes(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c == '/')
}

/// Lexically clean a path: drop `.` components and duplicate slashes.
fn normalize(path: &str) -> String {
    let p = Path::new(path);
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in p.components() {
        match component {
            Component::RootDir => absolute = true,
            Component::CurDir => {}
            Component::ParentDir => {
                if absolute && parts.last().is_some_and(|l| l != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..".into());
                }
            }
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            Component::Prefix(_) => {}
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Name of `path` inside the upload archive.
///
/// Absolute paths lose the leading slash and have `:` replaced by `_`.
pub fn archive_name(path: &Path) -> String {
    let text = path.to_string_lossy();
    if path.is_absolute() {
        text.trim_start_matches('/').replace(':', "_")
    } else {
        text.into_owned()
    }
}
