use super::ignore::{merge_filters, parse_ignore_file};
use super::{TarTool, UploadStats, clean_entry_name, container_parent, join_container};
use crate::container::{ArchiveFetch, ChangeKind};
use crate::files::FileMatcher;
use crate::provenance::{FileLog, hash_file, hash_reader};
use crate::util::unix_now;
use chrono::Local;
use cincan_shared::constants::files::IGNORE_FILE;
use cincan_shared::errors::{CincanError, CincanResult};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Instant;
use tar::{Archive, Builder, Entry, EntryType};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// What to download after the tool has run.
#[derive(Clone, Debug, Default)]
pub struct DownloadOptions {
    /// Caller output filters (`-O`).
    pub filters: Vec<FileMatcher>,
    /// Ignore the image `.cincanignore`.
    pub no_defaults: bool,
    /// Paths relative to the working directory that are always collected.
    pub output_paths: Vec<String>,
    /// Also collect whatever the container change list reports.
    pub implicit_output: bool,
}

/// Where downloaded files go.
pub enum OutputSink<'w> {
    /// Extract into the host directory.
    Host,
    /// Append to a tar stream instead of touching the host.
    Tar(&'w mut dyn Write),
}

/// Per download call state.
struct Fetcher<'t, 'c, 'w> {
    tool: &'t TarTool<'c>,
    stats: &'t UploadStats,
    filters: Vec<FileMatcher>,
    explicit: Vec<String>,
    outstanding: BTreeSet<String>,
    tar_out: Option<Builder<&'w mut dyn Write>>,
    out_files: Vec<FileLog>,
}

impl TarTool<'_> {
    /// Collect changed files from the container.
    ///
    /// Returns a [`FileLog`] for every regular file transferred.
    pub fn download(
        &self,
        options: &DownloadOptions,
        stats: &UploadStats,
        sink: OutputSink<'_>,
    ) -> CincanResult<Vec<FileLog>> {
        let ignore_rules = if options.no_defaults {
            Vec::new()
        } else {
            self.read_ignore_rules()?
        };
        let filters = merge_filters(&options.filters, &ignore_rules, options.no_defaults);
        debug!(
            "output filters: {}",
            filters
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let candidates = if options.implicit_output {
            let changed = self.changed_paths()?;
            FileMatcher::filter_all(&filters, changed, &self.work_dir)
        } else {
            Vec::new()
        };
        for c in &candidates {
            debug!("candidate {}", c);
        }

        let explicit: Vec<String> = options
            .output_paths
            .iter()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| join_container(&self.work_dir, p))
            .collect();

        let mut fetcher = Fetcher {
            tool: self,
            stats,
            filters,
            explicit,
            outstanding: candidates.into_iter().collect(),
            tar_out: match sink {
                OutputSink::Host => None,
                OutputSink::Tar(w) => Some(Builder::new(w)),
            },
            out_files: Vec::new(),
        };
        fetcher.run(options.implicit_output)?;

        let Fetcher {
            tar_out, out_files, ..
        } = fetcher;
        if let Some(builder) = tar_out {
            let mut writer = builder
                .into_inner()
                .map_err(|e| CincanError::Transfer(format!("Failed to finish output tar: {}", e)))?;
            writer
                .flush()
                .map_err(|e| CincanError::Transfer(format!("Failed to flush output tar: {}", e)))?;
        }
        Ok(out_files)
    }

    /// Deepest changed paths inside the working directory.
    fn changed_paths(&self) -> CincanResult<Vec<String>> {
        let all: BTreeSet<String> = self
            .container
            .diff()?
            .into_iter()
            .filter(|c| c.kind != ChangeKind::Deleted)
            .map(|c| c.path)
            .collect();

        let mut deepest = Vec::new();
        for path in &all {
            let prefix = if path.ends_with('/') {
                path.clone()
            } else {
                format!("{}/", path)
            };
            let has_child = all
                .range(prefix.clone()..)
                .next()
                .is_some_and(|next| next.starts_with(&prefix));
            if !has_child && path.starts_with(self.work_dir.as_str()) {
                deepest.push(path.clone());
            }
        }
        Ok(deepest)
    }

    fn read_ignore_rules(&self) -> CincanResult<Vec<FileMatcher>> {
        let path = format!("{}{}", self.work_dir, IGNORE_FILE);
        let stream = match self.container.get_archive(&path)? {
            ArchiveFetch::Found { stream, .. } => stream,
            ArchiveFetch::NotFound => return Ok(Vec::new()),
        };
        let mut archive = Archive::new(stream);
        let entries = archive
            .entries()
            .map_err(|e| CincanError::Transfer(format!("Failed to read {}: {}", path, e)))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| CincanError::Transfer(format!("Failed to read {}: {}", path, e)))?;
            if entry.header().entry_type().is_file() {
                let mut text = String::new();
                entry
                    .read_to_string(&mut text)
                    .map_err(|e| CincanError::Transfer(format!("Failed to read {}: {}", path, e)))?;
                let rules = parse_ignore_file(&text);
                debug!("{} rules from {}", rules.len(), path);
                return Ok(rules);
            }
        }
        Ok(Vec::new())
    }
}

impl Fetcher<'_, '_, '_> {
    fn run(&mut self, implicit_output: bool) -> CincanResult<()> {
        let work_dir = self.tool.work_dir_path().to_string();
        let batch = implicit_output && work_dir != "/" && !self.outstanding.is_empty();
        if batch {
            self.fetch(&work_dir, false)?;
        }

        for path in self.explicit.clone() {
            if batch && path.starts_with(self.tool.work_dir.as_str()) {
                continue;
            }
            self.fetch(&path, false)?;
        }

        while let Some(path) = self.outstanding.pop_first() {
            self.fetch(&path, true)?;
        }
        Ok(())
    }

    fn is_explicit(&self, path: &str) -> bool {
        self.explicit
            .iter()
            .any(|e| path == e || path.starts_with(&format!("{}/", e)))
    }

    fn accepts(&mut self, path: &str) -> bool {
        if self.outstanding.remove(path) {
            return true;
        }
        self.is_explicit(path)
            && !FileMatcher::filter_all(&self.filters, vec![path], &self.tool.work_dir).is_empty()
    }

    /// Fetch `path` and process the entries that qualify.
    ///
    /// `single` fetches are for one candidate: the reported stat is checked
    /// before the archive is read at all.
    fn fetch(&mut self, path: &str, single: bool) -> CincanResult<()> {
        let start = Instant::now();
        let (stat, stream) = match self.tool.container.get_archive(path)? {
            ArchiveFetch::Found { stat, stream } => (stat, stream),
            ArchiveFetch::NotFound => {
                warn!("{} not found in the container, skipping", path);
                return Ok(());
            }
        };

        if single {
            let Some(name) = self.tool.relative_name(path) else {
                return Ok(());
            };
            if !self.stats.is_changed(name, stat.size, stat.mtime, unix_now()) {
                return Ok(());
            }
        }

        let parent = container_parent(path).to_string();
        let mut archive = Archive::new(stream);
        let entries = archive
            .entries()
            .map_err(|e| CincanError::Transfer(format!("Failed to read archive of {}: {}", path, e)))?;
        for entry in entries {
            let entry = entry.map_err(|e| {
                CincanError::Transfer(format!("Failed to read archive of {}: {}", path, e))
            })?;
            let name = {
                let entry_path = entry.path().map_err(|e| {
                    CincanError::Transfer(format!("Bad entry name in archive of {}: {}", path, e))
                })?;
                clean_entry_name(&entry_path.to_string_lossy()).to_string()
            };
            let container_path = join_container(&parent, &name);
            let accepted = if single {
                container_path == path
            } else {
                self.accepts(&container_path)
            };
            if !accepted {
                continue;
            }
            self.process_entry(entry, &container_path)?;
        }
        debug!("get_archive {} time {:?}", path, start.elapsed());
        Ok(())
    }

    fn process_entry<R: Read>(&mut self, entry: Entry<'_, R>, container_path: &str) -> CincanResult<()> {
        let Some(relative) = self.tool.relative_name(container_path).map(str::to_string) else {
            debug!("{} outside the working directory, skipping", container_path);
            return Ok(());
        };
        if relative.is_empty() {
            return Ok(());
        }
        let header = entry.header();
        let entry_type = header.entry_type();
        let size = header.size().unwrap_or(0);
        let mtime = header.mtime().unwrap_or(0) as i64;

        if !self.stats.is_changed(&relative, size, mtime, unix_now()) {
            return Ok(());
        }

        if let Some(builder) = self.tar_out.as_mut() {
            return write_to_tar(builder, entry, &relative, &mut self.out_files);
        }

        let host = self.tool.host_path(&relative);
        match entry_type {
            EntryType::Regular | EntryType::Continuous => {
                let log = extract_file(entry, &host)?;
                self.out_files.push(log);
            }
            EntryType::Directory => extract_dir(&host)?,
            other => debug!("{} has unsupported type {:?}, skipping", relative, other),
        }
        Ok(())
    }
}

fn write_to_tar<R: Read>(
    builder: &mut Builder<&mut dyn Write>,
    mut entry: Entry<'_, R>,
    relative: &str,
    out_files: &mut Vec<FileLog>,
) -> CincanResult<()> {
    let mut header = entry.header().clone();
    let is_file = header.entry_type().is_file();
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| CincanError::Transfer(format!("Failed to read {}: {}", relative, e)))?;
    builder
        .append_data(&mut header, relative, data.as_slice())
        .map_err(|e| CincanError::Transfer(format!("Failed to write {} to tar: {}", relative, e)))?;
    info!("=> {}", relative);
    if is_file {
        let digest = hash_reader(data.as_slice(), None)
            .map_err(|e| CincanError::Transfer(format!("Failed to hash {}: {}", relative, e)))?;
        out_files.push(FileLog::new(relative, digest).with_timestamp(Local::now().naive_local()));
    }
    Ok(())
}

fn ensure_parent(host: &Path) -> CincanResult<()> {
    let Some(parent) = host.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|e| {
        CincanError::Conflict(format!(
            "mkdir {} failed, a file with that name exists? ({})",
            parent.display(),
            e
        ))
    })
}

/// Write a regular file entry to `host`, keeping identical host content.
fn extract_file<R: Read>(mut entry: Entry<'_, R>, host: &Path) -> CincanResult<FileLog> {
    if host.is_dir() {
        return Err(CincanError::Conflict(format!(
            "=> {} failed, a directory with that name exists",
            host.display()
        )));
    }
    ensure_parent(host)?;

    let digest = if host.exists() {
        let dir = host.parent().unwrap_or(Path::new("."));
        let mut temp = NamedTempFile::new_in(dir).map_err(|e| {
            CincanError::Transfer(format!("Failed to create temp file in {}: {}", dir.display(), e))
        })?;
        debug!("creating temp file {}", temp.path().display());
        let digest = hash_reader(&mut entry, Some(temp.as_file_mut())).map_err(|e| {
            CincanError::Transfer(format!("Failed to write {}: {}", host.display(), e))
        })?;
        let host_digest = hash_file(host)?;
        info!("=> {}", host.display());
        if digest == host_digest {
            debug!("identical file {} sha256 {}, no action", host.display(), digest);
        } else {
            debug!(
                "file {} sha256 in container {}, in host {}",
                host.display(),
                digest,
                host_digest
            );
            temp.persist(host).map_err(|e| {
                CincanError::Transfer(format!("Failed to replace {}: {}", host.display(), e))
            })?;
        }
        digest
    } else {
        info!("=> {}", host.display());
        let mut file = File::create(host).map_err(|e| {
            CincanError::Transfer(format!("Failed to create {}: {}", host.display(), e))
        })?;
        hash_reader(&mut entry, Some(&mut file)).map_err(|e| {
            CincanError::Transfer(format!("Failed to write {}: {}", host.display(), e))
        })?
    };
    Ok(FileLog::new(host, digest).with_timestamp(Local::now().naive_local()))
}

fn extract_dir(host: &Path) -> CincanResult<()> {
    if host.is_file() {
        return Err(CincanError::Conflict(format!(
            "mkdir {} failed, a file with that name exists",
            host.display()
        )));
    }
    if host.is_dir() {
        return Ok(());
    }
    info!("=> {}/", host.display());
    fs::create_dir_all(host).map_err(|e| {
        CincanError::Conflict(format!("mkdir {} failed: {}", host.display(), e))
    })
}
