use super::{TarTool, UploadStats, clean_entry_name};
use crate::files::UploadEntry;
use crate::provenance::{FileLog, hash_file, hash_reader};
use crate::util::{unix_now, unix_secs};
use chrono::{DateTime, Local};
use cincan_shared::errors::{CincanError, CincanResult};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::Instant;
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, info, warn};

/// Mode for directories the container user must be able to write into.
const OPEN_DIR_MODE: u32 = 0o777;

fn local_time(secs: i64) -> Option<chrono::NaiveDateTime> {
    DateTime::from_timestamp(secs, 0).map(|t| t.with_timezone(&Local).naive_local())
}

impl TarTool<'_> {
    /// Build a tar from host files and put it into the working directory.
    ///
    /// Returns a [`FileLog`] for every regular file uploaded.
    pub fn upload(
        &self,
        entries: &[UploadEntry],
        stats: &mut UploadStats,
    ) -> CincanResult<Vec<FileLog>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let now = unix_now();
        let uid = unsafe { libc::getuid() } as u64;
        let gid = unsafe { libc::getgid() } as u64;

        let mut builder = Builder::new(Vec::new());
        let mut dirs: HashSet<String> = HashSet::new();
        let mut in_files = Vec::new();

        for entry in entries {
            let arc_name = entry.arc_name.trim_end_matches('/');
            info!("<= {}", entry.host.display());

            // parents first, each only once
            let parents: Vec<&str> = Path::new(arc_name)
                .ancestors()
                .skip(1)
                .filter_map(|p| p.to_str())
                .filter(|p| !p.is_empty())
                .collect();
            for parent in parents.into_iter().rev() {
                if dirs.insert(parent.to_string()) {
                    append_dir(&mut builder, parent, OPEN_DIR_MODE, uid, gid, now)?;
                    stats.record(parent, 0, now, now);
                }
            }

            let metadata = match fs::metadata(&entry.host) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // forced output directory that is not on the host yet
                    if dirs.insert(arc_name.to_string()) {
                        append_dir(&mut builder, arc_name, OPEN_DIR_MODE, uid, gid, now)?;
                        stats.record(arc_name, 0, now, now);
                    }
                    continue;
                }
                Err(e) => {
                    return Err(CincanError::Transfer(format!(
                        "Failed to stat {}: {}",
                        entry.host.display(),
                        e
                    )));
                }
            };
            let mtime = unix_secs(metadata.modified().unwrap_or(std::time::UNIX_EPOCH));

            if metadata.is_dir() {
                if dirs.insert(arc_name.to_string()) {
                    append_dir(
                        &mut builder,
                        arc_name,
                        metadata.mode() & 0o7777,
                        metadata.uid() as u64,
                        metadata.gid() as u64,
                        mtime,
                    )?;
                    stats.record(arc_name, 0, mtime, now);
                }
            } else if metadata.is_file() {
                let file = File::open(&entry.host).map_err(|e| {
                    CincanError::Transfer(format!(
                        "Failed to open {}: {}",
                        entry.host.display(),
                        e
                    ))
                })?;
                let mut header = Header::new_gnu();
                header.set_entry_type(EntryType::Regular);
                header.set_size(metadata.len());
                header.set_mode(metadata.mode() & 0o7777);
                header.set_uid(metadata.uid() as u64);
                header.set_gid(metadata.gid() as u64);
                header.set_mtime(mtime.max(0) as u64);
                builder
                    .append_data(&mut header, arc_name, file)
                    .map_err(|e| {
                        CincanError::Transfer(format!("Failed to add {} to tar: {}", arc_name, e))
                    })?;
                stats.record(arc_name, metadata.len(), mtime, now);

                let digest = hash_file(&entry.host)?;
                let mut log = FileLog::new(&entry.host, digest);
                log.timestamp = local_time(mtime);
                in_files.push(log);
            } else {
                warn!("Skipping {}, not a regular file or directory", entry.host.display());
            }
        }

        let data = builder
            .into_inner()
            .map_err(|e| CincanError::Transfer(format!("Failed to finish upload tar: {}", e)))?;
        self.put(&data)?;
        Ok(in_files)
    }

    /// Forward a caller supplied tar unchanged into the working directory.
    ///
    /// Every entry is recorded in `stats` and regular entries are digested.
    pub fn upload_tar<R: Read>(
        &self,
        mut reader: R,
        stats: &mut UploadStats,
    ) -> CincanResult<Vec<FileLog>> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| CincanError::Transfer(format!("Failed to read input tar: {}", e)))?;
        let now = unix_now();
        let mut in_files = Vec::new();

        let mut archive = Archive::new(data.as_slice());
        let entries = archive
            .entries()
            .map_err(|e| CincanError::Transfer(format!("Failed to read input tar: {}", e)))?;
        for entry in entries {
            let mut entry = entry
                .map_err(|e| CincanError::Transfer(format!("Bad input tar entry: {}", e)))?;
            let name = {
                let path = entry.path().map_err(|e| {
                    CincanError::Transfer(format!("Bad input tar entry name: {}", e))
                })?;
                clean_entry_name(&path.to_string_lossy()).to_string()
            };
            let header = entry.header();
            let size = header.size().unwrap_or(0);
            let mtime = header.mtime().unwrap_or(0) as i64;
            let entry_type = header.entry_type();
            stats.record(&name, size, mtime, now);
            info!("<= {}", name);

            if entry_type.is_file() {
                let digest = hash_reader(&mut entry, None).map_err(|e| {
                    CincanError::Transfer(format!("Failed to read {} from input tar: {}", name, e))
                })?;
                let mut log = FileLog::new(&name, digest);
                log.timestamp = local_time(mtime);
                in_files.push(log);
            }
        }

        self.put(&data)?;
        Ok(in_files)
    }

    fn put(&self, data: &[u8]) -> CincanResult<()> {
        let start = Instant::now();
        self.container.put_archive(self.work_dir_path(), data)?;
        debug!("put_archive time {:?}", start.elapsed());
        Ok(())
    }
}

fn append_dir(
    builder: &mut Builder<Vec<u8>>,
    name: &str,
    mode: u32,
    uid: u64,
    gid: u64,
    mtime: i64,
) -> CincanResult<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(mode);
    header.set_uid(uid);
    header.set_gid(gid);
    header.set_mtime(mtime.max(0) as u64);
    builder
        .append_data(&mut header, format!("{}/", name), io::empty())
        .map_err(|e| CincanError::Transfer(format!("Failed to add {} to tar: {}", name, e)))
}
