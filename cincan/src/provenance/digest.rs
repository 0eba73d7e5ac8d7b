//! SHA-256 content digests.

use cincan_shared::errors::{CincanError, CincanResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

const CHUNK: usize = 64 * 1024;

/// Running digest plus byte count of a stream.
#[derive(Clone, Default)]
pub struct StreamDigest {
    hasher: Sha256,
    length: u64,
}

impl StreamDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.length += data.len() as u64;
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Hex digest of everything seen so far.
    pub fn hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

/// Hash everything `reader` yields, copying it into `sink` if given.
pub fn hash_reader<R: Read>(mut reader: R, mut sink: Option<&mut dyn Write>) -> io::Result<String> {
    let mut digest = StreamDigest::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        digest.update(&buf[..n]);
        if let Some(sink) = sink.as_mut() {
            sink.write_all(&buf[..n])?;
        }
    }
    Ok(digest.hex())
}

/// Hex SHA-256 of a host file.
pub fn hash_file(path: &Path) -> CincanResult<String> {
    let file = File::open(path).map_err(|e| {
        CincanError::Storage(format!("Failed to open {}: {}", path.display(), e))
    })?;
    hash_reader(file, None)
        .map_err(|e| CincanError::Storage(format!("Failed to read {}: {}", path.display(), e)))
}
