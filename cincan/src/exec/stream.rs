use crate::provenance::StreamDigest;
use cincan_shared::errors::{CincanError, CincanResult};
use std::io::Write;

/// One standard stream of the tool: digest, optional buffer, optional sink.
pub(super) struct ToolStream<'a> {
    name: &'static str,
    digest: StreamDigest,
    raw: Option<Vec<u8>>,
    sink: Option<&'a mut dyn Write>,
}

impl<'a> ToolStream<'a> {
    pub fn new(name: &'static str, sink: Option<&'a mut dyn Write>, buffer: bool) -> Self {
        Self {
            name,
            digest: StreamDigest::new(),
            raw: buffer.then(Vec::new),
            sink,
        }
    }

    /// Hash `data`, then buffer it or pass it on.
    pub fn accept(&mut self, data: &[u8]) -> CincanResult<()> {
        self.digest.update(data);
        if let Some(raw) = self.raw.as_mut() {
            raw.extend_from_slice(data);
        } else if let Some(sink) = self.sink.as_mut() {
            sink.write_all(data)
                .and_then(|_| sink.flush())
                .map_err(|e| CincanError::Terminal(format!("Failed to write {}: {}", self.name, e)))?;
        }
        Ok(())
    }

    pub fn digest(&self) -> &StreamDigest {
        &self.digest
    }

    pub fn take_raw(&mut self) -> Option<Vec<u8>> {
        self.raw.take()
    }
}
