use crate::error::ArchiveError;
use crate::text::is_audio_file;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;

/// Raw audio entry read from an archive
#[derive(Debug)]
pub(crate) struct ArchiveEntry {
    /// Entry path inside the archive, as stored
    pub name: String,
    /// Entry content
    pub data: Vec<u8>,
}

/// Blocking-side end of the entry channel
///
/// Filters entries by the audio allow-list and hands accepted ones to the async
/// side one at a time.
pub(crate) struct EntrySink {
    tx: mpsc::Sender<ArchiveEntry>,
}

impl EntrySink {
    pub(crate) fn new(tx: mpsc::Sender<ArchiveEntry>) -> Self {
        Self { tx }
    }

    /// Whether an entry should be read at all
    pub(crate) fn accepts(&self, name: &str, is_dir: bool) -> bool {
        let accepted = !is_dir && is_audio_file(name);
        if !accepted {
            debug!(entry = name, "skipping non-audio entry");
        }
        accepted
    }

    /// Hand an entry over; `false` once the receiving side is gone
    pub(crate) fn send(&self, name: String, data: Vec<u8>) -> bool {
        self.tx.blocking_send(ArchiveEntry { name, data }).is_ok()
    }
}

/// Map a decoder failure to an [`ArchiveError::Corrupt`] for `path`
pub(crate) fn corrupt(path: &Path, reason: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Read an entry body fully, sized from its declared length
pub(crate) fn read_entry(
    reader: &mut dyn std::io::Read,
    declared_size: u64,
    path: &Path,
) -> Result<Vec<u8>, ArchiveError> {
    let mut data = Vec::with_capacity(declared_size.min(256 * 1024 * 1024) as usize);
    reader
        .read_to_end(&mut data)
        .map_err(|e| corrupt(path, format!("failed to read entry: {}", e)))?;
    Ok(data)
}

