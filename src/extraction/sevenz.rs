use crate::error::ArchiveError;
use sevenz_rust::{Password, SevenZReader};
use std::path::Path;
use tracing::debug;

use super::shared::{EntrySink, corrupt, read_entry};

/// Stream the audio entries of a 7z archive into `sink`
///
/// Solid blocks are decoded front to back, so skipped entries are drained
/// rather than seeked over.
pub(crate) fn read_audio_entries(archive_path: &Path, sink: &EntrySink) -> Result<(), ArchiveError> {
    let mut reader = SevenZReader::open(archive_path, Password::empty())
        .map_err(|e| corrupt(archive_path, format!("failed to open 7z archive: {}", e)))?;

    debug!(?archive_path, "reading 7z archive");

    let mut receiver_gone = false;
    let mut entry_error: Option<ArchiveError> = None;

    reader
        .for_each_entries(|entry, entry_reader| {
            let name = entry.name().to_string();
            if !sink.accepts(&name, entry.is_directory()) {
                if let Err(e) = std::io::copy(entry_reader, &mut std::io::sink()) {
                    entry_error = Some(corrupt(archive_path, format!("failed to skip entry: {}", e)));
                    return Ok(false);
                }
                return Ok(true);
            }

            match read_entry(entry_reader, entry.size(), archive_path) {
                Ok(data) => {
                    if !sink.send(name, data) {
                        receiver_gone = true;
                        return Ok(false);
                    }
                    Ok(true)
                }
                Err(e) => {
                    entry_error = Some(e);
                    Ok(false)
                }
            }
        })
        .map_err(|e| corrupt(archive_path, format!("failed to decode 7z archive: {}", e)))?;

    if let Some(e) = entry_error {
        return Err(e);
    }
    if receiver_gone {
        debug!(?archive_path, "7z reader stopped early");
    }
    Ok(())
}
