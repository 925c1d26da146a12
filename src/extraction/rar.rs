use crate::error::ArchiveError;
use std::path::Path;
use tracing::debug;

use super::shared::{EntrySink, corrupt};

/// Stream the audio entries of a RAR archive into `sink`
pub(crate) fn read_audio_entries(archive_path: &Path, sink: &EntrySink) -> Result<(), ArchiveError> {
    let processor = unrar::Archive::new(archive_path)
        .open_for_processing()
        .map_err(|e| corrupt(archive_path, format!("failed to open RAR archive: {}", e)))?;

    debug!(?archive_path, "reading RAR archive");

    let mut at_header = processor;
    loop {
        let at_file = match at_header.read_header() {
            Ok(Some(entry_processor)) => entry_processor,
            Ok(None) => break,
            Err(e) => return Err(corrupt(archive_path, format!("failed to read RAR header: {}", e))),
        };

        let header = at_file.entry();
        let name = header.filename.to_string_lossy().into_owned();

        if !sink.accepts(&name, header.is_directory()) {
            at_header = at_file
                .skip()
                .map_err(|e| corrupt(archive_path, format!("failed to skip entry: {}", e)))?;
            continue;
        }

        let (data, next) = at_file
            .read()
            .map_err(|e| corrupt(archive_path, format!("failed to read RAR entry: {}", e)))?;
        if !sink.send(name, data) {
            break;
        }
        at_header = next;
    }

    Ok(())
}
