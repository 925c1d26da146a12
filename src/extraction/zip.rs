use crate::error::ArchiveError;
use std::path::Path;
use tracing::debug;

use super::shared::{EntrySink, corrupt, read_entry};

/// Stream the audio entries of a ZIP archive into `sink`
pub(crate) fn read_audio_entries(archive_path: &Path, sink: &EntrySink) -> Result<(), ArchiveError> {
    let file = std::fs::File::open(archive_path)
        .map_err(|e| corrupt(archive_path, format!("failed to open ZIP archive: {}", e)))?;

    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| corrupt(archive_path, format!("failed to read ZIP archive: {}", e)))?;

    debug!(?archive_path, entries = archive.len(), "reading ZIP archive");

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| corrupt(archive_path, format!("failed to read ZIP entry: {}", e)))?;

        let name = entry.name().to_string();
        if !sink.accepts(&name, entry.is_dir()) {
            continue;
        }

        let declared_size = entry.size();
        let data = read_entry(&mut entry, declared_size, archive_path)?;
        if !sink.send(name, data) {
            break;
        }
    }

    Ok(())
}
