//! Size-limited writing of artifacts to disk
//!
//! The destination rejects files above a fixed size. Artifacts announced as
//! larger are written as numbered parts (`name.000`, `name.001`, ...), each at
//! most the limit, and joined again only when their content must be read.

use super::acquirer::{ReadOutcome, ResilientStream};
use super::pool::BufferPool;
use crate::Result;
use async_trait::async_trait;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Anything the chunker can drain
#[async_trait]
pub trait ChunkSource: Send {
    /// Fill the start of `buf`; see [`ReadOutcome`]
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;
}

#[async_trait]
impl ChunkSource for ResilientStream {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.read(buf).await
    }
}

#[async_trait]
impl<T: AsRef<[u8]> + Send> ChunkSource for std::io::Cursor<T> {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let n = self.read(buf)?;
        Ok(ReadOutcome::Read(n))
    }
}

/// Writes sources to disk under a per-file size limit
#[derive(Clone, Debug)]
pub struct ArtifactChunker {
    transport_limit: u64,
    pool: BufferPool,
}

impl ArtifactChunker {
    /// Create a chunker that keeps every file at or below `transport_limit` bytes
    pub fn new(transport_limit: u64, pool: BufferPool) -> Self {
        Self {
            transport_limit: transport_limit.max(1),
            pool,
        }
    }

    /// The per-file size limit
    pub fn transport_limit(&self) -> u64 {
        self.transport_limit
    }

    /// Drain `source` into `dir`
    ///
    /// When `declared_size` fits the limit a single file `name` is written.
    /// Otherwise the output is split into `name.000`, `name.001`, ... An unknown
    /// size (0) is split by bytes written, and a lone part is renamed to `name`.
    /// Returns the written paths in order.
    pub async fn write<S>(
        &self,
        source: &mut S,
        declared_size: u64,
        dir: &Path,
        name: &str,
    ) -> Result<Vec<PathBuf>>
    where
        S: ChunkSource + ?Sized,
    {
        tokio::fs::create_dir_all(dir).await?;

        if declared_size != 0 && declared_size <= self.transport_limit {
            let path = dir.join(name);
            self.write_single(source, &path).await?;
            return Ok(vec![path]);
        }

        let parts = self.write_parts(source, dir, name).await?;
        if declared_size == 0
            && let [part] = parts.as_slice()
        {
            let path = dir.join(name);
            tokio::fs::rename(part, &path).await?;
            return Ok(vec![path]);
        }
        Ok(parts)
    }

    async fn write_parts<S>(&self, source: &mut S, dir: &Path, name: &str) -> Result<Vec<PathBuf>>
    where
        S: ChunkSource + ?Sized,
    {
        'restart: loop {
            let mut buf = self.pool.get();
            let mut parts: Vec<PathBuf> = Vec::new();

            loop {
                let path = dir.join(format!("{}.{:03}", name, parts.len()));
                let mut file = tokio::fs::File::create(&path).await?;
                let mut written: u64 = 0;
                let mut exhausted = false;

                while written < self.transport_limit {
                    let want = (self.transport_limit - written).min(buf.len() as u64) as usize;
                    match source.read_chunk(&mut buf[..want]).await? {
                        ReadOutcome::Read(0) => {
                            exhausted = true;
                            break;
                        }
                        ReadOutcome::Read(n) => {
                            file.write_all(&buf[..n]).await?;
                            written += n as u64;
                        }
                        ReadOutcome::Rewound => {
                            drop(file);
                            parts.push(path);
                            discard(&parts).await;
                            tracing::warn!(name, "Source restarted, rewriting all parts");
                            continue 'restart;
                        }
                    }
                }
                file.flush().await?;
                drop(file);

                if written == 0 && !parts.is_empty() {
                    tokio::fs::remove_file(&path).await?;
                } else {
                    parts.push(path);
                }

                if exhausted {
                    tracing::debug!(name, parts = parts.len(), "Artifact written in parts");
                    return Ok(parts);
                }
            }
        }
    }

    async fn write_single<S>(&self, source: &mut S, path: &Path) -> Result<()>
    where
        S: ChunkSource + ?Sized,
    {
        let mut buf = self.pool.get();
        let mut file = tokio::fs::File::create(path).await?;

        loop {
            match source.read_chunk(&mut buf).await? {
                ReadOutcome::Read(0) => break,
                ReadOutcome::Read(n) => file.write_all(&buf[..n]).await?,
                ReadOutcome::Rewound => {
                    tracing::warn!(path = %path.display(), "Source restarted, rewriting file");
                    file = tokio::fs::File::create(path).await?;
                }
            }
        }
        file.flush().await?;
        Ok(())
    }

    /// Make the content of `parts` readable as one file
    ///
    /// A single part is used in place. Several parts are concatenated into a
    /// temporary file in `scratch_dir` that carries the archive's own extension
    /// and disappears when the returned value is dropped.
    pub async fn reassemble(&self, parts: &[PathBuf], scratch_dir: &Path) -> Result<Reassembled> {
        match parts {
            [] => Err(crate::Error::Other("no parts to reassemble".to_string())),
            [single] => Ok(Reassembled::Single(single.clone())),
            many => {
                let suffix = inner_extension(&many[0]);
                let parts = many.to_vec();
                let scratch_dir = scratch_dir.to_path_buf();

                let combined = tokio::task::spawn_blocking(move || -> Result<tempfile::NamedTempFile> {
                    std::fs::create_dir_all(&scratch_dir)?;
                    let mut combined = tempfile::Builder::new()
                        .suffix(&suffix)
                        .tempfile_in(&scratch_dir)?;
                    for part in &parts {
                        let mut input = std::fs::File::open(part)?;
                        std::io::copy(&mut input, combined.as_file_mut())?;
                    }
                    Ok(combined)
                })
                .await
                .map_err(|e| crate::Error::Other(format!("Reassembly task panicked: {}", e)))??;

                tracing::debug!(
                    parts = many.len(),
                    path = %combined.path().display(),
                    "Parts reassembled"
                );
                Ok(Reassembled::Combined(combined))
            }
        }
    }
}

/// Readable form of a possibly multi-part artifact
#[derive(Debug)]
pub enum Reassembled {
    /// The artifact was a single file
    Single(PathBuf),
    /// Concatenated parts, deleted on drop
    Combined(tempfile::NamedTempFile),
}

impl Reassembled {
    /// Where the joined content can be read
    pub fn path(&self) -> &Path {
        match self {
            Reassembled::Single(path) => path,
            Reassembled::Combined(file) => file.path(),
        }
    }
}

/// `a.zip.000` -> `.zip`
fn inner_extension(part: &Path) -> String {
    part.file_stem()
        .map(Path::new)
        .and_then(Path::extension)
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

async fn discard(parts: &[PathBuf]) {
    for part in parts {
        if let Err(e) = tokio::fs::remove_file(part).await {
            tracing::warn!(path = %part.display(), error = %e, "Failed to remove stale part");
        }
    }
}
