//! Reconnecting download of a single artifact
//!
//! The file host this mirror pulls from drops long transfers regularly and
//! answers with small placeholder pages for files it no longer has. The
//! acquirer turns that into two explicit outcomes: [`Acquisition::SoftUnavailable`]
//! for missing or implausibly small files, and a [`ResilientStream`] that quietly
//! reconnects when the body breaks off.

use crate::config::DownloadConfig;
use crate::error::Error;
use crate::retry::{IsRetryable, RetryPolicy};
use crate::Result;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use std::time::Duration;
use url::Url;

/// Outcome of opening an artifact
#[derive(Debug)]
pub enum Acquisition {
    /// The artifact is available; read it through the stream
    Found(ResilientStream),
    /// The artifact is gone or a placeholder; skip it without failing the post
    SoftUnavailable,
}

/// Result of one [`ResilientStream::read`] call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were placed at the start of the buffer; 0 means end of stream
    Read(usize),
    /// The host could not resume; the stream restarted at byte 0 and everything
    /// read so far must be discarded
    Rewound,
}

/// Opens artifacts over HTTP
#[derive(Clone, Debug)]
pub struct ArtifactAcquirer {
    client: reqwest::Client,
    min_plausible_size: u64,
    idle_timeout: Duration,
    reconnect: RetryPolicy,
}

impl ArtifactAcquirer {
    /// Create an acquirer with its own HTTP client
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    /// Create an acquirer on top of an existing HTTP client
    pub fn with_client(client: reqwest::Client, config: &DownloadConfig) -> Self {
        Self {
            client,
            min_plausible_size: config.min_plausible_size,
            idle_timeout: config.idle_timeout,
            reconnect: RetryPolicy::from(&config.reconnect),
        }
    }

    /// Open `uri` for reading
    ///
    /// Returns [`Acquisition::SoftUnavailable`] on 404 or when the host announces
    /// fewer than `min_plausible_size` bytes. Any other non-success status is an
    /// [`Error::HttpStatus`].
    pub async fn acquire(&self, uri: &Url) -> Result<Acquisition> {
        let response = self.client.get(uri.clone()).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            tracing::warn!(uri = %uri, "Artifact not found");
            return Ok(Acquisition::SoftUnavailable);
        }
        if let Some(length) = response.content_length()
            && length < self.min_plausible_size
        {
            tracing::warn!(
                uri = %uri,
                content_length = length,
                min_plausible_size = self.min_plausible_size,
                "Artifact too small, treating as unavailable"
            );
            return Ok(Acquisition::SoftUnavailable);
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: uri.to_string(),
            });
        }

        tracing::debug!(uri = %uri, content_length = ?response.content_length(), "Artifact opened");
        Ok(Acquisition::Found(ResilientStream {
            client: self.client.clone(),
            uri: uri.clone(),
            total: response.content_length(),
            response: Some(response),
            pending: Vec::new(),
            pending_offset: 0,
            position: 0,
            failures: 0,
            idle_timeout: self.idle_timeout,
            reconnect: self.reconnect.clone(),
        }))
    }
}

/// A download body that survives dropped connections
///
/// On a transient failure the broken response is dropped and the same URI is
/// requested again from the current position. A `206` answer resumes in place;
/// a `200` answer means the host ignored the range, so the stream starts over
/// and reports [`ReadOutcome::Rewound`].
#[derive(Debug)]
pub struct ResilientStream {
    client: reqwest::Client,
    uri: Url,
    response: Option<reqwest::Response>,
    total: Option<u64>,
    pending: Vec<u8>,
    pending_offset: usize,
    position: u64,
    failures: u32,
    idle_timeout: Duration,
    reconnect: RetryPolicy,
}

impl ResilientStream {
    /// Total length announced by the host, if any
    pub fn content_length(&self) -> Option<u64> {
        self.total
    }

    /// Bytes handed out since the start (or the last rewind)
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next bytes into `buf`
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Read(0));
        }

        loop {
            if self.pending_offset < self.pending.len() {
                let n = (self.pending.len() - self.pending_offset).min(buf.len());
                buf[..n].copy_from_slice(&self.pending[self.pending_offset..self.pending_offset + n]);
                self.pending_offset += n;
                self.position += n as u64;
                return Ok(ReadOutcome::Read(n));
            }

            let failure = match self.fill_pending().await {
                Ok(true) => {
                    self.failures = 0;
                    continue;
                }
                Ok(false) => match self.total {
                    Some(total) if self.position < total => Error::Transfer(format!(
                        "body ended at {} of {} bytes",
                        self.position, total
                    )),
                    _ => return Ok(ReadOutcome::Read(0)),
                },
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if self.reconnect_after(failure).await? {
                return Ok(ReadOutcome::Rewound);
            }
        }
    }

    /// Move the next body chunk into the pending buffer; `false` at end of body
    async fn fill_pending(&mut self) -> Result<bool> {
        let Some(response) = self.response.as_mut() else {
            return Err(Error::Transfer("no open response".to_string()));
        };
        loop {
            match tokio::time::timeout(self.idle_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) if chunk.is_empty() => continue,
                Ok(Ok(Some(chunk))) => {
                    self.pending.clear();
                    self.pending.extend_from_slice(&chunk);
                    self.pending_offset = 0;
                    return Ok(true);
                }
                Ok(Ok(None)) => return Ok(false),
                Ok(Err(e)) => return Err(Error::Transfer(e.to_string())),
                Err(_) => {
                    return Err(Error::Transfer(format!(
                        "no data for {}s",
                        self.idle_timeout.as_secs()
                    )));
                }
            }
        }
    }

    /// Re-request the URI from the current position
    ///
    /// Returns `true` when the host restarted from zero.
    async fn reconnect_after(&mut self, mut last_error: Error) -> Result<bool> {
        self.response = None;

        loop {
            self.failures += 1;
            if !self.reconnect.allows(self.failures) {
                tracing::error!(
                    uri = %self.uri,
                    attempts = self.failures,
                    error = %last_error,
                    "Giving up on interrupted download"
                );
                return Err(last_error);
            }

            let delay = self.reconnect.delay_for(self.failures);
            tracing::warn!(
                uri = %self.uri,
                error = %last_error,
                attempt = self.failures,
                delay_ms = delay.as_millis(),
                position = self.position,
                "Download interrupted, reconnecting"
            );
            tokio::time::sleep(delay).await;

            let mut request = self.client.get(self.uri.clone());
            if self.position > 0 {
                request = request.header(RANGE, format!("bytes={}-", self.position));
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let e = Error::Network(e);
                    if e.is_retryable() {
                        last_error = e;
                        continue;
                    }
                    return Err(e);
                }
            };

            let status = response.status();
            if status == StatusCode::PARTIAL_CONTENT {
                tracing::info!(uri = %self.uri, position = self.position, "Download resumed");
                self.response = Some(response);
                return Ok(false);
            }
            if status.is_success() {
                let rewound = self.position > 0;
                if rewound {
                    tracing::warn!(
                        uri = %self.uri,
                        discarded = self.position,
                        "Host ignored range request, restarting download"
                    );
                }
                self.position = 0;
                self.pending.clear();
                self.pending_offset = 0;
                self.total = response.content_length();
                self.response = Some(response);
                return Ok(rewound);
            }

            let e = Error::HttpStatus {
                status: status.as_u16(),
                url: self.uri.to_string(),
            };
            if e.is_retryable() {
                last_error = e;
                continue;
            }
            return Err(e);
        }
    }
}
