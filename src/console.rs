//! Console channel over an instance's serial output.
//!
//! Two transports expose the same accumulate-and-search surface: a pulled
//! log snapshot (each poll replaces the view) and a pushed byte stream over
//! the per-instance console URL (each read appends). Stream read timeouts
//! are non-fatal so polling loops can keep accumulating, and stream chunks
//! are decoded incrementally so a codepoint split across two reads is
//! reassembled rather than mangled.

use std::sync::LazyLock;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;

use crate::client::ClientError;
use crate::control_plane::ControlPlane;

/// Read timeout applied to each pull from a streaming channel.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

// Streaming responses stay open indefinitely, so this client carries no
// request timeout; the caller's wall-clock deadline bounds each read.
static STREAM_CLIENT: LazyLock<reqwest::Client> =
    LazyLock::new(|| reqwest::Client::builder().build().unwrap_or_else(|_| reqwest::Client::new()));

enum ChannelKind {
    Snapshot,
    Stream(BoxStream<'static, Result<Vec<u8>, reqwest::Error>>),
    Closed,
}

impl std::fmt::Debug for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Snapshot => "Snapshot",
            Self::Stream(_) => "Stream",
            Self::Closed => "Closed",
        };
        f.write_str(label)
    }
}

/// Live view of one instance's console output, owned exclusively by a single
/// lifecycle controller.
#[derive(Debug)]
pub struct ConsoleChannel {
    kind: ChannelKind,
    // Trailing bytes of an incomplete UTF-8 sequence from the last chunk.
    carry: Vec<u8>,
}

impl ConsoleChannel {
    /// Opens a pull-based channel backed by the log-snapshot endpoint.
    #[must_use]
    pub const fn snapshot() -> Self {
        Self {
            kind: ChannelKind::Snapshot,
            carry: Vec::new(),
        }
    }

    pub(crate) const fn streaming(
        stream: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    ) -> Self {
        Self {
            kind: ChannelKind::Stream(stream),
            carry: Vec::new(),
        }
    }

    /// Opens a persistent streaming channel over the console URL.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the connection cannot be
    /// established or [`ClientError::Api`] when the endpoint rejects it.
    pub async fn open_stream(url: &str) -> Result<Self, ClientError> {
        let response = STREAM_CLIENT
            .get(url)
            .send()
            .await
            .map_err(|err| ClientError::transport(url, &err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|err| ClientError::transport(url, &err))?;
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(Self::streaming(stream))
    }

    /// Pulls the next batch of console text into `buffer`.
    ///
    /// Snapshot channels replace the buffer with the full log; streaming
    /// channels append whatever arrived within `read_timeout`. Returns
    /// `false` when no new data was available, which callers must treat as
    /// non-fatal. A stream that ends closes the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the log fetch or the stream itself
    /// fails; an expired `read_timeout` is not an error.
    pub async fn fill<C: ControlPlane>(
        &mut self,
        client: &C,
        instance_id: &str,
        buffer: &mut String,
        read_timeout: Duration,
    ) -> Result<bool, ClientError> {
        match &mut self.kind {
            ChannelKind::Snapshot => {
                let log = client.console_log(instance_id).await?;
                buffer.clear();
                buffer.push_str(&log);
                Ok(true)
            }
            ChannelKind::Stream(stream) => {
                match tokio::time::timeout(read_timeout, stream.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        decode_chunk(&mut self.carry, &chunk, buffer);
                        Ok(true)
                    }
                    Ok(Some(Err(err))) => Err(ClientError::Transport {
                        endpoint: String::from("console stream"),
                        message: err.to_string(),
                    }),
                    // Stream ended: nothing more will arrive, so flush any
                    // held tail and stop blocking future reads.
                    Ok(None) => {
                        if !self.carry.is_empty() {
                            buffer.push_str(&String::from_utf8_lossy(&self.carry));
                            self.carry.clear();
                        }
                        self.kind = ChannelKind::Closed;
                        Ok(false)
                    }
                    // Nothing arrived in time.
                    Err(_) => Ok(false),
                }
            }
            ChannelKind::Closed => Ok(false),
        }
    }

    /// Closes the channel, releasing the underlying stream. Idempotent.
    pub fn close(&mut self) {
        self.kind = ChannelKind::Closed;
    }

    /// Returns `true` once the channel is closed, whether by
    /// [`ConsoleChannel::close`] or by the stream ending.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.kind, ChannelKind::Closed)
    }
}

// Chunk boundaries are arbitrary, so a multi-byte sequence can arrive half
// in one read and half in the next; `carry` holds the incomplete tail until
// the rest shows up. Genuinely invalid bytes become replacement characters.
fn decode_chunk(carry: &mut Vec<u8>, chunk: &[u8], buffer: &mut String) {
    carry.extend_from_slice(chunk);
    loop {
        match std::str::from_utf8(carry) {
            Ok(text) => {
                buffer.push_str(text);
                carry.clear();
                return;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                buffer.push_str(&String::from_utf8_lossy(&carry[..valid]));
                match err.error_len() {
                    Some(bad) => {
                        buffer.push(char::REPLACEMENT_CHARACTER);
                        carry.drain(..valid + bad);
                    }
                    None => {
                        carry.drain(..valid);
                        return;
                    }
                }
            }
        }
    }
}
