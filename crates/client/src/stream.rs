//! Long-lived push stream connection with reconnect and backoff

use ricloud_config::Settings;
use ricloud_core::{Error, Result, StreamEndpoint, MAX_RECONNECT_DELAY_SECS};
use ricloud_listener::{Dispatcher, HandlerError};
use ricloud_wire::{DecodeError, Frame, FrameDecoder};
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;
use url::Url;

/// Delay before reconnect attempt `retry_count` (1-based).
///
/// The first two retries are immediate, then the delay grows
/// quadratically up to a one minute ceiling.
#[must_use]
pub fn backoff_delay(retry_count: u32) -> Duration {
    let step = u64::from(retry_count.saturating_sub(2));
    Duration::from_secs(step.saturating_mul(step).min(MAX_RECONNECT_DELAY_SECS))
}

/// Connection-level failures. Never surfaced, they lead to a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("stream endpoint answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("read failed: {0}")]
    Read(String),

    #[error("protocol violation: {0}")]
    Protocol(#[from] DecodeError),
}

/// Why a connected session ended
enum SessionEnd {
    Closed,
    Shutdown,
    Failed(TransportError),
    Fatal(HandlerError),
}

/// Client for the push stream.
///
/// Lifecycle: connect, stream, and on any transport error back off and
/// connect again. Only a shutdown signal or a fatal handler error ends
/// [`StreamClient::run`].
pub struct StreamClient {
    url: Url,
    channel: String,
    token: String,
    http: reqwest::Client,
    sweep_interval: Duration,
    retry_count: u32,
    streaming: bool,
}

impl StreamClient {
    pub fn new(endpoint: &StreamEndpoint, settings: &Settings) -> Result<Self> {
        if settings.chunks.sweep_interval.is_zero() {
            return Err(Error::configuration("chunk sweep interval must be positive"));
        }
        let url = Url::parse(&endpoint.url()).map_err(|e| {
            Error::configuration(format!("Invalid stream endpoint '{}': {e}", endpoint.url()))
        })?;
        // No overall timeout: the response body never ends on its own
        let http = reqwest::Client::builder()
            .connect_timeout(settings.stream.connect_timeout)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            url,
            channel: settings.stream.channel.clone(),
            token: settings.token.clone(),
            http,
            sweep_interval: settings.chunks.sweep_interval,
            retry_count: 0,
            streaming: false,
        })
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Stream until shutdown is signalled or a handler fails fatally
    pub async fn run(
        &mut self,
        dispatcher: &mut Dispatcher,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::result::Result<(), HandlerError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let span = ricloud_utils::tracing::stream_span(&self.channel, self.retry_count);
            let end = async {
                match self.connect().await {
                    Ok(response) => {
                        self.retry_count = 0;
                        self.streaming = true;
                        tracing::info!(url = %self.url, "stream connected");
                        let end = self.consume(response, dispatcher, &mut shutdown).await;
                        self.streaming = false;
                        end
                    }
                    Err(err) => SessionEnd::Failed(err),
                }
            }
            .instrument(span)
            .await;

            match end {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::Fatal(err) => return Err(err),
                SessionEnd::Closed => tracing::warn!("stream connection closed"),
                SessionEnd::Failed(err) => tracing::warn!(error = %err, "stream connection failed"),
            }

            self.retry_count += 1;
            let delay = backoff_delay(self.retry_count);
            tracing::info!(
                retry_count = self.retry_count,
                delay_secs = delay.as_secs(),
                "reconnecting to stream"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    async fn connect(&self) -> std::result::Result<reqwest::Response, TransportError> {
        let response = self
            .http
            .get(self.url.clone())
            .query(&[("stream", self.channel.as_str())])
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.token))
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn consume(
        &self,
        mut response: reqwest::Response,
        dispatcher: &mut Dispatcher,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut decoder = FrameDecoder::new();
        let mut sweep = tokio::time::interval_at(
            tokio::time::Instant::now() + self.sweep_interval,
            self.sweep_interval,
        );

        loop {
            tokio::select! {
                chunk = response.chunk() => {
                    let bytes = match chunk {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => {
                            return match decoder.finish() {
                                Ok(()) => SessionEnd::Closed,
                                Err(err) => SessionEnd::Failed(err.into()),
                            };
                        }
                        Err(err) => return SessionEnd::Failed(TransportError::Read(err.to_string())),
                    };
                    decoder.push(&bytes);
                    loop {
                        let frame = match decoder.next_frame() {
                            Ok(Some(frame)) => frame,
                            Ok(None) => break,
                            Err(err) => return SessionEnd::Failed(err.into()),
                        };
                        match frame {
                            Frame::Heartbeat => dispatcher.on_heartbeat(),
                            Frame::Message { header, body } => {
                                if let Err(err) = dispatcher.on_message(&header, body).await {
                                    return SessionEnd::Fatal(err);
                                }
                            }
                        }
                    }
                }
                _ = sweep.tick() => {
                    let swept = dispatcher.sweep_idle_chunks();
                    if swept > 0 {
                        tracing::warn!(swept, "dropped idle chunk buffers");
                    }
                }
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 0)]
    #[case(2, 0)]
    #[case(3, 1)]
    #[case(4, 4)]
    #[case(5, 9)]
    #[case(6, 16)]
    #[case(9, 49)]
    #[case(10, 60)]
    #[case(u32::MAX, 60)]
    fn test_backoff_delay(#[case] retry_count: u32, #[case] expected_secs: u64) {
        assert_eq!(backoff_delay(retry_count), Duration::from_secs(expected_secs));
    }

    #[test]
    fn test_invalid_endpoint_is_configuration_error() {
        let endpoint = StreamEndpoint {
            protocol: String::new(),
            host: "stream.example.com".into(),
            uri: "/stream/".into(),
        };
        assert!(matches!(
            StreamClient::new(&endpoint, &Settings::default()),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_zero_sweep_interval_is_rejected() {
        let endpoint = StreamEndpoint {
            protocol: "https".into(),
            host: "stream.example.com".into(),
            uri: "/stream/".into(),
        };
        let mut settings = Settings::default();
        settings.chunks.sweep_interval = Duration::ZERO;

        let err = StreamClient::new(&endpoint, &settings).err().unwrap();
        assert!(err.to_string().contains("sweep interval"));
    }
}
