//! `FrameSource` trait and the HTTP MJPEG camera driver.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use lockgate_types::GatewayError;
use tracing::info;

use crate::mjpeg::JpegExtractor;

/// Default time allowed between two chunks before the stream is declared dead.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One JPEG image read from a camera.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Monotonic per-source counter, starting at 1.
    pub sequence: u64,
    pub jpeg: Bytes,
}

/// A continuous image stream that may drop and be reopened.
#[async_trait]
pub trait FrameSource: Send {
    /// Stable identifier for this camera, e.g. its stream URL.
    fn id(&self) -> &str;

    /// (Re)open the underlying stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Camera`] when the camera cannot be reached.
    async fn open(&mut self) -> Result<(), GatewayError>;

    /// Read the next image.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Camera`] on any read failure; the source must
    /// be reopened before the next read.
    async fn next_frame(&mut self) -> Result<CameraFrame, GatewayError>;

    /// Release the stream while nobody is watching.
    fn close(&mut self);
}

/// Reads the `multipart/x-mixed-replace` stream served by the camera
/// (e.g. `http://192.168.137.51/stream`).
pub struct HttpMjpegSource {
    url: String,
    client: reqwest::Client,
    read_timeout: Duration,
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    extractor: JpegExtractor,
    sequence: u64,
}

impl HttpMjpegSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            stream: None,
            extractor: JpegExtractor::new(),
            sequence: 0,
        }
    }

    /// Override the inter-chunk read timeout (builder-style).
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl FrameSource for HttpMjpegSource {
    fn id(&self) -> &str {
        &self.url
    }

    async fn open(&mut self) -> Result<(), GatewayError> {
        self.close();
        let response = tokio::time::timeout(self.read_timeout, self.client.get(&self.url).send())
            .await
            .map_err(|_| GatewayError::Camera(format!("{}: open timed out", self.url)))?
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| GatewayError::Camera(format!("{}: {e}", self.url)))?;

        info!(url = %self.url, "camera stream opened");
        self.stream = Some(response.bytes_stream().boxed());
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<CameraFrame, GatewayError> {
        loop {
            if let Some(jpeg) = self.extractor.next_frame() {
                self.sequence += 1;
                return Ok(CameraFrame {
                    sequence: self.sequence,
                    jpeg,
                });
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| GatewayError::Camera(format!("{}: stream not open", self.url)))?;

            let failure = match tokio::time::timeout(self.read_timeout, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    self.extractor.push(&chunk);
                    continue;
                }
                Ok(Some(Err(e))) => e.to_string(),
                Ok(None) => "stream ended".to_string(),
                Err(_) => format!("no data for {:?}", self.read_timeout),
            };
            self.close();
            return Err(GatewayError::Camera(format!("{}: {failure}", self.url)));
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.extractor.clear();
    }
}
