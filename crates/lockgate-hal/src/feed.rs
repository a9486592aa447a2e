//! [`CameraFeed`] – one camera connection shared by every viewer.
//!
//! A single pump task reads images from a [`FrameSource`], frames them as
//! multipart parts, and fans them out over a Tokio broadcast channel.  A
//! viewer that falls behind skips frames instead of slowing the others.
//! While nobody is subscribed the camera stream is released.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::camera::FrameSource;
use crate::mjpeg::frame_part;

/// Buffered parts per viewer before the oldest are skipped.
const DEFAULT_CAPACITY: usize = 16;

/// Poll interval while waiting for the first viewer.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Shared, framed camera stream.
#[derive(Clone, Debug)]
pub struct CameraFeed {
    tx: broadcast::Sender<Bytes>,
}

impl CameraFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every multipart part from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    /// Number of attached viewers.
    pub fn viewers(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Start pumping `source` until `cancel` fires.
    ///
    /// Any open or read failure closes the source, waits `retry_interval`,
    /// and reopens it.
    pub fn spawn<S>(&self, source: S, retry_interval: Duration, cancel: CancellationToken) -> JoinHandle<()>
    where
        S: FrameSource + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = pump(source, tx, retry_interval) => {}
            }
        })
    }
}

impl Default for CameraFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

async fn pump<S: FrameSource>(mut source: S, tx: broadcast::Sender<Bytes>, retry_interval: Duration) {
    let mut open = false;
    loop {
        if tx.receiver_count() == 0 {
            if open {
                debug!(camera = source.id(), "no viewers, releasing camera stream");
                source.close();
                open = false;
            }
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        }

        if !open {
            if let Err(e) = source.open().await {
                warn!(camera = source.id(), error = %e, "Camera stream disconnected, retrying...");
                tokio::time::sleep(retry_interval).await;
                continue;
            }
            open = true;
        }

        match source.next_frame().await {
            Ok(frame) => {
                // Err only means every viewer left in the meantime.
                let _ = tx.send(frame_part(&frame.jpeg));
            }
            Err(e) => {
                warn!(camera = source.id(), error = %e, "Camera stream disconnected, retrying...");
                source.close();
                open = false;
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}
