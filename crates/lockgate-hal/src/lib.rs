//! `lockgate-hal` – Camera Pass-Through
//!
//! Re-exposes the camera's continuous image stream to browsers.  This path is
//! independent of the lock controller link: it has its own retry-on-failure
//! policy and never blocks, or is blocked by, the relay core.
//!
//! # Modules
//!
//! - [`camera`] – [`FrameSource`] trait and the [`HttpMjpegSource`] driver
//!   for cameras serving `multipart/x-mixed-replace` over HTTP.
//! - [`mjpeg`] – JPEG extraction from a raw byte stream and browser framing.
//! - [`feed`] – [`CameraFeed`]: one shared camera connection fanned out to
//!   every viewer.

pub mod camera;
pub mod feed;
pub mod mjpeg;

pub use camera::{CameraFrame, FrameSource, HttpMjpegSource};
pub use feed::CameraFeed;
pub use mjpeg::{JpegExtractor, STREAM_CONTENT_TYPE, frame_part};
