//! Motion-JPEG framing.
//!
//! [`JpegExtractor`] recovers whole JPEG images from an arbitrary byte
//! stream (the camera's own multipart output, chunked however the network
//! delivered it) by scanning for the SOI / EOI markers.  [`frame_part`]
//! wraps one image as a `multipart/x-mixed-replace` part for browsers.

use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

/// Multipart boundary used on `/video_feed`.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` of the browser-facing stream.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Largest image the extractor will buffer before giving up on it.
///
/// A stream that never produces an end-of-image marker would otherwise grow
/// the buffer without bound.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024; // 4 MiB

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Frame one JPEG image as a multipart part:
/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`.
pub fn frame_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

/// Incremental SOI/EOI scanner.
#[derive(Debug, Default)]
pub struct JpegExtractor {
    buf: BytesMut,
    /// Offset from which the next EOI search resumes, once `buf` starts at SOI.
    eoi_from: usize,
}

impl JpegExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the camera.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Drop everything buffered, e.g. after reopening the stream.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.eoi_from = 0;
    }

    /// Bytes currently held.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete image, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if self.eoi_from == 0 {
            let Some(start) = find_marker(&self.buf, 0, SOI) else {
                // A trailing 0xFF may be the first half of a split marker.
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let discard = self.buf.len() - keep;
                self.buf.advance(discard);
                return None;
            };
            self.buf.advance(start);
            self.eoi_from = SOI.len();
        }

        match find_marker(&self.buf, self.eoi_from, EOI) {
            Some(end) => {
                self.eoi_from = 0;
                Some(self.buf.split_to(end + EOI.len()).freeze())
            }
            None => {
                if self.buf.len() > MAX_FRAME_BYTES {
                    warn!(buffered = self.buf.len(), "JPEG frame exceeds limit, discarding");
                    self.clear();
                } else {
                    self.eoi_from = self.buf.len().saturating_sub(1).max(SOI.len());
                }
                None
            }
        }
    }
}

fn find_marker(haystack: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn frame_part_layout() {
        let part = frame_part(&[1, 2, 3]);
        let mut expected = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        expected.extend_from_slice(&[1, 2, 3]);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(part.as_ref(), expected.as_slice());
    }

    #[test]
    fn extracts_frame_inside_camera_multipart() {
        let image = jpeg(b"pixels");
        let mut chunk = b"--123456789000000000000987654321\r\nContent-Type: image/jpeg\r\nContent-Length: 10\r\n\r\n".to_vec();
        chunk.extend_from_slice(&image);
        chunk.extend_from_slice(b"\r\n");

        let mut ex = JpegExtractor::new();
        ex.push(&chunk);

        assert_eq!(ex.next_frame().as_deref(), Some(image.as_slice()));
        assert_eq!(ex.next_frame(), None);
    }

    #[test]
    fn frame_split_across_chunks() {
        let image = jpeg(b"0123456789");
        let mut ex = JpegExtractor::new();

        ex.push(&image[..4]);
        assert_eq!(ex.next_frame(), None);
        ex.push(&image[4..9]);
        assert_eq!(ex.next_frame(), None);
        ex.push(&image[9..]);

        assert_eq!(ex.next_frame().as_deref(), Some(image.as_slice()));
    }

    #[test]
    fn markers_split_between_chunks() {
        let image = jpeg(b"abc");
        let mut ex = JpegExtractor::new();

        // Split both the SOI and the EOI between two pushes.
        ex.push(b"junk\xFF");
        assert_eq!(ex.next_frame(), None);
        ex.push(&image[1..image.len() - 1]);
        assert_eq!(ex.next_frame(), None);
        ex.push(&image[image.len() - 1..]);

        assert_eq!(ex.next_frame().as_deref(), Some(image.as_slice()));
    }

    #[test]
    fn two_frames_in_one_chunk() {
        let a = jpeg(b"first");
        let b = jpeg(b"second");
        let mut ex = JpegExtractor::new();
        ex.push(&[a.as_slice(), &b"\r\n--frame\r\n"[..], b.as_slice()].concat());

        assert_eq!(ex.next_frame().as_deref(), Some(a.as_slice()));
        assert_eq!(ex.next_frame().as_deref(), Some(b.as_slice()));
        assert_eq!(ex.next_frame(), None);
    }

    #[test]
    fn garbage_without_soi_is_discarded() {
        let mut ex = JpegExtractor::new();
        ex.push(b"no image here");
        assert_eq!(ex.next_frame(), None);
        assert_eq!(ex.buffered(), 0);
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let mut ex = JpegExtractor::new();
        ex.push(&SOI);
        ex.push(&vec![0u8; MAX_FRAME_BYTES + 1]);

        assert_eq!(ex.next_frame(), None);
        assert_eq!(ex.buffered(), 0);

        let image = jpeg(b"ok");
        ex.push(&image);
        assert_eq!(ex.next_frame().as_deref(), Some(image.as_slice()));
    }
}
