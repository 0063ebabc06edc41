//! Live preview: a lazy, cancellable multipart-JPEG chunk sequence.
//!
//! Each item of the iterator is one complete multipart part:
//! `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg bytes>\r\n`, suitable
//! for `multipart/x-mixed-replace` consumption by a browser.
//!
//! The sequence is unbounded; it ends only when the consumer cancels (or
//! drops the iterator) or the device stops yielding frames. On every
//! termination path the device handle and its lease are released exactly
//! once. A JPEG encode failure for a single frame skips that frame and keeps
//! the stream alive.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::lease::DeviceLeases;
use crate::source::FrameSource;
use crate::{Camera, Resolution};

/// Boundary token shared with the collaborator layer's response headers.
pub const STREAM_BOUNDARY: &str = "frame";

/// MIME line for the replace-stream response.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Cooperative cancellation handle held by the preview consumer.
///
/// Cloned freely; the producer checks it between frame emissions.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Live preview stream over one exclusively-leased camera.
pub struct PreviewStream {
    // `None` once the device has been released.
    source: Option<FrameSource>,
    cancel: CancelToken,
    jpeg_quality: u8,
    chunks_emitted: u64,
}

impl PreviewStream {
    /// Acquire a lease and open a fresh source for this consumer.
    ///
    /// Preview never shares a source with a capture job; a camera tied up by
    /// one surfaces as `DeviceBusy` here.
    pub fn open(
        leases: &Arc<DeviceLeases>,
        camera: Camera,
        resolution: Option<Resolution>,
        jpeg_quality: u8,
    ) -> Result<Self> {
        let lease = leases.acquire(camera)?;
        let source = FrameSource::open(camera, resolution, lease)?;
        log::info!("preview stream opened on {}", camera);
        Ok(Self {
            source: Some(source),
            cancel: CancelToken::new(),
            jpeg_quality,
            chunks_emitted: 0,
        })
    }

    /// Handle the consumer (or the surrounding I/O layer) uses to stop the
    /// stream on disconnect.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted
    }

    pub fn is_finished(&self) -> bool {
        self.source.is_none()
    }

    /// Release the device exactly once.
    fn finish(&mut self) {
        if let Some(mut source) = self.source.take() {
            let camera = source.camera();
            source.release();
            log::info!(
                "preview stream on {} closed after {} chunks",
                camera,
                self.chunks_emitted
            );
        }
    }
}

impl Iterator for PreviewStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.cancel.is_cancelled() {
                self.finish();
                return None;
            }
            let source = self.source.as_mut()?;

            match source.read_frame() {
                Ok(Some(frame)) => match frame.to_jpeg(self.jpeg_quality) {
                    Ok(jpeg) => {
                        self.chunks_emitted += 1;
                        return Some(multipart_chunk(&jpeg));
                    }
                    Err(e) => {
                        // One bad frame does not end the preview.
                        log::warn!("preview jpeg encode failed, skipping frame: {}", e);
                        continue;
                    }
                },
                // A failed read is fatal to the preview, unlike capture.
                Ok(None) => {
                    log::warn!("preview read failed on {}, ending stream", source.camera());
                    self.finish();
                    return None;
                }
                Err(e) => {
                    log::error!("preview stream error: {}", e);
                    self.finish();
                    return None;
                }
            }
        }
    }
}

impl Drop for PreviewStream {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Wrap one JPEG image in the fixed multipart delimiter.
fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\n\r\n",
        STREAM_BOUNDARY
    );
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}
