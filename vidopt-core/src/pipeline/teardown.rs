//! Guaranteed, ordered release of everything a transcode opened.

use tracing::{debug, warn};

use super::{MuxCoordinator, TranscodeError};
use crate::media::{CodecPort, MediaSource};

/// Outcome of releasing pipeline resources.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Labels of resources released, in release order.
    pub released: Vec<&'static str>,
    /// Release failures other than the writer's, which are only logged.
    pub failures: Vec<(&'static str, String)>,
    /// Writer stop/close failure; fatal for an otherwise successful run.
    pub writer_error: Option<TranscodeError>,
}

/// Handles opened by one transcode invocation.
///
/// Released in a fixed order: codecs, then the source, then the writer.
/// Every handle is taken out of its slot before it is released, so nothing is
/// released twice even if `release_all` runs again from `Drop` after a panic.
#[derive(Default)]
pub struct PipelineResources {
    pub source: Option<Box<dyn MediaSource>>,
    pub video_decoder: Option<Box<dyn CodecPort>>,
    pub video_encoder: Option<Box<dyn CodecPort>>,
    pub audio_decoder: Option<Box<dyn CodecPort>>,
    pub audio_encoder: Option<Box<dyn CodecPort>>,
    pub mux: Option<MuxCoordinator>,
}

impl PipelineResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        let codecs = [
            ("video decoder", &mut self.video_decoder),
            ("video encoder", &mut self.video_encoder),
            ("audio decoder", &mut self.audio_decoder),
            ("audio encoder", &mut self.audio_encoder),
        ];
        for (label, codec) in codecs {
            if let Some(mut codec) = codec.take() {
                if let Err(e) = codec.close() {
                    warn!("Failed to release {label}: {e}");
                    report.failures.push((label, e.to_string()));
                }
                report.released.push(label);
            }
        }

        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.close() {
                warn!("Failed to close source: {e}");
                report.failures.push(("source", e.to_string()));
            }
            report.released.push("source");
        }

        if let Some(mut mux) = self.mux.take() {
            if let Err(e) = mux.finish() {
                report.writer_error = Some(e);
            }
            report.released.push("writer");
        }

        if !report.released.is_empty() {
            debug!(released = ?report.released, "Pipeline resources released");
        }
        report
    }
}

impl Drop for PipelineResources {
    fn drop(&mut self) {
        let report = self.release_all();
        if let Some(e) = report.writer_error {
            warn!("Writer failed during unwinding: {e}");
        }
    }
}
