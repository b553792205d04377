//! Per-track pump: source → decoder → encoder → writer.
//!
//! Each loop iteration performs one attempt at every stage, all with the
//! configured short timeout:
//!
//! 1. feed the decoder from the source (or queue end-of-stream),
//! 2. move one decoded buffer into the encoder by byte copy,
//! 3. hand one encoded buffer to the mux coordinator.
//!
//! End-of-stream travels strictly source → decoder → encoder. A decoder or
//! encoder claiming end-of-stream before its upstream stage drained is
//! treated as a codec failure.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::progress::PassPosition;
use super::{MuxCoordinator, TrackDescriptor, TranscodeError, TranscodeResult};
use crate::config::PipelineConfig;
use crate::media::{BufferFlags, CodecOutput, CodecPort, MediaSource, SampleBuffer, TrackKind};

/// End-of-stream flags, one per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainState {
    pub source_drained: bool,
    pub decoder_drained: bool,
    pub encoder_drained: bool,
}

/// Counters for one track pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackStats {
    pub samples_read: u64,
    pub frames_decoded: u64,
    pub frames_transferred: u64,
    /// Decoded frames released without reaching the encoder.
    pub transfers_dropped: u64,
    pub config_buffers_skipped: u64,
    pub samples_written: u64,
    /// Encoded samples dropped because the writer had not started.
    pub samples_dropped: u64,
    pub iterations: u64,
}

/// Registers the encoder's output format if the encoder already knows it.
///
/// Returns `true` when a registration happened.
///
/// # Errors
/// - `TranscodeError::Mux` - Writer rejected the track
pub fn register_known_format(
    kind: TrackKind,
    encoder: &dyn CodecPort,
    mux: &mut MuxCoordinator,
) -> TranscodeResult<bool> {
    if mux.is_registered(kind) {
        return Ok(false);
    }
    let Some(format) = encoder.output_format() else {
        return Ok(false);
    };

    mux.register_format(kind, &format)?;
    mux.try_start()?;
    Ok(true)
}

/// Drives one track through its decoder and encoder.
pub struct TrackPipeline<'a> {
    track: TrackDescriptor,
    source: &'a mut dyn MediaSource,
    decoder: &'a mut dyn CodecPort,
    encoder: &'a mut dyn CodecPort,
    config: &'a PipelineConfig,
    state: DrainState,
    encoder_eos_pending: bool,
    encoder_eos_sent: bool,
    last_input_pts: i64,
    position: PassPosition,
    stats: TrackStats,
}

impl<'a> TrackPipeline<'a> {
    pub fn new(
        track: TrackDescriptor,
        source: &'a mut dyn MediaSource,
        decoder: &'a mut dyn CodecPort,
        encoder: &'a mut dyn CodecPort,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            track,
            source,
            decoder,
            encoder,
            config,
            state: DrainState::default(),
            encoder_eos_pending: false,
            encoder_eos_sent: false,
            last_input_pts: 0,
            position: PassPosition::default(),
            stats: TrackStats::default(),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.track.kind
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn stats(&self) -> &TrackStats {
        &self.stats
    }

    pub fn position(&self) -> PassPosition {
        self.position
    }

    /// Runs until the encoder reports end-of-stream.
    ///
    /// `on_position` is called after every iteration that moved data.
    ///
    /// # Errors
    /// - `TranscodeError::Cancelled` - `cancel` fired; the encoder was signaled end-of-stream
    /// - `TranscodeError::Source` - Source read failed
    /// - `TranscodeError::Codec` - Codec failure, out-of-order end-of-stream or stall
    /// - `TranscodeError::Mux` - Writer registration or write failed
    pub fn run(
        &mut self,
        mux: &mut MuxCoordinator,
        cancel: &CancellationToken,
        on_position: &mut dyn FnMut(PassPosition),
    ) -> TranscodeResult<TrackStats> {
        let kind = self.track.kind;
        info!(track = %kind, index = self.track.index, "Starting track pass");
        let mut last_activity = Instant::now();

        while !self.state.encoder_drained {
            if cancel.is_cancelled() {
                info!(track = %kind, "Cancellation observed");
                self.abort_encoder();
                return Err(TranscodeError::Cancelled);
            }

            if self.step(mux)? {
                last_activity = Instant::now();
                on_position(self.position);
            } else if last_activity.elapsed() > self.config.stall_timeout {
                return Err(TranscodeError::Codec {
                    track: kind,
                    reason: format!(
                        "no progress for {:?} (state {:?})",
                        self.config.stall_timeout, self.state
                    ),
                });
            }
        }

        info!(
            track = %kind,
            read = self.stats.samples_read,
            transferred = self.stats.frames_transferred,
            written = self.stats.samples_written,
            dropped = self.stats.samples_dropped + self.stats.transfers_dropped,
            "Track pass complete"
        );
        Ok(self.stats.clone())
    }

    /// One attempt at every stage. Returns whether any stage moved data.
    ///
    /// # Errors
    /// Same as [`TrackPipeline::run`], except cancellation.
    pub fn step(&mut self, mux: &mut MuxCoordinator) -> TranscodeResult<bool> {
        self.stats.iterations += 1;
        let fed = self.feed_decoder()?;
        let transferred = self.drain_decoder()?;
        let muxed = self.drain_encoder(mux)?;
        Ok(fed || transferred || muxed)
    }

    fn feed_decoder(&mut self) -> TranscodeResult<bool> {
        if self.state.source_drained {
            return Ok(false);
        }

        let kind = self.track.kind;
        let Some(slot) = self
            .decoder
            .try_acquire_input(self.config.poll_timeout)
            .map_err(|e| TranscodeError::codec(kind, e))?
        else {
            return Ok(false);
        };

        let sample = self
            .source
            .read_sample()
            .map_err(|e| TranscodeError::source(kind, e))?;

        match sample {
            Some(sample) => {
                if sample.track_index != self.track.index {
                    return Err(TranscodeError::Source {
                        track: kind,
                        reason: format!(
                            "sample from unselected track {} during {kind} pass",
                            sample.track_index
                        ),
                    });
                }
                if let Some(capacity) = slot.capacity {
                    if sample.buffer.size_bytes() > capacity {
                        return Err(TranscodeError::Codec {
                            track: kind,
                            reason: format!(
                                "sample of {} bytes exceeds decoder input capacity {capacity}",
                                sample.buffer.size_bytes()
                            ),
                        });
                    }
                }

                let buffer = SampleBuffer {
                    flags: BufferFlags {
                        end_of_stream: false,
                        ..sample.buffer.flags
                    },
                    ..sample.buffer
                };
                self.last_input_pts = buffer.presentation_time_us;
                self.stats.samples_read += 1;
                self.position.samples_read = self.stats.samples_read;
                trace!(
                    track = %kind,
                    pts_us = buffer.presentation_time_us,
                    "Queued sample to decoder"
                );

                self.decoder
                    .submit(slot, buffer)
                    .map_err(|e| TranscodeError::codec(kind, e))?;
            }
            None => {
                self.decoder
                    .submit(slot, SampleBuffer::end_of_stream(self.last_input_pts))
                    .map_err(|e| TranscodeError::codec(kind, e))?;
                self.state.source_drained = true;
                debug!(track = %kind, samples = self.stats.samples_read, "Source drained");
            }
        }
        Ok(true)
    }

    fn drain_decoder(&mut self) -> TranscodeResult<bool> {
        if self.state.decoder_drained {
            return self.flush_encoder_eos();
        }

        let kind = self.track.kind;
        let output = self
            .decoder
            .try_acquire_output(self.config.poll_timeout)
            .map_err(|e| TranscodeError::codec(kind, e))?;

        match output {
            None => Ok(false),
            Some(CodecOutput::FormatChanged(format)) => {
                debug!(track = %kind, format = %format, "Decoder output format changed");
                Ok(true)
            }
            Some(CodecOutput::Buffer { slot, sample }) => {
                // The decoder buffer goes back whether or not the transfer worked.
                let transfer = self.transfer_to_encoder(&sample);
                let release = self
                    .decoder
                    .release(slot)
                    .map_err(|e| TranscodeError::codec(kind, e));
                transfer?;
                release?;

                if sample.is_end_of_stream() {
                    if !self.state.source_drained {
                        return Err(TranscodeError::Codec {
                            track: kind,
                            reason: "decoder reported end of stream before the source was drained"
                                .to_string(),
                        });
                    }
                    self.state.decoder_drained = true;
                    self.encoder_eos_pending = true;
                    debug!(track = %kind, frames = self.stats.frames_decoded, "Decoder drained");
                    self.flush_encoder_eos()?;
                }
                Ok(true)
            }
        }
    }

    /// Copies a decoded buffer into a free encoder input slot.
    fn transfer_to_encoder(&mut self, sample: &SampleBuffer) -> TranscodeResult<()> {
        if sample.is_config() || sample.data.is_empty() {
            return Ok(());
        }

        let kind = self.track.kind;
        self.stats.frames_decoded += 1;
        self.position.position_us = self.position.position_us.max(sample.presentation_time_us);

        let slot = self
            .encoder
            .try_acquire_input(self.config.poll_timeout)
            .map_err(|e| TranscodeError::codec(kind, e))?;
        let Some(slot) = slot else {
            self.stats.transfers_dropped += 1;
            warn!(
                track = %kind,
                pts_us = sample.presentation_time_us,
                "No encoder input slot free, dropping decoded frame"
            );
            return Ok(());
        };

        if let Some(capacity) = slot.capacity {
            if sample.size_bytes() > capacity {
                return Err(TranscodeError::Codec {
                    track: kind,
                    reason: format!(
                        "decoded frame of {} bytes exceeds encoder input capacity {capacity}",
                        sample.size_bytes()
                    ),
                });
            }
        }

        let copy = SampleBuffer {
            flags: BufferFlags {
                end_of_stream: false,
                config_only: false,
                key_frame: sample.flags.key_frame,
            },
            ..sample.detached_copy()
        };
        self.encoder
            .submit(slot, copy)
            .map_err(|e| TranscodeError::codec(kind, e))?;
        self.stats.frames_transferred += 1;
        Ok(())
    }

    /// Queues end-of-stream to the encoder once a slot is free.
    fn flush_encoder_eos(&mut self) -> TranscodeResult<bool> {
        if !self.encoder_eos_pending {
            return Ok(false);
        }

        let kind = self.track.kind;
        let Some(slot) = self
            .encoder
            .try_acquire_input(self.config.poll_timeout)
            .map_err(|e| TranscodeError::codec(kind, e))?
        else {
            return Ok(false);
        };

        self.encoder
            .submit(slot, SampleBuffer::end_of_stream(self.position.position_us))
            .map_err(|e| TranscodeError::codec(kind, e))?;
        self.encoder_eos_pending = false;
        self.encoder_eos_sent = true;
        debug!(track = %kind, "Signaled end of stream to encoder");
        Ok(true)
    }

    fn drain_encoder(&mut self, mux: &mut MuxCoordinator) -> TranscodeResult<bool> {
        let kind = self.track.kind;
        let output = self
            .encoder
            .try_acquire_output(self.config.poll_timeout)
            .map_err(|e| TranscodeError::codec(kind, e))?;

        match output {
            None => Ok(false),
            Some(CodecOutput::FormatChanged(format)) => {
                if mux.is_registered(kind) {
                    debug!(track = %kind, format = %format, "Encoder format already registered");
                } else {
                    mux.register_format(kind, &format)?;
                    mux.try_start()?;
                }
                Ok(true)
            }
            Some(CodecOutput::Buffer { slot, sample }) => {
                let delivered = self.deliver(mux, &sample);
                let release = self
                    .encoder
                    .release(slot)
                    .map_err(|e| TranscodeError::codec(kind, e));
                delivered?;
                release?;

                if sample.is_end_of_stream() {
                    if !self.state.decoder_drained || !self.encoder_eos_sent {
                        return Err(TranscodeError::Codec {
                            track: kind,
                            reason: "encoder reported end of stream before the decoder was drained"
                                .to_string(),
                        });
                    }
                    self.state.encoder_drained = true;
                    debug!(track = %kind, "Encoder drained");
                }
                Ok(true)
            }
        }
    }

    fn deliver(&mut self, mux: &mut MuxCoordinator, sample: &SampleBuffer) -> TranscodeResult<()> {
        let kind = self.track.kind;
        if sample.is_config() {
            self.stats.config_buffers_skipped += 1;
            return Ok(());
        }
        if sample.data.is_empty() {
            return Ok(());
        }
        if !mux.is_registered(kind) {
            return Err(TranscodeError::Mux {
                reason: format!("{kind} encoder produced data before its output format"),
            });
        }

        if mux.write_sample(kind, sample)? {
            self.stats.samples_written += 1;
        } else {
            self.stats.samples_dropped += 1;
        }
        Ok(())
    }

    /// Best-effort end-of-stream to an encoder interrupted mid-flight.
    fn abort_encoder(&mut self) {
        if self.encoder_eos_sent {
            return;
        }

        let kind = self.track.kind;
        match self.encoder.try_acquire_input(self.config.poll_timeout) {
            Ok(Some(slot)) => {
                match self
                    .encoder
                    .submit(slot, SampleBuffer::end_of_stream(self.position.position_us))
                {
                    Ok(()) => {
                        self.encoder_eos_sent = true;
                        debug!(track = %kind, "Signaled end of stream to interrupted encoder");
                    }
                    Err(e) => warn!(track = %kind, "Failed to signal end of stream: {e}"),
                }
            }
            Ok(None) => warn!(track = %kind, "No encoder input slot to signal end of stream"),
            Err(e) => warn!(track = %kind, "Failed to signal end of stream: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::media::{MediaFormat, mime};
    use crate::pipeline::test_mocks::{
        CallLog, MemoryWriter, PassthroughCodec, ScriptedSource, call_log,
    };

    const FRAMES: usize = 10;

    fn config() -> PipelineConfig {
        PipelineConfig {
            poll_timeout: Duration::from_millis(1),
            stall_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn video_track() -> TrackDescriptor {
        TrackDescriptor {
            index: 0,
            kind: TrackKind::Video,
            source_format: MediaFormat::video(mime::VIDEO_AVC, 1920, 1080),
        }
    }

    fn source(log: &CallLog) -> ScriptedSource {
        let mut source = ScriptedSource::new(log.clone()).with_track(
            MediaFormat::video(mime::VIDEO_AVC, 1920, 1080),
            FRAMES,
            33_333,
        );
        source.select_track(0).unwrap();
        source
    }

    fn target() -> MediaFormat {
        MediaFormat::video(mime::VIDEO_AVC, 1280, 720).with_bitrate(2_500_000)
    }

    fn mux(log: &CallLog, expected: &[TrackKind]) -> MuxCoordinator {
        MuxCoordinator::new(
            Box::new(MemoryWriter::new(log.clone())),
            expected.iter().copied(),
        )
    }

    fn run_pass(
        source: &mut ScriptedSource,
        decoder: &mut PassthroughCodec,
        encoder: &mut PassthroughCodec,
        mux: &mut MuxCoordinator,
        cancel: &CancellationToken,
    ) -> TranscodeResult<TrackStats> {
        let config = config();
        let mut pipeline = TrackPipeline::new(video_track(), source, decoder, encoder, &config);
        pipeline.run(mux, cancel, &mut |_| {})
    }

    #[test]
    fn test_pass_writes_every_frame_and_orders_end_of_stream() {
        let log = call_log();
        let mut source = source(&log);
        let mut decoder = PassthroughCodec::new("dec", log.clone());
        let mut encoder = PassthroughCodec::new("enc", log.clone()).announcing(target());
        let mut mux = mux(&log, &[TrackKind::Video]);

        let stats = run_pass(
            &mut source,
            &mut decoder,
            &mut encoder,
            &mut mux,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(stats.samples_read, FRAMES as u64);
        assert_eq!(stats.frames_transferred, FRAMES as u64);
        assert_eq!(stats.samples_written, FRAMES as u64);
        assert_eq!(mux.stats().written(TrackKind::Video), FRAMES as u64);

        let log = log.lock();
        let decoder_eos = log.iter().position(|entry| entry == "dec.eos").unwrap();
        let encoder_eos = log.iter().position(|entry| entry == "enc.eos").unwrap();
        assert!(decoder_eos < encoder_eos);
    }

    #[test]
    fn test_late_format_with_pending_audio_drops_video() {
        let log = call_log();
        let mut source = source(&log);
        let mut decoder = PassthroughCodec::new("dec", log.clone());
        let mut encoder = PassthroughCodec::new("enc", log.clone()).announcing(target());
        let mut mux = mux(&log, &[TrackKind::Video, TrackKind::Audio]);

        let stats = run_pass(
            &mut source,
            &mut decoder,
            &mut encoder,
            &mut mux,
            &CancellationToken::new(),
        )
        .unwrap();

        assert!(mux.is_registered(TrackKind::Video));
        assert!(!mux.is_started());
        assert_eq!(stats.samples_written, 0);
        assert_eq!(stats.samples_dropped, FRAMES as u64);
    }

    #[test]
    fn test_eager_format_starts_writer_before_pass() {
        let log = call_log();
        let encoder = PassthroughCodec::new("enc", log.clone())
            .announcing(target())
            .eager();
        let mut mux = mux(&log, &[TrackKind::Video]);

        assert!(register_known_format(TrackKind::Video, &encoder, &mut mux).unwrap());
        assert!(mux.is_started());
        assert!(!register_known_format(TrackKind::Video, &encoder, &mut mux).unwrap());
    }

    #[test]
    fn test_config_buffers_are_not_written() {
        let log = call_log();
        let mut source = source(&log);
        let mut decoder = PassthroughCodec::new("dec", log.clone());
        let mut encoder = PassthroughCodec::new("enc", log.clone())
            .announcing(target())
            .with_config_buffer();
        let mut mux = mux(&log, &[TrackKind::Video]);

        let stats = run_pass(
            &mut source,
            &mut decoder,
            &mut encoder,
            &mut mux,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(stats.config_buffers_skipped, 1);
        assert_eq!(stats.samples_written, FRAMES as u64);
    }

    #[test]
    fn test_encoded_data_before_format_fails_mux() {
        let log = call_log();
        let mut source = source(&log);
        let mut decoder = PassthroughCodec::new("dec", log.clone());
        let mut encoder = PassthroughCodec::new("enc", log.clone());
        let mut mux = mux(&log, &[TrackKind::Video]);

        let result = run_pass(
            &mut source,
            &mut decoder,
            &mut encoder,
            &mut mux,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(TranscodeError::Mux { .. })));
    }

    #[test]
    fn test_busy_encoder_drops_decoded_frames() {
        let log = call_log();
        let mut source = source(&log);
        let mut decoder = PassthroughCodec::new("dec", log.clone());
        let mut encoder = PassthroughCodec::new("enc", log.clone())
            .announcing(target())
            .refusing_inputs(3);
        let mut mux = mux(&log, &[TrackKind::Video]);

        let stats = run_pass(
            &mut source,
            &mut decoder,
            &mut encoder,
            &mut mux,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(stats.transfers_dropped, 3);
        assert_eq!(stats.samples_written, FRAMES as u64 - 3);
    }

    #[test]
    fn test_encoder_end_of_stream_waits_for_free_slot() {
        let log = call_log();
        let mut source = source(&log);
        let mut decoder = PassthroughCodec::new("dec", log.clone());
        let mut encoder = PassthroughCodec::new("enc", log.clone())
            .announcing(target())
            .refusing_after(FRAMES, 3);
        let mut mux = mux(&log, &[TrackKind::Video]);

        let stats = run_pass(
            &mut source,
            &mut decoder,
            &mut encoder,
            &mut mux,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(stats.transfers_dropped, 0);
        assert_eq!(stats.samples_written, FRAMES as u64);

        let log = log.lock();
        let busy = log.iter().filter(|entry| *entry == "enc.busy").count();
        assert_eq!(busy, 3);
        assert_eq!(log.iter().filter(|entry| *entry == "enc.eos").count(), 1);
        let last_busy = log.iter().rposition(|entry| entry == "enc.busy").unwrap();
        let encoder_eos = log.iter().position(|entry| entry == "enc.eos").unwrap();
        assert!(last_busy < encoder_eos);
    }

    #[test]
    fn test_decoder_end_of_stream_before_source_drained_is_codec_error() {
        let log = call_log();
        let mut source = source(&log);
        let mut decoder = PassthroughCodec::new("dec", log.clone()).with_premature_eos();
        let mut encoder = PassthroughCodec::new("enc", log.clone()).announcing(target());
        let mut mux = mux(&log, &[TrackKind::Video]);

        let result = run_pass(
            &mut source,
            &mut decoder,
            &mut encoder,
            &mut mux,
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(TranscodeError::Codec {
                track: TrackKind::Video,
                ..
            })
        ));
    }

    #[test]
    fn test_cancellation_signals_encoder_end_of_stream() {
        let log = call_log();
        let mut source = source(&log);
        let mut decoder = PassthroughCodec::new("dec", log.clone());
        let mut encoder = PassthroughCodec::new("enc", log.clone()).announcing(target());
        let mut mux = mux(&log, &[TrackKind::Video]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_pass(&mut source, &mut decoder, &mut encoder, &mut mux, &cancel);

        assert!(matches!(result, Err(TranscodeError::Cancelled)));
        assert!(log.lock().iter().any(|entry| entry == "enc.eos"));
    }

    #[test]
    fn test_stalled_decoder_times_out() {
        let log = call_log();
        let mut source = source(&log);
        let mut decoder = PassthroughCodec::new("dec", log.clone()).refusing_inputs(usize::MAX);
        let mut encoder = PassthroughCodec::new("enc", log.clone()).announcing(target());
        let mut mux = mux(&log, &[TrackKind::Video]);
        let config = PipelineConfig {
            poll_timeout: Duration::from_millis(1),
            stall_timeout: Duration::from_millis(20),
            ..Default::default()
        };

        let mut pipeline = TrackPipeline::new(
            video_track(),
            &mut source,
            &mut decoder,
            &mut encoder,
            &config,
        );
        let result = pipeline.run(&mut mux, &CancellationToken::new(), &mut |_| {});

        assert!(matches!(result, Err(TranscodeError::Codec { .. })));
        assert_eq!(pipeline.state(), DrainState::default());
    }
}
