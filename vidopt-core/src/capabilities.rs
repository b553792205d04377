//! Encoder capability queries.
//!
//! The platform reports which encoders exist and what they accept. The
//! [`CapabilityQueryService`] caches that list for as long as its owner keeps
//! it alive; there is no process-wide cache. Call
//! [`CapabilityQueryService::invalidate`] after the platform's codec set may
//! have changed.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::StrategyConfig;
use crate::media::{MediaResult, TrackKind, mime};

/// Inclusive numeric range reported by an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueRange {
    pub min: u64,
    pub max: u64,
}

impl ValueRange {
    /// Creates a range, swapping the bounds if given in the wrong order.
    pub const fn new(min: u64, max: u64) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn clamp(&self, value: u64) -> u64 {
        value.max(self.min).min(self.max)
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Frame sizes accepted by a video encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeSupport {
    pub widths: ValueRange,
    pub heights: ValueRange,
    pub width_alignment: u32,
    pub height_alignment: u32,
}

impl SizeSupport {
    pub fn supports(&self, width: u32, height: u32) -> bool {
        let aligned = |value: u32, alignment: u32| alignment <= 1 || value % alignment == 0;
        self.widths.contains(u64::from(width))
            && self.heights.contains(u64::from(height))
            && aligned(width, self.width_alignment)
            && aligned(height, self.height_alignment)
    }
}

/// Video side of an encoder's capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoCapabilities {
    pub sizes: SizeSupport,
    pub bitrate_range: ValueRange,
    pub frame_rate_range: ValueRange,
}

/// Audio side of an encoder's capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioCapabilities {
    pub bitrate_range: ValueRange,
    pub max_channels: u16,
}

/// One encoder implementation for one mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderInfo {
    pub name: String,
    pub mime_type: String,
    pub hardware_accelerated: bool,
    pub video: Option<VideoCapabilities>,
    pub audio: Option<AudioCapabilities>,
}

impl EncoderInfo {
    pub fn kind(&self) -> Option<TrackKind> {
        TrackKind::from_mime(&self.mime_type)
    }
}

/// Effective capabilities for a target mime type, with fallbacks applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodecCapabilities {
    /// Encoder the ranges came from; `None` when every range is a fallback.
    pub encoder_name: Option<String>,
    /// `None` when the encoder does not report size limits.
    pub supported_sizes: Option<SizeSupport>,
    pub bitrate_range: ValueRange,
    pub frame_rate_range: ValueRange,
    pub audio_bitrate_range: ValueRange,
}

impl CodecCapabilities {
    /// Conservative ranges used when no encoder supports the mime type.
    pub fn fallback(config: &StrategyConfig) -> Self {
        Self {
            encoder_name: None,
            supported_sizes: None,
            bitrate_range: config.unknown_encoder_bitrate,
            frame_rate_range: config.unknown_encoder_frame_rate,
            audio_bitrate_range: config.unknown_encoder_audio_bitrate,
        }
    }

    fn from_encoder(encoder: &EncoderInfo, config: &StrategyConfig) -> Self {
        let (supported_sizes, bitrate_range, frame_rate_range) = match &encoder.video {
            Some(video) => (
                Some(video.sizes),
                video.bitrate_range,
                video.frame_rate_range,
            ),
            None => (
                None,
                config.missing_video_caps_bitrate,
                config.missing_video_caps_frame_rate,
            ),
        };
        let audio_bitrate_range = encoder
            .audio
            .as_ref()
            .map(|audio| audio.bitrate_range)
            .unwrap_or(config.missing_audio_caps_bitrate);

        Self {
            encoder_name: Some(encoder.name.clone()),
            supported_sizes,
            bitrate_range,
            frame_rate_range,
            audio_bitrate_range,
        }
    }

    /// Whether the encoder accepts `width`x`height`; unknown limits accept all.
    pub fn is_size_supported(&self, width: u32, height: u32) -> bool {
        self.supported_sizes
            .map(|sizes| sizes.supports(width, height))
            .unwrap_or(true)
    }
}

/// Source of raw encoder information, implemented by platform backends.
pub trait CapabilityProvider: Send + Sync {
    /// Lists every available encoder.
    ///
    /// # Errors
    /// - `MediaError::Codec` - Platform codec registry could not be read
    fn encoders(&self) -> MediaResult<Vec<EncoderInfo>>;
}

/// Read-only, explicitly cached view of the platform's encoders.
pub struct CapabilityQueryService {
    provider: Arc<dyn CapabilityProvider>,
    fallbacks: StrategyConfig,
    cache: RwLock<Option<Arc<[EncoderInfo]>>>,
}

impl CapabilityQueryService {
    pub fn new(provider: Arc<dyn CapabilityProvider>, config: &StrategyConfig) -> Self {
        Self {
            provider,
            fallbacks: config.clone(),
            cache: RwLock::new(None),
        }
    }

    /// All encoders, queried from the provider on first use.
    ///
    /// A failing provider yields an empty list that is not cached, so a
    /// later call retries.
    pub fn encoders(&self) -> Arc<[EncoderInfo]> {
        if let Some(cached) = self.cache.read().as_ref() {
            return Arc::clone(cached);
        }

        let mut cache = self.cache.write();
        if let Some(cached) = cache.as_ref() {
            return Arc::clone(cached);
        }

        match self.provider.encoders() {
            Ok(encoders) => {
                debug!(count = encoders.len(), "Queried encoder capabilities");
                let encoders: Arc<[EncoderInfo]> = encoders.into();
                *cache = Some(Arc::clone(&encoders));
                encoders
            }
            Err(e) => {
                warn!("Encoder capability query failed: {e}");
                Arc::from(Vec::new())
            }
        }
    }

    /// Drops the cached encoder list.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cache.read().is_some()
    }

    /// Encoders supporting `mime_type`, hardware implementations first.
    pub fn encoders_for(&self, mime_type: &str) -> Vec<EncoderInfo> {
        let mut matching: Vec<EncoderInfo> = self
            .encoders()
            .iter()
            .filter(|encoder| encoder.mime_type.eq_ignore_ascii_case(mime_type))
            .cloned()
            .collect();
        matching.sort_by_key(|encoder| !encoder.hardware_accelerated);
        matching
    }

    /// Distinct video mime types with at least one encoder.
    ///
    /// Falls back to AVC when the platform reports nothing.
    pub fn supported_video_mime_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .encoders()
            .iter()
            .filter(|encoder| encoder.kind() == Some(TrackKind::Video))
            .map(|encoder| encoder.mime_type.to_lowercase())
            .collect();
        types.sort();
        types.dedup();

        if types.is_empty() {
            types.push(mime::VIDEO_AVC.to_string());
        }
        types
    }

    /// Effective capabilities for `mime_type` from the preferred encoder.
    pub fn capabilities_for(&self, mime_type: &str) -> CodecCapabilities {
        match self.encoders_for(mime_type).first() {
            Some(encoder) => CodecCapabilities::from_encoder(encoder, &self.fallbacks),
            None => {
                debug!(mime_type, "No encoder found, using fallback ranges");
                CodecCapabilities::fallback(&self.fallbacks)
            }
        }
    }
}

impl std::fmt::Debug for CapabilityQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityQueryService")
            .field("cached", &self.is_cached())
            .finish()
    }
}
