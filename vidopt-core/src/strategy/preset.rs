//! User-facing preset values: resolution, quality tier, frame rate, audio bitrate.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::StrategyError;
use crate::media::mime;

/// A resolution from the built-in table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NamedResolution {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Built-in resolutions, smallest first.
pub const NAMED_RESOLUTIONS: [NamedResolution; 6] = [
    NamedResolution {
        label: "360p",
        width: 640,
        height: 360,
    },
    NamedResolution {
        label: "480p",
        width: 854,
        height: 480,
    },
    NamedResolution {
        label: "720p",
        width: 1280,
        height: 720,
    },
    NamedResolution {
        label: "1080p",
        width: 1920,
        height: 1080,
    },
    NamedResolution {
        label: "2K",
        width: 2560,
        height: 1440,
    },
    NamedResolution {
        label: "4K",
        width: 3840,
        height: 2160,
    },
];

/// Upper bound for either side of a custom resolution.
const MAX_CUSTOM_SIDE: u32 = 16_384;

/// Target resolution choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Keep the source dimensions.
    Original,
    Named(NamedResolution),
    Custom { width: u32, height: u32 },
}

impl Resolution {
    /// Looks up a named resolution by label, ignoring case.
    pub fn named(label: &str) -> Option<Self> {
        NAMED_RESOLUTIONS
            .iter()
            .find(|named| named.label.eq_ignore_ascii_case(label))
            .map(|named| Resolution::Named(*named))
    }

    /// Fixed dimensions, or `None` for [`Resolution::Original`].
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Resolution::Original => None,
            Resolution::Named(named) => Some((named.width, named.height)),
            Resolution::Custom { width, height } => Some((*width, *height)),
        }
    }

    /// Display label with dimensions, e.g. `720p (1280x720)`.
    pub fn description(&self) -> String {
        match self {
            Resolution::Original => "Original".to_string(),
            Resolution::Named(named) => {
                format!("{} ({}x{})", named.label, named.width, named.height)
            }
            Resolution::Custom { width, height } => format!("Custom ({width}x{height})"),
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Named(NAMED_RESOLUTIONS[2])
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Original => write!(f, "original"),
            Resolution::Named(named) => write!(f, "{}", named.label),
            Resolution::Custom { width, height } => write!(f, "{width}x{height}"),
        }
    }
}

impl FromStr for Resolution {
    type Err = StrategyError;

    /// Accepts `original`, table labels (`720p`, `4K`), labels with
    /// dimensions (`720p (1280x720)`), `Custom (WxH)` and bare `WxH`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StrategyError::InvalidResolution {
            input: s.to_string(),
        };
        let trimmed = s.trim();

        if trimmed.eq_ignore_ascii_case("original") {
            return Ok(Resolution::Original);
        }

        let lower = trimmed.to_lowercase();
        if let Some(inner) = lower
            .strip_prefix("custom")
            .map(str::trim)
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return parse_dimensions(inner).ok_or_else(invalid);
        }

        let label = match trimmed.find(" (") {
            Some(position) => &trimmed[..position],
            None => trimmed,
        };
        if let Some(named) = Resolution::named(label.trim()) {
            return Ok(named);
        }

        parse_dimensions(&lower).ok_or_else(invalid)
    }
}

fn parse_dimensions(text: &str) -> Option<Resolution> {
    let (width, height) = text.split_once(['x', '×'])?;
    let width: u32 = width.trim().parse().ok()?;
    let height: u32 = height.trim().parse().ok()?;

    if width == 0 || height == 0 || width > MAX_CUSTOM_SIDE || height > MAX_CUSTOM_SIDE {
        return None;
    }

    // A custom entry matching a table row is the table row.
    Some(
        NAMED_RESOLUTIONS
            .iter()
            .find(|named| named.width == width && named.height == height)
            .map(|named| Resolution::Named(*named))
            .unwrap_or(Resolution::Custom { width, height }),
    )
}

/// Quality tier scaling the estimated video bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Quality {
    High,
    #[default]
    Medium,
    Low,
}

impl Quality {
    pub fn multiplier(self) -> f64 {
        match self {
            Quality::High => 1.8,
            Quality::Medium => 1.0,
            Quality::Low => 0.5,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::High => write!(f, "High"),
            Quality::Medium => write!(f, "Medium"),
            Quality::Low => write!(f, "Low"),
        }
    }
}

impl FromStr for Quality {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Quality::High),
            "medium" => Ok(Quality::Medium),
            "low" => Ok(Quality::Low),
            _ => Err(StrategyError::InvalidQuality {
                input: s.to_string(),
            }),
        }
    }
}

/// Target frame rate choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameRate {
    /// No explicit constraint; the encoder follows the source timing.
    Original,
    Fixed(u32),
}

impl Default for FrameRate {
    fn default() -> Self {
        FrameRate::Fixed(30)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRate::Original => write!(f, "original"),
            FrameRate::Fixed(fps) => write!(f, "{fps}fps"),
        }
    }
}

impl FromStr for FrameRate {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if lower == "original" {
            return Ok(FrameRate::Original);
        }

        let digits = lower.strip_suffix("fps").unwrap_or(&lower).trim();
        match digits.parse::<u32>() {
            Ok(fps) if fps > 0 && fps <= 240 => Ok(FrameRate::Fixed(fps)),
            _ => Err(StrategyError::InvalidFrameRate {
                input: s.to_string(),
            }),
        }
    }
}

/// Parses an audio bitrate given as `128kbps`, `128k` or `128000`.
///
/// # Errors
/// - `StrategyError::InvalidAudioBitrate` - Not a positive number with a known suffix
pub fn parse_audio_bitrate(s: &str) -> Result<u32, StrategyError> {
    let lower = s.trim().to_lowercase();
    let invalid = || StrategyError::InvalidAudioBitrate {
        input: s.to_string(),
    };

    let (digits, scale) = if let Some(kilo) = lower.strip_suffix("kbps") {
        (kilo, 1_000)
    } else if let Some(kilo) = lower.strip_suffix('k') {
        (kilo, 1_000)
    } else if let Some(plain) = lower.strip_suffix("bps") {
        (plain, 1)
    } else {
        (lower.as_str(), 1)
    };

    let value: u32 = digits.trim().parse().map_err(|_| invalid())?;
    value
        .checked_mul(scale)
        .filter(|bps| *bps > 0)
        .ok_or_else(invalid)
}

/// Settings chosen by the user for one transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub resolution: Resolution,
    pub quality: Quality,
    pub frame_rate: FrameRate,
    pub audio_bitrate_bps: u32,
    pub video_mime_type: String,
    pub audio_mime_type: String,
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            quality: Quality::default(),
            frame_rate: FrameRate::default(),
            audio_bitrate_bps: 128_000,
            video_mime_type: mime::VIDEO_AVC.to_string(),
            audio_mime_type: mime::AUDIO_AAC.to_string(),
        }
    }
}

impl Preset {
    /// Preset keeping source resolution and timing.
    pub fn original() -> Self {
        Self {
            resolution: Resolution::Original,
            frame_rate: FrameRate::Original,
            ..Default::default()
        }
    }

    pub fn with_video_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.video_mime_type = mime_type.into();
        self
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}kbps",
            self.resolution,
            self.quality,
            self.frame_rate,
            self.audio_bitrate_bps / 1_000
        )
    }
}

impl FromStr for Preset {
    type Err = StrategyError;

    /// Parses `resolution[/quality[/fps[/audio]]]`, e.g.
    /// `720p/Medium/30fps/128kbps`. A lone `original` keeps source
    /// resolution and frame rate.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("original") {
            return Ok(Preset::original());
        }

        let parts: Vec<&str> = trimmed.split('/').map(str::trim).collect();
        if parts.is_empty() || parts.len() > 4 || parts.iter().any(|part| part.is_empty()) {
            return Err(StrategyError::InvalidPreset {
                input: s.to_string(),
                reason: "expected resolution[/quality[/fps[/audio]]]".to_string(),
            });
        }

        let mut preset = Preset {
            resolution: parts[0].parse()?,
            ..Default::default()
        };
        if let Some(quality) = parts.get(1) {
            preset.quality = quality.parse()?;
        }
        if let Some(frame_rate) = parts.get(2) {
            preset.frame_rate = frame_rate.parse()?;
        }
        if let Some(audio) = parts.get(3) {
            preset.audio_bitrate_bps = parse_audio_bitrate(audio)?;
        }
        Ok(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_labels_and_custom_forms() {
        assert_eq!("original".parse::<Resolution>().ok(), Some(Resolution::Original));
        assert_eq!(
            "720p".parse::<Resolution>().ok().and_then(|r| r.dimensions()),
            Some((1280, 720))
        );
        assert_eq!(
            "4k".parse::<Resolution>().ok().and_then(|r| r.dimensions()),
            Some((3840, 2160))
        );
        assert_eq!(
            "1080p (1920x1080)".parse::<Resolution>().ok().and_then(|r| r.dimensions()),
            Some((1920, 1080))
        );
        assert_eq!(
            "Custom (1000x500)".parse::<Resolution>().ok(),
            Some(Resolution::Custom { width: 1000, height: 500 })
        );
        assert_eq!(
            "1000×500".parse::<Resolution>().ok(),
            Some(Resolution::Custom { width: 1000, height: 500 })
        );
    }

    #[test]
    fn test_custom_resolution_matching_table_is_named() {
        let resolution: Resolution = "854x480".parse().unwrap();
        assert_eq!(resolution.to_string(), "480p");
    }

    #[test]
    fn test_invalid_resolutions_rejected() {
        for input in ["", "720", "0x480", "abcxdef", "99999x10", "Custom (x)"] {
            assert!(input.parse::<Resolution>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_quality_multipliers() {
        assert_eq!(Quality::High.multiplier(), 1.8);
        assert_eq!(Quality::Medium.multiplier(), 1.0);
        assert_eq!(Quality::Low.multiplier(), 0.5);
        assert_eq!("HIGH".parse::<Quality>().ok(), Some(Quality::High));
        assert!("ultra".parse::<Quality>().is_err());
    }

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!("30fps".parse::<FrameRate>().ok(), Some(FrameRate::Fixed(30)));
        assert_eq!("24".parse::<FrameRate>().ok(), Some(FrameRate::Fixed(24)));
        assert_eq!("Original".parse::<FrameRate>().ok(), Some(FrameRate::Original));
        assert!("0fps".parse::<FrameRate>().is_err());
    }

    #[test]
    fn test_audio_bitrate_suffixes() {
        assert_eq!(parse_audio_bitrate("128kbps").ok(), Some(128_000));
        assert_eq!(parse_audio_bitrate("96k").ok(), Some(96_000));
        assert_eq!(parse_audio_bitrate("64000").ok(), Some(64_000));
        assert!(parse_audio_bitrate("0").is_err());
        assert!(parse_audio_bitrate("fast").is_err());
    }

    #[test]
    fn test_preset_notation_round_trip() {
        let preset: Preset = "720p/Medium/30fps/128kbps".parse().unwrap();
        assert_eq!(preset, Preset::default());
        assert_eq!(preset.to_string(), "720p/Medium/30fps/128kbps");
    }

    #[test]
    fn test_partial_and_original_presets() {
        let preset: Preset = "1080p/high".parse().unwrap();
        assert_eq!(preset.resolution.dimensions(), Some((1920, 1080)));
        assert_eq!(preset.quality, Quality::High);
        assert_eq!(preset.frame_rate, FrameRate::Fixed(30));
        assert_eq!(preset.audio_bitrate_bps, 128_000);

        let original: Preset = "original".parse().unwrap();
        assert_eq!(original.resolution, Resolution::Original);
        assert_eq!(original.frame_rate, FrameRate::Original);

        assert!("720p//30fps".parse::<Preset>().is_err());
        assert!("720p/Medium/30fps/128kbps/extra".parse::<Preset>().is_err());
    }
}
