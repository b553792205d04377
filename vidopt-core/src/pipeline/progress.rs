//! Aggregate progress across the video and audio passes.

/// Position reached by a track pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassPosition {
    /// Highest presentation time seen at the decoder output.
    pub position_us: i64,
    /// Samples read from the source so far.
    pub samples_read: u64,
}

/// How far a pass can be measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassExtent {
    pub duration_us: Option<i64>,
    pub sample_count: Option<u64>,
}

impl PassExtent {
    /// Fraction of the pass completed, preferring duration over sample count.
    pub fn fraction(&self, position: PassPosition) -> Option<f64> {
        if let Some(duration) = self.duration_us.filter(|duration| *duration > 0) {
            return Some((position.position_us as f64 / duration as f64).clamp(0.0, 1.0));
        }
        self.sample_count
            .filter(|count| *count > 0)
            .map(|count| (position.samples_read as f64 / count as f64).clamp(0.0, 1.0))
    }
}

/// Portion of the overall bar covered by one pass, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassWindow {
    pub start: f64,
    pub end: f64,
}

impl PassWindow {
    /// Windows for the video pass and the optional audio pass.
    ///
    /// With audio, video covers `0..video_share` and audio the rest below
    /// 100. Without audio, video covers everything below 100.
    pub fn split(video_share: u8, has_audio: bool) -> (PassWindow, Option<PassWindow>) {
        const CEILING: f64 = 99.0;
        if !has_audio {
            return (
                PassWindow {
                    start: 0.0,
                    end: CEILING,
                },
                None,
            );
        }

        let share = f64::from(video_share.min(99));
        (
            PassWindow {
                start: 0.0,
                end: share,
            },
            Some(PassWindow {
                start: share,
                end: CEILING,
            }),
        )
    }

    pub fn percent(&self, fraction: f64) -> f64 {
        self.start + (self.end - self.start) * fraction.clamp(0.0, 1.0)
    }
}

/// Emits non-decreasing integer percentages.
///
/// Values below 100 come from [`ProgressTracker::advance`]; 100 is only
/// produced by [`ProgressTracker::complete`].
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<u8>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new percent when it moved past the last emitted value.
    pub fn advance(&mut self, percent: f64) -> Option<u8> {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 99.0).floor() as u8
        } else {
            0
        };

        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }

    pub fn complete(&mut self) -> u8 {
        self.last = Some(100);
        100
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_fraction_prefers_duration() {
        let extent = PassExtent {
            duration_us: Some(10_000_000),
            sample_count: Some(10),
        };
        let position = PassPosition {
            position_us: 2_500_000,
            samples_read: 9,
        };
        assert_eq!(extent.fraction(position), Some(0.25));
    }

    #[test]
    fn test_fraction_falls_back_to_sample_count() {
        let extent = PassExtent {
            duration_us: None,
            sample_count: Some(200),
        };
        let position = PassPosition {
            position_us: 0,
            samples_read: 50,
        };
        assert_eq!(extent.fraction(position), Some(0.25));
        assert_eq!(PassExtent::default().fraction(position), None);
    }

    #[test]
    fn test_windows_leave_room_for_completion() {
        let (video, audio) = PassWindow::split(90, true);
        assert_eq!(video.percent(1.0), 90.0);
        assert_eq!(audio.map(|window| window.percent(1.0)), Some(99.0));

        let (video_only, none) = PassWindow::split(90, false);
        assert_eq!(video_only.percent(1.0), 99.0);
        assert!(none.is_none());
    }

    #[test]
    fn test_tracker_never_reports_100_before_completion() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.advance(0.0), Some(0));
        assert_eq!(tracker.advance(0.4), None);
        assert_eq!(tracker.advance(150.0), Some(99));
        assert_eq!(tracker.advance(f64::NAN), None);
        assert_eq!(tracker.complete(), 100);
    }

    proptest! {
        #[test]
        fn test_emitted_progress_is_monotonic(
            values in proptest::collection::vec(-50.0f64..150.0, 1..64)
        ) {
            let mut tracker = ProgressTracker::new();
            let mut previous: Option<u8> = None;
            for value in values {
                if let Some(percent) = tracker.advance(value) {
                    prop_assert!(percent < 100);
                    if let Some(previous) = previous {
                        prop_assert!(percent > previous);
                    }
                    previous = Some(percent);
                }
            }
        }
    }
}
