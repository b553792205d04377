//! Simulated demuxer over a [`SimulatedMedia`] description.

use std::collections::BTreeSet;

use tracing::{debug, trace};
use vidopt_core::media::{
    MediaError, MediaFormat, MediaResult, MediaSource, SampleBuffer, SourceSample,
};

use crate::ledger::{LedgerAction, ResourceId, ResourceLedger};
use crate::media::SimulatedMedia;

/// Source returning the samples of the selected tracks in timestamp order.
pub struct SimulatedSource {
    formats: Vec<MediaFormat>,
    samples: Vec<Vec<SampleBuffer>>,
    positions: Vec<usize>,
    selected: BTreeSet<usize>,
    reports_sample_counts: bool,
    reads: u64,
    fail_read_after: Option<u64>,
    fail_close: bool,
    closed: bool,
    ledger: ResourceLedger,
    id: ResourceId,
}

impl SimulatedSource {
    pub fn new(media: &SimulatedMedia, ledger: ResourceLedger, id: ResourceId) -> Self {
        let samples = (0..media.tracks.len())
            .map(|index| media.samples(index))
            .collect::<Vec<_>>();
        Self {
            formats: media.track_formats(),
            positions: vec![0; samples.len()],
            samples,
            selected: BTreeSet::new(),
            reports_sample_counts: media.reports_sample_counts,
            reads: 0,
            fail_read_after: None,
            fail_close: false,
            closed: false,
            ledger,
            id,
        }
    }

    pub fn failing_read_after(mut self, samples: u64) -> Self {
        self.fail_read_after = Some(samples);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    fn ensure_open(&self) -> MediaResult<()> {
        if self.closed {
            return Err(MediaError::source("source is closed"));
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> MediaResult<()> {
        if index >= self.formats.len() {
            return Err(MediaError::source(format!(
                "track {index} out of range ({} tracks)",
                self.formats.len()
            )));
        }
        Ok(())
    }
}

impl MediaSource for SimulatedSource {
    fn track_count(&self) -> usize {
        self.formats.len()
    }

    fn track_format(&self, index: usize) -> MediaResult<MediaFormat> {
        self.check_index(index)?;
        Ok(self.formats[index].clone())
    }

    fn select_track(&mut self, index: usize) -> MediaResult<()> {
        self.ensure_open()?;
        self.check_index(index)?;
        self.selected.insert(index);
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) -> MediaResult<()> {
        self.ensure_open()?;
        self.check_index(index)?;
        self.selected.remove(&index);
        Ok(())
    }

    fn seek_to(&mut self, time_us: i64) -> MediaResult<()> {
        self.ensure_open()?;
        for (position, samples) in self.positions.iter_mut().zip(&self.samples) {
            *position = samples.partition_point(|sample| sample.presentation_time_us < time_us);
        }
        trace!(time_us, "Simulated source seeked");
        Ok(())
    }

    fn read_sample(&mut self) -> MediaResult<Option<SourceSample>> {
        self.ensure_open()?;
        if let Some(limit) = self.fail_read_after {
            if self.reads >= limit {
                return Err(MediaError::source(format!(
                    "simulated read error after {limit} samples"
                )));
            }
        }

        let next = self
            .selected
            .iter()
            .filter_map(|&index| {
                self.samples[index]
                    .get(self.positions[index])
                    .map(|sample| (sample.presentation_time_us, index))
            })
            .min();

        Ok(next.map(|(_, track_index)| {
            let buffer = self.samples[track_index][self.positions[track_index]].clone();
            self.positions[track_index] += 1;
            self.reads += 1;
            SourceSample {
                track_index,
                buffer,
            }
        }))
    }

    fn sample_count_hint(&self, index: usize) -> Option<u64> {
        if !self.reports_sample_counts {
            return None;
        }
        self.samples.get(index).map(|samples| samples.len() as u64)
    }

    fn close(&mut self) -> MediaResult<()> {
        self.ledger.record(self.id, LedgerAction::Release);
        self.closed = true;
        if self.fail_close {
            return Err(MediaError::source("simulated release failure"));
        }
        debug!(source = %self.id, reads = self.reads, "Closed simulated source");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ResourceKind;
    use crate::media::SimulatedVideo;

    fn source(media: &SimulatedMedia) -> (ResourceLedger, SimulatedSource) {
        let ledger = ResourceLedger::new();
        let id = ledger.open(ResourceKind::Source);
        let source = SimulatedSource::new(media, ledger.clone(), id);
        (ledger, source)
    }

    #[test]
    fn test_reads_only_selected_tracks() {
        let media = SimulatedMedia::hd_clip(1_000_000);
        let (_, mut source) = source(&media);
        source.select_track(1).unwrap();

        let mut count = 0;
        while let Some(sample) = source.read_sample().unwrap() {
            assert_eq!(sample.track_index, 1);
            count += 1;
        }
        assert_eq!(count, media.sample_count(1));
    }

    #[test]
    fn test_seek_rewinds_for_second_pass() {
        let media = SimulatedMedia::new(500_000).with_video(SimulatedVideo::avc(320, 240, 10));
        let (_, mut source) = source(&media);
        source.select_track(0).unwrap();
        while source.read_sample().unwrap().is_some() {}

        source.seek_to(0).unwrap();
        let first = source.read_sample().unwrap().unwrap();
        assert_eq!(first.buffer.presentation_time_us, 0);
    }

    #[test]
    fn test_read_fault_and_release_are_recorded() {
        let media = SimulatedMedia::hd_clip(1_000_000);
        let (ledger, source) = source(&media);
        let mut source = source.failing_read_after(2);
        source.select_track(0).unwrap();

        assert!(source.read_sample().unwrap().is_some());
        assert!(source.read_sample().unwrap().is_some());
        assert!(matches!(source.read_sample(), Err(MediaError::Source { .. })));

        source.close().unwrap();
        assert!(ledger.is_balanced());
        assert!(source.read_sample().is_err());
    }

    #[test]
    fn test_sample_counts_can_be_withheld() {
        let media = SimulatedMedia::hd_clip(1_000_000).without_sample_counts();
        let (_, source) = source(&media);
        assert_eq!(source.sample_count_hint(0), None);
    }
}
