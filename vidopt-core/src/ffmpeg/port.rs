//! Slot bookkeeping shared by the libav codec ports.

use std::collections::{HashSet, VecDeque};

use crate::media::{
    CodecOutput, InputSlot, MediaError, MediaFormat, MediaResult, OutputSlot, SampleBuffer,
};

enum Pending {
    Format(MediaFormat),
    Sample(SampleBuffer),
}

/// Input slots handed out and outputs waiting to be drained.
pub(super) struct PortQueue {
    name: String,
    input_slots: usize,
    next_slot: usize,
    acquired: HashSet<usize>,
    pending: VecDeque<Pending>,
    borrowed: HashSet<usize>,
}

impl PortQueue {
    pub(super) fn new(name: impl Into<String>, input_slots: usize) -> Self {
        Self {
            name: name.into(),
            input_slots: input_slots.max(1),
            next_slot: 0,
            acquired: HashSet::new(),
            pending: VecDeque::new(),
            borrowed: HashSet::new(),
        }
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    /// A slot is free while undrained output stays below the slot count.
    pub(super) fn acquire_input(&mut self) -> Option<InputSlot> {
        if self.acquired.len() + self.pending_samples() >= self.input_slots {
            return None;
        }
        let index = self.next_slot;
        self.next_slot = self.next_slot.wrapping_add(1);
        self.acquired.insert(index);
        Some(InputSlot {
            index,
            capacity: None,
        })
    }

    /// Consumes an acquired slot.
    pub(super) fn redeem(&mut self, slot: InputSlot) -> MediaResult<()> {
        if !self.acquired.remove(&slot.index) {
            return Err(MediaError::InvalidSlot {
                codec: self.name.clone(),
                index: slot.index,
            });
        }
        Ok(())
    }

    pub(super) fn push_sample(&mut self, sample: SampleBuffer) {
        self.pending.push_back(Pending::Sample(sample));
    }

    pub(super) fn push_format(&mut self, format: MediaFormat) {
        self.pending.push_back(Pending::Format(format));
    }

    pub(super) fn pop_output(&mut self) -> Option<CodecOutput> {
        match self.pending.pop_front()? {
            Pending::Format(format) => Some(CodecOutput::FormatChanged(format)),
            Pending::Sample(sample) => {
                let index = self.next_slot;
                self.next_slot = self.next_slot.wrapping_add(1);
                self.borrowed.insert(index);
                Some(CodecOutput::Buffer {
                    slot: OutputSlot { index },
                    sample,
                })
            }
        }
    }

    pub(super) fn release(&mut self, slot: OutputSlot) -> MediaResult<()> {
        if !self.borrowed.remove(&slot.index) {
            return Err(MediaError::InvalidSlot {
                codec: self.name.clone(),
                index: slot.index,
            });
        }
        Ok(())
    }

    pub(super) fn clear(&mut self) {
        self.acquired.clear();
        self.pending.clear();
        self.borrowed.clear();
    }

    fn pending_samples(&self) -> usize {
        self.pending
            .iter()
            .filter(|pending| matches!(pending, Pending::Sample(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::BufferFlags;

    #[test]
    fn test_slots_are_limited_by_undrained_output() {
        let mut queue = PortQueue::new("test", 2);
        let first = queue.acquire_input().unwrap();
        let first_index = first.index;
        queue.redeem(first).unwrap();
        queue.push_sample(SampleBuffer::new(vec![1u8], 0, BufferFlags::NONE));

        let second = queue.acquire_input().unwrap();
        assert!(queue.acquire_input().is_none());
        let stale = InputSlot {
            index: first_index,
            capacity: None,
        };
        assert!(queue.redeem(stale).is_err());
        queue.redeem(second).unwrap();

        let Some(CodecOutput::Buffer { slot, .. }) = queue.pop_output() else {
            panic!("expected buffer");
        };
        let index = slot.index;
        assert!(queue.acquire_input().is_some());
        queue.release(slot).unwrap();
        assert!(queue.release(OutputSlot { index }).is_err());
    }
}
