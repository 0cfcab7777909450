//! Execution Scheduler: two alternating command slots, each with a completion fence
//!
//! A slot moves `Idle -> Recording -> Submitted -> Complete -> Idle`. The only blocking
//! call is [`ExecutionScheduler::wait`], which turns `Submitted` into `Complete`.

use nbody_physics::{Error, Result};

use crate::context::validated;

pub const SLOT_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
    Complete,
}

/// Slot bookkeeping, independent of any device. `F` is the fence type.
#[derive(Debug)]
pub struct CommandSlots<F> {
    states: [SlotState; SLOT_COUNT],
    fences: [Option<F>; SLOT_COUNT],
    /// Submission sequence number per slot, for retiring in order
    sequence: [u64; SLOT_COUNT],
    submitted: u64,
    next: usize,
}

impl<F> Default for CommandSlots<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> CommandSlots<F> {
    pub fn new() -> Self {
        Self {
            states: [SlotState::Idle; SLOT_COUNT],
            fences: [None, None],
            sequence: [0; SLOT_COUNT],
            submitted: 0,
            next: 0,
        }
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// Slot the next batch is recorded into
    pub fn next_slot(&self) -> usize {
        self.next
    }

    fn transition(&mut self, slot: usize, from: SlotState, to: SlotState) -> Result<()> {
        if self.states[slot] != from {
            return Err(Error::device(
                "command slot transition",
                format!(
                    "slot {slot} is {:?}, expected {from:?} before {to:?}",
                    self.states[slot]
                ),
            ));
        }
        self.states[slot] = to;
        Ok(())
    }

    /// `Idle -> Recording` on the next slot in alternation
    pub fn begin_recording(&mut self) -> Result<usize> {
        let slot = self.next;
        self.transition(slot, SlotState::Idle, SlotState::Recording)?;
        self.next = (slot + 1) % SLOT_COUNT;
        Ok(slot)
    }

    /// `Recording -> Submitted`, remembering the fence to wait on
    pub fn mark_submitted(&mut self, slot: usize, fence: F) -> Result<()> {
        self.transition(slot, SlotState::Recording, SlotState::Submitted)?;
        self.submitted += 1;
        self.sequence[slot] = self.submitted;
        self.fences[slot] = Some(fence);
        Ok(())
    }

    pub fn fence(&self, slot: usize) -> Option<&F> {
        self.fences[slot].as_ref()
    }

    /// `Submitted -> Complete` once the fence was observed signaled
    pub fn mark_complete(&mut self, slot: usize) -> Result<()> {
        self.transition(slot, SlotState::Submitted, SlotState::Complete)?;
        self.fences[slot] = None;
        Ok(())
    }

    /// `Complete -> Idle`
    pub fn release(&mut self, slot: usize) -> Result<()> {
        self.transition(slot, SlotState::Complete, SlotState::Idle)
    }

    /// Slots with an unobserved submission, oldest first
    pub fn in_flight(&self) -> Vec<usize> {
        let mut slots: Vec<usize> = (0..SLOT_COUNT)
            .filter(|&s| self.states[s] == SlotState::Submitted)
            .collect();
        slots.sort_by_key(|&s| self.sequence[s]);
        slots
    }
}

/// Records and submits command streams through the two slots
pub struct ExecutionScheduler {
    device: wgpu::Device,
    queue: wgpu::Queue,
    slots: CommandSlots<wgpu::SubmissionIndex>,
    encoders: [Option<wgpu::CommandEncoder>; SLOT_COUNT],
}

impl ExecutionScheduler {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            slots: CommandSlots::new(),
            encoders: [None, None],
        }
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.slots.state(slot)
    }

    /// Open the next slot for recording, first waiting out its previous submission if needed
    pub fn begin_recording(&mut self) -> Result<usize> {
        let slot = self.slots.next_slot();
        if self.slots.state(slot) == SlotState::Submitted {
            self.wait(slot)?;
        }
        if self.slots.state(slot) == SlotState::Complete {
            self.slots.release(slot)?;
        }
        let slot = self.slots.begin_recording()?;
        self.encoders[slot] = Some(self.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor {
                label: Some(if slot == 0 {
                    "Simulation Encoder 0"
                } else {
                    "Simulation Encoder 1"
                }),
            },
        ));
        Ok(slot)
    }

    pub fn encoder(&mut self, slot: usize) -> Result<&mut wgpu::CommandEncoder> {
        self.encoders[slot]
            .as_mut()
            .ok_or_else(|| Error::device("command slot", format!("slot {slot} is not recording")))
    }

    /// Finish and submit the slot's command stream
    pub fn submit(&mut self, slot: usize) -> Result<()> {
        let encoder = self.encoders[slot]
            .take()
            .ok_or_else(|| Error::device("queue.submit", format!("slot {slot} is not recording")))?;
        let queue = &self.queue;
        let index = validated(&self.device, "queue.submit", || {
            queue.submit(std::iter::once(encoder.finish()))
        })?;
        self.slots.mark_submitted(slot, index)
    }

    /// Block until the slot's submission completed. Returns false when nothing was outstanding.
    pub fn wait(&mut self, slot: usize) -> Result<bool> {
        let Some(index) = self.slots.fence(slot).cloned() else {
            return Ok(false);
        };
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(index),
                timeout: None,
            })
            .map_err(|e| Error::device("device.poll", e))?;
        self.slots.mark_complete(slot)?;
        Ok(true)
    }

    /// Slots with outstanding work, oldest first
    pub fn in_flight(&self) -> Vec<usize> {
        self.slots.in_flight()
    }

    /// Wait for every outstanding submission, returning the slots that completed in submission order
    pub fn wait_all(&mut self) -> Result<Vec<usize>> {
        let pending = self.slots.in_flight();
        for &slot in &pending {
            self.wait(slot)?;
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_lifecycle() {
        let mut slots = CommandSlots::<u64>::new();
        let slot = slots.begin_recording().unwrap();
        assert_eq!(slot, 0);
        assert_eq!(slots.state(0), SlotState::Recording);

        slots.mark_submitted(0, 7).unwrap();
        assert_eq!(slots.state(0), SlotState::Submitted);
        assert_eq!(slots.fence(0), Some(&7));
        assert_eq!(slots.in_flight(), vec![0]);

        slots.mark_complete(0).unwrap();
        assert_eq!(slots.fence(0), None);
        assert!(slots.in_flight().is_empty());
        slots.release(0).unwrap();
        assert_eq!(slots.state(0), SlotState::Idle);
    }

    #[test]
    fn slots_alternate_and_overlap() {
        let mut slots = CommandSlots::<u64>::new();
        let a = slots.begin_recording().unwrap();
        slots.mark_submitted(a, 1).unwrap();

        // Second slot records while the first is still executing
        let b = slots.begin_recording().unwrap();
        assert_ne!(a, b);
        assert_eq!(slots.state(a), SlotState::Submitted);
        slots.mark_submitted(b, 2).unwrap();
        assert_eq!(slots.in_flight(), vec![a, b]);

        // First slot cannot be reused before its fence is observed
        assert!(slots.begin_recording().is_err());
        slots.mark_complete(a).unwrap();
        slots.release(a).unwrap();
        assert_eq!(slots.begin_recording().unwrap(), a);
        slots.mark_submitted(a, 3).unwrap();
        assert_eq!(slots.in_flight(), vec![b, a]);
    }

    #[test]
    fn illegal_transitions_are_device_errors() {
        let mut slots = CommandSlots::<u64>::new();
        assert!(slots.mark_submitted(0, 1).is_err());
        assert!(slots.mark_complete(0).is_err());
        let err = slots.release(0).unwrap_err();
        assert_eq!(err.code(), 2);

        slots.begin_recording().unwrap();
        assert!(slots.mark_complete(0).is_err());
        assert!(slots.release(0).is_err());
    }
}
