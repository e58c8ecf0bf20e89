//! The per-frame protocol as a pure state machine.
//!
//! The orchestrator drives real Vulkan calls through this model: every frame
//! walks Idle, Acquired, Recorded, Submitted, Presented in order, and any
//! stale-surface report detours through Stale until exactly one recreate
//! cascade has run. Keeping the protocol free of device handles lets the
//! ordering rules be tested directly.

/// Where the current frame stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquired,
    Recorded,
    Submitted,
    Presented,
    /// The surface no longer matches the window; no further frame work is
    /// allowed until the recreate cascade completes.
    Stale,
}

/// Result of an image acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Success { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of a present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Success,
    Suboptimal,
    OutOfDate,
}

/// What the orchestrator must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    /// Continue with the current frame.
    Proceed,
    /// Skip this frame entirely; the window has no drawable area.
    SkipZeroSized,
    /// Run the recreate cascade, then return to Idle.
    Recreate,
}

#[derive(Debug)]
pub struct FrameProtocol {
    phase: FramePhase,
    slot: usize,
    slots: usize,
    frame_counter: u64,
    surface_generation: u64,
    resize_pending: bool,
}

impl FrameProtocol {
    pub fn new(slots: usize) -> Self {
        Self {
            phase: FramePhase::Idle,
            slot: 0,
            slots,
            frame_counter: 0,
            surface_generation: 0,
            resize_pending: false,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Frames successfully presented so far.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn surface_generation(&self) -> u64 {
        self.surface_generation
    }

    /// Note a window resize. Applied lazily: the frame in flight finishes
    /// against the old surface and the recreate runs at the next boundary.
    pub fn note_resize(&mut self) {
        self.resize_pending = true;
    }

    /// Start a frame. `zero_sized` reflects the window's drawable area.
    pub fn begin(&mut self, zero_sized: bool) -> FrameStep {
        assert_eq!(self.phase, FramePhase::Idle, "frame already in progress");
        if zero_sized {
            return FrameStep::SkipZeroSized;
        }
        if self.resize_pending {
            self.phase = FramePhase::Stale;
            return FrameStep::Recreate;
        }
        FrameStep::Proceed
    }

    pub fn on_acquire(&mut self, outcome: AcquireOutcome) -> FrameStep {
        assert_eq!(self.phase, FramePhase::Idle);
        match outcome {
            AcquireOutcome::Success { suboptimal, .. } => {
                // A suboptimal acquire still returned a usable image; render
                // this frame and fold the recreate into the next boundary.
                if suboptimal {
                    self.resize_pending = true;
                }
                self.phase = FramePhase::Acquired;
                FrameStep::Proceed
            }
            AcquireOutcome::OutOfDate => {
                self.phase = FramePhase::Stale;
                FrameStep::Recreate
            }
        }
    }

    pub fn on_recorded(&mut self) {
        assert_eq!(self.phase, FramePhase::Acquired);
        self.phase = FramePhase::Recorded;
    }

    pub fn on_submitted(&mut self) {
        assert_eq!(self.phase, FramePhase::Recorded);
        self.phase = FramePhase::Submitted;
    }

    /// Complete the frame. The counter and slot advance even when the present
    /// reported a stale surface: the submission retired and consumed its
    /// semaphores, so the slot must rotate.
    pub fn on_presented(&mut self, outcome: PresentOutcome) -> FrameStep {
        assert_eq!(self.phase, FramePhase::Submitted);
        self.frame_counter += 1;
        self.slot = (self.slot + 1) % self.slots;
        match outcome {
            PresentOutcome::Success if !self.resize_pending => {
                self.phase = FramePhase::Idle;
                FrameStep::Proceed
            }
            _ => {
                self.phase = FramePhase::Stale;
                FrameStep::Recreate
            }
        }
    }

    /// The recreate cascade finished; the surface generation advances and
    /// frame work may resume.
    pub fn on_recreated(&mut self) {
        assert_eq!(self.phase, FramePhase::Stale, "recreate without stale surface");
        self.surface_generation += 1;
        self.resize_pending = false;
        self.phase = FramePhase::Idle;
    }

    /// The cascade could not run because the window has no drawable area.
    /// Returns to Idle with the recreate still pending; the generation does
    /// not advance since no new surface exists.
    pub fn defer_recreate(&mut self) {
        assert_eq!(self.phase, FramePhase::Stale, "defer without stale surface");
        self.resize_pending = true;
        self.phase = FramePhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_clean_frame(protocol: &mut FrameProtocol) {
        assert_eq!(protocol.begin(false), FrameStep::Proceed);
        assert_eq!(
            protocol.on_acquire(AcquireOutcome::Success {
                image_index: 0,
                suboptimal: false
            }),
            FrameStep::Proceed
        );
        protocol.on_recorded();
        protocol.on_submitted();
        assert_eq!(protocol.on_presented(PresentOutcome::Success), FrameStep::Proceed);
    }

    #[test]
    fn clean_frames_advance_counter_and_alternate_slots() {
        let mut protocol = FrameProtocol::new(2);
        for expected_slot in [0, 1, 0, 1] {
            assert_eq!(protocol.slot(), expected_slot);
            run_clean_frame(&mut protocol);
        }
        assert_eq!(protocol.frame_counter(), 4);
        assert_eq!(protocol.surface_generation(), 0);
    }

    #[test]
    fn resize_then_stale_present_recreates_once_and_resumes() {
        let mut protocol = FrameProtocol::new(2);
        run_clean_frame(&mut protocol);

        protocol.note_resize();
        assert_eq!(protocol.begin(false), FrameStep::Recreate);
        protocol.on_recreated();
        assert_eq!(protocol.surface_generation(), 1);

        run_clean_frame(&mut protocol);
        assert_eq!(protocol.frame_counter(), 2);
        assert_eq!(protocol.surface_generation(), 1);
    }

    #[test]
    fn out_of_date_acquire_does_not_advance_the_frame_counter() {
        let mut protocol = FrameProtocol::new(2);
        assert_eq!(protocol.begin(false), FrameStep::Proceed);
        assert_eq!(
            protocol.on_acquire(AcquireOutcome::OutOfDate),
            FrameStep::Recreate
        );
        assert_eq!(protocol.frame_counter(), 0);
        assert_eq!(protocol.slot(), 0);

        protocol.on_recreated();
        run_clean_frame(&mut protocol);
        assert_eq!(protocol.frame_counter(), 1);
        assert_eq!(protocol.surface_generation(), 1);
    }

    #[test]
    fn stale_present_still_rotates_the_slot() {
        let mut protocol = FrameProtocol::new(2);
        assert_eq!(protocol.begin(false), FrameStep::Proceed);
        protocol.on_acquire(AcquireOutcome::Success {
            image_index: 0,
            suboptimal: false,
        });
        protocol.on_recorded();
        protocol.on_submitted();
        assert_eq!(
            protocol.on_presented(PresentOutcome::OutOfDate),
            FrameStep::Recreate
        );
        // The submission went through, so the frame counts and the slot moves.
        assert_eq!(protocol.frame_counter(), 1);
        assert_eq!(protocol.slot(), 1);
        protocol.on_recreated();
        assert_eq!(protocol.phase(), FramePhase::Idle);
    }

    #[test]
    fn suboptimal_acquire_renders_then_recreates_at_the_next_boundary() {
        let mut protocol = FrameProtocol::new(2);
        assert_eq!(protocol.begin(false), FrameStep::Proceed);
        assert_eq!(
            protocol.on_acquire(AcquireOutcome::Success {
                image_index: 1,
                suboptimal: true
            }),
            FrameStep::Proceed
        );
        protocol.on_recorded();
        protocol.on_submitted();
        assert_eq!(
            protocol.on_presented(PresentOutcome::Success),
            FrameStep::Recreate
        );
        assert_eq!(protocol.frame_counter(), 1);
    }

    #[test]
    fn zero_sized_window_skips_frames_without_state_changes() {
        let mut protocol = FrameProtocol::new(2);
        for _ in 0..3 {
            assert_eq!(protocol.begin(true), FrameStep::SkipZeroSized);
            assert_eq!(protocol.phase(), FramePhase::Idle);
        }
        assert_eq!(protocol.frame_counter(), 0);
        run_clean_frame(&mut protocol);
        assert_eq!(protocol.frame_counter(), 1);
    }

    #[test]
    fn deferred_recreate_keeps_the_generation_and_stays_pending() {
        let mut protocol = FrameProtocol::new(2);
        protocol.note_resize();
        assert_eq!(protocol.begin(false), FrameStep::Recreate);

        // The window was minimized before the cascade could run.
        protocol.defer_recreate();
        assert_eq!(protocol.surface_generation(), 0);
        assert_eq!(protocol.begin(true), FrameStep::SkipZeroSized);

        // Restored: the pending recreate finally runs.
        assert_eq!(protocol.begin(false), FrameStep::Recreate);
        protocol.on_recreated();
        assert_eq!(protocol.surface_generation(), 1);
    }

    #[test]
    #[should_panic(expected = "recreate without stale surface")]
    fn recreate_outside_the_stale_state_is_a_protocol_violation() {
        let mut protocol = FrameProtocol::new(2);
        protocol.on_recreated();
    }
}
