//! Scenario tests for the frame protocol: resize, stale surfaces and
//! minimize/restore sequences as an application would encounter them.

use render_engine::frame::{
    AcquireOutcome, FramePhase, FrameProtocol, FrameStep, PresentOutcome,
};

fn render_frame(protocol: &mut FrameProtocol, present: PresentOutcome) -> FrameStep {
    assert_eq!(protocol.begin(false), FrameStep::Proceed);
    assert_eq!(
        protocol.on_acquire(AcquireOutcome::Success {
            image_index: (protocol.frame_counter() % 3) as u32,
            suboptimal: false,
        }),
        FrameStep::Proceed
    );
    protocol.on_recorded();
    protocol.on_submitted();
    protocol.on_presented(present)
}

#[test]
fn steady_state_renders_without_recreates() {
    let mut protocol = FrameProtocol::new(2);
    for _ in 0..120 {
        assert_eq!(
            render_frame(&mut protocol, PresentOutcome::Success),
            FrameStep::Proceed
        );
    }
    assert_eq!(protocol.frame_counter(), 120);
    assert_eq!(protocol.surface_generation(), 0);
}

#[test]
fn window_resize_triggers_exactly_one_recreate() {
    let mut protocol = FrameProtocol::new(2);
    render_frame(&mut protocol, PresentOutcome::Success);

    // Several resize events may arrive between frames; they coalesce.
    protocol.note_resize();
    protocol.note_resize();
    protocol.note_resize();

    assert_eq!(protocol.begin(false), FrameStep::Recreate);
    protocol.on_recreated();
    assert_eq!(protocol.surface_generation(), 1);

    // The following frame is clean again.
    assert_eq!(
        render_frame(&mut protocol, PresentOutcome::Success),
        FrameStep::Proceed
    );
    assert_eq!(protocol.surface_generation(), 1);
}

#[test]
fn stale_present_recreates_then_resumes_rendering() {
    let mut protocol = FrameProtocol::new(2);
    assert_eq!(
        render_frame(&mut protocol, PresentOutcome::OutOfDate),
        FrameStep::Recreate
    );
    assert_eq!(protocol.phase(), FramePhase::Stale);
    protocol.on_recreated();

    for _ in 0..3 {
        assert_eq!(
            render_frame(&mut protocol, PresentOutcome::Success),
            FrameStep::Proceed
        );
    }
    assert_eq!(protocol.frame_counter(), 4);
    assert_eq!(protocol.surface_generation(), 1);
}

#[test]
fn repeated_stale_acquires_never_advance_the_counter() {
    let mut protocol = FrameProtocol::new(2);
    for expected_generation in 1..=3 {
        assert_eq!(protocol.begin(false), FrameStep::Proceed);
        assert_eq!(
            protocol.on_acquire(AcquireOutcome::OutOfDate),
            FrameStep::Recreate
        );
        protocol.on_recreated();
        assert_eq!(protocol.surface_generation(), expected_generation);
    }
    assert_eq!(protocol.frame_counter(), 0);
    assert_eq!(protocol.slot(), 0);
}

#[test]
fn minimize_skips_frames_and_restore_recreates_once() {
    let mut protocol = FrameProtocol::new(2);
    render_frame(&mut protocol, PresentOutcome::Success);

    // Minimize: the resize to zero is noted, then every begin skips.
    protocol.note_resize();
    for _ in 0..10 {
        assert_eq!(protocol.begin(true), FrameStep::SkipZeroSized);
    }
    assert_eq!(protocol.frame_counter(), 1);
    assert_eq!(protocol.surface_generation(), 0);

    // Restore: the pending resize finally runs its single recreate.
    assert_eq!(protocol.begin(false), FrameStep::Recreate);
    protocol.on_recreated();
    assert_eq!(protocol.surface_generation(), 1);
    assert_eq!(
        render_frame(&mut protocol, PresentOutcome::Success),
        FrameStep::Proceed
    );
}

#[test]
fn suboptimal_surface_defers_recreation_to_the_frame_boundary() {
    let mut protocol = FrameProtocol::new(2);
    assert_eq!(protocol.begin(false), FrameStep::Proceed);
    assert_eq!(
        protocol.on_acquire(AcquireOutcome::Success {
            image_index: 0,
            suboptimal: true,
        }),
        FrameStep::Proceed
    );
    protocol.on_recorded();
    protocol.on_submitted();
    // The frame completed and was presented before the recreate runs.
    assert_eq!(
        protocol.on_presented(PresentOutcome::Success),
        FrameStep::Recreate
    );
    assert_eq!(protocol.frame_counter(), 1);
    protocol.on_recreated();
    assert_eq!(protocol.phase(), FramePhase::Idle);
}

#[test]
fn slots_keep_alternating_across_recreates() {
    let mut protocol = FrameProtocol::new(2);
    render_frame(&mut protocol, PresentOutcome::Success);
    assert_eq!(protocol.slot(), 1);

    // A stale acquire does not consume the slot.
    protocol.begin(false);
    protocol.on_acquire(AcquireOutcome::OutOfDate);
    protocol.on_recreated();
    assert_eq!(protocol.slot(), 1);

    render_frame(&mut protocol, PresentOutcome::Success);
    assert_eq!(protocol.slot(), 0);
}
