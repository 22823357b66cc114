mod common;
use approx::assert_abs_diff_eq;
use calcium_quint::{build_session, DiagnosticKind, Error, SessionConfig};
use common::{inputs, session, stim_log, sync, N_STIM, N_TWOP, RUN_SPIKE};

#[test]
fn frame_counts_and_rates() {
    let sess = session();
    let al = sess.alignment();
    assert_eq!(al.n_stim_frames(), N_STIM);
    assert_eq!(al.n_twop_frames(), N_TWOP);
    assert_eq!(al.n_pupil_frames(), N_TWOP);
    assert_abs_diff_eq!(al.stim_fps(), 60.0);
    assert_abs_diff_eq!(al.twop_fps(), 30.0);
    assert_abs_diff_eq!(al.pupil_fps(), 30.0, epsilon = 1e-9);
    assert_eq!(al.n_repaired_gaps(), 0);
    assert_eq!(al.dropped_prop(), 0.0);
}

#[test]
fn stim_twop_mapping_round_trips() {
    let sess = session();
    let al = sess.alignment();
    let fwd = al.stim_to_twop_all();
    assert!(fwd.windows(2).all(|w| w[0] <= w[1]), "stim → 2p must be non-decreasing");
    for twop in [0usize, 1, 500, 1829, N_TWOP - 1] {
        let stim = al.twop_to_stim_frame(twop).unwrap();
        assert_eq!(stim, 2 * twop, "2p frame {twop}");
        assert_eq!(al.stim_frame_to_twop(stim).unwrap(), twop);
    }
    assert!(al.stim_frame_to_twop(N_STIM).is_err());
    assert!(al.twop_to_stim_frame(N_TWOP).is_err());
}

#[test]
fn pupil_frame_includes_display_delay() {
    let sess = session();
    let al = sess.alignment();
    // 0.1 s at 30 Hz
    assert_eq!(al.twop_to_pupil_frame(100, 0.1).unwrap(), 103);
    assert_eq!(al.twop_to_pupil_frame(100, 0.0).unwrap(), 100);
    assert!(al.twop_to_pupil_frame(N_TWOP - 1, 0.1).is_err());
    assert_eq!(al.twop_to_body_frame(42).unwrap(), 42);
}

#[test]
fn running_spike_is_repaired() {
    let sess = session();
    let run = sess.running();
    assert_eq!(run.len(), N_STIM);
    assert!(run.values(false)[RUN_SPIKE].is_nan());
    let repaired = run.values(true)[RUN_SPIKE];
    let neighbours = (run.values(true)[RUN_SPIKE - 1] + run.values(true)[RUN_SPIKE + 1]) / 2.0;
    assert_abs_diff_eq!(repaired, neighbours, epsilon = 1e-9);
    assert_eq!(run.values(false).iter().filter(|v| v.is_nan()).count(), 1);
    assert!(run.values(true).iter().all(|v| v.is_finite()));
}

#[test]
fn running_repair_is_reported() {
    let loaded = build_session(inputs(), &SessionConfig::default()).unwrap();
    assert_eq!(loaded.diagnostics.of_kind(DiagnosticKind::RunningOutliers).count(), 1);
    assert_eq!(loaded.diagnostics.of_kind(DiagnosticKind::DroppedFrames).count(), 0);
}

#[test]
fn blinks_are_removed_from_pupil() {
    let sess = session();
    let pupil = sess.pupil().unwrap();
    assert_eq!(pupil.len(), N_TWOP);
    assert_eq!(pupil.values(false)[250], 2.0);
    assert!(pupil.values(true)[250].is_nan());
    assert!(pupil.values(true)[251].is_finite());
}

#[test]
fn alignment_length_mismatch_is_integrity_error() {
    let mut inp = inputs();
    inp.sync.stim_to_twop.pop();
    let err = build_session(inp, &SessionConfig::default()).unwrap_err();
    assert!(matches!(err, Error::DataIntegrity(_)), "{err}");

    let mut inp = inputs();
    inp.stim_log.running_velocity.truncate(100);
    let err = build_session(inp, &SessionConfig::default()).unwrap_err();
    assert!(matches!(err, Error::DataIntegrity(_)), "{err}");

    let mut inp = inputs();
    inp.sync.twop_to_body.pop();
    assert!(matches!(build_session(inp, &SessionConfig::default()), Err(Error::DataIntegrity(_))));
}

#[test]
fn decreasing_alignment_is_rejected() {
    let mut inp = inputs();
    inp.sync.stim_to_twop[3000] = 0;
    let err = build_session(inp, &SessionConfig::default()).unwrap_err();
    assert!(err.to_string().contains("decreases"), "{err}");
}

#[test]
fn dropped_frames_above_tolerance_warn() {
    let mut log = stim_log();
    log.dropped_frames = vec![100, 200, 300];
    let (al, diags) = calcium_quint::FrameAlignment::build(&log, &sync(), 0.0003).unwrap();
    assert_abs_diff_eq!(al.dropped_prop(), 3.0 / 6060.0);
    assert_eq!(diags.of_kind(DiagnosticKind::DroppedFrames).count(), 1);

    // same drops, looser tolerance
    let (_, diags) = calcium_quint::FrameAlignment::build(&log, &sync(), 0.01).unwrap();
    assert!(diags.is_empty());
}

#[test]
fn skipped_twop_frames_are_repaired() {
    let mut s = sync();
    // 2p frame 1000 receives no stimulus frame
    for f in 2000..2010 {
        s.stim_to_twop[f] = f / 2 + 1;
    }
    let (al, diags) = calcium_quint::FrameAlignment::build(&stim_log(), &s, 0.0003).unwrap();
    assert_eq!(al.n_repaired_gaps(), 1);
    assert_eq!(al.twop_to_stim_all()[1000], Some(1998));
    assert_eq!(al.twop_to_stim_frame(1000).unwrap(), 1998);
    assert_eq!(diags.of_kind(DiagnosticKind::DroppedFrames).count(), 1);
}
