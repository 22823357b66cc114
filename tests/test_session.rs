mod common;
use approx::assert_abs_diff_eq;
use calcium_quint::{
    io::write_session_dir, load_session, BehaviorOptions, Clock, Criterion, Error, GroupBy, ParamValue, QueryOptions,
    SegmentCriteria, SemanticParam, SessionBuilder, SessionConfig, StimulusKind, TraceKind, TraceOptions,
};
use common::*;

// ── Segment table and blocks ─────────────────────────────────────────────────

#[test]
fn segment_table_rows() {
    let sess = session();
    let table = sess.segment_table();
    assert_eq!(table.len(), N_GABORS + 2 * BRICK_SEGS + 1);
    assert_eq!(table.rows_for(StimulusKind::Gabors).count(), N_GABORS);
    assert_eq!(table.rows_for(StimulusKind::Bricks).count(), 2 * BRICK_SEGS);
    assert_eq!(table.grayscreen_rows().count(), 1);
    assert_eq!(table.seg_id_bounds(StimulusKind::Bricks), Some((0, 39)));

    let rows = table.rows();
    assert!(rows.windows(2).all(|w| w[0].end_twop <= w[1].start_twop), "rows overlap or are unordered");

    let g = table.get(StimulusKind::Gabors, 15).unwrap();
    assert!(g.surprise);
    assert_eq!(g.gabfr, 3);
    assert_eq!((g.start_twop, g.end_twop, g.n_twop), (165, 174, 9));
    assert!(table.get(StimulusKind::Gabors, 200).is_err());
}

#[test]
fn second_brick_part_is_renumbered() {
    let sess = session();
    let table = sess.segment_table();
    let first_left = table.get(StimulusKind::Bricks, 20).unwrap();
    assert_eq!(first_left.par2, ParamValue::Text("left".into()));
    assert_eq!(first_left.start_twop, (PRE_BLANK + BRICK2_START) / 2);
    let surp: Vec<i64> = table.rows_for(StimulusKind::Bricks).filter(|r| r.surprise).map(|r| r.seg_id).collect();
    assert_eq!(surp, vec![12, 13, 14, 15, 32, 33, 34, 35]);

    let bricks = sess.stimuli().iter().find(|s| s.kind() == StimulusKind::Bricks).unwrap();
    assert_eq!(bricks.n_parts, 2);
}

#[test]
fn block_layout() {
    let sess = session();
    let gabors = sess.stim(StimulusKind::Gabors).unwrap();
    assert_eq!(gabors.stim.block_seg_ranges(), vec![vec![0..200]]);
    let block = &gabors.stim.blocks[0][0];
    assert_eq!(block.stim_frames, 60..3660);
    assert_eq!(block.twop_frames, 30..1830);
    assert_eq!(block.params.par1, None);
    assert_eq!(block.params.par2, ParamValue::Int(16));
    assert_eq!(gabors.stim.act_n_blocks, gabors.stim.exp_n_blocks);

    let bricks = sess.stim(StimulusKind::Bricks).unwrap();
    assert_eq!(bricks.stim.block_seg_ranges(), vec![vec![0..20], vec![20..40]]);
    let dirs: Vec<ParamValue> = bricks.stim.all_blocks().map(|b| b.params.par2.clone()).collect();
    assert_eq!(dirs, vec![ParamValue::Text("right".into()), ParamValue::Text("left".into())]);
    assert!(bricks.stim.all_blocks().all(|b| b.params.par1 == Some(ParamValue::Int(128))));
    assert_eq!(bricks.stim.blocks[1][0].twop_frames, 2460..3060);
    assert_eq!(bricks.stim.seg_span(), Some(0..40));
}

#[test]
fn grayscreen_between_stimuli() {
    let sess = session();
    let gs = sess.grayscreen();
    assert_eq!(gs.len(), 1);
    assert_eq!(gs.twop_ranges(), &[1830..1860]);
    assert_eq!(gs.onset_twop_frames(), vec![1830]);
    assert_eq!(gs.total_twop_frames(), 30);
    assert_eq!(gs.containing(1845), Some(0));
    assert_eq!(gs.containing(1860), None);
}

// ── Queries ───────────────────────────────────────────────────────────────────

#[test]
fn surprise_queries() {
    let sess = session();
    let view = sess.stim(StimulusKind::Gabors).unwrap();
    let (reg, surp) = view.all_surprise_segments(GroupBy::Flat).unwrap();
    assert_eq!(surp.clone().flatten(), gabor_surprise_ids());
    assert_eq!(reg.count(), N_GABORS - 10);

    let (reg_on, surp_on) = view.first_surprise_segments(GroupBy::Flat).unwrap();
    assert_eq!(surp_on.count(), 10);
    let reg_on = reg_on.flatten();
    assert_eq!(reg_on.len(), 11);
    assert_eq!(&reg_on[..3], &[0, 16, 36]);

    let bricks = sess.stim(StimulusKind::Bricks).unwrap();
    let (_, b_surp) = bricks.first_surprise_segments(GroupBy::Block).unwrap();
    assert_eq!(b_surp, calcium_quint::Grouped::Block(vec![vec![12], vec![32]]));
    let (_, b_frames) = bricks.first_surprise_stim_frames(GroupBy::Flat).unwrap();
    assert_eq!(b_frames.flatten(), vec![PRE_BLANK + BRICK1_START + 12 * BRICK_FRAMES, PRE_BLANK + BRICK2_START + 12 * BRICK_FRAMES]);
}

#[test]
fn criteria_queries() {
    let sess = session();
    let view = sess.stim(StimulusKind::Gabors).unwrap();
    let a = view.gabor_a_segments(GroupBy::Flat).unwrap().flatten();
    assert_eq!(a.len(), 50);
    assert!(a.iter().all(|s| s % 4 == 0));

    let ori0 = SegmentCriteria::default().with(SemanticParam::Orientation, Criterion::exact(0i64));
    assert_eq!(view.segments(&ori0, GroupBy::Flat, QueryOptions::default()).unwrap().count(), 51);

    let none = SegmentCriteria::default().seg_ids(Criterion::exact(500i64));
    let err = view.segments(&none, GroupBy::Flat, QueryOptions::default()).unwrap_err();
    assert!(err.is_empty_result());
    let empty = view
        .segments(&none, GroupBy::Flat, QueryOptions { empty_ok: true, ..QueryOptions::default() })
        .unwrap();
    assert!(empty.is_empty());

    let bricks = sess.stim(StimulusKind::Bricks).unwrap();
    let by_dir = bricks.regular_direction_segments(GroupBy::Flat).unwrap();
    assert_eq!(by_dir[&ParamValue::Text("right".into())].count(), 16);
    assert_eq!(by_dir[&ParamValue::Text("left".into())].clone().flatten()[0], 20);
    assert!(bricks.gabor_a_segments(GroupBy::Flat).is_err());
}

#[test]
fn frame_lookups_agree() {
    let sess = session();
    let view = sess.stim(StimulusKind::Gabors).unwrap();
    let segs: Vec<i64> = vec![0, 1, 15, 100, 199];
    let firsts = view.first_twop_frames(&segs).unwrap();
    assert_eq!(firsts, segs.iter().map(|&s| gabor_twop_onset(s)).collect::<Vec<_>>());
    assert_eq!(view.segs_by_twop_frames(&firsts).unwrap(), segs);
    assert_eq!(view.n_twop_frames(&segs).unwrap(), vec![9; 5]);
    assert_eq!(view.last_twop_frames(&[0]).unwrap(), vec![38]);

    let stim = view.first_stim_frames(&[1]).unwrap();
    assert_eq!(stim, vec![PRE_BLANK + GAB_FRAMES]);
    assert_eq!(view.last_stim_frames(&[1]).unwrap(), vec![PRE_BLANK + 2 * GAB_FRAMES - 1]);
    assert_eq!(view.stim_frame_lists(&[1]).unwrap()[0].len(), GAB_FRAMES);
    assert!(view.first_stim_frames(&[999]).is_err());

    // outside the gabor block
    assert_eq!(view.segs_by_twop_frames(&[2000]).unwrap(), vec![-1]);
    assert!(view.segs_by_twop_frames(&[N_TWOP]).is_err());
}

// ── Traces and behaviour ──────────────────────────────────────────────────────

#[test]
fn roi_windows_capture_responses() {
    let sess = session();
    let view = sess.stim(StimulusKind::Gabors).unwrap();
    let ids = gabor_surprise_ids();
    let refs = view.first_twop_frames(&ids).unwrap();
    let arr = sess.roi_trace_array(&refs, 0.0, 0.3, &TraceOptions::default()).unwrap();
    assert_eq!(arr.data.shape(), &[N_ROIS, 10, 9]);
    assert_eq!(arr.xran.len(), 9);
    assert!(arr.dropped.is_empty());
    for (k, &seg) in ids.iter().enumerate() {
        assert_abs_diff_eq!(arr.data[[0, k, 4]], response_amplitude(0, seg), epsilon = 0.1);
        assert_abs_diff_eq!(arr.data[[N_ROIS - 1, k, 4]], 0.0, epsilon = 0.1);
    }

    let integ = sess
        .roi_trace_array(&refs, 0.0, 0.3, &TraceOptions { integrate: true, ..TraceOptions::default() })
        .unwrap();
    assert_eq!(integ.data.shape(), &[N_ROIS, 10]);
    assert!(integ.xran.is_empty());
    assert_abs_diff_eq!(integ.data[[6, 0]], 0.3, epsilon = 0.04);
}

#[test]
fn roi_windows_at_recording_edge_are_dropped() {
    let sess = session();
    let arr = sess.roi_trace_array(&[5, 100, N_TWOP - 3], 0.5, 0.5, &TraceOptions::default()).unwrap();
    assert_eq!(arr.dropped, vec![0, 2]);
    assert_eq!(arr.data.shape()[1], 1);
    let err = sess.roi_trace_array(&[0], 1.0, 1.0, &TraceOptions::default()).unwrap_err();
    assert!(err.is_empty_result());
}

#[test]
fn roi_traces_and_sequences() {
    let sess = session();
    let t = sess.roi_traces(&[0, 10, 20], TraceKind::Raw, true).unwrap();
    assert_eq!(t.dim(), (N_ROIS, 3));
    assert!(sess.roi_traces(&[N_TWOP], TraceKind::Dff, true).is_err());

    let view = sess.stim(StimulusKind::Gabors).unwrap();
    let seqs: Vec<Vec<usize>> =
        view.twop_frame_ranges(&[0, 15, 199]).unwrap().into_iter().map(|r| r.collect()).collect();
    let (data, dropped) = sess.roi_sequences(&seqs, 1, 1, TraceKind::Dff, false).unwrap();
    assert!(dropped.is_empty());
    assert_eq!(data.dim(), (N_ROIS, 3, 11));
    assert_abs_diff_eq!(data[[2, 1, 1]], response_amplitude(2, 15), epsilon = 0.1);
}

#[test]
fn trace_stats_by_roi_and_across() {
    let sess = session();
    let refs = sess.stim(StimulusKind::Gabors).unwrap().first_twop_frames(&gabor_surprise_ids()).unwrap();
    let opts = TraceOptions { integrate: true, ..TraceOptions::default() };
    let (_, by_roi, _) = sess
        .roi_trace_stats(&refs, 0.0, 0.3, &opts, calcium_quint::Statistic::Mean, calcium_quint::ErrorStat::Sem, true)
        .unwrap();
    assert_eq!(by_roi.center.shape(), &[N_ROIS]);
    let (_, across, _) = sess
        .roi_trace_stats(&refs, 0.0, 0.3, &opts, calcium_quint::Statistic::Mean, calcium_quint::ErrorStat::Sem, false)
        .unwrap();
    assert_eq!(across.center.ndim(), 0);
}

#[test]
fn running_and_pupil_windows() {
    let sess = session();
    let bricks = sess.stim(StimulusKind::Bricks).unwrap();
    let refs = bricks.first_stim_frames(&[12, 32]).unwrap();
    let run = sess.run_array(&refs, 0.0, 1.0, &BehaviorOptions::default()).unwrap();
    assert_eq!(run.data.shape(), &[2, 60]);
    assert!(run.data.iter().all(|v| (8.0..=12.0).contains(v)));

    let twop = bricks.first_twop_frames(&[12, 32]).unwrap();
    let pupil = sess.pupil_array(&twop, 0.0, 1.0, &BehaviorOptions::default()).unwrap();
    assert_eq!(pupil.data.shape(), &[2, 30]);

    // 0.1 s delay: the last frame maps past the pupil recording, and the
    // window after N_TWOP - 5 overruns it
    let late = sess.pupil_array(&[100, N_TWOP - 1, N_TWOP - 5], 0.0, 0.1, &BehaviorOptions::default()).unwrap();
    assert_eq!(late.data.shape(), &[1, 3]);
    assert_eq!(late.dropped, vec![1, 2]);
    let err = sess.pupil_array(&[N_TWOP - 1], 0.0, 0.1, &BehaviorOptions::default()).unwrap_err();
    assert!(err.is_empty_result(), "{err}");

    let speeds = sess.run_speed_by_frames(&[1000, 2000], Clock::Twop, true).unwrap();
    assert_abs_diff_eq!(speeds[0], sess.running().values(true)[2001], epsilon = 1e-9);
    assert!(sess.run_speed_by_frames(&[N_STIM], Clock::Stim, true).is_err());

    let blocks = sess.run_by_block(StimulusKind::Bricks, true).unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1][0].len(), BRICK_SEGS * BRICK_FRAMES);
}

#[test]
fn responsive_rois_are_active() {
    let sess = session();
    let active = sess.active_rois(TraceKind::Dff, None).unwrap();
    for roi in RESPONSIVE {
        assert!(active.contains(&roi), "ROI {roi} should be active");
    }
    let during = sess.active_rois(TraceKind::Dff, Some(StimulusKind::Gabors)).unwrap();
    assert!(RESPONSIVE.all(|r| during.contains(&r)));
    assert!(sess.nan_rois(TraceKind::Dff).is_empty());
    assert_eq!(sess.valid_rois(TraceKind::Dff, true).len(), N_ROIS);
}

#[test]
fn nan_rois_are_excluded() {
    let mut inp = inputs();
    if let Some(dff) = inp.traces.dff.as_mut() {
        dff[[3, 500]] = f64::NAN;
    }
    let sess = calcium_quint::build_session(inp, &SessionConfig::default()).unwrap().value;
    assert_eq!(sess.nan_rois(TraceKind::Dff), &[3]);
    assert!(sess.nan_rois(TraceKind::Raw).is_empty());
    let arr = sess.roi_trace_array(&[100], 0.0, 0.3, &TraceOptions::default()).unwrap();
    assert_eq!(arr.data.shape()[0], N_ROIS - 1);
}

// ── Construction ──────────────────────────────────────────────────────────────

#[test]
fn builder_stages_out_of_order() {
    let err = SessionBuilder::new(metadata(), SessionConfig::default()).segments().unwrap_err();
    assert_eq!(err, Error::NotLoaded("alignment"));

    let err = SessionBuilder::new(metadata(), SessionConfig::default())
        .alignment(stim_log(), &sync())
        .unwrap()
        .stimuli()
        .unwrap_err();
    assert_eq!(err, Error::NotLoaded("segments"));

    let err = SessionBuilder::new(metadata(), SessionConfig::default())
        .alignment(stim_log(), &sync())
        .unwrap()
        .segments()
        .unwrap()
        .stimuli()
        .unwrap()
        .build()
        .unwrap_err();
    assert_eq!(err, Error::NotLoaded("traces"));
}

#[test]
fn missing_dff_is_computed_and_pupil_optional() {
    let mut inp = inputs();
    inp.traces.dff = None;
    inp.pupil = None;
    let sess = calcium_quint::build_session(inp, &SessionConfig::default()).unwrap().value;
    assert_eq!(sess.traces().dff.dim(), (N_ROIS, N_TWOP));
    assert!(matches!(sess.pupil(), Err(Error::NotLoaded("pupil"))));
}

#[test]
fn trace_length_must_match_alignment() {
    let mut inp = inputs();
    inp.traces.raw = ndarray::Array2::zeros((N_ROIS, N_TWOP - 1));
    inp.traces.dff = None;
    let err = calcium_quint::build_session(inp, &SessionConfig::default()).unwrap_err();
    assert!(matches!(err, Error::DataIntegrity(_)));
}

#[test]
fn session_directory_round_trip() {
    let dir = scratch_dir("round_trip");
    let inp = inputs();
    write_session_dir(&inp, &dir).unwrap();
    let loaded = load_session(&dir, &SessionConfig::default()).unwrap();
    let sess = loaded.value;
    assert_eq!(sess.id(), SESSION_ID);
    assert!(sess.metadata().passed());
    assert_eq!(sess.roi_names(), inp.traces.roi_names.as_slice());
    assert_eq!(sess.segment_table().len(), session().segment_table().len());
    let dff = inp.traces.dff.unwrap();
    assert_abs_diff_eq!(sess.traces().dff[[0, 170]], dff[[0, 170]], epsilon = 1e-12);
    assert!(sess.pupil().is_ok());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_directory_has_context() {
    let err = load_session(std::path::Path::new("/nonexistent/session"), &SessionConfig::default()).unwrap_err();
    assert!(err.to_string().contains("not a directory"));
}
