/// Shared synthetic session used by the integration tests.
///
/// Layout on the stimulus clock (60 Hz), 2p clock at 30 Hz (`stim / 2`):
///
/// ```text
///   0 ..   60  pre-blank
///  60 .. 3660  gabors, 200 segments × 18 frames, sets of 4 (A B C D/E)
/// 3660 .. 3720  grayscreen
/// 3720 .. 4920  bricks part 1, 20 segments × 60 frames, direction "right"
/// 4920 .. 6120  bricks part 2, 20 segments × 60 frames, direction "left"
/// 6120 .. 6180  post-blank
/// ```
///
/// Every fifth gabor set ends on a surprise E segment (ids 15, 35, …, 195).
/// Bricks segments 12..16 of each part are surprises. ROIs 0..6 respond to
/// gabor surprises for exactly one segment (9 2p frames) with an amplitude
/// growing over the session, ROIs 6 and 7 with a constant amplitude; the
/// rest carry noise only.
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

use calcium_quint::{
    build_session, KindParams, ParamValue, PupilStore, SegmentParams, Session, SessionConfig, SessionInputs, SessionMetadata,
    StimLog, StimulusLog, StimulusParams, SyncStore, TraceStore,
};

#[allow(unused)]
pub const STIM_FPS: f64 = 60.0;
#[allow(unused)]
pub const TWOP_FPS: f64 = 30.0;
pub const PRE_BLANK: usize = 60;
pub const TOTAL_FRAMES: usize = 6060;
pub const N_STIM: usize = 6180;
pub const N_TWOP: usize = 3090;
pub const N_GABORS: usize = 200;
pub const GAB_FRAMES: usize = 18;
pub const BRICK_SEGS: usize = 20;
pub const BRICK_FRAMES: usize = 60;
pub const N_ROIS: usize = 12;
/// ROIs carrying a surprise response.
#[allow(unused)]
pub const RESPONSIVE: std::ops::Range<usize> = 0..8;
#[allow(unused)]
pub const SESSION_ID: u64 = 758_519_303;
/// Running sample replaced by an outlier spike.
#[allow(unused)]
pub const RUN_SPIKE: usize = 1000;

pub const GAB_START: usize = 0;
pub const GRAY_START: usize = N_GABORS * GAB_FRAMES;
pub const BRICK1_START: usize = GRAY_START + 60;
pub const BRICK2_START: usize = BRICK1_START + BRICK_SEGS * BRICK_FRAMES;

/// Gabor surprise segment ids.
#[allow(unused)]
pub fn gabor_surprise_ids() -> Vec<i64> {
    (0..N_GABORS as i64).filter(|&i| is_gabor_surprise(i)).collect()
}

fn is_gabor_surprise(i: i64) -> bool {
    i % 4 == 3 && (i / 4) % 5 == 3
}

/// First 2p frame of gabor segment `i`.
#[allow(unused)]
pub fn gabor_twop_onset(i: i64) -> usize {
    (PRE_BLANK + GAB_START + i as usize * GAB_FRAMES) / 2
}

fn gabor_log() -> StimulusLog {
    let frame_list: Vec<i64> = (0..GRAY_START).map(|fr| (fr / GAB_FRAMES) as i64).collect();
    let segments = (0..N_GABORS as i64)
        .map(|i| {
            let set = i / 4;
            let ori: i64 = [0, 45, 90, 135][(set % 4) as usize];
            let surprise = is_gabor_surprise(i);
            SegmentParams {
                par1: ParamValue::Int(if surprise { (ori + 90) % 180 } else { ori }),
                par2: ParamValue::Int(16),
                surprise,
                gabfr: i % 4,
            }
        })
        .collect();
    StimulusLog {
        kind_params: KindParams::Gabors { n_seg_per_set: 4 },
        frame_list,
        display_sequence: vec![[1.0, 61.0]],
        blank_sweeps: 0,
        params: StimulusParams {
            seg_len_s: 0.3,
            surp_len: [3.0, 6.0],
            reg_len: [30.0, 90.0],
            block_len_s: 60.0,
            extra: Default::default(),
        },
        segments,
    }
}

fn bricks_log(start: usize, direction: &str, disp: [f64; 2]) -> StimulusLog {
    let mut frame_list = vec![-1i64; start + BRICK_SEGS * BRICK_FRAMES];
    for fr in 0..BRICK_SEGS * BRICK_FRAMES {
        frame_list[start + fr] = (fr / BRICK_FRAMES) as i64;
    }
    let segments = (0..BRICK_SEGS as i64)
        .map(|i| SegmentParams {
            par1: ParamValue::Int(128),
            par2: ParamValue::Text(direction.to_string()),
            surprise: (12..16).contains(&i),
            gabfr: -1,
        })
        .collect();
    StimulusLog {
        kind_params: KindParams::Bricks,
        frame_list,
        display_sequence: vec![disp],
        blank_sweeps: 0,
        params: StimulusParams {
            seg_len_s: 1.0,
            surp_len: [2.0, 4.0],
            reg_len: [30.0, 90.0],
            block_len_s: 20.0,
            extra: Default::default(),
        },
        segments,
    }
}

#[allow(unused)]
pub fn metadata() -> SessionMetadata {
    SessionMetadata {
        session_id: SESSION_ID,
        mouse_n: 1,
        depth: 175,
        layer: "soma".into(),
        line: "L23-Cux2".into(),
        sess_gen: 1,
        sess_within: 1,
        sess_n: 1,
        pass_fail: "P".into(),
        all_files: true,
        any_files: true,
        notes: String::new(),
    }
}

#[allow(unused)]
pub fn stim_log() -> StimLog {
    let running_velocity = (0..N_STIM)
        .map(|f| if f == RUN_SPIKE { 500.0 } else { 10.0 + 2.0 * (f as f64 / 50.0).sin() })
        .collect();
    StimLog {
        fps: STIM_FPS,
        total_frames: TOTAL_FRAMES,
        pre_blank_sec: 1.0,
        post_blank_sec: 1.0,
        dropped_frames: Vec::new(),
        running_velocity,
        stimuli: vec![
            gabor_log(),
            bricks_log(BRICK1_START, "right", [62.0, 82.0]),
            bricks_log(BRICK2_START, "left", [82.0, 102.0]),
        ],
    }
}

#[allow(unused)]
pub fn sync() -> SyncStore {
    SyncStore {
        stim_to_twop: (0..N_STIM).map(|f| f / 2).collect(),
        twop_to_pupil: (0..N_TWOP).collect(),
        twop_to_body: (0..N_TWOP).collect(),
        pupil_frame_intervals: vec![1.0 / TWOP_FPS; N_TWOP - 1],
        twop_fps: TWOP_FPS,
    }
}

/// Surprise response amplitude of `roi` to gabor segment `seg`.
#[allow(unused)]
pub fn response_amplitude(roi: usize, seg: i64) -> f64 {
    match roi {
        0..=5 => 0.5 + 2.0 * seg as f64 / N_GABORS as f64,
        6 | 7 => 1.0,
        _ => 0.0,
    }
}

#[allow(unused)]
pub fn traces(seed: u64) -> TraceStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut dff = Array2::from_shape_fn((N_ROIS, N_TWOP), |_| rng.gen_range(-0.1..0.1));
    for seg in gabor_surprise_ids() {
        let onset = gabor_twop_onset(seg);
        for roi in 0..N_ROIS {
            let amp = response_amplitude(roi, seg);
            for f in onset..onset + 9 {
                dff[[roi, f]] += amp;
            }
        }
    }
    let raw = dff.mapv(|v| 100.0 * (1.0 + v));
    TraceStore { raw, dff: Some(dff), roi_names: (0..N_ROIS).map(|i| format!("roi_{i:03}")).collect() }
}

#[allow(unused)]
pub fn pupil() -> PupilStore {
    let diameter = (0..N_TWOP)
        .map(|f| if f % 500 == 250 { 2.0 } else { 20.0 + (f as f64 / 30.0).sin() })
        .collect();
    let center = (0..N_TWOP).map(|f| [100.0 + (f % 3) as f64, 80.0]).collect();
    PupilStore { diameter, center }
}

#[allow(unused)]
pub fn inputs() -> SessionInputs {
    SessionInputs { metadata: metadata(), stim_log: stim_log(), sync: sync(), traces: traces(7), pupil: Some(pupil()) }
}

#[allow(unused)]
pub fn session() -> Session {
    build_session(inputs(), &SessionConfig::default()).unwrap().value
}

/// Fresh scratch directory under the system temp dir.
#[allow(unused)]
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("calcium_quint_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
