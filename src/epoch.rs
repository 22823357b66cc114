//! Frame windows around reference frames.
//!
//! A window spans `round(-pre·fps) .. round(post·fps)` frames relative to its
//! reference frame. Windows reaching outside `[0, n_frames)` are dropped
//! whole; the caller learns which ones through [`FrameWindows::dropped`].
use crate::error::{Error, Result};

/// Frame sequences cut around a list of reference frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameWindows {
    /// Time of each window position relative to the reference, in seconds.
    pub xran: Vec<f64>,
    /// One frame sequence per retained reference.
    pub seqs: Vec<Vec<usize>>,
    /// Indices (into the reference list) of the windows that were dropped.
    pub dropped: Vec<usize>,
}

impl FrameWindows {
    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    /// Window length in frames.
    pub fn n_frames(&self) -> usize {
        self.xran.len()
    }
}

/// `n` evenly spaced values over `[start, stop]`, both included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Cut `[pre, post]` second windows around each reference frame.
///
/// Returns [`Error::Empty`] ("No frames") when every window falls outside
/// the recording.
pub fn frame_windows(ref_frames: &[usize], pre: f64, post: f64, fps: f64, n_frames: usize) -> Result<FrameWindows> {
    if !(fps > 0.0) {
        return Err(Error::config(format!("frame rate must be positive, got {fps}")));
    }
    if pre + post <= 0.0 {
        return Err(Error::config(format!("window [-{pre}, {post}] s is empty")));
    }
    let lo = (-pre * fps).round() as i64;
    let hi = (post * fps).round() as i64;
    if hi <= lo {
        return Err(Error::config(format!("window [-{pre}, {post}] s is shorter than one frame")));
    }
    let xran = linspace(-pre, post, (hi - lo) as usize);

    let mut seqs = Vec::with_capacity(ref_frames.len());
    let mut dropped = Vec::new();
    for (i, &r) in ref_frames.iter().enumerate() {
        let first = r as i64 + lo;
        let end = r as i64 + hi;
        if first < 0 || end > n_frames as i64 {
            dropped.push(i);
            continue;
        }
        seqs.push((first as usize..end as usize).collect());
    }
    if !dropped.is_empty() {
        log::debug!("{} of {} window(s) outside [0, {n_frames}) dropped", dropped.len(), ref_frames.len());
    }
    if seqs.is_empty() {
        return Err(Error::empty("No frames: every window falls outside the recording"));
    }
    Ok(FrameWindows { xran, seqs, dropped })
}

/// Extend each sequence by `pre_pad` frames before its own first frame and
/// `post_pad` after its own last frame.
///
/// Sequences that then reach outside `[0, n_frames)` are dropped; their
/// indices are returned alongside the kept sequences. Empty input sequences
/// are dropped too.
pub fn extend_sequences(
    seqs: &[Vec<usize>],
    pre_pad: usize,
    post_pad: usize,
    n_frames: usize,
) -> (Vec<Vec<usize>>, Vec<usize>) {
    let mut kept = Vec::with_capacity(seqs.len());
    let mut dropped = Vec::new();
    for (i, seq) in seqs.iter().enumerate() {
        let (Some(&first), Some(&last)) = (seq.first(), seq.last()) else {
            dropped.push(i);
            continue;
        };
        if first < pre_pad || last + post_pad >= n_frames {
            dropped.push(i);
            continue;
        }
        let mut ext: Vec<usize> = (first - pre_pad..first).collect();
        ext.extend_from_slice(seq);
        ext.extend(last + 1..=last + post_pad);
        kept.push(ext);
    }
    (kept, dropped)
}
