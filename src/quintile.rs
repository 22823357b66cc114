//! Quintile segmentation.
//!
//! Bins are equal-width spans of segment ids, not equal counts. The span is
//! taken over every segment of the stimulus (`[seg_min, seg_max + 1)`), so
//! bin edges do not move when the selected subset changes. Edges may be
//! fractional; a segment falls in bin `q` iff
//! `seg_min + q·w <= seg < seg_min + (q + 1)·w` with `w = span / n_quints`.
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::config::QuintConfig;
use crate::error::{Error, Result};
use crate::segments::{GroupBy, SegmentCriteria};
use crate::stimulus::{QueryOptions, StimView};

/// Segments per retained quintile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quintiles {
    /// Bin index of each entry in `segs`.
    pub indices: Vec<usize>,
    pub segs: Vec<Vec<i64>>,
    /// Run length behind each retained segment, when runs were collapsed
    /// with `by_surp_len`.
    pub n_consec: Option<Vec<Vec<usize>>>,
}

impl Quintiles {
    pub fn counts(&self) -> Vec<usize> {
        self.segs.iter().map(Vec::len).collect()
    }

    pub fn len(&self) -> usize {
        self.segs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }
}

/// Options for [`quintile_segments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuintOptions {
    /// Keep only the first segment of each consecutive run.
    pub remove_consecutive: bool,
    /// Collapse runs and report each run's length. Runs are collapsed
    /// here, so `remove_consecutive` has no effect when this is set.
    pub by_surp_len: bool,
    /// Empty selections give empty bins instead of an error.
    pub empty_ok: bool,
}

/// Collapse runs of ids spaced exactly `step` apart into their first id and
/// the run length.
pub fn consec(ids: &[i64], step: i64) -> (Vec<i64>, Vec<usize>) {
    let mut firsts = Vec::new();
    let mut lens: Vec<usize> = Vec::new();
    for (k, &v) in ids.iter().enumerate() {
        if k > 0 && v - ids[k - 1] == step {
            if let Some(n) = lens.last_mut() {
                *n += 1;
            }
        } else {
            firsts.push(v);
            lens.push(1);
        }
    }
    (firsts, lens)
}

/// Half-open bin bounds for bin `q`.
fn bin_contains(seg: i64, q: usize, seg_min: i64, width: f64) -> bool {
    let s = seg as f64;
    let lo = seg_min as f64 + q as f64 * width;
    let hi = seg_min as f64 + (q + 1) as f64 * width;
    s >= lo && s < hi
}

/// Split `segs` into the bins `indices` of `n_quints` equal-width bins over
/// `[seg_min, seg_max)`.
pub fn bin_segments(segs: &[i64], seg_min: i64, seg_max: i64, n_quints: usize, indices: &[usize]) -> Vec<Vec<i64>> {
    let width = (seg_max - seg_min) as f64 / n_quints.max(1) as f64;
    indices
        .iter()
        .map(|&q| segs.iter().copied().filter(|&s| bin_contains(s, q, seg_min, width)).collect())
        .collect()
}

/// Select segments matching `criteria` and split them into quintiles.
pub fn quintile_segments(
    view: &StimView<'_>,
    criteria: &SegmentCriteria,
    cfg: &QuintConfig,
    opts: QuintOptions,
) -> Result<Quintiles> {
    let indices = cfg.indices()?;
    let all = view
        .segments(&SegmentCriteria::default(), GroupBy::Flat, QueryOptions { remove_consecutive: false, empty_ok: opts.empty_ok })?
        .flatten();
    let (seg_min, seg_max) = match (all.iter().min(), all.iter().max()) {
        (Some(&lo), Some(&hi)) => (lo, hi + 1),
        _ => (0, 0),
    };

    if opts.remove_consecutive && opts.by_surp_len {
        log::debug!("remove_consecutive ignored: by_surp_len already collapses runs");
    }
    let selected = view
        .segments(
            criteria,
            GroupBy::Flat,
            QueryOptions {
                remove_consecutive: opts.remove_consecutive && !opts.by_surp_len,
                empty_ok: opts.empty_ok,
            },
        )?
        .flatten();

    if opts.by_surp_len {
        let (firsts, lens) = consec(&selected, 1);
        let width = (seg_max - seg_min) as f64 / cfg.n_quints as f64;
        let mut segs = Vec::with_capacity(indices.len());
        let mut n_consec = Vec::with_capacity(indices.len());
        for &q in &indices {
            let (s, n): (Vec<i64>, Vec<usize>) = firsts
                .iter()
                .zip(&lens)
                .filter(|&(&s, _)| bin_contains(s, q, seg_min, width))
                .map(|(&s, &n)| (s, n))
                .unzip();
            segs.push(s);
            n_consec.push(n);
        }
        return Ok(Quintiles { indices, segs, n_consec: Some(n_consec) });
    }

    let segs = bin_segments(&selected, seg_min, seg_max, cfg.n_quints, &indices);
    log::debug!("{} quintile counts: {:?}", view.kind(), segs.iter().map(Vec::len).collect::<Vec<_>>());
    Ok(Quintiles { indices, segs, n_consec: None })
}

/// Draw one segment per consecutive run, keeping away from run edges.
///
/// Runs are detected with the smallest spacing between the (flattened)
/// segments. Within each run, candidates lie in `[first + seg_pre,
/// last - seg_post)`; runs with no candidate are skipped. A quintile left
/// with no sample is an [`Error::Empty`] unless `placeholder_ok`, in which
/// case it stays empty. This includes input with no run at all.
pub fn sample_quintile_segments<R: Rng + ?Sized>(
    quints: &Quintiles,
    seg_pre: usize,
    seg_post: usize,
    placeholder_ok: bool,
    rng: &mut R,
) -> Result<Quintiles> {
    let flat: Vec<i64> = quints.segs.iter().flatten().copied().collect();
    let step = flat.windows(2).map(|w| w[1] - w[0]).filter(|&d| d > 0).min();
    let Some(step) = step else {
        if placeholder_ok {
            log::debug!("no consecutive segments to sample from, keeping {} empty quintile(s)", quints.segs.len());
            let segs = vec![Vec::new(); quints.segs.len()];
            return Ok(Quintiles { indices: quints.indices.clone(), segs, n_consec: None });
        }
        return Err(Error::empty("no consecutive segments to sample from"));
    };

    let (firsts, lens) = consec(&flat, step);
    let mut samples = Vec::with_capacity(firsts.len());
    let mut i = 0;
    for n in lens {
        let run = &flat[i..i + n];
        i += n;
        let lo = run[0] + seg_pre as i64;
        let hi = run[n - 1] - seg_post as i64;
        let candidates: Vec<i64> = run.iter().copied().filter(|&s| s >= lo && s < hi).collect();
        if let Some(&s) = candidates.choose(rng) {
            samples.push(s);
        }
    }
    log::debug!("sampled {} of {} run(s)", samples.len(), firsts.len());

    let mut segs = Vec::with_capacity(quints.segs.len());
    for (q, qsegs) in quints.indices.iter().zip(&quints.segs) {
        let s: Vec<i64> = samples.iter().copied().filter(|s| qsegs.contains(s)).collect();
        if s.is_empty() && !placeholder_ok {
            return Err(Error::empty(format!("no consecutive run survives the margins in quintile {q}")));
        }
        segs.push(s);
    }
    Ok(Quintiles { indices: quints.indices.clone(), segs, n_consec: None })
}
