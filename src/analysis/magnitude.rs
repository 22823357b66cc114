//! Magnitude and L2 change between the first and last quintile, regular vs
//! surprise, with a permutation test on the surprise − regular difference.
use ndarray::{concatenate, s, Array1, Array3, Axis, Ix1};
use rand::Rng;
use serde::Serialize;

use super::SurpriseQuintileArrays;
use crate::config::{AnalysisConfig, PermConfig};
use crate::error::{Error, Result};
use crate::stats::{
    center, center_along, magnitude_set, permute_group_stats, tail_thresholds, NanPolicy, Op, Statistic, Stats,
    TailLabel, Tails, Thresholds,
};

/// Magnitude results of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionMagnitudes {
    pub session_id: u64,
    pub mouse_n: u32,
    pub line: String,
    /// `[scaled][regular, surprise]`
    pub mag: [Vec<Stats<f64>>; 2],
    /// `[scaled][regular, surprise]`
    pub l2: [Vec<f64>; 2],
    /// Observed `op_surp(regular, surprise)` of the unscaled magnitude centre.
    pub mag_rel: f64,
    pub l2_rel: f64,
    pub mag_rel_th: Thresholds,
    pub l2_rel_th: Thresholds,
    pub mag_sig: TailLabel,
    pub l2_sig: TailLabel,
}

/// Magnitude results across sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MagnitudeResults {
    pub op_qu: Op,
    pub op_surp: Op,
    pub stat: Statistic,
    pub tails: Tails,
    pub p_val: f64,
    pub n_perms: usize,
    pub sessions: Vec<SessionMagnitudes>,
}

fn check_two(data: &SurpriseQuintileArrays) -> Result<()> {
    if data.reg.len() != 2 || data.surp.len() != 2 {
        return Err(Error::config(format!(
            "magnitude analysis compares exactly 2 quintiles, got {} regular / {} surprise",
            data.reg.len(),
            data.surp.len()
        )));
    }
    Ok(())
}

/// Per-permutation `|op_qu|` statistic across units and L2 norm, for
/// `[quintile(2), unit, perm]` group values.
fn perm_mag_l2(vals: &Array3<f64>, op_qu: Op, stat: Statistic, nan: NanPolicy) -> (Array1<f64>, Array1<f64>) {
    let n_perms = vals.len_of(Axis(2));
    let mut mag = Array1::<f64>::zeros(n_perms);
    let mut l2 = Array1::<f64>::zeros(n_perms);
    for p in 0..n_perms {
        let q0 = vals.index_axis(Axis(2), p);
        let change: Vec<f64> = q0
            .columns()
            .into_iter()
            .map(|c| op_qu.apply(c[0], c[1]).abs())
            .collect();
        mag[p] = center(&change, stat, nan);
        l2[p] = change.iter().map(|v| v * v).sum::<f64>().sqrt();
    }
    (mag, l2)
}

/// Magnitude analysis of one session's integrated quintile data.
pub fn quintile_magnitudes<R: Rng + ?Sized>(
    data: &SurpriseQuintileArrays,
    perm: &PermConfig,
    analysis: &AnalysisConfig,
    op_qu: Op,
    op_surp: Op,
    rng: &mut R,
) -> Result<SessionMagnitudes> {
    check_two(data)?;
    let (stat, nan) = (analysis.stat, analysis.nan_policy);
    let n_units = data.n_units();

    // [surprise, quintile, unit] centres across sequences.
    let mut me = Array3::<f64>::zeros((2, 2, n_units));
    for (si, group) in [&data.reg, &data.surp].into_iter().enumerate() {
        for (q, arr) in group.iter().enumerate() {
            let c = center_along(arr.view().into_dyn(), Axis(1), stat, nan)?
                .into_dimensionality::<Ix1>()
                .map_err(|e| Error::config(e.to_string()))?;
            me.slice_mut(s![si, q, ..]).assign(&c);
        }
    }
    let set = magnitude_set(me.view().into_dyn(), op_qu, stat, analysis.error, nan)?;
    let mag_rel = op_surp.apply(set.mag[0][0].center, set.mag[0][1].center);
    let l2_rel = op_surp.apply(set.l2[0][0], set.l2[0][1]);

    // Null: shuffle regular/surprise labels within each quintile.
    let mut by_group: [Vec<Array3<f64>>; 2] = Default::default();
    for q in 0..2 {
        let pooled = concatenate(Axis(1), &[data.reg[q].view(), data.surp[q].view()])
            .map_err(|e| Error::config(e.to_string()))?;
        let g = permute_group_stats(pooled.view(), data.reg[q].ncols(), perm.n_perms, stat, nan, rng)?;
        for (s, slot) in by_group.iter_mut().enumerate() {
            slot.push(g.index_axis(Axis(0), s).insert_axis(Axis(0)).to_owned());
        }
    }
    let mut rand_mag = Vec::with_capacity(2);
    let mut rand_l2 = Vec::with_capacity(2);
    for quint_vals in &by_group {
        let views: Vec<_> = quint_vals.iter().map(|a| a.view()).collect();
        let stacked = concatenate(Axis(0), &views).map_err(|e| Error::config(e.to_string()))?;
        let (m, l) = perm_mag_l2(&stacked, op_qu, stat, nan);
        rand_mag.push(m);
        rand_l2.push(l);
    }
    let rand_mag_rel: Vec<f64> = rand_mag[0].iter().zip(&rand_mag[1]).map(|(&r, &s)| op_surp.apply(r, s)).collect();
    let rand_l2_rel: Vec<f64> = rand_l2[0].iter().zip(&rand_l2[1]).map(|(&r, &s)| op_surp.apply(r, s)).collect();

    let finite = |v: &[f64]| v.iter().copied().filter(|x| !x.is_nan()).collect::<Vec<_>>();
    let mag_rel_th = tail_thresholds(&finite(&rand_mag_rel), perm.tails, perm.p_val);
    let l2_rel_th = tail_thresholds(&finite(&rand_l2_rel), perm.tails, perm.p_val);
    let mag_sig = mag_rel_th.classify(mag_rel);
    let l2_sig = l2_rel_th.classify(l2_rel);
    log::info!(
        "session {}: {stat} mag reg {:.4} / surp {:.4}{}, L2 reg {:.4} / surp {:.4}{}",
        data.session_id,
        set.mag[0][0].center,
        set.mag[0][1].center,
        if mag_sig.is_significant() { "*" } else { "" },
        set.l2[0][0],
        set.l2[0][1],
        if l2_sig.is_significant() { "*" } else { "" },
    );

    Ok(SessionMagnitudes {
        session_id: data.session_id,
        mouse_n: data.mouse_n,
        line: data.line.clone(),
        mag: set.mag,
        l2: set.l2,
        mag_rel,
        l2_rel,
        mag_rel_th,
        l2_rel_th,
        mag_sig,
        l2_sig,
    })
}

impl MagnitudeResults {
    pub fn new(op_qu: Op, op_surp: Op, stat: Statistic, perm: &PermConfig) -> Self {
        Self {
            op_qu,
            op_surp,
            stat,
            tails: perm.tails,
            p_val: perm.p_val,
            n_perms: perm.n_perms,
            sessions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn arrays(surp_shift: f64) -> SurpriseQuintileArrays {
        let noise = |off: usize| Array2::from_shape_fn((8, 20), |(u, j)| 0.1 * ((u + j + off) % 3) as f64);
        SurpriseQuintileArrays {
            session_id: 1,
            mouse_n: 1,
            line: "L23-Cux2".into(),
            quintiles: vec![0, 4],
            reg: vec![noise(0), noise(1)],
            surp: vec![noise(2), noise(0) + surp_shift],
        }
    }

    #[test]
    fn surprise_growth_is_significant() {
        let perm = PermConfig { n_perms: 500, p_val: 0.05, tails: Tails::Up };
        let analysis = AnalysisConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let res = quintile_magnitudes(&arrays(5.0), &perm, &analysis, Op::Diff, Op::Diff, &mut rng).unwrap();
        assert!(res.mag[0][1].center > res.mag[0][0].center);
        assert!(res.l2_rel > 0.0);
        assert_eq!(res.mag_sig, TailLabel::Up);
        assert_eq!(res.l2_sig, TailLabel::Up);
    }

    #[test]
    fn needs_two_quintiles() {
        let mut data = arrays(0.0);
        data.reg.pop();
        data.surp.pop();
        let mut rng = StdRng::seed_from_u64(0);
        let err = quintile_magnitudes(
            &data,
            &PermConfig::default(),
            &AnalysisConfig::default(),
            Op::Diff,
            Op::Diff,
            &mut rng,
        );
        assert!(err.is_err());
    }
}
