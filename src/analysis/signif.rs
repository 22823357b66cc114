//! ROIs whose surprise response differs significantly from their regular
//! response in the first and last quintile, grouped by that pattern.
use ndarray::{concatenate, Array2, Axis, Ix1};
use rand::Rng;
use serde::Serialize;

use super::SurpriseQuintileArrays;
use crate::config::{AnalysisConfig, GroupSet, PermConfig, PlotVals, RoiGroupConfig};
use crate::error::{Error, Result};
use crate::stats::{center_along, group_stats, permutation_test, PermResult, RoiGroups, Stats, Tails};

/// One session's significant-ROI groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSignif {
    pub session_id: u64,
    pub mouse_n: u32,
    pub line: String,
    pub n_rois: usize,
    /// Permutation settings after multiple-comparison correction.
    pub corrected: PermConfig,
    /// `[first, last]` quintile test results.
    pub tests: [PermResult; 2],
    pub groups: RoiGroups,
    /// `(name, ROIs)` of the reported groups.
    pub selected: Vec<(&'static str, Vec<usize>)>,
    /// `[quintile][selected group]`
    pub stats: Vec<Vec<Stats<f64>>>,
}

impl SessionSignif {
    /// Number of ROIs per reported group.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        self.selected.iter().map(|(n, r)| (*n, r.len())).collect()
    }
}

/// Significant-ROI results across sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignifRoiResults {
    pub op: crate::stats::Op,
    pub plot_vals: PlotVals,
    pub group_set: GroupSet,
    pub tails: Tails,
    pub p_val: f64,
    pub sessions: Vec<SessionSignif>,
}

impl SignifRoiResults {
    pub fn new(groups: &RoiGroupConfig, perm: &PermConfig) -> Self {
        Self {
            op: groups.op,
            plot_vals: groups.plot_vals,
            group_set: groups.group_set,
            tails: perm.tails,
            p_val: perm.p_val,
            sessions: Vec::new(),
        }
    }
}

fn unit_centers(arr: &Array2<f64>, analysis: &AnalysisConfig) -> Result<ndarray::Array1<f64>> {
    center_along(arr.view().into_dyn(), Axis(1), analysis.stat, analysis.nan_policy)?
        .into_dimensionality::<Ix1>()
        .map_err(|e| Error::config(e.to_string()))
}

/// Test each ROI for a surprise effect in the first and last quintile,
/// partition ROIs by the pair of outcomes and summarise each group.
///
/// The significance level is corrected for `2 * n_rois` comparisons.
pub fn signif_rois_by_group<R: Rng + ?Sized>(
    data: &SurpriseQuintileArrays,
    perm: &PermConfig,
    grouping: &RoiGroupConfig,
    analysis: &AnalysisConfig,
    scale: bool,
    rng: &mut R,
) -> Result<SessionSignif> {
    if data.reg.len() != 2 || data.surp.len() != 2 {
        return Err(Error::config(format!(
            "significant-ROI analysis compares exactly 2 quintiles, got {} regular / {} surprise",
            data.reg.len(),
            data.surp.len()
        )));
    }
    let n_rois = data.n_units();
    let corrected = perm.corrected(n_rois * 2)?;
    log::info!(
        "session {}: {} ROI(s), corrected p = {:.2e} with {} permutations",
        data.session_id,
        n_rois,
        corrected.p_val,
        corrected.n_perms
    );

    let mut tests = Vec::with_capacity(2);
    for (reg, surp) in data.reg.iter().zip(&data.surp) {
        let pooled = concatenate(Axis(1), &[reg.view(), surp.view()]).map_err(|e| Error::config(e.to_string()))?;
        tests.push(permutation_test(
            pooled.view(),
            reg.ncols(),
            &corrected,
            analysis.stat,
            analysis.nan_policy,
            grouping.op,
            rng,
        )?);
    }
    let tests: [PermResult; 2] = tests.try_into().map_err(|_| Error::integrity("expected two test results"))?;
    let groups = RoiGroups::from_labels(&tests[0].labels, &tests[1].labels, perm.tails)?;
    let selected = groups.select(grouping.group_set, grouping.add_reg);
    for (name, rois) in &selected {
        log::debug!("  {name}: {} ROI(s)", rois.len());
    }

    // [quintile, ROI] values to summarise.
    let mut vals = Array2::<f64>::zeros((2, n_rois));
    for q in 0..2 {
        let reg = unit_centers(&data.reg[q], analysis)?;
        let surp = unit_centers(&data.surp[q], analysis)?;
        let row = match grouping.plot_vals {
            PlotVals::Regular => reg,
            PlotVals::Surprise => surp,
            PlotVals::Both => ndarray::Zip::from(&reg).and(&surp).map_collect(|&r, &s| grouping.op.apply(r, s)),
        };
        vals.row_mut(q).assign(&row);
    }
    let rois: Vec<Vec<usize>> = selected.iter().map(|(_, r)| r.clone()).collect();
    let stats = group_stats(vals.view(), &rois, analysis.stat, analysis.error, scale)?;

    Ok(SessionSignif {
        session_id: data.session_id,
        mouse_n: data.mouse_n,
        line: data.line.clone(),
        n_rois,
        corrected,
        tests,
        groups,
        selected,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::TailLabel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn strong_late_effect_lands_in_reg_surpup() {
        let base = |off: usize| Array2::from_shape_fn((4, 30), |(u, j)| 0.1 * ((u + j + off) % 5) as f64);
        let mut late = base(3);
        late.row_mut(0).mapv_inplace(|v| v + 10.0);
        let data = SurpriseQuintileArrays {
            session_id: 7,
            mouse_n: 2,
            line: "L5-Rbp4".into(),
            quintiles: vec![0, 4],
            reg: vec![base(0), base(1)],
            surp: vec![base(2), late],
        };
        let perm = PermConfig { n_perms: 2000, p_val: 0.05, tails: Tails::Both };
        let mut rng = StdRng::seed_from_u64(11);
        let res = signif_rois_by_group(
            &data,
            &perm,
            &RoiGroupConfig::default(),
            &AnalysisConfig::default(),
            false,
            &mut rng,
        )
        .unwrap();
        approx::assert_abs_diff_eq!(res.corrected.p_val, 0.05 / 8.0, epsilon = 1e-12);
        assert_eq!(res.tests[1].labels[0], TailLabel::Up);
        assert_eq!(res.groups.group_of(0), Some("reg_surpup"));
        assert_eq!(res.counts().iter().map(|(_, n)| n).sum::<usize>(), 4);
        assert_eq!(res.stats.len(), 2);
    }
}
