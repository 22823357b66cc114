//! Segment selection criteria.
//!
//! Each column takes a [`Criterion`]: every value currently in the table, a
//! set of values, or a single value. [`SegmentCriteria::resolve`] turns the
//! criteria into concrete allowed-value sets for one stimulus kind, using the
//! live table for [`Criterion::All`].
//!
//! The two generic parameter columns can also be constrained through their
//! per-kind names ([`SemanticParam`]). Names belonging to another kind are
//! ignored. A semantic constraint replaces the generic one for its column; if
//! both are given and resolve differently the criteria are rejected.
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{ParamValue, Segment, SegmentTable, GRAYSCREEN_SEG};
use crate::error::{Error, Result};
use crate::stimulus::StimulusKind;

/// Constraint on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion<T: Ord> {
    /// Every value present in the table for the stimulus kind.
    All,
    OneOf(BTreeSet<T>),
    Exact(T),
}

impl<T: Ord> Default for Criterion<T> {
    fn default() -> Self {
        Criterion::All
    }
}

impl<T: Ord + Clone> Criterion<T> {
    pub fn exact(v: impl Into<T>) -> Self {
        Criterion::Exact(v.into())
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<T>,
    {
        Criterion::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Criterion::All)
    }

    pub fn resolve(&self, live: &BTreeSet<T>) -> BTreeSet<T> {
        match self {
            Criterion::All => live.clone(),
            Criterion::OneOf(s) => s.clone(),
            Criterion::Exact(v) => BTreeSet::from([v.clone()]),
        }
    }
}

/// Generic parameter column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamColumn {
    Par1,
    Par2,
}

/// Kind-specific name of a generic parameter column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticParam {
    /// Gabor orientation (`par1`).
    Orientation,
    /// Gabor orientation dispersion (`par2`).
    Kappa,
    /// Brick size (`par1`).
    Size,
    /// Brick motion direction (`par2`).
    Direction,
}

impl SemanticParam {
    pub fn kind(self) -> StimulusKind {
        match self {
            SemanticParam::Orientation | SemanticParam::Kappa => StimulusKind::Gabors,
            SemanticParam::Size | SemanticParam::Direction => StimulusKind::Bricks,
        }
    }

    pub fn column(self) -> ParamColumn {
        match self {
            SemanticParam::Orientation | SemanticParam::Size => ParamColumn::Par1,
            SemanticParam::Kappa | SemanticParam::Direction => ParamColumn::Par2,
        }
    }
}

impl FromStr for SemanticParam {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "orientation" | "gab_ori" => Ok(SemanticParam::Orientation),
            "kappa" | "gabk" => Ok(SemanticParam::Kappa),
            "size" | "bri_size" => Ok(SemanticParam::Size),
            "direction" | "bri_dir" => Ok(SemanticParam::Direction),
            other => Err(Error::config(format!(
                "unknown stimulus parameter '{other}' (expected orientation, kappa, size or direction)"
            ))),
        }
    }
}

/// Selection over segment table columns. The default selects everything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentCriteria {
    pub par1: Criterion<ParamValue>,
    pub par2: Criterion<ParamValue>,
    pub semantic: BTreeMap<SemanticParam, Criterion<ParamValue>>,
    pub surprise: Criterion<bool>,
    pub seg_id: Criterion<i64>,
    pub gabfr: Criterion<i64>,
    /// Half-open bounds on the start frame.
    pub start_twop: Option<Range<usize>>,
    /// Half-open bounds on the end frame.
    pub end_twop: Option<Range<usize>>,
    /// Half-open bounds on the frame count.
    pub n_twop: Option<Range<usize>>,
}

impl SegmentCriteria {
    pub fn surprise(mut self, surprise: bool) -> Self {
        self.surprise = Criterion::Exact(surprise);
        self
    }

    pub fn with(mut self, param: SemanticParam, crit: Criterion<ParamValue>) -> Self {
        self.semantic.insert(param, crit);
        self
    }

    pub fn gabfr(mut self, crit: Criterion<i64>) -> Self {
        self.gabfr = crit;
        self
    }

    pub fn seg_ids(mut self, crit: Criterion<i64>) -> Self {
        self.seg_id = crit;
        self
    }

    pub fn start_twop(mut self, range: Range<usize>) -> Self {
        self.start_twop = Some(range);
        self
    }

    /// Concrete allowed-value sets for `kind`.
    pub fn resolve(&self, kind: StimulusKind, table: &SegmentTable) -> Result<ResolvedCriteria> {
        let mut live_par1 = BTreeSet::new();
        let mut live_par2 = BTreeSet::new();
        let mut live_surp = BTreeSet::new();
        let mut live_seg = BTreeSet::new();
        let mut live_gabfr = BTreeSet::new();
        for r in table.rows_for(kind) {
            live_par1.insert(r.par1.clone());
            live_par2.insert(r.par2.clone());
            live_surp.insert(r.surprise);
            live_seg.insert(r.seg_id);
            live_gabfr.insert(r.gabfr);
        }

        let mut sem1: Option<BTreeSet<ParamValue>> = None;
        let mut sem2: Option<BTreeSet<ParamValue>> = None;
        for (&param, crit) in &self.semantic {
            if param.kind() != kind {
                log::debug!("ignoring {param:?} criterion for {kind}");
                continue;
            }
            let (slot, live) = match param.column() {
                ParamColumn::Par1 => (&mut sem1, &live_par1),
                ParamColumn::Par2 => (&mut sem2, &live_par2),
            };
            slot.get_or_insert_with(BTreeSet::new).extend(crit.resolve(live));
        }
        let par1 = merge_semantic("par1", &self.par1, sem1, &live_par1)?;
        let par2 = merge_semantic("par2", &self.par2, sem2, &live_par2)?;

        let gabfr = match kind {
            StimulusKind::Bricks => live_gabfr,
            StimulusKind::Gabors => self.gabfr.resolve(&live_gabfr),
        };
        let mut seg_id = self.seg_id.resolve(&live_seg);
        seg_id.remove(&GRAYSCREEN_SEG);

        Ok(ResolvedCriteria {
            par1,
            par2,
            surprise: self.surprise.resolve(&live_surp),
            seg_id,
            gabfr,
            start_twop: self.start_twop.clone(),
            end_twop: self.end_twop.clone(),
            n_twop: self.n_twop.clone(),
        })
    }
}

fn merge_semantic(
    column: &str,
    generic: &Criterion<ParamValue>,
    semantic: Option<BTreeSet<ParamValue>>,
    live: &BTreeSet<ParamValue>,
) -> Result<BTreeSet<ParamValue>> {
    let gen = generic.resolve(live);
    match semantic {
        None => Ok(gen),
        Some(sem) if generic.is_all() || sem == gen => Ok(sem),
        Some(sem) => Err(Error::config(format!(
            "{column} criterion {:?} conflicts with named parameter criterion {:?}",
            gen, sem
        ))),
    }
}

/// Criteria resolved to concrete sets for one stimulus kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCriteria {
    pub par1: BTreeSet<ParamValue>,
    pub par2: BTreeSet<ParamValue>,
    pub surprise: BTreeSet<bool>,
    pub seg_id: BTreeSet<i64>,
    pub gabfr: BTreeSet<i64>,
    pub start_twop: Option<Range<usize>>,
    pub end_twop: Option<Range<usize>>,
    pub n_twop: Option<Range<usize>>,
}

impl ResolvedCriteria {
    pub fn matches(&self, r: &Segment) -> bool {
        let within = |bounds: &Option<Range<usize>>, v: usize| bounds.as_ref().map_or(true, |b| b.contains(&v));
        r.seg_id != GRAYSCREEN_SEG
            && self.par1.contains(&r.par1)
            && self.par2.contains(&r.par2)
            && self.surprise.contains(&r.surprise)
            && self.seg_id.contains(&r.seg_id)
            && self.gabfr.contains(&r.gabfr)
            && within(&self.start_twop, r.start_twop)
            && within(&self.end_twop, r.end_twop)
            && within(&self.n_twop, r.n_twop)
    }
}

/// How query results are nested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// One flat list.
    Flat,
    /// One list per block.
    #[default]
    Block,
    /// Display sequence → block → items.
    DisplaySequence,
}

/// Query results nested according to a [`GroupBy`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Grouped<T> {
    Flat(Vec<T>),
    Block(Vec<Vec<T>>),
    DisplaySequence(Vec<Vec<Vec<T>>>),
}

impl<T> Grouped<T> {
    /// Nest `disp → block → items` according to `by`. Empty blocks and
    /// empty display sequences must already be removed.
    pub fn from_nested(nested: Vec<Vec<Vec<T>>>, by: GroupBy) -> Self {
        match by {
            GroupBy::DisplaySequence => Grouped::DisplaySequence(nested),
            GroupBy::Block => Grouped::Block(nested.into_iter().flatten().collect()),
            GroupBy::Flat => Grouped::Flat(nested.into_iter().flatten().flatten().collect()),
        }
    }

    pub fn flatten(self) -> Vec<T> {
        match self {
            Grouped::Flat(v) => v,
            Grouped::Block(v) => v.into_iter().flatten().collect(),
            Grouped::DisplaySequence(v) => v.into_iter().flatten().flatten().collect(),
        }
    }

    /// Blocks as a list, whatever the nesting.
    pub fn into_blocks(self) -> Vec<Vec<T>> {
        match self {
            Grouped::Flat(v) => vec![v],
            Grouped::Block(v) => v,
            Grouped::DisplaySequence(v) => v.into_iter().flatten().collect(),
        }
    }

    /// Total number of items.
    pub fn count(&self) -> usize {
        match self {
            Grouped::Flat(v) => v.len(),
            Grouped::Block(v) => v.iter().map(Vec::len).sum(),
            Grouped::DisplaySequence(v) => v.iter().flatten().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Grouped<U> {
        match self {
            Grouped::Flat(v) => Grouped::Flat(v.into_iter().map(f).collect()),
            Grouped::Block(v) => {
                Grouped::Block(v.into_iter().map(|b| b.into_iter().map(&mut f).collect()).collect())
            }
            Grouped::DisplaySequence(v) => Grouped::DisplaySequence(
                v.into_iter()
                    .map(|d| d.into_iter().map(|b| b.into_iter().map(&mut f).collect()).collect())
                    .collect(),
            ),
        }
    }
}

/// Keep only the first id of each run of ids increasing by exactly one.
pub fn remove_consecutive(ids: &[i64]) -> Vec<i64> {
    ids.iter()
        .enumerate()
        .filter(|&(k, &v)| k == 0 || v != ids[k - 1] + 1)
        .map(|(_, &v)| v)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: StimulusKind, seg_id: i64, par1: i64, par2: &str, surprise: bool) -> Segment {
        let start = seg_id.max(0) as usize * 10;
        Segment {
            kind: Some(kind),
            par1: par1.into(),
            par2: par2.into(),
            surprise,
            seg_id,
            gabfr: -1,
            start_twop: start,
            end_twop: start + 10,
            n_twop: 10,
        }
    }

    fn table() -> SegmentTable {
        SegmentTable::new(vec![
            row(StimulusKind::Bricks, 0, 128, "right", false),
            row(StimulusKind::Bricks, 1, 128, "right", true),
            row(StimulusKind::Bricks, 2, 256, "left", false),
            row(StimulusKind::Bricks, 3, 256, "left", true),
        ])
        .unwrap()
    }

    #[test]
    fn all_resolves_from_live_table() {
        let r = SegmentCriteria::default().resolve(StimulusKind::Bricks, &table()).unwrap();
        assert_eq!(r.par1, BTreeSet::from([128.into(), 256.into()]));
        assert_eq!(table().select(StimulusKind::Bricks, &r).len(), 4);
    }

    #[test]
    fn semantic_override_replaces_generic() {
        let crit = SegmentCriteria::default()
            .with(SemanticParam::Direction, Criterion::exact("left"))
            .surprise(true);
        let r = crit.resolve(StimulusKind::Bricks, &table()).unwrap();
        let ids: Vec<i64> = table().select(StimulusKind::Bricks, &r).iter().map(|s| s.seg_id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn conflicting_generic_and_semantic_is_an_error() {
        let mut crit = SegmentCriteria::default().with(SemanticParam::Size, Criterion::exact(128));
        crit.par1 = Criterion::exact(256);
        assert!(matches!(crit.resolve(StimulusKind::Bricks, &table()), Err(Error::Config(_))));

        // agreeing values are fine
        crit.par1 = Criterion::exact(128);
        assert!(crit.resolve(StimulusKind::Bricks, &table()).is_ok());
    }

    #[test]
    fn other_kind_semantic_is_ignored() {
        let crit = SegmentCriteria::default().with(SemanticParam::Kappa, Criterion::exact(4));
        let r = crit.resolve(StimulusKind::Bricks, &table()).unwrap();
        assert_eq!(table().select(StimulusKind::Bricks, &r).len(), 4);
    }

    #[test]
    fn remove_consecutive_keeps_run_onsets() {
        assert_eq!(remove_consecutive(&[1, 2, 3, 7, 8, 10]), vec![1, 7, 10]);
        assert!(remove_consecutive(&[]).is_empty());
    }

    #[test]
    fn grouped_nesting() {
        let nested = vec![vec![vec![1, 2], vec![3]], vec![vec![4]]];
        assert_eq!(Grouped::from_nested(nested.clone(), GroupBy::Flat), Grouped::Flat(vec![1, 2, 3, 4]));
        let g = Grouped::from_nested(nested, GroupBy::Block);
        assert_eq!(g.count(), 4);
        assert_eq!(g.into_blocks(), vec![vec![1, 2], vec![3], vec![4]]);
    }
}
