//! Intervals with no stimulus on screen.
use std::ops::Range;

use crate::segments::SegmentTable;

/// Grayscreen intervals in the 2p clock, in presentation order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grayscreen {
    ranges: Vec<Range<usize>>,
}

impl Grayscreen {
    pub fn from_table(table: &SegmentTable) -> Self {
        let mut ranges: Vec<Range<usize>> = table.grayscreen_rows().map(|r| r.twop_range()).collect();
        ranges.sort_by_key(|r| r.start);
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// 2p frame ranges, end exclusive.
    pub fn twop_ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// First 2p frame of each interval.
    pub fn onset_twop_frames(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.start).collect()
    }

    pub fn total_twop_frames(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }

    /// Every 2p frame inside a grayscreen interval.
    pub fn all_twop_frames(&self) -> Vec<usize> {
        self.ranges.iter().cloned().flatten().collect()
    }

    /// Interval containing `twop_fr`, if any.
    pub fn containing(&self, twop_fr: usize) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(&twop_fr))
    }
}
