// 🔗 Join accounting - every inner join reports what it dropped
//
// Dropping unmatched rows is accepted behavior, but it has to be visible:
// earlier drafts of this pipeline mixed inner/left/outer joins and nobody
// could tell why tract coverage changed between runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

// ============================================================================
// JOIN STAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum JoinStage {
    /// WAC blocks ⋈ filtered crosswalk, once per year
    BlockToTract { year: u16 },

    /// Baseline LQ ⋈ current LQ on tract id
    YearAlignment { baseline: u16, current: u16 },

    /// Tract records ⋈ tract geometry
    Geometry,
}

impl fmt::Display for JoinStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStage::BlockToTract { year } => write!(f, "block→tract ({})", year),
            JoinStage::YearAlignment { baseline, current } => {
                write!(f, "year alignment ({} ↔ {})", baseline, current)
            }
            JoinStage::Geometry => write!(f, "tract geometry"),
        }
    }
}

// ============================================================================
// JOIN STATS
// ============================================================================

/// Row accounting for one inner join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStats {
    pub stage: JoinStage,
    pub left_rows: usize,
    pub right_rows: usize,
    /// Left rows that found a partner
    pub matched_rows: usize,
    /// Left rows with no partner (lost from every downstream total)
    pub dropped_left: usize,
    /// Right rows nobody asked for
    pub dropped_right: usize,
}

impl JoinStats {
    pub fn new(stage: JoinStage, left_rows: usize, right_rows: usize, matched_rows: usize, right_matched: usize) -> Self {
        JoinStats {
            stage,
            left_rows,
            right_rows,
            matched_rows,
            dropped_left: left_rows.saturating_sub(matched_rows),
            dropped_right: right_rows.saturating_sub(right_matched),
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped_left + self.dropped_right
    }

    pub fn is_lossless(&self) -> bool {
        self.dropped() == 0
    }

    /// Log the join: info when lossless, warn otherwise
    pub fn log(&self) {
        if self.is_lossless() {
            info!(stage = %self.stage, matched = self.matched_rows, "inner join kept every row");
        } else {
            warn!(
                stage = %self.stage,
                matched = self.matched_rows,
                dropped_left = self.dropped_left,
                dropped_right = self.dropped_right,
                "inner join dropped unmatched rows"
            );
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} matched, {} left dropped, {} right dropped",
            self.stage, self.matched_rows, self.dropped_left, self.dropped_right
        )
    }
}

// ============================================================================
// JOIN LEDGER
// ============================================================================

/// All joins of one pipeline run, in execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinLedger {
    entries: Vec<JoinStats>,
}

impl JoinLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stats: JoinStats) {
        stats.log();
        self.entries.push(stats);
    }

    pub fn entries(&self) -> &[JoinStats] {
        &self.entries
    }

    pub fn get(&self, stage: JoinStage) -> Option<&JoinStats> {
        self.entries.iter().find(|s| s.stage == stage)
    }

    /// Left-side rows dropped at a stage (0 when the stage never ran)
    pub fn dropped_at(&self, stage: JoinStage) -> usize {
        self.get(stage).map(|s| s.dropped_left).unwrap_or(0)
    }

    pub fn total_dropped_left(&self) -> usize {
        self.entries.iter().map(|s| s.dropped_left).sum()
    }
}
