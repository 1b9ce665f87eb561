//! Adaptive computation of the next extraction watermark.

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use model::core::window::WatermarkWindow;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tracing::debug;

/// Tunables of the watermark policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Fixed advance used when a table grows fast or has gone stale.
    pub coarse_step: Duration,
    /// Elapsed time after which an unchanged table is considered stale.
    pub stale_after: Duration,
    /// Row delta above `growth_factor * target_batch_size` counts as large growth.
    pub growth_factor: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            coarse_step: Duration::from_secs(336 * 3600),
            stale_after: Duration::from_secs(336 * 3600),
            growth_factor: 8,
        }
    }
}

/// Per-table inputs of one policy evaluation.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput {
    pub current: DateTime<Utc>,
    pub last_row_count: i64,
    pub observed_row_count: i64,
    pub replication_buffer: Duration,
    pub target_batch_size: u64,
}

impl PolicyInput {
    pub fn row_delta(&self) -> i64 {
        self.observed_row_count.saturating_sub(self.last_row_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyCase {
    LargeGrowth,
    StaleStalled,
    NearRealTime,
    Default,
}

impl fmt::Display for PolicyCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyCase::LargeGrowth => "large_growth",
            PolicyCase::StaleStalled => "stale_stalled",
            PolicyCase::NearRealTime => "near_real_time",
            PolicyCase::Default => "default",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub case: PolicyCase,
    pub current: DateTime<Utc>,
    pub candidate: DateTime<Utc>,
    /// `now - replication_buffer` at evaluation time.
    pub ceiling: DateTime<Utc>,
}

impl PolicyDecision {
    /// The extraction window, or `None` when the watermark would not move.
    pub fn window(&self) -> Option<WatermarkWindow> {
        WatermarkWindow::new(self.current, self.candidate).filter(|w| !w.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatermarkPolicy {
    config: PolicyConfig,
}

impl WatermarkPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Computes the candidate watermark for one table.
    ///
    /// The candidate is never before `input.current` and never after
    /// `now - replication_buffer` unless the current watermark already is,
    /// in which case the candidate equals the current watermark and the
    /// decision yields no window.
    pub fn evaluate(&self, input: &PolicyInput, now: DateTime<Utc>) -> PolicyDecision {
        let buffer = to_delta(input.replication_buffer);
        let coarse_step = to_delta(self.config.coarse_step);
        let stale_after = to_delta(self.config.stale_after);

        let ceiling = now
            .checked_sub_signed(buffer)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let elapsed = now.signed_duration_since(input.current);
        let delta = input.row_delta();
        let growth_threshold = self
            .config
            .growth_factor
            .saturating_mul(input.target_batch_size);

        let coarse = || {
            input
                .current
                .checked_add_signed(coarse_step)
                .map_or(ceiling, |stepped| stepped.min(ceiling))
        };

        let (case, raw) = if delta.unsigned_abs() > growth_threshold {
            (PolicyCase::LargeGrowth, coarse())
        } else if delta == 0 && elapsed > stale_after {
            (PolicyCase::StaleStalled, coarse())
        } else if elapsed < buffer.checked_mul(2).unwrap_or(TimeDelta::MAX) {
            (PolicyCase::NearRealTime, input.current + elapsed / 3)
        } else {
            (PolicyCase::Default, ceiling)
        };

        let candidate = raw.min(ceiling).trunc_subsecs(6).max(input.current);

        debug!(
            %case,
            row_delta = delta,
            elapsed_hours = elapsed.num_hours(),
            from = %input.current,
            to = %candidate,
            "Watermark policy decision"
        );

        PolicyDecision {
            case,
            current: input.current,
            candidate,
            ceiling,
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
