//! guard.rs: chase-high rail applied to every backend decision.
//!
//! When the short-horizon change exceeds the threshold, the decision must carry
//! a failing `chase-high` check and must not be a buy. Nothing else is
//! enforced here.

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::decision::{Action, CheckItem, CheckStatus, Decision};
use crate::error::ValidationFailure;

pub const CHASE_HIGH: &str = "chase-high";

fn default_threshold() -> f64 {
    10.0
}
fn default_points() -> usize {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Short-horizon change in percent above which buying is refused.
    #[serde(default = "default_threshold")]
    pub chase_high_threshold_pct: f64,
    /// NAV observations spanned by the short horizon.
    #[serde(default = "default_points")]
    pub short_horizon_points: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            chase_high_threshold_pct: default_threshold(),
            short_horizon_points: default_points(),
        }
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "guard_corrections_total",
            "Decisions corrected by the chase-high rail."
        );
    });
}

fn is_chase_high(c: &CheckItem) -> bool {
    c.condition.trim().to_ascii_lowercase().starts_with(CHASE_HIGH)
}

/// Apply the rail. Returns the (possibly new) decision and the correction,
/// if one was made. An unknown change passes through.
pub fn enforce_chase_high(
    decision: Decision,
    change_pct: Option<f64>,
    threshold_pct: f64,
) -> (Decision, Option<ValidationFailure>) {
    let Some(change) = change_pct else {
        return (decision, None);
    };
    if change <= threshold_pct {
        return (decision, None);
    }

    ensure_metrics_described();
    let mut d = decision;

    let label = format!("{CHASE_HIGH}: up {change:.2}% over the short horizon (limit {threshold_pct:.2}%)");
    match d.checklist.iter_mut().find(|c| is_chase_high(c)) {
        Some(existing) => existing.status = CheckStatus::Fail,
        None => d.checklist.push(CheckItem::new(label, CheckStatus::Fail)),
    }

    let downgraded = d.action == Action::Buy;
    if downgraded {
        d.action = Action::Hold;
        d.checklist.push(CheckItem::new(
            "buy downgraded to hold: wait for a pullback before entering",
            CheckStatus::Warn,
        ));
    }

    let failure = ValidationFailure {
        code: d.code.clone(),
        change_pct: change,
        threshold_pct,
        downgraded,
    };
    counter!("guard_corrections_total", "downgraded" => if downgraded { "yes" } else { "no" })
        .increment(1);
    tracing::warn!(target: "guard", code = %d.code, change_pct = change, downgraded, "chase-high rail corrected decision");
    (d, Some(failure))
}
