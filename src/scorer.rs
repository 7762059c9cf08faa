//! Scorer: a pure function from (account, quota, weights, request) to a
//! score and a human-readable reason. Grounded on the teacher's
//! `select_cheapest`/`select_fastest` style — small, independently
//! testable comparators — generalized here into one weighted function
//! with short-circuit penalties instead of several single-factor ones.

use serde::{Deserialize, Serialize};

use crate::model::dimension::DimensionType;
use crate::model::{Account, QuotaInfo};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Weights {
    pub safety: f64,
    pub refill: f64,
    pub tier: f64,
    pub reliability: f64,
    pub cost: f64,
}

impl Weights {
    pub fn balanced() -> Self {
        Self {
            safety: 0.35,
            refill: 0.15,
            tier: 0.15,
            reliability: 0.2,
            cost: 0.15,
        }
    }

    /// Look up a named policy. Unknown names fall back to "balanced" —
    /// the router is expected to validate policy names at the edge.
    pub fn by_name(name: &str) -> Self {
        match name {
            "cost_optimal" => Self {
                safety: 0.2,
                refill: 0.1,
                tier: 0.1,
                reliability: 0.1,
                cost: 0.5,
            },
            "quality_first" => Self {
                safety: 0.25,
                refill: 0.1,
                tier: 0.4,
                reliability: 0.25,
                cost: 0.0,
            },
            _ => Self::balanced(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub warning_pct: f64,
    pub switch_pct: f64,
    pub critical_pct: f64,
    pub min_safe_pct: f64,
    pub hysteresis_margin_pct: f64,
    pub min_dwell: chrono::Duration,
    pub cooldown_after_switch: chrono::Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_pct: 85.0,
            switch_pct: 90.0,
            critical_pct: 95.0,
            min_safe_pct: 5.0,
            hysteresis_margin_pct: 5.0,
            min_dwell: chrono::Duration::minutes(5),
            cooldown_after_switch: chrono::Duration::minutes(3),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectRequest {
    pub provider: Option<crate::model::Provider>,
    pub required_dims: Vec<DimensionType>,
    pub estimated_cost: f64,
    pub estimated_tokens: f64,
    pub policy: String,
    pub exclude: Vec<String>,
    pub exclude_providers: Vec<crate::model::Provider>,
    pub model: Option<String>,
    pub ignore_estimated: bool,
}

#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub account_id: String,
    pub score: f64,
    pub reason: String,
}

/// Score one account against one request. Pure: no I/O, no clock, no
/// shared state — every input is a value the caller already holds.
pub fn score(
    account: &Account,
    quota: Option<&QuotaInfo>,
    weights: &Weights,
    thresholds: &Thresholds,
    req: &SelectRequest,
    global_low: bool,
) -> ScoreResult {
    let account_id = account.id.clone();
    macro_rules! reject {
        ($score:expr, $reason:expr) => {
            return ScoreResult {
                account_id,
                score: $score,
                reason: $reason.to_string(),
            }
        };
    }

    let quota = match quota {
        Some(q) => q,
        None => reject!(0.0, "no quota data"),
    };

    if req.ignore_estimated && quota.source == crate::model::DimensionSource::Estimated {
        reject!(0.0, "estimated quota ignored");
    }

    let effective = quota.effective_with_virtual();
    if quota.any_dimension_exhausted() || effective <= 0.0 {
        reject!(0.0, "quota exhausted");
    }

    if quota.is_shadow_banned {
        reject!(0.0, "account shadow-banned");
    }

    if req.exclude_providers.contains(&account.provider) {
        reject!(0.0, "provider excluded");
    }

    let used_percent = quota.used_percent();
    if used_percent >= thresholds.critical_pct {
        reject!(0.1, "critical quota level");
    }

    if !global_low && used_percent >= thresholds.switch_pct {
        reject!(0.0, "usage above switch threshold");
    }

    if req.estimated_cost > 0.0 && effective - req.estimated_cost < thresholds.min_safe_pct {
        reject!(0.2, "insufficient quota for estimated cost");
    }

    if req.estimated_tokens > 0.0 {
        if let Some(tpm) = quota.find_dimension(DimensionType::TPM) {
            if tpm.remaining < req.estimated_tokens {
                reject!(0.0, "insufficient token budget for estimated tokens");
            }
        }
    }

    for dim in &req.required_dims {
        if quota.find_dimension(*dim).is_none() {
            reject!(0.0, "required dimension missing");
        }
    }

    let safety = (effective / 100.0).clamp(0.0, 1.0);
    let refill = quota
        .critical_dimension()
        .and_then(|d| d.refill_rate)
        .map(|r| r.clamp(0.0, 1.0))
        .unwrap_or(0.5);
    let tier = (account.priority as f64 / 10.0).clamp(0.0, 1.0);
    let reliability = quota.confidence.clamp(0.0, 1.0);
    let cost = (1.0 - (account.input_cost + account.output_cost) / 0.1).max(0.0);

    let total = weights.safety * safety
        + weights.refill * refill
        + weights.tier * tier
        + weights.reliability * reliability
        + weights.cost * cost;

    let reason = format!(
        "safety={safety:.2} refill={refill:.2} tier={tier:.2} reliability={reliability:.2} cost={cost:.2}"
    );

    ScoreResult {
        account_id: account.id.clone(),
        score: total,
        reason,
    }
}
