//! Budget accounting for the paid backend.
//!
//! A single [`CostTracker`] is created by the composition root and shared as
//! `Arc<CostTracker>`. All mutation is serialized behind one mutex, and the
//! ledger is persisted to a JSON document after every change so a restart
//! never forgets spend.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::{AssetClass, CostStateError, Symbol, UtcDateTime};

/// Alert severity derived from `total_cost / budget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Ok,
    Warning,
    Critical,
    Danger,
}

impl AlertLevel {
    /// Thresholds are inclusive: 50% warning, 80% critical, 95% danger.
    pub fn from_usage_ratio(ratio: f64) -> Self {
        if ratio >= 0.95 {
            Self::Danger
        } else if ratio >= 0.80 {
            Self::Critical
        } else if ratio >= 0.50 {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Danger => "danger",
        }
    }
}

/// Per-day usage bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub count: u64,
    pub cost: f64,
}

/// Persisted ledger state. Budget ceiling and unit cost are configuration,
/// not state, and are deliberately absent here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CostState {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_cost: f64,
    requests_by_date: BTreeMap<String, DailyUsage>,
    requests_by_asset: BTreeMap<String, BTreeMap<String, u64>>,
    tracking_start: UtcDateTime,
    last_updated: UtcDateTime,
}

impl CostState {
    fn fresh(now: UtcDateTime) -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_cost: 0.0,
            requests_by_date: BTreeMap::new(),
            requests_by_asset: BTreeMap::new(),
            tracking_start: now,
            last_updated: now,
        }
    }
}

/// Result of a budget predicate check. Denial is a normal outcome, not an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl BudgetCheck {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Snapshot returned after recording a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accounting {
    pub request_count: u64,
    pub total_cost: f64,
    pub budget_remaining: f64,
    pub usage_ratio: f64,
    pub alert_level: AlertLevel,
    pub success: bool,
    pub asset_class: AssetClass,
    pub symbol: Symbol,
    pub timestamp: UtcDateTime,
}

/// Full statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate_pct: f64,
    pub total_cost: f64,
    pub budget_limit: f64,
    pub budget_remaining: f64,
    pub usage_ratio: f64,
    pub alert_level: AlertLevel,
    pub cost_per_request: f64,
    pub max_possible_requests: u64,
    pub tracking_start: UtcDateTime,
    pub days_elapsed: i64,
    pub daily_average_requests: f64,
    pub daily_average_cost: f64,
    /// `None` when no spend has accrued yet.
    pub days_until_exhaustion: Option<f64>,
    pub requests_by_date: BTreeMap<String, DailyUsage>,
    pub requests_by_asset: BTreeMap<String, BTreeMap<String, u64>>,
    pub last_updated: UtcDateTime,
}

/// Process-wide accountant for paid-backend spend.
pub struct CostTracker {
    budget_limit: f64,
    cost_per_request: f64,
    state_path: PathBuf,
    clock: Arc<dyn Clock>,
    state: Mutex<CostState>,
}

impl CostTracker {
    /// Load or initialize the ledger. A missing state file starts fresh; a
    /// corrupt one is logged and replaced rather than aborting the process.
    pub fn open(
        state_path: impl Into<PathBuf>,
        budget_limit: f64,
        cost_per_request: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state_path = state_path.into();
        let state = load_state(&state_path).unwrap_or_else(|| CostState::fresh(clock.now()));

        Self {
            budget_limit,
            cost_per_request,
            state_path,
            clock,
            state: Mutex::new(state),
        }
    }

    pub fn budget_limit(&self) -> f64 {
        self.budget_limit
    }

    pub fn cost_per_request(&self) -> f64 {
        self.cost_per_request
    }

    /// True iff one more paid request fits the remaining budget. Read-only;
    /// admission at exactly `remaining == cost_per_request` is allowed.
    pub fn can_make_request(&self) -> BudgetCheck {
        let state = self.state.lock().expect("cost state lock not poisoned");
        let projected = state.total_cost + self.cost_per_request;
        if projected <= self.budget_limit {
            BudgetCheck::allowed()
        } else {
            BudgetCheck::denied(format!(
                "budget exhausted: spent {:.4} of {:.4}, next request costs {:.4}",
                state.total_cost, self.budget_limit, self.cost_per_request
            ))
        }
    }

    /// Record one paid request. Both successful and failed requests advance
    /// spend by the unit cost; the paid backend charges for transport.
    pub fn record_request(
        &self,
        asset_class: AssetClass,
        symbol: &Symbol,
        success: bool,
    ) -> Accounting {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("cost state lock not poisoned");

        state.total_requests += 1;
        state.total_cost += self.cost_per_request;
        if success {
            state.successful_requests += 1;
        } else {
            state.failed_requests += 1;
        }

        let day = state.requests_by_date.entry(now.date_key()).or_default();
        day.count += 1;
        day.cost += self.cost_per_request;

        *state
            .requests_by_asset
            .entry(asset_class.as_str().to_owned())
            .or_default()
            .entry(symbol.as_str().to_owned())
            .or_default() += 1;

        state.last_updated = now;
        self.persist(&state);

        let usage_ratio = usage_ratio(state.total_cost, self.budget_limit);
        Accounting {
            request_count: state.total_requests,
            total_cost: state.total_cost,
            budget_remaining: self.budget_limit - state.total_cost,
            usage_ratio,
            alert_level: AlertLevel::from_usage_ratio(usage_ratio),
            success,
            asset_class,
            symbol: symbol.clone(),
            timestamp: now,
        }
    }

    /// Consistent snapshot of all counters plus derived projections.
    pub fn statistics(&self) -> CostStatistics {
        let now = self.clock.now();
        let state = self.state.lock().expect("cost state lock not poisoned");

        let days_elapsed = now.whole_days_since(state.tracking_start) + 1;
        let daily_average_cost = state.total_cost / days_elapsed as f64;
        let daily_average_requests = state.total_requests as f64 / days_elapsed as f64;
        let budget_remaining = self.budget_limit - state.total_cost;
        let days_until_exhaustion = if daily_average_cost > 0.0 {
            Some(budget_remaining / daily_average_cost)
        } else {
            None
        };
        let success_rate_pct = if state.total_requests > 0 {
            state.successful_requests as f64 / state.total_requests as f64 * 100.0
        } else {
            0.0
        };
        let ratio = usage_ratio(state.total_cost, self.budget_limit);

        CostStatistics {
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            success_rate_pct,
            total_cost: state.total_cost,
            budget_limit: self.budget_limit,
            budget_remaining,
            usage_ratio: ratio,
            alert_level: AlertLevel::from_usage_ratio(ratio),
            cost_per_request: self.cost_per_request,
            max_possible_requests: (self.budget_limit / self.cost_per_request) as u64,
            tracking_start: state.tracking_start,
            days_elapsed,
            daily_average_requests,
            daily_average_cost,
            days_until_exhaustion,
            requests_by_date: state.requests_by_date.clone(),
            requests_by_asset: state.requests_by_asset.clone(),
            last_updated: state.last_updated,
        }
    }

    /// Zero the ledger. Refuses without explicit confirmation; returns the
    /// pre-reset statistics for the caller's logs.
    pub fn reset(&self, confirm: bool) -> Result<CostStatistics, CostStateError> {
        if !confirm {
            return Err(CostStateError::ResetNotConfirmed);
        }

        let before = self.statistics();

        let mut state = self.state.lock().expect("cost state lock not poisoned");
        *state = CostState::fresh(self.clock.now());
        self.persist(&state);

        Ok(before)
    }

    /// Persist under the state mutex. Failures are logged; the in-memory
    /// ledger is already updated and is not rolled back.
    fn persist(&self, state: &CostState) {
        if let Err(error) = write_state(&self.state_path, state) {
            tracing::warn!(
                path = %self.state_path.display(),
                %error,
                "failed to persist cost ledger"
            );
        }
    }
}

fn usage_ratio(total_cost: f64, budget_limit: f64) -> f64 {
    if budget_limit > 0.0 {
        (total_cost / budget_limit).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn load_state(path: &Path) -> Option<CostState> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to read cost ledger");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                %error,
                "cost ledger is corrupt, starting fresh"
            );
            None
        }
    }
}

/// Atomic write: serialize to a sibling temp file, then rename over the
/// target so readers never observe a torn document.
fn write_state(path: &Path, state: &CostState) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let payload = serde_json::to_vec_pretty(state)?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}
