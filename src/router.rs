//! Router: filter -> score -> anti-flap -> fallback-chain -> result.
//! Generalizes the teacher's `SmartRouter` (which dispatches on a
//! `ProviderPreference` enum to one of several single-factor selectors)
//! into one weighted-scoring pipeline with hysteresis and a fallback
//! chain keyed by model/account/provider-subtag/provider.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::circuit::CircuitRegistry;
use crate::clock::SharedClock;
use crate::error::{QuotaGuardError, RouterError};
use crate::model::Provider;
use crate::scorer::{self, ScoreResult, SelectRequest, Thresholds, Weights};
use crate::store::Store;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SelectResponse {
    pub account_id: String,
    pub provider: Provider,
    pub score: f64,
    pub reason: String,
    pub alternative_ids: Vec<String>,
}

/// Ordered account-id lists to try when the current account goes
/// critical, keyed by model / account id / provider sub-tag / provider.
#[derive(Debug, Clone, Default)]
pub struct FallbackChains {
    chains: HashMap<String, Vec<String>>,
}

impl FallbackChains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, chain: Vec<String>) {
        self.chains.insert(key.into(), chain);
    }

    fn lookup(&self, key: &str) -> Option<&[String]> {
        self.chains.get(key).map(Vec::as_slice)
    }

    fn normalize_model(model: &str) -> (String, String) {
        let lower = model.to_lowercase();
        let stripped = lower.strip_prefix("models/").unwrap_or(&lower).to_string();
        let prefixed = format!("models/{stripped}");
        (stripped, prefixed)
    }
}

#[derive(Debug, Default, Clone)]
struct RouterState {
    current_account: Option<String>,
    account_dwell_time: Option<DateTime<Utc>>,
    last_switch: HashMap<String, DateTime<Utc>>,
    switched_to: std::collections::HashSet<String>,
}

pub struct RouterStats {
    /// Monotonic count of distinct accounts switched to since start.
    /// Never decayed — see the open-question resolution in the design
    /// notes: this is a lifetime counter, not a windowed rate.
    pub last_switches: usize,
}

pub struct Router {
    store: Arc<dyn Store>,
    clock: SharedClock,
    thresholds: Thresholds,
    circuits: CircuitRegistry,
    fallback_chains: RwLock<FallbackChains>,
    state: RwLock<RouterState>,
}

impl Router {
    pub fn new(store: Arc<dyn Store>, clock: SharedClock, thresholds: Thresholds, circuits: CircuitRegistry) -> Self {
        Self {
            store,
            clock,
            thresholds,
            circuits,
            fallback_chains: RwLock::new(FallbackChains::new()),
            state: RwLock::new(RouterState::default()),
        }
    }

    pub async fn set_fallback_chains(&self, chains: FallbackChains) {
        *self.fallback_chains.write().await = chains;
    }

    pub async fn select(&self, req: SelectRequest) -> Result<SelectResponse, QuotaGuardError> {
        let accounts = self.store.list_enabled_accounts().await?;

        let candidates: Vec<_> = accounts
            .into_iter()
            .filter(|a| req.provider.map_or(true, |p| a.provider == p))
            .filter(|a| !req.exclude.contains(&a.id))
            .filter(|a| !req.exclude_providers.contains(&a.provider))
            .collect();

        if candidates.is_empty() {
            return Err(RouterError::NoSuitableAccounts {
                reason: "no enabled accounts available".to_string(),
            }
            .into());
        }

        // A provider whose circuit is open is skipped outright rather than
        // merely penalized: an open circuit means calls are being rejected
        // before they reach the provider at all, so no score can redeem it.
        let mut candidates_after_circuits = Vec::with_capacity(candidates.len());
        for account in candidates {
            if !self.circuits.is_open(account.provider.as_str()).await {
                candidates_after_circuits.push(account);
            }
        }
        let candidates = candidates_after_circuits;

        if candidates.is_empty() {
            return Err(RouterError::NoSuitableAccounts {
                reason: "all candidate providers have an open circuit".to_string(),
            }
            .into());
        }

        let mut quotas = HashMap::new();
        for account in &candidates {
            if let Some(q) = self.store.get_quota(&account.id).await? {
                quotas.insert(account.id.clone(), q);
            }
        }

        let weights = Weights::by_name(&req.policy);

        let global_low = candidates.iter().all(|a| {
            quotas
                .get(&a.id)
                .map(|q| q.used_percent() >= self.thresholds.critical_pct)
                .unwrap_or(false)
        });

        let mut scored: Vec<ScoreResult> = candidates
            .iter()
            .map(|a| scorer::score(a, quotas.get(&a.id), &weights, &self.thresholds, &req, global_low))
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let best = scored[0].clone();
        if best.score <= 0.0 {
            return Err(RouterError::NoSuitableAccounts { reason: best.reason }.into());
        }

        let provider_by_id: HashMap<&str, Provider> =
            candidates.iter().map(|a| (a.id.as_str(), a.provider)).collect();

        let state = self.state.read().await;
        let current_id = state.current_account.clone();
        let current_score = current_id
            .as_deref()
            .and_then(|id| scored.iter().find(|s| s.account_id == id))
            .cloned();
        drop(state);

        let current_used_percent = current_score
            .as_ref()
            .and_then(|c| quotas.get(&c.account_id))
            .map(|q| q.used_percent())
            .unwrap_or(0.0);
        let current_is_critical = current_score.is_some() && current_used_percent >= self.thresholds.critical_pct;

        let mut chosen = best.clone();

        if global_low {
            if let Some(current) = &current_score {
                if current.score > 0.0 {
                    chosen = ScoreResult {
                        account_id: current.account_id.clone(),
                        score: current.score,
                        reason: format!("{} (global low quota mode)", current.reason),
                    };
                }
            }
        } else if current_is_critical {
            if let Some(current) = &current_score {
                if let Some(promoted) = self
                    .resolve_fallback_candidate(&req, &current.account_id, &candidates, &scored)
                    .await
                {
                    chosen = promoted;
                }
            }
        }

        let mut final_choice =
            self.anti_flap_gate(&current_score, &chosen, &scored, current_is_critical);

        if current_is_critical {
            if let Some(current) = &current_score {
                if final_choice.account_id != current.account_id {
                    final_choice.reason = format!("{} (fallback due to critical account)", final_choice.reason);
                }
            }
        }

        let alternative_ids: Vec<String> = scored
            .iter()
            .filter(|s| s.account_id != final_choice.account_id && s.score > 0.0)
            .take(3)
            .map(|s| s.account_id.clone())
            .collect();

        let provider = provider_by_id
            .get(final_choice.account_id.as_str())
            .copied()
            .ok_or_else(|| RouterError::UnknownAccount(final_choice.account_id.clone()))?;

        Ok(SelectResponse {
            account_id: final_choice.account_id,
            provider,
            score: final_choice.score,
            reason: final_choice.reason,
            alternative_ids,
        })
    }

    /// Gate a would-be switch behind hysteresis. Staying on the current
    /// account is always legal if it still scores above zero; switching
    /// requires either a critical incumbent with a decent challenger, or
    /// a challenger that clears the hysteresis margin.
    fn anti_flap_gate(
        &self,
        current_score: &Option<ScoreResult>,
        candidate: &ScoreResult,
        scored: &[ScoreResult],
        current_is_critical: bool,
    ) -> ScoreResult {
        let Some(current) = current_score else {
            return candidate.clone();
        };
        if current.account_id == candidate.account_id {
            return candidate.clone();
        }

        let should_switch = if current_is_critical {
            candidate.score > 0.2
        } else {
            candidate.score - current.score >= self.thresholds.hysteresis_margin_pct / 100.0
        };

        if should_switch {
            candidate.clone()
        } else if current.score > 0.0 {
            current.clone()
        } else {
            scored
                .iter()
                .find(|s| s.score > 0.0)
                .cloned()
                .unwrap_or_else(|| candidate.clone())
        }
    }

    async fn resolve_fallback_candidate(
        &self,
        req: &SelectRequest,
        current_account_id: &str,
        candidates: &[crate::model::Account],
        scored: &[ScoreResult],
    ) -> Option<ScoreResult> {
        let chains = self.fallback_chains.read().await;
        let current = candidates.iter().find(|a| a.id == current_account_id)?;

        let mut keys = Vec::new();
        if let Some(model) = &req.model {
            let (stripped, prefixed) = FallbackChains::normalize_model(model);
            keys.push(stripped);
            keys.push(prefixed);
        }
        keys.push(current.id.clone());
        keys.push(current.sub_tag_key().to_string());
        keys.push(current.provider.as_str().to_string());

        for key in keys {
            if let Some(chain) = chains.lookup(&key) {
                for account_id in chain {
                    if let Some(s) = scored.iter().find(|s| &s.account_id == account_id && s.score > 0.0) {
                        return Some(s.clone());
                    }
                }
            }
        }
        None
    }

    /// Best-effort feedback hook; never fails the caller's request.
    pub async fn record_switch(&self, account_id: &str) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.last_switch.insert(account_id.to_string(), now);
        if state.current_account.as_deref() != Some(account_id) {
            state.current_account = Some(account_id.to_string());
            state.account_dwell_time = Some(now);
            state.switched_to.insert(account_id.to_string());
        }
    }

    pub async fn stats(&self) -> RouterStats {
        let state = self.state.read().await;
        RouterStats {
            last_switches: state.switched_to.len(),
        }
    }

    /// Advisory only: never consulted inside `select`. See the design
    /// notes' open-question resolution on `canSwitch`.
    pub async fn can_switch(&self, account_id: &str, cooldown: chrono::Duration) -> bool {
        let state = self.state.read().await;
        match state.last_switch.get(account_id) {
            Some(last) => self.clock.now() - *last >= cooldown,
            None => true,
        }
    }

    pub async fn distribution(&self) -> HashMap<String, u32> {
        let accounts = self.store.list_enabled_accounts().await.unwrap_or_default();
        if accounts.is_empty() {
            return HashMap::new();
        }
        let share = 100 / accounts.len() as u32;
        accounts.into_iter().map(|a| (a.id, share)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenClock;
    use crate::model::dimension::{Dimension, DimensionType};
    use crate::model::{Account, DimensionSource, QuotaInfo};
    use crate::store::InMemoryStore;

    async fn setup() -> (Router, Arc<InMemoryStore>, CircuitRegistry) {
        let store = Arc::new(InMemoryStore::new());
        let clock: SharedClock = Arc::new(FrozenClock::new(Utc::now()));
        let circuits = CircuitRegistry::new();
        let router = Router::new(store.clone(), clock, Thresholds::default(), circuits.clone());
        (router, store, circuits)
    }

    async fn seed(store: &InMemoryStore, id: &str, priority: i32, remaining_pct: f64) {
        let mut account = Account::new(id, Provider::OpenAI, "cred");
        account.priority = priority;
        store.set_account(account).await.unwrap();

        let used = 100.0 - remaining_pct;
        let dims = vec![Dimension::new(DimensionType::RPM, 100.0, used, DimensionSource::Headers)];
        let quota = QuotaInfo::new(Provider::OpenAI, id, "default", dims, DimensionSource::Headers, 1.0);
        store.set_quota(quota).await.unwrap();
    }

    #[tokio::test]
    async fn basic_selection_prefers_higher_score() {
        let (router, store, _circuits) = setup().await;
        seed(&store, "a", 10, 80.0).await;
        seed(&store, "b", 5, 50.0).await;

        let req = SelectRequest {
            provider: Some(Provider::OpenAI),
            policy: "balanced".to_string(),
            ..Default::default()
        };
        let resp = router.select(req).await.unwrap();
        assert_eq!(resp.account_id, "a");
        assert_eq!(resp.alternative_ids, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn anti_flap_keeps_incumbent_within_hysteresis_margin() {
        let (router, store, _circuits) = setup().await;
        seed(&store, "a", 10, 80.0).await;
        seed(&store, "b", 5, 50.0).await;

        let req = || SelectRequest {
            provider: Some(Provider::OpenAI),
            policy: "balanced".to_string(),
            ..Default::default()
        };
        let first = router.select(req()).await.unwrap();
        router.record_switch(&first.account_id).await;

        seed(&store, "a", 10, 75.0).await;
        seed(&store, "b", 5, 78.0).await;

        let second = router.select(req()).await.unwrap();
        assert_eq!(second.account_id, "a");
    }

    #[tokio::test]
    async fn critical_incumbent_falls_back_to_healthy_challenger() {
        let (router, store, _circuits) = setup().await;
        seed(&store, "a", 10, 80.0).await;
        seed(&store, "b", 5, 50.0).await;

        let req = || SelectRequest {
            provider: Some(Provider::OpenAI),
            policy: "balanced".to_string(),
            ..Default::default()
        };
        let first = router.select(req()).await.unwrap();
        router.record_switch(&first.account_id).await;

        seed(&store, "a", 10, 3.0).await;

        let second = router.select(req()).await.unwrap();
        assert_eq!(second.account_id, "b");
        assert!(second.reason.contains("fallback due to critical account"));
    }

    #[tokio::test]
    async fn empty_candidate_set_fails_with_reason() {
        let (router, _store, _circuits) = setup().await;
        let result = router.select(SelectRequest::default()).await;
        match result {
            Err(QuotaGuardError::Router(RouterError::NoSuitableAccounts { reason })) => {
                assert_eq!(reason, "no enabled accounts available");
            }
            _ => panic!("expected NoSuitableAccounts"),
        }
    }

    #[tokio::test]
    async fn open_circuit_excludes_every_candidate_for_that_provider() {
        let (router, store, circuits) = setup().await;
        seed(&store, "a", 10, 80.0).await;

        let clock: SharedClock = Arc::new(FrozenClock::new(Utc::now()));
        let cb = circuits
            .get_or_insert(Provider::OpenAI.as_str(), || {
                Arc::new(crate::circuit::CircuitBreaker::new(
                    Provider::OpenAI.as_str(),
                    crate::circuit::CircuitBreakerConfig {
                        failure_threshold: 1,
                        half_open_limit: 3,
                        timeout: chrono::Duration::seconds(30),
                    },
                    clock,
                ))
            })
            .await;
        cb.record_failure();

        let req = SelectRequest {
            provider: Some(Provider::OpenAI),
            policy: "balanced".to_string(),
            ..Default::default()
        };
        let result = router.select(req).await;
        match result {
            Err(QuotaGuardError::Router(RouterError::NoSuitableAccounts { reason })) => {
                assert_eq!(reason, "all candidate providers have an open circuit");
            }
            _ => panic!("expected NoSuitableAccounts"),
        }
    }

    #[tokio::test]
    async fn fallback_chain_resolves_by_key_priority_and_model_prefix_normalization() {
        let (router, store, _circuits) = setup().await;
        seed(&store, "a", 10, 80.0).await;
        seed(&store, "b", 5, 60.0).await;
        seed(&store, "c", 5, 60.0).await;

        let req = || SelectRequest {
            provider: Some(Provider::OpenAI),
            policy: "balanced".to_string(),
            model: Some("models/gpt-4".to_string()),
            ..Default::default()
        };

        let first = router.select(req()).await.unwrap();
        assert_eq!(first.account_id, "a");
        router.record_switch(&first.account_id).await;

        // Account "a" goes critical. A model-keyed chain should win over
        // an account-keyed chain, and the "models/" prefix on the request
        // should still match a chain registered under the bare model name.
        seed(&store, "a", 10, 3.0).await;

        let mut chains = FallbackChains::new();
        chains.set("gpt-4", vec!["c".to_string()]);
        chains.set("a", vec!["b".to_string()]);
        router.set_fallback_chains(chains).await;

        let second = router.select(req()).await.unwrap();
        assert_eq!(second.account_id, "c");
        assert!(second.reason.contains("fallback due to critical account"));
    }
}
