//! Fail-open client: wraps a remote `Router.Select` call with a timeout
//! and a local fallback strategy, so a caller who can't reach the
//! central router still gets a usable account. The local strategies are
//! grounded on `AccountPool::get_available`'s "least-loaded, not
//! blocked" selection (`27e7ad18_clawde-io-apps`) generalized to three
//! named strategies, plus the teacher's `reqwest::Client` timeout
//! conventions for the remote call itself.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::is_network_class_error;
use crate::model::Account;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    RoundRobin,
    FirstAvailable,
    PriorityWeighted,
}

#[derive(Debug, Clone)]
pub struct FailOpenConfig {
    pub timeout: Duration,
    pub strategy: FallbackStrategy,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for FailOpenConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(50),
            strategy: FallbackStrategy::RoundRobin,
            max_retries: 0,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailOpenResult<T> {
    pub value: T,
    pub fallback: bool,
    pub reason: Option<String>,
}

pub struct FailOpenClient {
    config: FailOpenConfig,
    round_robin_index: AtomicUsize,
}

impl FailOpenClient {
    pub fn new(config: FailOpenConfig) -> Self {
        Self {
            config,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    /// Run `op` under a private timeout. On timeout or a network-class
    /// error, fall back to local selection over `accounts`. Other errors
    /// propagate unchanged — they are not this client's to paper over.
    pub async fn execute_with_fail_open<F, Fut, T, E>(
        &self,
        op: F,
        accounts: &[Account],
    ) -> Result<FailOpenResult<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        T: FromAccount,
    {
        match tokio::time::timeout(self.config.timeout, op()).await {
            Ok(Ok(value)) => Ok(FailOpenResult {
                value,
                fallback: false,
                reason: None,
            }),
            Ok(Err(err)) => {
                if is_network_class_error(&err.to_string()) {
                    Ok(self.fallback_result(accounts, "network_error"))
                } else {
                    Err(err)
                }
            }
            Err(_elapsed) => Ok(self.fallback_result(accounts, "timeout")),
        }
    }

    fn fallback_result<T: FromAccount>(&self, accounts: &[Account], reason: &str) -> FailOpenResult<T> {
        let account = self.select_locally(accounts);
        FailOpenResult {
            value: T::from_account(account),
            fallback: true,
            reason: Some(reason.to_string()),
        }
    }

    /// Retry wrapper: retries on propagated error up to `max_retries`
    /// with fixed backoff. A fallback result counts as success and ends
    /// the retry loop immediately.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        mut op: F,
        accounts: &[Account],
    ) -> Result<FailOpenResult<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        T: FromAccount,
    {
        let mut attempts = 0;
        loop {
            match self.execute_with_fail_open(&mut op, accounts).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(err);
                    }
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }
    }

    fn select_locally<'a>(&self, accounts: &'a [Account]) -> Option<&'a Account> {
        if accounts.is_empty() {
            return None;
        }
        match self.config.strategy {
            FallbackStrategy::RoundRobin => {
                let idx = self.round_robin_index.fetch_add(1, Ordering::SeqCst) % accounts.len();
                accounts.get(idx)
            }
            FallbackStrategy::FirstAvailable => {
                let idx = rand::thread_rng().gen_range(0..accounts.len());
                accounts.get(idx)
            }
            FallbackStrategy::PriorityWeighted => {
                let weights: Vec<u32> = accounts.iter().map(|a| (a.priority.max(0) as u32) + 1).collect();
                let total: u32 = weights.iter().sum();
                let mut pick = rand::thread_rng().gen_range(0..total);
                for (account, weight) in accounts.iter().zip(weights.iter()) {
                    if pick < *weight {
                        return Some(account);
                    }
                    pick -= weight;
                }
                accounts.last()
            }
        }
    }

    /// Resets the round-robin cursor whenever the externally observed
    /// `last_used` for the rotation changes, per the rebasing rule.
    pub fn rebase_round_robin(&self) {
        self.round_robin_index.store(0, Ordering::SeqCst);
    }
}

/// Adapts whatever the fallback strategies pick (an `Option<&Account>`)
/// into the caller's result type `T`.
pub trait FromAccount {
    fn from_account(account: Option<&Account>) -> Self;
}

impl FromAccount for Option<String> {
    fn from_account(account: Option<&Account>) -> Self {
        account.map(|a| a.id.clone())
    }
}

pub type SharedFailOpenClient = Arc<FailOpenClient>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Provider;

    fn accounts() -> Vec<Account> {
        vec![
            Account::new("a", Provider::OpenAI, "cred-a"),
            Account::new("b", Provider::OpenAI, "cred-b"),
        ]
    }

    #[tokio::test]
    async fn fast_success_is_not_marked_fallback() {
        let client = FailOpenClient::new(FailOpenConfig::default());
        let result: Result<FailOpenResult<Option<String>>, String> = client
            .execute_with_fail_open(|| async { Ok::<_, String>(Some("a".to_string())) }, &accounts())
            .await;
        let result = result.unwrap();
        assert!(!result.fallback);
        assert_eq!(result.value, Some("a".to_string()));
    }

    #[tokio::test]
    async fn slow_operation_falls_back_with_timeout_reason() {
        let client = FailOpenClient::new(FailOpenConfig {
            timeout: Duration::from_millis(10),
            ..FailOpenConfig::default()
        });
        let result: FailOpenResult<Option<String>> = client
            .execute_with_fail_open(
                || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, String>(Some("remote".to_string()))
                },
                &accounts(),
            )
            .await
            .unwrap();
        assert!(result.fallback);
        assert_eq!(result.reason.as_deref(), Some("timeout"));
        assert!(result.value.is_some());
    }

    #[tokio::test]
    async fn network_class_error_falls_back_with_network_reason() {
        let client = FailOpenClient::new(FailOpenConfig::default());
        let result: FailOpenResult<Option<String>> = client
            .execute_with_fail_open(
                || async { Err::<Option<String>, _>("connection refused by peer".to_string()) },
                &accounts(),
            )
            .await
            .unwrap();
        assert!(result.fallback);
        assert_eq!(result.reason.as_deref(), Some("network_error"));
    }

    #[tokio::test]
    async fn non_network_error_propagates_unchanged() {
        let client = FailOpenClient::new(FailOpenConfig::default());
        let result: Result<FailOpenResult<Option<String>>, String> = client
            .execute_with_fail_open(
                || async { Err::<Option<String>, _>("invalid api key".to_string()) },
                &accounts(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn round_robin_cycles_through_accounts() {
        let client = FailOpenClient::new(FailOpenConfig {
            timeout: Duration::from_millis(1),
            strategy: FallbackStrategy::RoundRobin,
            ..FailOpenConfig::default()
        });
        let accounts = accounts();
        let mut seen = Vec::new();
        for _ in 0..2 {
            let result: FailOpenResult<Option<String>> = client
                .execute_with_fail_open(
                    || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(None)
                    },
                    &accounts,
                )
                .await
                .unwrap();
            seen.push(result.value.unwrap());
        }
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }
}
