//! Account: a usable provider credential with routing metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::provider::Provider;

/// Identity of a usable credential against a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub provider: Provider,
    /// Free-form subscription sub-type: codex, antigravity, qwen,
    /// claude-code, or `None` for plain API-key accounts.
    pub sub_tag: Option<String>,
    pub tier: String,
    pub enabled: bool,
    /// Higher is preferred.
    pub priority: i32,
    pub concurrency_limit: u32,
    pub input_cost: f64,
    pub output_cost: f64,
    pub credentials_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Errors produced by `Account` invariant checks.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AccountValidationError {
    #[error("account id must not be empty")]
    EmptyId,
    #[error("input_cost must be >= 0")]
    NegativeInputCost,
    #[error("output_cost must be >= 0")]
    NegativeOutputCost,
}

impl Account {
    pub fn new(id: impl Into<String>, provider: Provider, credentials_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            provider,
            sub_tag: None,
            tier: "default".to_string(),
            enabled: true,
            priority: 0,
            concurrency_limit: 0,
            input_cost: 0.0,
            output_cost: 0.0,
            credentials_ref: credentials_ref.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the invariants from the data model: non-empty id,
    /// non-negative costs. `concurrency_limit` is a `u32` so it is
    /// trivially >= 0.
    pub fn validate(&self) -> Result<(), AccountValidationError> {
        if self.id.is_empty() {
            return Err(AccountValidationError::EmptyId);
        }
        if self.input_cost < 0.0 {
            return Err(AccountValidationError::NegativeInputCost);
        }
        if self.output_cost < 0.0 {
            return Err(AccountValidationError::NegativeOutputCost);
        }
        Ok(())
    }

    /// The key used to resolve this account's provider-type sub-tag in a
    /// fallback chain, falling back to the base provider's name.
    pub fn sub_tag_key(&self) -> &str {
        self.sub_tag.as_deref().unwrap_or(self.provider.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_id() {
        let mut account = Account::new("", Provider::OpenAI, "cred-1");
        account.id = String::new();
        assert_eq!(account.validate(), Err(AccountValidationError::EmptyId));
    }

    #[test]
    fn rejects_negative_costs() {
        let mut account = Account::new("acc-1", Provider::OpenAI, "cred-1");
        account.input_cost = -1.0;
        assert_eq!(
            account.validate(),
            Err(AccountValidationError::NegativeInputCost)
        );
    }

    #[test]
    fn accepts_well_formed_account() {
        let account = Account::new("acc-1", Provider::OpenAI, "cred-1");
        assert!(account.validate().is_ok());
    }
}
