//! In-memory `Store` used for tests and as the fail-open client's local
//! data source. Grounded on `ProviderAccountManager`'s
//! `Arc<RwLock<HashMap<...>>>` layering.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::{Account, AccountCredentials, QuotaInfo, Reservation};

use super::Store;

#[derive(Default)]
pub struct InMemoryStore {
    accounts: RwLock<HashMap<String, Account>>,
    quotas: RwLock<HashMap<String, QuotaInfo>>,
    reservations: RwLock<HashMap<String, Reservation>>,
    credentials: RwLock<HashMap<String, AccountCredentials>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn list_enabled_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.enabled)
            .cloned()
            .collect())
    }

    async fn set_account(&self, account: Account) -> Result<(), StoreError> {
        self.accounts.write().await.insert(account.id.clone(), account);
        Ok(())
    }

    async fn delete_account(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.accounts.write().await.remove(id).is_some())
    }

    async fn get_quota(&self, account_id: &str) -> Result<Option<QuotaInfo>, StoreError> {
        Ok(self.quotas.read().await.get(account_id).cloned())
    }

    async fn set_quota(&self, quota: QuotaInfo) -> Result<(), StoreError> {
        self.quotas
            .write()
            .await
            .insert(quota.account_id.clone(), quota);
        Ok(())
    }

    async fn list_quotas(&self) -> Result<Vec<QuotaInfo>, StoreError> {
        Ok(self.quotas.read().await.values().cloned().collect())
    }

    async fn delete_quota(&self, account_id: &str) -> Result<bool, StoreError> {
        Ok(self.quotas.write().await.remove(account_id).is_some())
    }

    async fn get_reservation(&self, id: &str) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.read().await.get(id).cloned())
    }

    async fn set_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.reservations
            .write()
            .await
            .insert(reservation.id.clone(), reservation);
        Ok(())
    }

    async fn list_reservations_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .reservations
            .read()
            .await
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn list_open_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .reservations
            .read()
            .await
            .values()
            .filter(|r| r.status.is_open())
            .cloned()
            .collect())
    }

    async fn get_credentials(&self, account_id: &str) -> Result<Option<AccountCredentials>, StoreError> {
        Ok(self.credentials.read().await.get(account_id).cloned())
    }

    async fn set_credentials(&self, credentials: AccountCredentials) -> Result<(), StoreError> {
        self.credentials
            .write()
            .await
            .insert(credentials.account_id.clone(), credentials);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Provider;

    #[tokio::test]
    async fn set_then_get_account_round_trips() {
        let store = InMemoryStore::new();
        let account = Account::new("acc-1", Provider::OpenAI, "cred-1");
        store.set_account(account.clone()).await.unwrap();

        let fetched = store.get_account("acc-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, account.id);
    }

    #[tokio::test]
    async fn list_enabled_accounts_filters_disabled() {
        let store = InMemoryStore::new();
        let mut enabled = Account::new("on", Provider::OpenAI, "cred-1");
        enabled.enabled = true;
        let mut disabled = Account::new("off", Provider::OpenAI, "cred-2");
        disabled.enabled = false;

        store.set_account(enabled).await.unwrap();
        store.set_account(disabled).await.unwrap();

        let listed = store.list_enabled_accounts().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "on");
    }

    #[tokio::test]
    async fn delete_account_reports_whether_it_existed() {
        let store = InMemoryStore::new();
        store
            .set_account(Account::new("acc-1", Provider::OpenAI, "cred-1"))
            .await
            .unwrap();

        assert!(store.delete_account("acc-1").await.unwrap());
        assert!(!store.delete_account("acc-1").await.unwrap());
    }
}
