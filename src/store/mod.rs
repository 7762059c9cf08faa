//! Store: the sole owner of accounts, quota snapshots, reservations, and
//! credentials. Reads return snapshots safe to use without further
//! locking; writes are atomic per key.

pub mod memory;
pub mod pool;
pub mod sqlx_store;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Account, AccountCredentials, QuotaInfo, Reservation};

pub use memory::InMemoryStore;
pub use sqlx_store::SqlxStore;

type StoreResult<T> = Result<T, StoreError>;

/// Concurrent key-value facade over accounts, quotas, and reservations.
///
/// Implementations must make every method here safe to call from many
/// tasks concurrently, and every write must be its own atomic unit — there
/// is no cross-key transaction in this contract.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_account(&self, id: &str) -> StoreResult<Option<Account>>;
    async fn list_enabled_accounts(&self) -> StoreResult<Vec<Account>>;
    async fn set_account(&self, account: Account) -> StoreResult<()>;
    async fn delete_account(&self, id: &str) -> StoreResult<bool>;

    async fn get_quota(&self, account_id: &str) -> StoreResult<Option<QuotaInfo>>;
    async fn set_quota(&self, quota: QuotaInfo) -> StoreResult<()>;
    async fn list_quotas(&self) -> StoreResult<Vec<QuotaInfo>>;
    async fn delete_quota(&self, account_id: &str) -> StoreResult<bool>;

    async fn get_reservation(&self, id: &str) -> StoreResult<Option<Reservation>>;
    async fn set_reservation(&self, reservation: Reservation) -> StoreResult<()>;
    async fn list_reservations_for_account(&self, account_id: &str) -> StoreResult<Vec<Reservation>>;
    async fn list_open_reservations(&self) -> StoreResult<Vec<Reservation>>;

    async fn get_credentials(&self, account_id: &str) -> StoreResult<Option<AccountCredentials>>;
    async fn set_credentials(&self, credentials: AccountCredentials) -> StoreResult<()>;
}
