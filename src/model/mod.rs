//! Core data model: providers, accounts, quota dimensions, and reservations.

pub mod account;
pub mod credentials;
pub mod dimension;
pub mod provider;
pub mod quota;
pub mod reservation;

pub use account::Account;
pub use credentials::AccountCredentials;
pub use dimension::{Dimension, DimensionSemantics, DimensionSource, DimensionType};
pub use provider::Provider;
pub use quota::QuotaInfo;
pub use reservation::{Reservation, ReservationStatus};
