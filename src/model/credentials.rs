//! Account credentials, kept separate from `Account` so routing snapshots
//! never need to carry secret material.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub account_id: String,
    #[serde(skip_serializing)]
    pub secret: String,
}
