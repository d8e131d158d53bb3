use std::sync::Arc;

use crate::config::Config;
use crate::credential::CredentialStore;
use crate::pool::AccountPool;
use crate::quota::QuotaLedger;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<AccountPool>,
    pub store: Arc<CredentialStore>,
    pub ledger: Arc<QuotaLedger>,
    pub config: Arc<Config>,
}
