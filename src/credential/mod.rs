mod record;
mod store;

pub use record::{CredentialRecord, Identity, Provider};
pub use store::CredentialStore;
