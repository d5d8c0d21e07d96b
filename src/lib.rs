//! Secret Store Library
//!
//! A client for secrets kept in one or more HashiCorp Vault-style KV
//! backends, addressed by four-segment logical keys and routed to the
//! backend serving each key's deploy group.

pub mod backends;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod keypath;
pub mod store;

pub use backends::{Backend, BackendResolver, SecretBackend, StaticBackendMap};
pub use config::Config;
pub use error::{Result, SecretError};
pub use store::{NewSecret, SecretRecord, SecretStore};
