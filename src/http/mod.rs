//! Request layer for the HTTP data API.
//!
//! [`RequestClient`] is the single entry point; the actual HTTP exchange
//! happens behind the [`HttpBackend`] trait ([`ReqwestBackend`] in
//! production), and the bearer credential comes from a
//! [`CredentialStore`].

pub mod backend;
pub mod client;
pub mod credentials;
pub mod request;
pub mod retry;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{HttpBackend, ReqwestBackend};
pub use client::RequestClient;
pub use credentials::{CredentialStore, TokenStore};
pub use request::{Access, ApiRequest, ApiResponse, RetryMode};
pub use retry::{RetryContext, with_retries};
pub use throttle::Throttle;
