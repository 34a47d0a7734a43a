//! `http-auth-refresh` adds transparent refresh-on-401 to an async HTTP client.
//!
//! When a response fails with an auth-related status, the hook starts one
//! externally-supplied token refresh, lets every concurrent failure wait on
//! that same refresh, then replays each failed request once:
//! - [`AuthRefresh::install`] / [`create_auth_refresh_hook`]
//! - [`RefreshCoordinator`] (single-flight gate and pause registry)
//! - [`should_intercept()`] and [`retry()`]

mod client;
mod coordinator;
mod error;
mod hook;
mod intercept;
mod options;
mod retry;
mod transport;
mod types;

#[cfg(test)]
mod test_support;

pub use client::{Client, ClientId, Outcome, ResponseInterceptor};
pub use coordinator::{
    AuthRefresher, CoordinationSnapshot, PendingRefresh, RefreshCoordinator, RefreshFuture,
};
pub use error::{AuthRefreshError, TransportError, TransportErrorKind};
pub use hook::{create_auth_refresh_hook, AuthRefresh, AuthRefreshInterceptor};
pub use intercept::should_intercept;
pub use options::{
    AuthRefreshOptions, OnRetry, ShouldRefresh, TransportOptions, DEFAULT_STATUS_CODES,
};
pub use retry::retry;
pub use transport::{ReqwestTransport, Transport};
pub use types::{FailedRequest, FailedResponse, HttpRequest, HttpResponse, RequestOptions, Status};

pub type Result<T> = std::result::Result<T, AuthRefreshError>;
