use std::{fmt, future::Future, sync::Arc};

use futures::future::{BoxFuture, FutureExt};

use crate::{Client, FailedRequest, HttpRequest};

/// Status codes that trigger a refresh when none are configured.
pub const DEFAULT_STATUS_CODES: &[u16] = &[401];

/// Custom refresh predicate; when set, status codes are ignored.
pub type ShouldRefresh = Arc<dyn Fn(&FailedRequest) -> bool + Send + Sync>;

/// Transform applied to a request before it is replayed.
pub type OnRetry = Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, HttpRequest> + Send + Sync>;

/// Configures the transport adapter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

/// Auth-refresh configuration.
///
/// Every field is optional so that instance-level and request-level options
/// can be layered with [`AuthRefreshOptions::merge`].
#[derive(Clone, Default)]
pub struct AuthRefreshOptions {
    /// Statuses that qualify a response for refresh.
    pub status_codes: Option<Vec<u16>>,
    pub should_refresh: Option<ShouldRefresh>,
    /// Client used to replay the request after a refresh.
    pub retry_client: Option<Client>,
    /// Also intercept connection-level failures that carry no response.
    pub intercept_network_error: Option<bool>,
    /// Suppress interception of the owning client while its refresh runs.
    pub pause_instance_while_refreshing: Option<bool>,
    pub on_retry: Option<OnRetry>,
}

impl fmt::Debug for AuthRefreshOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRefreshOptions")
            .field("status_codes", &self.status_codes)
            .field("should_refresh", &self.should_refresh.as_ref().map(|_| "<fn>"))
            .field("retry_client", &self.retry_client)
            .field("intercept_network_error", &self.intercept_network_error)
            .field(
                "pause_instance_while_refreshing",
                &self.pause_instance_while_refreshing,
            )
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl AuthRefreshOptions {
    /// The baseline every hook merges onto: `[401]`, no pausing.
    pub fn defaults() -> Self {
        Self {
            status_codes: Some(DEFAULT_STATUS_CODES.to_vec()),
            pause_instance_while_refreshing: Some(false),
            ..Self::default()
        }
    }

    /// Shallow merge: every field set in `overrides` wins, unset fields keep `self`.
    pub fn merge(&self, overrides: &AuthRefreshOptions) -> AuthRefreshOptions {
        AuthRefreshOptions {
            status_codes: overrides
                .status_codes
                .clone()
                .or_else(|| self.status_codes.clone()),
            should_refresh: overrides
                .should_refresh
                .clone()
                .or_else(|| self.should_refresh.clone()),
            retry_client: overrides
                .retry_client
                .clone()
                .or_else(|| self.retry_client.clone()),
            intercept_network_error: overrides
                .intercept_network_error
                .or(self.intercept_network_error),
            pause_instance_while_refreshing: overrides
                .pause_instance_while_refreshing
                .or(self.pause_instance_while_refreshing),
            on_retry: overrides.on_retry.clone().or_else(|| self.on_retry.clone()),
        }
    }

    pub fn with_status_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.status_codes = Some(codes.into_iter().collect());
        self
    }

    pub fn with_should_refresh<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailedRequest) -> bool + Send + Sync + 'static,
    {
        self.should_refresh = Some(Arc::new(predicate));
        self
    }

    pub fn with_retry_client(mut self, client: Client) -> Self {
        self.retry_client = Some(client);
        self
    }

    pub fn with_intercept_network_error(mut self, enabled: bool) -> Self {
        self.intercept_network_error = Some(enabled);
        self
    }

    pub fn with_pause_instance_while_refreshing(mut self, enabled: bool) -> Self {
        self.pause_instance_while_refreshing = Some(enabled);
        self
    }

    pub fn with_on_retry<F, Fut>(mut self, transform: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpRequest> + Send + 'static,
    {
        self.on_retry = Some(Arc::new(move |request: HttpRequest| transform(request).boxed()));
        self
    }

    pub fn status_codes(&self) -> &[u16] {
        self.status_codes.as_deref().unwrap_or(DEFAULT_STATUS_CODES)
    }

    pub fn intercepts_network_errors(&self) -> bool {
        self.intercept_network_error.unwrap_or(false)
    }

    pub fn pauses_while_refreshing(&self) -> bool {
        self.pause_instance_while_refreshing.unwrap_or(false)
    }
}
