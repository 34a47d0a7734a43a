//! Wires refresh coordination into a client's response-interception point.

use std::{fmt, sync::Arc};

use futures::future::{BoxFuture, FutureExt};

use crate::{
    intercept::should_intercept, retry::retry, AuthRefreshError, AuthRefreshOptions,
    AuthRefresher, Client, ClientId, FailedRequest, HttpRequest, HttpResponse, Outcome,
    PendingRefresh, RefreshCoordinator, ResponseInterceptor, Result,
};

/// Builder for an auth-refresh hook.
///
/// ```no_run
/// use http_auth_refresh::{AuthRefresh, AuthRefreshOptions, Client, FailedRequest};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = AuthRefresh::new(|_failed: FailedRequest| async {
///     // call the token endpoint and store the new token
///     Ok::<(), std::io::Error>(())
/// })
/// .options(AuthRefreshOptions::default().with_status_codes([401, 403]))
/// .install(&Client::reqwest())?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct AuthRefresh {
    refresher: Option<Arc<dyn AuthRefresher>>,
    options: AuthRefreshOptions,
}

impl fmt::Debug for AuthRefresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRefresh")
            .field("refresher", &self.refresher.as_ref().map(|_| "<refresher>"))
            .field("options", &self.options)
            .finish()
    }
}

impl AuthRefresh {
    pub fn new<R>(refresher: R) -> Self
    where
        R: AuthRefresher + 'static,
    {
        Self::default().refresher(refresher)
    }

    /// Starts a builder without a refresher; [`install`](Self::install) fails
    /// until one is set.
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn refresher<R>(mut self, refresher: R) -> Self
    where
        R: AuthRefresher + 'static,
    {
        self.refresher = Some(Arc::new(refresher));
        self
    }

    pub fn shared_refresher(mut self, refresher: Arc<dyn AuthRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Instance-level options, merged over the defaults.
    pub fn options(mut self, options: AuthRefreshOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the interceptor for `client` without attaching it.
    pub fn interceptor(self, client: &Client) -> Result<AuthRefreshInterceptor> {
        let refresher = self.refresher.ok_or_else(|| {
            AuthRefreshError::InvalidConfiguration(
                "a refresher returning a refresh operation is required".to_owned(),
            )
        })?;

        Ok(AuthRefreshInterceptor {
            owner: client.clone(),
            options: AuthRefreshOptions::defaults().merge(&self.options),
            coordinator: Arc::new(RefreshCoordinator::new(refresher)),
        })
    }

    /// Returns a new client with the hook attached; `client` is unchanged.
    pub fn install(self, client: &Client) -> Result<Client> {
        let interceptor = self.interceptor(client)?;
        Ok(client.extend(interceptor))
    }
}

/// One-call form of [`AuthRefresh::install`].
pub fn create_auth_refresh_hook<R>(
    client: &Client,
    refresher: R,
    options: AuthRefreshOptions,
) -> Result<Client>
where
    R: AuthRefresher + 'static,
{
    AuthRefresh::new(refresher).options(options).install(client)
}

/// Response interceptor that refreshes credentials and replays failed requests.
pub struct AuthRefreshInterceptor {
    owner: Client,
    options: AuthRefreshOptions,
    coordinator: Arc<RefreshCoordinator>,
}

impl fmt::Debug for AuthRefreshInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRefreshInterceptor")
            .field("owner", &self.owner.id())
            .field("options", &self.options)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl AuthRefreshInterceptor {
    pub fn coordinator(&self) -> Arc<RefreshCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn owner(&self) -> ClientId {
        self.owner.id()
    }

    async fn handle(&self, request: &HttpRequest, outcome: Outcome) -> Outcome {
        if request.options().skip_auth_refresh {
            return outcome;
        }

        let failed = match &outcome {
            Ok(response) if response.is_success() => None,
            Ok(response) => Some(FailedRequest::from_response(request, response)),
            Err(err) => Some(FailedRequest::from_error(request, err)),
        };
        let Some(mut failed) = failed else {
            return outcome;
        };

        let options = self.options.merge(&request.options().auth_refresh);
        let owner = self.owner.id();
        if !should_intercept(Some(&mut failed), &options, owner, &self.coordinator) {
            return outcome;
        }

        let Some(refreshing) =
            self.coordinator
                .begin(owner, options.pauses_while_refreshing(), &failed)
        else {
            return outcome;
        };
        let _cleanup = CleanupGuard {
            coordinator: &self.coordinator,
            owner,
            generation: refreshing.generation(),
        };
        self.coordinator.install_queue_marker();

        match self.refresh_and_retry(&failed, &refreshing, &options).await {
            Ok(response) => Ok(response),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    error = %_err,
                    url = request.url(),
                    "auth refresh did not recover request, returning original outcome"
                );
                outcome
            }
        }
    }

    async fn refresh_and_retry(
        &self,
        failed: &FailedRequest,
        refreshing: &PendingRefresh,
        options: &AuthRefreshOptions,
    ) -> Result<HttpResponse> {
        refreshing.settled().await?;
        let client = options.retry_client.as_ref().unwrap_or(&self.owner);
        let response = retry(failed, client, options.on_retry.as_ref())
            .await
            .map_err(AuthRefreshError::RetryFailed)?;
        if !response.is_success() {
            return Err(AuthRefreshError::RetryRejected(response.status().as_u16()));
        }
        Ok(response)
    }
}

impl ResponseInterceptor for AuthRefreshInterceptor {
    fn intercept<'a>(
        &'a self,
        request: &'a HttpRequest,
        outcome: Outcome,
    ) -> BoxFuture<'a, Outcome> {
        self.handle(request, outcome).boxed()
    }
}

/// Runs coordinator cleanup on every exit path, including a dropped future.
struct CleanupGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    owner: ClientId,
    generation: u64,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            generation = self.generation,
            owner = %self.owner,
            "auth refresh cleanup"
        );
        self.coordinator.cleanup(self.owner, self.generation);
    }
}
