use crate::{AuthRefreshOptions, ClientId, FailedRequest, RefreshCoordinator};

/// Decides whether a failure should trigger (or wait for) an auth refresh.
///
/// Returns `false` when there is no failure, when the request opted out, when
/// the failure does not qualify, or when `owner` is paused and pausing is
/// enabled. A qualifying network failure without a response gets a synthetic
/// response carrying the original request so it can be replayed.
pub fn should_intercept(
    failed: Option<&mut FailedRequest>,
    options: &AuthRefreshOptions,
    owner: ClientId,
    coordinator: &RefreshCoordinator,
) -> bool {
    let Some(failed) = failed else {
        return false;
    };

    if failed.request.options().skip_auth_refresh {
        return false;
    }

    let network_failure = options.intercepts_network_errors() && failed.is_network_failure();
    if !network_failure && !qualifies(failed, options) {
        return false;
    }

    failed.ensure_response();

    !options.pauses_while_refreshing() || !coordinator.is_paused(owner)
}

fn qualifies(failed: &FailedRequest, options: &AuthRefreshOptions) -> bool {
    if failed.response.is_none() {
        return false;
    }
    match &options.should_refresh {
        Some(should_refresh) => should_refresh(failed),
        None => failed
            .status()
            .is_some_and(|status| options.status_codes().contains(&status)),
    }
}
