use crate::{Client, FailedRequest, HttpRequest, OnRetry, Outcome};

/// Replays the request behind `failed` through `client`.
///
/// The optional transform runs first; the replayed request is rebuilt from the
/// transformed method, URL, headers and body and always bypasses auth-refresh
/// interception. The outcome is returned as-is.
pub async fn retry(failed: &FailedRequest, client: &Client, on_retry: Option<&OnRetry>) -> Outcome {
    let original = failed.retry_request().clone();
    let transformed = match on_retry {
        Some(on_retry) => on_retry(original).await,
        None => original,
    };

    let mut request = HttpRequest::new(transformed.method().clone(), transformed.url());
    *request.headers_mut() = transformed.headers().clone();
    request.set_body(transformed.body_bytes().cloned());
    let request = request.skip_auth_refresh();

    #[cfg(feature = "tracing")]
    tracing::debug!(
        method = %request.method(),
        url = request.url(),
        client = %client.id(),
        "retrying request after auth refresh"
    );

    client.send(request).await
}

#[cfg(test)]
mod tests {
    use reqwest::{header, Method, StatusCode};

    use super::retry;
    use crate::{
        test_support::ScriptedTransport, AuthRefreshOptions, Client, FailedRequest, HttpRequest,
        HttpResponse,
    };

    fn failed(request: &HttpRequest) -> FailedRequest {
        let response = HttpResponse::new(StatusCode::UNAUTHORIZED, request.url());
        FailedRequest::from_response(request, &response)
    }

    #[tokio::test]
    async fn replays_method_url_headers_and_body_with_bypass() {
        let transport = ScriptedTransport::always(StatusCode::OK);
        let client = Client::new(transport.clone());
        let request = HttpRequest::put("http://api/items/1")
            .header("x-trace", "abc")
            .body("data")
            .auth_refresh_options(AuthRefreshOptions::default().with_status_codes([403]));

        let outcome = retry(&failed(&request), &client, None).await;
        assert_eq!(outcome.map(|r| r.status()).ok(), Some(StatusCode::OK));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method(), &Method::PUT);
        assert_eq!(sent[0].url(), "http://api/items/1");
        assert_eq!(
            sent[0].headers().get("x-trace").map(|v| v.as_bytes()),
            Some(&b"abc"[..])
        );
        assert_eq!(sent[0].body_bytes().map(|b| &b[..]), Some(&b"data"[..]));
        assert!(sent[0].options().skip_auth_refresh);
        assert!(sent[0].options().auth_refresh.status_codes.is_none());
    }

    #[tokio::test]
    async fn transform_rewrites_request_before_replay() {
        let transport = ScriptedTransport::always(StatusCode::OK);
        let client = Client::new(transport.clone());
        let options = AuthRefreshOptions::default().with_on_retry(|mut request: HttpRequest| async move {
            request.set_bearer_auth("fresh");
            request.set_url("http://api/v2/me");
            request
        });

        let request = HttpRequest::get("http://api/me").bearer_auth("stale");
        let _ = retry(&failed(&request), &client, options.on_retry.as_ref()).await;

        let sent = transport.requests();
        assert_eq!(sent[0].url(), "http://api/v2/me");
        assert_eq!(
            sent[0]
                .headers()
                .get(header::AUTHORIZATION)
                .map(|v| v.as_bytes()),
            Some(&b"Bearer fresh"[..])
        );
    }

    #[tokio::test]
    async fn transport_failure_is_returned_unchanged() {
        let transport = ScriptedTransport::new(|_request| {
            Err(crate::TransportError::network("connection reset"))
        });
        let client = Client::new(transport);
        let request = HttpRequest::get("http://api/me");

        let outcome = retry(&failed(&request), &client, None).await;
        let err = outcome.expect_err("retry must surface the transport error");
        assert_eq!(err.message(), "connection reset");
    }
}
