use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

use crate::{HttpRequest, HttpResponse, TransportError, TransportOptions};

/// Issues a request over the network and yields the fully-read response.
///
/// Non-success statuses are responses, not errors.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    options: TransportOptions,
}

impl ReqwestTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            options: TransportOptions::default(),
        }
    }

    /// Applies transport options such as the request timeout.
    pub fn with_options(mut self, opts: TransportOptions) -> Self {
        self.options = opts;
        self
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method().clone(), request.url())
            .headers(request.headers().clone())
            .timeout(Duration::from_millis(self.options.timeout_ms));
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(HttpResponse::new(status, url)
            .with_headers(headers)
            .with_body(body))
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        self.execute(request).boxed()
    }
}
