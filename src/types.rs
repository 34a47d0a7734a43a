use std::fmt;

use bytes::Bytes;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{AuthRefreshOptions, TransportError};

/// Per-call configuration carried by an [`HttpRequest`].
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Opts this single call out of auth-refresh interception.
    pub skip_auth_refresh: bool,
    /// Overrides merged on top of the hook's instance options.
    pub auth_refresh: AuthRefreshOptions,
}

/// An outgoing request, owned so it can be replayed after a refresh.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    options: RequestOptions,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Adds a header. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Sets `Authorization: Bearer <token>`, replacing any previous value.
    pub fn bearer_auth(mut self, token: &str) -> Self {
        self.set_bearer_auth(token);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON body and sets the content type.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(value)?;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn skip_auth_refresh(mut self) -> Self {
        self.options.skip_auth_refresh = true;
        self
    }

    pub fn auth_refresh_options(mut self, options: AuthRefreshOptions) -> Self {
        self.options.auth_refresh = options;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut RequestOptions {
        &mut self.options
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
    }

    pub fn set_bearer_auth(&mut self, token: &str) {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token.trim())) {
            self.headers.insert(header::AUTHORIZATION, value);
        }
    }
}

/// A fully-read HTTP response.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    status: StatusCode,
    url: String,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, url: impl Into<String>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// A response status as reported by a failure, numeric or textual.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Code(u16),
    Text(String),
}

impl Status {
    /// Integer value of the status.
    ///
    /// Text is read like a leading-integer parse: surrounding whitespace and a
    /// `+` sign are accepted, trailing garbage is ignored, no digits is `None`.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Code(code) => Some(*code),
            Self::Text(text) => {
                let trimmed = text.trim_start();
                let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
                let end = unsigned
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(unsigned.len());
                unsigned[..end].parse().ok()
            }
        }
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Self::Code(code)
    }
}

impl From<StatusCode> for Status {
    fn from(status: StatusCode) -> Self {
        Self::Code(status.as_u16())
    }
}

impl From<&str> for Status {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Status {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Response half of a failure: its status plus the request to replay.
#[derive(Clone, Debug)]
pub struct FailedResponse {
    pub status: Status,
    pub headers: HeaderMap,
    pub request: HttpRequest,
}

impl FailedResponse {
    pub fn new(status: impl Into<Status>, request: HttpRequest) -> Self {
        Self {
            status: status.into(),
            headers: HeaderMap::new(),
            request,
        }
    }
}

/// Context handed to the interception predicate, the refresher and the retry.
#[derive(Clone, Debug)]
pub struct FailedRequest {
    pub request: HttpRequest,
    pub response: Option<FailedResponse>,
    pub error: Option<TransportError>,
}

impl FailedRequest {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            response: None,
            error: None,
        }
    }

    pub fn with_response(mut self, response: FailedResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_error(mut self, error: TransportError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn from_response(request: &HttpRequest, response: &HttpResponse) -> Self {
        let failed = FailedResponse {
            status: response.status().into(),
            headers: response.headers().clone(),
            request: request.clone(),
        };
        Self::new(request.clone()).with_response(failed)
    }

    /// Errors carrying an HTTP status keep a response; pure network failures do not.
    pub fn from_error(request: &HttpRequest, error: &TransportError) -> Self {
        let failed = Self::new(request.clone()).with_error(error.clone());
        if error.is_network_failure() {
            failed
        } else {
            let response = FailedResponse::new(error.status(), request.clone());
            failed.with_response(response)
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().and_then(|response| response.status.code())
    }

    /// Returns `true` for a transport failure that never reached HTTP.
    pub fn is_network_failure(&self) -> bool {
        self.response.is_none()
            && self
                .error
                .as_ref()
                .is_some_and(TransportError::is_network_failure)
    }

    /// The request a retry should replay.
    pub fn retry_request(&self) -> &HttpRequest {
        self.response
            .as_ref()
            .map_or(&self.request, |response| &response.request)
    }

    pub(crate) fn ensure_response(&mut self) {
        if self.response.is_none() {
            self.response = Some(FailedResponse::new(0u16, self.request.clone()));
        }
    }
}
