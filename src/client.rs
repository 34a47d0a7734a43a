use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::future::BoxFuture;

use crate::{
    HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError, TransportOptions,
};

/// Result of one transport call as seen by interceptors.
pub type Outcome = Result<HttpResponse, TransportError>;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a client handle.
///
/// Clones share an id; [`Client::extend`] allocates a new one.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Hook invoked after every transport call with the original request.
///
/// The request carries its per-call options. The interceptor returns either
/// the outcome it was given or a substitute.
pub trait ResponseInterceptor: Send + Sync {
    fn intercept<'a>(&'a self, request: &'a HttpRequest, outcome: Outcome)
        -> BoxFuture<'a, Outcome>;
}

#[derive(Clone)]
/// HTTP client handle: a transport plus an ordered chain of interceptors.
pub struct Client {
    id: ClientId,
    transport: Arc<dyn Transport>,
    interceptors: Vec<Arc<dyn ResponseInterceptor>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl Client {
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self::from_shared_transport(Arc::new(transport))
    }

    /// Creates a client over an already shared transport.
    pub fn from_shared_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            id: ClientId::next(),
            transport,
            interceptors: Vec::new(),
        }
    }

    /// Creates a client backed by a default `reqwest::Client`.
    pub fn reqwest() -> Self {
        Self::from_reqwest(reqwest::Client::new())
    }

    pub fn from_reqwest(http: reqwest::Client) -> Self {
        Self::new(ReqwestTransport::new(http))
    }

    pub fn from_reqwest_with_options(http: reqwest::Client, opts: TransportOptions) -> Self {
        Self::new(ReqwestTransport::new(http).with_options(opts))
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Derives a new client with `interceptor` appended to the chain.
    ///
    /// `self` is left untouched; the returned handle gets its own identity.
    pub fn extend<I>(&self, interceptor: I) -> Client
    where
        I: ResponseInterceptor + 'static,
    {
        let mut interceptors = self.interceptors.clone();
        interceptors.push(Arc::new(interceptor));
        Client {
            id: ClientId::next(),
            transport: Arc::clone(&self.transport),
            interceptors,
        }
    }

    /// Sends a request through the transport and then every interceptor in order.
    pub async fn send(&self, request: HttpRequest) -> Outcome {
        let mut outcome = self.transport.send(request.clone()).await;
        for interceptor in &self.interceptors {
            outcome = interceptor.intercept(&request, outcome).await;
        }
        outcome
    }
}
