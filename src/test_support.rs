use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use futures::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;

use crate::{HttpRequest, HttpResponse, Outcome, Transport};

type Handler = dyn Fn(&HttpRequest) -> Outcome + Send + Sync;

/// In-memory transport that records requests and answers from a handler.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    hits: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Outcome + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn always(status: StatusCode) -> Self {
        Self::new(move |request| Ok(HttpResponse::new(status, request.url())))
    }

    /// Pops outcomes in order; once exhausted every call answers 500.
    pub(crate) fn sequence(outcomes: Vec<Outcome>) -> Self {
        let queue = Mutex::new(VecDeque::from(outcomes));
        Self::new(move |request| {
            queue
                .lock()
                .expect("outcome queue mutex must not be poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(HttpResponse::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        request.url(),
                    ))
                })
        })
    }

    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("request log mutex must not be poisoned")
            .clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Outcome> {
        async move {
            tokio::task::yield_now().await;
            self.hits.fetch_add(1, Ordering::SeqCst);
            let outcome = (self.handler)(&request);
            self.requests
                .lock()
                .expect("request log mutex must not be poisoned")
                .push(request);
            outcome
        }
        .boxed()
    }
}
