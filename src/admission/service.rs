use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use futures::future::{Ready, ready};
use pin_project::pin_project;
use tower::Service;

use super::{
    AdmissionController, AdmissionError, Decision,
    error::{MissingClientIdSnafu, RejectedSnafu},
};
use crate::Error;

/// Identifier used for requests the extractor cannot attribute to a client.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Pulls the client identifier (usually the peer IP) out of a request.
pub trait ClientIdExtractor<Req> {
    fn client_id(&self, request: &Req) -> Option<String>;
}

impl<Req, F> ClientIdExtractor<Req> for F
where
    F: Fn(&Req) -> Option<String>,
{
    fn client_id(&self, request: &Req) -> Option<String> {
        self(request)
    }
}

/// Uses the IP of the `SocketAddr` a server stored in the request extensions.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeerAddr;

impl<B> ClientIdExtractor<http::Request<B>> for PeerAddr {
    fn client_id(&self, request: &http::Request<B>) -> Option<String> {
        request
            .extensions()
            .get::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
    }
}

/// Gates an inner service behind an [`AdmissionController`].
///
/// Rejected requests resolve to an [`AdmissionError`] without reaching the inner service.
#[derive(Clone, Debug)]
pub struct AdmissionService<S, E> {
    inner: S,
    controller: AdmissionController,
    extractor: E,
    reject_unidentified: bool,
}

impl<S, E> AdmissionService<S, E> {
    pub fn new(
        inner: S,
        controller: AdmissionController,
        extractor: E,
        reject_unidentified: bool,
    ) -> Self {
        Self {
            inner,
            controller,
            extractor,
            reject_unidentified,
        }
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, E, Req> Service<Req> for AdmissionService<S, E>
where
    S: Service<Req>,
    S::Error: Into<Error>,
    E: ClientIdExtractor<Req>,
{
    type Response = S::Response;
    type Error = Error;
    type Future = ResponseFuture<S::Future, S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Req) -> Self::Future {
        let client_id = match self.extractor.client_id(&request) {
            Some(client_id) => client_id,
            None if self.reject_unidentified => {
                debug!(message = "Rejecting request without client identifier.");
                return ResponseFuture::rejected(MissingClientIdSnafu.build());
            }
            None => UNKNOWN_CLIENT.to_owned(),
        };

        match self.controller.check(&client_id) {
            Decision::Rejected(tier) => {
                ResponseFuture::rejected(RejectedSnafu { client_id, tier }.build())
            }
            _ => ResponseFuture::admitted(self.inner.call(request)),
        }
    }
}

/// Future returned by [`AdmissionService`].
#[pin_project(project = ResponseFutureProj)]
pub enum ResponseFuture<F, T> {
    Admitted {
        #[pin]
        future: F,
    },
    Rejected {
        #[pin]
        rejection: Ready<Result<T, Error>>,
    },
}

impl<F, T> ResponseFuture<F, T> {
    fn admitted(future: F) -> Self {
        ResponseFuture::Admitted { future }
    }

    fn rejected(error: AdmissionError) -> Self {
        let error: Error = Box::new(error);
        ResponseFuture::Rejected {
            rejection: ready(Err(error)),
        }
    }
}

impl<F, T, E> Future for ResponseFuture<F, T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<Error>,
{
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Admitted { future } => future.poll(cx).map_err(Into::into),
            ResponseFutureProj::Rejected { rejection } => rejection.poll(cx),
        }
    }
}
