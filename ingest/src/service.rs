//! The HTTP-facing side of the pipeline.
//!
//! A form post moves through three phases: the body is read in full
//! (exactly `Content-Length` bytes), handed to the [`Dispatcher`], and
//! answered with a redirect to the confirmation page. Only a failure while
//! reading the body is visible to the client; whatever happens downstream
//! of the handoff is logged and the redirect is sent regardless.

use crate::codec;
use crate::metrics_defs::{REQUEST_DURATION, RELAY_SEND_FAILED, SUBMISSIONS_RECEIVED};
use crate::relay::RelaySender;
use crate::routes::RouteTable;
use crate::store::StoreHandle;
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_LENGTH, LOCATION};
use hyper::service::Service;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use shared::http::{ResponseBody, full_body, make_boxed_error_response};
use shared::{counter, histogram};
use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Where accepted bodies go once they have been read.
#[derive(Clone, Debug)]
pub enum Dispatcher {
    /// Forward the raw bytes to the receive loop; no parsing on this path.
    Relay(Arc<RelaySender>),
    /// Decode here and append through the single store writer.
    Direct(StoreHandle),
}

impl Dispatcher {
    async fn dispatch(&self, body: Bytes) {
        match self {
            Dispatcher::Relay(sender) => {
                if let Err(e) = sender.send(&body).await {
                    counter!(RELAY_SEND_FAILED, "reason" => e.reason()).increment(1);
                    tracing::error!(error = %e, size = body.len(), "Failed to relay submission");
                }
            }
            Dispatcher::Direct(store) => {
                let submission = match codec::decode(&body) {
                    Ok(submission) => submission,
                    Err(e) => {
                        tracing::error!(error = %e, "Discarding malformed submission");
                        return;
                    }
                };
                match store.append(submission).await {
                    Ok(key) => tracing::info!(key = %key, "Submission stored"),
                    Err(e) => tracing::error!(error = %e, "Failed to store submission"),
                }
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum BodyError {
    #[error("missing Content-Length header")]
    MissingLength,

    #[error("unparsable Content-Length header")]
    InvalidLength,

    #[error("declared body of {declared} bytes exceeds the {limit}-byte limit")]
    TooLarge { declared: usize, limit: usize },

    #[error("failed to read request body: {0}")]
    Read(Box<dyn StdError + Send + Sync>),

    #[error("request body ended after {received} of {declared} bytes")]
    Truncated { declared: usize, received: usize },
}

impl BodyError {
    fn status(&self) -> StatusCode {
        match self {
            BodyError::MissingLength => StatusCode::LENGTH_REQUIRED,
            BodyError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::InvalidLength | BodyError::Read(_) | BodyError::Truncated { .. } => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

struct Inner {
    routes: RouteTable,
    dispatcher: Dispatcher,
    confirmation_location: String,
    max_body_size: usize,
}

/// Serves pages on GET and accepts form posts on any path.
#[derive(Clone)]
pub struct IngestService {
    inner: Arc<Inner>,
}

impl IngestService {
    pub fn new(
        routes: RouteTable,
        dispatcher: Dispatcher,
        confirmation_location: impl Into<String>,
        max_body_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                routes,
                dispatcher,
                confirmation_location: confirmation_location.into(),
                max_body_size,
            }),
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let start = Instant::now();
        let method = req.method().clone();

        let response = match method {
            Method::GET => {
                let path = req.uri().path().to_owned();
                self.inner.routes.respond(&path).await
            }
            Method::POST => self.accept_submission(req).await,
            _ => make_boxed_error_response(StatusCode::NOT_IMPLEMENTED),
        };

        histogram!(
            REQUEST_DURATION,
            "method" => method.to_string(),
            "status" => response.status().as_u16().to_string()
        )
        .record(start.elapsed().as_secs_f64());
        response
    }

    async fn accept_submission<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let body = match self.read_body(req).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting submission");
                return make_boxed_error_response(e.status());
            }
        };
        counter!(SUBMISSIONS_RECEIVED).increment(1);

        self.inner.dispatcher.dispatch(body).await;

        redirect(&self.inner.confirmation_location)
    }

    async fn read_body<B>(&self, req: Request<B>) -> Result<Bytes, BodyError>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let declared = declared_length(req.headers())?;
        if declared > self.inner.max_body_size {
            return Err(BodyError::TooLarge {
                declared,
                limit: self.inner.max_body_size,
            });
        }

        let body = Limited::new(req.into_body(), declared)
            .collect()
            .await
            .map_err(BodyError::Read)?
            .to_bytes();

        if body.len() != declared {
            return Err(BodyError::Truncated {
                declared,
                received: body.len(),
            });
        }
        Ok(body)
    }
}

impl<B> Service<Request<B>> for IngestService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

fn declared_length(headers: &HeaderMap) -> Result<usize, BodyError> {
    let value = headers
        .get(CONTENT_LENGTH)
        .ok_or(BodyError::MissingLength)?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or(BodyError::InvalidLength)
}

fn redirect(location: &str) -> Response<ResponseBody> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = StatusCode::FOUND;
    if let Ok(value) = location.parse() {
        response.headers_mut().insert(LOCATION, value);
    }
    response
}
