//! The guarded request handler.
//!
//! [`GuardedHandler`] sits between the listener and the application
//! handler. Every inbound request is first admitted with the
//! [`RequestTracker`]; admitted requests are forwarded downstream and
//! released when the downstream future finishes, on every exit path,
//! because the release rides on a guard's `Drop`. Rejected requests never
//! touch the downstream handler: they receive a content-negotiated
//! `503 Service Unavailable` carrying the shutdown reason.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;

use crate::negotiate::select_media_type;
use crate::tracker::{RequestTracker, ShutdownReason};

/// Type alias for HTTP response bodies produced by the scaffold.
pub type ResponseBody = Full<Bytes>;

/// Type alias for the HTTP responses produced by the scaffold.
pub type HttpResponse = Response<ResponseBody>;

/// Media types the rejection path can produce, in preference order.
const REJECTION_MEDIA_TYPES: [&str; 2] = ["text/plain", "application/json"];

/// The downstream handler contract.
///
/// Any async callable taking a request and producing a response will do;
/// the blanket implementation covers closures and fn pointers. The
/// scaffold puts no constraint on the handler's behavior other than that
/// its future eventually completes.
pub trait ScaffoldHandler<B>: Send + Sync + 'static {
    /// Handles one request.
    fn call(&self, req: Request<B>) -> Pin<Box<dyn Future<Output = HttpResponse> + Send>>;
}

impl<B, F, Fut> ScaffoldHandler<B> for F
where
    F: Fn(Request<B>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    fn call(&self, req: Request<B>) -> Pin<Box<dyn Future<Output = HttpResponse> + Send>> {
        Box::pin(self(req))
    }
}

/// Structured body for rejected requests when JSON is negotiated.
#[derive(Debug, Serialize)]
struct RejectionBody {
    /// Machine-readable category.
    error: &'static str,
    /// Human-readable shutdown reason.
    message: String,
}

/// Wraps a downstream handler with drain-aware admission control.
///
/// Cloning is cheap (the downstream handler is shared behind an `Arc`);
/// one clone per connection is the expected usage.
pub struct GuardedHandler<B> {
    tracker: RequestTracker,
    inner: Arc<dyn ScaffoldHandler<B>>,
}

impl<B> Clone for GuardedHandler<B> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> std::fmt::Debug for GuardedHandler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedHandler")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl<B: 'static> GuardedHandler<B> {
    /// Creates a guarded handler bound to the given tracker.
    pub fn new(tracker: RequestTracker, handler: impl ScaffoldHandler<B>) -> Self {
        Self {
            tracker,
            inner: Arc::new(handler),
        }
    }

    /// Serves one request.
    ///
    /// Admitted requests are forwarded downstream; the admission is
    /// released when this future completes, unwinds, or is dropped.
    /// Rejected requests get a 503 without the downstream handler ever
    /// being invoked.
    pub async fn serve(&self, req: Request<B>) -> HttpResponse {
        match self.tracker.try_admit().await {
            Ok(guard) => {
                let response = self.inner.call(req).await;
                drop(guard);
                response
            }
            Err(reason) => {
                tracing::debug!(%reason, "rejecting request, server is draining");
                reject(&req, &reason)
            }
        }
    }
}

/// Builds the content-negotiated 503 response for a rejected request.
fn reject<B>(req: &Request<B>, reason: &ShutdownReason) -> HttpResponse {
    let accept = req.headers().get(ACCEPT).and_then(|v| v.to_str().ok());
    let media_type = select_media_type(accept, &REJECTION_MEDIA_TYPES);

    let body = match media_type {
        "application/json" => {
            let payload = RejectionBody {
                error: "Stopping",
                message: reason.to_string(),
            };
            serde_json::to_string(&payload).unwrap_or_else(|_| reason.to_string())
        }
        _ => reason.to_string(),
    };

    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(CONTENT_TYPE, media_type)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Full::new(Bytes::from(reason.to_string())));
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            response
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use http_body_util::BodyExt;

    const GRACE: Duration = Duration::from_secs(30);

    /// A downstream handler that counts invocations and echoes 200.
    fn counting_handler(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(Request<String>) -> Pin<Box<dyn Future<Output = HttpResponse> + Send>> {
        move |_req| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Response::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from("ok")))
                    .unwrap()
            })
        }
    }

    fn request(accept: Option<&str>) -> Request<String> {
        let mut builder = Request::builder().uri("/");
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        builder.body(String::new()).unwrap()
    }

    async fn body_string(response: HttpResponse) -> String {
        let collected = response.into_body().collect().await.unwrap();
        String::from_utf8(collected.to_bytes().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn admitted_requests_reach_downstream() {
        let (tracker, _completion) = RequestTracker::start(GRACE);
        let calls = Arc::new(AtomicUsize::new(0));
        let guarded = GuardedHandler::new(tracker.clone(), counting_handler(Arc::clone(&calls)));

        let response = guarded.serve(request(None)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_runs_after_downstream_completes() {
        let (tracker, completion) = RequestTracker::start(GRACE);
        let calls = Arc::new(AtomicUsize::new(0));
        let guarded = GuardedHandler::new(tracker.clone(), counting_handler(calls));

        guarded.serve(request(None)).await;

        // The admission must have been released: an idle shutdown
        // completes immediately.
        tracker.trigger_shutdown(ShutdownReason::Stopping);
        tokio::time::timeout(Duration::from_millis(100), completion)
            .await
            .expect("request was not released");
    }

    #[tokio::test]
    async fn rejection_skips_downstream() {
        let (tracker, _completion) = RequestTracker::start(GRACE);
        let calls = Arc::new(AtomicUsize::new(0));
        let guarded = GuardedHandler::new(tracker.clone(), counting_handler(Arc::clone(&calls)));

        tracker.trigger_shutdown(ShutdownReason::Requested("going away".into()));
        let response = guarded.serve(request(None)).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejection_defaults_to_plain_text() {
        let (tracker, _completion) = RequestTracker::start(GRACE);
        let guarded = GuardedHandler::new(
            tracker.clone(),
            counting_handler(Arc::new(AtomicUsize::new(0))),
        );

        tracker.trigger_shutdown(ShutdownReason::Requested("going away".into()));
        let response = guarded.serve(request(None)).await;

        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        assert_eq!(body_string(response).await, "going away");
    }

    #[tokio::test]
    async fn rejection_negotiates_json() {
        let (tracker, _completion) = RequestTracker::start(GRACE);
        let guarded = GuardedHandler::new(
            tracker.clone(),
            counting_handler(Arc::new(AtomicUsize::new(0))),
        );

        tracker.trigger_shutdown(ShutdownReason::Requested("going away".into()));
        let response = guarded.serve(request(Some("application/json"))).await;

        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"], "Stopping");
        assert_eq!(body["message"], "going away");
    }

    #[tokio::test]
    async fn release_runs_when_downstream_future_is_dropped() {
        let (tracker, completion) = RequestTracker::start(GRACE);
        let guarded: GuardedHandler<String> = GuardedHandler::new(
            tracker.clone(),
            |_req: Request<String>| async {
                // Never completes; the serve future gets dropped instead.
                std::future::pending::<()>().await;
                Response::new(Full::new(Bytes::new()))
            },
        );

        let serve = tokio::spawn({
            let guarded = guarded.clone();
            async move { guarded.serve(request(None)).await }
        });

        // Let the request get admitted, then cancel it mid-handler.
        tokio::time::sleep(Duration::from_millis(20)).await;
        serve.abort();

        tracker.trigger_shutdown(ShutdownReason::Stopping);
        tokio::time::timeout(Duration::from_secs(1), completion)
            .await
            .expect("cancelled request must still release its admission");
    }
}
