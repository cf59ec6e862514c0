//! Request forwarding to Plant.id.
//!
//! One call to [`Forwarder::handle`] is one invocation: parse the caller's JSON,
//! validate it, normalize the images, send a single request upstream and turn
//! whatever happened into a [`ForwardResponse`]. Nothing is retried and nothing
//! outlives the invocation.

pub mod error;
pub mod normalize;
pub mod observer;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::dtos::{ForwardRequest, UpstreamPayload};
use crate::services::metrics::record_outcome;
use crate::services::{UpstreamClient, UpstreamReply};

pub use error::ForwardError;
pub use normalize::{normalize_image, normalize_images};
pub use observer::{ForwardEvent, ForwardObserver, NoopObserver, TracingObserver};

/// How results are presented to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{"success": bool, "message"?: string, "data"?: object}` envelope.
    Wrapped,
    /// Upstream status and body passed through as-is.
    Raw,
}

impl ResponseShape {
    /// Error body for failures that did not come from the upstream.
    pub fn error_body(&self, message: &str) -> Value {
        match self {
            ResponseShape::Wrapped => json!({ "success": false, "message": message }),
            ResponseShape::Raw => json!({ "error": message }),
        }
    }
}

impl FromStr for ResponseShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wrapped" => Ok(ResponseShape::Wrapped),
            "raw" => Ok(ResponseShape::Raw),
            other => Err(format!(
                "unknown response shape '{}', expected 'wrapped' or 'raw'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForwarderOptions {
    /// Reject requests without `latitude`/`longitude` instead of defaulting to 0.
    pub coordinates_required: bool,
    pub upstream_endpoint: String,
    pub response_shape: ResponseShape,
    /// Emit an event per pipeline step, not just the outcome.
    pub verbose_logging: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ForwardResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }
}

impl IntoResponse for ForwardResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Clone)]
pub struct Forwarder {
    options: ForwarderOptions,
    api_key: Option<Secret<String>>,
    upstream: Arc<dyn UpstreamClient>,
    observer: Arc<dyn ForwardObserver>,
}

impl Forwarder {
    pub fn new(
        options: ForwarderOptions,
        api_key: Option<Secret<String>>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            options,
            api_key,
            upstream,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ForwardObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Whether a non-empty API key is available.
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().is_empty())
    }

    /// Run one invocation. Every failure is converted into a response.
    #[tracing::instrument(skip_all, fields(endpoint = %self.options.upstream_endpoint))]
    pub async fn handle(&self, body: &[u8]) -> ForwardResponse {
        let response = match self.forward(body).await {
            Ok(response) => {
                record_outcome("success");
                response
            }
            Err(err) => {
                record_outcome(err.kind());
                let response = self.error_response(&err);
                self.observer.record(&ForwardEvent::Failed {
                    status: response.status.as_u16(),
                    message: &err.to_string(),
                });
                response
            }
        };

        self.observer.record(&ForwardEvent::Completed {
            status: response.status.as_u16(),
        });
        response
    }

    /// Validate a parsed request and build the upstream payload.
    pub fn prepare(&self, request: ForwardRequest) -> Result<UpstreamPayload, ForwardError> {
        let images = request
            .images
            .filter(|images| !images.is_empty())
            .ok_or(ForwardError::MissingImages)?;
        self.step(ForwardEvent::ImagesReceived {
            count: images.len(),
        });

        if self.options.coordinates_required {
            let mut missing = Vec::new();
            if request.latitude.is_none() {
                missing.push("latitude");
            }
            if request.longitude.is_none() {
                missing.push("longitude");
            }
            if !missing.is_empty() {
                return Err(ForwardError::MissingCoordinates(missing));
            }
        }

        Ok(UpstreamPayload {
            images: normalize_images(&images),
            latitude: request.latitude.unwrap_or(0.0),
            longitude: request.longitude.unwrap_or(0.0),
            similar_images: request.similar_images.unwrap_or(true),
        })
    }

    async fn forward(&self, body: &[u8]) -> Result<ForwardResponse, ForwardError> {
        let request: ForwardRequest = serde_json::from_slice(body)?;
        self.step(ForwardEvent::BodyParsed);

        let payload = self.prepare(request)?;

        let api_key = self
            .api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .filter(|key| !key.is_empty())
            .ok_or(ForwardError::MissingApiKey)?;
        self.step(ForwardEvent::ApiKeyResolved);

        let endpoint = self.options.upstream_endpoint.as_str();
        self.step(ForwardEvent::RequestSent { endpoint });

        let start = Instant::now();
        let reply = self.upstream.submit(endpoint, api_key, &payload).await?;
        self.step(ForwardEvent::ResponseReceived {
            status: reply.status,
            elapsed: start.elapsed(),
        });

        self.relay(reply)
    }

    fn relay(&self, reply: UpstreamReply) -> Result<ForwardResponse, ForwardError> {
        if reply.status != StatusCode::OK.as_u16() {
            return Err(ForwardError::Upstream(reply));
        }

        let body = match self.options.response_shape {
            ResponseShape::Wrapped => {
                let data = reply.json().ok_or_else(|| {
                    ForwardError::Unexpected("Plant.id returned a non-JSON body".to_string())
                })?;
                json!({ "success": true, "data": data })
            }
            ResponseShape::Raw => reply.body_value(),
        };

        Ok(ForwardResponse::new(StatusCode::OK, body))
    }

    fn error_response(&self, err: &ForwardError) -> ForwardResponse {
        let shape = self.options.response_shape;
        let body = match (shape, err) {
            (ResponseShape::Wrapped, ForwardError::Upstream(reply)) => json!({
                "success": false,
                "message": err.to_string(),
                "status_code": reply.status,
                "response": reply.body,
            }),
            (ResponseShape::Raw, ForwardError::Upstream(reply)) => reply.body_value(),
            _ => shape.error_body(&err.to_string()),
        };

        ForwardResponse::new(err.status(), body)
    }

    fn step(&self, event: ForwardEvent<'_>) {
        if self.options.verbose_logging {
            self.observer.record(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::UpstreamError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    enum Script {
        Reply(u16, &'static str),
        Timeout,
        Refused,
    }

    struct StubUpstream {
        script: Script,
        calls: AtomicUsize,
        last: Mutex<Option<(String, String, UpstreamPayload)>>,
    }

    impl StubUpstream {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamClient for StubUpstream {
        async fn submit(
            &self,
            endpoint: &str,
            api_key: &str,
            payload: &UpstreamPayload,
        ) -> Result<UpstreamReply, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() =
                Some((endpoint.to_string(), api_key.to_string(), payload.clone()));

            match &self.script {
                Script::Reply(status, body) => Ok(UpstreamReply {
                    status: *status,
                    body: body.to_string(),
                }),
                Script::Timeout => Err(UpstreamError::Timeout(Duration::from_secs(30))),
                Script::Refused => Err(UpstreamError::Transport("connection refused".into())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl ForwardObserver for RecordingObserver {
        fn record(&self, event: &ForwardEvent<'_>) {
            self.events.lock().unwrap().push(format!("{:?}", event));
        }
    }

    fn options(shape: ResponseShape) -> ForwarderOptions {
        ForwarderOptions {
            coordinates_required: false,
            upstream_endpoint: "https://plant.test/api/v3/health_assessment".to_string(),
            response_shape: shape,
            verbose_logging: true,
        }
    }

    fn forwarder(options: ForwarderOptions, upstream: Arc<StubUpstream>) -> Forwarder {
        Forwarder::new(options, Some(Secret::new("test-key".to_string())), upstream)
            .with_observer(Arc::new(NoopObserver))
    }

    #[tokio::test]
    async fn healthy_reply_is_wrapped() {
        let upstream = StubUpstream::new(Script::Reply(200, r#"{"result":"healthy"}"#));
        let forwarder = forwarder(options(ResponseShape::Wrapped), upstream.clone());

        let response = forwarder
            .handle(br#"{"images": ["abc123"], "latitude": 1.0, "longitude": 2.0}"#)
            .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            response.body,
            json!({ "success": true, "data": { "result": "healthy" } })
        );
        assert_eq!(upstream.calls(), 1);

        let (endpoint, key, payload) = upstream.last.lock().unwrap().clone().unwrap();
        assert_eq!(endpoint, "https://plant.test/api/v3/health_assessment");
        assert_eq!(key, "test-key");
        assert_eq!(payload.images, vec!["data:image/jpeg;base64,abc123"]);
        assert_eq!(payload.latitude, 1.0);
        assert_eq!(payload.longitude, 2.0);
        assert!(payload.similar_images);
    }

    #[tokio::test]
    async fn healthy_reply_is_passed_through_raw() {
        let upstream = StubUpstream::new(Script::Reply(200, r#"{"result":"healthy"}"#));
        let forwarder = forwarder(options(ResponseShape::Raw), upstream);

        let response = forwarder.handle(br#"{"images": ["abc123"]}"#).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, json!({ "result": "healthy" }));
    }

    #[tokio::test]
    async fn empty_images_are_rejected_without_calling_upstream() {
        let upstream = StubUpstream::new(Script::Reply(200, "{}"));
        let forwarder = forwarder(options(ResponseShape::Wrapped), upstream.clone());

        for body in [r#"{"images": []}"#, r#"{"latitude": 1.0}"#, r#"{"images": null}"#] {
            let response = forwarder.handle(body.as_bytes()).await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST);
            assert_eq!(response.body["message"], "No image data provided");
        }
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn required_coordinates_are_enforced() {
        let upstream = StubUpstream::new(Script::Reply(200, "{}"));
        let mut opts = options(ResponseShape::Wrapped);
        opts.coordinates_required = true;
        let forwarder = forwarder(opts, upstream.clone());

        let response = forwarder.handle(br#"{"images": ["abc"]}"#).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response.body["message"],
            "Missing required field(s): latitude, longitude"
        );

        let response = forwarder
            .handle(br#"{"images": ["abc"], "latitude": 49.2}"#)
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["message"], "Missing required field(s): longitude");

        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn optional_coordinates_default_to_zero() {
        let upstream = StubUpstream::new(Script::Reply(200, "{}"));
        let forwarder = forwarder(options(ResponseShape::Wrapped), upstream.clone());

        let response = forwarder
            .handle(br#"{"images": ["data:image/png;base64,AAAA"], "similar_images": false}"#)
            .await;
        assert_eq!(response.status, StatusCode::OK);

        let (_, _, payload) = upstream.last.lock().unwrap().clone().unwrap();
        assert_eq!(payload.images, vec!["data:image/png;base64,AAAA"]);
        assert_eq!(payload.latitude, 0.0);
        assert_eq!(payload.longitude, 0.0);
        assert!(!payload.similar_images);
    }

    #[tokio::test]
    async fn missing_api_key_is_a_server_error() {
        let upstream = StubUpstream::new(Script::Reply(200, "{}"));
        for key in [None, Some(Secret::new(String::new()))] {
            let forwarder = Forwarder::new(
                options(ResponseShape::Wrapped),
                key,
                upstream.clone(),
            );
            assert!(!forwarder.is_configured());

            let response = forwarder.handle(br#"{"images": ["abc"]}"#).await;
            assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(
                response.body,
                json!({ "success": false, "message": "API key not configured" })
            );
        }
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_body_echoes_parser_error() {
        let upstream = StubUpstream::new(Script::Reply(200, "{}"));
        let forwarder = forwarder(options(ResponseShape::Raw), upstream.clone());

        let response = forwarder.handle(b"{not json").await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = response.body["error"].as_str().unwrap();
        assert!(message.starts_with("Error processing request: "));
        assert!(message.contains("key must be a string"));
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn wrong_field_types_are_processing_errors() {
        let upstream = StubUpstream::new(Script::Reply(200, "{}"));
        let forwarder = forwarder(options(ResponseShape::Wrapped), upstream);

        let response = forwarder.handle(br#"{"images": [1, 2]}"#).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["success"], false);
    }

    #[tokio::test]
    async fn upstream_failure_status_is_propagated_wrapped() {
        let upstream = StubUpstream::new(Script::Reply(401, r#"{"error":"invalid api key"}"#));
        let forwarder = forwarder(options(ResponseShape::Wrapped), upstream);

        let response = forwarder.handle(br#"{"images": ["abc"]}"#).await;

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.body,
            json!({
                "success": false,
                "message": "Error from Plant.id API",
                "status_code": 401,
                "response": r#"{"error":"invalid api key"}"#,
            })
        );
    }

    #[tokio::test]
    async fn upstream_failure_body_is_verbatim_raw() {
        let upstream = StubUpstream::new(Script::Reply(429, "slow down"));
        let forwarder = forwarder(options(ResponseShape::Raw), upstream);

        let response = forwarder.handle(br#"{"images": ["abc"]}"#).await;

        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.body, json!("slow down"));
    }

    #[tokio::test]
    async fn non_json_success_body_is_unexpected_when_wrapped() {
        let upstream = StubUpstream::new(Script::Reply(200, "<html></html>"));
        let forwarder = forwarder(options(ResponseShape::Wrapped), upstream);

        let response = forwarder.handle(br#"{"images": ["abc"]}"#).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["success"], false);
    }

    #[tokio::test]
    async fn transport_failures_map_to_500_and_504() {
        let forwarder_refused =
            forwarder(options(ResponseShape::Wrapped), StubUpstream::new(Script::Refused));
        let response = forwarder_refused.handle(br#"{"images": ["abc"]}"#).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.body["message"],
            "Error processing request: connection refused"
        );

        let forwarder_timeout =
            forwarder(options(ResponseShape::Raw), StubUpstream::new(Script::Timeout));
        let response = forwarder_timeout.handle(br#"{"images": ["abc"]}"#).await;
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(response.body["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn verbose_logging_records_each_step() {
        let upstream = StubUpstream::new(Script::Reply(200, "{}"));
        let observer = Arc::new(RecordingObserver::default());
        let forwarder = forwarder(options(ResponseShape::Wrapped), upstream)
            .with_observer(observer.clone());

        forwarder.handle(br#"{"images": ["a", "b"]}"#).await;

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(events.len(), 6);
        assert_eq!(events[0], "BodyParsed");
        assert_eq!(events[1], "ImagesReceived { count: 2 }");
        assert_eq!(events[2], "ApiKeyResolved");
        assert!(events[3].starts_with("RequestSent"));
        assert!(events[4].starts_with("ResponseReceived { status: 200"));
        assert_eq!(events[5], "Completed { status: 200 }");
    }

    #[tokio::test]
    async fn quiet_logging_records_only_outcome() {
        let upstream = StubUpstream::new(Script::Reply(200, "{}"));
        let observer = Arc::new(RecordingObserver::default());
        let mut opts = options(ResponseShape::Wrapped);
        opts.verbose_logging = false;
        let forwarder = forwarder(opts, upstream).with_observer(observer.clone());

        forwarder.handle(br#"{"images": []}"#).await;

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                r#"Failed { status: 400, message: "No image data provided" }"#.to_string(),
                "Completed { status: 400 }".to_string(),
            ]
        );
    }

    #[test]
    fn response_shapes_parse_case_insensitively() {
        assert_eq!("Wrapped".parse::<ResponseShape>().unwrap(), ResponseShape::Wrapped);
        assert_eq!("raw".parse::<ResponseShape>().unwrap(), ResponseShape::Raw);
        assert!("envelope".parse::<ResponseShape>().is_err());
    }
}
