//! HTTP types used throughout the pipeline.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;
use hyper::body::Body;
use rampart_core::{ErrorBody, PipelineError, PipelineResult};

/// The HTTP request type used in the pipeline.
///
/// The server collects the body before the pipeline runs.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Response constructors that never fail.
pub trait ResponseExt {
    /// A response with `status` and an empty body.
    fn empty(status: StatusCode) -> Response;

    /// A `text/plain` response.
    fn text(status: StatusCode, body: impl Into<Bytes>) -> Response;

    /// An `application/json` response.
    fn json(status: StatusCode, body: impl Into<Bytes>) -> Response;

    /// The wire form of a pipeline error.
    fn from_error(err: &PipelineError, correlation_id: &str) -> Response;

    /// Length of the body in bytes, when known.
    fn body_len(&self) -> u64;
}

impl ResponseExt for Response {
    fn empty(status: StatusCode) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }

    fn text(status: StatusCode, body: impl Into<Bytes>) -> Response {
        with_content_type(status, body.into(), "text/plain; charset=utf-8")
    }

    fn json(status: StatusCode, body: impl Into<Bytes>) -> Response {
        with_content_type(status, body.into(), "application/json")
    }

    fn from_error(err: &PipelineError, correlation_id: &str) -> Response {
        let body = err.to_body(correlation_id).to_bytes();
        let mut response = with_content_type(err.status(), body, ErrorBody::CONTENT_TYPE);
        if let Some(retry_after) = err.retry_after() {
            let secs =
                (retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)).max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }

    fn body_len(&self) -> u64 {
        self.body().size_hint().exact().unwrap_or(0)
    }
}

fn with_content_type(status: StatusCode, body: Bytes, content_type: &'static str) -> Response {
    let mut response = http::Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Status carried by a pipeline result.
pub fn result_status(result: &PipelineResult<Response>) -> StatusCode {
    match result {
        Ok(response) => response.status(),
        Err(err) => err.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    #[test]
    fn test_text_response() {
        let response = Response::text(StatusCode::OK, "ok");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.body_len(), 2);
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let err = PipelineError::rate_limited("slow down", Some(Duration::from_millis(1500)));
        let response = Response::from_error(&err, "corr-1");

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "2");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            ErrorBody::CONTENT_TYPE
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "rate-limited");
        assert_eq!(body["correlation_id"], "corr-1");
    }

    #[test]
    fn test_result_status() {
        assert_eq!(
            result_status(&Err(PipelineError::forbidden("no"))),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            result_status(&Ok(Response::empty(StatusCode::NO_CONTENT))),
            StatusCode::NO_CONTENT
        );
    }
}
