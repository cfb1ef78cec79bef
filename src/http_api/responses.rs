use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;

use crate::error::Error;

pub fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

pub fn bytes_response(content_type: &str, etag: &str, data: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(data));
    let headers = response.headers_mut();
    if let Ok(value) = header::HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = header::HeaderValue::from_str(&format!("\"{etag}\"")) {
        headers.insert(header::ETAG, value);
    }
    response
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        Error::InvalidResource(_) | Error::ResourceNotFound(_) => StatusCode::NOT_FOUND,
        Error::ResourceExists(_) | Error::InvalidAction(_) => StatusCode::CONFLICT,
        Error::InvalidResourceType(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::RequestDataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::InvalidParameters(_) => StatusCode::BAD_REQUEST,
        Error::InvalidConfig(_) | Error::DefaultServerError(_) | Error::Backend(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Error body: `{"error": CODE, "message": ..., "status": ...}`.
pub fn error_response(err: &Error) -> Response<Full<Bytes>> {
    let status = status_for(err);
    let body = serde_json::json!({
        "error": err.code(),
        "message": err.to_string(),
        "status": status.as_u16(),
    });
    json_response(status, &body)
}

pub fn not_found() -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "NOT_FOUND",
        "message": "Not Found",
        "status": 404,
    });
    json_response(StatusCode::NOT_FOUND, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&Error::ResourceExists("a".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::RequestDataTooLarge { size: 2, limit: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_for(&Error::NotImplemented("download")),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            status_for(&Error::InvalidResource("x".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_error_body_carries_code() {
        let response = error_response(&Error::InvalidAction("loop".into()));
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
    }
}
