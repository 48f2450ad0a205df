//! Serving one inbound stream.
//!
//! # Flow
//! ```text
//! read request header frames
//!     → validate lengths, route, body size and encoding
//!     → BAD_REQUEST / NOT_FOUND + close          (on any problem)
//!     → OK, switch encoding, read body
//!     → run endpoint handler
//!     → send response (+ body), close
//! ```

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::encode::EncodeHandler;
use crate::error::CepticError;
use crate::message::{Request, Response, StatusCode, COMMAND_LENGTH, ENDPOINT_LENGTH};
use crate::observability::metrics;
use crate::routing::{EndpointManager, EndpointValue};
use crate::stream::handler::StreamHandler;

/// Room for the command, endpoint and separators around the JSON headers.
const REQUEST_OVERHEAD: usize = COMMAND_LENGTH + ENDPOINT_LENGTH + 4;

/// Check a parsed request and resolve its endpoint.
///
/// On failure returns the status to answer with and the collected errors.
pub(crate) fn validate(
    request: &mut Request,
    endpoints: &EndpointManager,
    config: &ServerConfig,
) -> Result<EndpointValue, (StatusCode, Vec<String>)> {
    let mut errors = Vec::new();
    if request.command().len() > COMMAND_LENGTH {
        errors.push(format!(
            "command too long; should be no more than {} but was {}",
            COMMAND_LENGTH,
            request.command().len()
        ));
    }
    if request.endpoint().len() > ENDPOINT_LENGTH {
        errors.push(format!(
            "endpoint too long; should be no more than {} but was {}",
            ENDPOINT_LENGTH,
            request.endpoint().len()
        ));
    }
    if !errors.is_empty() {
        return Err((StatusCode::BAD_REQUEST, errors));
    }

    request.split_query();
    let value = match endpoints.get_endpoint(request.command(), request.endpoint()) {
        Ok(value) => value,
        Err(e @ CepticError::NotFound { .. }) => return Err((StatusCode::NOT_FOUND, vec![e.to_string()])),
        Err(e) => return Err((StatusCode::BAD_REQUEST, vec![e.to_string()])),
    };

    let body_max = value.settings.body_max.unwrap_or(config.body_max) as u64;
    if let Some(length) = request.headers().content_length {
        if length > body_max {
            errors.push(format!(
                "Content-Length ({}) exceeds server's allowed max body length of {}",
                length, body_max
            ));
        }
    }
    if let Err(e) = EncodeHandler::from_header(request.headers().encoding.as_deref()) {
        errors.push(e.to_string());
    }

    if errors.is_empty() {
        Ok(value)
    } else {
        Err((StatusCode::BAD_REQUEST, errors))
    }
}

/// Serve a stream opened by a client, closing it when done.
pub(crate) async fn serve_stream(
    stream: Arc<StreamHandler>,
    endpoints: &EndpointManager,
    config: &ServerConfig,
) {
    let start = Instant::now();
    let timeout = stream.settings().timeout();
    let stream_id = stream.stream_id();

    let raw = match stream
        .receive_data(timeout, stream.settings().headers_max_size + REQUEST_OVERHEAD)
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(stream_id = %stream_id, error = %e, "Failed to read request");
            stream.send_close("failed to read request").await;
            return;
        }
    };

    let mut request = match Request::from_bytes(&raw) {
        Ok(request) => request,
        Err(e) => {
            reject(&stream, StatusCode::BAD_REQUEST, vec![e.to_string()]).await;
            return;
        }
    };

    let value = match validate(&mut request, endpoints, config) {
        Ok(value) => value,
        Err((status, errors)) => {
            tracing::debug!(
                stream_id = %stream_id,
                command = %request.command(),
                endpoint = %request.endpoint(),
                status = %status,
                "Request rejected"
            );
            reject(&stream, status, errors).await;
            metrics::record_request(request.command(), status.as_u16(), start);
            return;
        }
    };

    if let Err(e) = stream.send_response(&Response::new(StatusCode::OK)).await {
        tracing::debug!(stream_id = %stream_id, error = %e, "Failed to accept request");
        stream.send_close("failed to accept request").await;
        return;
    }
    if let Err(e) = stream.set_encode(request.headers().encoding.as_deref()) {
        stream.send_close(&e.to_string()).await;
        return;
    }

    if let Some(length) = request.headers().body_length() {
        match stream.receive_body(timeout, length as usize).await {
            Ok(body) => request.fill_body(body),
            Err(e) => {
                tracing::debug!(stream_id = %stream_id, error = %e, "Failed to read request body");
                stream.send_close("failed to read request body").await;
                return;
            }
        }
    }

    request.values = value.values;
    request.set_stream(stream.clone());
    let command = request.command().to_string();
    let response = (value.handler)(request).await;

    if stream.is_stopped() {
        metrics::record_request(&command, response.status().as_u16(), start);
        return;
    }

    if let Err(e) = stream.send_response(&response).await {
        tracing::debug!(stream_id = %stream_id, error = %e, "Failed to send response");
        stream.send_close("Server stream exception occurred").await;
        return;
    }
    if response.headers().body_length().is_some() {
        if let Err(e) = stream.send(response.body().to_vec()).await {
            tracing::debug!(stream_id = %stream_id, error = %e, "Failed to send response body");
            stream.send_close("Server stream exception occurred").await;
            return;
        }
    }

    metrics::record_request(&command, response.status().as_u16(), start);
    stream.send_close("Server command complete").await;
}

async fn reject(stream: &StreamHandler, status: StatusCode, errors: Vec<String>) {
    let response = Response::new(status).with_errors(errors);
    if let Err(e) = stream.send_response(&response).await {
        tracing::debug!(stream_id = %stream.stream_id(), error = %e, "Failed to send rejection");
    }
    stream.send_close("request rejected").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::handler;

    fn endpoints() -> EndpointManager {
        let endpoints = EndpointManager::new(100);
        endpoints.add_command("get", None);
        endpoints
            .add_endpoint("get", "items/<id>", handler(|_| async { Response::new(StatusCode::OK) }), None)
            .unwrap();
        endpoints
    }

    fn request(endpoint: &str) -> Request {
        Request::from_bytes(format!("get\r\n{}\r\n{{}}", endpoint).as_bytes()).unwrap()
    }

    #[test]
    fn test_valid_request_resolves() {
        let mut request = request("items/7?verbose=1");
        let value = validate(&mut request, &endpoints(), &ServerConfig::default()).unwrap();
        assert_eq!(value.values.get("id").map(String::as_str), Some("7"));
        assert_eq!(request.query_params.get("verbose").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_unknown_route_is_not_found() {
        let mut request = request("missing");
        let (status, errors) = validate(&mut request, &endpoints(), &ServerConfig::default()).unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_long_endpoint_is_bad_request() {
        let mut request = request(&"a".repeat(ENDPOINT_LENGTH + 1));
        let (status, _) = validate(&mut request, &endpoints(), &ServerConfig::default()).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_body_and_encoding_checked() {
        let mut request = request("items/1");
        request.headers_mut().content_length = Some(101);
        request.headers_mut().encoding = Some("zip".to_string());
        let (status, errors) = validate(&mut request, &endpoints(), &ServerConfig::default()).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(errors.len(), 2);
    }
}
