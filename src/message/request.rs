//! Requests sent by clients and routed by servers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CepticError, Result};
use crate::message::headers::Headers;
use crate::message::response::Response;
use crate::message::status::StatusCode;
use crate::message::DEFAULT_PORT;
use crate::stream::handler::StreamHandler;

#[derive(Debug, Clone, Default)]
pub struct Request {
    command: String,
    url: String,
    endpoint: String,
    host: String,
    port: u16,
    headers: Headers,
    body: Vec<u8>,
    /// Path variables extracted by the router.
    pub values: HashMap<String, String>,
    pub query_string: Option<String>,
    pub query_params: HashMap<String, String>,
    stream: Option<Arc<StreamHandler>>,
}

impl Request {
    /// Build a client request for `url` of the form `host[:port][/endpoint]`.
    pub fn new(command: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            url: url.into(),
            port: DEFAULT_PORT,
            ..Default::default()
        }
    }

    fn with_endpoint(command: String, endpoint: String, headers: Headers) -> Self {
        Self {
            command,
            endpoint,
            headers,
            port: DEFAULT_PORT,
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.set_body(body);
        self
    }

    pub fn with_exchange(mut self, exchange: bool) -> Self {
        self.headers.exchange = exchange;
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.headers.encoding = Some(encoding.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn exchange(&self) -> bool {
        self.headers.exchange
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replace the body and keep Content-Length in step.
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.headers.content_length = Some(body.len() as u64);
        self.body = body;
    }

    pub(crate) fn fill_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    pub fn stream(&self) -> Option<&Arc<StreamHandler>> {
        self.stream.as_ref()
    }

    pub(crate) fn set_stream(&mut self, stream: Arc<StreamHandler>) {
        self.stream = Some(stream);
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: String) {
        self.endpoint = endpoint;
    }

    /// Check the command and url, then split the url into host, port and endpoint.
    pub fn verify_and_prepare(&mut self) -> Result<()> {
        if self.command.is_empty() {
            return Err(CepticError::Request("command cannot be empty".to_string()));
        }
        if self.url.is_empty() {
            return Err(CepticError::Request("url cannot be empty".to_string()));
        }
        if !self.host.is_empty() && !self.endpoint.is_empty() {
            return Ok(());
        }

        let (authority, endpoint) = match self.url.split_once('/') {
            Some((authority, rest)) if !rest.is_empty() => (authority, rest.to_string()),
            Some((authority, _)) => (authority, "/".to_string()),
            None => (self.url.as_str(), "/".to_string()),
        };

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    CepticError::Request(format!("port must be an integer, not {}", port))
                })?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), self.port),
        };

        if host.is_empty() {
            return Err(CepticError::Request("host cannot be empty".to_string()));
        }

        self.host = host;
        self.port = port;
        self.endpoint = endpoint;
        Ok(())
    }

    /// `command\r\nendpoint\r\n{headers}`
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(format!("{}\r\n{}\r\n{}", self.command, self.endpoint, self.headers.to_json()?).into_bytes())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| CepticError::Protocol("request is not valid UTF-8".to_string()))?;
        let mut parts = text.splitn(3, "\r\n");
        let command = parts.next().unwrap_or_default().to_string();
        let endpoint = parts.next().unwrap_or_default().to_string();
        let headers = Headers::from_json(parts.next().unwrap_or_default())?;
        Ok(Self::with_endpoint(command, endpoint, headers))
    }

    /// Split `path?a=1&b=2` into the endpoint and its query parameters.
    pub(crate) fn split_query(&mut self) {
        let Some((path, query)) = self.endpoint.split_once('?') else {
            return;
        };
        let query = query.to_string();
        self.endpoint = path.to_string();
        self.query_params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();
        self.query_string = Some(query);
    }

    /// Switch the stream into exchange mode.
    ///
    /// Without the Exchange header a MISSING_EXCHANGE response is sent, the
    /// stream is closed, and `None` is returned.
    pub async fn begin_exchange(&self) -> Option<Arc<StreamHandler>> {
        let stream = self.stream.as_ref()?;
        if stream.is_stopped() {
            return None;
        }

        if !self.exchange() {
            tracing::debug!(stream_id = %stream.stream_id(), "Request did not carry Exchange header");
            let response = Response::new(StatusCode::MISSING_EXCHANGE);
            if let Err(e) = stream.send_response(&response).await {
                tracing::debug!(stream_id = %stream.stream_id(), error = %e, "Failed to send MISSING_EXCHANGE");
            }
            stream.send_close("Request missing Exchange header").await;
            return None;
        }

        if let Err(e) = stream.begin_exchange() {
            tracing::debug!(stream_id = %stream.stream_id(), error = %e, "Exchange already started");
            return None;
        }

        let response = Response::new(StatusCode::EXCHANGE_START).with_exchange(true);
        match stream.send_response(&response).await {
            Ok(()) => Some(stream.clone()),
            Err(e) => {
                tracing::debug!(stream_id = %stream.stream_id(), error = %e, "Failed to start exchange");
                None
            }
        }
    }
}
