//! Responses returned by endpoint handlers.

use std::sync::Arc;

use crate::error::{CepticError, Result};
use crate::message::headers::Headers;
use crate::message::status::StatusCode;
use crate::stream::handler::StreamHandler;

#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    stream: Option<Arc<StreamHandler>>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::default(),
            body: Vec::new(),
            stream: None,
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

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.headers.errors = errors;
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
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

    pub fn errors(&self) -> &[String] {
        &self.headers.errors
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.headers.content_length = Some(body.len() as u64);
        self.body = body;
    }

    pub(crate) fn fill_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Live stream when the response started an exchange.
    pub fn stream(&self) -> Option<&Arc<StreamHandler>> {
        self.stream.as_ref()
    }

    pub(crate) fn set_stream(&mut self, stream: Arc<StreamHandler>) {
        self.stream = Some(stream);
    }

    /// `status\r\n{headers}`
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(format!("{}\r\n{}", self.status, self.headers.to_json()?).into_bytes())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| CepticError::Protocol("response is not valid UTF-8".to_string()))?;
        let (status, headers) = text.split_once("\r\n").unwrap_or((text, ""));
        let code = status
            .trim()
            .parse::<u16>()
            .map_err(|_| CepticError::Protocol(format!("invalid status line {:?}", status)))?;
        Ok(Self::new(StatusCode::from_u16(code)?).with_headers(Headers::from_json(headers)?))
    }
}
