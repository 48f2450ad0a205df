//! Payload encoders applied to stream data.
//!
//! # Data Flow
//! ```text
//! Encoding header ("gzip,base64")
//!     → EncodeHandler::from_header (parse, dedupe, reject unknown)
//!     → handler.send: encode in listed order → frame generator
//!     → handler.receive: reassemble → decode in reverse order
//! ```
//!
//! # Design Decisions
//! - `none` anywhere in the list disables every other encoder
//! - Repeated names are applied once
//! - Unknown names fail with `UnknownEncoding`, which the server turns into a
//!   rejected request instead of an internal error
//! - Decoding is bounded: every stage stops once its output passes the size
//!   the final message is allowed to grow from

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{CepticError, Result};

/// A reversible byte transform.
pub trait Encoder: Send + Sync + std::fmt::Debug {
    /// Name used in the Encoding header.
    fn name(&self) -> &'static str;
    fn encode(&self, data: Vec<u8>) -> Result<Vec<u8>>;
    /// Reverse `encode`, failing with `TotalSizeExceeded` past `max_len` bytes.
    fn decode(&self, data: Vec<u8>, max_len: usize) -> Result<Vec<u8>>;
    /// Largest encoded size of `len` input bytes.
    fn encoded_len(&self, len: usize) -> usize;
}

fn check_len(len: usize, max_len: usize) -> Result<()> {
    if len > max_len {
        return Err(CepticError::TotalSizeExceeded { max: max_len });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoneEncoder;

impl Encoder for NoneEncoder {
    fn name(&self) -> &'static str {
        "none"
    }

    fn encode(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        Ok(data)
    }

    fn decode(&self, data: Vec<u8>, max_len: usize) -> Result<Vec<u8>> {
        check_len(data.len(), max_len)?;
        Ok(data)
    }

    fn encoded_len(&self, len: usize) -> usize {
        len
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Encoder;

impl Encoder for Base64Encoder {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encode(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        Ok(STANDARD.encode(data).into_bytes())
    }

    fn decode(&self, data: Vec<u8>, max_len: usize) -> Result<Vec<u8>> {
        // Padding trims at most two bytes off every full quantum.
        check_len((data.len() / 4 * 3).saturating_sub(2), max_len)?;
        let out = STANDARD
            .decode(data)
            .map_err(|e| CepticError::Protocol(format!("invalid base64 payload: {}", e)))?;
        check_len(out.len(), max_len)?;
        Ok(out)
    }

    fn encoded_len(&self, len: usize) -> usize {
        (len / 3).saturating_add(1).saturating_mul(4)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipEncoder;

impl Encoder for GzipEncoder {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn encode(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data)?;
        Ok(encoder.finish()?)
    }

    fn decode(&self, data: Vec<u8>, max_len: usize) -> Result<Vec<u8>> {
        let limit = (max_len as u64).saturating_add(1);
        let mut out = Vec::new();
        GzDecoder::new(data.as_slice())
            .take(limit)
            .read_to_end(&mut out)
            .map_err(|e| CepticError::Protocol(format!("invalid gzip payload: {}", e)))?;
        check_len(out.len(), max_len)?;
        Ok(out)
    }

    /// Stored deflate blocks cost 5 bytes per 64 KiB, plus header and trailer.
    fn encoded_len(&self, len: usize) -> usize {
        len.saturating_add(len / 4096).saturating_add(64)
    }
}

fn encoder_for(name: &str) -> Option<Box<dyn Encoder>> {
    match name {
        "none" => Some(Box::new(NoneEncoder)),
        "base64" => Some(Box::new(Base64Encoder)),
        "gzip" => Some(Box::new(GzipEncoder)),
        _ => None,
    }
}

/// Ordered chain of encoders for one stream.
#[derive(Debug)]
pub struct EncodeHandler {
    encoders: Vec<Box<dyn Encoder>>,
}

impl EncodeHandler {
    /// Build from a comma-separated list; empty or absent means `none`.
    pub fn from_header(encoding: Option<&str>) -> Result<Self> {
        let names: Vec<&str> = match encoding.map(str::trim) {
            None | Some("") => return Ok(Self::default()),
            Some(list) => list.split(',').map(str::trim).collect(),
        };

        let mut encoders: Vec<Box<dyn Encoder>> = Vec::new();
        for name in names {
            let encoder =
                encoder_for(name).ok_or_else(|| CepticError::UnknownEncoding(name.to_string()))?;
            if encoder.name() == "none" {
                return Ok(Self::default());
            }
            if !encoders.iter().any(|e| e.name() == encoder.name()) {
                encoders.push(encoder);
            }
        }
        Ok(Self { encoders })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.encoders.iter().map(|e| e.name()).collect()
    }

    /// True when data passes through unchanged.
    pub fn is_identity(&self) -> bool {
        self.encoders.iter().all(|e| e.name() == "none")
    }

    /// Upper bound on the encoded size of `length` bytes of payload.
    pub fn wire_limit(&self, length: usize) -> usize {
        self.encoders
            .iter()
            .fold(length, |len, encoder| encoder.encoded_len(len))
    }

    pub fn encode(&self, mut data: Vec<u8>) -> Result<Vec<u8>> {
        for encoder in &self.encoders {
            data = encoder.encode(data)?;
        }
        Ok(data)
    }

    /// Undo the chain, never producing more than `max_len` bytes.
    ///
    /// Each intermediate stage is held to the encoded size of the stage after it.
    pub fn decode(&self, mut data: Vec<u8>, max_len: usize) -> Result<Vec<u8>> {
        let mut limits = Vec::with_capacity(self.encoders.len());
        let mut limit = max_len;
        for encoder in &self.encoders {
            limits.push(limit);
            limit = encoder.encoded_len(limit);
        }
        for (encoder, limit) in self.encoders.iter().zip(limits).rev() {
            data = encoder.decode(data, limit).map_err(|e| match e {
                CepticError::TotalSizeExceeded { .. } => CepticError::TotalSizeExceeded { max: max_len },
                other => other,
            })?;
        }
        Ok(data)
    }
}

impl Default for EncodeHandler {
    fn default() -> Self {
        Self {
            encoders: vec![Box::new(NoneEncoder)],
        }
    }
}
