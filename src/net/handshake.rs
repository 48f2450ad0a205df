//! Settings negotiation run on a fresh socket before any stream manager exists.
//!
//! # Wire Layout
//! ```text
//! client → server:
//!     version(16) frame_min(16) frame_max(16) headers_min(16) headers_max(16)
//!     stream_min_timeout(4) stream_timeout(4)
//!
//! server → client:
//!     'y' frame_max(16) headers_max(16) stream_timeout(4) handler_max(4)
//!   | 'n' length(16) reason(≤1024)
//! ```
//!
//! Each parameter is negotiated as the closed interval
//! `[max(client_min, server_min), min(client_max, server_max)]`; an empty
//! interval rejects the connection, otherwise the upper bound is chosen.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{ClientConfig, ServerConfig};
use crate::error::{CepticError, Result};
use crate::net::socket::{
    number_field, pad_field, recv_field, recv_number, recv_raw, recv_sized, send_raw, send_sized,
};
use crate::observability::metrics;
use crate::stream::settings::StreamSettings;

const VERSION_WIDTH: usize = 16;
const SIZE_WIDTH: usize = 16;
const SHORT_WIDTH: usize = 4;

/// Longest rejection reason sent to a client.
pub const MAX_REASON_LENGTH: usize = 1024;

const ACCEPT: u8 = b'y';
const REJECT: u8 = b'n';

/// Values a client proposes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Proposal {
    version: String,
    frame_min: u64,
    frame_max: u64,
    headers_min: u64,
    headers_max: u64,
    timeout_min: u64,
    timeout_max: u64,
}

/// Pick the largest value acceptable to both sides.
pub fn negotiate(name: &str, client: (u64, u64), server: (u64, u64)) -> std::result::Result<u64, String> {
    let low = client.0.max(server.0);
    let high = client.1.min(server.1);
    if low > high {
        return Err(format!(
            "client {} range [{}, {}] does not overlap server range [{}, {}]",
            name, client.0, client.1, server.0, server.1
        ));
    }
    Ok(high)
}

/// Cut a reason to at most [`MAX_REASON_LENGTH`] bytes on a character boundary.
fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_REASON_LENGTH {
        let mut end = MAX_REASON_LENGTH;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

async fn read_proposal<S>(socket: &mut S) -> Result<Proposal>
where
    S: AsyncRead + Unpin + ?Sized,
{
    Ok(Proposal {
        version: recv_field(socket, VERSION_WIDTH).await?,
        frame_min: recv_number(socket, SIZE_WIDTH).await?,
        frame_max: recv_number(socket, SIZE_WIDTH).await?,
        headers_min: recv_number(socket, SIZE_WIDTH).await?,
        headers_max: recv_number(socket, SIZE_WIDTH).await?,
        timeout_min: recv_number(socket, SHORT_WIDTH).await?,
        timeout_max: recv_number(socket, SHORT_WIDTH).await?,
    })
}

async fn reject<S>(socket: &mut S, reason: String) -> CepticError
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let reason = truncate_reason(reason);
    let sent = match send_raw(socket, &[REJECT]).await {
        Ok(()) => send_sized(socket, reason.as_bytes()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = sent {
        tracing::debug!(error = %e, "Failed to send handshake rejection");
    }
    metrics::record_handshake(false);
    CepticError::Handshake(reason)
}

/// Server side: read the client's proposal, answer, and return the agreed settings.
pub async fn server_handshake<S>(socket: &mut S, config: &ServerConfig) -> Result<StreamSettings>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let proposal = match read_proposal(socket).await {
        Ok(proposal) => proposal,
        Err(CepticError::Io(e)) => return Err(CepticError::Io(e)),
        Err(e) => return Err(reject(socket, e.to_string()).await),
    };

    if proposal.version != config.version {
        tracing::debug!(
            client_version = %proposal.version,
            server_version = %config.version,
            "Client protocol version differs"
        );
    }

    let frame = negotiate(
        "frame size",
        (proposal.frame_min, proposal.frame_max),
        (config.frame_min_size as u64, config.frame_max_size as u64),
    );
    let headers = negotiate(
        "header size",
        (proposal.headers_min, proposal.headers_max),
        (config.headers_min_size as u64, config.headers_max_size as u64),
    );
    let timeout = negotiate(
        "stream timeout",
        (proposal.timeout_min, proposal.timeout_max),
        (config.stream_min_timeout, config.stream_timeout),
    );

    let (frame, headers, timeout) = match (frame, headers, timeout) {
        (Ok(frame), Ok(headers), Ok(timeout)) => (frame, headers, timeout),
        (frame, headers, timeout) => {
            let errors: Vec<String> = [frame, headers, timeout]
                .into_iter()
                .filter_map(|result| result.err())
                .collect();
            return Err(reject(socket, errors.join("; ")).await);
        }
    };

    let mut reply = vec![ACCEPT];
    reply.extend_from_slice(&number_field(frame, SIZE_WIDTH)?);
    reply.extend_from_slice(&number_field(headers, SIZE_WIDTH)?);
    reply.extend_from_slice(&number_field(timeout, SHORT_WIDTH)?);
    reply.extend_from_slice(&number_field(config.handler_max_count as u64, SHORT_WIDTH)?);
    send_raw(socket, &reply).await?;
    metrics::record_handshake(true);

    Ok(StreamSettings {
        send_buffer_size: config.send_buffer_size,
        read_buffer_size: config.read_buffer_size,
        frame_max_size: frame as usize,
        headers_max_size: headers as usize,
        stream_timeout: timeout,
        handler_max_count: config.handler_max_count,
    })
}

fn check_within(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(CepticError::Handshake(format!(
            "server chose {} {} outside client range [{}, {}]",
            name, value, min, max
        )));
    }
    Ok(())
}

/// Client side: send the proposal and validate the server's answer.
pub async fn client_handshake<S>(socket: &mut S, config: &ClientConfig) -> Result<StreamSettings>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut proposal = pad_field(&config.version, VERSION_WIDTH);
    proposal.extend_from_slice(&number_field(config.frame_min_size as u64, SIZE_WIDTH)?);
    proposal.extend_from_slice(&number_field(config.frame_max_size as u64, SIZE_WIDTH)?);
    proposal.extend_from_slice(&number_field(config.headers_min_size as u64, SIZE_WIDTH)?);
    proposal.extend_from_slice(&number_field(config.headers_max_size as u64, SIZE_WIDTH)?);
    proposal.extend_from_slice(&number_field(config.stream_min_timeout, SHORT_WIDTH)?);
    proposal.extend_from_slice(&number_field(config.stream_timeout, SHORT_WIDTH)?);
    send_raw(socket, &proposal).await?;

    let flag = recv_raw(socket, 1).await?;
    match flag[0] {
        ACCEPT => {}
        REJECT => {
            let reason = recv_sized(socket, MAX_REASON_LENGTH).await?;
            return Err(CepticError::Handshake(String::from_utf8_lossy(&reason).into_owned()));
        }
        other => {
            return Err(CepticError::Protocol(format!(
                "unexpected handshake flag {:?}",
                other as char
            )))
        }
    }

    let frame = recv_number(socket, SIZE_WIDTH).await?;
    let headers = recv_number(socket, SIZE_WIDTH).await?;
    let timeout = recv_number(socket, SHORT_WIDTH).await?;
    let handler_max = recv_number(socket, SHORT_WIDTH).await?;

    check_within("frame size", frame, config.frame_min_size as u64, config.frame_max_size as u64)?;
    check_within("header size", headers, config.headers_min_size as u64, config.headers_max_size as u64)?;
    check_within("stream timeout", timeout, config.stream_min_timeout, config.stream_timeout)?;

    Ok(StreamSettings {
        send_buffer_size: config.send_buffer_size,
        read_buffer_size: config.read_buffer_size,
        frame_max_size: frame as usize,
        headers_max_size: headers as usize,
        stream_timeout: timeout,
        handler_max_count: handler_max as usize,
    })
}
