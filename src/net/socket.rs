//! Transport-agnostic socket plus the fixed-width helpers used before framing starts.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CepticError, Result};

/// Width of the decimal length prefix on sized messages.
pub const SIZE_PREFIX_WIDTH: usize = 16;

/// Anything a stream manager can run over: plain TCP, TLS, or an in-memory pipe.
pub trait AsyncSocket: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncSocket for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedSocket = Box<dyn AsyncSocket>;

/// Pad with trailing spaces to exactly `width` bytes, truncating longer values.
pub fn pad_field(value: &str, width: usize) -> Vec<u8> {
    let mut field = format!("{:<width$}", value, width = width).into_bytes();
    field.truncate(width);
    field
}

/// Zero-padded decimal field of exactly `width` digits.
pub fn number_field(value: u64, width: usize) -> Result<Vec<u8>> {
    let text = format!("{:0width$}", value, width = width);
    if text.len() > width {
        return Err(CepticError::Protocol(format!(
            "value {} does not fit in {} digits",
            value, width
        )));
    }
    Ok(text.into_bytes())
}

pub async fn send_raw<S>(socket: &mut S, data: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    socket.write_all(data).await?;
    socket.flush().await?;
    Ok(())
}

pub async fn recv_raw<S>(socket: &mut S, length: usize) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; length];
    socket.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Read a fixed-width field as trimmed text.
pub async fn recv_field<S>(socket: &mut S, width: usize) -> Result<String>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let raw = recv_raw(socket, width).await?;
    let text = String::from_utf8(raw)
        .map_err(|_| CepticError::Protocol("field is not valid text".to_string()))?;
    Ok(text.trim().to_string())
}

/// Read a fixed-width decimal field.
pub async fn recv_number<S>(socket: &mut S, width: usize) -> Result<u64>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let text = recv_field(socket, width).await?;
    text.parse::<u64>()
        .map_err(|_| CepticError::Protocol(format!("expected a number, received {:?}", text)))
}

/// Write `data` behind a 16-digit length prefix.
pub async fn send_sized<S>(socket: &mut S, data: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = number_field(data.len() as u64, SIZE_PREFIX_WIDTH)?;
    buf.extend_from_slice(data);
    send_raw(socket, &buf).await
}

/// Read a length-prefixed message, rejecting anything longer than `max_length`.
pub async fn recv_sized<S>(socket: &mut S, max_length: usize) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let length = recv_number(socket, SIZE_PREFIX_WIDTH).await? as usize;
    if length > max_length {
        return Err(CepticError::Protocol(format!(
            "sized message of {} bytes exceeds {}",
            length, max_length
        )));
    }
    recv_raw(socket, length).await
}
