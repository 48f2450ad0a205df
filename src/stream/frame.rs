//! Wire format for a single stream frame.
//!
//! # Frame Layout
//!
//! ```text
//! +--------------------------------------+------+------+------------------+-----------+
//! | stream id (36 bytes, UUID text)      | type | info | length (16 dec)  | payload   |
//! +--------------------------------------+------+------+------------------+-----------+
//! ```
//!
//! `type` and `info` are single ASCII digits. The length field is a
//! zero-padded decimal count of payload bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{CepticError, Result};

/// Length of the textual stream id.
pub const STREAM_ID_LENGTH: usize = 36;

/// Width of the decimal payload length field.
pub const DATA_LENGTH_WIDTH: usize = 16;

/// Fixed bytes preceding the payload of every frame.
pub const HEADER_SIZE: usize = STREAM_ID_LENGTH + 1 + 1 + DATA_LENGTH_WIDTH;

/// Kind of frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Data,
    Header,
    Response,
    KeepAlive,
    Close,
    CloseAll,
}

impl FrameType {
    pub fn as_byte(self) -> u8 {
        match self {
            FrameType::Data => b'0',
            FrameType::Header => b'1',
            FrameType::Response => b'2',
            FrameType::KeepAlive => b'3',
            FrameType::Close => b'4',
            FrameType::CloseAll => b'5',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            b'0' => Ok(FrameType::Data),
            b'1' => Ok(FrameType::Header),
            b'2' => Ok(FrameType::Response),
            b'3' => Ok(FrameType::KeepAlive),
            b'4' => Ok(FrameType::Close),
            b'5' => Ok(FrameType::CloseAll),
            other => Err(CepticError::Protocol(format!(
                "unknown frame type {:?}",
                other as char
            ))),
        }
    }

    /// Label used for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Data => "data",
            FrameType::Header => "header",
            FrameType::Response => "response",
            FrameType::KeepAlive => "keep_alive",
            FrameType::Close => "close",
            FrameType::CloseAll => "close_all",
        }
    }
}

/// Whether more frames follow for the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInfo {
    Continue,
    End,
}

impl FrameInfo {
    pub fn as_byte(self) -> u8 {
        match self {
            FrameInfo::Continue => b'0',
            FrameInfo::End => b'1',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            b'0' => Ok(FrameInfo::Continue),
            b'1' => Ok(FrameInfo::End),
            other => Err(CepticError::Protocol(format!(
                "unknown frame info {:?}",
                other as char
            ))),
        }
    }
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    stream_id: Uuid,
    frame_type: FrameType,
    info: FrameInfo,
    data: Vec<u8>,
}

impl StreamFrame {
    pub fn new(stream_id: Uuid, frame_type: FrameType, info: FrameInfo, data: Vec<u8>) -> Self {
        Self {
            stream_id,
            frame_type,
            info,
            data,
        }
    }

    /// CLOSE frame carrying an optional human-readable reason.
    pub fn close(stream_id: Uuid, reason: &str) -> Self {
        Self::new(stream_id, FrameType::Close, FrameInfo::End, reason.as_bytes().to_vec())
    }

    /// Connection-wide close, addressed to the nil stream id.
    pub fn close_all() -> Self {
        Self::new(Uuid::nil(), FrameType::CloseAll, FrameInfo::End, Vec::new())
    }

    pub fn keep_alive(stream_id: Uuid) -> Self {
        Self::new(stream_id, FrameType::KeepAlive, FrameInfo::End, Vec::new())
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn info(&self) -> FrameInfo {
        self.info
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn is_last(&self) -> bool {
        self.info == FrameInfo::End
    }

    /// Bytes this frame occupies on the wire, used for buffer accounting.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    /// Data-bearing frames count against the stream byte budgets; control frames do not.
    pub fn is_budgeted(&self) -> bool {
        matches!(
            self.frame_type,
            FrameType::Data | FrameType::Header | FrameType::Response
        )
    }

    /// Reason text of a CLOSE frame.
    pub fn close_reason(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Serialize into the exact wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_size());
        buf.extend_from_slice(self.stream_id.hyphenated().to_string().as_bytes());
        buf.push(self.frame_type.as_byte());
        buf.push(self.info.as_byte());
        buf.extend_from_slice(format!("{:0width$}", self.data.len(), width = DATA_LENGTH_WIDTH).as_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Parse the fixed-size frame header, returning the payload length it declares.
    pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(Uuid, FrameType, FrameInfo, usize)> {
        let id_text = std::str::from_utf8(&header[..STREAM_ID_LENGTH])
            .map_err(|_| CepticError::Protocol("stream id is not valid text".to_string()))?;
        let stream_id = Uuid::parse_str(id_text)
            .map_err(|e| CepticError::Protocol(format!("invalid stream id {:?}: {}", id_text, e)))?;

        let frame_type = FrameType::from_byte(header[STREAM_ID_LENGTH])?;
        let info = FrameInfo::from_byte(header[STREAM_ID_LENGTH + 1])?;

        let length_text = std::str::from_utf8(&header[STREAM_ID_LENGTH + 2..])
            .map_err(|_| CepticError::Protocol("frame length is not valid text".to_string()))?;
        let length = length_text
            .trim()
            .parse::<usize>()
            .map_err(|_| CepticError::Protocol(format!("invalid frame length {:?}", length_text)))?;

        Ok((stream_id, frame_type, info, length))
    }

    /// Read one frame, rejecting payloads above `max_frame_size`.
    pub async fn read_from<R>(reader: &mut R, max_frame_size: usize) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header).await?;
        let (stream_id, frame_type, info, length) = Self::decode_header(&header)?;

        if length > max_frame_size {
            return Err(CepticError::FrameSize {
                size: length,
                max: max_frame_size,
            });
        }

        let mut data = vec![0u8; length];
        if length > 0 {
            reader.read_exact(&mut data).await?;
        }

        Ok(Self::new(stream_id, frame_type, info, data))
    }

    /// Write this frame to the socket.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}
