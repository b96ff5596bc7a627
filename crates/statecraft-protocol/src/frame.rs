// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Frame format for the worker channel.
//!
//! Each message is one frame:
//! - 4 bytes: payload length (big-endian)
//! - 2 bytes: frame kind
//! - N bytes: JSON payload

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16 MB). Snapshots of large datamodels fit comfortably.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header size (4 bytes length + 2 bytes kind).
pub const HEADER_SIZE: usize = 6;

/// Frame kinds on the worker channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FrameKind {
    /// Runtime-initiated command (carries a correlation id).
    Command = 1,
    /// Worker reply to a command (echoes the correlation id).
    Reply = 2,
    /// Unsolicited worker notification.
    Push = 3,
}

impl TryFrom<u16> for FrameKind {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, FrameError> {
        match value {
            1 => Ok(FrameKind::Command),
            2 => Ok(FrameKind::Reply),
            3 => Ok(FrameKind::Push),
            _ => Err(FrameError::InvalidFrameKind(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid frame kind: {0}")]
    InvalidFrameKind(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("channel closed")]
    ConnectionClosed,
}

/// A framed message with kind and JSON payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    /// Create a command frame.
    pub fn command<M: Serialize>(msg: &M) -> Result<Self, FrameError> {
        Self::new(FrameKind::Command, msg)
    }

    /// Create a reply frame.
    pub fn reply<M: Serialize>(msg: &M) -> Result<Self, FrameError> {
        Self::new(FrameKind::Reply, msg)
    }

    /// Create a push frame.
    pub fn push<M: Serialize>(msg: &M) -> Result<Self, FrameError> {
        Self::new(FrameKind::Push, msg)
    }

    /// Create a frame of the given kind from a serializable message.
    pub fn new<M: Serialize>(kind: FrameKind, msg: &M) -> Result<Self, FrameError> {
        let payload = serde_json::to_vec(msg)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            kind,
            payload: Bytes::from(payload),
        })
    }

    /// Decode the payload as a JSON message.
    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, FrameError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Encode the frame to bytes for wire transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(self.kind as u16);
        buf.put(self.payload.clone());
        buf.freeze()
    }
}

/// Write a frame to an async writer and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let encoded = frame.encode();
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame from an async reader.
///
/// A clean EOF before the header is reported as
/// [`FrameError::ConnectionClosed`] so callers can distinguish an orderly
/// shutdown from a truncated frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let kind = FrameKind::try_from(u16::from_be_bytes([header[4], header[5]]))?;

    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        kind,
        payload: Bytes::from(payload),
    })
}
