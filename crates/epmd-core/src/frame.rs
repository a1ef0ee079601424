//! Reading length-prefixed request frames off an async stream.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::wire::{WireError, LENGTH_PREFIX_LEN};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the stream before sending anything.
    #[error("connection closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Read one `[u16 length][tag][body]` frame. The returned bytes include the
/// length prefix so they can go straight into [`crate::message::Request::decode`].
///
/// A stream that ends partway through the frame is a [`WireError`], never a
/// short frame.
pub async fn read_request_frame<R>(reader: &mut R) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let first = reader.read(&mut prefix).await?;
    if first == 0 {
        return Err(FrameError::Closed);
    }
    if first < LENGTH_PREFIX_LEN {
        let got = read_full(reader, &mut prefix[first..]).await?;
        if got < LENGTH_PREFIX_LEN - first {
            return Err(WireError::TruncatedField {
                field: "length",
                needed: LENGTH_PREFIX_LEN,
                available: first + got,
            }
            .into());
        }
    }

    let declared = u16::from_be_bytes(prefix) as usize;
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + declared);
    frame.put_slice(&prefix);
    frame.resize(LENGTH_PREFIX_LEN + declared, 0);

    let got = read_full(reader, &mut frame[LENGTH_PREFIX_LEN..]).await?;
    if got < declared {
        return Err(WireError::LengthMismatch {
            declared,
            available: got,
        }
        .into());
    }
    Ok(frame.freeze())
}

/// Fill `buf` unless the stream ends first; returns how much was read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
