use std::convert::TryFrom;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use codec::{DecodeError, Packet, PacketKind};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Error;

const READ_CHUNK: usize = 4096;

/// Two-phase framed reader over the inbound byte stream. Frames are peeked
/// without consuming them and stay in the buffer until [`read_commit`]
/// advances the cursor, so a decode failure never loses framing.
///
/// [`read_commit`]: FrameReader::read_commit
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    max_packet_size: usize,
    eof: bool,
}

impl<R> FrameReader<R> {
    pub fn new(reader: R, max_packet_size: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::new(),
            max_packet_size,
            eof: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Inspect the fixed header without consuming it. Returns the packet
    /// kind and the total frame length (fixed header included).
    ///
    /// Fails with [`Error::ShortRead`] while the header is incomplete and
    /// [`Error::MalformedLength`] when the remaining-length continuation
    /// exceeds four bytes.
    pub fn peek_message_size(&self) -> Result<(PacketKind, usize), Error> {
        if self.buf.is_empty() {
            return Err(Error::ShortRead);
        }

        let header = self.buf[0];
        let kind = match header >> 4 {
            0 => return Err(DecodeError::ReservedPacketType.into()),
            n => PacketKind::try_from(n).map_err(|_| DecodeError::UnknownPacketType(n))?,
        };

        let mut remaining = 0usize;
        let mut header_len = 1;
        loop {
            if header_len > 4 {
                return Err(Error::MalformedLength);
            }
            match self.buf.get(header_len) {
                None => return Err(Error::ShortRead),
                Some(&byte) => {
                    remaining |= ((byte & 0x7f) as usize) << (7 * (header_len - 1));
                    header_len += 1;
                    if byte & 0x80 == 0 {
                        break;
                    }
                }
            }
        }

        let total_len = header_len + remaining;
        if total_len > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge.into());
        }

        Ok((kind, total_len))
    }

    /// Decode the full packet; the frame's bytes stay buffered until
    /// [`read_commit`](FrameReader::read_commit). Requires `total_len`
    /// buffered bytes.
    pub fn peek_message(&self, kind: PacketKind, total_len: usize) -> Result<(Packet, usize), Error> {
        if self.buf.len() < total_len {
            return Err(Error::ShortRead);
        }

        let header = self.buf[0];
        let mut body_at = 1;
        while self.buf[body_at] & 0x80 != 0 {
            body_at += 1;
        }
        body_at += 1;

        tracing::trace!(kind = ?kind, len = total_len, "peek message");

        let body = Bytes::copy_from_slice(&self.buf[body_at..total_len]);
        let packet = Packet::decode(header, body)?;
        Ok((packet, total_len))
    }

    /// Consume a peeked frame.
    pub fn read_commit(&mut self, total_len: usize) -> Result<(), Error> {
        if self.buf.len() < total_len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        self.buf.advance(total_len);
        Ok(())
    }
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Read more bytes from the transport. Returns `Ok(false)` at EOF;
    /// already-buffered frames remain peekable.
    pub async fn fill(&mut self) -> Result<bool, Error> {
        if self.eof {
            return Ok(false);
        }
        self.buf.reserve(READ_CHUNK);
        let n = self.reader.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        Ok(true)
    }
}

/// Decode a whole stored frame (fixed header included), as kept in the ack
/// queues' message buffers.
pub(crate) fn decode_frame(mut data: Bytes) -> Result<Packet, Error> {
    if data.is_empty() {
        return Err(Error::ShortRead);
    }
    let header = data.get_u8();

    let mut shift = 0;
    let mut remaining = 0usize;
    loop {
        if shift > 21 {
            return Err(Error::MalformedLength);
        }
        if data.is_empty() {
            return Err(Error::ShortRead);
        }
        let byte = data.get_u8();
        remaining |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }

    if data.len() < remaining {
        return Err(Error::ShortRead);
    }
    Ok(Packet::decode(header, data)?)
}
