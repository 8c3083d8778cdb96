//! Frames a byte stream into `(header, body)` pairs and lets a caller
//! consume each body in one of three ways without committing to decoding
//! up front: forward the raw bytes verbatim, discard them, or decode them
//! into a typed [`Packet`].
//!
//! Grounded on the two competing drafts in the original prototype's
//! `pkg/mqtt/stream.go` (which always decodes eagerly) and
//! `pkg/mqtt/streamer.go` (which introduces a header filter with a
//! drop/handle split but never actually reads the header bytes off the
//! body). This `Streamer` keeps the second draft's three-way fork but
//! makes it a hard state machine: [`next`](Streamer::next) commits to
//! exactly one packet at a time, and calling `next` again before the
//! current body has been consumed is a programmer error, not silently
//! tolerated.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::binary::write_varint;
use crate::codec::decode::{decode_body, read_header};
use crate::codec::packet::{DecodeOptions, Packet, PacketHeader};
use crate::consts::MAX_REMAINING_LENGTH;
use crate::error::MqttError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No header has been read yet; the next byte on the wire starts a
    /// fresh packet.
    Ready,
    /// A header has been read and its body has not yet been consumed by
    /// one of `forward_to`/`discard`/`decode`.
    HeaderRead,
    /// The underlying stream hit a clean EOF between packets.
    End,
    /// An I/O or protocol error occurred; the streamer will not attempt
    /// further reads.
    Errored,
}

/// Reads fixed headers off `R` one packet at a time, handing the caller a
/// choice of how to consume each body.
pub struct Streamer<R> {
    reader: R,
    state: State,
    header: Option<PacketHeader>,
    body: BytesMut,
}

impl<R> Streamer<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: State::Ready,
            header: None,
            body: BytesMut::new(),
        }
    }

    /// The header of the packet currently awaiting consumption, if any.
    pub fn header(&self) -> Option<&PacketHeader> {
        self.header.as_ref()
    }

    /// Reads the next fixed header. Returns `Ok(None)` on a clean EOF
    /// between packets (not an error — the peer closed the connection in
    /// a well-formed place). Returns `IllegalState` if the previous
    /// packet's body has not yet been consumed, or if the streamer has
    /// already ended or errored.
    pub async fn next(&mut self) -> Result<Option<&PacketHeader>, MqttError> {
        match self.state {
            State::HeaderRead => {
                return Err(MqttError::IllegalState(
                    "next() called before the current packet body was consumed",
                ))
            }
            State::End => return Ok(None),
            State::Errored => {
                return Err(MqttError::IllegalState(
                    "streamer is latched in an error state",
                ))
            }
            State::Ready => {}
        }

        match read_header(&mut self.reader).await {
            Ok(header) => {
                self.header = Some(header);
                self.state = State::HeaderRead;
                Ok(self.header.as_ref())
            }
            Err(MqttError::UnexpectedEof) => {
                // A clean stream end between packets is not an error; a
                // short read mid-header surfaces the same way and can't be
                // told apart at this layer.
                self.state = State::End;
                Ok(None)
            }
            Err(err) => {
                self.state = State::Errored;
                Err(err)
            }
        }
    }

    /// Copies the current packet's header and body to `sink` unchanged,
    /// without materialising a [`Packet`]. Returns the number of body
    /// bytes copied.
    pub async fn forward_to<W>(&mut self, sink: &mut W) -> Result<u64, MqttError>
    where
        W: AsyncWrite + Unpin,
    {
        let header = self.take_header()?;

        let mut header_buf = BytesMut::with_capacity(5);
        header_buf.put_u8(((header.packet_type() as u8) << 4) | header.flags());
        write_varint(&mut header_buf, header.length());
        sink.write_all(&header_buf).await.map_err(|e| self.latch_io(e))?;

        let n = self.copy_body(sink, header.length()).await?;
        self.state = State::Ready;
        Ok(n)
    }

    /// Reads and discards the current packet's body without forwarding or
    /// decoding it.
    pub async fn discard(&mut self) -> Result<(), MqttError> {
        let header = self.take_header()?;
        let mut remaining = header.length() as usize;
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let take = remaining.min(scratch.len());
            self.reader
                .read_exact(&mut scratch[..take])
                .await
                .map_err(|e| self.latch_io(e))?;
            remaining -= take;
        }
        self.state = State::Ready;
        Ok(())
    }

    /// Reads the current packet's body and decodes it into a typed
    /// [`Packet`].
    pub async fn decode(&mut self, opts: &DecodeOptions) -> Result<Packet, MqttError> {
        let header = self.take_header()?;

        if header.length() as usize > self.body.capacity() {
            self.body.reserve(header.length() as usize - self.body.capacity());
        }
        self.body.resize(header.length() as usize, 0);
        self.reader
            .read_exact(&mut self.body)
            .await
            .map_err(|e| self.latch_io(e))?;

        let packet = decode_body(&self.body, &header, opts);
        self.body.clear();
        self.state = State::Ready;
        packet
    }

    fn take_header(&mut self) -> Result<PacketHeader, MqttError> {
        match self.state {
            State::HeaderRead => Ok(self.header.take().expect("HeaderRead implies header is set")),
            State::Errored => Err(MqttError::IllegalState(
                "streamer is latched in an error state",
            )),
            State::End => Err(MqttError::IllegalState("streamer has already ended")),
            State::Ready => Err(MqttError::IllegalState(
                "body consumption attempted before next() read a header",
            )),
        }
    }

    async fn copy_body<W>(&mut self, sink: &mut W, length: u32) -> Result<u64, MqttError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut remaining = length as usize;
        let mut scratch = [0u8; 4096];
        let mut total = 0u64;
        while remaining > 0 {
            let take = remaining.min(scratch.len());
            self.reader
                .read_exact(&mut scratch[..take])
                .await
                .map_err(|e| self.latch_io(e))?;
            sink.write_all(&scratch[..take])
                .await
                .map_err(|e| self.latch_io(e))?;
            remaining -= take;
            total += take as u64;
        }
        Ok(total)
    }

    fn latch_io(&mut self, err: std::io::Error) -> MqttError {
        self.state = State::Errored;
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            MqttError::UnexpectedEof
        } else {
            MqttError::Io(err)
        }
    }
}

/// Enforces the 268,435,455-byte remaining-length cap on a header before
/// it is acted on. `read_header` itself cannot produce a larger value (the
/// varint format tops out there), so this only guards headers assembled by
/// hand in tests or future callers.
pub fn check_length_cap(header: &PacketHeader) -> Result<(), MqttError> {
    if header.length() > MAX_REMAINING_LENGTH {
        return Err(MqttError::PacketTooLarge(header.length() as usize));
    }
    Ok(())
}
