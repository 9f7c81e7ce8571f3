//! Reading and writing of mysql packages on top of a byte transport
//!
//! A logical package longer than 0xFFFFFF bytes is split into several
//! physical packages. The read side splices those back together so callers
//! only ever see logical packages, and the write side splits when a package
//! is finished.
use std::collections::VecDeque;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    buffer_pool::Buffers,
    constants::MAX_PACKAGE_PAYLOAD,
    error::{ConnectionErrorContent, ConnectionResult, protocol_error},
};

/// Minimum number of bytes to make room for on each socket read
const READ_RESERVE: usize = 8 * 1024;

/// A byte stream a connection can run on
///
/// Implemented for every tokio stream, like [tokio::net::TcpStream],
/// [tokio::net::UnixStream] or [tokio::io::DuplexStream]
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> Transport for T {}

/// Package reader and writer for a single connection
pub(crate) struct PacketIo {
    /// The underlying stream
    transport: Box<dyn Transport>,
    /// Received bytes not yet consumed, the read position is always the start
    rbuf: BytesMut,
    /// Length of the last returned slice, consumed on the next read
    consume: usize,
    /// Payload bytes of the current physical package not yet consumed
    chunk_left: usize,
    /// The current physical package was full, so a continuation follows
    chunk_full: bool,
    /// We are between [Self::begin_packet] and [Self::end_packet]
    in_packet: bool,
    /// Sequence id of the next package read or written
    seq: u8,
    /// Packages waiting to be sent
    wbuf: BytesMut,
    /// Offset in wbuf of the package being composed
    packet_start: usize,
    /// Sequence id the response of each sent command starts with
    expected: VecDeque<u8>,
    /// Largest physical payload
    chunk_limit: usize,
}

impl PacketIo {
    /// Construct a new instance reading and writing to transport
    pub(crate) fn new(transport: Box<dyn Transport>, buffers: Buffers) -> Self {
        let Buffers {
            read: mut rbuf,
            write: mut wbuf,
        } = buffers;
        rbuf.clear();
        wbuf.clear();
        PacketIo {
            transport,
            rbuf,
            consume: 0,
            chunk_left: 0,
            chunk_full: false,
            in_packet: false,
            seq: 0,
            wbuf,
            packet_start: 0,
            expected: VecDeque::new(),
            chunk_limit: MAX_PACKAGE_PAYLOAD,
        }
    }

    /// Return the buffers, dropping the transport
    pub(crate) fn into_buffers(self) -> Buffers {
        let PacketIo {
            mut rbuf, mut wbuf, ..
        } = self;
        rbuf.clear();
        wbuf.clear();
        Buffers {
            read: rbuf,
            write: wbuf,
        }
    }

    /// Use a smaller physical package size, so splitting can be tested on small data
    #[cfg(test)]
    pub(crate) fn set_chunk_limit(&mut self, chunk_limit: usize) {
        self.chunk_limit = chunk_limit;
    }

    /// True if we are in the middle of a package started by [Self::begin_packet]
    #[inline]
    pub(crate) fn in_packet(&self) -> bool {
        self.in_packet
    }

    /// Consume the slice returned by the last read
    #[inline]
    fn release(&mut self) {
        if self.consume != 0 {
            self.rbuf.advance(self.consume);
            self.consume = 0;
        }
    }

    /// Read from the transport until at least n bytes are buffered
    async fn fill(&mut self, n: usize) -> ConnectionResult<()> {
        while self.rbuf.len() < n {
            self.rbuf.reserve((n - self.rbuf.len()).max(READ_RESERVE));
            if self.transport.read_buf(&mut self.rbuf).await? == 0 {
                return Err(ConnectionErrorContent::ServerDisconnected.into());
            }
        }
        Ok(())
    }

    /// Decode the package header at the given offset in the read buffer
    #[inline]
    fn header_at(&self, pos: usize) -> (usize, u8) {
        let h = &self.rbuf[pos..pos + 4];
        let len = u32::from_le_bytes([h[0], h[1], h[2], 0]) as usize;
        (len, h[3])
    }

    /// Check the sequence id of a received package
    #[inline]
    fn check_seq(&mut self, seq: u8) -> ConnectionResult<()> {
        if seq != self.seq {
            return Err(protocol_error(format!(
                "Expected package sequence id {} got {seq}",
                self.seq
            )));
        }
        self.seq = self.seq.wrapping_add(1);
        Ok(())
    }

    /// Read the header of the next physical package that follows the `chunk_left`
    /// bytes of the current one, and splice it out of the buffer
    async fn splice_next(&mut self) -> ConnectionResult<()> {
        let at = self.chunk_left;
        self.fill(at + 4).await?;
        let (len, seq) = self.header_at(at);
        self.check_seq(seq)?;
        self.rbuf.copy_within(0..at, 4);
        self.rbuf.advance(4);
        self.chunk_left += len;
        self.chunk_full = len == self.chunk_limit;
        Ok(())
    }

    /// Make sure the next n bytes of the current package are buffered contiguously
    #[inline]
    async fn need(&mut self, n: usize) -> ConnectionResult<()> {
        self.release();
        if n <= self.chunk_left && n <= self.rbuf.len() {
            return Ok(());
        }
        self.need_slow(n).await
    }

    /// Slow path of [Self::need]
    async fn need_slow(&mut self, n: usize) -> ConnectionResult<()> {
        while self.chunk_left < n {
            if !self.chunk_full {
                return Err(protocol_error("Read past end of package"));
            }
            self.splice_next().await?;
        }
        self.fill(n).await
    }

    /// Start reading the next package field by field
    pub(crate) async fn begin_packet(&mut self) -> ConnectionResult<()> {
        self.release();
        if self.in_packet {
            return Err(protocol_error("Package begun before the previous one ended"));
        }
        self.fill(4).await?;
        let (len, seq) = self.header_at(0);
        self.check_seq(seq)?;
        self.rbuf.advance(4);
        self.chunk_left = len;
        self.chunk_full = len == self.chunk_limit;
        self.in_packet = true;
        Ok(())
    }

    /// Return the length of the next package and its first byte, without consuming anything
    ///
    /// The returned future is cancel-safe
    pub(crate) async fn peek_packet(&mut self) -> ConnectionResult<(usize, Option<u8>)> {
        self.release();
        self.fill(4).await?;
        let (len, _) = self.header_at(0);
        if len == 0 {
            return Ok((0, None));
        }
        self.fill(5).await?;
        Ok((len, Some(self.rbuf[4])))
    }

    /// Read a whole logical package
    ///
    /// Nothing is consumed until every physical package is buffered, so
    /// the returned future is cancel-safe.
    pub(crate) async fn read_packet(&mut self) -> ConnectionResult<&[u8]> {
        self.release();
        if self.in_packet {
            return Err(protocol_error("Package read before the previous one ended"));
        }
        let mut end = 0;
        loop {
            self.fill(end + 4).await?;
            let (len, _) = self.header_at(end);
            end += 4 + len;
            if len != self.chunk_limit {
                break;
            }
        }
        self.fill(end).await?;

        // Everything is buffered, validate the headers and move the payloads
        // together so they end where the last physical package ends
        let mut chunks = Vec::new();
        let mut pos = 0;
        let mut seq = self.seq;
        loop {
            let (len, s) = self.header_at(pos);
            if s != seq {
                return Err(protocol_error(format!(
                    "Expected package sequence id {seq} got {s}"
                )));
            }
            seq = seq.wrapping_add(1);
            chunks.push((pos + 4, len));
            pos += 4 + len;
            if len != self.chunk_limit {
                break;
            }
        }
        self.seq = seq;
        let mut dst = end;
        for (src, len) in chunks.into_iter().rev() {
            self.rbuf.copy_within(src..src + len, dst - len);
            dst -= len;
        }
        self.rbuf.advance(dst);
        self.consume = end - dst;
        Ok(&self.rbuf[..end - dst])
    }

    /// Read N bytes of the current package
    #[inline]
    async fn read_array<const N: usize>(&mut self) -> ConnectionResult<[u8; N]> {
        self.need(N).await?;
        let mut v = [0; N];
        v.copy_from_slice(&self.rbuf[..N]);
        self.rbuf.advance(N);
        self.chunk_left -= N;
        Ok(v)
    }

    /// Read a u8 from the current package
    #[inline]
    pub(crate) async fn read_u8(&mut self) -> ConnectionResult<u8> {
        Ok(self.read_array::<1>().await?[0])
    }

    /// Read a u16 from the current package
    #[inline]
    pub(crate) async fn read_u16(&mut self) -> ConnectionResult<u16> {
        Ok(u16::from_le_bytes(self.read_array().await?))
    }

    /// Read a u24 from the current package
    #[inline]
    pub(crate) async fn read_u24(&mut self) -> ConnectionResult<u32> {
        let [a, b, c] = self.read_array().await?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    /// Read a u64 from the current package
    #[inline]
    pub(crate) async fn read_u64(&mut self) -> ConnectionResult<u64> {
        Ok(u64::from_le_bytes(self.read_array().await?))
    }

    /// Read a length encoded integer, [None] is the NULL marker 0xFB
    pub(crate) async fn read_lenenc(&mut self) -> ConnectionResult<Option<u64>> {
        Ok(Some(match self.read_u8().await? {
            0xFB => return Ok(None),
            0xFC => self.read_u16().await?.into(),
            0xFD => self.read_u24().await?.into(),
            0xFE => self.read_u64().await?,
            0xFF => return Err(protocol_error("Invalid length encoded integer 0xFF")),
            v => v.into(),
        }))
    }

    /// Read `len` bytes of the current package
    ///
    /// The returned slice is valid until the next read
    pub(crate) async fn read_bytes(&mut self, len: usize) -> ConnectionResult<&[u8]> {
        self.need(len).await?;
        self.chunk_left -= len;
        self.consume = len;
        Ok(&self.rbuf[..len])
    }

    /// Read up to max bytes of the current package, at least one byte if max is not zero
    pub(crate) async fn read_chunk(&mut self, max: usize) -> ConnectionResult<&[u8]> {
        if max == 0 {
            self.release();
            return Ok(&[]);
        }
        self.need(1).await?;
        let len = max.min(self.chunk_left).min(self.rbuf.len());
        self.chunk_left -= len;
        self.consume = len;
        Ok(&self.rbuf[..len])
    }

    /// Skip len bytes of the current package without buffering them all
    pub(crate) async fn skip(&mut self, mut len: u64) -> ConnectionResult<()> {
        self.release();
        while len > 0 {
            if self.chunk_left == 0 {
                if !self.chunk_full {
                    return Err(protocol_error("Skip past end of package"));
                }
                self.splice_next().await?;
                continue;
            }
            if self.rbuf.is_empty() {
                self.fill(1).await?;
            }
            let n = (self.chunk_left.min(self.rbuf.len()) as u64).min(len) as usize;
            self.rbuf.advance(n);
            self.chunk_left -= n;
            len -= n as u64;
        }
        Ok(())
    }

    /// Return true if the whole current package has been consumed
    pub(crate) async fn is_at_end_of_packet(&mut self) -> ConnectionResult<bool> {
        self.release();
        while self.chunk_left == 0 {
            if !self.chunk_full {
                return Ok(true);
            }
            self.splice_next().await?;
        }
        Ok(false)
    }

    /// Finish reading the current package, it must have been consumed exactly
    pub(crate) async fn end_packet(&mut self) -> ConnectionResult<()> {
        if !self.is_at_end_of_packet().await? {
            return Err(protocol_error(format!(
                "Package not fully consumed, {} bytes left",
                self.chunk_left
            )));
        }
        self.in_packet = false;
        Ok(())
    }

    /// Skip whatever is left of the current package
    pub(crate) async fn goto_end_of_packet(&mut self) -> ConnectionResult<()> {
        loop {
            self.skip(self.chunk_left as u64).await?;
            if !self.chunk_full {
                break;
            }
            self.splice_next().await?;
        }
        self.in_packet = false;
        Ok(())
    }

    /// Begin a new command, the sequence id restarts from zero
    #[inline]
    pub(crate) fn start_command(&mut self) {
        self.seq = 0;
    }

    /// Record that the command just composed expects a response
    #[inline]
    pub(crate) fn finish_command(&mut self) {
        self.expected.push_back(self.seq);
    }

    /// Start reading the response to the oldest command sent
    pub(crate) fn begin_response(&mut self) -> ConnectionResult<()> {
        match self.expected.pop_front() {
            Some(seq) => {
                self.seq = seq;
                Ok(())
            }
            None => Err(protocol_error("No command is awaiting a response")),
        }
    }

    /// Start composing a new package
    #[inline]
    pub(crate) fn start_packet(&mut self) {
        self.packet_start = self.wbuf.len();
        self.wbuf.put_u32_le(0);
    }

    /// Finish the package being composed, splitting it if it is too long
    pub(crate) fn finish_packet(&mut self) {
        let start = self.packet_start;
        let len = self.wbuf.len() - start - 4;
        if len < self.chunk_limit {
            let seq = self.seq;
            self.seq = seq.wrapping_add(1);
            let mut x = &mut self.wbuf[start..start + 4];
            x.put_u32_le(len as u32 | ((seq as u32) << 24));
            return;
        }
        let payload = self.wbuf.split_off(start + 4);
        self.wbuf.truncate(start);
        let mut rest = &payload[..];
        loop {
            let n = rest.len().min(self.chunk_limit);
            let seq = self.seq;
            self.seq = seq.wrapping_add(1);
            self.wbuf.put_u32_le(n as u32 | ((seq as u32) << 24));
            self.wbuf.put_slice(&rest[..n]);
            rest = &rest[n..];
            if n < self.chunk_limit {
                break;
            }
        }
    }

    /// Append a u8 to the current package
    #[inline]
    pub(crate) fn put_u8(&mut self, v: u8) {
        self.wbuf.put_u8(v);
    }

    /// Append a u16 to the current package
    #[inline]
    pub(crate) fn put_u16(&mut self, v: u16) {
        self.wbuf.put_u16_le(v);
    }

    /// Append a u24 to the current package
    #[inline]
    pub(crate) fn put_u24(&mut self, v: u32) {
        self.wbuf.put_slice(&v.to_le_bytes()[..3]);
    }

    /// Append a u32 to the current package
    #[inline]
    pub(crate) fn put_u32(&mut self, v: u32) {
        self.wbuf.put_u32_le(v);
    }

    /// Append some bytes to the current package
    #[inline]
    pub(crate) fn put_bytes(&mut self, v: &[u8]) {
        self.wbuf.put_slice(v);
    }

    /// Append a null terminated string to the current package
    #[inline]
    pub(crate) fn put_null_str(&mut self, v: &[u8]) {
        self.wbuf.put_slice(v);
        self.wbuf.put_u8(0);
    }

    /// Append a length encoded byte string to the current package
    #[inline]
    pub(crate) fn put_lenenc_bytes(&mut self, v: &[u8]) {
        put_lenenc(&mut self.wbuf, v.len() as u64);
        self.wbuf.put_slice(v);
    }

    /// Direct access to the write buffer, for encoders that work on [BytesMut]
    #[inline]
    pub(crate) fn write_buf(&mut self) -> &mut BytesMut {
        &mut self.wbuf
    }

    /// Number of bytes waiting to be sent
    #[inline]
    pub(crate) fn pending_write_len(&self) -> usize {
        self.wbuf.len()
    }

    /// Send all composed packages in one write
    pub(crate) async fn send(&mut self) -> ConnectionResult<()> {
        self.transport.write_all_buf(&mut self.wbuf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Forget everything composed and not sent
    pub(crate) fn clear_writes(&mut self) {
        self.wbuf.clear();
        self.expected.clear();
    }

    /// Shut down the write side of the transport, ignoring errors
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.transport.shutdown().await;
    }
}

/// Append a length encoded integer to a buffer using the shortest form
///
/// See <https://mariadb.com/docs/server/reference/clientserver-protocol/protocol-data-types#length-encoded-integers>
pub fn put_lenenc(buf: &mut impl BufMut, v: u64) {
    if v < 0xFB {
        buf.put_u8(v as u8);
    } else if v <= 0xFFFF {
        buf.put_u8(0xFC);
        buf.put_u16_le(v as u16);
    } else if v <= 0xFF_FFFF {
        buf.put_u8(0xFD);
        buf.put_slice(&(v as u32).to_le_bytes()[..3]);
    } else {
        buf.put_u8(0xFE);
        buf.put_u64_le(v);
    }
}
