//! RFC 4880 packet framing.
//!
//! A packet is a tag plus a body length descriptor. Old-format headers
//! carry the tag in bits 2–5 and a length form in bits 0–1; new-format
//! headers carry the tag in bits 0–5 and encode the length in one, two, or
//! five bytes, or as a chain of power-of-two "partial" chunks terminated by
//! a normally-encoded final chunk.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::filter::{get_byte, PullFilter, PushFilter};

/// Upper bound on any single decoded body or chunk length.
pub const MAX_CHUNK: usize = 16 * 1024 * 1024;

/// Chunk size used when streaming a packet of unknown length.
const STREAM_BLOCK: usize = 16 * 1024;

pub const TAG_PUBENC_SESSKEY: u8 = 1;
pub const TAG_SIGNATURE: u8 = 2;
pub const TAG_SYMENC_SESSKEY: u8 = 3;
pub const TAG_SECRET_KEY: u8 = 5;
pub const TAG_PUBLIC_KEY: u8 = 6;
pub const TAG_SECRET_SUBKEY: u8 = 7;
pub const TAG_COMPRESSED_DATA: u8 = 8;
pub const TAG_SYMENC_DATA: u8 = 9;
pub const TAG_MARKER: u8 = 10;
pub const TAG_LITERAL_DATA: u8 = 11;
pub const TAG_TRUST: u8 = 12;
pub const TAG_USER_ID: u8 = 13;
pub const TAG_PUBLIC_SUBKEY: u8 = 14;
pub const TAG_USER_ATTR: u8 = 17;
pub const TAG_SYMENC_DATA_MDC: u8 = 18;
pub const TAG_MDC: u8 = 19;
pub const TAG_PRIV_61: u8 = 61;

/// How a packet body's extent is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PktLen {
    /// Complete body length known up front.
    Normal(usize),
    /// First partial chunk of this size; more chunks follow.
    Stream(usize),
    /// Body extends to the end of the enclosing stream.
    Context,
}

/// Parse a new-format length descriptor. Returns the chunk length and
/// whether more chunks follow.
fn parse_new_len(src: &mut dyn PullFilter) -> Result<(usize, bool)> {
    let b = get_byte(src)?;
    let (len, stream) = if b <= 191 {
        (b as usize, false)
    } else if b <= 223 {
        let b2 = get_byte(src)?;
        (((b as usize - 192) << 8) + b2 as usize + 192, false)
    } else if b == 255 {
        let mut lenbuf = [0u8; 4];
        crate::filter::pull_exact(src, &mut lenbuf)?;
        (BigEndian::read_u32(&lenbuf) as usize, false)
    } else {
        (1usize << (b & 0x1F), true)
    };

    if len > MAX_CHUNK {
        tracing::debug!(len, "parse_new_len: weird length");
        return Err(Error::CorruptData);
    }
    Ok((len, stream))
}

fn parse_old_len(src: &mut dyn PullFilter, lentype: u8) -> Result<usize> {
    let nbytes = match lentype {
        0 => 1,
        1 => 2,
        _ => 4,
    };
    let mut buf = [0u8; 4];
    crate::filter::pull_exact(src, &mut buf[..nbytes])?;
    let mut len = 0usize;
    for &b in &buf[..nbytes] {
        len = (len << 8) | b as usize;
    }
    if len > MAX_CHUNK {
        tracing::debug!(len, "parse_old_len: weird length");
        return Err(Error::CorruptData);
    }
    Ok(len)
}

/// Read one packet header. Returns `None` at a clean end-of-stream.
/// Old-format "length to end of source" headers are only accepted when
/// `allow_ctx` is set.
pub fn parse_pkt_hdr(src: &mut dyn PullFilter, allow_ctx: bool) -> Result<Option<(u8, PktLen)>> {
    // EOF is normal here, so no get_byte
    let first = {
        let chunk = src.pull(1)?;
        if chunk.is_empty() {
            return Ok(None);
        }
        chunk[0]
    };

    if first & 0x80 == 0 {
        tracing::debug!(byte = first, "parse_pkt_hdr: not a packet header");
        return Err(Error::CorruptData);
    }

    if first & 0x40 != 0 {
        let tag = first & 0x3F;
        let (len, stream) = parse_new_len(src)?;
        let len = if stream {
            PktLen::Stream(len)
        } else {
            PktLen::Normal(len)
        };
        Ok(Some((tag, len)))
    } else {
        let tag = (first >> 2) & 0x0F;
        let lentype = first & 3;
        if lentype == 3 {
            if !allow_ctx {
                return Err(Error::CorruptData);
            }
            Ok(Some((tag, PktLen::Context)))
        } else {
            Ok(Some((tag, PktLen::Normal(parse_old_len(src, lentype)?))))
        }
    }
}

/// Append a new-format length descriptor for a complete body.
pub fn encode_new_len(len: usize, out: &mut Vec<u8>) {
    if len <= 191 {
        out.push(len as u8);
    } else if len <= 8383 {
        let v = len - 192;
        out.push((v >> 8) as u8 + 192);
        out.push((v & 0xFF) as u8);
    } else {
        out.push(0xFF);
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, len as u32);
        out.extend_from_slice(&buf);
    }
}

/// Write a complete packet with a new-format header.
pub fn write_packet(dst: &mut dyn PushFilter, tag: u8, body: &[u8]) -> Result<()> {
    let mut hdr = Vec::with_capacity(6);
    hdr.push(0xC0 | tag);
    encode_new_len(body.len(), &mut hdr);
    dst.push(&hdr)?;
    dst.push(body)
}

/// Delivers exactly one packet body, transparently consuming subsequent
/// partial-length chunks.
pub struct PktReader<'a> {
    src: &'a mut dyn PullFilter,
    len: usize,
    /// Normal = this is the last chunk; Stream = more chunks follow.
    stream: bool,
    ctx: bool,
}

impl<'a> PktReader<'a> {
    pub fn new(src: &'a mut dyn PullFilter, len: PktLen) -> PktReader<'a> {
        match len {
            PktLen::Normal(len) => PktReader {
                src,
                len,
                stream: false,
                ctx: false,
            },
            PktLen::Stream(len) => PktReader {
                src,
                len,
                stream: true,
                ctx: false,
            },
            PktLen::Context => PktReader {
                src,
                len: 0,
                stream: false,
                ctx: true,
            },
        }
    }
}

impl PullFilter for PktReader<'_> {
    fn pull(&mut self, max: usize) -> Result<&[u8]> {
        if self.ctx {
            // whatever the underlying source still has
            return self.src.pull(max);
        }

        while self.len == 0 {
            if !self.stream {
                return Ok(&[]);
            }
            let (len, stream) = parse_new_len(self.src)?;
            self.len = len;
            self.stream = stream;
        }

        let want = max.min(self.len);
        let chunk = self.src.pull(want)?;
        if chunk.is_empty() {
            tracing::debug!("pktreader: unexpected eof inside packet");
            return Err(Error::CorruptData);
        }
        self.len -= chunk.len();
        Ok(chunk)
    }
}

/// Streams a packet body of unknown length as 2¹⁴-byte partial chunks,
/// terminated by a normally-encoded final chunk (possibly empty) on flush.
pub struct PktWriter<'a> {
    next: Box<dyn PushFilter + 'a>,
    buf: Vec<u8>,
}

impl<'a> PktWriter<'a> {
    pub fn new(mut next: Box<dyn PushFilter + 'a>, tag: u8) -> Result<PktWriter<'a>> {
        next.push(&[0xC0 | tag])?;
        Ok(PktWriter {
            next,
            buf: Vec::with_capacity(STREAM_BLOCK),
        })
    }
}

impl PushFilter for PktWriter<'_> {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= STREAM_BLOCK {
            // 0xE0 | log2(STREAM_BLOCK)
            self.next.push(&[0xE0 | 14])?;
            self.next.push(&self.buf[..STREAM_BLOCK])?;
            self.buf.drain(..STREAM_BLOCK);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut hdr = Vec::with_capacity(6);
        encode_new_len(self.buf.len(), &mut hdr);
        self.next.push(&hdr)?;
        self.next.push(&self.buf)?;
        self.buf.clear();
        self.next.flush()
    }
}
