//! Message encryption.
//!
//! The push chain, outermost first: literal-data framing, optional CRLF
//! expansion, optional compression, then the random prefix, the MDC
//! hasher, CFB encryption, and the streaming packet writer into the output
//! buffer. Session-key packets are written before the encrypted-data
//! packet opens.

use zeroize::Zeroize;

use crate::cfb::Cfb;
use crate::cipher::CipherAlgo;
use crate::compress::{CompressAlgo, CompressPush};
use crate::context::Context;
use crate::digest::{DigestAlgo, Hasher};
use crate::error::{Error, Result};
use crate::filter::{PullFilter, PushFilter};
use crate::mbuf::MBuf;
use crate::packet::{self, write_packet, PktWriter};
use crate::pubenc;
use crate::rnd;
use crate::s2k::S2k;

/// CFB encryption layer.
struct CfbPush<'a> {
    next: Box<dyn PushFilter + 'a>,
    cfb: Cfb,
    buf: Vec<u8>,
}

impl PushFilter for CfbPush<'_> {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        self.buf.clear();
        self.cfb.encrypt(data, &mut self.buf);
        self.next.push(&self.buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.buf.zeroize();
        self.next.flush()
    }
}

/// Feeds everything through SHA-1 and appends the MDC packet on flush.
/// The packet's own two-byte header is part of the hashed domain.
struct MdcPush<'a> {
    next: Box<dyn PushFilter + 'a>,
    hash: Hasher,
}

impl PushFilter for MdcPush<'_> {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        self.hash.update(data);
        self.next.push(data)
    }

    fn flush(&mut self) -> Result<()> {
        self.hash.update(&[0xD3, 0x14]);
        let digest = self.hash.finish_copy();
        self.next.push(&[0xD3, 0x14])?;
        self.next.push(&digest)?;
        self.next.flush()
    }
}

/// Text-mode newline expansion: `\n` becomes `\r\n`.
struct CrlfPush<'a> {
    next: Box<dyn PushFilter + 'a>,
}

impl PushFilter for CrlfPush<'_> {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        let mut start = 0;
        for (i, &b) in data.iter().enumerate() {
            if b == b'\n' {
                self.next.push(&data[start..i])?;
                self.next.push(b"\r\n")?;
                start = i + 1;
            }
        }
        self.next.push(&data[start..])
    }

    fn flush(&mut self) -> Result<()> {
        self.next.flush()
    }
}

/// Tag-3 packet: S2K parameters plus, with a separate session key, that
/// key CFB-encrypted under the S2K-derived key.
fn write_symenc_sesskey(
    s2k_cipher: CipherAlgo,
    s2k: &S2k,
    sess_key: Option<(CipherAlgo, &[u8])>,
    dst: &mut dyn PushFilter,
) -> Result<()> {
    let mut body = vec![4u8, s2k_cipher.code()];
    s2k.write(&mut body);

    if let Some((msg_cipher, key)) = sess_key {
        let mut plain = Vec::with_capacity(key.len() + 1);
        plain.push(msg_cipher.code());
        plain.extend_from_slice(key);
        let mut cfb = Cfb::new(s2k_cipher, s2k.key(), false, None)?;
        let mut enc = Vec::new();
        cfb.encrypt(&plain, &mut enc);
        plain.zeroize();
        body.extend_from_slice(&enc);
    }

    write_packet(dst, packet::TAG_SYMENC_SESSKEY, &body)
}

/// Encrypt `src` into `dst` as a complete OpenPGP message.
pub fn encrypt(ctx: &mut Context, src: &mut MBuf, dst: &mut MBuf) -> Result<()> {
    if ctx.sym_key.is_some() == ctx.pub_key.is_some() {
        return Err(Error::ArgumentError);
    }

    let cipher = ctx.cipher_algo;
    let mut sess_key = vec![0u8; cipher.key_size()];

    // session-key packet
    if let Some(key) = ctx.pub_key.as_deref() {
        if !key.can_encrypt {
            return Err(Error::NoUsableKey);
        }
        rnd::random_bytes(&mut sess_key)?;
        pubenc::write_pubenc_sesskey(key, cipher, &sess_key, dst)?;
    } else {
        let password = ctx.sym_key.as_deref().ok_or(Error::Bug)?;
        // without a separate session key the packet's cipher byte names
        // the message cipher, so the S2K key must be sized for it
        let s2k_cipher = if ctx.use_sess_key {
            ctx.s2k_cipher_algo.unwrap_or(cipher)
        } else {
            cipher
        };
        let mut s2k = S2k::generate(ctx.s2k_mode, ctx.s2k_digest_algo, ctx.s2k_count)?;
        s2k.derive(password, s2k_cipher.key_size())?;

        if ctx.use_sess_key {
            rnd::random_bytes(&mut sess_key)?;
            write_symenc_sesskey(s2k_cipher, &s2k, Some((cipher, &sess_key)), dst)?;
        } else {
            sess_key.copy_from_slice(s2k.key());
            write_symenc_sesskey(s2k_cipher, &s2k, None, dst)?;
        }
    }

    // encrypted-data packet and the filter stack above it
    let tag = if ctx.disable_mdc {
        packet::TAG_SYMENC_DATA
    } else {
        packet::TAG_SYMENC_DATA_MDC
    };
    let mut top: Box<dyn PushFilter + '_> =
        Box::new(PktWriter::new(Box::new(&mut *dst), tag)?);
    if !ctx.disable_mdc {
        top.push(&[1])?;
    }

    let cfb = Cfb::new(cipher, &sess_key, ctx.disable_mdc, None)?;
    sess_key.zeroize();
    top = Box::new(CfbPush {
        next: top,
        cfb,
        buf: Vec::new(),
    });
    if !ctx.disable_mdc {
        top = Box::new(MdcPush {
            next: top,
            hash: Hasher::new(DigestAlgo::Sha1),
        });
    }

    // random prefix with its 2-byte repeat, hashed by the MDC layer
    let bs = cipher.block_size();
    let mut prefix = [0u8; crate::cfb::MAX_BLOCK + 2];
    rnd::random_bytes(&mut prefix[..bs])?;
    prefix[bs] = prefix[bs - 2];
    prefix[bs + 1] = prefix[bs - 1];
    top.push(&prefix[..bs + 2])?;
    prefix.zeroize();

    if ctx.compress_algo != CompressAlgo::None && ctx.compress_level > 0 {
        top = Box::new(PktWriter::new(top, packet::TAG_COMPRESSED_DATA)?);
        top.push(&[ctx.compress_algo.code()])?;
        top = Box::new(CompressPush::new(ctx.compress_algo, ctx.compress_level, top)?);
    }

    // literal data: format byte, empty name, zero date
    top = Box::new(PktWriter::new(top, packet::TAG_LITERAL_DATA)?);
    let fmt = if ctx.text_mode {
        if ctx.unicode_mode {
            b'u'
        } else {
            b't'
        }
    } else {
        b'b'
    };
    top.push(&[fmt, 0, 0, 0, 0, 0])?;

    // newline expansion applies to the raw text, above the framer
    if ctx.text_mode && ctx.convert_crlf {
        top = Box::new(CrlfPush { next: top });
    }

    loop {
        let chunk = src.pull(8 * 1024)?;
        if chunk.is_empty() {
            break;
        }
        top.push(chunk)?;
    }
    top.flush()
}
