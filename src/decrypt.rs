//! Message decryption.
//!
//! The pull chain, bottom-up: packet reader over the input buffer, CFB
//! decryption, the MDC hasher (tag 18), the prefix quick-check, then the
//! inner packet loop. Two MDC strategies exist: the hash filter for
//! normally-delimited streams, and a buffering reader holding back the
//! final 22 bytes when the inner packet's length runs to end-of-stream.
//!
//! Failure discipline: the prefix check never aborts on its own — its
//! result is latched and reported only after the whole message has been
//! consumed, and every failure inside payload processing collapses into
//! `CorruptData`, so a chosen-ciphertext attacker learns nothing from the
//! error kind (Mister–Zuccherato).

use std::cell::RefCell;
use std::rc::Rc;

use zeroize::Zeroize;

use crate::cfb::Cfb;
use crate::cipher::CipherAlgo;
use crate::compress::{CompressAlgo, DecompressPull};
use crate::context::Context;
use crate::digest::{DigestAlgo, Hasher};
use crate::error::{Error, Result};
use crate::filter::{get_byte, pull_exact, pull_max, skip_remaining, PullFilter};
use crate::mbuf::MBuf;
use crate::packet::{self, parse_pkt_hdr, PktLen, PktReader};
use crate::pubdec;
use crate::s2k::{decode_count, S2k};

/// State shared between the driver and the filters stacked over the
/// ciphertext.
#[derive(Default)]
struct DecState {
    mdc_hash: Option<Hasher>,
    in_mdc_pkt: bool,
    use_mdcbuf: bool,
    mdc_checked: bool,
    corrupt_prefix: bool,
    unsupported_compr: bool,
    unexpected_binary: bool,
}

type Shared = Rc<RefCell<DecState>>;

/// CFB decryption layer.
struct CfbPull<'a> {
    src: &'a mut dyn PullFilter,
    cfb: Cfb,
    buf: Vec<u8>,
}

impl PullFilter for CfbPull<'_> {
    fn pull(&mut self, max: usize) -> Result<&[u8]> {
        let chunk = self.src.pull(max.min(4096))?;
        if chunk.is_empty() {
            return Ok(&[]);
        }
        self.buf.resize(chunk.len(), 0);
        self.cfb.decrypt(chunk, &mut self.buf);
        Ok(&self.buf)
    }
}

/// Hashes every byte flowing past, except while the MDC packet body itself
/// is being read (its two-byte header *is* hashed, since the header goes
/// by before the flag is raised).
struct MdcPull<'a> {
    src: &'a mut dyn PullFilter,
    st: Shared,
}

impl PullFilter for MdcPull<'_> {
    fn pull(&mut self, max: usize) -> Result<&[u8]> {
        let chunk = self.src.pull(max)?;
        let mut st = self.st.borrow_mut();
        if st.use_mdcbuf || st.in_mdc_pkt {
            return Ok(chunk);
        }
        if chunk.is_empty() {
            tracing::debug!("mdc: unexpected eof");
            return Err(Error::CorruptData);
        }
        st.mdc_hash.as_mut().ok_or(Error::Bug)?.update(chunk);
        Ok(chunk)
    }
}

/// Checks the random prefix's 2-byte repeat at construction and then
/// passes data through untouched. A mismatch is latched, not raised.
struct PrefixPull<'a> {
    src: &'a mut dyn PullFilter,
}

impl<'a> PrefixPull<'a> {
    fn new(src: &'a mut dyn PullFilter, block_size: usize, st: &Shared) -> Result<PrefixPull<'a>> {
        let mut tmp = [0u8; crate::cfb::MAX_BLOCK + 2];
        let got = pull_max(src, &mut tmp[..block_size + 2])?;
        if got != block_size + 2 {
            tracing::debug!("prefix: short read");
            tmp.zeroize();
            return Err(Error::CorruptData);
        }
        if tmp[block_size - 2] != tmp[block_size] || tmp[block_size - 1] != tmp[block_size + 1] {
            tracing::debug!("prefix: corrupt prefix");
            // reported at the end of decrypt()
            st.borrow_mut().corrupt_prefix = true;
        }
        tmp.zeroize();
        Ok(PrefixPull { src })
    }
}

impl PullFilter for PrefixPull<'_> {
    fn pull(&mut self, max: usize) -> Result<&[u8]> {
        self.src.pull(max)
    }
}

/// Combined packet reader and MDC hasher for an inner packet whose length
/// runs to end-of-stream: the final 22 bytes must be the MDC packet, but
/// that is only known at EOF, so a 22-byte tail is always withheld from
/// the consumer and from the hash.
struct MdcBufPull<'a> {
    src: &'a mut dyn PullFilter,
    st: Shared,
    buf: Vec<u8>,
    pos: usize,
    mdc_buf: [u8; 22],
    mdc_avail: usize,
    eof: bool,
}

const MDCBUF_LEN: usize = 8192;

impl<'a> MdcBufPull<'a> {
    fn new(src: &'a mut dyn PullFilter, st: Shared) -> MdcBufPull<'a> {
        // take over the work of the plain mdc filter
        st.borrow_mut().use_mdcbuf = true;
        MdcBufPull {
            src,
            st,
            buf: Vec::with_capacity(MDCBUF_LEN),
            pos: 0,
            mdc_buf: [0u8; 22],
            mdc_avail: 0,
            eof: false,
        }
    }

    fn load_data(&mut self, data: &[u8]) -> Result<()> {
        let mut st = self.st.borrow_mut();
        st.mdc_hash.as_mut().ok_or(Error::Bug)?.update(data);
        drop(st);
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.eof = true;
        if self.mdc_avail != 22 || self.mdc_buf[0] != 0xD3 || self.mdc_buf[1] != 0x14 {
            tracing::debug!("mdcbuf: bad MDC packet header");
            return Err(Error::CorruptData);
        }
        let mut st = self.st.borrow_mut();
        let mut hash = st.mdc_hash.take().ok_or(Error::Bug)?;
        hash.update(&self.mdc_buf[..2]);
        let digest = hash.finish();
        if digest != self.mdc_buf[2..] {
            tracing::debug!("mdcbuf: MDC does not match");
            return Err(Error::CorruptData);
        }
        st.mdc_checked = true;
        Ok(())
    }

    fn refill(&mut self) -> Result<()> {
        self.buf.drain(..self.pos);
        self.pos = 0;

        let need = MDCBUF_LEN + 22 - self.buf.len() - self.mdc_avail;
        let data = self.src.pull(need)?.to_vec();
        if data.is_empty() {
            return self.finish();
        }

        if data.len() >= 22 {
            // the withheld tail is ordinary data after all
            let tail = self.mdc_buf;
            let tail_len = self.mdc_avail;
            self.mdc_avail = 0;
            self.load_data(&tail[..tail_len])?;
            self.load_data(&data[..data.len() - 22])?;
            self.mdc_buf.copy_from_slice(&data[data.len() - 22..]);
            self.mdc_avail = 22;
        } else {
            let canmove = (self.mdc_avail + data.len()).saturating_sub(22);
            if canmove > 0 {
                let head = self.mdc_buf;
                self.load_data(&head[..canmove])?;
                self.mdc_buf.copy_within(canmove..self.mdc_avail, 0);
                self.mdc_avail -= canmove;
            }
            self.mdc_buf[self.mdc_avail..self.mdc_avail + data.len()].copy_from_slice(&data);
            self.mdc_avail += data.len();
        }
        Ok(())
    }
}

impl PullFilter for MdcBufPull<'_> {
    fn pull(&mut self, max: usize) -> Result<&[u8]> {
        if !self.eof && self.buf.len() - self.pos < max {
            self.refill()?;
        }
        let n = max.min(self.buf.len() - self.pos);
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

/// Decrypt a separate session key carried inside a tag-3 packet.
fn decrypt_sesskey(
    s2k_cipher: CipherAlgo,
    s2k_key: &[u8],
    enc: &[u8],
) -> Result<(CipherAlgo, Vec<u8>)> {
    let mut cfb = Cfb::new(s2k_cipher, s2k_key, false, None)?;
    let mut plain = vec![0u8; enc.len()];
    cfb.decrypt(enc, &mut plain);

    let algo = match CipherAlgo::from_code(plain[0]) {
        Ok(a) => a,
        Err(_) => {
            tracing::debug!(code = plain[0], "sesskey: unknown cipher");
            plain.zeroize();
            return Err(Error::CorruptData);
        }
    };
    let key = plain[1..].to_vec();
    plain.zeroize();
    if key.len() != algo.key_size() {
        tracing::debug!(
            got = key.len(),
            want = algo.key_size(),
            "sesskey: bad length"
        );
        return Err(Error::CorruptData);
    }
    Ok((algo, key))
}

/// Tag 3: derive the S2K key from the password; it either is the session
/// key or decrypts the one carried in the packet.
fn parse_symenc_sesskey(
    ctx: &mut Context,
    pkt: &mut dyn PullFilter,
) -> Result<(CipherAlgo, Vec<u8>)> {
    let ver = get_byte(pkt)?;
    let cipher_code = get_byte(pkt)?;
    if ver != 4 {
        tracing::debug!(ver, "symenc sesskey: bad version");
        return Err(Error::CorruptData);
    }
    let s2k_cipher = CipherAlgo::from_code(cipher_code)?;
    let mut s2k = S2k::read(pkt)?;

    // record what the message used, for the expect checks
    ctx.s2k_mode = s2k.mode;
    ctx.s2k_digest_algo = s2k.digest_algo;
    ctx.s2k_count = match s2k.mode {
        crate::s2k::S2kMode::IteratedSalted => Some(decode_count(s2k.iter)),
        _ => None,
    };
    ctx.s2k_cipher_algo = Some(s2k_cipher);

    let password = ctx.sym_key.as_deref().ok_or(Error::Bug)?;
    s2k.derive(password, s2k_cipher.key_size())?;

    // optional encrypted session key: 1 algo byte + 16..32 key bytes
    let mut tmp = [0u8; 34];
    let n = pull_max(pkt, &mut tmp)?;
    let out = if n == 0 {
        ctx.use_sess_key = false;
        ctx.cipher_algo = s2k_cipher;
        Ok((s2k_cipher, s2k.key().to_vec()))
    } else if !(17..=33).contains(&n) {
        tracing::debug!(n, "symenc sesskey: expected key, bad data");
        Err(Error::CorruptData)
    } else {
        ctx.use_sess_key = true;
        let r = decrypt_sesskey(s2k_cipher, s2k.key(), &tmp[..n]);
        if let Ok((algo, _)) = &r {
            ctx.cipher_algo = *algo;
        }
        r
    };
    tmp.zeroize();
    out
}

/// Collapse `\r\n` to `\n`, carrying a dangling `\r` across chunk
/// boundaries. `data` is never empty here.
fn copy_crlf(dst: &mut MBuf, data: &[u8], got_cr: &mut bool) -> Result<()> {
    let mut out = Vec::with_capacity(data.len() + 1);
    let mut i = 0;
    if *got_cr {
        if data[0] != b'\n' {
            out.push(b'\r');
        }
        *got_cr = false;
    }
    while i < data.len() {
        if data[i] == b'\r' {
            if i + 1 >= data.len() {
                *got_cr = true;
                break;
            }
            if data[i + 1] == b'\n' {
                i += 1;
            }
        }
        out.push(data[i]);
        i += 1;
    }
    let res = dst.append(&out);
    out.zeroize();
    res
}

fn parse_literal_data(
    ctx: &mut Context,
    st: &Shared,
    dst: &mut MBuf,
    pkt: &mut dyn PullFilter,
) -> Result<()> {
    let fmt = get_byte(pkt)?;
    let mut name_len = get_byte(pkt)? as usize;

    while name_len > 0 {
        let chunk = pkt.pull(name_len)?;
        if chunk.is_empty() {
            tracing::debug!("literal: eof in name");
            return Err(Error::CorruptData);
        }
        name_len -= chunk.len();
    }
    let mut date = [0u8; 4];
    pull_exact(pkt, &mut date)?;

    // a text-mode caller must not silently receive binary data
    if ctx.text_mode && fmt != b't' && fmt != b'u' {
        tracing::debug!(fmt, "literal: binary data in text mode");
        st.borrow_mut().unexpected_binary = true;
    }
    ctx.unicode_mode = fmt == b'u';

    let mut got_cr = false;
    loop {
        let chunk = pkt.pull(32 * 1024)?;
        if chunk.is_empty() {
            break;
        }
        if ctx.text_mode && ctx.convert_crlf {
            copy_crlf(dst, chunk, &mut got_cr)?;
        } else {
            dst.append(chunk)?;
        }
    }
    if got_cr {
        dst.append(b"\r")?;
    }
    Ok(())
}

fn parse_compressed_data(
    ctx: &mut Context,
    st: &Shared,
    dst: &mut MBuf,
    pkt: &mut dyn PullFilter,
) -> Result<()> {
    let algo = CompressAlgo::from_code(get_byte(pkt)?)?;
    ctx.compress_algo = algo;
    match algo {
        CompressAlgo::None => process_data_packets(ctx, st, dst, pkt, false, false),
        CompressAlgo::Zip | CompressAlgo::Zlib => {
            let mut inflater = DecompressPull::new(algo, pkt)?;
            process_data_packets(ctx, st, dst, &mut inflater, false, false)
        }
        CompressAlgo::Bzip2 => {
            tracing::debug!("compressed data: bzip2 unsupported");
            // reported at the end of decrypt(); the stream must still be
            // consumed so an enclosing MDC can be validated
            st.borrow_mut().unsupported_compr = true;
            skip_remaining(pkt)
        }
    }
}

fn mdc_finish(st: &Shared, pkt: &mut dyn PullFilter, len: PktLen) -> Result<()> {
    if len != PktLen::Normal(20) {
        tracing::debug!("mdc: bad packet length");
        return Err(Error::CorruptData);
    }
    {
        let mut stb = st.borrow_mut();
        if stb.use_mdcbuf {
            return Err(Error::Bug);
        }
        // the 20 hash bytes themselves stay out of the hash
        stb.in_mdc_pkt = true;
    }
    let mut data = [0u8; 20];
    pull_exact(pkt, &mut data)?;

    let mut stb = st.borrow_mut();
    let hash = stb.mdc_hash.take().ok_or(Error::Bug)?;
    let digest = hash.finish();
    if digest != data {
        tracing::debug!("mdc: hash mismatch");
        return Err(Error::CorruptData);
    }
    stb.mdc_checked = true;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_data_packet(
    ctx: &mut Context,
    st: &Shared,
    dst: &mut MBuf,
    tag: u8,
    len: PktLen,
    pkt: &mut dyn PullFilter,
    allow_compr: bool,
    need_mdc: bool,
    got_data: &mut bool,
    got_mdc: &mut bool,
) -> Result<()> {
    match tag {
        packet::TAG_LITERAL_DATA => {
            if *got_data {
                tracing::debug!("data packets: second literal packet");
                return Err(Error::CorruptData);
            }
            *got_data = true;
            parse_literal_data(ctx, st, dst, pkt)
        }
        packet::TAG_COMPRESSED_DATA => {
            if !allow_compr {
                tracing::debug!("data packets: unexpected compression");
                return Err(Error::CorruptData);
            }
            if *got_data {
                tracing::debug!("data packets: compressed packet must be alone");
                return Err(Error::CorruptData);
            }
            *got_data = true;
            parse_compressed_data(ctx, st, dst, pkt)
        }
        packet::TAG_MDC => {
            if !need_mdc {
                tracing::debug!("data packets: unexpected MDC");
                return Err(Error::CorruptData);
            }
            mdc_finish(st, pkt, len)?;
            *got_mdc = true;
            Ok(())
        }
        _ => {
            tracing::debug!(tag, "data packets: unexpected packet");
            Err(Error::CorruptData)
        }
    }
}

fn process_data_packets(
    ctx: &mut Context,
    st: &Shared,
    dst: &mut MBuf,
    src: &mut dyn PullFilter,
    allow_compr: bool,
    need_mdc: bool,
) -> Result<()> {
    let mut got_data = false;
    let mut got_mdc = false;

    while let Some((tag, len)) = parse_pkt_hdr(src, true)? {
        if got_mdc {
            tracing::debug!("data packets: data after mdc");
            return Err(Error::CorruptData);
        }

        if need_mdc && len == PktLen::Context {
            let mut pkt = MdcBufPull::new(&mut *src, st.clone());
            handle_data_packet(
                ctx, st, dst, tag, len, &mut pkt, allow_compr, need_mdc, &mut got_data,
                &mut got_mdc,
            )?;
        } else {
            let mut pkt = PktReader::new(&mut *src, len);
            handle_data_packet(
                ctx, st, dst, tag, len, &mut pkt, allow_compr, need_mdc, &mut got_data,
                &mut got_mdc,
            )?;
        }
    }

    if !got_data {
        tracing::debug!("data packets: no data");
        return Err(Error::CorruptData);
    }
    if need_mdc && !got_mdc && !st.borrow().use_mdcbuf {
        tracing::debug!("data packets: no mdc");
        return Err(Error::CorruptData);
    }
    Ok(())
}

fn parse_symenc_data(
    ctx: &mut Context,
    st: &Shared,
    sess_key: &[u8],
    dst: &mut MBuf,
    pkt: &mut dyn PullFilter,
) -> Result<()> {
    let block_size = ctx.cipher_algo.block_size();
    let cfb = Cfb::new(ctx.cipher_algo, sess_key, true, None)?;
    let mut dec = CfbPull {
        src: pkt,
        cfb,
        buf: Vec::new(),
    };
    let mut pre = PrefixPull::new(&mut dec, block_size, st)?;
    process_data_packets(ctx, st, dst, &mut pre, true, false)
}

fn parse_symenc_mdc_data(
    ctx: &mut Context,
    st: &Shared,
    sess_key: &[u8],
    dst: &mut MBuf,
    pkt: &mut dyn PullFilter,
) -> Result<()> {
    let ver = get_byte(pkt)?;
    if ver != 1 {
        tracing::debug!(ver, "symenc mdc data: bad version");
        return Err(Error::CorruptData);
    }
    let block_size = ctx.cipher_algo.block_size();
    let cfb = Cfb::new(ctx.cipher_algo, sess_key, false, None)?;
    st.borrow_mut().mdc_hash = Some(Hasher::new(DigestAlgo::Sha1));
    let mut dec = CfbPull {
        src: pkt,
        cfb,
        buf: Vec::new(),
    };
    let mut mdc = MdcPull {
        src: &mut dec,
        st: st.clone(),
    };
    let mut pre = PrefixPull::new(&mut mdc, block_size, st)?;
    process_data_packets(ctx, st, dst, &mut pre, true, true)?;

    // whichever strategy ran, the hash must actually have been verified
    if !st.borrow().mdc_checked {
        tracing::debug!("symenc mdc data: hash never verified");
        return Err(Error::CorruptData);
    }
    Ok(())
}

/// Decrypt a complete OpenPGP message from `src` into `dst`.
pub fn decrypt(ctx: &mut Context, src: &mut MBuf, dst: &mut MBuf) -> Result<()> {
    let st: Shared = Rc::new(RefCell::new(DecState::default()));
    let mut got_key = false;
    let mut got_data = false;
    let mut sess_key: Vec<u8> = Vec::new();

    let result = (|| -> Result<()> {
        while let Some((tag, len)) = parse_pkt_hdr(src, false)? {
            let mut pkt = PktReader::new(&mut *src, len);
            match tag {
                packet::TAG_MARKER
                | packet::TAG_SIGNATURE
                | packet::TAG_TRUST
                | packet::TAG_USER_ID
                | packet::TAG_USER_ATTR
                | packet::TAG_PRIV_61 => skip_remaining(&mut pkt)?,
                packet::TAG_PUBENC_SESSKEY => {
                    if got_key {
                        tracing::debug!("decrypt: using first of several keys");
                        skip_remaining(&mut pkt)?;
                    } else {
                        let key = ctx.pub_key.as_deref().ok_or_else(|| {
                            tracing::debug!("decrypt: pubenc sesskey but no pubkey");
                            Error::Bug
                        })?;
                        let (algo, sk) = pubdec::parse_pubenc_sesskey(key, &mut pkt)?;
                        ctx.cipher_algo = algo;
                        sess_key = sk;
                        got_key = true;
                    }
                }
                packet::TAG_SYMENC_SESSKEY => {
                    if got_key {
                        tracing::debug!("decrypt: using first of several keys");
                        skip_remaining(&mut pkt)?;
                    } else if ctx.sym_key.is_none() {
                        tracing::debug!("decrypt: symenc sesskey but no password");
                        skip_remaining(&mut pkt)?;
                    } else {
                        let (algo, sk) = parse_symenc_sesskey(ctx, &mut pkt)?;
                        ctx.cipher_algo = algo;
                        sess_key = sk;
                        got_key = true;
                    }
                }
                packet::TAG_SYMENC_DATA => {
                    if !got_key {
                        tracing::debug!("decrypt: have data but no key");
                        return Err(Error::CorruptData);
                    }
                    if got_data {
                        tracing::debug!("decrypt: second data packet");
                        return Err(Error::CorruptData);
                    }
                    got_data = true;
                    ctx.disable_mdc = true;
                    parse_symenc_data(ctx, &st, &sess_key, dst, &mut pkt)
                        .map_err(Error::collapse)?;
                }
                packet::TAG_SYMENC_DATA_MDC => {
                    if !got_key {
                        tracing::debug!("decrypt: have data but no key");
                        return Err(Error::CorruptData);
                    }
                    if got_data {
                        tracing::debug!("decrypt: second data packet");
                        return Err(Error::CorruptData);
                    }
                    got_data = true;
                    ctx.disable_mdc = false;
                    parse_symenc_mdc_data(ctx, &st, &sess_key, dst, &mut pkt)
                        .map_err(Error::collapse)?;
                }
                _ => {
                    tracing::debug!(tag, "decrypt: unexpected packet");
                    return Err(Error::CorruptData);
                }
            }
        }
        Ok(())
    })();

    sess_key.zeroize();
    result?;

    // Latched failures surface only now, after the whole message has been
    // consumed, so their timing doesn't mark where the problem was found.
    let stb = st.borrow();
    if !got_data || stb.corrupt_prefix {
        return Err(Error::CorruptData);
    }
    if stb.unsupported_compr {
        return Err(Error::UnsupportedCompr);
    }
    if stb.unexpected_binary {
        return Err(Error::NotText);
    }
    drop(stb);

    ctx.check_expectations();
    Ok(())
}
