//! Per-operation configuration.
//!
//! A [`Context`] carries the options for one encrypt or decrypt call plus
//! the key material. Exactly one of the symmetric password or a public key
//! must be set before driving an operation. During decryption the
//! algorithm fields are overwritten with what the message actually used,
//! which is what the `expect-*` test options compare against.

use zeroize::Zeroize;

use crate::cipher::CipherAlgo;
use crate::compress::CompressAlgo;
use crate::digest::DigestAlgo;
use crate::error::{Error, Result};
use crate::mbuf::MBuf;
use crate::pubkey::{self, PubKey};
use crate::s2k::S2kMode;

#[derive(Default)]
struct Expect {
    cipher_algo: Option<CipherAlgo>,
    disable_mdc: Option<bool>,
    sess_key: Option<bool>,
    s2k_mode: Option<S2kMode>,
    s2k_count: Option<u32>,
    s2k_digest_algo: Option<DigestAlgo>,
    compress_algo: Option<u8>,
    unicode_mode: Option<bool>,
}

pub struct Context {
    pub(crate) cipher_algo: CipherAlgo,
    pub(crate) s2k_mode: S2kMode,
    pub(crate) s2k_count: Option<u32>,
    pub(crate) s2k_digest_algo: DigestAlgo,
    pub(crate) s2k_cipher_algo: Option<CipherAlgo>,
    pub(crate) compress_algo: CompressAlgo,
    pub(crate) compress_level: u32,
    pub(crate) disable_mdc: bool,
    pub(crate) use_sess_key: bool,
    pub(crate) text_mode: bool,
    pub(crate) convert_crlf: bool,
    pub(crate) unicode_mode: bool,
    pub(crate) sym_key: Option<Vec<u8>>,
    pub(crate) pub_key: Option<Box<PubKey>>,
    expect: Expect,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            cipher_algo: CipherAlgo::Aes128,
            s2k_mode: S2kMode::IteratedSalted,
            s2k_count: None,
            s2k_digest_algo: DigestAlgo::Sha1,
            s2k_cipher_algo: None,
            compress_algo: CompressAlgo::None,
            compress_level: 6,
            disable_mdc: false,
            use_sess_key: false,
            text_mode: false,
            convert_crlf: false,
            unicode_mode: false,
            sym_key: None,
            pub_key: None,
            expect: Expect::default(),
        }
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(Error::ArgumentError),
    }
}

fn parse_int(value: &str) -> Result<u32> {
    value.parse().map_err(|_| Error::ArgumentError)
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    pub fn set_cipher_algo(&mut self, name: &str) -> Result<()> {
        self.cipher_algo = CipherAlgo::from_name(name)?;
        Ok(())
    }

    pub fn set_s2k_cipher_algo(&mut self, name: &str) -> Result<()> {
        self.s2k_cipher_algo = Some(CipherAlgo::from_name(name)?);
        Ok(())
    }

    pub fn set_s2k_digest_algo(&mut self, name: &str) -> Result<()> {
        self.s2k_digest_algo = DigestAlgo::from_name(name)?;
        Ok(())
    }

    pub fn set_s2k_mode(&mut self, mode: u32) -> Result<()> {
        self.s2k_mode = match mode {
            0 => S2kMode::Simple,
            1 => S2kMode::Salted,
            3 => S2kMode::IteratedSalted,
            _ => return Err(Error::ArgumentError),
        };
        Ok(())
    }

    pub fn set_s2k_count(&mut self, count: u32) -> Result<()> {
        if !(1024..=65011712).contains(&count) {
            return Err(Error::ArgumentError);
        }
        self.s2k_count = Some(count);
        Ok(())
    }

    pub fn set_compress_algo(&mut self, algo: u32) -> Result<()> {
        self.compress_algo = match algo {
            0 => CompressAlgo::None,
            1 => CompressAlgo::Zip,
            2 => CompressAlgo::Zlib,
            _ => return Err(Error::ArgumentError),
        };
        Ok(())
    }

    pub fn set_compress_level(&mut self, level: u32) -> Result<()> {
        if level > 9 {
            return Err(Error::ArgumentError);
        }
        self.compress_level = level;
        Ok(())
    }

    pub fn set_disable_mdc(&mut self, disable: bool) {
        self.disable_mdc = disable;
    }

    pub fn set_sess_key(&mut self, use_sess_key: bool) {
        self.use_sess_key = use_sess_key;
    }

    pub fn set_text_mode(&mut self, text: bool) {
        self.text_mode = text;
    }

    pub fn set_convert_crlf(&mut self, convert: bool) {
        self.convert_crlf = convert;
    }

    pub fn set_unicode_mode(&mut self, unicode: bool) {
        self.unicode_mode = unicode;
    }

    /// Whether the literal data identified itself as UTF-8 text. Valid
    /// after a decrypt.
    pub fn unicode_mode(&self) -> bool {
        self.unicode_mode
    }

    /// The password for symmetric operation (it feeds S2K, it is not used
    /// as a raw key).
    pub fn set_symmetric_key(&mut self, password: &[u8]) {
        if let Some(old) = self.sym_key.as_mut() {
            old.zeroize();
        }
        self.sym_key = Some(password.to_vec());
    }

    /// Parse a keyring and select its encryption subkey. `need_secret` is
    /// set when the context will be used for decryption.
    pub fn set_public_key(
        &mut self,
        keyring: &mut MBuf,
        password: Option<&[u8]>,
        need_secret: bool,
    ) -> Result<()> {
        let key = pubkey::load_key(keyring, password, need_secret)?;
        self.pub_key = Some(Box::new(key));
        Ok(())
    }

    /// The `key=value` option surface exposed to thin wrappers.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "cipher-algo" => self.set_cipher_algo(value),
            "s2k-cipher-algo" => self.set_s2k_cipher_algo(value),
            "s2k-digest-algo" => self.set_s2k_digest_algo(value),
            "s2k-mode" => self.set_s2k_mode(parse_int(value)?),
            "s2k-count" => self.set_s2k_count(parse_int(value)?),
            "compress-algo" => self.set_compress_algo(parse_int(value)?),
            "compress-level" => self.set_compress_level(parse_int(value)?),
            "disable-mdc" => {
                self.set_disable_mdc(parse_flag(value)?);
                Ok(())
            }
            "sess-key" => {
                self.set_sess_key(parse_flag(value)?);
                Ok(())
            }
            "convert-crlf" => {
                self.set_convert_crlf(parse_flag(value)?);
                Ok(())
            }
            "unicode-mode" => {
                self.set_unicode_mode(parse_flag(value)?);
                Ok(())
            }
            "expect-cipher-algo" => {
                self.expect.cipher_algo = Some(CipherAlgo::from_name(value)?);
                Ok(())
            }
            "expect-disable-mdc" => {
                self.expect.disable_mdc = Some(parse_flag(value)?);
                Ok(())
            }
            "expect-sess-key" => {
                self.expect.sess_key = Some(parse_flag(value)?);
                Ok(())
            }
            "expect-s2k-mode" => {
                let mode = match parse_int(value)? {
                    0 => S2kMode::Simple,
                    1 => S2kMode::Salted,
                    3 => S2kMode::IteratedSalted,
                    _ => return Err(Error::ArgumentError),
                };
                self.expect.s2k_mode = Some(mode);
                Ok(())
            }
            "expect-s2k-count" => {
                self.expect.s2k_count = Some(parse_int(value)?);
                Ok(())
            }
            "expect-s2k-digest-algo" => {
                self.expect.s2k_digest_algo = Some(DigestAlgo::from_name(value)?);
                Ok(())
            }
            "expect-compress-algo" => {
                let algo = parse_int(value)?;
                if algo > 3 {
                    return Err(Error::ArgumentError);
                }
                self.expect.compress_algo = Some(algo as u8);
                Ok(())
            }
            "expect-unicode-mode" => {
                self.expect.unicode_mode = Some(parse_flag(value)?);
                Ok(())
            }
            _ => {
                tracing::debug!(key, "unknown option");
                Err(Error::ArgumentError)
            }
        }
    }

    /// Compare the `expect-*` options against what a decrypt observed.
    /// Mismatches only warn; they never change the result.
    pub(crate) fn check_expectations(&self) {
        if let Some(want) = self.expect.cipher_algo {
            if want != self.cipher_algo {
                tracing::warn!(expected = want.name(), got = self.cipher_algo.name(), "cipher-algo mismatch");
            }
        }
        if let Some(want) = self.expect.disable_mdc {
            if want != self.disable_mdc {
                tracing::warn!(expected = want, got = self.disable_mdc, "disable-mdc mismatch");
            }
        }
        if let Some(want) = self.expect.sess_key {
            if want != self.use_sess_key {
                tracing::warn!(expected = want, got = self.use_sess_key, "sess-key mismatch");
            }
        }
        if let Some(want) = self.expect.s2k_mode {
            if want != self.s2k_mode {
                tracing::warn!(expected = want.code(), got = self.s2k_mode.code(), "s2k-mode mismatch");
            }
        }
        if let Some(want) = self.expect.s2k_count {
            if Some(want) != self.s2k_count {
                tracing::warn!(expected = want, "s2k-count mismatch");
            }
        }
        if let Some(want) = self.expect.s2k_digest_algo {
            if want != self.s2k_digest_algo {
                tracing::warn!(expected = want.name(), got = self.s2k_digest_algo.name(), "s2k-digest-algo mismatch");
            }
        }
        if let Some(want) = self.expect.compress_algo {
            if want != self.compress_algo.code() {
                tracing::warn!(expected = want, got = self.compress_algo.code(), "compress-algo mismatch");
            }
        }
        if let Some(want) = self.expect.unicode_mode {
            if want != self.unicode_mode {
                tracing::warn!(expected = want, got = self.unicode_mode, "unicode-mode mismatch");
            }
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some(key) = self.sym_key.as_mut() {
            key.zeroize();
        }
    }
}
