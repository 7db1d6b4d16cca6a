//! String-to-Key: password-based key derivation, RFC 4880 §3.7.
//!
//! Three modes: simple (0) hashes the password alone, salted (1) prefixes
//! an 8-byte salt, iterated+salted (3) hashes the repeating `salt‖password`
//! sequence cut off at a decoded byte count. When the derived key is longer
//! than one digest, further digest contexts are preloaded with an
//! increasing number of zero bytes and their outputs concatenated.

use zeroize::Zeroize;

use crate::digest::{DigestAlgo, Hasher};
use crate::error::{Error, Result};
use crate::filter::{get_byte, pull_exact, PullFilter};
use crate::rnd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S2kMode {
    Simple,
    Salted,
    IteratedSalted,
}

impl S2kMode {
    pub fn from_code(code: u8) -> Result<S2kMode> {
        match code {
            0 => Ok(S2kMode::Simple),
            1 => Ok(S2kMode::Salted),
            3 => Ok(S2kMode::IteratedSalted),
            _ => {
                tracing::debug!(code, "s2k: unknown mode");
                Err(Error::CorruptData)
            }
        }
    }

    pub fn code(self) -> u8 {
        match self {
            S2kMode::Simple => 0,
            S2kMode::Salted => 1,
            S2kMode::IteratedSalted => 3,
        }
    }
}

/// Decode an iteration byte into a byte count in [1024, 65011712].
pub fn decode_count(c: u8) -> u32 {
    (16 + (c & 15) as u32) << ((c >> 4) + 6)
}

/// Smallest iteration byte whose decoded count is at least `count`,
/// saturating at 255.
pub fn encode_count(count: u32) -> u8 {
    for c in 0..=255u8 {
        if decode_count(c) >= count {
            return c;
        }
    }
    255
}

pub struct S2k {
    pub mode: S2kMode,
    pub digest_algo: DigestAlgo,
    pub salt: [u8; 8],
    pub iter: u8,
    key: Vec<u8>,
}

impl S2k {
    /// Fresh parameters for encryption. `count = None` picks the default
    /// iteration range (roughly 64k–256k bytes).
    pub fn generate(mode: S2kMode, digest_algo: DigestAlgo, count: Option<u32>) -> Result<S2k> {
        let mut salt = [0u8; 8];
        if mode != S2kMode::Simple {
            rnd::random_bytes(&mut salt)?;
        }
        let iter = if mode == S2kMode::IteratedSalted {
            match count {
                Some(c) => encode_count(c),
                None => 96 + rnd::random_u8()? % 32,
            }
        } else {
            0
        };
        Ok(S2k {
            mode,
            digest_algo,
            salt,
            iter,
            key: Vec::new(),
        })
    }

    /// Parse the wire form: mode, digest algo, then salt and iteration byte
    /// as the mode requires.
    pub fn read(src: &mut dyn PullFilter) -> Result<S2k> {
        let mode = S2kMode::from_code(get_byte(src)?)?;
        let digest_algo = DigestAlgo::from_code(get_byte(src)?)?;
        let mut salt = [0u8; 8];
        if mode != S2kMode::Simple {
            pull_exact(src, &mut salt)?;
        }
        let iter = if mode == S2kMode::IteratedSalted {
            get_byte(src)?
        } else {
            0
        };
        Ok(S2k {
            mode,
            digest_algo,
            salt,
            iter,
            key: Vec::new(),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.mode.code());
        out.push(self.digest_algo.code());
        if self.mode != S2kMode::Simple {
            out.extend_from_slice(&self.salt);
        }
        if self.mode == S2kMode::IteratedSalted {
            out.push(self.iter);
        }
    }

    /// Derive `key_len` bytes from `password` into the key slot.
    pub fn derive(&mut self, password: &[u8], key_len: usize) -> Result<()> {
        let hash_len = self.digest_algo.result_size();
        let mut key = vec![0u8; key_len];
        let mut off = 0;
        let mut preload = 0usize;

        while off < key_len {
            let mut h = Hasher::new(self.digest_algo);
            for _ in 0..preload {
                h.update(&[0]);
            }

            match self.mode {
                S2kMode::Simple => h.update(password),
                S2kMode::Salted => {
                    h.update(&self.salt);
                    h.update(password);
                }
                S2kMode::IteratedSalted => {
                    let mut combined = Vec::with_capacity(8 + password.len());
                    combined.extend_from_slice(&self.salt);
                    combined.extend_from_slice(password);
                    // hash exactly the decoded count of bytes from the
                    // repeating sequence, but never less than one full copy
                    let mut remain = (decode_count(self.iter) as usize).max(combined.len());
                    while remain >= combined.len() {
                        h.update(&combined);
                        remain -= combined.len();
                    }
                    h.update(&combined[..remain]);
                    combined.zeroize();
                }
            }

            let digest = h.finish();
            let n = (key_len - off).min(hash_len);
            key[off..off + n].copy_from_slice(&digest[..n]);
            off += n;
            preload += 1;
        }

        self.key.zeroize();
        self.key = key;
        Ok(())
    }

    /// The derived key. Empty until [`S2k::derive`] has run.
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for S2k {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
