//! OpenPGP CFB mode.
//!
//! Standard CFB over an 8- or 16-byte block cipher, plus the legacy
//! "resync" variant used by symmetrically encrypted data packets without an
//! MDC: there, the second ciphertext block carries only the two prefix
//! repeat bytes, and the feedback register is then realigned to the last
//! `block_size` bytes of ciphertext before normal processing resumes.
//!
//! Only the encrypt direction of the block primitive is ever used.

use zeroize::Zeroize;

use crate::cipher::{BlockCipher, CipherAlgo};
use crate::error::{Error, Result};

pub const MAX_BLOCK: usize = 16;

pub struct Cfb {
    ciph: BlockCipher,
    bs: usize,
    resync: bool,
    /// Feedback register.
    fr: [u8; MAX_BLOCK],
    /// Encrypted feedback register.
    fre: [u8; MAX_BLOCK],
    /// Ciphertext of the block being assembled.
    encbuf: [u8; MAX_BLOCK],
    pos: usize,
    /// 1-based index of the block being filled, saturating at 5.
    block_no: usize,
}

impl Cfb {
    /// `iv = None` means an all-zero IV.
    pub fn new(algo: CipherAlgo, key: &[u8], resync: bool, iv: Option<&[u8]>) -> Result<Cfb> {
        let bs = algo.block_size();
        let mut fr = [0u8; MAX_BLOCK];
        if let Some(iv) = iv {
            if iv.len() != bs {
                return Err(Error::ArgumentError);
            }
            fr[..bs].copy_from_slice(iv);
        }
        Ok(Cfb {
            ciph: BlockCipher::new(algo, key)?,
            bs,
            resync,
            fr,
            fre: [0u8; MAX_BLOCK],
            encbuf: [0u8; MAX_BLOCK],
            pos: 0,
            block_no: 1,
        })
    }

    pub fn block_size(&self) -> usize {
        self.bs
    }

    fn mix_byte(&mut self, b: u8, decrypting: bool) -> u8 {
        if self.pos == 0 {
            self.fre[..self.bs].copy_from_slice(&self.fr[..self.bs]);
            self.ciph.encrypt_block(&mut self.fre[..self.bs]);
        }

        let (ct, out) = if decrypting {
            (b, self.fre[self.pos] ^ b)
        } else {
            let c = self.fre[self.pos] ^ b;
            (c, c)
        };
        self.encbuf[self.pos] = ct;
        self.pos += 1;

        // the resync variant's block 2 is exactly 2 bytes long
        let in_short_block = self.resync && self.block_no == 2;
        let limit = if in_short_block { 2 } else { self.bs };
        if self.pos >= limit {
            if in_short_block {
                // realign: tail of block-1 ciphertext, then the two bytes
                // of block 2
                let bs = self.bs;
                let mut nfr = [0u8; MAX_BLOCK];
                nfr[..bs - 2].copy_from_slice(&self.fr[2..bs]);
                nfr[bs - 2] = self.encbuf[0];
                nfr[bs - 1] = self.encbuf[1];
                self.fr[..bs].copy_from_slice(&nfr[..bs]);
                nfr.zeroize();
            } else {
                self.fr[..self.bs].copy_from_slice(&self.encbuf[..self.bs]);
            }
            self.pos = 0;
            self.block_no = (self.block_no + 1).min(5);
        }
        out
    }

    /// Encrypt `src`, appending the ciphertext to `dst`.
    pub fn encrypt(&mut self, src: &[u8], dst: &mut Vec<u8>) {
        dst.reserve(src.len());
        for &b in src {
            let c = self.mix_byte(b, false);
            dst.push(c);
        }
    }

    /// Decrypt `src` into `dst`; the slices must be the same length.
    pub fn decrypt(&mut self, src: &[u8], dst: &mut [u8]) {
        debug_assert_eq!(src.len(), dst.len());
        for (i, &b) in src.iter().enumerate() {
            dst[i] = self.mix_byte(b, true);
        }
    }
}

impl Drop for Cfb {
    fn drop(&mut self) {
        self.fr.zeroize();
        self.fre.zeroize();
        self.encbuf.zeroize();
    }
}
