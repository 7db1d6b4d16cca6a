//! Hash algorithms and dispatch.

use digest::Digest as _;

use crate::error::{Error, Result};

/// Hash algorithms, by RFC 4880 id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgo {
    Md5,
    Sha1,
    Ripemd160,
    Sha256,
    Sha384,
    Sha512,
    Sha224,
}

impl DigestAlgo {
    pub fn from_code(code: u8) -> Result<DigestAlgo> {
        match code {
            1 => Ok(DigestAlgo::Md5),
            2 => Ok(DigestAlgo::Sha1),
            3 => Ok(DigestAlgo::Ripemd160),
            8 => Ok(DigestAlgo::Sha256),
            9 => Ok(DigestAlgo::Sha384),
            10 => Ok(DigestAlgo::Sha512),
            11 => Ok(DigestAlgo::Sha224),
            _ => Err(Error::UnsupportedHash),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DigestAlgo::Md5 => 1,
            DigestAlgo::Sha1 => 2,
            DigestAlgo::Ripemd160 => 3,
            DigestAlgo::Sha256 => 8,
            DigestAlgo::Sha384 => 9,
            DigestAlgo::Sha512 => 10,
            DigestAlgo::Sha224 => 11,
        }
    }

    pub fn from_name(name: &str) -> Result<DigestAlgo> {
        match name {
            "md5" => Ok(DigestAlgo::Md5),
            "sha1" | "sha-1" => Ok(DigestAlgo::Sha1),
            "ripemd160" => Ok(DigestAlgo::Ripemd160),
            "sha256" => Ok(DigestAlgo::Sha256),
            "sha384" => Ok(DigestAlgo::Sha384),
            "sha512" => Ok(DigestAlgo::Sha512),
            "sha224" => Ok(DigestAlgo::Sha224),
            _ => Err(Error::UnsupportedHash),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestAlgo::Md5 => "md5",
            DigestAlgo::Sha1 => "sha1",
            DigestAlgo::Ripemd160 => "ripemd160",
            DigestAlgo::Sha256 => "sha256",
            DigestAlgo::Sha384 => "sha384",
            DigestAlgo::Sha512 => "sha512",
            DigestAlgo::Sha224 => "sha224",
        }
    }

    pub fn result_size(self) -> usize {
        match self {
            DigestAlgo::Md5 => 16,
            DigestAlgo::Sha1 => 20,
            DigestAlgo::Ripemd160 => 20,
            DigestAlgo::Sha256 => 32,
            DigestAlgo::Sha384 => 48,
            DigestAlgo::Sha512 => 64,
            DigestAlgo::Sha224 => 28,
        }
    }
}

/// A running hash context.
#[derive(Clone)]
pub enum Hasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Ripemd160(ripemd::Ripemd160),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
    Sha224(sha2::Sha224),
}

impl Hasher {
    pub fn new(algo: DigestAlgo) -> Hasher {
        match algo {
            DigestAlgo::Md5 => Hasher::Md5(md5::Md5::new()),
            DigestAlgo::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            DigestAlgo::Ripemd160 => Hasher::Ripemd160(ripemd::Ripemd160::new()),
            DigestAlgo::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            DigestAlgo::Sha384 => Hasher::Sha384(sha2::Sha384::new()),
            DigestAlgo::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
            DigestAlgo::Sha224 => Hasher::Sha224(sha2::Sha224::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Ripemd160(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Sha224(h) => h.update(data),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        match self {
            Hasher::Md5(h) => h.finalize().to_vec(),
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Ripemd160(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
            Hasher::Sha224(h) => h.finalize().to_vec(),
        }
    }

    /// Digest of everything hashed so far, without disturbing the running
    /// state.
    pub fn finish_copy(&self) -> Vec<u8> {
        self.clone().finish()
    }
}
