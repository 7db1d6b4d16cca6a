//! Block cipher algorithms and dispatch.
//!
//! The engine only ever runs the primitives in the encrypt direction:
//! OpenPGP CFB derives its keystream from block encryption on both the
//! encrypt and decrypt paths.

use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};

use crate::error::{Error, Result};

/// Symmetric cipher algorithms, by RFC 4880 id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgo {
    TripleDes,
    Cast5,
    Blowfish,
    Aes128,
    Aes192,
    Aes256,
    Twofish,
}

impl CipherAlgo {
    pub fn from_code(code: u8) -> Result<CipherAlgo> {
        match code {
            2 => Ok(CipherAlgo::TripleDes),
            3 => Ok(CipherAlgo::Cast5),
            4 => Ok(CipherAlgo::Blowfish),
            7 => Ok(CipherAlgo::Aes128),
            8 => Ok(CipherAlgo::Aes192),
            9 => Ok(CipherAlgo::Aes256),
            10 => Ok(CipherAlgo::Twofish),
            _ => Err(Error::UnsupportedCipher),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            CipherAlgo::TripleDes => 2,
            CipherAlgo::Cast5 => 3,
            CipherAlgo::Blowfish => 4,
            CipherAlgo::Aes128 => 7,
            CipherAlgo::Aes192 => 8,
            CipherAlgo::Aes256 => 9,
            CipherAlgo::Twofish => 10,
        }
    }

    pub fn from_name(name: &str) -> Result<CipherAlgo> {
        match name {
            "3des" => Ok(CipherAlgo::TripleDes),
            "cast5" => Ok(CipherAlgo::Cast5),
            "bf" | "blowfish" => Ok(CipherAlgo::Blowfish),
            "aes" | "aes128" => Ok(CipherAlgo::Aes128),
            "aes192" => Ok(CipherAlgo::Aes192),
            "aes256" => Ok(CipherAlgo::Aes256),
            "twofish" => Ok(CipherAlgo::Twofish),
            _ => Err(Error::UnsupportedCipher),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherAlgo::TripleDes => "3des",
            CipherAlgo::Cast5 => "cast5",
            CipherAlgo::Blowfish => "bf",
            CipherAlgo::Aes128 => "aes128",
            CipherAlgo::Aes192 => "aes192",
            CipherAlgo::Aes256 => "aes256",
            CipherAlgo::Twofish => "twofish",
        }
    }

    pub fn key_size(self) -> usize {
        match self {
            CipherAlgo::TripleDes => 24,
            CipherAlgo::Cast5 => 16,
            CipherAlgo::Blowfish => 16,
            CipherAlgo::Aes128 => 16,
            CipherAlgo::Aes192 => 24,
            CipherAlgo::Aes256 => 32,
            CipherAlgo::Twofish => 32,
        }
    }

    pub fn block_size(self) -> usize {
        match self {
            CipherAlgo::TripleDes | CipherAlgo::Cast5 | CipherAlgo::Blowfish => 8,
            CipherAlgo::Aes128 | CipherAlgo::Aes192 | CipherAlgo::Aes256 | CipherAlgo::Twofish => {
                16
            }
        }
    }
}

/// A keyed block primitive.
pub enum BlockCipher {
    TripleDes(Box<des::TdesEde3>),
    Cast5(cast5::Cast5),
    Blowfish(Box<blowfish::Blowfish>),
    Aes128(aes::Aes128),
    Aes192(aes::Aes192),
    Aes256(aes::Aes256),
    Twofish(Box<twofish::Twofish>),
}

impl BlockCipher {
    pub fn new(algo: CipherAlgo, key: &[u8]) -> Result<BlockCipher> {
        if key.len() != algo.key_size() {
            return Err(Error::ArgumentError);
        }
        let c = match algo {
            CipherAlgo::TripleDes => BlockCipher::TripleDes(Box::new(
                des::TdesEde3::new_from_slice(key).map_err(|_| Error::ArgumentError)?,
            )),
            CipherAlgo::Cast5 => BlockCipher::Cast5(
                cast5::Cast5::new_from_slice(key).map_err(|_| Error::ArgumentError)?,
            ),
            // the blowfish crate takes the variable-length OpenPGP key as-is
            CipherAlgo::Blowfish => BlockCipher::Blowfish(Box::new(
                blowfish::Blowfish::new_from_slice(key).map_err(|_| Error::ArgumentError)?,
            )),
            CipherAlgo::Aes128 => BlockCipher::Aes128(
                aes::Aes128::new_from_slice(key).map_err(|_| Error::ArgumentError)?,
            ),
            CipherAlgo::Aes192 => BlockCipher::Aes192(
                aes::Aes192::new_from_slice(key).map_err(|_| Error::ArgumentError)?,
            ),
            CipherAlgo::Aes256 => BlockCipher::Aes256(
                aes::Aes256::new_from_slice(key).map_err(|_| Error::ArgumentError)?,
            ),
            CipherAlgo::Twofish => BlockCipher::Twofish(Box::new(
                twofish::Twofish::new_from_slice(key).map_err(|_| Error::ArgumentError)?,
            )),
        };
        Ok(c)
    }

    /// Encrypt one block in place. `block` must be exactly the algorithm's
    /// block size.
    pub fn encrypt_block(&self, block: &mut [u8]) {
        match self {
            BlockCipher::TripleDes(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Cast5(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Blowfish(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Aes128(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Aes192(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Aes256(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Twofish(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CipherAlgo; 7] = [
        CipherAlgo::TripleDes,
        CipherAlgo::Cast5,
        CipherAlgo::Blowfish,
        CipherAlgo::Aes128,
        CipherAlgo::Aes192,
        CipherAlgo::Aes256,
        CipherAlgo::Twofish,
    ];

    #[test]
    fn codes_roundtrip() {
        for algo in ALL {
            assert_eq!(CipherAlgo::from_code(algo.code()).unwrap(), algo);
            assert_eq!(CipherAlgo::from_name(algo.name()).unwrap(), algo);
        }
        assert_eq!(CipherAlgo::from_code(5), Err(Error::UnsupportedCipher));
        assert_eq!(CipherAlgo::from_name("idea"), Err(Error::UnsupportedCipher));
    }

    #[test]
    fn every_algo_encrypts_a_block() {
        for algo in ALL {
            let key = vec![0x42u8; algo.key_size()];
            let c = BlockCipher::new(algo, &key).unwrap();
            let mut block = vec![0u8; algo.block_size()];
            let zero = block.clone();
            c.encrypt_block(&mut block);
            assert_ne!(block, zero, "{:?} produced the identity", algo);
            // deterministic
            let mut again = vec![0u8; algo.block_size()];
            c.encrypt_block(&mut again);
            assert_eq!(block, again);
        }
    }

    #[test]
    fn bad_key_len_is_rejected() {
        assert!(BlockCipher::new(CipherAlgo::Aes128, &[0; 15]).is_err());
    }

    /// Anchors our size tables to the RustCrypto constants.
    #[test]
    fn sizes_match_backend() {
        use cipher::{BlockSizeUser, KeySizeUser};
        assert_eq!(
            CipherAlgo::TripleDes.key_size(),
            des::TdesEde3::key_size()
        );
        assert_eq!(CipherAlgo::Cast5.key_size(), cast5::Cast5::key_size());
        assert_eq!(CipherAlgo::Aes128.key_size(), aes::Aes128::key_size());
        assert_eq!(CipherAlgo::Aes192.key_size(), aes::Aes192::key_size());
        assert_eq!(CipherAlgo::Aes256.key_size(), aes::Aes256::key_size());
        assert_eq!(CipherAlgo::Twofish.key_size(), twofish::Twofish::key_size());
        assert_eq!(
            CipherAlgo::TripleDes.block_size(),
            des::TdesEde3::block_size()
        );
        assert_eq!(CipherAlgo::Aes128.block_size(), aes::Aes128::block_size());
        assert_eq!(
            CipherAlgo::Blowfish.block_size(),
            blowfish::Blowfish::<byteorder::BE>::block_size()
        );
    }
}
