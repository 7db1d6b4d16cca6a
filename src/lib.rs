//! Streaming OpenPGP message encryption.
//!
//! This crate implements the message-encryption subset of RFC 4880:
//! password-based (S2K) and public-key (RSA, ElGamal) session keys, CFB
//! encryption with the legacy resync variant, the SHA-1 modification
//! detection code, zip/zlib compression, literal-data framing, and ASCII
//! armor. Signatures, key generation, and keyring management are out of
//! scope — keys are consumed, not produced.
//!
//! Data moves through chains of small push/pull filters, so messages are
//! processed in bounded memory regardless of size, and a message is only
//! ever walked once.
//!
//! Decryption is deliberately terse about failures: almost everything
//! reports [`Error::CorruptData`], and conditions discovered mid-stream
//! are held back until the whole message has been consumed. This blunts
//! the Mister–Zuccherato chosen-ciphertext oracle against OpenPGP's CFB
//! prefix.
//!
//! ```
//! use pgp_msg::{encrypt, decrypt, Context, MBuf};
//!
//! let mut ctx = Context::new();
//! ctx.set_symmetric_key(b"correct horse");
//!
//! let mut src = MBuf::from_slice(b"attack at dawn");
//! let mut msg = MBuf::new();
//! encrypt(&mut ctx, &mut src, &mut msg).unwrap();
//!
//! let mut ctx = Context::new();
//! ctx.set_symmetric_key(b"correct horse");
//! msg.rewind();
//! let mut out = MBuf::new();
//! decrypt(&mut ctx, &mut msg, &mut out).unwrap();
//! assert_eq!(out.as_slice(), b"attack at dawn");
//! ```

mod armor;
mod cfb;
mod cipher;
mod compress;
mod context;
mod decrypt;
mod digest;
mod encrypt;
mod error;
mod filter;
mod mbuf;
mod mpi;
mod packet;
mod pubdec;
mod pubenc;
mod pubkey;
mod rnd;
mod s2k;

pub use self::armor::{armor, armor_headers, dearmor};
pub use self::cipher::CipherAlgo;
pub use self::compress::CompressAlgo;
pub use self::context::Context;
pub use self::decrypt::decrypt;
pub use self::digest::DigestAlgo;
pub use self::encrypt::encrypt;
pub use self::error::{Error, Result};
pub use self::mbuf::MBuf;
pub use self::rnd::random_bytes;
pub use self::s2k::S2kMode;
