//! System randomness behind one narrow entry point.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

/// Fill `buf` from the operating system generator.
pub fn random_bytes(buf: &mut [u8]) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(|_| Error::NoRandom)
}

/// One random byte.
pub(crate) fn random_u8() -> Result<u8> {
    let mut b = [0u8; 1];
    random_bytes(&mut b)?;
    Ok(b[0])
}
