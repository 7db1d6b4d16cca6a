//! Multi-precision integers on the wire.
//!
//! An MPI is a big-endian 16-bit bit count followed by the minimal number
//! of big-endian payload bytes. The top byte must actually use the
//! advertised number of bits.

use byteorder::{BigEndian, ByteOrder};
use num_bigint_dig::BigUint;
use zeroize::Zeroize;

use crate::digest::Hasher;
use crate::error::{Error, Result};
use crate::filter::{pull_exact, PullFilter};

pub struct Mpi {
    bits: u16,
    data: Vec<u8>,
}

impl Mpi {
    /// Build from raw big-endian bytes, stripping leading zeros.
    pub fn from_bytes(data: &[u8]) -> Mpi {
        let mut start = 0;
        while start < data.len() && data[start] == 0 {
            start += 1;
        }
        let data = data[start..].to_vec();
        let bits = match data.first() {
            None => 0,
            Some(&top) => ((data.len() - 1) * 8 + (8 - top.leading_zeros() as usize)) as u16,
        };
        Mpi { bits, data }
    }

    pub fn read(src: &mut dyn PullFilter) -> Result<Mpi> {
        let mut hdr = [0u8; 2];
        pull_exact(src, &mut hdr)?;
        let bits = BigEndian::read_u16(&hdr);
        let nbytes = (bits as usize + 7) / 8;
        let mut data = vec![0u8; nbytes];
        pull_exact(src, &mut data)?;

        // the advertised bit count must match the top byte
        let ok = match data.first() {
            None => bits == 0,
            Some(&top) => {
                top != 0 && (nbytes - 1) * 8 + (8 - top.leading_zeros() as usize) == bits as usize
            }
        };
        if !ok {
            tracing::debug!(bits, "mpi: bit count does not match payload");
            data.zeroize();
            return Err(Error::CorruptData);
        }
        Ok(Mpi { bits, data })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let mut hdr = [0u8; 2];
        BigEndian::write_u16(&mut hdr, self.bits);
        out.extend_from_slice(&hdr);
        out.extend_from_slice(&self.data);
    }

    /// Feed the wire form (bit count plus payload) into a running hash.
    pub fn hash_update(&self, h: &mut Hasher) {
        let mut hdr = [0u8; 2];
        BigEndian::write_u16(&mut hdr, self.bits);
        h.update(&hdr);
        h.update(&self.data);
    }

    pub fn bits(&self) -> usize {
        self.bits as usize
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Length of the wire encoding.
    pub fn encoded_len(&self) -> usize {
        2 + self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.data)
    }

    pub fn from_biguint(n: &BigUint) -> Mpi {
        Mpi::from_bytes(&n.to_bytes_be())
    }
}

impl Drop for Mpi {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::fmt::Debug for Mpi {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // payload may be secret key material
        write!(f, "Mpi({} bits)", self.bits)
    }
}
