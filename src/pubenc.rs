//! Public-key encrypted session-key packets: encode side.
//!
//! The session key is wrapped with EME-PKCS1-v1.5 and encrypted to the
//! recipient's subkey, RSA or ElGamal.

use num_bigint_dig::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::cipher::CipherAlgo;
use crate::error::{Error, Result};
use crate::filter::PushFilter;
use crate::mpi::Mpi;
use crate::packet::{self, write_packet};
use crate::pubkey::{cksum16, KeyMaterial, PubKey};
use crate::rnd;

/// EME-PKCS1-v1.5, minus the leading zero byte that vanishes in integer
/// form: `0x02 ‖ nonzero pad (≥8) ‖ 0x00 ‖ msg`, `res_len` bytes in all.
fn pkcs1_encode(msg: &[u8], res_len: usize) -> Result<Vec<u8>> {
    if msg.len() + 2 + 8 > res_len {
        tracing::debug!("pkcs1_encode: modulus too small");
        return Err(Error::Bug);
    }
    let pad_len = res_len - 2 - msg.len();
    let mut buf = vec![0u8; res_len];
    buf[0] = 0x02;
    rnd::random_bytes(&mut buf[1..1 + pad_len])?;
    for i in 1..1 + pad_len {
        while buf[i] == 0 {
            let mut nb = [0u8; 1];
            rnd::random_bytes(&mut nb)?;
            buf[i] = nb[0];
        }
    }
    buf[1 + pad_len] = 0;
    buf[2 + pad_len..].copy_from_slice(msg);
    Ok(buf)
}

fn elgamal_k_bits(p_bits: usize) -> usize {
    // exponent sized well past the subgroup guesswork bound
    if p_bits <= 5120 {
        p_bits / 10 + 160
    } else {
        (p_bits / 8 + 200) * 3 / 2
    }
}

fn encrypt_elgamal(p: &Mpi, g: &Mpi, y: &Mpi, em: &[u8]) -> Result<(Mpi, Mpi)> {
    let p_bits = p.bits();
    if p_bits < 1024 {
        return Err(Error::ShortElgamalKey);
    }
    let p = p.to_biguint();
    let g = g.to_biguint();
    let y = y.to_biguint();
    let m = BigUint::from_bytes_be(em);

    let mut k = OsRng.gen_biguint(elgamal_k_bits(p_bits));
    while k.bits() == 0 {
        k = OsRng.gen_biguint(elgamal_k_bits(p_bits));
    }
    let c1 = g.modpow(&k, &p);
    let c2 = (m * y.modpow(&k, &p)) % &p;
    Ok((Mpi::from_biguint(&c1), Mpi::from_biguint(&c2)))
}

fn encrypt_rsa(n: &Mpi, e: &Mpi, em: &[u8]) -> Result<Mpi> {
    let n = n.to_biguint();
    let e = e.to_biguint();
    let m = BigUint::from_bytes_be(em);
    Ok(Mpi::from_biguint(&m.modpow(&e, &n)))
}

/// Write the tag-1 packet wrapping `sess_key` for `key`.
pub fn write_pubenc_sesskey(
    key: &PubKey,
    cipher_algo: CipherAlgo,
    sess_key: &[u8],
    dst: &mut dyn PushFilter,
) -> Result<()> {
    let mut msg = Vec::with_capacity(sess_key.len() + 3);
    msg.push(cipher_algo.code());
    msg.extend_from_slice(sess_key);
    msg.extend_from_slice(&cksum16(sess_key).to_be_bytes());

    let mut body = vec![3u8];
    body.extend_from_slice(&key.key_id);
    body.push(key.algo.code());

    match &key.material {
        KeyMaterial::Rsa { n, e, .. } => {
            let mut em = pkcs1_encode(&msg, n.byte_len() - 1)?;
            let c = encrypt_rsa(n, e, &em)?;
            em.zeroize();
            c.write(&mut body);
        }
        KeyMaterial::Elgamal { p, g, y, .. } => {
            let mut em = pkcs1_encode(&msg, p.byte_len() - 1)?;
            let (c1, c2) = encrypt_elgamal(p, g, y, &em)?;
            em.zeroize();
            c1.write(&mut body);
            c2.write(&mut body);
        }
        KeyMaterial::Dsa { .. } => return Err(Error::Bug),
    }
    msg.zeroize();

    write_packet(dst, packet::TAG_PUBENC_SESSKEY, &body)
}
