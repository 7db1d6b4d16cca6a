//! Public-key encrypted session-key packets: decode side.
//!
//! Everything that can go wrong here — key-id mismatch, PKCS#1 structure,
//! checksum, session-key length — surfaces as [`Error::WrongKey`]. These
//! checks all run before any payload touches the symmetric cipher, so the
//! distinct error is safe to report.

use num_bigint_dig::traits::ModInverse;
use num_bigint_dig::BigUint;
use zeroize::Zeroize;

use crate::cipher::CipherAlgo;
use crate::error::{Error, Result};
use crate::filter::{get_byte, pull_exact, PullFilter};
use crate::mpi::Mpi;
use crate::pubkey::{cksum16, KeyMaterial, PubKey};

fn decrypt_rsa(key: &PubKey, pkt: &mut dyn PullFilter) -> Result<BigUint> {
    let KeyMaterial::Rsa { n, secret, .. } = &key.material else {
        return Err(Error::Bug);
    };
    let secret = secret.as_ref().ok_or(Error::Bug)?;
    let c = Mpi::read(pkt)?;
    Ok(c.to_biguint()
        .modpow(&secret.d.to_biguint(), &n.to_biguint()))
}

fn decrypt_elgamal(key: &PubKey, pkt: &mut dyn PullFilter) -> Result<BigUint> {
    let KeyMaterial::Elgamal { p, x, .. } = &key.material else {
        return Err(Error::Bug);
    };
    let x = x.as_ref().ok_or(Error::Bug)?;
    let c1 = Mpi::read(pkt)?;
    let c2 = Mpi::read(pkt)?;

    let p = p.to_biguint();
    let s = c1.to_biguint().modpow(&x.to_biguint(), &p);
    let s_inv = (&s)
        .mod_inverse(&p)
        .and_then(|i| i.to_biguint())
        .ok_or(Error::WrongKey)?;
    Ok((c2.to_biguint() * s_inv) % &p)
}

/// Strip EME-PKCS1-v1.5 and validate the embedded session key.
fn unwrap_sesskey(m: &BigUint) -> Result<(CipherAlgo, Vec<u8>)> {
    let mut bytes = m.to_bytes_be();
    let check = (|| {
        if bytes.len() < 12 || bytes[0] != 0x02 {
            return Err(Error::WrongKey);
        }
        let z = bytes[1..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::WrongKey)?
            + 1;
        if z < 9 {
            // fewer than 8 pad bytes
            return Err(Error::WrongKey);
        }
        let data = &bytes[z + 1..];
        if data.len() < 4 {
            return Err(Error::WrongKey);
        }
        let (inner, ck) = data.split_at(data.len() - 2);
        let algo = CipherAlgo::from_code(inner[0]).map_err(|_| Error::WrongKey)?;
        let sess_key = &inner[1..];
        if cksum16(sess_key) != u16::from_be_bytes([ck[0], ck[1]]) {
            return Err(Error::WrongKey);
        }
        if sess_key.len() != algo.key_size() {
            tracing::debug!(
                got = sess_key.len(),
                want = algo.key_size(),
                "pubdec: session key length mismatch"
            );
            return Err(Error::WrongKey);
        }
        Ok((algo, sess_key.to_vec()))
    })();
    bytes.zeroize();
    check
}

/// Parse a tag-1 packet and recover the session key with `key`'s secret
/// half. The packet's key-id must match the key, or be all zero ("any").
pub fn parse_pubenc_sesskey(
    key: &PubKey,
    pkt: &mut dyn PullFilter,
) -> Result<(CipherAlgo, Vec<u8>)> {
    let ver = get_byte(pkt)?;
    if ver != 3 {
        tracing::debug!(ver, "pubenc sesskey: unknown version");
        return Err(Error::CorruptData);
    }

    let mut key_id = [0u8; 8];
    pull_exact(pkt, &mut key_id)?;
    if key_id != key.key_id && key_id != [0u8; 8] {
        tracing::debug!("pubenc sesskey: key id mismatch");
        return Err(Error::WrongKey);
    }

    let algo = get_byte(pkt)?;
    if algo != key.algo.code() {
        tracing::debug!(algo, "pubenc sesskey: algorithm mismatch");
        return Err(Error::WrongKey);
    }

    let m = match key.algo {
        crate::pubkey::PubKeyAlgo::ElgamalEncrypt => decrypt_elgamal(key, pkt)?,
        _ => decrypt_rsa(key, pkt)?,
    };
    unwrap_sesskey(&m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::MBuf;
    use crate::packet;
    use crate::pubenc::write_pubenc_sesskey;
    use crate::pubkey::testkeys::*;
    use crate::pubkey::load_key;

    fn pkesk_body(ring_pub: &[u8], algo: CipherAlgo, sk: &[u8]) -> Vec<u8> {
        let key = load_key(&mut MBuf::from_slice(ring_pub), None, false).unwrap();
        let mut dst = MBuf::new();
        write_pubenc_sesskey(&key, algo, sk, &mut dst).unwrap();
        let raw = dst.steal();
        // strip the packet header, tests feed the body directly
        let mut src = MBuf::from_slice(&raw);
        let (tag, len) = packet::parse_pkt_hdr(&mut src, false).unwrap().unwrap();
        assert_eq!(tag, packet::TAG_PUBENC_SESSKEY);
        let n = match len {
            packet::PktLen::Normal(n) => n,
            _ => panic!("expected normal length"),
        };
        src.grab(n).to_vec()
    }

    #[test]
    fn elgamal_wrap_roundtrip() {
        let pair = elgamal_pair(p1024());
        let body = pkesk_body(&elgamal_public_ring(&pair), CipherAlgo::Aes128, &[0xAB; 16]);

        let secring = elgamal_secret_ring(&pair);
        let seckey = load_key(&mut MBuf::from_slice(&secring), None, true).unwrap();
        let (algo, sk) =
            parse_pubenc_sesskey(&seckey, &mut MBuf::from_slice(&body)).unwrap();
        assert_eq!(algo, CipherAlgo::Aes128);
        assert_eq!(sk, vec![0xAB; 16]);
    }

    #[test]
    fn rsa_wrap_roundtrip() {
        let pair = rsa_pair();
        let body = pkesk_body(&rsa_public_ring(&pair), CipherAlgo::Aes256, &[0x5C; 32]);

        let secring = rsa_secret_ring(&pair);
        let seckey = load_key(&mut MBuf::from_slice(&secring), None, true).unwrap();
        let (algo, sk) =
            parse_pubenc_sesskey(&seckey, &mut MBuf::from_slice(&body)).unwrap();
        assert_eq!(algo, CipherAlgo::Aes256);
        assert_eq!(sk, vec![0x5C; 32]);
    }

    #[test]
    fn key_id_mismatch_is_wrong_key() {
        let pair = elgamal_pair(p1024());
        let mut body = pkesk_body(&elgamal_public_ring(&pair), CipherAlgo::Aes128, &[1; 16]);
        body[1] ^= 0xFF; // first key-id byte

        let secring = elgamal_secret_ring(&pair);
        let seckey = load_key(&mut MBuf::from_slice(&secring), None, true).unwrap();
        let err = parse_pubenc_sesskey(&seckey, &mut MBuf::from_slice(&body)).err();
        assert_eq!(err, Some(Error::WrongKey));
    }

    #[test]
    fn zero_key_id_means_any_key() {
        let pair = elgamal_pair(p1024());
        let mut body = pkesk_body(&elgamal_public_ring(&pair), CipherAlgo::Aes128, &[2; 16]);
        for b in &mut body[1..9] {
            *b = 0;
        }
        let secring = elgamal_secret_ring(&pair);
        let seckey = load_key(&mut MBuf::from_slice(&secring), None, true).unwrap();
        let (_, sk) = parse_pubenc_sesskey(&seckey, &mut MBuf::from_slice(&body)).unwrap();
        assert_eq!(sk, vec![2; 16]);
    }

    #[test]
    fn corrupt_ciphertext_is_wrong_key() {
        let pair = elgamal_pair(p1024());
        let mut body = pkesk_body(&elgamal_public_ring(&pair), CipherAlgo::Aes128, &[3; 16]);
        let last = body.len() - 1;
        body[last] ^= 0x01;

        let secring = elgamal_secret_ring(&pair);
        let seckey = load_key(&mut MBuf::from_slice(&secring), None, true).unwrap();
        let err = parse_pubenc_sesskey(&seckey, &mut MBuf::from_slice(&body)).err();
        assert_eq!(err, Some(Error::WrongKey));
    }
}
