//! OpenPGP v4 key packets and keyring walking.
//!
//! A keyring is a sequence of key packets interleaved with signatures,
//! user ids, and similar packets we don't interpret. The primary key comes
//! first; encryption always uses a subkey, so the walk parses everything
//! but only ever *selects* an encryption-capable subkey.

use byteorder::{BigEndian, ByteOrder};
use zeroize::Zeroize;

use crate::cfb::Cfb;
use crate::cipher::CipherAlgo;
use crate::digest::{DigestAlgo, Hasher};
use crate::error::{Error, Result};
use crate::filter::{get_byte, pull_exact, skip_remaining, PullFilter};
use crate::mbuf::MBuf;
use crate::mpi::Mpi;
use crate::packet::{self, PktReader};
use crate::s2k::S2k;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubKeyAlgo {
    RsaEncryptSign,
    RsaEncrypt,
    RsaSign,
    ElgamalEncrypt,
    Dsa,
}

impl PubKeyAlgo {
    pub fn from_code(code: u8) -> Result<PubKeyAlgo> {
        match code {
            1 => Ok(PubKeyAlgo::RsaEncryptSign),
            2 => Ok(PubKeyAlgo::RsaEncrypt),
            3 => Ok(PubKeyAlgo::RsaSign),
            16 => Ok(PubKeyAlgo::ElgamalEncrypt),
            17 => Ok(PubKeyAlgo::Dsa),
            _ => {
                tracing::debug!(code, "pubkey: unknown algorithm");
                Err(Error::CorruptData)
            }
        }
    }

    pub fn code(self) -> u8 {
        match self {
            PubKeyAlgo::RsaEncryptSign => 1,
            PubKeyAlgo::RsaEncrypt => 2,
            PubKeyAlgo::RsaSign => 3,
            PubKeyAlgo::ElgamalEncrypt => 16,
            PubKeyAlgo::Dsa => 17,
        }
    }

    fn can_encrypt(self) -> bool {
        matches!(
            self,
            PubKeyAlgo::RsaEncryptSign | PubKeyAlgo::RsaEncrypt | PubKeyAlgo::ElgamalEncrypt
        )
    }
}

pub struct RsaSecret {
    pub d: Mpi,
    pub p: Mpi,
    pub q: Mpi,
    pub u: Mpi,
}

pub enum KeyMaterial {
    Rsa {
        n: Mpi,
        e: Mpi,
        secret: Option<RsaSecret>,
    },
    Elgamal {
        p: Mpi,
        g: Mpi,
        y: Mpi,
        x: Option<Mpi>,
    },
    Dsa {
        p: Mpi,
        q: Mpi,
        g: Mpi,
        y: Mpi,
        x: Option<Mpi>,
    },
}

impl KeyMaterial {
    fn public_mpis(&self) -> Vec<&Mpi> {
        match self {
            KeyMaterial::Rsa { n, e, .. } => vec![n, e],
            KeyMaterial::Elgamal { p, g, y, .. } => vec![p, g, y],
            KeyMaterial::Dsa { p, q, g, y, .. } => vec![p, q, g, y],
        }
    }

    fn has_secret(&self) -> bool {
        match self {
            KeyMaterial::Rsa { secret, .. } => secret.is_some(),
            KeyMaterial::Elgamal { x, .. } => x.is_some(),
            KeyMaterial::Dsa { x, .. } => x.is_some(),
        }
    }
}

pub struct PubKey {
    pub time: u32,
    pub algo: PubKeyAlgo,
    pub material: KeyMaterial,
    pub key_id: [u8; 8],
    pub can_encrypt: bool,
}

impl PubKey {
    pub fn has_secret(&self) -> bool {
        self.material.has_secret()
    }
}

fn read_public_mpis(pkt: &mut dyn PullFilter, algo: PubKeyAlgo) -> Result<KeyMaterial> {
    Ok(match algo {
        PubKeyAlgo::RsaEncryptSign | PubKeyAlgo::RsaEncrypt | PubKeyAlgo::RsaSign => {
            KeyMaterial::Rsa {
                n: Mpi::read(pkt)?,
                e: Mpi::read(pkt)?,
                secret: None,
            }
        }
        PubKeyAlgo::ElgamalEncrypt => KeyMaterial::Elgamal {
            p: Mpi::read(pkt)?,
            g: Mpi::read(pkt)?,
            y: Mpi::read(pkt)?,
            x: None,
        },
        PubKeyAlgo::Dsa => KeyMaterial::Dsa {
            p: Mpi::read(pkt)?,
            q: Mpi::read(pkt)?,
            g: Mpi::read(pkt)?,
            y: Mpi::read(pkt)?,
            x: None,
        },
    })
}

/// Low 64 bits of SHA-1 over `0x99 ‖ len16 ‖ 0x04 ‖ time ‖ algo ‖ pubMPIs`.
fn compute_key_id(time: u32, algo: PubKeyAlgo, material: &KeyMaterial) -> [u8; 8] {
    let mpis = material.public_mpis();
    let body_len = 6 + mpis.iter().map(|m| m.encoded_len()).sum::<usize>();

    let mut h = Hasher::new(DigestAlgo::Sha1);
    let mut hdr = [0u8; 3];
    hdr[0] = 0x99;
    BigEndian::write_u16(&mut hdr[1..], body_len as u16);
    h.update(&hdr);
    let mut fixed = [0u8; 6];
    fixed[0] = 4;
    BigEndian::write_u32(&mut fixed[1..5], time);
    fixed[5] = algo.code();
    h.update(&fixed);
    for m in mpis {
        m.hash_update(&mut h);
    }
    let digest = h.finish();
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[12..20]);
    id
}

/// Sum of all bytes mod 2¹⁶, used both for secret-key material and for
/// wrapped session keys.
pub(crate) fn cksum16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |s, &b| s.wrapping_add(b as u16))
}

fn parse_secret_mpis(material: &mut KeyMaterial, plain: &mut MBuf) -> Result<()> {
    match material {
        KeyMaterial::Rsa { secret, .. } => {
            *secret = Some(RsaSecret {
                d: Mpi::read(plain)?,
                p: Mpi::read(plain)?,
                q: Mpi::read(plain)?,
                u: Mpi::read(plain)?,
            });
        }
        KeyMaterial::Elgamal { x, .. } => *x = Some(Mpi::read(plain)?),
        KeyMaterial::Dsa { x, .. } => *x = Some(Mpi::read(plain)?),
    }
    if plain.avail() != 0 {
        tracing::debug!("secret key: trailing bytes after secret MPIs");
        return Err(Error::CorruptData);
    }
    Ok(())
}

fn read_secret_part(
    pkt: &mut dyn PullFilter,
    material: &mut KeyMaterial,
    password: Option<&[u8]>,
) -> Result<()> {
    let s2k_usage = get_byte(pkt)?;
    match s2k_usage {
        0 => {
            // plaintext MPIs followed by a 16-bit sum over their wire form
            let mut body = Vec::new();
            loop {
                let chunk = pkt.pull(4096)?;
                if chunk.is_empty() {
                    break;
                }
                body.extend_from_slice(chunk);
            }
            if body.len() < 2 {
                return Err(Error::CorruptData);
            }
            let (mpis, ck) = body.split_at(body.len() - 2);
            if cksum16(mpis) != BigEndian::read_u16(ck) {
                tracing::debug!("secret key: bad checksum");
                body.zeroize();
                return Err(Error::CorruptData);
            }
            let mut plain = MBuf::from_slice(mpis);
            let res = parse_secret_mpis(material, &mut plain);
            body.zeroize();
            res
        }
        254 | 255 => {
            let cipher = CipherAlgo::from_code(get_byte(pkt)?)?;
            let mut s2k = S2k::read(pkt)?;
            let mut iv = vec![0u8; cipher.block_size()];
            pull_exact(pkt, &mut iv)?;

            let password = password.ok_or(Error::NeedSecretPsw)?;
            s2k.derive(password, cipher.key_size())?;

            let mut enc = Vec::new();
            loop {
                let chunk = pkt.pull(4096)?;
                if chunk.is_empty() {
                    break;
                }
                enc.extend_from_slice(chunk);
            }
            let cklen = if s2k_usage == 254 { 20 } else { 2 };
            if enc.len() < cklen {
                return Err(Error::CorruptData);
            }

            let mut plain = vec![0u8; enc.len()];
            let mut cfb = Cfb::new(cipher, s2k.key(), false, Some(&iv))?;
            cfb.decrypt(&enc, &mut plain);
            drop(cfb);

            let (mpis, ck) = plain.split_at(plain.len() - cklen);
            let ok = if s2k_usage == 254 {
                let mut h = Hasher::new(DigestAlgo::Sha1);
                h.update(mpis);
                h.finish() == ck
            } else {
                cksum16(mpis) == BigEndian::read_u16(ck)
            };
            if !ok {
                tracing::debug!("secret key: unlock failed");
                plain.zeroize();
                return Err(Error::CorruptData);
            }

            let mut rd = MBuf::from_slice(mpis);
            let res = parse_secret_mpis(material, &mut rd);
            plain.zeroize();
            res
        }
        _ => {
            tracing::debug!(s2k_usage, "secret key: unsupported s2k usage");
            Err(Error::CorruptData)
        }
    }
}

fn read_key_packet(
    pkt: &mut dyn PullFilter,
    secret: bool,
    password: Option<&[u8]>,
) -> Result<PubKey> {
    let ver = get_byte(pkt)?;
    if ver != 4 {
        tracing::debug!(ver, "key packet: unsupported version");
        return Err(Error::CorruptData);
    }
    let mut t4 = [0u8; 4];
    pull_exact(pkt, &mut t4)?;
    let time = BigEndian::read_u32(&t4);
    let algo = PubKeyAlgo::from_code(get_byte(pkt)?)?;
    let mut material = read_public_mpis(pkt, algo)?;
    let key_id = compute_key_id(time, algo, &material);

    if secret {
        read_secret_part(pkt, &mut material, password)?;
    }

    Ok(PubKey {
        time,
        algo,
        material,
        key_id,
        can_encrypt: algo.can_encrypt(),
    })
}

/// Walk a keyring and return the first encryption-capable subkey.
///
/// The primary key is parsed but never selected. With `need_secret`, the
/// chosen subkey must carry its secret half (decrypted with `password` if
/// the packet protects it).
pub fn load_key(
    keydata: &mut MBuf,
    password: Option<&[u8]>,
    need_secret: bool,
) -> Result<PubKey> {
    let mut chosen: Option<PubKey> = None;

    while let Some((tag, len)) = packet::parse_pkt_hdr(keydata, false)? {
        let mut pkt = PktReader::new(keydata, len);
        match tag {
            packet::TAG_PUBLIC_KEY | packet::TAG_SECRET_KEY => {
                let secret = tag == packet::TAG_SECRET_KEY;
                read_key_packet(&mut pkt, secret, password)?;
            }
            packet::TAG_PUBLIC_SUBKEY | packet::TAG_SECRET_SUBKEY => {
                let secret = tag == packet::TAG_SECRET_SUBKEY;
                let key = read_key_packet(&mut pkt, secret, password)?;
                if chosen.is_none() && key.can_encrypt {
                    chosen = Some(key);
                } else {
                    tracing::debug!(tag, "keyring: ignoring extra subkey");
                }
            }
            packet::TAG_SIGNATURE
            | packet::TAG_MARKER
            | packet::TAG_TRUST
            | packet::TAG_USER_ID
            | packet::TAG_USER_ATTR
            | packet::TAG_PRIV_61 => skip_remaining(&mut pkt)?,
            _ => {
                tracing::debug!(tag, "keyring: unexpected packet");
                return Err(Error::CorruptData);
            }
        }
    }

    let key = chosen.ok_or(Error::NoUsableKey)?;
    if need_secret && !key.has_secret() {
        tracing::debug!("keyring: no secret half on encryption subkey");
        return Err(Error::NoUsableKey);
    }
    Ok(key)
}

#[cfg(test)]
pub(crate) mod testkeys {
    //! Builders for synthetic keyrings used across the test suites.

    use super::*;
    use num_bigint_dig::BigUint;

    /// The 1024-bit MODP prime from RFC 2409 (Oakley group 2).
    pub const P1024_HEX: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
                                 8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
                                 302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
                                 A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
                                 49286651ECE65381FFFFFFFFFFFFFFFF";

    pub fn p1024() -> BigUint {
        BigUint::parse_bytes(P1024_HEX.as_bytes(), 16).unwrap()
    }

    /// An arbitrary odd 512-bit modulus; parsing doesn't care that it isn't
    /// prime, and encryption must refuse it before doing any math.
    pub fn p512() -> BigUint {
        (BigUint::from(1u8) << 511) + BigUint::from(12345u32) * BigUint::from(2u8) + 1u8
    }

    pub struct ElgamalPair {
        pub p: BigUint,
        pub g: BigUint,
        pub y: BigUint,
        pub x: BigUint,
    }

    pub fn elgamal_pair(p: BigUint) -> ElgamalPair {
        let g = BigUint::from(2u8);
        // fixed exponent keeps the tests deterministic
        let x = BigUint::parse_bytes(b"a1b2c3d4e5f60718293a4b5c6d7e8f90d00df00d", 16).unwrap();
        let y = g.modpow(&x, &p);
        ElgamalPair { p, g, y, x }
    }

    fn push_mpi(out: &mut Vec<u8>, n: &BigUint) {
        Mpi::from_biguint(n).write(out);
    }

    fn key_packet_body(algo_code: u8, mpis: &[&BigUint]) -> Vec<u8> {
        let mut body = vec![4];
        body.extend_from_slice(&[0x5E, 0x00, 0x00, 0x00]); // creation time
        body.push(algo_code);
        for m in mpis {
            push_mpi(&mut body, m);
        }
        body
    }

    fn secret_tail_plain(secret_mpis: &[&BigUint]) -> Vec<u8> {
        let mut tail = vec![0u8]; // s2k usage 0
        let mut raw = Vec::new();
        for m in secret_mpis {
            push_mpi(&mut raw, m);
        }
        let ck = super::cksum16(&raw);
        tail.extend_from_slice(&raw);
        tail.extend_from_slice(&ck.to_be_bytes());
        tail
    }

    fn rsa_sign_primary(secret: bool) -> Vec<u8> {
        let n = BigUint::parse_bytes(b"c34df2a1b4e69d8f11", 16).unwrap();
        let e = BigUint::from(65537u32);
        let mut body = key_packet_body(3, &[&n, &e]);
        if secret {
            let dummy = BigUint::from(7u8);
            body.extend_from_slice(&secret_tail_plain(&[&dummy, &dummy, &dummy, &dummy]));
        }
        body
    }

    fn wrap(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = MBuf::new();
        packet::write_packet(&mut out, tag, body).unwrap();
        out.steal()
    }

    /// Public keyring: RSA-sign primary plus an ElGamal encryption subkey.
    pub fn elgamal_public_ring(pair: &ElgamalPair) -> Vec<u8> {
        let mut ring = wrap(packet::TAG_PUBLIC_KEY, &rsa_sign_primary(false));
        let sub = key_packet_body(16, &[&pair.p, &pair.g, &pair.y]);
        ring.extend_from_slice(&wrap(packet::TAG_PUBLIC_SUBKEY, &sub));
        ring
    }

    /// Secret keyring with the subkey's `x` stored unprotected.
    pub fn elgamal_secret_ring(pair: &ElgamalPair) -> Vec<u8> {
        let mut ring = wrap(packet::TAG_SECRET_KEY, &rsa_sign_primary(true));
        let mut sub = key_packet_body(16, &[&pair.p, &pair.g, &pair.y]);
        sub.extend_from_slice(&secret_tail_plain(&[&pair.x]));
        ring.extend_from_slice(&wrap(packet::TAG_SECRET_SUBKEY, &sub));
        ring
    }

    /// Secret keyring with the subkey locked under `password`
    /// (s2k usage 254, AES-128, SHA-1 check).
    pub fn elgamal_locked_ring(pair: &ElgamalPair, password: &[u8]) -> Vec<u8> {
        use crate::s2k::S2kMode;

        let mut ring = wrap(packet::TAG_PUBLIC_KEY, &rsa_sign_primary(false));

        let mut sub = key_packet_body(16, &[&pair.p, &pair.g, &pair.y]);
        sub.push(254);
        sub.push(CipherAlgo::Aes128.code());
        let mut s2k = S2k::generate(S2kMode::IteratedSalted, DigestAlgo::Sha1, Some(1024)).unwrap();
        s2k.write(&mut sub);
        let iv = [0x42u8; 16];
        sub.extend_from_slice(&iv);

        let mut plain = Vec::new();
        push_mpi(&mut plain, &pair.x);
        let mut h = Hasher::new(DigestAlgo::Sha1);
        h.update(&plain);
        plain.extend_from_slice(&h.finish());

        s2k.derive(password, CipherAlgo::Aes128.key_size()).unwrap();
        let mut cfb = Cfb::new(CipherAlgo::Aes128, s2k.key(), false, Some(&iv)).unwrap();
        let mut enc = Vec::new();
        cfb.encrypt(&plain, &mut enc);
        sub.extend_from_slice(&enc);

        ring.extend_from_slice(&wrap(packet::TAG_SECRET_SUBKEY, &sub));
        ring
    }

    /// RSA pair built from two known primes: the Oakley group 2 prime and
    /// the Mersenne prime 2¹²⁷−1. The public exponent is the smallest of
    /// the usual candidates that is invertible mod φ(n).
    pub struct RsaPair {
        pub n: BigUint,
        pub e: BigUint,
        pub d: BigUint,
        pub p: BigUint,
        pub q: BigUint,
    }

    pub fn rsa_pair() -> RsaPair {
        use num_bigint_dig::traits::ModInverse;

        let p = p1024();
        let q = (BigUint::from(1u8) << 127) - 1u8;
        let n = &p * &q;
        let phi = (&p - 1u8) * (&q - 1u8);
        let (e, d) = [3u32, 5, 17, 257, 65537]
            .iter()
            .find_map(|&e| {
                let e = BigUint::from(e);
                (&e).mod_inverse(&phi)
                    .and_then(|d| d.to_biguint())
                    .map(|d| (e, d))
            })
            .expect("one of the standard exponents must be invertible");
        RsaPair { n, e, d, p, q }
    }

    /// Secret keyring: RSA-sign primary plus an RSA encryption subkey with
    /// its secret half stored unprotected.
    pub fn rsa_secret_ring(pair: &RsaPair) -> Vec<u8> {
        use num_bigint_dig::traits::ModInverse;

        let mut ring = wrap(packet::TAG_SECRET_KEY, &rsa_sign_primary(true));
        let mut sub = key_packet_body(1, &[&pair.n, &pair.e]);
        let u = (&pair.p)
            .mod_inverse(&pair.q)
            .and_then(|u| u.to_biguint())
            .unwrap_or_else(|| BigUint::from(1u8));
        sub.extend_from_slice(&secret_tail_plain(&[&pair.d, &pair.p, &pair.q, &u]));
        ring.extend_from_slice(&wrap(packet::TAG_SECRET_SUBKEY, &sub));
        ring
    }

    /// Public keyring for the same RSA pair.
    pub fn rsa_public_ring(pair: &RsaPair) -> Vec<u8> {
        let mut ring = wrap(packet::TAG_PUBLIC_KEY, &rsa_sign_primary(false));
        let sub = key_packet_body(1, &[&pair.n, &pair.e]);
        ring.extend_from_slice(&wrap(packet::TAG_PUBLIC_SUBKEY, &sub));
        ring
    }

    /// A keyring holding only a sign-capable primary.
    pub fn primary_only_ring() -> Vec<u8> {
        wrap(packet::TAG_PUBLIC_KEY, &rsa_sign_primary(false))
    }
}

#[cfg(test)]
mod tests {
    use super::testkeys::*;
    use super::*;

    #[test]
    fn picks_encryption_subkey_not_primary() {
        let pair = elgamal_pair(p1024());
        let ring = elgamal_public_ring(&pair);
        let key = load_key(&mut MBuf::from_slice(&ring), None, false).unwrap();
        assert_eq!(key.algo, PubKeyAlgo::ElgamalEncrypt);
        assert!(key.can_encrypt);
        assert!(!key.has_secret());
    }

    #[test]
    fn key_id_matches_independent_hash() {
        let pair = elgamal_pair(p1024());
        let ring = elgamal_public_ring(&pair);
        let key = load_key(&mut MBuf::from_slice(&ring), None, false).unwrap();

        // recompute by hand from the raw packet bytes
        let mut body = vec![4u8];
        body.extend_from_slice(&[0x5E, 0, 0, 0]);
        body.push(16);
        for n in [&pair.p, &pair.g, &pair.y] {
            Mpi::from_biguint(n).write(&mut body);
        }
        let mut h = Hasher::new(DigestAlgo::Sha1);
        h.update(&[0x99]);
        h.update(&(body.len() as u16).to_be_bytes());
        h.update(&body);
        let digest = h.finish();
        assert_eq!(&key.key_id, &digest[12..]);
        assert_eq!(key.time, 0x5E00_0000);
    }

    #[test]
    fn secret_ring_loads_secret_half() {
        let pair = elgamal_pair(p1024());
        let ring = elgamal_secret_ring(&pair);
        let key = load_key(&mut MBuf::from_slice(&ring), None, true).unwrap();
        assert!(key.has_secret());
        match &key.material {
            KeyMaterial::Elgamal { x, .. } => {
                assert_eq!(x.as_ref().unwrap().to_biguint(), pair.x)
            }
            _ => panic!("wrong material"),
        }
    }

    #[test]
    fn locked_ring_needs_password() {
        let pair = elgamal_pair(p1024());
        let ring = elgamal_locked_ring(&pair, b"sesame");

        let err = load_key(&mut MBuf::from_slice(&ring), None, true).err();
        assert_eq!(err, Some(Error::NeedSecretPsw));

        let err = load_key(&mut MBuf::from_slice(&ring), Some(b"wrong"), true).err();
        assert_eq!(err, Some(Error::CorruptData));

        let key = load_key(&mut MBuf::from_slice(&ring), Some(b"sesame"), true).unwrap();
        match &key.material {
            KeyMaterial::Elgamal { x, .. } => {
                assert_eq!(x.as_ref().unwrap().to_biguint(), pair.x)
            }
            _ => panic!("wrong material"),
        }
    }

    #[test]
    fn ring_without_subkey_is_unusable() {
        let ring = primary_only_ring();
        let err = load_key(&mut MBuf::from_slice(&ring), None, false).err();
        assert_eq!(err, Some(Error::NoUsableKey));
    }

    #[test]
    fn rsa_ring_loads_both_halves() {
        let pair = rsa_pair();
        let pubring = rsa_public_ring(&pair);
        let key = load_key(&mut MBuf::from_slice(&pubring), None, false).unwrap();
        assert_eq!(key.algo, PubKeyAlgo::RsaEncryptSign);
        assert!(!key.has_secret());

        let secring = rsa_secret_ring(&pair);
        let key = load_key(&mut MBuf::from_slice(&secring), None, true).unwrap();
        assert!(key.has_secret());
        match &key.material {
            KeyMaterial::Rsa { secret, .. } => {
                let sec = secret.as_ref().unwrap();
                assert_eq!(sec.d.to_biguint(), pair.d);
                assert_eq!(sec.p.to_biguint(), pair.p);
                assert_eq!(sec.q.to_biguint(), pair.q);
                assert!(sec.u.bits() > 0);
            }
            _ => panic!("wrong material"),
        }
    }

    #[test]
    fn garbage_keyring_is_corrupt() {
        let err = load_key(&mut MBuf::from_slice(b"not a keyring"), None, false).err();
        assert_eq!(err, Some(Error::CorruptData));
    }
}
