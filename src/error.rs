use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the message engine.
///
/// This is a closed set: callers match on it, and the decrypt driver relies
/// on every internal failure mode mapping onto one of these. Most structural
/// problems deliberately collapse into [`Error::CorruptData`] so that a
/// decryption failure does not reveal *where* in the message it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Packet framing, S2K, MPI, MDC, prefix, or literal-data layout was
    /// violated, or the key simply doesn't match. The catch-all failure for
    /// anything discovered after the decryption pipeline is running.
    CorruptData,
    /// Malformed ASCII armor.
    CorruptArmor,
    /// Key-id mismatch, PKCS#1 unwrap failure, or session-key length
    /// mismatch. Only raised before any payload has been fed to the cipher.
    WrongKey,
    /// The supplied keyring has no encryption-capable subkey, or is missing
    /// the secret half needed for decryption.
    NoUsableKey,
    /// Message uses a compression algorithm we recognize but don't ship.
    UnsupportedCompr,
    /// Unknown or unsupported cipher algorithm id.
    UnsupportedCipher,
    /// Unknown or unsupported hash algorithm id.
    UnsupportedHash,
    /// A text-mode caller decrypted a message carrying binary literal data.
    NotText,
    /// The secret key material is passphrase-protected and no passphrase
    /// was given.
    NeedSecretPsw,
    /// Refusing to encrypt to an ElGamal key shorter than 1024 bits.
    ShortElgamalKey,
    /// Invalid argument or option value.
    ArgumentError,
    /// Impossible internal state.
    Bug,
    /// The system random source failed.
    NoRandom,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match *self {
            Error::CorruptData => "Wrong key or corrupt data",
            Error::CorruptArmor => "Corrupt ascii-armor",
            Error::WrongKey => "Wrong key",
            Error::NoUsableKey => "No usable encryption key found",
            Error::UnsupportedCompr => "Unsupported compression algorithm",
            Error::UnsupportedCipher => "Unsupported cipher algorithm",
            Error::UnsupportedHash => "Unsupported digest algorithm",
            Error::NotText => "Not text data",
            Error::NeedSecretPsw => "Need password for secret key",
            Error::ShortElgamalKey => "ElGamal keys must be at least 1024 bits long",
            Error::ArgumentError => "Invalid argument",
            Error::Bug => "Internal error",
            Error::NoRandom => "No strong random source",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// The Mister–Zuccherato collapse: once payload bytes have been fed
    /// through the cipher, every failure must look the same to the caller.
    /// Only `Bug` survives, and only because it must stay unreachable.
    pub(crate) fn collapse(self) -> Error {
        match self {
            Error::Bug => Error::Bug,
            _ => Error::CorruptData,
        }
    }
}
