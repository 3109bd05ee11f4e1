//! RSA key pairs and single-block PKCS#1 v1.5 encryption.
//!
//! Keys travel as Base64 of their standard DER encodings: SubjectPublicKeyInfo
//! for public keys and PKCS#8 for private keys. PKCS#1 bodies are accepted on
//! input as well.

pub mod pem;

use std::fmt;

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::spki::SubjectPublicKeyInfoRef;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::encoding;
use crate::error::{Result, VaultError};

pub use pem::{PemKind, from_pem, to_pem};

/// PKCS#1 v1.5 encryption padding overhead in bytes.
pub const PKCS1_OVERHEAD: usize = 11;

/// Shortest decoded public key [`is_valid_public_key`] will consider.
const MIN_PUBLIC_KEY_LEN: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RsaKeyBits {
    Rsa1024,
    #[default]
    Rsa2048,
    Rsa4096,
}

impl RsaKeyBits {
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            1024 => Ok(RsaKeyBits::Rsa1024),
            2048 => Ok(RsaKeyBits::Rsa2048),
            4096 => Ok(RsaKeyBits::Rsa4096),
            other => Err(VaultError::invalid(format!(
                "RSA key size must be 1024, 2048 or 4096 bits, got {other}"
            ))),
        }
    }

    pub fn bits(self) -> usize {
        match self {
            RsaKeyBits::Rsa1024 => 1024,
            RsaKeyBits::Rsa2048 => 2048,
            RsaKeyBits::Rsa4096 => 4096,
        }
    }
}

/// A generated key pair in Base64 DER form.
#[derive(Clone)]
pub struct RsaKeyPair {
    public_key: String,
    private_key: Zeroizing<String>,
}

impl RsaKeyPair {
    /// Base64 SubjectPublicKeyInfo.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Base64 PKCS#8.
    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

pub fn generate_key_pair(bits: RsaKeyBits) -> Result<RsaKeyPair> {
    let private = RsaPrivateKey::new(&mut OsRng, bits.bits())
        .map_err(|e| VaultError::KeyGeneration(e.to_string()))?;
    let public = RsaPublicKey::from(&private);

    let public_der = public
        .to_public_key_der()
        .map_err(|e| VaultError::KeyGeneration(e.to_string()))?;
    let private_der = private
        .to_pkcs8_der()
        .map_err(|e| VaultError::KeyGeneration(e.to_string()))?;

    debug!(bits = bits.bits(), "generated RSA key pair");

    Ok(RsaKeyPair {
        public_key: encoding::encode(public_der.as_bytes()),
        private_key: Zeroizing::new(encoding::encode(private_der.as_bytes())),
    })
}

fn parse_public_key(public_key_base64: &str) -> Result<RsaPublicKey> {
    let der = encoding::decode(public_key_base64)?;
    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|_| VaultError::UnsupportedKey("not an RSA public key".into()))
}

fn parse_private_key(private_key_base64: &str) -> Result<RsaPrivateKey> {
    let der = Zeroizing::new(encoding::decode(private_key_base64)?);
    RsaPrivateKey::from_pkcs8_der(&der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(&der))
        .map_err(|_| VaultError::UnsupportedKey("not an RSA private key".into()))
}

/// Largest plaintext, in bytes, that fits in one block under `public_key_base64`.
pub fn max_payload_len(public_key_base64: &str) -> Result<usize> {
    let key = parse_public_key(public_key_base64)?;
    Ok(key.size().saturating_sub(PKCS1_OVERHEAD))
}

/// Encrypts one block and returns the Base64 ciphertext.
///
/// # Errors
///
/// [`VaultError::InvalidArgument`] if `plaintext` is longer than
/// [`max_payload_len`]; nothing is truncated.
pub fn encrypt_with_public_key(plaintext: &[u8], public_key_base64: &str) -> Result<String> {
    let key = parse_public_key(public_key_base64)?;

    let max = key.size().saturating_sub(PKCS1_OVERHEAD);
    if plaintext.len() > max {
        return Err(VaultError::invalid(format!(
            "plaintext is {} bytes, RSA-{} can encrypt at most {max}",
            plaintext.len(),
            key.size() * 8
        )));
    }

    let ciphertext = key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| VaultError::invalid(format!("RSA encryption failed: {e}")))?;

    debug!(modulus_bits = key.size() * 8, len = plaintext.len(), "RSA encrypted");
    Ok(encoding::encode(&ciphertext))
}

/// Decrypts a Base64 ciphertext produced by [`encrypt_with_public_key`].
///
/// A wrong key or corrupted ciphertext is [`VaultError::PaddingFailure`].
pub fn decrypt_with_private_key(
    ciphertext_base64: &str,
    private_key_base64: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    let key = parse_private_key(private_key_base64)?;
    let ciphertext = encoding::decode(ciphertext_base64)?;

    let plaintext = key.decrypt(Pkcs1v15Encrypt, &ciphertext).map_err(|_| {
        warn!(modulus_bits = key.size() * 8, "RSA decryption failed");
        VaultError::PaddingFailure
    })?;

    Ok(Zeroizing::new(plaintext))
}

/// Parses an untrusted Base64 SubjectPublicKeyInfo and requires an RSA key.
pub fn inspect_public_key(candidate: &str) -> Result<RsaPublicKey> {
    if candidate.trim().is_empty() {
        return Err(VaultError::UnsupportedKey("empty key".into()));
    }

    let der = encoding::decode(candidate)
        .map_err(|_| VaultError::UnsupportedKey("key is not Base64".into()))?;
    if der.len() < MIN_PUBLIC_KEY_LEN {
        return Err(VaultError::UnsupportedKey(format!(
            "key is {} bytes, too short to be a public key",
            der.len()
        )));
    }

    let spki = SubjectPublicKeyInfoRef::try_from(der.as_slice())
        .map_err(|_| VaultError::UnsupportedKey("not a SubjectPublicKeyInfo structure".into()))?;
    if spki.algorithm.oid != rsa::pkcs1::ALGORITHM_OID {
        return Err(VaultError::UnsupportedKey(format!(
            "algorithm {} is not RSA",
            spki.algorithm.oid
        )));
    }

    RsaPublicKey::from_public_key_der(&der)
        .map_err(|_| VaultError::UnsupportedKey("malformed RSA public key".into()))
}

/// True only for a Base64 SubjectPublicKeyInfo holding a well-formed RSA key.
pub fn is_valid_public_key(candidate: &str) -> bool {
    inspect_public_key(candidate).is_ok()
}
