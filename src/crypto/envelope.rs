//! Self-describing string envelope.
//!
//! Layout:
//! ```text
//! SALT (16) | NONCE (12) | CIPHERTEXT + TAG (n + 16)
//! ```
//! The salt is also the AEAD associated data.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{AesGcm, Nonce, aead::consts::U12};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::kdf::{KdfParams, KeyMaterial, KeySize, SymmetricKey};
use super::rng::{generate_nonce, generate_salt};
use super::{NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::encoding;
use crate::error::{Result, VaultError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl Envelope {
    pub const HEADER_LEN: usize = SALT_LEN + NONCE_LEN;

    pub fn new(salt: [u8; SALT_LEN], nonce: [u8; NONCE_LEN], ciphertext: Vec<u8>) -> Self {
        Self {
            salt,
            nonce,
            ciphertext,
        }
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Ciphertext including the trailing tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_LEN + self.ciphertext.len());
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.ciphertext);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_LEN {
            return Err(VaultError::format(format!(
                "envelope too short: {} bytes, need at least {}",
                data.len(),
                Self::HEADER_LEN
            )));
        }

        let (salt, rest) = data.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        Ok(Self {
            salt: salt.try_into().map_err(|_| VaultError::format("invalid salt length"))?,
            nonce: nonce.try_into().map_err(|_| VaultError::format("invalid nonce length"))?,
            ciphertext: ciphertext.to_vec(),
        })
    }

    pub fn to_base64(&self) -> String {
        encoding::encode(&self.to_bytes())
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        Self::from_bytes(&encoding::decode(text)?)
    }
}

fn seal_with<C>(key: &[u8], nonce: &[u8; NONCE_LEN], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>>
where
    AesGcm<C, U12>: KeyInit + Aead,
{
    let cipher = AesGcm::<C, U12>::new_from_slice(key)
        .map_err(|_| VaultError::invalid("invalid AES key length"))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| VaultError::invalid("plaintext too large for AES-GCM"))
}

fn open_with<C>(key: &[u8], nonce: &[u8; NONCE_LEN], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>>
where
    AesGcm<C, U12>: KeyInit + Aead,
{
    let cipher = AesGcm::<C, U12>::new_from_slice(key)
        .map_err(|_| VaultError::invalid("invalid AES key length"))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| VaultError::AuthenticationFailure)
}

/// One-shot AES-GCM with a 128-bit tag.
pub(crate) fn seal(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    match key.size() {
        KeySize::Aes128 => seal_with::<Aes128>(key.as_bytes(), nonce, aad, plaintext),
        KeySize::Aes192 => seal_with::<Aes192>(key.as_bytes(), nonce, aad, plaintext),
        KeySize::Aes256 => seal_with::<Aes256>(key.as_bytes(), nonce, aad, plaintext),
    }
}

pub(crate) fn open(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::AuthenticationFailure);
    }
    let plaintext = match key.size() {
        KeySize::Aes128 => open_with::<Aes128>(key.as_bytes(), nonce, aad, ciphertext),
        KeySize::Aes192 => open_with::<Aes192>(key.as_bytes(), nonce, aad, ciphertext),
        KeySize::Aes256 => open_with::<Aes256>(key.as_bytes(), nonce, aad, ciphertext),
    }?;
    Ok(Zeroizing::new(plaintext))
}

pub fn encrypt_bytes(
    plaintext: &[u8],
    material: &KeyMaterial,
    size: KeySize,
    kdf: KdfParams,
) -> Result<Envelope> {
    let salt = generate_salt()?;
    let nonce = generate_nonce()?;
    let key = material.resolve(&salt, size, kdf)?;

    let ciphertext = seal(&key, &nonce, &salt, plaintext)?;
    debug!(
        key_bits = size.bits(),
        password = material.is_password(),
        len = plaintext.len(),
        "sealed envelope"
    );

    Ok(Envelope::new(salt, nonce, ciphertext))
}

pub fn decrypt_bytes(
    envelope: &Envelope,
    material: &KeyMaterial,
    size: KeySize,
    kdf: KdfParams,
) -> Result<Zeroizing<Vec<u8>>> {
    let key = material.resolve(envelope.salt(), size, kdf)?;

    open(&key, envelope.nonce(), envelope.salt(), envelope.ciphertext()).inspect_err(|e| {
        if matches!(e, VaultError::AuthenticationFailure) {
            warn!(key_bits = size.bits(), "envelope failed authentication");
        }
    })
}

/// Encrypts UTF-8 text into a Base64 envelope.
pub fn encrypt_string(plaintext: &str, material: &KeyMaterial, size: KeySize) -> Result<String> {
    encrypt_string_with_kdf(plaintext, material, size, KdfParams::default())
}

pub fn encrypt_string_with_kdf(
    plaintext: &str,
    material: &KeyMaterial,
    size: KeySize,
    kdf: KdfParams,
) -> Result<String> {
    Ok(encrypt_bytes(plaintext.as_bytes(), material, size, kdf)?.to_base64())
}

/// Decrypts a Base64 envelope produced by [`encrypt_string`].
pub fn decrypt_string(envelope: &str, material: &KeyMaterial, size: KeySize) -> Result<String> {
    decrypt_string_with_kdf(envelope, material, size, KdfParams::default())
}

pub fn decrypt_string_with_kdf(
    envelope: &str,
    material: &KeyMaterial,
    size: KeySize,
    kdf: KdfParams,
) -> Result<String> {
    let envelope = Envelope::from_base64(envelope)?;
    let plaintext = decrypt_bytes(&envelope, material, size, kdf)?;
    String::from_utf8(plaintext.to_vec())
        .map_err(|_| VaultError::format("decrypted payload is not valid UTF-8"))
}
