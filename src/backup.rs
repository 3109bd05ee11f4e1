//! Password-protected private key backups.
//!
//! A backup is stored as three independent Base64 strings: ciphertext, salt
//! and IV. The IV length selects the scheme:
//!
//! | IV       | Scheme                                  |
//! |----------|-----------------------------------------|
//! | 12 bytes | AES-256-GCM, salt as associated data    |
//! | 16 bytes | AES-256-CBC with PKCS#7 padding (legacy) |
//!
//! New backups always use GCM. Legacy records have no integrity protection: a
//! wrong password is usually reported as [`VaultError::PaddingFailure`], but
//! can occasionally decrypt to garbage.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::envelope::{open, seal};
use crate::crypto::rng::{generate_nonce, generate_salt, secure_random};
use crate::crypto::{CBC_IV_LEN, KdfParams, KeySize, NONCE_LEN, SymmetricKey};
use crate::encoding;
use crate::error::{Result, VaultError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Leading field of a single-line export.
pub const EXPORT_PREFIX: &str = "VAULTKIT_KEY_EXPORT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBackupRecord {
    pub ciphertext: String,
    pub salt: String,
    pub iv: String,
}

impl KeyBackupRecord {
    /// `VAULTKIT_KEY_EXPORT|<salt>|<iv>|<ciphertext>`
    pub fn to_export_line(&self) -> String {
        format!("{EXPORT_PREFIX}|{}|{}|{}", self.salt, self.iv, self.ciphertext)
    }

    pub fn from_export_line(line: &str) -> Result<Self> {
        let mut fields = line.trim().split('|');

        if fields.next() != Some(EXPORT_PREFIX) {
            return Err(VaultError::format("not a key export line"));
        }

        let (Some(salt), Some(iv), Some(ciphertext), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(VaultError::format(
                "key export line must have exactly four fields",
            ));
        };

        if [salt, iv, ciphertext].iter().any(|f| f.is_empty()) {
            return Err(VaultError::format("key export line has an empty field"));
        }

        Ok(Self {
            ciphertext: ciphertext.to_owned(),
            salt: salt.to_owned(),
            iv: iv.to_owned(),
        })
    }

    /// Scheme implied by the stored IV.
    pub fn scheme(&self) -> Result<BackupScheme> {
        BackupScheme::from_iv_len(encoding::decode(&self.iv)?.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupScheme {
    Gcm,
    LegacyCbc,
}

impl BackupScheme {
    fn from_iv_len(len: usize) -> Result<Self> {
        match len {
            NONCE_LEN => Ok(BackupScheme::Gcm),
            CBC_IV_LEN => Ok(BackupScheme::LegacyCbc),
            other => Err(VaultError::format(format!(
                "backup IV must be {NONCE_LEN} or {CBC_IV_LEN} bytes, got {other}"
            ))),
        }
    }
}

fn decode_key_bytes(private_key_base64: &str) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = Zeroizing::new(encoding::decode(private_key_base64)?);
    if bytes.is_empty() {
        return Err(VaultError::invalid("private key is empty"));
    }
    Ok(bytes)
}

/// Wraps a Base64 private key under `password` using AES-256-GCM.
///
/// The salt doubles as associated data, so [`unwrap`] with the wrong password
/// (or a record whose salt was altered) fails with
/// [`VaultError::AuthenticationFailure`] instead of returning garbage. Callers
/// that must produce records older readers can open should use [`wrap_legacy`].
pub fn wrap(private_key_base64: &str, password: &str) -> Result<KeyBackupRecord> {
    wrap_with_kdf(private_key_base64, password, KdfParams::default())
}

pub fn wrap_with_kdf(
    private_key_base64: &str,
    password: &str,
    kdf: KdfParams,
) -> Result<KeyBackupRecord> {
    let plaintext = decode_key_bytes(private_key_base64)?;

    let salt = generate_salt()?;
    let nonce = generate_nonce()?;
    let key = SymmetricKey::derive(password, &salt, KeySize::Aes256, kdf)?;

    let ciphertext = seal(&key, &nonce, &salt, &plaintext)?;
    debug!(scheme = "gcm", len = plaintext.len(), "wrapped private key");

    Ok(KeyBackupRecord {
        ciphertext: encoding::encode(&ciphertext),
        salt: encoding::encode(&salt),
        iv: encoding::encode(&nonce),
    })
}

/// Wraps using the legacy AES-256-CBC scheme.
///
/// Only for producing backups that older readers understand.
pub fn wrap_legacy(private_key_base64: &str, password: &str) -> Result<KeyBackupRecord> {
    let plaintext = decode_key_bytes(private_key_base64)?;

    let salt = generate_salt()?;
    let mut iv = [0u8; CBC_IV_LEN];
    secure_random(&mut iv)?;
    let key = SymmetricKey::derive(password, &salt, KeySize::Aes256, KdfParams::default())?;

    let ciphertext = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|_| VaultError::invalid("invalid AES-CBC key or IV length"))?
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
    debug!(scheme = "cbc", len = plaintext.len(), "wrapped private key");

    Ok(KeyBackupRecord {
        ciphertext: encoding::encode(&ciphertext),
        salt: encoding::encode(&salt),
        iv: encoding::encode(&iv),
    })
}

/// Recovers the Base64 private key from a backup record.
pub fn unwrap(record: &KeyBackupRecord, password: &str) -> Result<Zeroizing<String>> {
    unwrap_with_kdf(record, password, KdfParams::default())
}

pub fn unwrap_with_kdf(
    record: &KeyBackupRecord,
    password: &str,
    kdf: KdfParams,
) -> Result<Zeroizing<String>> {
    let salt = encoding::decode(&record.salt)?;
    let iv = encoding::decode(&record.iv)?;
    let ciphertext = encoding::decode(&record.ciphertext)?;
    let scheme = BackupScheme::from_iv_len(iv.len())?;

    let key = SymmetricKey::derive(password, &salt, KeySize::Aes256, kdf)?;

    let plaintext = match scheme {
        BackupScheme::Gcm => {
            let mut nonce = [0u8; NONCE_LEN];
            nonce.copy_from_slice(&iv);
            open(&key, &nonce, &salt, &ciphertext).inspect_err(|_| {
                warn!(scheme = "gcm", "private key backup failed authentication");
            })?
        }
        BackupScheme::LegacyCbc => {
            let decrypted = Aes256CbcDec::new_from_slices(key.as_bytes(), &iv)
                .map_err(|_| VaultError::invalid("invalid AES-CBC key or IV length"))?
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
                .map_err(|_| {
                    warn!(scheme = "cbc", "private key backup has bad padding");
                    VaultError::PaddingFailure
                })?;
            Zeroizing::new(decrypted)
        }
    };

    debug!(?scheme, len = plaintext.len(), "unwrapped private key");
    Ok(Zeroizing::new(encoding::encode(&plaintext)))
}
