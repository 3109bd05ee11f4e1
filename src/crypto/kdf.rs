use std::fmt;

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::rng::secure_random;
use crate::encoding;
use crate::error::{Result, VaultError};

/// AES key size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeySize {
    Aes128,
    Aes192,
    #[default]
    Aes256,
}

impl KeySize {
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            128 => Ok(KeySize::Aes128),
            192 => Ok(KeySize::Aes192),
            256 => Ok(KeySize::Aes256),
            other => Err(VaultError::invalid(format!(
                "key size must be 128, 192 or 256 bits, got {other}"
            ))),
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    pub fn bytes(self) -> usize {
        match self {
            KeySize::Aes128 => 16,
            KeySize::Aes192 => 24,
            KeySize::Aes256 => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            // PBKDF2-HMAC-SHA256 rounds; changing this breaks every stored envelope
            iterations: 10_000,
        }
    }
}

impl KdfParams {
    pub fn new(iterations: u32) -> Result<Self> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations < 1 {
            return Err(VaultError::invalid("pbkdf2 iterations must be >= 1"));
        }
        Ok(())
    }
}

/// AES key bytes, wiped on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: Zeroizing<Vec<u8>>,
    size: KeySize,
}

impl SymmetricKey {
    /// Derives a key of `size` from a password and salt.
    pub fn derive(password: &str, salt: &[u8], size: KeySize, kdf: KdfParams) -> Result<Self> {
        kdf.validate()?;
        if salt.is_empty() {
            return Err(VaultError::invalid("salt must not be empty"));
        }

        let mut bytes = Zeroizing::new(vec![0u8; size.bytes()]);
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, kdf.iterations, &mut bytes);

        Ok(Self { bytes, size })
    }

    pub fn from_bytes(bytes: &[u8], size: KeySize) -> Result<Self> {
        if bytes.len() != size.bytes() {
            return Err(VaultError::invalid(format!(
                "raw key is {} bytes, expected {} for AES-{}",
                bytes.len(),
                size.bytes(),
                size.bits()
            )));
        }
        Ok(Self {
            bytes: Zeroizing::new(bytes.to_vec()),
            size,
        })
    }

    pub fn from_base64(text: &str, size: KeySize) -> Result<Self> {
        let bytes = Zeroizing::new(encoding::decode(text)?);
        Self::from_bytes(&bytes, size)
    }

    /// Fresh random key.
    pub fn generate(size: KeySize) -> Result<Self> {
        let mut bytes = Zeroizing::new(vec![0u8; size.bytes()]);
        secure_random(&mut bytes)?;
        Ok(Self { bytes, size })
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(encoding::encode(&self.bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> KeySize {
        self.size
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Where the AES key comes from.
#[derive(Clone)]
pub enum KeyMaterial {
    Password(Zeroizing<String>),
    Raw(Zeroizing<Vec<u8>>),
}

impl KeyMaterial {
    pub fn password(password: &str) -> Self {
        KeyMaterial::Password(Zeroizing::new(password.to_owned()))
    }

    pub fn raw(bytes: &[u8]) -> Self {
        KeyMaterial::Raw(Zeroizing::new(bytes.to_vec()))
    }

    /// Treats `candidate` as a raw key when it is Base64 of exactly
    /// `size` bytes, and as a password otherwise.
    ///
    /// Only for reading data produced by tools that made this guess
    /// implicitly; new callers should pick the variant themselves.
    pub fn infer(candidate: &str, size: KeySize) -> Self {
        match encoding::decode(candidate) {
            Ok(bytes) if bytes.len() == size.bytes() => KeyMaterial::Raw(Zeroizing::new(bytes)),
            _ => Self::password(candidate),
        }
    }

    pub fn is_password(&self) -> bool {
        matches!(self, KeyMaterial::Password(_))
    }

    /// Produces the AES key. `salt` feeds the KDF and is ignored for raw keys.
    pub fn resolve(&self, salt: &[u8], size: KeySize, kdf: KdfParams) -> Result<SymmetricKey> {
        match self {
            KeyMaterial::Password(password) => SymmetricKey::derive(password, salt, size, kdf),
            KeyMaterial::Raw(bytes) => SymmetricKey::from_bytes(bytes, size),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Password(_) => f.write_str("KeyMaterial::Password(..)"),
            KeyMaterial::Raw(_) => f.write_str("KeyMaterial::Raw(..)"),
        }
    }
}

pub fn derive_key(password: &str, salt: &[u8], size: KeySize) -> Result<SymmetricKey> {
    SymmetricKey::derive(password, salt, size, KdfParams::default())
}

/// Returns true if `candidate` Base64-decodes to exactly `size` bytes.
pub fn is_raw_key(candidate: &str, size: KeySize) -> bool {
    matches!(encoding::decode(candidate), Ok(bytes) if bytes.len() == size.bytes())
}
