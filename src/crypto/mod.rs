//! Symmetric primitives.
//!
//! Provides key derivation, the salted string envelope and an incremental
//! AES-GCM engine for streamed input.

pub mod envelope;
pub mod gcm;
pub mod kdf;
pub mod rng;

pub use envelope::Envelope;
pub use gcm::{GcmDecryptor, GcmEncryptor};
pub use kdf::{KdfParams, KeyMaterial, KeySize, SymmetricKey, derive_key, is_raw_key};

/// Length of a key-derivation salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of an AES-GCM nonce (12 bytes).
pub const NONCE_LEN: usize = 12;
/// Length of the AES-GCM authentication tag (16 bytes / 128 bits).
pub const TAG_LEN: usize = 16;
/// Length of a CBC initialization vector (one AES block).
pub const CBC_IV_LEN: usize = 16;
