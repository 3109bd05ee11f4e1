//! Password- and key-based encryption for strings, streamed files, RSA key
//! pairs and private key backups.
//!
//! Every operation is a plain function over explicit inputs; nothing holds
//! process-wide state, so calls on independent data may run concurrently.

pub mod asymmetric;
pub mod backup;
pub mod crypto;
pub mod encoding;
mod error;
pub mod storage;
pub mod stream;

pub use crate::asymmetric::{
    PemKind, RsaKeyBits, RsaKeyPair, decrypt_with_private_key, encrypt_with_public_key,
    from_pem, generate_key_pair, is_valid_public_key, max_payload_len, to_pem,
};
pub use crate::backup::{BackupScheme, KeyBackupRecord};
pub use crate::crypto::envelope::{
    decrypt_bytes, decrypt_string, decrypt_string_with_kdf, encrypt_bytes, encrypt_string,
    encrypt_string_with_kdf,
};
pub use crate::crypto::{
    Envelope, KdfParams, KeyMaterial, KeySize, SymmetricKey, derive_key, is_raw_key,
};
pub use crate::error::{Result, VaultError};
pub use crate::stream::{
    StreamSummary, decrypt_file, decrypt_stream, encrypt_file, encrypt_stream,
};
