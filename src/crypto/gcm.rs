//! Incremental AES-GCM.
//!
//! One-shot AEAD APIs need the whole message in memory. This engine runs the
//! same construction (AES-CTR with a 32-bit big-endian counter, GHASH over the
//! ciphertext) chunk by chunk and emits a single trailing tag, so its output is
//! byte-identical to one-shot AES-GCM over the concatenated input.

use aes::cipher::{
    BlockCipher, BlockEncrypt, BlockSizeUser, InnerIvInit, KeyInit, StreamCipher, consts::U16,
};
use ctr::CtrCore;
use aes::{Aes128, Aes192, Aes256};
use ctr::Ctr32BE;
use ghash::GHash;
use ghash::universal_hash::UniversalHash;
use subtle::ConstantTimeEq;

use super::kdf::{KeySize, SymmetricKey};
use super::{NONCE_LEN, TAG_LEN};
use crate::error::{Result, VaultError};

const BLOCK_LEN: usize = 16;

/// Longest plaintext GCM allows under one nonce: 2^32 - 2 blocks.
pub const MAX_TEXT_LEN: u64 = (1 << 36) - 32;

fn limit_exceeded() -> VaultError {
    VaultError::invalid("input exceeds AES-GCM limit")
}

type Block = ghash::Block;

enum Keystream {
    Aes128(Ctr32BE<Aes128>),
    Aes192(Ctr32BE<Aes192>),
    Aes256(Ctr32BE<Aes256>),
}

impl Keystream {
    fn apply(&mut self, buf: &mut [u8]) -> Result<()> {
        match self {
            Keystream::Aes128(ctr) => ctr.try_apply_keystream(buf),
            Keystream::Aes192(ctr) => ctr.try_apply_keystream(buf),
            Keystream::Aes256(ctr) => ctr.try_apply_keystream(buf),
        }
        .map_err(|_| limit_exceeded())
    }
}

/// Shared CTR + GHASH state.
struct GcmCore {
    keystream: Keystream,
    ghash: GHash,
    tag_mask: Block,
    pending: [u8; BLOCK_LEN],
    pending_len: usize,
    aad_len: u64,
    text_len: u64,
}

fn start<C>(key: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<(Ctr32BE<C>, GHash, Block)>
where
    C: BlockCipher + BlockEncrypt + BlockSizeUser<BlockSize = U16> + KeyInit,
{
    let cipher =
        C::new_from_slice(key).map_err(|_| VaultError::invalid("invalid AES key length"))?;

    let mut h = Block::default();
    cipher.encrypt_block(&mut h);

    // J0 = nonce || 0^31 || 1 for 96-bit nonces
    let mut j0 = Block::default();
    j0[..NONCE_LEN].copy_from_slice(nonce);
    j0[BLOCK_LEN - 1] = 1;

    let mut tag_mask = j0;
    cipher.encrypt_block(&mut tag_mask);

    let mut counter = j0;
    counter[BLOCK_LEN - 1] = 2;

    let ctr = Ctr32BE::<C>::from_core(CtrCore::inner_iv_init(cipher, &counter));
    let ghash = <GHash as ghash::universal_hash::KeyInit>::new(&h);

    Ok((ctr, ghash, tag_mask))
}

impl GcmCore {
    fn new(key: &SymmetricKey, nonce: &[u8; NONCE_LEN], aad: &[u8]) -> Result<Self> {
        let bytes = key.as_bytes();
        let (keystream, mut ghash, tag_mask) = match key.size() {
            KeySize::Aes128 => {
                let (ctr, ghash, mask) = start::<Aes128>(bytes, nonce)?;
                (Keystream::Aes128(ctr), ghash, mask)
            }
            KeySize::Aes192 => {
                let (ctr, ghash, mask) = start::<Aes192>(bytes, nonce)?;
                (Keystream::Aes192(ctr), ghash, mask)
            }
            KeySize::Aes256 => {
                let (ctr, ghash, mask) = start::<Aes256>(bytes, nonce)?;
                (Keystream::Aes256(ctr), ghash, mask)
            }
        };

        if !aad.is_empty() {
            ghash.update_padded(aad);
        }

        Ok(Self {
            keystream,
            ghash,
            tag_mask,
            pending: [0u8; BLOCK_LEN],
            pending_len: 0,
            aad_len: aad.len() as u64,
            text_len: 0,
        })
    }

    fn check_limit(&self, additional: usize) -> Result<()> {
        match self.text_len.checked_add(additional as u64) {
            Some(total) if total <= MAX_TEXT_LEN => Ok(()),
            _ => Err(limit_exceeded()),
        }
    }

    /// Feeds ciphertext into GHASH, buffering a partial trailing block.
    fn absorb(&mut self, mut data: &[u8]) {
        self.text_len += data.len() as u64;

        if self.pending_len > 0 {
            let take = (BLOCK_LEN - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];

            if self.pending_len < BLOCK_LEN {
                return;
            }
            self.ghash.update(&[Block::clone_from_slice(&self.pending)]);
            self.pending_len = 0;
        }

        let mut blocks = data.chunks_exact(BLOCK_LEN);
        for block in &mut blocks {
            self.ghash.update(&[Block::clone_from_slice(block)]);
        }

        let rest = blocks.remainder();
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    fn tag(mut self) -> [u8; TAG_LEN] {
        if self.pending_len > 0 {
            self.ghash.update_padded(&self.pending[..self.pending_len]);
        }

        let mut lengths = Block::default();
        lengths[..8].copy_from_slice(&(self.aad_len * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&(self.text_len * 8).to_be_bytes());
        self.ghash.update(&[lengths]);

        let digest = self.ghash.finalize();
        let mut tag = [0u8; TAG_LEN];
        for (out, (d, m)) in tag.iter_mut().zip(digest.iter().zip(self.tag_mask.iter())) {
            *out = d ^ m;
        }
        tag
    }
}

/// Streaming AES-GCM encryption.
pub struct GcmEncryptor {
    core: GcmCore,
}

impl GcmEncryptor {
    pub fn new(key: &SymmetricKey, nonce: &[u8; NONCE_LEN], aad: &[u8]) -> Result<Self> {
        Ok(Self {
            core: GcmCore::new(key, nonce, aad)?,
        })
    }

    /// Encrypts `chunk` and appends the ciphertext to `out`.
    ///
    /// Fails once the total input would exceed [`MAX_TEXT_LEN`]; `out` is
    /// left as it was in that case.
    pub fn update(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.core.check_limit(chunk.len())?;

        let start = out.len();
        out.extend_from_slice(chunk);
        if let Err(e) = self.core.keystream.apply(&mut out[start..]) {
            out.truncate(start);
            return Err(e);
        }
        self.core.absorb(&out[start..]);
        Ok(())
    }

    /// Returns the authentication tag. Consumes the encryptor.
    pub fn finalize(self) -> [u8; TAG_LEN] {
        self.core.tag()
    }
}

/// Streaming AES-GCM decryption.
///
/// The last [`TAG_LEN`] bytes seen are held back as the candidate tag, so an
/// `update` call may produce no plaintext. Plaintext handed out before
/// [`finalize`](Self::finalize) is unauthenticated until it returns `Ok`.
pub struct GcmDecryptor {
    core: GcmCore,
    tail: Vec<u8>,
}

impl GcmDecryptor {
    pub fn new(key: &SymmetricKey, nonce: &[u8; NONCE_LEN], aad: &[u8]) -> Result<Self> {
        Ok(Self {
            core: GcmCore::new(key, nonce, aad)?,
            tail: Vec::with_capacity(TAG_LEN),
        })
    }

    /// Decrypts `chunk` and appends whatever plaintext is releasable to `out`.
    pub fn update(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let mut data = std::mem::take(&mut self.tail);
        data.extend_from_slice(chunk);

        if data.len() <= TAG_LEN {
            self.tail = data;
            return Ok(());
        }

        let split = data.len() - TAG_LEN;
        self.core.check_limit(split)?;
        self.tail = data[split..].to_vec();
        data.truncate(split);

        self.core.absorb(&data);
        self.core.keystream.apply(&mut data)?;
        out.extend_from_slice(&data);
        Ok(())
    }

    /// Checks the trailing tag. Consumes the decryptor.
    pub fn finalize(self) -> Result<()> {
        if self.tail.len() < TAG_LEN {
            return Err(VaultError::AuthenticationFailure);
        }

        let received = self.tail;
        let expected = self.core.tag();

        if bool::from(expected[..].ct_eq(&received[..])) {
            Ok(())
        } else {
            Err(VaultError::AuthenticationFailure)
        }
    }
}
