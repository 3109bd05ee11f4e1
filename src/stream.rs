//! Chunked AES-GCM for inputs that do not fit in memory.
//!
//! Stream format:
//! ```text
//! NONCE (12) | CIPHERTEXT (n) | TAG (16)
//! ```
//! No salt is stored. When the key comes from a password, the caller keeps the
//! salt it passed to [`KeyMaterial::resolve`](crate::KeyMaterial::resolve) and
//! supplies it again to decrypt.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::rng::generate_nonce;
use crate::crypto::{GcmDecryptor, GcmEncryptor, NONCE_LEN, SymmetricKey};
use crate::error::{Result, VaultError};
use crate::storage::AtomicFile;

/// Read size for each cipher update.
pub const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub bytes_read: u64,
    pub bytes_written: u64,
}

struct Progress<P> {
    total: Option<u64>,
    done: u64,
    report: P,
}

impl<P: FnMut(u8)> Progress<P> {
    fn new(total: Option<u64>, report: P) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            done: 0,
            report,
        }
    }

    fn advance(&mut self, n: usize) {
        self.done += n as u64;
        if let Some(total) = self.total {
            let percent = (self.done.saturating_mul(100) / total).min(100) as u8;
            (self.report)(percent);
        }
    }
}

fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Encrypts `source` into `sink`.
///
/// `total_len` is the source size if known; progress (0-100) is reported after
/// every chunk only when it is known and non-zero.
pub fn encrypt_stream<R, W, P>(
    mut source: R,
    mut sink: W,
    key: &SymmetricKey,
    total_len: Option<u64>,
    on_progress: P,
) -> Result<StreamSummary>
where
    R: Read,
    W: Write,
    P: FnMut(u8),
{
    let nonce = generate_nonce()?;
    let mut cipher = GcmEncryptor::new(key, &nonce, &[])?;

    sink.write_all(&nonce)?;
    let mut summary = StreamSummary {
        bytes_read: 0,
        bytes_written: NONCE_LEN as u64,
    };

    let mut progress = Progress::new(total_len, on_progress);
    let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
    let mut out = Vec::with_capacity(CHUNK_SIZE);

    loop {
        let n = read_chunk(&mut source, &mut buf)?;
        if n == 0 {
            break;
        }

        out.clear();
        cipher.update(&buf[..n], &mut out)?;
        sink.write_all(&out)?;

        summary.bytes_read += n as u64;
        summary.bytes_written += out.len() as u64;
        progress.advance(n);
    }

    let tag = cipher.finalize();
    sink.write_all(&tag)?;
    sink.flush()?;
    summary.bytes_written += tag.len() as u64;

    debug!(
        key_bits = key.size().bits(),
        bytes_read = summary.bytes_read,
        bytes_written = summary.bytes_written,
        "stream encrypted"
    );
    Ok(summary)
}

/// Decrypts a stream produced by [`encrypt_stream`].
///
/// Plaintext is written as it is decrypted and is only trustworthy once this
/// returns `Ok`. On [`VaultError::AuthenticationFailure`] the sink content must
/// be discarded; [`decrypt_file`] does that automatically.
pub fn decrypt_stream<R, W, P>(
    mut source: R,
    mut sink: W,
    key: &SymmetricKey,
    total_len: Option<u64>,
    on_progress: P,
) -> Result<StreamSummary>
where
    R: Read,
    W: Write,
    P: FnMut(u8),
{
    let mut nonce = [0u8; NONCE_LEN];
    source.read_exact(&mut nonce).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => VaultError::format("truncated header: missing nonce"),
        _ => VaultError::Io(e),
    })?;

    let mut cipher = GcmDecryptor::new(key, &nonce, &[])?;
    let mut summary = StreamSummary {
        bytes_read: NONCE_LEN as u64,
        bytes_written: 0,
    };

    let mut progress = Progress::new(
        total_len.map(|t| t.saturating_sub(NONCE_LEN as u64)),
        on_progress,
    );
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut out = Zeroizing::new(Vec::with_capacity(CHUNK_SIZE));

    loop {
        let n = read_chunk(&mut source, &mut buf)?;
        if n == 0 {
            break;
        }

        out.clear();
        cipher.update(&buf[..n], &mut out)?;
        sink.write_all(&out)?;

        summary.bytes_read += n as u64;
        summary.bytes_written += out.len() as u64;
        progress.advance(n);
    }

    if let Err(e) = cipher.finalize() {
        warn!(
            key_bits = key.size().bits(),
            bytes_read = summary.bytes_read,
            "stream failed authentication"
        );
        return Err(e);
    }
    sink.flush()?;

    debug!(
        key_bits = key.size().bits(),
        bytes_read = summary.bytes_read,
        bytes_written = summary.bytes_written,
        "stream decrypted"
    );
    Ok(summary)
}

/// Encrypts the file at `source` into `dest`.
///
/// `dest` only appears once the whole stream, tag included, has been written;
/// on any error nothing is left behind.
pub fn encrypt_file<P: FnMut(u8)>(
    source: &Path,
    dest: &Path,
    key: &SymmetricKey,
    on_progress: P,
) -> Result<StreamSummary> {
    let input = File::open(source)?;
    let total = input.metadata()?.len();

    let mut output = AtomicFile::create(dest)?;
    let summary = encrypt_stream(input, &mut output, key, Some(total), on_progress)?;
    output.commit()?;

    Ok(summary)
}

/// Decrypts the file at `source` into `dest`.
///
/// `dest` only appears after the tag has been verified, so a wrong key or a
/// tampered file never produces a plaintext file.
pub fn decrypt_file<P: FnMut(u8)>(
    source: &Path,
    dest: &Path,
    key: &SymmetricKey,
    on_progress: P,
) -> Result<StreamSummary> {
    let input = File::open(source)?;
    let total = input.metadata()?.len();

    let mut output = AtomicFile::create(dest)?;
    let summary = decrypt_stream(input, &mut output, key, Some(total), on_progress)?;
    output.commit()?;

    Ok(summary)
}
