//! Encrypt-then-MAC encryption of whole blobs.
//!
//! Byte layout of an encrypted blob:
//!
//! ```text
//! current: [iv:16][aes-256-cbc ciphertext]
//! legacy:  [iv:16][hmac:32][aes-256-cbc ciphertext]   (decrypt only)
//! ```
//!
//! The HMAC-SHA256 is computed over the plaintext with the same key. In the
//! current format it travels in [`BlobMetadata`]; a blob whose metadata has
//! no HMAC is read in the legacy layout.

mod cbc;
mod metadata;
mod stream;

pub use self::cbc::{BLOCK_SIZE, IV_SIZE};
pub use self::metadata::{BlobMetadata, CONTENT_LENGTH, HMAC, KEY_NAME, KEY_VERSION};
pub use self::stream::{DecryptingStream, StreamState};

use self::cbc::{CbcDecoder, CbcEncoder};
use crate::error::Error;
use crate::key::EncryptionKey;
use crate::key_finder::KeyFinder;
use crate::resolver::KeyResolver;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 output size.
pub const HMAC_SIZE: usize = 32;

fn ready_key_bytes(key: &EncryptionKey) -> Result<Zeroizing<Vec<u8>>, Error> {
    match key.key_bytes() {
        Some(bytes) if key.is_ready() => Ok(bytes),
        _ => Err(Error::KeyNotReady(format!("key '{}' cannot be used", key.key_name()))),
    }
}

fn new_mac(key: &[u8]) -> Result<HmacSha256, Error> {
    HmacSha256::new_from_slice(key)
        .map_err(|e| Error::KeyNotReady(format!("invalid HMAC key: {e}")))
}

/// Decodes the out-of-band HMAC carried on a resolved key, if any.
fn out_of_band_tag(key: &EncryptionKey) -> Result<Option<[u8; HMAC_SIZE]>, Error> {
    let Some(encoded) = key.hmac_base64() else {
        return Ok(None);
    };
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidMetadata(format!("{HMAC} is not base64: {e}")))?;
    let tag = <[u8; HMAC_SIZE]>::try_from(decoded.as_slice()).map_err(|_| {
        Error::InvalidMetadata(format!("{HMAC} is {} bytes, expected {HMAC_SIZE}", decoded.len()))
    })?;
    Ok(Some(tag))
}

/// Fills `buf` from `input`, retrying short reads until end of stream.
async fn read_prefix<R: AsyncRead + Unpin>(input: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::UnexpectedEndOfStream { expected: buf.len(), actual: filled });
        }
        filled += n;
    }
    Ok(())
}

/// Blob encryption bound to one resolver session.
pub struct BlobCodec<'r, F: ?Sized> {
    resolver: &'r KeyResolver<F>,
}

impl<'r, F: KeyFinder + ?Sized> BlobCodec<'r, F> {
    /// Creates a codec over `resolver`.
    pub const fn new(resolver: &'r KeyResolver<F>) -> Self {
        Self { resolver }
    }

    /// Encrypts all of `input` into `output` with the session's current key.
    ///
    /// Writes `iv || ciphertext` and returns the metadata to store with the
    /// blob, including the plaintext HMAC.
    ///
    /// # Errors
    ///
    /// - `Error::KeyNotReady` if the current key is not ready; blobs have no
    ///   plaintext fallback
    /// - `Error::Io` if reading or writing fails
    #[tracing::instrument(skip_all)]
    pub async fn encrypt<R, W>(&self, mut input: R, mut output: W) -> Result<BlobMetadata, Error>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let key = self.resolver.current_key().await?;
        let key_bytes = ready_key_bytes(key)?;

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        let mut encoder = CbcEncoder::new(&key_bytes, &iv)?;
        let mut mac = new_mac(&key_bytes)?;

        output.write_all(&iv).await?;

        let mut buffer = Zeroizing::new(vec![0u8; self.resolver.options().stream_buffer_size]);
        let mut ciphertext = Vec::with_capacity(buffer.len() + BLOCK_SIZE);
        let mut length: u64 = 0;
        loop {
            let n = input.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            mac.update(&buffer[..n]);
            length += n as u64;
            encoder.update(&buffer[..n], &mut ciphertext);
            output.write_all(&ciphertext).await?;
            ciphertext.clear();
        }
        encoder.finish(&mut ciphertext);
        output.write_all(&ciphertext).await?;
        output.flush().await?;

        debug!(key_name = key.key_name(), length, "encrypted blob");
        Ok(BlobMetadata {
            key_name: key.key_name().to_owned(),
            key_version: key.key_version().to_owned(),
            unencrypted_content_length: Some(length),
            hmac_base64: Some(STANDARD.encode(mac.finalize().into_bytes())),
        })
    }

    /// Decrypts a whole blob into `output`, returning the plaintext length.
    ///
    /// The plaintext is verified before any of it is written.
    ///
    /// # Errors
    ///
    /// - `Error::NotAuthorized` if the blob's key may not be used here
    /// - `Error::UnexpectedEndOfStream` if the blob is shorter than its prefix
    /// - `Error::HmacMismatch` if the blob was tampered with
    #[tracing::instrument(skip_all, fields(key_name = %metadata.key_name))]
    pub async fn decrypt<R, W>(
        &self,
        mut input: R,
        mut output: W,
        metadata: &BlobMetadata,
    ) -> Result<u64, Error>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let key = self.resolver.validate_decryption_key(&metadata.header_key()).await?;
        let key_bytes = ready_key_bytes(&key)?;

        let mut iv = [0u8; IV_SIZE];
        read_prefix(&mut input, &mut iv).await?;
        let expected = match out_of_band_tag(&key)? {
            Some(tag) => tag,
            None => {
                debug!("no HMAC in metadata, reading legacy embedded HMAC");
                let mut tag = [0u8; HMAC_SIZE];
                read_prefix(&mut input, &mut tag).await?;
                tag
            }
        };

        let mut ciphertext = Vec::new();
        input.read_to_end(&mut ciphertext).await?;

        let mut decoder = CbcDecoder::new(&key_bytes, &iv)?;
        let mut plaintext = Zeroizing::new(Vec::with_capacity(ciphertext.len()));
        decoder.update(&ciphertext, &mut plaintext);
        decoder.finish(&mut plaintext)?;

        let mut mac = new_mac(&key_bytes)?;
        mac.update(&plaintext);
        mac.verify_slice(&expected).map_err(|_| Error::HmacMismatch)?;

        output.write_all(&plaintext).await?;
        output.flush().await?;
        Ok(plaintext.len() as u64)
    }

    /// Opens a decrypting stream over `input` for incremental reads.
    ///
    /// The key is resolved now; the blob prefix is read on the first read.
    ///
    /// # Errors
    ///
    /// Returns key resolution errors and `Error::InvalidMetadata` for an
    /// unusable HMAC.
    pub async fn decrypt_stream<R>(
        &self,
        input: R,
        metadata: &BlobMetadata,
    ) -> Result<DecryptingStream<R>, Error>
    where
        R: AsyncRead + Unpin,
    {
        let key = self.resolver.validate_decryption_key(&metadata.header_key()).await?;
        DecryptingStream::new(input, &key, self.resolver.options().stream_buffer_size)
    }
}
