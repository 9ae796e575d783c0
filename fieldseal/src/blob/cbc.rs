//! Incremental AES-256-CBC with PKCS#7 padding.
//!
//! Both halves accept input in arbitrary pieces. The decoder holds back the
//! last decrypted block until [`CbcDecoder::finish`], because only then is it
//! known to carry the padding.

use crate::error::Error;
use aes::Aes256;
use cbc::cipher::block_padding::{Padding, Pkcs7};
use cbc::cipher::consts::U16;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

/// AES block size.
pub const BLOCK_SIZE: usize = 16;

/// CBC initialization vector size.
pub const IV_SIZE: usize = 16;

type Block = GenericArray<u8, U16>;

pub(crate) struct CbcEncoder {
    cipher: cbc::Encryptor<Aes256>,
    pending: Zeroizing<Vec<u8>>,
}

impl CbcEncoder {
    pub(crate) fn new(key: &[u8], iv: &[u8; IV_SIZE]) -> Result<Self, Error> {
        let cipher = cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|e| Error::KeyNotReady(format!("invalid AES-256 key: {e}")))?;
        Ok(Self { cipher, pending: Zeroizing::new(Vec::with_capacity(BLOCK_SIZE)) })
    }

    /// Encrypts every complete block available and appends it to `out`.
    pub(crate) fn update(&mut self, plaintext: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(plaintext);
        let full = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        for chunk in self.pending[..full].chunks_exact(BLOCK_SIZE) {
            let mut block = Block::clone_from_slice(chunk);
            self.cipher.encrypt_block_mut(&mut block);
            out.extend_from_slice(&block);
        }
        self.pending.drain(..full);
    }

    /// Pads and encrypts the final block.
    pub(crate) fn finish(mut self, out: &mut Vec<u8>) {
        let pos = self.pending.len();
        let mut block = Block::default();
        block[..pos].copy_from_slice(&self.pending);
        <Pkcs7 as Padding<U16>>::pad(&mut block, pos);
        self.cipher.encrypt_block_mut(&mut block);
        out.extend_from_slice(&block);
    }
}

pub(crate) struct CbcDecoder {
    cipher: cbc::Decryptor<Aes256>,
    pending: Vec<u8>,
    held: Option<Block>,
}

impl CbcDecoder {
    pub(crate) fn new(key: &[u8], iv: &[u8]) -> Result<Self, Error> {
        let cipher = cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|e| Error::KeyNotReady(format!("invalid AES-256 key or IV: {e}")))?;
        Ok(Self { cipher, pending: Vec::with_capacity(BLOCK_SIZE), held: None })
    }

    /// Decrypts every complete block available, appending all but the last
    /// decrypted block to `out`.
    pub(crate) fn update(&mut self, ciphertext: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(ciphertext);
        let full = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        for chunk in self.pending[..full].chunks_exact(BLOCK_SIZE) {
            let mut block = Block::clone_from_slice(chunk);
            self.cipher.decrypt_block_mut(&mut block);
            if let Some(previous) = self.held.replace(block) {
                out.extend_from_slice(&previous);
            }
        }
        self.pending.drain(..full);
    }

    /// Strips the padding from the held block and appends the rest to `out`.
    ///
    /// Bad padding is reported as an HMAC mismatch, the same as any other
    /// tampering, so callers learn nothing about where verification failed.
    pub(crate) fn finish(mut self, out: &mut Vec<u8>) -> Result<(), Error> {
        if !self.pending.is_empty() {
            return Err(Error::MalformedCiphertext(
                "ciphertext length is not a multiple of the block size".into(),
            ));
        }
        let last = self
            .held
            .take()
            .ok_or_else(|| Error::MalformedCiphertext("ciphertext is empty".into()))?;
        let unpadded = <Pkcs7 as Padding<U16>>::unpad(&last).map_err(|_| Error::HmacMismatch)?;
        out.extend_from_slice(unpadded);
        Ok(())
    }
}
