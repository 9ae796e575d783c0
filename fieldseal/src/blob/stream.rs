//! Incremental blob decryption behind [`AsyncRead`].

use super::cbc::{CbcDecoder, IV_SIZE};
use super::{new_mac, out_of_band_tag, ready_key_bytes, HmacSha256, HMAC_SIZE};
use crate::error::Error;
use crate::key::EncryptionKey;
use hmac::Mac;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use zeroize::Zeroizing;

/// Lifecycle of a [`DecryptingStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// The IV (and legacy HMAC) have not been read yet.
    Uninitialized,
    /// Ciphertext is being decrypted.
    Initialized,
    /// End of stream reached and the HMAC verified. Further reads return EOF.
    Finalized,
    /// A read failed. Further reads fail the same way.
    Failed,
}

enum State {
    Uninitialized { prefix: [u8; IV_SIZE + HMAC_SIZE], filled: usize },
    Initialized(Box<Active>),
    Finalized,
    Failed(Error),
}

// Error is not Clone; the failed state keeps an equivalent copy to hand out.
fn replay(error: &Error) -> Error {
    match error {
        Error::HmacMismatch => Error::HmacMismatch,
        Error::AuthenticationFailed => Error::AuthenticationFailed,
        Error::UnexpectedEndOfStream { expected, actual } => {
            Error::UnexpectedEndOfStream { expected: *expected, actual: *actual }
        }
        Error::InvalidArgument(msg) => Error::InvalidArgument(msg.clone()),
        Error::MalformedCiphertext(msg) => Error::MalformedCiphertext(msg.clone()),
        Error::KeyNotReady(msg) => Error::KeyNotReady(msg.clone()),
        Error::InvalidMetadata(msg) => Error::InvalidMetadata(msg.clone()),
        Error::DecryptionFailed(msg) => Error::DecryptionFailed(msg.clone()),
        Error::Io(err) => Error::Io(io::Error::new(err.kind(), err.to_string())),
        other => Error::DecryptionFailed(other.to_string()),
    }
}

struct Active {
    // None once the inner reader hit EOF and the padding was stripped.
    decoder: Option<CbcDecoder>,
    mac: Option<HmacSha256>,
    expected: [u8; HMAC_SIZE],
    read_buf: Vec<u8>,
    plain: Zeroizing<Vec<u8>>,
    offset: usize,
}

impl Active {
    fn verify(&mut self) -> Result<(), Error> {
        let mac = self.mac.take().ok_or(Error::HmacMismatch)?;
        mac.verify_slice(&self.expected).map_err(|_| Error::HmacMismatch)
    }
}

/// Reads plaintext out of an encrypted blob.
///
/// The HMAC covers exactly the bytes handed to the caller and is checked
/// when the caller reaches end of stream: the final read returns an error
/// instead of EOF if the blob was tampered with. Bytes delivered before that
/// point are unauthenticated.
///
/// Errors are surfaced as [`io::Error`]; [`Error::from_io`] recovers the
/// underlying [`Error`]. Once a read fails the stream is [`StreamState::Failed`]
/// and never reports EOF.
pub struct DecryptingStream<R> {
    inner: R,
    key: Zeroizing<Vec<u8>>,
    out_of_band: Option<[u8; HMAC_SIZE]>,
    buffer_size: usize,
    state: State,
}

impl<R: AsyncRead + Unpin> DecryptingStream<R> {
    /// Wraps `inner`, which must be positioned at the start of the blob.
    ///
    /// `key` is an already validated key; when it carries an HMAC the blob is
    /// read in the current layout, otherwise in the legacy layout.
    ///
    /// # Errors
    ///
    /// - `Error::KeyNotReady` if `key` has no usable material
    /// - `Error::InvalidMetadata` if the key's HMAC is not 32 base64 bytes
    pub fn new(inner: R, key: &EncryptionKey, buffer_size: usize) -> Result<Self, Error> {
        Ok(Self {
            inner,
            key: ready_key_bytes(key)?,
            out_of_band: out_of_band_tag(key)?,
            buffer_size: buffer_size.max(1),
            state: State::Uninitialized { prefix: [0; IV_SIZE + HMAC_SIZE], filled: 0 },
        })
    }

    /// Returns where the stream is in its lifecycle.
    pub const fn state(&self) -> StreamState {
        match self.state {
            State::Uninitialized { .. } => StreamState::Uninitialized,
            State::Initialized(_) => StreamState::Initialized,
            State::Finalized => StreamState::Finalized,
            State::Failed(_) => StreamState::Failed,
        }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    const fn prefix_len(&self) -> usize {
        if self.out_of_band.is_some() {
            IV_SIZE
        } else {
            IV_SIZE + HMAC_SIZE
        }
    }

    fn poll_init(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let need = self.prefix_len();
        let State::Uninitialized { prefix, filled } = &mut self.state else {
            return Poll::Ready(Ok(()));
        };

        while *filled < need {
            let mut read_buf = ReadBuf::new(&mut prefix[*filled..need]);
            ready!(Pin::new(&mut self.inner).poll_read(cx, &mut read_buf))?;
            let n = read_buf.filled().len();
            if n == 0 {
                return Poll::Ready(Err(Error::UnexpectedEndOfStream {
                    expected: need,
                    actual: *filled,
                }));
            }
            *filled += n;
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&prefix[..IV_SIZE]);
        let expected = match self.out_of_band {
            Some(tag) => tag,
            None => {
                let mut tag = [0u8; HMAC_SIZE];
                tag.copy_from_slice(&prefix[IV_SIZE..need]);
                tag
            }
        };

        self.state = State::Initialized(Box::new(Active {
            decoder: Some(CbcDecoder::new(&self.key, &iv)?),
            mac: Some(new_mac(&self.key)?),
            expected,
            read_buf: vec![0; self.buffer_size],
            plain: Zeroizing::new(Vec::with_capacity(self.buffer_size + IV_SIZE)),
            offset: 0,
        }));
        Poll::Ready(Ok(()))
    }

    fn poll_fill(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<Result<(), Error>> {
        loop {
            match self.state {
                State::Finalized => return Poll::Ready(Ok(())),
                State::Failed(ref error) => return Poll::Ready(Err(replay(error))),
                State::Uninitialized { .. } => ready!(self.poll_init(cx))?,
                State::Initialized(ref mut active) => {
                    let active = &mut **active;

                    if active.offset < active.plain.len() {
                        let n = buf.remaining().min(active.plain.len() - active.offset);
                        let chunk = &active.plain[active.offset..active.offset + n];
                        if let Some(mac) = active.mac.as_mut() {
                            mac.update(chunk);
                        }
                        buf.put_slice(chunk);
                        active.offset += n;
                        return Poll::Ready(Ok(()));
                    }
                    active.plain.clear();
                    active.offset = 0;

                    if active.decoder.is_none() {
                        let verified = active.verify();
                        self.state = State::Finalized;
                        return Poll::Ready(verified);
                    }

                    let mut read_buf = ReadBuf::new(&mut active.read_buf);
                    ready!(Pin::new(&mut self.inner).poll_read(cx, &mut read_buf))?;
                    let n = read_buf.filled().len();
                    if n == 0 {
                        if let Some(decoder) = active.decoder.take() {
                            decoder.finish(&mut active.plain)?;
                        }
                    } else if let Some(decoder) = active.decoder.as_mut() {
                        decoder.update(&active.read_buf[..n], &mut active.plain);
                    }
                }
            }
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DecryptingStream<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let result = ready!(this.poll_fill(cx, buf));
        if let Err(ref error) = result {
            this.state = State::Failed(replay(error));
        }
        Poll::Ready(result.map_err(io::Error::from))
    }
}
