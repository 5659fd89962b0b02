//! Symmetric cipher module.
//!
//! Provides AES-CBC encryption with PKCS7 padding and a fresh random IV
//! per message, framed as `iv(16) || ciphertext`.
//!
//! There is no authentication tag on this format: a successful PKCS7
//! unpad is the only integrity signal, which is weak (padding-oracle
//! class). The framing is fixed by the wire protocol and kept as-is.

#![forbid(unsafe_code)]

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// IV length prepended to every encrypted buffer.
pub const IV_SIZE: usize = 16;

/// Error type for cipher operations.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid key length: expected 16 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("RNG failed")]
    RngError,
}

/// Encrypt with a fresh random IV.
///
/// Returns: iv(16) || ciphertext
///
/// Accepts 16-byte (AES-128) or 32-byte (AES-256) keys; any other key
/// length is an argument error. A new IV is drawn from the OS RNG on
/// every call, so encrypting the same plaintext twice never yields the
/// same output.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut iv = [0u8; IV_SIZE];
    getrandom::getrandom(&mut iv).map_err(|_| CipherError::RngError)?;

    let ct = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, &iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => Aes256CbcEnc::new_from_slices(key, &iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        n => return Err(CipherError::InvalidKeyLength(n)),
    };

    let mut out = Vec::with_capacity(IV_SIZE + ct.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt a buffer produced by [`encrypt`].
///
/// Expects: iv(16) || ciphertext
///
/// Fails closed: any truncated buffer (`len <= 16`), bad key length,
/// misaligned ciphertext, or padding mismatch returns `None`. Callers
/// treat `None` as a silently rejected message, never as a fault to
/// propagate into the transport loop.
pub fn decrypt(key: &[u8], blob: &[u8]) -> Option<Vec<u8>> {
    if blob.len() <= IV_SIZE {
        return None;
    }
    let (iv, ct) = blob.split_at(IV_SIZE);

    match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_vec_mut::<Pkcs7>(ct)
            .ok(),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_vec_mut::<Pkcs7>(ct)
            .ok(),
        _ => None,
    }
}
