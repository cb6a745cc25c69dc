//! AES key wrap with padding (RFC 5649).
//!
//! Built on the RFC 3394 wrap offered by OpenSSL, using the alternative
//! initial value `A65959A6 || MLI` and zero padding to a multiple of eight
//! bytes. A plaintext of at most eight bytes is wrapped as a single AES
//! block.

use openssl::{
    aes::{unwrap_key, wrap_key, AesKey},
    symm::{Cipher, Crypter, Mode},
};
use zeroize::Zeroizing;

use super::SignerError;

/// The semiblock size of the key wrap algorithm.
pub const SEMIBLOCK: usize = 8;

const AIV_PREFIX: [u8; 4] = [0xa6, 0x59, 0x59, 0xa6];

/// Returns the length of the wrapped output for a plaintext of `len` bytes.
pub fn wrapped_len(len: usize) -> usize {
    padded_len(len) + SEMIBLOCK
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(SEMIBLOCK).max(1) * SEMIBLOCK
}

fn aiv(len: usize) -> Result<[u8; 8], SignerError> {
    let mli = u32::try_from(len).map_err(|_| SignerError::KeyWrap(format!("plaintext too long: {} bytes", len)))?;
    let mut iv = [0u8; 8];
    iv[..4].copy_from_slice(&AIV_PREFIX);
    iv[4..].copy_from_slice(&mli.to_be_bytes());
    Ok(iv)
}

fn ecb_cipher(kek: &[u8]) -> Result<Cipher, SignerError> {
    match kek.len() {
        16 => Ok(Cipher::aes_128_ecb()),
        24 => Ok(Cipher::aes_192_ecb()),
        32 => Ok(Cipher::aes_256_ecb()),
        len => Err(SignerError::KeyWrap(format!("invalid key encryption key length: {}", len))),
    }
}

fn single_block(kek: &[u8], mode: Mode, block: &[u8]) -> Result<Zeroizing<Vec<u8>>, SignerError> {
    let mut crypter = Crypter::new(ecb_cipher(kek)?, mode, kek, None)?;
    crypter.pad(false);
    let mut out = Zeroizing::new(vec![0; block.len() + 16]);
    let mut count = crypter.update(block, &mut out)?;
    count += crypter.finalize(&mut out[count..])?;
    out.truncate(count);
    Ok(out)
}

/// Wraps `plaintext` under the key encryption key `kek`.
///
/// The padded copy of the plaintext is wiped before returning.
pub fn wrap(kek: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SignerError> {
    if plaintext.is_empty() {
        return Err(SignerError::KeyWrap("cannot wrap empty input".to_string()));
    }
    let iv = aiv(plaintext.len())?;

    let mut padded = Zeroizing::new(plaintext.to_vec());
    padded.resize(padded_len(plaintext.len()), 0);

    if padded.len() == SEMIBLOCK {
        let mut block = Zeroizing::new(iv.to_vec());
        block.extend_from_slice(&padded);
        return Ok(single_block(kek, Mode::Encrypt, &block)?.to_vec());
    }

    let key = AesKey::new_encrypt(kek).map_err(|_| SignerError::KeyWrap("invalid key encryption key".to_string()))?;
    let mut out = vec![0; padded.len() + SEMIBLOCK];
    let written = wrap_key(&key, Some(iv), &mut out, &padded)
        .map_err(|_| SignerError::KeyWrap("wrap failed".to_string()))?;
    out.truncate(written);
    Ok(out)
}

/// Unwraps a key wrapped with [`wrap`], checking its integrity.
pub fn unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, SignerError> {
    if wrapped.len() < 2 * SEMIBLOCK || wrapped.len() % SEMIBLOCK != 0 {
        return Err(SignerError::KeyWrap(format!("invalid wrapped length: {}", wrapped.len())));
    }
    let padded = wrapped.len() - SEMIBLOCK;

    if padded == SEMIBLOCK {
        let block = single_block(kek, Mode::Decrypt, wrapped)?;
        return check_padding(&block[..SEMIBLOCK], &block[SEMIBLOCK..]);
    }

    // The message length indicator is part of the checked IV, so try each
    // length that pads to the wrapped size.
    let key = AesKey::new_decrypt(kek).map_err(|_| SignerError::KeyWrap("invalid key encryption key".to_string()))?;
    for len in (padded - SEMIBLOCK + 1)..=padded {
        let mut out = Zeroizing::new(vec![0; padded]);
        if unwrap_key(&key, Some(aiv(len)?), &mut out, wrapped).is_ok() {
            if out[len..].iter().any(|b| *b != 0) {
                break;
            }
            out.truncate(len);
            return Ok(out);
        }
    }
    Err(SignerError::KeyWrap("integrity check failed".to_string()))
}

fn check_padding(iv: &[u8], padded: &[u8]) -> Result<Zeroizing<Vec<u8>>, SignerError> {
    let fail = || SignerError::KeyWrap("integrity check failed".to_string());
    if iv[..4] != AIV_PREFIX {
        return Err(fail());
    }
    let len = u32::from_be_bytes([iv[4], iv[5], iv[6], iv[7]]) as usize;
    if len == 0 || len > padded.len() || padded[len..].iter().any(|b| *b != 0) {
        return Err(fail());
    }
    Ok(Zeroizing::new(padded[..len].to_vec()))
}
