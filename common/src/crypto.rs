//! Symmetric cipher and keyed hashes used for ticket transport.
//!
//! Ciphertext layout: a 4-byte little-endian plaintext length, then AES-128-CBC over the PKCS#7 padded
//! plaintext with a fixed IV. The cipher is not authenticated; a wrong key is detected through the padding
//! and the length header, not through a MAC.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use anyhow::{Context, Result};
use base64::Engine;
use hmac::Mac;

use crate::error::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha3_224 = hmac::Hmac<sha3::Sha3_224>;

const AES_BLOCK_SIZE: usize = 16;
const LENGTH_HEADER_SIZE: usize = 4;
const AES_KEY_PADDING: &str = "f1b7c0a9d3e24f6b8a5c7d9e0b1a2c3d";
const AES_IV: [u8; AES_BLOCK_SIZE] = *b"mdrepo.ticket.iv";

/// Keys shorter than a block are padded with a fixed suffix, longer ones truncated.
pub fn pad_aes_key(key: &str) -> [u8; AES_BLOCK_SIZE] {
    let mut padded = [0u8; AES_BLOCK_SIZE];
    let source = key.bytes().chain(AES_KEY_PADDING.bytes());
    for (slot, byte) in padded.iter_mut().zip(source) {
        *slot = byte;
    }
    padded
}

pub fn aes_encrypt(key: &str, data: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(data.len())
        .with_context(|| format!("payload of {} bytes is too large to encrypt", data.len()))?;
    let key = pad_aes_key(key);
    let cipher = Aes128CbcEnc::new(&key.into(), &AES_IV.into()).encrypt_padded_vec_mut::<Pkcs7>(data);
    let mut out = Vec::with_capacity(LENGTH_HEADER_SIZE + cipher.len());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&cipher);
    Ok(out)
}

pub fn aes_decrypt(key: &str, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < LENGTH_HEADER_SIZE + AES_BLOCK_SIZE {
        return Err(Error::DecryptFailed(format!("ciphertext too short ({} bytes)", data.len())).into());
    }
    let (header, body) = data.split_at(LENGTH_HEADER_SIZE);
    if body.len() % AES_BLOCK_SIZE != 0 {
        return Err(Error::DecryptFailed(format!(
            "ciphertext length {} is not a multiple of the block size",
            body.len()
        ))
        .into());
    }
    let mut length_bytes = [0u8; LENGTH_HEADER_SIZE];
    length_bytes.copy_from_slice(header);
    let length = u32::from_le_bytes(length_bytes) as usize;
    let key = pad_aes_key(key);
    let mut plain = Aes128CbcDec::new(&key.into(), &AES_IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| Error::DecryptFailed("bad padding, wrong key?".to_string()))?;
    if length > plain.len() {
        return Err(Error::DecryptFailed(format!(
            "length header {} exceeds decrypted payload of {} bytes",
            length,
            plain.len()
        ))
        .into());
    }
    plain.truncate(length);
    Ok(plain)
}

/// Lower-case hex MD5 of a string.
pub fn md5_hex(text: &str) -> String {
    hex::encode(md5::compute(text.as_bytes()).0)
}

/// HMAC-SHA3-224 of `message` keyed with `secret`, URL-safe base64.
pub fn hmac_sha3_224(secret: &[u8], message: &str) -> Result<String> {
    let mut mac = <HmacSha3_224 as Mac>::new_from_slice(secret).context("invalid HMAC key")?;
    mac.update(message.as_bytes());
    Ok(base64::engine::general_purpose::URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// URL-safe base64 decoding, padded or not.
pub fn base64_url_decode(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    base64::engine::general_purpose::URL_SAFE
        .decode(text)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(text))
        .with_context(|| format!("{text:?} is not valid base64"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn key_padding() {
        assert_eq!(&pad_aes_key("abc")[..3], b"abc");
        assert_eq!(&pad_aes_key("abc")[3..], &AES_KEY_PADDING.as_bytes()[..13]);
        assert_eq!(&pad_aes_key("0123456789abcdefXYZ"), b"0123456789abcdef");
    }

    #[test]
    fn ciphertext_layout() -> Result<()> {
        let data = b"payload_test_axvb2129043:slxxcive_39f9g9g3";
        let encrypted = aes_encrypt("as1902398301sseevbn", data)?;
        assert_eq!(&encrypted[..4], &(data.len() as u32).to_le_bytes());
        assert_eq!((encrypted.len() - 4) % 16, 0);
        assert_eq!(aes_decrypt("as1902398301sseevbn", &encrypted)?, data);
        Ok(())
    }

    #[test]
    fn malformed_ciphertext_is_rejected() -> Result<()> {
        for data in [&b""[..], &b"\x05\0\0\0abc"[..], &[0u8; 4 + 17][..]] {
            let err = aes_decrypt("key", data).unwrap_err();
            assert!(matches!(
                crate::error::kind(&err),
                Some(Error::DecryptFailed(_))
            ));
        }
        let mut encrypted = aes_encrypt("key", b"short")?;
        encrypted[..4].copy_from_slice(&1000u32.to_le_bytes());
        assert!(aes_decrypt("key", &encrypted).is_err());
        Ok(())
    }

    #[test]
    fn md5_of_password() {
        assert_eq!(md5_hex("hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn hmac_is_url_safe_and_keyed() -> Result<()> {
        let a = hmac_sha3_224(b"secret-one", "0000-0002-9100-4108")?;
        let b = hmac_sha3_224(b"secret-two", "0000-0002-9100-4108")?;
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/'));
        // 28 byte digest
        assert_eq!(base64_url_decode(&a)?.len(), 28);
        Ok(())
    }

    proptest! {
        #[test]
        fn encrypt_decrypt_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512), key in "[ -~]{0,40}") {
            let encrypted = aes_encrypt(&key, &data).unwrap();
            prop_assert_eq!(aes_decrypt(&key, &encrypted).unwrap(), data);
        }
    }
}
