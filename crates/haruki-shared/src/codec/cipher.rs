use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;

use crate::constants::AES_BLOCK_SIZE;
use crate::error::CodecError;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// AES-128-CBC with a fixed key and IV, PKCS7 padded.
#[derive(Clone)]
pub struct CbcCipher {
    key: [u8; 16],
    iv: [u8; AES_BLOCK_SIZE],
}

impl std::fmt::Debug for CbcCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcCipher").finish_non_exhaustive()
    }
}

impl CbcCipher {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CodecError> {
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| CodecError::InvalidKeyLength(key.len()))?;
        let iv: [u8; AES_BLOCK_SIZE] = iv
            .try_into()
            .map_err(|_| CodecError::InvalidIvLength(iv.len()))?;
        Ok(Self { key, iv })
    }

    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self, CodecError> {
        let key = hex::decode(key_hex.trim())?;
        let iv = hex::decode(iv_hex.trim())?;
        Self::new(&key, &iv)
    }

    /// Pads and encrypts `plaintext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Encryptor::new(&self.key.into(), &self.iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypts `ciphertext` into `out` (cleared first) and strips padding.
    pub fn decrypt_into(&self, ciphertext: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
        if ciphertext.is_empty() {
            return Err(CodecError::EmptyContent);
        }
        if ciphertext.len() % AES_BLOCK_SIZE != 0 {
            return Err(CodecError::InvalidBlockSize(ciphertext.len()));
        }

        out.clear();
        out.extend_from_slice(ciphertext);
        let plain_len = Decryptor::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_mut::<Pkcs7>(out)
            .map_err(|_| CodecError::InvalidPadding)?
            .len();
        out.truncate(plain_len);
        Ok(())
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(ciphertext.len());
        self.decrypt_into(ciphertext, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CbcCipher {
        CbcCipher::new(&[7u8; 16], &[3u8; 16]).unwrap()
    }

    #[test]
    fn test_roundtrip_all_lengths() {
        let c = cipher();
        for len in 0..40 {
            let plain: Vec<u8> = (0..len as u8).collect();
            let enc = c.encrypt(&plain);
            assert_eq!(enc.len() % AES_BLOCK_SIZE, 0);
            assert!(enc.len() > plain.len());
            assert_eq!(c.decrypt(&enc).unwrap(), plain);
        }
    }

    #[test]
    fn test_known_vector() {
        // NIST SP 800-38A F.2.1, first block, followed by a full padding block
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let plain = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let c = CbcCipher::new(&key, &iv).unwrap();
        let enc = c.encrypt(&plain);
        assert_eq!(hex::encode(&enc[..16]), "7649abac8119b246cee98e9b12e9197d");
        assert_eq!(enc.len(), 32);
    }

    #[test]
    fn test_rejects_bad_lengths() {
        let c = cipher();
        assert!(matches!(c.decrypt(&[]), Err(CodecError::EmptyContent)));
        assert!(matches!(
            c.decrypt(&[0u8; 17]),
            Err(CodecError::InvalidBlockSize(17))
        ));
    }

    #[test]
    fn test_rejects_bad_padding() {
        let c = cipher();
        let mut enc = c.encrypt(b"hello world");
        let last = enc.len() - 1;
        enc[last] ^= 0x55;
        assert!(c.decrypt(&enc).is_err());
    }

    #[test]
    fn test_iv_must_be_block_sized() {
        assert!(matches!(
            CbcCipher::new(&[0u8; 16], &[0u8; 8]),
            Err(CodecError::InvalidIvLength(8))
        ));
        assert!(matches!(
            CbcCipher::new(&[0u8; 32], &[0u8; 16]),
            Err(CodecError::InvalidKeyLength(32))
        ));
        assert!(CbcCipher::from_hex("zz", "00").is_err());
    }

    #[test]
    fn test_wrong_iv_fails_or_differs() {
        let plain = b"suite payload".to_vec();
        let enc = cipher().encrypt(&plain);
        let other = CbcCipher::new(&[7u8; 16], &[4u8; 16]).unwrap();
        // Only the first block depends on the IV, so padding still validates.
        let dec = other.decrypt(&enc).unwrap();
        assert_ne!(dec, plain);
        assert_eq!(dec.len(), plain.len());
    }
}
