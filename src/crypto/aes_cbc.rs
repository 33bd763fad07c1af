//! AES-128-CBC with PKCS#7 padding.
//!
//! Grounded on `eisbaw-ost`'s SRTP module (`calling/srtp.rs`), which reaches
//! for the RustCrypto `aes`/`ctr` crates rather than hand-rolling a cipher;
//! this module reaches for the sibling RustCrypto `cbc` crate for the same
//! reason. The contract is black-box: any library providing AES-128-CBC +
//! PKCS#7 would satisfy it.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::CryptoError;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

const KEY_LEN: usize = 16;
const IV_LEN: usize = 16;

/// Stateless AES-128-CBC + PKCS#7 encrypt/decrypt. Pure function of
/// `(key, iv, data)`; carries no mutable state and is safe to call from any
/// thread.
pub struct AesCbc;

impl AesCbc {
    /// Encrypt `plaintext` under `key`/`iv`, appending PKCS#7 padding (always
    /// at least one byte, a full 16-byte block when the input is already
    /// block-aligned).
    pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key: &[u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?;
        let iv: &[u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvSize(iv.len()))?;

        let encryptor = Encryptor::new(key.into(), iv.into());
        Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    /// Decrypt `ciphertext`, verifying and stripping PKCS#7 padding.
    pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key: &[u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?;
        let iv: &[u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvSize(iv.len()))?;

        let decryptor = Decryptor::new(key.into(), iv.into());
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| CryptoError::CryptoFailed(e.to_string()))
    }

    /// Encrypt exactly `data.len()` bytes in place, no padding. `data.len()`
    /// must be a multiple of 16; used by SAMPLE-AES, which leaves a clear
    /// tail shorter than one block rather than padding it.
    pub fn encrypt_blocks_in_place(data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
        if data.len() % 16 != 0 {
            return Err(CryptoError::CryptoFailed(format!(
                "SAMPLE-AES block input must be 16-byte aligned, got {} bytes",
                data.len()
            )));
        }
        let key: &[u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?;
        let iv: &[u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvSize(iv.len()))?;

        let mut encryptor = Encryptor::new(key.into(), iv.into());
        for chunk in data.chunks_mut(16) {
            encryptor.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
        Ok(())
    }

    /// Inverse of [`Self::encrypt_blocks_in_place`].
    pub fn decrypt_blocks_in_place(data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
        if data.len() % 16 != 0 {
            return Err(CryptoError::CryptoFailed(format!(
                "SAMPLE-AES block input must be 16-byte aligned, got {} bytes",
                data.len()
            )));
        }
        let key: &[u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?;
        let iv: &[u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvSize(iv.len()))?;

        let mut decryptor = Decryptor::new(key.into(), iv.into());
        for chunk in data.chunks_mut(16) {
            decryptor.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn block_round_trip_is_size_preserving() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let mut data = vec![0xABu8; 48];
        let original = data.clone();
        AesCbc::encrypt_blocks_in_place(&mut data, &key, &iv).unwrap();
        assert_eq!(data.len(), original.len());
        assert_ne!(data, original);
        AesCbc::decrypt_blocks_in_place(&mut data, &key, &iv).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn round_trip() {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        for len in [0usize, 1, 15, 16, 17, 31, 32, 100] {
            let data = vec![0xABu8; len];
            let ct = AesCbc::encrypt(&data, &key, &iv).unwrap();
            // Ciphertext is always block-aligned and strictly longer than input
            // (PKCS#7 always adds at least one byte of padding).
            assert_eq!(ct.len() % 16, 0);
            assert!(ct.len() > len);
            let pt = AesCbc::decrypt(&ct, &key, &iv).unwrap();
            assert_eq!(pt, data);
        }
    }

    #[test]
    fn rejects_bad_key_and_iv_sizes() {
        let data = b"hello world";
        assert!(matches!(
            AesCbc::encrypt(data, &[0u8; 15], &[0u8; 16]),
            Err(CryptoError::InvalidKeySize(15))
        ));
        assert!(matches!(
            AesCbc::encrypt(data, &[0u8; 16], &[0u8; 8]),
            Err(CryptoError::InvalidIvSize(8))
        ));
    }

    #[test]
    fn decrypt_rejects_malformed_padding() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let mut ct = AesCbc::encrypt(b"0123456789abcdef", &key, &iv).unwrap();
        // Corrupt the last block so the padding no longer validates.
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(matches!(
            AesCbc::decrypt(&ct, &key, &iv),
            Err(CryptoError::CryptoFailed(_))
        ));
    }

    /// NIST SP 800-38A F.2.1 AES-128-CBC test vector.
    #[test]
    fn nist_sp800_38a_f_2_1_vector() {
        let key = hex("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = hex("000102030405060708090a0b0c0d0e0f");
        let plaintext = hex("6bc1bee22e409f96e93d7e117393172a");
        let expected_first_block = hex("7649abac8119b246cee98e9b12e9197d");

        let ct = AesCbc::encrypt(&plaintext, &key, &iv).unwrap();
        assert_eq!(&ct[..16], &expected_first_block[..]);
    }
}
