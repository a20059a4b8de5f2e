//! OpenSSL "traditional" key encryption: a PKCS#1 key encrypted with
//! AES-CBC or triple DES, the key derived from the passphrase with
//! `EVP_BytesToKey` (one round of MD5) and the first 8 bytes of the IV as
//! salt.

use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use md5::{Digest, Md5};
use zeroize::Zeroizing;

use super::PassphraseError;
use crate::{Password, pem::DekInfo};

const SALT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyCipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    DesEde3Cbc,
}

impl LegacyCipher {
    fn from_name(name: &str) -> Result<Self, PassphraseError> {
        match name {
            "AES-128-CBC" => Ok(Self::Aes128Cbc),
            "AES-192-CBC" => Ok(Self::Aes192Cbc),
            "AES-256-CBC" => Ok(Self::Aes256Cbc),
            "DES-EDE3-CBC" => Ok(Self::DesEde3Cbc),
            other => Err(PassphraseError::UnsupportedEncryption(other.to_owned())),
        }
    }

    fn key_len(self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc => 24,
            Self::Aes256Cbc => 32,
            Self::DesEde3Cbc => 24,
        }
    }

    fn iv_len(self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
            Self::DesEde3Cbc => 8,
        }
    }
}

fn bytes_to_key(passphrase: &Password, salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(Vec::with_capacity(len + 16));
    let mut previous: Option<Zeroizing<Vec<u8>>> = None;

    while key.len() < len {
        let mut hasher = Md5::new();
        if let Some(previous) = &previous {
            hasher.update(previous.as_slice());
        }
        hasher.update(passphrase.as_bytes());
        hasher.update(salt);

        let block = Zeroizing::new(hasher.finalize().to_vec());
        key.extend_from_slice(&block);
        previous = Some(block);
    }

    key.truncate(len);
    key
}

fn parameters(info: &DekInfo) -> Result<(LegacyCipher, &[u8]), PassphraseError> {
    let cipher = LegacyCipher::from_name(&info.algorithm)?;
    if info.iv.len() != cipher.iv_len() {
        return Err(PassphraseError::UnsupportedEncryption(info.algorithm.clone()));
    }
    Ok((cipher, info.iv.as_slice()))
}

/// Returns the decrypted PKCS#1 DER.
pub(super) fn decrypt(
    info: &DekInfo,
    ciphertext: &[u8],
    passphrase: &Password,
) -> Result<Zeroizing<Vec<u8>>, PassphraseError> {
    let (cipher, iv) = parameters(info)?;
    let key = bytes_to_key(passphrase, &iv[..SALT_LEN], cipher.key_len());

    let plaintext = match cipher {
        LegacyCipher::Aes128Cbc => cbc::Decryptor::<aes::Aes128>::new_from_slices(&key, iv)
            .map_err(|_| PassphraseError::WrongPassphrase)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        LegacyCipher::Aes192Cbc => cbc::Decryptor::<aes::Aes192>::new_from_slices(&key, iv)
            .map_err(|_| PassphraseError::WrongPassphrase)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        LegacyCipher::Aes256Cbc => cbc::Decryptor::<aes::Aes256>::new_from_slices(&key, iv)
            .map_err(|_| PassphraseError::WrongPassphrase)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        LegacyCipher::DesEde3Cbc => cbc::Decryptor::<des::TdesEde3>::new_from_slices(&key, iv)
            .map_err(|_| PassphraseError::WrongPassphrase)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
    }
    .map_err(|_| PassphraseError::WrongPassphrase)?;

    Ok(Zeroizing::new(plaintext))
}

/// Produces keys the way `openssl rsa -aes256` does, for tests that need
/// legacy input.
#[cfg(test)]
pub(crate) fn encrypt(
    info: &DekInfo,
    plaintext: &[u8],
    passphrase: &Password,
) -> Result<Vec<u8>, PassphraseError> {
    use aes::cipher::BlockEncryptMut;

    let (cipher, iv) = parameters(info)?;
    let key = bytes_to_key(passphrase, &iv[..SALT_LEN], cipher.key_len());

    let ciphertext = match cipher {
        LegacyCipher::Aes128Cbc => cbc::Encryptor::<aes::Aes128>::new_from_slices(&key, iv)
            .map_err(|_| PassphraseError::EncryptFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        LegacyCipher::Aes192Cbc => cbc::Encryptor::<aes::Aes192>::new_from_slices(&key, iv)
            .map_err(|_| PassphraseError::EncryptFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        LegacyCipher::Aes256Cbc => cbc::Encryptor::<aes::Aes256>::new_from_slices(&key, iv)
            .map_err(|_| PassphraseError::EncryptFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        LegacyCipher::DesEde3Cbc => cbc::Encryptor::<des::TdesEde3>::new_from_slices(&key, iv)
            .map_err(|_| PassphraseError::EncryptFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };

    Ok(ciphertext)
}

#[cfg(test)]
mod test {
    use rsa::pkcs1::EncodeRsaPrivateKey;

    use super::{bytes_to_key, encrypt};
    use crate::{
        Password,
        passphrase::{PassphraseCipher, PassphraseError},
        pem::{self, DekInfo, EncodedObject, EncryptedKeyFormat},
        test::fixtures,
    };

    fn legacy_object(algorithm: &str, passphrase: &str) -> EncodedObject {
        let key = fixtures::leaf_key();
        let pkcs1 = key.as_rsa().to_pkcs1_der().unwrap();
        let iv_len = if algorithm.starts_with("DES") { 8 } else { 16 };
        let info = DekInfo {
            algorithm: algorithm.to_owned(),
            iv: (1..=iv_len).collect(),
        };
        let der = encrypt(&info, pkcs1.as_bytes(), &Password::from(passphrase)).unwrap();

        EncodedObject::EncryptedPrivateKey {
            format: EncryptedKeyFormat::Legacy(info),
            der,
        }
    }

    #[test]
    fn key_derivation_matches_openssl() {
        // openssl enc -aes-128-cbc -k password -S 0102030405060708 -P -md md5
        let key = bytes_to_key(
            &Password::from("password"),
            &[1, 2, 3, 4, 5, 6, 7, 8],
            16,
        );
        assert_eq!(hex::encode_upper(&key), "E7B0971E52CA5CC8D0539FB3412F6316");

        let longer = bytes_to_key(
            &Password::from("password"),
            &[1, 2, 3, 4, 5, 6, 7, 8],
            32,
        );
        assert_eq!(&longer[..16], key.as_slice());
    }

    #[test]
    fn decrypts_all_aes_variants() {
        let cipher = PassphraseCipher::default();
        let passphrase = Password::from("hunter2");

        for algorithm in ["AES-128-CBC", "AES-192-CBC", "AES-256-CBC", "DES-EDE3-CBC"] {
            let object = legacy_object(algorithm, "hunter2");
            let key = cipher.decrypt(&object, &passphrase).unwrap();
            assert_eq!(key, fixtures::leaf_key());
        }
    }

    #[test]
    fn decrypts_after_pem_roundtrip() {
        let object = legacy_object("AES-256-CBC", "hunter2");
        let reparsed = pem::parse(object.to_pem()).unwrap().remove(0);

        let key = PassphraseCipher::default()
            .decrypt(&reparsed, &Password::from("hunter2"))
            .unwrap();
        assert_eq!(key, fixtures::leaf_key());
    }

    #[test]
    fn wrong_passphrase() {
        let object = legacy_object("AES-128-CBC", "hunter2");
        assert_eq!(
            PassphraseCipher::default()
                .decrypt(&object, &Password::from("hunter3"))
                .unwrap_err(),
            PassphraseError::WrongPassphrase
        );
    }

    #[test]
    fn reads_openssl_des3_key() {
        let object = pem::parse(fixtures::LEAF_KEY_LEGACY_DES3).unwrap().remove(0);
        assert_eq!(object.dek_info().unwrap().algorithm, "DES-EDE3-CBC");

        let key = PassphraseCipher::default()
            .decrypt(&object, &Password::from(fixtures::LEAF_KEY_PASSPHRASE))
            .unwrap();
        assert_eq!(key, fixtures::leaf_key());
    }

    #[test]
    fn blowfish_is_unsupported() {
        let object = EncodedObject::EncryptedPrivateKey {
            format: EncryptedKeyFormat::Legacy(DekInfo {
                algorithm: String::from("BF-CBC"),
                iv: vec![0; 8],
            }),
            der: vec![0; 32],
        };

        assert_eq!(
            PassphraseCipher::default()
                .decrypt(&object, &Password::from("anything"))
                .unwrap_err(),
            PassphraseError::UnsupportedEncryption(String::from("BF-CBC"))
        );
    }

    #[test]
    fn iv_length_must_fit_cipher() {
        let object = EncodedObject::EncryptedPrivateKey {
            format: EncryptedKeyFormat::Legacy(DekInfo {
                algorithm: String::from("DES-EDE3-CBC"),
                iv: vec![0; 16],
            }),
            der: vec![0; 32],
        };

        assert_eq!(
            PassphraseCipher::default()
                .decrypt(&object, &Password::from("anything"))
                .unwrap_err(),
            PassphraseError::UnsupportedEncryption(String::from("DES-EDE3-CBC"))
        );
    }
}
