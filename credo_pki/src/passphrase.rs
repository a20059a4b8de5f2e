use pkcs8::{
    EncryptedPrivateKeyInfo, PrivateKeyInfo,
    pkcs5::{self, pbes2},
};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use tracing::debug;

use crate::{
    Password,
    pem::{EncodedObject, EncryptedKeyFormat, KeyFormat},
    private_key::{KeyError, PrivateKeyMaterial},
};

mod legacy;

/// Iteration count used by [`PassphraseCipher::default`].
pub const DEFAULT_PASSPHRASE_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PassphraseError {
    #[error("a passphrase is required to decrypt the private key")]
    PassphraseRequired,
    #[error("the passphrase is incorrect")]
    WrongPassphrase,
    #[error("unsupported key type, only RSA keys with CRT parameters are accepted")]
    UnsupportedKeyType,
    #[error("unsupported private key encryption: {0}")]
    UnsupportedEncryption(String),
    #[error("the private key is malformed")]
    MalformedKey,
    #[error("the object is not a private key")]
    NotAPrivateKey,
    #[error("error encrypting private key")]
    EncryptFailed,
}

impl From<KeyError> for PassphraseError {
    fn from(value: KeyError) -> Self {
        match value {
            KeyError::UnsupportedKeyType => Self::UnsupportedKeyType,
            KeyError::Malformed => Self::MalformedKey,
            KeyError::Encode => Self::EncryptFailed,
        }
    }
}

/// Rejects PBES2 parameters we cannot decrypt before the passphrase is
/// applied, so they never show up as a wrong passphrase.
fn check_pbes2(params: &pbes2::Parameters<'_>) -> Result<(), PassphraseError> {
    let kdf_supported = match &params.kdf {
        pbes2::Kdf::Pbkdf2(pbkdf2) => matches!(
            pbkdf2.prf,
            pbes2::Pbkdf2Prf::HmacWithSha1
                | pbes2::Pbkdf2Prf::HmacWithSha224
                | pbes2::Pbkdf2Prf::HmacWithSha256
                | pbes2::Pbkdf2Prf::HmacWithSha384
                | pbes2::Pbkdf2Prf::HmacWithSha512
        ),
        pbes2::Kdf::Scrypt(_) => true,
        _ => false,
    };
    if !kdf_supported {
        let oid = match &params.kdf {
            pbes2::Kdf::Pbkdf2(pbkdf2) => pbkdf2.prf.oid(),
            other => other.oid(),
        };
        return Err(PassphraseError::UnsupportedEncryption(oid.to_string()));
    }

    let cipher_supported = matches!(
        params.encryption,
        pbes2::EncryptionScheme::Aes128Cbc { .. }
            | pbes2::EncryptionScheme::Aes192Cbc { .. }
            | pbes2::EncryptionScheme::Aes256Cbc { .. }
            | pbes2::EncryptionScheme::DesEde3Cbc { .. }
    );
    let key_length_matches = params
        .kdf
        .key_length()
        .is_none_or(|len| usize::from(len) == params.encryption.key_size());
    if !cipher_supported || !key_length_matches {
        return Err(PassphraseError::UnsupportedEncryption(
            params.encryption.oid().to_string(),
        ));
    }

    Ok(())
}

/// Decrypts private keys protected with a passphrase and protects keys for
/// export.
#[derive(Debug, Clone)]
pub struct PassphraseCipher {
    iterations: u32,
}

impl Default for PassphraseCipher {
    fn default() -> Self {
        Self::new(DEFAULT_PASSPHRASE_ITERATIONS)
    }
}

impl PassphraseCipher {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub fn requires_passphrase(object: &EncodedObject) -> bool {
        match object {
            EncodedObject::EncryptedPrivateKey { .. } => true,
            EncodedObject::PrivateKey { .. } | EncodedObject::Certificate { .. } => false,
        }
    }

    /// Fails with [`PassphraseError::PassphraseRequired`] if `object` is
    /// encrypted and no usable passphrase was given.
    pub fn check_passphrase(
        object: &EncodedObject,
        passphrase: Option<&Password>,
    ) -> Result<(), PassphraseError> {
        let usable = passphrase.is_some_and(|passphrase| !passphrase.is_empty());
        if Self::requires_passphrase(object) && !usable {
            return Err(PassphraseError::PassphraseRequired);
        }
        Ok(())
    }

    /// Decodes any private key object, decrypting it first if needed.
    pub fn decode(
        &self,
        object: &EncodedObject,
        passphrase: Option<&Password>,
    ) -> Result<PrivateKeyMaterial, PassphraseError> {
        match object {
            EncodedObject::PrivateKey { format, der } => Ok(match format {
                KeyFormat::Pkcs1 => PrivateKeyMaterial::from_pkcs1_der(der)?,
                KeyFormat::Pkcs8 => PrivateKeyMaterial::from_pkcs8_der(der)?,
                KeyFormat::Sec1 => return Err(PassphraseError::UnsupportedKeyType),
            }),
            EncodedObject::EncryptedPrivateKey { .. } => {
                Self::check_passphrase(object, passphrase)?;
                let passphrase = passphrase.ok_or(PassphraseError::PassphraseRequired)?;
                self.decrypt(object, passphrase)
            }
            EncodedObject::Certificate { .. } => Err(PassphraseError::NotAPrivateKey),
        }
    }

    /// Decrypts an encrypted private key.
    ///
    /// Everything that goes wrong after the passphrase has been applied is
    /// reported as [`PassphraseError::WrongPassphrase`]: a bad passphrase
    /// may well produce output that decodes but is garbage.
    pub fn decrypt(
        &self,
        object: &EncodedObject,
        passphrase: &Password,
    ) -> Result<PrivateKeyMaterial, PassphraseError> {
        Self::check_passphrase(object, Some(passphrase))?;

        let plaintext = match object {
            EncodedObject::EncryptedPrivateKey {
                format: EncryptedKeyFormat::Pkcs8,
                der,
            } => return Self::decrypt_pkcs8(der, passphrase),
            EncodedObject::EncryptedPrivateKey {
                format: EncryptedKeyFormat::Legacy(info),
                der,
            } => legacy::decrypt(info, der, passphrase)?,
            EncodedObject::PrivateKey { .. } | EncodedObject::Certificate { .. } => {
                return Err(PassphraseError::NotAPrivateKey);
            }
        };

        PrivateKeyMaterial::from_pkcs1_der(&plaintext).map_err(|err| match err {
            KeyError::UnsupportedKeyType => PassphraseError::UnsupportedKeyType,
            KeyError::Malformed | KeyError::Encode => PassphraseError::WrongPassphrase,
        })
    }

    fn decrypt_pkcs8(
        der: &[u8],
        passphrase: &Password,
    ) -> Result<PrivateKeyMaterial, PassphraseError> {
        let encrypted = EncryptedPrivateKeyInfo::try_from(der).map_err(|_| {
            PassphraseError::UnsupportedEncryption(String::from("unrecognized PKCS#8 encryption"))
        })?;

        let params = encrypted.encryption_algorithm.pbes2().ok_or_else(|| {
            PassphraseError::UnsupportedEncryption(encrypted.encryption_algorithm.oid().to_string())
        })?;
        check_pbes2(params)?;

        let document = encrypted
            .decrypt(passphrase.as_bytes())
            .map_err(|err| match err {
                pkcs8::Error::EncryptedPrivateKey(pkcs5::Error::UnsupportedAlgorithm { oid }) => {
                    PassphraseError::UnsupportedEncryption(oid.to_string())
                }
                _ => PassphraseError::WrongPassphrase,
            })?;

        PrivateKeyMaterial::from_pkcs8_der(document.as_bytes()).map_err(|err| match err {
            KeyError::UnsupportedKeyType => PassphraseError::UnsupportedKeyType,
            KeyError::Malformed | KeyError::Encode => PassphraseError::WrongPassphrase,
        })
    }

    /// Encrypts `key` into a PKCS#8 `ENCRYPTED PRIVATE KEY` using
    /// PBKDF2-SHA256 and AES-256-CBC.
    pub fn encrypt(
        &self,
        key: &PrivateKeyMaterial,
        passphrase: &Password,
    ) -> Result<EncodedObject, PassphraseError> {
        if passphrase.is_empty() {
            return Err(PassphraseError::PassphraseRequired);
        }

        let der = key.to_pkcs8_der()?;
        let info =
            PrivateKeyInfo::try_from(der.as_slice()).map_err(|_| PassphraseError::EncryptFailed)?;

        let rand = SystemRandom::new();
        let mut salt = [0u8; 16];
        rand.fill(&mut salt).map_err(|_| PassphraseError::EncryptFailed)?;
        let mut iv = [0u8; 16];
        rand.fill(&mut iv).map_err(|_| PassphraseError::EncryptFailed)?;

        let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(self.iterations, &salt, &iv)
            .map_err(|_| PassphraseError::EncryptFailed)?;

        let encrypted = info
            .encrypt_with_params(params, passphrase.as_bytes())
            .map_err(|_| PassphraseError::EncryptFailed)?;

        debug!("encrypted private key with {} iterations", self.iterations);

        Ok(EncodedObject::EncryptedPrivateKey {
            format: EncryptedKeyFormat::Pkcs8,
            der: encrypted.as_bytes().to_vec(),
        })
    }
}
