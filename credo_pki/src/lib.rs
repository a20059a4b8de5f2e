mod argon;
mod certificate;
pub mod certificate_chain;
mod config;
mod encrypt;
mod envelope;
mod group_key;
mod import;
pub mod key_matcher;
mod member_key;
mod passphrase;
mod password;
pub mod pem;
mod private_key;
mod protection;
pub mod store;

// Re-Exports
pub use argon2;
pub use rsa;

// Exports
pub use argon::{ArgonCost, ArgonParams, DeriveKeyError};
pub use certificate::{
    CertificateData, CertificateParseError, CertificateRecord, RsaPublicParameters,
};
pub use certificate_chain::TrustChain;
pub use config::ProtectionConfig;
pub use encrypt::{DecryptError, EncryptError, EncryptedData, EncryptionAlgorithm};
pub use envelope::{EnvelopeError, EnvelopeKind, WrapAlgorithm, WrappedKeyEnvelope};
pub use group_key::{GroupKeyError, GroupSecretKey};
pub use import::{
    CredentialImporter, ImportDetails, ImportError, ImportWarning, PemExport, ProtectedCredential,
    ValidationResult,
};
pub use key_matcher::MatchError;
pub use member_key::{LockedMemberKey, MemberKeyError, MemberKeyPair, MemberPublicKey};
pub use passphrase::{DEFAULT_PASSPHRASE_ITERATIONS, PassphraseCipher, PassphraseError};
pub use password::Password;
pub use crate::pem::{EncodedObject, ParseError};
pub use private_key::{KeyError, PrivateKeyMaterial};
pub use protection::{EnvelopeProtectionService, ProtectionContext, ProtectionError};
pub use store::{GroupKeyStore, StoreError, memory::MemoryGroupKeyStore};
