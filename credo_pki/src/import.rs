use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    Password,
    certificate::{CertificateParseError, CertificateRecord},
    certificate_chain::{self, TrustChain},
    envelope::WrappedKeyEnvelope,
    key_matcher::{self, MatchError},
    passphrase::{PassphraseCipher, PassphraseError},
    pem::{self, EncodedObject, KeyFormat, ParseError},
    private_key::PrivateKeyMaterial,
    protection::{EnvelopeProtectionService, ProtectionContext, ProtectionError},
    store::GroupKeyStore,
};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("error reading credential bundle: {0}")]
    Parse(#[from] ParseError),
    #[error("the bundle contains no private key")]
    NoPrivateKey,
    #[error("the bundle contains more than one private key")]
    MultiplePrivateKeys,
    #[error("{0}")]
    Passphrase(#[from] PassphraseError),
    #[error("the bundle contains a malformed certificate: {0}")]
    MalformedCertificate(#[from] CertificateParseError),
    #[error("no certificate in the bundle matches the private key")]
    NoMatchingCertificate,
    #[error("{0}")]
    Protection(#[from] ProtectionError),
}

impl From<MatchError> for ImportError {
    fn from(value: MatchError) -> Self {
        match value {
            MatchError::NoMatch => Self::NoMatchingCertificate,
        }
    }
}

/// Findings that do not stop an import but should be shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportWarning {
    IncompleteTrustChain,
    ExpiredSubjectCertificate,
}

/// A parsed bundle waiting for validation.
#[derive(Debug)]
pub struct CredentialImporter {
    objects: Vec<EncodedObject>,
    cipher: PassphraseCipher,
}

impl CredentialImporter {
    pub fn from_bytes(bundle: impl AsRef<[u8]>) -> Result<Self, ImportError> {
        let objects = pem::parse(bundle)?;
        debug!("bundle contains {} objects", objects.len());

        Ok(Self {
            objects,
            cipher: PassphraseCipher::default(),
        })
    }

    pub fn objects(&self) -> &[EncodedObject] {
        &self.objects
    }

    /// Whether the private key in the bundle is encrypted, so the caller
    /// knows to ask for a passphrase before validating.
    pub fn passphrase_required(&self) -> bool {
        self.objects.iter().any(PassphraseCipher::requires_passphrase)
    }

    pub fn validate(&self, passphrase: Option<&Password>) -> Result<ValidationResult, ImportError> {
        self.validate_at(passphrase, OffsetDateTime::now_utc())
    }

    /// Like [`validate`](Self::validate) with `now` as the current time for
    /// the expiry check.
    pub fn validate_at(
        &self,
        passphrase: Option<&Password>,
        now: OffsetDateTime,
    ) -> Result<ValidationResult, ImportError> {
        let mut keys = self.objects.iter().filter(|object| object.is_private_key());
        let key = keys.next().ok_or(ImportError::NoPrivateKey)?;
        if keys.next().is_some() {
            return Err(ImportError::MultiplePrivateKeys);
        }

        let private_key = self.cipher.decode(key, passphrase)?;

        let pool = self
            .objects
            .iter()
            .filter_map(|object| match object {
                EncodedObject::Certificate { der } => Some(CertificateRecord::from_der(der.clone())),
                EncodedObject::PrivateKey { .. } | EncodedObject::EncryptedPrivateKey { .. } => {
                    None
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let subject_certificate = key_matcher::match_certificate(&private_key, &pool)?.clone();

        let mut warnings = Vec::new();
        if subject_certificate.is_expired_at(now) {
            warn!("certificate {} has expired", subject_certificate.subject());
            warnings.push(ImportWarning::ExpiredSubjectCertificate);
        }

        let chain = certificate_chain::resolve(&subject_certificate, &pool);
        if !chain.is_complete() {
            warnings.push(ImportWarning::IncompleteTrustChain);
        }

        let details = ImportDetails::from_certificate(&subject_certificate);
        info!("validated credential {}", details.name());

        Ok(ValidationResult {
            private_key,
            subject_certificate,
            chain,
            warnings,
            details,
        })
    }
}

/// Editable metadata of a credential being imported, pre-filled from its
/// certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDetails {
    name: String,
    note: Option<String>,
    tags: Vec<String>,
    subject: String,
    issuer: String,
    serial: String,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

impl ImportDetails {
    fn from_certificate(certificate: &CertificateRecord) -> Self {
        Self {
            name: certificate
                .common_name()
                .unwrap_or(certificate.subject())
                .to_owned(),
            note: None,
            tags: Vec::new(),
            subject: certificate.subject().to_owned(),
            issuer: certificate.issuer().to_owned(),
            serial: certificate.serial().to_owned(),
            not_before: certificate.not_before(),
            not_after: certificate.not_after(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn set_note(&mut self, note: Option<String>) {
        self.note = note;
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }
}

/// Outcome of the first import phase. Holds the decrypted private key until
/// [`finalize`](Self::finalize) protects it.
#[derive(Debug)]
pub struct ValidationResult {
    private_key: PrivateKeyMaterial,
    subject_certificate: CertificateRecord,
    chain: TrustChain,
    warnings: Vec<ImportWarning>,
    details: ImportDetails,
}

impl ValidationResult {
    pub fn private_key(&self) -> &PrivateKeyMaterial {
        &self.private_key
    }

    pub fn subject_certificate(&self) -> &CertificateRecord {
        &self.subject_certificate
    }

    pub fn chain(&self) -> &TrustChain {
        &self.chain
    }

    pub fn warnings(&self) -> &[ImportWarning] {
        &self.warnings
    }

    pub fn details(&self) -> &ImportDetails {
        &self.details
    }

    pub fn details_mut(&mut self) -> &mut ImportDetails {
        &mut self.details
    }

    /// Protects the private key for the group of `ctx`. The plaintext key
    /// is dropped afterwards.
    pub fn finalize<S: GroupKeyStore>(
        self,
        service: &EnvelopeProtectionService<S>,
        ctx: &ProtectionContext,
    ) -> Result<ProtectedCredential, ImportError> {
        let private_key = service.protect(&self.private_key, ctx)?;
        let complete_chain = self.chain.is_complete();

        info!(
            "imported credential {} into group {}",
            self.details.name,
            ctx.group()
        );

        Ok(ProtectedCredential {
            name: self.details.name,
            owner: ctx.group().to_owned(),
            note: self.details.note,
            tags: self.details.tags,
            issuer: self.details.issuer,
            expiration: self.details.not_after,
            certificate: self.subject_certificate,
            chain: self.chain.certificates().to_vec(),
            complete_chain,
            private_key,
        })
    }
}

/// An imported credential. The private key only exists wrapped under the
/// owning group's secret key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedCredential {
    name: String,
    owner: String,
    note: Option<String>,
    tags: Vec<String>,
    issuer: String,
    expiration: OffsetDateTime,
    certificate: CertificateRecord,
    chain: Vec<CertificateRecord>,
    complete_chain: bool,
    private_key: WrappedKeyEnvelope,
}

/// PEM texts of a credential handed back to its owners.
#[derive(Clone, PartialEq, Eq)]
pub struct PemExport {
    pub private_key: Zeroizing<String>,
    pub certificate: String,
    pub ca_certificates: String,
}

impl std::fmt::Debug for PemExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PemExport")
            .field("certificate", &self.certificate)
            .field("ca_certificates", &self.ca_certificates)
            .finish_non_exhaustive()
    }
}

impl ProtectedCredential {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The group whose secret key wraps the private key.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn expiration(&self) -> OffsetDateTime {
        self.expiration
    }

    pub fn certificate(&self) -> &CertificateRecord {
        &self.certificate
    }

    pub fn chain(&self) -> &[CertificateRecord] {
        &self.chain
    }

    pub fn is_chain_complete(&self) -> bool {
        self.complete_chain
    }

    pub fn private_key(&self) -> &WrappedKeyEnvelope {
        &self.private_key
    }

    pub fn unprotect<S: GroupKeyStore>(
        &self,
        service: &EnvelopeProtectionService<S>,
        ctx: &ProtectionContext,
    ) -> Result<PrivateKeyMaterial, ProtectionError> {
        self.check_owner(ctx)?;
        service.unprotect(&self.private_key, ctx)
    }

    /// Hands the credential over to the group of `to`. The acting user
    /// needs access to both groups.
    pub fn transfer<S: GroupKeyStore>(
        &mut self,
        service: &EnvelopeProtectionService<S>,
        from: &ProtectionContext,
        to: &ProtectionContext,
    ) -> Result<(), ProtectionError> {
        self.check_owner(from)?;
        self.private_key = service.transfer(&self.private_key, from, to)?;
        self.owner = to.group().to_owned();
        Ok(())
    }

    /// Exports key and certificates as PEM. With a passphrase the key is
    /// written as an encrypted PKCS#8 object.
    pub fn export_pem<S: GroupKeyStore>(
        &self,
        service: &EnvelopeProtectionService<S>,
        ctx: &ProtectionContext,
        passphrase: Option<&Password>,
    ) -> Result<PemExport, ImportError> {
        let key = self.unprotect(service, ctx)?;

        let key_object = match passphrase {
            Some(passphrase) => PassphraseCipher::new(service.config().passphrase_iterations)
                .encrypt(&key, passphrase)?,
            None => EncodedObject::PrivateKey {
                format: KeyFormat::Pkcs8,
                der: key.to_pkcs8_der().map_err(PassphraseError::from)?,
            },
        };

        let certificate = certificate_pem(&self.certificate);
        let ca_certificates = self.chain.iter().map(certificate_pem).collect();

        debug!("exported credential {} as PEM", self.name);
        Ok(PemExport {
            private_key: Zeroizing::new(key_object.to_pem()),
            certificate,
            ca_certificates,
        })
    }

    fn check_owner(&self, ctx: &ProtectionContext) -> Result<(), ProtectionError> {
        if ctx.group() != self.owner {
            debug!(
                "credential {} belongs to {}, not {}",
                self.name,
                self.owner,
                ctx.group()
            );
            return Err(ProtectionError::GroupAccessDenied(ctx.group().to_owned()));
        }
        Ok(())
    }
}

fn certificate_pem(certificate: &CertificateRecord) -> String {
    EncodedObject::Certificate {
        der: certificate.as_der().to_vec(),
    }
    .to_pem()
}
