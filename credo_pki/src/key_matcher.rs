use thiserror::Error;
use tracing::{debug, warn};

use crate::{certificate::CertificateRecord, private_key::PrivateKeyMaterial};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("no certificate matches the private key")]
    NoMatch,
}

fn pairs_with(key: &PrivateKeyMaterial, certificate: &CertificateRecord) -> bool {
    certificate.rsa_public_key().is_some_and(|public| {
        public.modulus == *key.modulus() && public.exponent == *key.public_exponent()
    })
}

/// Finds the certificate holding the public half of `key`.
///
/// A renewed certificate may share its key with an older one. In that case
/// the certificate expiring last is picked, DER order breaks ties, so the
/// outcome never depends on the order of `certificates`.
pub fn match_certificate<'a>(
    key: &PrivateKeyMaterial,
    certificates: &'a [CertificateRecord],
) -> Result<&'a CertificateRecord, MatchError> {
    let mut matching: Vec<&CertificateRecord> = certificates
        .iter()
        .filter(|certificate| pairs_with(key, certificate))
        .collect();

    matching.sort_by(|a, b| b.not_after().cmp(&a.not_after()).then_with(|| a.cmp(b)));
    matching.dedup();

    if matching.len() > 1 {
        warn!(
            "{} certificates match the private key, using the one expiring last",
            matching.len()
        );
    }

    let certificate = matching.first().copied().ok_or(MatchError::NoMatch)?;
    debug!("private key matches certificate {}", certificate.subject());

    Ok(certificate)
}
