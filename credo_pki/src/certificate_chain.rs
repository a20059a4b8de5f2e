use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::certificate::CertificateRecord;

/// Issuers of a subject certificate, starting with the immediate issuer.
/// A self-signed subject is its own issuer.
///
/// A complete chain ends with a self-signed certificate. An incomplete one
/// ends with the last issuer that could be found in the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustChain {
    certificates: Vec<CertificateRecord>,
    complete: bool,
}

impl TrustChain {
    pub fn certificates(&self) -> &[CertificateRecord] {
        &self.certificates
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// The self-signed end of the chain, if it was found.
    pub fn root(&self) -> Option<&CertificateRecord> {
        if self.complete {
            self.certificates.last()
        } else {
            None
        }
    }
}

/// Orders the issuers of `subject` out of `pool`.
///
/// Issuers are found by comparing names only, signatures are not checked.
/// If several certificates carry the issuer name, the first one in `pool`
/// is taken. A certificate is never added twice, which bounds the chain by
/// the size of `pool`.
pub fn resolve(subject: &CertificateRecord, pool: &[CertificateRecord]) -> TrustChain {
    let mut certificates: Vec<CertificateRecord> = Vec::new();

    let mut current = subject;
    loop {
        let issuer = pool.iter().find(|candidate| {
            current.is_issued_by(candidate) && !certificates.contains(*candidate)
        });

        let Some(issuer) = issuer else {
            warn!(
                "trust chain of {} is incomplete, issuer {} not found",
                subject.subject(),
                current.issuer()
            );
            return TrustChain {
                certificates,
                complete: false,
            };
        };

        certificates.push(issuer.clone());

        if issuer.is_self_signed() {
            debug!(
                "resolved trust chain of length {} for {}",
                certificates.len(),
                subject.subject()
            );
            return TrustChain {
                certificates,
                complete: true,
            };
        }

        current = issuer;
    }
}
