//! Server certificate validation.
//!
//! The DTLS handshake runs with peer verification switched off in OpenSSL.
//! Once it completes, the chain the server presented is handed to
//! [`PeerVerifier`], which applies the [`SecurityPolicy`] on its own.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use der::{Decode, Encode};
use spki::ObjectIdentifier;
use thiserror::Error;
use x509_cert::crl::CertificateList;
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::Certificate;

use crate::policy::SecurityPolicy;

mod signature;

use signature::verify_signed;

const OID_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");

/// Reasons a peer certificate chain is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    #[error("peer presented no certificate")]
    NoCertificate,
    #[error("malformed certificate: {0}")]
    Malformed(String),
    #[error("certificate has expired")]
    Expired,
    #[error("certificate is not yet valid")]
    NotYetValid,
    #[error("self-signed certificate")]
    SelfSigned,
    /// No path to a trust anchor within the allowed depth.
    #[error("unable to get local issuer certificate")]
    UntrustedChain,
    #[error("certificate revoked")]
    Revoked,
    /// Revocation checking is on but no CRL covers an issuer in the chain.
    #[error("unable to get certificate CRL")]
    RevocationUnavailable,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signature verification failed")]
    BadSignature,
}

/// Applies a [`SecurityPolicy`] to the chain presented by the server.
#[derive(Debug, Clone)]
pub struct PeerVerifier {
    policy: SecurityPolicy,
    anchors: Vec<Certificate>,
    crls: Vec<CertificateList>,
}

impl PeerVerifier {
    /// Parse the DER trust anchors and CRLs up front.
    pub fn new(
        policy: SecurityPolicy,
        trust_anchors: &[Vec<u8>],
        crls: &[Vec<u8>],
    ) -> Result<Self, CertificateError> {
        let anchors = trust_anchors
            .iter()
            .map(|der| parse_certificate(der))
            .collect::<Result<Vec<_>, _>>()?;

        let crls = crls
            .iter()
            .map(|der| {
                CertificateList::from_der(der)
                    .map_err(|e| CertificateError::Malformed(format!("CRL: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PeerVerifier {
            policy,
            anchors,
            crls,
        })
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Check a chain, leaf first, as presented in the server's Certificate
    /// message.
    pub fn verify(&self, chain: &[Vec<u8>], now: SystemTime) -> Result<(), CertificateError> {
        if chain.is_empty() {
            if self.policy.require_peer_cert {
                return Err(CertificateError::NoCertificate);
            }
            debug!("Peer presented no certificate, accepted by policy");
            return Ok(());
        }

        if !self.policy.verify_peer {
            debug!("Peer verification disabled, accepting certificate");
            return Ok(());
        }

        let certs = chain
            .iter()
            .map(|der| parse_certificate(der))
            .collect::<Result<Vec<_>, _>>()?;

        if !self.policy.allow_expired {
            let now = now.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
            for cert in &certs {
                check_validity(cert, now)?;
            }
        }

        let leaf = &certs[0];

        if issued_by(leaf, leaf)? {
            if !self.policy.allow_self_signed {
                return Err(CertificateError::SelfSigned);
            }
            if self.policy.check_revocation {
                self.check_revoked(leaf, leaf)?;
            }
            debug!("Accepting self-signed peer certificate");
            return Ok(());
        }

        if !self.policy.validate_chain {
            return Ok(());
        }

        self.walk_chain(&certs)
    }

    /// Follow issuers from the leaf until a trust anchor signs the current
    /// certificate. Intermediates come from the presented chain only.
    fn walk_chain(&self, certs: &[Certificate]) -> Result<(), CertificateError> {
        let mut used = vec![false; certs.len()];
        used[0] = true;

        let mut current = &certs[0];
        let mut intermediates = 0;

        loop {
            if let Some(anchor) = self.find_anchor(current)? {
                if self.policy.check_revocation {
                    self.check_revoked(current, anchor)?;
                }
                trace!("Chain anchored after {} intermediate(s)", intermediates);
                return Ok(());
            }

            let mut next = None;
            for (i, candidate) in certs.iter().enumerate().skip(1) {
                if !used[i] && is_ca(candidate, intermediates) && issued_by(current, candidate)? {
                    next = Some(i);
                    break;
                }
            }

            let Some(i) = next else {
                return Err(CertificateError::UntrustedChain);
            };

            if self.policy.check_revocation {
                self.check_revoked(current, &certs[i])?;
            }

            used[i] = true;
            intermediates += 1;

            if intermediates > self.policy.max_chain_depth {
                debug!(
                    "Chain exceeds max depth {} with {} intermediates",
                    self.policy.max_chain_depth, intermediates
                );
                return Err(CertificateError::UntrustedChain);
            }

            current = &certs[i];
        }
    }

    fn find_anchor(&self, cert: &Certificate) -> Result<Option<&Certificate>, CertificateError> {
        for anchor in &self.anchors {
            if issued_by(cert, anchor)? {
                return Ok(Some(anchor));
            }
        }
        Ok(None)
    }

    fn check_revoked(&self, cert: &Certificate, issuer: &Certificate) -> Result<(), CertificateError> {
        let crl = self
            .crls
            .iter()
            .find(|crl| {
                crl.tbs_cert_list.issuer == issuer.tbs_certificate.subject
                    && crl_signed_by(crl, issuer)
            })
            .ok_or(CertificateError::RevocationUnavailable)?;

        let serial = &cert.tbs_certificate.serial_number;
        let revoked = crl
            .tbs_cert_list
            .revoked_certificates
            .iter()
            .flatten()
            .any(|r| &r.serial_number == serial);

        if revoked {
            return Err(CertificateError::Revoked);
        }
        Ok(())
    }
}

fn parse_certificate(der: &[u8]) -> Result<Certificate, CertificateError> {
    Certificate::from_der(der).map_err(|e| CertificateError::Malformed(e.to_string()))
}

fn check_validity(cert: &Certificate, now: Duration) -> Result<(), CertificateError> {
    let validity = &cert.tbs_certificate.validity;
    if now < validity.not_before.to_unix_duration() {
        return Err(CertificateError::NotYetValid);
    }
    if now > validity.not_after.to_unix_duration() {
        return Err(CertificateError::Expired);
    }
    Ok(())
}

/// Whether `issuer` signed `cert`: names match and the signature verifies.
///
/// A signature we cannot check is an error, not a mismatch.
fn issued_by(cert: &Certificate, issuer: &Certificate) -> Result<bool, CertificateError> {
    if cert.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return Ok(false);
    }
    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| CertificateError::Malformed(e.to_string()))?;
    match verify_signed(
        &tbs,
        &cert.signature_algorithm,
        &cert.signature,
        &issuer.tbs_certificate.subject_public_key_info,
    ) {
        Ok(()) => Ok(true),
        Err(CertificateError::BadSignature) => {
            trace!("Issuer signature check failed");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn crl_signed_by(crl: &CertificateList, issuer: &Certificate) -> bool {
    let Ok(tbs) = crl.tbs_cert_list.to_der() else {
        return false;
    };
    verify_signed(
        &tbs,
        &crl.signature_algorithm,
        &crl.signature,
        &issuer.tbs_certificate.subject_public_key_info,
    )
    .is_ok()
}

/// CA flag from BasicConstraints, honoring any path length constraint given
/// the number of intermediates already below this certificate.
fn is_ca(cert: &Certificate, below: usize) -> bool {
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return false;
    };
    let Some(ext) = extensions.iter().find(|e| e.extn_id == OID_BASIC_CONSTRAINTS) else {
        return false;
    };
    let Ok(bc) = BasicConstraints::from_der(ext.extn_value.as_bytes()) else {
        return false;
    };
    if !bc.ca {
        return false;
    }
    match bc.path_len_constraint {
        Some(max) => below <= max as usize,
        None => true,
    }
}
