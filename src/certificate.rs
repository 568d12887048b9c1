//! Credential material: our identity, trust anchors and revocation lists.
//!
//! Everything is held DER encoded. PEM files are decoded with OpenSSL, which
//! is also what consumes our identity during the handshake. When no identity
//! files are configured a self-signed certificate is generated.

use std::fmt;
use std::fs;
use std::path::Path;

use openssl::pkey::PKey;
use openssl::x509::{X509Crl, X509};
use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{Config, Error};

/// Local credential material for one session.
#[derive(Clone)]
pub struct Credentials {
    /// Our certificate first, then any intermediates to send along.
    certificate_chain: Vec<Vec<u8>>,
    private_key: Zeroizing<Vec<u8>>,
    trust_anchors: Vec<Vec<u8>>,
    crls: Vec<Vec<u8>>,
}

impl Credentials {
    /// Identity from DER certificate and private key (PKCS#8 or traditional).
    pub fn new(certificate: Vec<u8>, private_key: Vec<u8>) -> Self {
        Credentials {
            certificate_chain: vec![certificate],
            private_key: Zeroizing::new(private_key),
            trust_anchors: Vec::new(),
            crls: Vec::new(),
        }
    }

    /// Identity with a freshly generated self-signed certificate.
    pub fn ephemeral() -> Result<Self, Error> {
        let (certificate, private_key) = generate_self_signed_certificate("dcoap client")?;
        Ok(Credentials::new(certificate, private_key))
    }

    /// Identity from PEM encoded certificate chain and key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, Error> {
        let chain = X509::stack_from_pem(cert_pem).map_err(Error::session)?;
        if chain.is_empty() {
            return Err(Error::session("no certificate in PEM input"));
        }
        let certificate_chain = chain
            .iter()
            .map(|c| c.to_der())
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::session)?;

        let key = PKey::private_key_from_pem(key_pem).map_err(Error::session)?;
        let private_key = Zeroizing::new(key.private_key_to_der().map_err(Error::session)?);

        Ok(Credentials {
            certificate_chain,
            private_key,
            trust_anchors: Vec::new(),
            crls: Vec::new(),
        })
    }

    /// Load everything the configuration points at.
    pub fn load(config: &Config) -> Result<Self, Error> {
        let mut credentials = match (config.cert_file(), config.key_file()) {
            (Some(cert), Some(key)) => {
                debug!("Loading identity from {} and {}", cert.display(), key.display());
                Credentials::from_pem(&read(cert)?, &read(key)?)?
            }
            _ => {
                debug!("No identity files configured, generating a self-signed certificate");
                Credentials::ephemeral()?
            }
        };

        if let Some(ca) = config.ca_file() {
            credentials = credentials.with_trust_anchors_pem(&read(ca)?)?;
        }
        if let Some(crl) = config.crl_file() {
            credentials = credentials.with_crls_pem(&read(crl)?)?;
        }

        Ok(credentials)
    }

    pub fn with_trust_anchor(mut self, der: Vec<u8>) -> Self {
        self.trust_anchors.push(der);
        self
    }

    pub fn with_trust_anchors_pem(mut self, pem: &[u8]) -> Result<Self, Error> {
        for cert in X509::stack_from_pem(pem).map_err(Error::session)? {
            self.trust_anchors
                .push(cert.to_der().map_err(Error::session)?);
        }
        Ok(self)
    }

    pub fn with_crl(mut self, der: Vec<u8>) -> Self {
        self.crls.push(der);
        self
    }

    /// Add every `X509 CRL` block in `pem`.
    pub fn with_crls_pem(mut self, pem: &[u8]) -> Result<Self, Error> {
        const END: &str = "-----END X509 CRL-----";

        let text = std::str::from_utf8(pem).map_err(Error::session)?;
        for block in text.split_inclusive(END).filter(|b| b.contains(END)) {
            let crl = X509Crl::from_pem(block.as_bytes()).map_err(Error::session)?;
            self.crls.push(crl.to_der().map_err(Error::session)?);
        }
        Ok(self)
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate_chain[0]
    }

    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.certificate_chain
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn trust_anchors(&self) -> &[Vec<u8>] {
        &self.trust_anchors
    }

    pub fn crls(&self) -> &[Vec<u8>] {
        &self.crls
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "certificate",
                &format_fingerprint(&calculate_fingerprint(self.certificate())),
            )
            .field("chain_len", &self.certificate_chain.len())
            .field("trust_anchors", &self.trust_anchors.len())
            .field("crls", &self.crls.len())
            .finish()
    }
}

fn read(path: &Path) -> Result<Vec<u8>, Error> {
    fs::read(path).map_err(|e| Error::session(format!("{}: {}", path.display(), e)))
}

/// Generate a self-signed P-256 certificate, returned as (certificate, key) DER.
pub fn generate_self_signed_certificate(name: &str) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| Error::session(format!("key generation failed: {}", e)))?;

    let mut params = CertificateParams::new(vec![name.to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, name.to_string());
    params.distinguished_name = distinguished_name;
    params.is_ca = IsCa::NoCa;
    params.key_pair = Some(key_pair);

    // Valid for one year
    let not_before = time::OffsetDateTime::now_utc();
    let not_after = not_before + time::Duration::days(365);
    params.not_before = not_before;
    params.not_after = not_after;

    let cert = RcgenCertificate::from_params(params)
        .map_err(|e| Error::session(format!("certificate generation failed: {}", e)))?;

    let cert_der = cert
        .serialize_der()
        .map_err(|e| Error::session(format!("certificate generation failed: {}", e)))?;
    let key_der = cert.serialize_private_key_der();

    Ok((cert_der, key_der))
}

/// SHA-256 over the DER certificate.
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().to_vec()
}

/// Colon separated upper case hex, `AF:12:F6:...`.
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_identity_loads_in_openssl() {
        let creds = Credentials::ephemeral().unwrap();
        let x509 = X509::from_der(creds.certificate()).unwrap();
        let key = PKey::private_key_from_der(creds.private_key()).unwrap();
        assert!(x509.public_key().unwrap().public_eq(&key));
    }

    #[test]
    fn pem_round_trip() {
        let creds = Credentials::ephemeral().unwrap();
        let cert_pem = X509::from_der(creds.certificate())
            .unwrap()
            .to_pem()
            .unwrap();
        let key_pem = PKey::private_key_from_der(creds.private_key())
            .unwrap()
            .private_key_to_pem_pkcs8()
            .unwrap();

        let loaded = Credentials::from_pem(&cert_pem, &key_pem)
            .unwrap()
            .with_trust_anchors_pem(&cert_pem)
            .unwrap();
        assert_eq!(loaded.certificate(), creds.certificate());
        assert_eq!(loaded.trust_anchors(), &[creds.certificate().to_vec()]);
    }

    #[test]
    fn bad_pem_is_session_error() {
        let err = Credentials::from_pem(b"nope", b"nope").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn fingerprint_format() {
        let fp = calculate_fingerprint(b"abc");
        assert_eq!(fp.len(), 32);
        let s = format_fingerprint(&fp);
        assert!(s.starts_with("BA:78:16:BF"));
        assert_eq!(s.split(':').count(), 32);
    }
}
