//! Signature checks for certificates and CRLs using RustCrypto.

use der::asn1::BitString;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier;
use signature::Verifier;
use spki::{AlgorithmIdentifierOwned, ObjectIdentifier, SubjectPublicKeyInfoOwned};

use super::CertificateError;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const OID_ECDSA_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");
const OID_RSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const OID_RSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const OID_RSA_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

#[derive(Debug, Clone, Copy)]
enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    fn digest(self, message: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(message).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(message).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(message).to_vec(),
        }
    }
}

/// Check `signature` over `message` with the issuer's public key.
///
/// `BadSignature` means the key did not sign `message`. An algorithm this
/// module cannot check is `UnsupportedAlgorithm`.
pub(crate) fn verify_signed(
    message: &[u8],
    algorithm: &AlgorithmIdentifierOwned,
    signature: &BitString,
    issuer: &SubjectPublicKeyInfoOwned,
) -> Result<(), CertificateError> {
    let signature = signature
        .as_bytes()
        .ok_or_else(|| CertificateError::Malformed("signature bit string".to_string()))?;
    let public_key = issuer
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| CertificateError::Malformed("public key bit string".to_string()))?;

    match issuer.algorithm.oid {
        OID_EC_PUBLIC_KEY => {
            let hash = match algorithm.oid {
                OID_ECDSA_SHA256 => HashAlgorithm::Sha256,
                OID_ECDSA_SHA384 => HashAlgorithm::Sha384,
                OID_ECDSA_SHA512 => HashAlgorithm::Sha512,
                alg => {
                    return Err(CertificateError::UnsupportedAlgorithm(format!(
                        "{} with an EC key",
                        alg
                    )))
                }
            };

            let curve: ObjectIdentifier = issuer
                .algorithm
                .parameters
                .as_ref()
                .ok_or_else(|| CertificateError::Malformed("missing EC curve".to_string()))?
                .decode_as()
                .map_err(|e| CertificateError::Malformed(e.to_string()))?;

            let prehash = hash.digest(message);
            match curve {
                OID_P256 => verify_ecdsa_p256(public_key, &prehash, signature),
                OID_P384 => verify_ecdsa_p384(public_key, &prehash, signature),
                curve => Err(CertificateError::UnsupportedAlgorithm(format!(
                    "EC curve {}",
                    curve
                ))),
            }
        }
        OID_RSA_ENCRYPTION => {
            let hash = match algorithm.oid {
                OID_RSA_SHA256 => HashAlgorithm::Sha256,
                OID_RSA_SHA384 => HashAlgorithm::Sha384,
                OID_RSA_SHA512 => HashAlgorithm::Sha512,
                alg => {
                    return Err(CertificateError::UnsupportedAlgorithm(format!(
                        "{} with an RSA key",
                        alg
                    )))
                }
            };
            verify_rsa(public_key, hash, message, signature)
        }
        OID_ED25519 => {
            if algorithm.oid != OID_ED25519 {
                return Err(CertificateError::UnsupportedAlgorithm(format!(
                    "{} with an Ed25519 key",
                    algorithm.oid
                )));
            }
            verify_ed25519(public_key, message, signature)
        }
        other => Err(CertificateError::UnsupportedAlgorithm(format!(
            "public key {}",
            other
        ))),
    }
}

fn verify_ecdsa_p256(
    public_key: &[u8],
    prehash: &[u8],
    signature: &[u8],
) -> Result<(), CertificateError> {
    let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|_| CertificateError::Malformed("P-256 public key".to_string()))?;
    let sig = p256::ecdsa::Signature::from_der(signature)
        .map_err(|_| CertificateError::BadSignature)?;
    key.verify_prehash(prehash, &sig)
        .map_err(|_| CertificateError::BadSignature)
}

fn verify_ecdsa_p384(
    public_key: &[u8],
    prehash: &[u8],
    signature: &[u8],
) -> Result<(), CertificateError> {
    let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|_| CertificateError::Malformed("P-384 public key".to_string()))?;
    let sig = p384::ecdsa::Signature::from_der(signature)
        .map_err(|_| CertificateError::BadSignature)?;
    key.verify_prehash(prehash, &sig)
        .map_err(|_| CertificateError::BadSignature)
}

fn verify_rsa(
    public_key: &[u8],
    hash: HashAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CertificateError> {
    let key = RsaPublicKey::from_pkcs1_der(public_key)
        .map_err(|e| CertificateError::Malformed(e.to_string()))?;
    let sig = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|_| CertificateError::BadSignature)?;

    use rsa::pkcs1v15::VerifyingKey;
    let result = match hash {
        HashAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(key).verify(message, &sig),
        HashAlgorithm::Sha384 => VerifyingKey::<Sha384>::new(key).verify(message, &sig),
        HashAlgorithm::Sha512 => VerifyingKey::<Sha512>::new(key).verify(message, &sig),
    };
    result.map_err(|_| CertificateError::BadSignature)
}

fn verify_ed25519(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CertificateError> {
    let bytes: &[u8; 32] = public_key
        .try_into()
        .map_err(|_| CertificateError::Malformed("Ed25519 public key".to_string()))?;
    let key = ed25519_dalek::VerifyingKey::from_bytes(bytes)
        .map_err(|_| CertificateError::Malformed("Ed25519 public key".to_string()))?;
    let sig = ed25519_dalek::Signature::from_slice(signature)
        .map_err(|_| CertificateError::BadSignature)?;
    key.verify(message, &sig)
        .map_err(|_| CertificateError::BadSignature)
}
