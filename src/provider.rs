//! Cryptographic Provider
//!
//! Every operation that touches private key material goes through [`CryptoProvider`]: key pair
//! generation and the three signing steps of the testbed (certificate bodies, CRLs and OCSP
//! responses). [`OpensslProvider`] implements it on top of the native OpenSSL library.
//!
//! All signatures use SHA-256: `sha256WithRSAEncryption` for RSA keys and `ecdsa-with-SHA256`
//! for EC keys.

use der::asn1::{Any, BitString};
use der::{Encode, Tag};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509Builder, X509};
use spki::AlgorithmIdentifierOwned;
use x509_cert::crl::{CertificateList, TbsCertList};
use x509_cert::Certificate;

use crate::error::{PkiError, Result};
use crate::key_material::KeyAlgorithm;
use crate::ocsp_types::{BasicOcspResponse, ResponseData};

/// Capability interface for key generation and signing
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh private key of `algorithm` with `bits` strength
    fn generate_key_pair(&self, algorithm: KeyAlgorithm, bits: u32) -> Result<PKey<Private>>;

    /// Sign a fully populated certificate body with the issuer key
    fn sign_csr(&self, builder: X509Builder, issuer_key: &PKeyRef<Private>) -> Result<X509>;

    /// Sign a CRL body; the `signature` field of `tbs` is overwritten to match `issuer_key`
    fn sign_crl(&self, tbs: TbsCertList, issuer_key: &PKeyRef<Private>) -> Result<CertificateList>;

    /// Sign OCSP response data with the delegated responder key
    fn sign_ocsp_response(
        &self,
        data: ResponseData,
        responder_key: &PKeyRef<Private>,
        certs: Vec<Certificate>,
    ) -> Result<BasicOcspResponse>;

    /// Signature algorithm identifier used for signatures made with `key`
    fn signature_algorithm(&self, key: &PKeyRef<Private>) -> Result<AlgorithmIdentifierOwned>;
}

/// [`CryptoProvider`] backed by the `openssl` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct OpensslProvider;

impl OpensslProvider {
    pub fn new() -> Self {
        OpensslProvider
    }

    fn sign_der(&self, key: &PKeyRef<Private>, tbs_der: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), key)?;
        signer.update(tbs_der)?;
        Ok(signer.sign_to_vec()?)
    }
}

impl CryptoProvider for OpensslProvider {
    fn generate_key_pair(&self, algorithm: KeyAlgorithm, bits: u32) -> Result<PKey<Private>> {
        match algorithm {
            KeyAlgorithm::Rsa => {
                let rsa = Rsa::generate(bits).map_err(|e| {
                    PkiError::KeyGeneration(format!("Failed to generate RSA keypair: {}", e))
                })?;
                Ok(PKey::from_rsa(rsa)?)
            }
            KeyAlgorithm::Ec => {
                let curve = match bits {
                    256 => Nid::X9_62_PRIME256V1,
                    384 => Nid::SECP384R1,
                    other => {
                        return Err(PkiError::KeyGeneration(format!(
                            "Unsupported EC key length: {} (expected 256 or 384)",
                            other
                        )))
                    }
                };
                let group = EcGroup::from_curve_name(curve)?;
                let ec_key = EcKey::generate(&group).map_err(|e| {
                    PkiError::KeyGeneration(format!("Failed to generate EC keypair: {}", e))
                })?;
                Ok(PKey::from_ec_key(ec_key)?)
            }
        }
    }

    fn sign_csr(&self, mut builder: X509Builder, issuer_key: &PKeyRef<Private>) -> Result<X509> {
        builder.sign(issuer_key, MessageDigest::sha256())?;
        Ok(builder.build())
    }

    fn sign_crl(
        &self,
        mut tbs: TbsCertList,
        issuer_key: &PKeyRef<Private>,
    ) -> Result<CertificateList> {
        let algorithm = self.signature_algorithm(issuer_key)?;
        tbs.signature = algorithm.clone();
        let signature = self.sign_der(issuer_key, &tbs.to_der()?)?;

        Ok(CertificateList {
            tbs_cert_list: tbs,
            signature_algorithm: algorithm,
            signature: BitString::from_bytes(&signature)?,
        })
    }

    fn sign_ocsp_response(
        &self,
        data: ResponseData,
        responder_key: &PKeyRef<Private>,
        certs: Vec<Certificate>,
    ) -> Result<BasicOcspResponse> {
        let algorithm = self.signature_algorithm(responder_key)?;
        let signature = self.sign_der(responder_key, &data.to_der()?)?;

        Ok(BasicOcspResponse {
            tbs_response_data: data,
            signature_algorithm: algorithm,
            signature: BitString::from_bytes(&signature)?,
            certs: if certs.is_empty() { None } else { Some(certs) },
        })
    }

    fn signature_algorithm(&self, key: &PKeyRef<Private>) -> Result<AlgorithmIdentifierOwned> {
        match key.id() {
            Id::RSA => Ok(AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(Any::new(Tag::Null, Vec::<u8>::new())?),
            }),
            Id::EC => Ok(AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
                parameters: None,
            }),
            other => Err(PkiError::KeyGeneration(format!(
                "Unsupported signing key type: {:?}",
                other
            ))),
        }
    }
}
