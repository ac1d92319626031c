//! Signed certificate handle
//!
//! Wraps an OpenSSL [`X509`] together with the values the rest of the crate keeps asking for:
//! serial, subject, issuer, validity window and the decoded extension set.

use std::fmt;

use chrono::{DateTime, Utc};
use der::{Decode, Encode};
use openssl::bn::BigNum;
use openssl::x509::{X509Ref, X509};

use crate::error::{PkiError, Result};
use crate::extensions::ExtensionSet;
use crate::ledger::Serial;
use crate::request::SubjectDn;
use crate::time::from_x509_time;

/// Immutable, signed X.509 certificate
#[derive(Clone)]
pub struct IssuedCertificate {
    x509: X509,
    serial: Serial,
    subject: SubjectDn,
    issuer: SubjectDn,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    extensions: ExtensionSet,
}

impl IssuedCertificate {
    pub fn from_x509(x509: X509) -> Result<Self> {
        let parsed = x509_cert::Certificate::from_der(&x509.to_der()?)?;
        let tbs = &parsed.tbs_certificate;
        let extensions =
            ExtensionSet::from_x509_extensions(tbs.extensions.as_deref().unwrap_or(&[]))?;

        Ok(IssuedCertificate {
            serial: serial_of(&x509)?,
            subject: SubjectDn::from_x509_name(x509.subject_name())?,
            issuer: SubjectDn::from_x509_name(x509.issuer_name())?,
            not_before: from_x509_time(tbs.validity.not_before)?,
            not_after: from_x509_time(tbs.validity.not_after)?,
            extensions,
            x509,
        })
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let x509 = X509::from_pem(pem).map_err(|e| {
            PkiError::MalformedRequest(format!("Failed to parse certificate: {}", e))
        })?;
        Self::from_x509(x509)
    }

    pub fn x509(&self) -> &X509Ref {
        &self.x509
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn subject(&self) -> &SubjectDn {
        &self.subject
    }

    pub fn issuer(&self) -> &SubjectDn {
        &self.issuer
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    pub fn is_ca(&self) -> bool {
        self.extensions.is_ca()
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.x509.to_pem()?)
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.x509.to_der()?)
    }

    /// Same certificate as an `x509-cert` structure, for embedding in OCSP responses
    pub fn to_x509_cert(&self) -> Result<x509_cert::Certificate> {
        Ok(x509_cert::Certificate::from_der(&self.x509.to_der()?)?)
    }

    /// DER encoding of the subject name, the input of the OCSP issuer name hash
    pub fn subject_name_der(&self) -> Result<Vec<u8>> {
        let parsed = self.to_x509_cert()?;
        Ok(parsed.tbs_certificate.subject.to_der()?)
    }

    /// Raw `subjectPublicKey` bits, the input of the OCSP issuer key hash
    pub fn public_key_bits(&self) -> Result<Vec<u8>> {
        let parsed = self.to_x509_cert()?;
        Ok(parsed
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes()
            .to_vec())
    }
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("serial", &self.serial.to_string())
            .field("subject", &self.subject.to_string())
            .field("issuer", &self.issuer.to_string())
            .field("not_after", &self.not_after)
            .finish()
    }
}

fn serial_of(x509: &X509Ref) -> Result<Serial> {
    let bn: BigNum = x509.serial_number().to_bn()?;
    if bn.is_negative() {
        return Err(PkiError::MalformedRequest(
            "negative certificate serial".to_string(),
        ));
    }
    let mut bytes = vec![0u8];
    bytes.extend(bn.to_vec());
    Serial::from_der_bytes(&bytes).ok_or_else(|| {
        PkiError::MalformedRequest("certificate serial does not fit in 64 bits".to_string())
    })
}

