//! Certificate Signing Request Builder
//!
//! Turns a subject identity, a key pair and a requested extension set into a self-signed
//! PKCS#10 request. The same module parses requests produced elsewhere (`openssl req -new`),
//! verifying the self-signature and decoding the extensions carried in the
//! `extensionRequest` attribute.
//!
//! # Subject attributes
//! The accepted attribute set is fixed: C, ST, L, O, OU, CN and emailAddress. CN is
//! required; C must be a two-letter code; every other attribute is optional and bounded by
//! the RFC 5280 upper bounds.

use std::fmt;

use der::{Decode, Encode};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::x509::{X509Name, X509NameRef, X509Req};
use secrecy::SecretString;
use x509_cert::request::{CertReq, ExtensionReq};

use crate::error::{PkiError, Result};
use crate::extensions::{is_valid_email, Extension, ExtensionSet};
use crate::key_material::KeyPair;

const X509_REQ_VERSION_1: i32 = 0;

const UB_COUNTRY: usize = 2;
const UB_STATE_NAME: usize = 128;
const UB_LOCALITY_NAME: usize = 128;
const UB_ORGANIZATION_NAME: usize = 64;
const UB_ORGANIZATIONAL_UNIT_NAME: usize = 64;
const UB_COMMON_NAME: usize = 64;
const UB_EMAIL_ADDRESS: usize = 255;

// ================= Subject DN =================

/// Distinguished name of a certificate subject
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectDn {
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub common_name: String,
    pub email: Option<String>,
}

impl SubjectDn {
    pub fn new(common_name: impl Into<String>) -> Self {
        SubjectDn {
            common_name: common_name.into(),
            ..Default::default()
        }
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn locality(mut self, locality: impl Into<String>) -> Self {
        self.locality = Some(locality.into());
        self
    }

    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn organizational_unit(mut self, unit: impl Into<String>) -> Self {
        self.organizational_unit = Some(unit.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Attributes in issuance order as `(short name, nid, value)`
    fn attributes(&self) -> Vec<(&'static str, Nid, &str)> {
        let mut attributes = Vec::new();
        if let Some(c) = self.country.as_deref() {
            attributes.push(("C", Nid::COUNTRYNAME, c));
        }
        if let Some(st) = self.state.as_deref() {
            attributes.push(("ST", Nid::STATEORPROVINCENAME, st));
        }
        if let Some(l) = self.locality.as_deref() {
            attributes.push(("L", Nid::LOCALITYNAME, l));
        }
        if let Some(o) = self.organization.as_deref() {
            attributes.push(("O", Nid::ORGANIZATIONNAME, o));
        }
        if let Some(ou) = self.organizational_unit.as_deref() {
            attributes.push(("OU", Nid::ORGANIZATIONALUNITNAME, ou));
        }
        attributes.push(("CN", Nid::COMMONNAME, self.common_name.as_str()));
        if let Some(email) = self.email.as_deref() {
            attributes.push(("emailAddress", Nid::PKCS9_EMAILADDRESS, email));
        }
        attributes
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(country) = &self.country {
            if country.len() != UB_COUNTRY || !country.bytes().all(|b| b.is_ascii_uppercase()) {
                return Err(PkiError::MalformedRequest(format!(
                    "country must be a two-letter code, got '{}'",
                    country
                )));
            }
        }
        check_attribute("ST", self.state.as_deref(), UB_STATE_NAME)?;
        check_attribute("L", self.locality.as_deref(), UB_LOCALITY_NAME)?;
        check_attribute("O", self.organization.as_deref(), UB_ORGANIZATION_NAME)?;
        check_attribute(
            "OU",
            self.organizational_unit.as_deref(),
            UB_ORGANIZATIONAL_UNIT_NAME,
        )?;
        if self.common_name.trim().is_empty() {
            return Err(PkiError::MalformedRequest(
                "common name is required".to_string(),
            ));
        }
        check_attribute("CN", Some(&self.common_name), UB_COMMON_NAME)?;
        if let Some(email) = &self.email {
            check_attribute("emailAddress", Some(email), UB_EMAIL_ADDRESS)?;
            if !is_valid_email(email) {
                return Err(PkiError::MalformedRequest(format!(
                    "invalid email address '{}'",
                    email
                )));
            }
        }
        Ok(())
    }

    pub fn to_x509_name(&self) -> Result<X509Name> {
        self.validate()?;
        let mut builder = X509Name::builder()?;
        for (short, nid, value) in self.attributes() {
            builder.append_entry_by_nid(nid, value).map_err(|e| {
                PkiError::MalformedRequest(format!("Failed to set {}: {}", short, e))
            })?;
        }
        Ok(builder.build())
    }

    /// Read a name back from a certificate or request; attributes outside the set are rejected
    pub fn from_x509_name(name: &X509NameRef) -> Result<Self> {
        let mut dn = SubjectDn::default();
        for entry in name.entries() {
            let value = entry.data().as_utf8()?.to_string();
            let slot = match entry.object().nid() {
                Nid::COUNTRYNAME => &mut dn.country,
                Nid::STATEORPROVINCENAME => &mut dn.state,
                Nid::LOCALITYNAME => &mut dn.locality,
                Nid::ORGANIZATIONNAME => &mut dn.organization,
                Nid::ORGANIZATIONALUNITNAME => &mut dn.organizational_unit,
                Nid::PKCS9_EMAILADDRESS => &mut dn.email,
                Nid::COMMONNAME => {
                    dn.common_name = value;
                    continue;
                }
                other => {
                    return Err(PkiError::MalformedRequest(format!(
                        "unsupported subject attribute {}",
                        other.short_name().unwrap_or("unknown")
                    )))
                }
            };
            *slot = Some(value);
        }
        dn.validate()?;
        Ok(dn)
    }
}

/// OpenSSL one-line form, `/C=RU/ST=Moscow/.../CN=alice CA/emailAddress=...`
impl fmt::Display for SubjectDn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (short, _, value) in self.attributes() {
            write!(f, "/{}={}", short, value)?;
        }
        Ok(())
    }
}

fn check_attribute(short: &str, value: Option<&str>, upper_bound: usize) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if value.is_empty() || value.chars().count() > upper_bound {
        return Err(PkiError::MalformedRequest(format!(
            "{} must be 1..={} characters",
            short, upper_bound
        )));
    }
    // '/' would make the one-line form ambiguous
    if value.chars().any(|c| c.is_control() || c == '/') {
        return Err(PkiError::MalformedRequest(format!(
            "{} contains a forbidden character",
            short
        )));
    }
    Ok(())
}

// ================= Certificate Request =================

/// Verified PKCS#10 request with its decoded subject and extensions
pub struct CertificateRequest {
    subject: SubjectDn,
    extensions: ExtensionSet,
    req: X509Req,
}

impl CertificateRequest {
    /// Parse a PEM request, check its self-signature and decode what it asks for
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let req = X509Req::from_pem(pem)
            .map_err(|e| PkiError::MalformedRequest(format!("Failed to parse CSR: {}", e)))?;
        Self::from_x509_req(req)
    }

    pub fn from_x509_req(req: X509Req) -> Result<Self> {
        let public_key = req.public_key()?;
        if !req.verify(&public_key)? {
            return Err(PkiError::SignatureVerification(
                "CSR self-signature does not verify".to_string(),
            ));
        }
        let subject = SubjectDn::from_x509_name(req.subject_name())?;
        let extensions = requested_extensions(&req.to_der()?)?;
        extensions.validate()?;

        Ok(CertificateRequest {
            subject,
            extensions,
            req,
        })
    }

    pub fn subject(&self) -> &SubjectDn {
        &self.subject
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    pub fn public_key(&self) -> Result<PKey<Public>> {
        Ok(self.req.public_key()?)
    }

    pub fn x509_req(&self) -> &X509Req {
        &self.req
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.req.to_pem()?)
    }
}

impl fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("subject", &self.subject.to_string())
            .field("extensions", &self.extensions)
            .finish()
    }
}

fn requested_extensions(req_der: &[u8]) -> Result<ExtensionSet> {
    let parsed = CertReq::from_der(req_der)?;
    for attribute in parsed.info.attributes.iter() {
        if attribute.oid != <ExtensionReq as const_oid::AssociatedOid>::OID {
            continue;
        }
        let mut raw = Vec::new();
        for value in attribute.values.iter() {
            raw.extend(ExtensionReq::from_der(&value.to_der()?)?.0);
        }
        return ExtensionSet::from_x509_extensions(&raw);
    }
    Ok(ExtensionSet::new())
}

/// Assembles a self-signed PKCS#10 request
///
/// # Examples
/// ```rust,no_run
/// # use pki_testbed::extensions::{AltName, Extension};
/// # use pki_testbed::key_material::{KeyAlgorithm, KeyGenerator, KeyPolicy};
/// # use pki_testbed::provider::OpensslProvider;
/// # use pki_testbed::request::{RequestBuilder, SubjectDn};
/// # fn example() -> pki_testbed::error::Result<()> {
/// let provider = OpensslProvider::new();
/// let key = KeyGenerator::new(&provider, KeyPolicy::default()).generate(KeyAlgorithm::Ec, 256, None)?;
/// let request = RequestBuilder::new(SubjectDn::new("alice Basic").country("RU"))
///     .extension(Extension::basic_constraints(false, false, None))
///     .extension(Extension::subject_alt_name(false, vec![AltName::Dns("basic.alice.ru".into())]))
///     .build(&key, None)?;
/// # Ok(())
/// # }
/// ```
pub struct RequestBuilder {
    subject: SubjectDn,
    extensions: Vec<Extension>,
}

impl RequestBuilder {
    pub fn new(subject: SubjectDn) -> Self {
        RequestBuilder {
            subject,
            extensions: Vec::new(),
        }
    }

    /// Request an extension; criticality is taken from `extension` as given
    pub fn extension(mut self, extension: Extension) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn extensions(mut self, extensions: impl IntoIterator<Item = Extension>) -> Self {
        self.extensions.extend(extensions);
        self
    }

    /// Validate the subject and extensions, then self-sign with `key_pair`
    ///
    /// `passphrase` unlocks an encrypted key pair.
    pub fn build(
        self,
        key_pair: &KeyPair,
        passphrase: Option<&SecretString>,
    ) -> Result<CertificateRequest> {
        let extensions = ExtensionSet::from_extensions(self.extensions)?;
        let name = self.subject.to_x509_name()?;
        let private_key = key_pair.private_key(passphrase)?;

        let mut builder = X509Req::builder()?;
        builder.set_version(X509_REQ_VERSION_1)?;
        builder.set_subject_name(&name)?;
        builder.set_pubkey(&private_key)?;
        if !extensions.is_empty() {
            let stack = extensions.to_openssl_stack()?;
            builder.add_extensions(&stack)?;
        }
        builder.sign(&private_key, MessageDigest::sha256())?;

        tracing::debug!(subject = %self.subject, "Built certificate signing request");
        Ok(CertificateRequest {
            subject: self.subject,
            extensions,
            req: builder.build(),
        })
    }
}
