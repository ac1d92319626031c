//! X.509v3 extension model
//!
//! The six extension kinds the testbed issues, with an explicit criticality flag on each. The
//! same [`Extension`] value flows from the request builder through the CA signer into the
//! signed certificate, and can be decoded back from any certificate or CSR.
//!
//! Values are encoded to DER with the `x509-cert` types and handed to OpenSSL as raw
//! extensions, so there is no string-based OpenSSL config in the signing path.

use std::collections::HashSet;

use const_oid::db::rfc5280::{
    ID_AD_CA_ISSUERS, ID_AD_OCSP, ID_KP_CLIENT_AUTH, ID_KP_CODE_SIGNING, ID_KP_EMAIL_PROTECTION,
    ID_KP_OCSP_SIGNING, ID_KP_SERVER_AUTH, ID_KP_TIME_STAMPING,
};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::asn1::{Ia5String, OctetString};
use der::{Decode, Encode};
use flagset::FlagSet;
use openssl::asn1::{Asn1Object, Asn1OctetString};
use openssl::stack::Stack;
use openssl::x509::{X509Extension, X509Ref};
use x509_cert::ext::pkix::crl::dp::DistributionPoint;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{
    AccessDescription, AuthorityInfoAccessSyntax, BasicConstraints, CrlDistributionPoints,
    ExtendedKeyUsage, KeyUsage, KeyUsages, SubjectAltName,
};

use crate::error::{PkiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    BasicConstraints,
    KeyUsage,
    ExtendedKeyUsage,
    SubjectAltName,
    AuthorityInfoAccess,
    CrlDistributionPoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsageFlag {
    DigitalSignature,
    NonRepudiation,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

impl KeyUsageFlag {
    const ALL: [KeyUsageFlag; 9] = [
        KeyUsageFlag::DigitalSignature,
        KeyUsageFlag::NonRepudiation,
        KeyUsageFlag::KeyEncipherment,
        KeyUsageFlag::DataEncipherment,
        KeyUsageFlag::KeyAgreement,
        KeyUsageFlag::KeyCertSign,
        KeyUsageFlag::CrlSign,
        KeyUsageFlag::EncipherOnly,
        KeyUsageFlag::DecipherOnly,
    ];

    fn bit(self) -> KeyUsages {
        match self {
            KeyUsageFlag::DigitalSignature => KeyUsages::DigitalSignature,
            KeyUsageFlag::NonRepudiation => KeyUsages::NonRepudiation,
            KeyUsageFlag::KeyEncipherment => KeyUsages::KeyEncipherment,
            KeyUsageFlag::DataEncipherment => KeyUsages::DataEncipherment,
            KeyUsageFlag::KeyAgreement => KeyUsages::KeyAgreement,
            KeyUsageFlag::KeyCertSign => KeyUsages::KeyCertSign,
            KeyUsageFlag::CrlSign => KeyUsages::CRLSign,
            KeyUsageFlag::EncipherOnly => KeyUsages::EncipherOnly,
            KeyUsageFlag::DecipherOnly => KeyUsages::DecipherOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtendedKeyUsagePurpose {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    OcspSigning,
}

impl ExtendedKeyUsagePurpose {
    const ALL: [ExtendedKeyUsagePurpose; 6] = [
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::CodeSigning,
        ExtendedKeyUsagePurpose::EmailProtection,
        ExtendedKeyUsagePurpose::TimeStamping,
        ExtendedKeyUsagePurpose::OcspSigning,
    ];

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            ExtendedKeyUsagePurpose::ServerAuth => ID_KP_SERVER_AUTH,
            ExtendedKeyUsagePurpose::ClientAuth => ID_KP_CLIENT_AUTH,
            ExtendedKeyUsagePurpose::CodeSigning => ID_KP_CODE_SIGNING,
            ExtendedKeyUsagePurpose::EmailProtection => ID_KP_EMAIL_PROTECTION,
            ExtendedKeyUsagePurpose::TimeStamping => ID_KP_TIME_STAMPING,
            ExtendedKeyUsagePurpose::OcspSigning => ID_KP_OCSP_SIGNING,
        }
    }

    fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|purpose| purpose.oid() == *oid)
    }
}

/// Subject alternative name entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltName {
    Dns(String),
    Uri(String),
    Email(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionValue {
    BasicConstraints { ca: bool, path_len: Option<u8> },
    KeyUsage(Vec<KeyUsageFlag>),
    ExtendedKeyUsage(Vec<ExtendedKeyUsagePurpose>),
    SubjectAltName(Vec<AltName>),
    AuthorityInfoAccess {
        ocsp: Vec<String>,
        ca_issuers: Vec<String>,
    },
    CrlDistributionPoints(Vec<String>),
}

/// A typed X.509 extension with caller-chosen criticality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub critical: bool,
    pub value: ExtensionValue,
}

impl Extension {
    pub fn new(critical: bool, value: ExtensionValue) -> Self {
        Extension { critical, value }
    }

    pub fn basic_constraints(critical: bool, ca: bool, path_len: Option<u8>) -> Self {
        Self::new(critical, ExtensionValue::BasicConstraints { ca, path_len })
    }

    pub fn key_usage(critical: bool, flags: &[KeyUsageFlag]) -> Self {
        Self::new(critical, ExtensionValue::KeyUsage(flags.to_vec()))
    }

    pub fn extended_key_usage(critical: bool, purposes: &[ExtendedKeyUsagePurpose]) -> Self {
        Self::new(critical, ExtensionValue::ExtendedKeyUsage(purposes.to_vec()))
    }

    pub fn subject_alt_name(critical: bool, names: Vec<AltName>) -> Self {
        Self::new(critical, ExtensionValue::SubjectAltName(names))
    }

    /// `authorityInfoAccess=OCSP;URI:<uri>`
    pub fn ocsp_responder(uri: &str) -> Self {
        Self::new(
            false,
            ExtensionValue::AuthorityInfoAccess {
                ocsp: vec![uri.to_string()],
                ca_issuers: Vec::new(),
            },
        )
    }

    /// `crlDistributionPoints=URI:<uri>`
    pub fn crl_distribution_point(uri: &str) -> Self {
        Self::new(
            false,
            ExtensionValue::CrlDistributionPoints(vec![uri.to_string()]),
        )
    }

    pub fn kind(&self) -> ExtensionKind {
        match self.value {
            ExtensionValue::BasicConstraints { .. } => ExtensionKind::BasicConstraints,
            ExtensionValue::KeyUsage(_) => ExtensionKind::KeyUsage,
            ExtensionValue::ExtendedKeyUsage(_) => ExtensionKind::ExtendedKeyUsage,
            ExtensionValue::SubjectAltName(_) => ExtensionKind::SubjectAltName,
            ExtensionValue::AuthorityInfoAccess { .. } => ExtensionKind::AuthorityInfoAccess,
            ExtensionValue::CrlDistributionPoints(_) => ExtensionKind::CrlDistributionPoints,
        }
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self.kind() {
            ExtensionKind::BasicConstraints => BasicConstraints::OID,
            ExtensionKind::KeyUsage => KeyUsage::OID,
            ExtensionKind::ExtendedKeyUsage => ExtendedKeyUsage::OID,
            ExtensionKind::SubjectAltName => SubjectAltName::OID,
            ExtensionKind::AuthorityInfoAccess => AuthorityInfoAccessSyntax::OID,
            ExtensionKind::CrlDistributionPoints => CrlDistributionPoints::OID,
        }
    }

    /// Check that every value is well formed
    pub fn validate(&self) -> Result<()> {
        match &self.value {
            ExtensionValue::BasicConstraints { ca, path_len } => {
                if !ca && path_len.is_some() {
                    return Err(malformed("pathlen is only meaningful with CA:TRUE"));
                }
            }
            ExtensionValue::KeyUsage(flags) => {
                if flags.is_empty() {
                    return Err(malformed("keyUsage must name at least one usage"));
                }
            }
            ExtensionValue::ExtendedKeyUsage(purposes) => {
                if purposes.is_empty() {
                    return Err(malformed("extendedKeyUsage must name at least one purpose"));
                }
            }
            ExtensionValue::SubjectAltName(names) => {
                if names.is_empty() {
                    return Err(malformed("subjectAltName must contain at least one name"));
                }
                for name in names {
                    match name {
                        AltName::Dns(dns) if !is_valid_dns_name(dns) => {
                            return Err(malformed(&format!("invalid DNS name '{}'", dns)));
                        }
                        AltName::Uri(uri) if !is_valid_uri(uri) => {
                            return Err(malformed(&format!("invalid URI '{}'", uri)));
                        }
                        AltName::Email(email) if !is_valid_email(email) => {
                            return Err(malformed(&format!("invalid email '{}'", email)));
                        }
                        _ => {}
                    }
                }
            }
            ExtensionValue::AuthorityInfoAccess { ocsp, ca_issuers } => {
                if ocsp.is_empty() && ca_issuers.is_empty() {
                    return Err(malformed("authorityInfoAccess must contain a location"));
                }
                if let Some(uri) = ocsp.iter().chain(ca_issuers).find(|u| !is_valid_uri(u)) {
                    return Err(malformed(&format!("invalid access location '{}'", uri)));
                }
            }
            ExtensionValue::CrlDistributionPoints(uris) => {
                if uris.is_empty() {
                    return Err(malformed("crlDistributionPoints must contain a URI"));
                }
                if let Some(uri) = uris.iter().find(|u| !is_valid_uri(u)) {
                    return Err(malformed(&format!("invalid distribution point '{}'", uri)));
                }
            }
        }
        Ok(())
    }

    /// DER-encoded `extnValue` contents
    pub fn value_der(&self) -> Result<Vec<u8>> {
        let der = match &self.value {
            ExtensionValue::BasicConstraints { ca, path_len } => BasicConstraints {
                ca: *ca,
                path_len_constraint: *path_len,
            }
            .to_der()?,
            ExtensionValue::KeyUsage(flags) => {
                let mut bits = FlagSet::<KeyUsages>::default();
                for flag in flags {
                    bits |= flag.bit();
                }
                KeyUsage(bits).to_der()?
            }
            ExtensionValue::ExtendedKeyUsage(purposes) => {
                ExtendedKeyUsage(purposes.iter().map(|p| p.oid()).collect()).to_der()?
            }
            ExtensionValue::SubjectAltName(names) => SubjectAltName(
                names
                    .iter()
                    .map(alt_name_to_general_name)
                    .collect::<Result<Vec<_>>>()?,
            )
            .to_der()?,
            ExtensionValue::AuthorityInfoAccess { ocsp, ca_issuers } => {
                let mut descriptions = Vec::new();
                for (method, uris) in [(ID_AD_OCSP, ocsp), (ID_AD_CA_ISSUERS, ca_issuers)] {
                    for uri in uris {
                        descriptions.push(AccessDescription {
                            access_method: method,
                            access_location: GeneralName::UniformResourceIdentifier(
                                Ia5String::new(uri)?,
                            ),
                        });
                    }
                }
                AuthorityInfoAccessSyntax(descriptions).to_der()?
            }
            ExtensionValue::CrlDistributionPoints(uris) => {
                let mut points = Vec::new();
                for uri in uris {
                    points.push(DistributionPoint {
                        distribution_point: Some(DistributionPointName::FullName(vec![
                            GeneralName::UniformResourceIdentifier(Ia5String::new(uri)?),
                        ])),
                        reasons: None,
                        crl_issuer: None,
                    });
                }
                CrlDistributionPoints(points).to_der()?
            }
        };
        Ok(der)
    }

    pub fn to_x509_extension(&self) -> Result<x509_cert::ext::Extension> {
        Ok(x509_cert::ext::Extension {
            extn_id: self.oid(),
            critical: self.critical,
            extn_value: OctetString::new(self.value_der()?)?,
        })
    }

    pub fn to_openssl(&self) -> Result<X509Extension> {
        let oid = Asn1Object::from_str(&self.oid().to_string())?;
        let contents = Asn1OctetString::new_from_bytes(&self.value_der()?)?;
        Ok(X509Extension::new_from_der(&oid, self.critical, &contents)?)
    }

    /// Decode a raw extension; `Ok(None)` for kinds outside this model
    pub fn from_x509_extension(ext: &x509_cert::ext::Extension) -> Result<Option<Self>> {
        let bytes = ext.extn_value.as_bytes();
        let value = match ext.extn_id {
            oid if oid == BasicConstraints::OID => {
                let bc = BasicConstraints::from_der(bytes)?;
                ExtensionValue::BasicConstraints {
                    ca: bc.ca,
                    path_len: bc.path_len_constraint,
                }
            }
            oid if oid == KeyUsage::OID => {
                let ku = KeyUsage::from_der(bytes)?;
                ExtensionValue::KeyUsage(
                    KeyUsageFlag::ALL
                        .into_iter()
                        .filter(|flag| ku.0.contains(flag.bit()))
                        .collect(),
                )
            }
            oid if oid == ExtendedKeyUsage::OID => {
                let eku = ExtendedKeyUsage::from_der(bytes)?;
                ExtensionValue::ExtendedKeyUsage(
                    eku.0
                        .iter()
                        .filter_map(ExtendedKeyUsagePurpose::from_oid)
                        .collect(),
                )
            }
            oid if oid == SubjectAltName::OID => {
                let san = SubjectAltName::from_der(bytes)?;
                ExtensionValue::SubjectAltName(
                    san.0.iter().filter_map(general_name_to_alt_name).collect(),
                )
            }
            oid if oid == AuthorityInfoAccessSyntax::OID => {
                let aia = AuthorityInfoAccessSyntax::from_der(bytes)?;
                let mut ocsp = Vec::new();
                let mut ca_issuers = Vec::new();
                for description in &aia.0 {
                    if let GeneralName::UniformResourceIdentifier(uri) =
                        &description.access_location
                    {
                        if description.access_method == ID_AD_OCSP {
                            ocsp.push(uri.to_string());
                        } else if description.access_method == ID_AD_CA_ISSUERS {
                            ca_issuers.push(uri.to_string());
                        }
                    }
                }
                ExtensionValue::AuthorityInfoAccess { ocsp, ca_issuers }
            }
            oid if oid == CrlDistributionPoints::OID => {
                let points = CrlDistributionPoints::from_der(bytes)?;
                let mut uris = Vec::new();
                for point in &points.0 {
                    if let Some(DistributionPointName::FullName(names)) = &point.distribution_point
                    {
                        for name in names {
                            if let GeneralName::UniformResourceIdentifier(uri) = name {
                                uris.push(uri.to_string());
                            }
                        }
                    }
                }
                ExtensionValue::CrlDistributionPoints(uris)
            }
            _ => return Ok(None),
        };
        Ok(Some(Extension::new(ext.critical, value)))
    }
}

/// Ordered set of extensions holding at most one extension per kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    extensions: Vec<Extension>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, rejecting duplicate kinds and malformed values
    pub fn from_extensions(extensions: Vec<Extension>) -> Result<Self> {
        let set = ExtensionSet { extensions };
        set.validate()?;
        Ok(set)
    }

    /// Decode the extensions of an issued certificate
    pub fn from_certificate(cert: &X509Ref) -> Result<Self> {
        let parsed = x509_cert::Certificate::from_der(&cert.to_der()?)?;
        Self::from_x509_extensions(parsed.tbs_certificate.extensions.as_deref().unwrap_or(&[]))
    }

    pub fn from_x509_extensions(raw: &[x509_cert::ext::Extension]) -> Result<Self> {
        let mut extensions = Vec::new();
        for ext in raw {
            if let Some(extension) = Extension::from_x509_extension(ext)? {
                extensions.push(extension);
            }
        }
        Ok(ExtensionSet { extensions })
    }

    pub fn with(mut self, extension: Extension) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for extension in &self.extensions {
            if !seen.insert(extension.kind()) {
                return Err(malformed(&format!(
                    "duplicate {:?} extension",
                    extension.kind()
                )));
            }
            extension.validate()?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.iter()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn get(&self, kind: ExtensionKind) -> Option<&Extension> {
        self.extensions.iter().find(|ext| ext.kind() == kind)
    }

    /// `(ca, pathlen)` from basicConstraints, if present
    pub fn basic_constraints(&self) -> Option<(bool, Option<u8>)> {
        match self.get(ExtensionKind::BasicConstraints).map(|e| &e.value) {
            Some(ExtensionValue::BasicConstraints { ca, path_len }) => Some((*ca, *path_len)),
            _ => None,
        }
    }

    pub fn is_ca(&self) -> bool {
        matches!(self.basic_constraints(), Some((true, _)))
    }

    pub fn key_usage(&self) -> Option<&[KeyUsageFlag]> {
        match self.get(ExtensionKind::KeyUsage).map(|e| &e.value) {
            Some(ExtensionValue::KeyUsage(flags)) => Some(flags),
            _ => None,
        }
    }

    /// True if keyUsage is absent (unrestricted) or lists `flag`
    pub fn permits_key_usage(&self, flag: KeyUsageFlag) -> bool {
        self.key_usage().map_or(true, |flags| flags.contains(&flag))
    }

    pub fn has_extended_key_usage(&self, purpose: ExtendedKeyUsagePurpose) -> bool {
        match self.get(ExtensionKind::ExtendedKeyUsage).map(|e| &e.value) {
            Some(ExtensionValue::ExtendedKeyUsage(purposes)) => purposes.contains(&purpose),
            _ => false,
        }
    }

    pub fn to_openssl_stack(&self) -> Result<Stack<X509Extension>> {
        let mut stack = Stack::new()?;
        for extension in &self.extensions {
            stack.push(extension.to_openssl()?)?;
        }
        Ok(stack)
    }
}

impl IntoIterator for ExtensionSet {
    type Item = Extension;
    type IntoIter = std::vec::IntoIter<Extension>;

    fn into_iter(self) -> Self::IntoIter {
        self.extensions.into_iter()
    }
}

fn malformed(message: &str) -> PkiError {
    PkiError::MalformedRequest(message.to_string())
}

fn alt_name_to_general_name(name: &AltName) -> Result<GeneralName> {
    Ok(match name {
        AltName::Dns(dns) => GeneralName::DnsName(Ia5String::new(dns)?),
        AltName::Uri(uri) => GeneralName::UniformResourceIdentifier(Ia5String::new(uri)?),
        AltName::Email(email) => GeneralName::Rfc822Name(Ia5String::new(email)?),
    })
}

fn general_name_to_alt_name(name: &GeneralName) -> Option<AltName> {
    match name {
        GeneralName::DnsName(dns) => Some(AltName::Dns(dns.to_string())),
        GeneralName::UniformResourceIdentifier(uri) => Some(AltName::Uri(uri.to_string())),
        GeneralName::Rfc822Name(email) => Some(AltName::Email(email.to_string())),
        _ => None,
    }
}

/// RFC 1035 host name, optionally with a single leading `*.` wildcard label
pub fn is_valid_dns_name(name: &str) -> bool {
    let name = name.strip_prefix("*.").unwrap_or(name);
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

/// Absolute URI with a host, ASCII only (it is encoded as IA5String)
pub fn is_valid_uri(uri: &str) -> bool {
    uri.is_ascii()
        && url::Url::parse(uri)
            .map(|parsed| parsed.has_host())
            .unwrap_or(false)
}

pub fn is_valid_email(email: &str) -> bool {
    match email.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && local
                    .bytes()
                    .all(|b| b.is_ascii_graphic() && b != b'@')
                && is_valid_dns_name(domain)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_name_validation() {
        assert!(is_valid_dns_name("basic.alice.ru"));
        assert!(is_valid_dns_name("*.alice.ru"));
        assert!(is_valid_dns_name("localhost"));
        assert!(!is_valid_dns_name(""));
        assert!(!is_valid_dns_name("-bad.alice.ru"));
        assert!(!is_valid_dns_name("bad..alice.ru"));
        assert!(!is_valid_dns_name("under_score.ru"));
        assert!(!is_valid_dns_name(&format!("{}.ru", "a".repeat(64))));
    }

    #[test]
    fn test_uri_and_email_validation() {
        assert!(is_valid_uri("http://ocsp.alice.ru/"));
        assert!(is_valid_uri("http://crl.alice.ru:8080/alice-1.crl"));
        assert!(!is_valid_uri("not a uri"));
        assert!(!is_valid_uri("mailto:alice@alice.ru"));
        assert!(is_valid_email("alice@alice.ru"));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("al ice@alice.ru"));
    }

    #[test]
    fn test_duplicate_kinds_rejected() {
        let err = ExtensionSet::from_extensions(vec![
            Extension::basic_constraints(true, true, None),
            Extension::basic_constraints(true, false, None),
        ])
        .unwrap_err();
        assert!(matches!(err, PkiError::MalformedRequest(_)));
    }

    #[test]
    fn test_malformed_san_rejected() {
        let err = ExtensionSet::from_extensions(vec![Extension::subject_alt_name(
            false,
            vec![AltName::Dns("bad name.ru".to_string())],
        )])
        .unwrap_err();
        assert!(matches!(err, PkiError::MalformedRequest(_)));
    }

    #[test]
    fn test_pathlen_without_ca_rejected() {
        let ext = Extension::basic_constraints(true, false, Some(0));
        assert!(ext.validate().is_err());
    }

    #[test]
    fn test_der_decode_preserves_values() {
        let extensions = vec![
            Extension::basic_constraints(true, true, Some(0)),
            Extension::key_usage(
                true,
                &[
                    KeyUsageFlag::DigitalSignature,
                    KeyUsageFlag::KeyCertSign,
                    KeyUsageFlag::CrlSign,
                ],
            ),
            Extension::extended_key_usage(
                false,
                &[ExtendedKeyUsagePurpose::OcspSigning],
            ),
            Extension::subject_alt_name(
                false,
                vec![
                    AltName::Dns("ocsp.valid.alice.ru".to_string()),
                    AltName::Email("alice@alice.ru".to_string()),
                ],
            ),
            Extension::ocsp_responder("http://ocsp.alice.ru/"),
            Extension::crl_distribution_point("http://crl.alice.ru:8080/alice-1.crl"),
        ];
        for extension in extensions {
            let raw = extension.to_x509_extension().unwrap();
            let decoded = Extension::from_x509_extension(&raw).unwrap().unwrap();
            assert_eq!(decoded, extension);
        }
    }

    #[test]
    fn test_key_usage_queries() {
        let set = ExtensionSet::new()
            .with(Extension::basic_constraints(true, true, None))
            .with(Extension::key_usage(true, &[KeyUsageFlag::KeyCertSign]));
        assert!(set.is_ca());
        assert!(set.permits_key_usage(KeyUsageFlag::KeyCertSign));
        assert!(!set.permits_key_usage(KeyUsageFlag::CrlSign));
        assert!(ExtensionSet::new().permits_key_usage(KeyUsageFlag::CrlSign));
    }
}
