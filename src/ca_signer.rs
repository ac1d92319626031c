//! Certificate Authority Signer
//!
//! Issues certificates from [`CertificateRequest`]s, for every tier of the hierarchy:
//!
//! ```text
//! Root CA (self_sign)
//!   └── Intermediate CA (sign, explicit extensions, issued by Root)
//!       └── Leaf certificates (sign, copied extensions, issued by Intermediate)
//! ```
//!
//! The signer owns serial allocation. Each certificate is signed with a serial handed out by
//! the [`RevocationLedger`] and is only returned once its ledger entry has been recorded, so a
//! certificate never exists without its lifecycle record.
//!
//! # Extension policy
//! - [`ExtensionPolicy::Copy`] takes the request's extensions verbatim (`-copy_extensions copy`),
//!   acceptable for leaves only: a copied `CA:TRUE` is rejected.
//! - [`ExtensionPolicy::Explicit`] replaces them with a caller-supplied set.
//!
//! Whatever the policy, a CA-flagged result must carry keyCertSign, and the issuer must be a CA
//! whose path length still allows the new certificate.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, SubsecRound, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::pkey::{PKeyRef, Private};
use openssl::x509::{X509NameRef, X509};

use crate::certificate::IssuedCertificate;
use crate::error::{PkiError, Result};
use crate::extensions::{Extension, ExtensionSet, KeyUsageFlag};
use crate::ledger::{LedgerEntry, RevocationLedger};
use crate::provider::CryptoProvider;
use crate::request::CertificateRequest;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SERIAL_ATTEMPTS: usize = 3;
const MAX_CERT_YEAR: i32 = 9999;

/// Where the issued certificate's extensions come from
#[derive(Debug, Clone)]
pub enum ExtensionPolicy {
    Copy,
    Explicit(Vec<Extension>),
}

/// Issuer side of a signing operation
pub struct Issuer<'a> {
    pub certificate: &'a IssuedCertificate,
    pub key: &'a PKeyRef<Private>,
}

pub struct CaSigner {
    provider: Arc<dyn CryptoProvider>,
    ledger: Arc<RevocationLedger>,
}

impl CaSigner {
    pub fn new(provider: Arc<dyn CryptoProvider>, ledger: Arc<RevocationLedger>) -> Self {
        CaSigner { provider, ledger }
    }

    pub fn ledger(&self) -> &Arc<RevocationLedger> {
        &self.ledger
    }

    pub fn provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.provider
    }

    /// Issue a certificate for `request`, signed by `issuer`, valid from now for `validity_days`
    pub fn sign(
        &self,
        request: &CertificateRequest,
        issuer: Issuer<'_>,
        validity_days: u32,
        policy: &ExtensionPolicy,
    ) -> Result<IssuedCertificate> {
        self.sign_at(request, issuer, validity_days, policy, Utc::now())
    }

    /// [`sign`](Self::sign) with an explicit issuance time
    pub fn sign_at(
        &self,
        request: &CertificateRequest,
        issuer: Issuer<'_>,
        validity_days: u32,
        policy: &ExtensionPolicy,
        now: DateTime<Utc>,
    ) -> Result<IssuedCertificate> {
        let extensions = resolve_extensions(request, policy)?;
        check_issuer(issuer.certificate, &extensions)?;
        if !issuer
            .certificate
            .x509()
            .public_key()?
            .public_eq(issuer.key)
        {
            return Err(PkiError::SignatureVerification(
                "issuer key does not match the issuer certificate".to_string(),
            ));
        }

        self.issue(
            request,
            issuer.certificate.x509().subject_name(),
            &issuer.certificate.subject().to_string(),
            issuer.key,
            Some(issuer.certificate),
            validity_days,
            &extensions,
            now,
        )
    }

    /// Issue a self-signed root: issuer = subject, signed with the request's own key
    pub fn self_sign(
        &self,
        request: &CertificateRequest,
        key: &PKeyRef<Private>,
        validity_days: u32,
        extensions: Vec<Extension>,
    ) -> Result<IssuedCertificate> {
        let extensions = ExtensionSet::from_extensions(extensions)?;
        check_ca_key_usage(&extensions)?;
        if !request.public_key()?.public_eq(key) {
            return Err(PkiError::SignatureVerification(
                "signing key does not match the request public key".to_string(),
            ));
        }

        self.issue(
            request,
            request.x509_req().subject_name(),
            &request.subject().to_string(),
            key,
            None,
            validity_days,
            &extensions,
            Utc::now(),
        )
    }

    /// Check that `issuer` names and signed `certificate`
    pub fn verify_issued(
        certificate: &IssuedCertificate,
        issuer: &IssuedCertificate,
    ) -> Result<()> {
        let names_match = certificate
            .x509()
            .issuer_name()
            .try_cmp(issuer.x509().subject_name())?
            .is_eq();
        if !names_match {
            return Err(PkiError::SignatureVerification(format!(
                "certificate {} names issuer {}, not {}",
                certificate.serial(),
                certificate.issuer(),
                issuer.subject()
            )));
        }
        let issuer_key = issuer.x509().public_key()?;
        if !certificate.x509().verify(&issuer_key)? {
            return Err(PkiError::SignatureVerification(format!(
                "certificate {} is not signed by {}",
                certificate.serial(),
                issuer.subject()
            )));
        }
        Ok(())
    }

    /// Sign and record one certificate. `issuer_certificate` is `None` for a self-signed root,
    /// which is then verified against itself.
    #[allow(clippy::too_many_arguments)]
    fn issue(
        &self,
        request: &CertificateRequest,
        issuer_name: &X509NameRef,
        issuer_subject: &str,
        issuer_key: &PKeyRef<Private>,
        issuer_certificate: Option<&IssuedCertificate>,
        validity_days: u32,
        extensions: &ExtensionSet,
        now: DateTime<Utc>,
    ) -> Result<IssuedCertificate> {
        let not_before = now.trunc_subsecs(0);
        let not_after = validity_end(not_before, validity_days)?;
        let subject = request.subject().to_string();
        let public_key = request.public_key()?;
        let not_before_asn1 = Asn1Time::from_unix(not_before.timestamp() as _)?;
        let not_after_asn1 = Asn1Time::from_unix(not_after.timestamp() as _)?;

        for attempt in 1..=SERIAL_ATTEMPTS {
            let serial = self.ledger.allocate_serial()?;

            let mut builder = X509::builder()?;
            builder.set_version(X509_VERSION_3)?;
            let serial_bn = BigNum::from_slice(&serial.to_der_bytes())?;
            let serial_number = serial_bn.to_asn1_integer()?;
            builder.set_serial_number(&serial_number)?;
            builder.set_subject_name(request.x509_req().subject_name())?;
            builder.set_issuer_name(issuer_name)?;
            builder.set_not_before(&not_before_asn1)?;
            builder.set_not_after(&not_after_asn1)?;
            builder.set_pubkey(&public_key)?;
            for extension in extensions.iter() {
                builder.append_extension(extension.to_openssl()?)?;
            }
            let issued = IssuedCertificate::from_x509(self.provider.sign_csr(builder, issuer_key)?)?;
            // nothing reaches the ledger unless it verifies
            Self::verify_issued(&issued, issuer_certificate.unwrap_or(&issued))?;

            let entry = LedgerEntry::issued(
                serial,
                subject.clone(),
                issuer_subject.to_string(),
                not_after,
            );
            match self.ledger.record(entry) {
                Ok(()) => {
                    tracing::info!(
                        %serial,
                        %subject,
                        issuer = %issuer_subject,
                        %not_after,
                        "Issued certificate"
                    );
                    return Ok(issued);
                }
                Err(PkiError::DuplicateSerial(taken)) => {
                    tracing::warn!(serial = %taken, attempt, "Serial collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(PkiError::SerialAllocation(format!(
            "no free serial after {} attempts",
            SERIAL_ATTEMPTS
        )))
    }
}

/// Last day of validity, bounded by the largest year an X.509 time can carry
fn validity_end(not_before: DateTime<Utc>, validity_days: u32) -> Result<DateTime<Utc>> {
    not_before
        .checked_add_signed(Duration::days(i64::from(validity_days)))
        .filter(|end| end.year() <= MAX_CERT_YEAR)
        .ok_or_else(|| {
            PkiError::MalformedRequest(format!(
                "validity of {} days from {} is out of range",
                validity_days, not_before
            ))
        })
}

fn resolve_extensions(
    request: &CertificateRequest,
    policy: &ExtensionPolicy,
) -> Result<ExtensionSet> {
    let extensions = match policy {
        ExtensionPolicy::Copy => {
            let copied = request.extensions().clone();
            if copied.is_ca() {
                return Err(PkiError::ExtensionPolicyViolation(format!(
                    "request for {} asserts CA:TRUE; CA certificates need explicit extensions",
                    request.subject()
                )));
            }
            copied
        }
        ExtensionPolicy::Explicit(extensions) => ExtensionSet::from_extensions(extensions.clone())?,
    };
    check_ca_key_usage(&extensions)?;
    Ok(extensions)
}

fn check_ca_key_usage(extensions: &ExtensionSet) -> Result<()> {
    let has_cert_sign = extensions
        .key_usage()
        .is_some_and(|flags| flags.contains(&KeyUsageFlag::KeyCertSign));
    if extensions.is_ca() && !has_cert_sign {
        return Err(PkiError::ExtensionPolicyViolation(
            "CA certificates must carry keyCertSign in keyUsage".to_string(),
        ));
    }
    Ok(())
}

fn check_issuer(issuer: &IssuedCertificate, requested: &ExtensionSet) -> Result<()> {
    let issuer_extensions = issuer.extensions();
    let Some((true, issuer_path_len)) = issuer_extensions.basic_constraints() else {
        return Err(PkiError::ExtensionPolicyViolation(format!(
            "issuer {} is not a CA (basicConstraints CA:TRUE missing)",
            issuer.subject()
        )));
    };
    if !issuer_extensions.permits_key_usage(KeyUsageFlag::KeyCertSign) {
        return Err(PkiError::ExtensionPolicyViolation(format!(
            "issuer {} lacks keyCertSign",
            issuer.subject()
        )));
    }

    if let (Some((true, child_path_len)), Some(limit)) =
        (requested.basic_constraints(), issuer_path_len)
    {
        match child_path_len {
            _ if limit == 0 => {
                return Err(PkiError::ExtensionPolicyViolation(format!(
                    "issuer {} has pathlen 0 and cannot issue CA certificates",
                    issuer.subject()
                )));
            }
            Some(child) if child < limit => {}
            other => {
                return Err(PkiError::ExtensionPolicyViolation(format!(
                    "CA pathlen {:?} exceeds what issuer pathlen {} allows",
                    other, limit
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::{AltName, ExtendedKeyUsagePurpose};
    use crate::key_material::{KeyAlgorithm, KeyGenerator, KeyPair, KeyPolicy};
    use crate::ledger::{CertificateStatus, LedgerEntry, Serial};
    use crate::ocsp_types::{BasicOcspResponse, ResponseData};
    use crate::provider::OpensslProvider;
    use crate::request::{RequestBuilder, SubjectDn};
    use openssl::pkey::PKey;
    use openssl::x509::X509Builder;
    use spki::AlgorithmIdentifierOwned;
    use x509_cert::crl::{CertificateList, TbsCertList};
    use x509_cert::Certificate;

    struct Fixture {
        signer: CaSigner,
        root: IssuedCertificate,
        root_key: PKey<Private>,
    }

    fn ec_key() -> KeyPair {
        KeyGenerator::new(&OpensslProvider::new(), KeyPolicy::default())
            .generate(KeyAlgorithm::Ec, 256, None)
            .unwrap()
    }

    fn ca_extensions(path_len: Option<u8>) -> Vec<Extension> {
        vec![
            Extension::basic_constraints(true, true, path_len),
            Extension::key_usage(
                true,
                &[
                    KeyUsageFlag::DigitalSignature,
                    KeyUsageFlag::KeyCertSign,
                    KeyUsageFlag::CrlSign,
                ],
            ),
        ]
    }

    fn fixture(root_path_len: Option<u8>) -> Fixture {
        let signer = CaSigner::new(
            Arc::new(OpensslProvider::new()),
            Arc::new(RevocationLedger::in_memory()),
        );
        let key = ec_key();
        let request = RequestBuilder::new(SubjectDn::new("alice CA").country("RU"))
            .build(&key, None)
            .unwrap();
        let root_key = key.private_key(None).unwrap();
        let root = signer
            .self_sign(&request, &root_key, 3650, ca_extensions(root_path_len))
            .unwrap();
        Fixture {
            signer,
            root,
            root_key,
        }
    }

    fn leaf_request(cn: &str, extensions: Vec<Extension>) -> CertificateRequest {
        RequestBuilder::new(SubjectDn::new(cn).country("RU"))
            .extensions(extensions)
            .build(&ec_key(), None)
            .unwrap()
    }

    #[test]
    fn test_self_signed_root() {
        let f = fixture(None);
        assert!(f.root.is_ca());
        assert!(f.root.is_self_issued());
        assert_eq!(f.root.serial(), Serial::new(1));
        assert!(CaSigner::verify_issued(&f.root, &f.root).is_ok());
        let entry = f.signer.ledger().status_of(f.root.serial()).unwrap();
        assert_eq!(entry.status, CertificateStatus::Valid);
        assert_eq!(entry.issuer, entry.subject);
    }

    #[test]
    fn test_copy_policy_leaf() {
        let f = fixture(None);
        let request = leaf_request(
            "alice Basic",
            vec![
                Extension::basic_constraints(false, false, None),
                Extension::key_usage(true, &[KeyUsageFlag::DigitalSignature]),
                Extension::extended_key_usage(true, &[ExtendedKeyUsagePurpose::ServerAuth]),
                Extension::subject_alt_name(false, vec![AltName::Dns("basic.alice.ru".into())]),
            ],
        );
        let issuer = Issuer {
            certificate: &f.root,
            key: &f.root_key,
        };
        let leaf = f
            .signer
            .sign(&request, issuer, 365, &ExtensionPolicy::Copy)
            .unwrap();

        assert_eq!(leaf.extensions(), request.extensions());
        assert_eq!(leaf.issuer(), f.root.subject());
        assert!(CaSigner::verify_issued(&leaf, &f.root).is_ok());
        assert_eq!(leaf.not_after() - leaf.not_before(), Duration::days(365));
        let entry = f.signer.ledger().status_of(leaf.serial()).unwrap();
        assert_eq!(entry.subject, leaf.subject().to_string());
        assert_eq!(entry.not_after, leaf.not_after());
    }

    #[test]
    fn test_copy_policy_rejects_ca_request() {
        let f = fixture(None);
        let request = leaf_request("alice Sneaky CA", ca_extensions(None));
        let issuer = Issuer {
            certificate: &f.root,
            key: &f.root_key,
        };
        let err = f
            .signer
            .sign(&request, issuer, 365, &ExtensionPolicy::Copy)
            .unwrap_err();
        assert!(matches!(err, PkiError::ExtensionPolicyViolation(_)));
        assert_eq!(f.signer.ledger().len(), 1);
    }

    #[test]
    fn test_non_ca_issuer_rejected() {
        let f = fixture(None);
        let leaf_key = ec_key();
        let request = RequestBuilder::new(SubjectDn::new("alice Leaf"))
            .extension(Extension::basic_constraints(false, false, None))
            .build(&leaf_key, None)
            .unwrap();
        let leaf = f
            .signer
            .sign(
                &request,
                Issuer {
                    certificate: &f.root,
                    key: &f.root_key,
                },
                30,
                &ExtensionPolicy::Copy,
            )
            .unwrap();

        let leaf_private = leaf_key.private_key(None).unwrap();
        let err = f
            .signer
            .sign(
                &leaf_request("alice Child", Vec::new()),
                Issuer {
                    certificate: &leaf,
                    key: &leaf_private,
                },
                30,
                &ExtensionPolicy::Copy,
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::ExtensionPolicyViolation(_)));
    }

    #[test]
    fn test_ca_without_key_cert_sign_rejected() {
        let f = fixture(None);
        let err = f
            .signer
            .sign(
                &leaf_request("alice Intermediate CA", Vec::new()),
                Issuer {
                    certificate: &f.root,
                    key: &f.root_key,
                },
                365,
                &ExtensionPolicy::Explicit(vec![Extension::basic_constraints(true, true, Some(0))]),
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::ExtensionPolicyViolation(_)));
    }

    #[test]
    fn test_pathlen_zero_blocks_sub_ca() {
        let f = fixture(Some(0));
        let err = f
            .signer
            .sign(
                &leaf_request("alice Intermediate CA", Vec::new()),
                Issuer {
                    certificate: &f.root,
                    key: &f.root_key,
                },
                365,
                &ExtensionPolicy::Explicit(ca_extensions(None)),
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::ExtensionPolicyViolation(_)));
    }

    #[test]
    fn test_pathlen_must_shrink() {
        let f = fixture(Some(1));
        let issuer = || Issuer {
            certificate: &f.root,
            key: &f.root_key,
        };
        let request = leaf_request("alice Intermediate CA", Vec::new());
        let err = f
            .signer
            .sign(&request, issuer(), 365, &ExtensionPolicy::Explicit(ca_extensions(Some(1))))
            .unwrap_err();
        assert!(matches!(err, PkiError::ExtensionPolicyViolation(_)));

        let intermediate = f
            .signer
            .sign(&request, issuer(), 365, &ExtensionPolicy::Explicit(ca_extensions(Some(0))))
            .unwrap();
        assert_eq!(intermediate.extensions().basic_constraints(), Some((true, Some(0))));
    }

    #[test]
    fn test_mismatched_issuer_key_rejected() {
        let f = fixture(None);
        let other = ec_key().private_key(None).unwrap();
        let err = f
            .signer
            .sign(
                &leaf_request("alice Basic", Vec::new()),
                Issuer {
                    certificate: &f.root,
                    key: &other,
                },
                365,
                &ExtensionPolicy::Copy,
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::SignatureVerification(_)));
    }

    #[test]
    fn test_serials_skip_externally_recorded_entries() {
        let f = fixture(None);
        // Occupy the next two serials behind the allocator's back
        let ledger = f.signer.ledger();
        let next = ledger.allocate_serial().unwrap();
        for offset in 1..=2 {
            ledger
                .record(LedgerEntry::issued(
                    Serial::new(next.value() + offset),
                    "/CN=squatter".to_string(),
                    "/CN=elsewhere".to_string(),
                    Utc::now(),
                ))
                .unwrap();
        }
        let leaf = f
            .signer
            .sign(
                &leaf_request("alice Basic", Vec::new()),
                Issuer {
                    certificate: &f.root,
                    key: &f.root_key,
                },
                365,
                &ExtensionPolicy::Copy,
            )
            .unwrap();
        assert!(leaf.serial().value() > next.value() + 2);
    }

    #[test]
    fn test_out_of_range_validity_rejected_before_allocation() {
        let f = fixture(None);
        let ledger = f.signer.ledger();
        let recorded = ledger.len();
        let next = ledger.allocate_serial().unwrap();

        for days in [u32::MAX, 3_000_000] {
            let err = f
                .signer
                .sign(
                    &leaf_request("alice Forever", Vec::new()),
                    Issuer {
                        certificate: &f.root,
                        key: &f.root_key,
                    },
                    days,
                    &ExtensionPolicy::Copy,
                )
                .unwrap_err();
            assert!(matches!(err, PkiError::MalformedRequest(_)));
        }
        assert_eq!(ledger.len(), recorded);
        // no serial was handed out for the rejected requests
        assert_eq!(ledger.allocate_serial().unwrap().value(), next.value() + 1);

        let key = ec_key();
        let request = RequestBuilder::new(SubjectDn::new("alice Forever CA"))
            .build(&key, None)
            .unwrap();
        let err = f
            .signer
            .self_sign(&request, &key.private_key(None).unwrap(), u32::MAX, ca_extensions(None))
            .unwrap_err();
        assert!(matches!(err, PkiError::MalformedRequest(_)));
        assert_eq!(ledger.len(), recorded);
    }

    /// Signs certificate bodies with a key of its own instead of the issuer's
    struct StrayKeyProvider {
        inner: OpensslProvider,
        stray: PKey<Private>,
    }

    impl CryptoProvider for StrayKeyProvider {
        fn generate_key_pair(&self, algorithm: KeyAlgorithm, bits: u32) -> Result<PKey<Private>> {
            self.inner.generate_key_pair(algorithm, bits)
        }

        fn sign_csr(&self, builder: X509Builder, _issuer_key: &PKeyRef<Private>) -> Result<X509> {
            self.inner.sign_csr(builder, &self.stray)
        }

        fn sign_crl(
            &self,
            tbs: TbsCertList,
            issuer_key: &PKeyRef<Private>,
        ) -> Result<CertificateList> {
            self.inner.sign_crl(tbs, issuer_key)
        }

        fn sign_ocsp_response(
            &self,
            data: ResponseData,
            responder_key: &PKeyRef<Private>,
            certs: Vec<Certificate>,
        ) -> Result<BasicOcspResponse> {
            self.inner.sign_ocsp_response(data, responder_key, certs)
        }

        fn signature_algorithm(&self, key: &PKeyRef<Private>) -> Result<AlgorithmIdentifierOwned> {
            self.inner.signature_algorithm(key)
        }
    }

    #[test]
    fn test_unverifiable_certificate_is_never_recorded() {
        let f = fixture(None);
        let ledger = Arc::clone(f.signer.ledger());
        let recorded = ledger.len();
        let stray_signer = CaSigner::new(
            Arc::new(StrayKeyProvider {
                inner: OpensslProvider::new(),
                stray: ec_key().private_key(None).unwrap(),
            }),
            Arc::clone(&ledger),
        );

        let err = stray_signer
            .sign(
                &leaf_request("alice Basic", Vec::new()),
                Issuer {
                    certificate: &f.root,
                    key: &f.root_key,
                },
                30,
                &ExtensionPolicy::Copy,
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::SignatureVerification(_)));

        let key = ec_key();
        let request = RequestBuilder::new(SubjectDn::new("alice Other CA"))
            .build(&key, None)
            .unwrap();
        let err = stray_signer
            .self_sign(&request, &key.private_key(None).unwrap(), 30, ca_extensions(None))
            .unwrap_err();
        assert!(matches!(err, PkiError::SignatureVerification(_)));

        assert_eq!(ledger.len(), recorded);
    }

    #[test]
    fn test_serials_unique_across_issuance() {
        let f = fixture(None);
        let mut serials = vec![f.root.serial()];
        for i in 0..5 {
            let leaf = f
                .signer
                .sign(
                    &leaf_request(&format!("alice Leaf {}", i), Vec::new()),
                    Issuer {
                        certificate: &f.root,
                        key: &f.root_key,
                    },
                    30,
                    &ExtensionPolicy::Copy,
                )
                .unwrap();
            serials.push(leaf.serial());
        }
        let mut deduped = serials.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), serials.len());
    }
}
