//! CRL Generator
//!
//! Derives a signed X.509 v2 certificate revocation list from a ledger snapshot. The CRL
//! lists exactly the revoked entries of the snapshot, ordered by serial, and carries a CRL
//! number equal to `thisUpdate` in Unix seconds, so two lists generated from the same
//! snapshot at the same instant differ only in their signature.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use const_oid::AssociatedOid;
use der::asn1::{OctetString, Uint};
use der::{Decode, Encode};
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::X509Crl;
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::pkix::{CrlNumber, CrlReason};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::Version;

use crate::certificate::IssuedCertificate;
use crate::error::{PkiError, Result};
use crate::extensions::KeyUsageFlag;
use crate::ledger::{LedgerEntry, RevocationLedger, RevocationReason, Serial};
use crate::provider::CryptoProvider;
use crate::time::{from_x509_time, to_x509_time};

/// One revoked certificate as listed in a CRL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial: Serial,
    pub revoked_at: DateTime<Utc>,
    pub reason: RevocationReason,
}

/// Signed certificate revocation list
#[derive(Debug, Clone)]
pub struct Crl {
    list: CertificateList,
    der: Vec<u8>,
}

impl Crl {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Crl {
            list: CertificateList::from_der(der)?,
            der: der.to_vec(),
        })
    }

    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(X509Crl::from_der(&self.der)?.to_pem()?)
    }

    pub fn this_update(&self) -> Result<DateTime<Utc>> {
        from_x509_time(self.list.tbs_cert_list.this_update)
    }

    pub fn next_update(&self) -> Result<Option<DateTime<Utc>>> {
        self.list
            .tbs_cert_list
            .next_update
            .map(from_x509_time)
            .transpose()
    }

    pub fn crl_number(&self) -> Result<Option<u64>> {
        let Some(ext) = self
            .list
            .tbs_cert_list
            .crl_extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == CrlNumber::OID)
        else {
            return Ok(None);
        };
        let number = CrlNumber::from_der(ext.extn_value.as_bytes())?;
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(number.0.as_bytes());
        Ok(Serial::from_der_bytes(&bytes).map(Serial::value))
    }

    pub fn entries(&self) -> Result<Vec<RevokedEntry>> {
        let mut entries = Vec::new();
        for revoked in self.list.tbs_cert_list.revoked_certificates.iter().flatten() {
            let serial = Serial::from_serial_number(&revoked.serial_number).ok_or_else(|| {
                PkiError::MalformedRequest("CRL entry serial out of range".to_string())
            })?;
            let mut reason = RevocationReason::Unspecified;
            for ext in revoked.crl_entry_extensions.iter().flatten() {
                if ext.extn_id == CrlReason::OID {
                    let code = CrlReason::from_der(ext.extn_value.as_bytes())?;
                    reason = RevocationReason::from_crl_reason(code).unwrap_or(reason);
                }
            }
            entries.push(RevokedEntry {
                serial,
                revoked_at: from_x509_time(revoked.revocation_date)?,
                reason,
            });
        }
        Ok(entries)
    }

    pub fn revoked_serials(&self) -> Result<Vec<Serial>> {
        Ok(self.entries()?.into_iter().map(|entry| entry.serial).collect())
    }

    /// Check the CRL signature against `issuer`'s public key
    pub fn verify(&self, issuer: &IssuedCertificate) -> Result<()> {
        let crl = X509Crl::from_der(&self.der)?;
        let issuer_key = issuer.x509().public_key()?;
        if !crl.verify(&issuer_key)? {
            return Err(PkiError::SignatureVerification(format!(
                "CRL is not signed by {}",
                issuer.subject()
            )));
        }
        Ok(())
    }
}

pub struct CrlGenerator {
    provider: Arc<dyn CryptoProvider>,
}

impl CrlGenerator {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        CrlGenerator { provider }
    }

    /// Build and sign a CRL listing the revoked entries of `snapshot`
    ///
    /// `nextUpdate = thisUpdate + validity`. `issuer` must be a CA allowed to sign CRLs.
    pub fn generate(
        &self,
        snapshot: &[LedgerEntry],
        issuer: &IssuedCertificate,
        issuer_key: &PKeyRef<Private>,
        this_update: DateTime<Utc>,
        validity: Duration,
    ) -> Result<Crl> {
        check_crl_issuer(issuer, issuer_key)?;
        let this_update = this_update.trunc_subsecs(0);
        let next_update = this_update.checked_add_signed(validity).ok_or_else(|| {
            PkiError::MalformedRequest(format!(
                "CRL validity {} from {} is out of range",
                validity, this_update
            ))
        })?;

        let mut revoked: Vec<&LedgerEntry> =
            snapshot.iter().filter(|entry| entry.is_revoked()).collect();
        revoked.sort_by_key(|entry| entry.serial);

        let mut revoked_certificates = Vec::with_capacity(revoked.len());
        for entry in &revoked {
            let revoked_at = entry.revoked_at.ok_or_else(|| {
                PkiError::LedgerCorrupt(format!("serial {} has no revocation time", entry.serial))
            })?;
            revoked_certificates.push(RevokedCert {
                serial_number: entry.serial.to_serial_number()?,
                revocation_date: to_x509_time(revoked_at)?,
                crl_entry_extensions: reason_extension(entry.reason)?,
            });
        }

        let crl_number = u64::try_from(this_update.timestamp()).map_err(|_| {
            PkiError::MalformedRequest(format!("thisUpdate before 1970: {}", this_update))
        })?;
        let tbs = TbsCertList {
            version: Version::V2,
            // replaced by the provider with the issuer key's algorithm
            signature: self.provider.signature_algorithm(issuer_key)?,
            issuer: Name::from_der(&issuer.subject_name_der()?)?,
            this_update: to_x509_time(this_update)?,
            next_update: Some(to_x509_time(next_update)?),
            revoked_certificates: if revoked_certificates.is_empty() {
                None
            } else {
                Some(revoked_certificates)
            },
            crl_extensions: Some(vec![Extension {
                extn_id: CrlNumber::OID,
                critical: false,
                extn_value: OctetString::new(
                    CrlNumber(Uint::new(&Serial::new(crl_number).to_der_bytes())?).to_der()?,
                )?,
            }]),
        };

        let list = self.provider.sign_crl(tbs, issuer_key)?;
        let der = list.to_der()?;
        tracing::info!(
            issuer = %issuer.subject(),
            revoked = revoked.len(),
            %this_update,
            %next_update,
            "Generated CRL"
        );
        Ok(Crl { list, der })
    }

    /// CRL over everything `issuer` has issued, read from the ledger right now
    pub fn generate_from_ledger(
        &self,
        ledger: &RevocationLedger,
        issuer: &IssuedCertificate,
        issuer_key: &PKeyRef<Private>,
        validity: Duration,
    ) -> Result<Crl> {
        let snapshot = ledger.snapshot_issued_by(&issuer.subject().to_string());
        self.generate(&snapshot, issuer, issuer_key, Utc::now(), validity)
    }
}

/// Regenerates the CRL of one CA from the live ledger on demand
pub struct CrlPublisher {
    generator: CrlGenerator,
    ledger: Arc<RevocationLedger>,
    issuer: IssuedCertificate,
    issuer_key: PKey<Private>,
    validity: Duration,
}

impl CrlPublisher {
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        ledger: Arc<RevocationLedger>,
        issuer: IssuedCertificate,
        issuer_key: PKey<Private>,
        validity: Duration,
    ) -> Result<Self> {
        check_crl_issuer(&issuer, &issuer_key)?;
        Ok(CrlPublisher {
            generator: CrlGenerator::new(provider),
            ledger,
            issuer,
            issuer_key,
            validity,
        })
    }

    pub fn issuer(&self) -> &IssuedCertificate {
        &self.issuer
    }

    pub fn publish(&self) -> Result<Crl> {
        self.generator.generate_from_ledger(
            &self.ledger,
            &self.issuer,
            &self.issuer_key,
            self.validity,
        )
    }

    /// Publish and write the DER encoding to `path`
    pub fn publish_to(&self, path: &Path) -> Result<Crl> {
        let crl = self.publish()?;
        fs::write(path, crl.to_der())?;
        tracing::info!(path = %path.display(), "CRL written");
        Ok(crl)
    }
}

fn check_crl_issuer(issuer: &IssuedCertificate, issuer_key: &PKeyRef<Private>) -> Result<()> {
    if !issuer.is_ca() {
        return Err(PkiError::ExtensionPolicyViolation(format!(
            "CRL issuer {} is not a CA",
            issuer.subject()
        )));
    }
    if !issuer.extensions().permits_key_usage(KeyUsageFlag::CrlSign) {
        return Err(PkiError::ExtensionPolicyViolation(format!(
            "CRL issuer {} lacks cRLSign",
            issuer.subject()
        )));
    }
    if !issuer.x509().public_key()?.public_eq(issuer_key) {
        return Err(PkiError::SignatureVerification(
            "CRL signing key does not match the issuer certificate".to_string(),
        ));
    }
    Ok(())
}

fn reason_extension(reason: Option<RevocationReason>) -> Result<Option<Vec<Extension>>> {
    match reason {
        None | Some(RevocationReason::Unspecified) => Ok(None),
        Some(reason) => Ok(Some(vec![Extension {
            extn_id: CrlReason::OID,
            critical: false,
            extn_value: OctetString::new(reason.to_crl_reason().to_der()?)?,
        }])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca_signer::{CaSigner, ExtensionPolicy, Issuer};
    use crate::extensions::Extension as CertExtension;
    use crate::key_material::{KeyAlgorithm, KeyGenerator, KeyPolicy};
    use crate::provider::OpensslProvider;
    use crate::request::{RequestBuilder, SubjectDn};
    use chrono::TimeZone;

    fn ca(key_usage: &[KeyUsageFlag]) -> (IssuedCertificate, PKey<Private>, Arc<OpensslProvider>) {
        let provider = Arc::new(OpensslProvider::new());
        let key = KeyGenerator::new(provider.as_ref(), KeyPolicy::default())
            .generate(KeyAlgorithm::Ec, 256, None)
            .unwrap();
        let request = RequestBuilder::new(SubjectDn::new("alice CA"))
            .build(&key, None)
            .unwrap();
        let signer = CaSigner::new(provider.clone(), Arc::new(RevocationLedger::in_memory()));
        let private = key.private_key(None).unwrap();
        let cert = signer
            .self_sign(
                &request,
                &private,
                365,
                vec![
                    CertExtension::basic_constraints(true, true, None),
                    CertExtension::key_usage(true, key_usage),
                ],
            )
            .unwrap();
        (cert, private, provider)
    }

    fn entry(serial: u64, revoked: Option<(RevocationReason, DateTime<Utc>)>) -> LedgerEntry {
        let mut entry = LedgerEntry::issued(
            Serial::new(serial),
            format!("/CN=leaf {}", serial),
            "/CN=alice CA".to_string(),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        );
        if let Some((reason, at)) = revoked {
            entry.status = crate::ledger::CertificateStatus::Revoked;
            entry.revoked_at = Some(at);
            entry.reason = Some(reason);
        }
        entry
    }

    #[test]
    fn test_lists_exactly_revoked_entries() {
        let (cert, key, provider) = ca(&[KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign]);
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let snapshot = vec![
            entry(7, Some((RevocationReason::KeyCompromise, at))),
            entry(2, None),
            entry(3, Some((RevocationReason::Unspecified, at))),
        ];
        let this_update = Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();
        let crl = CrlGenerator::new(provider)
            .generate(&snapshot, &cert, &key, this_update, Duration::hours(24))
            .unwrap();

        crl.verify(&cert).unwrap();
        assert_eq!(
            crl.revoked_serials().unwrap(),
            vec![Serial::new(3), Serial::new(7)]
        );
        let entries = crl.entries().unwrap();
        assert_eq!(entries[0].reason, RevocationReason::Unspecified);
        assert_eq!(entries[1].reason, RevocationReason::KeyCompromise);
        assert_eq!(entries[1].revoked_at, at);
        assert_eq!(crl.this_update().unwrap(), this_update);
        assert_eq!(
            crl.next_update().unwrap(),
            Some(this_update + Duration::hours(24))
        );
        assert_eq!(
            crl.crl_number().unwrap(),
            Some(this_update.timestamp() as u64)
        );
    }

    #[test]
    fn test_openssl_parses_crl() {
        let (cert, key, provider) = ca(&[KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign]);
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let crl = CrlGenerator::new(provider)
            .generate(
                &[entry(5, Some((RevocationReason::Superseded, at)))],
                &cert,
                &key,
                Utc::now(),
                Duration::days(1),
            )
            .unwrap();
        let parsed = X509Crl::from_der(crl.to_der()).unwrap();
        assert!(parsed.verify(&cert.x509().public_key().unwrap()).unwrap());
        let revoked = parsed.get_revoked().unwrap();
        assert_eq!(revoked.len(), 1);
        assert!(String::from_utf8(crl.to_pem().unwrap())
            .unwrap()
            .starts_with("-----BEGIN X509 CRL-----"));
    }

    #[test]
    fn test_empty_snapshot_gives_empty_list() {
        let (cert, key, provider) = ca(&[KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign]);
        let crl = CrlGenerator::new(provider)
            .generate(&[entry(2, None)], &cert, &key, Utc::now(), Duration::days(1))
            .unwrap();
        assert!(crl.revoked_serials().unwrap().is_empty());
        crl.verify(&cert).unwrap();
    }

    #[test]
    fn test_issuer_without_crl_sign_rejected() {
        let (cert, key, provider) = ca(&[KeyUsageFlag::KeyCertSign]);
        let err = CrlGenerator::new(provider)
            .generate(&[], &cert, &key, Utc::now(), Duration::days(1))
            .unwrap_err();
        assert!(matches!(err, PkiError::ExtensionPolicyViolation(_)));
    }

    #[test]
    fn test_out_of_range_validity_rejected() {
        let (cert, key, provider) = ca(&[KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign]);
        let err = CrlGenerator::new(provider)
            .generate(
                &[entry(2, None)],
                &cert,
                &key,
                Utc::now(),
                Duration::hours(i64::from(u32::MAX)),
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::MalformedRequest(_)));
    }

    #[test]
    fn test_regeneration_is_deterministic_but_for_signature() {
        let (cert, key, provider) = ca(&[KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign]);
        let generator = CrlGenerator::new(provider);
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let snapshot = [entry(9, Some((RevocationReason::CaCompromise, at)))];
        let a = generator
            .generate(&snapshot, &cert, &key, at, Duration::days(1))
            .unwrap();
        let b = generator
            .generate(&snapshot, &cert, &key, at, Duration::days(1))
            .unwrap();
        assert_eq!(a.list.tbs_cert_list, b.list.tbs_cert_list);
    }

    #[test]
    fn test_leaf_issuer_cannot_sign_crl() {
        let provider = Arc::new(OpensslProvider::new());
        let ledger = Arc::new(RevocationLedger::in_memory());
        let signer = CaSigner::new(provider.clone(), ledger);
        let (root, root_key, _) = ca(&[KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign]);
        let leaf_key = KeyGenerator::new(provider.as_ref(), KeyPolicy::default())
            .generate(KeyAlgorithm::Ec, 256, None)
            .unwrap();
        let request = RequestBuilder::new(SubjectDn::new("alice Basic"))
            .build(&leaf_key, None)
            .unwrap();
        let leaf = signer
            .sign(
                &request,
                Issuer {
                    certificate: &root,
                    key: &root_key,
                },
                30,
                &ExtensionPolicy::Copy,
            )
            .unwrap();
        let err = CrlGenerator::new(provider)
            .generate(
                &[],
                &leaf,
                &leaf_key.private_key(None).unwrap(),
                Utc::now(),
                Duration::days(1),
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::ExtensionPolicyViolation(_)));
    }
}
