//! Testbed pipeline
//!
//! Builds the three-tier hierarchy for one lab task and lays it out on disk:
//!
//! ```text
//! {name}-{group}-{task}/
//!   {name}-{group}-ca.{key,crt}          Root CA, passphrase-protected key
//!   {name}-{group}-intr.{key,crt}        Intermediate CA (pathlen 0), passphrase-protected key
//!   task 1: basic
//!   task 2: crl-valid, crl-revoked, {name}-{group}.crl
//!   task 3: ocsp-resp (protected key), ocsp-valid, ocsp-revoked
//! ```
//!
//! Leaves are signed by the intermediate with the Copy policy; the `*-revoked` leaves are
//! revoked in the ledger as soon as they are issued. A later run against a non-empty ledger
//! reloads the CA and responder material from the work directory instead of rebuilding it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use openssl::pkey::{PKey, Private};
use secrecy::SecretString;

use crate::ca_signer::{CaSigner, ExtensionPolicy, Issuer};
use crate::certificate::IssuedCertificate;
use crate::configs::AppConfig;
use crate::crl::CrlPublisher;
use crate::extensions::{AltName, ExtendedKeyUsagePurpose, Extension, KeyUsageFlag};
use crate::key_material::{KeyGenerator, KeyPair};
use crate::ledger::{RevocationLedger, RevocationReason};
use crate::ocsp_responder::OcspResponder;
use crate::provider::CryptoProvider;
use crate::request::{RequestBuilder, SubjectDn};

const ROOT_LABEL: &str = "ca";
const INTERMEDIATE_LABEL: &str = "intr";
const RESPONDER_LABEL: &str = "ocsp-resp";

/// One certificate written by the pipeline
#[derive(Debug, Clone)]
pub struct TestbedEntry {
    pub label: String,
    pub certificate: IssuedCertificate,
    pub revoked: bool,
}

pub struct Testbed {
    provider: Arc<dyn CryptoProvider>,
    ledger: Arc<RevocationLedger>,
    work_dir: PathBuf,
    root: IssuedCertificate,
    intermediate: IssuedCertificate,
    intermediate_key: PKey<Private>,
    responder: Option<(IssuedCertificate, PKey<Private>)>,
    entries: Vec<TestbedEntry>,
}

impl Testbed {
    /// Build a fresh testbed when the ledger is empty, otherwise reload the existing one
    pub fn open(
        config: &AppConfig,
        provider: Arc<dyn CryptoProvider>,
        ledger: Arc<RevocationLedger>,
    ) -> Result<Self> {
        if ledger.is_empty() {
            Self::build(config, provider, ledger)
        } else {
            Self::load(config, provider, ledger)
        }
    }

    /// Generate every key and certificate of the configured task into a recreated work dir
    pub fn build(
        config: &AppConfig,
        provider: Arc<dyn CryptoProvider>,
        ledger: Arc<RevocationLedger>,
    ) -> Result<Self> {
        let task = config.task.number;
        if !(1..=3).contains(&task) {
            bail!("Unknown task number {} (expected 1, 2 or 3)", task);
        }

        let work_dir = config.work_dir();
        if work_dir.exists() {
            fs::remove_dir_all(&work_dir).context(format!(
                "Failed to remove work directory {}",
                work_dir.display()
            ))?;
        }
        fs::create_dir_all(&work_dir).context(format!(
            "Failed to create work directory {}",
            work_dir.display()
        ))?;
        tracing::info!(work_dir = %work_dir.display(), task, "Building testbed");

        let passphrase = SecretString::from(config.user.ca_passphrase());
        let signer = CaSigner::new(Arc::clone(&provider), Arc::clone(&ledger));
        let key_provider = Arc::clone(&provider);
        let generator = KeyGenerator::new(key_provider.as_ref(), config.policy.key_policy());
        let algorithm = config.policy.algorithm;
        let writer = PemWriter::new(&work_dir, &config.user.file_prefix());

        // ================= Root CA =================
        let root_pair = generator
            .generate(algorithm, config.task.ca_key_bits, Some(&passphrase))
            .map_err(|e| anyhow!("Failed to generate root key: {}", e))?;
        let root_request = RequestBuilder::new(subject(config, "CA"))
            .build(&root_pair, Some(&passphrase))
            .map_err(|e| anyhow!("Failed to build root request: {}", e))?;
        let root_key = root_pair.private_key(Some(&passphrase))?;
        let root = signer
            .self_sign(
                &root_request,
                &root_key,
                config.task.ca_validity_days,
                ca_extensions(None),
            )
            .map_err(|e| anyhow!("Failed to self-sign root CA: {}", e))?;
        writer.write(ROOT_LABEL, &root_pair, &root)?;

        // ================= Intermediate CA =================
        let intermediate_pair = generator
            .generate(algorithm, config.task.intermediate_key_bits, Some(&passphrase))
            .map_err(|e| anyhow!("Failed to generate intermediate key: {}", e))?;
        let intermediate_request = RequestBuilder::new(subject(config, "Intermediate CA"))
            .build(&intermediate_pair, Some(&passphrase))
            .map_err(|e| anyhow!("Failed to build intermediate request: {}", e))?;
        let intermediate = signer
            .sign(
                &intermediate_request,
                Issuer {
                    certificate: &root,
                    key: &root_key,
                },
                config.task.intermediate_validity_days,
                &ExtensionPolicy::Explicit(ca_extensions(Some(0))),
            )
            .map_err(|e| anyhow!("Failed to sign intermediate CA: {}", e))?;
        writer.write(INTERMEDIATE_LABEL, &intermediate_pair, &intermediate)?;
        let intermediate_key = intermediate_pair.private_key(Some(&passphrase))?;

        let mut testbed = Testbed {
            provider,
            ledger,
            work_dir,
            root,
            intermediate,
            intermediate_key,
            responder: None,
            entries: Vec::new(),
        };

        let leaf = LeafIssuer {
            config,
            generator: &generator,
            signer: &signer,
            writer: &writer,
        };
        match task {
            1 => {
                let names = vec![
                    AltName::Dns(format!("basic.{}.ru", config.user.name)),
                    AltName::Dns(format!("basic.{}.com", config.user.name)),
                ];
                let cert = leaf.issue(&testbed, "basic", "Basic", leaf_extensions(names))?;
                testbed.push("basic", cert, false);
            }
            2 => {
                let crl_url = config.crl_url();
                for (label, cn, dns, revoked) in [
                    ("crl-valid", "CRL Valid", "crl.valid", false),
                    ("crl-revoked", "CRL Revoked", "crl.revoked", true),
                ] {
                    let mut extensions = leaf_extensions(vec![AltName::Dns(format!(
                        "{}.{}.ru",
                        dns, config.user.name
                    ))]);
                    extensions.push(Extension::crl_distribution_point(&crl_url));
                    let cert = leaf.issue(&testbed, label, cn, extensions)?;
                    testbed.push(label, cert, revoked);
                }
                testbed.revoke_marked()?;
                testbed
                    .crl_publisher(config)?
                    .publish_to(&config.crl_output())
                    .map_err(|e| anyhow!("Failed to write CRL: {}", e))?;
            }
            _ => {
                let responder_extensions = vec![
                    Extension::basic_constraints(false, false, None),
                    Extension::key_usage(true, &[KeyUsageFlag::DigitalSignature]),
                    Extension::extended_key_usage(false, &[ExtendedKeyUsagePurpose::OcspSigning]),
                ];
                let (responder_pair, responder_cert) = leaf.issue_with_key(
                    &testbed,
                    RESPONDER_LABEL,
                    "OCSP Responder",
                    responder_extensions,
                    Some(&passphrase),
                )?;
                let responder_key = responder_pair.private_key(Some(&passphrase))?;
                testbed.responder = Some((responder_cert, responder_key));

                let ocsp_url = config.ocsp_url();
                for (label, cn, dns, revoked) in [
                    ("ocsp-valid", "OCSP Valid", "ocsp.valid", false),
                    ("ocsp-revoked", "OCSP Revoked", "ocsp.revoked", true),
                ] {
                    let mut extensions = leaf_extensions(vec![AltName::Dns(format!(
                        "{}.{}.ru",
                        dns, config.user.name
                    ))]);
                    extensions.push(Extension::ocsp_responder(&ocsp_url));
                    let cert = leaf.issue(&testbed, label, cn, extensions)?;
                    testbed.push(label, cert, revoked);
                }
                testbed.revoke_marked()?;
            }
        }

        tracing::info!(
            certificates = testbed.ledger.len(),
            work_dir = %testbed.work_dir.display(),
            "Testbed ready"
        );
        Ok(testbed)
    }

    /// Reload the CA and responder material written by an earlier [`build`](Self::build)
    pub fn load(
        config: &AppConfig,
        provider: Arc<dyn CryptoProvider>,
        ledger: Arc<RevocationLedger>,
    ) -> Result<Self> {
        let work_dir = config.work_dir();
        let prefix = config.user.file_prefix();
        let passphrase = SecretString::from(config.user.ca_passphrase());

        let root = read_certificate(&work_dir, &prefix, ROOT_LABEL)?;
        let intermediate = read_certificate(&work_dir, &prefix, INTERMEDIATE_LABEL)?;
        let intermediate_key = read_key(&work_dir, &prefix, INTERMEDIATE_LABEL, &passphrase)?;
        let responder = if pem_path(&work_dir, &prefix, RESPONDER_LABEL, "crt").exists() {
            Some((
                read_certificate(&work_dir, &prefix, RESPONDER_LABEL)?,
                read_key(&work_dir, &prefix, RESPONDER_LABEL, &passphrase)?,
            ))
        } else {
            None
        };

        for (cert, issuer) in [(&root, &root), (&intermediate, &root)] {
            CaSigner::verify_issued(cert, issuer)
                .map_err(|e| anyhow!("Stored hierarchy is inconsistent: {}", e))?;
            if ledger.status_of(cert.serial()).is_none() {
                bail!(
                    "Certificate {} ({}) is not in the ledger",
                    cert.serial(),
                    cert.subject()
                );
            }
        }

        tracing::info!(work_dir = %work_dir.display(), "Loaded existing testbed");
        Ok(Testbed {
            provider,
            ledger,
            work_dir,
            root,
            intermediate,
            intermediate_key,
            responder,
            entries: Vec::new(),
        })
    }

    pub fn ledger(&self) -> &Arc<RevocationLedger> {
        &self.ledger
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn root(&self) -> &IssuedCertificate {
        &self.root
    }

    pub fn intermediate(&self) -> &IssuedCertificate {
        &self.intermediate
    }

    pub fn responder_certificate(&self) -> Option<&IssuedCertificate> {
        self.responder.as_ref().map(|(cert, _)| cert)
    }

    /// Leaves issued by this run; empty after [`load`](Self::load)
    pub fn entries(&self) -> &[TestbedEntry] {
        &self.entries
    }

    pub fn entry(&self, label: &str) -> Option<&TestbedEntry> {
        self.entries.iter().find(|entry| entry.label == label)
    }

    /// CRL publisher for the intermediate CA, which signs every leaf
    pub fn crl_publisher(&self, config: &AppConfig) -> Result<CrlPublisher> {
        CrlPublisher::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.ledger),
            self.intermediate.clone(),
            self.intermediate_key.clone(),
            Duration::hours(i64::from(config.crl.validity_hours)),
        )
        .map_err(|e| anyhow!("Failed to set up CRL publisher: {}", e))
    }

    /// OCSP responder for the intermediate CA; `None` when no responder certificate exists
    pub fn ocsp_responder(&self, config: &AppConfig) -> Result<Option<OcspResponder>> {
        let Some((cert, key)) = &self.responder else {
            return Ok(None);
        };
        let responder = OcspResponder::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.ledger),
            &self.intermediate,
            cert,
            key.clone(),
            Duration::minutes(i64::from(config.responder.next_update_minutes)),
        )
        .map_err(|e| anyhow!("Failed to set up OCSP responder: {}", e))?;
        Ok(Some(responder))
    }

    fn push(&mut self, label: &str, certificate: IssuedCertificate, revoked: bool) {
        self.entries.push(TestbedEntry {
            label: label.to_string(),
            certificate,
            revoked,
        });
    }

    fn revoke_marked(&self) -> Result<()> {
        let now = Utc::now();
        for entry in self.entries.iter().filter(|entry| entry.revoked) {
            self.ledger
                .revoke(
                    entry.certificate.serial(),
                    RevocationReason::KeyCompromise,
                    now,
                )
                .map_err(|e| anyhow!("Failed to revoke {}: {}", entry.label, e))?;
        }
        Ok(())
    }
}

struct PemWriter {
    work_dir: PathBuf,
    prefix: String,
}

impl PemWriter {
    fn new(work_dir: &Path, prefix: &str) -> Self {
        PemWriter {
            work_dir: work_dir.to_path_buf(),
            prefix: prefix.to_string(),
        }
    }

    fn write(&self, label: &str, key: &KeyPair, cert: &IssuedCertificate) -> Result<()> {
        let key_path = pem_path(&self.work_dir, &self.prefix, label, "key");
        let cert_path = pem_path(&self.work_dir, &self.prefix, label, "crt");
        fs::write(&key_path, key.private_key_pem()?)
            .context(format!("Failed to write {}", key_path.display()))?;
        fs::write(&cert_path, cert.to_pem()?)
            .context(format!("Failed to write {}", cert_path.display()))?;
        tracing::debug!(label, serial = %cert.serial(), "Wrote key and certificate");
        Ok(())
    }
}

struct LeafIssuer<'a> {
    config: &'a AppConfig,
    generator: &'a KeyGenerator<'a>,
    signer: &'a CaSigner,
    writer: &'a PemWriter,
}

impl LeafIssuer<'_> {
    fn issue(
        &self,
        testbed: &Testbed,
        label: &str,
        common_name: &str,
        extensions: Vec<Extension>,
    ) -> Result<IssuedCertificate> {
        let (_, cert) = self.issue_with_key(testbed, label, common_name, extensions, None)?;
        Ok(cert)
    }

    fn issue_with_key(
        &self,
        testbed: &Testbed,
        label: &str,
        common_name: &str,
        extensions: Vec<Extension>,
        passphrase: Option<&SecretString>,
    ) -> Result<(KeyPair, IssuedCertificate)> {
        let pair = self
            .generator
            .generate(
                self.config.policy.algorithm,
                self.config.task.leaf_key_bits,
                passphrase,
            )
            .map_err(|e| anyhow!("Failed to generate {} key: {}", label, e))?;
        let request = RequestBuilder::new(subject(self.config, common_name))
            .extensions(extensions)
            .build(&pair, passphrase)
            .map_err(|e| anyhow!("Failed to build {} request: {}", label, e))?;
        let cert = self
            .signer
            .sign(
                &request,
                Issuer {
                    certificate: &testbed.intermediate,
                    key: &testbed.intermediate_key,
                },
                self.config.task.leaf_validity_days,
                &ExtensionPolicy::Copy,
            )
            .map_err(|e| anyhow!("Failed to sign {}: {}", label, e))?;
        self.writer.write(label, &pair, &cert)?;
        Ok((pair, cert))
    }
}

/// `/C=../ST=../L=../O={name}/OU={name} P1_{task}/CN={name} {role}/emailAddress={email}`
fn subject(config: &AppConfig, role: &str) -> SubjectDn {
    let user = &config.user;
    SubjectDn::new(format!("{} {}", user.name, role))
        .country(user.country.clone())
        .state(user.state.clone())
        .locality(user.locality.clone())
        .organization(user.name.clone())
        .organizational_unit(format!("{} P1_{}", user.name, config.task.number))
        .email(user.email.clone())
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

fn leaf_extensions(names: Vec<AltName>) -> Vec<Extension> {
    vec![
        Extension::basic_constraints(false, false, None),
        Extension::key_usage(true, &[KeyUsageFlag::DigitalSignature]),
        Extension::extended_key_usage(
            true,
            &[
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
        ),
        Extension::subject_alt_name(false, names),
    ]
}

fn pem_path(work_dir: &Path, prefix: &str, label: &str, extension: &str) -> PathBuf {
    work_dir.join(format!("{}-{}.{}", prefix, label, extension))
}

fn read_certificate(work_dir: &Path, prefix: &str, label: &str) -> Result<IssuedCertificate> {
    let path = pem_path(work_dir, prefix, label, "crt");
    let pem = fs::read(&path).context(format!("Failed to read {}", path.display()))?;
    IssuedCertificate::from_pem(&pem).map_err(|e| anyhow!("{}: {}", path.display(), e))
}

fn read_key(
    work_dir: &Path,
    prefix: &str,
    label: &str,
    passphrase: &SecretString,
) -> Result<PKey<Private>> {
    let path = pem_path(work_dir, prefix, label, "key");
    let pem = fs::read(&path).context(format!("Failed to read {}", path.display()))?;
    let pair = KeyPair::from_pem(&pem, Some(passphrase))
        .map_err(|e| anyhow!("{}: {}", path.display(), e))?;
    Ok(pair.private_key(Some(passphrase))?)
}
