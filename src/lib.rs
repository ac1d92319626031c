//! PKI Testbed - Certificate Authority with CRL and OCSP revocation services
//!
//! Builds a three-tier X.509 hierarchy for lab exercises and keeps it alive: every certificate
//! the CA signs is tracked in a revocation ledger, from which CRLs are generated and OCSP
//! queries are answered.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed, CA:TRUE)
//!   └── Intermediate CA (signed by Root, pathlen=0)
//!       ├── Leaf certificates (CA:FALSE, extensions copied from the request)
//!       └── OCSP Responder (CA:FALSE, EKU OCSPSigning)
//! ```
//!
//! Data flows one way:
//!
//! ```text
//! KeyGenerator ─► RequestBuilder ─► CaSigner ─► RevocationLedger ─┬─► CrlGenerator
//!                                                                 └─► OcspResponder ─► server
//! ```
//!
//! # Module Overview
//!
//! ## [`key_material`]
//!
//! Key pair generation with a minimum-strength policy and optional passphrase protection.
//!
//! ## [`request`] and [`extensions`]
//!
//! Subject names, typed X.509v3 extensions and self-signed certificate signing requests.
//!
//! ## [`ca_signer`]
//!
//! Issues certificates from requests, allocating serials from the ledger.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pki_testbed::ca_signer::CaSigner;
//! use pki_testbed::extensions::{Extension, KeyUsageFlag};
//! use pki_testbed::key_material::{KeyAlgorithm, KeyGenerator, KeyPolicy};
//! use pki_testbed::ledger::RevocationLedger;
//! use pki_testbed::provider::{CryptoProvider, OpensslProvider};
//! use pki_testbed::request::{RequestBuilder, SubjectDn};
//!
//! # fn example() -> pki_testbed::error::Result<()> {
//! let provider: Arc<dyn CryptoProvider> = Arc::new(OpensslProvider::new());
//! let ledger = Arc::new(RevocationLedger::in_memory());
//! let signer = CaSigner::new(Arc::clone(&provider), Arc::clone(&ledger));
//!
//! let key = KeyGenerator::new(provider.as_ref(), KeyPolicy::default())
//!     .generate(KeyAlgorithm::Ec, 256, None)?;
//! let request = RequestBuilder::new(SubjectDn::new("Lab Root CA")).build(&key, None)?;
//! let root_key = key.private_key(None)?;
//! let root = signer.self_sign(
//!     &request,
//!     &root_key,
//!     365,
//!     vec![
//!         Extension::basic_constraints(true, true, None),
//!         Extension::key_usage(true, &[KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign]),
//!     ],
//! )?;
//! assert!(ledger.status_of(root.serial()).is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## [`ledger`]
//!
//! Serial → status map, persisted as JSON lines before any in-memory change.
//!
//! ## [`crl`] and [`ocsp_responder`]
//!
//! Signed CRLs and RFC 6960 OCSP responses computed from ledger snapshots.
//!
//! ## [`server`]
//!
//! Axum HTTP service in front of the responder (`POST /`, `GET /{base64}`, `GET /crl`).
//!
//! ## [`testbed`]
//!
//! The lab pipeline: builds the hierarchy for one task and writes it to
//! `{name}-{group}-{task}/`.
//!
//! # Error Handling
//!
//! Library operations return [`error::Result`] with a [`error::PkiError`] naming the failure
//! class. The configuration loader, the pipeline and the binary use `anyhow::Result`.

pub mod ca_signer;
pub mod certificate;
pub mod configs;
pub mod crl;
pub mod error;
pub mod extensions;
pub mod key_material;
pub mod ledger;
pub mod ocsp_responder;
pub mod ocsp_types;
pub mod provider;
pub mod request;
pub mod server;
pub mod testbed;
pub mod time;
