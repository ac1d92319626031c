#![allow(dead_code)]

use std::sync::Arc;

use chrono::Duration;
use openssl::pkey::{PKey, Private};
use pki_testbed::ca_signer::{CaSigner, ExtensionPolicy, Issuer};
use pki_testbed::certificate::IssuedCertificate;
use pki_testbed::extensions::{AltName, ExtendedKeyUsagePurpose, Extension, KeyUsageFlag};
use pki_testbed::key_material::{KeyAlgorithm, KeyGenerator, KeyPolicy};
use pki_testbed::ledger::RevocationLedger;
use pki_testbed::ocsp_responder::OcspResponder;
use pki_testbed::provider::{CryptoProvider, OpensslProvider};
use pki_testbed::request::{CertificateRequest, RequestBuilder, SubjectDn};

/// Root → intermediate hierarchy over an in-memory ledger, EC P-256 throughout
pub struct Hierarchy {
    pub provider: Arc<dyn CryptoProvider>,
    pub ledger: Arc<RevocationLedger>,
    pub signer: CaSigner,
    pub root: IssuedCertificate,
    pub root_key: PKey<Private>,
    pub intermediate: IssuedCertificate,
    pub intermediate_key: PKey<Private>,
}

pub fn subject(common_name: &str) -> SubjectDn {
    SubjectDn::new(common_name)
        .country("RU")
        .organization("testbed")
        .email("lab@example.ru")
}

pub fn ca_extensions(path_len: Option<u8>) -> Vec<Extension> {
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

pub fn leaf_extensions(dns: &str) -> Vec<Extension> {
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
        Extension::subject_alt_name(false, vec![AltName::Dns(dns.to_string())]),
    ]
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::with_algorithm(KeyAlgorithm::Ec, 256)
    }

    pub fn with_algorithm(algorithm: KeyAlgorithm, bits: u32) -> Self {
        let provider: Arc<dyn CryptoProvider> = Arc::new(OpensslProvider::new());
        let ledger = Arc::new(RevocationLedger::in_memory());
        let signer = CaSigner::new(Arc::clone(&provider), Arc::clone(&ledger));
        let generator = KeyGenerator::new(provider.as_ref(), KeyPolicy::default());

        let root_pair = generator.generate(algorithm, bits, None).unwrap();
        let root_request = RequestBuilder::new(subject("Test Root CA"))
            .build(&root_pair, None)
            .unwrap();
        let root_key = root_pair.private_key(None).unwrap();
        let root = signer
            .self_sign(&root_request, &root_key, 365, ca_extensions(None))
            .unwrap();

        let intermediate_pair = generator.generate(algorithm, bits, None).unwrap();
        let intermediate_request = RequestBuilder::new(subject("Test Intermediate CA"))
            .build(&intermediate_pair, None)
            .unwrap();
        let intermediate = signer
            .sign(
                &intermediate_request,
                Issuer {
                    certificate: &root,
                    key: &root_key,
                },
                180,
                &ExtensionPolicy::Explicit(ca_extensions(Some(0))),
            )
            .unwrap();
        let intermediate_key = intermediate_pair.private_key(None).unwrap();

        Hierarchy {
            provider,
            ledger,
            signer,
            root,
            root_key,
            intermediate,
            intermediate_key,
        }
    }

    pub fn request(&self, common_name: &str, extensions: Vec<Extension>) -> CertificateRequest {
        let pair = KeyGenerator::new(self.provider.as_ref(), KeyPolicy::default())
            .generate(KeyAlgorithm::Ec, 256, None)
            .unwrap();
        RequestBuilder::new(subject(common_name))
            .extensions(extensions)
            .build(&pair, None)
            .unwrap()
    }

    pub fn leaf(&self, common_name: &str) -> IssuedCertificate {
        let request = self.request(common_name, leaf_extensions("leaf.testbed.ru"));
        self.signer
            .sign(
                &request,
                self.intermediate_issuer(),
                30,
                &ExtensionPolicy::Copy,
            )
            .unwrap()
    }

    pub fn intermediate_issuer(&self) -> Issuer<'_> {
        Issuer {
            certificate: &self.intermediate,
            key: &self.intermediate_key,
        }
    }

    pub fn responder(&self) -> OcspResponder {
        let pair = KeyGenerator::new(self.provider.as_ref(), KeyPolicy::default())
            .generate(KeyAlgorithm::Ec, 256, None)
            .unwrap();
        let request = RequestBuilder::new(subject("Test OCSP Responder"))
            .extensions(vec![
                Extension::basic_constraints(false, false, None),
                Extension::key_usage(true, &[KeyUsageFlag::DigitalSignature]),
                Extension::extended_key_usage(false, &[ExtendedKeyUsagePurpose::OcspSigning]),
            ])
            .build(&pair, None)
            .unwrap();
        let cert = self
            .signer
            .sign(&request, self.intermediate_issuer(), 30, &ExtensionPolicy::Copy)
            .unwrap();
        OcspResponder::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.ledger),
            &self.intermediate,
            &cert,
            pair.private_key(None).unwrap(),
            Duration::minutes(10),
        )
        .unwrap()
    }
}
