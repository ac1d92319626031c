//! OCSP Responder
//!
//! Answers RFC 6960 status queries for certificates issued by one CA, reading the
//! [`RevocationLedger`] at the moment each query is processed. Responses are signed by a
//! delegated responder certificate (extendedKeyUsage `OCSPSigning`, issued by the served CA).
//!
//! # Query state machine
//! ```text
//! request DER ──decode──► malformed (unsigned malformedRequest)
//!      │
//!      └─► per CertID:
//!            hash algorithm / issuer hashes mismatch ─► unknown
//!            serial not in ledger, or issued by another CA ─► unknown
//!            revoked ─► revoked (revokedAt, reason)
//!            valid, notAfter passed ─► unknown
//!            valid ─► good
//! ```
//!
//! The responder also carries the client side used by the menu and the tests: building a
//! query for a serial and summarising a response.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use const_oid::db::rfc5912::{ID_SHA_1, ID_SHA_256};
use const_oid::db::rfc6960::ID_PKIX_OCSP_NONCE;
use const_oid::ObjectIdentifier;
use der::asn1::{Null, OctetString};
use der::{Decode, Encode};
use openssl::hash::{hash, MessageDigest};
use openssl::pkey::{PKey, Private};
use spki::AlgorithmIdentifierOwned;
use x509_cert::ext::Extension;
use x509_cert::name::Name;

use crate::ca_signer::CaSigner;
use crate::certificate::IssuedCertificate;
use crate::error::{PkiError, Result};
use crate::extensions::ExtendedKeyUsagePurpose;
use crate::ledger::{RevocationLedger, RevocationReason, Serial};
use crate::ocsp_types::{
    BasicOcspResponse, CertId, CertStatus, OcspRequest, OcspResponse, OcspResponseStatus, Request,
    ResponderId, ResponseData, RevokedInfo, SingleResponse, TbsRequest, Version,
};
use crate::provider::CryptoProvider;
use crate::time::{from_generalized_time, to_generalized_time};

/// DER of `OCSPResponse { responseStatus internalError }`, used when even encoding fails
const INTERNAL_ERROR_DER: [u8; 5] = [0x30, 0x03, 0x0a, 0x01, 0x02];

/// CertID hash algorithms the responder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertIdHash {
    Sha1,
    Sha256,
}

impl CertIdHash {
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            CertIdHash::Sha1 => ID_SHA_1,
            CertIdHash::Sha256 => ID_SHA_256,
        }
    }

    fn digest(self) -> MessageDigest {
        match self {
            CertIdHash::Sha1 => MessageDigest::sha1(),
            CertIdHash::Sha256 => MessageDigest::sha256(),
        }
    }

    fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [CertIdHash::Sha1, CertIdHash::Sha256]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }
}

/// Status of one certificate as answered by the responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Good,
    Revoked {
        revoked_at: DateTime<Utc>,
        reason: Option<RevocationReason>,
    },
    Unknown,
}

impl QueryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            QueryStatus::Good => "good",
            QueryStatus::Revoked { .. } => "revoked",
            QueryStatus::Unknown => "unknown",
        }
    }
}

/// Issuer name/key hashes for one hash algorithm
struct IssuerHashes {
    algorithm: CertIdHash,
    name_hash: Vec<u8>,
    key_hash: Vec<u8>,
}

impl IssuerHashes {
    fn compute(algorithm: CertIdHash, issuer: &IssuedCertificate) -> Result<Self> {
        Ok(IssuerHashes {
            algorithm,
            name_hash: hash(algorithm.digest(), &issuer.subject_name_der()?)?.to_vec(),
            key_hash: hash(algorithm.digest(), &issuer.public_key_bits()?)?.to_vec(),
        })
    }
}

/// Delegated responder for a single CA
pub struct OcspResponder {
    provider: Arc<dyn CryptoProvider>,
    ledger: Arc<RevocationLedger>,
    ca_subject: String,
    issuer_hashes: Vec<IssuerHashes>,
    responder_name: Name,
    responder_cert: x509_cert::Certificate,
    responder_key: PKey<Private>,
    next_update_window: Duration,
}

impl OcspResponder {
    /// Build a responder for `ca`, signing with `responder_cert`/`responder_key`
    ///
    /// The responder certificate must be issued by `ca`, carry the OCSPSigning purpose and
    /// match `responder_key`.
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        ledger: Arc<RevocationLedger>,
        ca: &IssuedCertificate,
        responder_cert: &IssuedCertificate,
        responder_key: PKey<Private>,
        next_update_window: Duration,
    ) -> Result<Self> {
        if !responder_cert
            .extensions()
            .has_extended_key_usage(ExtendedKeyUsagePurpose::OcspSigning)
        {
            return Err(PkiError::ExtensionPolicyViolation(format!(
                "responder certificate {} lacks the OCSPSigning purpose",
                responder_cert.subject()
            )));
        }
        CaSigner::verify_issued(responder_cert, ca)?;
        if !responder_cert.x509().public_key()?.public_eq(&responder_key) {
            return Err(PkiError::SignatureVerification(
                "responder key does not match the responder certificate".to_string(),
            ));
        }

        let issuer_hashes = vec![
            IssuerHashes::compute(CertIdHash::Sha1, ca)?,
            IssuerHashes::compute(CertIdHash::Sha256, ca)?,
        ];
        tracing::info!(
            ca = %ca.subject(),
            responder = %responder_cert.subject(),
            "OCSP responder ready"
        );

        Ok(OcspResponder {
            provider,
            ledger,
            ca_subject: ca.subject().to_string(),
            issuer_hashes,
            responder_name: Name::from_der(&responder_cert.subject_name_der()?)?,
            responder_cert: responder_cert.to_x509_cert()?,
            responder_key,
            next_update_window,
        })
    }

    pub fn ledger(&self) -> &Arc<RevocationLedger> {
        &self.ledger
    }

    /// Answer a DER-encoded query; the result is always a DER `OCSPResponse`
    pub fn respond(&self, request_der: &[u8]) -> Vec<u8> {
        self.respond_at(request_der, Utc::now())
    }

    pub fn respond_at(&self, request_der: &[u8], now: DateTime<Utc>) -> Vec<u8> {
        let response = match self.answer(request_der, now) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build OCSP response");
                OcspResponse::error(OcspResponseStatus::InternalError)
            }
        };
        response
            .to_der()
            .unwrap_or_else(|_| INTERNAL_ERROR_DER.to_vec())
    }

    fn answer(&self, request_der: &[u8], now: DateTime<Utc>) -> Result<OcspResponse> {
        let request = match OcspRequest::from_der(request_der) {
            Ok(request) if !request.tbs_request.request_list.is_empty() => request,
            Ok(_) => {
                tracing::info!(outcome = "malformed", "OCSP request carries no CertID");
                return Ok(OcspResponse::error(OcspResponseStatus::MalformedRequest));
            }
            Err(e) => {
                tracing::info!(outcome = "malformed", error = %e, "Undecodable OCSP request");
                return Ok(OcspResponse::error(OcspResponseStatus::MalformedRequest));
            }
        };

        let now = now.trunc_subsecs(0);
        let produced_at = to_generalized_time(now)?;
        let next_update = to_generalized_time(now + self.next_update_window)?;

        let mut responses = Vec::with_capacity(request.tbs_request.request_list.len());
        for single in &request.tbs_request.request_list {
            let status = self.status_for(&single.req_cert, now);
            responses.push(SingleResponse {
                cert_id: single.req_cert.clone(),
                cert_status: to_cert_status(&status)?,
                this_update: produced_at,
                next_update: Some(next_update),
                single_extensions: None,
            });
        }

        let data = ResponseData {
            version: Version::V1,
            responder_id: ResponderId::ByName(self.responder_name.clone()),
            produced_at,
            responses,
            response_extensions: request.nonce().map(|nonce| vec![nonce.clone()]),
        };
        let basic = self.provider.sign_ocsp_response(
            data,
            &self.responder_key,
            vec![self.responder_cert.clone()],
        )?;
        Ok(OcspResponse::successful(&basic)?)
    }

    /// Decide the status of one CertID against the ledger as it is now
    pub fn status_for(&self, cert_id: &CertId, now: DateTime<Utc>) -> QueryStatus {
        let serial = Serial::from_serial_number(&cert_id.serial_number);
        let status = self.lookup(cert_id, serial, now);
        match serial {
            Some(serial) => {
                tracing::info!(%serial, outcome = status.label(), "OCSP query answered")
            }
            None => tracing::info!(outcome = status.label(), "OCSP query for foreign serial"),
        }
        status
    }

    fn lookup(&self, cert_id: &CertId, serial: Option<Serial>, now: DateTime<Utc>) -> QueryStatus {
        let Some(algorithm) = CertIdHash::from_oid(&cert_id.hash_algorithm.oid) else {
            return QueryStatus::Unknown;
        };
        let issuer_matches = self.issuer_hashes.iter().any(|hashes| {
            hashes.algorithm == algorithm
                && hashes.name_hash == cert_id.issuer_name_hash.as_bytes()
                && hashes.key_hash == cert_id.issuer_key_hash.as_bytes()
        });
        if !issuer_matches {
            return QueryStatus::Unknown;
        }

        let Some(entry) = serial.and_then(|serial| self.ledger.status_of(serial)) else {
            return QueryStatus::Unknown;
        };
        if entry.issuer != self.ca_subject {
            return QueryStatus::Unknown;
        }
        match (entry.is_revoked(), entry.revoked_at) {
            (true, Some(revoked_at)) => QueryStatus::Revoked {
                revoked_at,
                reason: entry.reason,
            },
            (true, None) => QueryStatus::Unknown,
            (false, _) if entry.is_expired_at(now) => QueryStatus::Unknown,
            (false, _) => QueryStatus::Good,
        }
    }
}

fn to_cert_status(status: &QueryStatus) -> Result<CertStatus> {
    Ok(match status {
        QueryStatus::Good => CertStatus::Good(Null),
        QueryStatus::Unknown => CertStatus::Unknown(Null),
        QueryStatus::Revoked { revoked_at, reason } => CertStatus::Revoked(RevokedInfo {
            revocation_time: to_generalized_time(*revoked_at)?,
            revocation_reason: reason.map(RevocationReason::to_crl_reason),
        }),
    })
}

// ================= Client side =================

/// Build a query for `serials` issued by `issuer`, optionally carrying a nonce
pub fn build_request(
    issuer: &IssuedCertificate,
    serials: &[Serial],
    algorithm: CertIdHash,
    nonce: Option<&[u8]>,
) -> Result<OcspRequest> {
    let hashes = IssuerHashes::compute(algorithm, issuer)?;
    let mut request_list = Vec::with_capacity(serials.len());
    for serial in serials {
        request_list.push(Request {
            req_cert: CertId {
                hash_algorithm: AlgorithmIdentifierOwned {
                    oid: algorithm.oid(),
                    parameters: None,
                },
                issuer_name_hash: OctetString::new(hashes.name_hash.clone())?,
                issuer_key_hash: OctetString::new(hashes.key_hash.clone())?,
                serial_number: serial.to_serial_number()?,
            },
            single_request_extensions: None,
        });
    }
    let request_extensions = match nonce {
        Some(nonce) => Some(vec![Extension {
            extn_id: ID_PKIX_OCSP_NONCE,
            critical: false,
            extn_value: OctetString::new(OctetString::new(nonce)?.to_der()?)?,
        }]),
        None => None,
    };

    Ok(OcspRequest {
        tbs_request: TbsRequest {
            version: Version::V1,
            requestor_name: None,
            request_list,
            request_extensions,
        },
        optional_signature: None,
    })
}

/// One answered CertID in a decoded response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub serial: Option<Serial>,
    pub status: QueryStatus,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
}

/// Decoded view of an `OCSPResponse`
#[derive(Debug, Clone)]
pub struct ResponseSummary {
    pub status: OcspResponseStatus,
    pub produced_at: Option<DateTime<Utc>>,
    pub answers: Vec<Answer>,
    /// Raw `extnValue` of the echoed nonce extension
    pub nonce: Option<Vec<u8>>,
    pub basic: Option<BasicOcspResponse>,
}

impl ResponseSummary {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let response = OcspResponse::from_der(der)?;
        let Some(basic) = response.basic_response()? else {
            return Ok(ResponseSummary {
                status: response.response_status,
                produced_at: None,
                answers: Vec::new(),
                nonce: None,
                basic: None,
            });
        };

        let data = &basic.tbs_response_data;
        let mut answers = Vec::with_capacity(data.responses.len());
        for single in &data.responses {
            let status = match &single.cert_status {
                CertStatus::Good(_) => QueryStatus::Good,
                CertStatus::Unknown(_) => QueryStatus::Unknown,
                CertStatus::Revoked(info) => QueryStatus::Revoked {
                    revoked_at: from_generalized_time(info.revocation_time)?,
                    reason: info
                        .revocation_reason
                        .and_then(RevocationReason::from_crl_reason),
                },
            };
            answers.push(Answer {
                serial: Serial::from_serial_number(&single.cert_id.serial_number),
                status,
                this_update: from_generalized_time(single.this_update)?,
                next_update: single.next_update.map(from_generalized_time).transpose()?,
            });
        }
        let nonce = data
            .response_extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == ID_PKIX_OCSP_NONCE)
            .map(|ext| ext.extn_value.as_bytes().to_vec());

        Ok(ResponseSummary {
            status: response.response_status,
            produced_at: Some(from_generalized_time(data.produced_at)?),
            answers,
            nonce,
            basic: Some(basic),
        })
    }

    pub fn status_of(&self, serial: Serial) -> Option<&QueryStatus> {
        self.answers
            .iter()
            .find(|answer| answer.serial == Some(serial))
            .map(|answer| &answer.status)
    }
}
