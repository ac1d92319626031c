//! Error types shared by the PKI core.
//!
//! Library functions return [`Result<T>`](Result); the binary and the testbed pipeline wrap
//! these in `anyhow` with context at the edges.

use thiserror::Error;

use crate::ledger::Serial;

/// Errors raised by key generation, issuance, the ledger and the status services
#[derive(Error, Debug)]
pub enum PkiError {
    /// Requested key length is below the configured policy floor
    #[error("Weak key: {algorithm} key of {bits} bits is below the minimum of {minimum} bits")]
    WeakKey {
        algorithm: String,
        bits: u32,
        minimum: u32,
    },

    /// Unsupported algorithm/length combination
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    /// Wrong or missing passphrase for encrypted key material
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Invalid subject name, extension value or CSR encoding
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Issuer or issued extensions break the CA policy (CA flag, pathlen, key usage)
    #[error("Extension policy violation: {0}")]
    ExtensionPolicyViolation(String),

    /// No collision-free serial could be allocated
    #[error("Serial allocation error: {0}")]
    SerialAllocation(String),

    /// A ledger entry with this serial already exists
    #[error("Duplicate serial: {0}")]
    DuplicateSerial(Serial),

    /// No ledger entry with this serial
    #[error("Unknown serial: {0}")]
    UnknownSerial(Serial),

    /// Issuer/subject signature relationship does not hold
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// OCSP query did not complete in time
    #[error("Responder timed out after {0} ms")]
    ResponderTimeout(u64),

    /// Persisted ledger cannot be trusted
    #[error("Ledger corrupt: {0}")]
    LedgerCorrupt(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("Encoding error: {0}")]
    Encoding(#[from] der::Error),
}

pub type Result<T> = std::result::Result<T, PkiError>;
