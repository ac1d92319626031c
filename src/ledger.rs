//! Revocation Ledger
//!
//! The ledger is the single source of truth for the lifecycle of every certificate the testbed
//! has issued. The CA signer records an entry per issued certificate, revocation flips an entry
//! from `valid` to `revoked`, and both the CRL generator and the OCSP responder only ever read
//! from it.
//!
//! # Consistency
//! - One writer at a time: every mutation takes the write lock of a [`RwLock`]
//! - A mutation is persisted through the [`LedgerStore`] *before* it becomes visible in memory;
//!   if persisting fails the in-memory state is left untouched
//! - Readers observe either the state before or after a mutation, never a partial one
//!
//! # Persistence
//! [`JsonLinesStore`] keeps one JSON record per serial and rewrites the whole file through a
//! temporary file and an atomic rename on each mutation. [`MemoryStore`] backs ephemeral
//! ledgers and tests.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use x509_cert::ext::pkix::CrlReason;
use x509_cert::serial_number::SerialNumber;

use crate::error::{PkiError, Result};

/// First serial handed out by an empty ledger
pub const FIRST_SERIAL: u64 = 1;

// ================= Serial numbers =================

/// Certificate serial number, unique within one ledger
///
/// Rendered as even-length upper-case hex (`0A`, `1F03`), the way OpenSSL prints serials.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Serial(u64);

impl Serial {
    pub const fn new(value: u64) -> Self {
        Serial(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// Minimal big-endian encoding of a positive DER INTEGER
    pub fn to_der_bytes(self) -> Vec<u8> {
        let raw = self.0.to_be_bytes();
        let first = raw.iter().position(|b| *b != 0).unwrap_or(raw.len() - 1);
        let mut bytes = Vec::with_capacity(9);
        if raw[first] & 0x80 != 0 {
            bytes.push(0);
        }
        bytes.extend_from_slice(&raw[first..]);
        bytes
    }

    /// Interpret big-endian INTEGER content bytes as a serial
    ///
    /// Returns `None` for empty input, negative values and values that do not fit in 64 bits;
    /// such serials can never have been issued by this ledger.
    pub fn from_der_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes[0] & 0x80 != 0 {
            return None;
        }
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let significant = &bytes[first..];
        if significant.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[8 - significant.len()..].copy_from_slice(significant);
        Some(Serial(u64::from_be_bytes(buf)))
    }

    pub fn to_serial_number(self) -> Result<SerialNumber> {
        Ok(SerialNumber::new(&self.to_der_bytes())?)
    }

    pub fn from_serial_number(serial: &SerialNumber) -> Option<Self> {
        Self::from_der_bytes(serial.as_bytes())
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = format!("{:X}", self.0);
        if hex.len() % 2 == 1 {
            write!(f, "0{}", hex)
        } else {
            f.write_str(&hex)
        }
    }
}

impl FromStr for Serial {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed)
            .replace(':', "");
        u64::from_str_radix(&hex, 16)
            .map(Serial)
            .map_err(|e| PkiError::MalformedRequest(format!("Invalid serial '{}': {}", s, e)))
    }
}

impl TryFrom<String> for Serial {
    type Error = PkiError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Serial> for String {
    fn from(serial: Serial) -> Self {
        serial.to_string()
    }
}

// ================= Entries =================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Valid,
    Revoked,
}

/// CRL reason codes (RFC 5280 section 5.3.1), named as OpenSSL names them
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    #[serde(rename = "CACompromise")]
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    PrivilegeWithdrawn,
    #[serde(rename = "AACompromise")]
    AaCompromise,
}

impl RevocationReason {
    pub const ALL: [RevocationReason; 9] = [
        RevocationReason::Unspecified,
        RevocationReason::KeyCompromise,
        RevocationReason::CaCompromise,
        RevocationReason::AffiliationChanged,
        RevocationReason::Superseded,
        RevocationReason::CessationOfOperation,
        RevocationReason::CertificateHold,
        RevocationReason::PrivilegeWithdrawn,
        RevocationReason::AaCompromise,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "keyCompromise",
            RevocationReason::CaCompromise => "CACompromise",
            RevocationReason::AffiliationChanged => "affiliationChanged",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessationOfOperation",
            RevocationReason::CertificateHold => "certificateHold",
            RevocationReason::PrivilegeWithdrawn => "privilegeWithdrawn",
            RevocationReason::AaCompromise => "AACompromise",
        }
    }

    pub fn to_crl_reason(self) -> CrlReason {
        match self {
            RevocationReason::Unspecified => CrlReason::Unspecified,
            RevocationReason::KeyCompromise => CrlReason::KeyCompromise,
            RevocationReason::CaCompromise => CrlReason::CaCompromise,
            RevocationReason::AffiliationChanged => CrlReason::AffiliationChanged,
            RevocationReason::Superseded => CrlReason::Superseded,
            RevocationReason::CessationOfOperation => CrlReason::CessationOfOperation,
            RevocationReason::CertificateHold => CrlReason::CertificateHold,
            RevocationReason::PrivilegeWithdrawn => CrlReason::PrivilegeWithdrawn,
            RevocationReason::AaCompromise => CrlReason::AaCompromise,
        }
    }

    /// `removeFromCRL` has no ledger counterpart: revocation is never undone
    pub fn from_crl_reason(reason: CrlReason) -> Option<Self> {
        match reason {
            CrlReason::Unspecified => Some(RevocationReason::Unspecified),
            CrlReason::KeyCompromise => Some(RevocationReason::KeyCompromise),
            CrlReason::CaCompromise => Some(RevocationReason::CaCompromise),
            CrlReason::AffiliationChanged => Some(RevocationReason::AffiliationChanged),
            CrlReason::Superseded => Some(RevocationReason::Superseded),
            CrlReason::CessationOfOperation => Some(RevocationReason::CessationOfOperation),
            CrlReason::CertificateHold => Some(RevocationReason::CertificateHold),
            CrlReason::PrivilegeWithdrawn => Some(RevocationReason::PrivilegeWithdrawn),
            CrlReason::AaCompromise => Some(RevocationReason::AaCompromise),
            CrlReason::RemoveFromCRL => None,
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RevocationReason {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        RevocationReason::ALL
            .into_iter()
            .find(|reason| reason.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PkiError::MalformedRequest(format!("Unknown revocation reason '{}'", s)))
    }
}

/// Lifecycle record for one issued certificate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub serial: Serial,
    pub subject: String,
    pub issuer: String,
    pub not_after: DateTime<Utc>,
    pub status: CertificateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RevocationReason>,
}

impl LedgerEntry {
    /// Entry for a freshly issued certificate
    pub fn issued(serial: Serial, subject: String, issuer: String, not_after: DateTime<Utc>) -> Self {
        LedgerEntry {
            serial,
            subject,
            issuer,
            not_after,
            status: CertificateStatus::Valid,
            revoked_at: None,
            reason: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.status == CertificateStatus::Revoked
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after < now
    }

    fn check_consistency(&self) -> std::result::Result<(), String> {
        match (self.status, self.revoked_at, self.reason) {
            (CertificateStatus::Valid, None, None) => Ok(()),
            (CertificateStatus::Revoked, Some(_), Some(_)) => Ok(()),
            (CertificateStatus::Valid, _, _) => Err(format!(
                "serial {} is valid but carries revocation data",
                self.serial
            )),
            (CertificateStatus::Revoked, _, _) => Err(format!(
                "serial {} is revoked without revocation time or reason",
                self.serial
            )),
        }
    }
}

// ================= Persistence =================

/// Repository behind a [`RevocationLedger`]
pub trait LedgerStore: Send + Sync {
    /// Load every persisted entry; unreadable state is [`PkiError::LedgerCorrupt`]
    fn load(&self) -> Result<Vec<LedgerEntry>>;

    /// Replace the persisted state with `entries`
    fn persist(&self, entries: &[LedgerEntry]) -> Result<()>;
}

/// One JSON object per line, rewritten atomically on every mutation
#[derive(Debug, Clone)]
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonLinesStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonLinesStore {
    fn load(&self) -> Result<Vec<LedgerEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| {
            PkiError::LedgerCorrupt(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: LedgerEntry = serde_json::from_str(line).map_err(|e| {
                PkiError::LedgerCorrupt(format!(
                    "{} line {}: {}",
                    self.path.display(),
                    index + 1,
                    e
                ))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn persist(&self, entries: &[LedgerEntry]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let temp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            for entry in entries {
                let line = serde_json::to_string(entry)
                    .map_err(|e| PkiError::Storage(std::io::Error::other(e)))?;
                writeln!(writer, "{}", line)?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| PkiError::Storage(e.error))?;
        Ok(())
    }
}

/// Volatile store; keeps the last persisted state for inspection
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<LedgerEntry>) -> Self {
        MemoryStore {
            entries: Mutex::new(entries),
        }
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.entries.lock().clone())
    }

    fn persist(&self, entries: &[LedgerEntry]) -> Result<()> {
        *self.entries.lock() = entries.to_vec();
        Ok(())
    }
}

// ================= Ledger =================

struct LedgerState {
    entries: BTreeMap<Serial, LedgerEntry>,
    /// `None` once the 64-bit serial space is used up
    next_serial: Option<u64>,
}

impl LedgerState {
    fn staged_with(&self, entry: LedgerEntry) -> BTreeMap<Serial, LedgerEntry> {
        let mut staged = self.entries.clone();
        staged.insert(entry.serial, entry);
        staged
    }
}

/// Serial-number → lifecycle map shared by the signer, the CRL generator and the responder
pub struct RevocationLedger {
    state: RwLock<LedgerState>,
    store: Box<dyn LedgerStore>,
}

impl RevocationLedger {
    /// Open a ledger over `store`, validating everything it holds
    ///
    /// Duplicate serials or entries with inconsistent revocation data are fatal: the ledger
    /// never starts from a state it cannot trust.
    pub fn open(store: impl LedgerStore + 'static) -> Result<Self> {
        let loaded = store.load()?;
        let mut entries = BTreeMap::new();
        for entry in loaded {
            entry.check_consistency().map_err(PkiError::LedgerCorrupt)?;
            let serial = entry.serial;
            if entries.insert(serial, entry).is_some() {
                return Err(PkiError::LedgerCorrupt(format!(
                    "serial {} appears more than once",
                    serial
                )));
            }
        }
        let next_serial = match entries.keys().next_back() {
            Some(max) => max.value().checked_add(1),
            None => Some(FIRST_SERIAL),
        };
        tracing::info!(entries = entries.len(), "Revocation ledger opened");

        Ok(RevocationLedger {
            state: RwLock::new(LedgerState {
                entries,
                next_serial,
            }),
            store: Box::new(store),
        })
    }

    /// Empty ledger that is never written to disk
    pub fn in_memory() -> Self {
        RevocationLedger {
            state: RwLock::new(LedgerState {
                entries: BTreeMap::new(),
                next_serial: Some(FIRST_SERIAL),
            }),
            store: Box::new(MemoryStore::new()),
        }
    }

    /// Hand out the next serial; serials are never handed out twice by one ledger
    pub fn allocate_serial(&self) -> Result<Serial> {
        let mut state = self.state.write();
        let mut candidate = state.next_serial.ok_or_else(|| {
            PkiError::SerialAllocation("serial number space exhausted".to_string())
        })?;
        while state.entries.contains_key(&Serial(candidate)) {
            candidate = candidate.checked_add(1).ok_or_else(|| {
                PkiError::SerialAllocation("serial number space exhausted".to_string())
            })?;
        }
        state.next_serial = candidate.checked_add(1);
        Ok(Serial(candidate))
    }

    /// Register a newly issued certificate
    pub fn record(&self, entry: LedgerEntry) -> Result<()> {
        entry
            .check_consistency()
            .map_err(PkiError::MalformedRequest)?;

        let mut state = self.state.write();
        if state.entries.contains_key(&entry.serial) {
            return Err(PkiError::DuplicateSerial(entry.serial));
        }
        let serial = entry.serial;
        let subject = entry.subject.clone();
        let staged = state.staged_with(entry);
        self.persist(&staged)?;

        state.entries = staged;
        if state.next_serial.is_some_and(|next| next <= serial.value()) {
            state.next_serial = serial.value().checked_add(1);
        }
        tracing::info!(%serial, %subject, "Recorded issued certificate");
        Ok(())
    }

    /// Mark `serial` revoked at `at`; the first revocation of a serial wins
    ///
    /// `at` is stored at whole-second precision, the resolution of CRL and OCSP times.
    pub fn revoke(&self, serial: Serial, reason: RevocationReason, at: DateTime<Utc>) -> Result<()> {
        let at = at.trunc_subsecs(0);
        let mut state = self.state.write();
        let entry = state
            .entries
            .get(&serial)
            .ok_or(PkiError::UnknownSerial(serial))?;

        if entry.is_revoked() {
            tracing::debug!(%serial, "Serial already revoked, keeping first revocation");
            return Ok(());
        }

        let mut revoked = entry.clone();
        revoked.status = CertificateStatus::Revoked;
        revoked.revoked_at = Some(at);
        revoked.reason = Some(reason);
        let staged = state.staged_with(revoked);
        self.persist(&staged)?;

        state.entries = staged;
        tracing::info!(%serial, %reason, revoked_at = %at, "Revoked certificate");
        Ok(())
    }

    pub fn status_of(&self, serial: Serial) -> Option<LedgerEntry> {
        self.state.read().entries.get(&serial).cloned()
    }

    /// Point-in-time copy of every entry, ordered by serial
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.state.read().entries.values().cloned().collect()
    }

    /// Point-in-time copy of the entries issued by `issuer`
    pub fn snapshot_issued_by(&self, issuer: &str) -> Vec<LedgerEntry> {
        self.state
            .read()
            .entries
            .values()
            .filter(|entry| entry.issuer == issuer)
            .cloned()
            .collect()
    }

    /// Most recently issued entry for `subject`
    pub fn find_by_subject(&self, subject: &str) -> Option<LedgerEntry> {
        self.state
            .read()
            .entries
            .values()
            .rev()
            .find(|entry| entry.subject == subject)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    fn persist(&self, staged: &BTreeMap<Serial, LedgerEntry>) -> Result<()> {
        let entries: Vec<LedgerEntry> = staged.values().cloned().collect();
        self.store.persist(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn issue(ledger: &RevocationLedger, subject: &str) -> Serial {
        let serial = ledger.allocate_serial().unwrap();
        ledger
            .record(LedgerEntry::issued(
                serial,
                subject.to_string(),
                "/CN=Test CA".to_string(),
                ts(2_000_000_000),
            ))
            .unwrap();
        serial
    }

    #[test]
    fn test_serial_hex_rendering() {
        assert_eq!(Serial::new(10).to_string(), "0A");
        assert_eq!(Serial::new(0x1F03).to_string(), "1F03");
        assert_eq!("0a".parse::<Serial>().unwrap(), Serial::new(10));
        assert_eq!("0x1F:03".parse::<Serial>().unwrap(), Serial::new(0x1F03));
        assert!("zz".parse::<Serial>().is_err());
    }

    #[test]
    fn test_serial_der_bytes() {
        assert_eq!(Serial::new(1).to_der_bytes(), vec![0x01]);
        assert_eq!(Serial::new(0x80).to_der_bytes(), vec![0x00, 0x80]);
        assert_eq!(Serial::new(0).to_der_bytes(), vec![0x00]);
        assert_eq!(Serial::from_der_bytes(&[0x00, 0x80]), Some(Serial::new(0x80)));
        assert_eq!(Serial::from_der_bytes(&[0xFF]), None);
        assert_eq!(Serial::from_der_bytes(&[0x01; 9]), None);
        assert_eq!(Serial::from_der_bytes(&[]), None);
    }

    #[test]
    fn test_serials_are_monotonic_and_unique() {
        let ledger = RevocationLedger::in_memory();
        let a = issue(&ledger, "/CN=a");
        let b = issue(&ledger, "/CN=b");
        assert_eq!(a, Serial::new(FIRST_SERIAL));
        assert!(b > a);
    }

    #[test]
    fn test_record_duplicate_serial_fails() {
        let ledger = RevocationLedger::in_memory();
        let serial = issue(&ledger, "/CN=a");
        let err = ledger
            .record(LedgerEntry::issued(
                serial,
                "/CN=b".to_string(),
                "/CN=Test CA".to_string(),
                ts(2_000_000_000),
            ))
            .unwrap_err();
        assert!(matches!(err, PkiError::DuplicateSerial(s) if s == serial));
        assert_eq!(ledger.status_of(serial).unwrap().subject, "/CN=a");
    }

    #[test]
    fn test_record_moves_allocator_past_external_serial() {
        let ledger = RevocationLedger::in_memory();
        ledger
            .record(LedgerEntry::issued(
                Serial::new(50),
                "/CN=x".to_string(),
                "/CN=Test CA".to_string(),
                ts(2_000_000_000),
            ))
            .unwrap();
        assert_eq!(ledger.allocate_serial().unwrap(), Serial::new(51));
    }

    #[test]
    fn test_revoke_unknown_serial() {
        let ledger = RevocationLedger::in_memory();
        let err = ledger
            .revoke(Serial::new(99), RevocationReason::KeyCompromise, ts(1))
            .unwrap_err();
        assert!(matches!(err, PkiError::UnknownSerial(s) if s == Serial::new(99)));
    }

    #[test]
    fn test_first_revocation_wins() {
        let ledger = RevocationLedger::in_memory();
        let serial = issue(&ledger, "/CN=b");
        let first = ts(1_700_000_000);
        ledger
            .revoke(serial, RevocationReason::KeyCompromise, first)
            .unwrap();
        ledger
            .revoke(serial, RevocationReason::Superseded, first + Duration::hours(5))
            .unwrap();

        let entry = ledger.status_of(serial).unwrap();
        assert_eq!(entry.status, CertificateStatus::Revoked);
        assert_eq!(entry.revoked_at, Some(first));
        assert_eq!(entry.reason, Some(RevocationReason::KeyCompromise));
    }

    #[test]
    fn test_revocation_time_kept_to_the_second() {
        let ledger = RevocationLedger::in_memory();
        let serial = issue(&ledger, "/CN=b");
        let at = Utc.timestamp_opt(1_700_000_000, 987_654_321).unwrap();
        ledger
            .revoke(serial, RevocationReason::KeyCompromise, at)
            .unwrap();
        assert_eq!(
            ledger.status_of(serial).unwrap().revoked_at,
            Some(ts(1_700_000_000))
        );
    }

    #[test]
    fn test_snapshot_is_ordered_and_filtered() {
        let ledger = RevocationLedger::in_memory();
        let a = issue(&ledger, "/CN=a");
        let b = issue(&ledger, "/CN=b");
        ledger
            .record(LedgerEntry::issued(
                ledger.allocate_serial().unwrap(),
                "/CN=c".to_string(),
                "/CN=Other CA".to_string(),
                ts(2_000_000_000),
            ))
            .unwrap();

        let serials: Vec<Serial> = ledger.snapshot().iter().map(|e| e.serial).collect();
        assert_eq!(serials.len(), 3);
        assert!(serials.windows(2).all(|w| w[0] < w[1]));

        let issued: Vec<Serial> = ledger
            .snapshot_issued_by("/CN=Test CA")
            .iter()
            .map(|e| e.serial)
            .collect();
        assert_eq!(issued, vec![a, b]);
    }

    #[test]
    fn test_json_lines_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger").join("index.jsonl");

        let (a, b) = {
            let ledger = RevocationLedger::open(JsonLinesStore::new(&path)).unwrap();
            let a = issue(&ledger, "/CN=a");
            let b = issue(&ledger, "/CN=b");
            ledger
                .revoke(b, RevocationReason::CessationOfOperation, ts(1_700_000_000))
                .unwrap();
            (a, b)
        };

        let reopened = RevocationLedger::open(JsonLinesStore::new(&path)).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.status_of(a).unwrap().status,
            CertificateStatus::Valid
        );
        let revoked = reopened.status_of(b).unwrap();
        assert_eq!(revoked.reason, Some(RevocationReason::CessationOfOperation));
        assert_eq!(revoked.revoked_at, Some(ts(1_700_000_000)));
        assert!(reopened.allocate_serial().unwrap() > b);
    }

    #[test]
    fn test_corrupt_ledger_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.jsonl");
        fs::write(&path, "{\"serial\":\"01\",\"subject\":\"/CN=a\"\nnot json\n").unwrap();
        let err = RevocationLedger::open(JsonLinesStore::new(&path)).err().unwrap();
        assert!(matches!(err, PkiError::LedgerCorrupt(_)));
    }

    #[test]
    fn test_duplicate_persisted_serial_is_fatal() {
        let entry = LedgerEntry::issued(
            Serial::new(1),
            "/CN=a".to_string(),
            "/CN=Test CA".to_string(),
            ts(2_000_000_000),
        );
        let store = MemoryStore::with_entries(vec![entry.clone(), entry]);
        let err = RevocationLedger::open(store).err().unwrap();
        assert!(matches!(err, PkiError::LedgerCorrupt(_)));
    }

    #[test]
    fn test_inconsistent_revocation_data_is_fatal() {
        let mut entry = LedgerEntry::issued(
            Serial::new(1),
            "/CN=a".to_string(),
            "/CN=Test CA".to_string(),
            ts(2_000_000_000),
        );
        entry.status = CertificateStatus::Revoked;
        let err = RevocationLedger::open(MemoryStore::with_entries(vec![entry]))
            .err()
            .unwrap();
        assert!(matches!(err, PkiError::LedgerCorrupt(_)));
    }

    #[test]
    fn test_concurrent_allocation_never_collides() {
        let ledger = Arc::new(RevocationLedger::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|j| issue(&ledger, &format!("/CN={}-{}", i, j)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<Serial> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 200);
        assert_eq!(ledger.len(), 200);
    }

    #[test]
    fn test_reason_names_round_trip() {
        for reason in RevocationReason::ALL {
            assert_eq!(reason.name().parse::<RevocationReason>().unwrap(), reason);
            assert_eq!(
                RevocationReason::from_crl_reason(reason.to_crl_reason()),
                Some(reason)
            );
        }
    }
}
