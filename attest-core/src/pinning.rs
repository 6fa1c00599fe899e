//! Durable per-device pairing records and the attestation audit log.
//!
//! Backed by SQLite. Each verification runs inside a single
//! `BEGIN IMMEDIATE` transaction ([`PinningTxn`]), so the
//! get / check / update sequence for one fingerprint can never interleave
//! with another writer into a lost update; contention waits up to the busy
//! timeout and then surfaces as [`AttestError::StoreBusy`]. A transaction
//! dropped without commit rolls back, leaving no partial state.
//!
//! Record invariants enforced here as a safety net (the orchestrator checks
//! them first): the pinned intermediate certificates and verified boot key
//! never change, and the pinned OS version, patch level, and app version
//! never decrease.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AttestError;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS Devices (
    fingerprint BLOB PRIMARY KEY NOT NULL,
    pinned_certificate_0 BLOB NOT NULL,
    pinned_certificate_1 BLOB NOT NULL,
    pinned_certificate_2 BLOB NOT NULL,
    pinned_verified_boot_key BLOB NOT NULL,
    pinned_os_version INTEGER NOT NULL,
    pinned_os_patch_level INTEGER NOT NULL,
    pinned_app_version INTEGER NOT NULL,
    verified_time_first INTEGER NOT NULL,
    verified_time_last INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS Attestations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint BLOB NOT NULL,
    strong INTEGER NOT NULL,
    tee_enforced TEXT NOT NULL,
    os_enforced TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS Samples (
    sample BLOB NOT NULL
);";

/// Everything pinned for one device, keyed by the fingerprint of its
/// persistent attestation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRecord {
    /// DER of the attestation certificate and the two intermediates pinned
    /// at pairing time. The root is global and not stored.
    pub pinned_certificates: [Vec<u8>; 3],
    /// Verified boot key pinned at pairing time.
    pub pinned_verified_boot_key: Vec<u8>,
    /// Highest OS version seen.
    pub pinned_os_version: i64,
    /// Highest OS patch level seen.
    pub pinned_os_patch_level: i64,
    /// Highest attestation app version seen.
    pub pinned_app_version: i64,
    /// Epoch millis of the initial pairing.
    pub verified_time_first: i64,
    /// Epoch millis of the latest successful verification.
    pub verified_time_last: i64,
}

/// One row of the append-only attestation audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Row id, monotonically increasing.
    pub id: i64,
    /// Persistent key fingerprint of the attesting device.
    pub fingerprint: Vec<u8>,
    /// Whether the verification was pinned against an existing pairing.
    pub strong: bool,
    /// TEE-enforced report text.
    pub tee_enforced: String,
    /// OS-enforced report text.
    pub os_enforced: String,
}

/// Handle to the attestation database.
#[derive(Debug, Clone)]
pub struct PinningStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl PinningStore {
    /// Open the store, creating the schema if needed.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, AttestError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
        };
        let conn = store.connect()?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %store.path.display(), "attestation store ready");
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, AttestError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    /// Start the per-request transaction.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front, so concurrent
    /// verifications of the same device serialize here.
    pub fn begin(&self) -> Result<PinningTxn, AttestError> {
        let conn = self.connect()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(PinningTxn {
            conn,
            committed: false,
        })
    }

    /// Read a pairing record outside any transaction.
    pub fn get(&self, fingerprint: &[u8]) -> Result<Option<PairingRecord>, AttestError> {
        query_record(&self.connect()?, fingerprint)
    }

    /// Audit-log entries for one device, oldest first.
    pub fn attestation_history(&self, fingerprint: &[u8]) -> Result<Vec<AuditEntry>, AttestError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, fingerprint, strong, tee_enforced, os_enforced \
             FROM Attestations WHERE fingerprint = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![fingerprint], |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                fingerprint: row.get(1)?,
                strong: row.get::<_, i64>(2)? != 0,
                tee_enforced: row.get(3)?,
                os_enforced: row.get(4)?,
            })
        })?;
        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// Store a submitted sample blob.
    pub fn insert_sample(&self, sample: &[u8]) -> Result<(), AttestError> {
        self.connect()?
            .execute("INSERT INTO Samples VALUES (?)", params![sample])?;
        Ok(())
    }
}

/// A `BEGIN IMMEDIATE` transaction over the attestation database.
///
/// Rolls back on drop unless [`commit`](Self::commit) ran.
pub struct PinningTxn {
    conn: Connection,
    committed: bool,
}

impl PinningTxn {
    /// Read the pairing record for a fingerprint.
    pub fn get(&self, fingerprint: &[u8]) -> Result<Option<PairingRecord>, AttestError> {
        query_record(&self.conn, fingerprint)
    }

    /// Create the pairing record for a first-time device.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        fingerprint: &[u8],
        pinned_certificates: [&[u8]; 3],
        verified_boot_key: &[u8],
        os_version: i64,
        os_patch_level: i64,
        app_version: i64,
        now_millis: i64,
    ) -> Result<(), AttestError> {
        let result = self.conn.execute(
            "INSERT INTO Devices VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                fingerprint,
                pinned_certificates[0],
                pinned_certificates[1],
                pinned_certificates[2],
                verified_boot_key,
                os_version,
                os_patch_level,
                app_version,
                now_millis,
                now_millis,
            ],
        );
        match result {
            Ok(_) => {
                debug!(fingerprint = %hex::encode_upper(fingerprint), "pairing record created");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(AttestError::PairingExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Advance the monotonic fields of an existing record.
    ///
    /// The caller has already compared against the pinned values; the WHERE
    /// clause re-checks them so a downgrade can never be written.
    pub fn update_monotonic(
        &self,
        fingerprint: &[u8],
        os_version: i64,
        os_patch_level: i64,
        app_version: i64,
        now_millis: i64,
    ) -> Result<(), AttestError> {
        let updated = self.conn.execute(
            "UPDATE Devices SET pinned_os_version = ?, pinned_os_patch_level = ?, \
             pinned_app_version = ?, verified_time_last = ? \
             WHERE fingerprint = ? AND pinned_os_version <= ? \
             AND pinned_os_patch_level <= ? AND pinned_app_version <= ?",
            params![
                os_version,
                os_patch_level,
                app_version,
                now_millis,
                fingerprint,
                os_version,
                os_patch_level,
                app_version,
            ],
        )?;
        if updated != 1 {
            return Err(AttestError::StoreFailure {
                message: "monotonic update matched no record".into(),
            });
        }
        Ok(())
    }

    /// Append to the audit log.
    pub fn append_audit(
        &self,
        fingerprint: &[u8],
        strong: bool,
        tee_enforced: &str,
        os_enforced: &str,
    ) -> Result<(), AttestError> {
        self.conn.execute(
            "INSERT INTO Attestations VALUES (NULL, ?, ?, ?, ?)",
            params![fingerprint, i64::from(strong), tee_enforced, os_enforced],
        )?;
        Ok(())
    }

    /// Commit the transaction.
    pub fn commit(mut self) -> Result<(), AttestError> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PinningTxn {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn query_record(
    conn: &Connection,
    fingerprint: &[u8],
) -> Result<Option<PairingRecord>, AttestError> {
    let record = conn
        .query_row(
            "SELECT pinned_certificate_0, pinned_certificate_1, pinned_certificate_2, \
             pinned_verified_boot_key, pinned_os_version, pinned_os_patch_level, \
             pinned_app_version, verified_time_first, verified_time_last \
             FROM Devices WHERE fingerprint = ?",
            params![fingerprint],
            |row| {
                Ok(PairingRecord {
                    pinned_certificates: [row.get(0)?, row.get(1)?, row.get(2)?],
                    pinned_verified_boot_key: row.get(3)?,
                    pinned_os_version: row.get(4)?,
                    pinned_os_patch_level: row.get(5)?,
                    pinned_app_version: row.get(6)?,
                    verified_time_first: row.get(7)?,
                    verified_time_last: row.get(8)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}
