//! Configuration for the attestation server.
//!
//! Trust policy (the root certificate, the device catalog, the compression
//! dictionary, the app signature digests) is deliberately compiled in and
//! absent here, so a configuration change can never silently relax it.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP transport binds to.
    pub listen_addr: String,
    /// Path of the SQLite attestation database.
    pub database_path: PathBuf,
    /// SQLite busy timeout; contention on a device row waits this long
    /// before surfacing as a busy error.
    pub busy_timeout: Duration,
    /// How long an issued challenge stays consumable.
    pub challenge_ttl: Duration,
    /// Upper bound on a submitted sample body.
    pub max_sample_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".into(),
            database_path: PathBuf::from("attestation.db"),
            busy_timeout: Duration::from_secs(5),
            challenge_ttl: Duration::from_secs(5 * 60),
            max_sample_size: 64 * 1024,
        }
    }
}
