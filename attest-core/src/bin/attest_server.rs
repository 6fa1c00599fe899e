//! Attestation server transport.
//!
//! A thin HTTP layer over the verification engine:
//!
//! - `POST /challenge` — issue a challenge message for an Auditor.
//! - `POST /verify`    — verify a serialized attestation message; responds
//!   with the textual report, or the error string on a 4xx/5xx.
//! - `POST /submit`    — collect a sample payload into the database.
//!
//! The engine itself is synchronous; handlers bridge onto blocking worker
//! threads. Trust policy lives in the engine, not here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use clap::Parser;
use rand_core::{OsRng, RngCore};
use tracing::{error, info, warn};

use attest_core::{
    AttestError, ChallengeStore, PinningStore, ServerConfig, Verifier, CHALLENGE_LENGTH,
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Attestation server for the Auditor app.
///
/// Verifies hardware key-attestation evidence forwarded by paired Auditor
/// devices, pins each Auditee on first contact, and enforces OS, patch
/// level, and app version continuity on every later contact.
#[derive(Parser)]
#[command(name = "attest-server")]
#[command(version = VERSION)]
#[command(about = "Remote attestation verification server")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Path of the attestation database
    #[arg(long, default_value = "attestation.db")]
    database: PathBuf,

    /// Challenge expiry in seconds
    #[arg(long, default_value_t = 300)]
    challenge_ttl: u64,
}

struct AppState {
    verifier: Verifier,
    challenges: Arc<ChallengeStore>,
    store: PinningStore,
    challenge_index: [u8; CHALLENGE_LENGTH],
    max_sample_size: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_target(false)
            .init();
    }

    let config = ServerConfig {
        listen_addr: cli.listen,
        database_path: cli.database,
        challenge_ttl: Duration::from_secs(cli.challenge_ttl),
        ..ServerConfig::default()
    };

    let store = PinningStore::open(&config.database_path, config.busy_timeout)?;
    let challenges = Arc::new(ChallengeStore::new(config.challenge_ttl));
    let verifier = Verifier::new(Arc::clone(&challenges), store.clone());

    // The challenge index identifies this Auditor across restarts of the
    // Auditee's pairing data; one per server process.
    let mut challenge_index = [0u8; CHALLENGE_LENGTH];
    OsRng.fill_bytes(&mut challenge_index);

    let state = Arc::new(AppState {
        verifier,
        challenges,
        store,
        challenge_index,
        max_sample_size: config.max_sample_size,
    });

    let app = Router::new()
        .route("/challenge", post(challenge))
        .route("/verify", post(verify))
        .route("/submit", post(submit))
        .layer(DefaultBodyLimit::max(config.max_sample_size + 1024))
        .with_state(state);

    info!(listen = %config.listen_addr, version = VERSION, "attestation server listening");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Issue a challenge message: `[maxVersion, challenge index, challenge]`.
async fn challenge(State(state): State<Arc<AppState>>) -> Vec<u8> {
    let challenge = state.challenges.issue();
    let mut message = Vec::with_capacity(1 + 2 * CHALLENGE_LENGTH);
    message.push(PROTOCOL_VERSION);
    message.extend_from_slice(&state.challenge_index);
    message.extend_from_slice(&challenge);
    message
}

/// Verify a serialized attestation message.
async fn verify(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if body.len() > MAX_MESSAGE_SIZE {
        warn!(len = body.len(), "oversized attestation message");
        return (StatusCode::BAD_REQUEST, "Attestation too large\n").into_response();
    }

    let result = tokio::task::spawn_blocking({
        let state = Arc::clone(&state);
        move || state.verifier.verify_serialized(&body)
    })
    .await;

    match result {
        Ok(Ok(result)) => {
            let report = format!("{}\n{}", result.tee_enforced, result.os_enforced);
            (StatusCode::OK, report).into_response()
        }
        Ok(Err(err)) => attest_error_response(&err),
        Err(join_error) => {
            error!(%join_error, "verification task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error\n").into_response()
        }
    }
}

/// Accept a sample payload for protocol analysis.
async fn submit(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if body.len() > state.max_sample_size {
        return (StatusCode::BAD_REQUEST, "Sample too large\n").into_response();
    }

    let result = tokio::task::spawn_blocking({
        let state = Arc::clone(&state);
        move || state.store.insert_sample(&body)
    })
    .await;

    match result {
        Ok(Ok(())) => (StatusCode::OK, "Success\n").into_response(),
        Ok(Err(err)) => attest_error_response(&err),
        Err(join_error) => {
            error!(%join_error, "sample task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error\n").into_response()
        }
    }
}

fn attest_error_response(err: &AttestError) -> Response {
    let status = if err.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_REQUEST
    };
    warn!(error = %err, "request rejected");
    (status, format!("{err}\n")).into_response()
}
