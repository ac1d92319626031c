//! PKI Testbed - lab Certificate Authority with CRL and OCSP services
//!
//! On start the application loads `config.toml`, opens the revocation ledger and, when the
//! ledger is empty, builds the hierarchy for the configured task into
//! `{name}-{group}-{task}/`. The OCSP responder (and CRL endpoint) then runs in the background
//! while the interactive menu manages revocation.
//!
//! # Quick Start
//!
//! ```bash
//! cat > config.toml <<EOF
//! [user]
//! name = "ivanov"
//! group = "ib21"
//! email = "ivanov@example.ru"
//! EOF
//!
//! RUST_LOG=info ./target/release/pki-testbed
//! ```
//!
//! # Menu
//!
//! 1. List certificates
//! 2. Revoke a certificate
//! 3. Generate CRL
//! 4. Query certificate status over OCSP
//! 5. Exit (graceful responder shutdown)

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use der::Encode;
use pki_testbed::configs::AppConfig;
use pki_testbed::ledger::{JsonLinesStore, RevocationLedger, RevocationReason, Serial};
use pki_testbed::ocsp_responder::{build_request, CertIdHash, OcspResponder, ResponseSummary};
use pki_testbed::provider::{CryptoProvider, OpensslProvider};
use pki_testbed::server::{AppState, BackgroundServer, QueryResponder, ServerSettings};
use pki_testbed::testbed::Testbed;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EXIT_CHOICE: &str = "5";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== PKI Testbed ===\n");
    let config = AppConfig::load().context("Failed to load configuration")?;

    let ledger = Arc::new(
        RevocationLedger::open(JsonLinesStore::new(&config.ledger.path)).context(format!(
            "Failed to open revocation ledger {}",
            config.ledger.path.display()
        ))?,
    );
    let provider: Arc<dyn CryptoProvider> = Arc::new(OpensslProvider::new());

    let fresh = ledger.is_empty();
    let testbed = Testbed::open(&config, Arc::clone(&provider), Arc::clone(&ledger))
        .context("Failed to prepare testbed")?;
    if fresh {
        println!("✓ Testbed built in {}", testbed.work_dir().display());
    } else {
        println!("✓ Existing testbed loaded from {}", testbed.work_dir().display());
    }

    let responder = testbed.ocsp_responder(&config)?.map(Arc::new);
    let crl = Arc::new(testbed.crl_publisher(&config)?);
    let state = AppState {
        responder: responder
            .clone()
            .map(|r| r as Arc<dyn QueryResponder>),
        crl: Some(Arc::clone(&crl)),
        request_timeout: Duration::from_millis(config.responder.request_timeout_ms),
    };
    let settings = server_settings(&config)?;
    let addr = settings.addr;
    let server = BackgroundServer::spawn(settings, state).context("Failed to start responder")?;
    if responder.is_some() {
        println!("✓ OCSP responder started on {}\n", addr);
    } else {
        println!("✓ CRL endpoint started on {} (no OCSP responder certificate)\n", addr);
    }

    // Main menu loop
    loop {
        println!("\n=== PKI Testbed Menu ===");
        println!("1. List certificates");
        println!("2. Revoke certificate");
        println!("3. Generate CRL");
        println!("4. Query certificate status");
        println!("5. Exit");
        print!("\nSelect an option: ");
        io::stdout().flush()?;

        // closed stdin exits like option 5
        let choice = read_trimmed(&mut io::stdin().lock())?
            .unwrap_or_else(|| EXIT_CHOICE.to_string());

        let outcome = match choice.as_str() {
            "1" => {
                list_certificates(&ledger);
                Ok(())
            }
            "2" => revoke_certificate(&ledger),
            "3" => generate_crl(&config, &crl),
            "4" => query_status(&testbed, responder.as_deref()),
            EXIT_CHOICE => {
                println!("\nShutting down responder...");
                server.shutdown()?;
                println!("Exiting PKI Testbed...");
                break;
            }
            _ => {
                println!("Invalid option. Please select 1-5.");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            println!("✗ {:#}", e);
        }
    }

    Ok(())
}

fn server_settings(config: &AppConfig) -> Result<ServerSettings> {
    let addr: SocketAddr = format!("{}:{}", config.responder.host, config.responder.port)
        .parse()
        .context("Invalid responder address")?;
    let tls = match (
        &config.responder.tls_cert_path,
        &config.responder.tls_key_path,
    ) {
        (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
        (None, None) => None,
        _ => return Err(anyhow!("Both tls_cert_path and tls_key_path must be set for TLS")),
    };
    Ok(ServerSettings {
        addr,
        shutdown_grace: Duration::from_secs(config.responder.shutdown_grace_secs),
        tls,
    })
}

fn list_certificates(ledger: &RevocationLedger) {
    println!("\n=== Certificates ===");
    let now = Utc::now();
    for entry in ledger.snapshot() {
        let status = if entry.is_revoked() {
            format!(
                "revoked ({})",
                entry
                    .reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "unspecified".to_string())
            )
        } else if entry.is_expired_at(now) {
            "expired".to_string()
        } else {
            "valid".to_string()
        };
        println!("{:>6}  {:<20}  {}", entry.serial, status, entry.subject);
    }
}

/// Next input line, trimmed; `None` once the input is closed
fn read_trimmed(input: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    read_trimmed(&mut io::stdin().lock())?.ok_or_else(|| anyhow!("Input closed"))
}

fn revoke_certificate(ledger: &RevocationLedger) -> Result<()> {
    println!("\n=== Revoke Certificate ===");
    let serial: Serial = prompt("Serial (hex): ")?.parse()?;
    let reason_text = prompt("Reason [unspecified]: ")?;
    let reason = if reason_text.is_empty() {
        RevocationReason::Unspecified
    } else {
        reason_text.parse()?
    };
    ledger.revoke(serial, reason, Utc::now())?;
    println!("✓ Certificate {} revoked ({})", serial, reason);
    Ok(())
}

fn generate_crl(config: &AppConfig, crl: &pki_testbed::crl::CrlPublisher) -> Result<()> {
    println!("\n=== Generate CRL ===");
    let path = config.crl_output();
    let list = crl.publish_to(&path)?;
    println!(
        "✓ CRL with {} revoked certificate(s) written to {}",
        list.entries()?.len(),
        path.display()
    );
    Ok(())
}

fn query_status(testbed: &Testbed, responder: Option<&OcspResponder>) -> Result<()> {
    println!("\n=== Query Certificate Status ===");
    let Some(responder) = responder else {
        println!("No OCSP responder is configured for this task.");
        return Ok(());
    };
    let serial: Serial = prompt("Serial (hex): ")?.parse()?;
    let request = build_request(testbed.intermediate(), &[serial], CertIdHash::Sha256, None)?;
    let response = responder.respond(&request.to_der()?);
    let summary = ResponseSummary::from_der(&response)?;
    match summary.status_of(serial) {
        Some(status) => println!("Certificate {}: {}", serial, status.label()),
        None => println!("Responder answered {:?}", summary.status),
    }
    Ok(())
}
