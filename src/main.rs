//! ClearCare: post-visit care instructions and compliance tracking.
//!
//! Operator entry point. Commands:
//!
//! ```text
//! clearcare init
//! clearcare create-admin <email> <name>
//! clearcare metrics <user-id>
//! clearcare report <user-id> <from yyyy-mm-dd> <to yyyy-mm-dd> [patient-id]
//! ```
//!
//! Results are printed to stdout as JSON.

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clearcare::adapters::sanitize::{self, SanitizingMakeWriter};
use clearcare::adapters::SqliteStorage;
use clearcare::application::{keys, ComplianceService, ReportService, UserService};
use clearcare::config::{self, AppConfig, LogMode};
use clearcare::domain::{NewUser, ReportRequest, ReportType};
use clearcare::ports::{ContentCipher, Storage};
use clearcare::Caller;

const USAGE: &str = "usage: clearcare <init | create-admin EMAIL NAME | metrics USER_ID | report USER_ID FROM TO [PATIENT_ID]>";

fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    sanitize::set_max_bytes(config.sanitize_max_bytes);

    // Keep stdout clean for JSON output when a human is at the terminal.
    let use_file = match config.log_mode {
        LogMode::File => true,
        LogMode::Stdout => false,
        LogMode::Auto => std::io::stdout().is_terminal(),
    };

    let (writer, _guard) = if use_file {
        if let Some(parent) = config.log_file.parent() {
            // Best-effort: a missing directory surfaces on open below.
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)
            .with_context(|| format!("opening log file {}", config.log_file.display()))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let storage = Arc::new(
        SqliteStorage::new(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    tracing::info!("Starting ClearCare...");

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["init"] => {
            let password = config::key_password()?;
            let cipher = keys::open_cipher(storage.as_ref(), &password)?;
            print_json(&serde_json::json!({ "keyFingerprint": cipher.key_fingerprint() }))?;
        }
        ["create-admin", email, name] => {
            let users = UserService::new(Arc::clone(&storage));
            let admin = users.bootstrap_admin(NewUser {
                email: (*email).to_string(),
                name: (*name).to_string(),
                role: clearcare::Role::Administrator,
                permissions: Vec::new(),
            })?;
            print_json(&admin)?;
        }
        ["metrics", user_id] => {
            let caller = caller_for(storage.as_ref(), user_id)?;
            let metrics = ComplianceService::new(Arc::clone(&storage)).metrics(&caller)?;
            print_json(&metrics)?;
        }
        ["report", user_id, from, to, rest @ ..] if rest.len() <= 1 => {
            let caller = caller_for(storage.as_ref(), user_id)?;
            let request = ReportRequest {
                report_type: ReportType::Summary,
                from: parse_date(from)?,
                to: parse_date(to)?,
                patient_id: rest.first().map(|s| (*s).to_string()),
            };
            let report = ReportService::new(Arc::clone(&storage)).generate(&caller, request)?;
            print_json(&report)?;
        }
        _ => bail!(USAGE),
    }

    tracing::info!("ClearCare finished.");
    Ok(())
}

fn caller_for(storage: &SqliteStorage, user_id: &str) -> Result<Caller> {
    let user = storage
        .get_user(user_id)?
        .filter(|u| !u.is_deleted())
        .with_context(|| format!("unknown user {user_id}"))?;
    Ok(Caller::new(user.id, user.role))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid date {raw:?}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
