//! `identity` command-line entry point.
//!
//! # Responsibility
//! - Wire configuration, logging and the contact database to the core.
//! - Print Identify responses in their JSON wire shape.
//!
//! # Usage
//! ```text
//! identity --db contacts.sqlite3 init
//! identity --db contacts.sqlite3 identify --email a@x.com --phone 555
//! identity --db contacts.sqlite3 identify --request '{"email":"a@x.com","phoneNumber":null}'
//! identity --db contacts.sqlite3 contacts
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use identity_core::db::migrations::current_user_version;
use identity_core::db::{open_db_with_options, DbError};
use identity_core::{
    core_version, default_log_level, init_logging, load_config, CoreConfig, IdentifyError,
    IdentifyRequest, IdentifyService, RepoError, SqliteContactRepository,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// `EX_TEMPFAIL`: the same command may succeed if run again.
const EXIT_RETRYABLE: u8 = 75;

/// Resolve customer identity across stored contact records.
#[derive(Debug, Parser)]
#[command(name = "identity", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Contact database file; overrides `db.path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Log level; overrides `logging.level`.
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Absolute directory for rolling log files; overrides `logging.dir`.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or migrate the contact database.
    Init,
    /// Resolve an email and/or phone number to its identity group.
    Identify(IdentifyArgs),
    /// Print every stored contact, one JSON object per line.
    Contacts,
}

#[derive(Debug, Args)]
struct IdentifyArgs {
    #[arg(long)]
    email: Option<String>,
    #[arg(long = "phone")]
    phone_number: Option<String>,
    /// Whole request as JSON (`email`, `phoneNumber`).
    #[arg(long, conflicts_with_all = ["email", "phone_number"])]
    request: Option<String>,
}

impl IdentifyArgs {
    fn into_request(self) -> Result<IdentifyRequest> {
        match self.request {
            Some(json) => serde_json::from_str(&json).context("invalid --request JSON"),
            None => Ok(IdentifyRequest {
                email: self.email,
                phone_number: self.phone_number,
            }),
        }
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if is_retryable(&err) {
                eprintln!("error (retryable): {err:#}");
                ExitCode::from(EXIT_RETRYABLE)
            } else {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;

    // Stdout carries JSON, so stderr logging stays quiet unless asked.
    let level = config
        .logging
        .level
        .as_deref()
        .unwrap_or(match config.logging.dir {
            Some(_) => default_log_level(),
            None => "warn",
        });
    init_logging(level, config.logging.dir.as_deref())
        .map_err(anyhow::Error::msg)
        .context("failed to initialize logging")?;

    let conn = open_db_with_options(&config.db.path, &config.db.options()).with_context(|| {
        format!(
            "failed to open contact database `{}`",
            config.db.path.display()
        )
    })?;

    match cli.command {
        Command::Init => {
            let version = current_user_version(&conn)?;
            println!(
                "contact database `{}` ready: schema_version={version} core_version={}",
                config.db.path.display(),
                core_version()
            );
        }
        Command::Identify(args) => {
            let request = args.into_request()?;
            let repo = SqliteContactRepository::try_new(&conn)?;
            let service = IdentifyService::with_retry_policy(repo, config.retry.policy());
            let response = service.identify(&request)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Contacts => {
            let repo = SqliteContactRepository::try_new(&conn)?;
            for contact in repo.list_contacts()? {
                println!("{}", serde_json::to_string(&contact)?);
            }
        }
    }

    Ok(())
}

/// Retryable identify failures, plus an unavailable store met while opening it.
fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(err) = cause.downcast_ref::<IdentifyError>() {
            return err.is_retryable();
        }
        if let Some(err) = cause.downcast_ref::<RepoError>() {
            return err.is_retryable();
        }
        cause
            .downcast_ref::<DbError>()
            .is_some_and(DbError::is_retryable)
    })
}

fn resolve_config(cli: &Cli) -> Result<CoreConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config `{}`", path.display()))?,
        None => CoreConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db.path = db.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = Some(level.clone());
    }
    if let Some(dir) = &cli.log_dir {
        config.logging.dir = Some(dir.clone());
    }
    Ok(config)
}
