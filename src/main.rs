use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use licensepro::authority::LicenseAuthority;
use licensepro::config::Config;
use licensepro::error::AppError;
use licensepro::models::{Actor, IssueLicense, LicenseStatus, VerifyRequest};
use licensepro::pagination::PageRequest;

#[derive(Parser, Debug)]
#[command(name = "licensepro")]
#[command(about = "License issuance and device activation authority")]
struct Cli {
    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a single license
    Generate {
        #[arg(long)]
        plan: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        devices: Option<i64>,
        /// Override the plan's default validity (ignored for lifetime)
        #[arg(long)]
        days: Option<i64>,
        #[arg(long)]
        hint: Option<String>,
    },
    /// Issue one license per email
    Batch {
        #[arg(long)]
        plan: String,
        #[arg(long, value_delimiter = ',', required = true)]
        emails: Vec<String>,
        #[arg(long)]
        devices: Option<i64>,
        #[arg(long)]
        days: Option<i64>,
        #[arg(long)]
        hint: Option<String>,
    },
    /// Verify a code and optionally activate a device
    Verify {
        code: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        device_name: Option<String>,
        #[arg(long)]
        ip: Option<String>,
    },
    /// Revoke one or more licenses
    Revoke {
        #[arg(required = true)]
        license_ids: Vec<String>,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        by: Option<String>,
    },
    /// Return a revoked or suspended license to active
    Restore { license_id: String },
    /// Suspend a license
    Suspend {
        license_id: String,
        #[arg(long, default_value = "suspended by administrator")]
        reason: String,
    },
    /// Extend a license's validity
    Extend { license_id: String, days: i64 },
    /// Change a license's device limit
    SetLimit { license_id: String, devices: i64 },
    /// Permanently delete a license and everything attached to it
    Purge {
        license_id: String,
        /// Required; purging cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// Show license details with devices and recent history
    Show { license_id: String },
    /// List licenses, newest first
    List {
        #[arg(long)]
        status: Option<LicenseStatus>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Check whether a license is revoked
    RevokeStatus {
        license_id: String,
        #[arg(long)]
        email: String,
    },
    /// Aggregate counts
    Stats,
    /// Give subscription licenses without expiry their plan default
    Backfill,
    /// Device management
    #[command(subcommand)]
    Device(DeviceCommand),
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Release an active device's slot
    Cancel {
        license_id: String,
        device_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    Suspend {
        license_id: String,
        device_id: String,
        #[arg(long, default_value = "suspended by administrator")]
        reason: String,
    },
    Restore {
        license_id: String,
        device_id: String,
        #[arg(long, default_value = "restored by administrator")]
        reason: String,
    },
    Delete {
        license_id: String,
        device_id: String,
        #[arg(long, default_value = "deleted by administrator")]
        reason: String,
    },
    Status { license_id: String, device_id: String },
    List { license_id: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = Config::from_env();
    if let Some(path) = cli.database {
        config.database_path = path;
    }
    let authority = LicenseAuthority::open(config)?;

    match cli.command {
        Command::Generate {
            plan,
            email,
            devices,
            days,
            hint,
        } => {
            let input = IssueLicense {
                plan,
                email,
                device_limit: devices,
                duration_days: days,
                user_hint: hint,
            };
            print_json(&authority.issue(input)?)
        }
        Command::Batch {
            plan,
            emails,
            devices,
            days,
            hint,
        } => {
            let template = IssueLicense {
                plan,
                email: String::new(),
                device_limit: devices,
                duration_days: days,
                user_hint: hint,
            };
            print_json(&authority.issue_batch(&template, &emails))
        }
        Command::Verify {
            code,
            email,
            device,
            device_name,
            ip,
        } => {
            let request = VerifyRequest {
                code,
                email,
                device_id: device,
                device_name,
                ip_address: ip,
            };
            print_json(&authority.verify_and_activate(&request)?)
        }
        Command::Revoke {
            license_ids,
            reason,
            by,
        } => {
            if let [license_id] = license_ids.as_slice() {
                print_json(&authority.revoke(license_id, &reason, by.as_deref())?)
            } else {
                print_json(&authority.revoke_batch(&license_ids, &reason, by.as_deref()))
            }
        }
        Command::Restore { license_id } => print_json(&authority.restore_license(&license_id)?),
        Command::Suspend { license_id, reason } => {
            print_json(&authority.suspend_license(&license_id, &reason)?)
        }
        Command::Extend { license_id, days } => {
            print_json(&authority.extend_validity(&license_id, days)?)
        }
        Command::SetLimit {
            license_id,
            devices,
        } => print_json(&authority.set_device_limit(&license_id, devices)?),
        Command::Purge { license_id, yes } => {
            if !yes {
                return Err(AppError::Validation(
                    "Purge is irreversible; pass --yes to confirm".into(),
                ));
            }
            authority.purge_license(&license_id)?;
            print_json(&serde_json::json!({ "purged": license_id }))
        }
        Command::Show { license_id } => print_json(&authority.license_details(&license_id)?),
        Command::List {
            status,
            limit,
            offset,
        } => print_json(&authority.list_licenses(status, PageRequest { limit, offset })?),
        Command::RevokeStatus { license_id, email } => {
            let record = authority.revocation_status(&license_id, &email)?;
            print_json(&serde_json::json!({
                "is_revoked": record.is_some(),
                "revocation": record,
            }))
        }
        Command::Stats => print_json(&authority.statistics()?),
        Command::Backfill => {
            let fixed = authority.backfill_valid_until()?;
            print_json(&serde_json::json!({ "updated": fixed }))
        }
        Command::Device(command) => run_device(&authority, command),
    }
}

fn run_device(authority: &LicenseAuthority, command: DeviceCommand) -> Result<(), AppError> {
    match command {
        DeviceCommand::Cancel {
            license_id,
            device_id,
            reason,
        } => {
            authority.cancel_device(&license_id, &device_id, reason.as_deref())?;
            print_json(&serde_json::json!({ "cancelled": device_id }))
        }
        DeviceCommand::Suspend {
            license_id,
            device_id,
            reason,
        } => print_json(&authority.suspend_device(&license_id, &device_id, &reason, Actor::Admin)?),
        DeviceCommand::Restore {
            license_id,
            device_id,
            reason,
        } => print_json(&authority.restore_device(&license_id, &device_id, &reason, Actor::Admin)?),
        DeviceCommand::Delete {
            license_id,
            device_id,
            reason,
        } => {
            authority.delete_device(&license_id, &device_id, &reason, Actor::Admin)?;
            print_json(&serde_json::json!({ "deleted": device_id }))
        }
        DeviceCommand::Status {
            license_id,
            device_id,
        } => print_json(&authority.device_status(&license_id, &device_id)?),
        DeviceCommand::List { license_id } => print_json(&authority.list_devices(&license_id)?),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "licensepro=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let body = serde_json::json!({
                "error": e.public_message(),
                "kind": e.kind(),
                "failure": e.verify_failure(),
            });
            eprintln!("{}", body);
            ExitCode::FAILURE
        }
    }
}
