//! rollbook CLI: add, list, and delete client records; run capacity
//! recovery sweeps; manage background images.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use base64::Engine;
use clap::{Parser, Subcommand};
use chrono::Utc;

use rollbook::{
    BackgroundImage, BackgroundSaveOutcome, ClientRecord, NewClientParams, Register,
    RegisterConfig, SaveOutcome, Signature,
};

#[derive(Parser)]
#[command(name = "rollbook", version, about = "Client-record register for service businesses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a client record to the register.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        plan: String,
        #[arg(long)]
        payment: String,
        /// Human-facing record code; generated when omitted.
        #[arg(long)]
        code: Option<String>,
        /// Image file to attach as the client photo.
        #[arg(long)]
        photo_file: Option<PathBuf>,
        /// Image file to attach as the signature.
        #[arg(long, conflicts_with = "decline_signature")]
        signature_file: Option<PathBuf>,
        /// Record an explicit "no signature" marker.
        #[arg(long)]
        decline_signature: bool,
        /// On a quota condition, retry immediately without the photo.
        #[arg(long)]
        drop_photo_on_quota: bool,
    },
    /// List records, newest first.
    List {
        /// Case-insensitive substring filter on name, code, or phone.
        #[arg(long)]
        filter: Option<String>,
    },
    /// Delete a record by id.
    Delete { id: i64 },
    /// Capacity recovery sweeps over the primary store.
    Sweep {
        #[command(subcommand)]
        op: SweepOp,
    },
    /// Manage background images.
    Background {
        #[command(subcommand)]
        op: BackgroundOp,
    },
}

#[derive(Subcommand)]
enum SweepOp {
    /// Strip photo attachments from records older than the threshold.
    Photos {
        #[arg(long, env = "ROLLBOOK_PHOTO_RETENTION_DAYS")]
        older_than_days: Option<u32>,
    },
    /// Delete records older than the threshold. Irreversible.
    Purge {
        #[arg(long, env = "ROLLBOOK_RECORD_RETENTION_DAYS")]
        older_than_days: Option<u32>,
        /// Required confirmation for the destructive sweep.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum BackgroundOp {
    /// Add a background image from a file.
    Add { file: PathBuf },
    List,
    /// Remove all background images.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rollbook=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = RegisterConfig::from_env()?;
    let register = Register::open(&config).await;

    match cli.command {
        Command::Add {
            name,
            phone,
            address,
            plan,
            payment,
            code,
            photo_file,
            signature_file,
            decline_signature,
            drop_photo_on_quota,
        } => {
            let photo = photo_file.as_deref().map(read_data_url).transpose()?;
            let signature = if decline_signature {
                Signature::Declined
            } else {
                match signature_file.as_deref() {
                    Some(path) => Signature::Image(read_data_url(path)?),
                    None => Signature::Pending,
                }
            };
            let record = ClientRecord::new(NewClientParams {
                code: code.unwrap_or_else(generate_code),
                name,
                phone,
                address,
                service_plan: plan,
                payment_details: payment,
                photo,
                signature,
            });

            let mut outcome = register.save_client(&record).await?;
            if matches!(outcome, SaveOutcome::QuotaExceeded { .. }) && drop_photo_on_quota {
                outcome = register.save_client_without_photo(&record).await?;
            }
            report_save(&outcome);
        }
        Command::List { filter } => {
            let records = register.load_clients().await;
            let filter = filter.map(|f| f.to_lowercase());
            let mut shown = 0usize;
            for record in &records {
                if let Some(needle) = &filter {
                    let haystack = format!(
                        "{} {} {}",
                        record.name.to_lowercase(),
                        record.code.to_lowercase(),
                        record.phone
                    );
                    if !haystack.contains(needle) {
                        continue;
                    }
                }
                shown += 1;
                let photo = if record.photo.is_some() { "photo" } else { "-" };
                let signature = match record.signature {
                    Signature::Pending => "pending",
                    Signature::Declined => "declined",
                    Signature::Image(_) => "signed",
                };
                println!(
                    "{}  {}  {}  {}  {}  [{photo}/{signature}]  {}",
                    record.id,
                    record.code,
                    record.name,
                    record.phone,
                    record.service_plan,
                    record.created_at.format("%Y-%m-%d"),
                );
            }
            eprintln!("{shown} of {} record(s)", records.len());
        }
        Command::Delete { id } => {
            if register.delete_client(id).await? {
                println!("deleted record {id}");
            } else {
                println!("no record with id {id}");
            }
        }
        Command::Sweep { op } => match op {
            SweepOp::Photos { older_than_days } => {
                let days = older_than_days.unwrap_or(config.photo_retention_days);
                let count = register.strip_photos_older_than(days).await?;
                println!("stripped photos from {count} record(s) older than {days} day(s)");
            }
            SweepOp::Purge {
                older_than_days,
                yes,
            } => {
                let days = older_than_days.unwrap_or(config.record_retention_days);
                if !yes {
                    bail!(
                        "purging records older than {days} day(s) is irreversible; \
                         re-run with --yes to confirm"
                    );
                }
                let count = register.delete_records_older_than(days).await?;
                println!("deleted {count} record(s) older than {days} day(s)");
            }
        },
        Command::Background { op } => match op {
            BackgroundOp::Add { file } => {
                let image = BackgroundImage::new(read_data_url(&file)?);
                match register.save_background(&image).await? {
                    BackgroundSaveOutcome::Saved => println!("saved background {}", image.id),
                    BackgroundSaveOutcome::CapacityWarning => {
                        println!(
                            "capacity limit reached; the background image was not saved. \
                             Free space with `rollbook sweep` or `rollbook background clear`."
                        );
                    }
                }
            }
            BackgroundOp::List => {
                for image in register.list_backgrounds().await? {
                    println!("{}  ({} bytes)", image.id, image.data_url.len());
                }
            }
            BackgroundOp::Clear => {
                let count = register.clear_backgrounds().await?;
                println!("removed {count} background image(s)");
            }
        },
    }
    Ok(())
}

fn report_save(outcome: &SaveOutcome) {
    match outcome {
        SaveOutcome::Saved { tier, degraded } => {
            if *degraded {
                println!(
                    "saved record to the {} store; durability is weaker than the primary store",
                    tier.as_str()
                );
            } else {
                println!("saved record to the {} store", tier.as_str());
            }
        }
        SaveOutcome::QuotaExceeded { record } => {
            println!(
                "storage quota exceeded; record {} was NOT saved. Choose a recovery action:",
                record.id
            );
            println!("  1. save without the photo:     re-run with --drop-photo-on-quota");
            println!("  2. strip old photo attachments: rollbook sweep photos --older-than-days <N>");
            println!("  3. delete old records:          rollbook sweep purge --older-than-days <N> --yes");
        }
    }
}

/// Encode a file as a data URL for storage as binary-as-text.
fn read_data_url(path: &Path) -> anyhow::Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}

fn generate_code() -> String {
    format!("C{}", Utc::now().format("%y%m%d%H%M%S"))
}
