use anyhow::Context;
use clap::{Parser, Subcommand};
use securemed_core::audit::{read_jsonl, AuditRecord};
use securemed_core::config::master_key_from_env_value;
use securemed_core::constants::ENV_MASTER_KEY;
use securemed_crypto::{CryptoCodec, MasterKey, SealedBlob};
use securemed_files::{hash_content, sniff_media_type, validate};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "securemed")]
#[command(about = "SecureMed artifact vault CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh hex-encoded master key
    Keygen,
    /// Detect a file's type from its leading bytes and print its SHA-256
    Sniff {
        file: PathBuf,
    },
    /// Encrypt a file with the master key from SECUREMED_MASTER_KEY
    Seal {
        input: PathBuf,
        output: PathBuf,
    },
    /// Decrypt a sealed file with the master key from SECUREMED_MASTER_KEY
    Unseal {
        input: PathBuf,
        output: PathBuf,
    },
    /// Print the records of a JSON-lines audit log
    Audit {
        file: PathBuf,
        /// Only records with this action, e.g. BREAK_GLASS_ACCESS
        #[arg(long)]
        action: Option<String>,
        /// Print raw JSON lines instead of a summary
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Keygen) => {
            println!("{}", MasterKey::generate().to_hex());
        }
        Some(Commands::Sniff { file }) => {
            println!("{}", sniff(&file)?);
        }
        Some(Commands::Seal { input, output }) => {
            let codec = codec_from_env()?;
            let written = seal(&codec, &input, &output)?;
            println!("Sealed {} bytes to {}", written, output.display());
        }
        Some(Commands::Unseal { input, output }) => {
            let codec = codec_from_env()?;
            let written = unseal(&codec, &input, &output)?;
            println!("Unsealed {} bytes to {}", written, output.display());
        }
        Some(Commands::Audit { file, action, json }) => {
            let records = read_jsonl(&file)
                .with_context(|| format!("reading audit log {}", file.display()))?;
            let records: Vec<AuditRecord> = records
                .into_iter()
                .filter(|r| match &action {
                    Some(a) => action_name(r).eq_ignore_ascii_case(a),
                    None => true,
                })
                .collect();
            if records.is_empty() {
                println!("No audit records found.");
            }
            for record in &records {
                if json {
                    println!("{}", serde_json::to_string(record)?);
                } else {
                    println!("{}", summarise(record));
                }
            }
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

fn codec_from_env() -> anyhow::Result<CryptoCodec> {
    let key = master_key_from_env_value(std::env::var(ENV_MASTER_KEY).ok())?;
    Ok(CryptoCodec::new(&key))
}

fn sniff(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let kind = validate(&bytes).with_context(|| match sniff_media_type(&bytes) {
        Some(sniffed) => format!("{} looks like {}", path.display(), sniffed),
        None => format!("{} is not a recognised file", path.display()),
    })?;
    Ok(format!(
        "{} (.{}), {} bytes, sha256 {}",
        kind,
        kind.extension(),
        bytes.len(),
        hash_content(&bytes)
    ))
}

fn seal(codec: &CryptoCodec, input: &Path, output: &Path) -> anyhow::Result<usize> {
    let plaintext = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let sealed = codec.encrypt(&plaintext)?;
    std::fs::write(output, sealed.as_bytes())
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(sealed.len())
}

fn unseal(codec: &CryptoCodec, input: &Path, output: &Path) -> anyhow::Result<usize> {
    let sealed = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let plaintext = codec.decrypt(&SealedBlob::from(sealed))?;
    std::fs::write(output, &plaintext).with_context(|| format!("writing {}", output.display()))?;
    Ok(plaintext.len())
}

fn action_name(record: &AuditRecord) -> String {
    match serde_json::to_value(record.action) {
        Ok(serde_json::Value::String(s)) => s,
        _ => format!("{:?}", record.action),
    }
}

fn summarise(record: &AuditRecord) -> String {
    format!(
        "{} {} {} ({}) {:?} {}:{:?} {:?}",
        record.timestamp.to_rfc3339(),
        action_name(record),
        record.actor_id,
        record.actor_role,
        record.resource_type,
        record.resource_id,
        record.outcome,
        record.detail,
    )
}
