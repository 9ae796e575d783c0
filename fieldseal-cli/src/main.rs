//! `fieldseal` CLI tool for key generation and one-off encryption.

#![warn(clippy::pedantic, clippy::nursery)]

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use fieldseal::prelude::*;
use fieldseal_key_static::StaticKeyFinder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fieldseal")]
#[command(about = "fieldseal encryption CLI", long_about = None)]
struct Cli {
    /// Log filter, overridden by `RUST_LOG`
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new key version and 256-bit value
    Keygen,
    /// Encrypt a field value into `name|version|base64`
    EncryptField {
        #[command(flatten)]
        key: KeyArgs,
        /// Plaintext to encrypt
        plaintext: String,
    },
    /// Decrypt a stored field value
    DecryptField {
        #[command(flatten)]
        key: KeyArgs,
        /// Stored value; plaintext is echoed back unchanged
        value: String,
    },
    /// Encrypt a file, printing its metadata as `Name=Value` lines
    EncryptBlob {
        #[command(flatten)]
        key: KeyArgs,
        /// Plaintext file
        #[arg(short, long)]
        input: PathBuf,
        /// Encrypted output file
        #[arg(short, long)]
        output: PathBuf,
        /// Write metadata here instead of stdout
        #[arg(short, long)]
        metadata: Option<PathBuf>,
    },
    /// Decrypt a file using its metadata
    DecryptBlob {
        #[command(flatten)]
        key: KeyArgs,
        /// Encrypted file
        #[arg(short, long)]
        input: PathBuf,
        /// Plaintext output file
        #[arg(short, long)]
        output: PathBuf,
        /// Metadata file of `Name=Value` lines
        #[arg(short, long)]
        metadata: PathBuf,
        /// Decrypt incrementally; output is only verified once complete
        #[arg(long)]
        stream: bool,
    },
}

#[derive(Args)]
struct KeyArgs {
    /// Key name
    #[arg(long, env = "FIELDSEAL_KEY_NAME")]
    key_name: String,
    /// Key version (a GUID)
    #[arg(long, env = "FIELDSEAL_KEY_VERSION")]
    key_version: String,
    /// Base64 of the 32-byte key
    #[arg(long, env = "FIELDSEAL_KEY_VALUE", hide_env_values = true)]
    key_value: String,
}

impl KeyArgs {
    fn resolver(self) -> Result<KeyResolver<StaticKeyFinder>> {
        if Uuid::try_parse(&self.key_version).is_err() {
            bail!("key version must be a GUID: {}", self.key_version);
        }
        let key = EncryptionKey::new(self.key_name, self.key_version).with_value(self.key_value);
        if !key.is_ready() {
            bail!("key '{}' is not a valid 256-bit key", key.key_name());
        }
        Ok(KeyResolver::new(Arc::new(StaticKeyFinder::single(key))))
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to initialise tracing subscriber")
}

fn keygen() {
    let mut value = [0u8; 32];
    OsRng.fill_bytes(&mut value);
    println!("FIELDSEAL_KEY_VERSION={}", Uuid::new_v4());
    println!("FIELDSEAL_KEY_VALUE={}", STANDARD.encode(value));
}

async fn encrypt_field(key: KeyArgs, plaintext: &str) -> Result<()> {
    let resolver = key.resolver()?;
    let stored = FieldCodec::new(&resolver)
        .encrypt_str(plaintext)
        .await?
        .context("key is not ready")?;
    println!("{stored}");
    Ok(())
}

async fn decrypt_field(key: KeyArgs, value: &str) -> Result<()> {
    let resolver = key.resolver()?;
    println!("{}", FieldCodec::new(&resolver).decrypt_str(value).await?);
    Ok(())
}

fn render_metadata(metadata: &BlobMetadata) -> String {
    metadata.to_map().iter().map(|(name, value)| format!("{name}={value}\n")).collect()
}

async fn read_metadata(path: &Path) -> Result<BlobMetadata> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let entries = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split_once('=').with_context(|| format!("not a Name=Value line: {line}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(BlobMetadata::from_map(entries)?)
}

async fn encrypt_blob(
    key: KeyArgs,
    input: &Path,
    output: &Path,
    metadata_path: Option<&Path>,
) -> Result<()> {
    let resolver = key.resolver()?;
    let reader = File::open(input)
        .await
        .with_context(|| format!("failed to open {}", input.display()))?;
    let writer = File::create(output)
        .await
        .with_context(|| format!("failed to create {}", output.display()))?;

    let metadata = BlobCodec::new(&resolver).encrypt(reader, BufWriter::new(writer)).await?;
    let rendered = render_metadata(&metadata);
    match metadata_path {
        Some(path) => tokio::fs::write(path, rendered)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{rendered}"),
    }
    Ok(())
}

async fn decrypt_blob(
    key: KeyArgs,
    input: &Path,
    output: &Path,
    metadata_path: &Path,
    stream: bool,
) -> Result<()> {
    let resolver = key.resolver()?;
    let metadata = read_metadata(metadata_path).await?;
    let reader = File::open(input)
        .await
        .with_context(|| format!("failed to open {}", input.display()))?;
    let mut writer = BufWriter::new(
        File::create(output)
            .await
            .with_context(|| format!("failed to create {}", output.display()))?,
    );

    let codec = BlobCodec::new(&resolver);
    let written = if stream {
        let mut decrypting = codec.decrypt_stream(reader, &metadata).await?;
        let copied = tokio::io::copy(&mut decrypting, &mut writer).await;
        match copied {
            Ok(n) => {
                writer.flush().await?;
                n
            }
            Err(err) => {
                drop(writer);
                let _ = tokio::fs::remove_file(output).await;
                if let Some(inner) = Error::from_io(&err) {
                    bail!("{inner}");
                }
                return Err(err.into());
            }
        }
    } else {
        codec.decrypt(reader, &mut writer, &metadata).await?
    };

    if let Some(expected) = metadata.unencrypted_content_length {
        if expected != written {
            tracing::warn!(expected, written, "decrypted length differs from metadata");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Commands::Keygen => keygen(),
        Commands::EncryptField { key, plaintext } => encrypt_field(key, &plaintext).await?,
        Commands::DecryptField { key, value } => decrypt_field(key, &value).await?,
        Commands::EncryptBlob { key, input, output, metadata } => {
            encrypt_blob(key, &input, &output, metadata.as_deref()).await?;
        }
        Commands::DecryptBlob { key, input, output, metadata, stream } => {
            decrypt_blob(key, &input, &output, &metadata, stream).await?;
        }
    }
    Ok(())
}
