use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chain_core::crypto;
use chain_core::{canonical_json, Transaction};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chain-cli")]
#[command(about = "Client for the blockchain node: keys, signing, and submission")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an RSA key pair and write private.pem / public.pem
    Keygen {
        /// RSA key size in bits (2048 minimum)
        #[arg(long, default_value_t = 2048)]
        key_bits: usize,
        /// Directory the key files are written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Sign a transaction body and print the ready-to-POST submission
    Sign {
        /// Path to the signer's private key PEM
        #[arg(long)]
        private_key: PathBuf,
        /// The transaction body as JSON ({"key":..,"value":..,"from":..,"to":..,"coinAmount":..})
        #[arg(long)]
        body: String,
    },
    /// Sign a transaction and submit it to a node
    Submit {
        /// Node base URL (e.g. http://127.0.0.1:8080)
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        node: String,
        /// Path to the sender's private key PEM
        #[arg(long)]
        private_key: PathBuf,
        /// Searchable key
        #[arg(long)]
        key: String,
        /// Opaque value
        #[arg(long, default_value = "")]
        value: String,
        /// Recipient public key PEM (inline or a file path)
        #[arg(long)]
        to: String,
        /// Coin amount
        #[arg(long, default_value_t = 0.0)]
        amount: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Keygen { key_bits, out } => keygen(key_bits, &out),
        Command::Sign { private_key, body } => sign(&private_key, &body),
        Command::Submit {
            node,
            private_key,
            key,
            value,
            to,
            amount,
        } => submit(&node, &private_key, key, value, to, amount).await,
    }
}

fn keygen(key_bits: usize, out: &Path) -> Result<()> {
    let private_key = crypto::generate_private_key(key_bits)?;
    let public_pem = crypto::public_key_to_pem(&private_key.to_public_key())?;
    let private_pem = crypto::private_key_to_pem(&private_key)?;

    fs::create_dir_all(out)?;
    fs::write(out.join("private.pem"), private_pem)?;
    fs::write(out.join("public.pem"), &public_pem)?;
    println!("wrote {}", out.join("private.pem").display());
    println!("wrote {}", out.join("public.pem").display());
    println!("{public_pem}");
    Ok(())
}

fn load_private_key(path: &Path) -> Result<chain_core::crypto::NodeKeys> {
    let pem = fs::read_to_string(path)
        .with_context(|| format!("could not read private key {}", path.display()))?;
    let private_key = crypto::private_key_from_pem(&pem)?;
    Ok(crypto::NodeKeys::from_private_key(private_key)?)
}

/// Re-encode the body before signing so the signed bytes match the node's
/// canonical encoding regardless of how the input JSON was formatted.
fn build_submission(keys: &chain_core::crypto::NodeKeys, mut body: Transaction) -> Result<String> {
    if body.from.is_empty() {
        body.from = keys.public_pem().to_string();
    }
    let canonical = canonical_json(&body)?;
    let body_signed = crypto::signature_to_hex(&keys.sign(&canonical));
    Ok(serde_json::json!({"bodySigned": body_signed, "submit": body}).to_string())
}

fn sign(private_key: &Path, body: &str) -> Result<()> {
    let keys = load_private_key(private_key)?;
    let body: Transaction = serde_json::from_str(body).context("could not parse the body JSON")?;
    println!("{}", build_submission(&keys, body)?);
    Ok(())
}

async fn submit(
    node: &str,
    private_key: &Path,
    key: String,
    value: String,
    to: String,
    amount: f64,
) -> Result<()> {
    let keys = load_private_key(private_key)?;
    // a recipient given as a file path is read; anything else is inline PEM
    let to = match fs::read_to_string(&to) {
        Ok(pem) => pem,
        Err(_) => to,
    };
    let body = Transaction {
        key,
        value,
        from: keys.public_pem().to_string(),
        to,
        coin_amount: amount,
    };
    let submission = build_submission(&keys, body)?;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{node}/transaction"))
        .header("content-type", "application/json")
        .body(submission)
        .send()
        .await?;
    let status = response.status();
    let reply = response.text().await?;
    println!("status: {status}");
    println!("{reply}");
    Ok(())
}
