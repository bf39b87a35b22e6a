use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result};
use fs2::FileExt;
use rust_decimal::Decimal;

use payout_pipeline::config::PipelineConfig;
use payout_pipeline::driver::Driver;
use payout_pipeline::ledger::LedgerClient;
use payout_pipeline::model::{Amount, LedgerAddress};
use payout_pipeline::store::Store;
use payout_pipeline::{artifact, ledger, store};

#[derive(Parser, Debug)]
#[command(
    name = "payout-pipeline",
    version,
    about = "Drains pending ledger payments under a single funding account's sequence discipline"
)]
struct Args {
    /// Funding account address the pipeline signs and submits under.
    #[arg(long, env = "PAYOUT_FUNDING_ADDRESS")]
    funding_address: String,

    /// Environment variable holding the funding account's signing secret.
    ///
    /// Never logged; read lazily by whatever `LedgerClient` needs it.
    #[arg(long, default_value = "PAYOUT_FUNDING_SECRET")]
    funding_secret_env: String,

    /// Postgres connection string. If omitted, runs against an
    /// in-memory store that does not survive a restart.
    #[arg(long, env = "PAYOUT_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the drain loop (sign, submit, confirm) until interrupted.
    Run {
        /// Poll interval between ticks, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        poll_interval_ms: u64,

        /// Max number of rows allowed Signed or Submitted at once.
        #[arg(long, default_value_t = 10)]
        max_in_flight: u32,

        /// Run a single tick and exit.
        #[arg(long)]
        once: bool,

        /// Use the in-memory fake ledger and store instead of live
        /// ones, regardless of --database-url.
        #[arg(long)]
        dry_run: bool,
    },
    /// Operator surface: enqueue a new Pending payment.
    Enqueue {
        destination: String,
        amount: Decimal,
        /// Omit for the ledger's native asset.
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        issuer: Option<String>,
        #[arg(long)]
        memo: Option<String>,
    },
    /// Operator surface: abort a non-terminal row.
    Abort { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Validated up front so a typo surfaces before we touch the lock
    // file or any store.
    LedgerAddress::from_str(&args.funding_address)
        .map_err(|e| eyre!("invalid --funding-address: {e}"))?;

    // Single-instance guard: prevents two pipeline processes from
    // racing over the same funding account's sequence counter, the
    // in-process generalization of the same guarantee the teacher's
    // `fs2` lock file gives a single keeper wallet.
    let lock_path = std::env::temp_dir().join("payout-pipeline.lock");
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| eyre!("failed to open lock file {}: {e}", lock_path.display()))?;
    lock_file.try_lock_exclusive().map_err(|e| {
        eyre!(
            "pipeline already running or lock unavailable ({}): {e}",
            lock_path.display()
        )
    })?;
    let _lock_guard = lock_file;

    match args.command {
        Command::Run {
            poll_interval_ms,
            max_in_flight,
            once,
            dry_run,
        } => {
            let cfg = PipelineConfig::from_cli(
                args.funding_address,
                args.funding_secret_env,
                poll_interval_ms,
                max_in_flight,
                args.database_url,
                once,
                dry_run,
            )?;
            run(cfg).await
        }
        Command::Enqueue {
            destination,
            amount,
            currency,
            issuer,
            memo,
        } => enqueue(args.database_url, destination, amount, currency, issuer, memo).await,
        Command::Abort { id } => abort(args.database_url, id).await,
    }
}

async fn build_store(database_url: Option<&str>) -> Result<Arc<dyn Store>> {
    match database_url {
        #[cfg(feature = "postgres")]
        Some(url) => {
            let store = store::postgres::PostgresStore::connect(url, 10)
                .await
                .map_err(|e| eyre!("{e}"))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => Err(eyre!(
            "--database-url given but this binary was built without the `postgres` feature"
        )),
        None => Ok(Arc::new(store::memory::MemoryStore::new())),
    }
}

#[cfg(feature = "live-ledger")]
fn build_ledger(cfg: &PipelineConfig) -> Result<Arc<dyn LedgerClient>> {
    if cfg.dry_run {
        return Ok(Arc::new(ledger::fake::FakeLedgerClient::new()));
    }
    let endpoint = std::env::var("PAYOUT_LEDGER_ENDPOINT")
        .map_err(|_| eyre!("PAYOUT_LEDGER_ENDPOINT must be set to use a live ledger"))?;
    Ok(Arc::new(ledger::http::HttpLedgerClient::new(endpoint)))
}

#[cfg(not(feature = "live-ledger"))]
fn build_ledger(_cfg: &PipelineConfig) -> Result<Arc<dyn LedgerClient>> {
    Ok(Arc::new(ledger::fake::FakeLedgerClient::new()))
}

async fn run(cfg: PipelineConfig) -> Result<()> {
    tracing::info!(
        funding_address = %cfg.funding_address,
        max_in_flight = cfg.max_in_flight,
        poll_interval_ms = cfg.poll_interval.as_millis(),
        once = cfg.once,
        dry_run = cfg.dry_run,
        "pipeline starting"
    );

    // Fail fast if the funding secret isn't where --funding-secret-env
    // says it is, the same check the teacher does for its own signing
    // key (`keeper-rs/src/main.rs`'s `std::env::var(&cfg.private_key_env)`).
    // The value itself is never read into a variable that could end up
    // logged; this only proves it's there for whatever signs artifacts.
    std::env::var(&cfg.funding_secret_env).map_err(|_| {
        eyre!(
            "missing funding secret env var '{}'. Set it in your shell before running.",
            cfg.funding_secret_env
        )
    })?;

    let store = if cfg.dry_run {
        Arc::new(store::memory::MemoryStore::new()) as Arc<dyn Store>
    } else {
        build_store(cfg.database_url.as_deref()).await?
    };

    let ledger = build_ledger(&cfg)?;
    let driver = Driver::new(store, ledger, cfg.funding_address.clone());

    loop {
        match driver
            .tick(cfg.max_in_flight, artifact::placeholder_artifact)
            .await
        {
            Ok(report) => {
                tracing::info!(
                    signed = report.signed,
                    submitted = report.submitted,
                    confirmed = report.confirmed,
                    resigned = report.resigned,
                    "cycle complete"
                );
            }
            Err(err) => {
                // `tick` only ever returns `Err` once the pipeline is
                // fatally wedged (spec §4.5.1) -- transient and
                // resign-recoverable failures are already logged and
                // swallowed inside it. Keep polling instead of exiting:
                // an operator aborts the offending row out of band, and
                // the wedge only clears on a later tick (§7, §8 scenario
                // 5 "Fatal then abort"). Exiting here would mean there
                // is never a "subsequent tick" for that to happen on.
                tracing::error!(error = %err, "pipeline wedged; will recheck next poll");
            }
        }

        if cfg.once {
            break;
        }

        tokio::time::sleep(cfg.poll_interval).await;
    }

    Ok(())
}

async fn enqueue(
    database_url: Option<String>,
    destination: String,
    amount: Decimal,
    currency: Option<String>,
    issuer: Option<String>,
    memo: Option<String>,
) -> Result<()> {
    let store = build_store(database_url.as_deref()).await?;
    let destination = LedgerAddress::from_str(&destination)
        .map_err(|e| eyre!("invalid destination address: {e}"))?;

    let amount = match (currency, issuer) {
        (Some(currency), Some(issuer)) => Amount::Issued {
            value: amount,
            currency,
            issuer: LedgerAddress::from_str(&issuer)
                .map_err(|e| eyre!("invalid issuer address: {e}"))?,
        },
        (None, None) => Amount::Native(amount),
        _ => {
            return Err(eyre!(
                "--currency and --issuer must be given together for an issued amount"
            ))
        }
    };

    let id = store
        .insert_pending(destination, amount, memo)
        .await
        .map_err(|e| eyre!("{e}"))?;

    tracing::info!(id, "enqueued payment");
    Ok(())
}

async fn abort(database_url: Option<String>, id: i64) -> Result<()> {
    let store = build_store(database_url.as_deref()).await?;
    store.abort(id).await.map_err(|e| eyre!("{e}"))?;
    tracing::info!(id, "aborted payment");
    Ok(())
}
