use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use zenka_payments::application::admin::LedgerAdmin;
use zenka_payments::application::initiator::PaymentInitiator;
use zenka_payments::application::reconciler::{CallbackPayload, CallbackReconciler};
use zenka_payments::domain::ports::{SharedLedgerStore, SharedPaymentGateway};
use zenka_payments::infrastructure::in_memory::InMemoryLedgerStore;
use zenka_payments::infrastructure::lipwa::{DEFAULT_BASE_URL, GatewayConfig, LipwaGateway};
use zenka_payments::interfaces::csv::balance_writer::BalanceWriter;
use zenka_payments::interfaces::http::{self, AppState, ServerConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). Requires the storage-rocksdb feature.
    #[arg(long, env = "ZENKA_DB_PATH", global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Print all savings balances as CSV
    Balances,
    /// Reconcile a stored provider callback payload
    ReplayCallback {
        /// JSON file holding the callback body
        payload: PathBuf,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "ZENKA_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    #[arg(long, env = "LIPWA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    gateway_url: String,

    #[arg(long, env = "LIPWA_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "LIPWA_CHANNEL_ID", default_value = "")]
    channel_id: String,

    /// Public URL the provider posts callbacks to
    #[arg(long, env = "ZENKA_CALLBACK_URL")]
    callback_url: Option<String>,

    #[arg(long, default_value_t = 30)]
    gateway_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let store = open_store(cli.db_path)?;

    match cli.command {
        Command::Serve(args) => serve(store, args).await,
        Command::Balances => {
            let accounts = store.all_savings().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = BalanceWriter::new(stdout.lock());
            writer.write_balances(&accounts).into_diagnostic()?;
            Ok(())
        }
        Command::ReplayCallback { payload } => {
            let raw = std::fs::read(&payload).into_diagnostic()?;
            let payload: CallbackPayload = serde_json::from_slice(&raw).into_diagnostic()?;
            let ack = CallbackReconciler::new(store).reconcile(payload).await;
            println!("{}", serde_json::to_string(&ack).into_diagnostic()?);
            Ok(())
        }
    }
}

async fn serve(store: SharedLedgerStore, args: ServeArgs) -> Result<()> {
    let gateway: SharedPaymentGateway = Arc::new(
        LipwaGateway::new(GatewayConfig {
            base_url: args.gateway_url,
            api_key: args.api_key,
            channel_id: args.channel_id,
            timeout: Duration::from_secs(args.gateway_timeout_secs),
        })
        .into_diagnostic()?,
    );
    let config = ServerConfig::new(args.bind, args.callback_url);

    let state = AppState {
        initiator: Arc::new(PaymentInitiator::new(
            store.clone(),
            gateway,
            config.callback_url.clone(),
        )),
        reconciler: Arc::new(CallbackReconciler::new(store.clone())),
        admin: Arc::new(LedgerAdmin::new(store)),
    };
    http::serve(&config, state).await.into_diagnostic()
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<SharedLedgerStore> {
    use zenka_payments::infrastructure::rocksdb::RocksDBLedgerStore;

    match db_path {
        Some(path) => Ok(Arc::new(RocksDBLedgerStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<SharedLedgerStore> {
    use log::warn;

    if let Some(path) = db_path {
        warn!(
            "Built without storage-rocksdb; ignoring {} and keeping the ledger in memory",
            path.display()
        );
    }
    Ok(Arc::new(InMemoryLedgerStore::new()))
}
