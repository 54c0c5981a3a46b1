use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use resolver_auction::{AuctionParticipant, AuctionSettings, run_channel};
use resolver_backend::CoordinatorClient;
use resolver_chain::{LedgerService, RpcLedger};
use resolver_config::{Config, ConfigLoader, ObserveMode};
use resolver_engine::{AcquisitionEngine, BidRange, ThreadRandomness};
use resolver_observer::{ChainObserver, ConnectionHealth, ObservationMode, ObserverSettings};
use resolver_payout::PayoutClient;
use resolver_settlement::SettlementEngine;
use resolver_types::{OrderId, OrderTracker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Parser)]
#[command(name = "resolver-bot")]
#[command(about = "UPI settlement resolver bot", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	/// Path to configuration file
	#[arg(
		short,
		long,
		value_name = "FILE",
		env = "RESOLVER_CONFIG",
		default_value = "config/local.toml"
	)]
	config: PathBuf,

	/// Log level override (trace, debug, info, warn, error)
	#[arg(long, env = "RESOLVER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the resolver bot
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start(cli).await,
		Some(Commands::Validate) => validate(cli).await,
	}
}

async fn start(cli: Cli) -> Result<()> {
	info!("Starting resolver bot");
	info!("Loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Resolver address: {:#x}", config.resolver.address);
	info!("Ledger RPC: {}", config.chain.rpc_url);
	info!("Coordinator: {}", config.backend.url);
	info!("Observation mode: {:?}", config.chain.mode);

	let ledger = Arc::new(
		LedgerService::new(Arc::new(
			RpcLedger::new(
				config.chain.rpc_url.clone(),
				config.chain.contract_address,
				Duration::from_secs(config.chain.rpc_timeout_secs),
			)
			.context("Failed to build ledger client")?,
		))
		.with_grace(Duration::from_secs(config.chain.recovery_grace_secs)),
	);
	let coordinator = Arc::new(
		CoordinatorClient::new(
			config.backend.url.clone(),
			config.resolver.address,
			Duration::from_secs(config.backend.timeout_secs),
		)
		.context("Failed to build coordinator client")?,
	);
	let payout = Arc::new(
		PayoutClient::new(
			config.payout.api_url.clone(),
			&config.payout.key_id,
			&config.payout.key_secret,
			config.payout.account_number.clone(),
			Duration::from_secs(config.payout.timeout_secs),
		)
		.context("Failed to build payout client")?,
	);

	let tracker = Arc::new(OrderTracker::new());
	let rng = Arc::new(ThreadRandomness);

	let (settlement_tx, settlement_rx) = mpsc::channel::<OrderId>(64);
	let (sweep_tx, sweep_rx) = mpsc::channel::<()>(4);
	let (event_tx, mut event_rx) = mpsc::channel(256);
	let (shutdown_tx, shutdown_rx) = watch::channel(false);

	let engine = Arc::new(AcquisitionEngine::new(
		ledger.clone(),
		coordinator.clone(),
		tracker.clone(),
		rng.clone(),
		BidRange {
			min_fraction_bp: config.bidding.min_fraction_bp,
			max_fraction_bp: config.bidding.max_fraction_bp,
		},
		settlement_tx,
	));
	let settlement = Arc::new(SettlementEngine::new(
		ledger.clone(),
		payout,
		coordinator.clone(),
		tracker.clone(),
		config.resolver.address,
	));

	let health = Arc::new(ConnectionHealth::new());
	let observer = ChainObserver::new(
		ledger,
		observer_settings(&config),
		health,
		event_tx,
		sweep_tx,
	);
	let mut observer_handle = tokio::spawn({
		let shutdown = shutdown_rx.clone();
		async move { observer.run(shutdown).await }
	});

	let acquisition_handle = tokio::spawn({
		let engine = engine.clone();
		async move {
			while let Some(log) = event_rx.recv().await {
				if let Err(err) = engine.acquire(log.order_id).await {
					warn!(order_id = %log.order_id, error = %err, "acquisition failed");
				}
			}
		}
	});

	let settlement_handle = tokio::spawn(settlement_worker(
		settlement.clone(),
		settlement_rx,
		sweep_rx,
	));

	let auction_handle = config.auction.ws_url.clone().map(|ws_url| {
		let participant = Arc::new(AuctionParticipant::new(
			engine,
			coordinator.clone(),
			rng,
			AuctionSettings {
				participation_probability: config.auction.participation_probability,
				min_delay_ms: config.auction.min_delay_ms,
				max_delay_ms: config.auction.max_delay_ms,
				reconnect_delay: Duration::from_secs(config.auction.reconnect_secs),
			},
		));
		tokio::spawn(run_channel(
			participant,
			ws_url,
			Duration::from_secs(config.auction.reconnect_secs),
			shutdown_rx.clone(),
		))
	});

	let server_state = server::AppState {
		resolver: config.resolver.address,
		settlement,
		confirmation_delay: Duration::from_secs(1),
	};
	let server_handle = tokio::spawn(server::run(
		server_state,
		config.resolver.callback_port,
		shutdown_rx,
	));

	// Best effort: a coordinator that cannot push callbacks still sees
	// our acceptances, it just cannot fast-path our settlements.
	if let Err(err) = coordinator
		.register_callback(&config.resolver.callback_url())
		.await
	{
		warn!(error = %err, "callback registration failed, continuing without push notifications");
	}

	info!("Resolver bot started");

	// A dead observer means a blind bot: treat it like a startup
	// failure and exit non-zero instead of idling forever.
	let observer_failure = tokio::select! {
		_ = shutdown_signal() => {
			info!("Shutdown signal received, stopping services...");
			None
		}
		result = &mut observer_handle => {
			error!("Chain observation stopped, shutting down");
			Some(result)
		}
	};

	let _ = shutdown_tx.send(true);
	if observer_failure.is_none() {
		let _ = observer_handle.await;
	}
	let _ = server_handle.await;
	if let Some(handle) = auction_handle {
		let _ = handle.await;
	}
	acquisition_handle.abort();
	settlement_handle.abort();

	match observer_failure {
		None | Some(Ok(Ok(()))) => {
			info!("Resolver bot stopped");
			Ok(())
		}
		Some(Ok(Err(err))) => Err(err).context("Chain observation failed"),
		Some(Err(join_err)) => Err(join_err).context("Observer task aborted"),
	}
}

async fn validate(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration is valid");
	info!("Resolver address: {:#x}", config.resolver.address);
	info!("Ledger RPC: {}", config.chain.rpc_url);
	info!("Contract: {:#x}", config.chain.contract_address);
	info!("Coordinator: {}", config.backend.url);
	info!("Observation mode: {:?}", config.chain.mode);
	match &config.auction.ws_url {
		Some(url) => info!("Auction channel: {}", url),
		None => info!("Auction channel: disabled"),
	}

	Ok(())
}

fn observer_settings(config: &Config) -> ObserverSettings {
	ObserverSettings {
		mode: match config.chain.mode {
			ObserveMode::Polling => ObservationMode::Polling,
			ObserveMode::Subscription => ObservationMode::Subscription,
		},
		poll_interval: Duration::from_secs(config.chain.poll_interval_secs),
		max_blocks_per_poll: config.chain.max_blocks_per_poll,
		filter_poll_interval: Duration::from_secs(config.chain.filter_poll_interval_secs),
		health_check_interval: Duration::from_secs(config.chain.health_check_interval_secs),
		stale_block_threshold: config.chain.stale_block_threshold,
		filter_error_threshold: config.chain.filter_error_threshold,
		recovery_grace: Duration::from_secs(config.chain.recovery_grace_secs),
	}
}

/// Consumes settlement jobs and sweep requests. Settlements run one at
/// a time; the provider's idempotency key covers any re-delivery.
async fn settlement_worker(
	engine: Arc<SettlementEngine>,
	mut jobs: mpsc::Receiver<OrderId>,
	mut sweeps: mpsc::Receiver<()>,
) {
	loop {
		tokio::select! {
			job = jobs.recv() => match job {
				Some(order_id) => {
					if let Err(err) = engine.settle(order_id).await {
						error!(order_id = %order_id, error = %err, "settlement failed");
					}
				}
				None => break,
			},
			sweep = sweeps.recv() => match sweep {
				Some(()) => {
					engine.sweep().await;
				}
				None => break,
			},
		}
	}
	info!("settlement worker stopped");
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
