//! Chain observation: turns ledger history into an ordered stream of
//! order events.
//!
//! Two modes share one dispatch path. Polling reads block ranges behind
//! a watermark and is the mode of last resort; subscription installs a
//! server-side filter and degrades to polling permanently once the
//! node proves it cannot keep filters alive. Every recovery decision is
//! made here, off a typed error class, never by catching a process-wide
//! failure.

use resolver_chain::{ChainError, ErrorClass, FilterId, LedgerService, classify};
use resolver_types::{BlockNumber, OrderLog, OrderLogKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationMode {
	Polling,
	Subscription,
}

#[derive(Debug, Clone)]
pub struct ObserverSettings {
	pub mode: ObservationMode,
	pub poll_interval: Duration,
	pub max_blocks_per_poll: u64,
	pub filter_poll_interval: Duration,
	pub health_check_interval: Duration,
	pub stale_block_threshold: u64,
	pub filter_error_threshold: u32,
	pub recovery_grace: Duration,
}

impl Default for ObserverSettings {
	fn default() -> Self {
		Self {
			mode: ObservationMode::Polling,
			poll_interval: Duration::from_secs(15),
			max_blocks_per_poll: 100,
			filter_poll_interval: Duration::from_secs(4),
			health_check_interval: Duration::from_secs(60),
			stale_block_threshold: 50,
			filter_error_threshold: 3,
			recovery_grace: Duration::from_secs(2),
		}
	}
}

/// Shared observation health, readable from the service layer. Only
/// the observer task writes here.
#[derive(Debug, Default)]
pub struct ConnectionHealth {
	last_seen_block: AtomicU64,
	filter_errors: AtomicU32,
	subscription_active: AtomicBool,
}

impl ConnectionHealth {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn observe_block(&self, block: BlockNumber) {
		self.last_seen_block.fetch_max(block, Ordering::SeqCst);
	}

	pub fn last_seen_block(&self) -> BlockNumber {
		self.last_seen_block.load(Ordering::SeqCst)
	}

	pub fn record_filter_error(&self) -> u32 {
		self.filter_errors.fetch_add(1, Ordering::SeqCst) + 1
	}

	pub fn filter_errors(&self) -> u32 {
		self.filter_errors.load(Ordering::SeqCst)
	}

	pub fn set_subscription_active(&self, active: bool) {
		self.subscription_active.store(active, Ordering::SeqCst);
	}

	pub fn subscription_active(&self) -> bool {
		self.subscription_active.load(Ordering::SeqCst)
	}

	/// True when the chain head ran further ahead of the last observed
	/// event than the threshold allows.
	pub fn is_stale(&self, head: BlockNumber, threshold: u64) -> bool {
		head.saturating_sub(self.last_seen_block()) > threshold
	}
}

enum SubscriptionExit {
	FellBack,
	Shutdown,
}

pub struct ChainObserver {
	ledger: Arc<LedgerService>,
	settings: ObserverSettings,
	health: Arc<ConnectionHealth>,
	sink: mpsc::Sender<OrderLog>,
	sweep_tx: mpsc::Sender<()>,
}

impl ChainObserver {
	pub fn new(
		ledger: Arc<LedgerService>,
		settings: ObserverSettings,
		health: Arc<ConnectionHealth>,
		sink: mpsc::Sender<OrderLog>,
		sweep_tx: mpsc::Sender<()>,
	) -> Self {
		Self {
			ledger,
			settings,
			health,
			sink,
			sweep_tx,
		}
	}

	/// Observes until shutdown. The initial head read doubles as the
	/// startup connection test; its failure aborts startup.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ChainError> {
		let head = self.ledger.block_number().await?;
		info!(head, "connected to ledger");
		self.health.observe_block(head);
		let mut watermark = head;

		if self.settings.mode == ObservationMode::Subscription {
			match self.run_subscription(&mut shutdown, &mut watermark).await {
				SubscriptionExit::Shutdown => return Ok(()),
				SubscriptionExit::FellBack => {
					info!("subscription mode disabled for this run, polling from here on");
				}
			}
		}

		let mut ticker = time::interval(self.settings.poll_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = shutdown.changed() => break,
				_ = ticker.tick() => self.poll_once(&mut watermark).await,
			}
		}
		info!("observer stopped");
		Ok(())
	}

	/// One polling cycle: query at most `max_blocks_per_poll` above the
	/// watermark, dispatch, advance. The watermark moves even for empty
	/// ranges so quiet periods are never re-scanned.
	async fn poll_once(&self, watermark: &mut BlockNumber) {
		let head = match self.ledger.block_number().await {
			Ok(head) => head,
			Err(err) => return self.handle_cycle_error("block_number", err),
		};
		if head <= *watermark {
			return;
		}

		let from = *watermark + 1;
		let to = head.min(*watermark + self.settings.max_blocks_per_poll);
		let result = self
			.ledger
			.with_recovery("query_order_logs", || {
				self.ledger.inner().query_order_logs(from, to)
			})
			.await;

		match result {
			Ok(logs) => {
				if !logs.is_empty() {
					info!(from, to, count = logs.len(), "order events in range");
				}
				self.dispatch(logs).await;
				*watermark = to;
			}
			Err(err) => self.handle_cycle_error("query_order_logs", err),
		}
	}

	/// A failed cycle never stops observation. Timeouts additionally
	/// nudge the settlement sweep, since a slow node is the usual
	/// reason a payment confirmation went unseen.
	fn handle_cycle_error(&self, operation: &str, err: ChainError) {
		let class = classify(&err);
		warn!(operation, class = ?class, error = %err, "observation cycle failed");
		if class == ErrorClass::TransientTimeout {
			let _ = self.sweep_tx.try_send(());
		}
	}

	async fn dispatch(&self, logs: Vec<OrderLog>) {
		for log in logs {
			self.health.observe_block(log.block_number);
			match &log.kind {
				OrderLogKind::Created { maker, amount } => {
					info!(
						order_id = %log.order_id,
						maker = %maker,
						amount = %amount,
						block = log.block_number,
						"order created"
					);
					if self.sink.send(log).await.is_err() {
						warn!("acquisition sink closed, dropping remaining events");
						return;
					}
				}
				OrderLogKind::Accepted { taker, price } => {
					info!(
						order_id = %log.order_id,
						taker = %taker,
						price = %price,
						block = log.block_number,
						"order accepted on ledger"
					);
				}
			}
		}
	}

	async fn run_subscription(
		&self,
		shutdown: &mut watch::Receiver<bool>,
		watermark: &mut BlockNumber,
	) -> SubscriptionExit {
		self.health.set_subscription_active(true);

		let mut filter_id = match self.install_filter().await {
			Ok(id) => id,
			Err(err) => {
				warn!(error = %err, "filter installation failed, using polling");
				self.health.set_subscription_active(false);
				return SubscriptionExit::FellBack;
			}
		};
		info!(filter_id = %filter_id, "subscription filter installed");

		let mut poll_tick = time::interval(self.settings.filter_poll_interval);
		poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
		// First health check one full interval out, not immediately.
		let mut health_tick = time::interval_at(
			time::Instant::now() + self.settings.health_check_interval,
			self.settings.health_check_interval,
		);

		loop {
			tokio::select! {
				_ = shutdown.changed() => {
					let _ = self.ledger.inner().uninstall_filter(&filter_id).await;
					self.health.set_subscription_active(false);
					return SubscriptionExit::Shutdown;
				}
				_ = poll_tick.tick() => {
					match self.ledger.inner().poll_filter(&filter_id).await {
						Ok(logs) => {
							self.dispatch(logs).await;
							*watermark = (*watermark).max(self.health.last_seen_block());
						}
						Err(err) => {
							if let Some(exit) = self
								.handle_subscription_error(&mut filter_id, err)
								.await
							{
								return exit;
							}
						}
					}
				}
				_ = health_tick.tick() => {
					self.health_check(&mut filter_id).await;
				}
			}
		}
	}

	/// Stale-filter escalation: grace delay and a fresh filter per
	/// error, permanent fallback at the threshold. The threshold
	/// comparison runs only while subscribed, which makes the
	/// Subscription to Polling switch one-way.
	async fn handle_subscription_error(
		&self,
		filter_id: &mut FilterId,
		err: ChainError,
	) -> Option<SubscriptionExit> {
		match classify(&err) {
			ErrorClass::StaleSubscription => {
				let errors = self.health.record_filter_error();
				warn!(
					errors,
					threshold = self.settings.filter_error_threshold,
					error = %err,
					"subscription filter went stale"
				);

				if errors >= self.settings.filter_error_threshold {
					warn!("filter error threshold reached, falling back to polling permanently");
					let _ = self.ledger.inner().uninstall_filter(filter_id).await;
					self.health.set_subscription_active(false);
					return Some(SubscriptionExit::FellBack);
				}

				time::sleep(self.settings.recovery_grace).await;
				self.recreate_filter(filter_id).await;
				None
			}
			ErrorClass::Connection => {
				warn!(error = %err, "ledger connection lost, rebuilding");
				if let Err(reconnect_err) = self.ledger.inner().reconnect().await {
					warn!(error = %reconnect_err, "reconnect failed");
				}
				self.recreate_filter(filter_id).await;
				None
			}
			class => {
				warn!(class = ?class, error = %err, "filter poll failed");
				None
			}
		}
	}

	/// Subscription-mode safety net: a silent filter over a moving
	/// chain means the node stopped delivering, even without errors.
	async fn health_check(&self, filter_id: &mut FilterId) {
		let head = match self.ledger.block_number().await {
			Ok(head) => head,
			Err(err) => {
				warn!(error = %err, "health check head read failed");
				return;
			}
		};

		if self.health.is_stale(head, self.settings.stale_block_threshold) {
			warn!(
				head,
				last_seen = self.health.last_seen_block(),
				threshold = self.settings.stale_block_threshold,
				"no events within staleness window, recreating listener"
			);
			self.recreate_filter(filter_id).await;
			// Reset the baseline so the next window measures from now.
			self.health.observe_block(head);
		}
	}

	async fn recreate_filter(&self, filter_id: &mut FilterId) {
		let _ = self.ledger.inner().uninstall_filter(filter_id).await;
		match self.install_filter().await {
			Ok(id) => {
				info!(filter_id = %id, "filter recreated");
				*filter_id = id;
			}
			// Keep the old id; the next poll error escalates again.
			Err(err) => warn!(error = %err, "filter recreation failed"),
		}
	}

	async fn install_filter(&self) -> Result<FilterId, ChainError> {
		self.ledger
			.with_recovery("install_filter", || self.ledger.inner().install_filter())
			.await
	}
}
