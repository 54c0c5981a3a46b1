//! Live auction participation.
//!
//! The coordinator runs descending-price auctions over a WebSocket
//! channel. The participant joins a fraction of them, waits a random
//! beat so identical bots do not race deterministically, re-checks the
//! auction is still live, then accepts at the price the coordinator
//! reports. The coordinator's clock is authoritative; the prices in
//! the start message are informational only.

mod channel;

pub use channel::run_channel;

use dashmap::DashMap;
use resolver_backend::CoordinatorClient;
use resolver_engine::{AcquireOutcome, AcquisitionEngine, Randomness};
use resolver_types::{AuctionMessage, OrderId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AuctionSettings {
	pub participation_probability: f64,
	pub min_delay_ms: u64,
	pub max_delay_ms: u64,
	pub reconnect_delay: Duration,
}

impl Default for AuctionSettings {
	fn default() -> Self {
		Self {
			participation_probability: 0.7,
			min_delay_ms: 500,
			max_delay_ms: 4500,
			reconnect_delay: Duration::from_secs(5),
		}
	}
}

struct AuctionSession {
	timer: JoinHandle<()>,
	// None until the first price update, which always logs.
	last_logged_step: Option<u8>,
}

/// Progress bucket for throttled price logging, one per 20%.
fn progress_step(progress: f64) -> u8 {
	(progress.clamp(0.0, 100.0) / 20.0) as u8
}

pub struct AuctionParticipant {
	engine: Arc<AcquisitionEngine>,
	coordinator: Arc<CoordinatorClient>,
	rng: Arc<dyn Randomness>,
	settings: AuctionSettings,
	sessions: DashMap<OrderId, AuctionSession>,
}

impl AuctionParticipant {
	pub fn new(
		engine: Arc<AcquisitionEngine>,
		coordinator: Arc<CoordinatorClient>,
		rng: Arc<dyn Randomness>,
		settings: AuctionSettings,
	) -> Self {
		Self {
			engine,
			coordinator,
			rng,
			settings,
			sessions: DashMap::new(),
		}
	}

	pub fn active_sessions(&self) -> usize {
		self.sessions.len()
	}

	pub async fn on_message(self: &Arc<Self>, message: AuctionMessage) {
		match message {
			AuctionMessage::Started {
				order_id,
				start_price,
				end_price,
				duration,
			} => self.on_started(order_id, start_price, end_price, duration),
			AuctionMessage::PriceUpdate {
				order_id,
				current_price,
				progress,
			} => self.on_price_update(order_id, current_price, progress),
			AuctionMessage::Accepted { order_id } => {
				info!(order_id = %order_id, "auction accepted elsewhere");
				self.cleanup(order_id);
			}
			AuctionMessage::Ended { order_id, reason } => {
				info!(
					order_id = %order_id,
					reason = reason.as_deref().unwrap_or("unspecified"),
					"auction ended"
				);
				self.cleanup(order_id);
			}
		}
	}

	fn on_started(self: &Arc<Self>, order_id: OrderId, start: f64, end: f64, duration: u64) {
		if self.sessions.contains_key(&order_id) {
			return;
		}

		if !self
			.rng
			.participate(self.settings.participation_probability)
		{
			info!(order_id = %order_id, "sitting this auction out");
			return;
		}

		let delay = self
			.rng
			.delay_ms(self.settings.min_delay_ms, self.settings.max_delay_ms);
		info!(
			order_id = %order_id,
			start_price = start,
			end_price = end,
			duration_ms = duration,
			delay_ms = delay,
			"joining auction"
		);

		let participant = Arc::clone(self);
		let timer = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(delay)).await;
			participant.fire(order_id).await;
		});
		self.sessions.insert(
			order_id,
			AuctionSession {
				timer,
				last_logged_step: None,
			},
		);
	}

	fn on_price_update(&self, order_id: OrderId, current_price: f64, progress: f64) {
		let Some(mut session) = self.sessions.get_mut(&order_id) else {
			return;
		};
		let step = progress_step(progress);
		if session.last_logged_step.map_or(true, |last| step > last) {
			session.last_logged_step = Some(step);
			info!(
				order_id = %order_id,
				current_price,
				progress,
				"auction price update"
			);
		}
	}

	/// The delayed acceptance attempt. Whatever happens, the session is
	/// cleaned up exactly once at the end.
	async fn fire(&self, order_id: OrderId) {
		if !self.sessions.contains_key(&order_id) {
			return;
		}

		match self.coordinator.auction_status(order_id).await {
			Ok(status) if status.active => {
				let price = format!("{}", status.current_price);
				info!(order_id = %order_id, price, "attempting auction acceptance");
				match self.engine.accept_at(order_id, &price).await {
					Ok(AcquireOutcome::Won) => {
						info!(order_id = %order_id, price, "auction won");
					}
					Ok(AcquireOutcome::Lost) => {
						info!(order_id = %order_id, "auction lost to another resolver");
					}
					Ok(outcome) => {
						info!(order_id = %order_id, ?outcome, "auction acceptance skipped");
					}
					Err(err) => {
						warn!(order_id = %order_id, error = %err, "auction acceptance failed");
					}
				}
			}
			Ok(_) => {
				info!(order_id = %order_id, "auction no longer active");
			}
			Err(err) => {
				warn!(order_id = %order_id, error = %err, "auction status check failed");
			}
		}

		self.cleanup(order_id);
	}

	fn cleanup(&self, order_id: OrderId) {
		if let Some((_, session)) = self.sessions.remove(&order_id) {
			session.timer.abort();
		}
	}

	/// Aborts every pending timer and drops all sessions.
	pub fn shutdown(&self) {
		for entry in self.sessions.iter() {
			entry.value().timer.abort();
		}
		self.sessions.clear();
	}
}
