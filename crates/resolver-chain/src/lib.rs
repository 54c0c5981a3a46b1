//! Ledger access for the resolver bot.
//!
//! The order protocol contract is a black box behind [`LedgerInterface`]:
//! a view call for order state, block-range log queries for the polling
//! observer and server-side filters for the subscription observer.
//! [`LedgerService`] wraps any implementation with the retry-and-recover
//! policy every chain read in the bot goes through.

pub mod abi;
pub mod classify;
mod rpc;

pub use classify::{classify, ErrorClass};
pub use rpc::RpcLedger;

use async_trait::async_trait;
use resolver_types::{BlockNumber, Order, OrderId, OrderLog};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Server-side filter handle returned by the RPC node.
pub type FilterId = String;

#[derive(Debug, Error)]
pub enum ChainError {
	#[error("request timed out: {0}")]
	Timeout(String),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("rpc error {code}: {message}")]
	Rpc { code: i64, message: String },

	/// The node no longer recognizes a previously installed filter, or
	/// returned a filter-changes payload that is not a log list.
	#[error("stale subscription: {0}")]
	FilterExpired(String),

	#[error("decode error: {0}")]
	Decode(String),
}

#[async_trait]
pub trait LedgerInterface: Send + Sync {
	async fn block_number(&self) -> Result<BlockNumber, ChainError>;

	async fn get_order(&self, order_id: OrderId) -> Result<Order, ChainError>;

	/// Order protocol logs in the inclusive block range, sorted by
	/// (block, log index).
	async fn query_order_logs(
		&self,
		from: BlockNumber,
		to: BlockNumber,
	) -> Result<Vec<OrderLog>, ChainError>;

	async fn install_filter(&self) -> Result<FilterId, ChainError>;

	async fn poll_filter(&self, filter_id: &FilterId) -> Result<Vec<OrderLog>, ChainError>;

	async fn uninstall_filter(&self, filter_id: &FilterId) -> Result<(), ChainError>;

	/// Tears down and rebuilds the underlying connection.
	async fn reconnect(&self) -> Result<(), ChainError>;
}

/// Ledger access with automatic recovery on transient faults.
///
/// Each wrapped call retries up to `retries` times. Between attempts
/// the recovery action for the error class runs: a grace delay for
/// stale subscriptions and timeouts, a full reconnect for connection
/// failures. Unrecoverable errors surface immediately. A failure after
/// all retries is fatal for that operation only, never for the process.
pub struct LedgerService {
	inner: Arc<dyn LedgerInterface>,
	retries: u32,
	grace: Duration,
}

impl LedgerService {
	pub fn new(inner: Arc<dyn LedgerInterface>) -> Self {
		Self {
			inner,
			retries: 2,
			grace: Duration::from_secs(2),
		}
	}

	pub fn with_grace(mut self, grace: Duration) -> Self {
		self.grace = grace;
		self
	}

	pub fn inner(&self) -> &Arc<dyn LedgerInterface> {
		&self.inner
	}

	pub async fn with_recovery<T, F, Fut>(
		&self,
		operation: &str,
		mut call: F,
	) -> Result<T, ChainError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, ChainError>>,
	{
		let mut attempt = 0u32;
		loop {
			match call().await {
				Ok(value) => return Ok(value),
				Err(err) => {
					attempt += 1;
					let class = classify(&err);
					if class == ErrorClass::Fatal || attempt > self.retries {
						warn!(
							operation,
							attempt,
							error = %err,
							"ledger operation failed"
						);
						return Err(err);
					}

					warn!(
						operation,
						attempt,
						class = ?class,
						error = %err,
						"recovering ledger operation"
					);

					if class == ErrorClass::Connection {
						if let Err(reconnect_err) = self.inner.reconnect().await {
							warn!(error = %reconnect_err, "reconnect failed, retrying anyway");
						}
					}
					tokio::time::sleep(self.grace).await;
				}
			}
		}
	}

	/// Recovery-wrapped order read; the path every acquisition and
	/// settlement precondition check uses.
	pub async fn get_order(&self, order_id: OrderId) -> Result<Order, ChainError> {
		self.with_recovery("get_order", || self.inner.get_order(order_id))
			.await
	}

	pub async fn block_number(&self) -> Result<BlockNumber, ChainError> {
		self.with_recovery("block_number", || self.inner.block_number())
			.await
	}
}
