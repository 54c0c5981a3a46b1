//! Settlement of accepted orders over the UPI rail.
//!
//! An order we hold as taker is settled by paying the maker's UPI
//! address through the payment provider and submitting the payout id
//! to the coordinator as proof. Preconditions are checked against the
//! ledger before any money moves; a violated precondition aborts with
//! zero provider calls.

use resolver_backend::{BackendError, CoordinatorClient};
use resolver_chain::{ChainError, LedgerService};
use resolver_payout::{PayoutClient, PayoutError};
use resolver_types::{
	Address, AmountError, Order, OrderId, OrderTracker, amount_to_paise,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SettlementError {
	#[error("order is not accepted on the ledger")]
	NotAccepted,

	#[error("order is already fulfilled")]
	AlreadyFulfilled,

	#[error("order is held by another taker: {taker}")]
	NotTaker { taker: Address },

	#[error(transparent)]
	Chain(#[from] ChainError),

	#[error(transparent)]
	Amount(#[from] AmountError),

	#[error(transparent)]
	Provider(#[from] PayoutError),

	#[error("coordinator rejected the payment proof ({status}): {body}")]
	ProofRejected { status: u16, body: String },

	#[error(transparent)]
	Backend(BackendError),
}

/// Everything known about a completed settlement, for the summary log
/// and for callers that want the payout id.
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
	pub order_id: OrderId,
	pub payout_id: String,
	pub amount_paise: u64,
	pub utr: Option<String>,
}

pub struct SettlementEngine {
	ledger: Arc<LedgerService>,
	payout: Arc<PayoutClient>,
	coordinator: Arc<CoordinatorClient>,
	tracker: Arc<OrderTracker>,
	resolver: Address,
}

impl SettlementEngine {
	pub fn new(
		ledger: Arc<LedgerService>,
		payout: Arc<PayoutClient>,
		coordinator: Arc<CoordinatorClient>,
		tracker: Arc<OrderTracker>,
		resolver: Address,
	) -> Self {
		Self {
			ledger,
			payout,
			coordinator,
			tracker,
			resolver,
		}
	}

	/// Settles one order end to end. No automatic retry: failures
	/// surface to the caller, and the pending-payment sweep picks up
	/// anything that remains accepted-but-unfulfilled.
	pub async fn settle(&self, order_id: OrderId) -> Result<SettlementReceipt, SettlementError> {
		let order = self.ledger.get_order(order_id).await?;
		self.check_preconditions(&order)?;

		let amount_paise = amount_to_paise(order.amount)?;
		info!(
			order_id = %order_id,
			amount_paise,
			recipient = %order.recipient_upi,
			"settling order"
		);

		let contact = self.payout.create_contact(order_id).await?;
		let fund_account = self
			.payout
			.create_fund_account(&contact.id, &order.recipient_upi)
			.await?;
		let payout = self
			.payout
			.create_payout(&fund_account.id, amount_paise, order_id)
			.await?;

		info!(
			order_id = %order_id,
			payout_id = %payout.id,
			contact_id = %contact.id,
			fund_account_id = %fund_account.id,
			amount_paise,
			status = %payout.status,
			utr = payout.utr.as_deref().unwrap_or("pending"),
			fees_paise = payout.fees.unwrap_or(0),
			tax_paise = payout.tax.unwrap_or(0),
			"payment completed"
		);

		self.submit_proof(order_id, &payout.id).await?;

		Ok(SettlementReceipt {
			order_id,
			payout_id: payout.id,
			amount_paise,
			utr: payout.utr,
		})
	}

	fn check_preconditions(&self, order: &Order) -> Result<(), SettlementError> {
		if !order.accepted {
			return Err(SettlementError::NotAccepted);
		}
		if order.fulfilled {
			return Err(SettlementError::AlreadyFulfilled);
		}
		if !order.taker_is(self.resolver) {
			return Err(SettlementError::NotTaker { taker: order.taker });
		}
		Ok(())
	}

	async fn submit_proof(&self, order_id: OrderId, payout_id: &str) -> Result<(), SettlementError> {
		match self.coordinator.fulfill(order_id, payout_id).await {
			Ok(()) => {
				info!(order_id = %order_id, payout_id, "fulfillment proof accepted");
				Ok(())
			}
			Err(BackendError::Status { status, body }) => {
				error!(
					order_id = %order_id,
					payout_id,
					status,
					body,
					"fulfillment proof rejected"
				);
				if status == 400 {
					// Most common causes, in observed order: provider-side
					// transaction verification failed, amount or status
					// mismatch, order not yet accepted on the ledger.
					error!(
						payout_id,
						"verify the payout against the order before resubmitting"
					);
				}
				Err(SettlementError::ProofRejected { status, body })
			}
			Err(other) => Err(SettlementError::Backend(other)),
		}
	}

	/// Re-checks processed orders for settlements that never landed.
	/// Settles at most one per pass; the idempotency key and the
	/// `fulfilled` flag make a duplicate attempt harmless.
	pub async fn sweep(&self) -> Option<OrderId> {
		for order_id in self.tracker.processed_ids() {
			let order = match self.ledger.get_order(order_id).await {
				Ok(order) => order,
				Err(err) => {
					warn!(order_id = %order_id, error = %err, "sweep: order read failed");
					continue;
				}
			};

			if order.accepted && !order.fulfilled && order.taker_is(self.resolver) {
				info!(order_id = %order_id, "sweep: retrying pending settlement");
				if let Err(err) = self.settle(order_id).await {
					warn!(order_id = %order_id, error = %err, "sweep: settlement failed");
				}
				return Some(order_id);
			}
		}
		None
	}
}
