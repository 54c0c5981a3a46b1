//! On-chain order snapshot and decoded ledger events.

use crate::common::{Address, BlockNumber, OrderId, Timestamp, U256};
use serde::{Deserialize, Serialize};

/// Order state as read from the ledger. Read-only to the bot: all
/// mutations go through the coordinator, which submits the actual
/// transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	pub maker: Address,
	/// Zero address until a resolver accepts.
	pub taker: Address,
	pub recipient_upi: String,
	/// Principal in 18-decimal INR units.
	pub amount: U256,
	pub start_price: U256,
	pub accepted_price: U256,
	pub end_price: U256,
	pub start_time: Timestamp,
	pub accepted_time: Timestamp,
	pub accepted: bool,
	pub fulfilled: bool,
}

impl Order {
	/// True while no resolver has accepted and the order is unfilled.
	pub fn is_open(&self) -> bool {
		!self.accepted && !self.fulfilled
	}

	pub fn taker_is(&self, address: Address) -> bool {
		self.taker == address
	}
}

/// Event payload decoded from an order protocol log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderLogKind {
	Created { maker: Address, amount: U256 },
	Accepted { taker: Address, price: U256 },
}

/// A decoded order event with its position on the ledger. Events are
/// delivered to the acquisition engine in (block, log_index) order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLog {
	pub order_id: OrderId,
	pub kind: OrderLogKind,
	pub block_number: BlockNumber,
	pub log_index: u64,
}

impl OrderLog {
	pub fn position(&self) -> (BlockNumber, u64) {
		(self.block_number, self.log_index)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_order() -> Order {
		Order {
			maker: Address::repeat_byte(0x11),
			taker: Address::ZERO,
			recipient_upi: "merchant@upi".to_string(),
			amount: U256::from(100u64),
			start_price: U256::from(100u64),
			accepted_price: U256::ZERO,
			end_price: U256::from(80u64),
			start_time: 1_700_000_000,
			accepted_time: 0,
			accepted: false,
			fulfilled: false,
		}
	}

	#[test]
	fn open_until_accepted() {
		let mut order = sample_order();
		assert!(order.is_open());
		order.accepted = true;
		assert!(!order.is_open());
	}

	#[test]
	fn taker_match() {
		let mut order = sample_order();
		let us = Address::repeat_byte(0x22);
		assert!(!order.taker_is(us));
		order.taker = us;
		assert!(order.taker_is(us));
	}
}
