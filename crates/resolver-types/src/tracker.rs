//! In-memory processing records.
//!
//! The tracker is the single piece of shared mutable state between the
//! polling path, the auction path and the callback server. Membership
//! check plus insert is one atomic step, so two notifications for the
//! same order can never both proceed to submission. The set is lost on
//! restart by design; the ledger's at-most-once acceptance is the
//! actual safety net.

use crate::common::OrderId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// State of an order the bot has seen. An id absent from the tracker
/// is unseen and eligible for acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
	/// An acquisition attempt is in flight.
	Processing,
	/// Terminal: either we won the order or another resolver did.
	Processed,
}

#[derive(Debug, Default)]
pub struct OrderTracker {
	records: DashMap<OrderId, ProcessingState>,
}

impl OrderTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Atomically claims an order for processing. Returns false if the
	/// order is already processing or processed, in which case the
	/// caller must not proceed.
	pub fn begin(&self, order_id: OrderId) -> bool {
		match self.records.entry(order_id) {
			Entry::Occupied(_) => false,
			Entry::Vacant(slot) => {
				slot.insert(ProcessingState::Processing);
				true
			}
		}
	}

	/// Marks an order terminally processed. Valid from any state:
	/// a conflict response can arrive for an order another component
	/// already claimed.
	pub fn finish(&self, order_id: OrderId) {
		self.records.insert(order_id, ProcessingState::Processed);
	}

	/// Returns a processing order to unseen so a later observation can
	/// retry it. No-op unless the order is currently processing.
	pub fn release(&self, order_id: OrderId) {
		self.records
			.remove_if(&order_id, |_, state| *state == ProcessingState::Processing);
	}

	pub fn state(&self, order_id: OrderId) -> Option<ProcessingState> {
		self.records.get(&order_id).map(|entry| *entry.value())
	}

	/// Ids in the terminal state, for the pending-payment sweep.
	pub fn processed_ids(&self) -> Vec<OrderId> {
		self.records
			.iter()
			.filter(|entry| *entry.value() == ProcessingState::Processed)
			.map(|entry| *entry.key())
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::common::B256;
	use std::sync::Arc;

	fn id(byte: u8) -> OrderId {
		OrderId(B256::repeat_byte(byte))
	}

	#[test]
	fn begin_is_exclusive() {
		let tracker = OrderTracker::new();
		assert!(tracker.begin(id(1)));
		assert!(!tracker.begin(id(1)));
		assert_eq!(tracker.state(id(1)), Some(ProcessingState::Processing));
	}

	#[test]
	fn release_reopens_only_processing() {
		let tracker = OrderTracker::new();
		tracker.begin(id(1));
		tracker.release(id(1));
		assert_eq!(tracker.state(id(1)), None);
		assert!(tracker.begin(id(1)));

		tracker.finish(id(1));
		tracker.release(id(1));
		assert_eq!(tracker.state(id(1)), Some(ProcessingState::Processed));
	}

	#[test]
	fn finish_is_terminal() {
		let tracker = OrderTracker::new();
		tracker.begin(id(2));
		tracker.finish(id(2));
		assert!(!tracker.begin(id(2)));
		assert_eq!(tracker.processed_ids(), vec![id(2)]);
	}

	#[test]
	fn concurrent_begin_admits_exactly_one() {
		let tracker = Arc::new(OrderTracker::new());
		let mut handles = Vec::new();
		for _ in 0..16 {
			let tracker = tracker.clone();
			handles.push(std::thread::spawn(move || tracker.begin(id(7))));
		}
		let admitted = handles
			.into_iter()
			.map(|handle| handle.join().unwrap())
			.filter(|claimed| *claimed)
			.count();
		assert_eq!(admitted, 1);
	}
}
