//! Typed infrastructure-error classification.
//!
//! Every fallible chain call returns a [`ChainError`]; this module maps
//! it to the recovery action the supervisor takes. Classification
//! happens at the call site's error boundary, never by intercepting a
//! process-wide exception channel.

use crate::ChainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	/// RPC deadline exceeded. Log, continue, optionally sweep pending
	/// payments.
	TransientTimeout,
	/// The node dropped our event filter. Recreate listeners; fall back
	/// to polling after repeated occurrences.
	StaleSubscription,
	/// The connection itself failed. Rebuild the provider and listeners.
	Connection,
	/// Not a known-recoverable signature. Surface to the caller.
	Fatal,
}

/// Known node-side messages for a dropped filter.
fn is_stale_marker(message: &str) -> bool {
	let message = message.to_ascii_lowercase();
	message.contains("filter not found")
		|| (message.contains("filter") && message.contains("does not exist"))
		|| message.contains("subscription not found")
}

fn is_connection_marker(message: &str) -> bool {
	let message = message.to_ascii_lowercase();
	message.contains("connection") || message.contains("network")
}

pub fn classify(err: &ChainError) -> ErrorClass {
	match err {
		ChainError::Timeout(_) => ErrorClass::TransientTimeout,
		ChainError::FilterExpired(_) => ErrorClass::StaleSubscription,
		ChainError::Rpc { message, .. } if is_stale_marker(message) => {
			ErrorClass::StaleSubscription
		}
		ChainError::Rpc { message, .. } if is_connection_marker(message) => ErrorClass::Connection,
		ChainError::Transport(_) => ErrorClass::Connection,
		ChainError::Rpc { .. } | ChainError::Decode(_) => ErrorClass::Fatal,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timeout_is_transient() {
		assert_eq!(
			classify(&ChainError::Timeout("deadline exceeded".into())),
			ErrorClass::TransientTimeout
		);
	}

	#[test]
	fn filter_errors_are_stale_subscription() {
		assert_eq!(
			classify(&ChainError::FilterExpired("poll returned non-list".into())),
			ErrorClass::StaleSubscription
		);
		assert_eq!(
			classify(&ChainError::Rpc {
				code: -32000,
				message: "filter not found".into()
			}),
			ErrorClass::StaleSubscription
		);
		assert_eq!(
			classify(&ChainError::Rpc {
				code: -32000,
				message: "Filter 0x7 does not exist".into()
			}),
			ErrorClass::StaleSubscription
		);
	}

	#[test]
	fn transport_is_connection() {
		assert_eq!(
			classify(&ChainError::Transport("connection refused".into())),
			ErrorClass::Connection
		);
	}

	#[test]
	fn unknown_rpc_errors_are_fatal() {
		assert_eq!(
			classify(&ChainError::Rpc {
				code: -32602,
				message: "invalid params".into()
			}),
			ErrorClass::Fatal
		);
		assert_eq!(
			classify(&ChainError::Decode("truncated word".into())),
			ErrorClass::Fatal
		);
	}
}
