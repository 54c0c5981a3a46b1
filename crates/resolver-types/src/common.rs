//! Common identifiers shared across the resolver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export the ledger primitive types used throughout.
pub use alloy_primitives::{Address, B256, U256};

/// Block height on the ledger.
pub type BlockNumber = u64;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// 32-byte order identifier assigned by the order protocol contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub B256);

impl OrderId {
	pub fn from_slice(bytes: &[u8]) -> Option<Self> {
		if bytes.len() != 32 {
			return None;
		}
		Some(Self(B256::from_slice(bytes)))
	}

	/// Full lowercase hex without the 0x prefix.
	pub fn as_hex(&self) -> String {
		hex::encode(self.0)
	}

	/// Last 30 hex characters of the id. The payment provider caps
	/// reference ids at 40 characters, so the full 64-char hash does
	/// not fit once prefixed.
	pub fn short_ref(&self) -> String {
		let full = self.as_hex();
		full[full.len() - 30..].to_string()
	}
}

impl fmt::Display for OrderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", self.as_hex())
	}
}

#[derive(Debug, thiserror::Error)]
#[error("invalid order id: {0}")]
pub struct ParseOrderIdError(String);

impl FromStr for OrderId {
	type Err = ParseOrderIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let stripped = s.strip_prefix("0x").unwrap_or(s);
		let bytes =
			hex::decode(stripped).map_err(|e| ParseOrderIdError(format!("{}: {}", s, e)))?;
		Self::from_slice(&bytes).ok_or_else(|| ParseOrderIdError(format!("{}: not 32 bytes", s)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn order_id_roundtrip() {
		let id: OrderId = "0x00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
			.parse()
			.unwrap();
		assert_eq!(
			id.to_string(),
			"0x00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
		);
	}

	#[test]
	fn short_ref_is_last_30_chars() {
		let id: OrderId = "0x00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
			.parse()
			.unwrap();
		let short = id.short_ref();
		assert_eq!(short.len(), 30);
		assert!(id.as_hex().ends_with(&short));
	}

	#[test]
	fn rejects_wrong_length() {
		assert!("0x1234".parse::<OrderId>().is_err());
		assert!("not hex".parse::<OrderId>().is_err());
	}
}
