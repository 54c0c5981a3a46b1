//! Wire payloads for the auction channel and the inbound callback.

use crate::common::OrderId;
use serde::{Deserialize, Serialize};

/// Message pushed by the coordinator over the real-time auction
/// channel. Tagged on the `type` field the way the coordinator emits
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuctionMessage {
	#[serde(rename = "auctionStarted")]
	Started {
		#[serde(rename = "orderId")]
		order_id: OrderId,
		#[serde(rename = "startPrice")]
		start_price: f64,
		#[serde(rename = "endPrice")]
		end_price: f64,
		/// Auction length in milliseconds.
		duration: u64,
	},
	#[serde(rename = "priceUpdate")]
	PriceUpdate {
		#[serde(rename = "orderId")]
		order_id: OrderId,
		#[serde(rename = "currentPrice")]
		current_price: f64,
		/// Decay progress in percent, 0..=100.
		progress: f64,
	},
	#[serde(rename = "auctionAccepted")]
	Accepted {
		#[serde(rename = "orderId")]
		order_id: OrderId,
	},
	#[serde(rename = "auctionEnded")]
	Ended {
		#[serde(rename = "orderId")]
		order_id: OrderId,
		#[serde(default)]
		reason: Option<String>,
	},
}

/// Body of the coordinator's order-accepted callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackNotice {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(rename = "orderId")]
	pub order_id: OrderId,
	#[serde(rename = "resolverAddress")]
	pub resolver_address: String,
	#[serde(default)]
	pub details: Option<serde_json::Value>,
}

impl CallbackNotice {
	pub const ORDER_ACCEPTED: &'static str = "ORDER_ACCEPTED";
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn auction_started_decodes() {
		let json = r#"{
			"type": "auctionStarted",
			"orderId": "0x00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff",
			"startPrice": 100.0,
			"endPrice": 80.0,
			"duration": 5000
		}"#;
		let msg: AuctionMessage = serde_json::from_str(json).unwrap();
		match msg {
			AuctionMessage::Started {
				start_price,
				end_price,
				duration,
				..
			} => {
				assert_eq!(start_price, 100.0);
				assert_eq!(end_price, 80.0);
				assert_eq!(duration, 5000);
			}
			other => panic!("unexpected message: {:?}", other),
		}
	}

	#[test]
	fn ended_reason_is_optional() {
		let json = r#"{
			"type": "auctionEnded",
			"orderId": "0x00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
		}"#;
		let msg: AuctionMessage = serde_json::from_str(json).unwrap();
		assert!(matches!(msg, AuctionMessage::Ended { reason: None, .. }));
	}

	#[test]
	fn callback_notice_decodes() {
		let json = r#"{
			"type": "ORDER_ACCEPTED",
			"orderId": "0x00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff",
			"resolverAddress": "0xAbC0000000000000000000000000000000000001",
			"details": {"acceptedPrice": "95"}
		}"#;
		let notice: CallbackNotice = serde_json::from_str(json).unwrap();
		assert_eq!(notice.kind, CallbackNotice::ORDER_ACCEPTED);
		assert!(notice.details.is_some());
	}
}
