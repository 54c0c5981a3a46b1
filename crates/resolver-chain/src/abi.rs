//! Hand-rolled ABI codec for the order protocol contract.
//!
//! The bot touches exactly one view function and two events, so the
//! calldata and log layouts are encoded directly instead of pulling in
//! a full ABI stack. Word layout follows the contract:
//!
//! ```text
//! getOrder(bytes32) returns (address maker, address taker,
//!     string recipientUpiAddress, uint256 amount, uint256 startPrice,
//!     uint256 acceptedPrice, uint256 endPrice, uint256 startTime,
//!     uint256 acceptedTime, bool accepted, bool fullfilled)
//! OrderCreated(bytes32 indexed orderId, address indexed maker, uint256 amount)
//! OrderAccepted(bytes32 indexed orderId, address indexed taker, uint256 acceptedPrice)
//! ```

use crate::ChainError;
use resolver_types::{Address, B256, Order, OrderId, OrderLog, OrderLogKind, U256};
use sha3::{Digest, Keccak256};
use std::sync::OnceLock;

const WORD: usize = 32;

const GET_ORDER_SIGNATURE: &str = "getOrder(bytes32)";
const ORDER_CREATED_SIGNATURE: &str = "OrderCreated(bytes32,address,uint256)";
const ORDER_ACCEPTED_SIGNATURE: &str = "OrderAccepted(bytes32,address,uint256)";

fn keccak(input: &[u8]) -> [u8; 32] {
	let mut hasher = Keccak256::new();
	hasher.update(input);
	hasher.finalize().into()
}

/// Topic0 of the order-created event.
pub fn order_created_topic() -> B256 {
	static TOPIC: OnceLock<B256> = OnceLock::new();
	*TOPIC.get_or_init(|| B256::from(keccak(ORDER_CREATED_SIGNATURE.as_bytes())))
}

/// Topic0 of the order-accepted event.
pub fn order_accepted_topic() -> B256 {
	static TOPIC: OnceLock<B256> = OnceLock::new();
	*TOPIC.get_or_init(|| B256::from(keccak(ORDER_ACCEPTED_SIGNATURE.as_bytes())))
}

/// Calldata for `getOrder(bytes32)`.
pub fn get_order_call(order_id: OrderId) -> Vec<u8> {
	static SELECTOR: OnceLock<[u8; 4]> = OnceLock::new();
	let selector = SELECTOR.get_or_init(|| {
		let hash = keccak(GET_ORDER_SIGNATURE.as_bytes());
		[hash[0], hash[1], hash[2], hash[3]]
	});

	let mut calldata = Vec::with_capacity(4 + WORD);
	calldata.extend_from_slice(selector);
	calldata.extend_from_slice(order_id.0.as_slice());
	calldata
}

fn word(data: &[u8], index: usize) -> Result<&[u8], ChainError> {
	let start = index * WORD;
	data.get(start..start + WORD)
		.ok_or_else(|| ChainError::Decode(format!("return data short of word {index}")))
}

fn word_u256(data: &[u8], index: usize) -> Result<U256, ChainError> {
	Ok(U256::from_be_slice(word(data, index)?))
}

fn word_address(data: &[u8], index: usize) -> Result<Address, ChainError> {
	Ok(Address::from_slice(&word(data, index)?[12..]))
}

fn word_bool(data: &[u8], index: usize) -> Result<bool, ChainError> {
	Ok(word(data, index)?.iter().any(|byte| *byte != 0))
}

fn word_u64(data: &[u8], index: usize, field: &str) -> Result<u64, ChainError> {
	let value = word_u256(data, index)?;
	u64::try_from(value).map_err(|_| ChainError::Decode(format!("{field} exceeds u64")))
}

/// Decodes the return data of `getOrder`.
pub fn decode_order_return(data: &[u8]) -> Result<Order, ChainError> {
	// The tuple is dynamic (it holds a string), so the first word is an
	// offset to the tuple body.
	let base = word_u64(data, 0, "tuple offset")? as usize;
	let body = data
		.get(base..)
		.ok_or_else(|| ChainError::Decode("tuple offset beyond return data".to_string()))?;

	let upi_offset = word_u64(body, 2, "string offset")? as usize;
	let upi_len = {
		let length_word = body
			.get(upi_offset..upi_offset + WORD)
			.ok_or_else(|| ChainError::Decode("string offset beyond tuple".to_string()))?;
		u64::try_from(U256::from_be_slice(length_word))
			.map_err(|_| ChainError::Decode("string length exceeds u64".to_string()))?
			as usize
	};
	let upi_bytes = body
		.get(upi_offset + WORD..upi_offset + WORD + upi_len)
		.ok_or_else(|| ChainError::Decode("string body beyond tuple".to_string()))?;
	let recipient_upi = String::from_utf8(upi_bytes.to_vec())
		.map_err(|_| ChainError::Decode("upi address is not utf-8".to_string()))?;

	Ok(Order {
		maker: word_address(body, 0)?,
		taker: word_address(body, 1)?,
		recipient_upi,
		amount: word_u256(body, 3)?,
		start_price: word_u256(body, 4)?,
		accepted_price: word_u256(body, 5)?,
		end_price: word_u256(body, 6)?,
		start_time: word_u64(body, 7, "startTime")?,
		accepted_time: word_u64(body, 8, "acceptedTime")?,
		accepted: word_bool(body, 9)?,
		fulfilled: word_bool(body, 10)?,
	})
}

/// A log entry as returned by the node, before event decoding.
#[derive(Debug, Clone)]
pub struct RawLog {
	pub topics: Vec<B256>,
	pub data: Vec<u8>,
	pub block_number: u64,
	pub log_index: u64,
}

/// Decodes an order protocol log. Logs with an unrelated topic0 yield
/// `None` so callers can skip them without failing the batch.
pub fn decode_order_log(raw: &RawLog) -> Result<Option<OrderLog>, ChainError> {
	let Some(topic0) = raw.topics.first() else {
		return Ok(None);
	};

	let kind = if *topic0 == order_created_topic() {
		let (order_id, subject, value) = decode_log_parts(raw)?;
		(
			order_id,
			OrderLogKind::Created {
				maker: subject,
				amount: value,
			},
		)
	} else if *topic0 == order_accepted_topic() {
		let (order_id, subject, value) = decode_log_parts(raw)?;
		(
			order_id,
			OrderLogKind::Accepted {
				taker: subject,
				price: value,
			},
		)
	} else {
		return Ok(None);
	};

	Ok(Some(OrderLog {
		order_id: kind.0,
		kind: kind.1,
		block_number: raw.block_number,
		log_index: raw.log_index,
	}))
}

fn decode_log_parts(raw: &RawLog) -> Result<(OrderId, Address, U256), ChainError> {
	if raw.topics.len() < 3 {
		return Err(ChainError::Decode(format!(
			"order log carries {} topics, expected 3",
			raw.topics.len()
		)));
	}
	let order_id = OrderId(raw.topics[1]);
	let subject = Address::from_slice(&raw.topics[2].as_slice()[12..]);
	let value = U256::from_be_slice(
		raw.data
			.get(..WORD)
			.ok_or_else(|| ChainError::Decode("order log data short of one word".to_string()))?,
	);
	Ok((order_id, subject, value))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn u256_word(value: u64) -> [u8; 32] {
		B256::from(U256::from(value)).0
	}

	fn address_word(address: Address) -> [u8; 32] {
		let mut word = [0u8; 32];
		word[12..].copy_from_slice(address.as_slice());
		word
	}

	fn encoded_order(upi: &str) -> Vec<u8> {
		let maker = Address::repeat_byte(0xaa);
		let taker = Address::repeat_byte(0xbb);

		let mut body: Vec<u8> = Vec::new();
		body.extend_from_slice(&address_word(maker));
		body.extend_from_slice(&address_word(taker));
		// string offset, relative to the tuple: 11 head words
		body.extend_from_slice(&u256_word(11 * 32));
		body.extend_from_slice(&u256_word(25_000_000)); // amount
		body.extend_from_slice(&u256_word(25_000_000)); // startPrice
		body.extend_from_slice(&u256_word(24_000_000)); // acceptedPrice
		body.extend_from_slice(&u256_word(20_000_000)); // endPrice
		body.extend_from_slice(&u256_word(1_700_000_000)); // startTime
		body.extend_from_slice(&u256_word(1_700_000_060)); // acceptedTime
		body.extend_from_slice(&u256_word(1)); // accepted
		body.extend_from_slice(&u256_word(0)); // fullfilled

		body.extend_from_slice(&u256_word(upi.len() as u64));
		let mut padded = upi.as_bytes().to_vec();
		while padded.len() % 32 != 0 {
			padded.push(0);
		}
		body.extend_from_slice(&padded);

		let mut data = Vec::new();
		data.extend_from_slice(&u256_word(32));
		data.extend_from_slice(&body);
		data
	}

	#[test]
	fn get_order_calldata_layout() {
		let id = OrderId(B256::repeat_byte(0x42));
		let calldata = get_order_call(id);
		assert_eq!(calldata.len(), 36);
		assert_eq!(&calldata[4..], id.0.as_slice());
	}

	#[test]
	fn decodes_order_tuple() {
		let order = decode_order_return(&encoded_order("merchant@upi")).unwrap();
		assert_eq!(order.maker, Address::repeat_byte(0xaa));
		assert_eq!(order.taker, Address::repeat_byte(0xbb));
		assert_eq!(order.recipient_upi, "merchant@upi");
		assert_eq!(order.amount, U256::from(25_000_000u64));
		assert_eq!(order.accepted_price, U256::from(24_000_000u64));
		assert_eq!(order.start_time, 1_700_000_000);
		assert!(order.accepted);
		assert!(!order.fulfilled);
	}

	#[test]
	fn rejects_truncated_return() {
		let mut data = encoded_order("merchant@upi");
		data.truncate(64);
		assert!(matches!(
			decode_order_return(&data),
			Err(ChainError::Decode(_))
		));
	}

	#[test]
	fn event_topics_are_distinct() {
		assert_ne!(order_created_topic(), order_accepted_topic());
	}

	#[test]
	fn decodes_created_log() {
		let maker = Address::repeat_byte(0x11);
		let raw = RawLog {
			topics: vec![
				order_created_topic(),
				B256::repeat_byte(0x42),
				B256::from(address_word(maker)),
			],
			data: u256_word(25_000_000).to_vec(),
			block_number: 100,
			log_index: 3,
		};

		let log = decode_order_log(&raw).unwrap().unwrap();
		assert_eq!(log.order_id, OrderId(B256::repeat_byte(0x42)));
		assert_eq!(log.position(), (100, 3));
		assert_eq!(
			log.kind,
			OrderLogKind::Created {
				maker,
				amount: U256::from(25_000_000u64)
			}
		);
	}

	#[test]
	fn decodes_accepted_log() {
		let taker = Address::repeat_byte(0x22);
		let raw = RawLog {
			topics: vec![
				order_accepted_topic(),
				B256::repeat_byte(0x43),
				B256::from(address_word(taker)),
			],
			data: u256_word(24_000_000).to_vec(),
			block_number: 101,
			log_index: 0,
		};

		let log = decode_order_log(&raw).unwrap().unwrap();
		assert_eq!(
			log.kind,
			OrderLogKind::Accepted {
				taker,
				price: U256::from(24_000_000u64)
			}
		);
	}

	#[test]
	fn skips_unrelated_logs() {
		let raw = RawLog {
			topics: vec![B256::repeat_byte(0x99)],
			data: vec![],
			block_number: 1,
			log_index: 0,
		};
		assert!(decode_order_log(&raw).unwrap().is_none());
	}
}
