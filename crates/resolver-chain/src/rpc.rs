//! JSON-RPC implementation of [`LedgerInterface`] over HTTP.
//!
//! Uses only the handful of eth namespace methods the observers need:
//! `eth_blockNumber`, `eth_call`, `eth_getLogs` for polling and
//! `eth_newFilter` / `eth_getFilterChanges` / `eth_uninstallFilter`
//! for server-side subscriptions.

use crate::abi::{self, RawLog};
use crate::{ChainError, FilterId, LedgerInterface};
use async_trait::async_trait;
use resolver_types::{Address, B256, BlockNumber, Order, OrderId, OrderLog};
use serde_json::{Value, json};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct RpcLedger {
	url: String,
	contract: Address,
	timeout: Duration,
	client: RwLock<reqwest::Client>,
	next_id: AtomicU64,
}

impl RpcLedger {
	pub fn new(url: String, contract: Address, timeout: Duration) -> Result<Self, ChainError> {
		let client = build_client(timeout)?;
		Ok(Self {
			url,
			contract,
			timeout,
			client: RwLock::new(client),
			next_id: AtomicU64::new(1),
		})
	}

	fn client(&self) -> reqwest::Client {
		match self.client.read() {
			Ok(guard) => guard.clone(),
			Err(poisoned) => poisoned.into_inner().clone(),
		}
	}

	async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let body = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});

		let response = self
			.client()
			.post(&self.url)
			.json(&body)
			.send()
			.await
			.map_err(|err| transport_error(method, err))?;

		let payload: Value = response
			.json()
			.await
			.map_err(|err| transport_error(method, err))?;

		if let Some(error) = payload.get("error") {
			let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
			let message = error
				.get("message")
				.and_then(Value::as_str)
				.unwrap_or("unknown rpc error")
				.to_string();
			return Err(ChainError::Rpc { code, message });
		}

		payload
			.get("result")
			.cloned()
			.ok_or_else(|| ChainError::Decode(format!("{method}: response carries no result")))
	}

	/// Topic filter matching either order event on the contract.
	fn log_filter(&self, range: Option<(BlockNumber, BlockNumber)>) -> Value {
		let mut filter = json!({
			"address": format!("{:#x}", self.contract),
			"topics": [[
				format!("{:#x}", abi::order_created_topic()),
				format!("{:#x}", abi::order_accepted_topic()),
			]],
		});
		if let Some((from, to)) = range {
			filter["fromBlock"] = json!(format!("{from:#x}"));
			filter["toBlock"] = json!(format!("{to:#x}"));
		}
		filter
	}
}

#[async_trait]
impl LedgerInterface for RpcLedger {
	async fn block_number(&self) -> Result<BlockNumber, ChainError> {
		let result = self.request("eth_blockNumber", json!([])).await?;
		parse_quantity(&result)
	}

	async fn get_order(&self, order_id: OrderId) -> Result<Order, ChainError> {
		let calldata = abi::get_order_call(order_id);
		let call = json!([
			{
				"to": format!("{:#x}", self.contract),
				"data": format!("0x{}", hex::encode(calldata)),
			},
			"latest",
		]);
		let result = self.request("eth_call", call).await?;
		let data = parse_hex_bytes(&result)?;
		abi::decode_order_return(&data)
	}

	async fn query_order_logs(
		&self,
		from: BlockNumber,
		to: BlockNumber,
	) -> Result<Vec<OrderLog>, ChainError> {
		let result = self
			.request("eth_getLogs", json!([self.log_filter(Some((from, to)))]))
			.await?;
		let entries = result.as_array().ok_or_else(|| {
			ChainError::Decode("eth_getLogs result is not a list".to_string())
		})?;
		decode_log_entries(entries)
	}

	async fn install_filter(&self) -> Result<FilterId, ChainError> {
		let result = self
			.request("eth_newFilter", json!([self.log_filter(None)]))
			.await?;
		result
			.as_str()
			.map(str::to_string)
			.ok_or_else(|| ChainError::Decode("eth_newFilter returned no id".to_string()))
	}

	async fn poll_filter(&self, filter_id: &FilterId) -> Result<Vec<OrderLog>, ChainError> {
		let result = self
			.request("eth_getFilterChanges", json!([filter_id]))
			.await?;
		// A node that dropped the filter may answer with null instead of
		// an error. Treat any non-list payload as a stale subscription.
		let entries = result.as_array().ok_or_else(|| {
			ChainError::FilterExpired("filter changes payload is not a log list".to_string())
		})?;
		decode_log_entries(entries)
	}

	async fn uninstall_filter(&self, filter_id: &FilterId) -> Result<(), ChainError> {
		self.request("eth_uninstallFilter", json!([filter_id]))
			.await?;
		Ok(())
	}

	async fn reconnect(&self) -> Result<(), ChainError> {
		let fresh = build_client(self.timeout)?;
		match self.client.write() {
			Ok(mut guard) => *guard = fresh,
			Err(poisoned) => *poisoned.into_inner() = fresh,
		}
		Ok(())
	}
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, ChainError> {
	reqwest::Client::builder()
		.timeout(timeout)
		.build()
		.map_err(|err| ChainError::Transport(format!("building http client: {err}")))
}

fn transport_error(method: &str, err: reqwest::Error) -> ChainError {
	if err.is_timeout() {
		ChainError::Timeout(format!("{method}: {err}"))
	} else {
		ChainError::Transport(format!("{method}: {err}"))
	}
}

fn parse_quantity(value: &Value) -> Result<u64, ChainError> {
	let text = value
		.as_str()
		.ok_or_else(|| ChainError::Decode(format!("expected quantity, got {value}")))?;
	u64::from_str_radix(text.trim_start_matches("0x"), 16)
		.map_err(|err| ChainError::Decode(format!("bad quantity {text}: {err}")))
}

fn parse_hex_bytes(value: &Value) -> Result<Vec<u8>, ChainError> {
	let text = value
		.as_str()
		.ok_or_else(|| ChainError::Decode(format!("expected hex data, got {value}")))?;
	hex::decode(text.trim_start_matches("0x"))
		.map_err(|err| ChainError::Decode(format!("bad hex data: {err}")))
}

fn parse_topic(value: &Value) -> Result<B256, ChainError> {
	let bytes = parse_hex_bytes(value)?;
	if bytes.len() != 32 {
		return Err(ChainError::Decode(format!(
			"topic is {} bytes, expected 32",
			bytes.len()
		)));
	}
	Ok(B256::from_slice(&bytes))
}

fn decode_log_entries(entries: &[Value]) -> Result<Vec<OrderLog>, ChainError> {
	let mut logs = Vec::with_capacity(entries.len());
	for entry in entries {
		let topics = entry
			.get("topics")
			.and_then(Value::as_array)
			.ok_or_else(|| ChainError::Decode("log entry has no topics".to_string()))?
			.iter()
			.map(parse_topic)
			.collect::<Result<Vec<_>, _>>()?;
		let data = parse_hex_bytes(
			entry
				.get("data")
				.unwrap_or(&Value::String("0x".to_string())),
		)?;
		let block_number = parse_quantity(
			entry
				.get("blockNumber")
				.ok_or_else(|| ChainError::Decode("log entry has no blockNumber".to_string()))?,
		)?;
		let log_index = parse_quantity(
			entry
				.get("logIndex")
				.ok_or_else(|| ChainError::Decode("log entry has no logIndex".to_string()))?,
		)?;

		let raw = RawLog {
			topics,
			data,
			block_number,
			log_index,
		};
		if let Some(log) = abi::decode_order_log(&raw)? {
			logs.push(log);
		}
	}
	logs.sort_by_key(OrderLog::position);
	Ok(logs)
}
