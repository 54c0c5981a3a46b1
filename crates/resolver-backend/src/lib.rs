//! HTTP client for the coordinator service.
//!
//! The coordinator owns the ledger transactions: the bot never signs
//! an acceptance itself, it asks the coordinator to do so and receives
//! the receipt. The same service exposes auction status, proof
//! submission and resolver callback registration.

use resolver_types::{Address, OrderId};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BackendError {
	#[error("request timed out: {0}")]
	Timeout(String),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("coordinator answered {status}: {body}")]
	Status { status: u16, body: String },

	#[error("unexpected response shape: {0}")]
	Decode(String),
}

/// Outcome of an acceptance attempt, mapped from the coordinator's
/// status codes. `Conflict` is terminal: another resolver holds the
/// order and retrying can never succeed.
#[derive(Debug, Error)]
pub enum AcceptError {
	#[error("order already accepted by another resolver")]
	Conflict,

	#[error("coordinator rejected price or parameters: {0}")]
	InvalidParams(String),

	#[error("address is not registered as a resolver: {0}")]
	NotAResolver(String),

	#[error("order is unknown to the coordinator: {0}")]
	UnknownOrder(String),

	#[error(transparent)]
	Backend(#[from] BackendError),
}

impl AcceptError {
	/// Terminal failures must be marked processed, never retried.
	pub fn is_terminal(&self) -> bool {
		matches!(self, AcceptError::Conflict)
	}
}

/// Receipt for an acceptance the coordinator landed on the ledger.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptReceipt {
	pub transaction_hash: String,
	#[serde(default)]
	pub block_number: Option<u64>,
	#[serde(default)]
	pub gas_used: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionStatus {
	pub active: bool,
	#[serde(default)]
	pub current_price: f64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
	#[serde(default)]
	success: bool,
	data: Option<T>,
}

pub struct CoordinatorClient {
	base_url: String,
	resolver: Address,
	client: reqwest::Client,
}

impl CoordinatorClient {
	pub fn new(
		base_url: String,
		resolver: Address,
		timeout: Duration,
	) -> Result<Self, BackendError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|err| BackendError::Transport(format!("building http client: {err}")))?;
		Ok(Self {
			base_url: base_url.trim_end_matches('/').to_string(),
			resolver,
			client,
		})
	}

	pub fn resolver(&self) -> Address {
		self.resolver
	}

	/// Asks the coordinator to accept the order at the given price on
	/// our behalf. The price travels as a decimal string, matching the
	/// coordinator's API.
	pub async fn accept(
		&self,
		order_id: OrderId,
		accepted_price: &str,
	) -> Result<AcceptReceipt, AcceptError> {
		let url = format!("{}/api/orders/{}/accept", self.base_url, order_id);
		debug!(order_id = %order_id, price = accepted_price, "requesting acceptance");

		let response = self
			.client
			.post(&url)
			.json(&json!({
				"acceptedPrice": accepted_price,
				"resolverAddress": format!("{:#x}", self.resolver),
			}))
			.send()
			.await
			.map_err(|err| BackendError::from_reqwest("accept", err))?;

		let status = response.status();
		let body = response
			.text()
			.await
			.map_err(|err| BackendError::from_reqwest("accept", err))?;

		match status.as_u16() {
			200 => {
				let envelope: Envelope<AcceptReceipt> = serde_json::from_str(&body)
					.map_err(|err| BackendError::Decode(format!("accept response: {err}")))?;
				if !envelope.success {
					return Err(BackendError::Status {
						status: 200,
						body,
					}
					.into());
				}
				envelope
					.data
					.ok_or_else(|| {
						AcceptError::from(BackendError::Decode(
							"accept response carries no receipt".to_string(),
						))
					})
					.inspect(|receipt| {
						info!(
							order_id = %order_id,
							tx = %receipt.transaction_hash,
							block = receipt.block_number,
							"order accepted via coordinator"
						);
					})
			}
			409 => Err(AcceptError::Conflict),
			400 => Err(AcceptError::InvalidParams(body)),
			403 => Err(AcceptError::NotAResolver(body)),
			404 => Err(AcceptError::UnknownOrder(body)),
			other => Err(BackendError::Status {
				status: other,
				body,
			}
			.into()),
		}
	}

	/// Submits the payout id as fulfillment proof. The coordinator
	/// verifies it against the payment provider before marking the
	/// order fulfilled on the ledger.
	pub async fn fulfill(
		&self,
		order_id: OrderId,
		transaction_id: &str,
	) -> Result<(), BackendError> {
		let url = format!("{}/api/orders/{}/fulfill", self.base_url, order_id);
		let response = self
			.client
			.post(&url)
			.json(&json!({
				"transactionId": transaction_id,
				"resolverAddress": format!("{:#x}", self.resolver),
			}))
			.send()
			.await
			.map_err(|err| BackendError::from_reqwest("fulfill", err))?;

		let status = response.status();
		if status.is_success() {
			return Ok(());
		}
		let body = response
			.text()
			.await
			.map_err(|err| BackendError::from_reqwest("fulfill", err))?;
		Err(BackendError::Status {
			status: status.as_u16(),
			body,
		})
	}

	pub async fn auction_status(&self, order_id: OrderId) -> Result<AuctionStatus, BackendError> {
		let url = format!("{}/api/orders/{}/auction-status", self.base_url, order_id);
		let response = self
			.client
			.get(&url)
			.send()
			.await
			.map_err(|err| BackendError::from_reqwest("auction_status", err))?;

		let status = response.status();
		let body = response
			.text()
			.await
			.map_err(|err| BackendError::from_reqwest("auction_status", err))?;
		if !status.is_success() {
			return Err(BackendError::Status {
				status: status.as_u16(),
				body,
			});
		}

		let envelope: Envelope<AuctionStatus> = serde_json::from_str(&body)
			.map_err(|err| BackendError::Decode(format!("auction status: {err}")))?;
		match envelope.data {
			Some(status) if envelope.success => Ok(status),
			// The coordinator reports a finished auction as success=false.
			_ => Ok(AuctionStatus {
				active: false,
				current_price: 0.0,
			}),
		}
	}

	/// Registers our callback endpoint so the coordinator can push
	/// acceptance notifications. Best effort: the caller logs failures
	/// and keeps starting up.
	pub async fn register_callback(&self, callback_url: &str) -> Result<(), BackendError> {
		let url = format!("{}/api/orders/resolver/register", self.base_url);
		let response = self
			.client
			.post(&url)
			.timeout(Duration::from_secs(10))
			.json(&json!({
				"resolverAddress": format!("{:#x}", self.resolver),
				"callbackUrl": callback_url,
			}))
			.send()
			.await
			.map_err(|err| BackendError::from_reqwest("register_callback", err))?;

		let status = response.status();
		if status.is_success() {
			info!(callback_url, "callback registered with coordinator");
			Ok(())
		} else {
			let body = response
				.text()
				.await
				.unwrap_or_default();
			warn!(status = status.as_u16(), body, "callback registration refused");
			Err(BackendError::Status {
				status: status.as_u16(),
				body,
			})
		}
	}
}

impl BackendError {
	fn from_reqwest(operation: &str, err: reqwest::Error) -> Self {
		if err.is_timeout() {
			BackendError::Timeout(format!("{operation}: {err}"))
		} else {
			BackendError::Transport(format!("{operation}: {err}"))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use resolver_types::B256;
	use serde_json::json;
	use wiremock::matchers::{body_partial_json, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn order_id() -> OrderId {
		OrderId(B256::repeat_byte(0x42))
	}

	async fn client(server: &MockServer) -> CoordinatorClient {
		CoordinatorClient::new(
			server.uri(),
			Address::repeat_byte(0xdd),
			Duration::from_secs(5),
		)
		.unwrap()
	}

	#[tokio::test]
	async fn accept_returns_receipt() {
		let server = MockServer::start().await;
		let id = order_id();
		Mock::given(method("POST"))
			.and(path(format!("/api/orders/{id}/accept")))
			.and(body_partial_json(json!({
				"resolverAddress": format!("{:#x}", Address::repeat_byte(0xdd)),
			})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"success": true,
				"data": {
					"transactionHash": "0xabc",
					"blockNumber": 123,
					"gasUsed": "21000",
				},
			})))
			.expect(1)
			.mount(&server)
			.await;

		let receipt = client(&server).await.accept(id, "24000000").await.unwrap();
		assert_eq!(receipt.transaction_hash, "0xabc");
		assert_eq!(receipt.block_number, Some(123));
	}

	#[tokio::test]
	async fn conflict_is_terminal() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(409).set_body_json(json!({
				"success": false,
				"error": "already accepted",
			})))
			.mount(&server)
			.await;

		let err = client(&server)
			.await
			.accept(order_id(), "1")
			.await
			.unwrap_err();
		assert!(matches!(err, AcceptError::Conflict));
		assert!(err.is_terminal());
	}

	#[tokio::test]
	async fn unregistered_resolver_is_not_terminal() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(403).set_body_string("not a resolver"))
			.mount(&server)
			.await;

		let err = client(&server)
			.await
			.accept(order_id(), "1")
			.await
			.unwrap_err();
		assert!(matches!(err, AcceptError::NotAResolver(_)));
		assert!(!err.is_terminal());
	}

	#[tokio::test]
	async fn fulfill_surfaces_rejection_body() {
		let server = MockServer::start().await;
		let id = order_id();
		Mock::given(method("POST"))
			.and(path(format!("/api/orders/{id}/fulfill")))
			.respond_with(
				ResponseTemplate::new(400).set_body_string("transaction verification failed"),
			)
			.mount(&server)
			.await;

		let err = client(&server)
			.await
			.fulfill(id, "pout_123")
			.await
			.unwrap_err();
		match err {
			BackendError::Status { status, body } => {
				assert_eq!(status, 400);
				assert!(body.contains("verification failed"));
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[tokio::test]
	async fn auction_status_decodes() {
		let server = MockServer::start().await;
		let id = order_id();
		Mock::given(method("GET"))
			.and(path(format!("/api/orders/{id}/auction-status")))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"success": true,
				"data": {"active": true, "currentPrice": 24.5},
			})))
			.mount(&server)
			.await;

		let status = client(&server).await.auction_status(id).await.unwrap();
		assert!(status.active);
		assert!((status.current_price - 24.5).abs() < f64::EPSILON);
	}

	#[tokio::test]
	async fn finished_auction_reads_as_inactive() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"success": false,
			})))
			.mount(&server)
			.await;

		let status = client(&server)
			.await
			.auction_status(order_id())
			.await
			.unwrap();
		assert!(!status.active);
	}

	#[tokio::test]
	async fn register_callback_posts_our_address() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/orders/resolver/register"))
			.and(body_partial_json(json!({
				"callbackUrl": "http://localhost:3001/callback/order-accepted",
			})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
			.expect(1)
			.mount(&server)
			.await;

		client(&server)
			.await
			.register_callback("http://localhost:3001/callback/order-accepted")
			.await
			.unwrap();
	}
}
