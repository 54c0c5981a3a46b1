//! Payment provider client for UPI payouts.
//!
//! The provider's payout flow is three sequential resources: a contact
//! for the payee, a fund account binding the contact to a VPA, and the
//! payout itself. Each call is independently authenticated with basic
//! auth; the payout carries an idempotency header so a re-settled
//! order can never pay twice.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use resolver_types::OrderId;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Kept under the provider's 30 character narration limit.
const NARRATION: &str = "Order Payment";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutStage {
	Contact,
	FundAccount,
	Payout,
}

impl fmt::Display for PayoutStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PayoutStage::Contact => write!(f, "contact"),
			PayoutStage::FundAccount => write!(f, "fund_account"),
			PayoutStage::Payout => write!(f, "payout"),
		}
	}
}

#[derive(Debug, Error)]
pub enum PayoutError {
	#[error("{stage} request timed out: {detail}")]
	Timeout { stage: PayoutStage, detail: String },

	#[error("{stage} transport error: {detail}")]
	Transport { stage: PayoutStage, detail: String },

	#[error("{stage} rejected ({status}): {description}")]
	Api {
		stage: PayoutStage,
		status: u16,
		description: String,
	},

	#[error("{stage} response malformed: {detail}")]
	Decode { stage: PayoutStage, detail: String },
}

impl PayoutError {
	pub fn stage(&self) -> PayoutStage {
		match self {
			PayoutError::Timeout { stage, .. }
			| PayoutError::Transport { stage, .. }
			| PayoutError::Api { stage, .. }
			| PayoutError::Decode { stage, .. } => *stage,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
	pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundAccount {
	pub id: String,
}

/// Payout resource as returned by the provider. `utr` stays empty
/// until the bank assigns one; `fees` and `tax` are in paise.
#[derive(Debug, Clone, Deserialize)]
pub struct Payout {
	pub id: String,
	#[serde(default)]
	pub fund_account_id: String,
	#[serde(default)]
	pub status: String,
	#[serde(default)]
	pub utr: Option<String>,
	#[serde(default)]
	pub fees: Option<u64>,
	#[serde(default)]
	pub tax: Option<u64>,
}

pub struct PayoutClient {
	api_url: String,
	auth_header: String,
	account_number: String,
	client: reqwest::Client,
}

impl PayoutClient {
	pub fn new(
		api_url: String,
		key_id: &str,
		key_secret: &str,
		account_number: String,
		timeout: Duration,
	) -> Result<Self, PayoutError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|err| PayoutError::Transport {
				stage: PayoutStage::Contact,
				detail: format!("building http client: {err}"),
			})?;
		let auth_header = format!(
			"Basic {}",
			STANDARD.encode(format!("{key_id}:{key_secret}"))
		);
		Ok(Self {
			api_url: api_url.trim_end_matches('/').to_string(),
			auth_header,
			account_number,
			client,
		})
	}

	/// Creates the payee contact. The provider caps reference ids at
	/// 40 characters, so the order id is shortened to its last 30.
	pub async fn create_contact(&self, order_id: OrderId) -> Result<Contact, PayoutError> {
		let reference_id = format!("ord_{}", order_id.short_ref());
		debug!(order_id = %order_id, reference_id, "creating payee contact");

		let body = json!({
			"name": "Order Recipient",
			"email": "order@yourapp.com",
			"contact": "9999999999",
			"type": "self",
			"reference_id": reference_id,
			"notes": {
				"order_id": order_id.to_string(),
				"payment_type": "order_settlement",
			},
		});

		let contact: Contact = self
			.post(PayoutStage::Contact, "/contacts", &body, None)
			.await?;
		info!(order_id = %order_id, contact_id = %contact.id, "contact created");
		Ok(contact)
	}

	/// Binds the recipient's VPA to the contact.
	pub async fn create_fund_account(
		&self,
		contact_id: &str,
		vpa: &str,
	) -> Result<FundAccount, PayoutError> {
		let body = json!({
			"contact_id": contact_id,
			"account_type": "vpa",
			"vpa": { "address": vpa },
		});

		let account: FundAccount = self
			.post(PayoutStage::FundAccount, "/fund_accounts", &body, None)
			.await?;
		info!(contact_id, fund_account_id = %account.id, vpa, "fund account created");
		Ok(account)
	}

	/// Issues the UPI payout. A fresh idempotency key per attempt makes
	/// concurrent duplicates safe on the provider side; low balance
	/// queues the payout instead of failing it.
	pub async fn create_payout(
		&self,
		fund_account_id: &str,
		amount_paise: u64,
		order_id: OrderId,
	) -> Result<Payout, PayoutError> {
		let idempotency_key = Uuid::new_v4().to_string();
		// The provider truncates long reference ids; first 10 chars of
		// the order id are enough to correlate.
		let reference_id = format!("order_{}", &order_id.to_string()[..10]);

		let body = json!({
			"account_number": self.account_number,
			"fund_account_id": fund_account_id,
			"amount": amount_paise,
			"currency": "INR",
			"mode": "UPI",
			"purpose": "payout",
			"queue_if_low_balance": true,
			"reference_id": reference_id,
			"narration": NARRATION,
			"notes": {
				"order_id": order_id.to_string(),
				"payment_method": "UPI",
				"processed_by": "resolver_bot",
			},
		});

		let payout: Payout = self
			.post(
				PayoutStage::Payout,
				"/payouts",
				&body,
				Some(("X-Payout-Idempotency", idempotency_key.as_str())),
			)
			.await?;
		info!(
			order_id = %order_id,
			payout_id = %payout.id,
			amount_paise,
			status = %payout.status,
			utr = payout.utr.as_deref().unwrap_or("pending"),
			"payout created"
		);
		Ok(payout)
	}

	async fn post<T: for<'de> Deserialize<'de>>(
		&self,
		stage: PayoutStage,
		path: &str,
		body: &Value,
		extra_header: Option<(&str, &str)>,
	) -> Result<T, PayoutError> {
		let url = format!("{}{path}", self.api_url);
		let mut request = self
			.client
			.post(&url)
			.header("Authorization", &self.auth_header)
			.json(body);
		if let Some((name, value)) = extra_header {
			request = request.header(name, value);
		}

		let response = request.send().await.map_err(|err| {
			if err.is_timeout() {
				PayoutError::Timeout {
					stage,
					detail: err.to_string(),
				}
			} else {
				PayoutError::Transport {
					stage,
					detail: err.to_string(),
				}
			}
		})?;

		let status = response.status();
		let text = response.text().await.map_err(|err| PayoutError::Transport {
			stage,
			detail: err.to_string(),
		})?;

		if !status.is_success() {
			return Err(PayoutError::Api {
				stage,
				status: status.as_u16(),
				description: error_description(&text),
			});
		}

		serde_json::from_str(&text).map_err(|err| PayoutError::Decode {
			stage,
			detail: err.to_string(),
		})
	}
}

/// Pulls the provider's human-readable description out of an error
/// body, falling back to the raw text.
fn error_description(body: &str) -> String {
	serde_json::from_str::<Value>(body)
		.ok()
		.and_then(|value| {
			value
				.get("error")?
				.get("description")?
				.as_str()
				.map(str::to_string)
		})
		.unwrap_or_else(|| body.to_string())
}
