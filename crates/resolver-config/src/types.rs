//! Configuration schema.

use resolver_types::Address;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub resolver: ResolverConfig,
	pub chain: ChainConfig,
	pub backend: BackendConfig,
	pub payout: PayoutConfig,
	#[serde(default)]
	pub auction: AuctionConfig,
	#[serde(default)]
	pub bidding: BiddingConfig,
}

/// Identity and inbound-callback settings for this agent.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
	/// Ledger address this resolver accepts orders as.
	pub address: Address,
	#[serde(default = "defaults::log_level")]
	pub log_level: String,
	#[serde(default = "defaults::callback_port")]
	pub callback_port: u16,
	/// Callback URL registered with the coordinator. Derived from the
	/// port when absent.
	#[serde(default)]
	pub callback_url: Option<String>,
}

impl ResolverConfig {
	pub fn callback_url(&self) -> String {
		self.callback_url.clone().unwrap_or_else(|| {
			format!(
				"http://localhost:{}/callback/order-accepted",
				self.callback_port
			)
		})
	}
}

/// How events are observed on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserveMode {
	/// Periodic block-range log queries. The reliable default.
	Polling,
	/// Server-side event filters with automatic fallback to polling.
	Subscription,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
	pub rpc_url: String,
	pub contract_address: Address,
	#[serde(default = "defaults::observe_mode")]
	pub mode: ObserveMode,
	#[serde(default = "defaults::poll_interval_secs")]
	pub poll_interval_secs: u64,
	#[serde(default = "defaults::max_blocks_per_poll")]
	pub max_blocks_per_poll: u64,
	#[serde(default = "defaults::filter_poll_interval_secs")]
	pub filter_poll_interval_secs: u64,
	#[serde(default = "defaults::health_check_interval_secs")]
	pub health_check_interval_secs: u64,
	/// Blocks the watermark may lag before listeners are proactively
	/// recreated.
	#[serde(default = "defaults::stale_block_threshold")]
	pub stale_block_threshold: u64,
	/// Stale-subscription errors tolerated before the permanent switch
	/// to polling.
	#[serde(default = "defaults::filter_error_threshold")]
	pub filter_error_threshold: u32,
	#[serde(default = "defaults::recovery_grace_secs")]
	pub recovery_grace_secs: u64,
	#[serde(default = "defaults::rpc_timeout_secs")]
	pub rpc_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
	pub url: String,
	#[serde(default = "defaults::backend_timeout_secs")]
	pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutConfig {
	#[serde(default = "defaults::payout_api_url")]
	pub api_url: String,
	pub key_id: String,
	pub key_secret: String,
	pub account_number: String,
	#[serde(default = "defaults::payout_timeout_secs")]
	pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionConfig {
	#[serde(default)]
	pub ws_url: Option<String>,
	#[serde(default = "defaults::participation_probability")]
	pub participation_probability: f64,
	#[serde(default = "defaults::min_delay_ms")]
	pub min_delay_ms: u64,
	/// Must stay under the auction's external timeout floor so the bid
	/// has a chance to land.
	#[serde(default = "defaults::max_delay_ms")]
	pub max_delay_ms: u64,
	#[serde(default = "defaults::reconnect_secs")]
	pub reconnect_secs: u64,
}

impl Default for AuctionConfig {
	fn default() -> Self {
		Self {
			ws_url: None,
			participation_probability: defaults::participation_probability(),
			min_delay_ms: defaults::min_delay_ms(),
			max_delay_ms: defaults::max_delay_ms(),
			reconnect_secs: defaults::reconnect_secs(),
		}
	}
}

/// Bounds of the randomized bid discount, in basis points of the
/// start-to-end price range.
#[derive(Debug, Clone, Deserialize)]
pub struct BiddingConfig {
	#[serde(default = "defaults::min_fraction_bp")]
	pub min_fraction_bp: u32,
	#[serde(default = "defaults::max_fraction_bp")]
	pub max_fraction_bp: u32,
}

impl Default for BiddingConfig {
	fn default() -> Self {
		Self {
			min_fraction_bp: defaults::min_fraction_bp(),
			max_fraction_bp: defaults::max_fraction_bp(),
		}
	}
}

pub(crate) mod defaults {
	use super::ObserveMode;

	pub fn log_level() -> String {
		"info".to_string()
	}
	pub fn callback_port() -> u16 {
		3001
	}
	pub fn observe_mode() -> ObserveMode {
		ObserveMode::Polling
	}
	pub fn poll_interval_secs() -> u64 {
		15
	}
	pub fn max_blocks_per_poll() -> u64 {
		100
	}
	pub fn filter_poll_interval_secs() -> u64 {
		4
	}
	pub fn health_check_interval_secs() -> u64 {
		60
	}
	pub fn stale_block_threshold() -> u64 {
		50
	}
	pub fn filter_error_threshold() -> u32 {
		3
	}
	pub fn recovery_grace_secs() -> u64 {
		2
	}
	pub fn rpc_timeout_secs() -> u64 {
		15
	}
	pub fn backend_timeout_secs() -> u64 {
		30
	}
	pub fn payout_api_url() -> String {
		"https://api.razorpay.com/v1".to_string()
	}
	pub fn payout_timeout_secs() -> u64 {
		30
	}
	pub fn participation_probability() -> f64 {
		0.7
	}
	pub fn min_delay_ms() -> u64 {
		500
	}
	pub fn max_delay_ms() -> u64 {
		4500
	}
	pub fn reconnect_secs() -> u64 {
		5
	}
	pub fn min_fraction_bp() -> u32 {
		3000
	}
	pub fn max_fraction_bp() -> u32 {
		7000
	}
}
