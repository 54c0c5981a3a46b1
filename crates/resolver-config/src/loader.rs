//! Configuration loader with environment variable substitution.

use crate::{Config, ConfigError};
use std::env;
use std::path::Path;

/// Loads TOML configuration, expands `${VAR}` references from the
/// environment, applies `RESOLVER_`-prefixed overrides and validates
/// the result.
#[derive(Default)]
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "RESOLVER_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let file_path = self.file_path.as_ref().ok_or_else(|| {
			ConfigError::FileNotFound("No configuration file specified".to_string())
		})?;

		let mut config = self.load_from_file(file_path).await?;
		self.apply_env_overrides(&mut config)?;
		self.validate(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, file_path: &str) -> Result<Config, ConfigError> {
		let content = tokio::fs::read_to_string(file_path).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				ConfigError::FileNotFound(file_path.to_string())
			} else {
				ConfigError::IoError(e)
			}
		})?;

		let substituted = self.substitute_env_vars(&content)?;

		toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let mut result = content.to_string();

		let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			config.resolver.log_level = log_level;
		}

		if let Ok(port) = env::var(format!("{}CALLBACK_PORT", self.env_prefix)) {
			config.resolver.callback_port = port.parse().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid callback port: {}", e))
			})?;
		}

		if let Ok(rpc_url) = env::var(format!("{}RPC_URL", self.env_prefix)) {
			config.chain.rpc_url = rpc_url;
		}

		if let Ok(backend_url) = env::var(format!("{}BACKEND_URL", self.env_prefix)) {
			config.backend.url = backend_url;
		}

		Ok(())
	}

	fn validate(&self, config: &Config) -> Result<(), ConfigError> {
		if !config.chain.rpc_url.starts_with("http://") && !config.chain.rpc_url.starts_with("https://")
		{
			return Err(ConfigError::ValidationError(
				"chain.rpc_url must be an HTTP or HTTPS URL".to_string(),
			));
		}

		if !config.backend.url.starts_with("http://") && !config.backend.url.starts_with("https://")
		{
			return Err(ConfigError::ValidationError(
				"backend.url must be an HTTP or HTTPS URL".to_string(),
			));
		}

		if let Some(ws_url) = &config.auction.ws_url {
			if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
				return Err(ConfigError::ValidationError(
					"auction.ws_url must be a ws:// or wss:// URL".to_string(),
				));
			}
		}

		if config.chain.max_blocks_per_poll == 0 {
			return Err(ConfigError::ValidationError(
				"chain.max_blocks_per_poll must be positive".to_string(),
			));
		}

		if config.chain.filter_error_threshold == 0 {
			return Err(ConfigError::ValidationError(
				"chain.filter_error_threshold must be positive".to_string(),
			));
		}

		let auction = &config.auction;
		if !(0.0..=1.0).contains(&auction.participation_probability) {
			return Err(ConfigError::ValidationError(
				"auction.participation_probability must be within [0, 1]".to_string(),
			));
		}
		if auction.min_delay_ms >= auction.max_delay_ms {
			return Err(ConfigError::ValidationError(
				"auction.min_delay_ms must be below auction.max_delay_ms".to_string(),
			));
		}

		let bidding = &config.bidding;
		if bidding.min_fraction_bp > bidding.max_fraction_bp || bidding.max_fraction_bp > 10_000 {
			return Err(ConfigError::ValidationError(
				"bidding fraction bounds must satisfy min <= max <= 10000".to_string(),
			));
		}

		Ok(())
	}
}
