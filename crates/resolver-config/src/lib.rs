//! Configuration loading for the resolver bot.
//!
//! Configuration is TOML with `${VAR}` environment substitution and a
//! small set of `RESOLVER_`-prefixed overrides. Every tuning knob of
//! the observer and auction logic lives here rather than as a hard
//! constant: the fallback threshold, staleness threshold and the
//! randomized-bidding bounds are deployment decisions.

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}
