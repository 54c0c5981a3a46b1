//! Injectable randomness for bidding and auction behavior.
//!
//! Kept behind a trait so tests can pin fractions, participation and
//! delays to deterministic values.

use rand::Rng;

pub trait Randomness: Send + Sync {
	/// Uniform bid fraction in basis points, inclusive bounds.
	fn fraction_bp(&self, min: u32, max: u32) -> u32;

	/// Biased coin flip with the given probability of `true`.
	fn participate(&self, probability: f64) -> bool;

	/// Uniform delay in milliseconds, inclusive bounds.
	fn delay_ms(&self, min: u64, max: u64) -> u64;
}

/// Thread-local RNG. Draws a fresh handle per call since the handle
/// itself is not `Send`.
pub struct ThreadRandomness;

impl Randomness for ThreadRandomness {
	fn fraction_bp(&self, min: u32, max: u32) -> u32 {
		rand::thread_rng().gen_range(min..=max)
	}

	fn participate(&self, probability: f64) -> bool {
		rand::thread_rng().gen_bool(probability.clamp(0.0, 1.0))
	}

	fn delay_ms(&self, min: u64, max: u64) -> u64 {
		rand::thread_rng().gen_range(min..=max)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fraction_respects_bounds() {
		let rng = ThreadRandomness;
		for _ in 0..200 {
			let bp = rng.fraction_bp(3000, 7000);
			assert!((3000..=7000).contains(&bp));
		}
	}

	#[test]
	fn delay_respects_bounds() {
		let rng = ThreadRandomness;
		for _ in 0..200 {
			let ms = rng.delay_ms(500, 4500);
			assert!((500..=4500).contains(&ms));
		}
	}

	#[test]
	fn certain_probabilities_are_deterministic() {
		let rng = ThreadRandomness;
		assert!(rng.participate(1.0));
		assert!(!rng.participate(0.0));
	}
}
