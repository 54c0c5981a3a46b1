//! Fiat amount conversion.
//!
//! Order principals are carried on the ledger as 18-decimal fixed-point
//! INR. The payment provider wants integer paise (1 INR = 100 paise),
//! so a payout of the principal divides by 10^16 with half-up rounding.

use crate::common::U256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AmountError {
	#[error("amount {0} does not fit in u64 paise")]
	Overflow(U256),
}

/// One paise expressed in 18-decimal INR units (10^16).
fn paise_unit() -> U256 {
	U256::from(10u64).pow(U256::from(16u64))
}

/// Converts an 18-decimal INR amount to integer paise, rounding half up.
pub fn amount_to_paise(amount: U256) -> Result<u64, AmountError> {
	let unit = paise_unit();
	let half = unit >> 1;
	// U256 addition wraps, so amounts near the top of the range would
	// silently divide down to a tiny quotient.
	let rounded = amount
		.checked_add(half)
		.ok_or(AmountError::Overflow(amount))?
		/ unit;
	u64::try_from(rounded).map_err(|_| AmountError::Overflow(amount))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn inr(whole: u64) -> U256 {
		U256::from(whole) * U256::from(10u64).pow(U256::from(18u64))
	}

	#[test]
	fn whole_rupees() {
		assert_eq!(amount_to_paise(inr(100)).unwrap(), 10_000);
		assert_eq!(amount_to_paise(inr(1)).unwrap(), 100);
		assert_eq!(amount_to_paise(U256::ZERO).unwrap(), 0);
	}

	#[test]
	fn rounds_half_up() {
		// 0.004999... INR rounds down, 0.005 INR rounds up to 1 paise.
		let unit = U256::from(10u64).pow(U256::from(16u64));
		let half = unit >> 1;
		assert_eq!(amount_to_paise(half - U256::from(1u64)).unwrap(), 0);
		assert_eq!(amount_to_paise(half).unwrap(), 1);
	}

	#[test]
	fn fractional_amounts() {
		// 12.34 INR = 1234 paise
		let amount = U256::from(1234u64) * U256::from(10u64).pow(U256::from(16u64));
		assert_eq!(amount_to_paise(amount).unwrap(), 1234);
	}

	#[test]
	fn overflow_is_an_error() {
		assert!(amount_to_paise(U256::MAX).is_err());
	}

	#[test]
	fn near_max_amounts_do_not_wrap_to_zero() {
		// Adding the rounding half to these would wrap the sum.
		let unit = U256::from(10u64).pow(U256::from(16u64));
		let half = unit >> 1;
		for amount in [U256::MAX, U256::MAX - U256::from(1u64), U256::MAX - half] {
			assert!(matches!(
				amount_to_paise(amount),
				Err(AmountError::Overflow(_))
			));
		}
		// The largest representable payout still converts.
		let max_paise = U256::from(u64::MAX) * unit;
		assert_eq!(amount_to_paise(max_paise).unwrap(), u64::MAX);
	}
}
