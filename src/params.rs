//! Encryption parameters and the noise-cost model.
//!
//! The parameter set mirrors a BFV-style configuration: a power-of-two
//! polynomial modulus degree, a chain of coefficient-modulus primes (given
//! by bit size), a plain modulus and the fractional encoder layout
//! (integer digits, fraction digits, base). The noise-cost model lives here
//! too, so switching parameter sets moves every per-operation cost and the
//! fresh budget coherently.

use serde::{Deserialize, Serialize};

use crate::error::{HefitError, Result};

/// Guard subtracted from the fresh budget for encryption noise headroom.
const FRESH_NOISE_MARGIN: i64 = 10;

/// Session-wide scheme parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionParams {
    /// Degree of the polynomial modulus (power of two).
    pub poly_modulus_degree: usize,
    /// Bit sizes of the coefficient-modulus primes.
    pub coeff_modulus_bits: Vec<u32>,
    /// Bit size of the plain modulus.
    pub plain_modulus_bits: u32,
    /// Integer digits of the fractional encoder.
    pub int_digits: usize,
    /// Fraction digits of the fractional encoder.
    pub frac_digits: usize,
    /// Digit base of the fractional encoder.
    pub encoder_base: u32,
}

impl EncryptionParams {
    /// Session defaults: degree 512, sixty 60-bit primes, 32-bit plain
    /// modulus, fractional encoder (64, 32, 3).
    #[must_use]
    pub fn default_session() -> Self {
        Self::with_coeff_primes(60)
    }

    /// Same layout as [`Self::default_session`] but with `n_primes`
    /// coefficient primes. Small counts give a deliberately tight budget,
    /// which is how the exhaustion path is exercised.
    #[must_use]
    pub fn with_coeff_primes(n_primes: usize) -> Self {
        Self {
            poly_modulus_degree: 512,
            coeff_modulus_bits: vec![60; n_primes],
            plain_modulus_bits: 32,
            int_digits: 64,
            frac_digits: 32,
            encoder_base: 3,
        }
    }

    /// Check the parameter set for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.poly_modulus_degree.is_power_of_two() || self.poly_modulus_degree < 2 {
            return Err(HefitError::InvalidParams {
                reason: format!(
                    "poly_modulus_degree must be a power of two >= 2, got {}",
                    self.poly_modulus_degree
                ),
            });
        }
        if self.coeff_modulus_bits.is_empty() {
            return Err(HefitError::InvalidParams {
                reason: "coefficient modulus chain is empty".into(),
            });
        }
        if self.coeff_modulus_bits.iter().any(|&b| b == 0 || b > 62) {
            return Err(HefitError::InvalidParams {
                reason: "coefficient primes must be 1..=62 bits".into(),
            });
        }
        if self.plain_modulus_bits == 0 || u64::from(self.plain_modulus_bits) >= self.total_coeff_bits() {
            return Err(HefitError::InvalidParams {
                reason: "plain modulus must be smaller than the coefficient modulus".into(),
            });
        }
        if self.encoder_base < 2 || self.encoder_base > 64 {
            return Err(HefitError::InvalidParams {
                reason: format!("encoder base must be in 2..=64, got {}", self.encoder_base),
            });
        }
        if self.int_digits == 0 || self.frac_digits == 0 {
            return Err(HefitError::InvalidParams {
                reason: "encoder must keep at least one integer and one fraction digit".into(),
            });
        }
        Ok(())
    }

    /// Total bit size of the coefficient-modulus product.
    #[must_use]
    pub fn total_coeff_bits(&self) -> u64 {
        self.coeff_modulus_bits.iter().map(|&b| u64::from(b)).sum()
    }

    /// Invariant noise budget of a freshly encrypted ciphertext, in bits.
    #[must_use]
    pub fn fresh_noise_budget(&self) -> i64 {
        let total = self.total_coeff_bits() as i64;
        total - i64::from(self.plain_modulus_bits) - self.log2_degree() - FRESH_NOISE_MARGIN
    }

    /// Budget cost of a ciphertext-ciphertext addition.
    #[must_use]
    pub fn add_cost(&self) -> i64 {
        2
    }

    /// Budget cost of adding an encoded plaintext to a ciphertext.
    #[must_use]
    pub fn add_plain_cost(&self) -> i64 {
        1
    }

    /// Budget cost of a ciphertext-ciphertext multiplication. The dominant
    /// cost in the model: the plain modulus plus the ring expansion factor.
    #[must_use]
    pub fn multiply_cost(&self) -> i64 {
        i64::from(self.plain_modulus_bits) + self.log2_degree() + 8
    }

    /// Budget cost of multiplying a ciphertext by an encoded plaintext with
    /// `nonzero_digits` nonzero encoder digits. Scales with the plaintext
    /// norm, so small constants (a sign flip, a learning-rate coefficient)
    /// stay far cheaper than any ciphertext-ciphertext multiply.
    #[must_use]
    pub fn multiply_plain_cost(&self, nonzero_digits: usize) -> i64 {
        let norm_bits = (usize::BITS - nonzero_digits.leading_zeros()) as i64;
        norm_bits + 2
    }

    /// Budget cost of a k-ary homomorphic accumulation.
    #[must_use]
    pub fn sum_many_cost(&self, operands: usize) -> i64 {
        let k = operands.max(2) as u64;
        let ceil_log2 = (u64::BITS - (k - 1).leading_zeros()) as i64;
        ceil_log2 + 1
    }

    /// Budget cost of relinearizing away one extra ciphertext component.
    #[must_use]
    pub fn relinearize_cost(&self) -> i64 {
        6
    }

    fn log2_degree(&self) -> i64 {
        i64::from(usize::BITS - 1 - self.poly_modulus_degree.leading_zeros() as u32)
    }
}

impl Default for EncryptionParams {
    fn default() -> Self {
        Self::default_session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_budget() {
        let params = EncryptionParams::default_session();
        assert_eq!(params.total_coeff_bits(), 3600);
        // 3600 - 32 (plain) - 9 (log2 512) - 10 (margin)
        assert_eq!(params.fresh_noise_budget(), 3549);
        params.validate().expect("defaults must validate");
    }

    #[test]
    fn tight_chain_budget() {
        let params = EncryptionParams::with_coeff_primes(2);
        assert_eq!(params.fresh_noise_budget(), 69);
        assert!(params.multiply_cost() > params.multiply_plain_cost(64));
    }

    #[test]
    fn sum_many_cost_is_logarithmic() {
        let params = EncryptionParams::default_session();
        assert_eq!(params.sum_many_cost(2), 2);
        assert_eq!(params.sum_many_cost(4), 3);
        assert_eq!(params.sum_many_cost(1000), 11);
        // far below a sequential fold of pairwise adds
        assert!(params.sum_many_cost(1000) < 999 * params.add_cost());
    }

    #[test]
    fn rejects_bad_degree() {
        let mut params = EncryptionParams::default_session();
        params.poly_modulus_degree = 500;
        assert!(matches!(
            params.validate(),
            Err(HefitError::InvalidParams { .. })
        ));
    }

    #[test]
    fn rejects_empty_modulus_chain() {
        let mut params = EncryptionParams::default_session();
        params.coeff_modulus_bits.clear();
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_oversized_plain_modulus() {
        let mut params = EncryptionParams::with_coeff_primes(1);
        params.plain_modulus_bits = 60;
        assert!(params.validate().is_err());
    }
}
