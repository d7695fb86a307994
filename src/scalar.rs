//! Scalar value variant and the dtype dispatch table.
//!
//! Every tensor element is a [`CipherScalar`]: either an encrypted
//! ciphertext or an encoded-but-unencrypted plaintext. Binary arithmetic
//! dispatches on the operand pair:
//!
//! | left      | right     | result    | primitive                  |
//! |-----------|-----------|-----------|----------------------------|
//! | Encrypted | Encrypted | Encrypted | ciphertext op              |
//! | Encrypted | Encoded   | Encrypted | `*_plain` op               |
//! | Encoded   | Encrypted | Encrypted | `*_plain`, operands swapped|
//! | Encoded   | Encoded   | error     | no plaintext-only path     |
//!
//! Subtraction exists for two Encrypted operands only and reuses the cheap
//! plaintext path: negate the right operand by an encoded -1, then add.

use serde::{Deserialize, Serialize};

use crate::engine::{Ciphertext, Encryptor, Plaintext};
use crate::error::{HefitError, Result};

/// Element representation tag of a scalar or tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    /// Ciphertext elements with a finite noise budget.
    Encrypted,
    /// Encoded plaintext elements, budget-free and cheap to combine.
    Encoded,
}

/// One tensor element.
#[derive(Debug, Clone)]
pub enum CipherScalar {
    /// An encrypted value.
    Encrypted(Ciphertext),
    /// An encoded, unencrypted value.
    Encoded(Plaintext),
}

impl CipherScalar {
    /// Representation tag of this element.
    #[must_use]
    pub fn dtype(&self) -> Dtype {
        match self {
            Self::Encrypted(_) => Dtype::Encrypted,
            Self::Encoded(_) => Dtype::Encoded,
        }
    }

    /// Remaining noise budget; `None` for encoded elements.
    #[must_use]
    pub fn noise_budget(&self) -> Option<i64> {
        match self {
            Self::Encrypted(ct) => Some(ct.noise_budget()),
            Self::Encoded(_) => None,
        }
    }

    /// Ciphertext component count; `None` for encoded elements.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::Encrypted(ct) => Some(ct.size()),
            Self::Encoded(_) => None,
        }
    }
}

/// Result dtype of `add`/`multiply` on the given operand pair; the up-front
/// validation tensor operations run before touching any element.
pub fn combined_dtype(left: Dtype, right: Dtype) -> Result<Dtype> {
    match (left, right) {
        (Dtype::Encoded, Dtype::Encoded) => {
            Err(HefitError::UnsupportedDtypeCombination { left, right })
        }
        _ => Ok(Dtype::Encrypted),
    }
}

/// Result dtype of `subtract`: both operands must be Encrypted.
pub fn subtract_dtype(left: Dtype, right: Dtype) -> Result<Dtype> {
    match (left, right) {
        (Dtype::Encrypted, Dtype::Encrypted) => Ok(Dtype::Encrypted),
        _ => Err(HefitError::UnsupportedDtypeCombination { left, right }),
    }
}

/// Elementwise addition per the dispatch table.
pub fn add(ops: &Encryptor, left: &CipherScalar, right: &CipherScalar) -> Result<CipherScalar> {
    use CipherScalar::{Encoded, Encrypted};
    match (left, right) {
        (Encrypted(a), Encrypted(b)) => Ok(Encrypted(ops.add(a, b))),
        (Encrypted(a), Encoded(p)) | (Encoded(p), Encrypted(a)) => {
            Ok(Encrypted(ops.add_plain(a, p)))
        }
        (Encoded(_), Encoded(_)) => Err(HefitError::UnsupportedDtypeCombination {
            left: Dtype::Encoded,
            right: Dtype::Encoded,
        }),
    }
}

/// Elementwise multiplication per the dispatch table.
pub fn multiply(ops: &Encryptor, left: &CipherScalar, right: &CipherScalar) -> Result<CipherScalar> {
    use CipherScalar::{Encoded, Encrypted};
    match (left, right) {
        (Encrypted(a), Encrypted(b)) => Ok(Encrypted(ops.multiply(a, b))),
        (Encrypted(a), Encoded(p)) | (Encoded(p), Encrypted(a)) => {
            Ok(Encrypted(ops.multiply_plain(a, p)))
        }
        (Encoded(_), Encoded(_)) => Err(HefitError::UnsupportedDtypeCombination {
            left: Dtype::Encoded,
            right: Dtype::Encoded,
        }),
    }
}

/// Elementwise subtraction: `a - b = a + (-1) * b`, spending one plaintext
/// multiply and one add instead of a relinearizing ciphertext multiply.
pub fn subtract(ops: &Encryptor, left: &CipherScalar, right: &CipherScalar) -> Result<CipherScalar> {
    match (left, right) {
        (CipherScalar::Encrypted(a), CipherScalar::Encrypted(b)) => {
            let negated = ops.multiply_plain(b, &ops.encode(-1.0));
            Ok(CipherScalar::Encrypted(ops.add(a, &negated)))
        }
        _ => Err(HefitError::UnsupportedDtypeCombination {
            left: left.dtype(),
            right: right.dtype(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CryptoContext;
    use crate::engine::Decryptor;
    use crate::params::EncryptionParams;

    const TOL: f64 = 1e-2;

    fn session() -> (Encryptor, Decryptor) {
        let ctx = CryptoContext::new(EncryptionParams::default_session()).unwrap();
        (Encryptor::new(&ctx), Decryptor::new(&ctx))
    }

    fn decrypt(dec: &Decryptor, s: &CipherScalar) -> f64 {
        match s {
            CipherScalar::Encrypted(ct) => dec.decrypt(ct),
            CipherScalar::Encoded(p) => dec.decode(p),
        }
    }

    #[test]
    fn dispatch_table_add_multiply() {
        let (enc, dec) = session();
        let e3 = CipherScalar::Encrypted(enc.encrypt(3.0));
        let e2 = CipherScalar::Encrypted(enc.encrypt(2.0));
        let p4 = CipherScalar::Encoded(enc.encode(4.0));

        for (l, r, sum, prod) in [
            (&e3, &e2, 5.0, 6.0),
            (&e3, &p4, 7.0, 12.0),
            (&p4, &e2, 6.0, 8.0),
        ] {
            let s = add(&enc, l, r).unwrap();
            assert_eq!(s.dtype(), Dtype::Encrypted);
            assert!((decrypt(&dec, &s) - sum).abs() < TOL);

            let m = multiply(&enc, l, r).unwrap();
            assert_eq!(m.dtype(), Dtype::Encrypted);
            assert!((decrypt(&dec, &m) - prod).abs() < TOL);
        }
    }

    #[test]
    fn encoded_pair_is_rejected() {
        let (enc, _) = session();
        let a = CipherScalar::Encoded(enc.encode(1.0));
        let b = CipherScalar::Encoded(enc.encode(2.0));
        for result in [add(&enc, &a, &b), multiply(&enc, &a, &b), subtract(&enc, &a, &b)] {
            assert_eq!(
                result.unwrap_err(),
                HefitError::UnsupportedDtypeCombination {
                    left: Dtype::Encoded,
                    right: Dtype::Encoded,
                }
            );
        }
    }

    #[test]
    fn subtract_requires_two_ciphertexts() {
        let (enc, dec) = session();
        let a = CipherScalar::Encrypted(enc.encrypt(5.0));
        let b = CipherScalar::Encrypted(enc.encrypt(1.5));
        let p = CipherScalar::Encoded(enc.encode(1.5));

        let diff = subtract(&enc, &a, &b).unwrap();
        assert!((decrypt(&dec, &diff) - 3.5).abs() < TOL);

        assert!(matches!(
            subtract(&enc, &a, &p),
            Err(HefitError::UnsupportedDtypeCombination { .. })
        ));
        assert!(matches!(
            subtract(&enc, &p, &b),
            Err(HefitError::UnsupportedDtypeCombination { .. })
        ));
    }

    #[test]
    fn combined_dtype_table() {
        assert_eq!(
            combined_dtype(Dtype::Encrypted, Dtype::Encrypted).unwrap(),
            Dtype::Encrypted
        );
        assert_eq!(
            combined_dtype(Dtype::Encrypted, Dtype::Encoded).unwrap(),
            Dtype::Encrypted
        );
        assert_eq!(
            combined_dtype(Dtype::Encoded, Dtype::Encrypted).unwrap(),
            Dtype::Encrypted
        );
        assert!(combined_dtype(Dtype::Encoded, Dtype::Encoded).is_err());
        assert!(subtract_dtype(Dtype::Encrypted, Dtype::Encoded).is_err());
    }
}
