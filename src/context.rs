//! Session crypto context: parameters plus key material.
//!
//! One context is created per session, then never mutated. Everything that
//! needs it (encryptor, decryptor, tensors) shares it through an `Arc`, so
//! concurrent workers read it without locking.

use std::fmt;
use std::sync::Arc;

use rand::{thread_rng, Rng};

use crate::error::Result;
use crate::params::EncryptionParams;

/// Immutable session state: validated parameters, the secret seed all
/// keystream material derives from, and a random context id used to detect
/// cross-context operand mixing.
pub struct CryptoContext {
    params: EncryptionParams,
    secret_seed: u64,
    context_id: u64,
}

impl CryptoContext {
    /// Validate `params` and generate fresh key material.
    pub fn new(params: EncryptionParams) -> Result<Arc<Self>> {
        params.validate()?;
        let mut rng = thread_rng();
        Ok(Arc::new(Self {
            params,
            secret_seed: rng.gen(),
            context_id: rng.gen(),
        }))
    }

    /// Parameters this context was built with.
    #[must_use]
    pub fn params(&self) -> &EncryptionParams {
        &self.params
    }

    /// Opaque id identifying this context.
    #[must_use]
    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    /// Keystream block for a ciphertext nonce. Secret-side only.
    pub(crate) fn keystream(&self, nonce: u64) -> u128 {
        let hi = splitmix64(self.secret_seed ^ nonce);
        let lo = splitmix64(hi ^ 0x9e37_79b9_7f4a_7c15);
        (u128::from(hi) << 64) | u128::from(lo)
    }
}

impl fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoContext")
            .field("params", &self.params)
            .field("secret_seed", &"[REDACTED]")
            .field("context_id", &self.context_id)
            .finish()
    }
}

/// One round of the splitmix64 mixing function.
pub(crate) fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_are_distinct() {
        let a = CryptoContext::new(EncryptionParams::default_session()).unwrap();
        let b = CryptoContext::new(EncryptionParams::default_session()).unwrap();
        assert_ne!(a.context_id(), b.context_id());
    }

    #[test]
    fn keystream_depends_on_nonce() {
        let ctx = CryptoContext::new(EncryptionParams::default_session()).unwrap();
        assert_ne!(ctx.keystream(1), ctx.keystream(2));
    }

    #[test]
    fn debug_redacts_key_material() {
        let ctx = CryptoContext::new(EncryptionParams::default_session()).unwrap();
        let rendered = format!("{ctx:?}");
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn invalid_params_are_rejected() {
        let mut params = EncryptionParams::default_session();
        params.coeff_modulus_bits.clear();
        assert!(CryptoContext::new(params).is_err());
    }
}
