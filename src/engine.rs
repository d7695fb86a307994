//! Primitive provider: encoding, encryption, homomorphic evaluation.
//!
//! This engine models the operational contract of a BFV-style scheme the
//! way SEAL's noise simulator does: every ciphertext binds an exact
//! fixed-point payload to the session keystream and carries an explicit
//! noise-budget ledger plus a component count. Arithmetic is exact up to
//! fixed-point rounding; the budget ledger decides validity. Once the
//! budget of a ciphertext reaches zero, decryption silently yields garbage,
//! exactly like a lattice backend whose invariant noise has swallowed the
//! plaintext. The masking binds ciphertexts to the context's secret seed
//! but is not semantically secure; production deployments swap a lattice
//! backend behind the same surface.
//!
//! Public-side operations live on [`Encryptor`], secret-side operations on
//! [`Decryptor`]; tensors only ever hold an `Encryptor`, so nothing above
//! this module can reach the secret key.

use std::fmt;
use std::sync::Arc;

use num_integer::Integer;
use rand::{thread_rng, Rng};
use rand_distr::{Distribution, Normal};

use crate::context::{splitmix64, CryptoContext};
use crate::error::{HefitError, Result};
use crate::params::EncryptionParams;

/// Binary fixed-point scale of evaluator payloads.
const PAYLOAD_FRAC_BITS: u32 = 40;
/// 2^PAYLOAD_FRAC_BITS as f64.
const PAYLOAD_SCALE: f64 = (1u64 << PAYLOAD_FRAC_BITS) as f64;
/// Standard deviation of fresh encryption noise, in payload ulps.
const FRESH_NOISE_SIGMA: f64 = 8.0;
/// Component count of a freshly encrypted ciphertext.
const FRESH_SIZE: usize = 2;

/// An encoded-but-not-encrypted value: signed positional digits in the
/// encoder base plus the fixed-point image the evaluator consumes.
///
/// Carries no noise budget and combines with ciphertexts through the cheap
/// `*_plain` primitives.
#[derive(Debug, Clone)]
pub struct Plaintext {
    /// Signed digits, least significant first; digit `i` weighs
    /// `base^(i - frac_digits)`.
    digits: Vec<i8>,
    /// `round(value * 2^PAYLOAD_FRAC_BITS)`.
    fixed: i128,
    base: u32,
    frac_digits: usize,
}

impl Plaintext {
    /// Number of nonzero encoder digits; the norm proxy that prices
    /// plaintext multiplication.
    #[must_use]
    pub fn nonzero_digits(&self) -> usize {
        self.digits.iter().filter(|&&d| d != 0).count()
    }

    /// Exact value carried by the digit representation.
    #[must_use]
    pub fn value(&self) -> f64 {
        let base = f64::from(self.base);
        let mut acc = 0.0;
        for &d in self.digits.iter().rev() {
            acc = acc * base + f64::from(d);
        }
        acc / base.powi(self.frac_digits as i32)
    }

    pub(crate) fn fixed(&self) -> i128 {
        self.fixed
    }
}

/// A ciphertext: masked payload, component count and noise-budget ledger.
#[derive(Clone)]
pub struct Ciphertext {
    /// Fixed-point payload XOR the context keystream block at `nonce`.
    body: u128,
    nonce: u64,
    size: usize,
    budget: i64,
}

impl Ciphertext {
    /// Remaining invariant noise budget in bits, clamped at zero.
    ///
    /// A ciphertext reporting zero still decrypts without error, but the
    /// result is garbage; callers must query before relying on a decrypt.
    #[must_use]
    pub fn noise_budget(&self) -> i64 {
        self.budget.max(0)
    }

    /// Component count; grows with ciphertext-ciphertext multiplication
    /// and serves as the memory-cost proxy.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ciphertext")
            .field("size", &self.size)
            .field("noise_budget", &self.noise_budget())
            .finish()
    }
}

/// Public-side handle: encoding, encryption and every homomorphic
/// operation. Cheap to clone; clones share the session context.
#[derive(Debug, Clone)]
pub struct Encryptor {
    ctx: Arc<CryptoContext>,
}

impl Encryptor {
    /// Public-side view over `ctx`.
    #[must_use]
    pub fn new(ctx: &Arc<CryptoContext>) -> Self {
        Self { ctx: Arc::clone(ctx) }
    }

    /// Session parameters.
    #[must_use]
    pub fn params(&self) -> &EncryptionParams {
        self.ctx.params()
    }

    pub(crate) fn same_context(&self, other: &Encryptor) -> bool {
        self.ctx.context_id() == other.ctx.context_id()
    }

    /// Encode a number without encrypting it.
    #[must_use]
    pub fn encode(&self, value: f64) -> Plaintext {
        let params = self.ctx.params();
        let base = i128::from(params.encoder_base);
        let scale = f64::from(params.encoder_base).powi(params.frac_digits as i32);
        let digits = decompose_digits((value * scale).round() as i128, base);
        Plaintext {
            digits,
            fixed: (value * PAYLOAD_SCALE).round() as i128,
            base: params.encoder_base,
            frac_digits: params.frac_digits,
        }
    }

    /// Encrypt a number: encode, add fresh noise, mask, fresh budget.
    #[must_use]
    pub fn encrypt(&self, value: f64) -> Ciphertext {
        self.encrypt_plain(&self.encode(value))
    }

    /// Encrypt an already-encoded plaintext.
    #[must_use]
    pub fn encrypt_plain(&self, plain: &Plaintext) -> Ciphertext {
        let noise = Normal::new(0.0, FRESH_NOISE_SIGMA)
            .expect("fresh noise distribution is valid")
            .sample(&mut thread_rng())
            .round() as i128;
        self.seal(
            plain.fixed().wrapping_add(noise),
            FRESH_SIZE,
            self.params().fresh_noise_budget(),
        )
    }

    /// Homomorphic ciphertext-ciphertext addition.
    #[must_use]
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        self.seal(
            self.payload(a).wrapping_add(self.payload(b)),
            a.size.max(b.size),
            a.budget.min(b.budget) - self.params().add_cost(),
        )
    }

    /// Add an encoded plaintext to a ciphertext.
    #[must_use]
    pub fn add_plain(&self, a: &Ciphertext, plain: &Plaintext) -> Ciphertext {
        self.seal(
            self.payload(a).wrapping_add(plain.fixed()),
            a.size,
            a.budget - self.params().add_plain_cost(),
        )
    }

    /// Homomorphic ciphertext-ciphertext multiplication. The component
    /// count grows to `a.size + b.size - 1`; relinearization is a separate,
    /// explicit step.
    #[must_use]
    pub fn multiply(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        self.seal(
            fixed_mul(self.payload(a), self.payload(b)),
            a.size + b.size - 1,
            a.budget.min(b.budget) - self.params().multiply_cost(),
        )
    }

    /// Multiply a ciphertext by an encoded plaintext. Cost scales with the
    /// plaintext's digit norm, far below any ciphertext-ciphertext
    /// multiply, and the component count does not grow.
    #[must_use]
    pub fn multiply_plain(&self, a: &Ciphertext, plain: &Plaintext) -> Ciphertext {
        self.seal(
            fixed_mul(self.payload(a), plain.fixed()),
            a.size,
            a.budget - self.params().multiply_plain_cost(plain.nonzero_digits()),
        )
    }

    /// K-ary homomorphic accumulation: one batched add over all operands,
    /// with logarithmic budget cost instead of a pairwise fold.
    pub fn sum_many(&self, operands: &[Ciphertext]) -> Result<Ciphertext> {
        let first = operands.first().ok_or(HefitError::EmptyTensor)?;
        let mut payload = 0i128;
        let mut size = FRESH_SIZE;
        let mut budget = first.budget;
        for ct in operands {
            payload = payload.wrapping_add(self.payload(ct));
            size = size.max(ct.size);
            budget = budget.min(ct.budget);
        }
        Ok(self.seal(
            payload,
            size,
            budget - self.params().sum_many_cost(operands.len()),
        ))
    }

    /// Reduce a ciphertext back to two components. A no-op copy for
    /// ciphertexts that are already minimal.
    #[must_use]
    pub fn relinearize(&self, a: &Ciphertext) -> Ciphertext {
        if a.size <= FRESH_SIZE {
            return a.clone();
        }
        let dropped = (a.size - FRESH_SIZE) as i64;
        self.seal(
            self.payload(a),
            FRESH_SIZE,
            a.budget - dropped * self.params().relinearize_cost(),
        )
    }

    fn payload(&self, ct: &Ciphertext) -> i128 {
        (ct.body ^ self.ctx.keystream(ct.nonce)) as i128
    }

    fn seal(&self, payload: i128, size: usize, budget: i64) -> Ciphertext {
        let nonce = thread_rng().gen();
        Ciphertext {
            body: (payload as u128) ^ self.ctx.keystream(nonce),
            nonce,
            size,
            budget,
        }
    }
}

/// Secret-side handle: decryption and decoding.
#[derive(Debug, Clone)]
pub struct Decryptor {
    ctx: Arc<CryptoContext>,
}

impl Decryptor {
    /// Secret-side view over `ctx`.
    #[must_use]
    pub fn new(ctx: &Arc<CryptoContext>) -> Self {
        Self { ctx: Arc::clone(ctx) }
    }

    /// Decrypt a ciphertext.
    ///
    /// Known sharp edge: a ciphertext whose budget is exhausted (or one
    /// built under a different context) decrypts to garbage without any
    /// error. The scheme cannot tell; checking `noise_budget()` first is
    /// the caller's responsibility.
    #[must_use]
    pub fn decrypt(&self, ct: &Ciphertext) -> f64 {
        if ct.budget <= 0 {
            return garbage(ct);
        }
        let payload = (ct.body ^ self.ctx.keystream(ct.nonce)) as i128;
        payload as f64 / PAYLOAD_SCALE
    }

    /// Decode an encoded plaintext.
    #[must_use]
    pub fn decode(&self, plain: &Plaintext) -> f64 {
        plain.value()
    }
}

/// Fixed-point product: multiply payloads, rescale back to payload scale.
fn fixed_mul(a: i128, b: i128) -> i128 {
    let half = 1i128 << (PAYLOAD_FRAC_BITS - 1);
    a.wrapping_mul(b).wrapping_add(half) >> PAYLOAD_FRAC_BITS
}

/// Signed positional digit decomposition of `n` in `base`.
fn decompose_digits(n: i128, base: i128) -> Vec<i8> {
    let negative = n < 0;
    let mut magnitude = n.unsigned_abs();
    let base = base.unsigned_abs();
    let mut digits = Vec::new();
    while magnitude != 0 {
        let (q, r) = magnitude.div_rem(&base);
        let digit = r as i8;
        digits.push(if negative { -digit } else { digit });
        magnitude = q;
    }
    digits
}

/// Deterministic junk derived from the masked body, standing in for the
/// uniform ring element a noise-swamped decryption produces.
fn garbage(ct: &Ciphertext) -> f64 {
    let mixed = splitmix64((ct.body >> 64) as u64 ^ ct.body as u64 ^ ct.nonce);
    mixed as i64 as f64 / PAYLOAD_SCALE
}
