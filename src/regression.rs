//! Gradient-descent least squares fitted entirely on encrypted tensors.
//!
//! The estimator consumes tensors only; it never touches the primitive
//! provider directly and never decrypts anything. The iteration budget is
//! fixed: `n_iter` bounds the loop, there is no convergence test, and
//! partial weights after any iteration are valid, decryptable state. Long
//! runs are expected to watch the weight budget and re-encrypt externally,
//! feeding the fresh ciphertexts back through `init_weights`.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::{HefitError, Result};
use crate::tensor::EncTensor;

/// Per-iteration training event handed to the observer callback, replacing
/// in-loop printing; the host application decides how to render it.
#[derive(Debug, Clone)]
pub struct IterationSnapshot {
    /// Iteration index, starting at zero.
    pub iteration: usize,
    /// Total iteration budget of this fit call.
    pub total_iterations: usize,
    /// Worst noise budget across the freshly computed gradient.
    pub gradient_noise_budget: Option<i64>,
    /// Worst noise budget across the current weights (pre-update).
    pub weight_noise_budget: Option<i64>,
    /// Largest ciphertext component count across the current weights.
    pub weight_cipher_size: Option<usize>,
}

/// Linear regression trained by fixed-budget gradient descent on
/// homomorphically encrypted data.
#[derive(Debug, Clone)]
pub struct SecureLinearRegression {
    lr: f64,
    n_iter: usize,
    weights: Option<EncTensor>,
    coef: Option<EncTensor>,
    plain_weights: Option<DVector<f64>>,
}

impl SecureLinearRegression {
    /// Estimator with learning rate `lr` and a hard budget of `n_iter`
    /// iterations per fit call.
    #[must_use]
    pub fn new(lr: f64, n_iter: usize) -> Self {
        Self {
            lr,
            n_iter,
            weights: None,
            coef: None,
            plain_weights: None,
        }
    }

    /// Encrypted weight vector learned by the last `fit` call.
    #[must_use]
    pub fn weights(&self) -> Option<&EncTensor> {
        self.weights.as_ref()
    }

    /// Weights learned by the last `fit_unencrypted` call.
    #[must_use]
    pub fn plain_weights(&self) -> Option<&DVector<f64>> {
        self.plain_weights.as_ref()
    }

    /// Fit on an encrypted design matrix `x` (n×k) and target `y` (n×1).
    ///
    /// Weights start at an encrypted zero vector unless `init_weights` is
    /// given; passing re-encrypted weights from a previous call is how a
    /// caller resets the noise budget between runs.
    pub fn fit(
        &mut self,
        x: &EncTensor,
        y: &EncTensor,
        init_weights: Option<EncTensor>,
    ) -> Result<()> {
        self.fit_observed(x, y, init_weights, |_| {})
    }

    /// [`Self::fit`] with a per-iteration observer.
    pub fn fit_observed<F>(
        &mut self,
        x: &EncTensor,
        y: &EncTensor,
        init_weights: Option<EncTensor>,
        mut observer: F,
    ) -> Result<()>
    where
        F: FnMut(&IterationSnapshot),
    {
        if x.ndim() != 2 {
            return Err(HefitError::RankMismatch {
                expected: 2,
                found: x.ndim(),
            });
        }
        let (n, k) = (x.shape()[0], x.shape()[1]);
        if y.shape() != [n, 1] {
            return Err(HefitError::ShapeMismatch {
                left: y.shape().to_vec(),
                right: vec![n, 1],
            });
        }

        let mut weights = match init_weights {
            Some(w) => {
                if w.shape() != [k] {
                    return Err(HefitError::ShapeMismatch {
                        left: w.shape().to_vec(),
                        right: vec![k],
                    });
                }
                w
            }
            None => EncTensor::encrypt_zeros(x.ops(), k)?,
        };

        // The per-feature step lr / n is encoded once, never encrypted:
        // the weight update then costs a plaintext multiply per element
        // instead of a relinearizing ciphertext multiply. Computed on the
        // first fit call and reused for the lifetime of the estimator.
        let coef = match self.coef.clone() {
            Some(c) => c,
            None => {
                let c = EncTensor::encode_vec(x.ops(), &vec![self.lr / n as f64; k])?;
                self.coef = Some(c.clone());
                c
            }
        };

        let xt = x.transpose()?;

        for it in 0..self.n_iter {
            // Per-feature gradients share nothing within an iteration, so
            // they fan out across the pool; the weight update below is the
            // only barrier between iterations.
            let grad_parts: Vec<EncTensor> = (0..k)
                .into_par_iter()
                .map(|j| {
                    let mut loss_parts = Vec::with_capacity(n);
                    for i in 0..n {
                        let residual =
                            weights.mul(&x.index(i)?)?.sum()?.sub(&y.index(i)?)?;
                        loss_parts.push(residual);
                    }
                    let loss = EncTensor::stack(&loss_parts)?;
                    loss.mul(&xt.index(j)?)?.sum()
                })
                .collect::<Result<_>>()?;
            let gradient = EncTensor::stack(&grad_parts)?;

            observer(&IterationSnapshot {
                iteration: it,
                total_iterations: self.n_iter,
                gradient_noise_budget: gradient.min_noise_budget(),
                weight_noise_budget: weights.min_noise_budget(),
                weight_cipher_size: weights.max_cipher_size(),
            });

            weights = weights.sub(&gradient.mul(&coef)?)?;
        }

        self.weights = Some(weights);
        Ok(())
    }

    /// Predict targets for `x` (n×k): a single matrix product of `x`
    /// against the learned weight vector wrapped as a k×1 tensor.
    pub fn predict(&self, x: &EncTensor) -> Result<EncTensor> {
        let weights = self.weights.as_ref().ok_or(HefitError::NotFitted)?;
        let column = weights.reshape(&[weights.len(), 1])?;
        x.matmul(&column)
    }

    /// Plaintext oracle for the encrypted path: identical iteration order,
    /// learning rate and loss/gradient formulas, so the two are directly
    /// comparable within floating-point tolerance.
    pub fn fit_unencrypted(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<()> {
        let (n, k) = (x.nrows(), x.ncols());
        if n == 0 || k == 0 {
            return Err(HefitError::EmptyTensor);
        }
        if y.len() != n {
            return Err(HefitError::ShapeMismatch {
                left: vec![y.len(), 1],
                right: vec![n, 1],
            });
        }

        let coef = self.lr / n as f64;
        let mut weights = DVector::<f64>::zeros(k);
        for _ in 0..self.n_iter {
            let mut gradient = DVector::<f64>::zeros(k);
            for j in 0..k {
                let mut acc = 0.0;
                for i in 0..n {
                    let mut dot = 0.0;
                    for c in 0..k {
                        dot += weights[c] * x[(i, c)];
                    }
                    acc += (dot - y[i]) * x[(i, j)];
                }
                gradient[j] = acc;
            }
            weights -= gradient * coef;
        }
        self.plain_weights = Some(weights);
        Ok(())
    }
}

/// Closed-form least squares `(XᵀX)⁻¹ Xᵀ y`, or `None` when the normal
/// matrix is singular. One matrix product away from the encrypted path for
/// callers whose remaining noise budget allows it.
#[must_use]
pub fn solve_normal_equations(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let xt = x.transpose();
    (&xt * x).try_inverse().map(|inv| inv * (&xt * y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CryptoContext;
    use crate::engine::{Decryptor, Encryptor};
    use crate::params::EncryptionParams;

    fn session(params: EncryptionParams) -> (Encryptor, Decryptor) {
        let ctx = CryptoContext::new(params).unwrap();
        (Encryptor::new(&ctx), Decryptor::new(&ctx))
    }

    fn scenario() -> (Vec<Vec<f64>>, Vec<Vec<f64>>, DMatrix<f64>, DVector<f64>) {
        let x_rows = vec![
            vec![1.0, 1.0],
            vec![1.0, 2.0],
            vec![1.0, -1.0],
            vec![1.0, 2.0],
        ];
        let y_rows = vec![vec![2.0], vec![-1.0], vec![2.0], vec![4.0]];
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 1.0, 1.0, 2.0, 1.0, -1.0, 1.0, 2.0]);
        let y = DVector::from_vec(vec![2.0, -1.0, 2.0, 4.0]);
        (x_rows, y_rows, x, y)
    }

    #[test]
    fn encrypted_fit_matches_plaintext_oracle() {
        let (enc, dec) = session(EncryptionParams::default_session());
        let (x_rows, y_rows, x_plain, y_plain) = scenario();

        let mut model = SecureLinearRegression::new(0.2, 20);
        model.fit_unencrypted(&x_plain, &y_plain).unwrap();

        let x = EncTensor::encrypt_rows(&enc, &x_rows).unwrap();
        let y = EncTensor::encrypt_rows(&enc, &y_rows).unwrap();
        model.fit(&x, &y, None).unwrap();

        let secure = model.weights().unwrap().decrypt(&dec);
        let oracle = model.plain_weights().unwrap();
        assert_eq!(secure.len(), 2);
        for (j, w) in secure.iter().enumerate() {
            assert!(
                (w - oracle[j]).abs() < 1e-1,
                "weight {j}: encrypted {w} vs oracle {}",
                oracle[j]
            );
        }
    }

    #[test]
    fn encoded_design_matrix_trains_identically() {
        let (enc, dec) = session(EncryptionParams::default_session());
        let (x_rows, y_rows, x_plain, y_plain) = scenario();

        let mut model = SecureLinearRegression::new(0.2, 20);
        model.fit_unencrypted(&x_plain, &y_plain).unwrap();

        // the design matrix stays encoded; only targets and weights are
        // ciphertexts, and every x-multiply takes the cheap plain path
        let x = EncTensor::encode_rows(&enc, &x_rows).unwrap();
        let y = EncTensor::encrypt_rows(&enc, &y_rows).unwrap();
        model.fit(&x, &y, None).unwrap();

        let secure = model.weights().unwrap().decrypt(&dec);
        let oracle = model.plain_weights().unwrap();
        for (j, w) in secure.iter().enumerate() {
            assert!((w - oracle[j]).abs() < 1e-1);
        }
    }

    #[test]
    fn predict_matches_plaintext_product() {
        let (enc, dec) = session(EncryptionParams::default_session());
        let (x_rows, y_rows, _, _) = scenario();

        let x = EncTensor::encrypt_rows(&enc, &x_rows).unwrap();
        let y = EncTensor::encrypt_rows(&enc, &y_rows).unwrap();
        let mut model = SecureLinearRegression::new(0.2, 20);
        model.fit(&x, &y, None).unwrap();

        let w = model.weights().unwrap().decrypt(&dec);
        let predictions = model.predict(&x).unwrap();
        assert_eq!(predictions.shape(), &[4, 1]);

        let decrypted = predictions.decrypt(&dec);
        for (i, row) in x_rows.iter().enumerate() {
            let expected: f64 = row.iter().zip(&w).map(|(a, b)| a * b).sum();
            assert!(
                (decrypted[i] - expected).abs() < 1e-1,
                "prediction {i}: {} vs {expected}",
                decrypted[i]
            );
        }
    }

    #[test]
    fn predict_before_fit_fails() {
        let (enc, _) = session(EncryptionParams::default_session());
        let (x_rows, _, _, _) = scenario();
        let x = EncTensor::encrypt_rows(&enc, &x_rows).unwrap();
        let model = SecureLinearRegression::new(0.2, 5);
        assert_eq!(model.predict(&x).unwrap_err(), HefitError::NotFitted);
    }

    #[test]
    fn observer_fires_once_per_iteration() {
        let (enc, _) = session(EncryptionParams::default_session());
        let (x_rows, y_rows, _, _) = scenario();
        let x = EncTensor::encrypt_rows(&enc, &x_rows).unwrap();
        let y = EncTensor::encrypt_rows(&enc, &y_rows).unwrap();

        let mut snapshots = Vec::new();
        let mut model = SecureLinearRegression::new(0.2, 6);
        model
            .fit_observed(&x, &y, None, |s| snapshots.push(s.clone()))
            .unwrap();

        assert_eq!(snapshots.len(), 6);
        for (it, snap) in snapshots.iter().enumerate() {
            assert_eq!(snap.iteration, it);
            assert_eq!(snap.total_iterations, 6);
        }
        // weight budget shrinks across iterations
        let budgets: Vec<i64> = snapshots
            .iter()
            .map(|s| s.weight_noise_budget.unwrap())
            .collect();
        assert!(budgets.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn reencryption_resumes_training() {
        // Deliberately tight budget: two iterations fit, a third would not.
        let (enc, dec) = session(EncryptionParams::with_coeff_primes(6));
        let (x_rows, y_rows, x_plain, y_plain) = scenario();
        let x = EncTensor::encrypt_rows(&enc, &x_rows).unwrap();
        let y = EncTensor::encrypt_rows(&enc, &y_rows).unwrap();

        let mut model = SecureLinearRegression::new(0.2, 2);
        model.fit(&x, &y, None).unwrap();
        let first = model.weights().unwrap();
        assert!(first.ensure_noise_budget(150).is_err());

        // external renewal: decrypt, re-encrypt, continue from there
        let renewed = EncTensor::encrypt_vec(&enc, &first.decrypt(&dec)).unwrap();
        model.fit(&x, &y, Some(renewed)).unwrap();
        let resumed = model.weights().unwrap();
        assert!(resumed.min_noise_budget().unwrap() > 0);

        // two 2-iteration runs equal one 4-iteration plaintext run
        let mut oracle = SecureLinearRegression::new(0.2, 4);
        oracle.fit_unencrypted(&x_plain, &y_plain).unwrap();
        let expected = oracle.plain_weights().unwrap();
        for (j, w) in resumed.decrypt(&dec).iter().enumerate() {
            assert!((w - expected[j]).abs() < 1e-1);
        }
    }

    #[test]
    fn fit_validates_operand_shapes() {
        let (enc, _) = session(EncryptionParams::default_session());
        let (x_rows, y_rows, _, _) = scenario();
        let x = EncTensor::encrypt_rows(&enc, &x_rows).unwrap();
        let y = EncTensor::encrypt_rows(&enc, &y_rows).unwrap();
        let mut model = SecureLinearRegression::new(0.2, 1);

        let flat = EncTensor::encrypt_vec(&enc, &[1.0, 2.0]).unwrap();
        assert!(matches!(
            model.fit(&flat, &y, None),
            Err(HefitError::RankMismatch { .. })
        ));

        let bad_y = EncTensor::encrypt_rows(&enc, &[vec![1.0], vec![2.0]]).unwrap();
        assert!(matches!(
            model.fit(&x, &bad_y, None),
            Err(HefitError::ShapeMismatch { .. })
        ));

        let bad_init = EncTensor::encrypt_vec(&enc, &[0.0, 0.0, 0.0]).unwrap();
        assert!(matches!(
            model.fit(&x, &y, Some(bad_init)),
            Err(HefitError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn unencrypted_oracle_approaches_closed_form() {
        let (_, _, x, y) = scenario();
        let mut model = SecureLinearRegression::new(0.2, 2000);
        model.fit_unencrypted(&x, &y).unwrap();
        let fitted = model.plain_weights().unwrap();

        let exact = solve_normal_equations(&x, &y).unwrap();
        assert!((exact[0] - 23.0 / 12.0).abs() < 1e-9);
        assert!((exact[1] + 1.0 / 6.0).abs() < 1e-9);
        for j in 0..2 {
            assert!((fitted[j] - exact[j]).abs() < 1e-6);
        }
    }

    #[test]
    fn singular_normal_matrix_has_no_closed_form() {
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let y = DVector::from_vec(vec![1.0, 2.0]);
        assert!(solve_normal_equations(&x, &y).is_none());
    }
}
