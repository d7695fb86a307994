//! HEFit demo: secure linear regression on a synthetic dataset, with
//! per-iteration stats written to CSV and noise-budget-driven
//! re-encryption between runs.

use std::error::Error;
use std::time::Instant;

use csv::Writer;
use hefit_core::{
    solve_normal_equations, CryptoContext, Decryptor, EncTensor, EncryptionParams, Encryptor,
    SecureLinearRegression,
};
use nalgebra::{DMatrix, DVector};
use rand::{thread_rng, Rng};
use rand_distr::{Distribution, Normal};

/// Budget floor below which weights are handed back for re-encryption.
const BUDGET_FLOOR: i64 = 400;

fn main() -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_path("training_stats.csv")?;
    wtr.write_record(["run", "iteration", "weight_budget", "weight_size", "time_ms"])?;

    // 12 coefficient primes: enough for a few iterations per run, tight
    // enough that the re-encryption path actually triggers.
    let params = EncryptionParams::with_coeff_primes(12);
    println!("Initializing HEFit session:");
    println!(
        "degree = {}, coeff bits = {}, plain bits = {}, fresh budget = {}",
        params.poly_modulus_degree,
        params.total_coeff_bits(),
        params.plain_modulus_bits,
        params.fresh_noise_budget()
    );

    let ctx = CryptoContext::new(params)?;
    let enc = Encryptor::new(&ctx);
    let dec = Decryptor::new(&ctx);

    let (x_rows, y_vals) = generate_dataset(7, 1, 15.0);
    let y_rows: Vec<Vec<f64>> = y_vals.iter().map(|&v| vec![v]).collect();
    println!(
        "X shape: ({}, {}), y shape: ({}, 1)",
        x_rows.len(),
        x_rows[0].len(),
        y_vals.len()
    );

    let x_plain = DMatrix::from_row_slice(
        x_rows.len(),
        x_rows[0].len(),
        &x_rows.iter().flatten().copied().collect::<Vec<_>>(),
    );
    let y_plain = DVector::from_vec(y_vals.clone());

    println!("=========== unencrypted reference ===========");
    let mut model = SecureLinearRegression::new(0.2, 25);
    model.fit_unencrypted(&x_plain, &y_plain)?;
    println!("estimated parameters: {:?}", model.plain_weights().unwrap().as_slice());
    if let Some(exact) = solve_normal_equations(&x_plain, &y_plain) {
        println!("closed-form solution: {:?}", exact.as_slice());
    }

    println!("================= secure fit ================");
    let x_enc = EncTensor::encrypt_rows(&enc, &x_rows)?;
    let y_enc = EncTensor::encrypt_rows(&enc, &y_rows)?;

    let n_runs = 5;
    let mut model = SecureLinearRegression::new(0.2, 3);
    let mut init_weights = None;
    for run in 0..n_runs {
        println!("RUN {}/{n_runs}:", run + 1);
        let start = Instant::now();
        let mut rows = Vec::new();
        model.fit_observed(&x_enc, &y_enc, init_weights.take(), |snap| {
            println!(
                "  iteration {}: weight budget {:?} bits, size {:?}, gradient budget {:?} bits",
                snap.iteration,
                snap.weight_noise_budget,
                snap.weight_cipher_size,
                snap.gradient_noise_budget
            );
            rows.push((
                snap.iteration,
                snap.weight_noise_budget.unwrap_or(0),
                snap.weight_cipher_size.unwrap_or(0),
                start.elapsed().as_secs_f64() * 1000.0,
            ));
        })?;
        for (iteration, budget, size, ms) in rows {
            wtr.write_record([
                (run + 1).to_string(),
                iteration.to_string(),
                budget.to_string(),
                size.to_string(),
                format!("{ms:.3}"),
            ])?;
        }

        let weights = model.weights().expect("fit stores weights");
        let decrypted = weights.decrypt(&dec);
        println!("  estimated parameters: {decrypted:?}");

        // renew ciphertexts once the budget drops near the floor; the next
        // run then continues from a fresh encryption of the same weights
        match weights.ensure_noise_budget(BUDGET_FLOOR) {
            Ok(()) => init_weights = Some(weights.clone()),
            Err(err) => {
                println!("  {err}; re-encrypting weights");
                init_weights = Some(EncTensor::encrypt_vec(&enc, &decrypted)?);
            }
        }
    }

    let predictions = model.predict(&x_enc)?;
    println!("prediction: {:?}", predictions.decrypt(&dec));
    println!("real values: {y_vals:?}");

    println!("============ autoregressive demo ============");
    let series = [1.0, 2.0, -1.0, 2.0, 4.0, -1.0, 1.0, 3.0, -0.5, 0.0, 2.0, -1.7];
    let (ar_x, ar_y) = lag_design_matrix(&series, 1);
    let mut ar_model = SecureLinearRegression::new(0.2, 25);
    ar_model.fit_unencrypted(
        &DMatrix::from_row_slice(
            ar_x.len(),
            ar_x[0].len(),
            &ar_x.iter().flatten().copied().collect::<Vec<_>>(),
        ),
        &DVector::from_vec(ar_y),
    )?;
    println!(
        "AR(1) coefficients: {:?}",
        ar_model.plain_weights().unwrap().as_slice()
    );

    wtr.flush()?;
    Ok(())
}

/// Synthetic regression task: standard-normal features, random true
/// weights, Gaussian target noise; features and targets are z-scored and
/// an intercept column is appended.
fn generate_dataset(n_samples: usize, n_features: usize, noise: f64) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut rng = thread_rng();
    let feature = Normal::new(0.0, 1.0).unwrap();
    let jitter = Normal::new(0.0, noise).unwrap();

    let true_weights: Vec<f64> = (0..n_features).map(|_| rng.gen_range(10.0..100.0)).collect();
    let mut x: Vec<Vec<f64>> = (0..n_samples)
        .map(|_| (0..n_features).map(|_| feature.sample(&mut rng)).collect())
        .collect();
    let mut y: Vec<f64> = x
        .iter()
        .map(|row| {
            row.iter()
                .zip(&true_weights)
                .map(|(a, b)| a * b)
                .sum::<f64>()
                + jitter.sample(&mut rng)
        })
        .collect();

    for j in 0..n_features {
        let column: Vec<f64> = x.iter().map(|row| row[j]).collect();
        let (mean, std) = moments(&column);
        for row in &mut x {
            row[j] = (row[j] - mean) / std;
        }
    }
    let (mean, std) = moments(&y);
    for v in &mut y {
        *v = (*v - mean) / std;
    }
    for row in &mut x {
        row.push(1.0);
    }
    (x, y)
}

/// Design matrix for an AR(`lag`) fit: intercept plus the lagged window,
/// targets are the shifted series.
fn lag_design_matrix(series: &[f64], lag: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut x = Vec::new();
    let mut y = Vec::new();
    for t in lag..series.len() {
        let mut row = vec![1.0];
        for shift in 1..=lag {
            row.push(series[t - shift]);
        }
        x.push(row);
        y.push(series[t]);
    }
    (x, y)
}

fn moments(values: &[f64]) -> (f64, f64) {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let std = var.sqrt();
    (mean, if std > 0.0 { std } else { 1.0 })
}
