//! Shape-tracked tensors over encrypted and encoded scalars.
//!
//! An [`EncTensor`] is a row-major flat buffer of [`CipherScalar`]s plus an
//! explicit shape and a single dtype tag shared by every element. All
//! operations take operands by reference and return a newly owned tensor;
//! nothing is ever mutated in place, which is what keeps homomorphic
//! operands from aliasing each other. Binary operations require full shape
//! equality (no broadcasting) and validate the dtype combination up front,
//! before any element is touched.

use itertools::izip;
use rayon::prelude::*;

use crate::engine::{Ciphertext, Decryptor, Encryptor};
use crate::error::{HefitError, Result};
use crate::scalar::{self, CipherScalar, Dtype};

/// N-dimensional container of encrypted or encoded scalars.
#[derive(Debug, Clone)]
pub struct EncTensor {
    ops: Encryptor,
    shape: Vec<usize>,
    dtype: Dtype,
    data: Vec<CipherScalar>,
}

impl EncTensor {
    // ------------------------------------------------------------------
    // construction / destruction
    // ------------------------------------------------------------------

    /// Encrypt a 1-D tensor from a slice of numbers.
    pub fn encrypt_vec(ops: &Encryptor, values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(HefitError::EmptyTensor);
        }
        Ok(Self {
            ops: ops.clone(),
            shape: vec![values.len()],
            dtype: Dtype::Encrypted,
            data: values
                .iter()
                .map(|&v| CipherScalar::Encrypted(ops.encrypt(v)))
                .collect(),
        })
    }

    /// Encrypt a 2-D tensor from nested rows.
    pub fn encrypt_rows(ops: &Encryptor, rows: &[Vec<f64>]) -> Result<Self> {
        let (shape, flat) = flatten_rows(rows)?;
        Ok(Self {
            ops: ops.clone(),
            shape,
            dtype: Dtype::Encrypted,
            data: flat
                .into_iter()
                .map(|v| CipherScalar::Encrypted(ops.encrypt(v)))
                .collect(),
        })
    }

    /// Encrypt a zero vector of length `len` (fresh weight state).
    pub fn encrypt_zeros(ops: &Encryptor, len: usize) -> Result<Self> {
        Self::encrypt_vec(ops, &vec![0.0; len])
    }

    /// Encode (without encrypting) a 1-D tensor.
    pub fn encode_vec(ops: &Encryptor, values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(HefitError::EmptyTensor);
        }
        Ok(Self {
            ops: ops.clone(),
            shape: vec![values.len()],
            dtype: Dtype::Encoded,
            data: values
                .iter()
                .map(|&v| CipherScalar::Encoded(ops.encode(v)))
                .collect(),
        })
    }

    /// Encode (without encrypting) a 2-D tensor from nested rows.
    pub fn encode_rows(ops: &Encryptor, rows: &[Vec<f64>]) -> Result<Self> {
        let (shape, flat) = flatten_rows(rows)?;
        Ok(Self {
            ops: ops.clone(),
            shape,
            dtype: Dtype::Encoded,
            data: flat
                .into_iter()
                .map(|v| CipherScalar::Encoded(ops.encode(v)))
                .collect(),
        })
    }

    /// Decrypt (or decode) every element into a flat row-major vector.
    #[must_use]
    pub fn decrypt(&self, dec: &Decryptor) -> Vec<f64> {
        self.data
            .iter()
            .map(|s| match s {
                CipherScalar::Encrypted(ct) => dec.decrypt(ct),
                CipherScalar::Encoded(p) => dec.decode(p),
            })
            .collect()
    }

    /// Decrypt a rank-2 tensor into nested rows.
    pub fn decrypt_rows(&self, dec: &Decryptor) -> Result<Vec<Vec<f64>>> {
        if self.ndim() != 2 {
            return Err(HefitError::RankMismatch {
                expected: 2,
                found: self.ndim(),
            });
        }
        let cols = self.shape[1];
        Ok(self
            .decrypt(dec)
            .chunks(cols)
            .map(<[f64]>::to_vec)
            .collect())
    }

    // ------------------------------------------------------------------
    // introspection
    // ------------------------------------------------------------------

    /// Dimension sizes, outermost first.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the tensor holds no elements. Constructors reject empty
    /// input, so well-formed tensors always report false.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shared dtype of all elements.
    #[must_use]
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Worst remaining noise budget across elements; `None` when Encoded.
    #[must_use]
    pub fn min_noise_budget(&self) -> Option<i64> {
        self.data.iter().filter_map(CipherScalar::noise_budget).min()
    }

    /// Largest ciphertext component count across elements; `None` when
    /// Encoded.
    #[must_use]
    pub fn max_cipher_size(&self) -> Option<usize> {
        self.data.iter().filter_map(CipherScalar::size).max()
    }

    /// Fail with [`HefitError::NoiseBudgetExhausted`] when the worst
    /// element budget is at or below `floor_bits`. Long-running training
    /// loops call this to decide when to hand weights back for external
    /// re-encryption; the engine itself never raises on exhaustion.
    pub fn ensure_noise_budget(&self, floor_bits: i64) -> Result<()> {
        match self.min_noise_budget() {
            Some(bits) if bits <= floor_bits => {
                Err(HefitError::NoiseBudgetExhausted { bits })
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // elementwise arithmetic
    // ------------------------------------------------------------------

    /// Elementwise sum. Requires equal shapes and a supported dtype pair.
    pub fn add(&self, rhs: &Self) -> Result<Self> {
        let dtype = scalar::combined_dtype(self.dtype, rhs.dtype)?;
        self.zip_with(rhs, dtype, scalar::add)
    }

    /// Elementwise difference. Both operands must be Encrypted.
    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        let dtype = scalar::subtract_dtype(self.dtype, rhs.dtype)?;
        self.zip_with(rhs, dtype, scalar::subtract)
    }

    /// Elementwise product. Requires equal shapes and a supported dtype
    /// pair.
    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        let dtype = scalar::combined_dtype(self.dtype, rhs.dtype)?;
        self.zip_with(rhs, dtype, scalar::multiply)
    }

    fn zip_with(
        &self,
        rhs: &Self,
        dtype: Dtype,
        op: fn(&Encryptor, &CipherScalar, &CipherScalar) -> Result<CipherScalar>,
    ) -> Result<Self> {
        if !self.ops.same_context(&rhs.ops) {
            return Err(HefitError::ContextMismatch);
        }
        if self.shape != rhs.shape {
            return Err(HefitError::ShapeMismatch {
                left: self.shape.clone(),
                right: rhs.shape.clone(),
            });
        }
        let data = izip!(&self.data, &rhs.data)
            .map(|(a, b)| op(&self.ops, a, b))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ops: self.ops.clone(),
            shape: self.shape.clone(),
            dtype,
            data,
        })
    }

    // ------------------------------------------------------------------
    // transpose / indexing / reduction
    // ------------------------------------------------------------------

    /// Transpose. A vector is its own transpose (returned as a deep copy);
    /// rank 2 transposes rows and columns into a new tensor; higher ranks
    /// are not supported.
    pub fn transpose(&self) -> Result<Self> {
        match self.ndim() {
            1 => Ok(self.clone()),
            2 => {
                let (rows, cols) = (self.shape[0], self.shape[1]);
                let mut data = Vec::with_capacity(self.data.len());
                for c in 0..cols {
                    for r in 0..rows {
                        data.push(self.data[r * cols + c].clone());
                    }
                }
                Ok(Self {
                    ops: self.ops.clone(),
                    shape: vec![cols, rows],
                    dtype: self.dtype,
                    data,
                })
            }
            found => Err(HefitError::RankMismatch { expected: 2, found }),
        }
    }

    /// Copy of the slice at `index` along the first axis, wrapped as a
    /// tensor of one rank lower (a `[1]` tensor when `self` is 1-D), so
    /// downstream code can keep chaining tensor operations.
    pub fn index(&self, index: usize) -> Result<Self> {
        let axis = self.shape[0];
        if index >= axis {
            return Err(HefitError::IndexOutOfBounds { index, len: axis });
        }
        let stride = self.data.len() / axis;
        let shape = if self.ndim() == 1 {
            vec![1]
        } else {
            self.shape[1..].to_vec()
        };
        Ok(Self {
            ops: self.ops.clone(),
            shape,
            dtype: self.dtype,
            data: self.data[index * stride..(index + 1) * stride].to_vec(),
        })
    }

    /// Reduce a 1-D Encrypted tensor to its sum, shape `[1]`, through one
    /// batched k-ary accumulation (not a pairwise fold).
    pub fn sum(&self) -> Result<Self> {
        if self.ndim() != 1 {
            return Err(HefitError::RankMismatch {
                expected: 1,
                found: self.ndim(),
            });
        }
        if self.dtype != Dtype::Encrypted {
            return Err(HefitError::UnsupportedDtypeCombination {
                left: self.dtype,
                right: self.dtype,
            });
        }
        let operands: Vec<Ciphertext> = self
            .data
            .iter()
            .map(|s| match s {
                CipherScalar::Encrypted(ct) => ct.clone(),
                CipherScalar::Encoded(_) => unreachable!("dtype invariant"),
            })
            .collect();
        let total = self.ops.sum_many(&operands)?;
        Ok(Self {
            ops: self.ops.clone(),
            shape: vec![1],
            dtype: Dtype::Encrypted,
            data: vec![CipherScalar::Encrypted(total)],
        })
    }

    // ------------------------------------------------------------------
    // matrix multiplication
    // ------------------------------------------------------------------

    /// Matrix product of `(m, k) @ (k, n)`.
    ///
    /// Transposes the right operand once, then forms every result cell as
    /// an elementwise product of two length-k vectors reduced by a batched
    /// sum. This is the dominant cost center: `m * n * k` homomorphic
    /// multiplies. Rows are dispatched across the rayon pool; each cell's
    /// chain is independent of every other.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        if !self.ops.same_context(&rhs.ops) {
            return Err(HefitError::ContextMismatch);
        }
        if self.ndim() != 2 {
            return Err(HefitError::RankMismatch {
                expected: 2,
                found: self.ndim(),
            });
        }
        if rhs.ndim() != 2 {
            return Err(HefitError::RankMismatch {
                expected: 2,
                found: rhs.ndim(),
            });
        }
        if self.shape[1] != rhs.shape[0] {
            return Err(HefitError::ShapeMismatch {
                left: self.shape.clone(),
                right: rhs.shape.clone(),
            });
        }
        scalar::combined_dtype(self.dtype, rhs.dtype)?;

        let (m, n) = (self.shape[0], rhs.shape[1]);
        let rhs_t = rhs.transpose()?;

        let rows: Vec<Vec<CipherScalar>> = (0..m)
            .into_par_iter()
            .map(|i| {
                let a_row = self.index(i)?;
                let mut row = Vec::with_capacity(n);
                for j in 0..n {
                    let cell = a_row.mul(&rhs_t.index(j)?)?.sum()?;
                    row.push(cell.data[0].clone());
                }
                Ok(row)
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            ops: self.ops.clone(),
            shape: vec![m, n],
            dtype: Dtype::Encrypted,
            data: rows.into_iter().flatten().collect(),
        })
    }

    // ------------------------------------------------------------------
    // layout helpers
    // ------------------------------------------------------------------

    /// Same buffer under a new shape with the same element count.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        if shape.iter().product::<usize>() != self.data.len() {
            return Err(HefitError::ShapeMismatch {
                left: self.shape.clone(),
                right: shape.to_vec(),
            });
        }
        Ok(Self {
            ops: self.ops.clone(),
            shape: shape.to_vec(),
            dtype: self.dtype,
            data: self.data.clone(),
        })
    }

    /// Concatenate 1-D tensors of one dtype into a single 1-D tensor.
    pub fn stack(parts: &[Self]) -> Result<Self> {
        let first = parts.first().ok_or(HefitError::EmptyTensor)?;
        let mut data = Vec::new();
        for part in parts {
            if part.ndim() != 1 {
                return Err(HefitError::RankMismatch {
                    expected: 1,
                    found: part.ndim(),
                });
            }
            if !part.ops.same_context(&first.ops) {
                return Err(HefitError::ContextMismatch);
            }
            if part.dtype != first.dtype {
                return Err(HefitError::UnsupportedDtypeCombination {
                    left: first.dtype,
                    right: part.dtype,
                });
            }
            data.extend(part.data.iter().cloned());
        }
        Ok(Self {
            ops: first.ops.clone(),
            shape: vec![data.len()],
            dtype: first.dtype,
            data,
        })
    }

    /// Relinearize every element of an Encrypted tensor back to minimal
    /// component count.
    pub fn relinearize(&self) -> Result<Self> {
        if self.dtype != Dtype::Encrypted {
            return Err(HefitError::UnsupportedDtypeCombination {
                left: self.dtype,
                right: self.dtype,
            });
        }
        let data = self
            .data
            .iter()
            .map(|s| match s {
                CipherScalar::Encrypted(ct) => {
                    CipherScalar::Encrypted(self.ops.relinearize(ct))
                }
                CipherScalar::Encoded(_) => unreachable!("dtype invariant"),
            })
            .collect();
        Ok(Self {
            ops: self.ops.clone(),
            shape: self.shape.clone(),
            dtype: self.dtype,
            data,
        })
    }

    pub(crate) fn ops(&self) -> &Encryptor {
        &self.ops
    }
}

fn flatten_rows(rows: &[Vec<f64>]) -> Result<(Vec<usize>, Vec<f64>)> {
    let first = rows.first().ok_or(HefitError::EmptyTensor)?;
    if first.is_empty() {
        return Err(HefitError::EmptyTensor);
    }
    let cols = first.len();
    let mut flat = Vec::with_capacity(rows.len() * cols);
    for (r, row) in rows.iter().enumerate() {
        if row.len() != cols {
            return Err(HefitError::RaggedData {
                row: r,
                len: row.len(),
                expected: cols,
            });
        }
        flat.extend_from_slice(row);
    }
    Ok((vec![rows.len(), cols], flat))
}
