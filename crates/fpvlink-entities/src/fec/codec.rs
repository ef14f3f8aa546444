//! Systematic erasure codes over equal-length shards

use thiserror::Error;

use super::gf256;

/// Largest data + EC shard count a GF(2^8) code can address
pub const MAX_SHARDS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FecError {
    #[error("block geometry {data}+{ec} not supported")]
    InvalidGeometry { data: usize, ec: usize },
    #[error("shards have different lengths")]
    ShardLengthMismatch,
    #[error("only {have} of {need} shards available")]
    NotEnoughShards { have: usize, need: usize },
    #[error("decode matrix is singular")]
    SingularMatrix,
}

/// An erasure code where the first `data_count` shards are the data itself
/// and any `data_count` of the data + EC shards restore the rest.
pub trait ErasureCode: Send {
    /// Computes `ec_count` EC shards over equal-length data shards
    fn encode(&self, data: &[&[u8]], ec_count: usize) -> Result<Vec<Vec<u8>>, FecError>;

    /// Fills in the missing data shards. `shards` holds data shards followed
    /// by EC shards. EC slots are left as they are.
    fn reconstruct(&self, shards: &mut [Option<Vec<u8>>], data_count: usize) -> Result<(), FecError>;

    /// Largest data + EC shard count the code supports
    fn max_shards(&self) -> usize {
        MAX_SHARDS
    }
}

/// Reed-Solomon code with a Cauchy generator matrix.
/// Row i of the EC part is 1 / (x_i + y_j) with x_i = i and y_j = ec_count + j.
#[derive(Debug, Default, Clone, Copy)]
pub struct CauchyReedSolomon;

impl CauchyReedSolomon {
    pub fn new() -> Self {
        Self
    }

    fn check_geometry(data: usize, ec: usize) -> Result<(), FecError> {
        if data == 0 || data + ec > MAX_SHARDS {
            return Err(FecError::InvalidGeometry { data, ec });
        }
        Ok(())
    }

    #[inline]
    fn coef(ec_count: usize, row: usize, col: usize) -> u8 {
        let x = row as u8;
        let y = (ec_count + col) as u8;
        // x != y always holds since row < ec_count <= y
        gf256::inv(x ^ y).unwrap_or(0)
    }
}

impl ErasureCode for CauchyReedSolomon {
    fn encode(&self, data: &[&[u8]], ec_count: usize) -> Result<Vec<Vec<u8>>, FecError> {
        Self::check_geometry(data.len(), ec_count)?;
        let len = data[0].len();
        if data.iter().any(|d| d.len() != len) {
            return Err(FecError::ShardLengthMismatch);
        }

        let mut out = vec![vec![0u8; len]; ec_count];
        for (row, ec) in out.iter_mut().enumerate() {
            for (col, d) in data.iter().enumerate() {
                gf256::mul_add_slice(ec, d, Self::coef(ec_count, row, col));
            }
        }
        Ok(out)
    }

    fn reconstruct(&self, shards: &mut [Option<Vec<u8>>], data_count: usize) -> Result<(), FecError> {
        let total = shards.len();
        if total < data_count {
            return Err(FecError::InvalidGeometry { data: data_count, ec: 0 });
        }
        let ec_count = total - data_count;
        Self::check_geometry(data_count, ec_count)?;

        if shards[..data_count].iter().all(Option::is_some) {
            return Ok(());
        }

        let available: Vec<usize> = (0..total).filter(|&i| shards[i].is_some()).take(data_count).collect();
        if available.len() < data_count {
            return Err(FecError::NotEnoughShards {
                have: available.len(),
                need: data_count,
            });
        }

        let len = shards[available[0]].as_ref().map(Vec::len).unwrap_or(0);
        if available.iter().any(|&i| shards[i].as_ref().map(Vec::len) != Some(len)) {
            return Err(FecError::ShardLengthMismatch);
        }

        // Rows of the generator matrix for the shards we have
        let mut matrix = vec![vec![0u8; data_count]; data_count];
        for (r, &idx) in available.iter().enumerate() {
            if idx < data_count {
                matrix[r][idx] = 1;
            } else {
                for c in 0..data_count {
                    matrix[r][c] = Self::coef(ec_count, idx - data_count, c);
                }
            }
        }
        let inverse = invert(matrix)?;

        let missing: Vec<usize> = (0..data_count).filter(|&i| shards[i].is_none()).collect();
        let mut restored = Vec::with_capacity(missing.len());
        for &m in &missing {
            let mut out = vec![0u8; len];
            for (k, &idx) in available.iter().enumerate() {
                if let Some(src) = shards[idx].as_ref() {
                    gf256::mul_add_slice(&mut out, src, inverse[m][k]);
                }
            }
            restored.push(out);
        }
        for (m, shard) in missing.into_iter().zip(restored) {
            shards[m] = Some(shard);
        }
        Ok(())
    }
}

/// Gauss-Jordan inversion of a square matrix over GF(2^8)
fn invert(mut m: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, FecError> {
    let n = m.len();
    let mut inv: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            let mut row = vec![0u8; n];
            row[i] = 1;
            row
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n).find(|&r| m[r][col] != 0).ok_or(FecError::SingularMatrix)?;
        m.swap(col, pivot);
        inv.swap(col, pivot);

        let scale = gf256::inv(m[col][col]).ok_or(FecError::SingularMatrix)?;
        for c in 0..n {
            m[col][c] = gf256::mul(m[col][c], scale);
            inv[col][c] = gf256::mul(inv[col][c], scale);
        }

        for r in 0..n {
            if r == col || m[r][col] == 0 {
                continue;
            }
            let factor = m[r][col];
            for c in 0..n {
                m[r][c] ^= gf256::mul(factor, m[col][c]);
                inv[r][c] ^= gf256::mul(factor, inv[col][c]);
            }
        }
    }
    Ok(inv)
}
