//! Row-wise cosine similarity between two sets of vectors

use crate::candle_model::ToHetseqResult;
use candle_core::Tensor;
use hetseq_core::error::{Error, Result};

/// Floor on the row norm so all-zero rows map to zero similarity
pub const SIMILARITY_EPS: f64 = 1e-8;

/// Cosine similarity of every row of `a` ([n, D]) with every row of `b` ([m, D])
///
/// Returns an [n, m] matrix.
pub fn sim_matrix(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    sim_matrix_with_eps(a, b, SIMILARITY_EPS)
}

/// [`sim_matrix`] with an explicit norm floor
pub fn sim_matrix_with_eps(a: &Tensor, b: &Tensor, eps: f64) -> Result<Tensor> {
    let (a_dims, b_dims) = (a.dims(), b.dims());
    if a_dims.len() != 2 || b_dims.len() != 2 {
        return Err(Error::Precondition(format!(
            "sim_matrix expects two matrices, got {:?} and {:?}",
            a_dims, b_dims
        )));
    }
    if a_dims[1] != b_dims[1] {
        return Err(Error::Precondition(format!(
            "sim_matrix dimension mismatch: {} vs {}",
            a_dims[1], b_dims[1]
        )));
    }

    let a_norm = normalize_rows(a, eps)?;
    let b_norm = normalize_rows(b, eps)?;
    let b_t = b_norm.t().and_then(|t| t.contiguous()).hetseq_result()?;

    a_norm.matmul(&b_t).hetseq_result()
}

/// Divide each row by `max(||row||, eps)`
pub fn normalize_rows(x: &Tensor, eps: f64) -> Result<Tensor> {
    let norms = x
        .sqr()
        .and_then(|t| t.sum_keepdim(1))
        .and_then(|t| t.sqrt())
        .and_then(|t| t.maximum(eps))
        .hetseq_result()?;

    x.broadcast_div(&norms).hetseq_result()
}
