//! Loss functions for the joint NER / entity linking heads
//!
//! All reductions are means over the selected tokens. Selecting zero tokens
//! yields NaN, the mean of an empty set; [`compose_joint_loss`] is where that
//! case is handled.

use crate::candle_model::{nan_scalar, scalar_value, ToHetseqResult};
use candle_core::{DType, Tensor};
use hetseq_core::error::{Error, Result};
use hetseq_core::ner::{is_entity_target, IGNORE_CLASSIFICATION_LABEL};
use tracing::{debug, error, warn};

/// Added to squared norms inside the cosine embedding loss
pub const COSINE_EPS: f64 = 1e-12;

/// Overwrite labels at positions whose mask is not 1 with the ignore label
///
/// Shape is preserved; the result is flat `[B * T]` i64.
pub fn mask_labels(labels: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let labels = labels
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::I64))
        .hetseq_result()?;
    let active = attention_mask
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::U32))
        .and_then(|t| t.eq(1u32))
        .hetseq_result()?;

    if active.dims() != labels.dims() {
        return Err(Error::Precondition(format!(
            "attention_mask has {} positions, labels have {}",
            active.elem_count(),
            labels.elem_count()
        )));
    }

    let ignore = Tensor::full(IGNORE_CLASSIFICATION_LABEL, labels.dims(), labels.device())
        .hetseq_result()?;
    active.where_cond(&labels, &ignore).hetseq_result()
}

/// Cross-entropy over `[N, C]` logits, skipping rows whose target is `ignore_index`
pub fn cross_entropy_ignore_index(
    logits: &Tensor,
    targets: &Tensor,
    ignore_index: i64,
) -> Result<Tensor> {
    let (num_rows, num_classes) = logits.dims2().hetseq_result()?;
    let targets_vec = targets
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::I64))
        .and_then(|t| t.to_vec1::<i64>())
        .hetseq_result()?;

    if targets_vec.len() != num_rows {
        return Err(Error::Precondition(format!(
            "{} targets for {} logit rows",
            targets_vec.len(),
            num_rows
        )));
    }

    let mut rows = Vec::with_capacity(num_rows);
    let mut classes = Vec::with_capacity(num_rows);
    for (row, &target) in targets_vec.iter().enumerate() {
        if target == ignore_index {
            continue;
        }
        if target < 0 || target >= num_classes as i64 {
            return Err(Error::Precondition(format!(
                "target {} at row {} is outside [0, {})",
                target, row, num_classes
            )));
        }
        rows.push(row as u32);
        classes.push(target as u32);
    }

    selected_cross_entropy(logits, &rows, &classes)
}

/// Cross-entropy over the given rows of `[N, C]` logits against class ids
pub fn selected_cross_entropy(logits: &Tensor, rows: &[u32], classes: &[u32]) -> Result<Tensor> {
    if rows.len() != classes.len() {
        return Err(Error::Precondition(format!(
            "{} rows but {} classes",
            rows.len(),
            classes.len()
        )));
    }
    if rows.is_empty() {
        return nan_scalar(logits.dtype(), logits.device());
    }

    let picked = select_rows(logits, rows)?;
    let targets = Tensor::from_slice(classes, classes.len(), logits.device()).hetseq_result()?;

    candle_nn::loss::cross_entropy(&picked, &targets).hetseq_result()
}

/// Mean of `1 - cos(x1_i, x2_i)` over row pairs that should match
pub fn cosine_embedding_loss(x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
    if x1.dims() != x2.dims() || x1.rank() != 2 {
        return Err(Error::Precondition(format!(
            "cosine embedding loss needs two equal [N, D] inputs, got {:?} and {:?}",
            x1.dims(),
            x2.dims()
        )));
    }
    if x1.dim(0).hetseq_result()? == 0 {
        return nan_scalar(x1.dtype(), x1.device());
    }

    let dot = x1.mul(x2).and_then(|t| t.sum(1)).hetseq_result()?;
    let mag1 = x1
        .sqr()
        .and_then(|t| t.sum(1))
        .and_then(|t| t.affine(1.0, COSINE_EPS))
        .hetseq_result()?;
    let mag2 = x2
        .sqr()
        .and_then(|t| t.sum(1))
        .and_then(|t| t.affine(1.0, COSINE_EPS))
        .hetseq_result()?;

    let cos = mag1
        .mul(&mag2)
        .and_then(|t| t.sqrt())
        .and_then(|denom| dot.div(&denom))
        .hetseq_result()?;

    cos.affine(-1.0, 1.0)
        .and_then(|t| t.mean_all())
        .hetseq_result()
}

/// Flat positions and entity ids of tokens with a positive entity label
pub fn entity_targets(entity_labels: &Tensor) -> Result<(Vec<u32>, Vec<u32>)> {
    let labels = entity_labels
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::I64))
        .and_then(|t| t.to_vec1::<i64>())
        .hetseq_result()?;

    Ok(labels
        .iter()
        .enumerate()
        .filter(|&(_, &label)| is_entity_target(label))
        .map(|(pos, &label)| (pos as u32, label as u32))
        .unzip())
}

/// Gather rows of a matrix by index
pub fn select_rows(x: &Tensor, rows: &[u32]) -> Result<Tensor> {
    let index = Tensor::from_slice(rows, rows.len(), x.device()).hetseq_result()?;
    x.index_select(&index, 0).hetseq_result()
}

/// Loss of one forward pass, with its terms
#[derive(Clone, Debug)]
pub struct LossOutput {
    /// `ner + weight * entity`, or `ner` when the entity term was dropped
    pub total: Tensor,

    /// Masked NER cross-entropy
    pub ner: Tensor,

    /// Entity term before weighting; `None` for the NER-only head
    pub entity: Option<Tensor>,

    /// Whether the entity term was NaN and left out of `total`
    pub entity_dropped: bool,
}

impl LossOutput {
    /// Total loss as f32
    pub fn value(&self) -> Result<f32> {
        scalar_value(&self.total)
    }

    /// NER term as f32
    pub fn ner_value(&self) -> Result<f32> {
        scalar_value(&self.ner)
    }

    /// Entity term as f32, NaN when it was dropped
    pub fn entity_value(&self) -> Result<Option<f32>> {
        self.entity.as_ref().map(scalar_value).transpose()
    }
}

/// Blend the NER and entity terms into the training loss
///
/// A NaN entity term (no entity-labeled tokens in the batch) is dropped.
/// A NaN total after that is an [`Error::Invariant`].
pub fn compose_joint_loss(
    ner: Tensor,
    entity: Option<Tensor>,
    entity_loss_weight: f64,
) -> Result<LossOutput> {
    let ner_value = scalar_value(&ner)?;

    let (total, entity_dropped) = match &entity {
        None => {
            debug!(ner_loss = ner_value, "ner loss");
            (ner.clone(), false)
        }
        Some(entity_loss) => {
            let entity_value = scalar_value(entity_loss)?;
            debug!(ner_loss = ner_value, entity_loss = entity_value, "joint loss terms");

            if entity_value.is_nan() {
                warn!(ner_loss = ner_value, "entity loss is NaN, no entity tokens in batch");
                (ner.clone(), true)
            } else {
                let weighted = entity_loss
                    .affine(entity_loss_weight, 0.0)
                    .hetseq_result()?;
                (ner.add(&weighted).hetseq_result()?, false)
            }
        }
    };

    if scalar_value(&total)?.is_nan() {
        error!(ner_loss = ner_value, entity_dropped, "composed loss is NaN");
        return Err(Error::Invariant("loss is NaN after composition".to_string()));
    }

    Ok(LossOutput {
        total,
        ner,
        entity,
        entity_dropped,
    })
}
