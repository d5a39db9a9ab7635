//! Per-token projection heads

use crate::candle_model::ToHetseqResult;
use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use hetseq_core::error::Result;

/// Affine map from hidden states to NER logits
#[derive(Clone, Debug)]
pub struct ClassificationHead {
    classifier: Linear,
    num_labels: usize,
}

impl ClassificationHead {
    /// Create the head; weights live under `classifier` in `vb`
    pub fn new(hidden_size: usize, num_labels: usize, vb: VarBuilder) -> Result<Self> {
        let classifier = linear(hidden_size, num_labels, vb.pp("classifier")).hetseq_result()?;
        Ok(Self {
            classifier,
            num_labels,
        })
    }

    /// `[B, T, H]` -> `[B, T, num_labels]`
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        self.classifier.forward(hidden).hetseq_result()
    }

    /// Output width
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }
}

/// Affine map into entity embedding space followed by tanh
///
/// Outputs stay in [-1, 1], the scale of normalized entity embeddings.
#[derive(Clone, Debug)]
pub struct EntityProjectionHead {
    projection: Linear,
    dim_entity_emb: usize,
}

impl EntityProjectionHead {
    /// Create the head; weights live under `entity_classifier` in `vb`
    pub fn new(hidden_size: usize, dim_entity_emb: usize, vb: VarBuilder) -> Result<Self> {
        let projection =
            linear(hidden_size, dim_entity_emb, vb.pp("entity_classifier")).hetseq_result()?;
        Ok(Self {
            projection,
            dim_entity_emb,
        })
    }

    /// `[B, T, H]` -> `[B, T, dim_entity_emb]`
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        self.projection
            .forward(hidden)
            .and_then(|t| t.tanh())
            .hetseq_result()
    }

    /// Output width
    pub fn dim_entity_emb(&self) -> usize {
        self.dim_entity_emb
    }
}
