//! Device-side batch handed to the joint model

use crate::candle_model::{expect_dims, ToHetseqResult};
use crate::encoder::EncoderInputs;
use candle_core::{Device, Tensor};
use hetseq_core::error::Result;
use hetseq_core::ner::TokenBatch;

/// One forward-pass worth of tensors
///
/// Supplying `labels` selects the loss path, omitting them the scoring path.
#[derive(Clone, Debug)]
pub struct ModelInputs {
    /// `[B, T]` u32 token ids
    pub input_ids: Tensor,
    /// `[B, T]` 1 for real tokens, 0 for padding
    pub attention_mask: Option<Tensor>,
    /// `[B, T]` segment ids
    pub token_type_ids: Option<Tensor>,
    /// `[B, T]` explicit positions
    pub position_ids: Option<Tensor>,
    /// Passed through to the encoder
    pub head_mask: Option<Tensor>,
    /// `[B, T, H]` precomputed embeddings
    pub inputs_embeds: Option<Tensor>,
    /// `[B, T]` i64 NER class ids or the ignore label
    pub labels: Option<Tensor>,
    /// `[B, T]` i64 entity ids; non-positive means no entity
    pub entity_labels: Option<Tensor>,
}

impl ModelInputs {
    /// Inputs with only token ids
    pub fn new(input_ids: Tensor) -> Self {
        Self {
            input_ids,
            attention_mask: None,
            token_type_ids: None,
            position_ids: None,
            head_mask: None,
            inputs_embeds: None,
            labels: None,
            entity_labels: None,
        }
    }

    /// Upload a host batch to `device`
    pub fn from_batch(batch: &TokenBatch, device: &Device) -> Result<Self> {
        let shape = (batch.batch_size, batch.seq_len);

        let input_ids = Tensor::from_slice(&batch.input_ids, shape, device).hetseq_result()?;
        let attention_mask = batch
            .attention_mask
            .as_ref()
            .map(|m| Tensor::from_slice(m, shape, device))
            .transpose()
            .hetseq_result()?;
        let token_type_ids = batch
            .token_type_ids
            .as_ref()
            .map(|t| Tensor::from_slice(t, shape, device))
            .transpose()
            .hetseq_result()?;
        let labels = batch
            .labels
            .as_ref()
            .map(|l| Tensor::from_slice(l, shape, device))
            .transpose()
            .hetseq_result()?;
        let entity_labels = batch
            .entity_labels
            .as_ref()
            .map(|l| Tensor::from_slice(l, shape, device))
            .transpose()
            .hetseq_result()?;

        Ok(Self {
            input_ids,
            attention_mask,
            token_type_ids,
            position_ids: None,
            head_mask: None,
            inputs_embeds: None,
            labels,
            entity_labels,
        })
    }

    /// Set the attention mask
    pub fn with_attention_mask(mut self, mask: Tensor) -> Self {
        self.attention_mask = Some(mask);
        self
    }

    /// Set segment ids
    pub fn with_token_type_ids(mut self, token_type_ids: Tensor) -> Self {
        self.token_type_ids = Some(token_type_ids);
        self
    }

    /// Set explicit positions
    pub fn with_position_ids(mut self, position_ids: Tensor) -> Self {
        self.position_ids = Some(position_ids);
        self
    }

    /// Set the head mask
    pub fn with_head_mask(mut self, head_mask: Tensor) -> Self {
        self.head_mask = Some(head_mask);
        self
    }

    /// Set precomputed embeddings
    pub fn with_inputs_embeds(mut self, inputs_embeds: Tensor) -> Self {
        self.inputs_embeds = Some(inputs_embeds);
        self
    }

    /// Set NER labels
    pub fn with_labels(mut self, labels: Tensor) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Set entity labels
    pub fn with_entity_labels(mut self, entity_labels: Tensor) -> Self {
        self.entity_labels = Some(entity_labels);
        self
    }

    /// Drop supervision so the model returns scores
    pub fn without_labels(mut self) -> Self {
        self.labels = None;
        self.entity_labels = None;
        self
    }

    /// `(batch_size, seq_len)`
    pub fn batch_dims(&self) -> Result<(usize, usize)> {
        self.input_ids.dims2().hetseq_result()
    }

    /// Check every `[B, T]` field against `input_ids`
    pub fn validate(&self) -> Result<()> {
        let (b, t) = self.batch_dims()?;
        let fields = [
            ("attention_mask", &self.attention_mask),
            ("token_type_ids", &self.token_type_ids),
            ("position_ids", &self.position_ids),
            ("labels", &self.labels),
            ("entity_labels", &self.entity_labels),
        ];
        for (name, tensor) in fields {
            if let Some(tensor) = tensor {
                expect_dims(name, tensor, &[b, t])?;
            }
        }
        Ok(())
    }

    /// Borrow the fields the encoder consumes
    pub fn encoder_inputs(&self) -> EncoderInputs<'_> {
        EncoderInputs::new(&self.input_ids)
            .with_attention_mask(self.attention_mask.as_ref())
            .with_token_type_ids(self.token_type_ids.as_ref())
            .with_position_ids(self.position_ids.as_ref())
            .with_head_mask(self.head_mask.as_ref())
            .with_inputs_embeds(self.inputs_embeds.as_ref())
    }
}
