//! Encoder abstraction
//!
//! The heads only need a function from a token batch to `[B, T, H]` hidden
//! states. [`Encoder`] is that seam: [`BertEncoder`] plugs in a pretrained
//! BERT, [`LookupEncoder`] is a deterministic embedding lookup for tests and
//! small experiments.

use crate::candle_model::ToHetseqResult;
use candle_core::{Module, Tensor};
use candle_nn::{embedding, Embedding, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hetseq_core::error::{Error, Result};
use std::path::Path;

/// Inputs handed to the encoder for one batch
///
/// Encoders ignore fields they do not support.
#[derive(Clone, Copy, Debug)]
pub struct EncoderInputs<'a> {
    /// `[B, T]` token ids
    pub input_ids: &'a Tensor,
    /// `[B, T]`, 1 for real tokens
    pub attention_mask: Option<&'a Tensor>,
    /// `[B, T]` segment ids
    pub token_type_ids: Option<&'a Tensor>,
    /// `[B, T]` explicit positions
    pub position_ids: Option<&'a Tensor>,
    /// Per-layer/head attention mask
    pub head_mask: Option<&'a Tensor>,
    /// `[B, T, H]` precomputed token embeddings replacing the id lookup
    pub inputs_embeds: Option<&'a Tensor>,
}

impl<'a> EncoderInputs<'a> {
    /// Inputs with only token ids
    pub fn new(input_ids: &'a Tensor) -> Self {
        Self {
            input_ids,
            attention_mask: None,
            token_type_ids: None,
            position_ids: None,
            head_mask: None,
            inputs_embeds: None,
        }
    }

    /// Set the attention mask
    pub fn with_attention_mask(mut self, mask: Option<&'a Tensor>) -> Self {
        self.attention_mask = mask;
        self
    }

    /// Set segment ids
    pub fn with_token_type_ids(mut self, token_type_ids: Option<&'a Tensor>) -> Self {
        self.token_type_ids = token_type_ids;
        self
    }

    /// Set explicit positions
    pub fn with_position_ids(mut self, position_ids: Option<&'a Tensor>) -> Self {
        self.position_ids = position_ids;
        self
    }

    /// Set the head mask
    pub fn with_head_mask(mut self, head_mask: Option<&'a Tensor>) -> Self {
        self.head_mask = head_mask;
        self
    }

    /// Set precomputed embeddings
    pub fn with_inputs_embeds(mut self, inputs_embeds: Option<&'a Tensor>) -> Self {
        self.inputs_embeds = inputs_embeds;
        self
    }
}

/// Maps a token batch to per-token hidden states
pub trait Encoder: Send + Sync {
    /// `[B, T]` inputs -> `[B, T, hidden_size]`
    fn encode(&self, inputs: &EncoderInputs<'_>) -> Result<Tensor>;

    /// Width of the hidden states
    fn hidden_size(&self) -> usize;
}

/// Token + position embedding lookup
#[derive(Clone, Debug)]
pub struct LookupEncoder {
    word_embeddings: Embedding,
    position_embeddings: Option<Embedding>,
    hidden_size: usize,
}

impl LookupEncoder {
    /// Create with fresh weights under `word_embeddings` / `position_embeddings`
    pub fn new(
        vocab_size: usize,
        max_positions: usize,
        hidden_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let word_embeddings =
            embedding(vocab_size, hidden_size, vb.pp("word_embeddings")).hetseq_result()?;
        let position_embeddings =
            embedding(max_positions, hidden_size, vb.pp("position_embeddings")).hetseq_result()?;

        Ok(Self {
            word_embeddings,
            position_embeddings: Some(position_embeddings),
            hidden_size,
        })
    }

    /// Create from explicit `[vocab, H]` and optional `[max_positions, H]` tables
    pub fn from_weights(word: Tensor, position: Option<Tensor>) -> Result<Self> {
        let (_, hidden_size) = word.dims2().hetseq_result()?;

        if let Some(position) = &position {
            let (_, position_width) = position.dims2().hetseq_result()?;
            if position_width != hidden_size {
                return Err(Error::Configuration(format!(
                    "position embeddings have width {}, word embeddings {}",
                    position_width, hidden_size
                )));
            }
        }

        Ok(Self {
            word_embeddings: Embedding::new(word, hidden_size),
            position_embeddings: position.map(|p| Embedding::new(p, hidden_size)),
            hidden_size,
        })
    }
}

impl Encoder for LookupEncoder {
    fn encode(&self, inputs: &EncoderInputs<'_>) -> Result<Tensor> {
        let (_, seq_len) = inputs.input_ids.dims2().hetseq_result()?;

        let hidden = match inputs.inputs_embeds {
            Some(embeds) => embeds.clone(),
            None => self
                .word_embeddings
                .forward(inputs.input_ids)
                .hetseq_result()?,
        };

        let Some(position_embeddings) = &self.position_embeddings else {
            return Ok(hidden);
        };

        let positions = match inputs.position_ids {
            Some(ids) => ids.clone(),
            None => Tensor::arange(0u32, seq_len as u32, inputs.input_ids.device())
                .and_then(|t| t.unsqueeze(0))
                .hetseq_result()?,
        };

        position_embeddings
            .forward(&positions)
            .and_then(|p| hidden.broadcast_add(&p))
            .hetseq_result()
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

/// A Hugging Face BERT `config.json`
///
/// The encoder's hidden size comes from the same document as the BERT config.
pub struct BertEncoderConfig {
    /// Config handed to [`BertModel::load`]
    pub bert: BertConfig,
    /// `hidden_size` of the same document
    pub hidden_size: usize,
}

impl BertEncoderConfig {
    /// Parse a `config.json` document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let hidden_size = value
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .filter(|&h| h > 0)
            .ok_or_else(|| {
                Error::Configuration("BERT config needs a positive hidden_size".to_string())
            })? as usize;
        let bert = serde_json::from_value(value)?;

        Ok(Self { bert, hidden_size })
    }

    /// Read a `config.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }
}

/// Pretrained BERT from `candle-transformers`
///
/// Uses `input_ids`, `token_type_ids` (zeros when absent) and
/// `attention_mask`; positions are implicit.
pub struct BertEncoder {
    model: BertModel,
    hidden_size: usize,
}

impl BertEncoder {
    /// Load BERT weights from `vb`
    pub fn load(vb: VarBuilder, config: &BertEncoderConfig) -> Result<Self> {
        let model = BertModel::load(vb, &config.bert).hetseq_result()?;
        Ok(Self {
            model,
            hidden_size: config.hidden_size,
        })
    }

    /// Read a Hugging Face `config.json`
    pub fn read_config(path: impl AsRef<Path>) -> Result<BertEncoderConfig> {
        BertEncoderConfig::from_file(path)
    }
}

impl Encoder for BertEncoder {
    fn encode(&self, inputs: &EncoderInputs<'_>) -> Result<Tensor> {
        let token_type_ids = match inputs.token_type_ids {
            Some(ids) => ids.clone(),
            None => inputs.input_ids.zeros_like().hetseq_result()?,
        };

        self.model
            .forward(inputs.input_ids, &token_type_ids, inputs.attention_mask)
            .hetseq_result()
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}
