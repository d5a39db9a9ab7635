//! Rectangular token batches on the host side

use crate::error::{Error, Result};
use crate::ner::labels::{
    is_entity_target, is_valid_ner_label, IGNORE_CLASSIFICATION_LABEL, NO_ENTITY_ID,
};
use serde::{Deserialize, Serialize};

/// One unpadded sequence with optional supervision
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSequence {
    /// Token ids
    pub input_ids: Vec<u32>,

    /// NER class id per token
    pub labels: Option<Vec<i64>>,

    /// Entity dictionary index per token
    pub entity_labels: Option<Vec<i64>>,
}

impl TokenSequence {
    /// Create an unlabeled sequence
    pub fn new(input_ids: Vec<u32>) -> Self {
        Self {
            input_ids,
            labels: None,
            entity_labels: None,
        }
    }

    /// Attach NER labels
    pub fn with_labels(mut self, labels: Vec<i64>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Attach entity labels
    pub fn with_entity_labels(mut self, entity_labels: Vec<i64>) -> Self {
        self.entity_labels = Some(entity_labels);
        self
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Whether the sequence has no tokens
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// A `[batch_size, seq_len]` block of sequences stored row-major
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenBatch {
    /// Number of sequences
    pub batch_size: usize,

    /// Positions per sequence
    pub seq_len: usize,

    /// Token ids
    pub input_ids: Vec<u32>,

    /// 1 for a real token, 0 for padding
    pub attention_mask: Option<Vec<u32>>,

    /// Segment ids
    pub token_type_ids: Option<Vec<u32>>,

    /// NER class id, or the ignore sentinel
    pub labels: Option<Vec<i64>>,

    /// Entity dictionary index; non-positive means no entity
    pub entity_labels: Option<Vec<i64>>,
}

impl TokenBatch {
    /// Create an unlabeled batch without a mask
    pub fn new(batch_size: usize, seq_len: usize, input_ids: Vec<u32>) -> Result<Self> {
        check_len("input_ids", input_ids.len(), batch_size * seq_len)?;
        Ok(Self {
            batch_size,
            seq_len,
            input_ids,
            attention_mask: None,
            token_type_ids: None,
            labels: None,
            entity_labels: None,
        })
    }

    /// Pad ragged sequences into one batch
    ///
    /// Padding gets `pad_id`, mask 0, the ignore label and entity label 0.
    /// Labels are only kept when every sequence carries them.
    pub fn from_sequences(sequences: &[TokenSequence], pad_id: u32) -> Result<Self> {
        if sequences.is_empty() {
            return Err(Error::Validation("cannot batch zero sequences".to_string()));
        }

        let batch_size = sequences.len();
        let seq_len = sequences.iter().map(TokenSequence::len).max().unwrap_or(0);
        let total = batch_size * seq_len;

        let all_labeled = sequences.iter().all(|s| s.labels.is_some());
        let all_entity_labeled = sequences.iter().all(|s| s.entity_labels.is_some());

        let mut input_ids = Vec::with_capacity(total);
        let mut attention_mask = Vec::with_capacity(total);
        let mut labels = Vec::with_capacity(if all_labeled { total } else { 0 });
        let mut entity_labels = Vec::with_capacity(if all_entity_labeled { total } else { 0 });

        for (row, seq) in sequences.iter().enumerate() {
            let pad = seq_len - seq.len();

            input_ids.extend_from_slice(&seq.input_ids);
            input_ids.extend(std::iter::repeat(pad_id).take(pad));

            attention_mask.extend(std::iter::repeat(1).take(seq.len()));
            attention_mask.extend(std::iter::repeat(0).take(pad));

            if let (true, Some(row_labels)) = (all_labeled, &seq.labels) {
                check_len(&format!("labels of sequence {}", row), row_labels.len(), seq.len())?;
                labels.extend_from_slice(row_labels);
                labels.extend(std::iter::repeat(IGNORE_CLASSIFICATION_LABEL).take(pad));
            }

            if let (true, Some(row_entities)) = (all_entity_labeled, &seq.entity_labels) {
                check_len(
                    &format!("entity_labels of sequence {}", row),
                    row_entities.len(),
                    seq.len(),
                )?;
                entity_labels.extend_from_slice(row_entities);
                entity_labels.extend(std::iter::repeat(NO_ENTITY_ID).take(pad));
            }
        }

        Ok(Self {
            batch_size,
            seq_len,
            input_ids,
            attention_mask: Some(attention_mask),
            token_type_ids: None,
            labels: all_labeled.then_some(labels),
            entity_labels: all_entity_labeled.then_some(entity_labels),
        })
    }

    /// Set the attention mask
    pub fn with_attention_mask(mut self, mask: Vec<u32>) -> Self {
        self.attention_mask = Some(mask);
        self
    }

    /// Set segment ids
    pub fn with_token_type_ids(mut self, token_type_ids: Vec<u32>) -> Self {
        self.token_type_ids = Some(token_type_ids);
        self
    }

    /// Set NER labels
    pub fn with_labels(mut self, labels: Vec<i64>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Set entity labels
    pub fn with_entity_labels(mut self, entity_labels: Vec<i64>) -> Self {
        self.entity_labels = Some(entity_labels);
        self
    }

    /// Drop all supervision, keeping inputs and mask
    pub fn without_labels(mut self) -> Self {
        self.labels = None;
        self.entity_labels = None;
        self
    }

    /// `batch_size * seq_len`
    pub fn num_tokens(&self) -> usize {
        self.batch_size * self.seq_len
    }

    /// Whether NER labels are present
    pub fn has_labels(&self) -> bool {
        self.labels.is_some()
    }

    /// Positions with mask 1; every position when the mask is absent
    pub fn num_active_tokens(&self) -> usize {
        match &self.attention_mask {
            Some(mask) => mask.iter().filter(|&&m| m == 1).count(),
            None => self.num_tokens(),
        }
    }

    /// Positions that take part in the entity loss
    pub fn num_entity_tokens(&self) -> usize {
        self.entity_labels
            .as_ref()
            .map_or(0, |labels| labels.iter().filter(|&&l| is_entity_target(l)).count())
    }

    /// Check field lengths, mask values and label ranges
    pub fn validate(&self, num_labels: usize) -> Result<()> {
        let expected = self.num_tokens();
        check_len("input_ids", self.input_ids.len(), expected)?;

        if let Some(mask) = &self.attention_mask {
            check_len("attention_mask", mask.len(), expected)?;
            if let Some(bad) = mask.iter().find(|&&m| m > 1) {
                return Err(Error::Validation(format!(
                    "attention_mask must be 0/1, found {}",
                    bad
                )));
            }
        }

        if let Some(token_type_ids) = &self.token_type_ids {
            check_len("token_type_ids", token_type_ids.len(), expected)?;
        }

        if let Some(labels) = &self.labels {
            check_len("labels", labels.len(), expected)?;
            if let Some(bad) = labels.iter().find(|&&l| !is_valid_ner_label(l, num_labels)) {
                return Err(Error::Validation(format!(
                    "label {} is neither a class id below {} nor the ignore label",
                    bad, num_labels
                )));
            }
        }

        if let Some(entity_labels) = &self.entity_labels {
            check_len("entity_labels", entity_labels.len(), expected)?;
        }

        Ok(())
    }
}

fn check_len(field: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(Error::Validation(format!(
            "{} has {} entries, expected {}",
            field, actual, expected
        )));
    }
    Ok(())
}
