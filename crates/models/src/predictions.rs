//! Decoding of inference scores into per-token predictions

use crate::candle_model::ToHetseqResult;
use crate::joint::ScoreOutput;
use candle_core::{DType, Tensor, D};
use hetseq_core::error::Result;
use hetseq_core::ner::NerLabel;

/// Best dictionary entry for a token
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityMatch {
    /// Row of the entity table
    pub entity_id: u32,
    /// Cosine similarity to that row
    pub score: f32,
}

/// Prediction for one unmasked token
#[derive(Clone, Debug, PartialEq)]
pub struct TokenPrediction {
    /// Sequence index in the batch
    pub batch_index: usize,
    /// Token position in the sequence
    pub position: usize,
    /// Argmax NER class
    pub label_id: u32,
    /// Argmax entity, for linking heads
    pub entity: Option<EntityMatch>,
}

impl TokenPrediction {
    /// The class as a BIO label, when it is one
    pub fn ner_label(&self) -> Option<NerLabel> {
        NerLabel::from_id(self.label_id as i64)
    }
}

/// Predictions for every token whose attention mask is 1
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TokenPredictions {
    /// Tokens in batch-major order
    pub tokens: Vec<TokenPrediction>,
}

impl TokenPredictions {
    /// Take the argmax of the NER logits and entity scores
    ///
    /// Without a mask every position is kept.
    pub fn from_scores(scores: &ScoreOutput, attention_mask: Option<&Tensor>) -> Result<Self> {
        let label_ids = scores
            .ner_logits
            .argmax(D::Minus1)
            .and_then(|t| t.to_vec2::<u32>())
            .hetseq_result()?;

        let entities = match &scores.entity_scores {
            Some(entity_scores) => {
                let ids = entity_scores
                    .argmax(D::Minus1)
                    .and_then(|t| t.to_vec2::<u32>())
                    .hetseq_result()?;
                let best = entity_scores
                    .max(D::Minus1)
                    .and_then(|t| t.to_dtype(DType::F32))
                    .and_then(|t| t.to_vec2::<f32>())
                    .hetseq_result()?;
                Some((ids, best))
            }
            None => None,
        };

        let mask = attention_mask
            .map(|m| m.to_dtype(DType::U32).and_then(|t| t.to_vec2::<u32>()))
            .transpose()
            .hetseq_result()?;

        let mut tokens = Vec::new();
        for (batch_index, row) in label_ids.iter().enumerate() {
            for (position, &label_id) in row.iter().enumerate() {
                let active = mask
                    .as_ref()
                    .map_or(true, |m| m[batch_index][position] == 1);
                if !active {
                    continue;
                }

                let entity = entities.as_ref().map(|(ids, best)| EntityMatch {
                    entity_id: ids[batch_index][position],
                    score: best[batch_index][position],
                });

                tokens.push(TokenPrediction {
                    batch_index,
                    position,
                    label_id,
                    entity,
                });
            }
        }

        Ok(Self { tokens })
    }

    /// Number of predicted tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether nothing was predicted
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Predictions of one sequence
    pub fn for_sequence(&self, batch_index: usize) -> impl Iterator<Item = &TokenPrediction> {
        self.tokens
            .iter()
            .filter(move |token| token.batch_index == batch_index)
    }
}
