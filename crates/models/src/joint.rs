//! Joint NER / entity linking model
//!
//! One model covers the three head variants. They share the encoder, the
//! hidden-state dropout, the classification head and the masked NER loss,
//! and differ only in the entity term added to it:
//!
//! ```text
//! input_ids ─► Encoder ─► dropout ─┬─► ClassificationHead ─► NER logits [B, T, L]
//!                                  │
//!                                  └─► EntityProjectionHead ─► tanh ─► [B, T, D]
//!                                            │
//!                      sim_matrix vs entity table ─► entity scores [B, T, E]
//! ```
//!
//! | Variant              | Entity term                                      |
//! |----------------------|--------------------------------------------------|
//! | `NerOnly`            | none                                             |
//! | `EntityCosine`       | cosine embedding loss vs the target embedding    |
//! | `EntityCrossEntropy` | cross-entropy over similarity scores             |

use crate::candle_model::{expect_dims, nan_scalar, ToHetseqResult};
use crate::encoder::Encoder;
use crate::entity_table::EntityEmbeddingTable;
use crate::heads::{ClassificationHead, EntityProjectionHead};
use crate::inputs::ModelInputs;
use crate::loss::{
    compose_joint_loss, cosine_embedding_loss, cross_entropy_ignore_index, entity_targets,
    mask_labels, select_rows, selected_cross_entropy, LossOutput,
};
use crate::predictions::TokenPredictions;
use crate::similarity::sim_matrix;
use candle_core::{Tensor, Var};
use candle_nn::{Dropout, VarBuilder, VarMap};
use hetseq_core::config::{ElConfig, HeadVariant};
use hetseq_core::error::{Error, Result};
use hetseq_core::ner::IGNORE_CLASSIFICATION_LABEL;
use tracing::{info, warn};

/// Scores returned when no labels are supplied
#[derive(Clone, Debug)]
pub struct ScoreOutput {
    /// `[B, T, num_labels]` raw NER logits
    pub ner_logits: Tensor,

    /// `[B, T, num_entity_labels]` cosine similarities; `None` for NER-only
    pub entity_scores: Option<Tensor>,
}

/// Result of a forward pass
#[derive(Clone, Debug)]
pub enum ModelOutput {
    /// Labels were supplied
    Loss(LossOutput),
    /// Labels were omitted
    Scores(ScoreOutput),
}

impl ModelOutput {
    /// The loss, if labels were supplied
    pub fn into_loss(self) -> Option<LossOutput> {
        match self {
            Self::Loss(loss) => Some(loss),
            Self::Scores(_) => None,
        }
    }

    /// The scores, if labels were omitted
    pub fn into_scores(self) -> Option<ScoreOutput> {
        match self {
            Self::Loss(_) => None,
            Self::Scores(scores) => Some(scores),
        }
    }
}

struct EntityBranch {
    head: EntityProjectionHead,
    table: EntityEmbeddingTable,
}

/// Encoder plus NER head, plus an entity branch for the linking variants
pub struct JointModel {
    config: ElConfig,
    encoder: Box<dyn Encoder>,
    dropout: Dropout,
    classifier: ClassificationHead,
    entity_branch: Option<EntityBranch>,
}

impl JointModel {
    /// Build the model
    ///
    /// Head weights are taken from `vb` (`classifier`, `entity_classifier`).
    /// Linking variants require `entity_embeddings` shaped
    /// `[num_entity_labels, dim_entity_emb]`, converted to the dtype of `vb`.
    pub fn new(
        config: ElConfig,
        encoder: Box<dyn Encoder>,
        entity_embeddings: Option<Tensor>,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;

        if encoder.hidden_size() != config.hidden_size {
            return Err(Error::Configuration(format!(
                "encoder hidden size {} does not match config hidden_size {}",
                encoder.hidden_size(),
                config.hidden_size
            )));
        }

        let classifier = ClassificationHead::new(config.hidden_size, config.num_labels, vb.clone())?;

        let entity_branch = if config.variant.links_entities() {
            let embeddings = entity_embeddings.ok_or_else(|| {
                Error::Configuration(format!(
                    "{} needs an entity embedding table",
                    config.variant
                ))
            })?;
            let table = EntityEmbeddingTable::from_config(embeddings, &config, vb.dtype())?;
            let head = EntityProjectionHead::new(config.hidden_size, config.dim_entity_emb, vb)?;
            Some(EntityBranch { head, table })
        } else {
            if entity_embeddings.is_some() {
                warn!("entity embedding table ignored by the NER-only head");
            }
            None
        };

        info!(
            variant = %config.variant,
            hidden_size = config.hidden_size,
            num_labels = config.num_labels,
            num_entity_labels = config.num_entity_labels,
            dim_entity_emb = config.dim_entity_emb,
            entity_table_frozen = config.entity_table_frozen(),
            "built joint model"
        );

        Ok(Self {
            dropout: Dropout::new(config.hidden_dropout_prob),
            config,
            encoder,
            classifier,
            entity_branch,
        })
    }

    /// Build the NER-only variant
    pub fn ner_only(config: ElConfig, encoder: Box<dyn Encoder>, vb: VarBuilder) -> Result<Self> {
        Self::new(config.with_variant(HeadVariant::NerOnly), encoder, None, vb)
    }

    /// Evaluation-mode forward pass
    pub fn forward(&self, inputs: &ModelInputs) -> Result<ModelOutput> {
        self.forward_t(inputs, false)
    }

    /// Forward pass; dropout is active only when `train` is true
    ///
    /// With labels the result is a loss, without labels the scores.
    pub fn forward_t(&self, inputs: &ModelInputs, train: bool) -> Result<ModelOutput> {
        inputs.validate()?;
        let (batch_size, seq_len) = inputs.batch_dims()?;

        let hidden = self.encoder.encode(&inputs.encoder_inputs())?;
        expect_dims(
            "hidden states",
            &hidden,
            &[batch_size, seq_len, self.config.hidden_size],
        )?;
        let hidden = self.dropout.forward(&hidden, train).hetseq_result()?;

        let ner_logits = self.classifier.forward(&hidden)?;
        let projected = self
            .entity_branch
            .as_ref()
            .map(|branch| branch.head.forward(&hidden))
            .transpose()?;

        let Some(labels) = &inputs.labels else {
            let entity_scores = match (&self.entity_branch, &projected) {
                (Some(branch), Some(projected)) => {
                    Some(score_entities(projected, &branch.table)?)
                }
                _ => None,
            };
            return Ok(ModelOutput::Scores(ScoreOutput {
                ner_logits,
                entity_scores,
            }));
        };

        let attention_mask = inputs.attention_mask.as_ref().ok_or_else(|| {
            Error::Precondition("attention_mask is required when labels are supplied".to_string())
        })?;

        let ner = self.ner_loss(&ner_logits, labels, attention_mask)?;
        let entity = match (&self.entity_branch, &projected) {
            (Some(branch), Some(projected)) => {
                let entity_labels = inputs.entity_labels.as_ref().ok_or_else(|| {
                    Error::Precondition(format!(
                        "{} needs entity_labels when labels are supplied",
                        self.config.variant
                    ))
                })?;
                Some(self.entity_loss(branch, projected, entity_labels)?)
            }
            _ => None,
        };

        compose_joint_loss(ner, entity, self.config.entity_loss_weight).map(ModelOutput::Loss)
    }

    /// Per-token predictions for an unlabeled batch
    pub fn predict(&self, inputs: &ModelInputs) -> Result<TokenPredictions> {
        let unlabeled = inputs.clone().without_labels();
        let scores = self
            .forward(&unlabeled)?
            .into_scores()
            .ok_or_else(|| Error::Invariant("unlabeled forward pass returned a loss".to_string()))?;

        TokenPredictions::from_scores(&scores, inputs.attention_mask.as_ref())
    }

    fn ner_loss(&self, logits: &Tensor, labels: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let logits = logits
            .flatten_to(1)
            .hetseq_result()?;
        let active_labels = mask_labels(labels, attention_mask)?;
        cross_entropy_ignore_index(&logits, &active_labels, IGNORE_CLASSIFICATION_LABEL)
    }

    fn entity_loss(
        &self,
        branch: &EntityBranch,
        projected: &Tensor,
        entity_labels: &Tensor,
    ) -> Result<Tensor> {
        let (positions, ids) = entity_targets(entity_labels)?;
        if positions.is_empty() {
            return nan_scalar(projected.dtype(), projected.device());
        }
        if let Some(&bad) = ids
            .iter()
            .find(|&&id| id as usize >= branch.table.num_entities())
        {
            return Err(Error::Precondition(format!(
                "entity label {} is outside a table of {} entities",
                bad,
                branch.table.num_entities()
            )));
        }

        match self.config.variant {
            HeadVariant::EntityCosine => {
                let flat = projected.flatten_to(1).hetseq_result()?;
                let predicted = select_rows(&flat, &positions)?;
                let targets = branch.table.lookup(&ids)?;
                cosine_embedding_loss(&predicted, &targets)
            }
            HeadVariant::EntityCrossEntropy => {
                let scores = score_entities(projected, &branch.table)?;
                let flat = scores.flatten_to(1).hetseq_result()?;
                selected_cross_entropy(&flat, &positions, &ids)
            }
            HeadVariant::NerOnly => Err(Error::Invariant(
                "NER-only head has no entity branch".to_string(),
            )),
        }
    }

    /// Parameters an optimizer may update
    ///
    /// Everything registered in `varmap` plus the entity table when it is
    /// not frozen.
    pub fn trainable_vars(&self, varmap: &VarMap) -> Vec<Var> {
        let mut vars = varmap.all_vars();
        if let Some(var) = self
            .entity_branch
            .as_ref()
            .and_then(|branch| branch.table.trainable_var())
        {
            vars.push(var.clone());
        }
        vars
    }

    /// Model configuration
    pub fn config(&self) -> &ElConfig {
        &self.config
    }

    /// Head variant
    pub fn variant(&self) -> HeadVariant {
        self.config.variant
    }

    /// The injected encoder
    pub fn encoder(&self) -> &dyn Encoder {
        self.encoder.as_ref()
    }

    /// Entity table of the linking variants
    pub fn entity_table(&self) -> Option<&EntityEmbeddingTable> {
        self.entity_branch.as_ref().map(|branch| &branch.table)
    }
}

/// Re-score `[B, T, D]` projections against every table row: `[B, T, E]`
pub fn score_entities(projected: &Tensor, table: &EntityEmbeddingTable) -> Result<Tensor> {
    let (batch_size, seq_len, dim) = projected.dims3().hetseq_result()?;
    let flat = projected
        .reshape((batch_size * seq_len, dim))
        .hetseq_result()?;

    sim_matrix(&flat, table.weight())?
        .reshape((batch_size, seq_len, table.num_entities()))
        .hetseq_result()
}
