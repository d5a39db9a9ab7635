//! Hyperparameters for the token classification and entity linking heads

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which entity loss term the joint model adds to the NER loss
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadVariant {
    /// Token classification only, no entity branch
    NerOnly,

    /// Cosine embedding loss between the projected token and its target entity embedding
    EntityCosine,

    /// Cross-entropy over cosine similarities against the whole entity table
    EntityCrossEntropy,
}

impl Default for HeadVariant {
    fn default() -> Self {
        Self::EntityCrossEntropy
    }
}

impl HeadVariant {
    /// All variants, in registry order
    pub const ALL: [HeadVariant; 3] = [
        HeadVariant::NerOnly,
        HeadVariant::EntityCosine,
        HeadVariant::EntityCrossEntropy,
    ];

    /// Registry name of the variant
    pub fn name(&self) -> &'static str {
        match self {
            Self::NerOnly => "bert_ner",
            Self::EntityCosine => "bert_el",
            Self::EntityCrossEntropy => "bert_el_ce",
        }
    }

    /// Whether the variant carries an entity branch and an entity table
    pub fn links_entities(&self) -> bool {
        !matches!(self, Self::NerOnly)
    }
}

impl fmt::Display for HeadVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HeadVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bert_ner" | "ner_only" => Ok(Self::NerOnly),
            "bert_el" | "entity_cosine" => Ok(Self::EntityCosine),
            "bert_el_ce" | "entity_cross_entropy" => Ok(Self::EntityCrossEntropy),
            other => Err(Error::Configuration(format!("Unknown head variant: {}", other))),
        }
    }
}

/// Loss function used by the cross-entropy entity branch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityLossType {
    /// `CrossEntropyLoss` over similarity scores
    CrossEntropyLoss,
}

impl FromStr for EntityLossType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CrossEntropyLoss" => Ok(Self::CrossEntropyLoss),
            other => Err(Error::Configuration(format!(
                "Unknown entity loss function: {}",
                other
            ))),
        }
    }
}

/// Joint NER / entity linking configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElConfig {
    /// Width of the encoder hidden states
    pub hidden_size: usize,

    /// Dropout applied to the hidden states during training
    #[serde(default = "default_hidden_dropout_prob")]
    pub hidden_dropout_prob: f32,

    /// Number of NER classes (B/I/O by default)
    #[serde(default = "default_num_labels")]
    pub num_labels: usize,

    /// Rows of the entity embedding table
    #[serde(default)]
    pub num_entity_labels: usize,

    /// Columns of the entity embedding table
    #[serde(default)]
    pub dim_entity_emb: usize,

    /// Scale of the entity term in the total loss
    #[serde(default = "default_entity_loss_weight")]
    pub entity_loss_weight: f64,

    /// Name of the entity loss function, read by the cross-entropy head;
    /// only `CrossEntropyLoss` is known
    #[serde(default)]
    pub entity_loss_type: Option<String>,

    /// Let the optimizer update the entity table
    #[serde(default)]
    pub ent_emb_no_freeze: bool,

    /// Head variant
    #[serde(default)]
    pub variant: HeadVariant,
}

fn default_hidden_dropout_prob() -> f32 {
    0.1
}

fn default_num_labels() -> usize {
    3
}

fn default_entity_loss_weight() -> f64 {
    1.0
}

impl ElConfig {
    /// Create a joint NER + entity linking config
    pub fn new(hidden_size: usize, num_entity_labels: usize, dim_entity_emb: usize) -> Self {
        Self {
            hidden_size,
            hidden_dropout_prob: default_hidden_dropout_prob(),
            num_labels: default_num_labels(),
            num_entity_labels,
            dim_entity_emb,
            entity_loss_weight: default_entity_loss_weight(),
            entity_loss_type: None,
            ent_emb_no_freeze: false,
            variant: HeadVariant::default(),
        }
    }

    /// Create a config for the NER-only head
    pub fn ner_only(hidden_size: usize, num_labels: usize) -> Self {
        Self {
            num_labels,
            variant: HeadVariant::NerOnly,
            ..Self::new(hidden_size, 0, 0)
        }
    }

    /// Parse a config from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Serialize the config to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the head variant
    pub fn with_variant(mut self, variant: HeadVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Set the number of NER classes
    pub fn with_num_labels(mut self, num_labels: usize) -> Self {
        self.num_labels = num_labels;
        self
    }

    /// Set the entity loss weight
    pub fn with_entity_loss_weight(mut self, weight: f64) -> Self {
        self.entity_loss_weight = weight;
        self
    }

    /// Set the entity loss function name
    pub fn with_entity_loss_type(mut self, loss_type: impl Into<String>) -> Self {
        self.entity_loss_type = Some(loss_type.into());
        self
    }

    /// Set hidden-state dropout
    pub fn with_hidden_dropout_prob(mut self, prob: f32) -> Self {
        self.hidden_dropout_prob = prob;
        self
    }

    /// Make the entity table trainable
    pub fn with_trainable_entity_table(mut self, trainable: bool) -> Self {
        self.ent_emb_no_freeze = trainable;
        self
    }

    /// Resolve the entity loss function, defaulting to cross-entropy
    pub fn entity_loss_type(&self) -> Result<EntityLossType> {
        match &self.entity_loss_type {
            Some(name) => name.parse(),
            None => Ok(EntityLossType::CrossEntropyLoss),
        }
    }

    /// Whether the entity table is frozen
    pub fn entity_table_frozen(&self) -> bool {
        !self.ent_emb_no_freeze
    }

    /// Check the config before a model is built from it
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(Error::Configuration("hidden_size must be > 0".to_string()));
        }

        if self.num_labels == 0 {
            return Err(Error::Configuration("num_labels must be > 0".to_string()));
        }

        if !(0.0..1.0).contains(&self.hidden_dropout_prob) {
            return Err(Error::Configuration(format!(
                "hidden_dropout_prob must be in [0, 1), got {}",
                self.hidden_dropout_prob
            )));
        }

        if !self.entity_loss_weight.is_finite() || self.entity_loss_weight < 0.0 {
            return Err(Error::Configuration(format!(
                "entity_loss_weight must be finite and non-negative, got {}",
                self.entity_loss_weight
            )));
        }

        // only the cross-entropy head reads the loss name
        if self.variant == HeadVariant::EntityCrossEntropy {
            self.entity_loss_type()?;
        }

        if self.variant.links_entities() {
            if self.num_entity_labels == 0 {
                return Err(Error::Configuration(
                    "num_entity_labels must be > 0 for entity linking heads".to_string(),
                ));
            }
            if self.dim_entity_emb == 0 {
                return Err(Error::Configuration(
                    "dim_entity_emb must be > 0 for entity linking heads".to_string(),
                ));
            }
        }

        Ok(())
    }
}
