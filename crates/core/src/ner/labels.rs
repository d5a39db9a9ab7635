//! BIO label dictionary and label sentinels

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Label written over positions the NER loss must skip
pub const IGNORE_CLASSIFICATION_LABEL: i64 = -100;

/// Entity label of a mention whose entity is not in the dictionary
pub const OUT_DICT_ENTITY_ID: i64 = -1;

/// Entity label of a token that is not part of any mention
pub const NO_ENTITY_ID: i64 = 0;

/// Tag name to class id
pub const NER_LABEL_DICT: [(&str, i64); 3] = [("B", 0), ("I", 1), ("O", 2)];

/// Position of a token relative to a named entity span
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NerLabel {
    /// First token of a mention
    B,
    /// Continuation of a mention
    I,
    /// Outside any mention
    O,
}

impl NerLabel {
    /// All labels in class-id order
    pub const ALL: [NerLabel; 3] = [NerLabel::B, NerLabel::I, NerLabel::O];

    /// Class id used by the classifier
    pub fn id(self) -> i64 {
        match self {
            Self::B => 0,
            Self::I => 1,
            Self::O => 2,
        }
    }

    /// Label for a class id
    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.id() == id)
    }

    /// Single-letter tag
    pub fn tag(self) -> &'static str {
        NER_LABEL_DICT[self.id() as usize].0
    }
}

impl fmt::Display for NerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for NerLabel {
    type Err = Error;

    /// Accepts bare tags (`B`) and typed tags (`B-PER`)
    fn from_str(s: &str) -> Result<Self> {
        let tag = s.split_once('-').map_or(s, |(tag, _)| tag);
        match tag {
            "B" => Ok(Self::B),
            "I" => Ok(Self::I),
            "O" => Ok(Self::O),
            _ => Err(Error::Validation(format!("Unknown NER tag: {}", s))),
        }
    }
}

/// Whether an entity label takes part in the entity loss
pub fn is_entity_target(entity_label: i64) -> bool {
    entity_label > NO_ENTITY_ID
}

/// Whether a NER label is usable as a target for `num_labels` classes
pub fn is_valid_ner_label(label: i64, num_labels: usize) -> bool {
    label == IGNORE_CLASSIFICATION_LABEL || (0..num_labels as i64).contains(&label)
}
