//! Candle implementation of the hetseq heads
//!
//! A pretrained encoder turns token ids into hidden states; the heads here
//! turn those into NER logits and, for the entity linking variants, into
//! similarities against a fixed entity embedding table. With labels the
//! [`JointModel`] returns the masked joint loss instead.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candle_model;
pub mod encoder;
pub mod entity_table;
pub mod heads;
pub mod inputs;
pub mod joint;
pub mod loss;
pub mod predictions;
pub mod registry;
pub mod similarity;

// Re-exports
pub use encoder::{BertEncoder, BertEncoderConfig, Encoder, EncoderInputs, LookupEncoder};
pub use entity_table::{load_entity_embeddings, EntityEmbeddingTable};
pub use heads::{ClassificationHead, EntityProjectionHead};
pub use inputs::ModelInputs;
pub use joint::{score_entities, JointModel, ModelOutput, ScoreOutput};
pub use loss::{compose_joint_loss, LossOutput};
pub use predictions::{EntityMatch, TokenPrediction, TokenPredictions};
pub use registry::*;
pub use similarity::sim_matrix;
