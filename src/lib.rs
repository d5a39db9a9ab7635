//! hetseq: joint NER and entity linking heads
//!
//! Re-exports the label/config/batch types from `hetseq-core` and the
//! candle models from `hetseq-models`.

pub use hetseq_core;
pub use hetseq_models;

pub use hetseq_core::{
    ElConfig, EntityLossType, Error, HeadVariant, NerLabel, Result, TokenBatch, TokenSequence,
};
pub use hetseq_models::{
    EntityEmbeddingTable, Encoder, EncoderInputs, JointModel, LossOutput, ModelInputs,
    ModelOutput, ModelRegistry, ScoreOutput, TokenPredictions,
};
