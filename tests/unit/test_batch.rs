//! Unit tests for host-side batching

#[path = "../common/mod.rs"]
mod common;

use candle_core::Device;
use hetseq_core::{
    Error, HeadVariant, NerLabel, TokenBatch, TokenSequence, IGNORE_CLASSIFICATION_LABEL,
};
use hetseq_models::ModelInputs;
use proptest::prelude::*;

fn labeled(ids: Vec<u32>, labels: Vec<NerLabel>, entities: Vec<i64>) -> TokenSequence {
    TokenSequence::new(ids)
        .with_labels(labels.into_iter().map(NerLabel::id).collect())
        .with_entity_labels(entities)
}

fn sample_batch() -> TokenBatch {
    use NerLabel::*;
    TokenBatch::from_sequences(
        &[
            labeled(vec![101, 7, 8], vec![O, B, I], vec![0, 5, 5]),
            labeled(vec![101, 9], vec![O, B], vec![0, 3]),
        ],
        0,
    )
    .unwrap()
}

#[test]
fn test_from_sequences_pads() {
    let batch = sample_batch();
    assert_eq!((batch.batch_size, batch.seq_len), (2, 3));
    assert_eq!(batch.input_ids, vec![101, 7, 8, 101, 9, 0]);
    assert_eq!(batch.attention_mask, Some(vec![1, 1, 1, 1, 1, 0]));
    assert_eq!(
        batch.labels,
        Some(vec![2, 0, 1, 2, 0, IGNORE_CLASSIFICATION_LABEL])
    );
    assert_eq!(batch.entity_labels, Some(vec![0, 5, 5, 0, 3, 0]));
    assert_eq!(batch.num_active_tokens(), 5);
    assert_eq!(batch.num_entity_tokens(), 3);
    assert!(batch.validate(3).is_ok());
}

#[test]
fn test_partial_labels_are_dropped() {
    let batch = TokenBatch::from_sequences(
        &[
            TokenSequence::new(vec![1, 2]).with_labels(vec![2, 2]),
            TokenSequence::new(vec![3]),
        ],
        0,
    )
    .unwrap();
    assert!(!batch.has_labels());
    assert!(batch.entity_labels.is_none());
}

#[test]
fn test_mismatched_label_length() {
    let result = TokenBatch::from_sequences(
        &[TokenSequence::new(vec![1, 2]).with_labels(vec![2])],
        0,
    );
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[test]
fn test_validate_rejects_bad_labels() {
    let batch = sample_batch().with_labels(vec![0, 1, 2, 3, 0, -100]);
    assert!(matches!(batch.validate(3), Err(Error::Validation(_))));

    let batch = sample_batch().with_attention_mask(vec![1, 1, 2, 1, 1, 0]);
    assert!(batch.validate(3).is_err());
}

#[test]
fn test_batch_drives_the_model() {
    let (model, _) = common::build_model(common::config(HeadVariant::EntityCosine));
    // StaticEncoder emits [2, 4, H]
    let batch = TokenBatch::from_sequences(
        &[
            labeled(
                vec![101, 7, 8, 9],
                vec![NerLabel::O, NerLabel::B, NerLabel::I, NerLabel::O],
                vec![0, 5, 5, 0],
            ),
            labeled(vec![101, 9], vec![NerLabel::O, NerLabel::B], vec![0, 3]),
        ],
        0,
    )
    .unwrap();

    let inputs = ModelInputs::from_batch(&batch, &Device::Cpu).unwrap();
    let loss = model.forward(&inputs).unwrap().into_loss().unwrap();
    assert!(loss.value().unwrap().is_finite());
    assert!(!loss.entity_dropped);
}

proptest! {
    #[test]
    fn prop_from_sequences_is_rectangular(
        lengths in proptest::collection::vec(1usize..8, 1..6)
    ) {
        let sequences: Vec<_> = lengths
            .iter()
            .map(|&n| TokenSequence::new(vec![1; n]).with_labels(vec![2; n]))
            .collect();
        let batch = TokenBatch::from_sequences(&sequences, 0).unwrap();

        let max_len = *lengths.iter().max().unwrap();
        prop_assert_eq!(batch.seq_len, max_len);
        prop_assert_eq!(batch.input_ids.len(), lengths.len() * max_len);
        prop_assert_eq!(batch.num_active_tokens(), lengths.iter().sum::<usize>());
        prop_assert!(batch.validate(3).is_ok());

        let ignored = batch
            .labels
            .as_ref()
            .unwrap()
            .iter()
            .filter(|&&l| l == IGNORE_CLASSIFICATION_LABEL)
            .count();
        prop_assert_eq!(ignored, batch.num_tokens() - batch.num_active_tokens());
    }
}
