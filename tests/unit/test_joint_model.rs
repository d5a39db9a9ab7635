//! Integration tests for the joint NER / entity linking model

#[path = "../common/mod.rs"]
mod common;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, Optimizer, SGD};
use common::*;
use hetseq_core::{Error, HeadVariant, NerLabel};
use hetseq_models::loss::{cosine_embedding_loss, select_rows, selected_cross_entropy};
use hetseq_models::{EncoderInputs, JointModel};

fn assert_close(a: f32, b: f32) {
    assert!((a - b).abs() < 1e-5, "{} != {}", a, b);
}

#[test]
fn test_linking_loss_end_to_end() {
    for variant in [HeadVariant::EntityCosine, HeadVariant::EntityCrossEntropy] {
        let (model, _) = build_model(config(variant));
        let loss = model
            .forward(&labeled_inputs())
            .unwrap()
            .into_loss()
            .unwrap();

        let total = loss.value().unwrap();
        let ner = loss.ner_value().unwrap();
        let entity = loss.entity_value().unwrap().unwrap();

        assert!(total.is_finite());
        assert!(!loss.entity_dropped);
        assert_close(total, ner + entity);
    }
}

#[test]
fn test_cosine_term_is_bounded() {
    let (model, _) = build_model(config(HeadVariant::EntityCosine));
    let loss = model.forward(&labeled_inputs()).unwrap().into_loss().unwrap();

    let entity = loss.entity_value().unwrap().unwrap();
    assert!((0.0..=2.0 + 1e-5).contains(&entity));
}

#[test]
fn test_cross_entropy_term_uses_entity_tokens_only() {
    let (model, _) = build_model(config(HeadVariant::EntityCrossEntropy));
    let loss = model.forward(&labeled_inputs()).unwrap().into_loss().unwrap();

    let scores = model
        .forward(&unlabeled_inputs())
        .unwrap()
        .into_scores()
        .unwrap()
        .entity_scores
        .unwrap()
        .flatten_to(1)
        .unwrap();
    // (0, 1) -> entity 5, (1, 0) -> entity 3
    let expected = selected_cross_entropy(&scores, &[1, 4], &[5, 3]).unwrap();

    assert_close(
        loss.entity_value().unwrap().unwrap(),
        expected.to_scalar::<f32>().unwrap(),
    );
}

#[test]
fn test_cosine_term_uses_entity_tokens_only() {
    let (model, varmap) = build_model(config(HeadVariant::EntityCosine));
    let loss = model.forward(&labeled_inputs()).unwrap().into_loss().unwrap();

    let ids = input_ids();
    let hidden = model.encoder().encode(&EncoderInputs::new(&ids)).unwrap();
    let projection = {
        let vars = varmap.data().lock().unwrap();
        Linear::new(
            vars["entity_classifier.weight"].as_tensor().clone(),
            Some(vars["entity_classifier.bias"].as_tensor().clone()),
        )
    };
    let projected = projection
        .forward(&hidden)
        .unwrap()
        .tanh()
        .unwrap()
        .flatten_to(1)
        .unwrap();

    // (0, 1) -> entity 5, (1, 0) -> entity 3
    let predicted = select_rows(&projected, &[1, 4]).unwrap();
    let targets = model.entity_table().unwrap().lookup(&[5, 3]).unwrap();
    let expected = cosine_embedding_loss(&predicted, &targets).unwrap();

    assert_close(
        loss.entity_value().unwrap().unwrap(),
        expected.to_scalar::<f32>().unwrap(),
    );
}

#[test]
fn test_inference_scores() {
    for variant in [HeadVariant::EntityCosine, HeadVariant::EntityCrossEntropy] {
        let (model, _) = build_model(config(variant));
        let scores = model
            .forward(&unlabeled_inputs())
            .unwrap()
            .into_scores()
            .unwrap();

        assert_eq!(scores.ner_logits.dims(), &[BATCH, SEQ_LEN, 3]);
        let entity_scores = scores.entity_scores.unwrap();
        assert_eq!(entity_scores.dims(), &[BATCH, SEQ_LEN, NUM_ENTITIES]);

        assert!(to_vec(&scores.ner_logits).iter().all(|v| v.is_finite()));
        assert!(to_vec(&entity_scores)
            .iter()
            .all(|v| v.is_finite() && v.abs() <= 1.0 + 1e-5));
    }
}

#[test]
fn test_ner_only_scores_and_loss() {
    let (model, _) = build_model(config(HeadVariant::NerOnly));
    assert!(model.entity_table().is_none());

    let scores = model
        .forward(&unlabeled_inputs())
        .unwrap()
        .into_scores()
        .unwrap();
    assert!(scores.entity_scores.is_none());

    let loss = model.forward(&labeled_inputs()).unwrap().into_loss().unwrap();
    assert!(loss.entity.is_none());
    assert_close(loss.value().unwrap(), loss.ner_value().unwrap());
}

#[test]
fn test_full_mask_matches_plain_cross_entropy() {
    let (model, _) = build_model(config(HeadVariant::NerOnly));
    let mask = Tensor::ones((BATCH, SEQ_LEN), DType::U32, &Device::Cpu).unwrap();

    let inputs = unlabeled_inputs()
        .with_attention_mask(mask)
        .with_labels(labels());
    let loss = model.forward(&inputs).unwrap().into_loss().unwrap();

    let logits = model
        .forward(&inputs.clone().without_labels())
        .unwrap()
        .into_scores()
        .unwrap()
        .ner_logits
        .flatten_to(1)
        .unwrap();
    let targets = labels()
        .flatten_all()
        .unwrap()
        .to_dtype(DType::U32)
        .unwrap();
    let expected = candle_nn::loss::cross_entropy(&logits, &targets).unwrap();

    assert_close(loss.ner_value().unwrap(), expected.to_scalar::<f32>().unwrap());
}

#[test]
fn test_padding_labels_do_not_change_loss() {
    let (model, _) = build_model(config(HeadVariant::EntityCrossEntropy));
    let baseline = model.forward(&labeled_inputs()).unwrap().into_loss().unwrap();

    // differs from labels() only where the mask is 0
    let repadded = Tensor::new(&[[0i64, 1, 2, 0], [0, 2, -100, 1]], &Device::Cpu).unwrap();
    let loss = model
        .forward(&labeled_inputs().with_labels(repadded))
        .unwrap()
        .into_loss()
        .unwrap();

    assert_close(loss.ner_value().unwrap(), baseline.ner_value().unwrap());
    assert_close(loss.value().unwrap(), baseline.value().unwrap());
}

#[test]
fn test_no_entity_tokens_drops_entity_term() {
    for variant in [HeadVariant::EntityCosine, HeadVariant::EntityCrossEntropy] {
        let (model, _) = build_model(config(variant));
        let no_entities = Tensor::new(&[[0i64, -1, 0, 0], [0, 0, 0, 0]], &Device::Cpu).unwrap();

        let loss = model
            .forward(&labeled_inputs().with_entity_labels(no_entities))
            .unwrap()
            .into_loss()
            .unwrap();

        assert!(loss.entity_dropped);
        assert!(loss.entity_value().unwrap().unwrap().is_nan());
        assert_eq!(loss.value().unwrap(), loss.ner_value().unwrap());
    }
}

#[test]
fn test_entity_loss_weight() {
    let (model, _) = build_model(
        config(HeadVariant::EntityCrossEntropy).with_entity_loss_weight(0.25),
    );
    let loss = model.forward(&labeled_inputs()).unwrap().into_loss().unwrap();

    let expected = loss.ner_value().unwrap() + 0.25 * loss.entity_value().unwrap().unwrap();
    assert_close(loss.value().unwrap(), expected);
}

#[test]
fn test_unknown_entity_loss_type_rejected() {
    let varmap = candle_nn::VarMap::new();
    let vb = candle_nn::VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let config = config(HeadVariant::EntityCrossEntropy).with_entity_loss_type("MSELoss");

    let err = JointModel::new(
        config,
        Box::new(StaticEncoder::random()),
        Some(entity_table()),
        vb,
    )
    .err()
    .unwrap();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(err.to_string().contains("Unknown entity loss function: MSELoss"));
}

#[test]
fn test_wrong_table_shape_rejected() {
    let varmap = candle_nn::VarMap::new();
    let vb = candle_nn::VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let table = Tensor::zeros((NUM_ENTITIES, DIM_ENTITY_EMB + 1), DType::F32, &Device::Cpu).unwrap();

    let result = JointModel::new(
        config(HeadVariant::EntityCosine),
        Box::new(StaticEncoder::random()),
        Some(table),
        vb,
    );
    assert!(matches!(result.err().unwrap(), Error::Configuration(_)));
}

#[test]
fn test_frozen_table_not_updated_by_optimizer() {
    let (model, varmap) = build_model(config(HeadVariant::EntityCosine));
    let before = to_vec(model.entity_table().unwrap().weight());
    let classifier_before = to_vec(varmap.data().lock().unwrap()["classifier.weight"].as_tensor());

    let mut sgd = SGD::new(model.trainable_vars(&varmap), 0.5).unwrap();
    let loss = model.forward(&labeled_inputs()).unwrap().into_loss().unwrap();
    sgd.backward_step(&loss.total).unwrap();

    assert_eq!(to_vec(model.entity_table().unwrap().weight()), before);
    let classifier_after = to_vec(varmap.data().lock().unwrap()["classifier.weight"].as_tensor());
    assert_ne!(classifier_after, classifier_before);
}

#[test]
fn test_trainable_table_updated_by_optimizer() {
    let (model, varmap) = build_model(
        config(HeadVariant::EntityCosine).with_trainable_entity_table(true),
    );
    let before = to_vec(model.entity_table().unwrap().weight());

    let mut sgd = SGD::new(model.trainable_vars(&varmap), 0.5).unwrap();
    let loss = model.forward(&labeled_inputs()).unwrap().into_loss().unwrap();
    sgd.backward_step(&loss.total).unwrap();

    let after = to_vec(model.entity_table().unwrap().weight());
    assert_ne!(after, before);
    // only the rows of entities 3 and 5 receive gradient
    assert_eq!(after[..DIM_ENTITY_EMB], before[..DIM_ENTITY_EMB]);
}

#[test]
fn test_predict_skips_padding() {
    let (model, _) = build_model(config(HeadVariant::EntityCrossEntropy));
    let predictions = model.predict(&labeled_inputs()).unwrap();

    assert_eq!(predictions.len(), 5);
    assert_eq!(predictions.for_sequence(0).count(), 3);
    assert_eq!(predictions.for_sequence(1).count(), 2);

    for token in &predictions.tokens {
        assert!(NerLabel::ALL.iter().any(|l| Some(*l) == token.ner_label()));
        let entity = token.entity.unwrap();
        assert!((entity.entity_id as usize) < NUM_ENTITIES);
        assert!(entity.score.abs() <= 1.0 + 1e-5);
    }
}
