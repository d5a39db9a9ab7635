//! Unit tests for configuration and the head registry

#[path = "../common/mod.rs"]
mod common;

use hetseq_core::{ElConfig, Error, HeadVariant};
use hetseq_models::{ModelInfo, ModelRegistry};

#[test]
fn test_registry_names_build_models() {
    let registry = ModelRegistry::new();

    for info in registry.list() {
        let (model, _) = common::build_model(common::config(info.variant));
        assert_eq!(model.variant(), info.variant);
        assert_eq!(model.variant().name(), info.name);
        assert_eq!(model.entity_table().is_some(), info.variant.links_entities());
    }
}

#[test]
fn test_registry_custom_entry() {
    let mut registry = ModelRegistry::default();
    registry.register(ModelInfo {
        name: "biobert_el".to_string(),
        variant: HeadVariant::EntityCosine,
        description: "BioBERT with the cosine entity head".to_string(),
    });

    assert_eq!(registry.list().len(), 4);
    assert_eq!(registry.variant("biobert_el"), Some(HeadVariant::EntityCosine));
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("el_config.json");
    std::fs::write(
        &path,
        r#"{
            "hidden_size": 6,
            "num_entity_labels": 10,
            "dim_entity_emb": 8,
            "variant": "entity_cross_entropy",
            "entity_loss_type": "CrossEntropyLoss",
            "entity_loss_weight": 2.0
        }"#,
    )
    .unwrap();

    let config = ElConfig::from_file(&path).unwrap();
    assert_eq!(config.variant, HeadVariant::EntityCrossEntropy);
    assert_eq!(config.entity_loss_weight, 2.0);
    assert!(config.entity_table_frozen());

    let (model, _) = common::build_model(config);
    let loss = model
        .forward(&common::labeled_inputs())
        .unwrap()
        .into_loss()
        .unwrap();
    let expected = loss.ner_value().unwrap() + 2.0 * loss.entity_value().unwrap().unwrap();
    assert!((loss.value().unwrap() - expected).abs() < 1e-4);
}

#[test]
fn test_config_file_rejects_bad_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("el_config.json");
    std::fs::write(
        &path,
        r#"{"hidden_size": 6, "num_entity_labels": 10, "dim_entity_emb": 8, "entity_loss_type": "HingeLoss"}"#,
    )
    .unwrap();
    assert!(matches!(
        ElConfig::from_file(&path),
        Err(Error::Configuration(_))
    ));

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        ElConfig::from_file(&path),
        Err(Error::Serialization(_))
    ));

    assert!(matches!(
        ElConfig::from_file(dir.path().join("missing.json")),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_cosine_head_ignores_entity_loss_type() {
    let config = common::config(HeadVariant::EntityCosine).with_entity_loss_type("HingeLoss");
    let (model, _) = common::build_model(config);

    let loss = model
        .forward(&common::labeled_inputs())
        .unwrap()
        .into_loss()
        .unwrap();
    assert!(loss.value().unwrap().is_finite());
}

#[test]
fn test_unknown_variant_name() {
    let err = "bert_qa".parse::<HeadVariant>().unwrap_err();
    assert!(err.to_string().contains("bert_qa"));
}
