//! Registry of named head architectures

use hetseq_core::config::HeadVariant;
use std::collections::HashMap;

/// Information about a registered head
#[derive(Clone, Debug, PartialEq)]
pub struct ModelInfo {
    /// Registry key
    pub name: String,

    /// Entity loss policy
    pub variant: HeadVariant,

    /// One-line description
    pub description: String,
}

/// Maps architecture names to head variants
pub struct ModelRegistry {
    models: HashMap<String, ModelInfo>,
}

impl ModelRegistry {
    /// Create a registry holding the built-in heads
    pub fn new() -> Self {
        let mut registry = Self {
            models: HashMap::new(),
        };

        registry.register_built_in_models();
        registry
    }

    fn register_built_in_models(&mut self) {
        let built_in = [
            (
                HeadVariant::NerOnly,
                "BERT token classification for BIO tagging",
            ),
            (
                HeadVariant::EntityCosine,
                "BERT NER + entity linking with a cosine embedding loss",
            ),
            (
                HeadVariant::EntityCrossEntropy,
                "BERT NER + entity linking with cross-entropy over similarity scores",
            ),
        ];

        for (variant, description) in built_in {
            self.register(ModelInfo {
                name: variant.name().to_string(),
                variant,
                description: description.to_string(),
            });
        }
    }

    /// Get model info by name
    pub fn get(&self, name: &str) -> Option<&ModelInfo> {
        self.models.get(name)
    }

    /// Head variant registered under `name`
    pub fn variant(&self, name: &str) -> Option<HeadVariant> {
        self.get(name).map(|info| info.variant)
    }

    /// List all registered models, sorted by name
    pub fn list(&self) -> Vec<&ModelInfo> {
        let mut models: Vec<_> = self.models.values().collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    /// Register a model under its name, replacing any previous entry
    pub fn register(&mut self, info: ModelInfo) {
        self.models.insert(info.name.clone(), info);
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
