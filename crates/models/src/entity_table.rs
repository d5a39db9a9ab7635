//! Pretrained entity embedding table

use crate::candle_model::ToHetseqResult;
use candle_core::{DType, Device, Tensor, Var};
use hetseq_core::config::ElConfig;
use hetseq_core::error::{Error, Result};
use std::path::Path;
use tracing::info;

/// Tensor name looked up in `.safetensors` files
pub const DEFAULT_TABLE_NAME: &str = "entity_emb";

#[derive(Debug)]
enum TableStorage {
    Frozen(Tensor),
    Trainable(Var),
}

/// `[num_entity_labels, dim_entity_emb]` table of entity embeddings
///
/// A frozen table is a detached constant. A trainable one is backed by a
/// [`Var`] that an optimizer can update.
#[derive(Debug)]
pub struct EntityEmbeddingTable {
    storage: TableStorage,
    num_entities: usize,
    dim: usize,
}

impl EntityEmbeddingTable {
    /// Wrap `embeddings`, checking it against the declared shape
    ///
    /// The table is converted to `dtype`, which must match the heads.
    pub fn new(
        embeddings: Tensor,
        num_entity_labels: usize,
        dim_entity_emb: usize,
        trainable: bool,
        dtype: DType,
    ) -> Result<Self> {
        let dims = embeddings.dims();
        if dims.len() != 2 {
            return Err(Error::Configuration(format!(
                "entity embedding table must be 2-D, got shape {:?}",
                dims
            )));
        }
        if dims[0] != num_entity_labels {
            return Err(Error::Configuration(format!(
                "entity embedding table has {} rows, num_entity_labels is {}",
                dims[0], num_entity_labels
            )));
        }
        if dims[1] != dim_entity_emb {
            return Err(Error::Configuration(format!(
                "entity embedding table has {} columns, dim_entity_emb is {}",
                dims[1], dim_entity_emb
            )));
        }

        let embeddings = embeddings.to_dtype(dtype).hetseq_result()?;
        let storage = if trainable {
            TableStorage::Trainable(Var::from_tensor(&embeddings).hetseq_result()?)
        } else {
            TableStorage::Frozen(embeddings.detach())
        };

        Ok(Self {
            storage,
            num_entities: num_entity_labels,
            dim: dim_entity_emb,
        })
    }

    /// Build from the dims and freeze flag in `config`
    pub fn from_config(embeddings: Tensor, config: &ElConfig, dtype: DType) -> Result<Self> {
        Self::new(
            embeddings,
            config.num_entity_labels,
            config.dim_entity_emb,
            config.ent_emb_no_freeze,
            dtype,
        )
    }

    /// The table as a tensor
    pub fn weight(&self) -> &Tensor {
        match &self.storage {
            TableStorage::Frozen(t) => t,
            TableStorage::Trainable(var) => var.as_tensor(),
        }
    }

    /// The backing variable when the table is trainable
    pub fn trainable_var(&self) -> Option<&Var> {
        match &self.storage {
            TableStorage::Frozen(_) => None,
            TableStorage::Trainable(var) => Some(var),
        }
    }

    /// Whether gradients never reach the table
    pub fn is_frozen(&self) -> bool {
        matches!(self.storage, TableStorage::Frozen(_))
    }

    /// Element type of the table
    pub fn dtype(&self) -> DType {
        self.weight().dtype()
    }

    /// Number of rows
    pub fn num_entities(&self) -> usize {
        self.num_entities
    }

    /// Embedding width
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Gather the embeddings of `ids` as `[ids.len(), dim]`
    pub fn lookup(&self, ids: &[u32]) -> Result<Tensor> {
        if let Some(&bad) = ids.iter().find(|&&id| id as usize >= self.num_entities) {
            return Err(Error::Precondition(format!(
                "entity id {} is outside a table of {} entities",
                bad, self.num_entities
            )));
        }

        let weight = self.weight();
        let index = Tensor::from_slice(ids, ids.len(), weight.device()).hetseq_result()?;
        weight.index_select(&index, 0).hetseq_result()
    }
}

/// Read an entity embedding matrix from `.safetensors` or `.npy`
///
/// For safetensors, `name` selects the tensor; when absent the file must
/// hold [`DEFAULT_TABLE_NAME`] or exactly one tensor.
pub fn load_entity_embeddings(
    path: impl AsRef<Path>,
    name: Option<&str>,
    device: &Device,
) -> Result<Tensor> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());

    let tensor = match extension.as_deref() {
        Some("safetensors") => {
            let mut tensors = candle_core::safetensors::load(path, device).hetseq_result()?;
            match name {
                Some(name) => tensors.remove(name).ok_or_else(|| {
                    Error::Configuration(format!("{} has no tensor named {}", path.display(), name))
                })?,
                None if tensors.contains_key(DEFAULT_TABLE_NAME) => {
                    tensors.remove(DEFAULT_TABLE_NAME).ok_or_else(|| {
                        Error::Configuration(format!("{} lost {}", path.display(), DEFAULT_TABLE_NAME))
                    })?
                }
                None if tensors.len() == 1 => tensors
                    .into_values()
                    .next()
                    .ok_or_else(|| Error::Configuration(format!("{} is empty", path.display())))?,
                None => {
                    return Err(Error::Configuration(format!(
                        "{} holds {} tensors and none is named {}",
                        path.display(),
                        tensors.len(),
                        DEFAULT_TABLE_NAME
                    )))
                }
            }
        }
        Some("npy") => Tensor::read_npy(path)
            .and_then(|t| t.to_device(device))
            .hetseq_result()?,
        _ => {
            return Err(Error::Configuration(format!(
                "unsupported entity embedding file: {}",
                path.display()
            )))
        }
    };

    info!(path = %path.display(), shape = ?tensor.dims(), "loaded entity embeddings");
    Ok(tensor)
}
