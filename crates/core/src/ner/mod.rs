//! NER labels and token batches

pub mod batch;
pub mod labels;

pub use batch::*;
pub use labels::*;
