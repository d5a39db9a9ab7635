//! hetseq core library
//!
//! Tensor-free building blocks for the joint NER / entity linking heads:
//! error handling, hyperparameters, the BIO label dictionary and the
//! host-side batch layout.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod ner;

pub use config::*;
pub use error::{Error, Result};
pub use ner::*;
