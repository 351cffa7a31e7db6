pub mod cli;
pub mod config;
pub mod error;
pub mod eval;
pub mod feature;
pub mod hamming;
pub mod index;
pub mod kmeans;
pub mod kmodes;
pub mod trainer;
pub mod utils;
pub mod vocabulary;

pub use config::Opts;
pub use error::{Error, ExtractionFailure, Result};
pub use feature::{Backend, DescriptorSet, FeatureExtractor, FeatureKind};
pub use index::{IndexReport, IndexState, Indexer, SearchHit, Searcher};
pub use trainer::{Training, VocabularyTrainer};
pub use vocabulary::{Histogram, Vocabulary};
