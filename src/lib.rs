//! Hierarchical bag-of-words place recognition.
//!
//! `bowdb` turns sets of image feature descriptors into sparse weighted
//! vectors and retrieves the most similar previously-seen images from a
//! database. It is the retrieval core of a loop-closure / relocalization
//! pipeline: feature extraction stays with the caller, which hands this
//! crate plain descriptor arrays.
//!
//! # Pieces
//!
//! - [`Vocabulary`]: a tree built by recursive k-means over training
//!   descriptors; its leaves are the *visual words*. Quantizes descriptors
//!   by greedy root-to-leaf descent and weights words by TF-IDF (or TF,
//!   IDF, binary).
//! - [`BowVector`] / [`FeatureVector`]: sparse per-image vectors — word
//!   weights for scoring, and node-grouped feature indices for
//!   correspondence.
//! - [`ScoringType`]: pluggable similarity measures over pairs of
//!   bag-of-words vectors (L1, L2, chi-square, KL, Bhattacharyya, dot).
//! - [`Database`]: an inverted index from words to posting lists answering
//!   top-k similarity queries, plus an optional direct index for retrieving
//!   corresponding features between two entries.
//!
//! # Example
//!
//! ```
//! use bowdb::{Database, ScoringType, Vocabulary, WeightingType};
//!
//! # fn main() -> bowdb::Result<()> {
//! // two toy images, four 4-byte binary descriptors each
//! let images: Vec<Vec<[u8; 4]>> = vec![
//!     vec![[0, 0, 0, 0], [1, 0, 0, 0], [0, 0, 0, 240], [0, 0, 0, 241]],
//!     vec![[255; 4], [254, 255, 255, 255], [255, 255, 255, 15], [255, 255, 255, 14]],
//! ];
//!
//! let mut voc = Vocabulary::new(2, 2, WeightingType::TfIdf, ScoringType::L1)?;
//! voc.create(&images)?;
//!
//! let mut db = Database::new(voc, false, 0);
//! for image in &images {
//!     db.add(image)?;
//! }
//!
//! let best = db.query(&images[0], 1, None)?;
//! assert_eq!(best[0].entry_id, 0);
//! # Ok(())
//! # }
//! ```
//!
//! A fully built vocabulary is immutable and safe to share across threads.
//! The database follows the usual reader-writer discipline: any number of
//! concurrent `query` calls, or one exclusive `add`.

pub mod bow;
pub mod database;
pub mod descriptor;
pub mod error;
pub mod scoring;
pub mod vocab;

/// Tree node id. The root is 0.
pub type NodeId = u32;

/// Dense visual-word id, `[0, vocabulary size)`.
pub type WordId = u32;

/// Dense database entry id, assigned in insertion order.
pub type EntryId = u32;

/// Parent sentinel of the root node.
pub const NO_PARENT: NodeId = u32::MAX;

pub use bow::{BowVector, FeatureVector, LNorm};
pub use database::{Database, QueryResult, QueryResults};
pub use descriptor::{BriskDesc, Descriptor, OrbDesc};
pub use error::{BowError, Result};
pub use scoring::{ScoringType, WeightingType};
pub use vocab::{Node, Vocabulary, DEFAULT_SEED};
