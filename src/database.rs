//! Image database with inverted and direct indexes.
//!
//! The database owns a copy of the vocabulary. Each inserted image is
//! transformed once; its bag-of-words values are appended to the per-word
//! posting lists, and (optionally) its feature vector is stored for later
//! cross-image correspondence. A query only visits the posting lists of the
//! words present in the query image, so retrieval cost follows word
//! selectivity rather than database size.
//!
//! Entries are append-only: ids are assigned sequentially and never removed,
//! which keeps every posting list sorted by entry id for free.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bow::FeatureVector;
use crate::descriptor::Descriptor;
use crate::error::{BowError, Result};
use crate::scoring::ScoringType;
use crate::vocab::{Vocabulary, VocabularyRecord};
use crate::EntryId;

const FORMAT_VERSION: u32 = 1;

/// One ranked answer from [`Database::query`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    /// The matching database entry.
    pub entry_id: EntryId,
    /// Its similarity under the vocabulary's scoring (divergence for KL).
    pub score: f64,
}

/// Ranked query answers, best match first.
pub type QueryResults = Vec<QueryResult>;

/// Bag-of-words image database for place recognition.
pub struct Database<D: Descriptor> {
    voc: Vocabulary<D>,
    use_direct_index: bool,
    direct_index_level: u32,
    /// Per-word posting lists of `(entry, stored value)`.
    inverted_index: Vec<Vec<(EntryId, f64)>>,
    /// Per-entry feature vectors; empty placeholders when disabled.
    direct_index: Vec<FeatureVector>,
    num_entries: u32,
}

impl<D: Descriptor> Database<D> {
    /// Create a database over `voc`. When `use_direct_index` is set, each
    /// entry also records which features fell under which tree node at depth
    /// `direct_index_level` (counted from the root).
    pub fn new(voc: Vocabulary<D>, use_direct_index: bool, direct_index_level: u32) -> Self {
        let words = voc.size();
        Self {
            voc,
            use_direct_index,
            direct_index_level,
            inverted_index: vec![Vec::new(); words],
            direct_index: Vec::new(),
            num_entries: 0,
        }
    }

    /// The vocabulary this database quantizes with.
    pub fn vocabulary(&self) -> &Vocabulary<D> {
        &self.voc
    }

    /// Number of inserted entries.
    pub fn size(&self) -> usize {
        self.num_entries as usize
    }

    /// True if nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Whether the direct index is maintained.
    pub fn uses_direct_index(&self) -> bool {
        self.use_direct_index
    }

    /// Tree depth at which the direct index groups features.
    pub fn direct_index_level(&self) -> u32 {
        self.direct_index_level
    }

    /// Insert an image and return its entry id.
    ///
    /// Ids are assigned sequentially from 0. A failed transform leaves the
    /// database untouched.
    pub fn add(&mut self, features: &[D]) -> Result<EntryId> {
        let (bow, fv) = if self.use_direct_index {
            self.voc
                .transform_with_fv(features, self.direct_index_level)?
        } else {
            (self.voc.transform(features)?, FeatureVector::new())
        };

        let entry = self.num_entries;
        for (word, value) in bow.iter() {
            self.inverted_index[word as usize].push((entry, value));
        }
        self.direct_index.push(fv);
        self.num_entries += 1;

        debug!(entry, words = bow.len(), "entry added");
        Ok(entry)
    }

    /// Return the `max_results` entries most similar to `features`, best
    /// first (lowest divergence first under KL). `max_results == 0` returns
    /// every scored entry. Entries above `max_entry_id` are ignored when the
    /// bound is given.
    pub fn query(
        &self,
        features: &[D],
        max_results: usize,
        max_entry_id: Option<EntryId>,
    ) -> Result<QueryResults> {
        let q = self.voc.transform(features)?;
        let scoring = self.voc.scoring();

        // accumulate one partial score per candidate entry
        let mut pairs: HashMap<EntryId, f64> = HashMap::new();
        for (word, qv) in q.iter() {
            for &(entry, dv) in &self.inverted_index[word as usize] {
                if matches!(max_entry_id, Some(max) if entry > max) {
                    continue;
                }
                let contribution = match scoring {
                    ScoringType::L1 => (qv - dv).abs() - qv.abs() - dv.abs(),
                    ScoringType::L2 | ScoringType::DotProduct => qv * dv,
                    ScoringType::ChiSquare => {
                        let sum = qv + dv;
                        if sum != 0.0 {
                            qv * dv / sum
                        } else {
                            0.0
                        }
                    }
                    ScoringType::Kl => {
                        if dv > 0.0 {
                            qv * (qv / dv).ln()
                        } else {
                            0.0
                        }
                    }
                    ScoringType::Bhattacharyya => (qv * dv).sqrt(),
                };
                *pairs.entry(entry).or_insert(0.0) += contribution;
            }
        }

        let mut results: QueryResults = pairs
            .into_iter()
            .map(|(entry_id, acc)| {
                let score = match scoring {
                    ScoringType::L1 => -acc / 2.0,
                    ScoringType::L2 => {
                        if acc >= 1.0 {
                            1.0
                        } else {
                            1.0 - (1.0 - acc).sqrt()
                        }
                    }
                    ScoringType::ChiSquare => (2.0 * acc).clamp(0.0, 1.0),
                    ScoringType::Kl | ScoringType::Bhattacharyya | ScoringType::DotProduct => acc,
                };
                QueryResult { entry_id, score }
            })
            .collect();

        if results.iter().any(|r| !r.score.is_finite()) {
            return Err(BowError::Numeric);
        }

        // best first; ties go to the older entry
        if scoring.higher_is_better() {
            results.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
                    .then(a.entry_id.cmp(&b.entry_id))
            });
        } else {
            results.sort_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(Ordering::Equal)
                    .then(a.entry_id.cmp(&b.entry_id))
            });
        }
        if max_results > 0 {
            results.truncate(max_results);
        }
        Ok(results)
    }

    /// Feature vector stored for `entry`.
    pub fn feature_vector(&self, entry: EntryId) -> Result<&FeatureVector> {
        if !self.use_direct_index {
            return Err(BowError::DirectIndexDisabled);
        }
        self.direct_index
            .get(entry as usize)
            .ok_or(BowError::OutOfRange {
                kind: "entry id",
                id: entry,
            })
    }

    /// Pairs of feature indices `(from a, from b)` whose features share an
    /// ancestor node at the direct-index level. Callers use this to restrict
    /// geometric verification to features that quantized together.
    pub fn retrieve_features(&self, a: EntryId, b: EntryId) -> Result<Vec<(u32, u32)>> {
        let fa = self.feature_vector(a)?;
        let fb = self.feature_vector(b)?;

        let mut matches = Vec::new();
        let (ga, gb) = (fa.groups(), fb.groups());
        let (mut i, mut j) = (0, 0);
        while i < ga.len() && j < gb.len() {
            match ga[i].0.cmp(&gb[j].0) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    for &x in &ga[i].1 {
                        for &y in &gb[j].1 {
                            matches.push((x, y));
                        }
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        Ok(matches)
    }

    /// Drop all entries but keep the vocabulary and configuration.
    pub fn clear(&mut self) {
        for postings in &mut self.inverted_index {
            postings.clear();
        }
        self.direct_index.clear();
        self.num_entries = 0;
    }

    /// Serialize the database, vocabulary included, to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let record = DatabaseRecord {
            version: FORMAT_VERSION,
            vocabulary: self.voc.to_record(),
            use_direct_index: self.use_direct_index,
            direct_index_level: self.direct_index_level,
            num_entries: self.num_entries,
            inverted_index: self.inverted_index.clone(),
            direct_index: self.direct_index.clone(),
        };
        let bytes = bincode::serialize(&record)?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        info!(entries = self.num_entries, "database saved");
        Ok(())
    }

    /// Load a database previously written by [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        let record: DatabaseRecord = bincode::deserialize(&buffer)?;

        if record.version != FORMAT_VERSION {
            return Err(BowError::Serialization(format!(
                "unsupported database format version {}",
                record.version
            )));
        }

        let voc = Vocabulary::from_record(record.vocabulary)?;
        if record.inverted_index.len() != voc.size() {
            return Err(BowError::Serialization(format!(
                "inverted index covers {} words, vocabulary has {}",
                record.inverted_index.len(),
                voc.size()
            )));
        }
        if record.direct_index.len() != record.num_entries as usize {
            return Err(BowError::Serialization(format!(
                "direct index holds {} entries, expected {}",
                record.direct_index.len(),
                record.num_entries
            )));
        }

        info!(
            entries = record.num_entries,
            words = voc.size(),
            "database loaded"
        );
        Ok(Self {
            voc,
            use_direct_index: record.use_direct_index,
            direct_index_level: record.direct_index_level,
            inverted_index: record.inverted_index,
            direct_index: record.direct_index,
            num_entries: record.num_entries,
        })
    }
}

impl<D: Descriptor> fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("entries", &self.num_entries)
            .field("words", &self.voc.size())
            .field("use_direct_index", &self.use_direct_index)
            .field("direct_index_level", &self.direct_index_level)
            .finish()
    }
}

/// Persisted form of a whole database; embeds the vocabulary record.
#[derive(Serialize, Deserialize)]
struct DatabaseRecord {
    version: u32,
    vocabulary: VocabularyRecord,
    use_direct_index: bool,
    direct_index_level: u32,
    num_entries: u32,
    inverted_index: Vec<Vec<(EntryId, f64)>>,
    direct_index: Vec<FeatureVector>,
}
