//! Hierarchical vocabulary tree.
//!
//! The vocabulary is built by recursive k-means over a corpus of training
//! descriptors: each tree node holds the centroid of its cluster, and the
//! leaves are the visual words. Quantizing a descriptor is a greedy
//! root-to-leaf descent picking the nearest child at every level, so an image
//! turns into a sparse [`BowVector`] in `O(k * L)` per descriptor.
//!
//! Construction is seeded and fully deterministic; a built tree is immutable.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bow::{BowVector, FeatureVector};
use crate::descriptor::Descriptor;
use crate::error::{BowError, Result};
use crate::scoring::{ScoringType, WeightingType};
use crate::{NodeId, WordId, NO_PARENT};

/// Cap on Lloyd iterations per split; assignments usually stabilize sooner.
const MAX_KMEANS_ITERATIONS: usize = 10;

/// Seed used by [`Vocabulary::create`]; pass your own through
/// [`Vocabulary::create_with_seed`] to vary the clustering.
pub const DEFAULT_SEED: u64 = 42;

const FORMAT_VERSION: u32 = 1;

/// One tree node. Leaves carry a word id and a weight; inner nodes only
/// route the descent.
#[derive(Debug, Clone)]
pub struct Node<D> {
    /// Node id; 0 is the root.
    pub id: NodeId,
    /// Parent id, [`NO_PARENT`] for the root.
    pub parent: NodeId,
    /// Child ids in creation order, empty at leaves.
    pub children: Vec<NodeId>,
    /// Cluster centroid. `None` only at the root.
    pub descriptor: Option<D>,
    /// Word weight; meaningful only at leaves.
    pub weight: f64,
    /// Dense word id if this node is a leaf.
    pub word_id: Option<WordId>,
}

impl<D> Node<D> {
    fn new(id: NodeId, parent: NodeId) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            descriptor: None,
            weight: 0.0,
            word_id: None,
        }
    }

    /// A node with no children is a visual word.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Visual vocabulary: a `k`-ary tree of depth `L` whose leaves are words.
///
/// Built once with [`create`](Vocabulary::create), then used read-only to
/// [`transform`](Vocabulary::transform) images into bag-of-words vectors and
/// to [`score`](Vocabulary::score) those vectors against each other.
#[derive(Clone)]
pub struct Vocabulary<D: Descriptor> {
    k: u32,
    l: u32,
    weighting: WeightingType,
    scoring: ScoringType,
    nodes: Vec<Node<D>>,
    /// Word id to node id.
    words: Vec<NodeId>,
}

impl<D: Descriptor> Vocabulary<D> {
    /// Create an empty vocabulary. `k` is the branching factor in `[2, 256]`,
    /// `l` the maximum depth in `[1, 10]`.
    pub fn new(
        k: u32,
        l: u32,
        weighting: WeightingType,
        scoring: ScoringType,
    ) -> Result<Self> {
        if !(2..=256).contains(&k) {
            return Err(BowError::OutOfRange {
                kind: "branching factor",
                id: k,
            });
        }
        if !(1..=10).contains(&l) {
            return Err(BowError::OutOfRange {
                kind: "depth levels",
                id: l,
            });
        }
        Ok(Self {
            k,
            l,
            weighting,
            scoring,
            nodes: Vec::new(),
            words: Vec::new(),
        })
    }

    /// Build the tree from training descriptors, one `Vec<D>` per image.
    ///
    /// Uses [`DEFAULT_SEED`]; construction is deterministic for a fixed
    /// corpus and seed.
    pub fn create(&mut self, training: &[Vec<D>]) -> Result<()> {
        self.create_with_seed(training, DEFAULT_SEED)
    }

    /// Build the tree with an explicit clustering seed.
    pub fn create_with_seed(&mut self, training: &[Vec<D>], seed: u64) -> Result<()> {
        let pool: Vec<&D> = training.iter().flatten().collect();
        if pool.is_empty() {
            return Err(BowError::EmptyInput("training descriptors"));
        }

        info!(
            images = training.len(),
            descriptors = pool.len(),
            k = self.k,
            l = self.l,
            "building vocabulary"
        );

        self.nodes.clear();
        self.words.clear();
        self.nodes.push(Node::new(0, NO_PARENT));

        let mut rng = StdRng::seed_from_u64(seed);
        self.cluster(0, 0, &pool, &mut rng);
        self.assign_word_ids();
        self.assign_weights(training);

        info!(
            words = self.words.len(),
            nodes = self.nodes.len(),
            "vocabulary ready"
        );
        Ok(())
    }

    /// Recursive k-means split of `descriptors` under `node` at `depth`.
    fn cluster(&mut self, node: NodeId, depth: u32, descriptors: &[&D], rng: &mut StdRng) {
        if depth == self.l {
            return; // node stays a leaf
        }
        debug!(node, depth, count = descriptors.len(), "clustering split");

        if descriptors.len() <= self.k as usize {
            // too few to cluster: one leaf per descriptor
            for d in descriptors {
                self.new_child(node, (*d).clone());
            }
            return;
        }

        let (centers, groups) = self.run_kmeans(descriptors, rng);
        for (center, group) in centers.into_iter().zip(groups) {
            if group.is_empty() {
                continue;
            }
            let child = self.new_child(node, center);
            let subset: Vec<&D> = group.iter().map(|&i| descriptors[i]).collect();
            self.cluster(child, depth + 1, &subset, rng);
        }
    }

    fn new_child(&mut self, parent: NodeId, descriptor: D) -> NodeId {
        let id = self.nodes.len() as NodeId;
        let mut node = Node::new(id, parent);
        node.descriptor = Some(descriptor);
        self.nodes.push(node);
        self.nodes[parent as usize].children.push(id);
        id
    }

    /// Lloyd iterations over k-means++ seeds. Returns the final centers and
    /// the descriptor indices assigned to each; a center's group may be
    /// empty, in which case the caller drops it.
    fn run_kmeans(&self, descriptors: &[&D], rng: &mut StdRng) -> (Vec<D>, Vec<Vec<usize>>) {
        let mut centers = self.seed_centers(descriptors, rng);
        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); centers.len()];

        for _ in 0..MAX_KMEANS_ITERATIONS {
            let mut next: Vec<Vec<usize>> = vec![Vec::new(); centers.len()];
            for (i, d) in descriptors.iter().enumerate() {
                let mut best = 0;
                let mut best_dist = D::distance(d, &centers[0]);
                for (j, c) in centers.iter().enumerate().skip(1) {
                    let dist = D::distance(d, c);
                    if dist < best_dist {
                        best = j;
                        best_dist = dist;
                    }
                }
                next[best].push(i);
            }

            if next == groups {
                break; // assignments stable
            }
            groups = next;

            for (center, group) in centers.iter_mut().zip(&groups) {
                if !group.is_empty() {
                    let members: Vec<&D> = group.iter().map(|&i| descriptors[i]).collect();
                    *center = D::mean_of(&members);
                }
            }
        }

        (centers, groups)
    }

    /// k-means++ seeding: first center uniform, the rest sampled with
    /// probability proportional to squared distance to the nearest chosen
    /// center. Stops early when every candidate sits on a chosen center.
    fn seed_centers(&self, descriptors: &[&D], rng: &mut StdRng) -> Vec<D> {
        let k = self.k as usize;
        let mut centers: Vec<D> = Vec::with_capacity(k);

        let first = rng.gen_range(0..descriptors.len());
        centers.push(descriptors[first].clone());

        let mut min_sq: Vec<f64> = descriptors
            .iter()
            .map(|d| {
                let dist = D::distance(d, &centers[0]);
                dist * dist
            })
            .collect();

        while centers.len() < k {
            let total: f64 = min_sq.iter().sum();
            if total <= 0.0 {
                break; // collapsed: fewer distinct descriptors than k
            }

            let threshold = rng.gen::<f64>() * total;
            let mut cumsum = 0.0;
            let mut chosen = descriptors.len() - 1;
            for (i, &sq) in min_sq.iter().enumerate() {
                cumsum += sq;
                if cumsum >= threshold {
                    chosen = i;
                    break;
                }
            }

            let center = descriptors[chosen].clone();
            for (slot, d) in min_sq.iter_mut().zip(descriptors) {
                let dist = D::distance(d, &center);
                let sq = dist * dist;
                if sq < *slot {
                    *slot = sq;
                }
            }
            centers.push(center);
        }

        centers
    }

    /// Dense word ids for all leaves, in node-id order.
    fn assign_word_ids(&mut self) {
        for id in 1..self.nodes.len() {
            if self.nodes[id].is_leaf() {
                let word = self.words.len() as WordId;
                self.nodes[id].word_id = Some(word);
                self.words.push(id as NodeId);
            }
        }
    }

    /// Leaf weights per the configured weighting. IDF counts the distinct
    /// training images whose descriptors quantize to each word; a leaf no
    /// training image reaches keeps weight 0.
    fn assign_weights(&mut self, training: &[Vec<D>]) {
        match self.weighting {
            WeightingType::Tf | WeightingType::Binary => {
                for &node in &self.words {
                    self.nodes[node as usize].weight = 1.0;
                }
            }
            WeightingType::TfIdf | WeightingType::Idf => {
                let mut counts = vec![0u32; self.words.len()];
                for image in training {
                    let mut seen: BTreeSet<WordId> = BTreeSet::new();
                    for desc in image {
                        let (leaf, _) = self.descend(desc, 0);
                        if let Some(word) = self.nodes[leaf as usize].word_id {
                            seen.insert(word);
                        }
                    }
                    for word in seen {
                        counts[word as usize] += 1;
                    }
                }

                let n_images = training.len() as f64;
                for (word, &node) in self.words.iter().enumerate() {
                    let n_i = counts[word];
                    self.nodes[node as usize].weight = if n_i > 0 {
                        (n_images / f64::from(n_i)).ln()
                    } else {
                        0.0
                    };
                }
            }
        }
    }

    /// Greedy descent from the root; returns the leaf reached and the node
    /// visited at depth `level` (the leaf itself when the path is shorter).
    fn descend(&self, desc: &D, level: u32) -> (NodeId, NodeId) {
        let mut current = 0usize;
        let mut at_level: NodeId = 0;
        let mut depth = 0u32;

        while !self.nodes[current].children.is_empty() {
            let children = &self.nodes[current].children;
            let mut best = children[0];
            let mut best_dist = self.node_distance(best, desc);
            for &child in &children[1..] {
                let dist = self.node_distance(child, desc);
                if dist < best_dist {
                    best = child;
                    best_dist = dist;
                }
            }
            current = best as usize;
            depth += 1;
            if depth == level {
                at_level = best;
            }
        }

        if depth < level {
            at_level = current as NodeId;
        }
        (current as NodeId, at_level)
    }

    fn node_distance(&self, node: NodeId, desc: &D) -> f64 {
        let centroid = self.nodes[node as usize]
            .descriptor
            .as_ref()
            .expect("non-root node without centroid");
        D::distance(desc, centroid)
    }

    /// Quantize one descriptor to its visual word.
    pub fn transform_one(&self, desc: &D) -> Result<WordId> {
        if self.is_empty() {
            return Err(BowError::NotTrained);
        }
        let (leaf, _) = self.descend(desc, 0);
        Ok(self.nodes[leaf as usize]
            .word_id
            .expect("leaf without word id"))
    }

    /// Transform an image's descriptors into a bag-of-words vector,
    /// normalized as the configured scoring requires.
    pub fn transform(&self, features: &[D]) -> Result<BowVector> {
        Ok(self.transform_impl(features, None)?.0)
    }

    /// Like [`transform`](Self::transform), additionally grouping feature
    /// indices by their ancestor node at tree depth `level` (root = 0).
    pub fn transform_with_fv(
        &self,
        features: &[D],
        level: u32,
    ) -> Result<(BowVector, FeatureVector)> {
        self.transform_impl(features, Some(level))
    }

    fn transform_impl(
        &self,
        features: &[D],
        fv_level: Option<u32>,
    ) -> Result<(BowVector, FeatureVector)> {
        if self.is_empty() {
            return Err(BowError::NotTrained);
        }
        if features.is_empty() {
            return Err(BowError::EmptyInput("image features"));
        }

        let mut bow = BowVector::new();
        let mut fv = FeatureVector::new();

        for (i, desc) in features.iter().enumerate() {
            let (leaf, at_level) = self.descend(desc, fv_level.unwrap_or(0));
            let node = &self.nodes[leaf as usize];
            let word = node.word_id.expect("leaf without word id");

            match self.weighting {
                WeightingType::TfIdf | WeightingType::Idf => {
                    if node.weight > 0.0 {
                        bow.add_weight(word, node.weight);
                    }
                }
                WeightingType::Tf => bow.add_weight(word, 1.0),
                WeightingType::Binary => bow.set_weight(word, 1.0),
            }

            if fv_level.is_some() {
                fv.add(at_level, i as u32);
            }
        }

        if matches!(self.weighting, WeightingType::TfIdf | WeightingType::Tf) {
            bow.scale(1.0 / features.len() as f64);
        }
        if let Some(norm) = self.scoring.norm() {
            bow.normalize(norm);
        }

        Ok((bow, fv))
    }

    /// Compare two bag-of-words vectors under the configured scoring.
    pub fn score(&self, a: &BowVector, b: &BowVector) -> Result<f64> {
        if self.is_empty() {
            return Err(BowError::NotTrained);
        }
        let s = self.scoring.score(a, b);
        if s.is_finite() {
            Ok(s)
        } else {
            Err(BowError::Numeric)
        }
    }

    /// Number of words (leaves).
    pub fn size(&self) -> usize {
        self.words.len()
    }

    /// True before [`create`](Self::create) or `load` populated the tree.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Total node count, root included.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Configured branching factor `k`.
    pub fn branching_factor(&self) -> u32 {
        self.k
    }

    /// Configured maximum depth `L`.
    pub fn depth_levels(&self) -> u32 {
        self.l
    }

    /// Configured weighting.
    pub fn weighting(&self) -> WeightingType {
        self.weighting
    }

    /// Configured scoring.
    pub fn scoring(&self) -> ScoringType {
        self.scoring
    }

    /// Weight of word `word`.
    pub fn word_weight(&self, word: WordId) -> Result<f64> {
        let node = self.word_node(word)?;
        Ok(self.nodes[node as usize].weight)
    }

    /// Centroid descriptor of word `word`.
    pub fn word(&self, word: WordId) -> Result<&D> {
        let node = self.word_node(word)?;
        Ok(self.nodes[node as usize]
            .descriptor
            .as_ref()
            .expect("leaf without centroid"))
    }

    fn word_node(&self, word: WordId) -> Result<NodeId> {
        self.words
            .get(word as usize)
            .copied()
            .ok_or(BowError::OutOfRange {
                kind: "word id",
                id: word,
            })
    }

    /// Serialize to `path` with [`bincode`].
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = bincode::serialize(&self.to_record())?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load a vocabulary previously written by [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        let record: VocabularyRecord = bincode::deserialize(&buffer)?;
        let voc = Self::from_record(record)?;
        info!(
            words = voc.size(),
            nodes = voc.num_nodes(),
            "vocabulary loaded"
        );
        Ok(voc)
    }

    pub(crate) fn to_record(&self) -> VocabularyRecord {
        VocabularyRecord {
            version: FORMAT_VERSION,
            k: self.k,
            l: self.l,
            weighting: self.weighting,
            scoring: self.scoring,
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeRecord {
                    id: n.id,
                    parent: n.parent,
                    weight: n.weight,
                    descriptor: n
                        .descriptor
                        .as_ref()
                        .map(|d| d.to_text())
                        .unwrap_or_default(),
                })
                .collect(),
            words: self
                .words
                .iter()
                .enumerate()
                .map(|(word, &node)| (word as WordId, node))
                .collect(),
        }
    }

    /// Rebuild from a persisted record. Each node record is visited exactly
    /// once and children are relinked in a second linear pass, so loading is
    /// linear in the vocabulary size.
    pub(crate) fn from_record(record: VocabularyRecord) -> Result<Self> {
        if record.version != FORMAT_VERSION {
            return Err(BowError::Serialization(format!(
                "unsupported vocabulary format version {}",
                record.version
            )));
        }

        let mut voc = Self::new(record.k, record.l, record.weighting, record.scoring)?;

        voc.nodes.reserve(record.nodes.len());
        for (i, nr) in record.nodes.iter().enumerate() {
            if nr.id as usize != i {
                return Err(BowError::Serialization(format!(
                    "node record {} carries id {}",
                    i, nr.id
                )));
            }
            let mut node = Node::new(nr.id, nr.parent);
            node.weight = nr.weight;
            node.descriptor = if nr.descriptor.is_empty() {
                None
            } else {
                Some(D::from_text(&nr.descriptor)?)
            };
            voc.nodes.push(node);
        }

        for i in 1..voc.nodes.len() {
            let parent = voc.nodes[i].parent;
            if parent as usize >= voc.nodes.len() {
                return Err(BowError::Serialization(format!(
                    "node {i} references missing parent {parent}"
                )));
            }
            voc.nodes[parent as usize].children.push(i as NodeId);
        }

        voc.words = vec![0; record.words.len()];
        for (word, node) in record.words {
            if word as usize >= voc.words.len() || node as usize >= voc.nodes.len() {
                return Err(BowError::Serialization(format!(
                    "word map entry ({word}, {node}) out of range"
                )));
            }
            voc.words[word as usize] = node;
            voc.nodes[node as usize].word_id = Some(word);
        }

        Ok(voc)
    }
}

impl<D: Descriptor> fmt::Debug for Vocabulary<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vocabulary")
            .field("words", &self.words.len())
            .field("nodes", &self.nodes.len())
            .field("branching_factor", &self.k)
            .field("depth_levels", &self.l)
            .field("weighting", &self.weighting)
            .field("scoring", &self.scoring)
            .finish()
    }
}

/// Persisted form of one node; the descriptor travels as its text form and
/// is empty at the root.
#[derive(Serialize, Deserialize)]
pub(crate) struct NodeRecord {
    id: NodeId,
    parent: NodeId,
    weight: f64,
    descriptor: String,
}

/// Persisted form of a whole vocabulary.
#[derive(Serialize, Deserialize)]
pub(crate) struct VocabularyRecord {
    version: u32,
    k: u32,
    l: u32,
    weighting: WeightingType,
    scoring: ScoringType,
    nodes: Vec<NodeRecord>,
    words: Vec<(WordId, NodeId)>,
}
