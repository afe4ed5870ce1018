//! End-to-end retrieval scenarios on synthetic descriptor corpora.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bowdb::{Database, EntryId, OrbDesc, ScoringType, Vocabulary, WeightingType};

/// Synthetic corpus of `n` images, each sampling `per_image` descriptors
/// from a shared pool of scene prototypes with a few bits of noise. Images
/// overlap in vocabulary words the way views of nearby places do.
fn scene_images(rng: &mut StdRng, n: usize, per_image: usize) -> Vec<Vec<OrbDesc>> {
    let prototypes: Vec<OrbDesc> = (0..40).map(|_| rng.gen()).collect();
    (0..n)
        .map(|_| {
            (0..per_image)
                .map(|_| {
                    let mut d = prototypes[rng.gen_range(0..prototypes.len())];
                    for _ in 0..4 {
                        let bit = rng.gen_range(0..256usize);
                        d[bit / 8] ^= 1 << (bit % 8);
                    }
                    d
                })
                .collect()
        })
        .collect()
}

/// A vocabulary coarser than the corpus, so noisy samples of one prototype
/// land on the same word and different images overlap in vocabulary terms.
fn trained_vocab(
    images: &[Vec<OrbDesc>],
    weighting: WeightingType,
    scoring: ScoringType,
) -> Vocabulary<OrbDesc> {
    let mut voc = Vocabulary::new(8, 2, weighting, scoring).unwrap();
    voc.create(images).unwrap();
    voc
}

#[test]
fn every_inserted_image_is_its_own_best_match() {
    let mut rng = StdRng::seed_from_u64(1);
    let images = scene_images(&mut rng, 50, 10);

    let voc = trained_vocab(&images, WeightingType::TfIdf, ScoringType::L1);
    let mut db = Database::new(voc, false, 0);
    for image in &images {
        db.add(image).unwrap();
    }

    for (i, image) in images.iter().enumerate() {
        let results = db.query(image, 5, None).unwrap();
        assert_eq!(
            results[0].entry_id, i as EntryId,
            "image {i} did not come back first"
        );
        assert!((results[0].score - 1.0).abs() < 1e-9);
    }
}

#[test]
fn binary_weighting_still_scores_self_matches_at_one() {
    let mut rng = StdRng::seed_from_u64(2);
    let images = scene_images(&mut rng, 10, 20);

    let voc = trained_vocab(&images, WeightingType::Binary, ScoringType::L1);
    let mut db = Database::new(voc, false, 0);
    for image in &images {
        db.add(image).unwrap();
    }

    for (i, image) in images.iter().enumerate() {
        let results = db.query(image, 1, None).unwrap();
        assert_eq!(results[0].entry_id, i as EntryId);
        assert!((results[0].score - 1.0).abs() < 1e-9);
    }
}

#[test]
fn direct_index_covers_every_feature() {
    let mut rng = StdRng::seed_from_u64(3);
    let images = scene_images(&mut rng, 10, 10);

    let voc = trained_vocab(&images, WeightingType::TfIdf, ScoringType::L1);
    let mut db = Database::new(voc, true, 2);

    let probe: Vec<OrbDesc> = (0..100).map(|_| rng.gen()).collect();
    let entry = db.add(&probe).unwrap();

    let fv = db.feature_vector(entry).unwrap();
    let mut indices: Vec<u32> = fv
        .groups()
        .iter()
        .flat_map(|(_, idx)| idx.iter().copied())
        .collect();
    indices.sort_unstable();
    let expected: Vec<u32> = (0..100).collect();
    assert_eq!(indices, expected);
}

#[test]
fn max_entry_id_restricts_the_candidate_set() {
    let mut rng = StdRng::seed_from_u64(4);
    let images = scene_images(&mut rng, 10, 10);

    let voc = trained_vocab(&images, WeightingType::TfIdf, ScoringType::L1);
    let mut db = Database::new(voc, false, 0);
    for image in &images {
        db.add(image).unwrap();
    }

    let unfiltered = db.query(&images[5], 10, None).unwrap();
    assert_eq!(unfiltered[0].entry_id, 5);

    let filtered = db.query(&images[5], 10, Some(4)).unwrap();
    assert!(!filtered.is_empty(), "overlapping scenes should still match");
    assert!(filtered.iter().all(|r| r.entry_id <= 4));
}

#[test]
fn database_round_trips_through_disk() {
    let mut rng = StdRng::seed_from_u64(5);
    let images = scene_images(&mut rng, 12, 10);

    let voc = trained_vocab(&images, WeightingType::TfIdf, ScoringType::L1);
    let mut db = Database::new(voc, true, 2);
    for image in &images {
        db.add(image).unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("places.db");
    db.save(&path).unwrap();
    let loaded = Database::<OrbDesc>::load(&path).unwrap();

    assert_eq!(loaded.size(), db.size());
    assert_eq!(loaded.uses_direct_index(), db.uses_direct_index());
    assert_eq!(loaded.direct_index_level(), db.direct_index_level());

    for image in &images {
        let before = db.query(image, 5, None).unwrap();
        let after = loaded.query(image, 5, None).unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.entry_id, b.entry_id);
            assert!((a.score - b.score).abs() < 1e-12);
        }
    }

    let before = db.retrieve_features(0, 1).unwrap();
    let after = loaded.retrieve_features(0, 1).unwrap();
    assert_eq!(before, after);
}

#[test]
fn vocabulary_round_trips_through_disk() {
    let mut rng = StdRng::seed_from_u64(6);
    let images = scene_images(&mut rng, 8, 12);
    let voc = trained_vocab(&images, WeightingType::TfIdf, ScoringType::L1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("places.voc");
    voc.save(&path).unwrap();
    let loaded = Vocabulary::<OrbDesc>::load(&path).unwrap();

    for _ in 0..1000 {
        let desc: OrbDesc = rng.gen();
        assert_eq!(
            voc.transform_one(&desc).unwrap(),
            loaded.transform_one(&desc).unwrap()
        );
    }
}
