//! Fill a database with synthetic images and query each one back.
//!
//! Run with `cargo run --example match-images`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bowdb::{Database, OrbDesc, ScoringType, Vocabulary, WeightingType};

const IMAGES: usize = 10;
const FEATURES_PER_IMAGE: usize = 50;

fn synthetic_images(rng: &mut StdRng) -> Vec<Vec<OrbDesc>> {
    let prototypes: Vec<OrbDesc> = (0..80).map(|_| rng.gen()).collect();
    (0..IMAGES)
        .map(|_| {
            (0..FEATURES_PER_IMAGE)
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

fn main() {
    let mut rng = StdRng::seed_from_u64(99);
    let images = synthetic_images(&mut rng);

    let mut voc = Vocabulary::new(9, 3, WeightingType::TfIdf, ScoringType::L1).unwrap();
    voc.create(&images).unwrap();
    println!("Vocabulary = {:#?}", voc);

    // The database keeps its own copy of the vocabulary. The direct index
    // lets us retrieve corresponding features between two entries later.
    let mut db = Database::new(voc, true, 2);
    for image in &images {
        db.add(image).unwrap();
    }
    println!("\nDatabase = {:#?}", db);

    println!("\nTop 4 matches per image:");
    for (i, image) in images.iter().enumerate() {
        let results = db.query(image, 4, None).unwrap();
        println!("\nSearching for Image {}:", i);
        println!("Match      |      Score");
        for r in results {
            println!("{:<10} | {:.4}", r.entry_id, r.score);
        }
    }

    // Features of entries 0 and 1 that share a tree node at the
    // direct-index level; a geometric check would start from these pairs.
    let pairs = db.retrieve_features(0, 1).unwrap();
    println!("\nEntries 0 and 1 share {} candidate feature pairs.", pairs.len());

    // The saved file includes the vocabulary and all entries.
    let path = std::env::temp_dir().join("bowdb-demo.db");
    db.save(&path).unwrap();
    let loaded = Database::<OrbDesc>::load(&path).unwrap();
    println!("Re-loaded database: {:#?}", loaded);
}
