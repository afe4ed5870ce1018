//! Build a vocabulary from synthetic descriptors, score images against each
//! other, and round-trip the vocabulary through disk.
//!
//! Run with `cargo run --example create-voc`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bowdb::{OrbDesc, ScoringType, Vocabulary, WeightingType};

const IMAGES: usize = 6;
const FEATURES_PER_IMAGE: usize = 50;

/// Synthetic stand-in for feature extraction: each image samples noisy
/// copies of a shared prototype pool.
fn synthetic_images(rng: &mut StdRng) -> Vec<Vec<OrbDesc>> {
    let prototypes: Vec<OrbDesc> = (0..60).map(|_| rng.gen()).collect();
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
    let mut rng = StdRng::seed_from_u64(1234);
    let images = synthetic_images(&mut rng);
    println!(
        "Generated {} images with {} descriptors each.",
        images.len(),
        FEATURES_PER_IMAGE
    );

    // Create vocabulary from features
    let mut voc = Vocabulary::new(9, 3, WeightingType::TfIdf, ScoringType::L1).unwrap();
    voc.create(&images).unwrap();
    println!("\nVocabulary = {:#?}", voc);

    // Match images against themselves (0 low, 1 high)
    println!("\nPairwise scores:");
    let bows: Vec<_> = images.iter().map(|f| voc.transform(f).unwrap()).collect();
    for (i, a) in bows.iter().enumerate() {
        for (j, b) in bows.iter().enumerate() {
            let score = voc.score(a, b).unwrap();
            println!("Image {} vs Image {}: {:.4}", i, j, score);
        }
    }

    // Save vocab and load it again just for fun
    let path = std::env::temp_dir().join("bowdb-demo.voc");
    voc.save(&path).unwrap();
    let loaded = Vocabulary::<OrbDesc>::load(&path).unwrap();

    // Make sure save & load preserved quantization
    for _ in 0..1000 {
        let desc: OrbDesc = rng.gen();
        assert_eq!(
            voc.transform_one(&desc).unwrap(),
            loaded.transform_one(&desc).unwrap()
        );
    }
    println!("\nSaved and re-loaded vocabulary at {}", path.display());
}
