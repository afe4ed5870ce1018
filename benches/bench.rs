use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bowdb::{Database, OrbDesc, ScoringType, Vocabulary, WeightingType};

fn synthetic_images(rng: &mut StdRng, n: usize, per_image: usize) -> Vec<Vec<OrbDesc>> {
    let prototypes: Vec<OrbDesc> = (0..200).map(|_| rng.gen()).collect();
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

/// Benchmark for Vocabulary::transform()
fn transform(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let images = synthetic_images(&mut rng, 40, 50);

    let mut voc = Vocabulary::new(10, 4, WeightingType::TfIdf, ScoringType::L1).unwrap();
    voc.create(&images).unwrap();

    c.bench_function("transform", |b| {
        b.iter(|| voc.transform(black_box(&images[0])).unwrap())
    });
}

/// Benchmark for Database::query()
fn query(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(12);
    let images = synthetic_images(&mut rng, 100, 50);

    let mut voc = Vocabulary::new(10, 4, WeightingType::TfIdf, ScoringType::L1).unwrap();
    voc.create(&images).unwrap();

    let mut db = Database::new(voc, false, 0);
    for image in &images {
        db.add(image).unwrap();
    }

    c.bench_function("query", |b| {
        b.iter(|| db.query(black_box(&images[0]), 10, None).unwrap())
    });
}

criterion_group!(benches, transform, query);
criterion_main!(benches);
