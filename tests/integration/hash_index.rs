#![allow(missing_docs)]

use casita::imaging::hash::hamming;
use casita::imaging::lsh::{HashEntry, HashIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn entry(phash: u64) -> HashEntry {
    HashEntry {
        phash,
        dhash: phash.rotate_left(13),
        address: "123 MAIN ST".to_string(),
        source: "zillow".to_string(),
    }
}

/// Flips `bits` random distinct bit positions.
fn perturb(rng: &mut ChaCha8Rng, hash: u64, bits: u32) -> u64 {
    let mut out = hash;
    let mut flipped = 0u32;
    while flipped < bits {
        let bit = 1u64 << rng.gen_range(0..64);
        if out & bit == hash & bit {
            out ^= bit;
            flipped += 1;
        }
    }
    out
}

#[test]
fn resubmitting_the_same_gallery_rejects_everything() {
    let mut index = HashIndex::new(8, 8);
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let hashes: Vec<u64> = (0..43).map(|_| rng.gen()).collect();

    let mut registered = 0u32;
    for (i, hash) in hashes.iter().enumerate() {
        if index.is_duplicate(*hash).is_none() {
            index.register(&format!("img-{i}"), entry(*hash)).unwrap();
            registered += 1;
        }
    }
    assert_eq!(registered, 43, "seeded hashes should be pairwise distinct");

    // The same 43 again: every one is a duplicate, nothing registers.
    let mut rejected = 0u32;
    for hash in &hashes {
        if index.is_duplicate(*hash).is_some() {
            rejected += 1;
        }
    }
    assert_eq!(rejected, 43);
    assert_eq!(index.stats().total_images, 43);
}

#[test]
fn recall_on_synthetic_near_duplicates_is_at_least_99_percent() {
    let mut index = HashIndex::new(8, 8);
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let originals: Vec<u64> = (0..500).map(|_| rng.gen()).collect();
    for (i, hash) in originals.iter().enumerate() {
        // Random collisions under the threshold are possible; skip them.
        if index.is_duplicate(*hash).is_none() {
            index.register(&format!("img-{i}"), entry(*hash)).unwrap();
        }
    }

    let mut found = 0usize;
    let mut total = 0usize;
    for hash in &originals {
        for bits in [1u32, 4, 8] {
            let query = perturb(&mut rng, *hash, bits);
            total += 1;
            if index.is_duplicate(query).is_some() {
                found += 1;
            }
        }
    }
    let recall = found as f64 / total as f64;
    assert!(recall >= 0.99, "recall {recall} below 0.99");
}

#[test]
fn pairs_within_seven_bits_always_share_a_band() {
    // Pigeonhole: 7 flipped bits across 8 bands leave at least one band
    // byte untouched, so the candidate lookup cannot miss. At exactly 8
    // bits the guarantee becomes probabilistic, covered by the recall test.
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    for _ in 0..2_000 {
        let hash: u64 = rng.gen();
        let n_flips = rng.gen_range(1..=7);
        let query = perturb(&mut rng, hash, n_flips);
        let mut index = HashIndex::new(8, 8);
        index.register("a", entry(hash)).unwrap();
        let found = index.is_duplicate(query);
        assert!(
            found.is_some(),
            "near-duplicate at distance {} missed",
            hamming(hash, query)
        );
    }
}

#[test]
fn persisted_index_answers_like_the_live_one() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let mut index = HashIndex::new(8, 8);
    let mut stored = Vec::new();
    for i in 0..200u32 {
        let hash: u64 = rng.gen();
        if index.is_duplicate(hash).is_none() {
            index.register(&format!("img-{i}"), entry(hash)).unwrap();
            stored.push(hash);
        }
    }

    let json = serde_json::to_string(&index.to_document()).unwrap();
    let rebuilt = HashIndex::from_document(serde_json::from_str(&json).unwrap()).unwrap();

    // Sampled queries: exact, near, and far.
    for _ in 0..500 {
        let query = match rng.gen_range(0..3) {
            0 => stored[rng.gen_range(0..stored.len())],
            1 => {
                let idx = rng.gen_range(0..stored.len());
                perturb(&mut rng, stored[idx], 5)
            }
            _ => rng.gen(),
        };
        assert_eq!(
            index.is_duplicate(query).map(|(id, d)| (id, d)),
            rebuilt.is_duplicate(query).map(|(id, d)| (id, d))
        );
    }
    assert_eq!(index.stats().total_images, rebuilt.stats().total_images);
}

#[test]
fn net_count_tracks_register_and_remove() {
    let mut index = HashIndex::new(8, 8);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut live = Vec::new();
    for i in 0..100u32 {
        let hash: u64 = rng.gen();
        if index.is_duplicate(hash).is_none() {
            let id = format!("img-{i}");
            index.register(&id, entry(hash)).unwrap();
            live.push(id);
        }
        if i % 3 == 0 {
            if let Some(id) = live.pop() {
                index.remove(&id).expect("present");
            }
        }
    }
    assert_eq!(index.stats().total_images, live.len());
}
