#![allow(missing_docs)]

//! Extraction orchestrator behavior over mock sources: dedup, manifest
//! checkpoints, circuit breaking, and the critical-field status rule.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use casita::extract::circuit::CircuitBreaker;
use casita::extract::orchestrator::ExtractionOrchestrator;
use casita::extract::{Blocker, ExtractOutcome, ExtractStatus, FetchedImage, SourceExtractor};
use casita::imaging::lsh::HashIndex;
use casita::model::{Property, SourceTier};
use casita::store::enrichment::EnrichmentStore;
use casita::store::folders::FolderLookup;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

fn property(address: &str) -> Property {
    Property {
        full_address: address.to_string(),
        street: "street".to_string(),
        city: "Phoenix".to_string(),
        state: "AZ".to_string(),
        zip: "85040".to_string(),
        price: "$450,000".to_string(),
        price_num: Some(450_000.0),
        beds: Some(4),
        baths: Some(2.0),
        sqft: Some(1_700.0),
        price_per_sqft: Some(264.7),
    }
}

/// Deterministic 64x64 PNG of random 8px cells; distinct seeds give
/// perceptually distant images.
fn noise_png(seed: u64) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let cells: Vec<u8> = (0..64).map(|_| if rng.gen::<bool>() { 255 } else { 0 }).collect();
    let img = image::GrayImage::from_fn(64, 64, |x, y| {
        image::Luma([cells[((y / 8) * 8 + x / 8) as usize]])
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("png encode");
    out
}

fn critical_fields() -> BTreeMap<String, serde_json::Value> {
    let mut fields = BTreeMap::new();
    fields.insert("hoa_fee".to_string(), serde_json::json!(0.0));
    fields.insert("beds".to_string(), serde_json::json!(4));
    fields.insert("sewer_type".to_string(), serde_json::json!("city"));
    fields
}

struct MockSource {
    name: &'static str,
    images: Vec<Vec<u8>>,
    fields: BTreeMap<String, serde_json::Value>,
    blocker: Option<Blocker>,
    calls: AtomicU32,
}

impl MockSource {
    fn ok(name: &'static str, images: Vec<Vec<u8>>, fields: BTreeMap<String, serde_json::Value>) -> Arc<Self> {
        Arc::new(MockSource { name, images, fields, blocker: None, calls: AtomicU32::new(0) })
    }

    fn failing(name: &'static str, blocker: Blocker) -> Arc<Self> {
        Arc::new(MockSource {
            name,
            images: Vec::new(),
            fields: BTreeMap::new(),
            blocker: Some(blocker),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceExtractor for MockSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Listing
    }

    async fn extract(&self, _property: &Property) -> ExtractOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(blocker) = self.blocker {
            return ExtractOutcome::blocked(blocker);
        }
        let images = self
            .images
            .iter()
            .enumerate()
            .map(|(i, bytes)| FetchedImage {
                url: format!("https://example.test/{}/{i}.jpg", self.name),
                bytes: bytes.clone(),
            })
            .collect();
        ExtractOutcome::with_results(images, self.fields.clone())
    }
}

struct Harness {
    _dir: TempDir,
    enrichment: Arc<EnrichmentStore>,
    orchestrator: ExtractionOrchestrator,
}

fn harness(sources: Vec<Arc<dyn SourceExtractor>>, circuit: Arc<CircuitBreaker>) -> Harness {
    let dir = TempDir::new().expect("tmpdir");
    let enrichment = Arc::new(
        EnrichmentStore::open(
            dir.path().join("enrichment.json"),
            dir.path().join("conflicts.jsonl"),
        )
        .expect("enrichment store"),
    );
    let folders = Arc::new(FolderLookup::open(dir.path().join("folders.json")).expect("folders"));
    let orchestrator = ExtractionOrchestrator::new(
        sources,
        circuit,
        Arc::new(Mutex::new(HashIndex::new(8, 8))),
        dir.path().join("hash_index.json"),
        Arc::clone(&enrichment),
        folders,
        dir.path().join("processed"),
        1024,
    );
    Harness { _dir: dir, enrichment, orchestrator }
}

fn relaxed_circuit() -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        3,
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    ))
}

#[tokio::test]
async fn resubmitted_gallery_is_fully_rejected() {
    let gallery: Vec<Vec<u8>> = (0..43).map(noise_png).collect();
    let alpha = MockSource::ok("alpha", gallery.clone(), critical_fields());
    let beta = MockSource::ok("beta", gallery, BTreeMap::new());
    let h = harness(
        vec![
            alpha as Arc<dyn SourceExtractor>,
            beta as Arc<dyn SourceExtractor>,
        ],
        relaxed_circuit(),
    );

    let summary = h.orchestrator.run(&property("123 MAIN ST")).await.unwrap();
    let manifest = &summary.manifest;

    // Alpha's gallery lands (minus any internal near-collisions); beta's
    // identical 43 are all rejected against the registered hashes.
    assert_eq!(
        manifest.total_downloaded + manifest.duplicates_rejected,
        86
    );
    assert!(manifest.duplicates_rejected >= 43);
    assert_eq!(manifest.images.len() as u32, manifest.total_downloaded);
    assert!(manifest.images.iter().all(|img| img.source == "alpha"));
    // Image files exist exactly for the admitted records.
    for record in &manifest.images {
        assert!(record.bytes_path.exists(), "{:?} missing", record.bytes_path);
    }
}

#[tokio::test]
async fn completed_sources_are_not_reattempted() {
    let alpha = MockSource::ok("alpha", vec![noise_png(1)], critical_fields());
    let h = harness(vec![Arc::clone(&alpha) as Arc<dyn SourceExtractor>], relaxed_circuit());
    let prop = property("123 MAIN ST");

    let first = h.orchestrator.run(&prop).await.unwrap();
    assert_eq!(first.status, ExtractStatus::Ok);
    assert_eq!(alpha.calls(), 1);

    let second = h.orchestrator.run(&prop).await.unwrap();
    assert_eq!(alpha.calls(), 1, "complete source was re-extracted");
    assert_eq!(second.manifest.total_downloaded, 1);
}

#[tokio::test]
async fn open_circuit_skips_the_source_but_not_the_property() {
    let alpha = MockSource::failing("alpha", Blocker::Network);
    let beta = MockSource::ok("beta", vec![noise_png(2)], critical_fields());
    let circuit = relaxed_circuit();
    let h = harness(
        vec![
            Arc::clone(&alpha) as Arc<dyn SourceExtractor>,
            Arc::clone(&beta) as Arc<dyn SourceExtractor>,
        ],
        circuit,
    );

    // Three failing properties open alpha's circuit.
    for i in 0..3 {
        let summary = h
            .orchestrator
            .run(&property(&format!("{i} MAIN ST")))
            .await
            .unwrap();
        assert!(summary.skipped_blocked.is_empty());
        assert_eq!(summary.status, ExtractStatus::Ok);
    }
    assert_eq!(alpha.calls(), 3);

    // Fourth property: alpha is skipped_blocked, beta still serves it.
    let summary = h
        .orchestrator
        .run(&property("99 ELM ST"))
        .await
        .unwrap();
    assert_eq!(summary.skipped_blocked, vec!["alpha".to_string()]);
    assert_eq!(alpha.calls(), 3, "open circuit still called the source");
    assert_eq!(summary.status, ExtractStatus::Ok);
    assert!(h.enrichment.get("99 ELM ST").unwrap().beds.is_some());
}

#[tokio::test]
async fn captcha_opens_the_circuit_immediately() {
    let alpha = MockSource::failing("alpha", Blocker::Captcha);
    let beta = MockSource::ok("beta", vec![noise_png(3)], critical_fields());
    let h = harness(
        vec![
            Arc::clone(&alpha) as Arc<dyn SourceExtractor>,
            beta as Arc<dyn SourceExtractor>,
        ],
        relaxed_circuit(),
    );

    h.orchestrator.run(&property("1 MAIN ST")).await.unwrap();
    let summary = h.orchestrator.run(&property("2 MAIN ST")).await.unwrap();
    assert_eq!(alpha.calls(), 1);
    assert_eq!(summary.skipped_blocked, vec!["alpha".to_string()]);
}

#[tokio::test]
async fn missing_critical_fields_cap_the_status_at_partial() {
    let mut sparse = BTreeMap::new();
    sparse.insert("price".to_string(), serde_json::json!(450_000));
    let alpha = MockSource::ok("alpha", vec![noise_png(4)], sparse);
    let h = harness(vec![alpha as Arc<dyn SourceExtractor>], relaxed_circuit());

    let summary = h.orchestrator.run(&property("123 MAIN ST")).await.unwrap();
    assert_eq!(summary.status, ExtractStatus::Partial);
}

#[tokio::test]
async fn all_sources_failing_is_a_failed_extraction() {
    let alpha = MockSource::failing("alpha", Blocker::Network);
    let h = harness(vec![alpha as Arc<dyn SourceExtractor>], relaxed_circuit());
    let summary = h.orchestrator.run(&property("123 MAIN ST")).await.unwrap();
    assert_eq!(summary.status, ExtractStatus::Failed);
    assert_eq!(summary.manifest.total_downloaded, 0);
}
