#![allow(missing_docs)]

//! Full-pipeline behavior over mock collaborators: checkpointed resume
//! after a process restart, retry exhaustion, lock contention, and
//! idempotent re-runs.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use casita::collab::{CountyRecords, MapService, ReportSink, VisualAssessor};
use casita::config::PipelineConfig;
use casita::error::{PipelineError, Result};
use casita::extract::{ExtractOutcome, FetchedImage, SourceExtractor};
use casita::imaging::lsh::HashIndex;
use casita::model::{EnrichmentRecord, PhaseId, PhaseStatus, Property, SourceTier, Tier};
use casita::phases::runner::Collaborators;
use casita::phases::RunMode;
use casita::pipeline::Pipeline;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use tempfile::TempDir;

fn test_config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.data_dir = dir.join("state");
    config.images_dir = dir.join("processed");
    config.reports_dir = dir.join("reports");
    config.concurrency = 2;
    config
}

fn property(address: &str) -> Property {
    Property {
        full_address: address.to_string(),
        street: "4226 E Wood St".to_string(),
        city: "Phoenix".to_string(),
        state: "AZ".to_string(),
        zip: "85040".to_string(),
        price: "$450,000".to_string(),
        price_num: Some(450_000.0),
        beds: Some(4),
        baths: Some(2.5),
        sqft: Some(1_700.0),
        price_per_sqft: Some(264.7),
    }
}

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

#[derive(Default)]
struct MockCounty {
    calls: AtomicU32,
}

#[async_trait]
impl CountyRecords for MockCounty {
    async fn lookup(&self, _property: &Property) -> Result<BTreeMap<String, Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut fields = BTreeMap::new();
        fields.insert("lot_sqft".to_string(), json!(9_000.0));
        fields.insert("year_built".to_string(), json!(1999));
        fields.insert("garage_spaces".to_string(), json!(2));
        fields.insert("has_pool".to_string(), json!(false));
        fields.insert("livable_sqft".to_string(), json!(1_650.0));
        Ok(fields)
    }
}

struct MockMap;

#[async_trait]
impl MapService for MockMap {
    async fn enrich(&self, _property: &Property) -> Result<BTreeMap<String, Value>> {
        let mut fields = BTreeMap::new();
        fields.insert("school_rating".to_string(), json!(8.0));
        fields.insert("distance_to_grocery_miles".to_string(), json!(0.8));
        fields.insert("distance_to_highway_miles".to_string(), json!(2.2));
        fields.insert("orientation".to_string(), json!("N"));
        fields.insert("safety_score".to_string(), json!(7.0));
        fields.insert("walk_score".to_string(), json!(62.0));
        fields.insert("commute_minutes".to_string(), json!(24.0));
        Ok(fields)
    }
}

/// Visual assessor that always fails; the resume tests use it so P2A keeps
/// retrying while everything else completes.
struct BrokenVisual;

#[async_trait]
impl VisualAssessor for BrokenVisual {
    async fn assess_exterior(
        &self,
        _property: &Property,
        _images_dir: &Path,
    ) -> Result<BTreeMap<String, Value>> {
        Err(PipelineError::Http("assessor backend down".to_string()))
    }

    async fn assess_interior(
        &self,
        _property: &Property,
        _images_dir: &Path,
    ) -> Result<BTreeMap<String, Value>> {
        Err(PipelineError::Http("assessor backend down".to_string()))
    }
}

#[derive(Default)]
struct MockReport {
    emits: AtomicU32,
}

#[async_trait]
impl ReportSink for MockReport {
    async fn emit(&self, _record: &EnrichmentRecord) -> Result<()> {
        self.emits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockListing {
    calls: AtomicU32,
}

#[async_trait]
impl SourceExtractor for MockListing {
    fn name(&self) -> &'static str {
        "listing"
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Listing
    }

    async fn extract(&self, _property: &Property) -> ExtractOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let images = (0..2)
            .map(|i| FetchedImage {
                url: format!("https://example.test/{i}.jpg"),
                bytes: noise_png(100 + i),
            })
            .collect();
        let mut fields = BTreeMap::new();
        fields.insert("price".to_string(), json!(450_000.0));
        fields.insert("beds".to_string(), json!(4));
        fields.insert("baths".to_string(), json!(2.5));
        fields.insert("sqft".to_string(), json!(1_700.0));
        fields.insert("hoa_fee".to_string(), json!(0.0));
        fields.insert("sewer_type".to_string(), json!("city"));
        ExtractOutcome::with_results(images, fields)
    }
}

struct Mocks {
    county: Arc<MockCounty>,
    report: Arc<MockReport>,
    listing: Arc<MockListing>,
}

fn open_pipeline(config: &PipelineConfig) -> (Pipeline, Mocks) {
    let county = Arc::new(MockCounty::default());
    let report = Arc::new(MockReport::default());
    let listing = Arc::new(MockListing { calls: AtomicU32::new(0) });
    let collaborators = Collaborators {
        county: Arc::clone(&county) as Arc<dyn CountyRecords>,
        map: Arc::new(MockMap),
        visual: Arc::new(BrokenVisual),
        report: Arc::clone(&report) as Arc<dyn ReportSink>,
    };
    let pipeline = Pipeline::assemble(
        config.clone(),
        collaborators,
        vec![Arc::clone(&listing) as Arc<dyn SourceExtractor>],
        Arc::new(Mutex::new(HashIndex::new(8, 8))),
    )
    .expect("pipeline");
    (pipeline, Mocks { county, report, listing })
}

#[tokio::test]
async fn restart_resumes_without_rerunning_complete_phases() {
    let dir = TempDir::new().expect("tmpdir");
    let config = test_config(dir.path());
    let prop = property("4226 E WOOD ST, PHOENIX, AZ 85040");

    let first_records;
    {
        let (pipeline, mocks) = open_pipeline(&config);
        let summary = pipeline
            .run_batch(vec![prop.clone()], RunMode::Lenient, Vec::new(), None)
            .await
            .unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(mocks.county.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mocks.listing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mocks.report.emits.load(Ordering::SeqCst), 1);

        let item = pipeline.work_items().item(&prop.full_address).unwrap();
        assert_eq!(item.status(PhaseId::P0County), PhaseStatus::Complete);
        assert_eq!(item.status(PhaseId::P1Listing), PhaseStatus::Complete);
        assert_eq!(item.status(PhaseId::P1Map), PhaseStatus::Complete);
        assert_eq!(item.status(PhaseId::P2AExterior), PhaseStatus::Failed);
        assert_eq!(item.status(PhaseId::P2BInterior), PhaseStatus::Skipped);
        assert_eq!(item.status(PhaseId::P3Synthesis), PhaseStatus::Complete);
        assert_eq!(item.status(PhaseId::P4Report), PhaseStatus::Complete);
        first_records = pipeline.enrichment().records();
    }

    // Fresh process over the same state: only the failed phase retries.
    let (pipeline, mocks) = open_pipeline(&config);
    pipeline
        .run_batch(vec![prop.clone()], RunMode::Lenient, Vec::new(), None)
        .await
        .unwrap();
    assert_eq!(mocks.county.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.listing.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.report.emits.load(Ordering::SeqCst), 0);
    let item = pipeline.work_items().item(&prop.full_address).unwrap();
    assert_eq!(item.retry_count(PhaseId::P2AExterior), 2);

    // Derived outputs are unchanged modulo provenance timestamps.
    let again = pipeline.enrichment().records();
    assert_eq!(again.len(), first_records.len());
    assert_eq!(again[0].tier, first_records[0].tier);
    assert_eq!(again[0].total_score, first_records[0].total_score);
}

#[tokio::test]
async fn third_failure_parks_the_phase_permanently() {
    let dir = TempDir::new().expect("tmpdir");
    let config = test_config(dir.path());
    let prop = property("17834 N 42ND PL, PHOENIX, AZ 85032");

    for _ in 0..3 {
        let (pipeline, _mocks) = open_pipeline(&config);
        pipeline
            .run_batch(vec![prop.clone()], RunMode::Lenient, Vec::new(), None)
            .await
            .unwrap();
    }
    let (pipeline, _mocks) = open_pipeline(&config);
    let summary = pipeline
        .run_batch(vec![prop.clone()], RunMode::Lenient, Vec::new(), None)
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    let item = pipeline.work_items().item(&prop.full_address).unwrap();
    assert_eq!(item.retry_count(PhaseId::P2AExterior), 3);
    assert_eq!(item.status(PhaseId::P2AExterior), PhaseStatus::Skipped);
}

#[tokio::test]
async fn locked_property_is_left_alone() {
    let dir = TempDir::new().expect("tmpdir");
    let config = test_config(dir.path());
    let prop = property("1 CONTESTED LN, PHOENIX, AZ 85000");

    let (pipeline, mocks) = open_pipeline(&config);
    assert!(pipeline
        .work_items()
        .acquire(&prop.full_address, "another-worker")
        .unwrap());

    let summary = pipeline
        .run_batch(vec![prop.clone()], RunMode::Lenient, Vec::new(), None)
        .await
        .unwrap();
    assert_eq!(summary.skipped_locked, 1);
    assert_eq!(summary.completed, 0);
    assert_eq!(mocks.county.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn synthesis_only_runs_with_its_prerequisites() {
    let dir = TempDir::new().expect("tmpdir");
    let config = test_config(dir.path());
    let prop = property("2 PREREQ WAY, PHOENIX, AZ 85001");

    let (pipeline, _mocks) = open_pipeline(&config);
    // Skipping the county phase starves synthesis of its prerequisite.
    let summary = pipeline
        .run_batch(
            vec![prop.clone()],
            RunMode::Lenient,
            vec![PhaseId::P0County],
            None,
        )
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    let item = pipeline.work_items().item(&prop.full_address).unwrap();
    assert_eq!(item.status(PhaseId::P0County), PhaseStatus::Skipped);
    assert_eq!(item.status(PhaseId::P3Synthesis), PhaseStatus::Skipped);
    assert_eq!(item.status(PhaseId::P4Report), PhaseStatus::Skipped);
    assert!(pipeline.enrichment().get(&prop.full_address).unwrap().tier.is_none());
}

#[tokio::test]
async fn completed_run_produces_a_ranked_tier() {
    let dir = TempDir::new().expect("tmpdir");
    let config = test_config(dir.path());
    let prop = property("3 RANKED CT, PHOENIX, AZ 85002");

    let (pipeline, _mocks) = open_pipeline(&config);
    let summary = pipeline
        .run_batch(vec![prop.clone()], RunMode::Lenient, Vec::new(), None)
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);

    let record = pipeline.enrichment().get(&prop.full_address).unwrap();
    assert_eq!(record.kill_switch_verdict, Some(casita::model::Verdict::Pass));
    assert!(record.total_score.is_some());
    assert!(matches!(
        record.tier,
        Some(Tier::Unicorn | Tier::Contender | Tier::Pass)
    ));
    assert_eq!(summary.tiers.values().sum::<u32>(), 1);

    let entries = pipeline.ranked_entries(&[prop], false);
    assert_eq!(entries.len(), 1);
    let ranked_path = pipeline.write_ranked_csv(&entries).unwrap();
    let contents = std::fs::read_to_string(ranked_path).unwrap();
    assert_eq!(contents.lines().count(), 2);
}
