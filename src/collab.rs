//! Interfaces to the external collaborators the pipeline drives but does
//! not implement: county records, the map service, the vision-based
//! interior/exterior assessor, and the per-property report sink.
//!
//! Collaborators return plain field maps; the enrichment store owns typing
//! and precedence. Production wiring supplies real clients; tests supply
//! mocks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::imaging::manifest::address_hash;
use crate::model::{EnrichmentRecord, Property};
use crate::store::atomic;

#[async_trait]
pub trait CountyRecords: Send + Sync {
    /// Authoritative parcel data for the property.
    async fn lookup(&self, property: &Property) -> Result<BTreeMap<String, Value>>;
}

#[async_trait]
pub trait MapService: Send + Sync {
    /// Distances, commute, orientation, and neighborhood scores.
    async fn enrich(&self, property: &Property) -> Result<BTreeMap<String, Value>>;
}

#[async_trait]
pub trait VisualAssessor: Send + Sync {
    async fn assess_exterior(
        &self,
        property: &Property,
        images_dir: &Path,
    ) -> Result<BTreeMap<String, Value>>;

    /// The seven 1-10 interior scores.
    async fn assess_interior(
        &self,
        property: &Property,
        images_dir: &Path,
    ) -> Result<BTreeMap<String, Value>>;
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn emit(&self, record: &EnrichmentRecord) -> Result<()>;
}

/// Stand-in for a collaborator that is not wired up in this deployment.
/// Phases depending on it fail and are skipped or aborted per run mode.
pub struct Unconfigured(pub &'static str);

#[async_trait]
impl CountyRecords for Unconfigured {
    async fn lookup(&self, _property: &Property) -> Result<BTreeMap<String, Value>> {
        Err(PipelineError::NotConfigured(self.0))
    }
}

#[async_trait]
impl MapService for Unconfigured {
    async fn enrich(&self, _property: &Property) -> Result<BTreeMap<String, Value>> {
        Err(PipelineError::NotConfigured(self.0))
    }
}

#[async_trait]
impl VisualAssessor for Unconfigured {
    async fn assess_exterior(
        &self,
        _property: &Property,
        _images_dir: &Path,
    ) -> Result<BTreeMap<String, Value>> {
        Err(PipelineError::NotConfigured(self.0))
    }

    async fn assess_interior(
        &self,
        _property: &Property,
        _images_dir: &Path,
    ) -> Result<BTreeMap<String, Value>> {
        Err(PipelineError::NotConfigured(self.0))
    }
}

/// Default report sink: one JSON summary per property under the reports
/// directory, named by the address digest.
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(dir: PathBuf) -> Self {
        JsonReportSink { dir }
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    async fn emit(&self, record: &EnrichmentRecord) -> Result<()> {
        let path = self
            .dir
            .join(format!("{}.json", address_hash(&record.address)));
        atomic::write_document(&path, record)
    }
}
