//! Durable state backing the pipeline: work items, enrichment records, and
//! the address-to-folder lookup.
//!
//! Every document goes to disk through the same discipline: serialize to
//! `<path>.tmp`, keep the previous version as `<path>.bak`, then atomically
//! rename into place. Reads fall back to the backup when the primary is
//! unreadable; losing both is fatal for the whole batch.

pub mod atomic;
pub mod enrichment;
pub mod folders;
pub mod work_items;

pub use atomic::{read_document, write_document};
pub use enrichment::{ApplyStats, EnrichmentStore, FieldOutcome};
pub use folders::FolderLookup;
pub use work_items::{LockInfo, WorkItem, WorkItemStore};
