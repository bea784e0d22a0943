//! Roster CSV input and ranked CSV output. Both directions are streamed
//! row by row; the ranked dataset is never held in memory as strings.

use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use serde::Deserialize;
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::model::{normalize_address, EnrichmentRecord, Property};

const RANKED_HEADER: &[&str] = &[
    "street",
    "city",
    "state",
    "zip",
    "price",
    "price_num",
    "beds",
    "baths",
    "sqft",
    "price_per_sqft",
    "full_address",
    "kill_switch_verdict",
    "kill_switch_severity",
    "total_score",
    "score_section_a",
    "score_section_b",
    "score_section_c",
    "tier",
    "defaults_used",
    "data_quality",
];

#[derive(Debug, Deserialize)]
struct RosterRow {
    street: String,
    city: String,
    state: String,
    zip: String,
    price: String,
    price_num: Option<f64>,
    beds: Option<u32>,
    baths: Option<f64>,
    sqft: Option<f64>,
    price_per_sqft: Option<f64>,
    full_address: String,
}

/// Reads the property roster. The `full_address` column is the primary
/// key; rows without one are dropped with a warning. A missing file is
/// fatal for the run.
pub fn read_properties(path: &Path) -> Result<Vec<Property>> {
    if !path.exists() {
        return Err(PipelineError::CorruptState(format!(
            "properties CSV {} missing",
            path.display()
        )));
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut properties = Vec::new();
    for (line, row) in reader.deserialize::<RosterRow>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                warn!(line = line + 2, %err, "unparsable roster row dropped");
                continue;
            }
        };
        if row.full_address.trim().is_empty() {
            warn!(line = line + 2, "roster row without full_address dropped");
            continue;
        }
        properties.push(Property {
            full_address: normalize_address(&row.full_address),
            street: row.street,
            city: row.city,
            state: row.state,
            zip: row.zip,
            price: row.price,
            price_num: row.price_num,
            beds: row.beds,
            baths: row.baths,
            sqft: row.sqft,
            price_per_sqft: row.price_per_sqft,
        });
    }
    Ok(properties)
}

fn opt_num(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes the ranked CSV: the roster columns plus verdict, severity,
/// scores, tier, and data-quality columns.
pub fn write_ranked<'a>(
    path: &Path,
    entries: impl IntoIterator<Item = (&'a Property, &'a EnrichmentRecord)>,
) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(RANKED_HEADER)?;
    let mut rows = 0usize;
    for (property, record) in entries {
        let row = [
            property.street.clone(),
            property.city.clone(),
            property.state.clone(),
            property.zip.clone(),
            property.price.clone(),
            opt_num(property.price_num),
            property.beds.map(|b| b.to_string()).unwrap_or_default(),
            opt_num(property.baths),
            opt_num(property.sqft),
            opt_num(property.price_per_sqft),
            property.full_address.clone(),
            record
                .kill_switch_verdict
                .map(|v| v.as_str().to_string())
                .unwrap_or_default(),
            opt_num(record.kill_switch_severity),
            opt_num(record.total_score),
            opt_num(record.score_section_a),
            opt_num(record.score_section_b),
            opt_num(record.score_section_c),
            record
                .tier
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            record
                .defaults_used
                .map(|d| d.to_string())
                .unwrap_or_default(),
            opt_num(record.data_quality),
        ];
        writer.write_record(&row)?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}
