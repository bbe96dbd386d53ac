//! Output artifact serialization and atomic file replacement

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use atlas_core::OutputRecord;
use chrono::NaiveDate;
use serde::Serialize;

use crate::config::ArtifactLayout;
use crate::error::Result;

#[derive(Serialize)]
struct FlatArtifact<'a> {
    data: &'a [OutputRecord],
}

#[derive(Serialize)]
struct DatedArtifact<'a> {
    frames: Vec<DatedFrame<'a>>,
}

#[derive(Serialize)]
struct DatedFrame<'a> {
    date: NaiveDate,
    entities: Vec<EntityPoint<'a>>,
}

#[derive(Serialize)]
struct EntityPoint<'a> {
    #[serde(rename = "ticker")]
    entity_id: &'a str,
    x: f64,
    y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    headline: Option<&'a str>,
    #[serde(flatten)]
    attributes: &'a BTreeMap<String, f64>,
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Serialize records in the requested layout, coordinates rounded
pub fn render(records: &[OutputRecord], layout: ArtifactLayout, decimals: u32) -> Result<Vec<u8>> {
    let rounded: Vec<OutputRecord> = records
        .iter()
        .map(|record| OutputRecord {
            x: round_to(record.x, decimals),
            y: round_to(record.y, decimals),
            ..record.clone()
        })
        .collect();

    let bytes = match layout {
        ArtifactLayout::Flat => serde_json::to_vec(&FlatArtifact { data: &rounded })?,
        ArtifactLayout::ByDate => {
            let mut frames: Vec<DatedFrame> = Vec::new();
            for record in &rounded {
                let point = EntityPoint {
                    entity_id: &record.entity_id,
                    x: record.x,
                    y: record.y,
                    headline: record.headline.as_deref(),
                    attributes: &record.attributes,
                };
                match frames.last_mut() {
                    Some(frame) if frame.date == record.date => frame.entities.push(point),
                    _ => frames.push(DatedFrame {
                        date: record.date,
                        entities: vec![point],
                    }),
                }
            }
            serde_json::to_vec(&DatedArtifact { frames })?
        }
    };
    Ok(bytes)
}

/// Write the artifact so readers never observe a half-written file
pub fn write_artifact(
    path: &Path,
    records: &[OutputRecord],
    layout: ArtifactLayout,
    decimals: u32,
) -> Result<()> {
    let bytes = render(records, layout, decimals)?;
    write_atomic(path, &bytes)?;

    tracing::info!(
        path = %path.display(),
        records = records.len(),
        bytes = bytes.len(),
        ?layout,
        "Artifact written"
    );
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
