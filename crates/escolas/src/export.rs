use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::{DetailRecord, ListingRow, MergedRecord, RecordId};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error writing {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Leading output columns; detail columns follow in first-seen order.
pub const BASE_COLUMNS: [&str; 9] = [
    "municipio",
    "escola",
    "disciplina_funcao",
    "turno",
    "demanda",
    "suprimento",
    "vagas",
    "excessos",
    "ids",
];

/// Left-joins listing rows with detail records on record id.
///
/// Every listing row survives: a row with no matching detail (or one
/// whose detail lists nobody) is emitted once with empty detail fields,
/// and a detail listing several professionals yields one record each.
/// Details whose id matches no row are dropped.
pub fn merge(
    city: &str,
    school: &str,
    rows: &[ListingRow],
    details: &[DetailRecord],
) -> Vec<MergedRecord> {
    let by_id: HashMap<&RecordId, &DetailRecord> =
        details.iter().map(|d| (&d.record_id, d)).collect();

    for orphan in details
        .iter()
        .filter(|d| !rows.iter().any(|r| r.record_id.as_ref() == Some(&d.record_id)))
    {
        log::debug!("{} / {}: discarding orphan detail {}", city, school, orphan.record_id);
    }

    let mut merged = Vec::new();
    for row in rows {
        let entries: Vec<Vec<(String, String)>> = row
            .record_id
            .as_ref()
            .and_then(|id| by_id.get(id))
            .map(|detail| detail.entry_pairs().collect())
            .unwrap_or_default();

        let record = |detail: Vec<(String, String)>| MergedRecord {
            city: city.to_string(),
            school: school.to_string(),
            listing: row.clone(),
            detail,
        };
        if entries.is_empty() {
            merged.push(record(Vec::new()));
        } else {
            merged.extend(entries.into_iter().map(record));
        }
    }
    merged
}

/// Union of detail column names across `records`, first-seen order.
pub fn detail_columns(records: &[MergedRecord]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for (name, _) in records.iter().flat_map(|r| r.detail.iter()) {
        if !columns.contains(name) {
            columns.push(name.clone());
        }
    }
    columns
}

fn csv_row(record: &MergedRecord, detail_columns: &[String]) -> Vec<String> {
    let listing = &record.listing;
    let mut row = vec![
        record.city.clone(),
        record.school.clone(),
        listing.discipline.clone(),
        listing.shift.clone(),
        listing.demand.clone(),
        listing.supply.clone(),
        listing.vacancies.clone(),
        listing.excess.clone(),
        listing
            .record_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default(),
    ];
    row.extend(detail_columns.iter().map(|column| {
        record
            .detail
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }));
    row
}

/// Writes the header and one line per record. Returns the number of
/// records written.
pub fn write_csv<W: Write>(records: &[MergedRecord], out: W) -> Result<usize, csv::Error> {
    let columns = detail_columns(records);
    let mut writer = csv::Writer::from_writer(out);

    let header: Vec<&str> = BASE_COLUMNS
        .iter()
        .copied()
        .chain(columns.iter().map(String::as_str))
        .collect();
    writer.write_record(&header)?;
    for record in records {
        writer.write_record(csv_row(record, &columns))?;
    }
    writer.flush()?;
    Ok(records.len())
}

pub fn export_csv(records: &[MergedRecord], path: &Path) -> Result<usize, ExportError> {
    let file = File::create(path)
        .inspect_err(|e| log::error!("Cannot create {}: {e}", path.display()))
        .map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let written = write_csv(records, file).map_err(|source| ExportError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Wrote {} row(s) to {}", written, path.display());
    Ok(written)
}

/// Joins one unit's listing with its details and writes the result.
pub fn merge_and_export(
    city: &str,
    school: &str,
    rows: &[ListingRow],
    details: &[DetailRecord],
    path: &Path,
) -> Result<usize, ExportError> {
    export_csv(&merge(city, school, rows, details), path)
}
