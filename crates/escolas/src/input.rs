//! Reads the target spreadsheet and resolves its rows against the live city
//! catalog.

use std::path::{Path, PathBuf};

use calamine::{Data, Reader, open_workbook_auto};

use crate::config::InputColumns;
use crate::types::{City, SchoolTarget, Unit};
use crate::utils::normalize_name;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Invalid spreadsheet {path}: {source}")]
    Spreadsheet {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("Spreadsheet {0} has no sheet")]
    NoSheet(PathBuf),
    #[error("Column '{column}' not found (available: {available:?})")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(PathBuf),
}

/// First sheet of the input, header row split from the data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn column(&self, name: &str) -> Result<usize, InputError> {
        self.headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| InputError::MissingColumn {
                column: name.to_string(),
                available: self.headers.clone(),
            })
    }

    fn from_rows(mut rows: Vec<Vec<String>>) -> Self {
        let headers = if rows.is_empty() {
            Vec::new()
        } else {
            rows.remove(0)
        };
        Self { headers, rows }
    }
}

pub fn read_sheet(path: &Path) -> Result<Sheet, InputError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("csv") => read_csv(path),
        Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => read_workbook(path),
        _ => Err(InputError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn read_csv(path: &Path) -> Result<Sheet, InputError> {
    let csv_err = |source| InputError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Sheet::from_rows(rows))
}

fn read_workbook(path: &Path) -> Result<Sheet, InputError> {
    let spreadsheet_err = |source| InputError::Spreadsheet {
        path: path.to_path_buf(),
        source,
    };
    let mut workbook = open_workbook_auto(path).map_err(spreadsheet_err)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| InputError::NoSheet(path.to_path_buf()))?
        .map_err(spreadsheet_err)?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    Ok(Sheet::from_rows(rows))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// A (city, school) pair as written in the spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRow {
    pub city: String,
    pub school: String,
}

/// Target rows in sheet order. Rows with a blank city or school are
/// skipped; repeated pairs keep their first occurrence.
pub fn targets_from_sheet(sheet: &Sheet, columns: &InputColumns) -> Result<Vec<TargetRow>, InputError> {
    let city_col = sheet.column(&columns.city)?;
    let school_col = sheet.column(&columns.school)?;

    let mut seen: Vec<(String, String)> = Vec::new();
    let mut targets = Vec::new();
    for (line, row) in sheet.rows.iter().enumerate() {
        let cell = |i: usize| row.get(i).map(|c| c.trim()).unwrap_or_default();
        let (city, school) = (cell(city_col), cell(school_col));
        if city.is_empty() || school.is_empty() {
            log::debug!("Skipping row {}: blank city or school", line + 2);
            continue;
        }
        let key = (normalize_name(city), normalize_name(school));
        if seen.contains(&key) {
            log::debug!("Skipping row {}: duplicate of {} / {}", line + 2, city, school);
            continue;
        }
        seen.push(key);
        targets.push(TargetRow {
            city: city.to_string(),
            school: school.to_string(),
        });
    }
    Ok(targets)
}

pub fn load_targets(path: &Path, columns: &InputColumns) -> Result<Vec<TargetRow>, InputError> {
    let sheet = read_sheet(path)?;
    let targets = targets_from_sheet(&sheet, columns)?;
    log::info!("Loaded {} target(s) from {}", targets.len(), path.display());
    Ok(targets)
}

/// Finds a city in the catalog by code or by normalised name.
pub fn find_city<'a>(catalog: &'a [City], reference: &str) -> Option<&'a City> {
    let key = normalize_name(reference);
    catalog
        .iter()
        .find(|c| c.code.as_str() == reference.trim())
        .or_else(|| catalog.iter().find(|c| c.key() == key))
}

/// Position of one input row in a [`TargetPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Planned {
    Unit(usize),
    Unresolved(usize),
}

/// Targets split into runnable units and rows whose city the catalog does
/// not list. `order` keeps the input row order across both lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlan {
    pub units: Vec<Unit>,
    pub unresolved: Vec<TargetRow>,
    pub order: Vec<Planned>,
}

impl TargetPlan {
    /// Distinct city names that could not be resolved.
    pub fn unresolved_cities(&self) -> Vec<String> {
        let mut cities: Vec<String> = Vec::new();
        for target in &self.unresolved {
            if !cities.contains(&target.city) {
                cities.push(target.city.clone());
            }
        }
        cities
    }
}

pub fn resolve_targets(catalog: &[City], targets: Vec<TargetRow>) -> TargetPlan {
    let mut units = Vec::new();
    let mut unresolved = Vec::new();
    let mut order = Vec::with_capacity(targets.len());
    for target in targets {
        match find_city(catalog, &target.city) {
            Some(city) => {
                order.push(Planned::Unit(units.len()));
                units.push(Unit {
                    city: city.clone(),
                    school: SchoolTarget::new(target.school),
                });
            }
            None => {
                order.push(Planned::Unresolved(unresolved.len()));
                log::warn!(
                    "City '{}' (school '{}') is not in the portal catalog",
                    target.city,
                    target.school
                );
                unresolved.push(target);
            }
        }
    }
    TargetPlan {
        units,
        unresolved,
        order,
    }
}
