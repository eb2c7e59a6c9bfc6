use std::fmt::Display;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::utils::normalize_name;

macro_rules! code_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

code_type!(
    /// Municipality code as exposed by the portal's city catalog.
    CityCode
);
code_type!(
    /// Establishment code, scoped to a [`CityCode`].
    SchoolCode
);
code_type!(
    /// Id of the details control embedded in a listing row.
    RecordId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub code: CityCode,
    pub name: String,
}

impl City {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: CityCode::new(code),
            name: name.into(),
        }
    }

    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }
}

impl Display for City {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

/// A school as offered by the portal under a selected city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolOption {
    pub code: SchoolCode,
    pub name: String,
}

impl SchoolOption {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: SchoolCode::new(code),
            name: name.into(),
        }
    }

    /// Matches a spreadsheet reference either as a literal code or by
    /// normalised name.
    pub fn matches(&self, target: &SchoolTarget) -> bool {
        self.code.as_str() == target.label.trim() || normalize_name(&self.name) == target.key
    }
}

impl Display for SchoolOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

/// A school as written in the input spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolTarget {
    pub label: String,
    pub key: String,
}

impl SchoolTarget {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let key = normalize_name(&label);
        Self { label, key }
    }
}

/// One (city, school) pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub city: City,
    pub school: SchoolTarget,
}

impl Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.city, self.school.label)
    }
}

/// One row of the demand/supply grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRow {
    pub record_id: Option<RecordId>,
    pub discipline: String,
    pub shift: String,
    pub demand: String,
    pub supply: String,
    pub vacancies: String,
    pub excess: String,
}

/// Professionals listed behind one listing row's details control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub record_id: RecordId,
    pub columns: Vec<String>,
    pub entries: Vec<Vec<String>>,
}

impl DetailRecord {
    pub fn entry_pairs(&self) -> impl Iterator<Item = Vec<(String, String)>> + '_ {
        self.entries.iter().map(|entry| {
            self.columns
                .iter()
                .cloned()
                .zip(entry.iter().cloned())
                .collect()
        })
    }
}

/// A listing row joined with at most one detail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub city: String,
    pub school: String,
    pub listing: ListingRow,
    /// Column/value pairs from the detail table; empty when no detail matched.
    pub detail: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded,
    Partial,
    Failed,
}

impl Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            UnitStatus::Succeeded => "ok",
            UnitStatus::Partial => "partial",
            UnitStatus::Failed => "failed",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub city: String,
    pub city_code: Option<CityCode>,
    pub school: String,
    pub status: UnitStatus,
    pub rows: usize,
    pub failed_details: Vec<RecordId>,
    pub error: Option<String>,
}

impl UnitReport {
    pub fn failed(unit: &Unit, error: impl Display) -> Self {
        Self {
            city: unit.city.name.clone(),
            city_code: Some(unit.city.code.clone()),
            school: unit.school.label.clone(),
            status: UnitStatus::Failed,
            rows: 0,
            failed_details: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

impl Display for UnitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:<7}] {} / {}: {} row(s)",
            self.status, self.city, self.school, self.rows
        )?;
        if !self.failed_details.is_empty() {
            write!(f, ", {} detail(s) missing", self.failed_details.len())?;
        }
        if let Some(error) = &self.error {
            write!(f, " - {}", error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub output_path: String,
    pub rows_written: usize,
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }
}
