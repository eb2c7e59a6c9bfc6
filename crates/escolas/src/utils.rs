use crate::types::{RunSummary, UnitStatus};

/// Folds a city or school name into the key used to match spreadsheet
/// entries against portal options: lower-case, Portuguese diacritics
/// stripped, whitespace and punctuation removed.
pub fn normalize_name(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(fold_diacritic)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug)]
pub struct RunStats {
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub rows_written: usize,
}

impl RunStats {
    pub fn from_summary(summary: &RunSummary) -> RunStats {
        RunStats {
            succeeded: summary.count(UnitStatus::Succeeded),
            partial: summary.count(UnitStatus::Partial),
            failed: summary.count(UnitStatus::Failed),
            rows_written: summary.rows_written,
        }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.partial + self.failed
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nSummary:")?;
        writeln!(f, "  Units attempted:          {}", self.attempted())?;
        writeln!(f, "  Succeeded:                {}", self.succeeded)?;
        writeln!(f, "  Missing detail records:   {}", self.partial)?;
        writeln!(f, "  Failed:                   {}", self.failed)?;
        writeln!(f, "  Rows written:             {}", self.rows_written)
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Run {} -> {} ({})",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.finished_at.format("%H:%M:%S"),
            self.output_path
        )?;
        for (i, unit) in self.units.iter().enumerate() {
            writeln!(f, "{:>3}. {}", i + 1, unit)?;
        }
        write!(f, "{}", RunStats::from_summary(self))
    }
}
