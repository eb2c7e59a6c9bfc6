//! Runs every (city, school) unit of an input spreadsheet and writes the
//! merged output once at the end.

use std::time::Duration;

use chrono::Local;
use futures::StreamExt;
use futures::stream;

use crate::config::{MissingCityPolicy, ScrapeConfig};
use crate::detail::{DetailFetchError, extract_with_details};
use crate::export::{ExportError, export_csv, merge};
use crate::input::{
    InputError, Planned, TargetPlan, TargetRow, find_city, load_targets, resolve_targets,
};
use crate::listing::ExtractionError;
use crate::navigation::{NavigationError, Navigator, PortalUrls, fetch_city_catalog, reach_listing};
use crate::scraper::{Connect, HttpConnector, ScraperError};
use crate::types::{City, MergedRecord, RunSummary, SchoolOption, Unit, UnitReport, UnitStatus};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Input error: {0}")]
    Input(#[from] InputError),
    #[error("Portal unavailable: {0}")]
    UpstreamUnavailable(#[source] ScraperError),
    #[error("Cities not found in the portal catalog: {}", .0.join(", "))]
    UnresolvedCities(Vec<String>),
    #[error("City '{0}' not found in the portal catalog")]
    UnknownCity(String),
    #[error("Navigation failed: {0}")]
    Navigation(#[from] NavigationError),
    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
}

/// Failure confined to one unit. Reported in the summary, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("Cannot open session: {0}")]
    Connect(#[source] ScraperError),
    #[error("Navigation failed: {0}")]
    Navigation(#[from] NavigationError),
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

struct UnitOutcome {
    records: Vec<MergedRecord>,
    rows: usize,
    failures: Vec<DetailFetchError>,
}

pub struct Pipeline<C: Connect> {
    connector: C,
    urls: PortalUrls,
    config: ScrapeConfig,
}

impl Pipeline<HttpConnector> {
    pub fn from_config(config: ScrapeConfig) -> Self {
        Self::new(HttpConnector::new(config.client.clone()), config)
    }
}

impl<C: Connect> Pipeline<C> {
    pub fn new(connector: C, config: ScrapeConfig) -> Self {
        Self {
            connector,
            urls: PortalUrls::new(config.client.base_url.clone()),
            config,
        }
    }

    pub async fn fetch_catalog(&self) -> Result<Vec<City>, RunError> {
        let session = self
            .connector
            .connect()
            .map_err(RunError::UpstreamUnavailable)?;
        fetch_city_catalog(&session, &self.urls)
            .await
            .inspect_err(|e| log::error!("Cannot read the city catalog: {e}"))
            .map_err(RunError::UpstreamUnavailable)
    }

    /// Schools the portal offers under a city given by name or code.
    pub async fn list_schools(
        &self,
        city: &str,
    ) -> Result<(City, Vec<SchoolOption>), RunError> {
        let catalog = self.fetch_catalog().await?;
        let city = find_city(&catalog, city)
            .cloned()
            .ok_or_else(|| RunError::UnknownCity(city.to_string()))?;

        let session = self
            .connector
            .connect()
            .map_err(RunError::UpstreamUnavailable)?;
        let mut navigator = Navigator::open(session, self.urls.clone(), self.config.max_hops).await?;
        let schools = navigator
            .select_city(&city.code, &self.config.network_code)
            .await?
            .to_vec();
        Ok((city, schools))
    }

    pub fn load_targets(&self) -> Result<Vec<TargetRow>, RunError> {
        Ok(load_targets(&self.config.input_path, &self.config.columns)?)
    }

    /// Resolves targets against the live catalog, applying the missing-city
    /// policy.
    pub async fn plan(&self) -> Result<TargetPlan, RunError> {
        let targets = self.load_targets()?;
        let catalog = self.fetch_catalog().await?;
        let plan = resolve_targets(&catalog, targets);

        if !plan.unresolved.is_empty() && self.config.missing_city == MissingCityPolicy::Abort {
            return Err(RunError::UnresolvedCities(plan.unresolved_cities()));
        }
        Ok(plan)
    }

    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let started_at = Local::now();
        let plan = self.plan().await?;
        log::info!(
            "Processing {} unit(s) with {} job(s)",
            plan.units.len(),
            self.config.jobs
        );

        let outcomes: Vec<(UnitReport, Vec<MergedRecord>)> = stream::iter(&plan.units)
            .map(|unit| self.run_unit(unit))
            .buffered(self.config.jobs.max(1))
            .collect()
            .await;

        // Units come back in plan order, so the outcomes can be consumed
        // sequentially while walking the input rows.
        let mut outcomes = outcomes.into_iter();
        let mut units = Vec::with_capacity(plan.order.len());
        let mut records = Vec::new();
        for planned in &plan.order {
            match *planned {
                Planned::Unit(_) => {
                    if let Some((report, unit_records)) = outcomes.next() {
                        units.push(report);
                        records.extend(unit_records);
                    }
                }
                Planned::Unresolved(i) => units.push(unresolved_report(&plan.unresolved[i])),
            }
        }

        let rows_written = export_csv(&records, &self.config.output_path)?;

        Ok(RunSummary {
            started_at,
            finished_at: Local::now(),
            output_path: self.config.output_path.display().to_string(),
            rows_written,
            units,
        })
    }

    async fn run_unit(&self, unit: &Unit) -> (UnitReport, Vec<MergedRecord>) {
        log::info!("Starting {}", unit);
        let timeout = self.config.unit_timeout;
        let result = match tokio::time::timeout(timeout, self.scrape_unit(unit)).await {
            Ok(result) => result,
            Err(_) => Err(UnitError::Timeout(timeout)),
        };

        match result {
            Ok(outcome) => {
                let status = if outcome.failures.is_empty() {
                    UnitStatus::Succeeded
                } else {
                    UnitStatus::Partial
                };
                log::info!("{}: {} listing row(s), {}", unit, outcome.rows, status);
                let report = UnitReport {
                    city: unit.city.name.clone(),
                    city_code: Some(unit.city.code.clone()),
                    school: unit.school.label.clone(),
                    status,
                    rows: outcome.records.len(),
                    failed_details: outcome
                        .failures
                        .iter()
                        .map(|e| e.record_id().clone())
                        .collect(),
                    error: None,
                };
                (report, outcome.records)
            }
            Err(e) => {
                log::error!("{}: {}", unit, e);
                (UnitReport::failed(unit, &e), Vec::new())
            }
        }
    }

    async fn scrape_unit(&self, unit: &Unit) -> Result<UnitOutcome, UnitError> {
        let transport = self.connector.connect().map_err(UnitError::Connect)?;
        let session = reach_listing(
            transport,
            self.urls.clone(),
            &unit.city.code,
            &unit.school,
            &self.config.network_code,
            self.config.max_hops,
        )
        .await?;

        let listing = extract_with_details(&session, self.config.max_pages).await?;
        let records = merge(
            &unit.city.name,
            &session.school().name,
            &listing.rows,
            &listing.details,
        );

        Ok(UnitOutcome {
            records,
            rows: listing.rows.len(),
            failures: listing.failures,
        })
    }
}

fn unresolved_report(target: &TargetRow) -> UnitReport {
    UnitReport {
        city: target.city.clone(),
        city_code: None,
        school: target.school.clone(),
        status: UnitStatus::Failed,
        rows: 0,
        failed_details: Vec::new(),
        error: Some("city not found in the portal catalog".to_string()),
    }
}
