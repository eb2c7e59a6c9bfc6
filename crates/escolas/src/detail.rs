use crate::listing::{ExtractionError, ListingPager};
use crate::navigation::ListingSession;
use crate::parser::{self, ParseError};
use crate::scraper::{ScraperError, Transport, partial_form};
use crate::types::{DetailRecord, ListingRow, RecordId};

#[derive(Debug, thiserror::Error)]
pub enum DetailFetchError {
    #[error("Detail request for {id} failed: {source}")]
    Transport {
        id: RecordId,
        #[source]
        source: ScraperError,
    },
    #[error("Detail for {id} could not be read: {source}")]
    Parse {
        id: RecordId,
        #[source]
        source: ParseError,
    },
}

impl DetailFetchError {
    pub fn record_id(&self) -> &RecordId {
        match self {
            DetailFetchError::Transport { id, .. } | DetailFetchError::Parse { id, .. } => id,
        }
    }
}

/// Opens the details of one listing row and reads the professionals table.
/// The row must be on the page the listing currently shows: the portal
/// only decodes controls of its current page. The request only reads; the
/// same id can be fetched again.
pub async fn fetch_detail<T: Transport>(
    session: &ListingSession<T>,
    id: &RecordId,
) -> Result<DetailRecord, DetailFetchError> {
    let form_data = session.form();
    let panel = form_data.detail_panel_id.as_str();
    let form = partial_form(
        &[
            ("javax.faces.partial.ajax", "true"),
            ("javax.faces.source", id.as_str()),
            ("primefaces.ignoreautoupdate", "true"),
            ("javax.faces.partial.execute", "@all"),
            ("javax.faces.partial.render", panel),
            (id.as_str(), id.as_str()),
        ],
        &form_data.fields,
    );

    log::debug!(
        "{} / {}: fetching detail {}",
        session.city(),
        session.school(),
        id
    );
    let xml = session
        .transport()
        .post_form(session.url(), &form, true)
        .await
        .map_err(|source| DetailFetchError::Transport {
            id: id.clone(),
            source,
        })?;

    let parse_err = |source| DetailFetchError::Parse {
        id: id.clone(),
        source,
    };
    let partial = parser::parse_partial_response(&xml).map_err(parse_err)?;
    let fragment = partial
        .update(panel)
        .ok_or_else(|| parse_err(ParseError::MissingField(format!("{panel} update"))))?;
    let table = parser::parse_detail_table(fragment).map_err(parse_err)?;

    Ok(DetailRecord {
        record_id: id.clone(),
        columns: table.columns,
        entries: table.entries,
    })
}

/// Distinct record ids of a listing, in first-seen order.
pub fn distinct_ids(rows: &[ListingRow]) -> Vec<RecordId> {
    let mut ids: Vec<RecordId> = Vec::new();
    for id in rows.iter().filter_map(|r| r.record_id.as_ref()) {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids
}

/// Fetches the detail of every distinct id of one listing page, one request
/// at a time, skipping ids in `done`. Failed ids are logged and returned
/// apart so the unit can still be exported.
pub async fn fetch_details<T: Transport>(
    session: &ListingSession<T>,
    rows: &[ListingRow],
    done: &[RecordId],
) -> (Vec<DetailRecord>, Vec<DetailFetchError>) {
    let mut records = Vec::new();
    let mut failures = Vec::new();
    for id in distinct_ids(rows).into_iter().filter(|id| !done.contains(id)) {
        match fetch_detail(session, &id).await {
            Ok(record) => records.push(record),
            Err(e) => {
                log::warn!(
                    "{} / {}: detail {} skipped: {}",
                    session.city(),
                    session.school(),
                    id,
                    e
                );
                failures.push(e);
            }
        }
    }
    (records, failures)
}

/// Listing rows together with the details fetched for them.
#[derive(Debug, Default)]
pub struct EnrichedListing {
    pub rows: Vec<ListingRow>,
    pub details: Vec<DetailRecord>,
    pub failures: Vec<DetailFetchError>,
}

/// Walks the listing and opens the details of each page's rows before
/// moving to the next page.
pub async fn extract_with_details<T: Transport>(
    session: &ListingSession<T>,
    max_pages: Option<u32>,
) -> Result<EnrichedListing, ExtractionError> {
    let mut pager = ListingPager::new(session, max_pages)?;
    let mut listing = EnrichedListing::default();
    let mut done: Vec<RecordId> = Vec::new();

    while let Some(page) = pager.next_page().await {
        let page = page?;
        let (details, failures) = fetch_details(session, &page, &done).await;
        done.extend(details.iter().map(|d| d.record_id.clone()));
        done.extend(failures.iter().map(|e| e.record_id().clone()));
        listing.details.extend(details);
        listing.failures.extend(failures);
        listing.rows.extend(page);
    }

    log::info!(
        "{} / {}: {} listing row(s), {} detail(s), {} failed ({:?})",
        session.city(),
        session.school(),
        listing.rows.len(),
        listing.details.len(),
        listing.failures.len(),
        pager.stop_reason()
    );
    Ok(listing)
}
