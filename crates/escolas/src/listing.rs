use crate::navigation::ListingSession;
use crate::parser::{self, ParseError, Paginator};
use crate::scraper::{ScraperError, Transport, partial_form};
use crate::types::ListingRow;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] ScraperError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Why a listing stopped yielding pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The paginator has no page left.
    NoMorePages,
    /// A page came back without rows.
    EmptyPage,
    /// A page repeated the previous page's rows.
    RepeatedPage,
    /// The configured page limit was reached.
    PageLimit,
}

/// Decides, before fetching page `index`, whether the listing is over.
pub fn stop_before(index: u32, page_count: u32, max_pages: Option<u32>) -> Option<StopReason> {
    if index >= page_count {
        return Some(StopReason::NoMorePages);
    }
    if max_pages.is_some_and(|max| index >= max) {
        return Some(StopReason::PageLimit);
    }
    None
}

/// Decides, after fetching a page, whether its rows end the listing.
pub fn stop_after(rows: &[ListingRow], previous: Option<&[ListingRow]>) -> Option<StopReason> {
    if rows.is_empty() {
        return Some(StopReason::EmptyPage);
    }
    if previous.is_some_and(|prev| prev == rows) {
        return Some(StopReason::RepeatedPage);
    }
    None
}

/// Walks the pages of a listing one request at a time. Pages come out in
/// portal order and the pager cannot be rewound.
pub struct ListingPager<'a, T: Transport> {
    session: &'a ListingSession<T>,
    first: Option<Vec<ListingRow>>,
    table_id: Option<String>,
    paginator: Option<Paginator>,
    index: u32,
    previous: Option<Vec<ListingRow>>,
    max_pages: Option<u32>,
    stopped: Option<StopReason>,
    failed: bool,
}

impl<'a, T: Transport> ListingPager<'a, T> {
    /// Parses the first page already held by the session, checking the
    /// grid's column layout.
    pub fn new(
        session: &'a ListingSession<T>,
        max_pages: Option<u32>,
    ) -> Result<Self, ExtractionError> {
        let page = parser::parse_listing_page(session.html())?;
        log::debug!(
            "Listing {:?} with paginator {:?}",
            page.table_id,
            page.paginator
        );
        Ok(Self {
            session,
            first: Some(page.rows),
            table_id: page.table_id,
            paginator: page.paginator,
            index: 0,
            previous: None,
            max_pages,
            stopped: None,
            failed: false,
        })
    }

    pub fn page_count(&self) -> u32 {
        self.paginator.map_or(1, |p| p.page_count)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    /// The next page of rows, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Option<Result<Vec<ListingRow>, ExtractionError>> {
        if self.stopped.is_some() || self.failed {
            return None;
        }
        if let Some(reason) = stop_before(self.index, self.page_count(), self.max_pages) {
            return self.stop(reason);
        }

        let rows = match self.first.take() {
            Some(rows) => rows,
            None => match self.fetch_page(self.index).await {
                Ok(rows) => rows,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            },
        };

        if let Some(reason) = stop_after(&rows, self.previous.as_deref()) {
            return self.stop(reason);
        }
        self.index += 1;
        self.previous = Some(rows.clone());
        Some(Ok(rows))
    }

    fn stop(&mut self, reason: StopReason) -> Option<Result<Vec<ListingRow>, ExtractionError>> {
        log::debug!(
            "{} / {}: listing stopped after {} page(s): {:?}",
            self.session.city(),
            self.session.school(),
            self.index,
            reason
        );
        self.stopped = Some(reason);
        None
    }

    async fn fetch_page(&self, index: u32) -> Result<Vec<ListingRow>, ExtractionError> {
        let Some(paginator) = self.paginator else {
            return Ok(Vec::new());
        };
        let table_id = self.table_id.as_deref().ok_or_else(|| {
            ParseError::MissingField(format!(
                "table id to fetch page {}/{}",
                index + 1,
                paginator.page_count
            ))
        })?;
        let first = (index * paginator.rows_per_page).to_string();
        let rows = paginator.rows_per_page.to_string();
        let pagination = format!("{table_id}_pagination");
        let first_key = format!("{table_id}_first");
        let rows_key = format!("{table_id}_rows");
        let skip_children = format!("{table_id}_skipChildren");
        let encode_feature = format!("{table_id}_encodeFeature");

        let form = partial_form(
            &[
                ("javax.faces.partial.ajax", "true"),
                ("javax.faces.source", table_id),
                ("javax.faces.partial.execute", table_id),
                ("javax.faces.partial.render", table_id),
                (pagination.as_str(), "true"),
                (first_key.as_str(), first.as_str()),
                (rows_key.as_str(), rows.as_str()),
                (skip_children.as_str(), "true"),
                (encode_feature.as_str(), "true"),
            ],
            &self.session.form().fields,
        );

        log::info!(
            "{} / {}: fetching listing page {}/{}",
            self.session.city(),
            self.session.school(),
            index + 1,
            paginator.page_count
        );
        let xml = self
            .session
            .transport()
            .post_form(self.session.url(), &form, true)
            .await?;
        let partial = parser::parse_partial_response(&xml)?;
        let fragment = partial
            .update(table_id)
            .ok_or_else(|| ParseError::MissingField(format!("{table_id} update")))?;
        Ok(parser::parse_listing_fragment(fragment)?)
    }
}

/// Collects every row of the listing, in page order.
pub async fn extract_all_rows<T: Transport>(
    session: &ListingSession<T>,
    max_pages: Option<u32>,
) -> Result<Vec<ListingRow>, ExtractionError> {
    let mut pager = ListingPager::new(session, max_pages)?;
    let mut rows = Vec::new();
    while let Some(page) = pager.next_page().await {
        rows.extend(page?);
    }
    log::info!(
        "{} / {}: extracted {} listing row(s) ({:?})",
        session.city(),
        session.school(),
        rows.len(),
        pager.stop_reason()
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::{PortalUrls, reach_listing};
    use crate::testing::{FakePortal, FakeSchool, record_id};
    use crate::types::{CityCode, RecordId, SchoolTarget};

    async fn listing_for(portal: &FakePortal) -> ListingSession<crate::testing::FakeSession> {
        reach_listing(
            portal.session(),
            PortalUrls::default(),
            &CityCode::new("0010"),
            &SchoolTarget::new("40001"),
            "3",
            6,
        )
        .await
        .expect("Failed to reach listing")
    }

    fn portal_with(school: FakeSchool) -> FakePortal {
        FakePortal::new()
            .with_city("0010", "ABATIA")
            .with_school("0010", school)
    }

    fn row(discipline: &str) -> ListingRow {
        ListingRow {
            record_id: None,
            discipline: discipline.to_string(),
            shift: String::new(),
            demand: String::new(),
            supply: String::new(),
            vacancies: String::new(),
            excess: String::new(),
        }
    }

    #[test]
    fn test_stop_before() {
        assert_eq!(stop_before(0, 1, None), None);
        assert_eq!(stop_before(1, 1, None), Some(StopReason::NoMorePages));
        assert_eq!(stop_before(2, 5, Some(2)), Some(StopReason::PageLimit));
        assert_eq!(stop_before(1, 5, Some(2)), None);
    }

    #[test]
    fn test_stop_after() {
        let page = vec![row("ARTE"), row("BIOLOGIA")];
        assert_eq!(stop_after(&[], None), Some(StopReason::EmptyPage));
        assert_eq!(stop_after(&page, None), None);
        assert_eq!(stop_after(&page, Some(&page)), Some(StopReason::RepeatedPage));
        assert_eq!(stop_after(&page, Some(&page[..1])), None);
    }

    #[tokio::test]
    async fn test_extract_all_rows_across_pages() {
        let portal = portal_with(FakeSchool::new("40001", "ABATIA, C E - EF M").with_rows(8));
        let session = listing_for(&portal).await;

        let rows = extract_all_rows(&session, None).await.unwrap();

        assert_eq!(rows.len(), 8);
        assert_eq!(portal.pagination_requests(), 2, "3 pages: 1 loaded, 2 paginated");
        let ids: Vec<RecordId> = rows.iter().filter_map(|r| r.record_id.clone()).collect();
        let expected: Vec<RecordId> = (0..8).map(|i| RecordId::new(record_id(i))).collect();
        assert_eq!(ids, expected, "Rows keep page order");
    }

    #[tokio::test]
    async fn test_single_page_listing_needs_no_pagination() {
        let portal = portal_with(FakeSchool::new("40001", "ABATIA, C E - EF M").with_rows(3));
        let session = listing_for(&portal).await;

        let rows = extract_all_rows(&session, None).await.unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(portal.pagination_requests(), 0);
    }

    #[tokio::test]
    async fn test_one_row_per_page() {
        let portal = portal_with(
            FakeSchool::new("40001", "ABATIA, C E - EF M")
                .with_rows(4)
                .with_page_size(1),
        );
        let session = listing_for(&portal).await;
        let mut pager = ListingPager::new(&session, None).unwrap();

        let mut pages = 0;
        while let Some(page) = pager.next_page().await {
            assert_eq!(page.unwrap().len(), 1);
            pages += 1;
        }

        assert_eq!(pages, 4);
        assert_eq!(pager.stop_reason(), Some(StopReason::NoMorePages));
        assert_eq!(portal.pagination_requests(), 3);
    }

    #[tokio::test]
    async fn test_repeated_page_stops_the_listing() {
        let portal = portal_with(
            FakeSchool::new("40001", "ABATIA, C E - EF M")
                .with_rows(5)
                .with_phantom_pages(3),
        );
        let session = listing_for(&portal).await;
        let mut pager = ListingPager::new(&session, None).unwrap();
        assert_eq!(pager.page_count(), 5);

        let mut rows = Vec::new();
        while let Some(page) = pager.next_page().await {
            rows.extend(page.unwrap());
        }

        assert_eq!(rows.len(), 5, "Repeated rows are not yielded twice");
        assert_eq!(pager.stop_reason(), Some(StopReason::RepeatedPage));
        assert_eq!(portal.pagination_requests(), 2);
        assert!(pager.next_page().await.is_none(), "Pager cannot restart");
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let portal = portal_with(FakeSchool::new("40001", "ABATIA, C E - EF M"));
        let session = listing_for(&portal).await;
        let mut pager = ListingPager::new(&session, None).unwrap();

        assert!(pager.next_page().await.is_none());
        assert_eq!(pager.stop_reason(), Some(StopReason::EmptyPage));
    }

    #[tokio::test]
    async fn test_page_limit() {
        let portal = portal_with(FakeSchool::new("40001", "ABATIA, C E - EF M").with_rows(9));
        let session = listing_for(&portal).await;

        let rows = extract_all_rows(&session, Some(2)).await.unwrap();

        assert_eq!(rows.len(), 6);
        assert_eq!(portal.pagination_requests(), 1);
    }

    #[tokio::test]
    async fn test_schema_drift_is_an_extraction_error() {
        let portal = portal_with(
            FakeSchool::new("40001", "ABATIA, C E - EF M")
                .with_rows(2)
                .drifted(),
        );
        let session = listing_for(&portal).await;

        let err = extract_all_rows(&session, None).await.unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Parse(ParseError::SchemaDrift { .. })
        ));
    }

    #[tokio::test]
    async fn test_page_without_table_update_is_an_error() {
        let portal = portal_with(
            FakeSchool::new("40001", "ABATIA, C E - EF M")
                .with_rows(8)
                .with_expired_pagination(),
        );
        let session = listing_for(&portal).await;

        let err = extract_all_rows(&session, None).await.unwrap_err();

        assert!(matches!(
            err,
            ExtractionError::Parse(ParseError::MissingField(ref field)) if field.contains("tabelaDemanda")
        ));
        assert_eq!(portal.pagination_requests(), 1);
    }

    #[tokio::test]
    async fn test_more_pages_without_table_id_is_an_error() {
        let portal = portal_with(
            FakeSchool::new("40001", "ABATIA, C E - EF M")
                .with_rows(8)
                .with_page_report_only(),
        );
        let session = listing_for(&portal).await;
        let mut pager = ListingPager::new(&session, None).unwrap();
        assert_eq!(pager.page_count(), 3);

        assert_eq!(pager.next_page().await.unwrap().unwrap().len(), 3);
        let err = pager.next_page().await.unwrap().unwrap_err();

        assert!(matches!(err, ExtractionError::Parse(ParseError::MissingField(_))));
        assert!(pager.next_page().await.is_none());
        assert_eq!(portal.pagination_requests(), 0);
    }

    #[tokio::test]
    async fn test_single_page_report_needs_no_table_id() {
        let portal = portal_with(
            FakeSchool::new("40001", "ABATIA, C E - EF M")
                .with_rows(3)
                .with_page_report_only(),
        );
        let session = listing_for(&portal).await;

        let rows = extract_all_rows(&session, None).await.unwrap();
        assert_eq!(rows.len(), 3);
    }
}
