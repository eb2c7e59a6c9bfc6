//! Drives a portal session from the landing page to the demand/supply
//! listing of one school.
//!
//! The walk is an explicit state machine:
//!
//! ```text
//! Start -> CitySelected -> SchoolSelected -> ListingReady
//!   \__________\________________\__________-> NavigationFailed
//! ```
//!
//! Every transition is one or more requests on the session's own
//! [`Transport`]; the last one hands the session over as a
//! [`ListingSession`].

use std::fmt::Display;

use crate::parser::{self, ListingForm, ParseError};
use crate::scraper::{ScraperError, Transport, set_field};
use crate::types::{City, CityCode, SchoolOption, SchoolTarget};

pub const INITIAL_PATH: &str = "/pages/templates/initial2.jsf";
pub const PROFESSIONALS_PATH: &str = "/pages/paginas/profissionais/profissionaisEstabelecimento.jsf";
pub const DEMAND_PATH: &str =
    "/pages/paginas/profissionais/demandaSuprimentosEstabelecimento.jsf";

#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] ScraperError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Cannot {action} in state {state}")]
    InvalidTransition {
        state: NavState,
        action: &'static str,
    },
    #[error("No schools offered under city {0}")]
    NoSchools(CityCode),
    #[error("School '{school}' is not offered under city {city}")]
    SchoolNotOffered { city: CityCode, school: String },
    #[error("Control '{label}' not found in form '{form}'")]
    ControlNotFound { form: String, label: String },
    #[error("No navigation step applies to the current page")]
    UnexpectedPage,
    #[error("Listing not reached after {0} hop(s)")]
    HopLimit(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Start,
    CitySelected,
    SchoolSelected,
    ListingReady,
    NavigationFailed,
}

impl Display for NavState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavState::Start => write!(f, "Start"),
            NavState::CitySelected => write!(f, "CitySelected"),
            NavState::SchoolSelected => write!(f, "SchoolSelected"),
            NavState::ListingReady => write!(f, "ListingReady"),
            NavState::NavigationFailed => write!(f, "NavigationFailed"),
        }
    }
}

/// Page locations, relative to the portal's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalUrls {
    base_url: String,
}

impl PortalUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn landing(&self) -> String {
        format!("{}{}", self.base_url, INITIAL_PATH)
    }

    pub fn page(&self, path: &str, window_id: &str) -> String {
        format!("{}{}?windowId={}", self.base_url, path, window_id)
    }

    pub fn school(&self, window_id: &str, city: &CityCode, school: &SchoolOption) -> String {
        format!(
            "{}&codigoMunicipio={}&codigoEstab={}",
            self.page(INITIAL_PATH, window_id),
            city,
            school.code
        )
    }
}

impl Default for PortalUrls {
    fn default() -> Self {
        Self::new(crate::BASE_URL)
    }
}

/// One step from a page carrying `form_id` to the next page on the way to
/// the listing.
struct Hop {
    form_id: &'static str,
    trigger: &'static str,
    source: &'static str,
    target: &'static str,
}

static HOPS: [Hop; 2] = [
    Hop {
        form_id: "initial",
        trigger: "Profissionais",
        source: INITIAL_PATH,
        target: PROFESSIONALS_PATH,
    },
    Hop {
        form_id: "merendaForm",
        trigger: "Demanda",
        source: PROFESSIONALS_PATH,
        target: DEMAND_PATH,
    },
];

/// Reads the municipality catalog from a fresh landing page.
pub async fn fetch_city_catalog<T: Transport>(
    transport: &T,
    urls: &PortalUrls,
) -> Result<Vec<City>, ScraperError> {
    log::info!("Fetching city catalog...");
    let html = transport.get(&urls.landing()).await?;
    let cities = parser::parse_city_catalog(&html)?;
    log::info!("Portal lists {} cities", cities.len());
    Ok(cities)
}

pub struct Navigator<T: Transport> {
    transport: T,
    urls: PortalUrls,
    state: NavState,
    window_id: String,
    page: String,
    city: Option<CityCode>,
    schools: Vec<SchoolOption>,
    school: Option<SchoolOption>,
    max_hops: usize,
}

impl<T: Transport> Navigator<T> {
    /// Loads the landing page and enters [`NavState::Start`].
    pub async fn open(
        transport: T,
        urls: PortalUrls,
        max_hops: usize,
    ) -> Result<Self, NavigationError> {
        let page = transport.get(&urls.landing()).await?;
        let window_id = parser::parse_window_id(&page)?;
        log::debug!("Session opened with windowId {}", window_id);

        Ok(Self {
            transport,
            urls,
            state: NavState::Start,
            window_id,
            page,
            city: None,
            schools: Vec::new(),
            school: None,
            max_hops,
        })
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    fn expect_state(&self, expected: NavState, action: &'static str) -> Result<(), NavigationError> {
        if self.state != expected {
            return Err(NavigationError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        Ok(())
    }

    /// `Start -> CitySelected`: submits the city filter and collects the
    /// schools the portal offers under it.
    pub async fn select_city(
        &mut self,
        city: &CityCode,
        network_code: &str,
    ) -> Result<&[SchoolOption], NavigationError> {
        self.expect_state(NavState::Start, "select a city")?;
        match self.submit_city(city, network_code).await {
            Ok(schools) => {
                log::info!("City {} offers {} school(s)", city, schools.len());
                self.schools = schools;
                self.city = Some(city.clone());
                self.state = NavState::CitySelected;
                Ok(&self.schools)
            }
            Err(e) => {
                self.state = NavState::NavigationFailed;
                Err(e)
            }
        }
    }

    async fn submit_city(
        &self,
        city: &CityCode,
        network_code: &str,
    ) -> Result<Vec<SchoolOption>, NavigationError> {
        let controls = parser::parse_filter_controls(&self.page)?;
        let mut fields = parser::serialize_form(&self.page, &controls.form_id)?;
        set_field(&mut fields, &controls.city_input, city.as_str());
        set_field(&mut fields, &controls.network_input, network_code);

        let form = crate::scraper::partial_form(
            &[
                ("javax.faces.partial.ajax", "true"),
                ("javax.faces.source", controls.city_component.as_str()),
                ("javax.faces.partial.execute", controls.city_component.as_str()),
                ("javax.faces.partial.render", controls.school_component.as_str()),
                ("javax.faces.behavior.event", "change"),
                ("javax.faces.partial.event", "change"),
            ],
            &fields,
        );

        let url = self.urls.page(INITIAL_PATH, &self.window_id);
        let xml = self.transport.post_form(&url, &form, true).await?;
        let partial = parser::parse_partial_response(&xml)?;
        let fragment = partial
            .update(&controls.school_component)
            .ok_or_else(|| ParseError::MissingField(controls.school_component.clone()))?;

        let schools = parser::parse_school_options(fragment);
        if schools.is_empty() {
            return Err(NavigationError::NoSchools(city.clone()));
        }
        Ok(schools)
    }

    /// `CitySelected -> SchoolSelected`: the school must be one the portal
    /// offers under the selected city.
    pub async fn select_school(
        &mut self,
        target: &SchoolTarget,
    ) -> Result<&SchoolOption, NavigationError> {
        self.expect_state(NavState::CitySelected, "select a school")?;
        match self.open_school(target).await {
            Ok((school, page)) => {
                self.page = page;
                self.state = NavState::SchoolSelected;
                Ok(self.school.insert(school))
            }
            Err(e) => {
                self.state = NavState::NavigationFailed;
                Err(e)
            }
        }
    }

    async fn open_school(
        &self,
        target: &SchoolTarget,
    ) -> Result<(SchoolOption, String), NavigationError> {
        let city = self
            .city
            .as_ref()
            .ok_or(NavigationError::InvalidTransition {
                state: self.state,
                action: "select a school",
            })?;
        let school = self
            .schools
            .iter()
            .find(|s| s.matches(target))
            .cloned()
            .ok_or_else(|| NavigationError::SchoolNotOffered {
                city: city.clone(),
                school: target.label.clone(),
            })?;

        log::info!("Opening school {} under city {}", school, city);
        let url = self.urls.school(&self.window_id, city, &school);
        let page = self.transport.get(&url).await?;
        parser::parse_view_state(&page)?;
        Ok((school, page))
    }

    /// `SchoolSelected -> ListingReady`: follows the known hops until the
    /// demand/supply grid shows up, giving up after `max_hops`.
    pub async fn follow_to_listing(mut self) -> Result<ListingSession<T>, NavigationError> {
        self.expect_state(NavState::SchoolSelected, "follow to the listing")?;
        match self.walk_hops().await {
            Ok(()) => self.into_listing(),
            Err(e) => {
                self.state = NavState::NavigationFailed;
                Err(e)
            }
        }
    }

    async fn walk_hops(&mut self) -> Result<(), NavigationError> {
        for hop_count in 0..self.max_hops {
            if parser::contains_listing_grid(&self.page) {
                log::debug!("Listing reached after {} hop(s)", hop_count);
                return Ok(());
            }
            let hop = HOPS
                .iter()
                .find(|hop| parser::has_form(&self.page, hop.form_id))
                .ok_or(NavigationError::UnexpectedPage)?;
            self.page = self.apply_hop(hop).await?;
        }
        if parser::contains_listing_grid(&self.page) {
            return Ok(());
        }
        Err(NavigationError::HopLimit(self.max_hops))
    }

    async fn apply_hop(&self, hop: &Hop) -> Result<String, NavigationError> {
        let trigger = parser::find_trigger(&self.page, hop.form_id, hop.trigger).ok_or_else(|| {
            NavigationError::ControlNotFound {
                form: hop.form_id.to_string(),
                label: hop.trigger.to_string(),
            }
        })?;

        let mut form = parser::serialize_form(&self.page, hop.form_id)?;
        if let Some(school) = &self.school {
            let marker = form
                .iter()
                .find(|(name, _)| name.ends_with(":markerSelecionado"))
                .map(|(name, _)| name.clone());
            if let Some(marker) = marker {
                set_field(&mut form, &marker, school.code.as_str());
            }
        }
        set_field(&mut form, &trigger, &trigger);

        log::info!(
            "{} / {}: following '{}' from {}",
            self.city.as_ref().map_or("?", |c| c.as_str()),
            self.school.as_ref().map_or("?", |s| s.name.as_str()),
            hop.trigger,
            hop.source
        );
        self.transport
            .post_form(&self.urls.page(hop.source, &self.window_id), &form, false)
            .await?;
        Ok(self
            .transport
            .get(&self.urls.page(hop.target, &self.window_id))
            .await?)
    }

    fn into_listing(mut self) -> Result<ListingSession<T>, NavigationError> {
        let (Some(city), Some(school)) = (self.city.take(), self.school.take()) else {
            return Err(NavigationError::InvalidTransition {
                state: self.state,
                action: "hand over the listing",
            });
        };
        let form = parser::parse_listing_form(&self.page)?;
        self.state = NavState::ListingReady;

        Ok(ListingSession {
            transport: self.transport,
            url: self.urls.page(DEMAND_PATH, &self.window_id),
            html: self.page,
            form,
            city,
            school,
        })
    }
}

/// Runs the whole walk for one unit.
pub async fn reach_listing<T: Transport>(
    transport: T,
    urls: PortalUrls,
    city: &CityCode,
    school: &SchoolTarget,
    network_code: &str,
    max_hops: usize,
) -> Result<ListingSession<T>, NavigationError> {
    let mut navigator = Navigator::open(transport, urls, max_hops).await?;
    navigator.select_city(city, network_code).await?;
    navigator.select_school(school).await?;
    navigator.follow_to_listing().await
}

/// A session parked on the demand/supply listing of one school. It owns
/// the transport and is dropped when the unit completes.
pub struct ListingSession<T: Transport> {
    transport: T,
    url: String,
    html: String,
    form: ListingForm,
    city: CityCode,
    school: SchoolOption,
}

impl<T: Transport> ListingSession<T> {
    pub fn city(&self) -> &CityCode {
        &self.city
    }

    pub fn school(&self) -> &SchoolOption {
        &self.school
    }

    /// The listing page as first loaded.
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn form(&self) -> &ListingForm {
        &self.form
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }
}
