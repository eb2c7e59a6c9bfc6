use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::scraper::Form;
use crate::types::{City, ListingRow, RecordId, SchoolOption};
use crate::utils::{normalize_name, normalize_whitespace};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Table not found: {0}")]
    MissingTable(String),
    #[error("Unexpected table columns {found:?} (expected {expected:?})")]
    SchemaDrift {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Unexpected page layout: {0}")]
    UnexpectedLayout(String),
    #[error("Portal returned an error: {0}")]
    PartialError(String),
    #[error("Portal redirected to {0}")]
    Redirect(String),
}

/// Column headers of the demand/supply grid, in page order.
pub const LISTING_HEADERS: [&str; 7] = [
    "Disciplina - Função",
    "Turno",
    "Demanda",
    "Suprimento",
    "Vagas",
    "Excessos",
    "Detalhes",
];

const DETAIL_KEY_COLUMN: &str = "Nome";

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css}: {e}"))
}

static SEL_VIEW_STATE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"input[name="javax.faces.ViewState"]"#));
static SEL_CITY_SELECT: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"select[id$=":municipio_input"]"#));
static SEL_SELECT: LazyLock<Selector> = LazyLock::new(|| selector("select"));
static SEL_OPTION: LazyLock<Selector> = LazyLock::new(|| selector("option"));
static SEL_FORM_FIELDS: LazyLock<Selector> =
    LazyLock::new(|| selector("input[name], select[name], textarea[name]"));
static SEL_TRIGGERS: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"button, a, input[type="submit"], input[type="button"]"#)
});
static SEL_GRID: LazyLock<Selector> = LazyLock::new(|| selector(r#"table[role="grid"]"#));
static SEL_TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static SEL_HEADER_CELL: LazyLock<Selector> = LazyLock::new(|| selector("thead th"));
static SEL_TH: LazyLock<Selector> = LazyLock::new(|| selector("th"));
static SEL_ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static SEL_BODY_ROW: LazyLock<Selector> = LazyLock::new(|| selector("tbody tr"));
static SEL_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static SEL_SCRIPT: LazyLock<Selector> = LazyLock::new(|| selector("script"));
static SEL_PAGE_REPORT: LazyLock<Selector> =
    LazyLock::new(|| selector(".ui-paginator-current"));
static SEL_DETAIL_PANEL: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"[id$="gradeConsultaDetalhe"]"#));

static RE_WINDOW_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"windowId=([^"'&\s]+)"#).expect("invalid regex: window id"));

static RE_UPDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<update id="([^"]*)"><!\[CDATA\[(.*?)\]\]></update>"#)
        .expect("invalid regex: partial update")
});

static RE_PARTIAL_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<error-message><!\[CDATA\[(.*?)\]\]></error-message>")
        .expect("invalid regex: partial error")
});

static RE_REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<redirect url="([^"]*)""#).expect("invalid regex: partial redirect")
});

static RE_ROWS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\brows\s*:\s*(\d+)").expect("invalid regex: paginator rows"));

static RE_ROW_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\browCount\s*:\s*(\d+)").expect("invalid regex: paginator row count")
});

static RE_PAGE_REPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*(?:of|de)\s*(\d+)").expect("invalid regex: page report")
});

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

/// Cell text without PrimeFaces' responsive column titles.
fn cell_text(cell: ElementRef) -> String {
    let text: String = cell
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node
                .ancestors()
                .take_while(|a| a.id() != cell.id())
                .filter_map(ElementRef::wrap)
                .any(|e| e.value().classes().any(|c| c == "ui-column-title"));
            (!hidden).then(|| String::from(&**text))
        })
        .collect();
    normalize_whitespace(&text)
}

fn has_class(element: ElementRef, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

fn form_selector(form_id: &str) -> Result<Selector, ParseError> {
    Selector::parse(&format!(r#"form[id="{}"]"#, form_id))
        .map_err(|e| ParseError::UnexpectedLayout(format!("invalid form id {form_id}: {e}")))
}

pub fn parse_window_id(html: &str) -> Result<String, ParseError> {
    RE_WINDOW_ID
        .captures(html)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| ParseError::MissingField("windowId".to_string()))
}

pub fn parse_view_state(html: &str) -> Result<String, ParseError> {
    let document = Html::parse_document(html);
    document
        .select(&SEL_VIEW_STATE)
        .next()
        .and_then(|e| e.value().attr("value"))
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingField("javax.faces.ViewState".to_string()))
}

fn parse_options(select: ElementRef) -> Vec<(String, String)> {
    select
        .select(&SEL_OPTION)
        .filter_map(|option| {
            let value = option.value().attr("value")?.trim();
            if value.is_empty() {
                return None;
            }
            Some((value.to_string(), normalize_whitespace(&elem_text(option))))
        })
        .collect()
}

/// Reads the municipality catalog from the portal's landing page.
pub fn parse_city_catalog(html: &str) -> Result<Vec<City>, ParseError> {
    let document = Html::parse_document(html);
    let select = document
        .select(&SEL_CITY_SELECT)
        .next()
        .ok_or_else(|| ParseError::MissingField("municipio select".to_string()))?;

    let cities: Vec<City> = parse_options(select)
        .into_iter()
        .map(|(code, name)| City::new(code, name))
        .collect();

    if cities.is_empty() {
        return Err(ParseError::UnexpectedLayout(
            "municipio select has no options".to_string(),
        ));
    }
    Ok(cities)
}

/// Component ids of the city/school filter on the landing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterControls {
    pub form_id: String,
    pub city_component: String,
    pub city_input: String,
    pub school_component: String,
    pub network_input: String,
}

pub fn parse_filter_controls(html: &str) -> Result<FilterControls, ParseError> {
    let document = Html::parse_document(html);
    let select = document
        .select(&SEL_CITY_SELECT)
        .next()
        .ok_or_else(|| ParseError::MissingField("municipio select".to_string()))?;
    let city_input = select
        .value()
        .attr("name")
        .or_else(|| select.value().attr("id"))
        .ok_or_else(|| ParseError::MissingField("municipio select name".to_string()))?;
    let city_component = city_input.trim_end_matches("_input").to_string();
    let prefix = city_component
        .rsplit_once(':')
        .map(|(prefix, _)| prefix)
        .ok_or_else(|| ParseError::UnexpectedLayout(format!("bare component id {city_input}")))?;
    let form_id = prefix.split(':').next().unwrap_or(prefix).to_string();

    Ok(FilterControls {
        form_id,
        city_input: city_input.to_string(),
        school_component: format!("{prefix}:escola"),
        network_input: format!("{prefix}:redeEnsino_input"),
        city_component,
    })
}

/// Serialises a form the way a browser would submit it, without any
/// submit control.
pub fn serialize_form(html: &str, form_id: &str) -> Result<Form, ParseError> {
    let document = Html::parse_document(html);
    let form = document
        .select(&form_selector(form_id)?)
        .next()
        .ok_or_else(|| ParseError::MissingField(format!("form {form_id}")))?;

    let mut fields = Form::new();
    for field in form.select(&SEL_FORM_FIELDS) {
        let element = field.value();
        let Some(name) = element.attr("name") else {
            continue;
        };
        let value = match element.name() {
            "input" => {
                let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "image" | "reset" | "file" => continue,
                    "checkbox" | "radio" if element.attr("checked").is_none() => continue,
                    _ => element.attr("value").unwrap_or_default().to_string(),
                }
            }
            "select" => {
                let options: Vec<ElementRef> = field.select(&SEL_OPTION).collect();
                let chosen = options
                    .iter()
                    .find(|o| o.value().attr("selected").is_some())
                    .or_else(|| options.first());
                match chosen {
                    Some(option) => option
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| normalize_whitespace(&elem_text(*option))),
                    None => String::new(),
                }
            }
            _ => elem_text(field),
        };
        fields.push((name.to_string(), value));
    }
    Ok(fields)
}

/// Finds the id of the control inside `form_id` whose caption contains
/// `label`, compared after name normalisation.
pub fn find_trigger(html: &str, form_id: &str, label: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let form_sel = form_selector(form_id).ok()?;
    let form = document.select(&form_sel).next()?;
    let wanted = normalize_name(label);

    form.select(&SEL_TRIGGERS).find_map(|control| {
        let element = control.value();
        let caption = [
            elem_text(control),
            element.attr("value").unwrap_or_default().to_string(),
            element.attr("title").unwrap_or_default().to_string(),
        ]
        .join(" ");
        if !normalize_name(&caption).contains(&wanted) {
            return None;
        }
        element
            .attr("id")
            .or_else(|| element.attr("name"))
            .map(str::to_string)
    })
}

pub fn has_form(html: &str, form_id: &str) -> bool {
    let Ok(form_sel) = form_selector(form_id) else {
        return false;
    };
    Html::parse_document(html).select(&form_sel).next().is_some()
}

/// A JSF partial response: the rendered component updates, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResponse {
    pub updates: Vec<(String, String)>,
}

impl PartialResponse {
    pub fn update(&self, id: &str) -> Option<&str> {
        self.updates
            .iter()
            .find(|(update_id, _)| update_id == id)
            .map(|(_, content)| content.as_str())
    }
}

pub fn parse_partial_response(xml: &str) -> Result<PartialResponse, ParseError> {
    if !xml.contains("<partial-response") {
        return Err(ParseError::UnexpectedLayout(
            "expected a JSF partial response".to_string(),
        ));
    }
    if let Some(caps) = RE_PARTIAL_ERROR.captures(xml) {
        return Err(ParseError::PartialError(caps[1].trim().to_string()));
    }
    if let Some(caps) = RE_REDIRECT.captures(xml) {
        return Err(ParseError::Redirect(caps[1].to_string()));
    }

    let updates = RE_UPDATE
        .captures_iter(xml)
        .map(|caps| (caps[1].to_string(), caps[2].replace("]]><![CDATA[", "")))
        .collect();
    Ok(PartialResponse { updates })
}

/// Reads the school options rendered for a selected city.
pub fn parse_school_options(fragment: &str) -> Vec<SchoolOption> {
    let document = Html::parse_fragment(fragment);
    document
        .select(&SEL_SELECT)
        .next()
        .map(parse_options)
        .unwrap_or_default()
        .into_iter()
        .map(|(code, name)| SchoolOption::new(code, name))
        .collect()
}

fn header_texts(table: ElementRef) -> Vec<String> {
    let header = |th: ElementRef| normalize_whitespace(&elem_text(th));
    let mut headers: Vec<String> = table.select(&SEL_HEADER_CELL).map(header).collect();
    if headers.is_empty()
        && let Some(first_row) = table.select(&SEL_ROW).next()
    {
        headers = first_row.select(&SEL_TH).map(header).collect();
    }
    headers
}

fn headers_match(found: &[String]) -> bool {
    found.len() == LISTING_HEADERS.len()
        && found
            .iter()
            .zip(LISTING_HEADERS)
            .all(|(f, e)| normalize_name(f) == normalize_name(e))
}

fn looks_like_listing(headers: &[String]) -> bool {
    let keys: Vec<String> = headers.iter().map(|h| normalize_name(h)).collect();
    keys.iter().any(|k| k == "demanda") && keys.iter().any(|k| k == "suprimento")
}

/// True when the page carries a demand/supply grid, whatever its exact
/// column layout.
pub fn contains_listing_grid(html: &str) -> bool {
    let document = Html::parse_document(html);
    document
        .select(&SEL_GRID)
        .any(|table| looks_like_listing(&header_texts(table)))
}

/// The form wrapping the demand/supply grid, serialised for the partial
/// requests issued against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingForm {
    pub form_id: String,
    pub fields: Form,
    pub detail_panel_id: String,
}

pub fn parse_listing_form(html: &str) -> Result<ListingForm, ParseError> {
    let document = Html::parse_document(html);
    let form_id = document
        .select(&SEL_GRID)
        .filter(|table| looks_like_listing(&header_texts(*table)))
        .find_map(|table| {
            table
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|e| e.value().name() == "form")
                .and_then(|form| form.value().attr("id"))
        })
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingField("listing form".to_string()))?;
    let detail_panel_id = document
        .select(&SEL_DETAIL_PANEL)
        .next()
        .and_then(|e| e.value().attr("id"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{form_id}:gradeConsultaDetalhe"));
    let fields = serialize_form(html, &form_id)?;

    Ok(ListingForm {
        form_id,
        fields,
        detail_panel_id,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    pub rows_per_page: u32,
    pub page_count: u32,
}

/// The first page of the demand/supply listing and what is needed to fetch
/// the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub table_id: Option<String>,
    pub paginator: Option<Paginator>,
    pub rows: Vec<ListingRow>,
}

pub fn parse_listing_page(html: &str) -> Result<ListingPage, ParseError> {
    let document = Html::parse_document(html);

    let mut drifted = None;
    let mut table = None;
    for grid in document.select(&SEL_GRID) {
        let headers = header_texts(grid);
        if headers_match(&headers) {
            table = Some(grid);
            break;
        }
        if drifted.is_none() && looks_like_listing(&headers) {
            drifted = Some(headers);
        }
    }

    let Some(table) = table else {
        return Err(match drifted {
            Some(found) => ParseError::SchemaDrift {
                expected: LISTING_HEADERS.iter().map(|h| h.to_string()).collect(),
                found,
            },
            None => ParseError::MissingTable("demand/supply listing".to_string()),
        });
    };

    let table_id = table
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| has_class(*e, "ui-datatable"))
        .and_then(|e| e.value().attr("id"))
        .map(str::to_string);
    let rows = parse_listing_rows(table)?;
    let paginator = table_id
        .as_deref()
        .and_then(|id| parse_paginator_widget(&document, id))
        .or_else(|| parse_page_report(&document, rows.len()));

    Ok(ListingPage {
        table_id,
        paginator,
        rows,
    })
}

/// Parses rows rendered by a paginator update, which carries bare `<tr>`
/// elements.
pub fn parse_listing_fragment(fragment: &str) -> Result<Vec<ListingRow>, ParseError> {
    let markup = if fragment.contains("<table") {
        fragment.to_string()
    } else {
        format!("<table><tbody>{fragment}</tbody></table>")
    };
    let document = Html::parse_fragment(&markup);
    let table = document
        .select(&SEL_TABLE)
        .next()
        .ok_or_else(|| ParseError::MissingTable("listing page update".to_string()))?;
    parse_listing_rows(table)
}

fn parse_listing_rows(table: ElementRef) -> Result<Vec<ListingRow>, ParseError> {
    let mut rows = Vec::new();
    for tr in table.select(&SEL_BODY_ROW) {
        if has_class(tr, "ui-datatable-empty-message") {
            continue;
        }
        let cells: Vec<ElementRef> = tr.select(&SEL_CELL).collect();
        if cells.len() <= 1 {
            continue;
        }
        if cells.len() != LISTING_HEADERS.len() {
            return Err(ParseError::UnexpectedLayout(format!(
                "listing row has {} cells, expected {}",
                cells.len(),
                LISTING_HEADERS.len()
            )));
        }

        let record_id = cells
            .last()
            .and_then(|cell| embedded_id(*cell))
            .or_else(|| cells.iter().find_map(|cell| embedded_id(*cell)))
            .map(RecordId::new);

        let text: Vec<String> = cells.iter().map(|c| cell_text(*c)).collect();
        rows.push(ListingRow {
            record_id,
            discipline: text[0].clone(),
            shift: text[1].clone(),
            demand: text[2].clone(),
            supply: text[3].clone(),
            vacancies: text[4].clone(),
            excess: text[5].clone(),
        });
    }
    Ok(rows)
}

fn embedded_id(cell: ElementRef) -> Option<String> {
    cell.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .find_map(|e| e.value().attr("id"))
        .map(str::to_string)
}

fn parse_paginator_widget(document: &Html, table_id: &str) -> Option<Paginator> {
    let quoted = format!("\"{}\"", table_id);
    document.select(&SEL_SCRIPT).find_map(|script| {
        let text = elem_text(script);
        if !text.contains(&quoted) {
            return None;
        }
        let config = &text[text.find("paginator")?..];
        let rows: u32 = RE_ROWS.captures(config)?[1].parse().ok()?;
        let row_count: u32 = RE_ROW_COUNT.captures(config)?[1].parse().ok()?;
        if rows == 0 {
            return None;
        }
        Some(Paginator {
            rows_per_page: rows,
            page_count: row_count.div_ceil(rows).max(1),
        })
    })
}

fn parse_page_report(document: &Html, first_page_rows: usize) -> Option<Paginator> {
    let report = document.select(&SEL_PAGE_REPORT).next()?;
    let text = elem_text(report);
    let caps = RE_PAGE_REPORT.captures(&text)?;
    let page_count: u32 = caps[2].parse().ok()?;
    Some(Paginator {
        rows_per_page: u32::try_from(first_page_rows).ok()?.max(1),
        page_count: page_count.max(1),
    })
}

/// Professionals table rendered by the detail panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailTable {
    pub columns: Vec<String>,
    pub entries: Vec<Vec<String>>,
}

pub fn parse_detail_table(fragment: &str) -> Result<DetailTable, ParseError> {
    let document = Html::parse_fragment(fragment);
    let table = document
        .select(&SEL_TABLE)
        .find(|t| !header_texts(*t).is_empty())
        .ok_or_else(|| ParseError::MissingTable("detail".to_string()))?;

    let columns = header_texts(table);
    let key = columns
        .iter()
        .position(|c| normalize_name(c) == normalize_name(DETAIL_KEY_COLUMN))
        .ok_or_else(|| {
            ParseError::UnexpectedLayout(format!(
                "detail table has no '{}' column: {:?}",
                DETAIL_KEY_COLUMN, columns
            ))
        })?;

    let entries = table
        .select(&SEL_BODY_ROW)
        .filter(|tr| !has_class(*tr, "ui-datatable-empty-message"))
        .map(|tr| tr.select(&SEL_CELL).map(cell_text).collect::<Vec<_>>())
        .filter(|cells| cells.get(key).is_some_and(|name| !name.is_empty()))
        .map(|mut cells| {
            cells.resize(columns.len(), String::new());
            cells
        })
        .collect();

    Ok(DetailTable { columns, entries })
}
