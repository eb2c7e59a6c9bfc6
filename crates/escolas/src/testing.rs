//! In-memory stand-in for the portal, serving markup shaped like the live
//! pages so navigation, pagination and detail fetching run without network.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::navigation::{DEMAND_PATH, INITIAL_PATH, PROFESSIONALS_PATH};
use crate::scraper::{Connect, Form, ScraperError, Transport};

const WINDOW_ID: &str = "w1";
const TABLE_ID: &str = "formDemanda:tabelaDemanda";
const DETAIL_PANEL: &str = "formDemanda:gradeConsultaDetalhe";

#[derive(Debug, Clone)]
pub struct FakeSchool {
    pub code: String,
    pub name: String,
    rows: usize,
    page_size: usize,
    phantom_pages: usize,
    drifted: bool,
    failing_details: Vec<usize>,
    empty_details: Vec<usize>,
    misrouted_details: Vec<usize>,
    expired_pagination: bool,
    page_report_only: bool,
}

impl FakeSchool {
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            rows: 0,
            page_size: 3,
            phantom_pages: 0,
            drifted: false,
            failing_details: Vec::new(),
            empty_details: Vec::new(),
            misrouted_details: Vec::new(),
            expired_pagination: false,
            page_report_only: false,
        }
    }

    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Paginator claims more pages than exist; out-of-range requests are
    /// answered with the last page again.
    pub fn with_phantom_pages(mut self, pages: usize) -> Self {
        self.phantom_pages = pages;
        self
    }

    pub fn drifted(mut self) -> Self {
        self.drifted = true;
        self
    }

    pub fn with_failing_detail(mut self, row: usize) -> Self {
        self.failing_details.push(row);
        self
    }

    pub fn with_empty_detail(mut self, row: usize) -> Self {
        self.empty_details.push(row);
        self
    }

    /// The detail reply renders some other component instead of the panel.
    pub fn with_misrouted_detail(mut self, row: usize) -> Self {
        self.misrouted_details.push(row);
        self
    }

    /// Paginator requests are answered with a session-expired message.
    pub fn with_expired_pagination(mut self) -> Self {
        self.expired_pagination = true;
        self
    }

    /// The grid has no id and no widget script; only the page report
    /// tells how many pages there are.
    pub fn with_page_report_only(mut self) -> Self {
        self.page_report_only = true;
        self
    }

    fn real_pages(&self) -> usize {
        self.rows.div_ceil(self.page_size).max(1)
    }

    fn page_rows(&self, page: usize) -> std::ops::Range<usize> {
        let page = page.min(self.real_pages() - 1);
        let start = page * self.page_size;
        start.min(self.rows)..((page + 1) * self.page_size).min(self.rows)
    }
}

pub fn record_id(row: usize) -> String {
    format!("{TABLE_ID}:{row}:j_idt120")
}

pub fn professional(row: usize) -> String {
    format!("PROFESSOR {row}")
}

#[derive(Debug, Clone, Default)]
struct FakeData {
    cities: Vec<(String, String)>,
    schools: Vec<(String, FakeSchool)>,
    loop_professionals: bool,
    hide_demand_link: bool,
    catalog_down: bool,
    latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: &'static str,
    pub url: String,
    pub form: Form,
}

#[derive(Debug, Clone, Default)]
pub struct FakePortal {
    data: Rc<FakeData>,
    log: Rc<RefCell<Vec<Request>>>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_city(mut self, code: &str, name: &str) -> Self {
        Rc::make_mut(&mut self.data)
            .cities
            .push((code.to_string(), name.to_string()));
        self
    }

    pub fn with_school(mut self, city: &str, school: FakeSchool) -> Self {
        Rc::make_mut(&mut self.data)
            .schools
            .push((city.to_string(), school));
        self
    }

    pub fn looping_professionals(mut self) -> Self {
        Rc::make_mut(&mut self.data).loop_professionals = true;
        self
    }

    pub fn without_demand_link(mut self) -> Self {
        Rc::make_mut(&mut self.data).hide_demand_link = true;
        self
    }

    pub fn catalog_down(mut self) -> Self {
        Rc::make_mut(&mut self.data).catalog_down = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        Rc::make_mut(&mut self.data).latency = latency;
        self
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            data: Rc::clone(&self.data),
            log: Rc::clone(&self.log),
            school: RefCell::new(None),
            page: Cell::new(0),
        }
    }

    pub fn request_count(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|r| r.method == method && r.url.contains(path))
            .count()
    }

    pub fn pagination_requests(&self) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|r| field(&r.form, &format!("{TABLE_ID}_pagination")).is_some())
            .count()
    }

    pub fn detail_requests(&self) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|r| field(&r.form, "javax.faces.partial.render") == Some(DETAIL_PANEL))
            .count()
    }
}

impl Connect for FakePortal {
    type Session = FakeSession;

    fn connect(&self) -> Result<Self::Session, ScraperError> {
        Ok(self.session())
    }
}

pub struct FakeSession {
    data: Rc<FakeData>,
    log: Rc<RefCell<Vec<Request>>>,
    school: RefCell<Option<FakeSchool>>,
    /// Page the server-side table is positioned on. Only its rows can be
    /// opened for details.
    page: Cell<usize>,
}

fn field<'a>(form: &'a Form, name: &str) -> Option<&'a str> {
    form.iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

fn unavailable(url: &str) -> ScraperError {
    ScraperError::Status {
        url: url.to_string(),
        status: 503,
    }
}

impl FakeSession {
    fn record(&self, method: &'static str, url: &str, form: &Form) {
        self.log.borrow_mut().push(Request {
            method,
            url: url.to_string(),
            form: form.clone(),
        });
    }

    async fn wait(&self) {
        if !self.data.latency.is_zero() {
            tokio::time::sleep(self.data.latency).await;
        }
    }

    fn find_school(&self, code: &str) -> Option<FakeSchool> {
        self.data
            .schools
            .iter()
            .find(|(_, s)| s.code == code)
            .map(|(_, s)| s.clone())
    }

    fn current_school(&self, url: &str) -> Result<FakeSchool, ScraperError> {
        self.school.borrow().clone().ok_or_else(|| unavailable(url))
    }
}

impl Transport for FakeSession {
    async fn get(&self, url: &str) -> Result<String, ScraperError> {
        self.record("GET", url, &Form::new());
        self.wait().await;

        if url.contains(INITIAL_PATH) {
            if let Some(code) = query_param(url, "codigoEstab") {
                let school = self.find_school(code).ok_or_else(|| unavailable(url))?;
                let page = school_page(&school);
                *self.school.borrow_mut() = Some(school);
                return Ok(page);
            }
            if self.data.catalog_down {
                return Err(unavailable(url));
            }
            return Ok(landing_page(&self.data.cities));
        }
        if url.contains(PROFESSIONALS_PATH) {
            return Ok(professionals_page(!self.data.hide_demand_link));
        }
        if url.contains(DEMAND_PATH) {
            if self.data.loop_professionals {
                return Ok(professionals_page(true));
            }
            self.page.set(0);
            return Ok(demand_page(&self.current_school(url)?));
        }
        Err(unavailable(url))
    }

    async fn post_form(
        &self,
        url: &str,
        form: &Form,
        partial: bool,
    ) -> Result<String, ScraperError> {
        self.record("POST", url, form);
        self.wait().await;

        if url.contains(INITIAL_PATH) && partial {
            let city = field(form, "initial:j_idt97:municipio_input").unwrap_or_default();
            let schools: Vec<&FakeSchool> = self
                .data
                .schools
                .iter()
                .filter(|(c, _)| c == city)
                .map(|(_, s)| s)
                .collect();
            return Ok(city_partial(&schools));
        }
        if url.contains(DEMAND_PATH) && partial {
            let school = self.current_school(url)?;
            if field(form, &format!("{TABLE_ID}_pagination")) == Some("true") {
                let first: usize = field(form, &format!("{TABLE_ID}_first"))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default();
                if school.expired_pagination {
                    return Ok(message_partial("Sessão expirada"));
                }
                let page = (first / school.page_size).min(school.real_pages() - 1);
                self.page.set(page);
                return Ok(page_partial(&school, page));
            }
            let source = field(form, "javax.faces.source").unwrap_or_default();
            let row = (0..school.rows).find(|row| record_id(*row) == source);
            return Ok(match row {
                Some(row) if !school.page_rows(self.page.get()).contains(&row) => {
                    detail_partial(&[])
                }
                Some(row) if school.failing_details.contains(&row) => {
                    error_partial("Registro não encontrado")
                }
                Some(row) if school.misrouted_details.contains(&row) => {
                    message_partial("Selecione um registro")
                }
                Some(row) if school.empty_details.contains(&row) => detail_partial(&[]),
                Some(row) => detail_partial(&[professional(row)]),
                None => error_partial("Componente desconhecido"),
            });
        }
        if !partial && (url.contains(INITIAL_PATH) || url.contains(PROFESSIONALS_PATH)) {
            return Ok(String::new());
        }
        Err(unavailable(url))
    }
}

fn view_state() -> String {
    r#"<input type="hidden" name="javax.faces.ViewState" id="j_id1:javax.faces.ViewState:0" value="1234:5678" />"#
        .to_string()
}

fn landing_page(cities: &[(String, String)]) -> String {
    let options: String = cities
        .iter()
        .map(|(code, name)| format!(r#"<option value="{code}">{name}</option>"#))
        .collect();
    format!(
        r#"<html><head><script>var w = "windowId={WINDOW_ID}";</script></head><body>
<form id="initial" name="initial" method="post" action="initial2.jsf?windowId={WINDOW_ID}">
<input type="hidden" name="initial" value="initial" />
<select id="initial:j_idt97:municipio_input" name="initial:j_idt97:municipio_input"><option>Selecione...</option>{options}</select>
<select id="initial:j_idt97:redeEnsino_input" name="initial:j_idt97:redeEnsino_input"><option value="3" selected="selected">Todas</option></select>
<select id="initial:j_idt97:escola_input" name="initial:j_idt97:escola_input"><option>Selecione...</option></select>
{}
</form></body></html>"#,
        view_state()
    )
}

fn city_partial(schools: &[&FakeSchool]) -> String {
    let options: String = schools
        .iter()
        .map(|s| format!(r#"<option value="{}">{}</option>"#, s.code, s.name))
        .collect();
    format!(
        r#"<?xml version='1.0' encoding='UTF-8'?>
<partial-response id="j_id1"><changes><update id="initial:j_idt97:escola"><![CDATA[<div id="initial:j_idt97:escola"><select id="initial:j_idt97:escola_input" name="initial:j_idt97:escola_input"><option>Selecione...</option>{options}</select></div>]]></update></changes></partial-response>"#
    )
}

fn school_page(school: &FakeSchool) -> String {
    format!(
        r##"<html><body>
<form id="initial" name="initial" method="post">
<input type="hidden" name="initial" value="initial" />
<input type="hidden" name="initial:markerSelecionado" value="" />
<h2>{}</h2>
<a id="initial:j_idt366" href="#">Profissionais</a>
{}
</form></body></html>"##,
        school.name,
        view_state()
    )
}

fn professionals_page(with_demand_link: bool) -> String {
    let link = if with_demand_link {
        r##"<a id="merendaForm:j_idt113" href="#">Demanda e Suprimento</a>"##
    } else {
        ""
    };
    format!(
        r#"<html><body>
<form id="merendaForm" name="merendaForm" method="post">
<input type="hidden" name="merendaForm" value="merendaForm" />
{link}
{}
</form></body></html>"#,
        view_state()
    )
}

fn rows_markup(school: &FakeSchool, page: usize) -> String {
    school
        .page_rows(page)
        .map(|row| {
            format!(
                r##"<tr data-ri="{row}" class="ui-widget-content"><td>DISCIPLINA {row}</td><td>Manhã</td><td>{}</td><td>{row}</td><td>1</td><td>0</td><td><a id="{}" href="#">Detalhes</a></td></tr>"##,
                row + 1,
                record_id(row)
            )
        })
        .collect()
}

fn demand_page(school: &FakeSchool) -> String {
    let last_header = if school.drifted { "Sobras" } else { "Excessos" };
    let headers: String = [
        "Disciplina - Função",
        "Turno",
        "Demanda",
        "Suprimento",
        "Vagas",
        last_header,
        "Detalhes",
    ]
    .iter()
    .map(|h| format!("<th><span class=\"ui-column-title\">{h}</span></th>"))
    .collect();
    let row_count = school.rows + school.phantom_pages * school.page_size;
    let page_count = row_count.div_ceil(school.page_size).max(1);
    let (table_attrs, paginator) = if school.page_report_only {
        (
            r#"class="ui-datatable""#.to_string(),
            format!(r#"<span class="ui-paginator-current">(1 de {page_count})</span>"#),
        )
    } else {
        (
            format!(r#"id="{TABLE_ID}" class="ui-datatable""#),
            format!(
                r#"<script>PrimeFaces.cw("DataTable","widget_tabela",{{id:"{TABLE_ID}",paginator:{{rows:{},rowCount:{row_count},page:0}}}});</script>"#,
                school.page_size
            ),
        )
    };
    format!(
        r#"<html><body>
<form id="formDemanda" name="formDemanda" method="post">
<input type="hidden" name="formDemanda" value="formDemanda" />
<div {table_attrs}><table role="grid"><thead><tr>{headers}</tr></thead><tbody>{}</tbody></table>{paginator}</div>
<div id="{DETAIL_PANEL}"></div>
{}
</form></body></html>"#,
        rows_markup(school, 0),
        view_state()
    )
}

fn page_partial(school: &FakeSchool, page: usize) -> String {
    format!(
        r#"<?xml version='1.0' encoding='UTF-8'?>
<partial-response id="j_id1"><changes><update id="{TABLE_ID}"><![CDATA[{}]]></update></changes></partial-response>"#,
        rows_markup(school, page)
    )
}

fn detail_partial(names: &[String]) -> String {
    let rows: String = names
        .iter()
        .map(|name| format!("<tr><td>{name}</td><td>QPM</td><td>20</td></tr>"))
        .collect();
    format!(
        r#"<?xml version='1.0' encoding='UTF-8'?>
<partial-response id="j_id1"><changes><update id="{DETAIL_PANEL}"><![CDATA[<div id="{DETAIL_PANEL}"><table role="grid"><thead><tr><th>Nome</th><th>Vínculo</th><th>Carga Horária</th></tr></thead><tbody>{rows}</tbody></table></div>]]></update></changes></partial-response>"#
    )
}

/// Renders only the growl/messages component.
fn message_partial(message: &str) -> String {
    format!(
        r#"<?xml version='1.0' encoding='UTF-8'?>
<partial-response id="j_id1"><changes><update id="formDemanda:msgs"><![CDATA[<div id="formDemanda:msgs" class="ui-messages">{message}</div>]]></update></changes></partial-response>"#
    )
}

fn error_partial(message: &str) -> String {
    format!(
        r#"<?xml version='1.0' encoding='UTF-8'?>
<partial-response id="j_id1"><error><error-name>javax.faces.FacesException</error-name><error-message><![CDATA[{message}]]></error-message></error></partial-response>"#
    )
}
