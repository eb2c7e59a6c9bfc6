use crate::config::ClientSettings;
use crate::parser::ParseError;

use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),
    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
}

/// Form fields in submission order.
pub type Form = Vec<(String, String)>;

/// One browsing session against the portal. Implementations keep their own
/// cookies; requests are issued one at a time.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get(&self, url: &str) -> Result<String, ScraperError>;

    /// Posts `form` url-encoded. `partial` marks a JSF AJAX request.
    async fn post_form(&self, url: &str, form: &Form, partial: bool)
    -> Result<String, ScraperError>;
}

/// Opens independent sessions, one per unit.
pub trait Connect {
    type Session: Transport;

    fn connect(&self) -> Result<Self::Session, ScraperError>;
}

#[derive(Debug, Clone)]
pub struct WebScraper {
    client: Client,
    settings: ClientSettings,
}

impl WebScraper {
    pub fn new(settings: ClientSettings) -> Result<Self, ScraperError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .cookie_store(true)
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self { client, settings })
    }

    async fn pause(&self) {
        if !self.settings.request_delay.is_zero() {
            tokio::time::sleep(self.settings.request_delay).await;
        }
    }

    fn partial_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/xml, text/xml, */*; q=0.01"),
        );
        headers.insert("faces-request", HeaderValue::from_static("partial/ajax"));
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        headers
    }

    async fn read_body(&self, url: &str, response: reqwest::Response) -> Result<String, ScraperError> {
        let status = response.status();
        if !status.is_success() {
            log::error!("Unexpected status {} from {}", status, url);
            return Err(ScraperError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response
            .text()
            .await
            .inspect_err(|e| log::error!("Decode error: {e:?}"))?)
    }
}

impl Transport for WebScraper {
    async fn get(&self, url: &str) -> Result<String, ScraperError> {
        self.pause().await;
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .inspect_err(|e| log::error!("HTTP error: {e:?}"))?;
        self.read_body(url, response).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &Form,
        partial: bool,
    ) -> Result<String, ScraperError> {
        self.pause().await;
        log::debug!("POST {} ({} fields, partial: {})", url, form.len(), partial);
        let mut request = self.client.post(url).form(form);
        if partial {
            request = request.headers(Self::partial_headers());
        }
        let response = request
            .send()
            .await
            .inspect_err(|e| log::error!("HTTP error: {e:?}"))?;
        self.read_body(url, response).await
    }
}

/// Opens a fresh [`WebScraper`] (and cookie jar) per session.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    settings: ClientSettings,
}

impl HttpConnector {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl Connect for HttpConnector {
    type Session = WebScraper;

    fn connect(&self) -> Result<Self::Session, ScraperError> {
        WebScraper::new(self.settings.clone())
    }
}

/// Replaces the value of `name`, appending the field when absent.
pub(crate) fn set_field(form: &mut Form, name: &str, value: &str) {
    match form.iter_mut().find(|(n, _)| n == name) {
        Some((_, v)) => *v = value.to_string(),
        None => form.push((name.to_string(), value.to_string())),
    }
}

/// JSF partial-request parameters followed by the serialised form. The
/// parameters win over form fields of the same name.
pub(crate) fn partial_form(params: &[(&str, &str)], fields: &Form) -> Form {
    let mut form: Form = params
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
    for (name, value) in fields {
        if !form.iter().any(|(n, _)| n == name) {
            form.push((name.clone(), value.clone()));
        }
    }
    form
}
