use std::path::PathBuf;

use catalog_sync::{SourceError, Timestamp};
use chrono::SecondsFormat;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Listing entry of a procedure's applications.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApplicationSummary {
    pub id: i64,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub page: u32,
    #[serde(rename = "nombre_de_page")]
    pub page_count: u32,
}

/// One page of a procedure's application listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationPage {
    #[serde(rename = "dossiers")]
    pub applications: Vec<ApplicationSummary>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// Processing state of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    Initiated,
    Received,
    Closed,
    Refused,
    WithoutContinuation,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Company {
    #[serde(default)]
    pub siren: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Establishment {
    #[serde(default)]
    pub siret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldType {
    #[serde(rename = "libelle")]
    pub label: String,
}

/// A form field answered by the applicant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Field {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(rename = "type_de_champ")]
    pub field_type: FieldType,
}

/// A bank details application, as filed on the procedure.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Application {
    pub id: i64,
    pub updated_at: Timestamp,
    pub state: ApplicationState,
    #[serde(rename = "entreprise", default)]
    pub company: Option<Company>,
    #[serde(rename = "etablissement", default)]
    pub establishment: Option<Establishment>,
    #[serde(rename = "champs", default)]
    pub fields: Vec<Field>,
}

impl Application {
    /// Answer to the field labelled `label`, if given.
    pub fn field(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.field_type.label == label)
            .and_then(|f| f.value.as_deref())
    }

    pub fn siren(&self) -> Option<&str> {
        self.company.as_ref()?.siren.as_deref()
    }

    pub fn siret(&self) -> Option<&str> {
        self.establishment.as_ref()?.siret.as_deref()
    }
}

#[derive(Deserialize)]
struct ApplicationEnvelope {
    #[serde(rename = "dossier")]
    application: Application,
}

/// Transport for the online procedure holding bank details applications.
#[async_trait::async_trait]
pub trait DmsClient: Send + Sync {
    /// Page `page` (1-based) of the applications updated after `updated_since`.
    async fn application_page(
        &self,
        page: u32,
        updated_since: Timestamp,
    ) -> Result<ApplicationPage, SourceError>;

    async fn application(&self, id: i64) -> Result<Application, SourceError>;
}

/// Reads applications from the procedure API.
pub struct HttpDmsClient {
    client: reqwest::Client,
    base_url: String,
    procedure_id: String,
    token: Option<String>,
    page_size: usize,
}

impl HttpDmsClient {
    const DEFAULT_PAGE_SIZE: usize = 100;

    pub fn new(
        base_url: impl Into<String>,
        procedure_id: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            procedure_id: procedure_id.into(),
            token,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn url(&self, path: &str) -> Result<Url, SourceError> {
        Url::parse(&format!(
            "{}/procedures/{}/{path}",
            self.base_url, self.procedure_id
        ))
        .map_err(|e| SourceError::Other(format!("invalid procedure url: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T, SourceError> {
        let mut req = self.client.get(url).header("User-Agent", "catalog-sync");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        let response = req
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("{what} request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SourceError::Network(format!(
                "{what} returned HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("failed to parse {what}: {e}")))
    }
}

#[async_trait::async_trait]
impl DmsClient for HttpDmsClient {
    async fn application_page(
        &self,
        page: u32,
        updated_since: Timestamp,
    ) -> Result<ApplicationPage, SourceError> {
        let mut url = self.url("dossiers")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("resultats_par_page", &self.page_size.to_string())
            .append_pair(
                "updated_since",
                &updated_since.to_rfc3339_opts(SecondsFormat::Millis, true),
            );

        self.get_json(url, "application listing").await
    }

    async fn application(&self, id: i64) -> Result<Application, SourceError> {
        let url = self.url(&format!("dossiers/{id}"))?;
        let envelope: ApplicationEnvelope = self.get_json(url, "application").await?;
        Ok(envelope.application)
    }
}

/// Serves applications from JSON files, for running without the live API.
///
/// The listing lives in `<dir>/dossiers.json` as a single page; each
/// application in `<dir>/dossier_<id>.json`.
pub struct FixtureDmsClient {
    dir: PathBuf,
}

impl FixtureDmsClient {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read<T: DeserializeOwned>(&self, file_name: &str) -> Result<T, SourceError> {
        let path = self.dir.join(file_name);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| SourceError::Parse(format!("{}: {e}", path.display())))
    }
}

#[async_trait::async_trait]
impl DmsClient for FixtureDmsClient {
    async fn application_page(
        &self,
        page: u32,
        _updated_since: Timestamp,
    ) -> Result<ApplicationPage, SourceError> {
        if page > 1 {
            return Ok(ApplicationPage::default());
        }
        self.read("dossiers.json")
    }

    async fn application(&self, id: i64) -> Result<Application, SourceError> {
        let envelope: ApplicationEnvelope = self.read(&format!("dossier_{id}.json"))?;
        Ok(envelope.application)
    }
}
