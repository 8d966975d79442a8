use std::collections::VecDeque;

use catalog_sync::{
    BankInformation, BankInformationStatus, EntityKind, FillContext, FillError, LocalProvider,
    ProvidableInfo, Pull, ResumeToken, SourceError, Timestamp,
};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::dms_client::{Application, ApplicationState, DmsClient};

pub const BANK_INFORMATION_CLASS: &str = "BankInformation";

const AFFILIATION_LABEL: &str = "Je souhaite renseigner";
const SIREN_AFFILIATION: &str = "Le RIB par défaut pour toute structure liée à mon SIREN";
const SIRET_AFFILIATION: &str = "Le RIB lié à un unique SIRET";
const IBAN_LABEL: &str = "IBAN";
const BIC_LABEL: &str = "BIC";

/// Who the bank details of an application belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Holder {
    Offerer { siren: String },
    Venue { siret: String },
}

impl Holder {
    fn external_id(&self) -> &str {
        match self {
            Self::Offerer { siren } => siren,
            Self::Venue { siret } => siret,
        }
    }
}

struct Resolved {
    application: Application,
    holder: Holder,
}

/// Imports bank details filed as applications on an online procedure.
///
/// Only applications updated after the newest stored bank information are
/// listed. Each one becomes a single `BankInformation` identity keyed by the
/// SIREN or the SIRET it was filed for.
pub struct BankInformationProvider {
    client: Box<dyn DmsClient>,
    updated_since: Timestamp,
    listed: bool,
    pending: VecDeque<i64>,
    current: Option<Resolved>,
}

impl BankInformationProvider {
    pub fn new(client: Box<dyn DmsClient>) -> Self {
        Self {
            client,
            updated_since: listing_floor(),
            listed: false,
            pending: VecDeque::new(),
            current: None,
        }
    }

    async fn list_applications(&mut self) -> Result<(), SourceError> {
        let since = self.updated_since;
        let mut page = 1;
        loop {
            let listing = self.client.application_page(page, since).await?;
            debug!(
                page,
                applications = listing.applications.len(),
                "fetched application listing"
            );
            self.pending.extend(
                listing
                    .applications
                    .iter()
                    .filter(|a| a.updated_at > since)
                    .map(|a| a.id),
            );
            if listing.pagination.page_count <= page {
                break;
            }
            page += 1;
        }
        self.listed = true;
        Ok(())
    }

    fn record_for(&self, ctx: &FillContext<'_>) -> Result<&Resolved, FillError> {
        let resolved = self
            .current
            .as_ref()
            .ok_or_else(|| FillError::MissingField("current application".into()))?;
        if ctx.external_id() != resolved.holder.external_id() {
            return Err(FillError::Invalid(format!(
                "positioned on {}, asked to fill {}",
                resolved.holder.external_id(),
                ctx.external_id()
            )));
        }
        Ok(resolved)
    }
}

/// Listing lower bound when no bank information is stored yet.
fn listing_floor() -> Timestamp {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn holder(application: &Application) -> Result<Holder, String> {
    let id = application.id;
    match application.field(AFFILIATION_LABEL) {
        Some(SIREN_AFFILIATION) => match application.siren() {
            Some(siren) if is_digits(siren, 9) => Ok(Holder::Offerer {
                siren: siren.to_owned(),
            }),
            _ => Err(format!("no valid SIREN for application id {id}")),
        },
        Some(SIRET_AFFILIATION) => match application.siret() {
            Some(siret) if is_digits(siret, 14) => Ok(Holder::Venue {
                siret: siret.to_owned(),
            }),
            _ => Err(format!("no valid SIRET for application id {id}")),
        },
        _ => Err(format!("unknown RIB affiliation for application id {id}")),
    }
}

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_digit())
}

pub fn status_of(state: ApplicationState) -> BankInformationStatus {
    match state {
        ApplicationState::Closed => BankInformationStatus::Accepted,
        ApplicationState::Initiated | ApplicationState::Received => BankInformationStatus::Draft,
        ApplicationState::Refused | ApplicationState::WithoutContinuation => {
            BankInformationStatus::Rejected
        }
    }
}

/// Uppercase with all whitespace removed; blank answers count as missing.
fn banking_code(value: Option<&str>) -> Option<String> {
    let code: String = value?
        .split_whitespace()
        .collect::<String>()
        .to_uppercase();
    (!code.is_empty()).then_some(code)
}

#[async_trait::async_trait]
impl LocalProvider for BankInformationProvider {
    fn name(&self) -> &str {
        BANK_INFORMATION_CLASS
    }

    fn watermark_kind(&self) -> Option<EntityKind> {
        Some(EntityKind::BankInformation)
    }

    fn set_latest_watermark(&mut self, latest: Option<Timestamp>) {
        self.updated_since = latest.unwrap_or_else(listing_floor);
    }

    async fn start(&mut self, _resume: Option<&ResumeToken>) -> Result<(), SourceError> {
        self.listed = false;
        self.pending.clear();
        self.current = None;
        Ok(())
    }

    async fn next(&mut self) -> Result<Pull, SourceError> {
        if !self.listed {
            self.list_applications().await?;
        }

        while let Some(id) = self.pending.pop_front() {
            let application = self.client.application(id).await?;
            match holder(&application) {
                Ok(holder) => {
                    let info = ProvidableInfo::new(
                        EntityKind::BankInformation,
                        holder.external_id(),
                        Some(application.updated_at),
                    )?;
                    self.current = Some(Resolved {
                        application,
                        holder,
                    });
                    return Ok(Pull::Batch(vec![info]));
                }
                Err(reason) => warn!(application_id = id, %reason, "skipping application"),
            }
        }

        self.current = None;
        Ok(Pull::Exhausted)
    }

    fn fill_bank_information(
        &self,
        info: &mut BankInformation,
        ctx: &FillContext<'_>,
    ) -> Result<(), FillError> {
        let Resolved {
            application,
            holder,
        } = self.record_for(ctx)?;

        info.iban = banking_code(application.field(IBAN_LABEL));
        info.bic = banking_code(application.field(BIC_LABEL));
        info.application_id = application.id;
        info.status = status_of(application.state);
        match holder {
            Holder::Offerer { siren } => {
                info.offerer_siren = Some(siren.clone());
                info.venue_siret = None;
            }
            Holder::Venue { siret } => {
                info.offerer_siren = None;
                info.venue_siret = Some(siret.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use catalog_sync::InFlightBatch;

    use super::*;
    use crate::dms_client::{ApplicationPage, ApplicationSummary, Pagination};

    fn application(id: i64, affiliation: &str, state: ApplicationState) -> Application {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "updated_at": "2019-01-21T18:55:03.387Z",
            "state": "closed",
            "entreprise": {"siren": "793875030"},
            "etablissement": {"siret": "79387503000016"},
            "champs": [
                {"value": affiliation, "type_de_champ": {"libelle": AFFILIATION_LABEL}},
                {"value": "BdFefr2LCCB", "type_de_champ": {"libelle": BIC_LABEL}},
                {"value": "FR76 3000 6000  0112 3456 7890 189", "type_de_champ": {"libelle": IBAN_LABEL}}
            ]
        }))
        .map(|app: Application| Application { state, ..app })
        .unwrap()
    }

    struct StaticClient {
        applications: Vec<Application>,
    }

    #[async_trait::async_trait]
    impl DmsClient for StaticClient {
        async fn application_page(
            &self,
            page: u32,
            _updated_since: Timestamp,
        ) -> Result<ApplicationPage, SourceError> {
            Ok(ApplicationPage {
                applications: self
                    .applications
                    .iter()
                    .map(|a| ApplicationSummary {
                        id: a.id,
                        updated_at: a.updated_at,
                    })
                    .collect(),
                pagination: Pagination {
                    page,
                    page_count: 1,
                },
            })
        }

        async fn application(&self, id: i64) -> Result<Application, SourceError> {
            self.applications
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| SourceError::Other(format!("no application {id}")))
        }
    }

    fn provider(applications: Vec<Application>) -> BankInformationProvider {
        BankInformationProvider::new(Box::new(StaticClient { applications }))
    }

    #[test]
    fn application_states_map_to_statuses() {
        assert_eq!(status_of(ApplicationState::Closed), BankInformationStatus::Accepted);
        assert_eq!(status_of(ApplicationState::Initiated), BankInformationStatus::Draft);
        assert_eq!(status_of(ApplicationState::Received), BankInformationStatus::Draft);
        assert_eq!(status_of(ApplicationState::Refused), BankInformationStatus::Rejected);
        assert_eq!(
            status_of(ApplicationState::WithoutContinuation),
            BankInformationStatus::Rejected
        );
    }

    #[test]
    fn banking_codes_are_compacted_and_uppercased() {
        assert_eq!(
            banking_code(Some("FR76 3000 6000  0112 3456 7890 189")).as_deref(),
            Some("FR7630006000011234567890189")
        );
        assert_eq!(banking_code(Some("BdFefr2LCCB")).as_deref(), Some("BDFEFR2LCCB"));
        assert_eq!(banking_code(Some("   ")), None);
        assert_eq!(banking_code(None), None);
    }

    #[test]
    fn listing_floor_is_start_of_1900() {
        assert_eq!(listing_floor().to_rfc3339(), "1900-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn keys_by_siren_or_siret_and_skips_unknown_affiliation() {
        let mut source = provider(vec![
            application(1, SIREN_AFFILIATION, ApplicationState::Closed),
            application(2, "Autre chose", ApplicationState::Closed),
            application(3, SIRET_AFFILIATION, ApplicationState::Received),
        ]);
        source.set_latest_watermark(None);
        source.start(None).await.unwrap();

        let mut keys = Vec::new();
        while let Pull::Batch(infos) = source.next().await.unwrap() {
            keys.push(infos[0].key().to_string());
        }
        assert_eq!(
            keys,
            vec!["793875030|BankInformation", "79387503000016|BankInformation"]
        );
    }

    #[tokio::test]
    async fn fills_normalized_details_for_the_current_application() {
        let mut source = provider(vec![application(
            7,
            SIRET_AFFILIATION,
            ApplicationState::Refused,
        )]);
        source.start(None).await.unwrap();
        let Pull::Batch(infos) = source.next().await.unwrap() else {
            panic!("expected a batch");
        };

        let staged = InFlightBatch::new();
        let mut details = BankInformation::default();
        source
            .fill_bank_information(&mut details, &FillContext::new(&infos[0], &staged))
            .unwrap();

        assert_eq!(details.iban.as_deref(), Some("FR7630006000011234567890189"));
        assert_eq!(details.bic.as_deref(), Some("BDFEFR2LCCB"));
        assert_eq!(details.application_id, 7);
        assert_eq!(details.venue_siret.as_deref(), Some("79387503000016"));
        assert_eq!(details.offerer_siren, None);
        assert_eq!(details.status, BankInformationStatus::Rejected);
    }

    #[tokio::test]
    async fn applications_not_newer_than_the_watermark_are_ignored() {
        let app = application(1, SIREN_AFFILIATION, ApplicationState::Closed);
        let watermark = app.updated_at;
        let mut source = provider(vec![app]);
        source.set_latest_watermark(Some(watermark));
        source.start(None).await.unwrap();

        assert_eq!(source.next().await.unwrap(), Pull::Exhausted);
    }
}
