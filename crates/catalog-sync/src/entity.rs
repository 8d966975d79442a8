use std::fmt;

use serde::{Deserialize, Serialize};

use crate::providable::CompositeKey;
use crate::Timestamp;

const NAME_MAX_LENGTH: usize = 140;

/// The persisted entity types a provider can synchronize.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EntityKind {
    Product,
    Venue,
    Offer,
    Stock,
    BankInformation,
}

impl EntityKind {
    /// Canonical name, used in composite keys and in storage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Product => "Product",
            Self::Venue => "Venue",
            Self::Offer => "Offer",
            Self::Stock => "Stock",
            Self::BankInformation => "BankInformation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "product" | "products" => Some(Self::Product),
            "venue" | "venues" => Some(Self::Venue),
            "offer" | "offers" => Some(Self::Offer),
            "stock" | "stocks" => Some(Self::Stock),
            "bankinformation" | "bank-information" | "bank_information" => {
                Some(Self::BankInformation)
            }
            _ => None,
        }
    }

    pub fn all() -> [EntityKind; 5] {
        [
            Self::Product,
            Self::Venue,
            Self::Offer,
            Self::Stock,
            Self::BankInformation,
        ]
    }

    /// Whether entities of this kind carry images handled by the thumbnail sync.
    pub fn supports_thumbs(&self) -> bool {
        matches!(self, Self::Product | Self::Venue)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub ean: Option<String>,
    pub author: Option<String>,
    pub price_cents: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub name: String,
    pub siret: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub name: String,
    pub product_external_id: Option<String>,
    pub venue_id: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub offer_external_id: String,
    pub price_cents: i64,
    /// `None` means unlimited.
    pub quantity: Option<u32>,
    pub beginning_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankInformationStatus {
    Accepted,
    #[default]
    Draft,
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankInformation {
    pub iban: Option<String>,
    pub bic: Option<String>,
    pub application_id: i64,
    pub offerer_siren: Option<String>,
    pub venue_siret: Option<String>,
    pub status: BankInformationStatus,
}

/// Domain fields of an entity. The variant is the entity's runtime kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields")]
pub enum EntityData {
    Product(Product),
    Venue(Venue),
    Offer(Offer),
    Stock(Stock),
    BankInformation(BankInformation),
}

impl EntityData {
    /// Empty domain fields for a freshly created entity of `kind`.
    pub fn blank(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Product => Self::Product(Product::default()),
            EntityKind::Venue => Self::Venue(Venue::default()),
            EntityKind::Offer => Self::Offer(Offer::default()),
            EntityKind::Stock => Self::Stock(Stock::default()),
            EntityKind::BankInformation => Self::BankInformation(BankInformation::default()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Product(_) => EntityKind::Product,
            Self::Venue(_) => EntityKind::Venue,
            Self::Offer(_) => EntityKind::Offer,
            Self::Stock(_) => EntityKind::Stock,
            Self::BankInformation(_) => EntityKind::BankInformation,
        }
    }
}

/// One failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A persisted business object eligible for provider sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Assigned by storage on insert.
    pub id: Option<i64>,
    pub external_id: Option<String>,
    pub last_provider_id: Option<i64>,
    /// Watermark: upstream modification time recorded at the last provider write.
    pub last_modified_at_provider: Option<Timestamp>,
    pub thumb_count: u32,
    pub data: EntityData,
}

impl Entity {
    pub fn new(data: EntityData) -> Self {
        Self {
            id: None,
            external_id: None,
            last_provider_id: None,
            last_modified_at_provider: None,
            thumb_count: 0,
            data,
        }
    }

    /// A not-yet-stored entity of `kind` carrying `external_id` and empty fields.
    pub fn blank(kind: EntityKind, external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Self::new(EntityData::blank(kind))
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.data.kind()
    }

    pub fn key(&self) -> Option<CompositeKey> {
        self.external_id
            .as_deref()
            .map(|id| CompositeKey::new(id, self.kind()))
    }

    /// The watermark this provider left on the entity, if it was the last writer.
    pub fn last_sync_timestamp(&self, provider_id: i64) -> Option<Timestamp> {
        if self.last_provider_id == Some(provider_id) {
            self.last_modified_at_provider
        } else {
            None
        }
    }

    /// Field-level validation. An empty result means the entity can be stored.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.last_provider_id.is_some() && self.external_id.is_none() {
            issues.push(ValidationIssue::new(
                "external_id",
                "required when last_provider_id is set",
            ));
        }

        match &self.data {
            EntityData::Product(product) => {
                check_name(&mut issues, &product.name);
                check_non_negative(&mut issues, "price_cents", product.price_cents);
            }
            EntityData::Venue(venue) => {
                check_name(&mut issues, &venue.name);
                if let Some(siret) = &venue.siret
                    && !is_digits(siret, 14)
                {
                    issues.push(ValidationIssue::new("siret", "must be 14 digits"));
                }
            }
            EntityData::Offer(offer) => {
                check_name(&mut issues, &offer.name);
            }
            EntityData::Stock(stock) => {
                if stock.offer_external_id.trim().is_empty() {
                    issues.push(ValidationIssue::new("offer_external_id", "must not be blank"));
                }
                check_non_negative(&mut issues, "price_cents", Some(stock.price_cents));
            }
            EntityData::BankInformation(info) => validate_bank_information(&mut issues, info),
        }

        issues
    }
}

fn check_name(issues: &mut Vec<ValidationIssue>, name: &str) {
    if name.trim().is_empty() {
        issues.push(ValidationIssue::new("name", "must not be blank"));
    } else if name.chars().count() > NAME_MAX_LENGTH {
        issues.push(ValidationIssue::new(
            "name",
            format!("must be at most {NAME_MAX_LENGTH} characters"),
        ));
    }
}

fn check_non_negative(issues: &mut Vec<ValidationIssue>, field: &str, value: Option<i64>) {
    if value.is_some_and(|v| v < 0) {
        issues.push(ValidationIssue::new(field, "must not be negative"));
    }
}

fn validate_bank_information(issues: &mut Vec<ValidationIssue>, info: &BankInformation) {
    if info.offerer_siren.is_none() && info.venue_siret.is_none() {
        issues.push(ValidationIssue::new(
            "offerer_siren",
            "either an offerer SIREN or a venue SIRET is required",
        ));
    }

    // Drafts and rejections are recorded without banking details.
    if info.status != BankInformationStatus::Accepted {
        return;
    }

    match info.iban.as_deref() {
        Some(iban) if is_iban(iban) => {}
        Some(_) => issues.push(ValidationIssue::new("iban", "malformed IBAN")),
        None => issues.push(ValidationIssue::new("iban", "required when accepted")),
    }

    match info.bic.as_deref() {
        Some(bic) if is_bic(bic) => {}
        Some(_) => issues.push(ValidationIssue::new("bic", "malformed BIC")),
        None => issues.push(ValidationIssue::new("bic", "required when accepted")),
    }
}

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_digit())
}

fn is_iban(value: &str) -> bool {
    let bytes = value.as_bytes();
    (15..=34).contains(&bytes.len())
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..4].iter().all(u8::is_ascii_digit)
        && bytes.iter().all(u8::is_ascii_alphanumeric)
}

fn is_bic(value: &str) -> bool {
    matches!(value.len(), 8 | 11) && value.chars().all(|c| c.is_ascii_alphanumeric())
}
