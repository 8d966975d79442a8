use std::fmt;

use crate::entity::EntityKind;
use crate::Timestamp;

/// Separator between the external id and the kind name in a [`CompositeKey`].
pub const KEY_DELIMITER: char = '|';

/// Errors raised when building an identity record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("external id must not be empty")]
    EmptyExternalId,

    #[error("external id {0:?} contains the reserved '|' delimiter")]
    ReservedDelimiter(String),
}

/// Identity and version of one upstream record, as seen during a single sync pass.
///
/// Never persisted. The external id is guaranteed non-empty and free of
/// [`KEY_DELIMITER`] once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidableInfo {
    kind: EntityKind,
    external_id: String,
    upstream_modified_at: Option<Timestamp>,
}

impl ProvidableInfo {
    pub fn new(
        kind: EntityKind,
        external_id: impl Into<String>,
        upstream_modified_at: Option<Timestamp>,
    ) -> Result<Self, IdentityError> {
        let external_id = external_id.into();

        if external_id.is_empty() {
            return Err(IdentityError::EmptyExternalId);
        }
        if external_id.contains(KEY_DELIMITER) {
            return Err(IdentityError::ReservedDelimiter(external_id));
        }

        Ok(Self {
            kind,
            external_id,
            upstream_modified_at,
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// Upstream modification time. `None` means the source cannot report one.
    pub fn upstream_modified_at(&self) -> Option<Timestamp> {
        self.upstream_modified_at
    }

    pub fn key(&self) -> CompositeKey {
        CompositeKey::new(&self.external_id, self.kind)
    }
}

/// `"<external id>|<kind name>"`, the identity of an entity within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(String);

impl CompositeKey {
    pub fn new(external_id: &str, kind: EntityKind) -> Self {
        Self(format!("{external_id}{KEY_DELIMITER}{}", kind.name()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_joins_id_and_kind() {
        let info = ProvidableInfo::new(EntityKind::Offer, "9782895026310@77567146400110", None)
            .unwrap();
        assert_eq!(info.key().as_str(), "9782895026310@77567146400110|Offer");
    }

    #[test]
    fn same_id_different_kind_gives_different_keys() {
        let offer = CompositeKey::new("X", EntityKind::Offer);
        let stock = CompositeKey::new("X", EntityKind::Stock);
        assert_ne!(offer, stock);
    }

    #[test]
    fn rejects_empty_external_id() {
        let result = ProvidableInfo::new(EntityKind::Product, "", None);
        assert_eq!(result, Err(IdentityError::EmptyExternalId));
    }

    #[test]
    fn rejects_delimiter_in_external_id() {
        let result = ProvidableInfo::new(EntityKind::Product, "a|b", None);
        assert!(matches!(result, Err(IdentityError::ReservedDelimiter(_))));
    }
}
