use std::collections::HashMap;

use crate::entity::{Entity, EntityKind};
use crate::providable::{CompositeKey, ProvidableInfo};

/// Insertion-ordered entities indexed by composite key.
#[derive(Debug, Default)]
struct Staging {
    entries: Vec<Entity>,
    index: HashMap<CompositeKey, usize>,
}

impl Staging {
    fn get(&self, key: &CompositeKey) -> Option<&Entity> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    fn contains(&self, key: &CompositeKey) -> bool {
        self.index.contains_key(key)
    }

    fn put(&mut self, key: CompositeKey, entity: Entity) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i] = entity,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(entity);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn take(&mut self) -> Vec<Entity> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}

/// Per-run staging area for entities created or updated but not yet flushed.
///
/// Later records of a run resolve earlier ones through this batch without a
/// storage round-trip. Lookups are type-checked: an entry is only returned
/// when its runtime kind equals the requested kind.
#[derive(Debug, Default)]
pub struct InFlightBatch {
    inserts: Staging,
    updates: Staging,
}

impl InFlightBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The staged entity for an identity record, pending inserts first.
    pub fn resolve(&self, info: &ProvidableInfo) -> Option<&Entity> {
        let key = info.key();
        self.lookup(&key, info.kind())
    }

    pub fn get(&self, kind: EntityKind, external_id: &str) -> Option<&Entity> {
        let key = CompositeKey::new(external_id, kind);
        self.lookup(&key, kind)
    }

    fn lookup(&self, key: &CompositeKey, kind: EntityKind) -> Option<&Entity> {
        if let Some(entity) = self.inserts.get(key) {
            return (entity.kind() == kind).then_some(entity);
        }
        self.updates
            .get(key)
            .filter(|entity| entity.kind() == kind)
    }

    pub fn is_pending_insert(&self, key: &CompositeKey) -> bool {
        self.inserts.contains(key)
    }

    pub fn stage_insert(&mut self, key: CompositeKey, entity: Entity) {
        self.inserts.put(key, entity);
    }

    /// Stage an updated entity. An entity created earlier in the same run is
    /// replaced in place among the pending inserts.
    pub fn stage_update(&mut self, key: CompositeKey, entity: Entity) {
        if self.inserts.contains(&key) {
            self.inserts.put(key, entity);
        } else {
            self.updates.put(key, entity);
        }
    }

    pub fn pending_inserts(&self) -> usize {
        self.inserts.len()
    }

    pub fn pending_updates(&self) -> usize {
        self.updates.len()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty both maps, returning `(inserts, updates)` in staging order.
    pub fn drain(&mut self) -> (Vec<Entity>, Vec<Entity>) {
        (self.inserts.take(), self.updates.take())
    }
}

#[cfg(test)]
mod tests {
    use crate::entity::{EntityData, Offer};

    use super::*;

    fn info(kind: EntityKind, id: &str) -> ProvidableInfo {
        ProvidableInfo::new(kind, id, None).unwrap()
    }

    fn offer(id: &str, name: &str) -> Entity {
        Entity {
            data: EntityData::Offer(Offer {
                name: name.to_owned(),
                ..Offer::default()
            }),
            ..Entity::blank(EntityKind::Offer, id)
        }
    }

    #[test]
    fn resolves_staged_insert() {
        let mut batch = InFlightBatch::new();
        let record = info(EntityKind::Offer, "X");
        batch.stage_insert(record.key(), offer("X", "Cyrano"));

        let found = batch.resolve(&record).unwrap();
        assert_eq!(found.external_id.as_deref(), Some("X"));
    }

    #[test]
    fn resolves_staged_update() {
        let mut batch = InFlightBatch::new();
        let record = info(EntityKind::Offer, "X");
        batch.stage_update(record.key(), offer("X", "Cyrano"));

        assert!(batch.resolve(&record).is_some());
        assert_eq!(batch.pending_updates(), 1);
    }

    #[test]
    fn never_returns_entity_of_another_kind() {
        let mut batch = InFlightBatch::new();
        // Anomalous: an Offer staged under a Stock key.
        batch.stage_insert(CompositeKey::new("X", EntityKind::Stock), offer("X", "Cyrano"));

        assert!(batch.resolve(&info(EntityKind::Stock, "X")).is_none());
        assert!(batch.get(EntityKind::Stock, "X").is_none());
    }

    #[test]
    fn same_external_id_for_two_kinds_stays_separate() {
        let mut batch = InFlightBatch::new();
        batch.stage_insert(
            CompositeKey::new("X", EntityKind::Offer),
            offer("X", "Cyrano"),
        );

        assert!(batch.get(EntityKind::Offer, "X").is_some());
        assert!(batch.get(EntityKind::Stock, "X").is_none());
    }

    #[test]
    fn update_of_pending_insert_replaces_it_in_place() {
        let mut batch = InFlightBatch::new();
        let key = CompositeKey::new("X", EntityKind::Offer);
        batch.stage_insert(key.clone(), offer("X", "Cyrano"));
        batch.stage_update(key, offer("X", "Cyrano de Bergerac"));

        assert_eq!(batch.pending_inserts(), 1);
        assert_eq!(batch.pending_updates(), 0);
        let staged = batch.get(EntityKind::Offer, "X").unwrap();
        assert!(matches!(&staged.data, EntityData::Offer(o) if o.name == "Cyrano de Bergerac"));
    }

    #[test]
    fn drain_empties_both_maps_in_order() {
        let mut batch = InFlightBatch::new();
        batch.stage_insert(CompositeKey::new("A", EntityKind::Offer), offer("A", "a"));
        batch.stage_insert(CompositeKey::new("B", EntityKind::Offer), offer("B", "b"));
        batch.stage_update(CompositeKey::new("C", EntityKind::Offer), offer("C", "c"));
        assert_eq!(batch.len(), 3);

        let (inserts, updates) = batch.drain();
        assert_eq!(inserts.len(), 2);
        assert_eq!(inserts[0].external_id.as_deref(), Some("A"));
        assert_eq!(updates.len(), 1);
        assert!(batch.is_empty());
        assert!(batch.get(EntityKind::Offer, "A").is_none());
    }
}
