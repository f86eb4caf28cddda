use shared::domain::ServiceRecord;

/// Outcome of a single merge-store mutation. The caller decides whether
/// a change warrants a re-render notification; the store itself never
/// notifies anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Inserted,
    Updated,
    Removed,
    Unchanged,
}

impl StoreChange {
    pub fn is_mutation(self) -> bool {
        !matches!(self, StoreChange::Unchanged)
    }
}

/// The authoritative in-memory directory: service name -> record, with
/// insertion order preserved for a deterministic view. Mutated only
/// from the client's event loop; reads hand out clones.
///
/// There is no timestamp-based conflict resolution. Whatever event was
/// delivered last for a name is what the store holds.
#[derive(Debug, Default)]
pub struct DirectoryStore {
    records: Vec<ServiceRecord>,
}

impl DirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one `dirty` record. An existing record keeps its position
    /// and has `owner`, `stats` and `tasks` overwritten in place; the
    /// descriptor is only replaced when the incoming record carries
    /// one. An unknown name is appended at the end.
    pub fn apply_dirty(&mut self, incoming: ServiceRecord) -> StoreChange {
        match self.records.iter_mut().find(|r| r.name == incoming.name) {
            Some(existing) => {
                existing.owner = incoming.owner;
                existing.stats = incoming.stats;
                existing.tasks = incoming.tasks;
                if incoming.descriptor.is_some() {
                    existing.descriptor = incoming.descriptor;
                }
                StoreChange::Updated
            }
            None => {
                self.records.push(incoming);
                StoreChange::Inserted
            }
        }
    }

    /// Removes the record with exactly this name. Absent names are a
    /// no-op, never an error.
    pub fn apply_deleted(&mut self, name: &str) -> StoreChange {
        let before = self.records.len();
        self.records.retain(|r| r.name != name);
        if self.records.len() == before {
            StoreChange::Unchanged
        } else {
            StoreChange::Removed
        }
    }

    /// Applies a full snapshot record-by-record with the same merge
    /// logic as `apply_dirty`, so snapshot application commutes with
    /// push events that arrive while the fetch is in flight. Returns
    /// the number of records touched.
    pub fn apply_snapshot(&mut self, records: Vec<ServiceRecord>) -> usize {
        records
            .into_iter()
            .map(|record| self.apply_dirty(record))
            .filter(|change| change.is_mutation())
            .count()
    }

    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    pub fn get(&self, name: &str) -> Option<&ServiceRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// The subset of records that are provisioning recipes rather than
    /// live services.
    pub fn templates(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.records.iter().filter(|r| r.is_template())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::{Descriptor, Stats, TemplateParam};

    fn record(name: &str, owner: &str, good: f64, tasks: &[&str]) -> ServiceRecord {
        ServiceRecord {
            name: name.into(),
            owner: owner.into(),
            stats: Stats {
                good,
                bad: 0.0,
                slow: 0.0,
            },
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
            descriptor: None,
        }
    }

    #[test]
    fn snapshot_then_dirty_converges_to_latest_delivery() {
        let mut store = DirectoryStore::new();
        assert_eq!(store.apply_snapshot(vec![record("a", "x", 1.0, &[])]), 1);

        let change = store.apply_dirty(record("a", "y", 2.0, &["t1"]));
        assert_eq!(change, StoreChange::Updated);

        assert_eq!(store.len(), 1);
        let merged = store.get("a").expect("record a");
        assert_eq!(merged.owner, "y");
        assert_eq!(merged.stats.good, 2.0);
        assert_eq!(merged.tasks, vec!["t1".to_string()]);
    }

    #[test]
    fn dirty_is_idempotent() {
        let mut store = DirectoryStore::new();
        store.apply_dirty(record("a", "x", 1.0, &["t1"]));
        let once: Vec<_> = store.records().to_vec();

        store.apply_dirty(record("a", "x", 1.0, &["t1"]));
        assert_eq!(store.records(), &once[..]);
    }

    #[test]
    fn dirty_never_duplicates_and_preserves_position() {
        let mut store = DirectoryStore::new();
        store.apply_dirty(record("a", "x", 1.0, &[]));
        store.apply_dirty(record("b", "x", 1.0, &[]));
        store.apply_dirty(record("c", "x", 1.0, &[]));

        store.apply_dirty(record("b", "updated", 9.0, &[]));
        let names: Vec<_> = store.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(store.get("b").expect("b").owner, "updated");
    }

    #[test]
    fn deleted_removes_only_the_matching_name() {
        let mut store = DirectoryStore::new();
        store.apply_dirty(record("a", "x", 1.0, &[]));
        store.apply_dirty(record("b", "y", 2.0, &[]));

        assert_eq!(store.apply_deleted("a"), StoreChange::Removed);
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].name, "b");
        assert_eq!(store.records()[0].owner, "y");
    }

    #[test]
    fn deleting_absent_name_is_a_noop() {
        let mut store = DirectoryStore::new();
        store.apply_dirty(record("a", "x", 1.0, &[]));
        assert_eq!(store.apply_deleted("ghost"), StoreChange::Unchanged);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn deleted_after_merge_leaves_store_empty() {
        let mut store = DirectoryStore::new();
        store.apply_snapshot(vec![record("a", "x", 1.0, &[])]);
        store.apply_dirty(record("a", "y", 2.0, &["t1"]));
        store.apply_deleted("a");
        assert!(store.is_empty());
    }

    #[test]
    fn interleaved_snapshot_and_events_follow_arrival_order() {
        // dirty for "a" lands before the (stale) snapshot response;
        // the snapshot merge must not resurrect old field values wholesale,
        // and a later dirty still wins.
        let mut store = DirectoryStore::new();
        store.apply_dirty(record("a", "new-owner", 5.0, &["t1"]));
        store.apply_snapshot(vec![record("a", "old-owner", 1.0, &[]), record("b", "z", 0.0, &[])]);
        store.apply_dirty(record("a", "final", 7.0, &["t2"]));

        let a = store.get("a").expect("a");
        assert_eq!(a.owner, "final");
        assert_eq!(a.stats.good, 7.0);
        assert_eq!(a.tasks, vec!["t2".to_string()]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn dirty_without_descriptor_keeps_existing_descriptor() {
        let mut store = DirectoryStore::new();
        let mut template = record("web", "", 0.0, &[]);
        template.descriptor = Some(Descriptor {
            template: Some(vec![TemplateParam {
                name: "port".into(),
                title: "Port".into(),
            }]),
            extra: Default::default(),
        });
        store.apply_dirty(template);

        // A stats-only update must not strip the template marker.
        store.apply_dirty(record("web", "", 3.0, &[]));
        assert!(store.get("web").expect("web").is_template());
        assert_eq!(store.templates().count(), 1);
    }
}
