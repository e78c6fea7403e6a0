//! Canonical annotation set mirrored into key-value storage
//!
//! The store keeps every annotation in memory and rewrites the complete snapshot
//! under a single key after each mutation. There are no partial writes: the value in
//! storage is always the full set as of the last successful mutation.
//!
//! Reads are fail-soft. A missing key, a value that is not JSON, or individual
//! entries of the wrong shape all degrade to "fewer annotations" rather than errors.
//! Writes are not: a failed write rolls back the in-memory change and is returned
//! to the caller so the user can be told the annotation would not survive a reload.

use crate::kv::{KeyValueStore, KvError};
use map_model::{
    validate_color, validate_ring, Annotation, AnnotationId, LatLng, Matcher, Shape,
    ValidationError, DEFAULT_STORAGE_KEY,
};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid annotation: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to serialize annotations: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("annotation ids are exhausted")]
    IdsExhausted,
    #[error("failed to write annotations to '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: KvError,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct AnnotationStore<K> {
    kv: K,
    key: String,
    annotations: Vec<Annotation>,
    /// `None` once `u64::MAX` has been handed out.
    next_id: Option<u64>,
}

impl<K: KeyValueStore> AnnotationStore<K> {
    /// Create an empty store over `kv` using the default `mapLayers` key.
    ///
    /// Nothing is read until [`AnnotationStore::load`] is called.
    pub fn new(kv: K) -> Self {
        Self::with_key(kv, DEFAULT_STORAGE_KEY)
    }

    pub fn with_key(kv: K, key: impl Into<String>) -> Self {
        Self { kv, key: key.into(), annotations: Vec::new(), next_id: Some(0) }
    }

    /// Create a store and immediately load whatever is already persisted.
    pub fn open(kv: K, key: impl Into<String>) -> Self {
        let mut store = Self::with_key(kv, key);
        store.load();
        store
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn into_inner(self) -> K {
        self.kv
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|annotation| annotation.id == id)
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Identifier the next created annotation will receive, if any remain.
    pub fn next_id(&self) -> Option<AnnotationId> {
        self.next_id.map(AnnotationId)
    }

    /// Replace the in-memory set with the persisted snapshot and return it.
    ///
    /// Never fails. Does not write.
    pub fn load(&mut self) -> Vec<Annotation> {
        let raw = match self.kv.get_item(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::debug!("no annotations stored under '{}'", self.key);
                String::from("[]")
            }
            Err(err) => {
                log::warn!("failed to read annotations from '{}': {err}; starting empty", self.key);
                String::from("[]")
            }
        };

        let mut annotations = decode_snapshot(&raw);
        let next_id = rekey_duplicates(&mut annotations);

        // Exhaustion is sticky: `None` ranks above every id.
        self.next_id = self.next_id.zip(next_id).map(|(current, loaded)| current.max(loaded));
        self.annotations = annotations;

        log::debug!("loaded {} annotations from '{}'", self.annotations.len(), self.key);
        self.annotations.clone()
    }

    pub fn add_marker(
        &mut self,
        lat: f64,
        lng: f64,
        note: impl Into<String>,
    ) -> StoreResult<Annotation> {
        let position = LatLng::new(lat, lng);
        position.validate()?;

        let id = self.next_id().ok_or(StoreError::IdsExhausted)?;
        let annotation = Annotation::marker(id, position, note);
        self.insert(annotation)
    }

    pub fn add_polygon(
        &mut self,
        vertices: Vec<LatLng>,
        color: impl Into<String>,
    ) -> StoreResult<Annotation> {
        let color = color.into();
        validate_ring(&vertices)?;
        validate_color(&color)?;

        let id = self.next_id().ok_or(StoreError::IdsExhausted)?;
        let annotation = Annotation::polygon(id, vertices, color);
        self.insert(annotation)
    }

    /// Replace the note of an existing marker.
    pub fn update_note(
        &mut self,
        id: AnnotationId,
        new_note: impl Into<String>,
    ) -> StoreResult<Annotation> {
        let index = self
            .annotations
            .iter()
            .position(|annotation| annotation.id == id)
            .ok_or(ValidationError::UnknownAnnotation(id))?;

        let Shape::Marker { note, .. } = &mut self.annotations[index].shape else {
            return Err(ValidationError::NotAMarker(id).into());
        };
        let previous = std::mem::replace(note, new_note.into());

        if let Err(err) = self.persist() {
            if let Shape::Marker { note, .. } = &mut self.annotations[index].shape {
                *note = previous;
            }
            return Err(err);
        }

        Ok(self.annotations[index].clone())
    }

    /// Remove every annotation the matcher selects and return them.
    ///
    /// Nothing is written when nothing matches.
    pub fn remove(&mut self, matcher: &Matcher) -> StoreResult<Vec<Annotation>> {
        self.remove_any(std::slice::from_ref(matcher))
    }

    /// Remove every annotation selected by at least one matcher, in a single write.
    pub fn remove_any(&mut self, matchers: &[Matcher]) -> StoreResult<Vec<Annotation>> {
        let (removed, kept): (Vec<Annotation>, Vec<Annotation>) =
            self.annotations.iter().cloned().partition(|annotation| {
                matchers.iter().any(|matcher| matcher.matches(annotation))
            });

        if removed.is_empty() {
            log::debug!("remove: no annotation matched {matchers:?}");
            return Ok(removed);
        }

        let previous = std::mem::replace(&mut self.annotations, kept);
        if let Err(err) = self.persist() {
            self.annotations = previous;
            return Err(err);
        }

        Ok(removed)
    }

    pub fn clear(&mut self) -> StoreResult<()> {
        let previous = std::mem::take(&mut self.annotations);
        if let Err(err) = self.persist() {
            self.annotations = previous;
            return Err(err);
        }
        Ok(())
    }

    /// Overwrite the stored snapshot with the current in-memory set.
    pub fn persist(&mut self) -> StoreResult<()> {
        let json = serde_json::to_string(&self.annotations)?;

        self.kv.set_item(&self.key, &json).map_err(|source| {
            log::warn!("failed to persist annotations under '{}': {source}", self.key);
            StoreError::Write { key: self.key.clone(), source }
        })?;

        log::debug!("persisted {} annotations under '{}'", self.annotations.len(), self.key);
        Ok(())
    }

    fn insert(&mut self, annotation: Annotation) -> StoreResult<Annotation> {
        self.annotations.push(annotation.clone());

        if let Err(err) = self.persist() {
            self.annotations.pop();
            return Err(err);
        }

        self.next_id = annotation.id.0.checked_add(1);
        Ok(annotation)
    }
}

fn decode_snapshot(raw: &str) -> Vec<Annotation> {
    let entries = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(entries)) => entries,
        Ok(serde_json::Value::Null) => return Vec::new(),
        Ok(_) => {
            log::warn!("stored annotation set is not a JSON array; starting empty");
            return Vec::new();
        }
        Err(err) => {
            log::warn!("stored annotation set is not valid JSON ({err}); starting empty");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let annotation = match serde_json::from_value::<Annotation>(entry) {
                Ok(annotation) => annotation,
                Err(err) => {
                    log::warn!("skipping stored entry {index}: {err}");
                    return None;
                }
            };

            if let Err(err) = annotation.validate() {
                log::warn!("skipping stored entry {index}: {err}");
                return None;
            }

            Some(annotation)
        })
        .collect()
}

/// Give repeated ids fresh values and return the first unused id.
///
/// Duplicates that cannot be re-keyed because the id space is used up are dropped.
fn rekey_duplicates(annotations: &mut Vec<Annotation>) -> Option<u64> {
    let mut next = match annotations.iter().map(|annotation| annotation.id.0).max() {
        Some(max) => max.checked_add(1),
        None => Some(0),
    };

    let mut seen = HashSet::new();
    annotations.retain_mut(|annotation| {
        if seen.insert(annotation.id) {
            return true;
        }

        let Some(fresh) = next.map(AnnotationId) else {
            log::warn!("dropping duplicate annotation id {}: no ids left", annotation.id);
            return false;
        };
        log::warn!("duplicate annotation id {} in storage, re-keyed as {fresh}", annotation.id);
        annotation.id = fresh;
        seen.insert(fresh);
        next = fresh.0.checked_add(1);
        true
    });

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{FileKeyValueStore, MemoryKeyValueStore};

    fn triangle() -> Vec<LatLng> {
        vec![LatLng::new(0.0, 0.0), LatLng::new(0.0, 1.0), LatLng::new(1.0, 1.0)]
    }

    fn stored(store: &AnnotationStore<MemoryKeyValueStore>) -> String {
        store.kv().get_item(store.key()).expect("read should succeed").unwrap_or_default()
    }

    #[test]
    fn added_marker_survives_reload() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        store.add_marker(20.6, -87.07, "note1").expect("add should succeed");

        let mut reopened = AnnotationStore::new(store.into_inner());
        let loaded = reopened.load();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].position(), Some(LatLng::new(20.6, -87.07)));
        assert_eq!(loaded[0].note(), Some("note1"));
    }

    #[test]
    fn polygon_removed_by_ring_leaves_empty_set() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        store.add_polygon(triangle(), "#ff0000").expect("add should succeed");

        let removed = store.remove(&Matcher::PolygonRing(triangle())).expect("remove should succeed");
        assert_eq!(removed.len(), 1);

        let mut reopened = AnnotationStore::new(store.into_inner());
        assert!(reopened.load().is_empty());
    }

    #[test]
    fn remove_by_marker_position_drops_every_match() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        store.add_marker(10.0, 10.0, "a").expect("add should succeed");
        store.add_marker(10.0, 10.0, "b").expect("add should succeed");
        store.add_marker(11.0, 10.0, "c").expect("add should succeed");

        let removed =
            store.remove(&Matcher::MarkerAt(LatLng::new(10.0, 10.0))).expect("remove should succeed");

        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 1);
        assert!(store
            .annotations()
            .iter()
            .all(|annotation| annotation.position() != Some(LatLng::new(10.0, 10.0))));
    }

    #[test]
    fn remove_without_match_does_not_write() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        store.add_marker(1.0, 1.0, "").expect("add should succeed");
        let writes = store.kv().writes();

        let removed = store.remove(&Matcher::Id(AnnotationId(99))).expect("remove should succeed");

        assert!(removed.is_empty());
        assert_eq!(store.kv().writes(), writes);
    }

    #[test]
    fn degenerate_polygon_is_rejected_without_mutation() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        let result = store.add_polygon(triangle()[..2].to_vec(), "#ff0000");

        assert!(matches!(
            result,
            Err(StoreError::Validation(ValidationError::TooFewVertices(2)))
        ));
        assert!(store.is_empty());
        assert_eq!(store.kv().writes(), 0);
        assert_eq!(store.next_id(), Some(AnnotationId(0)));
    }

    #[test]
    fn empty_color_is_rejected() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        let result = store.add_polygon(triangle(), "  ");
        assert!(matches!(result, Err(StoreError::Validation(ValidationError::EmptyColor))));
    }

    #[test]
    fn load_treats_garbage_and_missing_key_as_empty() {
        let mut garbage = AnnotationStore::new(MemoryKeyValueStore::with_item("mapLayers", "not-json"));
        assert!(garbage.load().is_empty());

        let mut object = AnnotationStore::new(MemoryKeyValueStore::with_item("mapLayers", "{}"));
        assert!(object.load().is_empty());

        let mut missing = AnnotationStore::new(MemoryKeyValueStore::new());
        assert!(missing.load().is_empty());
    }

    #[test]
    fn load_skips_malformed_entries_but_keeps_the_rest() {
        let raw = r##"[
            {"id": 0, "type": "marker", "lat": 1.0, "lng": 2.0, "popup": "ok"},
            {"id": 1, "type": "marker", "lat": "north", "lng": 2.0, "popup": ""},
            {"id": 2, "type": "circle", "lat": 1.0, "lng": 2.0},
            {"id": 3, "type": "polygon", "latLngs": [{"lat": 0, "lng": 0}], "color": "#fff"},
            {"id": 4, "type": "polygon", "latLngs": [{"lat": 0, "lng": 0}, {"lat": 0, "lng": 1}, {"lat": 1, "lng": 1}], "color": "#fff"}
        ]"##;
        let mut store = AnnotationStore::new(MemoryKeyValueStore::with_item("mapLayers", raw));

        let loaded = store.load();
        let ids: Vec<u64> = loaded.iter().map(|annotation| annotation.id.0).collect();

        assert_eq!(ids, vec![0, 4]);
        assert_eq!(store.next_id(), Some(AnnotationId(5)));
    }

    #[test]
    fn ids_continue_after_reload() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        store.add_marker(1.0, 1.0, "").expect("add should succeed");
        store.add_marker(2.0, 2.0, "").expect("add should succeed");

        let mut reopened = AnnotationStore::new(store.into_inner());
        reopened.load();
        let added = reopened.add_marker(3.0, 3.0, "").expect("add should succeed");

        assert_eq!(added.id, AnnotationId(2));
    }

    #[test]
    fn duplicate_stored_ids_are_rekeyed() {
        let raw = r#"[
            {"id": 0, "type": "marker", "lat": 1.0, "lng": 1.0, "popup": ""},
            {"id": 0, "type": "marker", "lat": 2.0, "lng": 2.0, "popup": ""}
        ]"#;
        let mut store = AnnotationStore::new(MemoryKeyValueStore::with_item("mapLayers", raw));

        let loaded = store.load();

        assert_eq!(loaded[0].id, AnnotationId(0));
        assert_eq!(loaded[1].id, AnnotationId(1));
        assert_eq!(store.next_id(), Some(AnnotationId(2)));
    }

    #[test]
    fn remove_any_is_all_or_nothing() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        let marker = store.add_marker(1.0, 1.0, "").expect("add should succeed");
        let polygon = store.add_polygon(triangle(), "#ff0000").expect("add should succeed");
        store.add_marker(3.0, 3.0, "").expect("add should succeed");

        let mut kv = store.into_inner();
        kv.set_read_only(true);
        let mut store = AnnotationStore::open(kv, "mapLayers");
        let matchers = [Matcher::Id(marker.id), Matcher::PolygonRing(triangle())];

        assert!(store.remove_any(&matchers).is_err());
        assert_eq!(store.len(), 3);

        let mut kv = store.into_inner();
        kv.set_read_only(false);
        let mut store = AnnotationStore::open(kv, "mapLayers");
        let removed = store.remove_any(&matchers).expect("remove should succeed");

        let ids: Vec<AnnotationId> = removed.iter().map(|annotation| annotation.id).collect();
        assert_eq!(ids, vec![marker.id, polygon.id]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.kv().writes(), 4);
    }

    #[test]
    fn highest_possible_id_exhausts_the_counter() {
        let raw = r#"[
            {"id": 18446744073709551615, "type": "marker", "lat": 1.0, "lng": 1.0, "popup": ""},
            {"id": 18446744073709551615, "type": "marker", "lat": 2.0, "lng": 2.0, "popup": ""}
        ]"#;
        let mut store = AnnotationStore::new(MemoryKeyValueStore::with_item("mapLayers", raw));

        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(store.next_id(), None);

        let before = stored(&store);
        let result = store.add_marker(3.0, 3.0, "");
        assert!(matches!(result, Err(StoreError::IdsExhausted)));
        assert_eq!(store.len(), 1);
        assert_eq!(stored(&store), before);
    }

    #[test]
    fn last_id_is_handed_out_once() {
        let raw = r#"[
            {"id": 18446744073709551614, "type": "marker", "lat": 1.0, "lng": 1.0, "popup": ""}
        ]"#;
        let mut store = AnnotationStore::new(MemoryKeyValueStore::with_item("mapLayers", raw));
        store.load();

        let last = store.add_polygon(triangle(), "#ff0000").expect("add should succeed");
        assert_eq!(last.id, AnnotationId(u64::MAX));
        assert!(matches!(store.add_marker(2.0, 2.0, ""), Err(StoreError::IdsExhausted)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn persist_after_load_leaves_snapshot_unchanged() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        store.add_marker(20.6296, -87.0739, "playa").expect("add should succeed");
        store.add_polygon(triangle(), "#123456").expect("add should succeed");
        let before = stored(&store);

        let mut reopened = AnnotationStore::new(store.into_inner());
        reopened.load();
        reopened.persist().expect("persist should succeed");

        assert_eq!(stored(&reopened), before);
    }

    #[test]
    fn failed_write_rolls_back_and_surfaces_error() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        store.add_marker(1.0, 1.0, "kept").expect("add should succeed");

        let mut kv = store.into_inner();
        kv.set_read_only(true);
        let mut store = AnnotationStore::open(kv, "mapLayers");

        let result = store.add_marker(2.0, 2.0, "lost");
        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert_eq!(store.len(), 1);
        assert_eq!(store.next_id(), Some(AnnotationId(1)));

        let removed = store.remove(&Matcher::Id(AnnotationId(0)));
        assert!(removed.is_err());
        assert_eq!(store.len(), 1);

        let edited = store.update_note(AnnotationId(0), "changed");
        assert!(edited.is_err());
        assert_eq!(store.annotations()[0].note(), Some("kept"));
    }

    #[test]
    fn update_note_rewrites_marker_only() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        let marker = store.add_marker(1.0, 1.0, "").expect("add should succeed");
        let polygon = store.add_polygon(triangle(), "#ff0000").expect("add should succeed");

        let updated = store.update_note(marker.id, "gate code 1234").expect("update should succeed");
        assert_eq!(updated.note(), Some("gate code 1234"));

        assert!(matches!(
            store.update_note(polygon.id, "x"),
            Err(StoreError::Validation(ValidationError::NotAMarker(_)))
        ));
        assert!(matches!(
            store.update_note(AnnotationId(42), "x"),
            Err(StoreError::Validation(ValidationError::UnknownAnnotation(_)))
        ));
    }

    #[test]
    fn file_backed_store_round_trips() {
        let temp = tempfile::tempdir().expect("temp dir should be created");

        let mut store = AnnotationStore::open(FileKeyValueStore::new(temp.path()), "mapLayers");
        store.add_marker(20.6, -87.07, "note1").expect("add should succeed");
        store.add_polygon(triangle(), "#ff0000").expect("add should succeed");

        let reopened = AnnotationStore::open(FileKeyValueStore::new(temp.path()), "mapLayers");
        assert_eq!(reopened.annotations(), store.annotations());
    }

    #[test]
    fn clear_empties_storage() {
        let mut store = AnnotationStore::new(MemoryKeyValueStore::new());
        store.add_marker(1.0, 1.0, "").expect("add should succeed");
        store.clear().expect("clear should succeed");

        assert_eq!(stored(&store), "[]");
        assert_eq!(store.next_id(), Some(AnnotationId(1)));
    }
}
