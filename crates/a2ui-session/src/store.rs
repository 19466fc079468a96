//! Per-session surface documents, mutated only through the patch engine or a
//! whole-document replace.

use std::collections::HashMap;

use a2ui_protocol::{ApplyReport, Patch, SurfaceId, apply_patches};
use serde_json::{Map, Value};

/// Documents of one session, keyed by surface. Created lazily as `{}`.
#[derive(Debug, Default, Clone)]
pub struct SurfaceStore {
    documents: HashMap<SurfaceId, Value>,
}

impl SurfaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, surface_id: &SurfaceId) -> &mut Value {
        self.documents
            .entry(surface_id.clone())
            .or_insert_with(|| Value::Object(Map::new()))
    }

    pub fn replace_document(&mut self, surface_id: SurfaceId, document: Value) {
        self.documents.insert(surface_id, document);
    }

    pub fn apply_patches(&mut self, surface_id: &SurfaceId, patches: &[Patch]) -> ApplyReport {
        apply_patches(self.get_or_create(surface_id), patches)
    }

    /// Copy of a surface document, if the surface has been touched.
    pub fn snapshot(&self, surface_id: &str) -> Option<Value> {
        self.documents.get(surface_id).cloned()
    }

    pub fn surface_ids(&self) -> impl Iterator<Item = &SurfaceId> {
        self.documents.keys()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
