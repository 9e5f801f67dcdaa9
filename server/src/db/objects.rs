//! In-memory object table keyed by `(entity_type, id)`.

use chrono::Utc;
use dashmap::DashMap;
use ferry_engine::record::{project, DEFAULT_KEY_FIELD};
use ferry_engine::Record;
use serde_json::Value;
use std::sync::Arc;

/// Set by the server when an object is created.
pub const CREATED_DATE: &str = "CreatedDate";
/// Set by the server on every write.
pub const LAST_MODIFIED_DATE: &str = "LastModifiedDate";

/// Fields clients cannot write.
const SYSTEM_FIELDS: [&str; 3] = [DEFAULT_KEY_FIELD, CREATED_DATE, LAST_MODIFIED_DATE];

/// Thread-safe object storage shared by all handlers.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: DashMap<(String, String), Record>,
}

/// Type alias for the shared store handle.
pub type Objects = Arc<ObjectStore>;

/// Create an empty shared store.
pub fn create_store() -> Objects {
    Arc::new(ObjectStore::default())
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn writable(fields: Record) -> impl Iterator<Item = (String, Value)> {
    fields
        .into_iter()
        .filter(|(name, _)| !SYSTEM_FIELDS.contains(&name.as_str()))
}

impl ObjectStore {
    /// Insert a new object and return its id.
    pub fn create(&self, entity_type: &str, fields: Record) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let stamp = now();

        let mut object: Record = writable(fields).collect();
        object.insert(DEFAULT_KEY_FIELD.to_string(), Value::String(id.clone()));
        object.insert(CREATED_DATE.to_string(), stamp.clone());
        object.insert(LAST_MODIFIED_DATE.to_string(), stamp);

        self.objects
            .insert((entity_type.to_string(), id.clone()), object);
        id
    }

    /// Fetch an object, restricted to `fields` when given. The id is always
    /// included.
    pub fn get(&self, entity_type: &str, id: &str, fields: Option<&[&str]>) -> Option<Record> {
        let object = self
            .objects
            .get(&(entity_type.to_string(), id.to_string()))?;
        let mut projected = project(&object, fields);
        projected.insert(DEFAULT_KEY_FIELD.to_string(), Value::String(id.to_string()));
        Some(projected)
    }

    /// Shallow-merge `fields` into an object. Returns false when it does not exist.
    pub fn update(&self, entity_type: &str, id: &str, fields: Record) -> bool {
        match self
            .objects
            .get_mut(&(entity_type.to_string(), id.to_string()))
        {
            Some(mut object) => {
                object.extend(writable(fields));
                object.insert(LAST_MODIFIED_DATE.to_string(), now());
                true
            }
            None => false,
        }
    }

    /// Remove an object. Returns false when it does not exist.
    pub fn delete(&self, entity_type: &str, id: &str) -> bool {
        self.objects
            .remove(&(entity_type.to_string(), id.to_string()))
            .is_some()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of stored objects of one type.
    pub fn count(&self, entity_type: &str) -> usize {
        self.objects
            .iter()
            .filter(|entry| entry.key().0 == entity_type)
            .count()
    }
}
