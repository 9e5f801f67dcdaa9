//! Remote side of a sync: the object server client and the server-sync
//! function the router calls.
//!
//! [`RemoteClient`] abstracts the network layer (HTTP in production, an
//! in-memory double in tests). [`ServerSync`] is the single entry point the
//! router uses to perform one CRUD method against the server;
//! [`RemoteObjectSync`] adapts a client for one entity type.

use crate::error::{RemoteError, Result};
use crate::mode::CrudMethod;
use crate::record::{project, strip_bookkeeping, Record, DEFAULT_KEY_FIELD};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Result type for remote client calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// CRUD client for a remote object server.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Create an object and return its server-assigned id.
    async fn create(&self, entity_type: &str, fields: &Record) -> RemoteResult<String>;

    /// Fetch an object, restricted to `fieldlist` when given.
    async fn retrieve(
        &self,
        entity_type: &str,
        id: &str,
        fieldlist: Option<&[&str]>,
    ) -> RemoteResult<Option<Record>>;

    /// Apply a partial update.
    async fn update(&self, entity_type: &str, id: &str, fields: &Record) -> RemoteResult<()>;

    async fn delete(&self, entity_type: &str, id: &str) -> RemoteResult<()>;
}

/// Performs one CRUD method against the server.
///
/// Implementations return the server's view of the record: the created
/// record including its new key, the fetched record, the updated
/// attributes, or `None` after a delete.
#[async_trait]
pub trait ServerSync: Send + Sync {
    async fn sync(
        &self,
        method: CrudMethod,
        id: Option<&str>,
        attributes: &Record,
        fieldlist: Option<&[&str]>,
    ) -> Result<Option<Record>>;
}

/// [`ServerSync`] for one entity type over a [`RemoteClient`].
#[derive(Clone)]
pub struct RemoteObjectSync {
    client: Arc<dyn RemoteClient>,
    entity_type: String,
    key_field: String,
}

impl RemoteObjectSync {
    pub fn new(client: Arc<dyn RemoteClient>, entity_type: impl Into<String>) -> Self {
        Self {
            client,
            entity_type: entity_type.into(),
            key_field: DEFAULT_KEY_FIELD.to_string(),
        }
    }

    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Fields to send: restricted to `fieldlist`, without the key or any
    /// bookkeeping field.
    fn fields_to_send(&self, attributes: &Record, fieldlist: Option<&[&str]>) -> Record {
        strip_bookkeeping(&project(attributes, fieldlist), &self.key_field)
    }

    fn require_id<'a>(&self, method: CrudMethod, id: Option<&'a str>) -> Result<&'a str> {
        id.ok_or_else(|| {
            RemoteError::Decode(format!("{method} on {} requires an id", self.entity_type)).into()
        })
    }
}

#[async_trait]
impl ServerSync for RemoteObjectSync {
    async fn sync(
        &self,
        method: CrudMethod,
        id: Option<&str>,
        attributes: &Record,
        fieldlist: Option<&[&str]>,
    ) -> Result<Option<Record>> {
        match method {
            CrudMethod::Create => {
                let fields = self.fields_to_send(attributes, fieldlist);
                let new_id = self.client.create(&self.entity_type, &fields).await?;
                let mut created = attributes.clone();
                created.insert(self.key_field.clone(), Value::String(new_id));
                Ok(Some(created))
            }
            CrudMethod::Read => {
                let id = self.require_id(method, id)?;
                Ok(self.client.retrieve(&self.entity_type, id, fieldlist).await?)
            }
            CrudMethod::Update => {
                let id = self.require_id(method, id)?;
                let fields = self.fields_to_send(attributes, fieldlist);
                self.client.update(&self.entity_type, id, &fields).await?;
                Ok(Some(attributes.clone()))
            }
            CrudMethod::Delete => {
                let id = self.require_id(method, id)?;
                self.client.delete(&self.entity_type, id).await?;
                Ok(None)
            }
        }
    }
}

/// Calls made against a [`MemoryRemote`], per method.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub create: AtomicUsize,
    pub retrieve: AtomicUsize,
    pub update: AtomicUsize,
    pub delete: AtomicUsize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.create.load(Ordering::SeqCst)
            + self.retrieve.load(Ordering::SeqCst)
            + self.update.load(Ordering::SeqCst)
            + self.delete.load(Ordering::SeqCst)
    }
}

/// In-memory object server.
///
/// Objects are keyed by `(entity_type, id)`; ids are 18 characters like
/// those of the object servers this engine targets.
#[derive(Debug)]
pub struct MemoryRemote {
    objects: DashMap<(String, String), Record>,
    next_id: AtomicU64,
    key_field: String,
    calls: CallCounts,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            next_id: AtomicU64::new(0),
            key_field: DEFAULT_KEY_FIELD.to_string(),
            calls: CallCounts::default(),
        }
    }

    /// Calls received so far.
    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    /// Put an object on the server directly, bypassing call counting.
    pub fn seed(&self, entity_type: &str, id: &str, mut fields: Record) {
        fields.insert(self.key_field.clone(), Value::String(id.to_string()));
        self.objects
            .insert((entity_type.to_string(), id.to_string()), fields);
    }

    /// Change fields of an existing object directly, as another client would.
    pub fn edit(&self, entity_type: &str, id: &str, fields: Record) {
        if let Some(mut object) = self
            .objects
            .get_mut(&(entity_type.to_string(), id.to_string()))
        {
            object.extend(fields);
        }
    }

    /// Current server copy of an object, bypassing call counting.
    pub fn get(&self, entity_type: &str, id: &str) -> Option<Record> {
        self.objects
            .get(&(entity_type.to_string(), id.to_string()))
            .map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn not_found(entity_type: &str, id: &str) -> RemoteError {
        RemoteError::status(404, format!("{entity_type} {id} not found"))
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn create(&self, entity_type: &str, fields: &Record) -> RemoteResult<String> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("001{n:015}");
        self.seed(entity_type, &id, fields.clone());
        Ok(id)
    }

    async fn retrieve(
        &self,
        entity_type: &str,
        id: &str,
        fieldlist: Option<&[&str]>,
    ) -> RemoteResult<Option<Record>> {
        self.calls.retrieve.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(entity_type, id).map(|object| {
            let mut projected = project(&object, fieldlist);
            if let Some(key) = object.get(&self.key_field) {
                projected.insert(self.key_field.clone(), key.clone());
            }
            projected
        }))
    }

    async fn update(&self, entity_type: &str, id: &str, fields: &Record) -> RemoteResult<()> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        let mut object = self
            .objects
            .get_mut(&(entity_type.to_string(), id.to_string()))
            .ok_or_else(|| Self::not_found(entity_type, id))?;
        object.extend(fields.clone());
        Ok(())
    }

    async fn delete(&self, entity_type: &str, id: &str) -> RemoteResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        self.objects
            .remove(&(entity_type.to_string(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(entity_type, id))
    }
}
