//! Object CRUD handlers.

use ferry_engine::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::ObjectStore;
use crate::error::{AppError, Result};

/// Query string for `GET /objects/{type}/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct RetrieveQuery {
    /// Comma-separated field names
    pub fields: Option<String>,
}

impl RetrieveQuery {
    fn field_names(&self) -> Option<Vec<&str>> {
        self.fields.as_deref().map(|fields| {
            fields
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect()
        })
    }
}

/// Body of a successful create.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub id: String,
    pub success: bool,
}

/// Entity types are plain identifiers such as `Account` or `My_Object__c`.
fn validate_entity_type(entity_type: &str) -> Result<()> {
    let valid = !entity_type.is_empty()
        && entity_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "invalid object type: {entity_type}"
        )))
    }
}

fn into_fields(body: Value) -> Result<Record> {
    match body {
        Value::Object(fields) => Ok(fields),
        other => Err(AppError::BadRequest(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

fn not_found(entity_type: &str, id: &str) -> AppError {
    AppError::NotFound(format!("{entity_type} {id}"))
}

/// Create an object from the request body.
pub fn handle_create(store: &ObjectStore, entity_type: &str, body: Value) -> Result<CreateResponse> {
    validate_entity_type(entity_type)?;
    let fields = into_fields(body)?;
    let id = store.create(entity_type, fields);
    tracing::debug!(entity_type, %id, "created object");
    Ok(CreateResponse { id, success: true })
}

/// Fetch one object, projected to the requested fields.
pub fn handle_retrieve(
    store: &ObjectStore,
    entity_type: &str,
    id: &str,
    query: &RetrieveQuery,
) -> Result<Record> {
    validate_entity_type(entity_type)?;
    let fields = query.field_names();
    store
        .get(entity_type, id, fields.as_deref())
        .ok_or_else(|| not_found(entity_type, id))
}

/// Merge the request body into an existing object.
pub fn handle_update(store: &ObjectStore, entity_type: &str, id: &str, body: Value) -> Result<()> {
    validate_entity_type(entity_type)?;
    let fields = into_fields(body)?;
    if !store.update(entity_type, id, fields) {
        return Err(not_found(entity_type, id));
    }
    tracing::debug!(entity_type, id, "updated object");
    Ok(())
}

/// Delete an object.
pub fn handle_delete(store: &ObjectStore, entity_type: &str, id: &str) -> Result<()> {
    validate_entity_type(entity_type)?;
    if !store.delete(entity_type, id) {
        return Err(not_found(entity_type, id));
    }
    tracing::debug!(entity_type, id, "deleted object");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_bad_input() {
        let store = ObjectStore::default();
        assert!(matches!(
            handle_create(&store, "Bad-Type", json!({})),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            handle_create(&store, "Account", json!([1, 2])),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            handle_delete(&store, "Account", "missing"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn fields_query_is_trimmed() {
        let query = RetrieveQuery {
            fields: Some("Name, Industry,,".to_string()),
        };
        assert_eq!(query.field_names(), Some(vec!["Name", "Industry"]));
        assert_eq!(RetrieveQuery::default().field_names(), None);
    }

    #[test]
    fn create_then_retrieve() {
        let store = ObjectStore::default();
        let created = handle_create(&store, "Account", json!({"Name": "Acme"})).unwrap();
        assert!(created.success);

        let query = RetrieveQuery {
            fields: Some("Name".to_string()),
        };
        let object = handle_retrieve(&store, "Account", &created.id, &query).unwrap();
        assert_eq!(Value::Object(object), json!({"Id": created.id, "Name": "Acme"}));
    }
}
