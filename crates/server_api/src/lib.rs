use serde_json::{Map, Value};
use shared::{
    domain::{missing_required_fields, EntityKind, RecordId},
    entities::ApplicantStatus,
    error::{ApiError, ApiException, ErrorCode},
    protocol::{ListQuery, RecordDocument},
};
use storage::Storage;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub fn resolve_collection(segment: &str) -> Result<EntityKind, ApiError> {
    EntityKind::from_path_segment(segment).ok_or_else(|| {
        ApiError::new(
            ErrorCode::NotFound,
            format!("unknown collection '{segment}'"),
        )
    })
}

pub async fn list_records(
    ctx: &ApiContext,
    kind: EntityKind,
    query: &ListQuery,
) -> Result<Vec<RecordDocument>, ApiError> {
    let records = ctx
        .storage
        .list_records(kind, query)
        .await
        .map_err(internal)?;
    Ok(records.into_iter().map(|r| r.into_document()).collect())
}

/// Records a public page may render: active only, display order.
pub async fn list_public(
    ctx: &ApiContext,
    kind: EntityKind,
) -> Result<Vec<RecordDocument>, ApiError> {
    if !kind.has_public_listing() {
        return Err(ApiError::new(
            ErrorCode::NotFound,
            format!("{kind} have no public listing"),
        ));
    }
    list_records(
        ctx,
        kind,
        &ListQuery {
            active: Some(true),
            ..ListQuery::default()
        },
    )
    .await
}

pub async fn get_record(
    ctx: &ApiContext,
    kind: EntityKind,
    slug: &str,
) -> Result<RecordDocument, ApiError> {
    ctx.storage
        .record_by_slug(kind, slug)
        .await
        .map_err(internal)?
        .map(|r| r.into_document())
        .ok_or_else(|| not_found(kind, slug))
}

pub async fn create_record(
    ctx: &ApiContext,
    kind: EntityKind,
    doc: RecordDocument,
) -> Result<RecordDocument, ApiError> {
    validate(kind, &doc)?;
    let record = ctx
        .storage
        .insert_record(kind, &doc)
        .await
        .map_err(internal)?;
    debug!(collection = %kind, id = record.id.0, "record created");
    Ok(record.into_document())
}

pub async fn update_record(
    ctx: &ApiContext,
    kind: EntityKind,
    slug: &str,
    doc: RecordDocument,
) -> Result<RecordDocument, ApiError> {
    validate(kind, &doc)?;
    ctx.storage
        .update_record(kind, slug, &doc)
        .await
        .map_err(internal)?
        .map(|r| r.into_document())
        .ok_or_else(|| not_found(kind, slug))
}

/// Merges `patch` into the stored record. Keys naming record metadata
/// (`slug`, `order`, `active`) update it; `null` removes an entity field.
pub async fn patch_record(
    ctx: &ApiContext,
    kind: EntityKind,
    id: RecordId,
    patch: Map<String, Value>,
) -> Result<RecordDocument, ApiError> {
    let current = ctx
        .storage
        .record_by_id(kind, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(kind, &id.to_string()))?;
    let mut doc = current.into_document();

    for (key, value) in patch {
        match key.as_str() {
            "id" | "updated_at" => {}
            "slug" => {
                doc.slug = value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid_field("slug", "a string"))?;
            }
            "order" => {
                doc.order = value
                    .as_i64()
                    .ok_or_else(|| invalid_field("order", "an integer"))?;
            }
            "active" => {
                doc.active = value
                    .as_bool()
                    .ok_or_else(|| invalid_field("active", "a boolean"))?;
            }
            _ if value.is_null() => {
                doc.fields.remove(&key);
            }
            _ => {
                doc.fields.insert(key, value);
            }
        }
    }

    validate(kind, &doc)?;
    ctx.storage
        .update_record_by_id(kind, id, &doc)
        .await
        .map_err(internal)?
        .map(|r| r.into_document())
        .ok_or_else(|| not_found(kind, &id.to_string()))
}

/// Deleting a record that no longer exists still succeeds.
pub async fn delete_record(ctx: &ApiContext, kind: EntityKind, key: &str) -> Result<(), ApiError> {
    let removed = ctx
        .storage
        .delete_record(kind, key)
        .await
        .map_err(internal)?;
    if !removed {
        debug!(collection = %kind, key, "delete of missing record ignored");
    }
    Ok(())
}

pub async fn save_collection(
    ctx: &ApiContext,
    kind: EntityKind,
    docs: Vec<RecordDocument>,
) -> Result<Vec<RecordDocument>, ApiError> {
    let mut seen_slugs = std::collections::HashSet::new();
    for doc in &docs {
        validate(kind, doc)?;
        if doc.id.is_none() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("record '{}' must be created before it can be reordered", doc.slug),
            ));
        }
        if !seen_slugs.insert(doc.slug.trim()) {
            return Err(ApiError::new(
                ErrorCode::Conflict,
                format!("slug '{}' appears more than once", doc.slug.trim()),
            ));
        }
    }

    let records = ctx
        .storage
        .replace_collection(kind, &docs)
        .await
        .map_err(internal)?;
    Ok(records.into_iter().map(|r| r.into_document()).collect())
}

pub fn validate(kind: EntityKind, doc: &RecordDocument) -> Result<(), ApiError> {
    let slug = doc.slug.trim();
    if !slug.is_empty()
        && !slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "slug may only contain letters, digits, '-' and '_'",
        ));
    }

    let missing = missing_required_fields(kind, &doc.to_flat_object());
    if !missing.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("missing required fields: {}", missing.join(", ")),
        ));
    }

    if let Some(field) = kind.status_field() {
        if let Some(raw) = doc.field_str(field) {
            raw.parse::<ApplicantStatus>()
                .map_err(|message| ApiError::new(ErrorCode::Validation, message))?;
        }
    }
    Ok(())
}

fn not_found(kind: EntityKind, key: &str) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("{} '{key}' not found", kind.label()))
}

fn invalid_field(field: &str, expected: &str) -> ApiError {
    ApiError::new(
        ErrorCode::Validation,
        format!("field '{field}' must be {expected}"),
    )
}

fn internal(err: anyhow::Error) -> ApiError {
    match err.downcast::<ApiException>() {
        Ok(exception) => exception.into(),
        Err(err) => {
            warn!(error = %err, "storage failure");
            ApiError::new(ErrorCode::Internal, err.to_string())
        }
    }
}
