use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use hybrid_search::SearchableItem;
use index::Clock;
use matcher::{RemoveReport, UpsertReport};
use serde::Deserialize;
use std::sync::Arc;

/// Body of `PUT /api/v1/items/{id}`. The id comes from the path.
#[derive(Debug, Deserialize)]
pub struct ItemPayload {
    /// Optional; must equal the path id when given.
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Defaults to the time of the request.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ItemPayload {
    fn into_item(self, id: String, now: DateTime<Utc>) -> ServerResult<SearchableItem> {
        if let Some(body_id) = &self.id {
            if body_id != &id {
                return Err(ServerError::InvalidRequest(format!(
                    "body id {body_id:?} does not match path id {id:?}"
                )));
            }
        }
        let mut item = SearchableItem::new(id, self.title, self.created_at.unwrap_or(now))
            .with_tags(self.tags);
        item.description = self.description;
        item.category = self.category;
        item.game = self.game;
        item.owner = self.owner;
        item.refresh_content_hash();
        Ok(item)
    }
}

/// Insert or replace an item
///
/// Re-sending identical content reports `unchanged` and writes nothing.
pub async fn upsert_item(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    body: Result<Json<ItemPayload>, JsonRejection>,
) -> ServerResult<Json<UpsertReport>> {
    let Json(payload) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let item = payload.into_item(id, state.stack.clock.now())?;
    let report = state.stack.indexer.upsert(item).await?;
    Ok(Json(report))
}

/// Delete an item everywhere
///
/// Deleting an unknown id is not an error; the report says `not_found`.
pub async fn delete_item(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ServerResult<Json<RemoveReport>> {
    let report = state.stack.indexer.remove(&id).await?;
    Ok(Json(report))
}
