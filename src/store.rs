//! Generic store client: maps every resource kind to its REST operations.
//!
//! One [`StoreClient`] presents a uniform contract (fetch, create, list,
//! delete, refresh, edit) regardless of resource, plus the capability
//! operations (tags, comments, sharings, events, logs, re-upload) that a
//! kind may or may not support. Pagination is hidden behind a single
//! shared loop driven by the server's `Content-Range` header.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::entity::{Capability, Entity, EntityType};
use crate::error::{RequestError, StoreError};
use crate::requester::{range_next_page, range_total_page, Method, QueryParams, Requester, RouteParams};

/// Typed client over the requester boundary.
pub struct StoreClient<R: Requester> {
    requester: R,
    config: Arc<Config>,
}

impl<R: Requester> StoreClient<R> {
    pub fn new(requester: R, config: Arc<Config>) -> Self {
        Self { requester, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn requester(&self) -> &R {
        &self.requester
    }

    /// Fetches one entity by identifier.
    pub async fn get(
        &self,
        kind: EntityType,
        id: &str,
        datastore: Option<&str>,
    ) -> Result<Entity, StoreError> {
        let route = format!("{}_get", kind.name());
        let response = self
            .requester
            .route_request(
                &route,
                self.route_params(kind, Some(id), datastore),
                Method::Get,
                Vec::new(),
                None,
            )
            .await
            .map_err(|e| map_request_error(e, kind, id))?;
        Ok(Entity::new(kind, response.body, datastore.map(str::to_string)))
    }

    /// Creates one entity; the response body becomes its property tree.
    ///
    /// When `route_params` carries a datastore, the new entity is bound to
    /// it; otherwise no datastore is recorded.
    pub async fn create(
        &self,
        kind: EntityType,
        payload: Value,
        route_params: RouteParams,
    ) -> Result<Entity, StoreError> {
        let datastore = route_params.get("datastore").cloned();
        let route = format!("{}_create", kind.name());
        let response = self
            .requester
            .route_request(&route, route_params, Method::Post, Vec::new(), Some(payload))
            .await
            .map_err(|e| map_request_error(e, kind, "<new>"))?;
        info!(kind = kind.name(), "entity created");
        Ok(Entity::new(kind, response.body, datastore))
    }

    /// Lists entities matching the given attribute and tag filters.
    ///
    /// With `page`, exactly one request for that page is issued. Without,
    /// pages are fetched starting at 1 until the range header says the
    /// declared total has been reached; results are concatenated in
    /// request order, without deduplication.
    pub async fn list(
        &self,
        kind: EntityType,
        infos_filter: &HashMap<String, String>,
        tags_filter: &HashMap<String, String>,
        page: Option<usize>,
        datastore: Option<&str>,
    ) -> Result<Vec<Entity>, StoreError> {
        let limit = self.config.get_int("store_api", "nb_limit", 50)? as usize;

        let mut query: QueryParams = Vec::new();
        for (key, value) in infos_filter {
            query.push((key.clone(), value.clone()));
        }
        for (key, value) in tags_filter {
            query.push((format!("tags[{key}]"), value.clone()));
        }
        if let Some(fields) = kind.list_fields() {
            for field in fields.split(',') {
                query.push(("fields".to_string(), field.to_string()));
            }
        }

        let route = format!("{}_list", kind.name());
        let items = self
            .fetch_pages(
                &route,
                self.route_params(kind, None, datastore),
                query,
                page,
                limit,
                kind,
            )
            .await?;
        Ok(items
            .into_iter()
            .map(|properties| Entity::new(kind, properties, datastore.map(str::to_string)))
            .collect())
    }

    /// Deletes the entity server-side. The local value is left untouched
    /// and must be discarded by the caller.
    pub async fn delete(&self, entity: &Entity) -> Result<(), StoreError> {
        let kind = entity.kind();
        let route = format!("{}_delete", kind.name());
        self.requester
            .route_request(
                &route,
                self.route_params(kind, Some(entity.id()), entity.datastore()),
                Method::Delete,
                Vec::new(),
                None,
            )
            .await
            .map_err(|e| map_request_error(e, kind, entity.id()))?;
        info!(kind = kind.name(), id = entity.id(), "entity deleted");
        Ok(())
    }

    /// Re-fetches the entity and replaces the whole local property tree.
    /// Never merges: keys absent from the fresh payload are dropped.
    pub async fn refresh(&self, entity: &mut Entity) -> Result<(), StoreError> {
        let kind = entity.kind();
        let route = format!("{}_get", kind.name());
        let response = self
            .requester
            .route_request(
                &route,
                self.route_params(kind, Some(entity.id()), entity.datastore()),
                Method::Get,
                Vec::new(),
                None,
            )
            .await
            .map_err(|e| map_request_error(e, kind, entity.id()))?;
        entity.replace_properties(response.body);
        Ok(())
    }

    /// Partially edits the entity, then refreshes it. Only kinds carrying
    /// the partial-edit capability accept this.
    pub async fn edit(&self, entity: &mut Entity, patch: Value) -> Result<(), StoreError> {
        let kind = entity.kind();
        if !kind.supports(Capability::PartialEdit) {
            return Err(StoreError::Unsupported(format!(
                "cannot edit this entity ({})",
                kind.label()
            )));
        }
        let route = format!("{}_partial_edit", kind.name());
        self.requester
            .route_request(
                &route,
                self.route_params(kind, Some(entity.id()), entity.datastore()),
                Method::Patch,
                Vec::new(),
                Some(patch),
            )
            .await
            .map_err(|e| map_request_error(e, kind, entity.id()))?;
        self.refresh(entity).await
    }

    /// The authenticated user's description.
    pub async fn user(&self) -> Result<Value, StoreError> {
        let response = self
            .requester
            .route_request("user_get", RouteParams::new(), Method::Get, Vec::new(), None)
            .await
            .map_err(|e| map_request_error(e, EntityType::Key, "me"))?;
        Ok(response.body)
    }

    ////////////////////////////////////////////////////////////////////
    // Capability operations
    ////////////////////////////////////////////////////////////////////

    /// Adds or replaces tags, then refreshes the entity.
    pub async fn add_tags(
        &self,
        entity: &mut Entity,
        tags: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        self.ensure(entity.kind(), Capability::Tags, "tag")?;
        let route = format!("{}_add_tags", entity.kind().name());
        self.requester
            .route_request(
                &route,
                self.route_params(entity.kind(), Some(entity.id()), entity.datastore()),
                Method::Post,
                Vec::new(),
                Some(json!(tags)),
            )
            .await
            .map_err(|e| map_request_error(e, entity.kind(), entity.id()))?;
        self.refresh(entity).await
    }

    /// Removes the given tag keys, then refreshes the entity.
    pub async fn delete_tags(&self, entity: &mut Entity, keys: &[&str]) -> Result<(), StoreError> {
        self.ensure(entity.kind(), Capability::Tags, "untag")?;
        let route = format!("{}_delete_tags", entity.kind().name());
        let query: QueryParams = keys
            .iter()
            .map(|k| ("tags[]".to_string(), k.to_string()))
            .collect();
        self.requester
            .route_request(
                &route,
                self.route_params(entity.kind(), Some(entity.id()), entity.datastore()),
                Method::Delete,
                query,
                None,
            )
            .await
            .map_err(|e| map_request_error(e, entity.kind(), entity.id()))?;
        self.refresh(entity).await
    }

    pub async fn add_comment(&self, entity: &Entity, text: &str) -> Result<(), StoreError> {
        self.ensure(entity.kind(), Capability::Comments, "comment")?;
        let route = format!("{}_add_comment", entity.kind().name());
        self.requester
            .route_request(
                &route,
                self.route_params(entity.kind(), Some(entity.id()), entity.datastore()),
                Method::Post,
                Vec::new(),
                Some(json!({ "text": text })),
            )
            .await
            .map_err(|e| map_request_error(e, entity.kind(), entity.id()))?;
        Ok(())
    }

    pub async fn list_comments(&self, entity: &Entity) -> Result<Vec<Value>, StoreError> {
        self.ensure(entity.kind(), Capability::Comments, "list comments of")?;
        let route = format!("{}_list_comments", entity.kind().name());
        self.fetch_collection(&route, entity).await
    }

    pub async fn add_sharings(&self, entity: &Entity, datastores: &[&str]) -> Result<(), StoreError> {
        self.ensure(entity.kind(), Capability::Sharings, "share")?;
        let route = format!("{}_add_sharings", entity.kind().name());
        self.requester
            .route_request(
                &route,
                self.route_params(entity.kind(), Some(entity.id()), entity.datastore()),
                Method::Post,
                Vec::new(),
                Some(json!(datastores)),
            )
            .await
            .map_err(|e| map_request_error(e, entity.kind(), entity.id()))?;
        Ok(())
    }

    pub async fn list_sharings(&self, entity: &Entity) -> Result<Vec<Value>, StoreError> {
        self.ensure(entity.kind(), Capability::Sharings, "list sharings of")?;
        let route = format!("{}_list_sharings", entity.kind().name());
        self.fetch_collection(&route, entity).await
    }

    pub async fn delete_sharings(
        &self,
        entity: &Entity,
        datastores: &[&str],
    ) -> Result<(), StoreError> {
        self.ensure(entity.kind(), Capability::Sharings, "unshare")?;
        let route = format!("{}_delete_sharings", entity.kind().name());
        let query: QueryParams = datastores
            .iter()
            .map(|d| ("sharings[]".to_string(), d.to_string()))
            .collect();
        self.requester
            .route_request(
                &route,
                self.route_params(entity.kind(), Some(entity.id()), entity.datastore()),
                Method::Delete,
                query,
                None,
            )
            .await
            .map_err(|e| map_request_error(e, entity.kind(), entity.id()))?;
        Ok(())
    }

    pub async fn list_events(&self, entity: &Entity) -> Result<Vec<Value>, StoreError> {
        self.ensure(entity.kind(), Capability::Events, "list events of")?;
        let route = format!("{}_list_events", entity.kind().name());
        self.fetch_collection(&route, entity).await
    }

    /// Fetches the full log stream of the entity, page by page, and joins
    /// the lines. Uses the same range-driven loop as entity listing.
    pub async fn logs(&self, entity: &Entity) -> Result<String, StoreError> {
        Ok(self.log_lines(entity).await?.join("\n"))
    }

    /// Log lines containing the given substring.
    pub async fn logs_filter(
        &self,
        entity: &Entity,
        substring: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .log_lines(entity)
            .await?
            .into_iter()
            .filter(|line| line.contains(substring))
            .collect())
    }

    /// Fetches a window of the log stream: pages `first_page..=last_page`,
    /// keeping only lines containing `filter` (an empty filter keeps all).
    ///
    /// A positive page number counts from the start of the stream, a
    /// negative one counts back from the last page, and 0 stands for the
    /// first (resp. last) page. A window outside the declared page count
    /// is a [`StoreError::PageWindow`].
    pub async fn logs_pages(
        &self,
        entity: &Entity,
        first_page: i64,
        last_page: i64,
        filter: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.ensure(entity.kind(), Capability::Logs, "fetch logs of")?;
        let limit = self.config.get_int("store_api", "nb_limit_logs", 2000)? as usize;
        let route = format!("{}_logs", entity.kind().name());
        let params = self.route_params(entity.kind(), Some(entity.id()), entity.datastore());

        // One probe request just for the Content-Range, to size the window.
        let probe = self
            .requester
            .route_request(&route, params.clone(), Method::Get, page_query(1, limit), None)
            .await
            .map_err(|e| map_request_error(e, entity.kind(), entity.id()))?;
        let total = range_total_page(probe.content_range(), limit) as i64;

        if first_page.abs() > total + 1 {
            return Err(StoreError::PageWindow(format!(
                "first page {first_page} is outside the {total} available pages"
            )));
        }
        if last_page.abs() > total + 1 {
            return Err(StoreError::PageWindow(format!(
                "last page {last_page} is outside the {total} available pages"
            )));
        }
        let start = match first_page {
            p if p > 0 => p,
            p if p < 0 => total + p,
            _ => 1,
        };
        let end = match last_page {
            p if p > 0 => p,
            p if p < 0 => total + p,
            _ => total,
        };
        if start > end {
            return Err(StoreError::PageWindow(format!(
                "window start {start} is past its end {end}"
            )));
        }

        let mut lines: Vec<String> = Vec::new();
        // A strongly negative first page can normalize below 1; pages
        // before the first one do not exist.
        for page in start.max(1)..=end {
            let response = self
                .requester
                .route_request(
                    &route,
                    params.clone(),
                    Method::Get,
                    page_query(page as usize, limit),
                    None,
                )
                .await
                .map_err(|e| map_request_error(e, entity.kind(), entity.id()))?;
            if let Some(items) = response.body.as_array() {
                lines.extend(items.iter().map(|line| match line {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }));
            }
        }
        Ok(lines
            .into_iter()
            .filter(|line| filter.is_empty() || line.contains(filter))
            .collect())
    }

    async fn log_lines(&self, entity: &Entity) -> Result<Vec<String>, StoreError> {
        self.ensure(entity.kind(), Capability::Logs, "fetch logs of")?;
        let limit = self.config.get_int("store_api", "nb_limit_logs", 2000)? as usize;
        let route = format!("{}_logs", entity.kind().name());
        let items = self
            .fetch_pages(
                &route,
                self.route_params(entity.kind(), Some(entity.id()), entity.datastore()),
                Vec::new(),
                None,
                limit,
                entity.kind(),
            )
            .await?;
        Ok(items
            .into_iter()
            .map(|line| match line {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect())
    }

    /// Replaces the entity's backing file (PUT), then refreshes it.
    pub async fn re_upload(&self, entity: &mut Entity, file: &Path) -> Result<(), StoreError> {
        let kind = entity.kind();
        self.ensure(kind, Capability::ReUpload, "re-upload")?;
        let route = format!("{}_re_upload", kind.name());
        let file_key = self.config.get_str(kind.name(), "create_file_key", "file");
        self.requester
            .route_upload_file(
                &route,
                self.route_params(kind, Some(entity.id()), entity.datastore()),
                Method::Put,
                Vec::new(),
                file,
                &file_key,
            )
            .await
            .map_err(|e| map_request_error(e, kind, entity.id()))?;
        self.refresh(entity).await
    }

    ////////////////////////////////////////////////////////////////////
    // Upload lifecycle
    ////////////////////////////////////////////////////////////////////

    /// Pushes one data file into the upload, under the given remote path.
    pub async fn push_data_file(
        &self,
        upload: &Entity,
        file: &Path,
        api_path: &str,
    ) -> Result<(), StoreError> {
        let file_key = self.config.get_str("upload", "push_data_file_key", "file");
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.requester
            .route_upload_file(
                "upload_push_data",
                self.route_params(EntityType::Upload, Some(upload.id()), upload.datastore()),
                Method::Post,
                vec![("path".to_string(), format!("{api_path}/{file_name}"))],
                file,
                &file_key,
            )
            .await
            .map_err(|e| map_request_error(e, EntityType::Upload, upload.id()))?;
        Ok(())
    }

    /// Removes one data file from the upload.
    pub async fn delete_data_file(&self, upload: &Entity, api_path: &str) -> Result<(), StoreError> {
        self.requester
            .route_request(
                "upload_delete_data",
                self.route_params(EntityType::Upload, Some(upload.id()), upload.datastore()),
                Method::Delete,
                vec![("path".to_string(), api_path.to_string())],
                None,
            )
            .await
            .map_err(|e| map_request_error(e, EntityType::Upload, upload.id()))?;
        Ok(())
    }

    /// Pushes the checksum file of the upload.
    pub async fn push_md5_file(&self, upload: &Entity, file: &Path) -> Result<(), StoreError> {
        let file_key = self.config.get_str("upload", "push_md5_file_key", "file");
        self.requester
            .route_upload_file(
                "upload_push_md5",
                self.route_params(EntityType::Upload, Some(upload.id()), upload.datastore()),
                Method::Post,
                Vec::new(),
                file,
                &file_key,
            )
            .await
            .map_err(|e| map_request_error(e, EntityType::Upload, upload.id()))?;
        Ok(())
    }

    /// Removes one checksum file from the upload.
    pub async fn delete_md5_file(&self, upload: &Entity, api_path: &str) -> Result<(), StoreError> {
        self.requester
            .route_request(
                "upload_delete_md5",
                self.route_params(EntityType::Upload, Some(upload.id()), upload.datastore()),
                Method::Delete,
                vec![("path".to_string(), api_path.to_string())],
                None,
            )
            .await
            .map_err(|e| map_request_error(e, EntityType::Upload, upload.id()))?;
        Ok(())
    }

    /// Whether the upload is currently open, according to a fresh fetch.
    pub async fn is_open(&self, upload: &mut Entity) -> Result<bool, StoreError> {
        self.refresh(upload).await?;
        let Some(status) = upload.get_str("status") else {
            return Err(StoreError::StateConflict(format!(
                "cannot read the status of {upload}"
            )));
        };
        Ok(status == self.config.get_str("upload", "status_open", "OPEN"))
    }

    /// Re-opens a closed upload. Opening an already-open upload is a
    /// warning and a no-op; any other starting state is a conflict.
    pub async fn open_upload(&self, upload: &mut Entity) -> Result<(), StoreError> {
        if self.is_open(upload).await? {
            warn!(id = upload.id(), "upload is already open");
            return Ok(());
        }
        let status = upload.get_str("status").unwrap_or_default();
        let closed = self.config.get_str("upload", "status_closed", "CLOSED");
        let unstable = self.config.get_str("upload", "status_unstable", "UNSTABLE");
        if status != closed && status != unstable {
            return Err(StoreError::StateConflict(format!(
                "upload {upload} cannot be re-opened from status '{status}'"
            )));
        }
        self.upload_state_change(upload, "upload_open").await?;
        info!(id = upload.id(), "upload re-opened");
        Ok(())
    }

    /// Closes an open upload, which triggers the server-side checks.
    /// Closing an already-closed or already-checking upload is a warning
    /// and a no-op; any other starting state is a conflict.
    pub async fn close_upload(&self, upload: &mut Entity) -> Result<(), StoreError> {
        if self.is_open(upload).await? {
            self.upload_state_change(upload, "upload_close").await?;
            info!(id = upload.id(), "upload closed");
            return Ok(());
        }
        let status = upload.get_str("status").unwrap_or_default();
        let closed = self.config.get_str("upload", "status_closed", "CLOSED");
        let checking = self.config.get_str("upload", "status_checking", "CHECKING");
        if status == closed || status == checking {
            warn!(id = upload.id(), status = %status, "upload is already closed");
            return Ok(());
        }
        Err(StoreError::StateConflict(format!(
            "upload {upload} cannot be closed from status '{status}'"
        )))
    }

    async fn upload_state_change(&self, upload: &mut Entity, route: &str) -> Result<(), StoreError> {
        self.requester
            .route_request(
                route,
                self.route_params(EntityType::Upload, Some(upload.id()), upload.datastore()),
                Method::Post,
                Vec::new(),
                None,
            )
            .await
            .map_err(|e| map_request_error(e, EntityType::Upload, upload.id()))?;
        self.refresh(upload).await
    }

    /// Tree of the files pushed into the upload so far.
    pub async fn upload_tree(&self, upload: &Entity) -> Result<Vec<Value>, StoreError> {
        self.fetch_collection("upload_tree", upload).await
    }

    /// Checks launched on the upload, grouped by state by the server.
    pub async fn list_checks(&self, upload: &Entity) -> Result<Value, StoreError> {
        let response = self
            .requester
            .route_request(
                "upload_list_checks",
                self.route_params(EntityType::Upload, Some(upload.id()), upload.datastore()),
                Method::Get,
                Vec::new(),
                None,
            )
            .await
            .map_err(|e| map_request_error(e, EntityType::Upload, upload.id()))?;
        Ok(response.body)
    }

    /// Launches extra checks on the upload.
    pub async fn run_checks(&self, upload: &Entity, check_ids: &[&str]) -> Result<(), StoreError> {
        self.requester
            .route_request(
                "upload_run_checks",
                self.route_params(EntityType::Upload, Some(upload.id()), upload.datastore()),
                Method::Post,
                Vec::new(),
                Some(json!({ "checks": check_ids })),
            )
            .await
            .map_err(|e| map_request_error(e, EntityType::Upload, upload.id()))?;
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////
    // Shared plumbing
    ////////////////////////////////////////////////////////////////////

    /// Range-driven pagination loop shared by listing and log fetching.
    ///
    /// With `page` set, exactly one request is issued for that page, no
    /// matter what the range header says. Without, pages are requested
    /// from 1 upward until the header reports the declared total reached;
    /// an absent or unparsable header stops the loop after the current
    /// response.
    async fn fetch_pages(
        &self,
        route: &str,
        route_params: RouteParams,
        query: QueryParams,
        page: Option<usize>,
        limit: usize,
        kind: EntityType,
    ) -> Result<Vec<Value>, StoreError> {
        let mut collected: Vec<Value> = Vec::new();
        let mut current = page.unwrap_or(1);
        loop {
            let mut page_query = query.clone();
            page_query.push(("page".to_string(), current.to_string()));
            page_query.push(("limit".to_string(), limit.to_string()));

            let response = self
                .requester
                .route_request(route, route_params.clone(), Method::Get, page_query, None)
                .await
                .map_err(|e| map_request_error(e, kind, "<list>"))?;

            if let Some(items) = response.body.as_array() {
                collected.extend(items.iter().cloned());
            }

            if page.is_some() {
                break;
            }
            if !range_next_page(response.content_range(), collected.len()) {
                break;
            }
            current += 1;
        }
        Ok(collected)
    }

    /// One-shot fetch of a sub-collection (comments, sharings, events).
    async fn fetch_collection(&self, route: &str, entity: &Entity) -> Result<Vec<Value>, StoreError> {
        let response = self
            .requester
            .route_request(
                route,
                self.route_params(entity.kind(), Some(entity.id()), entity.datastore()),
                Method::Get,
                Vec::new(),
                None,
            )
            .await
            .map_err(|e| map_request_error(e, entity.kind(), entity.id()))?;
        Ok(response.body.as_array().cloned().unwrap_or_default())
    }

    fn route_params(
        &self,
        kind: EntityType,
        id: Option<&str>,
        datastore: Option<&str>,
    ) -> RouteParams {
        let mut params = RouteParams::new();
        if let Some(datastore) = datastore {
            if !datastore.is_empty() {
                params.insert("datastore".to_string(), datastore.to_string());
            }
        }
        if let Some(id) = id {
            params.insert(kind.name().to_string(), id.to_string());
        }
        params
    }

    fn ensure(&self, kind: EntityType, capability: Capability, verb: &str) -> Result<(), StoreError> {
        if kind.supports(capability) {
            Ok(())
        } else {
            Err(StoreError::Unsupported(format!(
                "cannot {verb} a {}",
                kind.label()
            )))
        }
    }
}

fn page_query(page: usize, limit: usize) -> QueryParams {
    vec![
        ("page".to_string(), page.to_string()),
        ("limit".to_string(), limit.to_string()),
    ]
}

fn map_request_error(error: RequestError, kind: EntityType, id: &str) -> StoreError {
    match error {
        RequestError::NotFound { .. } => StoreError::NotFound {
            kind: kind.label(),
            id: id.to_string(),
        },
        RequestError::Transport(transport) => StoreError::Transport(transport),
    }
}
