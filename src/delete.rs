//! Cascade delete engine: resolves deletion targets, optionally expands
//! them to their dependents, asks for confirmation and deletes the
//! definitive list sequentially with a pacing pause between calls.

use std::collections::HashMap;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::entity::{Entity, EntityType};
use crate::error::StoreError;
use crate::requester::Requester;
use crate::store::StoreClient;

/// Entity kinds a delete request may target. Cascade expansion can pull
/// in other kinds (processing executions), but a request starts here.
pub const DELETABLE: [EntityType; 4] = [
    EntityType::Upload,
    EntityType::StoredData,
    EntityType::Configuration,
    EntityType::Offering,
];

/// What to do when a filter matches more than one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiPolicy {
    /// Fail the request.
    Error,
    /// Keep only the first match, in listing order.
    First,
    /// Delete every match.
    #[default]
    All,
}

impl FromStr for MultiPolicy {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "error" => Ok(Self::Error),
            "first" => Ok(Self::First),
            "all" => Ok(Self::All),
            other => Err(StoreError::Unsupported(format!(
                "unknown multi-match policy '{other}', expected error, first or all"
            ))),
        }
    }
}

/// One deletion request, as expressed by the CLI or a workflow action.
#[derive(Debug, Clone, Default)]
pub struct DeleteRequest {
    pub kind: Option<EntityType>,
    /// Exact identifier; takes precedence over the filters.
    pub id: Option<String>,
    pub filter_infos: HashMap<String, String>,
    pub filter_tags: HashMap<String, String>,
    /// Expand each target to its dependents before deleting.
    pub cascade: bool,
    /// Treat zero matches as a no-op instead of an error.
    pub not_found_ok: bool,
    /// Multi-match policy; falls back to `[delete] if_multi` when unset.
    pub if_multi: Option<MultiPolicy>,
    pub datastore: Option<String>,
}

/// Confirmation hook: receives the full candidate list, returns the
/// definitive one. Returning an empty list cancels the whole request.
pub type ConfirmHook<'a> = &'a (dyn Fn(&[Entity]) -> Vec<Entity> + Send + Sync);

pub struct DeleteEngine<'a, R: Requester> {
    client: &'a StoreClient<R>,
}

impl<'a, R: Requester> DeleteEngine<'a, R> {
    pub fn new(client: &'a StoreClient<R>) -> Self {
        Self { client }
    }

    /// Runs the whole request: resolve, expand, confirm, delete.
    pub async fn run(
        &self,
        request: &DeleteRequest,
        confirm: Option<ConfirmHook<'_>>,
    ) -> Result<(), StoreError> {
        let kind = request
            .kind
            .ok_or_else(|| StoreError::Unsupported("a deletion needs an entity type".to_string()))?;
        if !DELETABLE.contains(&kind) {
            return Err(StoreError::Unsupported(format!(
                "cannot delete a {}, deletable types are: {}",
                kind.label(),
                DELETABLE
                    .iter()
                    .map(|k| k.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let mut targets = self.resolve_targets(kind, request).await?;
        if targets.is_empty() {
            if request.not_found_ok {
                info!(kind = kind.name(), "nothing matched, nothing to delete");
                return Ok(());
            }
            return Err(StoreError::NotFound {
                kind: kind.label(),
                id: request
                    .id
                    .clone()
                    .unwrap_or_else(|| "<filter>".to_string()),
            });
        }

        if request.cascade {
            info!("expanding deletion to dependent entities");
            let mut expanded = Vec::new();
            for target in &targets {
                expanded.extend(self.dependents(target).await?);
            }
            targets = expanded;
        }
        targets = dedupe(targets);

        if let Some(confirm) = confirm {
            targets = confirm(&targets);
        }
        if targets.is_empty() {
            info!("nothing deleted");
            return Ok(());
        }

        let pause = self.client.config().get_float("delete", "sleep_between", 1.0)?;
        let total = targets.len();
        info!(count = total, "starting deletion");
        for (index, target) in targets.iter().enumerate() {
            self.client.delete(target).await?;
            info!(id = target.id(), kind = target.kind().name(), "deleted");
            if pause > 0.0 && index + 1 < total {
                tokio::time::sleep(Duration::from_secs_f64(pause)).await;
            }
        }
        info!(count = total, "deletion finished");
        Ok(())
    }

    /// Resolves the request to concrete entities: by id when given (a
    /// 404 is "zero targets", deferred to the not_found_ok decision),
    /// else by filters with the multi-match policy applied.
    async fn resolve_targets(
        &self,
        kind: EntityType,
        request: &DeleteRequest,
    ) -> Result<Vec<Entity>, StoreError> {
        let datastore = request.datastore.as_deref();
        if let Some(id) = &request.id {
            return match self.client.get(kind, id, datastore).await {
                Ok(entity) => Ok(vec![entity]),
                Err(StoreError::NotFound { .. }) => Ok(Vec::new()),
                Err(other) => Err(other),
            };
        }
        if request.filter_infos.is_empty() && request.filter_tags.is_empty() {
            return Err(StoreError::Unsupported(
                "a deletion needs an id or at least one filter".to_string(),
            ));
        }

        let mut matches = self
            .client
            .list(
                kind,
                &request.filter_infos,
                &request.filter_tags,
                None,
                datastore,
            )
            .await?;
        if matches.len() > 1 {
            let policy = match request.if_multi {
                Some(policy) => policy,
                None => self
                    .client
                    .config()
                    .get_str("delete", "if_multi", "all")
                    .parse()?,
            };
            match policy {
                MultiPolicy::Error => {
                    return Err(StoreError::MultipleFound {
                        kind: kind.label(),
                        count: matches.len(),
                    })
                }
                MultiPolicy::First => {
                    warn!(
                        count = matches.len(),
                        "several matches, keeping the first one"
                    );
                    matches.truncate(1);
                }
                MultiPolicy::All => {
                    debug!(count = matches.len(), "several matches, deleting them all")
                }
            }
        }
        Ok(matches)
    }

    /// Dependents-first deletion list for one entity. Kinds without
    /// dependents expand to themselves only.
    async fn dependents(&self, entity: &Entity) -> Result<Vec<Entity>, StoreError> {
        let datastore = entity.datastore();
        let mut list = Vec::new();
        match entity.kind() {
            EntityType::Upload => {
                list.extend(
                    self.linked(
                        EntityType::ProcessingExecution,
                        "input_upload",
                        entity.id(),
                        datastore,
                    )
                    .await?,
                );
            }
            EntityType::StoredData => {
                let configurations = self
                    .linked(EntityType::Configuration, "stored_data", entity.id(), datastore)
                    .await?;
                for configuration in &configurations {
                    list.extend(
                        self.linked(
                            EntityType::Offering,
                            "configuration",
                            configuration.id(),
                            datastore,
                        )
                        .await?,
                    );
                }
                list.extend(configurations);
            }
            EntityType::Configuration => {
                list.extend(
                    self.linked(EntityType::Offering, "configuration", entity.id(), datastore)
                        .await?,
                );
            }
            _ => {}
        }
        list.push(entity.clone());
        Ok(list)
    }

    async fn linked(
        &self,
        kind: EntityType,
        key: &str,
        id: &str,
        datastore: Option<&str>,
    ) -> Result<Vec<Entity>, StoreError> {
        let infos = HashMap::from([(key.to_string(), id.to_string())]);
        self.client
            .list(kind, &infos, &HashMap::new(), None, datastore)
            .await
    }
}

/// Drops later duplicates, keeping first occurrences in order. Identity
/// follows [`Entity`] equality, i.e. the identifier alone.
fn dedupe(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|entity| seen.insert(entity.id().to_string()))
        .collect()
}
