//! Workflow orchestration: a JSON file describing named steps, each a
//! list of action definitions run in order. Definitions go through the
//! resolver pipeline right before execution, so placeholders can refer
//! to entities created by earlier steps.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use crate::delete::{ConfirmHook, DeleteEngine, DeleteRequest, MultiPolicy};
use crate::entity::{Entity, EntityType};
use crate::error::{ResolverError, WorkflowError};
use crate::requester::{Requester, RouteParams};
use crate::resolver::{ResolveContext, ResolverRegistry};
use crate::store::StoreClient;

/// A parsed workflow document.
pub struct Workflow {
    name: String,
    doc: Value,
}

impl Workflow {
    /// Reads and parses a workflow file. The file name becomes the
    /// workflow name used in logs.
    pub fn from_file(path: &Path) -> Result<Self, WorkflowError> {
        let text = std::fs::read_to_string(path).map_err(|e| WorkflowError::File {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let doc: Value = serde_json::from_str(&text).map_err(|e| WorkflowError::File {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "workflow".to_string());
        Ok(Self { name, doc })
    }

    pub fn from_value(name: impl Into<String>, doc: Value) -> Self {
        Self {
            name: name.into(),
            doc,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn steps_map(&self) -> Result<&serde_json::Map<String, Value>, WorkflowError> {
        self.doc
            .get("workflow")
            .ok_or(WorkflowError::MissingKey("workflow"))?
            .get("steps")
            .and_then(Value::as_object)
            .ok_or(WorkflowError::MissingKey("steps"))
    }

    /// Step names, in document order.
    pub fn steps(&self) -> Result<Vec<&str>, WorkflowError> {
        Ok(self.steps_map()?.keys().map(String::as_str).collect())
    }

    /// Structural checks, all reported at once so a workflow author can
    /// fix a file in one pass. An empty list means the file is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let steps = match self.steps_map() {
            Ok(steps) => steps,
            Err(e) => return vec![e.to_string()],
        };
        if steps.is_empty() {
            issues.push("workflow has no steps".to_string());
        }
        for (name, step) in steps {
            let actions = step.get("actions").and_then(Value::as_array);
            match actions {
                None => issues.push(format!("step '{name}' has no actions list")),
                Some(actions) if actions.is_empty() => {
                    issues.push(format!("step '{name}' has an empty actions list"))
                }
                Some(actions) => {
                    for (index, action) in actions.iter().enumerate() {
                        let kind = action.get("type").and_then(Value::as_str);
                        match kind {
                            None => issues
                                .push(format!("action {index} of step '{name}' has no type")),
                            Some("delete-entity") | Some("create-entity") => {}
                            Some(other) => issues.push(format!(
                                "action {index} of step '{name}' has unknown type '{other}'"
                            )),
                        }
                    }
                }
            }
            if let Some(parents) = step.get("parents").and_then(Value::as_array) {
                for parent in parents {
                    let Some(parent) = parent.as_str() else {
                        issues.push(format!("step '{name}' has a non-string parent"));
                        continue;
                    };
                    if !steps.contains_key(parent) {
                        issues.push(format!("step '{name}' references unknown parent '{parent}'"));
                    }
                }
            }
        }
        issues
    }

    /// Runs every action of the given step, in order. Each definition is
    /// resolved just before it runs. The first failure aborts the step.
    pub async fn run_step<R: Requester + 'static>(
        &self,
        step_name: &str,
        client: &StoreClient<R>,
        registry: &ResolverRegistry,
        ctx: &ResolveContext,
        confirm: Option<ConfirmHook<'_>>,
    ) -> Result<Vec<Entity>, WorkflowError> {
        let steps = self.steps_map()?;
        let step = steps
            .get(step_name)
            .ok_or_else(|| WorkflowError::UnknownStep(step_name.to_string()))?;
        let actions = step
            .get("actions")
            .and_then(Value::as_array)
            .ok_or(WorkflowError::MissingKey("actions"))?;
        info!(
            workflow = %self.name,
            step = step_name,
            count = actions.len(),
            "running step"
        );

        let mut created = Vec::new();
        for (index, definition) in actions.iter().enumerate() {
            let action = Action::new(step_name, index, definition.clone());
            let action = action.resolve(registry, ctx).await?;
            if let Some(entity) = action.run(client, ctx, confirm).await? {
                created.push(entity);
            }
        }
        info!(workflow = %self.name, step = step_name, "step finished");
        Ok(created)
    }
}

/// One action of a step, carrying its (possibly resolved) definition.
pub struct Action {
    context: String,
    index: usize,
    definition: Value,
}

impl Action {
    pub fn new(context: impl Into<String>, index: usize, definition: Value) -> Self {
        Self {
            context: context.into(),
            index,
            definition,
        }
    }

    pub fn definition(&self) -> &Value {
        &self.definition
    }

    /// Runs the resolver pipeline over the definition. A definition that
    /// is no longer valid JSON afterwards names the step and index.
    pub async fn resolve(
        self,
        registry: &ResolverRegistry,
        ctx: &ResolveContext,
    ) -> Result<Self, WorkflowError> {
        debug!(step = %self.context, index = self.index, "resolving action definition");
        let resolved = registry
            .resolve_document(&self.definition, ctx)
            .await
            .map_err(|e| match e {
                ResolverError::Resolution { detail } => WorkflowError::InvalidAfterResolution {
                    context: self.context.clone(),
                    index: self.index,
                    detail,
                },
                other => WorkflowError::from(other),
            })?;
        Ok(Self {
            definition: resolved,
            ..self
        })
    }

    /// Dispatches on the action type. `create-entity` returns the
    /// created entity; `delete-entity` returns nothing.
    pub async fn run<R: Requester + 'static>(
        &self,
        client: &StoreClient<R>,
        ctx: &ResolveContext,
        confirm: Option<ConfirmHook<'_>>,
    ) -> Result<Option<Entity>, WorkflowError> {
        let kind = self
            .definition
            .get("type")
            .and_then(Value::as_str)
            .ok_or(WorkflowError::MissingKey("type"))?;
        match kind {
            "delete-entity" => {
                self.run_delete(client, ctx, confirm).await?;
                Ok(None)
            }
            "create-entity" => Ok(Some(self.run_create(client, ctx).await?)),
            other => Err(WorkflowError::Invalid(format!(
                "action {} of step '{}' has unknown type '{other}'",
                self.index, self.context
            ))),
        }
    }

    fn entity_type(&self) -> Result<EntityType, WorkflowError> {
        let name = self
            .definition
            .get("entity_type")
            .and_then(Value::as_str)
            .ok_or(WorkflowError::MissingKey("entity_type"))?;
        Ok(name.parse::<EntityType>()?)
    }

    fn string_map(&self, key: &str) -> HashMap<String, String> {
        self.definition
            .get(key)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn run_delete<R: Requester>(
        &self,
        client: &StoreClient<R>,
        ctx: &ResolveContext,
        confirm: Option<ConfirmHook<'_>>,
    ) -> Result<(), WorkflowError> {
        let if_multi = match self.definition.get("if_multi").and_then(Value::as_str) {
            Some(raw) => Some(raw.parse::<MultiPolicy>()?),
            None => None,
        };
        let request = DeleteRequest {
            kind: Some(self.entity_type()?),
            id: self
                .definition
                .get("entity_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            filter_infos: self.string_map("filter_infos"),
            filter_tags: self.string_map("filter_tags"),
            cascade: self
                .definition
                .get("cascade")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            not_found_ok: self
                .definition
                .get("not_found_ok")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            if_multi,
            datastore: ctx.datastore.clone(),
        };
        DeleteEngine::new(client).run(&request, confirm).await?;
        Ok(())
    }

    async fn run_create<R: Requester>(
        &self,
        client: &StoreClient<R>,
        ctx: &ResolveContext,
    ) -> Result<Entity, WorkflowError> {
        let kind = self.entity_type()?;
        let payload = self
            .definition
            .get("body_parameters")
            .cloned()
            .ok_or(WorkflowError::MissingKey("body_parameters"))?;
        let mut route_params = RouteParams::new();
        if let Some(datastore) = &ctx.datastore {
            route_params.insert("datastore".to_string(), datastore.clone());
        }
        let entity = client.create(kind, payload, route_params).await?;
        info!(
            step = %self.context,
            index = self.index,
            id = entity.id(),
            kind = kind.name(),
            "entity created"
        );
        Ok(entity)
    }
}
