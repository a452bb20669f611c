//! Resolver pipeline: substitutes placeholder expressions embedded in a
//! JSON document before the document is used as an API payload.
//!
//! A placeholder names its resolver explicitly: `{name.expression}`.
//! The pipeline serializes the document, substitutes every placeholder in
//! a single pass over the original text (one placeholder never sees the
//! result of another in the same pass), then re-parses; a document that is
//! no longer valid JSON afterwards is a [`ResolverError::Resolution`].
//!
//! A fully quoted placeholder (`"{name.expr}"`) is swallowed together
//! with its quotes when the resolver returns a non-string value, so a
//! resolver can inject raw JSON (a list, a mapping, a number) in place of
//! the whole string.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::entity::{filter_dict_from_str, json_get, EntityType};
use crate::error::{ResolverError, StoreError};
use crate::requester::Requester;
use crate::store::StoreClient;

/// Extra context handed to every resolver invocation.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Datastore scoping the resolution, when one applies.
    pub datastore: Option<String>,
}

/// A named substitution function. Implementations must wrap their own
/// failures in a [`ResolverError`] variant; nothing else escapes.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Unique registration name, referenced by placeholders.
    fn name(&self) -> &str;

    /// Resolves one placeholder expression to a value. A string result is
    /// substituted in place; any other JSON value replaces a fully quoted
    /// placeholder wholesale.
    async fn resolve(&self, expression: &str, ctx: &ResolveContext)
        -> Result<Value, ResolverError>;
}

/// Ordered registry of resolvers with the substitution engine.
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn Resolver>>,
    placeholder: Regex,
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverRegistry {
    pub fn new() -> Self {
        // Two alternatives: a fully quoted placeholder (quotes swallowed
        // for raw JSON injection) and a bare one.
        let placeholder = Regex::new(
            r#""\{(?P<q_resolver>[a-z0-9_]+)\.(?P<q_expr>[^{}"]+)\}"|\{(?P<resolver>[a-z0-9_]+)\.(?P<expr>[^{}"]+)\}"#,
        )
        .expect("placeholder pattern is valid");
        Self {
            resolvers: Vec::new(),
            placeholder,
        }
    }

    /// Registers a resolver. Names are unique: a duplicate registration
    /// is ignored with a warning, keeping the first one.
    pub fn add(&mut self, resolver: Box<dyn Resolver>) {
        if self.resolvers.iter().any(|r| r.name() == resolver.name()) {
            warn!(resolver = resolver.name(), "duplicate resolver registration ignored");
            return;
        }
        debug!(resolver = resolver.name(), "resolver registered");
        self.resolvers.push(resolver);
    }

    fn find(&self, name: &str) -> Result<&dyn Resolver, ResolverError> {
        self.resolvers
            .iter()
            .find(|r| r.name() == name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ResolverError::NotFound(name.to_string()))
    }

    /// Substitutes every placeholder of `text` in a single pass.
    pub async fn resolve_text(
        &self,
        text: &str,
        ctx: &ResolveContext,
    ) -> Result<String, ResolverError> {
        // Collect matches first so every placeholder resolves against the
        // original text, then splice the replacements back in.
        struct Found {
            start: usize,
            end: usize,
            resolver: String,
            expression: String,
            quoted: bool,
        }

        let mut found = Vec::new();
        for capture in self.placeholder.captures_iter(text) {
            let whole = capture
                .get(0)
                .map(|m| (m.start(), m.end()))
                .unwrap_or((0, 0));
            let (resolver, expression, quoted) = match capture.name("q_resolver") {
                Some(name) => (
                    name.as_str(),
                    capture.name("q_expr").map(|m| m.as_str()).unwrap_or(""),
                    true,
                ),
                None => (
                    capture.name("resolver").map(|m| m.as_str()).unwrap_or(""),
                    capture.name("expr").map(|m| m.as_str()).unwrap_or(""),
                    false,
                ),
            };
            found.push(Found {
                start: whole.0,
                end: whole.1,
                resolver: resolver.to_string(),
                expression: expression.to_string(),
                quoted,
            });
        }

        let mut output = String::with_capacity(text.len());
        let mut cursor = 0;
        for item in found {
            let resolver = self.find(&item.resolver)?;
            let resolved = resolver.resolve(&item.expression, ctx).await?;
            debug!(
                resolver = %item.resolver,
                expression = %item.expression,
                "placeholder resolved"
            );

            output.push_str(&text[cursor..item.start]);
            match resolved {
                // A string keeps its surrounding quotes when it had some.
                Value::String(s) if item.quoted => {
                    output.push('"');
                    output.push_str(&s);
                    output.push('"');
                }
                Value::String(s) => output.push_str(&s),
                // Raw JSON replaces the whole (possibly quoted) match.
                other => output.push_str(&other.to_string()),
            }
            cursor = item.end;
        }
        output.push_str(&text[cursor..]);
        Ok(output)
    }

    /// Serializes the document, substitutes, and re-parses. The re-parse
    /// failing means a malformed template or a resolver that broke the
    /// JSON syntax; both surface as [`ResolverError::Resolution`].
    pub async fn resolve_document(
        &self,
        document: &Value,
        ctx: &ResolveContext,
    ) -> Result<Value, ResolverError> {
        let text = serde_json::to_string(document).map_err(|e| ResolverError::Resolution {
            detail: e.to_string(),
        })?;
        let resolved = self.resolve_text(&text, ctx).await?;
        serde_json::from_str(&resolved).map_err(|e| {
            debug!(resolved = %resolved, "document invalid after resolution");
            ResolverError::Resolution {
                detail: e.to_string(),
            }
        })
    }
}

////////////////////////////////////////////////////////////////////////
// Built-in resolvers
////////////////////////////////////////////////////////////////////////

/// Resolves expressions against a static key/value document, typically
/// the extra parameters the user passed on the command line.
pub struct DictResolver {
    name: String,
    values: Value,
}

impl DictResolver {
    pub fn new(name: impl Into<String>, values: Value) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[async_trait]
impl Resolver for DictResolver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(
        &self,
        expression: &str,
        _ctx: &ResolveContext,
    ) -> Result<Value, ResolverError> {
        json_get(&self.values, expression)
            .cloned()
            .ok_or_else(|| ResolverError::Resolve {
                resolver: self.name.clone(),
                to_solve: expression.to_string(),
                message: "key not found".to_string(),
            })
    }
}

/// Resolves date/time expressions against the current local time.
pub struct DateResolver {
    name: String,
}

impl DateResolver {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Resolver for DateResolver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(
        &self,
        expression: &str,
        _ctx: &ResolveContext,
    ) -> Result<Value, ResolverError> {
        let now = Local::now();
        let rendered = match expression {
            "now" => now.to_rfc3339(),
            "date" => now.format("%Y-%m-%d").to_string(),
            "time" => now.format("%H:%M:%S").to_string(),
            "datetime" => now.format("%Y-%m-%dT%H:%M:%S").to_string(),
            other => {
                let Some(pattern) = other
                    .strip_prefix("strftime(")
                    .and_then(|rest| rest.strip_suffix(')'))
                else {
                    return Err(ResolverError::Resolve {
                        resolver: self.name.clone(),
                        to_solve: expression.to_string(),
                        message: "expected now, date, time, datetime or strftime(pattern)"
                            .to_string(),
                    });
                };
                now.format(pattern).to_string()
            }
        };
        Ok(Value::String(rendered))
    }
}

/// Resolves `str(path)`, `list(path)` and `dict(path)` expressions by
/// reading local files, so a payload can embed file content.
pub struct FileResolver {
    name: String,
}

impl FileResolver {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn read(&self, expression: &str, path: &PathBuf) -> Result<String, ResolverError> {
        if !path.exists() {
            return Err(ResolverError::FileNotFound {
                resolver: self.name.clone(),
                to_solve: expression.to_string(),
                path: path.clone(),
            });
        }
        std::fs::read_to_string(path).map_err(|_| ResolverError::FileInvalid {
            resolver: self.name.clone(),
            to_solve: expression.to_string(),
        })
    }
}

#[async_trait]
impl Resolver for FileResolver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(
        &self,
        expression: &str,
        _ctx: &ResolveContext,
    ) -> Result<Value, ResolverError> {
        let parse = |rest: &str| PathBuf::from(rest.trim());
        if let Some(rest) = expression
            .strip_prefix("str(")
            .and_then(|r| r.strip_suffix(')'))
        {
            let content = self.read(expression, &parse(rest))?;
            return Ok(Value::String(content.trim_end().to_string()));
        }
        for (prefix, want_array) in [("list(", true), ("dict(", false)] {
            if let Some(rest) = expression
                .strip_prefix(prefix)
                .and_then(|r| r.strip_suffix(')'))
            {
                let content = self.read(expression, &parse(rest))?;
                let parsed: Value =
                    serde_json::from_str(&content).map_err(|_| ResolverError::FileInvalid {
                        resolver: self.name.clone(),
                        to_solve: expression.to_string(),
                    })?;
                let matches = if want_array {
                    parsed.is_array()
                } else {
                    parsed.is_object()
                };
                if !matches {
                    return Err(ResolverError::FileInvalid {
                        resolver: self.name.clone(),
                        to_solve: expression.to_string(),
                    });
                }
                return Ok(parsed);
            }
        }
        Err(ResolverError::Resolve {
            resolver: self.name.clone(),
            to_solve: expression.to_string(),
            message: "expected str(path), list(path) or dict(path)".to_string(),
        })
    }
}

/// Resolves attributes of the authenticated user. The user document is
/// fetched once, at construction, so later resolutions stay local.
pub struct UserResolver {
    name: String,
    user: Value,
}

impl UserResolver {
    pub async fn new<R: Requester>(
        name: impl Into<String>,
        client: &StoreClient<R>,
    ) -> Result<Self, StoreError> {
        let user = client.user().await?;
        info!("authenticated user fetched for resolution");
        Ok(Self {
            name: name.into(),
            user,
        })
    }
}

#[async_trait]
impl Resolver for UserResolver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(
        &self,
        expression: &str,
        _ctx: &ResolveContext,
    ) -> Result<Value, ResolverError> {
        json_get(&self.user, expression)
            .cloned()
            .ok_or_else(|| ResolverError::UserAttribute {
                resolver: self.name.clone(),
                to_solve: expression.to_string(),
            })
    }
}

/// Resolves an attribute of a store entity found by filters, e.g.
/// `stored_data.infos._id [INFOS(name=orthophoto), TAGS(zone=75)]`.
pub struct StoreEntityResolver<R: Requester> {
    name: String,
    client: Arc<StoreClient<R>>,
    shape: Regex,
    infos: Regex,
    tags: Regex,
}

impl<R: Requester> StoreEntityResolver<R> {
    pub fn new(name: impl Into<String>, client: Arc<StoreClient<R>>) -> Self {
        Self {
            name: name.into(),
            client,
            shape: Regex::new(
                r"^(?P<kind>[a-z_]+)\.(?P<path>[A-Za-z0-9_.\-]+)(?:\s*\[(?P<filters>.+)\])?\s*$",
            )
            .expect("entity expression pattern is valid"),
            infos: Regex::new(r"INFOS\(([^)]*)\)").expect("infos filter pattern is valid"),
            tags: Regex::new(r"TAGS\(([^)]*)\)").expect("tags filter pattern is valid"),
        }
    }

    fn error(&self, expression: &str, message: impl Into<String>) -> ResolverError {
        ResolverError::Resolve {
            resolver: self.name.clone(),
            to_solve: expression.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl<R: Requester + 'static> Resolver for StoreEntityResolver<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(
        &self,
        expression: &str,
        ctx: &ResolveContext,
    ) -> Result<Value, ResolverError> {
        let Some(capture) = self.shape.captures(expression) else {
            return Err(self.error(
                expression,
                "expected <entity_type>.<attribute_path> [INFOS(...), TAGS(...)]",
            ));
        };

        let kind: EntityType = capture["kind"]
            .parse()
            .map_err(|e: StoreError| self.error(expression, e.to_string()))?;
        let path = capture["path"].to_string();

        let mut infos = Default::default();
        let mut tags = Default::default();
        if let Some(filters) = capture.name("filters") {
            let extract = |pattern: &Regex| -> Option<String> {
                pattern
                    .captures(filters.as_str())
                    .map(|c| c[1].to_string())
            };
            if let Some(raw) = extract(&self.infos) {
                infos = filter_dict_from_str(Some(&raw))
                    .map_err(|e| self.error(expression, e.to_string()))?;
            }
            if let Some(raw) = extract(&self.tags) {
                tags = filter_dict_from_str(Some(&raw))
                    .map_err(|e| self.error(expression, e.to_string()))?;
            }
        }

        let entities = self
            .client
            .list(kind, &infos, &tags, None, ctx.datastore.as_deref())
            .await
            .map_err(|e| self.error(expression, e.to_string()))?;
        let Some(entity) = entities.first() else {
            return Err(ResolverError::NoEntityFound {
                resolver: self.name.clone(),
                to_solve: expression.to_string(),
            });
        };

        entity
            .get(&path)
            .cloned()
            .ok_or_else(|| self.error(expression, format!("attribute '{path}' not found")))
    }
}
