//! Command-line interface for the geostore client.
//!
//! All business logic lives in the library modules; this module is
//! strictly argument parsing, wiring and console output. The async
//! entrypoint [`run`] takes a parsed [`Cli`] so integration tests can
//! drive the same code path as `main`.

use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::delete::{DeleteEngine, DeleteRequest};
use crate::entity::{filter_dict_from_str, Entity, EntityType};
use crate::requester::{HttpRequester, StaticTokenProvider};
use crate::resolver::{
    DateResolver, DictResolver, FileResolver, ResolveContext, ResolverRegistry,
    StoreEntityResolver, UserResolver,
};
use crate::store::StoreClient;
use crate::workflow::Workflow;

/// Environment variable holding the API access token.
pub const TOKEN_ENV: &str = "GEOSTORE_TOKEN";

/// CLI for geostore: inspect and manage entities of a geographic data store.
#[derive(Parser)]
#[clap(
    name = "geostore",
    version,
    about = "Client for a geographic data store: entities, workflows, cascade deletion"
)]
pub struct Cli {
    /// Extra configuration files (.ini or .toml) overlaid onto the
    /// defaults, in order; the last one wins
    #[clap(long, global = true)]
    pub config: Vec<PathBuf>,

    /// Datastore identifier, overriding the configured default
    #[clap(long, global = true)]
    pub datastore: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show, list or delete store entities
    Entities {
        /// Entity type (upload, stored_data, configuration, offering, ...)
        entity_type: String,

        /// Entity identifier; omit it to list
        id: Option<String>,

        /// Attribute filters, as name=value pairs separated by commas
        #[clap(long)]
        infos: Option<String>,

        /// Tag filters, as name=value pairs separated by commas
        #[clap(long)]
        tags: Option<String>,

        /// Fetch a single result page instead of all of them
        #[clap(long)]
        page: Option<usize>,

        /// Delete the matched entities instead of displaying them
        #[clap(long)]
        delete: bool,

        /// With --delete, also delete dependent entities
        #[clap(long)]
        cascade: bool,

        /// With --delete, skip the confirmation prompt
        #[clap(long)]
        force: bool,
    },

    /// Validate a workflow file and run one of its steps
    Workflow {
        /// Path to the workflow JSON file
        #[clap(long)]
        file: PathBuf,

        /// Step to run; omit it to validate and list the steps
        #[clap(long)]
        step: Option<String>,

        /// Extra parameters for the `params` resolver, as name=value
        /// pairs separated by commas
        #[clap(long)]
        params: Option<String>,
    },

    /// Print a merged configuration value
    Config {
        section: String,
        option: Option<String>,
    },

    /// Show the authenticated user
    Me,
}

/// Async CLI entrypoint, shared by `main()` and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_default()?;
    let read = config.read(&cli.config)?;
    info!(files = read.len(), "configuration loaded");
    let config = Arc::new(config);

    match cli.command {
        Commands::Config { section, option } => {
            show_config(&config, &section, option.as_deref())
        }
        Commands::Me => {
            let client = connect(config)?;
            let user = client.user().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        Commands::Entities {
            entity_type,
            id,
            infos,
            tags,
            page,
            delete,
            cascade,
            force,
        } => {
            let kind: EntityType = entity_type.parse()?;
            let client = connect(config)?;
            let datastore = cli.datastore.as_deref();
            if delete {
                let request = DeleteRequest {
                    kind: Some(kind),
                    id,
                    filter_infos: filter_dict_from_str(infos.as_deref())?,
                    filter_tags: filter_dict_from_str(tags.as_deref())?,
                    cascade,
                    not_found_ok: false,
                    if_multi: None,
                    datastore: cli.datastore.clone(),
                };
                let engine = DeleteEngine::new(&client);
                if force {
                    engine.run(&request, None).await?;
                } else {
                    engine.run(&request, Some(&confirm_deletion)).await?;
                }
                return Ok(());
            }
            if let Some(id) = id {
                let entity = client.get(kind, &id, datastore).await?;
                println!("{}", entity.to_json(true));
            } else {
                let entities = client
                    .list(
                        kind,
                        &filter_dict_from_str(infos.as_deref())?,
                        &filter_dict_from_str(tags.as_deref())?,
                        page,
                        datastore,
                    )
                    .await?;
                for entity in &entities {
                    println!("{entity}");
                }
                info!(count = entities.len(), kind = kind.name(), "entities listed");
            }
            Ok(())
        }
        Commands::Workflow { file, step, params } => {
            let workflow = Workflow::from_file(&file)?;
            let issues = workflow.validate();
            if !issues.is_empty() {
                for issue in &issues {
                    eprintln!("invalid workflow: {issue}");
                }
                bail!("workflow file {} is invalid", file.display());
            }
            let Some(step) = step else {
                println!("workflow '{}' steps:", workflow.name());
                for name in workflow.steps()? {
                    println!("  {name}");
                }
                return Ok(());
            };

            let client = Arc::new(connect(config)?);
            let registry = build_registry(&client, params.as_deref()).await?;
            let ctx = ResolveContext {
                datastore: cli.datastore.clone(),
            };
            let created = workflow
                .run_step(&step, client.as_ref(), &registry, &ctx, Some(&confirm_deletion))
                .await?;
            for entity in &created {
                println!("{entity}");
            }
            Ok(())
        }
    }
}

/// Builds the authenticated store client. The token comes from the
/// environment so it never transits through configuration files.
fn connect(config: Arc<Config>) -> Result<StoreClient<HttpRequester>> {
    let token = std::env::var(TOKEN_ENV)
        .with_context(|| format!("{TOKEN_ENV} must be set to an API access token"))?;
    let requester = HttpRequester::new(config.clone(), Box::new(StaticTokenProvider::new(token)));
    Ok(StoreClient::new(requester, config))
}

/// Registers the standard resolvers used by workflow files.
async fn build_registry(
    client: &Arc<StoreClient<HttpRequester>>,
    params: Option<&str>,
) -> Result<ResolverRegistry> {
    let mut values = serde_json::Map::new();
    for (key, value) in filter_dict_from_str(params)? {
        values.insert(key, Value::String(value));
    }

    let mut registry = ResolverRegistry::new();
    registry.add(Box::new(DictResolver::new("params", Value::Object(values))));
    registry.add(Box::new(DateResolver::new("datetime")));
    registry.add(Box::new(FileResolver::new("file")));
    registry.add(Box::new(UserResolver::new("user", client.as_ref()).await?));
    registry.add(Box::new(StoreEntityResolver::new(
        "store_entity",
        client.clone(),
    )));
    Ok(registry)
}

fn show_config(config: &Config, section: &str, option: Option<&str>) -> Result<()> {
    match option {
        Some(option) => match config.get(section, option) {
            Some(value) => {
                println!("{value}");
                Ok(())
            }
            None => bail!("no value for [{section}] {option}"),
        },
        None => match config.tree().get(section) {
            Some(tree) => {
                println!("{}", serde_json::to_string_pretty(tree)?);
                Ok(())
            }
            None => bail!("no section [{section}]"),
        },
    }
}

/// Interactive confirmation hook: prints the candidates, asks once, and
/// returns either the full list or nothing.
fn confirm_deletion(candidates: &[Entity]) -> Vec<Entity> {
    println!("about to delete:");
    for entity in candidates {
        println!("  {entity}");
    }
    print!("proceed? (y/N) ");
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return Vec::new();
    }
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" | "o" | "oui" => candidates.to_vec(),
        _ => {
            println!("deletion cancelled");
            Vec::new()
        }
    }
}
