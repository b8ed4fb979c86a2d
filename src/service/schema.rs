//! GraphQL type catalog: names every GraphQL-enabled entity exposes and the columns behind them.

use crate::config::{ConfigProvider, EntityConfig, RuntimeConfig};
use crate::error::AppError;
use crate::metadata::MetadataProviderRegistry;
use crate::service::ConfigurationConsumer;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphQLTypeInfo {
    pub entity: String,
    pub type_name: String,
    pub queries: Vec<String>,
    pub mutations: Vec<String>,
    /// Column names from metadata; empty for backends without column metadata.
    pub fields: Vec<String>,
}

#[derive(Default)]
struct Catalog {
    types: BTreeMap<String, GraphQLTypeInfo>,
}

/// Derives the GraphQL surface from the bound configuration and the current metadata.
pub struct EntitySchemaCatalog {
    registry: Arc<MetadataProviderRegistry>,
    provider: RwLock<Option<Arc<ConfigProvider>>>,
    catalog: RwLock<Arc<Catalog>>,
}

fn graphql_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[_A-Za-z][_0-9A-Za-z]*$").expect("static name pattern"))
}

fn pluralize(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") && !lower.ends_with("oy") {
        format!("{}ies", &name[..name.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        format!("{}es", name)
    } else {
        format!("{}s", name)
    }
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl EntitySchemaCatalog {
    pub fn new(registry: Arc<MetadataProviderRegistry>) -> Self {
        EntitySchemaCatalog {
            registry,
            provider: RwLock::new(None),
            catalog: RwLock::new(Arc::new(Catalog::default())),
        }
    }

    pub fn type_info(&self, entity: &str) -> Option<GraphQLTypeInfo> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .types
            .get(entity)
            .cloned()
    }

    pub fn types(&self) -> Vec<GraphQLTypeInfo> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner).clone();
        catalog.types.values().cloned().collect()
    }

    fn describe(&self, snapshot: &RuntimeConfig, name: &str, entity: &EntityConfig) -> Result<GraphQLTypeInfo, AppError> {
        let names = entity.graphql.type_.as_ref();
        let type_name = names.map(|t| t.singular.clone()).unwrap_or_else(|| name.to_string());
        if !graphql_name().is_match(&type_name) {
            return Err(AppError::Dependent {
                service: "graphql schema",
                message: format!("entity '{}': '{}' is not a valid GraphQL name", name, type_name),
            });
        }
        let singular = lower_first(&type_name);
        let plural = names
            .and_then(|t| t.plural.clone())
            .map(|p| lower_first(&p))
            .unwrap_or_else(|| pluralize(&singular));

        let (queries, mutations) = if entity.is_stored_procedure() {
            (Vec::new(), vec![format!("execute{}", type_name)])
        } else {
            (
                vec![plural, format!("{}_by_pk", singular)],
                vec![
                    format!("create{}", type_name),
                    format!("update{}", type_name),
                    format!("delete{}", type_name),
                ],
            )
        };

        let ds_name = snapshot.data_source_name_for(entity);
        let fields = self
            .registry
            .get(ds_name)?
            .database_object(name)
            .map(|obj| obj.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();

        Ok(GraphQLTypeInfo {
            entity: name.to_string(),
            type_name,
            queries,
            mutations,
            fields,
        })
    }

    fn build(&self, snapshot: &RuntimeConfig) -> Result<Catalog, AppError> {
        let mut catalog = Catalog::default();
        if !snapshot.runtime.graphql.enabled {
            return Ok(catalog);
        }
        let mut type_names = HashSet::new();
        for (name, entity) in snapshot.entities.iter().filter(|(_, e)| e.graphql.enabled) {
            let info = self.describe(snapshot, name, entity)?;
            if !type_names.insert(info.type_name.clone()) {
                return Err(AppError::Dependent {
                    service: "graphql schema",
                    message: format!("type name '{}' is used by more than one entity", info.type_name),
                });
            }
            catalog.types.insert(name.clone(), info);
        }
        Ok(catalog)
    }
}

#[async_trait]
impl ConfigurationConsumer for EntitySchemaCatalog {
    fn name(&self) -> &'static str {
        "graphql schema"
    }

    async fn rebind_configuration(&self, provider: Arc<ConfigProvider>) -> Result<(), AppError> {
        let snapshot = provider.get_config()?;
        let catalog = self.build(&snapshot)?;
        tracing::debug!(types = catalog.types.len(), "graphql catalog rebuilt");
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(catalog);
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = Some(provider);
        Ok(())
    }
}
