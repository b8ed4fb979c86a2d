//! Metadata provider for the document store. Object shapes come from the GraphQL schema
//! supplied with the configuration; nothing is read from the backend.

use crate::config::{DatabaseType, RuntimeConfig, SourceType};
use crate::metadata::{ColumnDefinition, DatabaseObject, MetadataException, MetadataProvider, ProviderState};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

fn type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)type\s+(\w+)\s*(@model[^{]*)?\{([^}]*)\}").expect("static type pattern"))
}

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\w+)\s*(?:\([^)]*\))?\s*:\s*([\[\]\w!]+)").expect("static field pattern"))
}

/// `@model` types of a GraphQL schema with their fields.
fn parse_model_types(schema: &str) -> HashMap<String, Vec<ColumnDefinition>> {
    let mut out = HashMap::new();
    for caps in type_pattern().captures_iter(schema) {
        if caps.get(2).is_none() {
            continue;
        }
        let fields = field_pattern()
            .captures_iter(&caps[3])
            .map(|f| ColumnDefinition {
                name: f[1].to_string(),
                data_type: f[2].trim_end_matches('!').to_string(),
                nullable: !f[2].ends_with('!'),
                has_default: false,
            })
            .collect();
        out.insert(caps[1].to_lowercase(), fields);
    }
    out
}

pub struct CosmosMetadataProvider {
    data_source_name: String,
    database_type: DatabaseType,
    snapshot: Arc<RuntimeConfig>,
    state: ProviderState,
}

impl CosmosMetadataProvider {
    pub fn new(data_source_name: &str, snapshot: Arc<RuntimeConfig>) -> Self {
        CosmosMetadataProvider {
            data_source_name: data_source_name.to_string(),
            database_type: DatabaseType::CosmosDbNoSql,
            snapshot,
            state: ProviderState::default(),
        }
    }

    fn schema_text(&self) -> Option<&str> {
        self.snapshot
            .data_source(&self.data_source_name)
            .and_then(|ds| ds.option_str("schema"))
            .or(self.snapshot.graphql_schema.as_deref())
    }
}

#[async_trait]
impl MetadataProvider for CosmosMetadataProvider {
    fn data_source_name(&self) -> &str {
        &self.data_source_name
    }

    fn database_type(&self) -> &DatabaseType {
        &self.database_type
    }

    async fn initialize(&self) -> Result<(), MetadataException> {
        self.state.reset();
        let Some(schema) = self.schema_text() else {
            let e = MetadataException::MissingSchema {
                data_source: self.data_source_name.clone(),
            };
            self.state.record(e.clone());
            return Err(e);
        };
        let types = parse_model_types(schema);
        let database = self
            .snapshot
            .data_source(&self.data_source_name)
            .and_then(|ds| ds.option_str("database"));

        let mut objects = HashMap::new();
        for (name, entity) in self.snapshot.entities_for_data_source(&self.data_source_name) {
            let type_name = entity
                .graphql
                .type_
                .as_ref()
                .map(|t| t.singular.as_str())
                .unwrap_or(name.as_str())
                .to_lowercase();
            let Some(fields) = types.get(&type_name) else {
                self.state.record(MetadataException::MissingObject {
                    data_source: self.data_source_name.clone(),
                    entity: name.clone(),
                    object: format!("GraphQL type '{}'", type_name),
                });
                continue;
            };
            let mut obj = DatabaseObject::new(database, &entity.source.object, SourceType::Table);
            obj.columns = fields.clone();
            obj.primary_key = vec!["id".into()];
            objects.insert(name.clone(), obj);
        }
        tracing::info!(data_source = %self.data_source_name, entities = objects.len(), "document metadata initialized");
        self.state.publish(objects);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    fn exceptions(&self) -> Vec<MetadataException> {
        self.state.exceptions()
    }

    fn record_exception(&self, exception: MetadataException) {
        self.state.record(exception);
    }

    fn database_object(&self, entity: &str) -> Option<DatabaseObject> {
        self.state.object(entity)
    }

    fn entity_names(&self) -> Vec<String> {
        self.state.entity_names()
    }
}
