//! Metadata provider for relational backends.

use crate::config::{DatabaseType, RuntimeConfig, SourceType};
use crate::metadata::{
    DatabaseObject, MetadataException, MetadataProvider, ObjectRef, ProviderState, SchemaIntrospector,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    MsSql,
    PostgreSql,
    MySql,
}

impl SqlDialect {
    /// Schema assumed for unqualified object names.
    pub fn default_schema(&self) -> Option<&'static str> {
        match self {
            SqlDialect::MsSql => Some("dbo"),
            SqlDialect::PostgreSql => Some("public"),
            SqlDialect::MySql => None,
        }
    }

    /// Stored-procedure parameter types that cannot be bound from a request.
    fn unsupported_parameter_types(&self) -> &'static [&'static str] {
        match self {
            SqlDialect::MsSql => &["table type", "structured", "sql_variant", "cursor"],
            SqlDialect::PostgreSql => &["record", "refcursor", "anyelement", "anyarray", "internal"],
            SqlDialect::MySql => &["geometry", "set"],
        }
    }

    pub fn supports_parameter_type(&self, data_type: &str) -> bool {
        let lower = data_type.to_lowercase();
        !self.unsupported_parameter_types().iter().any(|t| lower == *t)
    }
}

pub struct SqlMetadataProvider {
    dialect: SqlDialect,
    database_type: DatabaseType,
    data_source_name: String,
    snapshot: Arc<RuntimeConfig>,
    introspector: Arc<dyn SchemaIntrospector>,
    state: ProviderState,
}

impl SqlMetadataProvider {
    pub fn new(
        dialect: SqlDialect,
        data_source_name: &str,
        snapshot: Arc<RuntimeConfig>,
        introspector: Arc<dyn SchemaIntrospector>,
    ) -> Self {
        let database_type = snapshot
            .data_source(data_source_name)
            .map(|ds| ds.database_type.clone())
            .unwrap_or(DatabaseType::Other(String::new()));
        SqlMetadataProvider {
            dialect,
            database_type,
            data_source_name: data_source_name.to_string(),
            snapshot,
            introspector,
            state: ProviderState::default(),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn check_object(&self, entity: &str, key_fields: &[String], mut obj: DatabaseObject) -> Result<DatabaseObject, MetadataException> {
        match obj.kind {
            SourceType::StoredProcedure => {
                if let Some(p) = obj.parameters.iter().find(|p| !self.dialect.supports_parameter_type(&p.data_type)) {
                    return Err(MetadataException::UnsupportedStoredProcedure {
                        data_source: self.data_source_name.clone(),
                        entity: entity.to_string(),
                        object: obj.qualified_name(),
                        reason: format!("parameter '{}' has type {}", p.name, p.data_type),
                    });
                }
            }
            SourceType::Table | SourceType::View => {
                if !key_fields.is_empty() {
                    if let Some(missing) = key_fields.iter().find(|k| obj.column(k).is_none()) {
                        return Err(MetadataException::MissingObject {
                            data_source: self.data_source_name.clone(),
                            entity: entity.to_string(),
                            object: format!("{}.{}", obj.qualified_name(), missing),
                        });
                    }
                    obj.primary_key = key_fields.to_vec();
                }
                if obj.primary_key.is_empty() {
                    return Err(MetadataException::MissingPrimaryKey {
                        data_source: self.data_source_name.clone(),
                        entity: entity.to_string(),
                        object: obj.qualified_name(),
                    });
                }
            }
        }
        Ok(obj)
    }
}

#[async_trait]
impl MetadataProvider for SqlMetadataProvider {
    fn data_source_name(&self) -> &str {
        &self.data_source_name
    }

    fn database_type(&self) -> &DatabaseType {
        &self.database_type
    }

    async fn initialize(&self) -> Result<(), MetadataException> {
        self.state.reset();
        let Some(data_source) = self.snapshot.data_source(&self.data_source_name) else {
            let e = MetadataException::Introspection {
                data_source: self.data_source_name.clone(),
                message: "data source is not part of the bound configuration".into(),
            };
            self.state.record(e.clone());
            return Err(e);
        };

        let wanted: Vec<(String, ObjectRef, Vec<String>)> = self
            .snapshot
            .entities_for_data_source(&self.data_source_name)
            .map(|(name, e)| {
                (
                    name.clone(),
                    ObjectRef::parse(&e.source.object, e.source.type_, self.dialect.default_schema()),
                    e.source.key_fields.clone(),
                )
            })
            .collect();
        let mut refs: Vec<ObjectRef> = Vec::with_capacity(wanted.len());
        for (_, r, _) in &wanted {
            if !refs.contains(r) {
                refs.push(r.clone());
            }
        }

        tracing::debug!(data_source = %self.data_source_name, objects = refs.len(), "introspecting");
        let found = match self.introspector.introspect(data_source, &refs).await {
            Ok(found) => found,
            Err(e) => {
                let exception = MetadataException::Introspection {
                    data_source: self.data_source_name.clone(),
                    message: e.to_string(),
                };
                self.state.record(exception.clone());
                return Err(exception);
            }
        };

        let mut objects = HashMap::with_capacity(wanted.len());
        for (entity, r, key_fields) in wanted {
            let Some(obj) = found.iter().find(|o| r.matches(o)).cloned() else {
                self.state.record(MetadataException::MissingObject {
                    data_source: self.data_source_name.clone(),
                    entity,
                    object: r.qualified_name(),
                });
                continue;
            };
            match self.check_object(&entity, &key_fields, obj) {
                Ok(obj) => {
                    objects.insert(entity, obj);
                }
                Err(e) => self.state.record(e),
            }
        }

        tracing::info!(
            data_source = %self.data_source_name,
            entities = objects.len(),
            warnings = self.state.exceptions().len(),
            "metadata initialized"
        );
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
