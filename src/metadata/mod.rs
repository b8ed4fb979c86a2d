//! Metadata providers: one per configured data source, holding introspected object shapes.
//!
//! Providers come in a closed set of variants (`SqlMetadataProvider` per SQL dialect,
//! `CosmosMetadataProvider` for the document store) behind the [`MetadataProvider`] trait.
//! The [`MetadataProviderRegistry`] owns them by data-source name.

pub mod cosmos;
pub mod factory;
pub mod postgres;
pub mod registry;
pub mod sql;

pub use cosmos::CosmosMetadataProvider;
pub use factory::{provider_kind, MetadataProviderFactory, ProviderKind};
pub use postgres::PgIntrospector;
pub use registry::{InitializationReport, MetadataProviderRegistry, ProviderSet, DEFAULT_INTROSPECTION_TIMEOUT};
pub use sql::{SqlDialect, SqlMetadataProvider};

use crate::config::{DataSourceConfig, DatabaseType, SourceType};
use crate::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Non-fatal problem found while introspecting one data source. Accumulated, never thrown
/// across data sources.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataException {
    #[error("data source '{data_source}': entity '{entity}' maps to {object}, which does not exist")]
    MissingObject {
        data_source: String,
        entity: String,
        object: String,
    },
    #[error("data source '{data_source}': entity '{entity}' ({object}) has no primary key and no key-fields")]
    MissingPrimaryKey {
        data_source: String,
        entity: String,
        object: String,
    },
    #[error("data source '{data_source}': stored procedure {object} for entity '{entity}' is not supported: {reason}")]
    UnsupportedStoredProcedure {
        data_source: String,
        entity: String,
        object: String,
        reason: String,
    },
    #[error("data source '{data_source}': introspection failed: {message}")]
    Introspection { data_source: String, message: String },
    #[error("data source '{data_source}': introspection timed out after {after:?}")]
    Timeout { data_source: String, after: Duration },
    #[error("data source '{data_source}': no GraphQL schema was supplied")]
    MissingSchema { data_source: String },
}

impl MetadataException {
    pub fn data_source(&self) -> &str {
        match self {
            MetadataException::MissingObject { data_source, .. }
            | MetadataException::MissingPrimaryKey { data_source, .. }
            | MetadataException::UnsupportedStoredProcedure { data_source, .. }
            | MetadataException::Introspection { data_source, .. }
            | MetadataException::Timeout { data_source, .. }
            | MetadataException::MissingSchema { data_source } => data_source,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub has_default: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKeyDefinition {
    pub referenced_schema: Option<String>,
    pub referenced_name: String,
    pub columns: Vec<String>,
    pub referenced_columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub data_type: String,
}

/// Introspected shape of one table, view, stored procedure, or container.
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseObject {
    pub schema: Option<String>,
    pub name: String,
    pub kind: SourceType,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub parameters: Vec<ParameterDefinition>,
}

impl DatabaseObject {
    pub fn new(schema: Option<&str>, name: &str, kind: SourceType) -> Self {
        DatabaseObject {
            schema: schema.map(str::to_string),
            name: name.to_string(),
            kind,
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether one of our foreign keys points at `other`.
    pub fn references(&self, other: &DatabaseObject) -> bool {
        self.foreign_keys.iter().any(|fk| {
            fk.referenced_name == other.name
                && (fk.referenced_schema.is_none() || other.schema.is_none() || fk.referenced_schema == other.schema)
        })
    }
}

/// Name of a database object as written in an entity source, split into schema and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub schema: Option<String>,
    pub name: String,
    pub kind: SourceType,
}

impl ObjectRef {
    /// Parse "schema.name" or "name"; brackets and double quotes around parts are stripped.
    pub fn parse(object: &str, kind: SourceType, default_schema: Option<&str>) -> Self {
        let clean = |s: &str| s.trim().trim_matches(|c| c == '[' || c == ']' || c == '"').to_string();
        match object.rsplit_once('.') {
            Some((schema, name)) => ObjectRef {
                schema: Some(clean(schema)),
                name: clean(name),
                kind,
            },
            None => ObjectRef {
                schema: default_schema.map(str::to_string),
                name: clean(object),
                kind,
            },
        }
    }

    pub fn matches(&self, obj: &DatabaseObject) -> bool {
        obj.name.eq_ignore_ascii_case(&self.name)
            && match (&self.schema, &obj.schema) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => true,
            }
    }

    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }
}

/// Backend introspection for one SQL dialect. Implementations talk to the database.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Describe the requested objects. Objects that do not exist are simply absent from the result.
    async fn introspect(
        &self,
        data_source: &DataSourceConfig,
        objects: &[ObjectRef],
    ) -> Result<Vec<DatabaseObject>, AppError>;
}

/// Schema cache for exactly one data source.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn data_source_name(&self) -> &str;

    fn database_type(&self) -> &DatabaseType;

    /// Introspect the backend. Safe to re-run: replaces cached objects and the exception list.
    async fn initialize(&self) -> Result<(), MetadataException>;

    fn is_initialized(&self) -> bool;

    /// Non-fatal issues from the last initialization.
    fn exceptions(&self) -> Vec<MetadataException>;

    fn record_exception(&self, exception: MetadataException);

    /// Object backing an entity, once initialized.
    fn database_object(&self, entity: &str) -> Option<DatabaseObject>;

    fn entity_names(&self) -> Vec<String>;
}

/// Cached objects and exceptions shared by every provider variant.
#[derive(Debug, Default)]
pub(crate) struct ProviderState {
    objects: RwLock<HashMap<String, DatabaseObject>>,
    exceptions: RwLock<Vec<MetadataException>>,
    initialized: AtomicBool,
}

impl ProviderState {
    pub(crate) fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.exceptions.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn record(&self, exception: MetadataException) {
        tracing::warn!(data_source = %exception.data_source(), error = %exception, "metadata exception");
        self.exceptions.write().unwrap_or_else(PoisonError::into_inner).push(exception);
    }

    pub(crate) fn exceptions(&self) -> Vec<MetadataException> {
        self.exceptions.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn publish(&self, objects: HashMap<String, DatabaseObject>) {
        *self.objects.write().unwrap_or_else(PoisonError::into_inner) = objects;
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub(crate) fn object(&self, entity: &str) -> Option<DatabaseObject> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).get(entity).cloned()
    }

    pub(crate) fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ref_parses_schema_and_brackets() {
        let r = ObjectRef::parse("[dbo].[books]", SourceType::Table, Some("public"));
        assert_eq!(r.schema.as_deref(), Some("dbo"));
        assert_eq!(r.name, "books");
        let r = ObjectRef::parse("authors", SourceType::View, Some("public"));
        assert_eq!(r.qualified_name(), "public.authors");
    }

    #[test]
    fn object_refs_dedupe_by_schema_name_and_kind() {
        let refs: std::collections::HashSet<ObjectRef> = [
            ObjectRef::parse("books", SourceType::Table, Some("public")),
            ObjectRef::parse("public.books", SourceType::Table, None),
            ObjectRef::parse("books", SourceType::View, Some("public")),
        ]
        .into_iter()
        .collect();
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn references_follows_foreign_keys() {
        let authors = DatabaseObject::new(Some("public"), "authors", SourceType::Table);
        let mut books = DatabaseObject::new(Some("public"), "books", SourceType::Table);
        assert!(!books.references(&authors));
        books.foreign_keys.push(ForeignKeyDefinition {
            referenced_schema: Some("public".into()),
            referenced_name: "authors".into(),
            columns: vec!["author_id".into()],
            referenced_columns: vec!["id".into()],
        });
        assert!(books.references(&authors));
        assert!(!authors.references(&books));
    }
}
