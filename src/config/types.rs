//! Raw config types matching the runtime configuration document.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Backend family of a data source. Unknown names are kept so the factory can report them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    MsSql,
    DwSql,
    PostgreSql,
    MySql,
    CosmosDbNoSql,
    CosmosDbPostgreSql,
    Other(String),
}

impl DatabaseType {
    pub fn as_str(&self) -> &str {
        match self {
            DatabaseType::MsSql => "mssql",
            DatabaseType::DwSql => "dwsql",
            DatabaseType::PostgreSql => "postgresql",
            DatabaseType::MySql => "mysql",
            DatabaseType::CosmosDbNoSql => "cosmosdb_nosql",
            DatabaseType::CosmosDbPostgreSql => "cosmosdb_postgresql",
            DatabaseType::Other(name) => name.as_str(),
        }
    }

    /// Relational backends that need a connection string.
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            DatabaseType::MsSql
                | DatabaseType::DwSql
                | DatabaseType::PostgreSql
                | DatabaseType::MySql
                | DatabaseType::CosmosDbPostgreSql
        )
    }
}

impl FromStr for DatabaseType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "mssql" => DatabaseType::MsSql,
            "dwsql" => DatabaseType::DwSql,
            "postgresql" => DatabaseType::PostgreSql,
            "mysql" => DatabaseType::MySql,
            "cosmosdb_nosql" => DatabaseType::CosmosDbNoSql,
            "cosmosdb_postgresql" => DatabaseType::CosmosDbPostgreSql,
            _ => DatabaseType::Other(s.to_string()),
        })
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DatabaseType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DatabaseType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.parse() {
            Ok(t) => Ok(t),
            Err(never) => match never {},
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataSourceConfig {
    pub database_type: DatabaseType,
    #[serde(default)]
    pub connection_string: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Managed identity token supplied at configuration time; never serialized back out.
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl DataSourceConfig {
    pub fn new(database_type: DatabaseType, connection_string: impl Into<String>) -> Self {
        DataSourceConfig {
            database_type,
            connection_string: connection_string.into(),
            options: serde_json::Map::new(),
            access_token: None,
        }
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(serde_json::Value::as_str)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostMode {
    Development,
    #[default]
    Production,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CorsOptions {
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JwtOptions {
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticationOptions {
    #[serde(default = "default_auth_provider")]
    pub provider: String,
    #[serde(default)]
    pub jwt: Option<JwtOptions>,
}

impl Default for AuthenticationOptions {
    fn default() -> Self {
        AuthenticationOptions {
            provider: default_auth_provider(),
            jwt: None,
        }
    }
}

fn default_auth_provider() -> String {
    "StaticWebApps".into()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HostOptions {
    #[serde(default)]
    pub mode: HostMode,
    #[serde(default)]
    pub cors: CorsOptions,
    #[serde(default)]
    pub authentication: AuthenticationOptions,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeOptions {
    #[serde(default = "default_rest")]
    pub rest: EndpointOptions,
    #[serde(default = "default_graphql")]
    pub graphql: EndpointOptions,
    #[serde(default)]
    pub host: HostOptions,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            rest: default_rest(),
            graphql: default_graphql(),
            host: HostOptions::default(),
        }
    }
}

fn default_rest() -> EndpointOptions {
    EndpointOptions {
        enabled: true,
        path: "/api".into(),
    }
}

fn default_graphql() -> EndpointOptions {
    EndpointOptions {
        enabled: true,
        path: "/graphql".into(),
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    #[default]
    Table,
    View,
    StoredProcedure,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EntitySource {
    /// Database object name, optionally schema-qualified (e.g. "dbo.books").
    pub object: String,
    #[serde(default, rename = "type")]
    pub type_: SourceType,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub key_fields: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityRestOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for EntityRestOptions {
    fn default() -> Self {
        EntityRestOptions {
            enabled: true,
            path: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphQLTypeNames {
    pub singular: String,
    #[serde(default)]
    pub plural: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityGraphQLOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, rename = "type")]
    pub type_: Option<GraphQLTypeNames>,
}

impl Default for EntityGraphQLOptions {
    fn default() -> Self {
        EntityGraphQLOptions {
            enabled: true,
            type_: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FieldsConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A permission action: either a bare name ("read", "*") or an object with field and policy scoping.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionConfig {
    Name(String),
    Detailed {
        action: String,
        #[serde(default)]
        fields: Option<FieldsConfig>,
        #[serde(default)]
        policy: Option<serde_json::Value>,
    },
}

impl ActionConfig {
    pub fn name(&self) -> &str {
        match self {
            ActionConfig::Name(s) => s.as_str(),
            ActionConfig::Detailed { action, .. } => action.as_str(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionConfig {
    pub role: String,
    pub actions: Vec<ActionConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelationshipConfig {
    pub cardinality: Cardinality,
    pub target_entity: String,
    #[serde(default)]
    pub source_fields: Vec<String>,
    #[serde(default)]
    pub target_fields: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EntityConfig {
    pub source: EntitySource,
    /// Data source name; the default data source when absent.
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub rest: EntityRestOptions,
    #[serde(default)]
    pub graphql: EntityGraphQLOptions,
    #[serde(default)]
    pub permissions: Vec<PermissionConfig>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipConfig>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}

impl EntityConfig {
    /// Table-backed entity with REST and GraphQL on, granting every action to `role`.
    pub fn table(object: impl Into<String>, role: impl Into<String>) -> Self {
        EntityConfig {
            source: EntitySource {
                object: object.into(),
                type_: SourceType::Table,
                parameters: serde_json::Map::new(),
                key_fields: Vec::new(),
            },
            data_source: None,
            rest: EntityRestOptions::default(),
            graphql: EntityGraphQLOptions::default(),
            permissions: vec![PermissionConfig {
                role: role.into(),
                actions: vec![ActionConfig::Name("*".into())],
            }],
            relationships: BTreeMap::new(),
            validation: HashMap::new(),
        }
    }

    pub fn is_stored_procedure(&self) -> bool {
        self.source.type_ == SourceType::StoredProcedure
    }
}

/// Shape of the configuration document as written on disk or posted to the admin endpoint.
/// `data-source` is the unnamed default; `data-sources` adds named ones.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfigDocument {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub data_source: Option<DataSourceConfig>,
    #[serde(default)]
    pub data_sources: BTreeMap<String, DataSourceConfig>,
    #[serde(default)]
    pub default_data_source: Option<String>,
    #[serde(default)]
    pub runtime: RuntimeOptions,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityConfig>,
}
