//! Config validation: property constraints, permissions, and relationship consistency.

use crate::config::snapshot::RuntimeConfig;
use crate::config::types::{DatabaseType, SourceType};
use crate::error::{AppError, ConfigError};
use crate::metadata::{DatabaseObject, ProviderSet};
use std::collections::HashSet;

/// Actions accepted in entity permissions.
pub const KNOWN_ACTIONS: &[&str] = &["*", "create", "read", "update", "delete", "execute"];

/// Property-level checks that hold in every host mode.
pub fn validate_config_properties(config: &RuntimeConfig) -> Result<(), ConfigError> {
    if config.data_sources.is_empty() {
        return Err(ConfigError::Validation("at least one data source is required".into()));
    }
    if !config.data_sources.contains_key(&config.default_data_source) {
        return Err(ConfigError::MissingReference {
            kind: "data source",
            id: config.default_data_source.clone(),
        });
    }

    for (name, ds) in &config.data_sources {
        if ds.database_type.is_relational() && ds.connection_string.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "data source '{}' ({}) requires a connection string",
                name, ds.database_type
            )));
        }
        if ds.database_type == DatabaseType::CosmosDbNoSql && ds.option_str("database").is_none() {
            return Err(ConfigError::Validation(format!(
                "data source '{}' (cosmosdb_nosql) requires options.database",
                name
            )));
        }
    }

    let rest = &config.runtime.rest;
    let graphql = &config.runtime.graphql;
    for (label, path) in [("rest", rest.path.as_str()), ("graphql", graphql.path.as_str())] {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!("{} path must start with '/': {}", label, path)));
        }
    }
    if rest.enabled && graphql.enabled && rest.path == graphql.path {
        return Err(ConfigError::Validation(format!(
            "rest and graphql cannot share the path {}",
            rest.path
        )));
    }

    let mut rest_paths = HashSet::new();
    for (name, entity) in &config.entities {
        let ds_name = config.data_source_name_for(entity);
        if !config.data_sources.contains_key(ds_name) {
            return Err(ConfigError::MissingReference {
                kind: "data source",
                id: ds_name.to_string(),
            });
        }
        if entity.source.object.trim().is_empty() {
            return Err(ConfigError::Validation(format!("entity '{}' has an empty source object", name)));
        }
        if entity.is_stored_procedure() && !entity.source.key_fields.is_empty() {
            return Err(ConfigError::Validation(format!(
                "entity '{}': key-fields are not allowed on stored procedures",
                name
            )));
        }
        if entity.rest.enabled && !rest_paths.insert(config.rest_path_for(name, entity)) {
            return Err(ConfigError::DuplicatePath(config.rest_path_for(name, entity)));
        }
    }
    Ok(())
}

/// Permission checks; run in development mode only.
pub fn validate_permissions(config: &RuntimeConfig) -> Result<(), ConfigError> {
    for (name, entity) in &config.entities {
        if entity.permissions.is_empty() {
            return Err(ConfigError::Validation(format!("entity '{}' has no permissions", name)));
        }
        for perm in &entity.permissions {
            if perm.role.trim().is_empty() {
                return Err(ConfigError::Validation(format!("entity '{}' has a permission with an empty role", name)));
            }
            let actions: Vec<String> = perm.actions.iter().map(|a| a.name().to_lowercase()).collect();
            if actions.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "entity '{}' role '{}' has no actions",
                    name, perm.role
                )));
            }
            for action in &actions {
                if !KNOWN_ACTIONS.contains(&action.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "entity '{}' role '{}': unknown action '{}'",
                        name, perm.role, action
                    )));
                }
                let allowed = match entity.source.type_ {
                    SourceType::StoredProcedure => action == "*" || action == "execute",
                    SourceType::Table | SourceType::View => action != "execute",
                };
                if !allowed {
                    return Err(ConfigError::Validation(format!(
                        "entity '{}' role '{}': action '{}' is not valid for a {:?}",
                        name, perm.role, action, entity.source.type_
                    )));
                }
            }
            if actions.len() > 1 && actions.iter().any(|a| a == "*") {
                return Err(ConfigError::Validation(format!(
                    "entity '{}' role '{}': '*' cannot be combined with other actions",
                    name, perm.role
                )));
            }
        }
    }
    Ok(())
}

/// Relationship declarations that can be checked without metadata.
pub fn validate_relationship_config(config: &RuntimeConfig) -> Result<(), ConfigError> {
    for (name, entity) in &config.entities {
        for (rel_name, rel) in &entity.relationships {
            let target = config
                .entities
                .get(&rel.target_entity)
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "relationship target entity",
                    id: format!("{}.{} -> {}", name, rel_name, rel.target_entity),
                })?;
            if config.data_source_name_for(entity) != config.data_source_name_for(target) {
                return Err(ConfigError::Validation(format!(
                    "relationship {}.{}: entities on different data sources cannot be related",
                    name, rel_name
                )));
            }
            if entity.is_stored_procedure() || target.is_stored_procedure() {
                return Err(ConfigError::Validation(format!(
                    "relationship {}.{}: stored procedures cannot take part in relationships",
                    name, rel_name
                )));
            }
            if rel.source_fields.len() != rel.target_fields.len() {
                return Err(ConfigError::Validation(format!(
                    "relationship {}.{}: source-fields and target-fields must have the same length",
                    name, rel_name
                )));
            }
        }
    }
    Ok(())
}

/// Check relationship fields against introspected metadata in `providers`. Relationships
/// without explicit fields need a foreign key between the two objects in either direction.
pub fn validate_relationships(config: &RuntimeConfig, providers: &ProviderSet) -> Result<(), AppError> {
    for (name, entity) in &config.entities {
        if entity.relationships.is_empty() {
            continue;
        }
        let provider = providers.get(config.data_source_name_for(entity))?;
        let Some(source_obj) = provider.database_object(name) else {
            // Missing objects were already reported as metadata exceptions.
            continue;
        };
        for (rel_name, rel) in &entity.relationships {
            let Some(target_obj) = provider.database_object(&rel.target_entity) else {
                continue;
            };
            if rel.source_fields.is_empty() {
                if !source_obj.references(&target_obj) && !target_obj.references(&source_obj) {
                    return Err(AppError::Config(ConfigError::Validation(format!(
                        "relationship {}.{}: no foreign key between {} and {}",
                        name,
                        rel_name,
                        source_obj.qualified_name(),
                        target_obj.qualified_name()
                    ))));
                }
                continue;
            }
            check_fields(name, rel_name, &source_obj, &rel.source_fields)?;
            check_fields(name, rel_name, &target_obj, &rel.target_fields)?;
        }
    }
    Ok(())
}

fn check_fields(entity: &str, rel_name: &str, obj: &DatabaseObject, fields: &[String]) -> Result<(), ConfigError> {
    for field in fields {
        if obj.column(field).is_none() {
            return Err(ConfigError::Validation(format!(
                "relationship {}.{}: column '{}' not found in {}",
                entity,
                rel_name,
                field,
                obj.qualified_name()
            )));
        }
    }
    Ok(())
}
