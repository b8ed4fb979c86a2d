//! Role → action permission map derived from entity permissions.

use crate::config::{ConfigProvider, EntityConfig, RuntimeConfig, SourceType};
use crate::error::AppError;
use crate::service::{AuthorizationResolver, ConfigurationConsumer};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

pub const ANONYMOUS_ROLE: &str = "anonymous";
pub const AUTHENTICATED_ROLE: &str = "authenticated";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityAction {
    Create,
    Read,
    Update,
    Delete,
    Execute,
}

impl FromStr for EntityAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(EntityAction::Create),
            "read" => Ok(EntityAction::Read),
            "update" => Ok(EntityAction::Update),
            "delete" => Ok(EntityAction::Delete),
            "execute" => Ok(EntityAction::Execute),
            other => Err(AppError::BadRequest(format!("unknown action '{}'", other))),
        }
    }
}

type RoleMap = HashMap<String, BTreeSet<EntityAction>>;
type PermissionMap = HashMap<String, RoleMap>;

/// Answers "may role R perform action A on entity E" for the bound configuration.
#[derive(Default)]
pub struct PermissionResolver {
    provider: RwLock<Option<Arc<ConfigProvider>>>,
    map: RwLock<Arc<PermissionMap>>,
}

impl PermissionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, entity: &str, role: &str, action: EntityAction) -> bool {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner).clone();
        map.get(entity)
            .and_then(|roles| roles.get(role))
            .is_some_and(|actions| actions.contains(&action))
    }

    pub fn roles_for(&self, entity: &str) -> Vec<String> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner).clone();
        let mut roles: Vec<String> = map.get(entity).map(|r| r.keys().cloned().collect()).unwrap_or_default();
        roles.sort();
        roles
    }

    pub fn entity_count(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn expand(entity: &EntityConfig, action: &str) -> Vec<EntityAction> {
    if action != "*" {
        return EntityAction::from_str(action).into_iter().collect();
    }
    match entity.source.type_ {
        SourceType::StoredProcedure => vec![EntityAction::Execute],
        SourceType::Table | SourceType::View => vec![
            EntityAction::Create,
            EntityAction::Read,
            EntityAction::Update,
            EntityAction::Delete,
        ],
    }
}

fn build_permission_map(snapshot: &RuntimeConfig) -> PermissionMap {
    let mut map = PermissionMap::with_capacity(snapshot.entities.len());
    for (name, entity) in &snapshot.entities {
        let mut roles = RoleMap::new();
        for perm in &entity.permissions {
            let actions = roles.entry(perm.role.clone()).or_default();
            for action in &perm.actions {
                actions.extend(expand(entity, &action.name().to_lowercase()));
            }
        }
        // authenticated callers inherit anonymous rights unless configured explicitly
        if !roles.contains_key(AUTHENTICATED_ROLE) {
            if let Some(anon) = roles.get(ANONYMOUS_ROLE).cloned() {
                roles.insert(AUTHENTICATED_ROLE.to_string(), anon);
            }
        }
        map.insert(name.clone(), roles);
    }
    map
}

#[async_trait]
impl ConfigurationConsumer for PermissionResolver {
    fn name(&self) -> &'static str {
        "authorization resolver"
    }

    /// Binds only; the permission map is rebuilt separately through `rebuild_permission_map`.
    async fn rebind_configuration(&self, provider: Arc<ConfigProvider>) -> Result<(), AppError> {
        provider.get_config()?;
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = Some(provider);
        Ok(())
    }
}

#[async_trait]
impl AuthorizationResolver for PermissionResolver {
    async fn rebuild_permission_map(&self, snapshot: &RuntimeConfig) -> Result<(), AppError> {
        let map = build_permission_map(snapshot);
        tracing::debug!(entities = map.len(), "permission map rebuilt");
        *self.map.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(map);
        Ok(())
    }
}
