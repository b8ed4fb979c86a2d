//! PostgreSQL introspection through information_schema and pg_catalog.

use crate::config::{DataSourceConfig, SourceType};
use crate::error::AppError;
use crate::metadata::{
    ColumnDefinition, DatabaseObject, ForeignKeyDefinition, ObjectRef, ParameterDefinition, SchemaIntrospector,
};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Introspects PostgreSQL data sources. Keeps one small pool per connection string.
#[derive(Default)]
pub struct PgIntrospector {
    // The map lock is never held across a connect; each connection string waits only on its own cell.
    pools: std::sync::Mutex<HashMap<String, Arc<OnceCell<PgPool>>>>,
    acquire_timeout: Option<Duration>,
}

impl PgIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    async fn pool_for(&self, data_source: &DataSourceConfig) -> Result<PgPool, AppError> {
        let cell = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(data_source.connection_string.clone())
            .or_default()
            .clone();
        let pool = cell
            .get_or_try_init(|| async {
                let mut options = PgConnectOptions::from_str(&data_source.connection_string)?;
                if let Some(token) = &data_source.access_token {
                    options = options.password(token);
                }
                PgPoolOptions::new()
                    .max_connections(2)
                    .acquire_timeout(self.acquire_timeout.unwrap_or(ACQUIRE_TIMEOUT))
                    .connect_with(options)
                    .await
            })
            .await?;
        Ok(pool.clone())
    }
}

#[async_trait]
impl SchemaIntrospector for PgIntrospector {
    async fn introspect(
        &self,
        data_source: &DataSourceConfig,
        objects: &[ObjectRef],
    ) -> Result<Vec<DatabaseObject>, AppError> {
        let pool = self.pool_for(data_source).await?;
        let mut out = Vec::with_capacity(objects.len());
        for r in objects {
            let schema = r.schema.as_deref().unwrap_or("public");
            let found = match r.kind {
                SourceType::Table | SourceType::View => load_relation(&pool, schema, &r.name, r.kind).await?,
                SourceType::StoredProcedure => load_routine(&pool, schema, &r.name).await?,
            };
            if let Some(obj) = found {
                out.push(obj);
            }
        }
        Ok(out)
    }
}

async fn load_relation(pool: &PgPool, schema: &str, name: &str, kind: SourceType) -> Result<Option<DatabaseObject>, AppError> {
    let sql = r#"
        SELECT column_name::text, data_type::text, is_nullable = 'YES', column_default IS NOT NULL
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
    "#;
    tracing::debug!(schema, name, "introspect columns");
    let rows = sqlx::query_as::<_, (String, String, bool, bool)>(sql)
        .bind(schema)
        .bind(name)
        .fetch_all(pool)
        .await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let mut obj = DatabaseObject::new(Some(schema), name, kind);
    obj.columns = rows
        .into_iter()
        .map(|(name, data_type, nullable, has_default)| ColumnDefinition {
            name,
            data_type,
            nullable,
            has_default,
        })
        .collect();

    let pk_sql = r#"
        SELECT a.attname::text
        FROM pg_index i
        JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
        WHERE i.indrelid = (quote_ident($1) || '.' || quote_ident($2))::regclass AND i.indisprimary
        ORDER BY array_position(i.indkey, a.attnum)
    "#;
    obj.primary_key = sqlx::query_scalar::<_, String>(pk_sql)
        .bind(schema)
        .bind(name)
        .fetch_all(pool)
        .await?;

    let fk_sql = r#"
        SELECT c.conname::text, fn.nspname::text, ft.relname::text, a.attname::text, fa.attname::text
        FROM pg_constraint c
        JOIN pg_class t ON t.oid = c.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_class ft ON ft.oid = c.confrelid
        JOIN pg_namespace fn ON fn.oid = ft.relnamespace
        JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, fattnum, ord) ON true
        JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
        JOIN pg_attribute fa ON fa.attrelid = c.confrelid AND fa.attnum = k.fattnum
        WHERE c.contype = 'f' AND n.nspname = $1 AND t.relname = $2
        ORDER BY c.conname, k.ord
    "#;
    let fk_rows = sqlx::query_as::<_, (String, String, String, String, String)>(fk_sql)
        .bind(schema)
        .bind(name)
        .fetch_all(pool)
        .await?;
    let mut by_constraint: Vec<(String, ForeignKeyDefinition)> = Vec::new();
    for (constraint, ref_schema, ref_name, column, ref_column) in fk_rows {
        match by_constraint.iter_mut().find(|(c, _)| *c == constraint) {
            Some((_, fk)) => {
                fk.columns.push(column);
                fk.referenced_columns.push(ref_column);
            }
            None => by_constraint.push((
                constraint,
                ForeignKeyDefinition {
                    referenced_schema: Some(ref_schema),
                    referenced_name: ref_name,
                    columns: vec![column],
                    referenced_columns: vec![ref_column],
                },
            )),
        }
    }
    obj.foreign_keys = by_constraint.into_iter().map(|(_, fk)| fk).collect();
    Ok(Some(obj))
}

async fn load_routine(pool: &PgPool, schema: &str, name: &str) -> Result<Option<DatabaseObject>, AppError> {
    let exists_sql = r#"
        SELECT specific_name::text FROM information_schema.routines
        WHERE routine_schema = $1 AND routine_name = $2
        LIMIT 1
    "#;
    let Some(specific) = sqlx::query_scalar::<_, String>(exists_sql)
        .bind(schema)
        .bind(name)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };
    let params_sql = r#"
        SELECT COALESCE(parameter_name, '')::text, data_type::text
        FROM information_schema.parameters
        WHERE specific_schema = $1 AND specific_name = $2 AND parameter_mode IN ('IN', 'INOUT')
        ORDER BY ordinal_position
    "#;
    let params = sqlx::query_as::<_, (String, String)>(params_sql)
        .bind(schema)
        .bind(&specific)
        .fetch_all(pool)
        .await?;
    let mut obj = DatabaseObject::new(Some(schema), name, SourceType::StoredProcedure);
    obj.parameters = params
        .into_iter()
        .map(|(name, data_type)| ParameterDefinition { name, data_type })
        .collect();
    Ok(Some(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseType;
    use std::time::Instant;
    use tokio::net::TcpListener;

    fn source(addr: std::net::SocketAddr) -> DataSourceConfig {
        DataSourceConfig::new(
            DatabaseType::PostgreSql,
            format!("postgres://app:secret@{}/catalog?sslmode=disable", addr),
        )
    }

    #[tokio::test]
    async fn a_hanging_server_does_not_hold_up_other_sources() {
        // accepts connections and never answers the startup message
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = silent.accept().await {
                held.push(socket);
            }
        });
        // nothing listens on this port once the listener is dropped
        let closed_addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

        // each connect gives up after one acquire timeout; serialized connects would take two
        let introspector = Arc::new(PgIntrospector::new().with_acquire_timeout(Duration::from_secs(1)));
        let hanging = {
            let introspector = introspector.clone();
            tokio::spawn(async move { introspector.introspect(&source(silent_addr), &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let refused = tokio::time::timeout(
            Duration::from_millis(1600),
            introspector.introspect(&source(closed_addr), &[]),
        )
        .await
        .expect("refused source waited on the hanging one");
        assert!(refused.is_err());
        assert!(started.elapsed() < Duration::from_millis(1600));
        assert!(hanging.await.unwrap().is_err());
    }
}
