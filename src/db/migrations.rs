use super::pool::{PgPool, acquire};
use crate::{
    error::{Error, Result},
    metrics::MIGRATIONS_APPLIED,
};
use tracing::{debug, info};

/// One named, idempotent schema statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Storage schema, parent tables before their indexes
pub const DEFINITIONS: &[Migration] = &[
    Migration {
        name: "create_images_table",
        sql: r"
CREATE TABLE IF NOT EXISTS images (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    namespace TEXT NOT NULL,
    object JSONB NOT NULL,
    resource_version BIGINT NOT NULL DEFAULT 1,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (name, namespace)
)",
    },
    Migration {
        name: "create_images_namespace_index",
        sql: "CREATE INDEX IF NOT EXISTS idx_images_namespace ON images (namespace)",
    },
    Migration {
        name: "create_images_registry_index",
        sql: "CREATE INDEX IF NOT EXISTS idx_images_image_metadata_registry ON images ((object->'imageMetadata'->>'registry'))",
    },
    Migration {
        name: "create_sboms_table",
        sql: r"
CREATE TABLE IF NOT EXISTS sboms (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    namespace TEXT NOT NULL,
    object JSONB NOT NULL,
    resource_version BIGINT NOT NULL DEFAULT 1,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (name, namespace)
)",
    },
    Migration {
        name: "create_sboms_namespace_index",
        sql: "CREATE INDEX IF NOT EXISTS idx_sboms_namespace ON sboms (namespace)",
    },
    Migration {
        name: "create_vulnerability_reports_table",
        sql: r"
CREATE TABLE IF NOT EXISTS vulnerability_reports (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    namespace TEXT NOT NULL,
    object JSONB NOT NULL,
    resource_version BIGINT NOT NULL DEFAULT 1,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (name, namespace)
)",
    },
    Migration {
        name: "create_vulnerability_reports_namespace_index",
        sql: "CREATE INDEX IF NOT EXISTS idx_vulnerability_reports_namespace ON vulnerability_reports (namespace)",
    },
];

/// Apply `definitions` in order, stopping at the first failure
///
/// No lock is taken: every statement is idempotent, so concurrent runs from
/// several replicas converge on the same schema.
///
/// # Errors
///
/// Returns a connectivity error if no connection can be checked out, or
/// [`Error::Schema`] naming the statement that failed
pub async fn apply_all(pool: &PgPool, definitions: &[Migration]) -> Result<()> {
    let client = acquire(pool).await?;
    let mut applied: i64 = 0;

    for migration in definitions {
        debug!(migration = migration.name, "Applying migration");

        client
            .batch_execute(migration.sql)
            .await
            .map_err(|source| Error::Schema {
                name: migration.name,
                source,
            })?;

        applied += 1;
        MIGRATIONS_APPLIED.set(applied);
    }

    info!(applied, "Database schema is up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_definitions_are_idempotent() {
        for migration in DEFINITIONS {
            assert!(
                migration.sql.contains("IF NOT EXISTS"),
                "{} is not idempotent",
                migration.name
            );
        }
    }

    #[test]
    fn test_definition_names_are_unique() {
        let names: HashSet<_> = DEFINITIONS.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), DEFINITIONS.len());
    }

    #[test]
    fn test_tables_come_before_their_indexes() {
        for table in ["images", "sboms", "vulnerability_reports"] {
            let create = DEFINITIONS
                .iter()
                .position(|m| m.sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table} ")));
            let first_index = DEFINITIONS
                .iter()
                .position(|m| m.sql.contains(&format!(" ON {table} ")));

            assert!(create.is_some(), "missing table {table}");
            assert!(first_index.is_some(), "missing index on {table}");
            assert!(create < first_index, "{table} index defined before its table");
        }
    }

    #[test]
    fn test_registry_index() {
        assert!(
            DEFINITIONS
                .iter()
                .any(|m| m.sql.contains("'imageMetadata'->>'registry'"))
        );
    }
}
