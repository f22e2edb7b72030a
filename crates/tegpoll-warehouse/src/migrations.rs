use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_metric_points",
        sql: r#"
CREATE TABLE IF NOT EXISTS metric_points (
    series TEXT NOT NULL,
    device TEXT,
    tags TEXT NOT NULL DEFAULT '{}',
    epoch_s BIGINT NOT NULL,
    value_kind TEXT NOT NULL,
    value_double DOUBLE,
    value_bigint BIGINT,
    value_text TEXT,
    value_bool BOOLEAN,
    source TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS ingest_log (
    batch_id TEXT NOT NULL,
    source TEXT NOT NULL,
    point_count BIGINT NOT NULL,
    status TEXT NOT NULL,
    latency_ms BIGINT,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_metric_points_series_epoch ON metric_points(series, epoch_s);
CREATE INDEX IF NOT EXISTS idx_metric_points_batch ON metric_points(batch_id);
CREATE INDEX IF NOT EXISTS idx_ingest_log_source_ts ON ingest_log(source, timestamp);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;
        if applied > 0 {
            continue;
        }

        connection.execute_batch(migration.sql)?;
        connection.execute(
            "INSERT INTO schema_migrations (version) VALUES (?)",
            params![migration.version],
        )?;
    }

    Ok(())
}

pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = statement.query_map([], |row| row.get::<_, String>(0))?;
    versions.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        apply_migrations(&connection).expect("first run");
        apply_migrations(&connection).expect("second run");

        assert_eq!(
            applied_versions(&connection).expect("versions"),
            vec!["0001_metric_points", "0002_indexes"]
        );
    }
}
