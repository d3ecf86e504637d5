use sqlx::SqlitePool;

use crate::error::Result;

/// Create the property-graph schema. Safe to run on every start.
///
/// `(label, key)` is the node identity and the edge identity is the full
/// `(source, type, target)` triple, so duplicates are impossible at the
/// schema level whatever the callers do.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            label TEXT NOT NULL,
            key TEXT NOT NULL,
            props TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (label, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edges (
            src_label TEXT NOT NULL,
            src_key TEXT NOT NULL,
            edge_type TEXT NOT NULL,
            dst_label TEXT NOT NULL,
            dst_key TEXT NOT NULL,
            props TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            PRIMARY KEY (src_label, src_key, edge_type, dst_label, dst_key),
            FOREIGN KEY (src_label, src_key) REFERENCES nodes(label, key),
            FOREIGN KEY (dst_label, dst_key) REFERENCES nodes(label, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Reverse lookups: "papers linking to this concept" and neighbour fetches
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(dst_label, dst_key, edge_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_created_at ON nodes(label, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
