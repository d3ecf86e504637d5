//! Graph store adapter.
//!
//! A property graph laid out over two SQLite tables (see [`crate::migrate`]).
//! Nodes carry their properties as a JSON object; edges are identified by
//! their full `(source, type, target)` triple.
//!
//! This module is the only place that touches sqlx rows. Everything it
//! returns is a plain record: [`NodeRow`], [`EdgeRow`], [`Paper`] or
//! [`EntitySummary`], with timestamps already parsed.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::DbConfig;
use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{EdgeType, EnrichmentPass, EnrichmentState, NodeLabel, Paper};

/// Handle to the graph. Cheap to clone; clones share one bounded pool.
#[derive(Clone)]
pub struct GraphStore {
    pool: SqlitePool,
}

/// A node with its raw property map.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub label: String,
    pub key: String,
    pub props: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeRow {
    pub fn str_prop(&self, name: &str) -> Option<&str> {
        self.props.get(name).and_then(Value::as_str)
    }

    /// Display name: the `name` property, falling back to the identity key.
    pub fn display_name(&self) -> &str {
        self.str_prop("name").unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone)]
pub struct EdgeRow {
    pub src_label: String,
    pub src_key: String,
    pub edge_type: String,
    pub dst_label: String,
    pub dst_key: String,
    pub props: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// A concept or method with the number of papers linking to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub key: String,
    pub name: String,
    /// `category` for concepts, `algorithm_type` for methods.
    pub category: Option<String>,
    pub paper_count: i64,
}

impl GraphStore {
    /// Connect, then make sure the schema exists.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool)
            .await
            .map_err(|e| Error::Connectivity(format!("schema setup failed: {}", e)))?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Round-trip a trivial statement through the pool.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Connectivity(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Nodes and edges ============

    pub async fn get_node(&self, label: NodeLabel, key: &str) -> Result<Option<NodeRow>> {
        let row = sqlx::query(
            "SELECT label, key, props, created_at, updated_at FROM nodes WHERE label = ? AND key = ?",
        )
        .bind(label.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(node_from_row).transpose()
    }

    pub async fn count_nodes(&self, label: Option<NodeLabel>) -> Result<i64> {
        let count: i64 = match label {
            Some(l) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE label = ?")
                    .bind(l.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    pub async fn count_edges(&self, edge_type: Option<EdgeType>) -> Result<i64> {
        let count: i64 = match edge_type {
            Some(t) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM edges WHERE edge_type = ?")
                    .bind(t.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM edges")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Outgoing edges of one node, oldest first.
    pub async fn edges_from(&self, label: NodeLabel, key: &str) -> Result<Vec<EdgeRow>> {
        let rows = sqlx::query(
            "SELECT src_label, src_key, edge_type, dst_label, dst_key, props, created_at
             FROM edges WHERE src_label = ? AND src_key = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(label.as_str())
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(edge_from_row).collect()
    }

    /// Incoming edges of one node, oldest first.
    pub async fn edges_to(&self, label: NodeLabel, key: &str) -> Result<Vec<EdgeRow>> {
        let rows = sqlx::query(
            "SELECT src_label, src_key, edge_type, dst_label, dst_key, props, created_at
             FROM edges WHERE dst_label = ? AND dst_key = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(label.as_str())
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(edge_from_row).collect()
    }

    /// Targets of `edge_type` edges leaving a node.
    ///
    /// Ordered by the edge's `position` property when it has one (author
    /// order), then by creation.
    pub async fn neighbours(
        &self,
        label: NodeLabel,
        key: &str,
        edge_type: EdgeType,
        limit: usize,
    ) -> Result<Vec<NodeRow>> {
        let rows = sqlx::query(
            r#"
            SELECT n.label, n.key, n.props, n.created_at, n.updated_at
            FROM edges e
            JOIN nodes n ON n.label = e.dst_label AND n.key = e.dst_key
            WHERE e.src_label = ? AND e.src_key = ? AND e.edge_type = ?
            ORDER BY COALESCE(json_extract(e.props, '$.position'), 0) ASC,
                     e.created_at ASC, e.rowid ASC
            LIMIT ?
            "#,
        )
        .bind(label.as_str())
        .bind(key)
        .bind(edge_type.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(node_from_row).collect()
    }

    // ============ Papers ============

    pub async fn get_paper(&self, base_id: &str) -> Result<Option<Paper>> {
        match self.get_node(NodeLabel::Paper, base_id).await? {
            Some(node) => Ok(Some(paper_from_node(&node)?)),
            None => Ok(None),
        }
    }

    /// Most recently published first.
    pub async fn list_papers(&self, offset: usize, limit: usize) -> Result<Vec<Paper>> {
        let rows = sqlx::query(
            r#"
            SELECT label, key, props, created_at, updated_at FROM nodes
            WHERE label = 'Paper'
            ORDER BY json_extract(props, '$.published_date') DESC, key ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        papers_from_rows(&rows)
    }

    pub async fn count_papers(&self) -> Result<i64> {
        self.count_nodes(Some(NodeLabel::Paper)).await
    }

    /// Papers whose title or abstract contains `term`, ignoring case.
    pub async fn search_papers(&self, term: &str, limit: usize) -> Result<Vec<Paper>> {
        let rows = sqlx::query(
            r#"
            SELECT label, key, props, created_at, updated_at FROM nodes
            WHERE label = 'Paper'
              AND (instr(lower(COALESCE(json_extract(props, '$.title'), '')), lower(?1)) > 0
                OR instr(lower(COALESCE(json_extract(props, '$.abstract'), '')), lower(?1)) > 0)
            ORDER BY json_extract(props, '$.published_date') DESC, key ASC
            LIMIT ?2
            "#,
        )
        .bind(term)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        papers_from_rows(&rows)
    }

    /// Up to `limit` papers without the flag for `pass` (and with the flag of
    /// its prerequisite pass, if any).
    ///
    /// Never-attempted papers come first, oldest first; then retried papers,
    /// least recently attempted first. Papers that already have the edge the
    /// pass would add are skipped.
    pub async fn papers_missing_pass(
        &self,
        pass: EnrichmentPass,
        limit: usize,
    ) -> Result<Vec<Paper>> {
        let missing = format!("$.{}", pass.flag_key());
        let required = pass.prerequisite().map(|p| format!("$.{}", p.flag_key()));
        let provided_by = pass.provided_by().map(|e| e.as_str());
        let attempted = format!("$.{}", pass.attempt_key());

        let rows = sqlx::query(
            r#"
            SELECT label, key, props, created_at, updated_at FROM nodes
            WHERE label = 'Paper'
              AND json_extract(props, ?1) IS NULL
              AND (?2 IS NULL OR json_extract(props, ?2) IS NOT NULL)
              AND (?3 IS NULL OR NOT EXISTS (
                    SELECT 1 FROM edges e
                    WHERE e.src_label = 'Paper' AND e.src_key = nodes.key AND e.edge_type = ?3
                  ))
            ORDER BY json_extract(props, ?4) IS NOT NULL,
                     json_extract(props, ?4) ASC,
                     created_at ASC,
                     key ASC
            LIMIT ?5
            "#,
        )
        .bind(missing)
        .bind(required)
        .bind(provided_by)
        .bind(attempted)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        papers_from_rows(&rows)
    }

    /// Stamp an attempt of `pass` that left the flag unset.
    pub async fn record_pass_attempt(
        &self,
        base_id: &str,
        pass: EnrichmentPass,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let stamp = at.to_rfc3339_opts(SecondsFormat::Micros, true);
        sqlx::query(
            r#"
            UPDATE nodes SET props = json_set(props, ?1, ?2)
            WHERE label = 'Paper' AND key = ?3 AND json_extract(props, ?4) IS NULL
            "#,
        )
        .bind(format!("$.{}", pass.attempt_key()))
        .bind(stamp)
        .bind(base_id)
        .bind(format!("$.{}", pass.flag_key()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that `pass` completed for a paper.
    ///
    /// `json_insert` never replaces an existing value, so a flag keeps its
    /// first timestamp and is never cleared. Returns `true` when the flag
    /// was newly set.
    pub async fn mark_pass_complete(
        &self,
        base_id: &str,
        pass: EnrichmentPass,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let path = format!("$.{}", pass.flag_key());
        let result = sqlx::query(
            r#"
            UPDATE nodes SET props = json_insert(props, ?1, ?2), updated_at = ?2
            WHERE label = 'Paper' AND key = ?3 AND json_extract(props, ?1) IS NULL
            "#,
        )
        .bind(path)
        .bind(at.to_rfc3339())
        .bind(base_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_node(NodeLabel::Paper, base_id).await? {
            Some(_) => Ok(false),
            None => Err(Error::not_found(NodeLabel::Paper.as_str(), base_id)),
        }
    }

    // ============ Entities ============

    /// Nodes of `label` whose name contains `term`, with the number of
    /// papers pointing at them through `edge_type`. Most linked first,
    /// ties by key.
    pub async fn search_entities(
        &self,
        label: NodeLabel,
        edge_type: EdgeType,
        category_field: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<EntitySummary>> {
        let rows = sqlx::query(
            r#"
            SELECT n.key,
                   COALESCE(json_extract(n.props, '$.name'), n.key) AS name,
                   json_extract(n.props, ?1) AS category,
                   (SELECT COUNT(*) FROM edges e
                     WHERE e.dst_label = n.label AND e.dst_key = n.key
                       AND e.edge_type = ?2 AND e.src_label = 'Paper') AS paper_count
            FROM nodes n
            WHERE n.label = ?3
              AND instr(lower(COALESCE(json_extract(n.props, '$.name'), n.key)), lower(?4)) > 0
            ORDER BY paper_count DESC, n.key ASC
            LIMIT ?5
            "#,
        )
        .bind(format!("$.{}", category_field))
        .bind(edge_type.as_str())
        .bind(label.as_str())
        .bind(term)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| EntitySummary {
                key: row.get("key"),
                name: row.get("name"),
                category: row.get("category"),
                paper_count: row.get("paper_count"),
            })
            .collect())
    }
}

// ============ Row conversion ============

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("bad stored timestamp '{}': {}", raw, e)))
}

pub(crate) fn parse_props(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn node_from_row(row: &SqliteRow) -> Result<NodeRow> {
    let props: String = row.get("props");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    Ok(NodeRow {
        label: row.get("label"),
        key: row.get("key"),
        props: parse_props(&props)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn edge_from_row(row: &SqliteRow) -> Result<EdgeRow> {
    let props: String = row.get("props");
    let created_at: String = row.get("created_at");
    Ok(EdgeRow {
        src_label: row.get("src_label"),
        src_key: row.get("src_key"),
        edge_type: row.get("edge_type"),
        dst_label: row.get("dst_label"),
        dst_key: row.get("dst_key"),
        props: parse_props(&props)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn papers_from_rows(rows: &[SqliteRow]) -> Result<Vec<Paper>> {
    rows.iter()
        .map(|row| node_from_row(row).and_then(|node| paper_from_node(&node)))
        .collect()
}

fn str_list(props: &Map<String, Value>, name: &str) -> Vec<String> {
    props
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Typed view of a Paper node. Missing optional properties become empty.
pub fn paper_from_node(node: &NodeRow) -> Result<Paper> {
    let props = &node.props;
    let text = |name: &str| props.get(name).and_then(Value::as_str).map(str::to_string);

    let published_date = text("published_date")
        .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());

    Ok(Paper {
        arxiv_id: node.key.clone(),
        display_id: text("display_id").unwrap_or_else(|| node.key.clone()),
        title: text("title").unwrap_or_default(),
        abstract_text: text("abstract").unwrap_or_default(),
        published_date,
        categories: str_list(props, "categories"),
        pdf_url: text("pdf_url"),
        citation_count: props
            .get("citation_count")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        source: text("source"),
        hub_upvotes: props.get("hub_upvotes").and_then(Value::as_i64),
        on_hub: props.get("on_hub").and_then(Value::as_bool),
        hub_url: text("hub_url"),
        hub_ai_summary: text("hub_ai_summary"),
        hub_keywords: str_list(props, "hub_keywords"),
        enrichment: EnrichmentState::from_props(props),
        created_at: node.created_at,
        updated_at: node.updated_at,
    })
}
