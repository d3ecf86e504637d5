//! Entity resolver: idempotent upserts keyed by identity.
//!
//! Every write to the graph outside of enrichment flags goes through
//! [`upsert_node`] or [`upsert_edge`]. Both run in one transaction whose
//! first statement is the insert, so the SQLite write lock is held across
//! the read-merge-write of the match branch and concurrent identical calls
//! converge on one row.
//!
//! Field groups on a [`NodeUpsert`]:
//!
//! | Group | On create | On match |
//! |-------|-----------|----------|
//! | `on_create` | written | ignored |
//! | `on_match` | ignored | overwritten |
//! | `always` | written | overwritten |
//! | `grow` | written | set union, existing order kept |

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{EdgeType, EnrichmentPass, NodeLabel};
use crate::store::{parse_props, GraphStore};

/// Identity of a node, as returned by [`upsert_node`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub label: NodeLabel,
    pub key: String,
    /// `true` when this call created the node.
    pub created: bool,
}

impl NodeRef {
    /// Reference an existing node without writing it.
    pub fn existing(label: NodeLabel, key: impl Into<String>) -> Self {
        Self {
            label,
            key: key.into(),
            created: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef {
    pub source: NodeRef,
    pub edge_type: EdgeType,
    pub target: NodeRef,
    /// `false` when the edge already existed and was left untouched.
    pub created: bool,
}

/// Builder for one node upsert.
#[derive(Debug, Clone)]
pub struct NodeUpsert {
    label: NodeLabel,
    key: String,
    on_create: Map<String, Value>,
    on_match: Map<String, Value>,
    grow: Vec<(String, Vec<Value>)>,
}

impl NodeUpsert {
    pub fn new(label: NodeLabel, key: impl Into<String>) -> Self {
        Self {
            label,
            key: key.into(),
            on_create: Map::new(),
            on_match: Map::new(),
            grow: Vec::new(),
        }
    }

    pub fn on_create(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.on_create.insert(field.to_string(), value.into());
        self
    }

    pub fn on_match(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.on_match.insert(field.to_string(), value.into());
        self
    }

    /// Set on create and on match.
    pub fn always(self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.on_create(field, value.clone()).on_match(field, value)
    }

    /// Array field that only ever grows.
    pub fn grow<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.grow.push((field.to_string(), values));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "empty identity key for {}",
                self.label
            )));
        }
        let field_names = self
            .on_create
            .keys()
            .chain(self.on_match.keys())
            .chain(self.grow.iter().map(|(f, _)| f));
        for field in field_names {
            if EnrichmentPass::is_flag_key(field) {
                return Err(Error::InvalidInput(format!(
                    "enrichment flag '{}' cannot be written through an upsert",
                    field
                )));
            }
        }
        Ok(())
    }

    fn create_props(&self) -> Map<String, Value> {
        let mut props = self.on_create.clone();
        for (field, values) in &self.grow {
            let mut merged = Vec::new();
            union_into(&mut merged, values);
            props.insert(field.clone(), Value::Array(merged));
        }
        props
    }
}

/// Builder for one edge upsert. Both endpoints must already exist.
#[derive(Debug, Clone)]
pub struct EdgeUpsert {
    source: NodeRef,
    edge_type: EdgeType,
    target: NodeRef,
    on_create: Map<String, Value>,
}

impl EdgeUpsert {
    pub fn new(source: &NodeRef, edge_type: EdgeType, target: &NodeRef) -> Self {
        Self {
            source: source.clone(),
            edge_type,
            target: target.clone(),
            on_create: Map::new(),
        }
    }

    /// Creation-time metadata. Never overwritten once the edge exists.
    pub fn on_create(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.on_create.insert(field.to_string(), value.into());
        self
    }
}

/// Create the node if absent, otherwise apply the match-side fields.
pub async fn upsert_node(store: &GraphStore, upsert: &NodeUpsert) -> Result<NodeRef> {
    upsert.validate()?;

    let now = Utc::now().to_rfc3339();
    let mut tx = store.pool().begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO nodes (label, key, props, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(label, key) DO NOTHING
        "#,
    )
    .bind(upsert.label.as_str())
    .bind(&upsert.key)
    .bind(Value::Object(upsert.create_props()).to_string())
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let created = inserted.rows_affected() == 1;

    if !created && (!upsert.on_match.is_empty() || !upsert.grow.is_empty()) {
        let raw: String = sqlx::query_scalar("SELECT props FROM nodes WHERE label = ? AND key = ?")
            .bind(upsert.label.as_str())
            .bind(&upsert.key)
            .fetch_one(&mut *tx)
            .await?;

        let mut props = parse_props(&raw)?;
        if merge_props(&mut props, &upsert.on_match, &upsert.grow) {
            sqlx::query("UPDATE nodes SET props = ?, updated_at = ? WHERE label = ? AND key = ?")
                .bind(Value::Object(props).to_string())
                .bind(&now)
                .bind(upsert.label.as_str())
                .bind(&upsert.key)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    Ok(NodeRef {
        label: upsert.label,
        key: upsert.key.clone(),
        created,
    })
}

/// Create the edge if the `(source, type, target)` triple is new.
///
/// One statement: the endpoint checks and the insert run under the same
/// write lock. Fails with [`Error::NotFound`] naming the first missing
/// endpoint.
pub async fn upsert_edge(store: &GraphStore, upsert: &EdgeUpsert) -> Result<EdgeRef> {
    let now = Utc::now().to_rfc3339();

    let inserted = sqlx::query(
        r#"
        INSERT INTO edges (src_label, src_key, edge_type, dst_label, dst_key, props, created_at)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
        WHERE EXISTS (SELECT 1 FROM nodes WHERE label = ?1 AND key = ?2)
          AND EXISTS (SELECT 1 FROM nodes WHERE label = ?4 AND key = ?5)
        ON CONFLICT(src_label, src_key, edge_type, dst_label, dst_key) DO NOTHING
        "#,
    )
    .bind(upsert.source.label.as_str())
    .bind(&upsert.source.key)
    .bind(upsert.edge_type.as_str())
    .bind(upsert.target.label.as_str())
    .bind(&upsert.target.key)
    .bind(Value::Object(upsert.on_create.clone()).to_string())
    .bind(&now)
    .execute(store.pool())
    .await?;

    let created = inserted.rows_affected() == 1;
    if !created {
        // Nodes are never deleted, so a missing endpoint now was missing then.
        for endpoint in [&upsert.source, &upsert.target] {
            if store.get_node(endpoint.label, &endpoint.key).await?.is_none() {
                return Err(Error::not_found(endpoint.label.as_str(), endpoint.key.clone()));
            }
        }
    }

    Ok(EdgeRef {
        source: upsert.source.clone(),
        edge_type: upsert.edge_type,
        target: upsert.target.clone(),
        created,
    })
}

/// Apply match-side fields to an existing property map. Returns whether
/// anything changed.
fn merge_props(
    props: &mut Map<String, Value>,
    on_match: &Map<String, Value>,
    grow: &[(String, Vec<Value>)],
) -> bool {
    let mut changed = false;

    for (field, value) in on_match {
        if props.get(field) != Some(value) {
            props.insert(field.clone(), value.clone());
            changed = true;
        }
    }

    for (field, values) in grow {
        let mut current = match props.get(field) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(scalar) => vec![scalar.clone()],
        };
        let before = current.len();
        union_into(&mut current, values);
        if current.len() != before || !matches!(props.get(field), Some(Value::Array(_))) {
            props.insert(field.clone(), Value::Array(current));
            changed = true;
        }
    }

    changed
}

fn union_into(target: &mut Vec<Value>, values: &[Value]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}
