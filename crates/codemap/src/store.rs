//! Graph store: upsert and prune semantics plus the recursive impact query.
//!
//! Every operation takes a cancellation token, checked on entry. Individual
//! operations are atomic; the bulk upserts are the unit of atomicity — there
//! is no multi-statement transaction exposed to callers.

use std::collections::HashSet;

use rusqlite::params;
use tokio_util::sync::CancellationToken;

use crate::db::Db;
use crate::{Edge, IndexError, Node, Relation, Result};

const NODE_COLUMNS: &str =
    "id, name, kind, file_path, line_start, line_end, col_start, col_end, symbol_uri, created_at";

const EDGE_COLUMNS: &str = "source_id, target_id, relation, created_at";

/// Kinds that the enrichment phase treats as definitions worth querying.
pub const DEFINITION_KINDS: &[&str] = &[
    "function_declaration",
    "method_declaration",
    "method_definition",
    "function_definition",
    "class_definition",
    "class_declaration",
    "interface_declaration",
    "type_definition",
];

/// Read capability handed to the enrichment orchestrator: map a source
/// position back onto the graph node that encloses it.
pub trait NodeResolver: Send + Sync {
    /// Find the innermost node whose line range encloses the given 1-based
    /// position, or `None` when nothing in that file does.
    fn find_containing_node(&self, file_path: &str, line: u32, col: u32) -> Result<Option<Node>>;
}

/// Persistent node/edge storage over [`Db`].
#[derive(Clone)]
pub struct GraphStore {
    db: Db,
}

fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }
    Ok(())
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        file_path: row.get(3)?,
        line_start: row.get(4)?,
        line_end: row.get(5)?,
        col_start: row.get(6)?,
        col_end: row.get(7)?,
        symbol_uri: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    let relation: String = row.get(2)?;
    let relation = Relation::parse(&relation).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown relation: {relation}").into(),
        )
    })?;
    Ok(Edge {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        relation,
        created_at: row.get(3)?,
    })
}

impl GraphStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert or replace a node by id. Replaces all scalar fields and
    /// refreshes `created_at`.
    pub fn upsert_node(&self, cancel: &CancellationToken, node: &Node) -> Result<()> {
        check(cancel)?;
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO nodes (id, name, kind, file_path, line_start, line_end, col_start, col_end, symbol_uri, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 kind = excluded.kind,
                 file_path = excluded.file_path,
                 line_start = excluded.line_start,
                 line_end = excluded.line_end,
                 col_start = excluded.col_start,
                 col_end = excluded.col_end,
                 symbol_uri = excluded.symbol_uri,
                 created_at = excluded.created_at",
            params![
                node.id,
                node.name,
                node.kind,
                node.file_path,
                node.line_start,
                node.line_end,
                node.col_start,
                node.col_end,
                node.symbol_uri,
                node.created_at,
            ],
        )?;
        Ok(())
    }

    /// Insert an edge; a primary-key conflict is a no-op.
    pub fn upsert_edge(&self, cancel: &CancellationToken, edge: &Edge) -> Result<()> {
        check(cancel)?;
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO edges (source_id, target_id, relation, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source_id, target_id, relation) DO NOTHING",
            params![
                edge.source_id,
                edge.target_id,
                edge.relation.as_str(),
                edge.created_at,
            ],
        )?;
        Ok(())
    }

    /// Upsert a batch of nodes in a single transaction. Ordering within the
    /// batch is irrelevant to the final state.
    pub fn bulk_upsert_nodes(&self, cancel: &CancellationToken, nodes: &[Node]) -> Result<()> {
        check(cancel)?;
        let conn = self.db.lock();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO nodes (id, name, kind, file_path, line_start, line_end, col_start, col_end, symbol_uri, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     kind = excluded.kind,
                     file_path = excluded.file_path,
                     line_start = excluded.line_start,
                     line_end = excluded.line_end,
                     col_start = excluded.col_start,
                     col_end = excluded.col_end,
                     symbol_uri = excluded.symbol_uri,
                     created_at = excluded.created_at",
            )?;
            for node in nodes {
                stmt.execute(params![
                    node.id,
                    node.name,
                    node.kind,
                    node.file_path,
                    node.line_start,
                    node.line_end,
                    node.col_start,
                    node.col_end,
                    node.symbol_uri,
                    node.created_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Upsert a batch of edges in a single transaction, ignoring conflicts
    /// per row.
    pub fn bulk_upsert_edges(&self, cancel: &CancellationToken, edges: &[Edge]) -> Result<()> {
        check(cancel)?;
        let conn = self.db.lock();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO edges (source_id, target_id, relation, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(source_id, target_id, relation) DO NOTHING",
            )?;
            for edge in edges {
                stmt.execute(params![
                    edge.source_id,
                    edge.target_id,
                    edge.relation.as_str(),
                    edge.created_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All nodes with the given name, ordered by file path.
    pub fn get_symbol_location(
        &self,
        cancel: &CancellationToken,
        symbol_name: &str,
    ) -> Result<Vec<Node>> {
        check(cancel)?;
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE name = ?1 ORDER BY file_path"
        ))?;
        let nodes = stmt
            .query_map(params![symbol_name], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// All nodes in the given file, ordered by starting line.
    pub fn get_symbols_in_file(
        &self,
        cancel: &CancellationToken,
        file_path: &str,
    ) -> Result<Vec<Node>> {
        check(cancel)?;
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE file_path = ?1 ORDER BY line_start"
        ))?;
        let nodes = stmt
            .query_map(params![file_path], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// Transitive set of sources that reach any node of the given name via
    /// outgoing edges — the blast radius of a change.
    ///
    /// Implemented as a recursive CTE per matching target id, following
    /// source→target edges backwards; results are unioned and deduplicated
    /// by id. The queried targets themselves are excluded.
    pub fn find_impact(&self, cancel: &CancellationToken, symbol_name: &str) -> Result<Vec<Node>> {
        check(cancel)?;
        let conn = self.db.lock();

        let mut id_stmt = conn.prepare("SELECT id FROM nodes WHERE name = ?1")?;
        let target_ids: Vec<String> = id_stmt
            .query_map(params![symbol_name], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }
        let target_set: HashSet<&str> = target_ids.iter().map(String::as_str).collect();

        let mut impact_stmt = conn.prepare(&format!(
            "WITH RECURSIVE impacted AS (
                 SELECT source_id
                 FROM edges
                 WHERE target_id = ?1

                 UNION

                 SELECT e.source_id
                 FROM edges e
                 INNER JOIN impacted i ON e.target_id = i.source_id
             )
             SELECT DISTINCT {NODE_COLUMNS}
             FROM nodes n
             JOIN impacted i ON n.id = i.source_id"
        ))?;

        let mut unique: Vec<Node> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for target_id in &target_ids {
            check(cancel)?;
            let rows = impact_stmt
                .query_map(params![target_id], row_to_node)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for node in rows {
                if target_set.contains(node.id.as_str()) {
                    continue;
                }
                if seen.insert(node.id.clone()) {
                    unique.push(node);
                }
            }
        }
        Ok(unique)
    }

    /// All edges touching a node, on either end.
    pub fn get_edges_for_node(
        &self,
        cancel: &CancellationToken,
        node_id: &str,
    ) -> Result<Vec<Edge>> {
        check(cancel)?;
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges WHERE source_id = ?1 OR target_id = ?1"
        ))?;
        let edges = stmt
            .query_map(params![node_id], row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    /// Remove all nodes for a file; touching edges cascade away with them.
    pub fn delete_nodes_by_file(&self, cancel: &CancellationToken, file_path: &str) -> Result<()> {
        check(cancel)?;
        let conn = self.db.lock();
        conn.execute("DELETE FROM nodes WHERE file_path = ?1", params![file_path])?;
        Ok(())
    }

    /// Delete every file in the store that is not in the known-present set.
    pub fn prune_stale_files(&self, cancel: &CancellationToken, kept: &[String]) -> Result<()> {
        check(cancel)?;
        let keep: HashSet<&str> = kept.iter().map(String::as_str).collect();

        let stale: Vec<String> = {
            let conn = self.db.lock();
            let mut stmt = conn.prepare("SELECT DISTINCT file_path FROM nodes")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|p| !keep.contains(p.as_str()))
                .collect();
            rows
        };

        for file in stale {
            self.delete_nodes_by_file(cancel, &file)?;
        }
        Ok(())
    }

    /// Empty edges then nodes.
    pub fn clear(&self, cancel: &CancellationToken) -> Result<()> {
        check(cancel)?;
        let conn = self.db.lock();
        conn.execute("DELETE FROM edges", [])?;
        conn.execute("DELETE FROM nodes", [])?;
        Ok(())
    }

    pub fn count_nodes(&self, cancel: &CancellationToken) -> Result<usize> {
        check(cancel)?;
        let conn = self.db.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_edges(&self, cancel: &CancellationToken) -> Result<usize> {
        check(cancel)?;
        let conn = self.db.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl NodeResolver for GraphStore {
    fn find_containing_node(&self, file_path: &str, line: u32, _col: u32) -> Result<Option<Node>> {
        use rusqlite::OptionalExtension;

        let conn = self.db.lock();

        // Innermost range containment first.
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE file_path = ?1 AND line_start <= ?2 AND line_end >= ?2
             ORDER BY (line_end - line_start) ASC, line_start DESC
             LIMIT 1"
        ))?;
        if let Some(node) = stmt
            .query_row(params![file_path, line], row_to_node)
            .optional()?
        {
            return Ok(Some(node));
        }

        // Node ranges cover only the definition's name token, so a reference
        // inside a body lands between ranges; resolve to the nearest
        // definition at or before the line.
        let kinds = DEFINITION_KINDS
            .iter()
            .map(|k| format!("'{k}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut fallback = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE file_path = ?1 AND line_start <= ?2 AND kind IN ({kinds})
             ORDER BY line_start DESC
             LIMIT 1"
        ))?;
        Ok(fallback
            .query_row(params![file_path, line], row_to_node)
            .optional()?)
    }
}
