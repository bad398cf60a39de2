//! Memgraph adapter
//!
//! Bolt-backed [`GraphStore`] implementation. All Cypher lives here; the
//! rest of the engine never sees a query string. Calls are independent -
//! the only batched write is the UNWIND behind [`GraphStore::create_memories`].
//!
//! Conventions at the wire:
//! - timestamps are epoch milliseconds (i64)
//! - `invalidAt` is never materialized as null; absence means live
//! - embeddings travel as float lists, converted to f32 at this boundary
//! - `metadata` is an opaque JSON string

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{ConfigBuilder, Graph, Query, Row, query};
use tracing::{debug, warn};

use crate::cluster::Community;
use crate::config::GraphConfig;
use crate::entity::{Entity, EntityRelation};
use crate::error::GraphError;
use crate::memory::{
    AccessLogEntry, ExtractionStatus, Memory, MemoryFilter, MemoryState, Page, TemporalMode,
};

use super::{AppCount, GraphResult, GraphStore, UserStats};

// ============================================================================
// STORE
// ============================================================================

/// Pooled Bolt connection to Memgraph plus the declared embedding dimension.
pub struct MemgraphStore {
    graph: Graph,
    dims: usize,
}

impl MemgraphStore {
    /// Connect with a pooled driver. Fails fast on bad credentials or an
    /// unreachable host.
    pub async fn connect(config: &GraphConfig, dims: usize) -> GraphResult<Self> {
        let driver_config = ConfigBuilder::default()
            .uri(&config.url)
            .user(&config.user)
            .password(&config.password)
            .max_connections(16)
            .build()
            .map_err(map_neo)?;
        let graph = Graph::connect(driver_config).await.map_err(map_neo)?;
        Ok(Self { graph, dims })
    }

    /// Raw read surface. Exposed for diagnostics; engine code goes through
    /// the typed methods.
    pub async fn run_read(&self, q: Query) -> GraphResult<Vec<Row>> {
        let mut stream = self.graph.execute(q).await.map_err(map_neo)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(map_neo)? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Raw write surface; also used when a write needs rows back.
    pub async fn run_write(&self, q: Query) -> GraphResult<Vec<Row>> {
        self.run_read(q).await
    }

    async fn run_ddl(&self, statement: &str) -> GraphResult<()> {
        match self.graph.run(query(statement)).await.map_err(map_neo) {
            Ok(()) => Ok(()),
            // Re-running DDL against an initialized store is expected.
            Err(GraphError::Query(msg)) => {
                debug!(statement, error = %msg, "schema statement skipped");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    async fn single_count(&self, q: Query) -> GraphResult<usize> {
        let rows = self.run_write(q).await?;
        match rows.first() {
            Some(row) => Ok(col::<i64>(row, "count")?.max(0) as usize),
            None => Ok(0),
        }
    }
}

// ============================================================================
// WIRE HELPERS
// ============================================================================

fn map_neo(err: neo4rs::Error) -> GraphError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("connection")
        || lower.contains("io error")
        || lower.contains("authentication")
        || lower.contains("timed out")
    {
        GraphError::Connectivity(msg)
    } else {
        GraphError::Query(msg)
    }
}

fn col<T: for<'a> serde::Deserialize<'a>>(row: &Row, key: &str) -> GraphResult<T> {
    row.get::<T>(key)
        .map_err(|e| GraphError::Decode(format!("column {key}: {e}")))
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(value: i64) -> GraphResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| GraphError::Decode(format!("timestamp out of range: {value}")))
}

fn opt_from_millis(value: Option<i64>) -> GraphResult<Option<DateTime<Utc>>> {
    value.map(from_millis).transpose()
}

fn to_wire_vec(embedding: &[f32]) -> Vec<f64> {
    embedding.iter().map(|v| f64::from(*v)).collect()
}

fn from_wire_vec(values: Vec<f64>) -> Vec<f32> {
    values.into_iter().map(|v| v as f32).collect()
}

/// Escape the user query for the Tantivy syntax behind `text_search.search`.
fn text_index_query(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    format!("data.content:({})", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Shared RETURN tail for memory rows. `embedding` is only shipped when
/// the caller asked for it - vectors dominate row size.
fn memory_return(with_embedding: bool) -> String {
    let embedding = if with_embedding { "m.embedding" } else { "null" };
    format!(
        "RETURN m.id AS id, m.content AS content, m.state AS state, \
         m.metadata AS metadata, m.validAt AS validAt, m.invalidAt AS invalidAt, \
         m.createdAt AS createdAt, m.updatedAt AS updatedAt, \
         m.archivedAt AS archivedAt, m.deletedAt AS deletedAt, \
         m.extractionStatus AS extractionStatus, \
         coalesce(m.extractionAttempts, 0) AS extractionAttempts, \
         m.extractionError AS extractionError, \
         {embedding} AS embedding, \
         head([(m)-[:CREATED_BY]->(a:App) | a.name]) AS appName, \
         [(m)-[:HAS_CATEGORY]->(c:Category) | c.name] AS categories"
    )
}

fn decode_memory(row: &Row, user_id: &str) -> GraphResult<Memory> {
    let metadata: Option<String> = col(row, "metadata")?;
    let metadata = match metadata {
        Some(raw) => serde_json::from_str::<serde_json::Value>(&raw)
            .map_err(|e| GraphError::Decode(format!("metadata: {e}")))
            .map(|value| (!value.is_null()).then_some(value))?,
        None => None,
    };
    let extraction_status: Option<String> = col(row, "extractionStatus")?;
    Ok(Memory {
        id: col(row, "id")?,
        user_id: user_id.to_string(),
        content: col(row, "content")?,
        state: MemoryState::parse_name(&col::<String>(row, "state")?),
        metadata,
        valid_at: from_millis(col(row, "validAt")?)?,
        invalid_at: opt_from_millis(col(row, "invalidAt")?)?,
        created_at: from_millis(col(row, "createdAt")?)?,
        updated_at: from_millis(col(row, "updatedAt")?)?,
        archived_at: opt_from_millis(col(row, "archivedAt")?)?,
        deleted_at: opt_from_millis(col(row, "deletedAt")?)?,
        app_name: col(row, "appName")?,
        categories: col::<Option<Vec<String>>>(row, "categories")?.unwrap_or_default(),
        extraction_status: extraction_status
            .as_deref()
            .and_then(ExtractionStatus::parse_name),
        extraction_attempts: col::<i64>(row, "extractionAttempts")?.max(0) as u32,
        extraction_error: col(row, "extractionError")?,
        embedding: col::<Option<Vec<f64>>>(row, "embedding")?.map(from_wire_vec),
    })
}

const ENTITY_RETURN: &str = "RETURN e.id AS id, e.name AS name, e.type AS type, \
     coalesce(e.description, '') AS description, coalesce(e.rank, 0) AS rank, \
     e.summary AS summary, e.summaryUpdatedAt AS summaryUpdatedAt, \
     e.createdAt AS createdAt, e.updatedAt AS updatedAt";

fn decode_entity(row: &Row, user_id: &str) -> GraphResult<Entity> {
    Ok(Entity {
        id: col(row, "id")?,
        user_id: user_id.to_string(),
        name: col(row, "name")?,
        entity_type: col(row, "type")?,
        description: col(row, "description")?,
        rank: col(row, "rank")?,
        summary: col(row, "summary")?,
        summary_updated_at: opt_from_millis(col(row, "summaryUpdatedAt")?)?,
        created_at: from_millis(col(row, "createdAt")?)?,
        updated_at: from_millis(col(row, "updatedAt")?)?,
        description_embedding: None,
    })
}

const RELATION_RETURN: &str = "RETURN src.id AS sourceId, dst.id AS targetId, r.type AS type, \
     coalesce(r.description, '') AS description, r.validAt AS validAt, \
     r.invalidAt AS invalidAt, coalesce(r.confirmedCount, 1) AS confirmedCount";

fn decode_relation(row: &Row) -> GraphResult<EntityRelation> {
    Ok(EntityRelation {
        source_id: col(row, "sourceId")?,
        target_id: col(row, "targetId")?,
        rel_type: col(row, "type")?,
        description: col(row, "description")?,
        valid_at: from_millis(col(row, "validAt")?)?,
        invalid_at: opt_from_millis(col(row, "invalidAt")?)?,
        confirmed_count: col(row, "confirmedCount")?,
    })
}

/// Predicate fragment for "live": not superseded and not deleted.
const LIVE: &str = "m.invalidAt IS NULL AND m.state <> 'deleted'";

// ============================================================================
// GRAPH STORE IMPL
// ============================================================================

#[async_trait]
impl GraphStore for MemgraphStore {
    async fn init_schema(&self) -> GraphResult<()> {
        self.run_ddl("CREATE CONSTRAINT ON (u:User) ASSERT u.userId IS UNIQUE")
            .await?;
        for statement in [
            "CREATE INDEX ON :Memory(id)",
            "CREATE INDEX ON :Memory(validAt)",
            "CREATE INDEX ON :Memory(invalidAt)",
            "CREATE INDEX ON :Entity(id)",
            "CREATE INDEX ON :Entity(name)",
            "CREATE INDEX ON :Entity(type)",
            "CREATE INDEX ON :Community(id)",
        ] {
            self.run_ddl(statement).await?;
        }
        let vector_index = format!(
            "CREATE VECTOR INDEX memory_vectors ON :Memory(embedding) \
             WITH CONFIG {{\"dimension\": {}, \"capacity\": 100000, \"metric\": \"cos\"}}",
            self.dims
        );
        self.run_ddl(&vector_index).await?;
        self.run_ddl("CREATE TEXT INDEX memory_text ON :Memory").await?;
        Ok(())
    }

    async fn ping(&self) -> GraphResult<()> {
        self.run_read(query("RETURN 1 AS ok")).await.map(|_| ())
    }

    async fn ensure_user(&self, user_id: &str) -> GraphResult<()> {
        self.graph
            .run(query("MERGE (u:User {userId: $userId})").param("userId", user_id))
            .await
            .map_err(map_neo)
    }

    async fn create_memory(&self, memory: &Memory) -> GraphResult<()> {
        let q = query(
            "MERGE (u:User {userId: $userId}) \
             CREATE (m:Memory {id: $id, content: $content, state: $state, \
               metadata: $metadata, embedding: $embedding, validAt: $validAt, \
               createdAt: $createdAt, updatedAt: $updatedAt, extractionAttempts: 0}) \
             MERGE (u)-[:HAS_MEMORY]->(m)",
        )
        .param("userId", memory.user_id.as_str())
        .param("id", memory.id.as_str())
        .param("content", memory.content.as_str())
        .param("state", memory.state.as_str())
        .param(
            "metadata",
            memory
                .metadata
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "null".into()),
        )
        .param("embedding", to_wire_vec(memory.embedding.as_deref().unwrap_or_default()))
        .param("validAt", millis(memory.valid_at))
        .param("createdAt", millis(memory.created_at))
        .param("updatedAt", millis(memory.updated_at));
        self.graph.run(q).await.map_err(map_neo)?;

        if let Some(app) = memory.app_name.as_deref() {
            self.attach_app(&memory.user_id, &memory.id, app).await?;
        }
        Ok(())
    }

    async fn create_memories(&self, memories: &[Memory]) -> GraphResult<()> {
        if memories.is_empty() {
            return Ok(());
        }
        let user_id = memories[0].user_id.as_str();
        // Parallel columns instead of a list of maps keeps the parameter
        // encoding primitive-only.
        let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
        let contents: Vec<String> = memories.iter().map(|m| m.content.clone()).collect();
        let metadatas: Vec<String> = memories
            .iter()
            .map(|m| m.metadata.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "null".into()))
            .collect();
        let embeddings: Vec<Vec<f64>> = memories
            .iter()
            .map(|m| to_wire_vec(m.embedding.as_deref().unwrap_or_default()))
            .collect();
        let valid_ats: Vec<i64> = memories.iter().map(|m| millis(m.valid_at)).collect();
        let created_ats: Vec<i64> = memories.iter().map(|m| millis(m.created_at)).collect();

        let q = query(
            "MATCH (u:User {userId: $userId}) \
             UNWIND range(0, size($ids) - 1) AS i \
             CREATE (m:Memory {id: $ids[i], content: $contents[i], state: 'active', \
               metadata: $metadatas[i], embedding: $embeddings[i], validAt: $validAts[i], \
               createdAt: $createdAts[i], updatedAt: $createdAts[i], extractionAttempts: 0}) \
             MERGE (u)-[:HAS_MEMORY]->(m)",
        )
        .param("userId", user_id)
        .param("ids", ids)
        .param("contents", contents)
        .param("metadatas", metadatas)
        .param("embeddings", embeddings)
        .param("validAts", valid_ats)
        .param("createdAts", created_ats);
        self.graph.run(q).await.map_err(map_neo)?;

        for memory in memories {
            if let Some(app) = memory.app_name.as_deref() {
                self.attach_app(&memory.user_id, &memory.id, app).await?;
            }
        }
        Ok(())
    }

    async fn update_memory_content(
        &self,
        user_id: &str,
        memory_id: &str,
        content: &str,
        embedding: &[f32],
        now: DateTime<Utc>,
    ) -> GraphResult<bool> {
        let rows = self
            .run_write(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m:Memory {id: $id}) \
                     SET m.content = $content, m.embedding = $embedding, m.updatedAt = $now \
                     RETURN count(m) AS count",
                )
                .param("userId", user_id)
                .param("id", memory_id)
                .param("content", content)
                .param("embedding", to_wire_vec(embedding))
                .param("now", millis(now)),
            )
            .await?;
        Ok(rows.first().map(|r| col::<i64>(r, "count")).transpose()?.unwrap_or(0) > 0)
    }

    async fn supersede_memory(
        &self,
        user_id: &str,
        old_id: &str,
        successor: &Memory,
        at: DateTime<Utc>,
    ) -> GraphResult<bool> {
        // Guarded invalidation first; each step is independently retryable.
        let invalidated = self
            .run_write(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(old:Memory {id: $oldId}) \
                     WHERE old.invalidAt IS NULL \
                     SET old.invalidAt = $at, old.updatedAt = $at \
                     RETURN count(old) AS count",
                )
                .param("userId", user_id)
                .param("oldId", old_id)
                .param("at", millis(at)),
            )
            .await?;
        let hit = invalidated
            .first()
            .map(|r| col::<i64>(r, "count"))
            .transpose()?
            .unwrap_or(0)
            > 0;
        if !hit {
            return Ok(false);
        }

        self.create_memory(successor).await?;
        self.graph
            .run(
                query(
                    "MATCH (new:Memory {id: $newId}), (old:Memory {id: $oldId}) \
                     MERGE (new)-[:SUPERSEDES {at: $at}]->(old)",
                )
                .param("newId", successor.id.as_str())
                .param("oldId", old_id)
                .param("at", millis(at)),
            )
            .await
            .map_err(map_neo)?;
        Ok(true)
    }

    async fn soft_delete_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        at: DateTime<Utc>,
    ) -> GraphResult<bool> {
        let rows = self
            .run_write(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m:Memory {id: $id}) \
                     SET m.state = 'deleted', m.deletedAt = $at, m.updatedAt = $at, \
                         m.invalidAt = coalesce(m.invalidAt, $at) \
                     RETURN count(m) AS count",
                )
                .param("userId", user_id)
                .param("id", memory_id)
                .param("at", millis(at)),
            )
            .await?;
        Ok(rows.first().map(|r| col::<i64>(r, "count")).transpose()?.unwrap_or(0) > 0)
    }

    async fn transition_states(
        &self,
        user_id: &str,
        memory_ids: &[String],
        from: MemoryState,
        to: MemoryState,
        at: DateTime<Utc>,
    ) -> GraphResult<usize> {
        let archived_clause = if to == MemoryState::Archived {
            ", m.archivedAt = $at"
        } else {
            ""
        };
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_MEMORY]->(m:Memory) \
             WHERE m.id IN $ids AND m.state = $from \
             SET m.state = $to, m.updatedAt = $at{archived_clause} \
             RETURN count(m) AS count"
        );
        self.single_count(
            query(&cypher)
                .param("userId", user_id)
                .param("ids", memory_ids.to_vec())
                .param("from", from.as_str())
                .param("to", to.as_str())
                .param("at", millis(at)),
        )
        .await
    }

    async fn delete_all_memories(
        &self,
        user_id: &str,
        app_name: Option<&str>,
    ) -> GraphResult<usize> {
        let cypher = match app_name {
            Some(_) => {
                "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m:Memory)\
                 -[:CREATED_BY]->(a:App {name: $appName, userId: $userId}) \
                 DETACH DELETE m \
                 RETURN count(*) AS count"
            }
            None => {
                "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m:Memory) \
                 DETACH DELETE m \
                 RETURN count(*) AS count"
            }
        };
        let mut q = query(cypher).param("userId", user_id);
        if let Some(app) = app_name {
            q = q.param("appName", app);
        }
        self.single_count(q).await
    }

    async fn get_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        with_embedding: bool,
    ) -> GraphResult<Option<Memory>> {
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_MEMORY]->(m:Memory {{id: $id}}) {}",
            memory_return(with_embedding)
        );
        let rows = self
            .run_read(query(&cypher).param("userId", user_id).param("id", memory_id))
            .await?;
        rows.first().map(|row| decode_memory(row, user_id)).transpose()
    }

    async fn memories_by_ids(
        &self,
        user_id: &str,
        memory_ids: &[String],
        with_embeddings: bool,
    ) -> GraphResult<Vec<Memory>> {
        if memory_ids.is_empty() {
            return Ok(vec![]);
        }
        let cypher = format!(
            "UNWIND $ids AS wanted \
             MATCH (u:User {{userId: $userId}})-[:HAS_MEMORY]->(m:Memory {{id: wanted}}) {}",
            memory_return(with_embeddings)
        );
        let rows = self
            .run_read(
                query(&cypher)
                    .param("userId", user_id)
                    .param("ids", memory_ids.to_vec()),
            )
            .await?;
        rows.iter().map(|row| decode_memory(row, user_id)).collect()
    }

    async fn list_memories(
        &self,
        user_id: &str,
        filter: &MemoryFilter,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<Memory>> {
        let mut clauses: Vec<String> = Vec::new();
        match filter.temporal {
            TemporalMode::Live => clauses.push("m.invalidAt IS NULL".into()),
            TemporalMode::IncludeSuperseded => {}
            TemporalMode::AsOf(_) => clauses.push(
                "m.validAt <= $asOf AND (m.invalidAt IS NULL OR m.invalidAt > $asOf)".into(),
            ),
        }
        match filter.state {
            Some(_) => clauses.push("m.state = $state".into()),
            None => {
                clauses.push("m.state <> 'deleted'".into());
                if !filter.show_archived {
                    clauses.push("m.state <> 'archived'".into());
                }
            }
        }
        if filter.app_name.is_some() {
            clauses.push(
                "exists((m)-[:CREATED_BY]->(:App {name: $appName, userId: $userId}))".into(),
            );
        }
        if filter.category.is_some() {
            clauses.push("exists((m)-[:HAS_CATEGORY]->(:Category {name: $category}))".into());
        }
        if filter.search.is_some() {
            clauses.push("toLower(m.content) CONTAINS toLower($search)".into());
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let apply_params = |mut q: Query| {
            q = q.param("userId", user_id);
            if let TemporalMode::AsOf(ts) = filter.temporal {
                q = q.param("asOf", millis(ts));
            }
            if let Some(state) = filter.state {
                q = q.param("state", state.as_str());
            }
            if let Some(app) = filter.app_name.as_deref() {
                q = q.param("appName", app);
            }
            if let Some(category) = filter.category.as_deref() {
                q = q.param("category", category);
            }
            if let Some(search) = filter.search.as_deref() {
                q = q.param("search", search);
            }
            q
        };

        let count_cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_MEMORY]->(m:Memory) {where_clause} \
             RETURN count(m) AS count"
        );
        let total = self.single_count(apply_params(query(&count_cypher))).await?;

        let page = page.max(1);
        let list_cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_MEMORY]->(m:Memory) {where_clause} \
             WITH m ORDER BY m.createdAt DESC, m.id ASC SKIP $skip LIMIT $limit {}",
            memory_return(false)
        );
        let rows = self
            .run_read(
                apply_params(query(&list_cypher))
                    .param("skip", ((page - 1) * size) as i64)
                    .param("limit", size as i64),
            )
            .await?;
        let items = rows
            .iter()
            .map(|row| decode_memory(row, user_id))
            .collect::<GraphResult<Vec<_>>>()?;
        Ok(Page { items, total, page, size })
    }

    async fn recent_live_memories(
        &self,
        user_id: &str,
        limit: usize,
    ) -> GraphResult<Vec<Memory>> {
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_MEMORY]->(m:Memory) \
             WHERE {LIVE} \
             WITH m ORDER BY m.createdAt DESC LIMIT $limit {}",
            memory_return(false)
        );
        let rows = self
            .run_read(
                query(&cypher)
                    .param("userId", user_id)
                    .param("limit", limit as i64),
            )
            .await?;
        rows.iter().map(|row| decode_memory(row, user_id)).collect()
    }

    async fn export_memories(&self, user_id: &str) -> GraphResult<Vec<Memory>> {
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_MEMORY]->(m:Memory) \
             WITH m ORDER BY m.createdAt ASC {}",
            memory_return(true)
        );
        let rows = self.run_read(query(&cypher).param("userId", user_id)).await?;
        rows.iter().map(|row| decode_memory(row, user_id)).collect()
    }

    async fn record_access(
        &self,
        user_id: &str,
        memory_id: &str,
        app_name: &str,
        query_used: Option<&str>,
        at: DateTime<Utc>,
    ) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m:Memory {id: $id}) \
                     MERGE (a:App {name: $appName, userId: $userId}) \
                     MERGE (u)-[:HAS_APP]->(a) \
                     CREATE (a)-[:ACCESSED {accessedAt: $at, queryUsed: $queryUsed}]->(m)",
                )
                .param("userId", user_id)
                .param("id", memory_id)
                .param("appName", app_name)
                .param("at", millis(at))
                .param("queryUsed", query_used.unwrap_or("")),
            )
            .await
            .map_err(map_neo)
    }

    async fn access_log(
        &self,
        user_id: &str,
        memory_id: &str,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<AccessLogEntry>> {
        let total = self
            .single_count(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m:Memory {id: $id}) \
                     MATCH (a:App)-[acc:ACCESSED]->(m) \
                     RETURN count(acc) AS count",
                )
                .param("userId", user_id)
                .param("id", memory_id),
            )
            .await?;
        let page = page.max(1);
        let rows = self
            .run_read(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m:Memory {id: $id}) \
                     MATCH (a:App)-[acc:ACCESSED]->(m) \
                     RETURN a.name AS appName, acc.accessedAt AS accessedAt, \
                            acc.queryUsed AS queryUsed \
                     ORDER BY acc.accessedAt DESC SKIP $skip LIMIT $limit",
                )
                .param("userId", user_id)
                .param("id", memory_id)
                .param("skip", ((page - 1) * size) as i64)
                .param("limit", size as i64),
            )
            .await?;
        let items = rows
            .iter()
            .map(|row| {
                let query_used: Option<String> = col(row, "queryUsed")?;
                Ok(AccessLogEntry {
                    app_name: col(row, "appName")?,
                    accessed_at: from_millis(col(row, "accessedAt")?)?,
                    query_used: query_used.filter(|q| !q.is_empty()),
                })
            })
            .collect::<GraphResult<Vec<_>>>()?;
        Ok(Page { items, total, page, size })
    }

    async fn text_search(
        &self,
        user_id: &str,
        search: &str,
        limit: usize,
    ) -> GraphResult<Vec<String>> {
        let rows = self
            .run_read(
                query(
                    "CALL text_search.search('memory_text', $query) YIELD node AS m \
                     MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m) \
                     WHERE m.invalidAt IS NULL AND m.state <> 'deleted' \
                     RETURN m.id AS id LIMIT $limit",
                )
                .param("query", text_index_query(search))
                .param("userId", user_id)
                .param("limit", limit as i64),
            )
            .await?;
        rows.iter().map(|row| col(row, "id")).collect()
    }

    async fn vector_search(
        &self,
        user_id: &str,
        vector: &[f32],
        fetch: usize,
    ) -> GraphResult<Vec<(String, f64)>> {
        // The index search is global; ownership and liveness are applied
        // after retrieval, which is why callers over-sample `fetch`.
        let rows = self
            .run_read(
                query(
                    "CALL vector_search.search('memory_vectors', $fetch, $vector) \
                     YIELD node AS m, similarity \
                     MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m) \
                     WHERE m.invalidAt IS NULL AND m.state <> 'deleted' \
                     RETURN m.id AS id, similarity ORDER BY similarity DESC",
                )
                .param("fetch", fetch as i64)
                .param("vector", to_wire_vec(vector))
                .param("userId", user_id),
            )
            .await?;
        rows.iter()
            .map(|row| Ok((col(row, "id")?, col(row, "similarity")?)))
            .collect()
    }

    async fn claim_extraction(&self, memory_id: &str) -> GraphResult<Option<(String, u32)>> {
        let rows = self
            .run_write(
                query(
                    "MATCH (m:Memory {id: $id}) \
                     SET m.extractionStatus = 'pending', \
                         m.extractionAttempts = coalesce(m.extractionAttempts, 0) + 1 \
                     RETURN m.content AS content, m.extractionAttempts AS attempts",
                )
                .param("id", memory_id),
            )
            .await?;
        rows.first()
            .map(|row| {
                Ok((
                    col::<String>(row, "content")?,
                    col::<i64>(row, "attempts")?.max(0) as u32,
                ))
            })
            .transpose()
    }

    async fn finish_extraction(
        &self,
        memory_id: &str,
        status: ExtractionStatus,
        error: Option<&str>,
    ) -> GraphResult<()> {
        let cypher = match error {
            Some(_) => {
                "MATCH (m:Memory {id: $id}) \
                 SET m.extractionStatus = $status, m.extractionError = $error"
            }
            None => {
                "MATCH (m:Memory {id: $id}) \
                 SET m.extractionStatus = $status REMOVE m.extractionError"
            }
        };
        let mut q = query(cypher)
            .param("id", memory_id)
            .param("status", status.as_str());
        if let Some(detail) = error {
            q = q.param("error", detail);
        }
        self.graph.run(q).await.map_err(map_neo)
    }

    async fn sweep_stuck_extractions(&self, max_attempts: u32) -> GraphResult<usize> {
        self.single_count(
            query(
                "MATCH (m:Memory) \
                 WHERE m.extractionStatus = 'pending' \
                   AND coalesce(m.extractionAttempts, 0) >= $max \
                 SET m.extractionStatus = 'failed', \
                     m.extractionError = 'extraction attempts exhausted' \
                 RETURN count(m) AS count",
            )
            .param("max", i64::from(max_attempts)),
        )
        .await
    }

    async fn find_entity_by_name(
        &self,
        user_id: &str,
        name_lower: &str,
    ) -> GraphResult<Option<Entity>> {
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_ENTITY]->(e:Entity) \
             WHERE toLower(e.name) = $name {ENTITY_RETURN} LIMIT 1"
        );
        let rows = self
            .run_read(query(&cypher).param("userId", user_id).param("name", name_lower))
            .await?;
        rows.first().map(|row| decode_entity(row, user_id)).transpose()
    }

    async fn persons_overlapping_name(
        &self,
        user_id: &str,
        name_lower: &str,
    ) -> GraphResult<Vec<Entity>> {
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_ENTITY]->(e:Entity {{type: 'PERSON'}}) \
             WHERE toLower(e.name) STARTS WITH $name OR $name STARTS WITH toLower(e.name) \
             {ENTITY_RETURN}"
        );
        let rows = self
            .run_read(query(&cypher).param("userId", user_id).param("name", name_lower))
            .await?;
        rows.iter().map(|row| decode_entity(row, user_id)).collect()
    }

    async fn create_entity(&self, entity: &Entity) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MERGE (u:User {userId: $userId}) \
                     CREATE (e:Entity {id: $id, name: $name, type: $type, \
                       description: $description, rank: 0, createdAt: $createdAt, \
                       updatedAt: $updatedAt}) \
                     MERGE (u)-[:HAS_ENTITY]->(e)",
                )
                .param("userId", entity.user_id.as_str())
                .param("id", entity.id.as_str())
                .param("name", entity.name.as_str())
                .param("type", entity.entity_type.as_str())
                .param("description", entity.description.as_str())
                .param("createdAt", millis(entity.created_at))
                .param("updatedAt", millis(entity.updated_at)),
            )
            .await
            .map_err(map_neo)
    }

    async fn merge_entity_fields(
        &self,
        entity_id: &str,
        name: &str,
        entity_type: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MATCH (e:Entity {id: $id}) \
                     SET e.name = $name, e.type = $type, e.description = $description, \
                         e.updatedAt = $now",
                )
                .param("id", entity_id)
                .param("name", name)
                .param("type", entity_type)
                .param("description", description)
                .param("now", millis(now)),
            )
            .await
            .map_err(map_neo)
    }

    async fn set_entity_description_embedding(
        &self,
        entity_id: &str,
        embedding: &[f32],
    ) -> GraphResult<()> {
        self.graph
            .run(
                query("MATCH (e:Entity {id: $id}) SET e.descriptionEmbedding = $embedding")
                    .param("id", entity_id)
                    .param("embedding", to_wire_vec(embedding)),
            )
            .await
            .map_err(map_neo)
    }

    async fn assign_categories(
        &self,
        memory_id: &str,
        categories: &[String],
    ) -> GraphResult<()> {
        if categories.is_empty() {
            return Ok(());
        }
        self.graph
            .run(
                query(
                    "MATCH (m:Memory {id: $id}) \
                     UNWIND $categories AS name \
                     MERGE (c:Category {name: name}) \
                     MERGE (m)-[:HAS_CATEGORY]->(c)",
                )
                .param("id", memory_id)
                .param("categories", categories.to_vec()),
            )
            .await
            .map_err(map_neo)
    }

    async fn upsert_mention(
        &self,
        memory_id: &str,
        entity_id: &str,
        role: Option<&str>,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MATCH (m:Memory {id: $memoryId}), (e:Entity {id: $entityId}) \
                     MERGE (m)-[r:MENTIONS]->(e) \
                     ON CREATE SET r.createdAt = $at \
                     SET r.role = $role, r.confidence = $confidence",
                )
                .param("memoryId", memory_id)
                .param("entityId", entity_id)
                .param("role", role.unwrap_or(""))
                .param("confidence", confidence)
                .param("at", millis(at)),
            )
            .await
            .map_err(map_neo)
    }

    async fn refresh_entity_rank(&self, entity_id: &str) -> GraphResult<i64> {
        let rows = self
            .run_write(
                query(
                    "MATCH (e:Entity {id: $id}) \
                     OPTIONAL MATCH (m:Memory)-[men:MENTIONS]->(e) \
                       WHERE m.invalidAt IS NULL AND m.state <> 'deleted' \
                     WITH e, count(men) AS mentions \
                     OPTIONAL MATCH (e)-[r:RELATED_TO]-(:Entity) \
                       WHERE r.invalidAt IS NULL \
                     WITH e, mentions, count(r) AS relations \
                     SET e.rank = mentions + relations \
                     RETURN e.rank AS rank",
                )
                .param("id", entity_id),
            )
            .await?;
        rows.first().map(|row| col(row, "rank")).transpose().map(|r| r.unwrap_or(0))
    }

    async fn live_mention_count(&self, entity_id: &str) -> GraphResult<usize> {
        self.single_count(
            query(
                "MATCH (m:Memory)-[men:MENTIONS]->(e:Entity {id: $id}) \
                 WHERE m.invalidAt IS NULL AND m.state <> 'deleted' \
                 RETURN count(men) AS count",
            )
            .param("id", entity_id),
        )
        .await
    }

    async fn get_entity(
        &self,
        user_id: &str,
        entity_id: &str,
    ) -> GraphResult<Option<(Entity, usize)>> {
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_ENTITY]->(e:Entity {{id: $id}}) \
             {ENTITY_RETURN} LIMIT 1"
        );
        let rows = self
            .run_read(query(&cypher).param("userId", user_id).param("id", entity_id))
            .await?;
        match rows.first() {
            Some(row) => {
                let entity = decode_entity(row, user_id)?;
                let mentions = self.live_mention_count(entity_id).await?;
                Ok(Some((entity, mentions)))
            }
            None => Ok(None),
        }
    }

    async fn list_entities(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<Entity>> {
        let total = self
            .single_count(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_ENTITY]->(e:Entity) \
                     RETURN count(e) AS count",
                )
                .param("userId", user_id),
            )
            .await?;
        let page = page.max(1);
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_ENTITY]->(e:Entity) \
             WITH e ORDER BY e.rank DESC, e.name ASC SKIP $skip LIMIT $limit {ENTITY_RETURN}"
        );
        let rows = self
            .run_read(
                query(&cypher)
                    .param("userId", user_id)
                    .param("skip", ((page - 1) * size) as i64)
                    .param("limit", size as i64),
            )
            .await?;
        let items = rows
            .iter()
            .map(|row| decode_entity(row, user_id))
            .collect::<GraphResult<Vec<_>>>()?;
        Ok(Page { items, total, page, size })
    }

    async fn entity_memories(
        &self,
        user_id: &str,
        entity_id: &str,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<Memory>> {
        let total = self
            .single_count(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_ENTITY]->(e:Entity {id: $id}) \
                     MATCH (m:Memory)-[:MENTIONS]->(e) \
                     WHERE m.invalidAt IS NULL AND m.state <> 'deleted' \
                     RETURN count(m) AS count",
                )
                .param("userId", user_id)
                .param("id", entity_id),
            )
            .await?;
        let page = page.max(1);
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_ENTITY]->(e:Entity {{id: $id}}) \
             MATCH (m:Memory)-[:MENTIONS]->(e) \
             WHERE {LIVE} \
             WITH m ORDER BY m.createdAt DESC SKIP $skip LIMIT $limit {}",
            memory_return(false)
        );
        let rows = self
            .run_read(
                query(&cypher)
                    .param("userId", user_id)
                    .param("id", entity_id)
                    .param("skip", ((page - 1) * size) as i64)
                    .param("limit", size as i64),
            )
            .await?;
        let items = rows
            .iter()
            .map(|row| decode_memory(row, user_id))
            .collect::<GraphResult<Vec<_>>>()?;
        Ok(Page { items, total, page, size })
    }

    async fn entity_summary_inputs(
        &self,
        entity_id: &str,
        memory_cap: usize,
        relation_cap: usize,
    ) -> GraphResult<(Vec<String>, Vec<EntityRelation>)> {
        let memory_rows = self
            .run_read(
                query(
                    "MATCH (m:Memory)-[:MENTIONS]->(e:Entity {id: $id}) \
                     WHERE m.invalidAt IS NULL AND m.state <> 'deleted' \
                     RETURN m.content AS content ORDER BY m.createdAt DESC LIMIT $limit",
                )
                .param("id", entity_id)
                .param("limit", memory_cap as i64),
            )
            .await?;
        let contents = memory_rows
            .iter()
            .map(|row| col(row, "content"))
            .collect::<GraphResult<Vec<String>>>()?;

        let relation_rows = self
            .run_read(
                query(&format!(
                    "MATCH (src:Entity {{id: $id}})-[r:RELATED_TO]->(dst:Entity) \
                     WHERE r.invalidAt IS NULL \
                     WITH src, r, dst ORDER BY r.validAt DESC LIMIT $limit {RELATION_RETURN}"
                ))
                .param("id", entity_id)
                .param("limit", relation_cap as i64),
            )
            .await?;
        let relations = relation_rows
            .iter()
            .map(decode_relation)
            .collect::<GraphResult<Vec<_>>>()?;
        Ok((contents, relations))
    }

    async fn set_entity_summary(
        &self,
        entity_id: &str,
        summary: &str,
        at: DateTime<Utc>,
    ) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MATCH (e:Entity {id: $id}) \
                     SET e.summary = $summary, e.summaryUpdatedAt = $at",
                )
                .param("id", entity_id)
                .param("summary", summary)
                .param("at", millis(at)),
            )
            .await
            .map_err(map_neo)
    }

    async fn live_relation(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
    ) -> GraphResult<Option<EntityRelation>> {
        let cypher = format!(
            "MATCH (src:Entity {{id: $sourceId}})-[r:RELATED_TO {{type: $type}}]->\
             (dst:Entity {{id: $targetId}}) \
             WHERE r.invalidAt IS NULL {RELATION_RETURN} LIMIT 1"
        );
        let rows = self
            .run_read(
                query(&cypher)
                    .param("sourceId", source_id)
                    .param("targetId", target_id)
                    .param("type", rel_type),
            )
            .await?;
        rows.first().map(decode_relation).transpose()
    }

    async fn create_relation(&self, relation: &EntityRelation) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MATCH (src:Entity {id: $sourceId}), (dst:Entity {id: $targetId}) \
                     CREATE (src)-[:RELATED_TO {type: $type, description: $description, \
                       validAt: $validAt, confirmedCount: $confirmedCount}]->(dst)",
                )
                .param("sourceId", relation.source_id.as_str())
                .param("targetId", relation.target_id.as_str())
                .param("type", relation.rel_type.as_str())
                .param("description", relation.description.as_str())
                .param("validAt", millis(relation.valid_at))
                .param("confirmedCount", relation.confirmed_count),
            )
            .await
            .map_err(map_neo)
    }

    async fn confirm_relation(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
        _now: DateTime<Utc>,
    ) -> GraphResult<i64> {
        let rows = self
            .run_write(
                query(
                    "MATCH (src:Entity {id: $sourceId})-[r:RELATED_TO {type: $type}]->\
                     (dst:Entity {id: $targetId}) \
                     WHERE r.invalidAt IS NULL \
                     SET r.confirmedCount = coalesce(r.confirmedCount, 1) + 1 \
                     RETURN r.confirmedCount AS count",
                )
                .param("sourceId", source_id)
                .param("targetId", target_id)
                .param("type", rel_type),
            )
            .await?;
        rows.first().map(|row| col(row, "count")).transpose().map(|c| c.unwrap_or(0))
    }

    async fn invalidate_relation(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
        at: DateTime<Utc>,
    ) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MATCH (src:Entity {id: $sourceId})-[r:RELATED_TO {type: $type}]->\
                     (dst:Entity {id: $targetId}) \
                     WHERE r.invalidAt IS NULL \
                     SET r.invalidAt = $at",
                )
                .param("sourceId", source_id)
                .param("targetId", target_id)
                .param("type", rel_type)
                .param("at", millis(at)),
            )
            .await
            .map_err(map_neo)
    }

    async fn entity_seeds_for_terms(
        &self,
        user_id: &str,
        terms: &[String],
        limit: usize,
    ) -> GraphResult<Vec<(String, i64)>> {
        if terms.is_empty() {
            return Ok(vec![]);
        }
        let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let rows = self
            .run_read(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_ENTITY]->(e:Entity) \
                     OPTIONAL MATCH (e)-[r:RELATED_TO]-(:Entity) \
                       WHERE r.invalidAt IS NULL \
                     WITH e, collect(toLower(coalesce(r.description, ''))) AS relDescs \
                     WHERE any(t IN $terms WHERE toLower(e.name) CONTAINS t \
                       OR toLower(coalesce(e.description, '')) CONTAINS t \
                       OR toLower(coalesce(e.summary, '')) CONTAINS t \
                       OR any(d IN relDescs WHERE d CONTAINS t)) \
                     RETURN e.id AS id, coalesce(e.rank, 0) AS rank \
                     ORDER BY rank DESC, id ASC LIMIT $limit",
                )
                .param("userId", user_id)
                .param("terms", terms)
                .param("limit", limit as i64),
            )
            .await?;
        rows.iter()
            .map(|row| Ok((col(row, "id")?, col(row, "rank")?)))
            .collect()
    }

    async fn neighbor_entities(
        &self,
        user_id: &str,
        entity_ids: &[String],
        limit: usize,
    ) -> GraphResult<Vec<(String, i64)>> {
        if entity_ids.is_empty() {
            return Ok(vec![]);
        }
        let rows = self
            .run_read(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_ENTITY]->(seed:Entity) \
                     WHERE seed.id IN $ids \
                     MATCH (seed)-[r:RELATED_TO]-(n:Entity)<-[:HAS_ENTITY]-(u) \
                     WHERE r.invalidAt IS NULL AND NOT n.id IN $ids \
                     RETURN DISTINCT n.id AS id, coalesce(n.rank, 0) AS rank \
                     ORDER BY rank DESC, id ASC LIMIT $limit",
                )
                .param("userId", user_id)
                .param("ids", entity_ids.to_vec())
                .param("limit", limit as i64),
            )
            .await?;
        rows.iter()
            .map(|row| Ok((col(row, "id")?, col(row, "rank")?)))
            .collect()
    }

    async fn memories_mentioning(
        &self,
        user_id: &str,
        entity_ids: &[String],
        limit: usize,
    ) -> GraphResult<Vec<String>> {
        if entity_ids.is_empty() {
            return Ok(vec![]);
        }
        let rows = self
            .run_read(
                query(
                    "UNWIND $ids AS entityId \
                     MATCH (e:Entity {id: entityId})<-[:MENTIONS]-(m:Memory)\
                     <-[:HAS_MEMORY]-(u:User {userId: $userId}) \
                     WHERE m.invalidAt IS NULL AND m.state <> 'deleted' \
                     RETURN DISTINCT m.id AS id LIMIT $limit",
                )
                .param("ids", entity_ids.to_vec())
                .param("userId", user_id)
                .param("limit", limit as i64),
            )
            .await?;
        rows.iter().map(|row| col(row, "id")).collect()
    }

    async fn detect_communities(&self, user_id: &str) -> GraphResult<Vec<(String, i64)>> {
        let result = self
            .run_read(
                query(
                    "MATCH p = (a:Entity)-[r:RELATED_TO]-(b:Entity) \
                     WHERE r.invalidAt IS NULL \
                       AND exists((:User {userId: $userId})-[:HAS_ENTITY]->(a)) \
                       AND exists((:User {userId: $userId})-[:HAS_ENTITY]->(b)) \
                     WITH project(p) AS subgraph \
                     CALL community_detection.get(subgraph) YIELD node, community_id \
                     RETURN node.id AS id, community_id AS communityId",
                )
                .param("userId", user_id),
            )
            .await;
        match result {
            Ok(rows) => rows
                .iter()
                .map(|row| Ok((col(row, "id")?, col(row, "communityId")?)))
                .collect(),
            Err(GraphError::Query(msg))
                if msg.to_lowercase().contains("community_detection")
                    || msg.to_lowercase().contains("procedure") =>
            {
                warn!(error = %msg, "community detection procedure missing");
                Err(GraphError::CapabilityUnavailable(
                    "community_detection procedure is not installed".into(),
                ))
            }
            Err(other) => Err(other),
        }
    }

    async fn clear_communities(&self, user_id: &str) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_COMMUNITY]->(c:Community) \
                     DETACH DELETE c",
                )
                .param("userId", user_id),
            )
            .await
            .map_err(map_neo)
    }

    async fn create_community(
        &self,
        user_id: &str,
        community: &Community,
        member_entity_ids: &[String],
    ) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MATCH (u:User {userId: $userId}) \
                     CREATE (c:Community {id: $id, name: $name, summary: $summary, \
                       memberCount: $memberCount, createdAt: $createdAt}) \
                     MERGE (u)-[:HAS_COMMUNITY]->(c)",
                )
                .param("userId", user_id)
                .param("id", community.id.as_str())
                .param("name", community.name.as_str())
                .param("summary", community.summary.as_str())
                .param("memberCount", community.member_count as i64)
                .param("createdAt", millis(community.created_at)),
            )
            .await
            .map_err(map_neo)?;
        self.graph
            .run(
                query(
                    "MATCH (c:Community {id: $id}) \
                     UNWIND $members AS entityId \
                     MATCH (e:Entity {id: entityId})<-[:MENTIONS]-(m:Memory) \
                     WHERE m.invalidAt IS NULL AND m.state <> 'deleted' \
                     MERGE (m)-[:IN_COMMUNITY]->(c)",
                )
                .param("id", community.id.as_str())
                .param("members", member_entity_ids.to_vec()),
            )
            .await
            .map_err(map_neo)
    }

    async fn list_communities(&self, user_id: &str) -> GraphResult<Vec<Community>> {
        let rows = self
            .run_read(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_COMMUNITY]->(c:Community) \
                     RETURN c.id AS id, c.name AS name, c.summary AS summary, \
                            c.memberCount AS memberCount, c.createdAt AS createdAt \
                     ORDER BY c.memberCount DESC, c.id ASC",
                )
                .param("userId", user_id),
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Community {
                    id: col(row, "id")?,
                    name: col(row, "name")?,
                    summary: col(row, "summary")?,
                    member_count: col::<i64>(row, "memberCount")?.max(0) as usize,
                    created_at: from_millis(col(row, "createdAt")?)?,
                })
            })
            .collect()
    }

    async fn community_memories(
        &self,
        user_id: &str,
        community_id: &str,
        limit: usize,
    ) -> GraphResult<Vec<Memory>> {
        let cypher = format!(
            "MATCH (u:User {{userId: $userId}})-[:HAS_COMMUNITY]->(c:Community {{id: $id}}) \
             MATCH (m:Memory)-[:IN_COMMUNITY]->(c) \
             WHERE {LIVE} \
             WITH m ORDER BY m.createdAt DESC LIMIT $limit {}",
            memory_return(false)
        );
        let rows = self
            .run_read(
                query(&cypher)
                    .param("userId", user_id)
                    .param("id", community_id)
                    .param("limit", limit as i64),
            )
            .await?;
        rows.iter().map(|row| decode_memory(row, user_id)).collect()
    }

    async fn user_stats(&self, user_id: &str) -> GraphResult<UserStats> {
        let total = self
            .single_count(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m:Memory) \
                     WHERE m.state <> 'deleted' RETURN count(m) AS count",
                )
                .param("userId", user_id),
            )
            .await?;
        let rows = self
            .run_read(
                query(
                    "MATCH (u:User {userId: $userId})-[:HAS_MEMORY]->(m:Memory)\
                     -[:CREATED_BY]->(a:App) \
                     WHERE m.state <> 'deleted' \
                     RETURN a.name AS name, count(m) AS count \
                     ORDER BY count DESC, name ASC",
                )
                .param("userId", user_id),
            )
            .await?;
        let apps = rows
            .iter()
            .map(|row| {
                Ok(AppCount {
                    name: col(row, "name")?,
                    memory_count: col::<i64>(row, "count")?.max(0) as usize,
                })
            })
            .collect::<GraphResult<Vec<_>>>()?;
        Ok(UserStats {
            total_memories: total,
            total_apps: apps.len(),
            apps,
        })
    }
}

impl MemgraphStore {
    async fn attach_app(&self, user_id: &str, memory_id: &str, app_name: &str) -> GraphResult<()> {
        self.graph
            .run(
                query(
                    "MATCH (u:User {userId: $userId}) \
                     MATCH (m:Memory {id: $memoryId}) \
                     MERGE (a:App {name: $appName, userId: $userId}) \
                     MERGE (u)-[:HAS_APP]->(a) \
                     MERGE (m)-[:CREATED_BY]->(a)",
                )
                .param("userId", user_id)
                .param("memoryId", memory_id)
                .param("appName", app_name),
            )
            .await
            .map_err(map_neo)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_index_query_strips_special_syntax() {
        assert_eq!(text_index_query("dark mode"), "data.content:(dark mode)");
        assert_eq!(text_index_query("a:b (c)"), "data.content:(a b c)");
    }

    #[test]
    fn wire_vec_roundtrip() {
        let original = vec![0.25f32, -0.5, 1.0];
        assert_eq!(from_wire_vec(to_wire_vec(&original)), original);
    }

    #[test]
    fn millis_roundtrip() {
        let now = Utc::now();
        let back = from_millis(millis(now)).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
