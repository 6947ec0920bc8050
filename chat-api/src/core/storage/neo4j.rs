//! Neo4j content store
//!
//! ## Schema
//!
//! ```cypher
//! // Nodes
//! (:ChatContent {
//!     chat_id: String,
//!     parent_chat_id: String,     // "" for root chats
//!     parent_message_id: String   // "" for root chats
//! })
//!
//! (:QAPair {
//!     response_id: String,
//!     question: String,
//!     response: String?,          // absent until answered
//!     timestamp: String,          // RFC 3339
//!     position: Int,
//!     branches: [String]
//! })
//!
//! // Relationships
//! (:ChatContent)-[:HAS_PAIR]->(:QAPair)
//!
//! // Constraints
//! CREATE CONSTRAINT chat_content_id IF NOT EXISTS FOR (c:ChatContent) REQUIRE c.chat_id IS UNIQUE;
//! CREATE INDEX chat_content_parent IF NOT EXISTS FOR (c:ChatContent) ON (c.parent_chat_id);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{Graph, Node, Query, Row, query};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::retry::with_timeout;
use crate::models::content::{BranchOrigin, ContentDocument, QAPair};

use super::error::{StoreError, StoreResult, backend_error};
use super::traits::ContentStore;

const DOCUMENT_PROJECTION: &str = "OPTIONAL MATCH (c)-[:HAS_PAIR]->(p:QAPair)
    WITH c, p ORDER BY p.position
    WITH c, collect(p) AS pairs
    RETURN c, pairs";

/// Configuration for Neo4j connection
#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub call_timeout: Duration,
}

/// Neo4j-backed implementation of ContentStore
#[derive(Clone)]
pub struct Neo4jContentStore {
    graph: Arc<Graph>,
    call_timeout: Duration,
}

impl Neo4jContentStore {
    /// Connect and make sure constraints exist
    pub async fn connect(config: &Neo4jConfig) -> StoreResult<Self> {
        info!("Connecting to Neo4j at {}", config.uri);

        let graph = Graph::new(&config.uri, &config.user, &config.password).await?;
        let store = Self {
            graph: Arc::new(graph),
            call_timeout: config.call_timeout,
        };
        store.init_schema().await;

        info!("Connected to Neo4j successfully");
        Ok(store)
    }

    async fn init_schema(&self) {
        let statements = [
            "CREATE CONSTRAINT chat_content_id IF NOT EXISTS FOR (c:ChatContent) REQUIRE c.chat_id IS UNIQUE",
            "CREATE INDEX chat_content_parent IF NOT EXISTS FOR (c:ChatContent) ON (c.parent_chat_id)",
        ];

        for statement in statements {
            if let Err(e) = self.graph.run(query(statement)).await {
                debug!("Schema statement result: {:?}", e);
            }
        }

        info!("Neo4j schema initialized for chat content");
    }

    async fn rows(&self, operation_name: &str, q: Query) -> StoreResult<Vec<Row>> {
        with_timeout(self.call_timeout, operation_name, self.collect_rows(q)).await
    }

    async fn collect_rows(&self, q: Query) -> StoreResult<Vec<Row>> {
        let mut result = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn documents(&self, operation_name: &str, q: Query) -> StoreResult<Vec<ContentDocument>> {
        self.rows(operation_name, q)
            .await?
            .iter()
            .map(document_from_row)
            .collect()
    }

    /// Run a statement that returns one row when its target matched
    async fn matched(&self, operation_name: &str, q: Query) -> StoreResult<bool> {
        Ok(!self.rows(operation_name, q).await?.is_empty())
    }
}

#[async_trait]
impl ContentStore for Neo4jContentStore {
    async fn create_document(
        &self,
        chat_id: Uuid,
        origin: Option<BranchOrigin>,
    ) -> StoreResult<ContentDocument> {
        let q = query(
            "OPTIONAL MATCH (existing:ChatContent {chat_id: $chat_id})
            WITH existing WHERE existing IS NULL
            CREATE (c:ChatContent {
                chat_id: $chat_id,
                parent_chat_id: $parent_chat_id,
                parent_message_id: $parent_message_id
            })
            RETURN c.chat_id AS chat_id",
        )
        .param("chat_id", chat_id.to_string())
        .param(
            "parent_chat_id",
            origin.map(|o| o.parent_chat_id.to_string()).unwrap_or_default(),
        )
        .param(
            "parent_message_id",
            origin.map(|o| o.parent_message_id.to_string()).unwrap_or_default(),
        );

        if !self.matched("create_document", q).await? {
            return Err(StoreError::Conflict(format!(
                "Content for chat {chat_id} already exists"
            )));
        }

        info!("Created Neo4j content document: {}", chat_id);
        Ok(ContentDocument::new(chat_id, origin))
    }

    async fn find_document(&self, chat_id: Uuid) -> StoreResult<Option<ContentDocument>> {
        let q = query(&format!(
            "MATCH (c:ChatContent {{chat_id: $chat_id}}) {DOCUMENT_PROJECTION}"
        ))
        .param("chat_id", chat_id.to_string());

        Ok(self.documents("find_document", q).await?.into_iter().next())
    }

    async fn find_documents_by_chat_or_parent(
        &self,
        chat_id: Uuid,
    ) -> StoreResult<Vec<ContentDocument>> {
        let q = query(&format!(
            "MATCH (c:ChatContent)
            WHERE c.chat_id = $chat_id OR c.parent_chat_id = $chat_id
            {DOCUMENT_PROJECTION}"
        ))
        .param("chat_id", chat_id.to_string());

        self.documents("find_documents_by_chat_or_parent", q).await
    }

    async fn find_children(&self, parent_ids: Vec<Uuid>) -> StoreResult<Vec<ContentDocument>> {
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = parent_ids.iter().map(Uuid::to_string).collect();
        let q = query(&format!(
            "MATCH (c:ChatContent)
            WHERE c.parent_chat_id IN $parent_ids
            {DOCUMENT_PROJECTION}"
        ))
        .param("parent_ids", ids);

        self.documents("find_children", q).await
    }

    async fn append_qa_pair(&self, chat_id: Uuid, pair: QAPair) -> StoreResult<()> {
        let branches: Vec<String> = pair.branches.iter().map(Uuid::to_string).collect();
        let q = query(
            "MATCH (c:ChatContent {chat_id: $chat_id})
            OPTIONAL MATCH (c)-[:HAS_PAIR]->(existing:QAPair)
            WITH c, count(existing) AS position
            CREATE (c)-[:HAS_PAIR]->(p:QAPair {
                response_id: $response_id,
                question: $question,
                timestamp: $timestamp,
                position: position,
                branches: $branches
            })
            SET p.response = CASE WHEN $has_response THEN $response ELSE null END
            RETURN p.response_id AS response_id",
        )
        .param("chat_id", chat_id.to_string())
        .param("response_id", pair.response_id.to_string())
        .param("question", pair.question)
        .param("timestamp", pair.timestamp.to_rfc3339())
        .param("branches", branches)
        .param("has_response", pair.response.is_some())
        .param("response", pair.response.unwrap_or_default());

        if !self.matched("append_qa_pair", q).await? {
            return Err(StoreError::not_found("Chat content"));
        }

        debug!("Appended turn to content {}", chat_id);
        Ok(())
    }

    async fn set_response(
        &self,
        chat_id: Uuid,
        response_id: Uuid,
        response: String,
    ) -> StoreResult<QAPair> {
        let q = query(
            "MATCH (:ChatContent {chat_id: $chat_id})-[:HAS_PAIR]->(p:QAPair {response_id: $response_id})
            SET p.response = $response
            RETURN p",
        )
        .param("chat_id", chat_id.to_string())
        .param("response_id", response_id.to_string())
        .param("response", response);

        let rows = self.rows("set_response", q).await?;
        let row = rows
            .first()
            .ok_or_else(|| StoreError::not_found("Message turn"))?;
        let node: Node = row.get("p").map_err(backend_error)?;

        pair_from_node(&node)
    }

    async fn attach_branch(
        &self,
        parent_chat_id: Uuid,
        parent_message_id: Uuid,
        child_chat_id: Uuid,
    ) -> StoreResult<()> {
        let q = query(
            "MATCH (:ChatContent {chat_id: $chat_id})-[:HAS_PAIR]->(p:QAPair {response_id: $response_id})
            WITH p, coalesce(p.branches, []) AS branches
            SET p.branches = CASE WHEN $child IN branches THEN branches ELSE branches + $child END
            RETURN p.response_id AS response_id",
        )
        .param("chat_id", parent_chat_id.to_string())
        .param("response_id", parent_message_id.to_string())
        .param("child", child_chat_id.to_string());

        if !self.matched("attach_branch", q).await? {
            return Err(StoreError::not_found("Message"));
        }

        debug!(
            "Attached branch {} to {}/{}",
            child_chat_id, parent_chat_id, parent_message_id
        );
        Ok(())
    }

    async fn detach_branch(
        &self,
        parent_chat_id: Uuid,
        parent_message_id: Uuid,
        child_chat_id: Uuid,
    ) -> StoreResult<()> {
        let q = query(
            "MATCH (:ChatContent {chat_id: $chat_id})-[:HAS_PAIR]->(p:QAPair {response_id: $response_id})
            SET p.branches = [b IN coalesce(p.branches, []) WHERE b <> $child]
            RETURN p.response_id AS response_id",
        )
        .param("chat_id", parent_chat_id.to_string())
        .param("response_id", parent_message_id.to_string())
        .param("child", child_chat_id.to_string());

        if !self.matched("detach_branch", q).await? {
            return Err(StoreError::not_found("Message"));
        }
        Ok(())
    }

    async fn delete_document(&self, chat_id: Uuid) -> StoreResult<bool> {
        let q = query(
            "MATCH (c:ChatContent {chat_id: $chat_id})
            OPTIONAL MATCH (c)-[:HAS_PAIR]->(p:QAPair)
            DETACH DELETE c, p
            RETURN count(DISTINCT c) AS deleted",
        )
        .param("chat_id", chat_id.to_string());

        let rows = self.rows("delete_document", q).await?;
        let deleted = match rows.first() {
            Some(row) => row.get::<i64>("deleted").map_err(backend_error)?,
            None => 0,
        };

        if deleted > 0 {
            info!("Deleted Neo4j content document: {}", chat_id);
        }
        Ok(deleted > 0)
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn document_from_row(row: &Row) -> StoreResult<ContentDocument> {
    let node: Node = row.get("c").map_err(backend_error)?;
    let pairs: Vec<Node> = row.get("pairs").map_err(backend_error)?;

    let chat_id = parse_uuid(&node, "chat_id")?;
    let parent_chat_id = parse_optional_uuid(&node, "parent_chat_id")?;
    let parent_message_id = parse_optional_uuid(&node, "parent_message_id")?;

    Ok(ContentDocument {
        chat_id,
        parent_chat_id,
        parent_message_id,
        qa_pairs: pairs.iter().map(pair_from_node).collect::<StoreResult<_>>()?,
    })
}

fn pair_from_node(node: &Node) -> StoreResult<QAPair> {
    let branches: Vec<String> = node.get("branches").unwrap_or_default();

    Ok(QAPair {
        question: node.get("question").map_err(backend_error)?,
        response: node.get("response").ok(),
        response_id: parse_uuid(node, "response_id")?,
        timestamp: parse_neo4j_datetime(node, "timestamp")?,
        branches: branches
            .iter()
            .map(|id| Uuid::parse_str(id).map_err(backend_error))
            .collect::<StoreResult<_>>()?,
    })
}

fn parse_uuid(node: &Node, field: &str) -> StoreResult<Uuid> {
    let raw: String = node.get(field).map_err(backend_error)?;
    Uuid::parse_str(&raw).map_err(backend_error)
}

/// Root documents store an empty string in their parent fields
fn parse_optional_uuid(node: &Node, field: &str) -> StoreResult<Option<Uuid>> {
    match node.get::<String>(field) {
        Ok(raw) if !raw.is_empty() => Uuid::parse_str(&raw).map(Some).map_err(backend_error),
        _ => Ok(None),
    }
}

fn parse_neo4j_datetime(node: &Node, field: &str) -> StoreResult<DateTime<Utc>> {
    let raw: String = node.get(field).map_err(backend_error)?;
    let dt = DateTime::parse_from_rfc3339(&raw).map_err(backend_error)?;
    Ok(dt.with_timezone(&Utc))
}
