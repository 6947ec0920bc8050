//! Storage trait definitions
//!
//! These traits define the interface for storage backends.
//! Implementations can be in-memory, PostgreSQL/Neo4j-backed, or any other
//! storage system. Every ownership-scoped read or write takes the caller's id
//! and reports a foreign record as [`StoreError::NotFound`].

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::core::cache::CacheStats;
use crate::models::content::{BranchOrigin, ContentDocument, QAPair};
use crate::models::records::{
    ChatPatch, ChatRecord, Conversation, Message, MessageOrder, NewChat, NewUser, Page, User,
    UserPatch,
};

use super::error::StoreResult;

/// Relational store: identity, ownership and lifecycle metadata
///
/// Implementations must be thread-safe (Send + Sync) as they will be
/// shared across multiple async tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a user; `Conflict` if the username or email is taken
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn get_user(&self, id: Uuid) -> StoreResult<User>;

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> StoreResult<User>;

    /// Create a chat and its conversation in one atomic unit
    async fn create_chat(&self, owner: Uuid, chat: NewChat) -> StoreResult<ChatRecord>;

    async fn get_chat(&self, id: Uuid, owner: Uuid) -> StoreResult<ChatRecord>;

    async fn list_chats(&self, owner: Uuid, page: Page) -> StoreResult<Vec<ChatRecord>>;

    /// Batch lookup; ids that are missing or foreign are skipped
    async fn get_chats(&self, owner: Uuid, ids: Vec<Uuid>) -> StoreResult<Vec<ChatRecord>>;

    async fn update_chat(&self, id: Uuid, owner: Uuid, patch: ChatPatch)
    -> StoreResult<ChatRecord>;

    /// Remove a chat with its conversation and messages in one atomic unit
    async fn delete_chat(&self, id: Uuid, owner: Uuid) -> StoreResult<()>;

    /// Soft-deleted conversations are reported as not found
    async fn get_conversation(&self, chat_id: Uuid, owner: Uuid) -> StoreResult<Conversation>;

    async fn list_conversations(&self, owner: Uuid, page: Page) -> StoreResult<Vec<Conversation>>;

    async fn soft_delete_conversation(&self, chat_id: Uuid, owner: Uuid) -> StoreResult<()>;

    async fn create_message(
        &self,
        conversation_id: Uuid,
        owner: Uuid,
        content: String,
    ) -> StoreResult<Message>;

    async fn get_message(&self, id: Uuid, owner: Uuid) -> StoreResult<Message>;

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        owner: Uuid,
        page: Page,
        order: MessageOrder,
    ) -> StoreResult<Vec<Message>>;

    /// Compensation for a message whose content turn could not be written
    async fn remove_message(&self, id: Uuid) -> StoreResult<()>;
}

/// Document store: conversational content and branch topology
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert an empty document; `Conflict` if one already exists
    async fn create_document(
        &self,
        chat_id: Uuid,
        origin: Option<BranchOrigin>,
    ) -> StoreResult<ContentDocument>;

    async fn find_document(&self, chat_id: Uuid) -> StoreResult<Option<ContentDocument>>;

    /// The document of `chat_id` plus its direct children
    async fn find_documents_by_chat_or_parent(
        &self,
        chat_id: Uuid,
    ) -> StoreResult<Vec<ContentDocument>>;

    /// Documents whose parent is one of `parent_ids`
    async fn find_children(&self, parent_ids: Vec<Uuid>) -> StoreResult<Vec<ContentDocument>>;

    /// Push a turn to the end of the document
    async fn append_qa_pair(&self, chat_id: Uuid, pair: QAPair) -> StoreResult<()>;

    /// Set the answer of the turn asked by `response_id`
    async fn set_response(
        &self,
        chat_id: Uuid,
        response_id: Uuid,
        response: String,
    ) -> StoreResult<QAPair>;

    /// Record `child_chat_id` on the turn `parent_message_id` of the parent.
    /// `NotFound` when the parent has no such turn.
    async fn attach_branch(
        &self,
        parent_chat_id: Uuid,
        parent_message_id: Uuid,
        child_chat_id: Uuid,
    ) -> StoreResult<()>;

    async fn detach_branch(
        &self,
        parent_chat_id: Uuid,
        parent_message_id: Uuid,
        child_chat_id: Uuid,
    ) -> StoreResult<()>;

    async fn delete_document(&self, chat_id: Uuid) -> StoreResult<bool>;
}

/// Trait for response cache storage backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Store a value tagged with `namespace`
    async fn set(&self, key: String, namespace: String, value: Value, ttl: Duration)
    -> StoreResult<()>;

    /// Drop every key tagged with `namespace`, returning how many went
    async fn invalidate(&self, namespace: &str) -> StoreResult<usize>;

    async fn stats(&self) -> CacheStats;

    /// Clean up expired entries
    async fn cleanup(&self) -> StoreResult<usize>;
}
