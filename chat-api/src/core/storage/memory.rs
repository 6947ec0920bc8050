//! In-memory storage implementations
//!
//! These implementations store data in memory using thread-safe data structures.
//! Data is lost when the process exits.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::cache::CacheStats;
use crate::models::content::{BranchOrigin, ContentDocument, QAPair};
use crate::models::records::{
    ChatPatch, ChatRecord, Conversation, Message, MessageOrder, NewChat, NewUser, Page, User,
    UserPatch,
};

use super::error::{StoreError, StoreResult};
use super::traits::{CacheStore, ContentStore, RecordStore};

// ============================================================================
// InMemoryRecordStore
// ============================================================================

#[derive(Default)]
struct RecordTables {
    users: HashMap<Uuid, User>,
    chats: HashMap<Uuid, ChatRecord>,
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Message>,
}

impl RecordTables {
    fn owned_chat(&self, id: Uuid, owner: Uuid) -> StoreResult<&ChatRecord> {
        self.chats
            .get(&id)
            .filter(|chat| chat.owner_id == owner)
            .ok_or_else(|| StoreError::not_found("Chat"))
    }

    fn owned_conversation(&self, chat_id: Uuid, owner: Uuid) -> StoreResult<&Conversation> {
        self.conversations
            .get(&chat_id)
            .filter(|conv| conv.owner_id == owner && !conv.deleted)
            .ok_or_else(|| StoreError::not_found("Conversation"))
    }

    fn check_user_unique(&self, id: Option<Uuid>, email: &str, username: &str) -> StoreResult<()> {
        for user in self.users.values() {
            if Some(user.id) == id {
                continue;
            }
            if user.username == username {
                return Err(StoreError::Conflict("Username already registered".into()));
            }
            if user.email == email {
                return Err(StoreError::Conflict("Email already registered".into()));
            }
        }
        Ok(())
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items.into_iter().skip(page.skip).take(page.limit).collect()
}

/// In-memory implementation of RecordStore
///
/// All tables sit behind one RwLock, so every write is a single atomic unit.
/// Suitable for development, tests and single-instance deployments.
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<RecordTables>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn chat_count(&self) -> usize {
        self.tables.read().chats.len()
    }

    #[cfg(test)]
    pub fn conversation_count(&self) -> usize {
        self.tables.read().conversations.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.write();
        tables.check_user_unique(None, &new_user.email, &new_user.username)?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            username: new_user.username,
            password_hash: new_user.password_hash,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        info!("Created user: {}", user.id);

        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        self.tables
            .read()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("User"))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        let mut tables = self.tables.write();
        let current = tables
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("User"))?;

        let mut updated = current;
        patch.apply(&mut updated);
        tables.check_user_unique(Some(id), &updated.email, &updated.username)?;
        tables.users.insert(id, updated.clone());

        Ok(updated)
    }

    async fn create_chat(&self, owner: Uuid, chat: NewChat) -> StoreResult<ChatRecord> {
        let now = Utc::now();
        let record = ChatRecord {
            chat_id: Uuid::new_v4(),
            owner_id: owner,
            chat_type: chat.chat_type,
            name: chat.name,
            active: chat.active,
            created_at: now,
            updated_at: now,
        };
        let conversation = Conversation {
            chat_id: record.chat_id,
            owner_id: owner,
            name: record.name.clone(),
            deleted: false,
        };

        let mut tables = self.tables.write();
        tables.chats.insert(record.chat_id, record.clone());
        tables.conversations.insert(record.chat_id, conversation);
        info!("Created chat: {}", record.chat_id);

        Ok(record)
    }

    async fn get_chat(&self, id: Uuid, owner: Uuid) -> StoreResult<ChatRecord> {
        self.tables.read().owned_chat(id, owner).cloned()
    }

    async fn list_chats(&self, owner: Uuid, page: Page) -> StoreResult<Vec<ChatRecord>> {
        let mut chats: Vec<ChatRecord> = self
            .tables
            .read()
            .chats
            .values()
            .filter(|chat| chat.owner_id == owner)
            .cloned()
            .collect();
        chats.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.chat_id.cmp(&b.chat_id)));

        Ok(paginate(chats, page))
    }

    async fn get_chats(&self, owner: Uuid, ids: Vec<Uuid>) -> StoreResult<Vec<ChatRecord>> {
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.owned_chat(*id, owner).ok().cloned())
            .collect())
    }

    async fn update_chat(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: ChatPatch,
    ) -> StoreResult<ChatRecord> {
        let mut tables = self.tables.write();
        tables.owned_chat(id, owner)?;

        let chat = tables
            .chats
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Chat"))?;
        patch.apply(chat);
        let updated = chat.clone();

        debug!("Updated chat {}", id);
        Ok(updated)
    }

    async fn delete_chat(&self, id: Uuid, owner: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables.owned_chat(id, owner)?;

        tables.messages.retain(|_, message| message.conversation_id != id);
        tables.conversations.remove(&id);
        tables.chats.remove(&id);
        info!("Deleted chat: {}", id);

        Ok(())
    }

    async fn get_conversation(&self, chat_id: Uuid, owner: Uuid) -> StoreResult<Conversation> {
        self.tables
            .read()
            .owned_conversation(chat_id, owner)
            .cloned()
    }

    async fn list_conversations(&self, owner: Uuid, page: Page) -> StoreResult<Vec<Conversation>> {
        let tables = self.tables.read();
        let mut conversations: Vec<(Conversation, chrono::DateTime<Utc>)> = tables
            .conversations
            .values()
            .filter(|conv| conv.owner_id == owner && !conv.deleted)
            .map(|conv| {
                let created_at = tables
                    .chats
                    .get(&conv.chat_id)
                    .map(|chat| chat.created_at)
                    .unwrap_or_default();
                (conv.clone(), created_at)
            })
            .collect();
        conversations.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.chat_id.cmp(&b.0.chat_id)));

        Ok(paginate(
            conversations.into_iter().map(|(conv, _)| conv).collect(),
            page,
        ))
    }

    async fn soft_delete_conversation(&self, chat_id: Uuid, owner: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write();
        match tables.conversations.get_mut(&chat_id) {
            Some(conv) if conv.owner_id == owner => {
                conv.deleted = true;
                Ok(())
            },
            _ => Err(StoreError::not_found("Conversation")),
        }
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        owner: Uuid,
        content: String,
    ) -> StoreResult<Message> {
        let mut tables = self.tables.write();
        tables.owned_conversation(conversation_id, owner)?;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            author_id: owner,
            content,
            created_at: Utc::now(),
        };
        tables.messages.insert(message.id, message.clone());
        debug!("Added message {} to {}", message.id, conversation_id);

        Ok(message)
    }

    async fn get_message(&self, id: Uuid, owner: Uuid) -> StoreResult<Message> {
        let tables = self.tables.read();
        let message = tables
            .messages
            .get(&id)
            .ok_or_else(|| StoreError::not_found("Message"))?;

        match tables.conversations.get(&message.conversation_id) {
            Some(conv) if conv.owner_id == owner => Ok(message.clone()),
            _ => Err(StoreError::not_found("Message")),
        }
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        owner: Uuid,
        page: Page,
        order: MessageOrder,
    ) -> StoreResult<Vec<Message>> {
        let tables = self.tables.read();
        match tables.conversations.get(&conversation_id) {
            Some(conv) if conv.owner_id == owner => {},
            _ => return Err(StoreError::not_found("Conversation")),
        }

        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if order == MessageOrder::NewestFirst {
            messages.reverse();
        }

        Ok(paginate(messages, page))
    }

    async fn remove_message(&self, id: Uuid) -> StoreResult<()> {
        self.tables.write().messages.remove(&id);
        Ok(())
    }
}

// ============================================================================
// InMemoryContentStore
// ============================================================================

/// In-memory implementation of ContentStore
#[derive(Default)]
pub struct InMemoryContentStore {
    documents: RwLock<HashMap<Uuid, ContentDocument>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document as-is, bypassing the create checks
    #[cfg(test)]
    pub fn insert_raw(&self, document: ContentDocument) {
        self.documents.write().insert(document.chat_id, document);
    }

    #[cfg(test)]
    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn create_document(
        &self,
        chat_id: Uuid,
        origin: Option<BranchOrigin>,
    ) -> StoreResult<ContentDocument> {
        let mut documents = self.documents.write();
        if documents.contains_key(&chat_id) {
            return Err(StoreError::Conflict(format!(
                "Content for chat {chat_id} already exists"
            )));
        }

        let document = ContentDocument::new(chat_id, origin);
        documents.insert(chat_id, document.clone());
        debug!("Created content document for {}", chat_id);

        Ok(document)
    }

    async fn find_document(&self, chat_id: Uuid) -> StoreResult<Option<ContentDocument>> {
        Ok(self.documents.read().get(&chat_id).cloned())
    }

    async fn find_documents_by_chat_or_parent(
        &self,
        chat_id: Uuid,
    ) -> StoreResult<Vec<ContentDocument>> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|doc| doc.chat_id == chat_id || doc.parent_chat_id == Some(chat_id))
            .cloned()
            .collect())
    }

    async fn find_children(&self, parent_ids: Vec<Uuid>) -> StoreResult<Vec<ContentDocument>> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|doc| {
                doc.parent_chat_id
                    .is_some_and(|parent| parent_ids.contains(&parent))
            })
            .cloned()
            .collect())
    }

    async fn append_qa_pair(&self, chat_id: Uuid, pair: QAPair) -> StoreResult<()> {
        let mut documents = self.documents.write();
        let document = documents
            .get_mut(&chat_id)
            .ok_or_else(|| StoreError::not_found("Chat content"))?;
        document.qa_pairs.push(pair);
        Ok(())
    }

    async fn set_response(
        &self,
        chat_id: Uuid,
        response_id: Uuid,
        response: String,
    ) -> StoreResult<QAPair> {
        let mut documents = self.documents.write();
        let pair = documents
            .get_mut(&chat_id)
            .and_then(|doc| doc.pair_mut(response_id))
            .ok_or_else(|| StoreError::not_found("Message turn"))?;
        pair.response = Some(response);
        Ok(pair.clone())
    }

    async fn attach_branch(
        &self,
        parent_chat_id: Uuid,
        parent_message_id: Uuid,
        child_chat_id: Uuid,
    ) -> StoreResult<()> {
        let mut documents = self.documents.write();
        let pair = documents
            .get_mut(&parent_chat_id)
            .and_then(|doc| doc.pair_mut(parent_message_id))
            .ok_or_else(|| StoreError::not_found("Message"))?;

        if pair.add_branch(child_chat_id) {
            debug!(
                "Attached branch {} to {}/{}",
                child_chat_id, parent_chat_id, parent_message_id
            );
        }
        Ok(())
    }

    async fn detach_branch(
        &self,
        parent_chat_id: Uuid,
        parent_message_id: Uuid,
        child_chat_id: Uuid,
    ) -> StoreResult<()> {
        let mut documents = self.documents.write();
        let pair = documents
            .get_mut(&parent_chat_id)
            .and_then(|doc| doc.pair_mut(parent_message_id))
            .ok_or_else(|| StoreError::not_found("Message"))?;
        pair.remove_branch(child_chat_id);
        Ok(())
    }

    async fn delete_document(&self, chat_id: Uuid) -> StoreResult<bool> {
        Ok(self.documents.write().remove(&chat_id).is_some())
    }
}

// ============================================================================
// InMemoryCacheStore
// ============================================================================

/// Cache entry with metadata
#[derive(Clone)]
struct CacheEntry {
    value: Value,
    namespace: String,
    created_at: Instant,
    ttl: Duration,
    hit_count: usize,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Configuration for in-memory cache
#[derive(Clone)]
pub struct InMemoryCacheConfig {
    pub max_entries: usize,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

/// In-memory implementation of CacheStore using DashMap
pub struct InMemoryCacheStore {
    cache: DashMap<String, CacheEntry>,
    config: InMemoryCacheConfig,
}

impl InMemoryCacheStore {
    pub fn new(config: InMemoryCacheConfig) -> Self {
        Self {
            cache: DashMap::new(),
            config,
        }
    }

    fn evict_oldest(&self) {
        let mut oldest_key = None;
        let mut oldest_time = Instant::now();

        for entry in self.cache.iter() {
            if entry.value().created_at < oldest_time {
                oldest_time = entry.value().created_at;
                oldest_key = Some(entry.key().clone());
            }
        }

        if let Some(key) = oldest_key {
            self.cache.remove(&key);
            debug!("Evicted oldest cache entry: {}", key);
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new(InMemoryCacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let Some(mut entry) = self.cache.get_mut(key) else {
            return Ok(None);
        };

        if entry.is_expired() {
            drop(entry);
            self.cache.remove(key);
            debug!("Cache entry expired: {}", key);
            return Ok(None);
        }

        entry.hit_count += 1;
        debug!("Cache hit for key: {} (hits: {})", key, entry.hit_count);
        Ok(Some(entry.value.clone()))
    }

    async fn set(
        &self,
        key: String,
        namespace: String,
        value: Value,
        ttl: Duration,
    ) -> StoreResult<()> {
        if !self.cache.contains_key(&key) && self.cache.len() >= self.config.max_entries {
            self.evict_oldest();
        }

        let entry = CacheEntry {
            value,
            namespace,
            created_at: Instant::now(),
            ttl,
            hit_count: 0,
        };

        self.cache.insert(key.clone(), entry);
        debug!("Cached value for key: {}", key);
        Ok(())
    }

    async fn invalidate(&self, namespace: &str) -> StoreResult<usize> {
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.namespace != namespace);
        let removed = before.saturating_sub(self.cache.len());

        debug!("Invalidated {} entries in namespace {}", removed, namespace);
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        let mut total_hits = 0;
        let mut total_entries = 0;

        for entry in self.cache.iter() {
            total_entries += 1;
            total_hits += entry.value().hit_count;
        }

        CacheStats {
            total_entries,
            total_hits,
            ..Default::default()
        }
    }

    async fn cleanup(&self) -> StoreResult<usize> {
        let before = self.cache.len();
        self.cache.retain(|_, entry| !entry.is_expired());
        let count = before.saturating_sub(self.cache.len());

        info!(
            "Cache cleanup: removed {} entries, {} remaining",
            count,
            self.cache.len()
        );
        Ok(count)
    }
}
