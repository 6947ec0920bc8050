use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::cache::{CacheNamespace, ResponseCache};
use crate::core::storage::{ContentStore, RecordStore, StoreError, StoreResult};
use crate::models::content::{ContentDocument, QAPair};
use crate::models::records::{
    ChatPatch, ChatRecord, Conversation, Message, MessageOrder, NewChat, Page,
};

const ALL_NAMESPACES: &[CacheNamespace] = &[
    CacheNamespace::Chats,
    CacheNamespace::Conversations,
    CacheNamespace::Messages,
    CacheNamespace::Branches,
];

/// Chat, conversation and message lifecycle over both stores
pub struct ChatManager {
    records: Arc<dyn RecordStore>,
    contents: Arc<dyn ContentStore>,
    cache: ResponseCache,
}

impl ChatManager {
    pub fn new(
        records: Arc<dyn RecordStore>,
        contents: Arc<dyn ContentStore>,
        cache: ResponseCache,
    ) -> Self {
        Self {
            records,
            contents,
            cache,
        }
    }

    pub async fn create_chat(&self, owner: Uuid, chat: NewChat) -> StoreResult<ChatRecord> {
        let record = self.records.create_chat(owner, chat).await?;

        if let Err(e) = self.contents.create_document(record.chat_id, None).await {
            warn!("Content for chat {} failed: {}", record.chat_id, e);
            if let Err(undo) = self.records.delete_chat(record.chat_id, owner).await {
                error!(
                    "Compensation failed, orphaned chat record {}: {}",
                    record.chat_id, undo
                );
            }
            return Err(e);
        }

        self.cache
            .invalidate(owner, &[CacheNamespace::Chats, CacheNamespace::Conversations])
            .await;

        info!("Created chat {} for {}", record.chat_id, owner);
        Ok(record)
    }

    pub async fn list_chats(&self, owner: Uuid, page: Page) -> StoreResult<Vec<ChatRecord>> {
        let (skip, limit) = (page.skip.to_string(), page.limit.to_string());
        self.cache
            .get_or_load(CacheNamespace::Chats, owner, "list_chats", &[&skip, &limit], || {
                self.records.list_chats(owner, page)
            })
            .await
    }

    pub async fn get_chat(&self, owner: Uuid, chat_id: Uuid) -> StoreResult<ChatRecord> {
        let arg = chat_id.to_string();
        self.cache
            .get_or_load(CacheNamespace::Chats, owner, "get_chat", &[&arg], || {
                self.records.get_chat(chat_id, owner)
            })
            .await
    }

    pub async fn update_chat(
        &self,
        owner: Uuid,
        chat_id: Uuid,
        patch: ChatPatch,
    ) -> StoreResult<ChatRecord> {
        let record = self.records.update_chat(chat_id, owner, patch).await?;
        self.cache
            .invalidate(owner, &[CacheNamespace::Chats, CacheNamespace::Branches])
            .await;
        Ok(record)
    }

    /// Remove the chat everywhere. A deleted branch is detached from the
    /// turn it was forked from.
    pub async fn delete_chat(&self, owner: Uuid, chat_id: Uuid) -> StoreResult<()> {
        self.records.get_chat(chat_id, owner).await?;
        let document = self.contents.find_document(chat_id).await?;

        self.records.delete_chat(chat_id, owner).await?;

        if let Some(origin) = document.as_ref().and_then(ContentDocument::origin)
            && let Err(e) = self
                .contents
                .detach_branch(origin.parent_chat_id, origin.parent_message_id, chat_id)
                .await
        {
            // the parent may be gone already
            warn!("Could not detach {} from its parent: {}", chat_id, e);
        }

        if document.is_some()
            && let Err(e) = self.contents.delete_document(chat_id).await
        {
            error!("Orphaned content document {}: {}", chat_id, e);
        }

        self.cache.invalidate(owner, ALL_NAMESPACES).await;
        info!("Deleted chat {}", chat_id);
        Ok(())
    }

    pub async fn get_content(&self, owner: Uuid, chat_id: Uuid) -> StoreResult<ContentDocument> {
        self.records.get_chat(chat_id, owner).await?;
        self.contents.find_document(chat_id).await?.ok_or_else(|| {
            StoreError::DataIntegrity(format!("chat {chat_id} has no content document"))
        })
    }

    /// Record a message and ask it as a new turn of the conversation's chat.
    pub async fn add_message(
        &self,
        owner: Uuid,
        conversation_id: Uuid,
        content: String,
    ) -> StoreResult<Message> {
        let message = self
            .records
            .create_message(conversation_id, owner, content)
            .await?;

        let turn = QAPair::question(message.id, message.content.clone());
        if let Err(e) = self.contents.append_qa_pair(conversation_id, turn).await {
            warn!("Turn for message {} failed: {}", message.id, e);
            if let Err(undo) = self.records.remove_message(message.id).await {
                error!(
                    "Compensation failed, orphaned message {}: {}",
                    message.id, undo
                );
            }
            return Err(match e {
                StoreError::Transient(_) => e,
                other => StoreError::DataIntegrity(format!(
                    "conversation {conversation_id} content rejected the message: {other}"
                )),
            });
        }

        self.cache.invalidate(owner, &[CacheNamespace::Messages]).await;
        Ok(message)
    }

    /// Answer the turn asked by `message_id`.
    pub async fn attach_response(
        &self,
        owner: Uuid,
        message_id: Uuid,
        response: String,
    ) -> StoreResult<QAPair> {
        let message = self.records.get_message(message_id, owner).await?;

        let pair = self
            .contents
            .set_response(message.conversation_id, message_id, response)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => StoreError::DataIntegrity(format!(
                    "message {message_id} has no content turn"
                )),
                other => other,
            })?;

        self.cache.invalidate(owner, &[CacheNamespace::Messages]).await;
        Ok(pair)
    }

    pub async fn get_message(&self, owner: Uuid, message_id: Uuid) -> StoreResult<Message> {
        self.records.get_message(message_id, owner).await
    }

    /// Messages of a conversation, oldest first
    pub async fn conversation_messages(
        &self,
        owner: Uuid,
        conversation_id: Uuid,
        page: Page,
    ) -> StoreResult<Vec<Message>> {
        self.records
            .list_messages(conversation_id, owner, page, MessageOrder::OldestFirst)
            .await
    }

    /// Messages of a chat, newest first
    pub async fn chat_messages(
        &self,
        owner: Uuid,
        chat_id: Uuid,
        page: Page,
    ) -> StoreResult<Vec<Message>> {
        let (chat, skip, limit) = (
            chat_id.to_string(),
            page.skip.to_string(),
            page.limit.to_string(),
        );
        self.cache
            .get_or_load(
                CacheNamespace::Messages,
                owner,
                "chat_messages",
                &[&chat, &skip, &limit],
                || async move {
                    self.records.get_chat(chat_id, owner).await?;
                    self.records
                        .list_messages(chat_id, owner, page, MessageOrder::NewestFirst)
                        .await
                },
            )
            .await
    }

    pub async fn list_conversations(
        &self,
        owner: Uuid,
        page: Page,
    ) -> StoreResult<Vec<Conversation>> {
        let (skip, limit) = (page.skip.to_string(), page.limit.to_string());
        self.cache
            .get_or_load(
                CacheNamespace::Conversations,
                owner,
                "list_conversations",
                &[&skip, &limit],
                || self.records.list_conversations(owner, page),
            )
            .await
    }

    pub async fn get_conversation(
        &self,
        owner: Uuid,
        conversation_id: Uuid,
    ) -> StoreResult<Conversation> {
        let arg = conversation_id.to_string();
        self.cache
            .get_or_load(
                CacheNamespace::Conversations,
                owner,
                "get_conversation",
                &[&arg],
                || self.records.get_conversation(conversation_id, owner),
            )
            .await
    }

    /// Hide a conversation. Its chat, messages and content stay in place.
    pub async fn delete_conversation(&self, owner: Uuid, conversation_id: Uuid) -> StoreResult<()> {
        self.records
            .soft_delete_conversation(conversation_id, owner)
            .await?;
        self.cache
            .invalidate(
                owner,
                &[CacheNamespace::Conversations, CacheNamespace::Messages],
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::branching::BranchCoordinator;
    use crate::core::cache::CacheConfig;
    use crate::core::config::BranchingConfig;
    use crate::core::storage::{
        InMemoryCacheStore, InMemoryContentStore, InMemoryRecordStore, MockContentStore,
    };
    use crate::models::records::ChatType;

    struct Fixture {
        records: Arc<InMemoryRecordStore>,
        contents: Arc<InMemoryContentStore>,
        cache: ResponseCache,
        chats: ChatManager,
        owner: Uuid,
    }

    fn fixture() -> Fixture {
        let records = Arc::new(InMemoryRecordStore::new());
        let contents = Arc::new(InMemoryContentStore::new());
        let cache = ResponseCache::new(
            Arc::new(InMemoryCacheStore::default()),
            CacheConfig::default(),
        );
        let chats = ChatManager::new(records.clone(), contents.clone(), cache.clone());
        Fixture {
            records,
            contents,
            cache,
            chats,
            owner: Uuid::new_v4(),
        }
    }

    fn new_chat(name: &str) -> NewChat {
        NewChat {
            chat_type: ChatType::Direct,
            name: name.to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_create_chat_writes_both_stores() {
        let fx = fixture();
        let chat = fx.chats.create_chat(fx.owner, new_chat("notes")).await.unwrap();

        let content = fx.chats.get_content(fx.owner, chat.chat_id).await.unwrap();
        assert_eq!(content.chat_id, chat.chat_id);
        assert!(content.origin().is_none());
        assert!(fx.chats.get_conversation(fx.owner, chat.chat_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_chat_rolls_back_when_content_fails() {
        let records = Arc::new(InMemoryRecordStore::new());
        let mut contents = MockContentStore::new();
        contents
            .expect_create_document()
            .returning(|_, _| Err(StoreError::Backend("boom".to_string())));
        let chats = ChatManager::new(
            records.clone(),
            Arc::new(contents),
            ResponseCache::new(
                Arc::new(InMemoryCacheStore::default()),
                CacheConfig::default(),
            ),
        );

        let result = chats.create_chat(Uuid::new_v4(), new_chat("notes")).await;
        assert!(result.is_err());
        assert_eq!(records.chat_count(), 0);
        assert_eq!(records.conversation_count(), 0);
    }

    #[tokio::test]
    async fn test_list_chats_is_refreshed_after_create() {
        let fx = fixture();
        fx.chats.create_chat(fx.owner, new_chat("one")).await.unwrap();
        assert_eq!(fx.chats.list_chats(fx.owner, Page::default()).await.unwrap().len(), 1);

        fx.chats.create_chat(fx.owner, new_chat("two")).await.unwrap();
        assert_eq!(fx.chats.list_chats(fx.owner, Page::default()).await.unwrap().len(), 2);

        // another owner sees nothing
        let other = Uuid::new_v4();
        assert!(fx.chats.list_chats(other, Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields() {
        let fx = fixture();
        let chat = fx.chats.create_chat(fx.owner, new_chat("before")).await.unwrap();
        fx.chats.get_chat(fx.owner, chat.chat_id).await.unwrap();

        let updated = fx
            .chats
            .update_chat(
                fx.owner,
                chat.chat_id,
                ChatPatch {
                    name: Some("after".to_string()),
                    active: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "after");
        assert!(updated.active);
        assert_eq!(updated.chat_type, chat.chat_type);

        let fetched = fx.chats.get_chat(fx.owner, chat.chat_id).await.unwrap();
        assert_eq!(fetched.name, "after");
    }

    #[tokio::test]
    async fn test_add_message_appends_turn_and_response() {
        let fx = fixture();
        let chat = fx.chats.create_chat(fx.owner, new_chat("qa")).await.unwrap();

        let message = fx
            .chats
            .add_message(fx.owner, chat.chat_id, "what is rust?".to_string())
            .await
            .unwrap();
        let pair = fx
            .chats
            .attach_response(fx.owner, message.id, "a language".to_string())
            .await
            .unwrap();

        assert_eq!(pair.response_id, message.id);
        assert_eq!(pair.question, "what is rust?");
        assert_eq!(pair.response.as_deref(), Some("a language"));

        let content = fx.chats.get_content(fx.owner, chat.chat_id).await.unwrap();
        assert_eq!(content.qa_pairs.len(), 1);
        assert_eq!(content.qa_pairs[0].response.as_deref(), Some("a language"));
    }

    #[tokio::test]
    async fn test_add_message_without_content_is_compensated() {
        let fx = fixture();
        // a record without a content document
        let chat = fx.records.create_chat(fx.owner, new_chat("split")).await.unwrap();

        let err = fx
            .chats
            .add_message(fx.owner, chat.chat_id, "lost".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DataIntegrity(_)));
        let messages = fx
            .chats
            .conversation_messages(fx.owner, chat.chat_id, Page::default())
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_message_orderings() {
        let fx = fixture();
        let chat = fx.chats.create_chat(fx.owner, new_chat("log")).await.unwrap();
        for text in ["first", "second", "third"] {
            fx.chats
                .add_message(fx.owner, chat.chat_id, text.to_string())
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let oldest: Vec<String> = fx
            .chats
            .conversation_messages(fx.owner, chat.chat_id, Page::default())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(oldest, ["first", "second", "third"]);

        let newest: Vec<String> = fx
            .chats
            .chat_messages(fx.owner, chat.chat_id, Page { skip: 0, limit: 2 })
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(newest, ["third", "second"]);
    }

    #[tokio::test]
    async fn test_deleted_conversation_rejects_messages() {
        let fx = fixture();
        let chat = fx.chats.create_chat(fx.owner, new_chat("gone")).await.unwrap();
        fx.chats.get_conversation(fx.owner, chat.chat_id).await.unwrap();

        fx.chats.delete_conversation(fx.owner, chat.chat_id).await.unwrap();

        assert!(
            fx.chats
                .get_conversation(fx.owner, chat.chat_id)
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            fx.chats
                .list_conversations(fx.owner, Page::default())
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            fx.chats
                .add_message(fx.owner, chat.chat_id, "hello?".to_string())
                .await
                .unwrap_err()
                .is_not_found()
        );
        // the chat itself survives
        assert!(fx.chats.get_chat(fx.owner, chat.chat_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_deleting_branch_detaches_it() {
        let fx = fixture();
        let branches = BranchCoordinator::new(
            fx.records.clone(),
            fx.contents.clone(),
            fx.cache.clone(),
            BranchingConfig::default(),
        );

        let root = fx.chats.create_chat(fx.owner, new_chat("root")).await.unwrap();
        let message = fx
            .chats
            .add_message(fx.owner, root.chat_id, "hello".to_string())
            .await
            .unwrap();
        let branch = branches
            .create_branch(root.chat_id, message.id, fx.owner)
            .await
            .unwrap();
        assert_eq!(branches.list_branches(root.chat_id, fx.owner).await.unwrap().len(), 1);

        fx.chats.delete_chat(fx.owner, branch.chat_id).await.unwrap();

        let root_doc = fx.contents.find_document(root.chat_id).await.unwrap().unwrap();
        assert!(root_doc.qa_pairs[0].branches.is_empty());
        assert!(fx.contents.find_document(branch.chat_id).await.unwrap().is_none());
        assert!(branches.list_branches(root.chat_id, fx.owner).await.unwrap().is_empty());
        assert!(
            fx.chats
                .get_chat(fx.owner, branch.chat_id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_foreign_owner_cannot_delete() {
        let fx = fixture();
        let chat = fx.chats.create_chat(fx.owner, new_chat("mine")).await.unwrap();

        let err = fx.chats.delete_chat(Uuid::new_v4(), chat.chat_id).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fx.contents.document_count(), 1);
    }
}
