//! Branch creation and traversal across the record and content stores.
//!
//! A branch is an ordinary chat whose content document points back at the
//! turn it was forked from. Creating one touches both stores without a shared
//! transaction, so [`BranchCoordinator::create_branch`] runs as a saga: the
//! record commit is the anchor, and every later failure undoes the earlier
//! steps before the error is returned.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::cache::{CacheNamespace, ResponseCache};
use crate::core::config::BranchingConfig;
use crate::core::storage::{ContentStore, RecordStore, StoreError, StoreResult};
use crate::models::branch::BranchNode;
use crate::models::content::{BranchOrigin, ContentDocument};
use crate::models::records::{ChatPatch, ChatRecord, NewChat};

pub struct BranchCoordinator {
    records: Arc<dyn RecordStore>,
    contents: Arc<dyn ContentStore>,
    cache: ResponseCache,
    config: BranchingConfig,
}

impl BranchCoordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        contents: Arc<dyn ContentStore>,
        cache: ResponseCache,
        config: BranchingConfig,
    ) -> Self {
        Self {
            records,
            contents,
            cache,
            config,
        }
    }

    /// Fork a new inactive chat from turn `message_id` of `parent_chat_id`.
    pub async fn create_branch(
        &self,
        parent_chat_id: Uuid,
        message_id: Uuid,
        caller: Uuid,
    ) -> StoreResult<ChatRecord> {
        let parent = self.records.get_chat(parent_chat_id, caller).await?;

        let branch = self
            .records
            .create_chat(
                caller,
                NewChat {
                    chat_type: parent.chat_type,
                    name: format!("Branch from {}", parent.name),
                    active: false,
                },
            )
            .await?;

        let origin = BranchOrigin {
            parent_chat_id,
            parent_message_id: message_id,
        };
        if let Err(e) = self.contents.create_document(branch.chat_id, Some(origin)).await {
            warn!("Branch content for {} failed: {}", branch.chat_id, e);
            self.undo_record(&branch, caller).await;
            return Err(e);
        }

        if let Err(e) = self
            .contents
            .attach_branch(parent_chat_id, message_id, branch.chat_id)
            .await
        {
            warn!(
                "Attaching branch {} to {}/{} failed: {}",
                branch.chat_id, parent_chat_id, message_id, e
            );
            self.undo_document(branch.chat_id).await;
            self.undo_record(&branch, caller).await;
            return Err(match e {
                StoreError::NotFound(_) => StoreError::not_found("Message"),
                other => other,
            });
        }

        self.cache
            .invalidate(
                caller,
                &[
                    CacheNamespace::Chats,
                    CacheNamespace::Conversations,
                    CacheNamespace::Branches,
                ],
            )
            .await;

        info!(
            "Created branch {} from {}/{}",
            branch.chat_id, parent_chat_id, message_id
        );
        Ok(branch)
    }

    async fn undo_record(&self, branch: &ChatRecord, caller: Uuid) {
        if let Err(e) = self.records.delete_chat(branch.chat_id, caller).await {
            error!(
                "Compensation failed, orphaned chat record {}: {}",
                branch.chat_id, e
            );
        }
    }

    async fn undo_document(&self, chat_id: Uuid) {
        if let Err(e) = self.contents.delete_document(chat_id).await {
            error!(
                "Compensation failed, orphaned content document {}: {}",
                chat_id, e
            );
        }
    }

    /// Chats forked from any turn of `chat_id`, in conversational order.
    pub async fn list_branches(&self, chat_id: Uuid, caller: Uuid) -> StoreResult<Vec<ChatRecord>> {
        let arg = chat_id.to_string();
        self.cache
            .get_or_load(
                CacheNamespace::Branches,
                caller,
                "list_branches",
                &[&arg],
                || self.load_branches(chat_id, caller),
            )
            .await
    }

    async fn load_branches(&self, chat_id: Uuid, caller: Uuid) -> StoreResult<Vec<ChatRecord>> {
        self.records.get_chat(chat_id, caller).await?;

        let Some(document) = self.contents.find_document(chat_id).await? else {
            return Ok(Vec::new());
        };
        let ids = document.branch_ids();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: HashMap<Uuid, ChatRecord> = self
            .records
            .get_chats(caller, ids.clone())
            .await?
            .into_iter()
            .map(|record| (record.chat_id, record))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Mark a branch active. Sibling branches keep their state.
    pub async fn set_active_branch(&self, branch_id: Uuid, caller: Uuid) -> StoreResult<ChatRecord> {
        let branch = self
            .records
            .update_chat(branch_id, caller, ChatPatch::activate())
            .await?;

        self.cache
            .invalidate(caller, &[CacheNamespace::Chats, CacheNamespace::Branches])
            .await;

        debug!("Activated branch {}", branch_id);
        Ok(branch)
    }

    /// The fork tree rooted at `root_chat_id`.
    pub async fn get_branch_tree(&self, root_chat_id: Uuid, caller: Uuid) -> StoreResult<BranchNode> {
        let arg = root_chat_id.to_string();
        self.cache
            .get_or_load(
                CacheNamespace::Branches,
                caller,
                "get_branch_tree",
                &[&arg],
                || self.build_tree(root_chat_id, caller),
            )
            .await
    }

    async fn build_tree(&self, root_chat_id: Uuid, caller: Uuid) -> StoreResult<BranchNode> {
        let root = self.records.get_chat(root_chat_id, caller).await?;
        let (root_doc, documents) = self.collect_descendants(root_chat_id).await?;

        let ids: Vec<Uuid> = documents.iter().map(|doc| doc.chat_id).collect();
        let records: HashMap<Uuid, ChatRecord> = self
            .records
            .get_chats(caller, ids)
            .await?
            .into_iter()
            .map(|record| (record.chat_id, record))
            .collect();

        let root_origin = root_doc.and_then(|doc| doc.parent_message_id);
        Ok(assemble_tree(&root, root_origin, &documents, &records))
    }

    /// The root's own document, if any, and every document below it in
    /// breadth-first order.
    async fn collect_descendants(
        &self,
        root_chat_id: Uuid,
    ) -> StoreResult<(Option<ContentDocument>, Vec<ContentDocument>)> {
        let mut level = self
            .contents
            .find_documents_by_chat_or_parent(root_chat_id)
            .await?;
        let root_doc = level
            .iter()
            .position(|doc| doc.chat_id == root_chat_id)
            .map(|idx| level.swap_remove(idx));

        if let Some(doc) = &root_doc
            && doc.parent_chat_id == Some(root_chat_id)
        {
            return Err(StoreError::DataIntegrity(format!(
                "chat {root_chat_id} is recorded as its own parent"
            )));
        }

        let mut visited = HashSet::from([root_chat_id]);
        let mut frontier = Vec::new();
        let mut collected = Vec::new();
        let mut depth = 0;

        while !level.is_empty() {
            depth += 1;
            if depth > self.config.max_tree_depth {
                return Err(StoreError::DataIntegrity(format!(
                    "branch tree under {root_chat_id} is deeper than {}",
                    self.config.max_tree_depth
                )));
            }

            for child in level {
                if !visited.insert(child.chat_id) {
                    return Err(StoreError::DataIntegrity(format!(
                        "branch cycle through chat {}",
                        child.chat_id
                    )));
                }
                frontier.push(child.chat_id);
                collected.push(child);
            }

            level = self.contents.find_children(std::mem::take(&mut frontier)).await?;
        }

        Ok((root_doc, collected))
    }
}

/// Build the tree bottom-up from documents in breadth-first order.
/// Children whose record is missing are dropped.
fn assemble_tree(
    root: &ChatRecord,
    root_origin: Option<Uuid>,
    documents: &[ContentDocument],
    records: &HashMap<Uuid, ChatRecord>,
) -> BranchNode {
    let mut pending: HashMap<Uuid, Vec<BranchNode>> = HashMap::new();

    // Reverse breadth-first order visits every child before its parent.
    for doc in documents.iter().rev() {
        let Some(record) = records.get(&doc.chat_id) else {
            warn!(
                "Content document {} has no chat record, leaving it out of the tree",
                doc.chat_id
            );
            continue;
        };
        let Some(parent_id) = doc.parent_chat_id else {
            continue;
        };

        let mut node = BranchNode::from_record(record, doc.parent_message_id);
        node.children = take_sorted(&mut pending, doc.chat_id);
        pending.entry(parent_id).or_default().push(node);
    }

    let mut tree = BranchNode::from_record(root, root_origin);
    tree.children = take_sorted(&mut pending, root.chat_id);
    tree
}

fn take_sorted(pending: &mut HashMap<Uuid, Vec<BranchNode>>, parent: Uuid) -> Vec<BranchNode> {
    let mut children = pending.remove(&parent).unwrap_or_default();
    children.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.chat_id.cmp(&b.chat_id))
    });
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::CacheConfig;
    use crate::core::storage::{
        InMemoryCacheStore, InMemoryContentStore, InMemoryRecordStore, MockContentStore,
    };
    use crate::models::content::QAPair;
    use crate::models::records::{ChatType, Page};

    struct Fixture {
        records: Arc<InMemoryRecordStore>,
        contents: Arc<InMemoryContentStore>,
        coordinator: BranchCoordinator,
        owner: Uuid,
    }

    fn cache() -> ResponseCache {
        ResponseCache::new(
            Arc::new(InMemoryCacheStore::default()),
            CacheConfig::default(),
        )
    }

    fn fixture() -> Fixture {
        let records = Arc::new(InMemoryRecordStore::new());
        let contents = Arc::new(InMemoryContentStore::new());
        let coordinator = BranchCoordinator::new(
            records.clone(),
            contents.clone(),
            cache(),
            BranchingConfig::default(),
        );
        Fixture {
            records,
            contents,
            coordinator,
            owner: Uuid::new_v4(),
        }
    }

    impl Fixture {
        /// A root chat with its document and one asked turn
        async fn chat_with_turn(&self, name: &str, chat_type: ChatType) -> (ChatRecord, Uuid) {
            let chat = self
                .records
                .create_chat(
                    self.owner,
                    NewChat {
                        chat_type,
                        name: name.to_string(),
                        active: true,
                    },
                )
                .await
                .unwrap();
            self.contents.create_document(chat.chat_id, None).await.unwrap();
            let message = self.add_turn(chat.chat_id, "hello").await;
            (chat, message)
        }

        async fn add_turn(&self, chat_id: Uuid, question: &str) -> Uuid {
            let message = self
                .records
                .create_message(chat_id, self.owner, question.to_string())
                .await
                .unwrap();
            self.contents
                .append_qa_pair(chat_id, QAPair::question(message.id, question))
                .await
                .unwrap();
            message.id
        }
    }

    #[tokio::test]
    async fn test_branch_from_root_scenario() {
        let fx = fixture();
        let (root, m1) = fx.chat_with_turn("root", ChatType::Direct).await;

        let branch = fx
            .coordinator
            .create_branch(root.chat_id, m1, fx.owner)
            .await
            .unwrap();

        assert_eq!(branch.name, "Branch from root");
        assert!(!branch.active);
        assert_eq!(branch.chat_type, ChatType::Direct);

        let root_doc = fx.contents.find_document(root.chat_id).await.unwrap().unwrap();
        assert_eq!(root_doc.qa_pairs[0].response_id, m1);
        assert_eq!(root_doc.qa_pairs[0].branches, vec![branch.chat_id]);

        let branch_doc = fx.contents.find_document(branch.chat_id).await.unwrap().unwrap();
        assert_eq!(branch_doc.parent_chat_id, Some(root.chat_id));
        assert_eq!(branch_doc.parent_message_id, Some(m1));
        assert!(branch_doc.qa_pairs.is_empty());

        // the branch gets its own conversation
        assert!(fx.records.get_conversation(branch.chat_id, fx.owner).await.is_ok());
    }

    #[tokio::test]
    async fn test_branch_copies_parent_chat_type() {
        let fx = fixture();
        let (root, m1) = fx.chat_with_turn("team", ChatType::Group).await;

        let branch = fx
            .coordinator
            .create_branch(root.chat_id, m1, fx.owner)
            .await
            .unwrap();
        assert_eq!(branch.chat_type, ChatType::Group);
    }

    #[tokio::test]
    async fn test_list_branches_includes_new_branch() {
        let fx = fixture();
        let (root, m1) = fx.chat_with_turn("root", ChatType::Direct).await;

        assert!(
            fx.coordinator
                .list_branches(root.chat_id, fx.owner)
                .await
                .unwrap()
                .is_empty()
        );

        let first = fx.coordinator.create_branch(root.chat_id, m1, fx.owner).await.unwrap();
        let m2 = fx.add_turn(root.chat_id, "again").await;
        let second = fx.coordinator.create_branch(root.chat_id, m2, fx.owner).await.unwrap();
        let third = fx.coordinator.create_branch(root.chat_id, m1, fx.owner).await.unwrap();

        let ids: Vec<Uuid> = fx
            .coordinator
            .list_branches(root.chat_id, fx.owner)
            .await
            .unwrap()
            .iter()
            .map(|c| c.chat_id)
            .collect();

        // turn order first, attach order within a turn
        assert_eq!(ids, vec![first.chat_id, third.chat_id, second.chat_id]);
    }

    #[tokio::test]
    async fn test_list_branches_without_document_is_empty() {
        let fx = fixture();
        let chat = fx
            .records
            .create_chat(
                fx.owner,
                NewChat {
                    chat_type: ChatType::Direct,
                    name: "bare".to_string(),
                    active: true,
                },
            )
            .await
            .unwrap();

        let branches = fx.coordinator.list_branches(chat.chat_id, fx.owner).await.unwrap();
        assert!(branches.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_message_leaves_no_orphan() {
        let fx = fixture();
        let (root, _) = fx.chat_with_turn("root", ChatType::Direct).await;
        let chats_before = fx.records.chat_count();
        let conversations_before = fx.records.conversation_count();
        let documents_before = fx.contents.document_count();

        let err = fx
            .coordinator
            .create_branch(root.chat_id, Uuid::new_v4(), fx.owner)
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::not_found("Message"));
        assert_eq!(fx.records.chat_count(), chats_before);
        assert_eq!(fx.records.conversation_count(), conversations_before);
        assert_eq!(fx.contents.document_count(), documents_before);
    }

    #[tokio::test]
    async fn test_foreign_parent_is_not_found() {
        let fx = fixture();
        let (root, m1) = fx.chat_with_turn("root", ChatType::Direct).await;
        let chats_before = fx.records.chat_count();

        let err = fx
            .coordinator
            .create_branch(root.chat_id, m1, Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(fx.records.chat_count(), chats_before);
    }

    #[tokio::test]
    async fn test_document_failure_rolls_back_record() {
        let records = Arc::new(InMemoryRecordStore::new());
        let owner = Uuid::new_v4();
        let parent = records
            .create_chat(
                owner,
                NewChat {
                    chat_type: ChatType::Direct,
                    name: "root".to_string(),
                    active: true,
                },
            )
            .await
            .unwrap();

        let mut contents = MockContentStore::new();
        contents
            .expect_create_document()
            .returning(|_, _| Err(StoreError::Transient("content store down".to_string())));
        contents.expect_attach_branch().never();

        let coordinator = BranchCoordinator::new(
            records.clone(),
            Arc::new(contents),
            cache(),
            BranchingConfig::default(),
        );

        let err = coordinator
            .create_branch(parent.chat_id, Uuid::new_v4(), owner)
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(records.chat_count(), 1);
        assert_eq!(
            records.list_chats(owner, Page::default()).await.unwrap()[0].chat_id,
            parent.chat_id
        );
    }

    #[tokio::test]
    async fn test_tree_nests_branches_under_their_parent() {
        let fx = fixture();
        let (root, m1) = fx.chat_with_turn("root", ChatType::Direct).await;

        let b = fx.coordinator.create_branch(root.chat_id, m1, fx.owner).await.unwrap();
        let mb = fx.add_turn(b.chat_id, "deeper").await;
        let c = fx.coordinator.create_branch(b.chat_id, mb, fx.owner).await.unwrap();
        let d = fx.coordinator.create_branch(root.chat_id, m1, fx.owner).await.unwrap();

        let tree = fx.coordinator.get_branch_tree(root.chat_id, fx.owner).await.unwrap();

        assert_eq!(tree.chat_id, root.chat_id);
        assert_eq!(tree.parent_message_id, None);
        assert_eq!(tree.node_count(), 4);

        let child_ids: Vec<Uuid> = tree.children.iter().map(|n| n.chat_id).collect();
        assert_eq!(child_ids, vec![b.chat_id, d.chat_id]);
        assert_eq!(tree.children[0].parent_message_id, Some(m1));

        let grandchild = tree.find(c.chat_id).unwrap();
        assert_eq!(grandchild.parent_message_id, Some(mb));
        assert_eq!(tree.children[0].children[0].chat_id, c.chat_id);
    }

    #[tokio::test]
    async fn test_tree_rooted_at_branch_keeps_its_origin() {
        let fx = fixture();
        let (root, m1) = fx.chat_with_turn("root", ChatType::Direct).await;
        let b = fx.coordinator.create_branch(root.chat_id, m1, fx.owner).await.unwrap();
        let mb = fx.add_turn(b.chat_id, "deeper").await;
        let c = fx.coordinator.create_branch(b.chat_id, mb, fx.owner).await.unwrap();

        let tree = fx.coordinator.get_branch_tree(b.chat_id, fx.owner).await.unwrap();

        assert_eq!(tree.chat_id, b.chat_id);
        assert_eq!(tree.parent_message_id, Some(m1));
        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.children[0].chat_id, c.chat_id);
        assert_eq!(tree.children[0].parent_message_id, Some(mb));
    }

    #[tokio::test]
    async fn test_tree_of_unbranched_chat_is_single_node() {
        let fx = fixture();
        let (root, _) = fx.chat_with_turn("root", ChatType::Direct).await;

        let tree = fx.coordinator.get_branch_tree(root.chat_id, fx.owner).await.unwrap();
        assert_eq!(tree.chat_id, root.chat_id);
        assert!(tree.children.is_empty());
    }

    #[tokio::test]
    async fn test_tree_of_foreign_root_is_not_found() {
        let fx = fixture();
        let (root, _) = fx.chat_with_turn("root", ChatType::Direct).await;

        let err = fx
            .coordinator
            .get_branch_tree(root.chat_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_parent_cycle_is_data_integrity_error() {
        let fx = fixture();
        let (a, m1) = fx.chat_with_turn("a", ChatType::Direct).await;
        let b = fx.coordinator.create_branch(a.chat_id, m1, fx.owner).await.unwrap();

        // rewrite a's document so that a claims to be forked from b
        let mut a_doc = fx.contents.find_document(a.chat_id).await.unwrap().unwrap();
        a_doc.parent_chat_id = Some(b.chat_id);
        a_doc.parent_message_id = Some(Uuid::new_v4());
        fx.contents.insert_raw(a_doc);

        let err = fx
            .coordinator
            .get_branch_tree(a.chat_id, fx.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DataIntegrity(_)));
    }

    #[tokio::test]
    async fn test_tree_deeper_than_limit_is_rejected() {
        let records = Arc::new(InMemoryRecordStore::new());
        let contents = Arc::new(InMemoryContentStore::new());
        let owner = Uuid::new_v4();

        let mut parent: Option<Uuid> = None;
        let mut root = None;
        for depth in 0..4 {
            let chat = records
                .create_chat(
                    owner,
                    NewChat {
                        chat_type: ChatType::Direct,
                        name: format!("level {depth}"),
                        active: true,
                    },
                )
                .await
                .unwrap();
            let origin = parent.map(|parent_chat_id| BranchOrigin {
                parent_chat_id,
                parent_message_id: Uuid::new_v4(),
            });
            contents.create_document(chat.chat_id, origin).await.unwrap();
            root.get_or_insert(chat.chat_id);
            parent = Some(chat.chat_id);
        }

        let coordinator = BranchCoordinator::new(
            records,
            contents,
            cache(),
            BranchingConfig { max_tree_depth: 2 },
        );

        let err = coordinator
            .get_branch_tree(root.unwrap(), owner)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DataIntegrity(_)));
    }

    #[tokio::test]
    async fn test_tree_skips_children_without_record() {
        let fx = fixture();
        let (root, m1) = fx.chat_with_turn("root", ChatType::Direct).await;
        let kept = fx.coordinator.create_branch(root.chat_id, m1, fx.owner).await.unwrap();

        // content for a chat whose record never existed
        fx.contents.insert_raw(ContentDocument::new(
            Uuid::new_v4(),
            Some(BranchOrigin {
                parent_chat_id: root.chat_id,
                parent_message_id: m1,
            }),
        ));

        let tree = fx.coordinator.get_branch_tree(root.chat_id, fx.owner).await.unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].chat_id, kept.chat_id);
    }

    #[tokio::test]
    async fn test_set_active_refreshes_cached_reads() {
        let fx = fixture();
        let (root, m1) = fx.chat_with_turn("root", ChatType::Direct).await;
        let first = fx.coordinator.create_branch(root.chat_id, m1, fx.owner).await.unwrap();
        let second = fx.coordinator.create_branch(root.chat_id, m1, fx.owner).await.unwrap();

        // prime both cached reads
        let cached = fx.coordinator.list_branches(root.chat_id, fx.owner).await.unwrap();
        assert!(cached.iter().all(|c| !c.active));
        fx.coordinator.get_branch_tree(root.chat_id, fx.owner).await.unwrap();

        let activated = fx
            .coordinator
            .set_active_branch(first.chat_id, fx.owner)
            .await
            .unwrap();
        assert!(activated.active);

        let branches = fx.coordinator.list_branches(root.chat_id, fx.owner).await.unwrap();
        let by_id: HashMap<Uuid, bool> = branches.iter().map(|c| (c.chat_id, c.active)).collect();
        assert!(by_id[&first.chat_id]);
        // siblings keep their state
        assert!(!by_id[&second.chat_id]);

        let tree = fx.coordinator.get_branch_tree(root.chat_id, fx.owner).await.unwrap();
        assert!(tree.find(first.chat_id).unwrap().active);
    }

    #[tokio::test]
    async fn test_set_active_on_foreign_branch_is_not_found() {
        let fx = fixture();
        let (root, m1) = fx.chat_with_turn("root", ChatType::Direct).await;
        let branch = fx.coordinator.create_branch(root.chat_id, m1, fx.owner).await.unwrap();

        let err = fx
            .coordinator
            .set_active_branch(branch.chat_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
