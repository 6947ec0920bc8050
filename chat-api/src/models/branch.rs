use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::records::{ChatRecord, ChatType};

#[derive(Debug, Clone, Deserialize)]
pub struct BranchCreate {
    pub parent_chat_id: Uuid,
    pub message_id: Uuid,
}

/// One chat in a branch tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchNode {
    pub chat_id: Uuid,
    pub name: String,
    pub active: bool,
    pub chat_type: ChatType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<Uuid>,
    #[serde(default)]
    pub children: Vec<BranchNode>,
}

impl BranchNode {
    pub fn from_record(record: &ChatRecord, parent_message_id: Option<Uuid>) -> Self {
        Self {
            chat_id: record.chat_id,
            name: record.name.clone(),
            active: record.active,
            chat_type: record.chat_type,
            created_at: record.created_at,
            updated_at: record.updated_at,
            parent_message_id,
            children: Vec::new(),
        }
    }

    /// Depth-first search for a node by chat id.
    #[cfg(test)]
    pub fn find(&self, chat_id: Uuid) -> Option<&BranchNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.chat_id == chat_id {
                return Some(node);
            }
            stack.extend(node.children.iter());
        }
        None
    }

    #[cfg(test)]
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(BranchNode::node_count).sum::<usize>()
    }
}
