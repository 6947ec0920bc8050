//! Free-form chat content held by the content store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One question/response turn of a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QAPair {
    pub question: String,
    /// Filled in once the answer arrives
    pub response: Option<String>,
    /// Id of the [`Message`](super::records::Message) that asked the question
    pub response_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Chats forked from this turn, in attach order, without duplicates
    #[serde(default)]
    pub branches: Vec<Uuid>,
}

impl QAPair {
    pub fn question(response_id: Uuid, question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            response: None,
            response_id,
            timestamp: Utc::now(),
            branches: Vec::new(),
        }
    }

    /// Returns `false` if the branch was already attached.
    pub fn add_branch(&mut self, chat_id: Uuid) -> bool {
        if self.branches.contains(&chat_id) {
            return false;
        }
        self.branches.push(chat_id);
        true
    }

    pub fn remove_branch(&mut self, chat_id: Uuid) -> bool {
        let before = self.branches.len();
        self.branches.retain(|id| *id != chat_id);
        before != self.branches.len()
    }
}

/// Where a branch was forked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchOrigin {
    pub parent_chat_id: Uuid,
    pub parent_message_id: Uuid,
}

/// The content document of a chat. Root chats carry no origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDocument {
    pub chat_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_chat_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<Uuid>,
    #[serde(default)]
    pub qa_pairs: Vec<QAPair>,
}

impl ContentDocument {
    pub fn new(chat_id: Uuid, origin: Option<BranchOrigin>) -> Self {
        Self {
            chat_id,
            parent_chat_id: origin.map(|o| o.parent_chat_id),
            parent_message_id: origin.map(|o| o.parent_message_id),
            qa_pairs: Vec::new(),
        }
    }

    pub fn origin(&self) -> Option<BranchOrigin> {
        match (self.parent_chat_id, self.parent_message_id) {
            (Some(parent_chat_id), Some(parent_message_id)) => Some(BranchOrigin {
                parent_chat_id,
                parent_message_id,
            }),
            _ => None,
        }
    }

    pub fn pair_mut(&mut self, response_id: Uuid) -> Option<&mut QAPair> {
        self.qa_pairs
            .iter_mut()
            .find(|pair| pair.response_id == response_id)
    }

    /// Branch ids of every turn, in conversational order.
    pub fn branch_ids(&self) -> Vec<Uuid> {
        self.qa_pairs
            .iter()
            .flat_map(|pair| pair.branches.iter().copied())
            .collect()
    }
}
