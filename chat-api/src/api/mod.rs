pub mod auth;
pub mod branches;
pub mod chats;
pub mod conversations;
mod extract;
pub mod messages;
pub mod stats;
pub mod users;
