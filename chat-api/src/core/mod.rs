pub mod accounts;
pub mod auth;
pub mod branching;
pub mod cache;
pub mod chats;
pub mod config;
pub mod retry;
pub mod storage;
