pub mod branch;
pub mod content;
pub mod error;
pub mod records;
pub mod requests;
