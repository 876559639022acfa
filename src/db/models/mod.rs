pub mod mapping;

pub use mapping::{AccountMapping, ChatUserId};
