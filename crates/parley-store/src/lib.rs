pub mod sqlite;

pub use sqlite::SqliteConversationStore;
