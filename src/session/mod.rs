pub mod manager;
pub mod store;

pub use manager::{SessionInfo, SessionManager};
pub use store::{InMemorySessionStore, Publisher, RedisSessionStore, SessionStore};
