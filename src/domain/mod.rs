mod abort;
mod message;
mod order;
mod pending;
mod thread_index;
mod types;
mod unread;
mod view_cache;

pub use abort::*;
pub use message::*;
pub use order::*;
pub use pending::*;
pub use thread_index::*;
pub use types::*;
pub use unread::*;
pub use view_cache::*;
