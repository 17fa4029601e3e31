mod api;
mod logging;
mod preferences;
mod stream;

pub use api::*;
pub use logging::*;
pub use preferences::*;
pub use stream::*;
