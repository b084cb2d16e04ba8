pub mod api_client;
pub mod context;
pub mod database;
pub mod domain;
pub mod error;
pub mod format;
pub mod session;
pub mod settings;
pub mod stream;
pub mod sync;
pub mod view;

pub use context::{Callbacks, Context};
pub use error::{is_networking_error, EngineError};
pub use format::parse_duration as parse_duration_string_into_seconds;
