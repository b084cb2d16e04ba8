pub mod client;
pub mod project;
pub mod related;
pub mod tag;
pub mod task;
pub mod time_entry;
pub mod workspace;

pub use client::Client;
pub use project::Project;
pub use related::RelatedData;
pub use tag::Tag;
pub use task::Task;
pub use time_entry::TimeEntry;
pub use workspace::Workspace;
