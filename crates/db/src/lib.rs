pub mod attachments;
pub mod connection;
pub mod migrations;
pub mod repositories;

pub use attachments::{AttachmentFiles, SqlAttachmentStore};
pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
