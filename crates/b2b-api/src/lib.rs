pub mod attachments;
pub mod conversations;
pub mod directory;
pub mod error;
pub mod files;
pub mod messages;
pub mod messaging;
pub mod middleware;
pub mod participants;
pub mod routes;
pub mod state;
