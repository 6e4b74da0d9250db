//! Shared vocabulary for the aegis audit workspace: ids, conversation
//! messages, the reasoning-provider seam and its error taxonomy.

pub mod context;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod stream;
pub mod tokens;
pub mod tools;
