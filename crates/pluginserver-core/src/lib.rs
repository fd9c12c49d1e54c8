//! Standalone RPC server core that runs compiled gateway plugins.
//!
//! The server loads plugins from shared objects, materializes per-request
//! state as instances and events, and mediates the callback conversation
//! between each plugin handler and the gateway over a framed Unix-socket
//! RPC.

mod dispatch;
mod error;
mod event;
mod instance;
mod loader;
mod schema;
mod server;

pub use dispatch::serve;
pub use error::{Error, Result};
pub use loader::{PluginData, artifact_path, dynamic_library_ext};
pub use schema::plugin_schema;
pub use server::{INSTANCE_TIMEOUT, PluginServer, ServerConfig};
