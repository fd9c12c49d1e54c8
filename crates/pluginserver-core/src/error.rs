use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced across the RPC boundary. All are recoverable at the
/// call level: the dispatcher marshals them into an error reply and keeps
/// the connection open.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open plugin {name}: {details}")]
    PluginLoad { name: String, details: String },

    #[error("no plugin instance {id}")]
    NoSuchInstance { id: i32 },

    #[error("no running event {id}")]
    NoSuchEvent { id: i32 },

    #[error("undefined method {event} on plugin {plugin}")]
    UnknownPhase { plugin: String, event: String },

    #[error("decoding config for plugin {name}: {source}")]
    ConfigDecode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("bad request")]
    BadRequest,
}

impl Error {
    pub fn plugin_load(name: impl Into<String>, details: impl Into<String>) -> Error {
        Error::PluginLoad {
            name: name.into(),
            details: details.into(),
        }
    }

    pub fn unknown_phase(plugin: impl Into<String>, event: impl Into<String>) -> Error {
        Error::UnknownPhase {
            plugin: plugin.into(),
            event: event.into(),
        }
    }
}
