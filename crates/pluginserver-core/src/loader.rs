use std::path::{Path, PathBuf};
use std::time::SystemTime;

use libloading::{Library, Symbol};
use parking_lot::Mutex;
use pluginserver_pdk::{
    NEW_SYMBOL, PRIORITY_SYMBOL, Phase, Plugin, PluginConstructor, PluginPriorityFn,
    PluginVersionFn, VERSION_SYMBOL,
};
use pluginserver_protocol::PluginInfo;
use tracing::info;

use crate::error::{Error, Result};
use crate::schema::plugin_schema;

pub fn dynamic_library_ext() -> &'static str {
    match std::env::consts::OS {
        "windows" => "dll",
        "macos" => "dylib",
        _ => "so",
    }
}

pub fn artifact_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{}", dynamic_library_ext()))
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PluginTimes {
    pub last_start_instance: Option<SystemTime>,
    pub last_close_instance: Option<SystemTime>,
}

/// A loaded plugin artifact. Stable while the process runs; never evicted.
pub struct PluginData {
    name: String,
    path: PathBuf,
    modified_at: SystemTime,
    loaded_at: SystemTime,
    constructor: PluginConstructor,
    /// Cached config value used for schema and capability introspection.
    prototype: Box<dyn Plugin>,
    version: Option<String>,
    priority: Option<i32>,
    pub(crate) times: Mutex<PluginTimes>,
    /// Keeps the resolved symbols valid. `None` for in-process plugins.
    _library: Option<Library>,
}

impl PluginData {
    /// Opens `<dir>/<name>.<ext>` and resolves its exported symbols. A
    /// failure at any step reports a plugin-loading error and nothing is
    /// cached.
    pub fn open(dir: &Path, name: &str) -> Result<PluginData> {
        let path = artifact_path(dir, name);
        let modified_at = std::fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .map_err(|error| Error::plugin_load(name, format!("{}: {error}", path.display())))?;

        // SAFETY: loading a plugin artifact runs its library initializers;
        // plugins are trusted code in this process by design.
        let library = unsafe { Library::new(&path) }
            .map_err(|error| Error::plugin_load(name, format!("{}: {error}", path.display())))?;

        // SAFETY: the symbol type matches the exported constructor contract.
        let constructor = unsafe {
            let symbol: Symbol<'_, PluginConstructor> =
                library.get(NEW_SYMBOL).map_err(|error| {
                    Error::plugin_load(name, format!("no constructor function: {error}"))
                })?;
            *symbol
        };

        // SAFETY: optional symbols; same ABI contract as the constructor.
        let version = unsafe {
            library
                .get::<PluginVersionFn>(VERSION_SYMBOL)
                .ok()
                .map(|symbol| (*symbol)().to_string())
        };
        // SAFETY: see above.
        let priority = unsafe {
            library
                .get::<PluginPriorityFn>(PRIORITY_SYMBOL)
                .ok()
                .map(|symbol| (*symbol)())
        };

        let prototype = constructor();
        info!(plugin = %name, path = %path.display(), "loaded plugin");

        Ok(PluginData {
            name: name.to_string(),
            path,
            modified_at,
            loaded_at: SystemTime::now(),
            constructor,
            prototype,
            version,
            priority,
            times: Mutex::new(PluginTimes::default()),
            _library: Some(library),
        })
    }

    /// Builds plugin data around an in-process constructor, bypassing the
    /// dynamic loader. Test seam; the artifact path and modification time
    /// are synthetic.
    #[cfg(test)]
    pub(crate) fn in_process(name: &str, constructor: PluginConstructor) -> PluginData {
        PluginData {
            name: name.to_string(),
            path: PathBuf::from(format!("{name}.{}", dynamic_library_ext())),
            modified_at: SystemTime::now(),
            loaded_at: SystemTime::now(),
            constructor,
            prototype: constructor(),
            version: None,
            priority: None,
            times: Mutex::new(PluginTimes::default()),
            _library: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified_at(&self) -> SystemTime {
        self.modified_at
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// A fresh config value with the plugin's defaults.
    pub fn construct(&self) -> Box<dyn Plugin> {
        (self.constructor)()
    }

    /// Phases the prototype config value exposes, in canonical order.
    pub fn phases(&self) -> Vec<Phase> {
        detect_phases(self.prototype.as_ref())
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            phases: self
                .phases()
                .into_iter()
                .map(|phase| phase.name().to_string())
                .collect(),
            version: self.version.clone().unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            schema: plugin_schema(&self.name, &self.prototype.descriptor()),
        }
    }
}

/// Probes a config value for each known phase capability. A phase is
/// present iff its accessor returns a handler; anything else is silent.
pub(crate) fn detect_phases(config: &dyn Plugin) -> Vec<Phase> {
    Phase::ALL
        .into_iter()
        .filter(|phase| has_phase(config, *phase))
        .collect()
}

pub(crate) fn has_phase(config: &dyn Plugin, phase: Phase) -> bool {
    match phase {
        Phase::Certificate => config.as_certificate().is_some(),
        Phase::Rewrite => config.as_rewrite().is_some(),
        Phase::Access => config.as_access().is_some(),
        Phase::HeaderFilter => config.as_header_filter().is_some(),
        Phase::BodyFilter => config.as_body_filter().is_some(),
        Phase::Preread => config.as_preread().is_some(),
        Phase::Log => config.as_log().is_some(),
    }
}
