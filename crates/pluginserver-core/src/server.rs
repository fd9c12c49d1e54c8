use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use pluginserver_pdk::{
    AuthenticatedCredential, Consumer, MemoryStats, PdkData, Phase, Route, Service,
};
use pluginserver_protocol::{
    InstanceStatus, InstanceSummary, PluginInfo, PluginStatus, ServerStatus, StepData,
};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::event::{self, EventData};
use crate::instance::InstanceData;
use crate::loader::{self, PluginData};

/// Default age cutoff for instance eviction.
pub const INSTANCE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory searched for plugin shared objects.
    pub plugins_dir: PathBuf,
    /// Age cutoff for instance eviction.
    pub instance_timeout: Duration,
}

impl ServerConfig {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> ServerConfig {
        ServerConfig {
            plugins_dir: plugins_dir.into(),
            instance_timeout: INSTANCE_TIMEOUT,
        }
    }
}

#[derive(Default)]
struct ServerState {
    plugins: HashMap<String, Arc<PluginData>>,
    instances: HashMap<i32, Arc<InstanceData>>,
    events: HashMap<i32, Arc<EventData>>,
    next_instance_id: i32,
    next_event_id: i32,
}

/// Holds the execution state of the plugin server: the plugin cache and the
/// two id-keyed registries behind one reader/writer lock.
///
/// The writer side is held only while mutating the tables, never across
/// plugin code or channel operations.
pub struct PluginServer {
    config: ServerConfig,
    state: RwLock<ServerState>,
}

impl PluginServer {
    pub fn new(config: ServerConfig) -> PluginServer {
        PluginServer {
            config,
            state: RwLock::new(ServerState::default()),
        }
    }

    /// Names of every plugin artifact in the plugins directory, sorted.
    pub fn plugin_names(&self) -> Vec<String> {
        let ext = loader::dynamic_library_ext();
        let Ok(entries) = std::fs::read_dir(&self.config.plugins_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|value| value.to_str()) == Some(ext))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|value| value.to_str())
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }

    /// Loads and reports on one plugin artifact.
    pub fn plugin_info(&self, name: &str) -> Result<PluginInfo> {
        Ok(self.load_plugin(name)?.info())
    }

    /// Starts a plugin instance from configuration data. More than one
    /// instance can run for a single plugin; a config change means starting
    /// a new instance and closing the old one.
    pub fn start_instance(&self, name: &str, config: &[u8]) -> Result<InstanceStatus> {
        let plugin = self.load_plugin(name)?;

        let value: serde_json::Value =
            serde_json::from_slice(config).map_err(|source| Error::ConfigDecode {
                name: name.to_string(),
                source,
            })?;
        let mut instance_config = plugin.construct();
        instance_config
            .configure(&value)
            .map_err(|source| Error::ConfigDecode {
                name: name.to_string(),
                source,
            })?;

        let mut instance = InstanceData::new(Arc::clone(&plugin), Arc::from(instance_config));
        let status = {
            let mut state = self.state.write();
            instance.id = state.next_instance_id;
            state.next_instance_id += 1;
            let instance = Arc::new(instance);
            state.instances.insert(instance.id, Arc::clone(&instance));
            plugin.times.lock().last_start_instance = Some(instance.start_time);
            self.expire_instances(&mut state);
            instance_status_of(&instance)
        };

        info!(plugin = %name, instance = status.instance_id, "started instance");
        Ok(status)
    }

    /// Returns a given instance's status (the same given when started).
    pub fn instance_status(&self, id: i32) -> Result<InstanceStatus> {
        let instance = self
            .state
            .read()
            .instances
            .get(&id)
            .cloned()
            .ok_or(Error::NoSuchInstance { id })?;
        Ok(instance_status_of(&instance))
    }

    /// Removes an instance from the table. Running events are not killed:
    /// they hold their own reference and complete normally, but no new event
    /// can start against this id. Returns the status just before closing.
    pub fn close_instance(&self, id: i32) -> Result<InstanceStatus> {
        let instance = self
            .state
            .read()
            .instances
            .get(&id)
            .cloned()
            .ok_or(Error::NoSuchInstance { id })?;
        let status = instance_status_of(&instance);

        {
            let mut state = self.state.write();
            instance.plugin.times.lock().last_close_instance = Some(SystemTime::now());
            state.instances.remove(&id);
            self.expire_instances(&mut state);
        }

        info!(plugin = %instance.plugin.name(), instance = id, "closed instance");
        Ok(status)
    }

    /// Starts the call/{callback/response}*/finish cycle for one event.
    ///
    /// The reply carries the handler's first callback request, or the
    /// completion sentinel if the handler returned without calling the PDK.
    /// More than one event can run concurrently against one instance; they
    /// all share the same config value.
    pub fn handle_event(self: &Arc<Self>, instance_id: i32, event_name: &str) -> Result<StepData> {
        let instance = self
            .state
            .read()
            .instances
            .get(&instance_id)
            .cloned()
            .ok_or(Error::NoSuchInstance { id: instance_id })?;

        let handler = Phase::from_name(event_name)
            .and_then(|phase| instance.handler(phase))
            .ok_or_else(|| Error::unknown_phase(instance.plugin.name(), event_name))?;

        let (tx, rx) = crossbeam_channel::bounded::<PdkData>(0);
        let event = {
            let mut state = self.state.write();
            let id = state.next_event_id;
            state.next_event_id += 1;
            let event = Arc::new(EventData {
                id,
                instance: Arc::clone(&instance),
                tx,
                rx,
            });
            state.events.insert(id, Arc::clone(&event));
            event
        };

        event::spawn_handler(Arc::clone(self), Arc::clone(&event), handler);

        // Kickstart: rendezvous with the handler task's initial receive, then
        // wait for its first yield.
        let _ = event.tx.send(PdkData::Run);
        let first = event
            .rx
            .recv()
            .unwrap_or_else(|_| PdkData::Error("event channel closed".to_string()));
        Ok(StepData {
            event_id: event.id,
            data: first,
        })
    }

    /// Carries a callback's answer back to the plugin; the reply is either
    /// the next callback request or the completion sentinel.
    pub fn step(&self, input: StepData) -> Result<StepData> {
        let event = self
            .state
            .read()
            .events
            .get(&input.event_id)
            .cloned()
            .ok_or(Error::NoSuchEvent { id: input.event_id })?;

        let _ = event.tx.send(input.data);
        let next = event
            .rx
            .recv()
            .unwrap_or_else(|_| PdkData::Error("event channel closed".to_string()));
        Ok(StepData {
            event_id: event.id,
            data: next,
        })
    }

    pub fn step_error(&self, event_id: i32, error: String) -> Result<StepData> {
        self.step(StepData {
            event_id,
            data: PdkData::Error(error),
        })
    }

    pub fn step_credential(
        &self,
        event_id: i32,
        data: AuthenticatedCredential,
    ) -> Result<StepData> {
        self.step(StepData {
            event_id,
            data: PdkData::Credential(data),
        })
    }

    pub fn step_route(&self, event_id: i32, data: Route) -> Result<StepData> {
        self.step(StepData {
            event_id,
            data: PdkData::Route(data),
        })
    }

    pub fn step_service(&self, event_id: i32, data: Service) -> Result<StepData> {
        self.step(StepData {
            event_id,
            data: PdkData::Service(data),
        })
    }

    pub fn step_consumer(&self, event_id: i32, data: Consumer) -> Result<StepData> {
        self.step(StepData {
            event_id,
            data: PdkData::Consumer(data),
        })
    }

    pub fn step_memory_stats(&self, event_id: i32, data: MemoryStats) -> Result<StepData> {
        self.step(StepData {
            event_id,
            data: PdkData::MemoryStats(data),
        })
    }

    /// Process pid plus per-plugin diagnostics, under the read lock.
    pub fn status(&self) -> ServerStatus {
        let state = self.state.read();
        let mut plugins: Vec<PluginStatus> = state
            .plugins
            .values()
            .map(|plugin| {
                let times = *plugin.times.lock();
                let mut instances: Vec<InstanceSummary> = state
                    .instances
                    .values()
                    .filter(|instance| Arc::ptr_eq(&instance.plugin, plugin))
                    .map(|instance| InstanceSummary {
                        instance_id: instance.id,
                        started_at: unix_seconds(instance.start_time),
                    })
                    .collect();
                instances.sort_by_key(|summary| summary.instance_id);
                PluginStatus {
                    name: plugin.name().to_string(),
                    modified_at: unix_seconds(plugin.modified_at()),
                    loaded_at: unix_seconds(plugin.loaded_at()),
                    last_start_instance: times
                        .last_start_instance
                        .map(unix_seconds)
                        .unwrap_or_default(),
                    last_close_instance: times
                        .last_close_instance
                        .map(unix_seconds)
                        .unwrap_or_default(),
                    instances,
                }
            })
            .collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        ServerStatus {
            pid: std::process::id(),
            plugins,
        }
    }

    /// Stamps the owning instance and removes a finished event, under the
    /// writer lock.
    pub(crate) fn finish_event(&self, event: &EventData) {
        let mut state = self.state.write();
        *event.instance.last_event.lock() = SystemTime::now();
        state.events.remove(&event.id);
        debug!(event = event.id, "event finished");
    }

    /// Loads a plugin on first demand and caches it by name.
    fn load_plugin(&self, name: &str) -> Result<Arc<PluginData>> {
        if let Some(plugin) = self.state.read().plugins.get(name) {
            return Ok(Arc::clone(plugin));
        }

        let plugin = Arc::new(PluginData::open(&self.config.plugins_dir, name)?);

        let mut state = self.state.write();
        let entry = state.plugins.entry(name.to_string()).or_insert(plugin);
        Ok(Arc::clone(entry))
    }

    /// Removes every instance whose start and last-event times are both
    /// older than the cutoff, except instances that still own a live event.
    /// Coarse by design; callers wanting deterministic cleanup close
    /// instances explicitly.
    fn expire_instances(&self, state: &mut ServerState) {
        let Some(cutoff) = SystemTime::now().checked_sub(self.config.instance_timeout) else {
            return;
        };

        let mut expired: HashSet<i32> = state
            .instances
            .iter()
            .filter(|(_, instance)| {
                instance.start_time < cutoff && *instance.last_event.lock() < cutoff
            })
            .map(|(id, _)| *id)
            .collect();

        for event in state.events.values() {
            expired.remove(&event.instance.id);
        }

        for id in expired {
            if let Some(instance) = state.instances.remove(&id) {
                info!(plugin = %instance.plugin.name(), instance = id, "closing expired instance");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn register_plugin(&self, plugin: PluginData) {
        self.state
            .write()
            .plugins
            .insert(plugin.name().to_string(), Arc::new(plugin));
    }

    #[cfg(test)]
    pub(crate) fn live_event_count(&self) -> usize {
        self.state.read().events.len()
    }
}

fn instance_status_of(instance: &InstanceData) -> InstanceStatus {
    InstanceStatus {
        name: instance.plugin.name().to_string(),
        instance_id: instance.id,
        config: serde_json::to_string(&instance.config.config())
            .unwrap_or_else(|_| "null".to_string()),
        started_at: unix_seconds(instance.start_time),
    }
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
#[path = "tests/server_tests.rs"]
mod tests;
