use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use pluginserver_pdk::{Pdk, Phase, Plugin};

use crate::loader::{PluginData, has_phase};

/// A handler bound to one instance's config value.
pub(crate) type PhaseHandler = Arc<dyn Fn(&Pdk) + Send + Sync>;

/// A live binding of a plugin to a decoded configuration.
///
/// The instance outlives its presence in the instance table: events hold an
/// `Arc` to it, so a close or eviction never invalidates a running handler.
pub struct InstanceData {
    pub(crate) id: i32,
    pub(crate) plugin: Arc<PluginData>,
    pub(crate) config: Arc<dyn Plugin>,
    pub(crate) handlers: HashMap<Phase, PhaseHandler>,
    pub(crate) start_time: SystemTime,
    pub(crate) last_event: Mutex<SystemTime>,
}

impl InstanceData {
    pub(crate) fn new(plugin: Arc<PluginData>, config: Arc<dyn Plugin>) -> InstanceData {
        let handlers = phase_handlers(&config);
        let start_time = SystemTime::now();
        InstanceData {
            id: 0,
            plugin,
            config,
            handlers,
            start_time,
            last_event: Mutex::new(start_time),
        }
    }

    pub(crate) fn handler(&self, phase: Phase) -> Option<PhaseHandler> {
        self.handlers.get(&phase).cloned()
    }
}

/// Collects the capability map at instance construction: one closure per
/// phase the config value exposes, each owning a reference to the config.
fn phase_handlers(config: &Arc<dyn Plugin>) -> HashMap<Phase, PhaseHandler> {
    let mut handlers = HashMap::new();
    for phase in Phase::ALL {
        if !has_phase(config.as_ref(), phase) {
            continue;
        }
        let config = Arc::clone(config);
        let handler: PhaseHandler = Arc::new(move |pdk: &Pdk| dispatch_phase(config.as_ref(), phase, pdk));
        handlers.insert(phase, handler);
    }
    handlers
}

fn dispatch_phase(config: &dyn Plugin, phase: Phase, pdk: &Pdk) {
    match phase {
        Phase::Certificate => {
            if let Some(handler) = config.as_certificate() {
                handler.certificate(pdk);
            }
        }
        Phase::Rewrite => {
            if let Some(handler) = config.as_rewrite() {
                handler.rewrite(pdk);
            }
        }
        Phase::Access => {
            if let Some(handler) = config.as_access() {
                handler.access(pdk);
            }
        }
        Phase::HeaderFilter => {
            if let Some(handler) = config.as_header_filter() {
                handler.header_filter(pdk);
            }
        }
        Phase::BodyFilter => {
            if let Some(handler) = config.as_body_filter() {
                handler.body_filter(pdk);
            }
        }
        Phase::Preread => {
            if let Some(handler) = config.as_preread() {
                handler.preread(pdk);
            }
        }
        Phase::Log => {
            if let Some(handler) = config.as_log() {
                handler.log(pdk);
            }
        }
    }
}
