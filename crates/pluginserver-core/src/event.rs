use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use pluginserver_pdk::{Pdk, PdkData};
use tracing::debug;

use crate::instance::{InstanceData, PhaseHandler};
use crate::server::PluginServer;

/// One in-flight invocation of a phase handler.
///
/// The channel is unbuffered: every send blocks until a matching receive,
/// which is what serializes host and plugin control. Both ends hold clones
/// of both sides, so the channel stays connected for the event's lifetime.
pub(crate) struct EventData {
    pub(crate) id: i32,
    pub(crate) instance: Arc<InstanceData>,
    pub(crate) tx: Sender<PdkData>,
    pub(crate) rx: Receiver<PdkData>,
}

/// Runs the handler on its own thread.
///
/// The thread first receives the kickstart token, guaranteeing the handler
/// only begins after the event is visible in the events table. Once the
/// handler returns (or panics), the completion value is sent as the final
/// rendezvous and the event is retired.
pub(crate) fn spawn_handler(
    server: Arc<PluginServer>,
    event: Arc<EventData>,
    handler: PhaseHandler,
) {
    thread::spawn(move || {
        let _ = event.rx.recv();

        let pdk = Pdk::new(event.tx.clone(), event.rx.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&pdk)));
        let done = match outcome {
            Ok(()) => PdkData::Ret,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                debug!(event = event.id, %message, "handler panicked");
                PdkData::Error(message)
            }
        };

        // Retire the event before the final send so a host that has seen the
        // completion value can no longer find the id.
        server.finish_event(&event);
        let _ = event.tx.send(done);
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
