use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread;

use pluginserver_protocol::{Call, ProtoError, Return, RpcCall, RpcReturn, read_frame, write_frame};
use tracing::{debug, warn};

use crate::error::Error;
use crate::server::PluginServer;

/// Accepts connections until the listener fails, serving each on its own
/// thread.
pub fn serve(listener: UnixListener, server: Arc<PluginServer>) {
    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let server = Arc::clone(&server);
                thread::spawn(move || serve_connection(stream, server));
            }
            Err(error) => {
                warn!(%error, "accept failed");
                return;
            }
        }
    }
}

/// Reads one framed call at a time and writes one reply. Calls on a single
/// connection are strictly serial. Core-operation failures become error
/// replies; only framing or socket errors end the connection.
fn serve_connection(mut stream: UnixStream, server: Arc<PluginServer>) {
    loop {
        let call: RpcCall = match read_frame(&mut stream) {
            Ok(call) => call,
            Err(ProtoError::Postcard(error)) => {
                // The frame was consumed, so the stream is still aligned;
                // answer with an error and keep serving.
                debug!(%error, "undecodable call payload");
                let reply = RpcReturn {
                    sequence: 0,
                    ret: Return::Error {
                        message: Error::BadRequest.to_string(),
                    },
                };
                if write_frame(&mut stream, &reply).is_err() {
                    break;
                }
                continue;
            }
            Err(error) => {
                if !error.is_eof() {
                    warn!(%error, "rpc read failed");
                }
                break;
            }
        };

        let reply = RpcReturn {
            sequence: call.sequence,
            ret: dispatch_call(call.call, &server),
        };
        if let Err(error) = write_frame(&mut stream, &reply) {
            warn!(%error, "rpc write failed");
            break;
        }
    }
}

fn dispatch_call(call: Call, server: &Arc<PluginServer>) -> Return {
    let result = match call {
        Call::GetPluginNames => Ok(Return::PluginNames(server.plugin_names())),
        Call::GetPluginInfo { name } => server.plugin_info(&name).map(Return::PluginInfo),
        Call::StartInstance { name, config } => server
            .start_instance(&name, &config)
            .map(Return::InstanceStatus),
        Call::GetInstanceStatus { instance_id } => server
            .instance_status(instance_id)
            .map(Return::InstanceStatus),
        Call::CloseInstance { instance_id } => server
            .close_instance(instance_id)
            .map(Return::InstanceStatus),
        Call::HandleEvent {
            instance_id,
            event_name,
        } => server
            .handle_event(instance_id, &event_name)
            .map(Return::StepData),
        Call::Step { data } => server.step(data).map(Return::StepData),
        Call::StepError { event_id, error } => {
            server.step_error(event_id, error).map(Return::StepData)
        }
        Call::StepCredential { event_id, data } => server
            .step_credential(event_id, data)
            .map(Return::StepData),
        Call::StepRoute { event_id, data } => {
            server.step_route(event_id, data).map(Return::StepData)
        }
        Call::StepService { event_id, data } => {
            server.step_service(event_id, data).map(Return::StepData)
        }
        Call::StepConsumer { event_id, data } => {
            server.step_consumer(event_id, data).map(Return::StepData)
        }
        Call::StepMemoryStats { event_id, data } => server
            .step_memory_stats(event_id, data)
            .map(Return::StepData),
        Call::GetStatus => Ok(Return::ServerStatus(server.status())),
    };

    result.unwrap_or_else(|error| Return::Error {
        message: error.to_string(),
    })
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
