use pluginserver_pdk::{Access, FieldDescriptor, Pdk, Plugin, TypeDescriptor};
use serde::{Deserialize, Serialize};

/// In-process stand-in for a compiled `echo` plugin: one string field and an
/// `access` handler that asks for two headers.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EchoConfig {
    #[serde(default)]
    pub message: String,
}

impl Plugin for EchoConfig {
    fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::record(vec![FieldDescriptor::new(
            "Message",
            TypeDescriptor::String,
        )])
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<(), serde_json::Error> {
        *self = serde_json::from_value(config.clone())?;
        Ok(())
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn as_access(&self) -> Option<&dyn Access> {
        Some(self)
    }
}

impl Access for EchoConfig {
    fn access(&self, kong: &Pdk) {
        let _ = kong.request().get_header("X");
        let _ = kong.request().get_header("Y");
    }
}

pub fn new_echo() -> Box<dyn Plugin> {
    Box::<EchoConfig>::default()
}
