use pluginserver_pdk::{Access, FieldDescriptor, Pdk, Plugin, TypeDescriptor, export_plugin};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EchoConfig {
    #[serde(default)]
    message: String,
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

export_plugin!(EchoConfig, version = "1.2", priority = 10);
