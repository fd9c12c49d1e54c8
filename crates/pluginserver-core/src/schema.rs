//! Config schema emission.
//!
//! The mapping from descriptors to schema fragments is a closed set; the
//! output is built by hand so field order follows declaration order and two
//! walks of the same descriptor are byte-identical.

use pluginserver_pdk::TypeDescriptor;

/// Emits the gateway schema for one plugin, wrapped as
/// `{"name":<plugin>,"fields":[{"config":<schema>}]}`.
pub fn plugin_schema(name: &str, descriptor: &TypeDescriptor) -> String {
    let mut out = String::new();
    out.push_str("{\"name\":\"");
    out.push_str(name);
    out.push_str("\",\"fields\":[{\"config\":{\"type\":");
    match schema_type(descriptor) {
        Some(fragment) => out.push_str(&fragment),
        None => out.push_str("\"record\",\"fields\":[]"),
    }
    out.push_str("}}]}");
    out
}

fn schema_type(descriptor: &TypeDescriptor) -> Option<String> {
    match descriptor {
        TypeDescriptor::String => Some("\"string\"".to_string()),
        TypeDescriptor::Boolean => Some("\"boolean\"".to_string()),
        TypeDescriptor::Integer => Some("\"integer\"".to_string()),
        TypeDescriptor::Unsigned => {
            Some("\"integer\",\"between\":[0,2147483648]".to_string())
        }
        TypeDescriptor::Number => Some("\"number\"".to_string()),
        TypeDescriptor::Array(elements) => {
            let elements = schema_type(elements)?;
            Some(format!("\"array\",\"elements\":{{\"type\":{elements}}}"))
        }
        TypeDescriptor::Map { keys, values } => {
            let keys = schema_type(keys)?;
            let values = schema_type(values)?;
            Some(format!(
                "\"map\",\"keys\":{{\"type\":{keys}}},\"values\":{{\"type\":{values}}}"
            ))
        }
        TypeDescriptor::Record(fields) => {
            let mut out = String::from("\"record\",\"fields\":[");
            let mut first = true;
            for field in fields {
                // Unrepresentable field types are silently omitted.
                let Some(ty) = schema_type(&field.ty) else {
                    continue;
                };
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str("{\"");
                out.push_str(&field.schema_name());
                out.push_str("\":{\"type\":");
                out.push_str(&ty);
                out.push_str("}}");
            }
            out.push(']');
            Some(out)
        }
        TypeDescriptor::Opaque => None,
    }
}

#[cfg(test)]
mod tests {
    use pluginserver_pdk::{FieldDescriptor, TypeDescriptor};

    use super::plugin_schema;

    fn echo_descriptor() -> TypeDescriptor {
        TypeDescriptor::record(vec![FieldDescriptor::new(
            "Message",
            TypeDescriptor::String,
        )])
    }

    #[test]
    fn record_with_one_string_field() {
        assert_eq!(
            plugin_schema("echo", &echo_descriptor()),
            r#"{"name":"echo","fields":[{"config":{"type":"record","fields":[{"message":{"type":"string"}}]}}]}"#
        );
    }

    #[test]
    fn every_scalar_fragment() {
        let descriptor = TypeDescriptor::record(vec![
            FieldDescriptor::new("S", TypeDescriptor::String),
            FieldDescriptor::new("B", TypeDescriptor::Boolean),
            FieldDescriptor::new("I", TypeDescriptor::Integer),
            FieldDescriptor::new("U", TypeDescriptor::Unsigned),
            FieldDescriptor::new("F", TypeDescriptor::Number),
        ]);
        assert_eq!(
            plugin_schema("kinds", &descriptor),
            concat!(
                r#"{"name":"kinds","fields":[{"config":{"type":"record","fields":["#,
                r#"{"s":{"type":"string"}},"#,
                r#"{"b":{"type":"boolean"}},"#,
                r#"{"i":{"type":"integer"}},"#,
                r#"{"u":{"type":"integer","between":[0,2147483648]}},"#,
                r#"{"f":{"type":"number"}}"#,
                r#"]}}]}"#,
            )
        );
    }

    #[test]
    fn arrays_maps_and_nested_records() {
        let descriptor = TypeDescriptor::record(vec![
            FieldDescriptor::new(
                "Tags",
                TypeDescriptor::array(TypeDescriptor::String),
            ),
            FieldDescriptor::new(
                "Limits",
                TypeDescriptor::map(TypeDescriptor::String, TypeDescriptor::Integer),
            ),
            FieldDescriptor::new(
                "Inner",
                TypeDescriptor::record(vec![FieldDescriptor::new(
                    "Flag",
                    TypeDescriptor::Boolean,
                )]),
            ),
        ]);
        assert_eq!(
            plugin_schema("nested", &descriptor),
            concat!(
                r#"{"name":"nested","fields":[{"config":{"type":"record","fields":["#,
                r#"{"tags":{"type":"array","elements":{"type":"string"}}},"#,
                r#"{"limits":{"type":"map","keys":{"type":"string"},"values":{"type":"integer"}}},"#,
                r#"{"inner":{"type":"record","fields":[{"flag":{"type":"boolean"}}]}}"#,
                r#"]}}]}"#,
            )
        );
    }

    #[test]
    fn renamed_and_opaque_fields() {
        let descriptor = TypeDescriptor::record(vec![
            FieldDescriptor::new("Skipped", TypeDescriptor::Opaque),
            FieldDescriptor::renamed("MaxSize", "max_size", TypeDescriptor::Unsigned),
        ]);
        assert_eq!(
            plugin_schema("partial", &descriptor),
            concat!(
                r#"{"name":"partial","fields":[{"config":{"type":"record","fields":["#,
                r#"{"max_size":{"type":"integer","between":[0,2147483648]}}"#,
                r#"]}}]}"#,
            )
        );
    }

    #[test]
    fn emission_is_deterministic() {
        let descriptor = echo_descriptor();
        assert_eq!(
            plugin_schema("echo", &descriptor),
            plugin_schema("echo", &descriptor)
        );
    }
}
