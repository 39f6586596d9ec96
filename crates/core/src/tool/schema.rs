//! Argument validation against tool parameter schemas.
//!
//! Only the subset of JSON Schema that tool parameter definitions use is
//! understood: `type` (single or union), `properties`, `required`,
//! `additionalProperties: false`, `items`, `enum`, `const`, `anyOf`/`oneOf`
//! and local `$ref`s into `$defs` or `definitions`. Unknown keywords are
//! ignored, so a schema the validator does not understand accepts rather
//! than rejects.

use serde_json::{Map, Value};

/// Checks `args` against `schema`, returning a message naming the first
/// offending location.
pub fn validate(schema: &Value, args: &Value) -> Result<(), String> {
    Validator { root: schema }.check(schema, args, "arguments")
}

struct Validator<'a> {
    root: &'a Value,
}

impl<'a> Validator<'a> {
    fn check(
        &self,
        schema: &'a Value,
        value: &Value,
        path: &str,
    ) -> Result<(), String> {
        let schema = match schema {
            Value::Bool(true) => return Ok(()),
            Value::Bool(false) => {
                return Err(format!("{path}: no value is allowed here"));
            }
            Value::Object(schema) => schema,
            _ => return Ok(()),
        };

        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            let Some(target) = self.resolve(reference) else {
                return Err(format!("{path}: unresolvable schema `{reference}`"));
            };
            return self.check(target, value, path);
        }

        for keyword in ["anyOf", "oneOf"] {
            if let Some(branches) = schema.get(keyword).and_then(Value::as_array)
            {
                let matched = branches
                    .iter()
                    .any(|branch| self.check(branch, value, path).is_ok());
                if !matched {
                    return Err(format!(
                        "{path}: {} does not match any allowed shape",
                        describe(value)
                    ));
                }
            }
        }

        if let Some(ty) = schema.get("type") {
            let allowed: Vec<&str> = match ty {
                Value::String(ty) => vec![ty.as_str()],
                Value::Array(tys) => tys.iter().filter_map(Value::as_str).collect(),
                _ => vec![],
            };
            if !allowed.is_empty()
                && !allowed.iter().any(|ty| type_matches(ty, value))
            {
                return Err(format!(
                    "{path}: expected {}, found {}",
                    allowed.join(" or "),
                    describe(value)
                ));
            }
        }

        if let Some(options) = schema.get("enum").and_then(Value::as_array) {
            if !options.contains(value) {
                let options: Vec<String> =
                    options.iter().map(Value::to_string).collect();
                return Err(format!(
                    "{path}: {value} is not one of {}",
                    options.join(", ")
                ));
            }
        }

        if let Some(expected) = schema.get("const") {
            if expected != value {
                return Err(format!("{path}: expected {expected}, found {value}"));
            }
        }

        match value {
            Value::Object(object) => self.check_object(schema, object, path),
            Value::Array(items) => {
                let Some(item_schema) = schema.get("items") else {
                    return Ok(());
                };
                for (idx, item) in items.iter().enumerate() {
                    self.check(item_schema, item, &format!("{path}[{idx}]"))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_object(
        &self,
        schema: &'a Map<String, Value>,
        object: &Map<String, Value>,
        path: &str,
    ) -> Result<(), String> {
        if let Some(required) = schema.get("required").and_then(Value::as_array)
        {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    return Err(format!(
                        "{path}: missing required property `{name}`"
                    ));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
        for (name, value) in object {
            match properties.and_then(|props| props.get(name)) {
                Some(prop_schema) => {
                    self.check(prop_schema, value, &format!("{path}.{name}"))?
                }
                None if closed => {
                    return Err(format!("{path}: unexpected property `{name}`"));
                }
                None => {}
            }
        }
        Ok(())
    }

    fn resolve(&self, reference: &str) -> Option<&'a Value> {
        let pointer = reference.strip_prefix('#')?;
        self.root.pointer(pointer)
    }
}

fn type_matches(ty: &str, value: &Value) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|n| n.fract() == 0.0)
        }
        _ => true,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
