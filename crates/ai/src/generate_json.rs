use anyhow::anyhow;
use async_openai::{
  Client,
  config::OpenAIConfig,
  types::chat::{
    ChatCompletionRequestMessage, CreateChatCompletionRequestArgs, ResponseFormat,
    ResponseFormatJsonSchema,
  },
};
use atomem_shared::APP_ENV;
use schemars::JsonSchema;
use serde_json::{Map, Value};

/// `oneOf` arms that are all `{"const": ...}` — schemars' unit-enum
/// encoding. Returns the const values when every arm has one.
fn const_only_one_of(node: &Map<String, Value>) -> Option<Vec<Value>> {
  let arms = node.get("oneOf")?.as_array()?;
  arms.iter().map(|arm| arm.get("const").cloned()).collect()
}

/// The single non-null arm of an `anyOf: [T, null]` union, cloned out.
/// schemars produces this shape for `Option<T>`.
fn sole_non_null_any_of(node: &Map<String, Value>) -> Option<Map<String, Value>> {
  let arms = node.get("anyOf")?.as_array()?;
  let mut non_null = arms
    .iter()
    .filter(|arm| arm.get("type").and_then(Value::as_str) != Some("null"));
  let inner = non_null.next()?;
  if non_null.next().is_some() {
    return None;
  }
  inner.as_object().cloned()
}

/// Rewrite a schemars-generated schema into the subset OpenAI's strict
/// structured-output mode accepts.
///
/// Strict mode rejects `oneOf`/`anyOf` unions and `$ref` nodes with sibling
/// keys, and insists that every object pins `additionalProperties: false`
/// with all of its properties listed as required. schemars output breaks
/// each of those rules, so the schema is adjusted in place:
///
/// - a `$ref` is stripped down to just the reference;
/// - const-only `oneOf` unions become a string `enum`;
/// - `anyOf: [T, null]` collapses to `T`;
/// - objects get `required` = every property key and no extras;
/// - array `items` and the `definitions`/`$defs` buckets (schemars 0.x and
///   1.x respectively) are visited recursively.
fn strictify(schema: &mut Value) {
  let Some(node) = schema.as_object_mut() else {
    return;
  };

  if node.contains_key("$ref") {
    node.retain(|key, _| key == "$ref");
    return;
  }

  if let Some(variants) = const_only_one_of(node) {
    node.clear();
    node.insert("type".to_owned(), Value::String("string".to_owned()));
    node.insert("enum".to_owned(), Value::Array(variants));
    return;
  }

  if let Some(inner) = sole_non_null_any_of(node) {
    node.clear();
    node.extend(inner);
    // the unwrapped schema may itself need rewriting
    strictify(schema);
    return;
  }

  let mut required: Option<Vec<Value>> = None;
  if let Some(properties) = node.get_mut("properties").and_then(Value::as_object_mut) {
    let mut keys = Vec::with_capacity(properties.len());
    for (key, property) in properties.iter_mut() {
      keys.push(Value::String(key.clone()));
      strictify(property);
    }
    required = Some(keys);
  }
  if let Some(keys) = required {
    node.insert("required".to_owned(), Value::Array(keys));
    node.insert("additionalProperties".to_owned(), Value::Bool(false));
  }

  if let Some(items) = node.get_mut("items") {
    strictify(items);
  }
  for bucket in ["definitions", "$defs"] {
    if let Some(subschemas) = node.get_mut(bucket).and_then(Value::as_object_mut) {
      for subschema in subschemas.values_mut() {
        strictify(subschema);
      }
    }
  }
}

/// Chat completion constrained to the JSON schema of `T`.
///
/// Returns the raw JSON string rather than a deserialised value: callers own
/// response parsing and may be more tolerant than the schema (the engine core
/// re-validates every field defensively).
pub async fn generate_json<T>(
  messages: Vec<ChatCompletionRequestMessage>,
  schema_name: String,
  schema_description: Option<String>,
) -> anyhow::Result<String>
where
  T: JsonSchema,
{
  let config = OpenAIConfig::new()
    .with_api_key(&APP_ENV.openai_api_key)
    .with_api_base(&APP_ENV.openai_base_url);

  let client = Client::with_config(config);

  let schema = schemars::schema_for!(T);
  let mut schema = serde_json::to_value(&schema)?;
  strictify(&mut schema);

  let request = CreateChatCompletionRequestArgs::default()
    .model(&APP_ENV.openai_chat_model)
    .messages(messages)
    .response_format(ResponseFormat::JsonSchema {
      json_schema: ResponseFormatJsonSchema {
        description: schema_description,
        name: schema_name,
        schema: Some(schema),
        strict: Some(true),
      },
    })
    .build()?;

  client
    .chat()
    .create(request)
    .await
    .map(|r| r.choices.into_iter())?
    .find_map(|c| c.message.content)
    .ok_or_else(|| anyhow!("empty message content"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn objects_pin_required_and_reject_extras() {
    let mut schema = json!({
      "type": "object",
      "properties": {
        "statement": {"type": "string"},
        "confidence": {"type": "number"}
      }
    });
    strictify(&mut schema);
    assert_eq!(schema["additionalProperties"], json!(false));
    let required = schema["required"].as_array().unwrap();
    assert_eq!(required.len(), 2);
  }

  #[test]
  fn nullable_any_of_collapses_to_inner_schema() {
    let mut schema = json!({
      "anyOf": [{"type": "string"}, {"type": "null"}]
    });
    strictify(&mut schema);
    assert_eq!(schema, json!({"type": "string"}));
  }

  #[test]
  fn const_one_of_becomes_string_enum() {
    let mut schema = json!({
      "oneOf": [{"const": "new"}, {"const": "update"}]
    });
    strictify(&mut schema);
    assert_eq!(schema["type"], json!("string"));
    assert_eq!(schema["enum"], json!(["new", "update"]));
  }

  #[test]
  fn refs_lose_sibling_keys() {
    let mut schema = json!({
      "$ref": "#/$defs/Fact",
      "description": "dropped"
    });
    strictify(&mut schema);
    assert_eq!(schema, json!({"$ref": "#/$defs/Fact"}));
  }
}
