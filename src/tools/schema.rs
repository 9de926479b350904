//! 工具参数 JSON Schema 生成（schemars 从参数结构体自动生成）

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 参数结构体 -> function calling 的 parameters schema（去掉 $schema / title 元信息）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Args {
        /// Cidade do imóvel
        cidade: Option<String>,
        codigo: String,
    }

    #[test]
    fn test_schema_strips_meta_and_keeps_fields() {
        let schema = parameters_schema::<Args>();
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["cidade"]["description"], "Cidade do imóvel");
        assert_eq!(schema["required"], serde_json::json!(["codigo"]));
    }
}
