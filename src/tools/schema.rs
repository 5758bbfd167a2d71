//! 工具参数 JSON Schema 生成（schemars 自动生成工具 Schema）
//!
//! 每个工具声明一个参数结构体，这里把它转成 OpenAI function 参数格式：
//! 去掉 `$schema` / `title` 元字段，保证总有 `properties`。

use schemars::{schema_for, JsonSchema};
use serde_json::{json, Value};

/// 参数结构体 T 的 JSON Schema（function parameters 形状）
pub fn parameters_for<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({}));
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("type").or_insert_with(|| json!("object"));
        obj.entry("properties").or_insert_with(|| json!({}));
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Args {
        /// 查询串
        query: String,
        limit: Option<u32>,
    }

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct NoArgs {}

    #[test]
    fn test_parameters_shape() {
        let s = parameters_for::<Args>();
        assert_eq!(s["type"], "object");
        assert!(s.get("$schema").is_none());
        assert!(s.get("title").is_none());
        assert_eq!(s["required"], json!(["query"]));
        assert_eq!(s["properties"]["query"]["description"], "查询串");
    }

    #[test]
    fn test_empty_args_have_properties() {
        let s = parameters_for::<NoArgs>();
        assert_eq!(s["properties"], json!({}));
    }
}
