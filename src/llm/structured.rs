//! 结构化输出解析
//!
//! 模型在 JSON 模式下仍可能把结果包在 ```json 代码块里，或在前后附带说明文字。

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StructuredOutputError {
    #[error("structured output was empty")]
    Empty,

    #[error("structured output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// 去掉 ```json ... ``` 或 ``` ... ``` 包裹
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    if let Some((_, rest)) = text.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    if let Some((_, rest)) = text.split_once("```") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    text
}

/// 解析模型返回的 JSON 对象
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, StructuredOutputError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(StructuredOutputError::Empty);
    }
    match serde_json::from_str(body) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            // 前后有说明文字时，退而取最外层的 {...}
            match (body.find('{'), body.rfind('}')) {
                (Some(start), Some(end)) if start < end && (start > 0 || end < body.len() - 1) => {
                    serde_json::from_str(&body[start..=end]).map_err(StructuredOutputError::from)
                }
                _ => Err(first_err.into()),
            }
        }
    }
}

/// 生成嵌入 prompt 的 JSON Schema 文本
pub fn schema_hint<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Route {
        from_district: Option<String>,
        to_district: Option<String>,
    }

    #[test]
    fn test_plain_json() {
        let r: Route = parse_structured(r#"{"from_district":"Dhaka","to_district":null}"#).unwrap();
        assert_eq!(r.from_district.as_deref(), Some("Dhaka"));
        assert!(r.to_district.is_none());
    }

    #[test]
    fn test_fenced_json() {
        let text = "```json\n{\"from_district\": \"Dhaka\", \"to_district\": \"Sylhet\"}\n```";
        let r: Route = parse_structured(text).unwrap();
        assert_eq!(r.to_district.as_deref(), Some("Sylhet"));

        let text = "```\n{\"from_district\": null, \"to_district\": \"Sylhet\"}\n```";
        let r: Route = parse_structured(text).unwrap();
        assert!(r.from_district.is_none());
    }

    #[test]
    fn test_surrounding_prose() {
        let text = "Here you go: {\"from_district\": \"Bogra\", \"to_district\": \"Dhaka\"} hope it helps";
        let r: Route = parse_structured(text).unwrap();
        assert_eq!(r.from_district.as_deref(), Some("Bogra"));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            parse_structured::<Route>("   "),
            Err(StructuredOutputError::Empty)
        ));
        assert!(matches!(
            parse_structured::<Route>("not json at all"),
            Err(StructuredOutputError::Json(_))
        ));
    }

    #[test]
    fn test_schema_hint_mentions_fields() {
        let hint = schema_hint::<Route>();
        assert!(hint.contains("from_district"));
        assert!(hint.contains("to_district"));
    }
}
