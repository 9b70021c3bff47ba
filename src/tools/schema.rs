//! 能力输出结构与 JSON Schema（schemars 自动生成，嵌入推理 prompt）

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 类型 T 的 JSON Schema
pub fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_default()
}

/// filetree 能力输出
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileTreeOutput {
    /// 文件树文本：每行一个文件或目录，用缩进或斜杠路径表示层级
    pub file_tree: String,
    /// 该结构的理由与解读方式
    pub reasoning: String,
    /// 理解或使用该文件树所缺少的信息
    pub missing_context: Vec<String>,
}

/// summarize 能力输出
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryOutput {
    /// 详细摘要
    pub summary: String,
    /// 要点列表
    pub key_points: Vec<String>,
    /// 生成摘要时缺少的信息
    pub missing_context: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_uses_wire_names() {
        let schema = schema_value::<FileTreeOutput>();
        let props = &schema["properties"];
        assert!(props.get("fileTree").is_some());
        assert!(props.get("missingContext").is_some());
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 3);
    }
}
