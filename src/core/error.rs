//! 统一错误处理系统 for MapFlow
//!
//! ## 设计理念
//!
//! 1. **单一错误类型**：所有映射操作返回 `MapResult<T>`，错误统一为 `MappingError`
//!    - 架构错误在初始化阶段抛出，不会重试
//!    - 类型错误携带出错的值，便于定位
//!    - 函数调用错误保留原始错误链，并附带函数名与映射描述
//!
//! 2. **单次标注**：编排器在并发汇合点只标注一次失败的映射，
//!    已标注的错误、函数调用错误以及取消错误原样传递

use std::error::Error as StdError;
use thiserror::Error;

/// 统一的映射错误类型
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("架构错误: {0}")]
    Schema(String),

    #[error("类型不匹配: {message} (值: {value})")]
    TypeMismatch { message: String, value: String },

    #[error("函数 {function} 调用失败 (映射: {mapping}): {source}")]
    FunctionInvocation {
        function: String,
        mapping: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("操作已取消")]
    Cancelled,

    #[error("映射 {mapping} 执行失败: {source}")]
    Mapping {
        mapping: String,
        #[source]
        source: Box<MappingError>,
    },

    #[error("验证失败: {0}")]
    Validation(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 统一的结果类型
pub type MapResult<T> = Result<T, MappingError>;

impl MappingError {
    /// 创建架构错误
    pub fn schema(message: impl Into<String>) -> Self {
        MappingError::Schema(message.into())
    }

    /// 创建类型不匹配错误
    pub fn type_mismatch(message: impl Into<String>, value: impl std::fmt::Display) -> Self {
        MappingError::TypeMismatch {
            message: message.into(),
            value: value.to_string(),
        }
    }

    /// 为错误附加失败映射的描述
    ///
    /// 取消错误、函数调用错误（已包含映射描述）以及已标注的错误保持不变，
    /// 保证最终只保留最内层真实出错的映射。
    pub fn annotate(self, mapping: impl Into<String>) -> Self {
        match self {
            MappingError::Cancelled => MappingError::Cancelled,
            err @ MappingError::FunctionInvocation { .. } => err,
            err @ MappingError::Mapping { .. } => err,
            other => MappingError::Mapping {
                mapping: mapping.into(),
                source: Box::new(other),
            },
        }
    }

    /// 展开标注，返回底层的真实错误
    pub fn root(&self) -> &MappingError {
        match self {
            MappingError::Mapping { source, .. } => source.root(),
            other => other,
        }
    }

    /// 返回失败映射的描述（如果有）
    pub fn mapping(&self) -> Option<&str> {
        match self {
            MappingError::Mapping { mapping, .. } => Some(mapping),
            MappingError::FunctionInvocation { mapping, .. } => Some(mapping),
            _ => None,
        }
    }

    /// 检查是否为取消错误
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), MappingError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotate_wraps_once() {
        let err = MappingError::schema("列 a 不存在").annotate("Column(a -> b)");
        assert_eq!(err.mapping(), Some("Column(a -> b)"));

        // 再次标注保留最内层的描述
        let err = err.annotate("GroupNode(detail)");
        assert_eq!(err.mapping(), Some("Column(a -> b)"));
        assert!(matches!(err.root(), MappingError::Schema(_)));
    }

    #[test]
    fn test_annotate_keeps_cancelled() {
        let err = MappingError::Cancelled.annotate("Function(lookup)");
        assert!(matches!(err, MappingError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = MappingError::type_mismatch("无法将字符串解析为整数", "abc");
        let text = err.to_string();
        assert!(text.contains("abc"));
    }
}
