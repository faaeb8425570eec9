//! 可插拔函数目录
//!
//! 函数映射通过 `RowFunction` 接口调用外部注册的函数，
//! 具体函数实现位于 builtin 子模块

pub mod builtin;
pub mod registry;
pub mod signature;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{CancelToken, Value};
use crate::mapping::FunctionVariables;

pub use registry::{FunctionFactory, FunctionRegistry};
pub use signature::{FunctionSignature, ParameterSignature};

/// 函数调用结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionOutput {
    /// 主返回值
    pub value: Value,
    /// 具名输出参数
    pub outputs: Vec<(String, Value)>,
    /// 函数要求忽略（拒绝）当前行
    pub ignore_row: bool,
}

impl FunctionOutput {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.push((name.into(), value.into()));
        self
    }

    /// 读取具名输出
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// 行函数接口
///
/// 失败统一返回 `anyhow::Error`，由函数映射包装为
/// `MappingError::FunctionInvocation` 并附带函数名与映射描述。
#[async_trait]
pub trait RowFunction: Send + fmt::Debug {
    /// 函数签名
    fn signature(&self) -> &FunctionSignature;

    /// 预加载资源
    async fn open(&mut self, _cancel: &CancelToken) -> anyhow::Result<()> {
        Ok(())
    }

    /// 对一行参数求值
    async fn invoke(
        &mut self,
        vars: &FunctionVariables,
        args: &[Value],
        cancel: &CancelToken,
    ) -> anyhow::Result<FunctionOutput>;

    /// 分组结束时的结果方法
    async fn result(
        &mut self,
        _vars: &FunctionVariables,
        _cancel: &CancelToken,
    ) -> anyhow::Result<FunctionOutput> {
        Ok(FunctionOutput::default())
    }

    /// 清理分组状态
    fn reset(&mut self) {}
}

/// 标量函数体
pub type ScalarBody = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// 由闭包实现的无状态标量函数
#[derive(Clone)]
pub struct ScalarFunction {
    signature: FunctionSignature,
    body: ScalarBody,
}

impl ScalarFunction {
    pub fn new<F>(signature: FunctionSignature, body: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            signature,
            body: Arc::new(body),
        }
    }
}

impl fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarFunction")
            .field("name", &self.signature.name)
            .finish()
    }
}

#[async_trait]
impl RowFunction for ScalarFunction {
    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    async fn invoke(
        &mut self,
        _vars: &FunctionVariables,
        args: &[Value],
        _cancel: &CancelToken,
    ) -> anyhow::Result<FunctionOutput> {
        (self.body)(args).map(FunctionOutput::value)
    }
}
