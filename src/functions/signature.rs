//! 函数签名
//!
//! 描述可插拔函数的输入/输出参数、执行阶段以及附加标记，
//! 映射在初始化时据此绑定列序号。

use crate::core::DataType;
use crate::mapping::{CompareOperator, MappingPhase};

/// 参数签名
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSignature {
    pub name: String,
    pub data_type: DataType,
}

impl ParameterSignature {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// 函数签名
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    /// 函数名称
    pub name: String,
    /// 执行阶段
    pub phase: MappingPhase,
    /// 输入参数
    pub inputs: Vec<ParameterSignature>,
    /// 具名输出参数
    pub outputs: Vec<ParameterSignature>,
    /// 返回值类型，None 表示没有返回值
    pub return_type: Option<DataType>,
    /// 是否提供结果方法（聚合/分析函数在分组结束时调用）
    pub has_result: bool,
    /// 是否为行生成器
    pub generates_rows: bool,
    /// 比较运算符标记，带此标记的双参数函数可以改写为过滤
    pub compare: Option<CompareOperator>,
    /// 函数描述
    pub description: String,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>, phase: MappingPhase) -> Self {
        Self {
            name: name.into(),
            phase,
            inputs: Vec::new(),
            outputs: Vec::new(),
            return_type: None,
            has_result: false,
            generates_rows: false,
            compare: None,
            description: String::new(),
        }
    }

    pub fn input(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.inputs.push(ParameterSignature::new(name, data_type));
        self
    }

    pub fn output(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.outputs.push(ParameterSignature::new(name, data_type));
        self
    }

    pub fn returns(mut self, data_type: DataType) -> Self {
        self.return_type = Some(data_type);
        self
    }

    pub fn with_result(mut self) -> Self {
        self.has_result = true;
        self
    }

    pub fn generating_rows(mut self) -> Self {
        self.generates_rows = true;
        self
    }

    pub fn compare_operator(mut self, operator: CompareOperator) -> Self {
        self.compare = Some(operator);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 查找具名输出参数
    pub fn output_parameter(&self, name: &str) -> Option<&ParameterSignature> {
        self.outputs.iter().find(|p| p.name == name)
    }
}
