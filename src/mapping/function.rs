//! 函数映射
//!
//! 包装一个可插拔函数：输入参数在初始化时绑定到列序号或字面量，
//! 返回值与具名输出绑定到输出列。
//!
//! 缓存模式（只作用于 Map/Condition/Validate 阶段）：
//! - `NoCache`：每行调用
//! - `EnableCache`：按参数元组记忆化，同一参数只调用一次
//! - `CallOnce`：只在第一行调用，之后复用结果

use std::fmt;
use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use super::{resolve_operand, FunctionVariables, Mapping, MappingPhase, MapFilter, Operand, ResolvedOperand};
use crate::core::value::operations;
use crate::core::{CancelToken, DataType, MapResult, MappingError, Row, Table, TableColumn, Value};
use crate::functions::{FunctionOutput, FunctionRegistry, FunctionSignature, RowFunction};

/// 函数缓存模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheMode {
    #[default]
    NoCache,
    EnableCache,
    CallOnce,
}

/// 函数缓存键：按值比较的参数元组
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct FunctionCacheKey(pub Vec<Value>);

pub struct MapFunction {
    function: Box<dyn RowFunction>,
    signature: FunctionSignature,
    inputs: Vec<Operand>,
    resolved_inputs: Vec<ResolvedOperand>,
    return_column: Option<TableColumn>,
    return_ordinal: Option<usize>,
    outputs: Vec<(String, TableColumn)>,
    output_ordinals: Vec<usize>,
    cache_mode: CacheMode,
    cache_capacity: Option<usize>,
    cache: Option<LruCache<FunctionCacheKey, FunctionOutput>>,
    call_once: Option<FunctionOutput>,
    /// 最近一次求值后待写入的 (输出序号, 值)
    values: Vec<(usize, Value)>,
    ignore: bool,
}

impl fmt::Debug for MapFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapFunction")
            .field("name", &self.signature.name)
            .field("phase", &self.signature.phase)
            .field("inputs", &self.inputs)
            .field("cache_mode", &self.cache_mode)
            .finish()
    }
}

impl MapFunction {
    pub fn new(function: Box<dyn RowFunction>, inputs: Vec<Operand>) -> Self {
        let signature = function.signature().clone();
        Self {
            function,
            signature,
            inputs,
            resolved_inputs: Vec::new(),
            return_column: None,
            return_ordinal: None,
            outputs: Vec::new(),
            output_ordinals: Vec::new(),
            cache_mode: CacheMode::NoCache,
            cache_capacity: None,
            cache: None,
            call_once: None,
            values: Vec::new(),
            ignore: false,
        }
    }

    /// 从注册表创建
    pub fn from_registry(registry: &FunctionRegistry, name: &str, inputs: Vec<Operand>) -> MapResult<Self> {
        Ok(Self::new(registry.create(name)?, inputs))
    }

    /// 绑定返回值到输出列
    pub fn with_return(mut self, column: TableColumn) -> Self {
        self.return_column = Some(column);
        self
    }

    /// 绑定具名输出到输出列
    pub fn with_output(mut self, output: impl Into<String>, column: TableColumn) -> Self {
        self.outputs.push((output.into(), column));
        self
    }

    pub fn with_cache(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    /// 未显式设置容量时使用给定的默认容量
    pub(crate) fn default_cache_capacity(&mut self, capacity: usize) {
        if self.cache_capacity.is_none() {
            self.cache_capacity = Some(capacity);
        }
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn inputs(&self) -> &[Operand] {
        &self.inputs
    }

    /// 带比较运算符标记、恰好绑定两个输入的函数改写为过滤
    pub fn into_filter(self) -> Result<MapFilter, Self> {
        match (self.signature.compare, self.inputs.as_slice()) {
            (Some(operator), [left, right]) => Ok(MapFilter::new(left.clone(), operator, right.clone())),
            _ => Err(self),
        }
    }

    fn cacheable(&self) -> bool {
        matches!(
            self.signature.phase,
            MappingPhase::Map | MappingPhase::Condition | MappingPhase::Validate
        )
    }

    /// 解析当前行的参数，并转换为参数声明的类型
    pub(crate) fn arguments(&self, row: &[Value], join_row: Option<&[Value]>) -> MapResult<Vec<Value>> {
        self.resolved_inputs
            .iter()
            .zip(&self.signature.inputs)
            .map(|(operand, parameter)| operations::parse(parameter.data_type, operand.read(row, join_row)))
            .collect()
    }

    /// 参数的可读描述，例如 `a=1, b=2`
    pub(crate) fn describe_arguments(&self, args: &[Value]) -> String {
        self.signature
            .inputs
            .iter()
            .zip(args)
            .map(|(parameter, value)| format!("{}={}", parameter.name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn invocation_error(&self, error: anyhow::Error) -> MappingError {
        match error.downcast::<MappingError>() {
            Ok(MappingError::Cancelled) => MappingError::Cancelled,
            Ok(other) => MappingError::FunctionInvocation {
                function: self.signature.name.clone(),
                mapping: self.description(),
                source: Box::new(other),
            },
            Err(error) => MappingError::FunctionInvocation {
                function: self.signature.name.clone(),
                mapping: self.description(),
                source: error.into(),
            },
        }
    }

    async fn invoke(
        &mut self,
        vars: &FunctionVariables,
        args: &[Value],
        cancel: &CancelToken,
    ) -> MapResult<FunctionOutput> {
        cancel.check()?;
        let result = self.function.invoke(vars, args, cancel).await;
        cancel.check()?;
        result.map_err(|e| self.invocation_error(e))
    }

    /// 按缓存模式对当前行求值
    pub(crate) async fn evaluate(
        &mut self,
        vars: &FunctionVariables,
        args: Vec<Value>,
        cancel: &CancelToken,
    ) -> MapResult<FunctionOutput> {
        if !self.cacheable() {
            return self.invoke(vars, &args, cancel).await;
        }

        match self.cache_mode {
            CacheMode::NoCache => self.invoke(vars, &args, cancel).await,
            CacheMode::CallOnce => {
                if let Some(output) = &self.call_once {
                    return Ok(output.clone());
                }
                let output = self.invoke(vars, &args, cancel).await?;
                self.call_once = Some(output.clone());
                Ok(output)
            }
            CacheMode::EnableCache => {
                let key = FunctionCacheKey(args);
                if let Some(output) = self.cache.as_mut().and_then(|cache| cache.get(&key)) {
                    log::trace!("函数 {} 命中缓存", self.signature.name);
                    return Ok(output.clone());
                }
                let output = self.invoke(vars, &key.0, cancel).await?;
                if let Some(cache) = self.cache.as_mut() {
                    cache.put(key, output.clone());
                }
                Ok(output)
            }
        }
    }

    /// 计算待写入输出行的值
    fn stage_output(&mut self, output: &FunctionOutput) -> MapResult<()> {
        self.values.clear();
        if let (Some(ordinal), Some(column)) = (self.return_ordinal, &self.return_column) {
            // 行生成器的返回值只表示是否还有行
            if !self.signature.generates_rows {
                let value = operations::parse(column.data_type, &output.value)?;
                self.values.push((ordinal, value));
            }
        }
        for ((name, column), ordinal) in self.outputs.iter().zip(&self.output_ordinals) {
            let value = output.output(name).cloned().unwrap_or_default();
            self.values.push((*ordinal, operations::parse(column.data_type, &value)?));
        }
        Ok(())
    }
}

#[async_trait]
impl Mapping for MapFunction {
    fn phase(&self) -> MappingPhase {
        self.signature.phase
    }

    fn initialize_columns(&mut self, input: &Table, join: Option<&Table>) -> MapResult<()> {
        if self.inputs.len() != self.signature.inputs.len() {
            return Err(MappingError::schema(format!(
                "函数 {} 需要 {} 个参数，实际绑定了 {} 个",
                self.signature.name,
                self.signature.inputs.len(),
                self.inputs.len()
            )));
        }
        self.resolved_inputs = self
            .inputs
            .iter()
            .map(|operand| resolve_operand(operand, input, join).map(|(resolved, _)| resolved))
            .collect::<MapResult<_>>()?;

        for (name, _) in &self.outputs {
            if self.signature.output_parameter(name).is_none() {
                return Err(MappingError::schema(format!(
                    "函数 {} 没有输出参数 {}",
                    self.signature.name, name
                )));
            }
        }

        if let Some(column) = self.return_column.as_mut() {
            match self.signature.return_type {
                None => {
                    return Err(MappingError::schema(format!(
                        "函数 {} 没有返回值",
                        self.signature.name
                    )))
                }
                Some(data_type) if column.data_type == DataType::Unknown => column.data_type = data_type,
                Some(_) => {}
            }
        }

        if self.cache_mode == CacheMode::EnableCache && self.cache.is_none() {
            let capacity = self.cache_capacity.unwrap_or(10_000);
            let capacity = NonZeroUsize::new(capacity)
                .ok_or_else(|| MappingError::Config("函数缓存容量必须大于 0".to_string()))?;
            self.cache = Some(LruCache::new(capacity));
        }
        Ok(())
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        if let Some(column) = &self.return_column {
            self.return_ordinal = Some(output.add_column(column.clone()));
        }
        self.output_ordinals = self
            .outputs
            .iter()
            .map(|(_, column)| output.add_column(column.clone()))
            .collect();
        Ok(())
    }

    async fn open(&mut self, cancel: &CancelToken) -> MapResult<()> {
        cancel.check()?;
        let result = self.function.open(cancel).await;
        result.map_err(|e| self.invocation_error(e))
    }

    async fn process_input_row(
        &mut self,
        vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<bool> {
        let args = self.arguments(row, join_row)?;
        let output = self.evaluate(vars, args, cancel).await?;
        self.ignore = output.ignore_row;

        let keep = match self.signature.phase {
            MappingPhase::Rows => matches!(output.value, Value::Bool(true)),
            // 聚合/分析函数在输入阶段只累加
            MappingPhase::Aggregate | MappingPhase::Analytic => true,
            MappingPhase::Condition | MappingPhase::Validate => !matches!(output.value, Value::Bool(false)),
            _ if self.return_column.is_none() => !matches!(output.value, Value::Bool(false)),
            _ => true,
        };

        if !self.signature.has_result {
            self.stage_output(&output)?;
        }
        Ok(keep)
    }

    fn map_output_row(&self, output: &mut Row) {
        for (ordinal, value) in &self.values {
            output[*ordinal] = value.clone();
        }
    }

    async fn process_result_row(
        &mut self,
        vars: &FunctionVariables,
        row: &mut Row,
        phase: MappingPhase,
        cancel: &CancelToken,
    ) -> MapResult<bool> {
        if !self.signature.has_result || phase != self.signature.phase {
            return Ok(false);
        }

        cancel.check()?;
        let result = self.function.result(vars, cancel).await;
        let output = result.map_err(|e| self.invocation_error(e))?;
        self.ignore = output.ignore_row;
        self.stage_output(&output)?;
        self.map_output_row(row);

        Ok(self.signature.generates_rows && matches!(output.value, Value::Bool(true)))
    }

    fn reset(&mut self, phase: MappingPhase) {
        if phase == self.signature.phase {
            self.function.reset();
            self.ignore = false;
        }
    }

    fn description(&self) -> String {
        let inputs: Vec<String> = self.inputs.iter().map(|i| i.to_string()).collect();
        match &self.return_column {
            Some(column) => format!(
                "Function({}({}) -> {})",
                self.signature.name,
                inputs.join(", "),
                column.name
            ),
            None => format!("Function({}({}))", self.signature.name, inputs.join(", ")),
        }
    }

    fn ignore_row(&self) -> bool {
        self.ignore
    }

    fn generates_rows(&self) -> bool {
        self.signature.phase == MappingPhase::Rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::ScalarFunction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn input() -> Table {
        Table::with_columns(
            "people",
            vec![
                TableColumn::new("first", DataType::String),
                TableColumn::new("last", DataType::String),
            ],
        )
    }

    fn counting_function(calls: Arc<AtomicUsize>) -> Box<dyn RowFunction> {
        Box::new(ScalarFunction::new(
            FunctionSignature::new("add", MappingPhase::Map)
                .input("a", DataType::Int64)
                .input("b", DataType::Int64)
                .returns(DataType::Int64),
            move |args| {
                calls.fetch_add(1, Ordering::SeqCst);
                let a = args[0].as_int().unwrap_or_default();
                let b = args[1].as_int().unwrap_or_default();
                Ok(Value::Int(a + b))
            },
        ))
    }

    #[tokio::test]
    async fn test_function_writes_return_column() {
        let registry = FunctionRegistry::new();
        let mut mapping = MapFunction::from_registry(
            &registry,
            "concat",
            vec![Operand::column("first"), Operand::column("last")],
        )
        .expect("函数应存在")
        .with_return(TableColumn::new("full", DataType::Unknown));
        mapping.initialize_columns(&input(), None).expect("初始化失败");
        let mut output = Table::new("out");
        mapping.add_output_columns(&mut output).expect("添加输出列失败");
        assert_eq!(output.columns[0].data_type, DataType::String);

        let keep = mapping
            .process_input_row(
                &FunctionVariables::default(),
                &[Value::from("Ada"), Value::from("Lovelace")],
                None,
                &CancelToken::new(),
            )
            .await
            .expect("调用失败");
        assert!(keep);

        let mut out = output.new_row();
        mapping.map_output_row(&mut out);
        assert_eq!(out[0], Value::from("AdaLovelace"));
    }

    #[tokio::test]
    async fn test_call_once_invokes_single_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let input = Table::with_columns(
            "pairs",
            vec![TableColumn::new("a", DataType::Int64), TableColumn::new("b", DataType::Int64)],
        );
        let mut mapping = MapFunction::new(
            counting_function(calls.clone()),
            vec![Operand::column("a"), Operand::column("b")],
        )
        .with_cache(CacheMode::CallOnce)
        .with_return(TableColumn::new("sum", DataType::Int64));
        mapping.initialize_columns(&input, None).expect("初始化失败");

        let vars = FunctionVariables::default();
        let cancel = CancelToken::new();
        for row in [[Value::Int(1), Value::Int(2)], [Value::Int(5), Value::Int(6)]] {
            mapping.process_input_row(&vars, &row, None, &cancel).await.expect("调用失败");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_argument_count_mismatch() {
        let registry = FunctionRegistry::new();
        let mut mapping = MapFunction::from_registry(&registry, "upper", vec![])
            .expect("函数应存在");
        assert!(matches!(
            mapping.initialize_columns(&input(), None),
            Err(MappingError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn test_function_error_is_annotated() {
        let failing = Box::new(ScalarFunction::new(
            FunctionSignature::new("boom", MappingPhase::Map),
            |_| anyhow::bail!("外部服务不可用"),
        ));
        let mut mapping = MapFunction::new(failing, vec![]);
        mapping.initialize_columns(&input(), None).expect("初始化失败");
        let err = mapping
            .process_input_row(&FunctionVariables::default(), &[], None, &CancelToken::new())
            .await
            .expect_err("调用应失败");
        match err {
            MappingError::FunctionInvocation { function, mapping, .. } => {
                assert_eq!(function, "boom");
                assert_eq!(mapping, "Function(boom())");
            }
            other => panic!("意外的错误: {:?}", other),
        }
    }

    #[test]
    fn test_compare_tagged_function_becomes_filter() {
        let registry = FunctionRegistry::new();
        let mapping = MapFunction::from_registry(
            &registry,
            "equal",
            vec![Operand::column("first"), Operand::literal("Ada")],
        )
        .expect("函数应存在");
        assert!(mapping.into_filter().is_ok());

        let mapping = MapFunction::from_registry(&registry, "upper", vec![Operand::column("first")])
            .expect("函数应存在");
        assert!(mapping.into_filter().is_err());
    }
}
