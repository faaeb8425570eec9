//! 内置函数实现

use async_trait::async_trait;

use super::{FunctionOutput, FunctionRegistry, FunctionSignature, RowFunction, ScalarFunction};
use crate::core::{CancelToken, DataType, Value};
use crate::mapping::{CompareOperator, FunctionVariables, MappingPhase};

/// 注册所有内置函数
pub fn register_all(registry: &FunctionRegistry) {
    register_concat(registry);
    register_upper(registry);
    register_equal(registry);
    register_is_not_null(registry);
    register_running_share(registry);
    register_split(registry);
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn register_concat(registry: &FunctionRegistry) {
    registry.register_scalar(ScalarFunction::new(
        FunctionSignature::new("concat", MappingPhase::Map)
            .input("left", DataType::String)
            .input("right", DataType::String)
            .returns(DataType::String)
            .describe("连接两个字符串"),
        |args| {
            let left = args.first().map(text).unwrap_or_default();
            let right = args.get(1).map(text).unwrap_or_default();
            Ok(Value::String(left + &right))
        },
    ));
}

fn register_upper(registry: &FunctionRegistry) {
    registry.register_scalar(ScalarFunction::new(
        FunctionSignature::new("upper", MappingPhase::Map)
            .input("value", DataType::String)
            .returns(DataType::String)
            .describe("转换为大写"),
        |args| match args.first() {
            Some(Value::String(s)) => Ok(Value::String(s.to_uppercase())),
            Some(Value::Null) | None => Ok(Value::Null),
            Some(other) => anyhow::bail!("upper函数需要字符串类型, 实际为 {}", other.get_type()),
        },
    ));
}

fn register_equal(registry: &FunctionRegistry) {
    registry.register_scalar(ScalarFunction::new(
        FunctionSignature::new("equal", MappingPhase::Condition)
            .input("left", DataType::Unknown)
            .input("right", DataType::Unknown)
            .returns(DataType::Boolean)
            .compare_operator(CompareOperator::Equal)
            .describe("判断两个值是否相等"),
        |args| match (args.first(), args.get(1)) {
            (Some(left), Some(right)) => Ok(Value::Bool(left == right)),
            _ => anyhow::bail!("equal函数需要两个参数"),
        },
    ));
}

fn register_is_not_null(registry: &FunctionRegistry) {
    registry.register_scalar(ScalarFunction::new(
        FunctionSignature::new("is_not_null", MappingPhase::Validate)
            .input("value", DataType::Unknown)
            .returns(DataType::Boolean)
            .describe("验证值不为空"),
        |args| Ok(Value::Bool(args.first().is_some_and(|v| !v.is_null()))),
    ));
}

fn register_running_share(registry: &FunctionRegistry) {
    registry.register("running_share", || Box::new(RunningShare::new()) as Box<dyn RowFunction>);
}

fn register_split(registry: &FunctionRegistry) {
    registry.register("split", || Box::new(Split::new()) as Box<dyn RowFunction>);
}

/// 分析函数：每行值占分组合计的比例
#[derive(Debug)]
pub struct RunningShare {
    signature: FunctionSignature,
    values: Vec<f64>,
    total: f64,
}

impl RunningShare {
    pub fn new() -> Self {
        Self {
            signature: FunctionSignature::new("running_share", MappingPhase::Analytic)
                .input("value", DataType::Double)
                .returns(DataType::Double)
                .with_result()
                .describe("计算每行值在分组合计中的占比"),
            values: Vec::new(),
            total: 0.0,
        }
    }
}

impl Default for RunningShare {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RowFunction for RunningShare {
    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    async fn invoke(
        &mut self,
        vars: &FunctionVariables,
        args: &[Value],
        _cancel: &CancelToken,
    ) -> anyhow::Result<FunctionOutput> {
        let value = match args.first() {
            Some(Value::Float(f)) => *f,
            Some(Value::Int(i)) => *i as f64,
            Some(Value::Null) | None => 0.0,
            Some(other) => anyhow::bail!("running_share函数需要数值类型, 实际为 {}", other),
        };

        // 同一序号重复求值时覆盖旧值
        if vars.index < self.values.len() {
            self.total -= self.values[vars.index];
            self.values[vars.index] = value;
        } else {
            self.values.resize(vars.index, 0.0);
            self.values.push(value);
        }
        self.total += value;
        Ok(FunctionOutput::default())
    }

    async fn result(
        &mut self,
        vars: &FunctionVariables,
        _cancel: &CancelToken,
    ) -> anyhow::Result<FunctionOutput> {
        let value = self.values.get(vars.index).copied().unwrap_or_default();
        let share = if self.total == 0.0 { 0.0 } else { value / self.total };
        Ok(FunctionOutput::value(share))
    }

    fn reset(&mut self) {
        self.values.clear();
        self.total = 0.0;
    }
}

/// 行生成函数：按分隔符拆分字符串，每个片段输出一行
#[derive(Debug)]
pub struct Split {
    signature: FunctionSignature,
    parts: Option<Vec<String>>,
    position: usize,
}

impl Split {
    pub fn new() -> Self {
        Self {
            signature: FunctionSignature::new("split", MappingPhase::Rows)
                .input("value", DataType::String)
                .input("separator", DataType::String)
                .output("item", DataType::String)
                .returns(DataType::Boolean)
                .generating_rows()
                .describe("按分隔符拆分字符串，每个片段生成一行"),
            parts: None,
            position: 0,
        }
    }
}

impl Default for Split {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RowFunction for Split {
    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    async fn invoke(
        &mut self,
        _vars: &FunctionVariables,
        args: &[Value],
        _cancel: &CancelToken,
    ) -> anyhow::Result<FunctionOutput> {
        let parts = self.parts.get_or_insert_with(|| {
            let value = args.first().map(text).unwrap_or_default();
            let separator = args.get(1).map(text).unwrap_or_else(|| ",".to_string());
            if value.is_empty() {
                Vec::new()
            } else if separator.is_empty() {
                vec![value]
            } else {
                value.split(separator.as_str()).map(str::to_string).collect()
            }
        });

        match parts.get(self.position).cloned() {
            Some(item) => {
                self.position += 1;
                Ok(FunctionOutput::value(true).with_output("item", item))
            }
            None => {
                self.reset();
                Ok(FunctionOutput::value(false))
            }
        }
    }

    fn reset(&mut self) {
        self.parts = None;
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_running_share_uses_group_index() {
        let mut function = RunningShare::new();
        let cancel = CancelToken::new();
        for (index, value) in [1.0, 3.0].into_iter().enumerate() {
            function
                .invoke(&FunctionVariables::at(index), &[Value::Float(value)], &cancel)
                .await
                .expect("调用失败");
        }

        let first = function.result(&FunctionVariables::at(0), &cancel).await.expect("求值失败");
        assert_eq!(first.value, Value::Float(0.25));
        let second = function.result(&FunctionVariables::at(1), &cancel).await.expect("求值失败");
        assert_eq!(second.value, Value::Float(0.75));

        function.reset();
        let empty = function.result(&FunctionVariables::at(0), &cancel).await.expect("求值失败");
        assert_eq!(empty.value, Value::Float(0.0));
    }

    #[tokio::test]
    async fn test_split_generates_until_exhausted() {
        let mut function = Split::new();
        let cancel = CancelToken::new();
        let vars = FunctionVariables::default();
        let args = [Value::from("a|b"), Value::from("|")];

        let first = function.invoke(&vars, &args, &cancel).await.expect("调用失败");
        assert_eq!(first.value, Value::Bool(true));
        assert_eq!(first.output("item"), Some(&Value::from("a")));

        let second = function.invoke(&vars, &args, &cancel).await.expect("调用失败");
        assert_eq!(second.output("item"), Some(&Value::from("b")));

        let done = function.invoke(&vars, &args, &cancel).await.expect("调用失败");
        assert_eq!(done.value, Value::Bool(false));

        // 耗尽后重新开始
        let again = function.invoke(&vars, &args, &cancel).await.expect("调用失败");
        assert_eq!(again.output("item"), Some(&Value::from("a")));
    }

    #[tokio::test]
    async fn test_upper_rejects_non_string() {
        let registry = FunctionRegistry::new();
        let mut function = registry.create("upper").expect("函数应存在");
        let cancel = CancelToken::new();
        let vars = FunctionVariables::default();

        let output = function.invoke(&vars, &[Value::from("abc")], &cancel).await.expect("调用失败");
        assert_eq!(output.value, Value::from("ABC"));
        assert!(function.invoke(&vars, &[Value::Int(1)], &cancel).await.is_err());
    }
}
