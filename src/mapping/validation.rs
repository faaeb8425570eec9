//! 验证映射
//!
//! 函数映射的特化：函数返回 false 时按 `InvalidAction` 处理该行，
//! 并记录由参数名和参数值组成的失败原因。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{FunctionVariables, MapFunction, Mapping, MappingPhase};
use crate::core::{CancelToken, DataType, MapResult, MappingError, Row, Table, TableColumn, Value};

/// 验证失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InvalidAction {
    /// 保留该行，只记录原因
    Pass,
    /// 标记为拒绝行
    #[default]
    Reject,
    /// 丢弃该行
    Discard,
    /// 终止整个流
    Abend,
}

#[derive(Debug)]
pub struct MapValidation {
    function: MapFunction,
    invalid_action: InvalidAction,
    reason_column: Option<TableColumn>,
    reason_ordinal: Option<usize>,
    reason: Option<String>,
    ignore: bool,
}

impl MapValidation {
    pub fn new(function: MapFunction, invalid_action: InvalidAction) -> Self {
        Self {
            function,
            invalid_action,
            reason_column: None,
            reason_ordinal: None,
            reason: None,
            ignore: false,
        }
    }

    /// 将失败原因写入指定输出列
    pub fn with_reason_column(mut self, name: impl Into<String>) -> Self {
        self.reason_column = Some(TableColumn::new(name, DataType::String));
        self
    }

    pub fn invalid_action(&self) -> InvalidAction {
        self.invalid_action
    }

    /// 最近一行的失败原因
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub(crate) fn function_mut(&mut self) -> &mut MapFunction {
        &mut self.function
    }
}

#[async_trait]
impl Mapping for MapValidation {
    fn phase(&self) -> MappingPhase {
        MappingPhase::Validate
    }

    fn initialize_columns(&mut self, input: &Table, join: Option<&Table>) -> MapResult<()> {
        self.function.initialize_columns(input, join)
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        self.function.add_output_columns(output)?;
        if let Some(column) = &self.reason_column {
            self.reason_ordinal = Some(output.add_column(column.clone()));
        }
        Ok(())
    }

    async fn open(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.function.open(cancel).await
    }

    async fn process_input_row(
        &mut self,
        vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<bool> {
        self.reason = None;
        self.ignore = false;

        let args = self.function.arguments(row, join_row)?;
        let output = self.function.evaluate(vars, args.clone(), cancel).await?;
        let valid = !matches!(output.value, Value::Bool(false));
        if valid {
            return Ok(true);
        }

        let reason = format!(
            "{} 验证失败: {}",
            self.function.name(),
            self.function.describe_arguments(&args)
        );
        log::warn!("{}", reason);

        let keep = match self.invalid_action {
            InvalidAction::Pass => true,
            InvalidAction::Reject => {
                self.ignore = true;
                true
            }
            InvalidAction::Discard => false,
            InvalidAction::Abend => return Err(MappingError::Validation(reason)),
        };
        self.reason = Some(reason);
        Ok(keep)
    }

    fn map_output_row(&self, output: &mut Row) {
        self.function.map_output_row(output);
        if let Some(ordinal) = self.reason_ordinal {
            output[ordinal] = self.reason.clone().map(Value::String).unwrap_or_default();
        }
    }

    fn description(&self) -> String {
        format!("Validation({:?}, {})", self.invalid_action, self.function.description())
    }

    fn ignore_row(&self) -> bool {
        self.ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::mapping::Operand;

    fn input() -> Table {
        Table::with_columns(
            "customers",
            vec![
                TableColumn::new("id", DataType::Int64),
                TableColumn::new("email", DataType::String),
            ],
        )
    }

    async fn validate(action: InvalidAction, row: &[Value]) -> (MapResult<bool>, MapValidation) {
        let registry = FunctionRegistry::new();
        let function = MapFunction::from_registry(&registry, "is_not_null", vec![Operand::column("email")])
            .expect("函数应存在");
        let mut mapping = MapValidation::new(function, action).with_reason_column("reason");
        mapping.initialize_columns(&input(), None).expect("初始化失败");
        let mut output = Table::new("out");
        mapping.add_output_columns(&mut output).expect("添加输出列失败");

        let result = mapping
            .process_input_row(&FunctionVariables::default(), row, None, &CancelToken::new())
            .await;
        (result, mapping)
    }

    #[tokio::test]
    async fn test_valid_row_has_no_reason() {
        let (result, mapping) = validate(InvalidAction::Reject, &[Value::Int(1), Value::from("a@b.c")]).await;
        assert!(matches!(result, Ok(true)));
        assert!(mapping.reason().is_none());
        assert!(!mapping.ignore_row());
    }

    #[tokio::test]
    async fn test_invalid_actions() {
        let row = [Value::Int(1), Value::Null];

        let (result, mapping) = validate(InvalidAction::Pass, &row).await;
        assert!(matches!(result, Ok(true)));
        assert_eq!(mapping.reason(), Some("is_not_null 验证失败: value=NULL"));

        let (result, mapping) = validate(InvalidAction::Reject, &row).await;
        assert!(matches!(result, Ok(true)));
        assert!(mapping.ignore_row());
        let mut out = vec![Value::Null; 1];
        mapping.map_output_row(&mut out);
        assert_eq!(out[0], Value::from("is_not_null 验证失败: value=NULL"));

        let (result, _) = validate(InvalidAction::Discard, &row).await;
        assert!(matches!(result, Ok(false)));

        let (result, _) = validate(InvalidAction::Abend, &row).await;
        assert!(matches!(result, Err(MappingError::Validation(_))));
    }
}
