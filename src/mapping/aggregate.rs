//! 聚合映射
//!
//! 在分组内累加一个输入列，分组结束时由 `process_result_row` 写出结果。
//! Null 不参与累加（第一个非 Null 值作为初始值），
//! 补齐行（序列缺口）只参与累加、不计数。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{resolve_column, ColumnSource, FunctionVariables, Mapping, MappingPhase};
use crate::core::value::operations;
use crate::core::{CancelToken, DataType, MapResult, MappingError, Row, Table, TableColumn, Value};

/// 聚合函数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Sum,
    Average,
    Min,
    Max,
    Count,
    First,
    Last,
}

impl AggregateFunction {
    /// 是否为可加聚合（补齐行的输入值置零）
    pub fn is_additive(&self) -> bool {
        matches!(self, AggregateFunction::Sum | AggregateFunction::Average | AggregateFunction::Count)
    }
}

#[derive(Debug, Clone)]
pub struct MapAggregate {
    function: AggregateFunction,
    input_column: Option<TableColumn>,
    output_column: TableColumn,
    source: Option<ColumnSource>,
    data_type: DataType,
    output_ordinal: Option<usize>,
    /// 累加值
    value: Value,
    /// 处理过的行数（不含补齐行）
    row_count: i64,
    /// 非 Null 值的个数
    value_count: i64,
}

impl MapAggregate {
    pub fn new(function: AggregateFunction, input_column: TableColumn, output_column: TableColumn) -> Self {
        Self {
            function,
            input_column: Some(input_column),
            output_column,
            source: None,
            data_type: DataType::Unknown,
            output_ordinal: None,
            value: Value::Null,
            row_count: 0,
            value_count: 0,
        }
    }

    /// 统计行数，不需要输入列
    pub fn count(output_column: TableColumn) -> Self {
        Self {
            input_column: None,
            ..Self::new(AggregateFunction::Count, output_column.clone(), output_column)
        }
    }

    pub fn function(&self) -> AggregateFunction {
        self.function
    }

    /// 当前累加值
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// 计算最终结果
    pub fn result(&self) -> MapResult<Value> {
        let output_type = self.output_column.data_type;
        match self.function {
            AggregateFunction::Count => Ok(Value::Int(self.row_count)),
            AggregateFunction::Sum if self.value.is_null() => {
                Ok(operations::zero(output_type).unwrap_or_default())
            }
            AggregateFunction::Sum => operations::parse(output_type, &self.value),
            AggregateFunction::Average => {
                operations::divide(output_type, &self.value, self.value_count)
            }
            AggregateFunction::Min
            | AggregateFunction::Max
            | AggregateFunction::First
            | AggregateFunction::Last => operations::parse(output_type, &self.value),
        }
    }

    fn accumulate(&mut self, value: &Value) -> MapResult<()> {
        match self.function {
            AggregateFunction::Sum | AggregateFunction::Average => {
                self.value = operations::add(self.data_type, &self.value, value)?;
            }
            AggregateFunction::Min | AggregateFunction::Max => {
                if value.is_null() {
                    return Ok(());
                }
                let replace = self.value.is_null() || {
                    let ordering = operations::compare(self.data_type, value, &self.value)?;
                    match self.function {
                        AggregateFunction::Min => ordering == std::cmp::Ordering::Less,
                        _ => ordering == std::cmp::Ordering::Greater,
                    }
                };
                if replace {
                    self.value = operations::parse(self.data_type, value)?;
                }
            }
            AggregateFunction::First => {
                if self.value.is_null() && !value.is_null() {
                    self.value = value.clone();
                }
            }
            AggregateFunction::Last => {
                if !value.is_null() {
                    self.value = value.clone();
                }
            }
            AggregateFunction::Count => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Mapping for MapAggregate {
    fn phase(&self) -> MappingPhase {
        MappingPhase::Aggregate
    }

    fn initialize_columns(&mut self, input: &Table, join: Option<&Table>) -> MapResult<()> {
        let Some(column) = &self.input_column else {
            return Ok(());
        };
        let (source, resolved) = resolve_column(&column.name, column.reference_table.as_deref(), input, join)
            .ok_or_else(|| {
                MappingError::schema(format!("聚合列 {} 在输入中不存在", column.qualified_name()))
            })?;
        self.source = Some(source);
        self.data_type = match resolved.data_type {
            DataType::Unknown => self.output_column.data_type,
            data_type => data_type,
        };
        if self.function != AggregateFunction::Count
            && self.output_column.data_type == DataType::Unknown
        {
            self.output_column.data_type = self.data_type;
        }
        Ok(())
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        let mut column = self.output_column.clone();
        if self.function == AggregateFunction::Count {
            column.data_type = DataType::Int64;
        }
        self.output_ordinal = Some(output.add_column(column));
        Ok(())
    }

    async fn process_input_row(
        &mut self,
        vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        _cancel: &CancelToken,
    ) -> MapResult<bool> {
        let value = match self.source {
            Some(source) => source.read(row, join_row).clone(),
            None => Value::Null,
        };

        if vars.is_filler {
            // 补齐行只让累加器得到零值，不计入行数
            if self.function.is_additive() && self.function != AggregateFunction::Count {
                self.accumulate(&value)?;
            }
            return Ok(true);
        }

        self.row_count += 1;
        if !value.is_null() {
            self.value_count += 1;
        }
        self.accumulate(&value)?;
        Ok(true)
    }

    fn map_output_row(&self, _output: &mut Row) {}

    async fn process_result_row(
        &mut self,
        _vars: &FunctionVariables,
        row: &mut Row,
        phase: MappingPhase,
        _cancel: &CancelToken,
    ) -> MapResult<bool> {
        if phase != MappingPhase::Aggregate {
            return Ok(false);
        }
        if let Some(ordinal) = self.output_ordinal {
            row[ordinal] = self.result()?;
        }
        Ok(false)
    }

    fn process_filler_row(&mut self, _row: &[Value], filler: &mut Row, _series_value: &Value) {
        if let Some(ColumnSource::Input(ordinal)) = self.source {
            if self.function.is_additive() {
                filler[ordinal] = operations::zero(self.data_type).unwrap_or_default();
            } else {
                filler[ordinal] = Value::Null;
            }
        }
    }

    fn reset(&mut self, phase: MappingPhase) {
        if phase == MappingPhase::Aggregate {
            self.value = Value::Null;
            self.row_count = 0;
            self.value_count = 0;
        }
    }

    fn description(&self) -> String {
        match &self.input_column {
            Some(column) => format!(
                "Aggregate({:?}({}) -> {})",
                self.function,
                column.qualified_name(),
                self.output_column.name
            ),
            None => format!("Aggregate(Count -> {})", self.output_column.name),
        }
    }
}
