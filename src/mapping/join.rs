//! 连接键映射（排序合并连接的比较核心）
//!
//! 每次调用都会更新三态比较结果：
//! `Less` 表示主流值小于引用流值，`Equal` 表示相等，`Greater` 表示大于。
//! 编排器按声明顺序取第一个非 `Equal` 的结果，决定合并连接推进哪一侧。

use std::cmp::Ordering;

use async_trait::async_trait;

use super::{resolve_column, ColumnSource, CompareOperator, FunctionVariables, Mapping, MappingPhase};
use crate::core::value::operations;
use crate::core::{CancelToken, DataType, MapResult, MappingError, Table, TableColumn, Value};

#[derive(Debug, Clone)]
pub struct MapJoin {
    primary_column: TableColumn,
    reference_column: TableColumn,
    operator: CompareOperator,
    primary_ordinal: Option<usize>,
    reference_ordinal: Option<usize>,
    data_type: DataType,
    compare_result: Ordering,
    primary_value: Value,
}

impl MapJoin {
    pub fn new(primary_column: TableColumn, reference_column: TableColumn) -> Self {
        Self::with_operator(primary_column, CompareOperator::Equal, reference_column)
    }

    pub fn with_operator(
        primary_column: TableColumn,
        operator: CompareOperator,
        reference_column: TableColumn,
    ) -> Self {
        Self {
            primary_column,
            reference_column,
            operator,
            primary_ordinal: None,
            reference_ordinal: None,
            data_type: DataType::Unknown,
            compare_result: Ordering::Equal,
            primary_value: Value::Null,
        }
    }

    /// 最近一次比较的结果
    pub fn compare_result(&self) -> Ordering {
        self.compare_result
    }

    /// 最近一次处理的主流键值
    pub fn primary_value(&self) -> &Value {
        &self.primary_value
    }

    /// 读取引用行的键值
    pub fn reference_value(&self, join_row: &[Value]) -> Value {
        self.reference_ordinal
            .and_then(|ordinal| join_row.get(ordinal).cloned())
            .unwrap_or_default()
    }

    pub fn primary_column(&self) -> &TableColumn {
        &self.primary_column
    }
}

#[async_trait]
impl Mapping for MapJoin {
    fn phase(&self) -> MappingPhase {
        MappingPhase::Join
    }

    fn initialize_columns(&mut self, input: &Table, join: Option<&Table>) -> MapResult<()> {
        let primary_ordinal = input
            .get_column_ordinal(&self.primary_column)
            .ok_or_else(|| {
                MappingError::schema(format!(
                    "连接列 {} 在主输入中不存在",
                    self.primary_column.qualified_name()
                ))
            })?;
        let join = join.ok_or_else(|| {
            MappingError::schema(format!("{} 需要连接表", self.description()))
        })?;

        // 引用列只在连接表中查找
        let empty = Table::default();
        let (source, reference) = resolve_column(
            &self.reference_column.name,
            self.reference_column.reference_table.as_deref(),
            &empty,
            Some(join),
        )
        .ok_or_else(|| {
            MappingError::schema(format!(
                "连接列 {} 在连接表 {} 中不存在",
                self.reference_column.qualified_name(),
                join.name
            ))
        })?;
        let ColumnSource::Join(reference_ordinal) = source else {
            return Err(MappingError::schema("连接列解析到了主输入"));
        };

        self.data_type = match input.columns[primary_ordinal].data_type {
            DataType::Unknown => reference.data_type,
            data_type => data_type,
        };
        self.primary_ordinal = Some(primary_ordinal);
        self.reference_ordinal = Some(reference_ordinal);
        Ok(())
    }

    async fn process_input_row(
        &mut self,
        _vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        _cancel: &CancelToken,
    ) -> MapResult<bool> {
        self.primary_value = self
            .primary_ordinal
            .and_then(|ordinal| row.get(ordinal).cloned())
            .unwrap_or_default();

        // 没有连接行（外连接的未匹配行）时不参与过滤
        let Some(join_row) = join_row else {
            self.compare_result = Ordering::Equal;
            return Ok(true);
        };

        let reference_value = self.reference_value(join_row);
        self.compare_result =
            operations::compare(self.data_type, &self.primary_value, &reference_value)?;
        Ok(self.operator.evaluate(self.compare_result))
    }

    fn description(&self) -> String {
        format!(
            "Join({} {} {})",
            self.primary_column.qualified_name(),
            self.operator.symbol(),
            self.reference_column.qualified_name()
        )
    }
}
