//! 列映射：复制、重命名、常量以及分组键

use async_trait::async_trait;

use super::{resolve_column, ColumnSource, FunctionVariables, Mapping};
use crate::core::value::operations;
use crate::core::{CancelToken, MapResult, MappingError, Row, Table, TableColumn, Value};

/// 列映射
///
/// 将输入列的值复制到输出列。输入列不存在但有默认值时，
/// 使用默认值作为常量输出。
#[derive(Debug, Clone)]
pub struct MapColumn {
    input_column: Option<TableColumn>,
    output_column: TableColumn,
    source: Option<ColumnSource>,
    child_schema: Option<Table>,
    output_ordinal: Option<usize>,
    value: Value,
}

impl MapColumn {
    /// 复制（可能重命名）一列
    pub fn new(input_column: TableColumn, output_column: TableColumn) -> Self {
        Self {
            input_column: Some(input_column),
            output_column,
            source: None,
            child_schema: None,
            output_ordinal: None,
            value: Value::Null,
        }
    }

    /// 原样复制同名列
    pub fn copy(column: TableColumn) -> Self {
        Self::new(column.clone(), column)
    }

    /// 输出常量值
    pub fn literal(output_column: TableColumn, value: Value) -> Self {
        Self {
            input_column: None,
            output_column: output_column.with_default(value.clone()),
            source: None,
            child_schema: None,
            output_ordinal: None,
            value,
        }
    }

    pub fn input_column(&self) -> Option<&TableColumn> {
        self.input_column.as_ref()
    }

    pub fn output_column(&self) -> &TableColumn {
        &self.output_column
    }

    /// 已解析的输入位置，常量列返回 None
    pub fn source(&self) -> Option<ColumnSource> {
        self.source
    }

    /// 输入列经过本映射后的输出列名（用于追踪排序字段）
    pub fn traced_output_name(&self, input_name: &str) -> Option<&str> {
        match (&self.input_column, self.source) {
            (Some(column), Some(ColumnSource::Input(_))) if column.name == input_name => {
                Some(&self.output_column.name)
            }
            _ => None,
        }
    }

    fn default_value(&self) -> Option<&Value> {
        self.input_column
            .as_ref()
            .and_then(|c| c.default_value.as_ref())
            .or(self.output_column.default_value.as_ref())
    }

    /// 读取当前行的值（常量列返回默认值）
    pub(crate) fn read_value(&self, row: &[Value], join_row: Option<&[Value]>) -> MapResult<Value> {
        let raw = match self.source {
            Some(source) => source.read(row, join_row),
            None => self.default_value().unwrap_or(&Value::Null),
        };
        let raw = match (raw.is_null(), self.default_value()) {
            (true, Some(default)) => default,
            _ => raw,
        };
        operations::parse(self.output_column.data_type, raw)
    }
}

#[async_trait]
impl Mapping for MapColumn {
    fn initialize_columns(&mut self, input: &Table, join: Option<&Table>) -> MapResult<()> {
        let Some(column) = &self.input_column else {
            return Ok(());
        };

        match resolve_column(&column.name, column.reference_table.as_deref(), input, join) {
            Some((source, resolved)) => {
                self.child_schema = match source {
                    ColumnSource::Input(_) => input.child_table(resolved).cloned(),
                    ColumnSource::Join(_) => join.and_then(|j| j.child_table(resolved)).cloned(),
                };
                self.source = Some(source);
                Ok(())
            }
            // 输入中没有该列时，退化为默认值常量
            None if self.default_value().is_some() => {
                self.source = None;
                Ok(())
            }
            None => Err(MappingError::schema(format!(
                "列 {} 在输入中不存在且没有默认值",
                column.qualified_name()
            ))),
        }
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        let ordinal = match &self.child_schema {
            Some(child) if self.output_column.data_type == crate::core::DataType::Node => {
                output.add_node_column_like(self.output_column.clone(), child.clone())
            }
            _ => output.add_column(self.output_column.clone()),
        };
        self.output_ordinal = Some(ordinal);
        Ok(())
    }

    async fn process_input_row(
        &mut self,
        _vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        _cancel: &CancelToken,
    ) -> MapResult<bool> {
        self.value = self.read_value(row, join_row)?;
        Ok(true)
    }

    fn map_output_row(&self, output: &mut Row) {
        if let Some(ordinal) = self.output_ordinal {
            output[ordinal] = self.value.clone();
        }
    }

    fn description(&self) -> String {
        match &self.input_column {
            Some(column) => format!(
                "Column({} -> {})",
                column.qualified_name(),
                self.output_column.name
            ),
            None => format!("Column({} = {})", self.output_column.name, self.value),
        }
    }
}

/// 外部输入列
///
/// 值不来自输入行，而是由调用方通过 `Mappings::set_input_values` 提供，
/// 未提供时使用列默认值。
#[derive(Debug, Clone)]
pub struct MapInputColumn {
    column: TableColumn,
    value: Value,
    output_ordinal: Option<usize>,
}

impl MapInputColumn {
    pub fn new(column: TableColumn) -> Self {
        let value = column.default_value.clone().unwrap_or_default();
        Self {
            column,
            value,
            output_ordinal: None,
        }
    }

    pub fn column(&self) -> &TableColumn {
        &self.column
    }

    /// 设置输入值，Null 时回退到默认值
    pub fn set_value(&mut self, value: Value) -> MapResult<()> {
        let value = if value.is_null() {
            self.column.default_value.clone().unwrap_or_default()
        } else {
            value
        };
        self.value = operations::parse(self.column.data_type, &value)?;
        Ok(())
    }
}

#[async_trait]
impl Mapping for MapInputColumn {
    fn initialize_columns(&mut self, _input: &Table, _join: Option<&Table>) -> MapResult<()> {
        Ok(())
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        self.output_ordinal = Some(output.add_column(self.column.clone()));
        Ok(())
    }

    async fn process_input_row(
        &mut self,
        _vars: &FunctionVariables,
        _row: &[Value],
        _join_row: Option<&[Value]>,
        _cancel: &CancelToken,
    ) -> MapResult<bool> {
        Ok(true)
    }

    fn map_output_row(&self, output: &mut Row) {
        if let Some(ordinal) = self.output_ordinal {
            output[ordinal] = self.value.clone();
        }
    }

    fn description(&self) -> String {
        format!("InputColumn({})", self.column.name)
    }
}

/// 分组键映射
///
/// 在列映射的基础上，其值参与分组键计算，由流水线阶段用于检测分组边界。
#[derive(Debug, Clone)]
pub struct MapGroup {
    column: MapColumn,
}

impl MapGroup {
    pub fn new(input_column: TableColumn, output_column: TableColumn) -> Self {
        let mut output_column = output_column;
        output_column.is_group_key = true;
        Self {
            column: MapColumn::new(input_column, output_column),
        }
    }

    /// 按同名列分组
    pub fn copy(column: TableColumn) -> Self {
        Self::new(column.clone(), column)
    }

    pub fn inner(&self) -> &MapColumn {
        &self.column
    }

    /// 读取输入行的分组值
    pub fn group_value(&self, row: &[Value]) -> Value {
        match self.column.source() {
            Some(source) => source.read(row, None).clone(),
            None => self
                .column
                .default_value()
                .cloned()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Mapping for MapGroup {
    fn initialize_columns(&mut self, input: &Table, join: Option<&Table>) -> MapResult<()> {
        self.column.initialize_columns(input, join)
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        self.column.add_output_columns(output)
    }

    async fn process_input_row(
        &mut self,
        vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<bool> {
        self.column.process_input_row(vars, row, join_row, cancel).await
    }

    fn map_output_row(&self, output: &mut Row) {
        self.column.map_output_row(output);
    }

    fn description(&self) -> String {
        match self.column.input_column() {
            Some(column) => format!("Group({})", column.qualified_name()),
            None => format!("Group({})", self.column.output_column().name),
        }
    }
}
