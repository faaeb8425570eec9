//! 节点映射
//!
//! 对一个已经是节点值的输入列，逐行运行一组内部映射，
//! 可选地再经过一组输出映射，结果作为新的节点列输出。

use async_trait::async_trait;
use std::sync::Arc;

use super::{FunctionVariables, Mapping, MappingPhase, Mappings};
use crate::core::{CancelToken, MapResult, MappingError, Row, Table, TableColumn, Value};

#[derive(Debug)]
pub struct MapNode {
    input_column: TableColumn,
    output_column: TableColumn,
    transform: Mappings,
    output: Option<Mappings>,
    input_ordinal: Option<usize>,
    child_schema: Table,
    output_ordinal: Option<usize>,
    value: Value,
}

impl MapNode {
    pub fn new(input_column: TableColumn, output_column: TableColumn, transform: Mappings) -> Self {
        Self {
            input_column,
            output_column,
            transform,
            output: None,
            input_ordinal: None,
            child_schema: Table::default(),
            output_ordinal: None,
            value: Value::Null,
        }
    }

    /// 内部映射之后再执行的输出映射
    pub fn with_output(mut self, output: Mappings) -> Self {
        self.output = Some(output);
        self
    }

    async fn map_child_rows(&mut self, child: &Table, cancel: &CancelToken) -> MapResult<Vec<Row>> {
        let mut rows = Vec::new();
        for child_row in &child.rows {
            cancel.check()?;
            for mapped in self.transform.map_row(child_row, None, cancel).await? {
                match &mut self.output {
                    Some(output) => rows.extend(output.map_row(&mapped, None, cancel).await?),
                    None => rows.push(mapped),
                }
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl Mapping for MapNode {
    fn initialize_columns(&mut self, input: &Table, _join: Option<&Table>) -> MapResult<()> {
        let ordinal = input.get_column_ordinal(&self.input_column).ok_or_else(|| {
            MappingError::schema(format!(
                "节点列 {} 在输入中不存在",
                self.input_column.qualified_name()
            ))
        })?;
        let column = &input.columns[ordinal];
        let child = input.child_table(column).ok_or_else(|| {
            MappingError::schema(format!("列 {} 不是节点列", column.qualified_name()))
        })?;

        let inner = self.transform.initialize(child, None, None)?;
        let mut schema = match &mut self.output {
            Some(output) => output.initialize(&inner, None, None)?,
            None => inner,
        };
        schema.name = self.output_column.name.clone();

        self.input_ordinal = Some(ordinal);
        self.child_schema = schema;
        Ok(())
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        self.output_ordinal = Some(output.add_node_column_like(self.output_column.clone(), self.child_schema.clone()));
        Ok(())
    }

    async fn open(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.transform.open(cancel).await?;
        if let Some(output) = &mut self.output {
            output.open(cancel).await?;
        }
        Ok(())
    }

    async fn process_input_row(
        &mut self,
        _vars: &FunctionVariables,
        row: &[Value],
        _join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<bool> {
        let input = self
            .input_ordinal
            .and_then(|ordinal| row.get(ordinal))
            .unwrap_or(&Value::Null);
        let child = match input {
            Value::Node(table) => Arc::clone(table),
            Value::Null => {
                self.value = Value::Null;
                return Ok(true);
            }
            other => {
                return Err(MappingError::type_mismatch(
                    format!("节点映射 {} 的输入不是节点值", self.input_column.name),
                    other,
                ))
            }
        };

        let rows = self.map_child_rows(&child, cancel).await?;
        let mut table = self.child_schema.clone();
        table.rows = rows;
        self.value = Value::node(table);
        Ok(true)
    }

    fn map_output_row(&self, output: &mut Row) {
        if let Some(ordinal) = self.output_ordinal {
            output[ordinal] = self.value.clone();
        }
    }

    fn reset(&mut self, phase: MappingPhase) {
        if phase == MappingPhase::Rows {
            self.transform.reset(phase);
            if let Some(output) = &mut self.output {
                output.reset(phase);
            }
        }
    }

    fn description(&self) -> String {
        format!(
            "Node({} -> {})",
            self.input_column.qualified_name(),
            self.output_column.name
        )
    }

    fn consumes_input_column(&self, column: &TableColumn) -> bool {
        column.same_identity(&self.input_column) && self.input_column.name != self.output_column.name
    }
}
