//! 展开映射
//!
//! 分组节点的逆操作：遍历节点列中的子行，每个子行展开为一行输出，
//! 子列以 `节点名.列名` 命名。子行耗尽时返回 false，结束当前父行的行生成。

use async_trait::async_trait;
use std::sync::Arc;

use super::{FunctionVariables, Mapping, MappingPhase};
use crate::core::{CancelToken, MapResult, MappingError, Row, Table, TableColumn, Value};

#[derive(Debug)]
pub struct MapUnGroup {
    node_column: TableColumn,
    input_ordinal: Option<usize>,
    child_schema: Table,
    output_ordinals: Vec<usize>,
    current: Option<Arc<Table>>,
    position: usize,
    current_row: Option<Row>,
}

impl MapUnGroup {
    pub fn new(node_column: TableColumn) -> Self {
        Self {
            node_column,
            input_ordinal: None,
            child_schema: Table::default(),
            output_ordinals: Vec::new(),
            current: None,
            position: 0,
            current_row: None,
        }
    }

    fn clear(&mut self) {
        self.current = None;
        self.position = 0;
        self.current_row = None;
    }
}

#[async_trait]
impl Mapping for MapUnGroup {
    fn phase(&self) -> MappingPhase {
        MappingPhase::Rows
    }

    fn initialize_columns(&mut self, input: &Table, _join: Option<&Table>) -> MapResult<()> {
        let ordinal = input.get_column_ordinal(&self.node_column).ok_or_else(|| {
            MappingError::schema(format!(
                "展开列 {} 在输入中不存在",
                self.node_column.qualified_name()
            ))
        })?;
        let column = &input.columns[ordinal];
        let child = input.child_table(column).ok_or_else(|| {
            MappingError::schema(format!("列 {} 不是节点列，无法展开", column.qualified_name()))
        })?;
        self.child_schema = child.clone();
        self.input_ordinal = Some(ordinal);
        Ok(())
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        self.output_ordinals.clear();
        for column in &self.child_schema.columns {
            let mut flattened = column.clone();
            flattened.name = format!("{}.{}", self.node_column.name, column.name);
            flattened.reference_table = None;
            flattened.is_group_key = false;
            let ordinal = match self.child_schema.child_table(column) {
                Some(grandchild) => output.add_node_column_like(flattened, grandchild.clone()),
                None => output.add_column(flattened),
            };
            self.output_ordinals.push(ordinal);
        }
        Ok(())
    }

    async fn process_input_row(
        &mut self,
        _vars: &FunctionVariables,
        row: &[Value],
        _join_row: Option<&[Value]>,
        _cancel: &CancelToken,
    ) -> MapResult<bool> {
        if self.current.is_none() {
            match self.input_ordinal.and_then(|ordinal| row.get(ordinal)) {
                Some(Value::Node(table)) => {
                    self.current = Some(Arc::clone(table));
                    self.position = 0;
                }
                Some(Value::Null) | None => {
                    self.clear();
                    return Ok(false);
                }
                Some(other) => {
                    return Err(MappingError::type_mismatch(
                        format!("展开列 {} 的值不是节点值", self.node_column.name),
                        other,
                    ))
                }
            }
        }

        let next = self
            .current
            .as_ref()
            .and_then(|table| table.rows.get(self.position).cloned());
        match next {
            Some(child_row) => {
                self.position += 1;
                self.current_row = Some(child_row);
                Ok(true)
            }
            None => {
                self.clear();
                Ok(false)
            }
        }
    }

    fn map_output_row(&self, output: &mut Row) {
        for (index, ordinal) in self.output_ordinals.iter().enumerate() {
            output[*ordinal] = self
                .current_row
                .as_ref()
                .and_then(|row| row.get(index).cloned())
                .unwrap_or_default();
        }
    }

    fn reset(&mut self, phase: MappingPhase) {
        if phase == MappingPhase::Rows {
            self.clear();
        }
    }

    fn description(&self) -> String {
        format!("UnGroup({})", self.node_column.qualified_name())
    }

    fn generates_rows(&self) -> bool {
        true
    }

    fn consumes_input_column(&self, column: &TableColumn) -> bool {
        column.same_identity(&self.node_column)
    }
}
