//! 排序元数据映射
//!
//! 不做任何行变换，只把排序信息带入输出表，
//! 由编排器追踪重命名后写入 `Table::sort_fields`。

use async_trait::async_trait;

use super::{FunctionVariables, Mapping, MappingPhase};
use crate::core::{CancelToken, MapResult, MappingError, SortField, Table, Value};

#[derive(Debug, Clone)]
pub struct MapSort {
    fields: Vec<SortField>,
}

impl MapSort {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }
}

#[async_trait]
impl Mapping for MapSort {
    fn phase(&self) -> MappingPhase {
        MappingPhase::Sort
    }

    fn initialize_columns(&mut self, input: &Table, _join: Option<&Table>) -> MapResult<()> {
        for field in &self.fields {
            if input.get_ordinal(&field.column).is_none() {
                return Err(MappingError::schema(format!(
                    "排序列 {} 在输入中不存在",
                    field.column
                )));
            }
        }
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

    fn description(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{} {:?}", f.column, f.direction))
            .collect();
        format!("Sort({})", fields.join(", "))
    }
}
