//! 逐行映射阶段

use async_trait::async_trait;
use std::collections::VecDeque;

use super::Transform;
use crate::core::{CancelToken, MapResult, Row, Table};
use crate::mapping::{Mappings, MappingPhase};

/// 对输入流逐行执行一组映射
///
/// 行生成器产生的多行按顺序排队输出。
#[derive(Debug)]
pub struct MappingTransform {
    input: Box<dyn Transform>,
    mappings: Mappings,
    schema: Table,
    pending: VecDeque<Row>,
    rows_read: u64,
    rows_written: u64,
}

impl MappingTransform {
    pub fn new(input: Box<dyn Transform>, mut mappings: Mappings) -> MapResult<Self> {
        let schema = mappings.initialize(input.schema(), None, None)?;
        Ok(Self {
            input,
            mappings,
            schema,
            pending: VecDeque::new(),
            rows_read: 0,
            rows_written: 0,
        })
    }

    pub fn mappings(&self) -> &Mappings {
        &self.mappings
    }

    pub fn mappings_mut(&mut self) -> &mut Mappings {
        &mut self.mappings
    }
}

#[async_trait]
impl Transform for MappingTransform {
    fn schema(&self) -> &Table {
        &self.schema
    }

    async fn open(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.input.open(cancel).await?;
        self.mappings.open(cancel).await
    }

    async fn read_row(&mut self, cancel: &CancelToken) -> MapResult<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                self.rows_written += 1;
                return Ok(Some(row));
            }

            let Some(row) = self.input.read_row(cancel).await? else {
                log::debug!(
                    "映射阶段 {} 完成: 读取 {} 行, 输出 {} 行",
                    self.schema.name,
                    self.rows_read,
                    self.rows_written
                );
                return Ok(None);
            };
            self.rows_read += 1;
            self.pending.extend(self.mappings.map_row(&row, None, cancel).await?);
        }
    }

    async fn reset(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.input.reset(cancel).await?;
        self.pending.clear();
        self.mappings.reset(MappingPhase::Rows);
        self.rows_read = 0;
        self.rows_written = 0;
        Ok(())
    }
}
