//! 流水线阶段
//!
//! 每个阶段都是一个拉取式的行流：下游调用 `read_row` 逐行读取，
//! 阶段内部驱动一组 `Mappings` 完成映射、分组聚合或合并连接。

pub mod group;
pub mod join;
pub mod mapping;

pub use group::{GroupMode, GroupTransform};
pub use join::{JoinMode, JoinTransform};
pub use mapping::MappingTransform;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::core::{CancelToken, MapResult, Row, Table};

/// 统一的行流 trait
#[async_trait]
pub trait Transform: Send + Debug {
    /// 输出表结构
    fn schema(&self) -> &Table;

    /// 打开行流（预加载资源）
    async fn open(&mut self, _cancel: &CancelToken) -> MapResult<()> {
        Ok(())
    }

    /// 读取下一行，流结束时返回 None
    async fn read_row(&mut self, cancel: &CancelToken) -> MapResult<Option<Row>>;

    /// 回到流的起点
    async fn reset(&mut self, cancel: &CancelToken) -> MapResult<()>;

    /// 读取剩余的全部行
    async fn read_all(&mut self, cancel: &CancelToken) -> MapResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.read_row(cancel).await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// 内存表行流
#[derive(Debug, Clone)]
pub struct MemoryTransform {
    table: Table,
    position: usize,
}

impl MemoryTransform {
    pub fn new(table: Table) -> Self {
        Self { table, position: 0 }
    }
}

#[async_trait]
impl Transform for MemoryTransform {
    fn schema(&self) -> &Table {
        &self.table
    }

    async fn read_row(&mut self, cancel: &CancelToken) -> MapResult<Option<Row>> {
        cancel.check()?;
        let row = self.table.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }

    async fn reset(&mut self, _cancel: &CancelToken) -> MapResult<()> {
        self.position = 0;
        Ok(())
    }
}
