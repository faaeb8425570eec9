//! 集成测试共享工具模块
//!
//! 提供测试数据表、行流构造与结果收集等辅助函数，供所有集成测试使用

#![allow(dead_code)]

pub mod assertions;
pub mod data_fixtures;

use mapflow::core::{CancelToken, MapResult, Row, Table};
use mapflow::transform::{MemoryTransform, Transform};

/// 以内存表构造输入行流
pub fn memory(table: Table) -> Box<dyn Transform> {
    Box::new(MemoryTransform::new(table))
}

/// 打开行流并读取全部输出行
pub async fn collect(transform: &mut dyn Transform) -> MapResult<Vec<Row>> {
    let cancel = CancelToken::new();
    transform.open(&cancel).await?;
    transform.read_all(&cancel).await
}
