//! Value 模块 - 行数据值类型系统
//!
//! 此模块提供了映射引擎中的核心值类型系统，包括：
//! - 核心类型定义 (`types.rs`)
//! - 比较与哈希 (`comparison.rs`)
//! - 类型化运算 (`operations.rs`)

pub mod comparison;
pub mod operations;
pub mod types;

pub use types::*;
