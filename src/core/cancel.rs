//! 协作式取消标志
//!
//! 由流水线阶段创建，并传递到每一个可能挂起的调用中。
//! 映射在行边界以及每个等待点检查该标志。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::{MapResult, MappingError};

/// 取消标志
///
/// 克隆后共享同一个底层标志。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// 创建新的取消标志
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 检查是否已请求取消
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 已取消时返回 `MappingError::Cancelled`
    pub fn check(&self) -> MapResult<()> {
        if self.is_cancelled() {
            Err(MappingError::Cancelled)
        } else {
            Ok(())
        }
    }
}
