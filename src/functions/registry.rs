//! 函数注册表
//!
//! 名称到函数工厂的映射。每个函数映射通过工厂获得独立的函数实例，
//! 函数状态（分析累加、记忆化）不会在映射之间共享。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{builtin, RowFunction, ScalarFunction};
use crate::core::error::{MapResult, MappingError};

/// 函数工厂
pub type FunctionFactory = Arc<dyn Fn() -> Box<dyn RowFunction> + Send + Sync>;

/// 函数注册表
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, FunctionFactory>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.function_names())
            .finish()
    }
}

impl FunctionRegistry {
    /// 创建注册表并注册所有内置函数
    pub fn new() -> Self {
        let registry = Self::empty();
        builtin::register_all(&registry);
        registry
    }

    /// 创建空注册表
    pub fn empty() -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// 注册函数工厂，同名函数会被覆盖
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn RowFunction> + Send + Sync + 'static,
    {
        let previous = self
            .functions
            .write()
            .insert(name.to_string(), Arc::new(factory));
        if previous.is_some() {
            log::debug!("函数 {} 已被重新注册", name);
        }
    }

    /// 注册无状态标量函数
    pub fn register_scalar(&self, function: ScalarFunction) {
        let name = function.signature.name.clone();
        self.register(&name, move || Box::new(function.clone()) as Box<dyn RowFunction>);
    }

    /// 创建函数实例
    pub fn create(&self, name: &str) -> MapResult<Box<dyn RowFunction>> {
        let factory = self
            .functions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MappingError::schema(format!("未定义的函数: {}", name)))?;
        Ok(factory())
    }

    /// 检查函数是否存在
    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    /// 获取所有函数名称（已排序）
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::functions::FunctionSignature;
    use crate::mapping::MappingPhase;

    #[test]
    fn test_registry_has_builtins() {
        let registry = FunctionRegistry::new();
        for name in ["concat", "upper", "equal", "is_not_null", "running_share", "split"] {
            assert!(registry.contains(name), "缺少内置函数 {}", name);
        }
        assert!(matches!(
            registry.create("missing"),
            Err(MappingError::Schema(_))
        ));
    }

    #[test]
    fn test_register_scalar_creates_instances() {
        let registry = FunctionRegistry::empty();
        registry.register_scalar(ScalarFunction::new(
            FunctionSignature::new("one", MappingPhase::Map).returns(DataType::Int64),
            |_| Ok(crate::core::Value::Int(1)),
        ));

        let function = registry.create("one").expect("函数应存在");
        assert_eq!(function.signature().name, "one");
        assert_eq!(registry.function_names(), vec!["one".to_string()]);
    }
}
