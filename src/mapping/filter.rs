//! 过滤映射
//!
//! 最多两个操作数（列或字面量）和一个比较运算符。
//! 只有一个操作数时，该操作数必须是布尔值，为 true 时保留行。

use std::cmp::Ordering;

use async_trait::async_trait;

use super::{resolve_operand, CompareOperator, FunctionVariables, Mapping, MappingPhase, Operand, ResolvedOperand};
use crate::core::value::operations;
use crate::core::{CancelToken, DataType, MapResult, MappingError, Table, Value};

#[derive(Debug, Clone)]
pub struct MapFilter {
    left: Operand,
    right: Option<Operand>,
    operator: CompareOperator,
    compare_type: Option<DataType>,
    resolved: Option<(ResolvedOperand, Option<ResolvedOperand>)>,
    data_type: DataType,
}

impl MapFilter {
    pub fn new(left: Operand, operator: CompareOperator, right: Operand) -> Self {
        Self {
            left,
            right: Some(right),
            operator,
            compare_type: None,
            resolved: None,
            data_type: DataType::Unknown,
        }
    }

    /// 单操作数过滤：操作数为 true 时保留行
    pub fn condition(operand: Operand) -> Self {
        Self {
            left: operand,
            right: None,
            operator: CompareOperator::Equal,
            compare_type: Some(DataType::Boolean),
            resolved: None,
            data_type: DataType::Boolean,
        }
    }

    /// 指定比较时使用的类型（默认取第一个操作数的类型）
    pub fn with_compare_type(mut self, data_type: DataType) -> Self {
        self.compare_type = Some(data_type);
        self
    }

    pub fn operator(&self) -> CompareOperator {
        self.operator
    }

    /// 对一对值求值
    pub fn evaluate(&self, left: &Value, right: Option<&Value>) -> MapResult<bool> {
        match right {
            Some(right) => {
                let ordering: Ordering = operations::compare(self.data_type, left, right)?;
                Ok(self.operator.evaluate(ordering))
            }
            None => match operations::parse(DataType::Boolean, left)? {
                Value::Bool(b) => Ok(b),
                Value::Null => Ok(false),
                other => Err(MappingError::type_mismatch("过滤条件必须是布尔值", other)),
            },
        }
    }
}

#[async_trait]
impl Mapping for MapFilter {
    fn phase(&self) -> MappingPhase {
        MappingPhase::Condition
    }

    fn initialize_columns(&mut self, input: &Table, join: Option<&Table>) -> MapResult<()> {
        let (left, left_type) = resolve_operand(&self.left, input, join)?;
        let right = match &self.right {
            Some(operand) => {
                let (right, right_type) = resolve_operand(operand, input, join)?;
                if self.compare_type.is_none() {
                    self.data_type = if left_type == DataType::Unknown {
                        right_type
                    } else {
                        left_type
                    };
                }
                Some(right)
            }
            None => None,
        };
        if let Some(data_type) = self.compare_type {
            self.data_type = data_type;
        }
        self.resolved = Some((left, right));
        Ok(())
    }

    async fn process_input_row(
        &mut self,
        _vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        _cancel: &CancelToken,
    ) -> MapResult<bool> {
        let Some((left, right)) = &self.resolved else {
            return Err(MappingError::schema(format!("{} 尚未初始化", self.description())));
        };
        let left = left.read(row, join_row);
        let right = right.as_ref().map(|r| r.read(row, join_row));
        self.evaluate(left, right)
    }

    fn description(&self) -> String {
        match &self.right {
            Some(right) => format!("Filter({} {} {})", self.left, self.operator.symbol(), right),
            None => format!("Filter({})", self.left),
        }
    }
}
