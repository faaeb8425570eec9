//! 映射算子模块
//!
//! 一个映射（`Mapping`）是一段列级逻辑，是流水线阶段的组合单元。
//! 所有具体算子通过封闭的 `MappingKind` 枚举进行静态分发，
//! 由编排器 `Mappings` 统一驱动。
//!
//! ## 生命周期
//!
//! 1. `initialize_columns`：解析并缓存输入列序号（只解析一次）
//! 2. `add_output_columns`：向输出表追加本算子产生的列
//! 3. `open`：预加载资源（例如函数缓存预热）
//! 4. `process_input_row`：逐行求值，可能挂起
//! 5. `map_output_row`：将计算结果写入输出行，同步执行
//! 6. `process_result_row`：分组结束时对缓存行求最终值
//! 7. `reset`：在分组边界清理累加状态

pub mod aggregate;
pub mod column;
pub mod filter;
pub mod function;
pub mod group_node;
pub mod join;
pub mod join_node;
pub mod mappings;
pub mod node;
pub mod series;
pub mod sort;
pub mod ungroup;
pub mod validation;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{CancelToken, MapResult, MappingError, Row, Table, TableColumn, Value};

pub use aggregate::{AggregateFunction, MapAggregate};
pub use column::{MapColumn, MapGroup, MapInputColumn};
pub use filter::MapFilter;
pub use function::{CacheMode, FunctionCacheKey, MapFunction};
pub use group_node::MapGroupNode;
pub use join::MapJoin;
pub use join_node::MapJoinNode;
pub use mappings::Mappings;
pub use node::MapNode;
pub use series::{MapSeries, SeriesGrain};
pub use sort::MapSort;
pub use ungroup::MapUnGroup;
pub use validation::{InvalidAction, MapValidation};

/// 映射执行阶段
///
/// `reset` 与 `process_result_row` 只作用于阶段匹配的算子。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MappingPhase {
    /// 逐行映射
    Map,
    /// 行过滤条件
    Condition,
    /// 连接键比较
    Join,
    /// 分组聚合
    Aggregate,
    /// 分析函数（分组内逐行求值）
    Analytic,
    /// 序列生成
    Series,
    /// 行生成器
    Rows,
    /// 数据验证
    Validate,
    /// 排序元数据
    Sort,
}

impl fmt::Display for MappingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOperator {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl CompareOperator {
    /// 按比较结果判断是否满足条件
    pub fn evaluate(&self, ordering: Ordering) -> bool {
        match self {
            CompareOperator::Equal => ordering == Ordering::Equal,
            CompareOperator::NotEqual => ordering != Ordering::Equal,
            CompareOperator::Greater => ordering == Ordering::Greater,
            CompareOperator::GreaterOrEqual => ordering != Ordering::Less,
            CompareOperator::Less => ordering == Ordering::Less,
            CompareOperator::LessOrEqual => ordering != Ordering::Greater,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOperator::Equal => "=",
            CompareOperator::NotEqual => "!=",
            CompareOperator::Greater => ">",
            CompareOperator::GreaterOrEqual => ">=",
            CompareOperator::Less => "<",
            CompareOperator::LessOrEqual => "<=",
        }
    }
}

/// 函数变量
///
/// 每次调用时的轻量上下文，在输入行阶段和结果行阶段之间传递。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionVariables {
    /// 当前行在分组内的序号
    pub index: usize,
    /// 是否为预测（外推）行
    pub is_forecast: bool,
    /// 当前行是否为序列补齐行
    pub is_filler: bool,
    /// 当前序列值
    pub series_value: Option<Value>,
}

impl FunctionVariables {
    /// 指定分组内序号的变量
    pub fn at(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }
}

/// 操作数：列引用或字面量
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column {
        name: String,
        reference_table: Option<String>,
    },
    Literal(Value),
}

impl Operand {
    pub fn column(name: impl Into<String>) -> Self {
        Operand::Column {
            name: name.into(),
            reference_table: None,
        }
    }

    /// 带引用表标记的列（通常指向连接表）
    pub fn reference(name: impl Into<String>, reference_table: impl Into<String>) -> Self {
        Operand::Column {
            name: name.into(),
            reference_table: Some(reference_table.into()),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Operand::Literal(value.into())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column {
                name,
                reference_table: Some(reference),
            } => write!(f, "{}.{}", reference, name),
            Operand::Column { name, .. } => write!(f, "{}", name),
            Operand::Literal(Value::String(s)) => write!(f, "'{}'", s),
            Operand::Literal(value) => write!(f, "{}", value),
        }
    }
}

const NULL_VALUE: &Value = &Value::Null;

/// 已解析的列位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    /// 主输入行中的序号
    Input(usize),
    /// 连接行中的序号
    Join(usize),
}

impl ColumnSource {
    /// 读取列值，越界或缺少连接行时返回 Null
    pub fn read<'a>(&self, row: &'a [Value], join_row: Option<&'a [Value]>) -> &'a Value {
        match self {
            ColumnSource::Input(ordinal) => row.get(*ordinal).unwrap_or(NULL_VALUE),
            ColumnSource::Join(ordinal) => join_row
                .and_then(|join| join.get(*ordinal))
                .unwrap_or(NULL_VALUE),
        }
    }
}

/// 在输入表（其次是连接表）中查找列
pub(crate) fn resolve_column<'a>(
    name: &str,
    reference_table: Option<&str>,
    input: &'a Table,
    join: Option<&'a Table>,
) -> Option<(ColumnSource, &'a TableColumn)> {
    if let Some(ordinal) = input.get_ordinal_with_reference(name, reference_table) {
        return Some((ColumnSource::Input(ordinal), &input.columns[ordinal]));
    }
    let join = join?;
    join.get_ordinal_with_reference(name, reference_table)
        .map(|ordinal| (ColumnSource::Join(ordinal), &join.columns[ordinal]))
}

/// 已解析的操作数
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedOperand {
    Column(ColumnSource),
    Literal(Value),
}

impl ResolvedOperand {
    pub fn read<'a>(&'a self, row: &'a [Value], join_row: Option<&'a [Value]>) -> &'a Value {
        match self {
            ResolvedOperand::Column(source) => source.read(row, join_row),
            ResolvedOperand::Literal(value) => value,
        }
    }
}

/// 解析操作数，列不存在时返回架构错误
pub(crate) fn resolve_operand(
    operand: &Operand,
    input: &Table,
    join: Option<&Table>,
) -> MapResult<(ResolvedOperand, crate::core::DataType)> {
    match operand {
        Operand::Literal(value) => Ok((ResolvedOperand::Literal(value.clone()), value.get_type())),
        Operand::Column {
            name,
            reference_table,
        } => resolve_column(name, reference_table.as_deref(), input, join)
            .map(|(source, column)| (ResolvedOperand::Column(source), column.data_type))
            .ok_or_else(|| MappingError::schema(format!("列 {} 在输入中不存在", operand))),
    }
}

/// 映射算子契约
#[async_trait]
pub trait Mapping: Send + fmt::Debug {
    /// 算子所属阶段
    fn phase(&self) -> MappingPhase {
        MappingPhase::Map
    }

    /// 解析并缓存输入列序号
    fn initialize_columns(&mut self, input: &Table, join: Option<&Table>) -> MapResult<()>;

    /// 追加本算子产生的输出列
    fn add_output_columns(&mut self, _output: &mut Table) -> MapResult<()> {
        Ok(())
    }

    /// 预加载资源
    async fn open(&mut self, _cancel: &CancelToken) -> MapResult<()> {
        Ok(())
    }

    /// 对当前行（及连接行）求值，返回 false 表示丢弃或不匹配
    async fn process_input_row(
        &mut self,
        vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<bool>;

    /// 将计算结果写入输出行
    fn map_output_row(&self, _output: &mut Row) {}

    /// 分组结束时对缓存行求最终值，返回 true 表示需要再输出一行
    async fn process_result_row(
        &mut self,
        _vars: &FunctionVariables,
        _row: &mut Row,
        _phase: MappingPhase,
        _cancel: &CancelToken,
    ) -> MapResult<bool> {
        Ok(false)
    }

    /// 在缺失的序列点上构造补齐行
    fn process_filler_row(&mut self, _row: &[Value], _filler: &mut Row, _series_value: &Value) {}

    /// 清理累加状态
    fn reset(&mut self, _phase: MappingPhase) {}

    /// 用于日志与错误消息的描述
    fn description(&self) -> String;

    /// 当前行是否被标记为忽略（拒绝）
    fn ignore_row(&self) -> bool {
        false
    }

    /// 是否为行生成器（同一输入行可产生多行输出）
    fn generates_rows(&self) -> bool {
        false
    }

    /// 是否消费了指定输入列（被消费的列不做透传）
    fn consumes_input_column(&self, _column: &TableColumn) -> bool {
        false
    }
}

/// 映射算子的封闭集合
///
/// 使用枚举替代 `Box<dyn Mapping>`，编排器可以按种类识别算子
/// （分组键、连接键、序列、节点等）而无需运行时类型检查。
#[derive(Debug)]
pub enum MappingKind {
    Column(MapColumn),
    InputColumn(MapInputColumn),
    Group(MapGroup),
    Sort(MapSort),
    Filter(MapFilter),
    Join(MapJoin),
    Aggregate(MapAggregate),
    Function(MapFunction),
    Validation(MapValidation),
    Series(MapSeries),
    GroupNode(MapGroupNode),
    JoinNode(MapJoinNode),
    Node(MapNode),
    UnGroup(MapUnGroup),
}

impl MappingKind {
    pub fn as_mapping(&self) -> &dyn Mapping {
        match self {
            MappingKind::Column(m) => m,
            MappingKind::InputColumn(m) => m,
            MappingKind::Group(m) => m,
            MappingKind::Sort(m) => m,
            MappingKind::Filter(m) => m,
            MappingKind::Join(m) => m,
            MappingKind::Aggregate(m) => m,
            MappingKind::Function(m) => m,
            MappingKind::Validation(m) => m,
            MappingKind::Series(m) => m,
            MappingKind::GroupNode(m) => m,
            MappingKind::JoinNode(m) => m,
            MappingKind::Node(m) => m,
            MappingKind::UnGroup(m) => m,
        }
    }

    pub fn as_mapping_mut(&mut self) -> &mut dyn Mapping {
        match self {
            MappingKind::Column(m) => m,
            MappingKind::InputColumn(m) => m,
            MappingKind::Group(m) => m,
            MappingKind::Sort(m) => m,
            MappingKind::Filter(m) => m,
            MappingKind::Join(m) => m,
            MappingKind::Aggregate(m) => m,
            MappingKind::Function(m) => m,
            MappingKind::Validation(m) => m,
            MappingKind::Series(m) => m,
            MappingKind::GroupNode(m) => m,
            MappingKind::JoinNode(m) => m,
            MappingKind::Node(m) => m,
            MappingKind::UnGroup(m) => m,
        }
    }

    /// 存在分组节点时，留在父级（主集合）的算子
    pub fn is_primary(&self) -> bool {
        matches!(
            self,
            MappingKind::Group(_)
                | MappingKind::GroupNode(_)
                | MappingKind::Join(_)
                | MappingKind::Sort(_)
        )
    }

    /// 是否属于过滤类算子（先于其他算子求值）
    pub fn is_condition(&self) -> bool {
        matches!(
            self.as_mapping().phase(),
            MappingPhase::Condition | MappingPhase::Join
        )
    }
}

macro_rules! impl_from_mapping {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for MappingKind {
                fn from(mapping: $ty) -> Self {
                    MappingKind::$variant(mapping)
                }
            }
        )*
    };
}

impl_from_mapping! {
    Column => MapColumn,
    InputColumn => MapInputColumn,
    Group => MapGroup,
    Sort => MapSort,
    Filter => MapFilter,
    Join => MapJoin,
    Aggregate => MapAggregate,
    Function => MapFunction,
    Validation => MapValidation,
    Series => MapSeries,
    GroupNode => MapGroupNode,
    JoinNode => MapJoinNode,
    Node => MapNode,
    UnGroup => MapUnGroup,
}
