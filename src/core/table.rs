//! 表结构模型
//!
//! `Table` 是有序的列集合，同时可以携带内存中的行数据。
//! 节点列（嵌套子表）不直接引用子表，而是保存一个指向
//! `Table::child_tables` 的下标，子表由父表统一持有，避免循环引用。

use serde::{Deserialize, Serialize};

use super::value::{DataType, Value};

/// 行：按列序号定位的值序列
pub type Row = Vec<Value>;

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// 排序字段
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    pub column: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    pub fn ascending(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Ascending)
    }
}

/// 列定义
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    /// 列名
    pub name: String,
    /// 语义类型
    pub data_type: DataType,
    /// 是否允许为空
    pub allow_null: bool,
    /// 默认值
    pub default_value: Option<Value>,
    /// 引用表标记（区分连接侧的同名列）
    pub reference_table: Option<String>,
    /// 是否为分组键
    pub is_group_key: bool,
    /// 是否为连接键
    pub is_join_key: bool,
    /// 子表下标，仅节点列有值
    pub child_table: Option<usize>,
}

impl TableColumn {
    /// 创建新的列
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            allow_null: true,
            default_value: None,
            reference_table: None,
            is_group_key: false,
            is_join_key: false,
            child_table: None,
        }
    }

    /// 设置默认值
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// 设置引用表标记
    pub fn with_reference(mut self, reference_table: impl Into<String>) -> Self {
        self.reference_table = Some(reference_table.into());
        self
    }

    /// 是否为节点列
    pub fn is_node(&self) -> bool {
        self.child_table.is_some()
    }

    /// 按（列名，引用表）判断是否为同一列
    pub fn same_identity(&self, other: &TableColumn) -> bool {
        self.name == other.name && self.reference_table == other.reference_table
    }

    /// 用于日志与错误消息的列名
    pub fn qualified_name(&self) -> String {
        match &self.reference_table {
            Some(reference) => format!("{}.{}", reference, self.name),
            None => self.name.clone(),
        }
    }
}

/// 表定义（列 + 可选的内存行数据）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// 表名
    pub name: String,
    /// 连接时使用的别名，列引用可以用别名代替表名
    pub alias: Option<String>,
    /// 有序列集合
    pub columns: Vec<TableColumn>,
    /// 子表（节点列的结构），节点列通过下标引用
    pub child_tables: Vec<Table>,
    /// 数据已按这些字段排序
    pub sort_fields: Vec<SortField>,
    /// 内存中的行数据
    pub rows: Vec<Row>,
}

impl Table {
    /// 创建空表
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 设置连接别名
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// 使用给定的列创建表
    pub fn with_columns(name: impl Into<String>, columns: Vec<TableColumn>) -> Self {
        let mut table = Self::new(name);
        for column in columns {
            table.add_column(column);
        }
        table
    }

    /// 追加一列，返回其序号
    pub fn add_column(&mut self, mut column: TableColumn) -> usize {
        // 普通列不携带子表下标
        if column.data_type != DataType::Node {
            column.child_table = None;
        }
        self.columns.push(column);
        self.columns.len() - 1
    }

    /// 追加一个节点列，子表结构存入子表区
    pub fn add_node_column(&mut self, name: impl Into<String>, child: Table) -> usize {
        self.add_node_column_like(TableColumn::new(name, DataType::Node), child)
    }

    /// 以给定列定义追加节点列（保留引用表等属性）
    pub fn add_node_column_like(&mut self, mut column: TableColumn, child: Table) -> usize {
        let mut schema = child;
        schema.rows.clear();
        self.child_tables.push(schema);
        column.data_type = DataType::Node;
        column.child_table = Some(self.child_tables.len() - 1);
        self.columns.push(column);
        self.columns.len() - 1
    }

    /// 获取节点列对应的子表结构
    pub fn child_table(&self, column: &TableColumn) -> Option<&Table> {
        column.child_table.and_then(|index| self.child_tables.get(index))
    }

    /// 按列名查找序号
    ///
    /// 优先返回没有引用表标记的列。
    pub fn get_ordinal(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name && c.reference_table.is_none())
            .or_else(|| self.columns.iter().position(|c| c.name == name))
    }

    /// 按（列名，引用表）查找序号
    pub fn get_ordinal_with_reference(&self, name: &str, reference_table: Option<&str>) -> Option<usize> {
        match reference_table {
            None => self.get_ordinal(name),
            Some(reference) => self
                .columns
                .iter()
                .position(|c| c.name == name && c.reference_table.as_deref() == Some(reference))
                // 连接表本身的列通常不带引用标记
                .or_else(|| {
                    if self.name == reference || self.alias.as_deref() == Some(reference) {
                        self.get_ordinal(name)
                    } else {
                        None
                    }
                }),
        }
    }

    /// 按列定义查找序号
    pub fn get_column_ordinal(&self, column: &TableColumn) -> Option<usize> {
        self.get_ordinal_with_reference(&column.name, column.reference_table.as_deref())
    }

    /// 按列名获取列
    pub fn get_column(&self, name: &str) -> Option<&TableColumn> {
        self.get_ordinal(name).map(|i| &self.columns[i])
    }

    /// 是否已存在相同（列名，引用表）的列
    pub fn contains_identity(&self, column: &TableColumn) -> bool {
        self.columns.iter().any(|c| c.same_identity(column))
    }

    /// 列名列表
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// 列数
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// 创建一行全为 Null 的空行
    pub fn new_row(&self) -> Row {
        vec![Value::Null; self.columns.len()]
    }

    /// 复制表结构（不含行数据）
    pub fn schema_only(&self) -> Table {
        Table {
            name: self.name.clone(),
            alias: self.alias.clone(),
            columns: self.columns.clone(),
            child_tables: self.child_tables.clone(),
            sort_fields: self.sort_fields.clone(),
            rows: Vec::new(),
        }
    }
}
