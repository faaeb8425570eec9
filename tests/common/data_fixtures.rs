//! 测试数据生成模块
//!
//! 提供各种测试数据表的生成函数

use chrono::NaiveDate;
use mapflow::core::{DataType, SortField, Table, TableColumn, Value};

/// 创建日期值
pub fn date(year: i32, month: u32, day: u32) -> Value {
    NaiveDate::from_ymd_opt(year, month, day)
        .map(Value::Date)
        .expect("无效的测试日期")
}

/// 按列定义与行数据创建表
pub fn table(name: &str, columns: Vec<TableColumn>, rows: Vec<Vec<Value>>) -> Table {
    let mut table = Table::with_columns(name, columns);
    table.rows = rows;
    table
}

/// 销售明细：按 region 排序
pub fn sales_table() -> Table {
    let mut sales = table(
        "sales",
        vec![
            TableColumn::new("region", DataType::String),
            TableColumn::new("product", DataType::String),
            TableColumn::new("amount", DataType::Int64),
        ],
        vec![
            vec![Value::from("east"), Value::from("tea"), Value::Int(10)],
            vec![Value::from("east"), Value::from("cake"), Value::Null],
            vec![Value::from("east"), Value::from("milk"), Value::Int(5)],
            vec![Value::from("west"), Value::from("tea"), Value::Int(7)],
            vec![Value::from("west"), Value::from("cake"), Value::Int(1)],
        ],
    );
    sales.sort_fields = vec![SortField::ascending("region")];
    sales
}

/// 日粒度数据：按 grp、day 排序，2024-01-02 缺失
pub fn daily_table() -> Table {
    let mut daily = table(
        "daily",
        vec![
            TableColumn::new("grp", DataType::String),
            TableColumn::new("day", DataType::Date),
            TableColumn::new("amt", DataType::Int64),
        ],
        vec![
            vec![Value::from("A"), date(2024, 1, 1), Value::Int(10)],
            vec![Value::from("A"), date(2024, 1, 3), Value::Int(5)],
        ],
    );
    daily.sort_fields = vec![SortField::ascending("grp"), SortField::ascending("day")];
    daily
}

/// 客户表：按 id 排序
pub fn customers_table() -> Table {
    let mut customers = table(
        "customers",
        vec![
            TableColumn::new("id", DataType::Int64),
            TableColumn::new("name", DataType::String),
        ],
        vec![
            vec![Value::Int(1), Value::from("ann")],
            vec![Value::Int(2), Value::from("bob")],
            vec![Value::Int(4), Value::from("dan")],
        ],
    );
    customers.sort_fields = vec![SortField::ascending("id")];
    customers
}

/// 订单表：按 customer_id 排序，customer_id = 3 没有对应客户
pub fn orders_table() -> Table {
    let mut orders = table(
        "orders",
        vec![
            TableColumn::new("order_id", DataType::Int64),
            TableColumn::new("customer_id", DataType::Int64),
            TableColumn::new("total", DataType::Double),
        ],
        vec![
            vec![Value::Int(100), Value::Int(1), Value::Float(9.5)],
            vec![Value::Int(101), Value::Int(1), Value::Float(3.0)],
            vec![Value::Int(102), Value::Int(3), Value::Float(4.0)],
            vec![Value::Int(103), Value::Int(4), Value::Float(8.0)],
        ],
    );
    orders.sort_fields = vec![SortField::ascending("customer_id")];
    orders
}
