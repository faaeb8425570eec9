//! 流水线阶段集成测试
//!
//! 测试范围:
//! - transform::GroupTransform - 分组聚合、序列补齐、分析函数
//! - transform::JoinTransform - 排序合并连接（内连接、左外连接）
//! - mapping::MapGroupNode / MapUnGroup - 分组为节点与展开

mod common;

use common::assertions::{assert_count, assert_ok, column};
use common::data_fixtures::{customers_table, daily_table, date, orders_table, sales_table};
use common::{collect, memory};
use mapflow::core::{CancelToken, DataType, TableColumn, Value};
use mapflow::functions::FunctionRegistry;
use mapflow::mapping::{
    AggregateFunction, MapAggregate, MapColumn, MapFunction, MapGroup, MapGroupNode, MapJoin, MapSeries,
    MapUnGroup, Mappings, Operand, SeriesGrain,
};
use mapflow::transform::{GroupMode, GroupTransform, JoinMode, JoinTransform, MappingTransform, Transform};

fn daily_mappings() -> Mappings {
    Mappings::new()
        .with_pass_through(false)
        .with(MapGroup::copy(TableColumn::new("grp", DataType::String)))
        .with(
            MapSeries::new(
                TableColumn::new("day", DataType::Date),
                TableColumn::new("day", DataType::Date),
                SeriesGrain::Day,
            )
            .with_fill_gaps(true),
        )
        .with(MapAggregate::new(
            AggregateFunction::Sum,
            TableColumn::new("amt", DataType::Int64),
            TableColumn::new("amt", DataType::Int64),
        ))
}

// ==================== 分组聚合测试 ====================

#[tokio::test]
async fn test_series_gap_filling_round_trip() {
    let mut transform = assert_ok(GroupTransform::new(
        memory(daily_table()),
        daily_mappings(),
        GroupMode::Aggregate,
    ));
    assert_eq!(transform.schema().column_names(), vec!["grp", "day", "amt"]);

    let rows = assert_ok(collect(&mut transform).await);
    assert_eq!(
        rows,
        vec![
            vec![Value::from("A"), date(2024, 1, 1), Value::Int(10)],
            vec![Value::from("A"), date(2024, 1, 2), Value::Int(0)],
            vec![Value::from("A"), date(2024, 1, 3), Value::Int(5)],
        ]
    );
}

#[tokio::test]
async fn test_series_fills_to_finish_bounds() {
    let mappings = Mappings::new()
        .with_pass_through(false)
        .with(MapGroup::copy(TableColumn::new("grp", DataType::String)))
        .with(
            MapSeries::new(
                TableColumn::new("day", DataType::Date),
                TableColumn::new("day", DataType::Date),
                SeriesGrain::Day,
            )
            .with_fill_gaps(true)
            .with_start(date(2023, 12, 31))
            .with_finish(date(2024, 1, 4)),
        )
        .with(MapAggregate::count(TableColumn::new("n", DataType::Int64)));
    let mut transform = assert_ok(GroupTransform::new(memory(daily_table()), mappings, GroupMode::Aggregate));
    let rows = assert_ok(collect(&mut transform).await);

    assert_eq!(
        column(&rows, 1),
        vec![
            date(2023, 12, 31),
            date(2024, 1, 1),
            date(2024, 1, 2),
            date(2024, 1, 3),
            date(2024, 1, 4),
        ]
    );
    // 补齐行不计数
    assert_eq!(
        column(&rows, 2),
        vec![Value::Int(0), Value::Int(1), Value::Int(0), Value::Int(1), Value::Int(0)]
    );
}

#[tokio::test]
async fn test_aggregate_correctness_per_group() {
    let aggregate = |function, output: &str, data_type| {
        MapAggregate::new(
            function,
            TableColumn::new("amount", DataType::Int64),
            TableColumn::new(output, data_type),
        )
    };
    let mappings = Mappings::new()
        .with_pass_through(false)
        .with(MapGroup::copy(TableColumn::new("region", DataType::String)))
        .with(aggregate(AggregateFunction::Sum, "sum", DataType::Int64))
        .with(aggregate(AggregateFunction::Average, "avg", DataType::Double))
        .with(aggregate(AggregateFunction::Count, "count", DataType::Int64))
        .with(aggregate(AggregateFunction::Min, "min", DataType::Int64))
        .with(aggregate(AggregateFunction::Max, "max", DataType::Int64))
        .with(aggregate(AggregateFunction::First, "first", DataType::Int64))
        .with(aggregate(AggregateFunction::Last, "last", DataType::Int64));

    let mut transform = assert_ok(GroupTransform::new(memory(sales_table()), mappings, GroupMode::Aggregate));
    let rows = assert_ok(collect(&mut transform).await);

    // east: 10, NULL, 5    west: 7, 1
    assert_eq!(
        rows,
        vec![
            vec![
                Value::from("east"),
                Value::Int(15),
                Value::Float(7.5),
                Value::Int(3),
                Value::Int(5),
                Value::Int(10),
                Value::Int(10),
                Value::Int(5),
            ],
            vec![
                Value::from("west"),
                Value::Int(8),
                Value::Float(4.0),
                Value::Int(2),
                Value::Int(1),
                Value::Int(7),
                Value::Int(7),
                Value::Int(1),
            ],
        ]
    );
}

#[tokio::test]
async fn test_analytic_mode_emits_every_row() {
    let registry = FunctionRegistry::new();
    let share = assert_ok(MapFunction::from_registry(
        &registry,
        "running_share",
        vec![Operand::column("amount")],
    ))
    .with_return(TableColumn::new("share", DataType::Double));
    let mappings = Mappings::new()
        .with(MapGroup::copy(TableColumn::new("region", DataType::String)))
        .with(share);

    let mut transform = assert_ok(GroupTransform::new(memory(sales_table()), mappings, GroupMode::Analytic));
    assert_eq!(
        transform.schema().column_names(),
        vec!["region", "share", "product", "amount"]
    );
    let rows = assert_ok(collect(&mut transform).await);

    assert_count(&rows, 5, "输出行");
    assert_eq!(rows[1][1], Value::Float(0.0));
    assert_eq!(rows[3][1], Value::Float(0.875));
    assert_eq!(rows[4][1], Value::Float(0.125));
    assert_eq!(
        column(&rows, 2),
        vec![
            Value::from("tea"),
            Value::from("cake"),
            Value::from("milk"),
            Value::from("tea"),
            Value::from("cake"),
        ]
    );
}

// ==================== 合并连接测试 ====================

fn join_mappings() -> Mappings {
    Mappings::new().with(MapJoin::new(
        TableColumn::new("customer_id", DataType::Int64),
        TableColumn::new("id", DataType::Int64),
    ))
}

#[tokio::test]
async fn test_inner_merge_join() {
    let mut transform = assert_ok(JoinTransform::new(
        memory(orders_table()),
        memory(customers_table()),
        join_mappings(),
        JoinMode::Inner,
        None,
    ));
    let rows = assert_ok(collect(&mut transform).await);

    assert_eq!(column(&rows, 0), vec![Value::Int(100), Value::Int(101), Value::Int(103)]);
    assert_eq!(column(&rows, 4), vec![Value::from("ann"), Value::from("ann"), Value::from("dan")]);
}

#[tokio::test]
async fn test_left_outer_merge_join_keeps_unmatched() {
    let mut transform = assert_ok(JoinTransform::new(
        memory(orders_table()),
        memory(customers_table()),
        join_mappings(),
        JoinMode::LeftOuter,
        Some("c"),
    ));
    assert_eq!(transform.schema().columns[4].qualified_name(), "c.name");
    let rows = assert_ok(collect(&mut transform).await);

    assert_count(&rows, 4, "输出行");
    assert_eq!(rows[2], vec![Value::Int(102), Value::Int(3), Value::Float(4.0), Value::Null, Value::Null]);
}

#[tokio::test]
async fn test_merge_join_many_to_many() {
    let mut customers = customers_table();
    customers.rows.insert(1, vec![Value::Int(1), Value::from("amy")]);
    let mut transform = assert_ok(JoinTransform::new(
        memory(orders_table()),
        memory(customers),
        join_mappings(),
        JoinMode::Inner,
        None,
    ));
    let rows = assert_ok(collect(&mut transform).await);

    // 两个订单 × 两个客户
    assert_eq!(
        column(&rows, 4)[..4].to_vec(),
        vec![Value::from("ann"), Value::from("amy"), Value::from("ann"), Value::from("amy")]
    );
    assert_count(&rows, 5, "输出行");
}

#[tokio::test]
async fn test_merge_join_resolves_columns_through_alias() {
    let mappings = Mappings::new()
        .with(MapJoin::new(
            TableColumn::new("customer_id", DataType::Int64),
            TableColumn::new("id", DataType::Int64).with_reference("c"),
        ))
        .with(MapColumn::new(
            TableColumn::new("name", DataType::String).with_reference("c"),
            TableColumn::new("customer_name", DataType::String),
        ));
    let mut transform = assert_ok(JoinTransform::new(
        memory(orders_table()),
        memory(customers_table()),
        mappings,
        JoinMode::Inner,
        Some("c"),
    ));
    assert_eq!(
        transform.schema().column_names(),
        vec!["customer_name", "order_id", "customer_id", "total", "id", "name"]
    );
    assert_eq!(transform.schema().columns[5].qualified_name(), "c.name");

    let rows = assert_ok(collect(&mut transform).await);
    assert_eq!(column(&rows, 0), vec![Value::from("ann"), Value::from("ann"), Value::from("dan")]);
    assert_eq!(column(&rows, 1), vec![Value::Int(100), Value::Int(101), Value::Int(103)]);
}

// ==================== 分组节点与展开测试 ====================

#[tokio::test]
async fn test_group_node_detail_aggregate_per_group() {
    let grouping = Mappings::new()
        .with_pass_through(false)
        .with(MapGroup::copy(TableColumn::new("region", DataType::String)))
        .with(MapGroupNode::new("items"))
        .with(MapColumn::copy(TableColumn::new("product", DataType::String)))
        .with(MapAggregate::new(
            AggregateFunction::Sum,
            TableColumn::new("amount", DataType::Int64),
            TableColumn::new("total", DataType::Int64),
        ));
    let mut transform = assert_ok(GroupTransform::new(memory(sales_table()), grouping, GroupMode::Aggregate));
    let rows = assert_ok(collect(&mut transform).await);
    assert_count(&rows, 2, "分组");

    let east = rows[0][1].as_node().expect("应为节点值");
    assert_eq!(east.column_names(), vec!["product", "total"]);
    assert_eq!(
        east.rows,
        vec![
            vec![Value::from("tea"), Value::Int(15)],
            vec![Value::from("cake"), Value::Int(15)],
            vec![Value::from("milk"), Value::Int(15)],
        ]
    );
    let west = rows[1][1].as_node().expect("应为节点值");
    assert_eq!(column(&west.rows, 1), vec![Value::Int(8), Value::Int(8)]);
}

#[tokio::test]
async fn test_group_node_then_ungroup_round_trip() {
    let grouping = Mappings::new()
        .with_pass_through(false)
        .with(MapGroup::copy(TableColumn::new("region", DataType::String)))
        .with(MapGroupNode::new("items"))
        .with(MapColumn::copy(TableColumn::new("product", DataType::String)))
        .with(MapColumn::copy(TableColumn::new("amount", DataType::Int64)));
    let grouped = assert_ok(GroupTransform::new(memory(sales_table()), grouping, GroupMode::Aggregate));
    assert_eq!(grouped.schema().column_names(), vec!["region", "items"]);

    let flatten = Mappings::new().with(MapUnGroup::new(TableColumn::new("items", DataType::Node)));
    let mut transform = assert_ok(MappingTransform::new(Box::new(grouped), flatten));
    assert_eq!(
        transform.schema().column_names(),
        vec!["items.product", "items.amount", "region"]
    );

    let rows = assert_ok(collect(&mut transform).await);
    assert_eq!(
        rows,
        vec![
            vec![Value::from("tea"), Value::Int(10), Value::from("east")],
            vec![Value::from("cake"), Value::Null, Value::from("east")],
            vec![Value::from("milk"), Value::Int(5), Value::from("east")],
            vec![Value::from("tea"), Value::Int(7), Value::from("west")],
            vec![Value::from("cake"), Value::Int(1), Value::from("west")],
        ]
    );
}

#[tokio::test]
async fn test_transform_reset_replays_stream() {
    let mut transform = assert_ok(GroupTransform::new(
        memory(daily_table()),
        daily_mappings(),
        GroupMode::Aggregate,
    ));
    let first = assert_ok(collect(&mut transform).await);

    let cancel = CancelToken::new();
    assert_ok(transform.reset(&cancel).await);
    let second = assert_ok(transform.read_all(&cancel).await);
    assert_eq!(first, second);

    cancel.cancel();
    assert_ok(transform.reset(&CancelToken::new()).await);
    let err = transform.read_row(&cancel).await.expect_err("应当取消");
    assert!(err.is_cancelled());
}
