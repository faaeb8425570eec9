//! 分组节点映射
//!
//! 把一个分组内的明细行收集为子表，作为父行的一个节点列输出。
//! 明细集合在每个输入行上求值并缓存映射结果，分组结束时
//! 对每个缓存行依次执行聚合与分析两个结果阶段，再整体写入节点值。

use async_trait::async_trait;

use super::{FunctionVariables, Mapping, MappingKind, MappingPhase, Mappings};
use crate::core::{CancelToken, DataType, MapResult, Row, Table, TableColumn, Value};

#[derive(Debug)]
pub struct MapGroupNode {
    column: TableColumn,
    detail: Mappings,
    child_schema: Option<Table>,
    output_ordinal: Option<usize>,
    value: Value,
}

impl MapGroupNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            column: TableColumn::new(name, DataType::Node),
            detail: Mappings::new(),
            child_schema: None,
            output_ordinal: None,
            value: Value::Null,
        }
    }

    /// 向明细集合追加算子
    pub fn with_detail(mut self, mapping: impl Into<MappingKind>) -> Self {
        self.detail.add(mapping);
        self
    }

    pub fn detail(&self) -> &Mappings {
        &self.detail
    }

    pub(crate) fn detail_mut(&mut self) -> &mut Mappings {
        &mut self.detail
    }

    /// 接收父集合中移交过来的明细算子
    pub(crate) fn adopt_detail(&mut self, settings: &Mappings, mappings: Vec<MappingKind>) {
        let mut detail = Mappings::new();
        detail.inherit_settings(settings);
        for mapping in std::mem::take(&mut self.detail).into_kinds() {
            detail.add(mapping);
        }
        for mapping in mappings {
            detail.add(mapping);
        }
        self.detail = detail;
    }

    /// 子表结构
    pub fn child_schema(&self) -> Option<&Table> {
        self.child_schema.as_ref()
    }
}

#[async_trait]
impl Mapping for MapGroupNode {
    fn phase(&self) -> MappingPhase {
        MappingPhase::Aggregate
    }

    fn initialize_columns(&mut self, input: &Table, join: Option<&Table>) -> MapResult<()> {
        let mut child = self.detail.initialize(input, join, None)?;
        child.name = self.column.name.clone();
        self.child_schema = Some(child);
        Ok(())
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        let child = self.child_schema.clone().unwrap_or_else(|| Table::new(self.column.name.clone()));
        self.output_ordinal = Some(output.add_node_column_like(self.column.clone(), child));
        Ok(())
    }

    async fn open(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.detail.open(cancel).await
    }

    async fn process_input_row(
        &mut self,
        vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<bool> {
        let (keep, ignore) = if vars.is_filler {
            self.detail.process_filler_data(row, vars.is_forecast, cancel).await?
        } else {
            self.detail.process_input_data(row, join_row, cancel).await?
        };
        if keep && !ignore {
            let mut output = self.detail.new_output_row();
            self.detail.map_output_row(&mut output);
            self.detail.cache_group_row(output);
        }
        Ok(keep)
    }

    fn map_output_row(&self, output: &mut Row) {
        if let Some(ordinal) = self.output_ordinal {
            output[ordinal] = self.value.clone();
        }
    }

    async fn process_result_row(
        &mut self,
        _vars: &FunctionVariables,
        row: &mut Row,
        phase: MappingPhase,
        cancel: &CancelToken,
    ) -> MapResult<bool> {
        if phase != MappingPhase::Aggregate {
            return Ok(false);
        }

        let cached = self.detail.take_group_rows();
        let mut rows = Vec::with_capacity(cached.len());
        for (index, cached_row) in cached.into_iter().enumerate() {
            let vars = FunctionVariables::at(index);
            loop {
                let mut emitted = cached_row.clone();
                let (more_aggregate, ignore_aggregate) = self
                    .detail
                    .process_aggregate_row(&vars, &mut emitted, MappingPhase::Aggregate, cancel)
                    .await?;
                let (more_analytic, ignore_analytic) = self
                    .detail
                    .process_aggregate_row(&vars, &mut emitted, MappingPhase::Analytic, cancel)
                    .await?;
                let more_rows = more_aggregate || more_analytic;
                if !(ignore_aggregate || ignore_analytic) {
                    rows.push(emitted);
                }
                if !more_rows {
                    break;
                }
            }
        }
        log::trace!("分组节点 {} 收集 {} 行", self.column.name, rows.len());

        let mut child = self
            .child_schema
            .clone()
            .unwrap_or_else(|| Table::new(self.column.name.clone()));
        child.rows = rows;
        self.value = Value::node(child);
        if let Some(ordinal) = self.output_ordinal {
            row[ordinal] = self.value.clone();
        }
        self.detail.reset(MappingPhase::Analytic);
        Ok(false)
    }

    fn reset(&mut self, phase: MappingPhase) {
        if phase == MappingPhase::Aggregate {
            self.detail.reset(MappingPhase::Aggregate);
            self.detail.reset(MappingPhase::Analytic);
            self.value = Value::Null;
        }
    }

    fn description(&self) -> String {
        format!("GroupNode({})", self.column.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{AggregateFunction, MapAggregate, MapColumn, MapGroup};

    fn orders() -> Table {
        Table::with_columns(
            "orders",
            vec![
                TableColumn::new("customer", DataType::String),
                TableColumn::new("item", DataType::String),
                TableColumn::new("qty", DataType::Int64),
            ],
        )
    }

    #[tokio::test]
    async fn test_group_node_collects_detail_rows() {
        let mut mappings = Mappings::new()
            .with(MapGroup::copy(TableColumn::new("customer", DataType::String)))
            .with(MapGroupNode::new("lines"))
            .with(MapColumn::copy(TableColumn::new("item", DataType::String)))
            .with(MapColumn::copy(TableColumn::new("qty", DataType::Int64)));
        let output = mappings.initialize(&orders(), None, None).expect("初始化失败");

        // 明细算子移入节点，透传列进入子表
        assert_eq!(output.column_names(), vec!["customer", "lines"]);
        let child = output.child_table(&output.columns[1]).expect("应有子表");
        assert_eq!(child.column_names(), vec!["item", "qty", "customer"]);

        let cancel = CancelToken::new();
        for (item, qty) in [("tea", 1), ("cake", 2)] {
            let row = [Value::from("ann"), Value::from(item), Value::Int(qty)];
            let (keep, _) = mappings.process_input_data(&row, None, &cancel).await.expect("处理失败");
            assert!(keep);
        }

        let mut out = mappings.new_output_row();
        mappings.map_output_row(&mut out);
        mappings
            .process_aggregate_row(&FunctionVariables::default(), &mut out, MappingPhase::Aggregate, &cancel)
            .await
            .expect("聚合失败");

        assert_eq!(out[0], Value::from("ann"));
        let node = out[1].as_node().expect("应为节点值");
        assert_eq!(
            node.rows,
            vec![
                vec![Value::from("tea"), Value::Int(1), Value::from("ann")],
                vec![Value::from("cake"), Value::Int(2), Value::from("ann")],
            ]
        );

        mappings.reset(MappingPhase::Aggregate);
        let mut out = mappings.new_output_row();
        mappings
            .process_aggregate_row(&FunctionVariables::default(), &mut out, MappingPhase::Aggregate, &cancel)
            .await
            .expect("聚合失败");
        assert!(out[1].as_node().is_some_and(|node| node.rows.is_empty()));
    }

    #[tokio::test]
    async fn test_group_node_finalizes_detail_aggregates() {
        let mut mappings = Mappings::new()
            .with_pass_through(false)
            .with(MapGroup::copy(TableColumn::new("customer", DataType::String)))
            .with(MapGroupNode::new("lines"))
            .with(MapColumn::copy(TableColumn::new("item", DataType::String)))
            .with(MapAggregate::new(
                AggregateFunction::Sum,
                TableColumn::new("qty", DataType::Int64),
                TableColumn::new("total", DataType::Int64),
            ));
        let output = mappings.initialize(&orders(), None, None).expect("初始化失败");
        let child = output.child_table(&output.columns[1]).expect("应有子表");
        assert_eq!(child.column_names(), vec!["item", "total"]);

        let cancel = CancelToken::new();
        for (item, qty) in [("tea", 1), ("cake", 2)] {
            let row = [Value::from("ann"), Value::from(item), Value::Int(qty)];
            mappings.process_input_data(&row, None, &cancel).await.expect("处理失败");
        }

        let mut out = mappings.new_output_row();
        mappings.map_output_row(&mut out);
        mappings
            .process_aggregate_row(&FunctionVariables::default(), &mut out, MappingPhase::Aggregate, &cancel)
            .await
            .expect("聚合失败");

        // 明细聚合对分组内每个缓存行给出整组结果
        let node = out[1].as_node().expect("应为节点值");
        assert_eq!(
            node.rows,
            vec![
                vec![Value::from("tea"), Value::Int(3)],
                vec![Value::from("cake"), Value::Int(3)],
            ]
        );

        mappings.reset(MappingPhase::Aggregate);
        let row = [Value::from("bob"), Value::from("milk"), Value::Int(5)];
        mappings.process_input_data(&row, None, &cancel).await.expect("处理失败");
        let mut out = mappings.new_output_row();
        mappings
            .process_aggregate_row(&FunctionVariables::default(), &mut out, MappingPhase::Aggregate, &cancel)
            .await
            .expect("聚合失败");
        let node = out[1].as_node().expect("应为节点值");
        assert_eq!(node.rows, vec![vec![Value::from("milk"), Value::Int(5)]]);
    }
}
