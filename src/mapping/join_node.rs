//! 连接节点映射
//!
//! 不把引用流展开到父行上，而是把与父行连接键匹配的引用行
//! 收集为子表，作为一个节点列输出。

use async_trait::async_trait;

use super::{FunctionVariables, MapJoin, Mapping};
use crate::core::{CancelToken, DataType, MapResult, MappingError, Row, Table, TableColumn, Value};
use crate::transform::Transform;

#[derive(Debug)]
pub struct MapJoinNode {
    column: TableColumn,
    reference: Box<dyn Transform>,
    keys: Vec<MapJoin>,
    child_schema: Table,
    output_ordinal: Option<usize>,
    value: Value,
}

impl MapJoinNode {
    pub fn new(name: impl Into<String>, reference: Box<dyn Transform>) -> Self {
        let child_schema = reference.schema().schema_only();
        Self {
            column: TableColumn::new(name, DataType::Node),
            reference,
            keys: Vec::new(),
            child_schema,
            output_ordinal: None,
            value: Value::Null,
        }
    }

    /// 追加一对连接键（主流列，引用流列）
    pub fn with_key(mut self, primary_column: TableColumn, reference_column: TableColumn) -> Self {
        self.keys.push(MapJoin::new(primary_column, reference_column));
        self
    }
}

#[async_trait]
impl Mapping for MapJoinNode {
    fn initialize_columns(&mut self, input: &Table, _join: Option<&Table>) -> MapResult<()> {
        if self.keys.is_empty() {
            return Err(MappingError::schema(format!(
                "连接节点 {} 没有连接键",
                self.column.name
            )));
        }
        let mut schema = self.reference.schema().schema_only();
        schema.name = self.column.name.clone();
        for key in &mut self.keys {
            key.initialize_columns(input, Some(&schema))?;
        }
        self.child_schema = schema;
        Ok(())
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        self.output_ordinal = Some(output.add_node_column_like(self.column.clone(), self.child_schema.clone()));
        Ok(())
    }

    async fn open(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.reference.open(cancel).await
    }

    async fn process_input_row(
        &mut self,
        vars: &FunctionVariables,
        row: &[Value],
        _join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<bool> {
        self.reference.reset(cancel).await?;

        let mut rows = Vec::new();
        while let Some(reference_row) = self.reference.read_row(cancel).await? {
            let mut matched = true;
            for key in &mut self.keys {
                matched &= key
                    .process_input_row(vars, row, Some(reference_row.as_slice()), cancel)
                    .await?;
            }
            if matched {
                rows.push(reference_row);
            }
        }
        log::trace!("连接节点 {} 匹配 {} 行", self.column.name, rows.len());

        let mut child = self.child_schema.clone();
        child.rows = rows;
        self.value = Value::node(child);
        Ok(true)
    }

    fn map_output_row(&self, output: &mut Row) {
        if let Some(ordinal) = self.output_ordinal {
            output[ordinal] = self.value.clone();
        }
    }

    fn description(&self) -> String {
        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|key| key.primary_column().name.clone())
            .collect();
        format!("JoinNode({} on {})", self.column.name, keys.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::MemoryTransform;

    fn addresses() -> Table {
        let mut table = Table::with_columns(
            "addresses",
            vec![
                TableColumn::new("customer_id", DataType::Int64),
                TableColumn::new("city", DataType::String),
            ],
        );
        table.rows = vec![
            vec![Value::Int(1), Value::from("Oslo")],
            vec![Value::Int(2), Value::from("Lima")],
            vec![Value::Int(1), Value::from("Pune")],
        ];
        table
    }

    #[tokio::test]
    async fn test_join_node_collects_matching_rows() {
        let input = Table::with_columns("customers", vec![TableColumn::new("id", DataType::Int64)]);
        let mut mapping = MapJoinNode::new("addresses", Box::new(MemoryTransform::new(addresses())))
            .with_key(
                TableColumn::new("id", DataType::Int64),
                TableColumn::new("customer_id", DataType::Int64),
            );
        mapping.initialize_columns(&input, None).expect("初始化失败");
        let mut output = Table::new("out");
        mapping.add_output_columns(&mut output).expect("添加输出列失败");
        assert_eq!(
            output.child_table(&output.columns[0]).map(|t| t.column_names()),
            Some(vec!["customer_id", "city"])
        );

        let cancel = CancelToken::new();
        mapping.open(&cancel).await.expect("打开失败");
        let keep = mapping
            .process_input_row(&FunctionVariables::default(), &[Value::Int(1)], None, &cancel)
            .await
            .expect("处理失败");
        assert!(keep);

        let mut out = vec![Value::Null];
        mapping.map_output_row(&mut out);
        let node = out[0].as_node().expect("应为节点值");
        assert_eq!(
            node.rows,
            vec![
                vec![Value::Int(1), Value::from("Oslo")],
                vec![Value::Int(1), Value::from("Pune")],
            ]
        );

        // 无匹配时输出空子表
        mapping
            .process_input_row(&FunctionVariables::default(), &[Value::Int(9)], None, &cancel)
            .await
            .expect("处理失败");
        mapping.map_output_row(&mut out);
        assert!(out[0].as_node().is_some_and(|node| node.rows.is_empty()));
    }

    #[test]
    fn test_join_node_requires_keys() {
        let input = Table::with_columns("customers", vec![TableColumn::new("id", DataType::Int64)]);
        let mut mapping = MapJoinNode::new("addresses", Box::new(MemoryTransform::new(addresses())));
        assert!(matches!(
            mapping.initialize_columns(&input, None),
            Err(MappingError::Schema(_))
        ));
    }
}
