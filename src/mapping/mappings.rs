//! 映射编排器
//!
//! `Mappings` 是一组有序的映射算子，负责：
//! - 协商输出表结构（算子输出列 + 透传列 + 连接表列）
//! - 对每一行并发驱动各算子的 `process_input_row`，在汇合点统一做保留/丢弃决策
//! - 按算子顺序串行写出输出行
//! - 驱动分组结束时的结果行协议（聚合、分析函数、行生成）
//!
//! 行与行之间严格串行，以保证分组边界与合并连接的顺序。

use std::cmp::Ordering;
use std::collections::VecDeque;

use chrono::Weekday;
use futures::stream::{FuturesUnordered, StreamExt};

use super::{FunctionVariables, MapSeries, Mapping, MappingKind, MappingPhase};
use crate::config::MappingConfig;
use crate::core::{CancelToken, MapResult, MappingError, Row, SortField, Table, Value};

#[derive(Debug)]
pub struct Mappings {
    mappings: Vec<MappingKind>,
    /// 未被算子产生的输入列是否透传
    pass_through: bool,
    function_cache_capacity: usize,
    week_start: Weekday,
    /// 分组节点拆分是否已完成
    partitioned: bool,
    output: Table,
    /// (输入序号, 输出序号)
    pass_through_ordinals: Vec<(usize, usize)>,
    pass_through_values: Row,
    /// (连接表序号, 输出序号)
    join_ordinals: Vec<(usize, usize)>,
    join_values: Row,
    /// 当前分组内已映射的输出行
    group_cache: VecDeque<Row>,
    /// 当前分组内的行序号
    row_index: usize,
    rejection_reason: Option<String>,
}

impl Default for Mappings {
    fn default() -> Self {
        Self::new()
    }
}

impl Mappings {
    pub fn new() -> Self {
        let config = MappingConfig::default();
        Self {
            mappings: Vec::new(),
            pass_through: config.pass_through,
            function_cache_capacity: config.function_cache_capacity,
            week_start: Weekday::Mon,
            partitioned: false,
            output: Table::default(),
            pass_through_ordinals: Vec::new(),
            pass_through_values: Vec::new(),
            join_ordinals: Vec::new(),
            join_values: Vec::new(),
            group_cache: VecDeque::new(),
            row_index: 0,
            rejection_reason: None,
        }
    }

    /// 按配置创建
    pub fn from_config(config: &MappingConfig) -> MapResult<Self> {
        let mut mappings = Self::new();
        mappings.pass_through = config.pass_through;
        mappings.function_cache_capacity = config.function_cache_capacity;
        mappings.week_start = config.week_start_day()?;
        Ok(mappings)
    }

    pub fn with_pass_through(mut self, pass_through: bool) -> Self {
        self.pass_through = pass_through;
        self
    }

    /// 追加算子（构建器形式）
    pub fn with(mut self, mapping: impl Into<MappingKind>) -> Self {
        self.add(mapping);
        self
    }

    /// 追加算子
    ///
    /// 带比较运算符标记的双参数函数会被改写为过滤；
    /// 函数缓存容量与周起始日在未显式设置时取编排器的配置。
    pub fn add(&mut self, mapping: impl Into<MappingKind>) -> &mut Self {
        let mut mapping = match mapping.into() {
            MappingKind::Function(function) => match function.into_filter() {
                Ok(filter) => {
                    log::debug!("比较函数改写为过滤: {}", filter.description());
                    MappingKind::Filter(filter)
                }
                Err(function) => MappingKind::Function(function),
            },
            other => other,
        };

        match &mut mapping {
            MappingKind::Function(function) => function.default_cache_capacity(self.function_cache_capacity),
            MappingKind::Validation(validation) => validation
                .function_mut()
                .default_cache_capacity(self.function_cache_capacity),
            MappingKind::Series(series) => series.default_week_start(self.week_start),
            _ => {}
        }

        self.mappings.push(mapping);
        self
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingKind> {
        self.mappings.iter()
    }

    /// 协商后的输出表结构
    pub fn output_table(&self) -> &Table {
        &self.output
    }

    /// 创建一行与输出表等宽的空行
    pub fn new_output_row(&self) -> Row {
        self.output.new_row()
    }

    /// 是否存在指定阶段的算子
    pub fn has_phase(&self, phase: MappingPhase) -> bool {
        self.mappings.iter().any(|m| m.as_mapping().phase() == phase)
    }

    /// 是否存在行生成器
    pub fn generates_rows(&self) -> bool {
        self.mappings.iter().any(|m| m.as_mapping().generates_rows())
    }

    /// 是否存在分组键
    pub fn has_group(&self) -> bool {
        self.mappings.iter().any(|m| matches!(m, MappingKind::Group(_)))
    }

    pub(crate) fn into_kinds(self) -> Vec<MappingKind> {
        self.mappings
    }

    pub(crate) fn inherit_settings(&mut self, parent: &Mappings) {
        self.pass_through = parent.pass_through;
        self.function_cache_capacity = parent.function_cache_capacity;
        self.week_start = parent.week_start;
    }

    /// 存在分组节点时，把非主集合算子移入分组节点的明细集合
    fn partition_group_node(&mut self) -> MapResult<()> {
        if self.partitioned {
            return Ok(());
        }
        let group_nodes = self
            .mappings
            .iter()
            .filter(|m| matches!(m, MappingKind::GroupNode(_)))
            .count();
        if group_nodes == 0 {
            return Ok(());
        }
        if group_nodes > 1 {
            return Err(MappingError::schema("一组映射中只能有一个分组节点"));
        }

        let (primary, detail): (Vec<_>, Vec<_>) = std::mem::take(&mut self.mappings)
            .into_iter()
            .partition(|m| m.is_primary());
        self.mappings = primary;

        let mut settings = Mappings::new();
        settings.inherit_settings(self);
        for mapping in &mut self.mappings {
            if let MappingKind::GroupNode(node) = mapping {
                node.adopt_detail(&settings, detail);
                break;
            }
        }
        self.partitioned = true;
        Ok(())
    }

    /// 初始化所有算子并协商输出表结构
    ///
    /// 输出列顺序：算子输出列（按算子顺序），然后是透传列（保持输入顺序），
    /// 最后是带引用表标记的连接表列。列以（列名，引用表）判重，
    /// 冲突时跳过后来的透传列，不做重命名。
    pub fn initialize(
        &mut self,
        input: &Table,
        join: Option<&Table>,
        join_alias: Option<&str>,
    ) -> MapResult<Table> {
        self.partition_group_node()?;

        // 算子可以通过别名引用连接表的列
        let aliased = match (join, join_alias) {
            (Some(table), Some(alias)) if table.alias.as_deref() != Some(alias) => {
                Some(table.clone().with_alias(alias))
            }
            _ => None,
        };
        let join = aliased.as_ref().or(join);

        for mapping in &mut self.mappings {
            mapping
                .as_mapping_mut()
                .initialize_columns(input, join)
                .map_err(|e| e.annotate(mapping.as_mapping().description()))?;
        }

        let mut output = Table::new(input.name.clone());
        for mapping in &mut self.mappings {
            mapping
                .as_mapping_mut()
                .add_output_columns(&mut output)
                .map_err(|e| e.annotate(mapping.as_mapping().description()))?;
        }
        let produced = output.width();

        let has_group_node = self.mappings.iter().any(|m| matches!(m, MappingKind::GroupNode(_)));
        let has_join_node = self.mappings.iter().any(|m| matches!(m, MappingKind::JoinNode(_)));

        // 存在分组节点时，透传列与连接列进入子表
        self.pass_through_ordinals.clear();
        if self.pass_through && !has_group_node {
            for (ordinal, column) in input.columns.iter().enumerate() {
                if self
                    .mappings
                    .iter()
                    .any(|m| m.as_mapping().consumes_input_column(column))
                {
                    continue;
                }
                if let Some(existing) = output.columns.iter().position(|c| c.same_identity(column)) {
                    if existing >= produced {
                        log::warn!("输入列 {} 重复，跳过透传", column.qualified_name());
                    } else {
                        log::debug!("列 {} 已由映射产生，跳过透传", column.qualified_name());
                    }
                    continue;
                }
                let out = match input.child_table(column) {
                    Some(child) => output.add_node_column_like(column.clone(), child.clone()),
                    None => output.add_column(column.clone()),
                };
                self.pass_through_ordinals.push((ordinal, out));
            }
        }

        self.join_ordinals.clear();
        if let Some(join) = join {
            if !has_join_node && !has_group_node {
                let alias = join_alias.unwrap_or(&join.name);
                for (ordinal, column) in join.columns.iter().enumerate() {
                    let mut tagged = column.clone();
                    if tagged.reference_table.is_none() {
                        tagged.reference_table = Some(alias.to_string());
                    }
                    if output.contains_identity(&tagged) {
                        log::warn!("连接列 {} 与已有输出列冲突，已跳过", tagged.qualified_name());
                        continue;
                    }
                    let out = match join.child_table(column) {
                        Some(child) => output.add_node_column_like(tagged, child.clone()),
                        None => output.add_column(tagged),
                    };
                    self.join_ordinals.push((ordinal, out));
                }
            }
        }

        output.sort_fields = self.trace_sort_fields(input, &output);
        self.pass_through_values = vec![Value::Null; self.pass_through_ordinals.len()];
        self.join_values = vec![Value::Null; self.join_ordinals.len()];

        log::debug!(
            "映射初始化完成: 输入 {} 列, 输出 {} 列 (透传 {} 列, 连接 {} 列)",
            input.width(),
            output.width(),
            self.pass_through_ordinals.len(),
            self.join_ordinals.len()
        );

        self.output = output.schema_only();
        Ok(output)
    }

    /// 追踪输入排序字段到输出列，遇到第一个无法追踪的字段即停止
    fn trace_sort_fields(&self, input: &Table, output: &Table) -> Vec<SortField> {
        let declared: Vec<SortField> = self
            .mappings
            .iter()
            .filter_map(|m| match m {
                MappingKind::Sort(sort) => Some(sort.fields().to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        let candidates = if declared.is_empty() {
            input.sort_fields.clone()
        } else {
            declared
        };

        let mut traced = Vec::new();
        for field in candidates {
            match self.trace_output_name(&field.column, output) {
                Some(name) => traced.push(SortField::new(name, field.direction)),
                None => {
                    log::debug!("排序列 {} 无法追踪到输出，之后的排序信息被丢弃", field.column);
                    break;
                }
            }
        }
        traced
    }

    fn trace_output_name(&self, input_name: &str, output: &Table) -> Option<String> {
        for mapping in &self.mappings {
            let traced = match mapping {
                MappingKind::Column(column) => column.traced_output_name(input_name),
                MappingKind::Group(group) => group.inner().traced_output_name(input_name),
                _ => None,
            };
            if let Some(name) = traced {
                return Some(name.to_string());
            }
        }
        self.pass_through_ordinals
            .iter()
            .map(|(_, out)| &output.columns[*out])
            .find(|column| column.name == input_name)
            .map(|column| column.name.clone())
    }

    /// 流水线需要的输入排序：分组键在前，然后是排序算子的字段
    pub fn required_sort_fields(&self) -> Vec<SortField> {
        let mut fields: Vec<SortField> = self
            .mappings
            .iter()
            .filter_map(|m| match m {
                MappingKind::Group(group) => group
                    .inner()
                    .input_column()
                    .map(|c| SortField::ascending(c.name.clone())),
                _ => None,
            })
            .collect();
        for mapping in &self.mappings {
            if let MappingKind::Sort(sort) = mapping {
                fields.extend(sort.fields().iter().cloned());
            }
        }
        fields
    }

    /// 预加载所有算子的资源
    pub async fn open(&mut self, cancel: &CancelToken) -> MapResult<()> {
        for mapping in &mut self.mappings {
            let result = mapping.as_mapping_mut().open(cancel).await;
            result.map_err(|e| e.annotate(mapping.as_mapping().description()))?;
        }
        Ok(())
    }

    /// 设置外部输入列的值
    pub fn set_input_values(&mut self, values: &[(&str, Value)]) -> MapResult<()> {
        for (name, value) in values {
            if !self.apply_input_value(name, value)? {
                return Err(MappingError::schema(format!("输入列 {} 未定义", name)));
            }
        }
        Ok(())
    }

    fn apply_input_value(&mut self, name: &str, value: &Value) -> MapResult<bool> {
        let mut found = false;
        for mapping in &mut self.mappings {
            match mapping {
                MappingKind::InputColumn(input) if input.column().name == name => {
                    input.set_value(value.clone())?;
                    found = true;
                }
                MappingKind::GroupNode(node) => {
                    found |= node.detail_mut().apply_input_value(name, value)?;
                }
                _ => {}
            }
        }
        Ok(found)
    }

    /// 对并发执行的一组算子求值，任一失败时丢弃其余未完成的算子
    async fn fan_out(
        mappings: &mut [MappingKind],
        conditions: bool,
        vars: &FunctionVariables,
        row: &[Value],
        join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<bool> {
        let mut pending: FuturesUnordered<_> = mappings
            .iter_mut()
            .filter(|m| m.is_condition() == conditions)
            .map(|mapping| async move {
                let result = mapping
                    .as_mapping_mut()
                    .process_input_row(vars, row, join_row, cancel)
                    .await;
                result.map_err(|e| e.annotate(mapping.as_mapping().description()))
            })
            .collect();

        let mut keep = true;
        while let Some(result) = pending.next().await {
            keep &= result?;
        }
        Ok(keep)
    }

    async fn process_row(
        &mut self,
        row: &[Value],
        join_row: Option<&[Value]>,
        is_filler: bool,
        is_forecast: bool,
        cancel: &CancelToken,
    ) -> MapResult<(bool, bool)> {
        cancel.check()?;
        self.rejection_reason = None;

        let vars = FunctionVariables {
            index: self.row_index,
            is_forecast,
            is_filler,
            series_value: self.get_series_value(row)?,
        };
        log::trace!("处理第 {} 行", self.row_index);

        // 过滤与连接键先求值，不满足时其余算子不再求值
        if !Self::fan_out(&mut self.mappings, true, &vars, row, join_row, cancel).await? {
            return Ok((false, false));
        }
        let keep = Self::fan_out(&mut self.mappings, false, &vars, row, join_row, cancel).await?;

        let ignore = self.mappings.iter().any(|m| m.as_mapping().ignore_row());
        self.rejection_reason = self.mappings.iter().find_map(|m| match m {
            MappingKind::Validation(validation) => validation.reason().map(str::to_string),
            _ => None,
        });

        if keep {
            for (slot, (ordinal, _)) in self.pass_through_values.iter_mut().zip(&self.pass_through_ordinals) {
                *slot = row.get(*ordinal).cloned().unwrap_or_default();
            }
            for (slot, (ordinal, _)) in self.join_values.iter_mut().zip(&self.join_ordinals) {
                *slot = join_row
                    .and_then(|join| join.get(*ordinal))
                    .cloned()
                    .unwrap_or_default();
            }
            if !ignore {
                self.row_index += 1;
            }
        }
        Ok((keep, ignore))
    }

    /// 处理一行输入（及连接行）
    ///
    /// 返回 (keep, ignore)：keep 为 false 表示丢弃或不匹配，
    /// ignore 为 true 表示该行被验证拒绝。
    pub async fn process_input_data(
        &mut self,
        row: &[Value],
        join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<(bool, bool)> {
        self.process_row(row, join_row, false, false, cancel).await
    }

    /// 处理由 `create_filler_row` 构造的补齐行
    pub async fn process_filler_data(
        &mut self,
        filler: &[Value],
        is_forecast: bool,
        cancel: &CancelToken,
    ) -> MapResult<(bool, bool)> {
        self.process_row(filler, None, true, is_forecast, cancel).await
    }

    /// 按算子顺序写出输出行，然后写透传列和连接列
    pub fn map_output_row(&self, output: &mut Row) {
        if output.len() < self.output.width() {
            output.resize(self.output.width(), Value::Null);
        }
        for mapping in &self.mappings {
            mapping.as_mapping().map_output_row(output);
        }
        for ((_, out), value) in self.pass_through_ordinals.iter().zip(&self.pass_through_values) {
            output[*out] = value.clone();
        }
        for ((_, out), value) in self.join_ordinals.iter().zip(&self.join_values) {
            output[*out] = value.clone();
        }
    }

    /// 分组结束时对一行执行结果阶段
    ///
    /// 返回 (more_rows, ignore)：more_rows 为 true 表示某个算子要求再输出一行。
    pub async fn process_aggregate_row(
        &mut self,
        vars: &FunctionVariables,
        row: &mut Row,
        phase: MappingPhase,
        cancel: &CancelToken,
    ) -> MapResult<(bool, bool)> {
        cancel.check()?;
        if row.len() < self.output.width() {
            row.resize(self.output.width(), Value::Null);
        }

        let mut more_rows = false;
        for mapping in &mut self.mappings {
            let result = mapping
                .as_mapping_mut()
                .process_result_row(vars, row, phase, cancel)
                .await;
            more_rows |= result.map_err(|e| e.annotate(mapping.as_mapping().description()))?;
        }

        let ignore = self.mappings.iter().any(|m| {
            let mapping = m.as_mapping();
            mapping.phase() == phase && mapping.ignore_row()
        });
        Ok((more_rows, ignore))
    }

    /// 清理指定阶段的状态
    pub fn reset(&mut self, phase: MappingPhase) {
        for mapping in &mut self.mappings {
            mapping.as_mapping_mut().reset(phase);
        }
        if matches!(phase, MappingPhase::Aggregate | MappingPhase::Analytic) {
            self.group_cache.clear();
            self.row_index = 0;
        }
    }

    /// 读取输入行的分组键值
    pub fn get_group_values(&self, row: &[Value]) -> Vec<Value> {
        self.mappings
            .iter()
            .filter_map(|m| match m {
                MappingKind::Group(group) => Some(group.group_value(row)),
                _ => None,
            })
            .collect()
    }

    /// 第一个序列算子
    pub fn series(&self) -> Option<&MapSeries> {
        self.mappings.iter().find_map(|m| match m {
            MappingKind::Series(series) => Some(series),
            _ => None,
        })
    }

    /// 读取输入行的序列值（已截断），没有序列算子时返回 None
    pub fn get_series_value(&self, row: &[Value]) -> MapResult<Option<Value>> {
        self.series().map(|series| series.series_value(row)).transpose()
    }

    /// 两个观测值之间缺失的序列点
    ///
    /// `previous` 为 None 时从序列起点（含）开始，
    /// `next` 为 None 时到序列终点（含）结束。
    /// 没有序列算子或未开启补齐时返回空。
    pub fn series_gap_points(&self, previous: Option<&Value>, next: Option<&Value>) -> MapResult<Vec<Value>> {
        let Some(series) = self.series() else {
            return Ok(Vec::new());
        };
        if !series.fill_gaps() {
            return Ok(Vec::new());
        }

        let mut current = match previous {
            Some(value) if value.is_null() => return Ok(Vec::new()),
            Some(value) => series.calculate_next_value(value)?,
            None => match series.start() {
                Some(start) => start.clone(),
                None => return Ok(Vec::new()),
            },
        };
        let (end, inclusive) = match next {
            Some(value) if value.is_null() => return Ok(Vec::new()),
            Some(value) => (value.clone(), false),
            None => match series.finish() {
                Some(finish) => (finish.clone(), true),
                None => return Ok(Vec::new()),
            },
        };

        let mut points = Vec::new();
        loop {
            let ordering = series.compare(&current, &end)?;
            let within = ordering == Ordering::Less || (inclusive && ordering == Ordering::Equal);
            if !within {
                break;
            }
            let following = series.calculate_next_value(&current)?;
            points.push(std::mem::replace(&mut current, following));
        }
        Ok(points)
    }

    /// 以模板输入行为基础构造补齐行
    pub fn create_filler_row(&mut self, template: &[Value], series_value: &Value) -> Row {
        let mut filler = template.to_vec();
        for mapping in &mut self.mappings {
            mapping
                .as_mapping_mut()
                .process_filler_row(template, &mut filler, series_value);
        }
        filler
    }

    /// 合并连接的比较结果
    ///
    /// 按声明顺序返回第一个非 `Equal` 的连接键比较结果，全部相等时返回 `Equal`。
    pub fn join_compare_result(&self) -> Ordering {
        self.mappings
            .iter()
            .filter_map(|m| match m {
                MappingKind::Join(join) => Some(join.compare_result()),
                _ => None,
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// 最近一次处理的主流连接键
    pub fn get_join_primary_key(&self) -> Vec<Value> {
        self.mappings
            .iter()
            .filter_map(|m| match m {
                MappingKind::Join(join) => Some(join.primary_value().clone()),
                _ => None,
            })
            .collect()
    }

    /// 引用行的连接键
    pub fn get_join_reference_key(&self, join_row: &[Value]) -> Vec<Value> {
        self.mappings
            .iter()
            .filter_map(|m| match m {
                MappingKind::Join(join) => Some(join.reference_value(join_row)),
                _ => None,
            })
            .collect()
    }

    /// 是否存在连接键
    pub fn has_join(&self) -> bool {
        self.mappings.iter().any(|m| matches!(m, MappingKind::Join(_)))
    }

    /// 缓存当前分组的一行输出
    pub fn cache_group_row(&mut self, row: Row) {
        self.group_cache.push_back(row);
    }

    /// 取出当前分组缓存的所有行
    pub fn take_group_rows(&mut self) -> Vec<Row> {
        self.group_cache.drain(..).collect()
    }

    pub fn group_cache_len(&self) -> usize {
        self.group_cache.len()
    }

    /// 最近一行的验证失败原因
    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    /// 将一行输入映射为零到多行输出
    ///
    /// 存在行生成器（展开、行函数）时，同一输入行反复求值直到生成器耗尽。
    /// 被丢弃与被拒绝的行不会出现在结果中。
    pub async fn map_row(
        &mut self,
        row: &[Value],
        join_row: Option<&[Value]>,
        cancel: &CancelToken,
    ) -> MapResult<Vec<Row>> {
        self.reset(MappingPhase::Rows);
        let generates_rows = self.generates_rows();

        let mut rows = Vec::new();
        loop {
            let (keep, ignore) = self.process_input_data(row, join_row, cancel).await?;
            if !keep {
                break;
            }
            if ignore {
                log::debug!(
                    "行被拒绝: {}",
                    self.rejection_reason.as_deref().unwrap_or("函数要求忽略该行")
                );
            } else {
                let mut output = self.new_output_row();
                self.map_output_row(&mut output);
                rows.push(output);
            }
            if !generates_rows {
                break;
            }
        }
        Ok(rows)
    }
}
