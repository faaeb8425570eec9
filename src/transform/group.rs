//! 分组阶段
//!
//! 输入必须已按分组键（及序列列）排序。阶段按 `get_group_values` 检测分组边界，
//! 按序列值检测桶边界，在边界处驱动结果阶段输出行。

use async_trait::async_trait;
use std::collections::VecDeque;

use super::Transform;
use crate::core::{CancelToken, MapResult, Row, Table, Value};
use crate::mapping::{FunctionVariables, Mappings, MappingPhase};

/// 分组输出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupMode {
    /// 每个分组（或序列桶）输出一行聚合结果
    #[default]
    Aggregate,
    /// 输出分组内的每一行，附带分析函数结果
    Analytic,
}

#[derive(Debug)]
pub struct GroupTransform {
    input: Box<dyn Transform>,
    mappings: Mappings,
    mode: GroupMode,
    schema: Table,
    pending: VecDeque<Row>,
    group_key: Option<Vec<Value>>,
    /// 当前桶的序列值
    series_value: Option<Value>,
    /// 当前分组最后一行输入，用作尾部补齐的模板
    template: Option<Row>,
    /// 当前桶中被保留的行数
    bucket_rows: usize,
    groups: u64,
    finished: bool,
}

impl GroupTransform {
    pub fn new(input: Box<dyn Transform>, mut mappings: Mappings, mode: GroupMode) -> MapResult<Self> {
        let schema = mappings.initialize(input.schema(), None, None)?;

        let required = mappings.required_sort_fields();
        let sorted = &input.schema().sort_fields;
        let covered = required.len() <= sorted.len()
            && required.iter().zip(sorted).all(|(a, b)| a.column == b.column);
        if !covered {
            log::debug!("输入 {} 的排序信息不包含全部分组键，假定调用方已排序", input.schema().name);
        }

        Ok(Self {
            input,
            mappings,
            mode,
            schema,
            pending: VecDeque::new(),
            group_key: None,
            series_value: None,
            template: None,
            bucket_rows: 0,
            groups: 0,
            finished: false,
        })
    }

    pub fn mappings(&self) -> &Mappings {
        &self.mappings
    }

    async fn accept(&mut self, row: Row, cancel: &CancelToken) -> MapResult<()> {
        let key = self.mappings.get_group_values(&row);
        let series = match self.mode {
            GroupMode::Aggregate => self.mappings.get_series_value(&row)?,
            GroupMode::Analytic => None,
        };

        if self.group_key.as_ref() != Some(&key) {
            if self.group_key.is_some() {
                self.finish_group(cancel).await?;
            }
            log::debug!("分组开始: {:?}", key);
            self.group_key = Some(key);
            if let Some(first) = &series {
                self.fill_gaps(None, Some(first), &row, false, cancel).await?;
            }
        } else if series != self.series_value {
            self.emit_bucket(false, cancel).await?;
            if let (Some(previous), Some(next)) = (self.series_value.clone(), &series) {
                self.fill_gaps(Some(&previous), Some(next), &row, false, cancel).await?;
            }
        }
        self.series_value = series;

        let (keep, ignore) = self.mappings.process_input_data(&row, None, cancel).await?;
        if keep && !ignore {
            match self.mode {
                GroupMode::Aggregate => self.bucket_rows += 1,
                GroupMode::Analytic => {
                    let mut output = self.mappings.new_output_row();
                    self.mappings.map_output_row(&mut output);
                    self.mappings.cache_group_row(output);
                }
            }
        }
        self.template = Some(row);
        Ok(())
    }

    /// 在缺失的序列点上补齐，每个补齐点单独成桶
    async fn fill_gaps(
        &mut self,
        previous: Option<&Value>,
        next: Option<&Value>,
        template: &[Value],
        is_forecast: bool,
        cancel: &CancelToken,
    ) -> MapResult<()> {
        let points = self.mappings.series_gap_points(previous, next)?;
        if !points.is_empty() {
            log::trace!("补齐 {} 个序列点", points.len());
        }
        for point in points {
            let filler = self.mappings.create_filler_row(template, &point);
            self.series_value = Some(point);
            let (keep, ignore) = self
                .mappings
                .process_filler_data(&filler, is_forecast, cancel)
                .await?;
            if keep && !ignore {
                self.bucket_rows += 1;
            }
            self.emit_bucket(is_forecast, cancel).await?;
        }
        Ok(())
    }

    /// 输出当前桶的聚合行并清理聚合状态
    async fn emit_bucket(&mut self, is_forecast: bool, cancel: &CancelToken) -> MapResult<()> {
        if self.bucket_rows > 0 {
            let mut row = self.mappings.new_output_row();
            self.mappings.map_output_row(&mut row);
            let vars = FunctionVariables {
                index: 0,
                is_forecast,
                series_value: self.series_value.clone(),
                ..FunctionVariables::default()
            };
            loop {
                let mut emitted = row.clone();
                let (more_rows, ignore) = self
                    .mappings
                    .process_aggregate_row(&vars, &mut emitted, MappingPhase::Aggregate, cancel)
                    .await?;
                if !ignore {
                    self.pending.push_back(emitted);
                }
                if !more_rows {
                    break;
                }
            }
        }
        self.bucket_rows = 0;
        self.mappings.reset(MappingPhase::Aggregate);
        Ok(())
    }

    async fn finish_group(&mut self, cancel: &CancelToken) -> MapResult<()> {
        match self.mode {
            GroupMode::Aggregate => {
                self.emit_bucket(false, cancel).await?;
                if let (Some(template), Some(last)) = (self.template.take(), self.series_value.clone()) {
                    self.fill_gaps(Some(&last), None, &template, true, cancel).await?;
                }
            }
            GroupMode::Analytic => {
                let rows = self.mappings.take_group_rows();
                for (index, row) in rows.into_iter().enumerate() {
                    let vars = FunctionVariables::at(index);
                    loop {
                        let mut emitted = row.clone();
                        let (more_rows, ignore) = self
                            .mappings
                            .process_aggregate_row(&vars, &mut emitted, MappingPhase::Analytic, cancel)
                            .await?;
                        if !ignore {
                            self.pending.push_back(emitted);
                        }
                        if !more_rows {
                            break;
                        }
                    }
                }
                self.mappings.reset(MappingPhase::Analytic);
            }
        }
        self.mappings.reset(MappingPhase::Aggregate);
        self.group_key = None;
        self.series_value = None;
        self.template = None;
        self.groups += 1;
        Ok(())
    }
}

#[async_trait]
impl Transform for GroupTransform {
    fn schema(&self) -> &Table {
        &self.schema
    }

    async fn open(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.input.open(cancel).await?;
        self.mappings.open(cancel).await
    }

    async fn read_row(&mut self, cancel: &CancelToken) -> MapResult<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if self.finished {
                return Ok(None);
            }

            match self.input.read_row(cancel).await? {
                Some(row) => self.accept(row, cancel).await?,
                None => {
                    if self.group_key.is_some() {
                        self.finish_group(cancel).await?;
                    }
                    self.finished = true;
                    log::debug!("分组阶段 {} 完成: {} 个分组", self.schema.name, self.groups);
                }
            }
        }
    }

    async fn reset(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.input.reset(cancel).await?;
        self.mappings.reset(MappingPhase::Aggregate);
        self.mappings.reset(MappingPhase::Analytic);
        self.pending.clear();
        self.group_key = None;
        self.series_value = None;
        self.template = None;
        self.bucket_rows = 0;
        self.groups = 0;
        self.finished = false;
        Ok(())
    }
}
