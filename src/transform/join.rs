//! 排序合并连接阶段
//!
//! 主流与引用流都必须按连接键升序排列。每次比较由 `Mappings::join_compare_result`
//! 给出三态结果：相等则输出匹配行，主流较小则前进主流，主流较大则前进引用流。
//! 引用流中连接键相同的连续行缓存为一段，支持多对多匹配。

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::VecDeque;

use super::Transform;
use crate::core::{CancelToken, MapResult, Row, Table, Value};
use crate::mapping::{Mappings, MappingPhase};

/// 连接方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinMode {
    #[default]
    Inner,
    /// 主流未匹配的行也输出，连接列为 Null
    LeftOuter,
}

#[derive(Debug)]
pub struct JoinTransform {
    primary: Box<dyn Transform>,
    reference: Box<dyn Transform>,
    mappings: Mappings,
    mode: JoinMode,
    schema: Table,
    pending: VecDeque<Row>,
    /// 连接键相同的一段引用行
    run: Vec<Row>,
    /// 已读出但不属于当前段的引用行
    lookahead: Option<Row>,
    reference_done: bool,
    matched_rows: u64,
}

impl JoinTransform {
    pub fn new(
        primary: Box<dyn Transform>,
        reference: Box<dyn Transform>,
        mut mappings: Mappings,
        mode: JoinMode,
        join_alias: Option<&str>,
    ) -> MapResult<Self> {
        let schema = mappings.initialize(primary.schema(), Some(reference.schema()), join_alias)?;
        if !mappings.has_join() {
            log::warn!("连接阶段 {} 没有连接键，所有行都视为匹配", schema.name);
        }
        Ok(Self {
            primary,
            reference,
            mappings,
            mode,
            schema,
            pending: VecDeque::new(),
            run: Vec::new(),
            lookahead: None,
            reference_done: false,
            matched_rows: 0,
        })
    }

    pub fn mappings(&self) -> &Mappings {
        &self.mappings
    }

    /// 读取下一段连接键相同的引用行
    async fn next_run(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.run.clear();
        let first = match self.lookahead.take() {
            Some(row) => row,
            None if self.reference_done => return Ok(()),
            None => match self.reference.read_row(cancel).await? {
                Some(row) => row,
                None => {
                    self.reference_done = true;
                    return Ok(());
                }
            },
        };

        let key: Vec<Value> = self.mappings.get_join_reference_key(&first);
        self.run.push(first);
        loop {
            match self.reference.read_row(cancel).await? {
                Some(row) if self.mappings.get_join_reference_key(&row) == key => self.run.push(row),
                Some(row) => {
                    self.lookahead = Some(row);
                    break;
                }
                None => {
                    self.reference_done = true;
                    break;
                }
            }
        }
        log::trace!("引用段 {:?}: {} 行", key, self.run.len());
        Ok(())
    }

    async fn join_primary_row(&mut self, row: &[Value], cancel: &CancelToken) -> MapResult<()> {
        let mut matched = false;
        loop {
            if self.run.is_empty() {
                self.next_run(cancel).await?;
                if self.run.is_empty() {
                    break;
                }
            }

            let rows = self
                .mappings
                .map_row(row, Some(self.run[0].as_slice()), cancel)
                .await?;
            match self.mappings.join_compare_result() {
                Ordering::Equal => {
                    matched = true;
                    self.pending.extend(rows);
                    for reference in &self.run[1..] {
                        let rows = self.mappings.map_row(row, Some(reference.as_slice()), cancel).await?;
                        self.pending.extend(rows);
                    }
                    break;
                }
                Ordering::Less => break,
                Ordering::Greater => self.run.clear(),
            }
        }

        if matched {
            self.matched_rows += 1;
        } else if self.mode == JoinMode::LeftOuter {
            let rows = self.mappings.map_row(row, None, cancel).await?;
            self.pending.extend(rows);
        }
        Ok(())
    }
}

#[async_trait]
impl Transform for JoinTransform {
    fn schema(&self) -> &Table {
        &self.schema
    }

    async fn open(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.primary.open(cancel).await?;
        self.reference.open(cancel).await?;
        self.mappings.open(cancel).await
    }

    async fn read_row(&mut self, cancel: &CancelToken) -> MapResult<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            // 内连接在引用流耗尽后不会再有匹配
            if self.mode == JoinMode::Inner && self.reference_done && self.run.is_empty() && self.lookahead.is_none() {
                return Ok(None);
            }

            let Some(row) = self.primary.read_row(cancel).await? else {
                log::debug!("连接阶段 {} 完成: {} 行匹配", self.schema.name, self.matched_rows);
                return Ok(None);
            };
            self.join_primary_row(&row, cancel).await?;
        }
    }

    async fn reset(&mut self, cancel: &CancelToken) -> MapResult<()> {
        self.primary.reset(cancel).await?;
        self.reference.reset(cancel).await?;
        self.mappings.reset(MappingPhase::Rows);
        self.pending.clear();
        self.run.clear();
        self.lookahead = None;
        self.reference_done = false;
        self.matched_rows = 0;
        Ok(())
    }
}
