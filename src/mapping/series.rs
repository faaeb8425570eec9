//! 序列映射（时间/数值序列与缺口补齐）
//!
//! `get_output_value` 将输入值截断到粒度边界，
//! `calculate_next_value` 将截断后的值推进一个步长。
//! 缺口补齐由编排器完成：它在相邻两个观测值之间按序列逐点
//! 构造补齐行，本映射只负责把序列列设为缺失的值。

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use super::{FunctionVariables, Mapping, MappingPhase};
use crate::core::value::operations;
use crate::core::{CancelToken, DataType, MapResult, MappingError, Row, Table, TableColumn, Value};

/// 序列粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesGrain {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
    /// 数值序列，按步长推进
    Number,
}

impl SeriesGrain {
    fn is_sub_day(&self) -> bool {
        matches!(self, SeriesGrain::Second | SeriesGrain::Minute | SeriesGrain::Hour)
    }
}

#[derive(Debug, Clone)]
pub struct MapSeries {
    input_column: TableColumn,
    output_column: TableColumn,
    grain: SeriesGrain,
    step: i64,
    start: Option<Value>,
    finish: Option<Value>,
    fill_gaps: bool,
    week_start: Option<Weekday>,
    data_type: DataType,
    input_ordinal: Option<usize>,
    output_ordinal: Option<usize>,
    value: Value,
}

impl MapSeries {
    pub fn new(input_column: TableColumn, output_column: TableColumn, grain: SeriesGrain) -> Self {
        Self {
            input_column,
            output_column,
            grain,
            step: 1,
            start: None,
            finish: None,
            fill_gaps: false,
            week_start: None,
            data_type: DataType::Unknown,
            input_ordinal: None,
            output_ordinal: None,
            value: Value::Null,
        }
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }

    pub fn with_start(mut self, start: impl Into<Value>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn with_finish(mut self, finish: impl Into<Value>) -> Self {
        self.finish = Some(finish.into());
        self
    }

    pub fn with_fill_gaps(mut self, fill_gaps: bool) -> Self {
        self.fill_gaps = fill_gaps;
        self
    }

    pub fn with_week_start(mut self, week_start: Weekday) -> Self {
        self.week_start = Some(week_start);
        self
    }

    /// 未显式设置时使用给定的周起始日
    pub(crate) fn default_week_start(&mut self, week_start: Weekday) {
        if self.week_start.is_none() {
            self.week_start = Some(week_start);
        }
    }

    pub fn grain(&self) -> SeriesGrain {
        self.grain
    }

    pub fn fill_gaps(&self) -> bool {
        self.fill_gaps
    }

    /// 截断后的起始值
    pub fn start(&self) -> Option<&Value> {
        self.start.as_ref()
    }

    /// 截断后的结束值
    pub fn finish(&self) -> Option<&Value> {
        self.finish.as_ref()
    }

    /// 读取输入行的序列值（已截断）
    pub fn series_value(&self, row: &[Value]) -> MapResult<Value> {
        let raw = self
            .input_ordinal
            .and_then(|ordinal| row.get(ordinal))
            .unwrap_or(&Value::Null);
        self.get_output_value(raw)
    }

    /// 按序列类型比较两个值
    pub fn compare(&self, a: &Value, b: &Value) -> MapResult<Ordering> {
        operations::compare(self.data_type, a, b)
    }

    fn effective_type(&self, declared: DataType) -> DataType {
        match (declared, self.grain) {
            (DataType::Unknown, SeriesGrain::Number) => DataType::Double,
            (DataType::Unknown, _) | (DataType::String, _) if self.grain != SeriesGrain::Number => {
                DataType::DateTime
            }
            (data_type, _) => data_type,
        }
    }

    fn check_combination(&self) -> MapResult<()> {
        if self.step < 1 {
            return Err(MappingError::schema(format!(
                "{} 的步长必须大于等于 1，实际为 {}",
                self.description(),
                self.step
            )));
        }

        let supported = match self.grain {
            SeriesGrain::Number => self.data_type.is_numeric(),
            grain if grain.is_sub_day() => self.data_type == DataType::DateTime,
            _ => self.data_type.is_temporal(),
        };
        if supported {
            Ok(())
        } else {
            Err(MappingError::type_mismatch(
                format!("序列粒度 {:?} 不支持该列类型", self.grain),
                self.data_type,
            ))
        }
    }

    fn week_start_day(&self) -> Weekday {
        self.week_start.unwrap_or(Weekday::Mon)
    }

    /// 将值截断到粒度边界
    pub fn get_output_value(&self, value: &Value) -> MapResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match operations::parse(self.data_type, value)? {
            Value::Int(i) if self.grain == SeriesGrain::Number => Ok(Value::Int(i - i.rem_euclid(self.step))),
            Value::Float(f) if self.grain == SeriesGrain::Number => {
                let step = self.step as f64;
                Ok(Value::Float((f / step).floor() * step))
            }
            Value::Date(date) if !self.grain.is_sub_day() && self.grain != SeriesGrain::Number => {
                self.truncate_date(date).map(Value::Date)
            }
            Value::DateTime(dt) if self.grain != SeriesGrain::Number => {
                self.truncate_datetime(dt).map(Value::DateTime)
            }
            other => Err(MappingError::type_mismatch(
                format!("序列粒度 {:?} 无法截断该值", self.grain),
                other,
            )),
        }
    }

    /// 将已截断的值推进一个步长
    pub fn calculate_next_value(&self, value: &Value) -> MapResult<Value> {
        let next = match value {
            Value::Int(i) if self.grain == SeriesGrain::Number => i.checked_add(self.step).map(Value::Int),
            Value::Float(f) if self.grain == SeriesGrain::Number => Some(Value::Float(f + self.step as f64)),
            Value::Date(date) if !self.grain.is_sub_day() && self.grain != SeriesGrain::Number => {
                self.advance_date(*date).map(Value::Date)
            }
            Value::DateTime(dt) if self.grain != SeriesGrain::Number => {
                self.advance_datetime(*dt).map(Value::DateTime)
            }
            other => {
                return Err(MappingError::type_mismatch(
                    format!("序列粒度 {:?} 无法推进该值", self.grain),
                    other,
                ))
            }
        };
        next.ok_or_else(|| MappingError::type_mismatch("序列值超出范围", value))
    }

    fn truncate_date(&self, date: NaiveDate) -> MapResult<NaiveDate> {
        let truncated = match self.grain {
            SeriesGrain::Week => {
                let offset = (7 + date.weekday().num_days_from_monday()
                    - self.week_start_day().num_days_from_monday())
                    % 7;
                TimeDelta::try_days(offset as i64).and_then(|delta| date.checked_sub_signed(delta))
            }
            SeriesGrain::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
            SeriesGrain::Quarter => {
                let month = (date.month() - 1) / 3 * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1)
            }
            SeriesGrain::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
            _ => Some(date),
        };
        truncated.ok_or_else(|| MappingError::type_mismatch("无法截断日期", date))
    }

    fn truncate_datetime(&self, dt: NaiveDateTime) -> MapResult<NaiveDateTime> {
        let date = dt.date();
        let truncated = match self.grain {
            SeriesGrain::Second => date.and_hms_opt(dt.hour(), dt.minute(), dt.second()),
            SeriesGrain::Minute => date.and_hms_opt(dt.hour(), dt.minute(), 0),
            SeriesGrain::Hour => date.and_hms_opt(dt.hour(), 0, 0),
            _ => self.truncate_date(date)?.and_hms_opt(0, 0, 0),
        };
        truncated.ok_or_else(|| MappingError::type_mismatch("无法截断日期时间", dt))
    }

    fn months(&self, per_step: i64) -> Option<Months> {
        u32::try_from(self.step.checked_mul(per_step)?).ok().map(Months::new)
    }

    fn advance_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.grain {
            SeriesGrain::Day => date.checked_add_signed(TimeDelta::try_days(self.step)?),
            SeriesGrain::Week => date.checked_add_signed(TimeDelta::try_days(self.step.checked_mul(7)?)?),
            SeriesGrain::Month => date.checked_add_months(self.months(1)?),
            SeriesGrain::Quarter => date.checked_add_months(self.months(3)?),
            SeriesGrain::Year => date.checked_add_months(self.months(12)?),
            _ => None,
        }
    }

    fn advance_datetime(&self, dt: NaiveDateTime) -> Option<NaiveDateTime> {
        match self.grain {
            SeriesGrain::Second => dt.checked_add_signed(TimeDelta::try_seconds(self.step)?),
            SeriesGrain::Minute => dt.checked_add_signed(TimeDelta::try_minutes(self.step)?),
            SeriesGrain::Hour => dt.checked_add_signed(TimeDelta::try_hours(self.step)?),
            _ => {
                let date = self.advance_date(dt.date())?;
                Some(date.and_time(dt.time()))
            }
        }
    }
}

#[async_trait]
impl Mapping for MapSeries {
    fn phase(&self) -> MappingPhase {
        MappingPhase::Series
    }

    fn initialize_columns(&mut self, input: &Table, _join: Option<&Table>) -> MapResult<()> {
        let ordinal = input.get_column_ordinal(&self.input_column).ok_or_else(|| {
            MappingError::schema(format!(
                "序列列 {} 在输入中不存在",
                self.input_column.qualified_name()
            ))
        })?;
        self.input_ordinal = Some(ordinal);
        self.data_type = self.effective_type(input.columns[ordinal].data_type);
        self.check_combination()?;

        if self.output_column.data_type == DataType::Unknown || self.output_column.data_type == DataType::String {
            self.output_column.data_type = self.data_type;
        }

        self.start = match self.start.take() {
            Some(start) => Some(self.get_output_value(&start)?),
            None => None,
        };
        self.finish = match self.finish.take() {
            Some(finish) => Some(self.get_output_value(&finish)?),
            None => None,
        };
        Ok(())
    }

    fn add_output_columns(&mut self, output: &mut Table) -> MapResult<()> {
        self.output_ordinal = Some(output.add_column(self.output_column.clone()));
        Ok(())
    }

    async fn process_input_row(
        &mut self,
        _vars: &FunctionVariables,
        row: &[Value],
        _join_row: Option<&[Value]>,
        _cancel: &CancelToken,
    ) -> MapResult<bool> {
        self.value = self.series_value(row)?;
        Ok(true)
    }

    fn map_output_row(&self, output: &mut Row) {
        if let Some(ordinal) = self.output_ordinal {
            output[ordinal] = self.value.clone();
        }
    }

    fn process_filler_row(&mut self, _row: &[Value], filler: &mut Row, series_value: &Value) {
        if let Some(ordinal) = self.input_ordinal {
            filler[ordinal] = series_value.clone();
        }
    }

    fn description(&self) -> String {
        format!(
            "Series({:?}({}) -> {})",
            self.grain, self.input_column.name, self.output_column.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Value {
        NaiveDate::from_ymd_opt(y, m, d).map(Value::Date).unwrap_or_default()
    }

    fn datetime(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> Value {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|day| day.and_hms_opt(h, min, s))
            .map(Value::DateTime)
            .unwrap_or_default()
    }

    fn series(data_type: DataType, grain: SeriesGrain) -> MapSeries {
        let input = Table::with_columns("events", vec![TableColumn::new("at", data_type)]);
        let mut mapping = MapSeries::new(
            TableColumn::new("at", data_type),
            TableColumn::new("bucket", DataType::Unknown),
            grain,
        );
        mapping.initialize_columns(&input, None).expect("初始化失败");
        mapping
    }

    #[test]
    fn test_truncation_is_idempotent() {
        let cases = [
            (DataType::DateTime, SeriesGrain::Hour, datetime(2024, 3, 5, 10, 42, 7)),
            (DataType::DateTime, SeriesGrain::Day, datetime(2024, 3, 5, 10, 42, 7)),
            (DataType::Date, SeriesGrain::Month, date(2024, 3, 5)),
            (DataType::Date, SeriesGrain::Quarter, date(2024, 8, 19)),
            (DataType::Int64, SeriesGrain::Number, Value::Int(17)),
        ];
        for (data_type, grain, value) in cases {
            let mapping = series(data_type, grain);
            let once = mapping.get_output_value(&value).expect("截断失败");
            let twice = mapping.get_output_value(&once).expect("截断失败");
            assert_eq!(once, twice, "{:?} 截断不是幂等的", grain);
        }
    }

    #[test]
    fn test_truncate_values() {
        let mapping = series(DataType::DateTime, SeriesGrain::Day);
        assert_eq!(
            mapping.get_output_value(&datetime(2024, 3, 5, 10, 42, 7)).ok(),
            Some(datetime(2024, 3, 5, 0, 0, 0))
        );

        let mapping = series(DataType::Date, SeriesGrain::Quarter);
        assert_eq!(mapping.get_output_value(&date(2024, 8, 19)).ok(), Some(date(2024, 7, 1)));

        // 2024-03-06 是星期三，按星期一开始的周截断到 03-04
        let mapping = series(DataType::Date, SeriesGrain::Week);
        assert_eq!(mapping.get_output_value(&date(2024, 3, 6)).ok(), Some(date(2024, 3, 4)));

        let input = Table::with_columns("events", vec![TableColumn::new("at", DataType::Date)]);
        let mut sunday = MapSeries::new(
            TableColumn::new("at", DataType::Date),
            TableColumn::new("week", DataType::Date),
            SeriesGrain::Week,
        )
        .with_week_start(Weekday::Sun);
        sunday.initialize_columns(&input, None).expect("初始化失败");
        assert_eq!(sunday.get_output_value(&date(2024, 3, 6)).ok(), Some(date(2024, 3, 3)));
    }

    #[test]
    fn test_next_value_lands_on_boundary() {
        let mapping = series(DataType::Date, SeriesGrain::Month);
        let truncated = mapping.get_output_value(&date(2024, 1, 31)).expect("截断失败");
        assert_eq!(mapping.calculate_next_value(&truncated).ok(), Some(date(2024, 2, 1)));

        let input = Table::with_columns("events", vec![TableColumn::new("n", DataType::Int64)]);
        let mut numbers = MapSeries::new(
            TableColumn::new("n", DataType::Int64),
            TableColumn::new("bucket", DataType::Int64),
            SeriesGrain::Number,
        )
        .with_step(5);
        numbers.initialize_columns(&input, None).expect("初始化失败");
        let truncated = numbers.get_output_value(&Value::Int(17)).expect("截断失败");
        assert_eq!(truncated, Value::Int(15));
        assert_eq!(numbers.calculate_next_value(&truncated).ok(), Some(Value::Int(20)));
    }

    #[test]
    fn test_unsupported_grain_is_type_mismatch() {
        let input = Table::with_columns("events", vec![TableColumn::new("at", DataType::Date)]);
        let mut mapping = MapSeries::new(
            TableColumn::new("at", DataType::Date),
            TableColumn::new("bucket", DataType::Date),
            SeriesGrain::Number,
        );
        assert!(matches!(
            mapping.initialize_columns(&input, None),
            Err(MappingError::TypeMismatch { .. })
        ));

        let mut mapping = MapSeries::new(
            TableColumn::new("at", DataType::Date),
            TableColumn::new("bucket", DataType::Date),
            SeriesGrain::Hour,
        );
        assert!(matches!(
            mapping.initialize_columns(&input, None),
            Err(MappingError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_step_must_be_positive() {
        let input = Table::with_columns("events", vec![TableColumn::new("at", DataType::Date)]);
        let mut mapping = MapSeries::new(
            TableColumn::new("at", DataType::Date),
            TableColumn::new("bucket", DataType::Date),
            SeriesGrain::Day,
        )
        .with_step(0);
        assert!(matches!(
            mapping.initialize_columns(&input, None),
            Err(MappingError::Schema(_))
        ));
    }
}
