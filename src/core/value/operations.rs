//! 类型化运算
//!
//! 按列的语义类型分派的解析、加法、比较与除法。
//! 聚合、过滤、连接与序列映射都通过这里完成值运算，
//! 不支持的类型/运算组合统一返回 `TypeMismatch`。

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::types::{DataType, Value};
use crate::core::error::{MapResult, MappingError};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d %b %Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// 将值解析为指定类型
pub fn parse(data_type: DataType, value: &Value) -> MapResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match data_type {
        DataType::Unknown => Ok(value.clone()),
        DataType::Boolean => parse_bool(value),
        DataType::Int16 => parse_int(value).and_then(|i| check_range(data_type, i)),
        DataType::Int32 => parse_int(value).and_then(|i| check_range(data_type, i)),
        DataType::Int64 => parse_int(value).map(Value::Int),
        DataType::Double => parse_float(value),
        DataType::String => match value {
            Value::Node(_) => Err(MappingError::type_mismatch("无法将节点值转换为字符串", value)),
            other => Ok(Value::String(other.to_string())),
        },
        DataType::Date => parse_date(value),
        DataType::DateTime => parse_datetime(value),
        DataType::Node => match value {
            Value::Node(_) => Ok(value.clone()),
            other => Err(MappingError::type_mismatch("只有节点值可以转换为节点类型", other)),
        },
    }
}

/// 类型化加法
///
/// Null 不参与累加：任一操作数为 Null 时返回另一个操作数（按类型解析后）。
pub fn add(data_type: DataType, a: &Value, b: &Value) -> MapResult<Value> {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ok(Value::Null),
        (true, false) => return parse(data_type, b),
        (false, true) => return parse(data_type, a),
        _ => {}
    }

    match data_type {
        DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let left = parse_int(a)?;
            let right = parse_int(b)?;
            let sum = left
                .checked_add(right)
                .ok_or_else(|| MappingError::type_mismatch("整数加法溢出", format!("{} + {}", left, right)))?;
            check_range(data_type, sum)
        }
        DataType::Double => {
            let left = as_f64(&parse_float(a)?);
            let right = as_f64(&parse_float(b)?);
            Ok(Value::Float(left + right))
        }
        DataType::Unknown => match (a, b) {
            (Value::Int(x), Value::Int(y)) => x
                .checked_add(*y)
                .map(Value::Int)
                .ok_or_else(|| MappingError::type_mismatch("整数加法溢出", format!("{} + {}", x, y))),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                add(DataType::Double, a, b)
            }
            _ => Err(MappingError::type_mismatch(
                format!("类型 {} 不支持加法运算", data_type),
                format!("{} + {}", a, b),
            )),
        },
        _ => Err(MappingError::type_mismatch(
            format!("类型 {} 不支持加法运算", data_type),
            format!("{} + {}", a, b),
        )),
    }
}

/// 类型化比较
///
/// 两个值先解析为指定类型再比较，Null 排在任何值之前。
pub fn compare(data_type: DataType, a: &Value, b: &Value) -> MapResult<Ordering> {
    let left = parse(data_type, a)?;
    let right = parse(data_type, b)?;
    left.natural_cmp(&right).ok_or_else(|| {
        MappingError::type_mismatch(
            format!("类型 {} 的值无法比较", data_type),
            format!("{} <> {}", a, b),
        )
    })
}

/// 类型化除法（用于平均值）
///
/// 数量为 0 时返回该类型的零值而不是除零。
/// 整数类型先将被除数解析为目标类型，再做截断除法。
pub fn divide(data_type: DataType, value: &Value, count: i64) -> MapResult<Value> {
    if count == 0 || value.is_null() {
        return zero(data_type);
    }

    match data_type {
        DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let coerced = parse(data_type, value)?;
            let total = coerced.as_int().unwrap_or_default();
            Ok(Value::Int(total / count))
        }
        DataType::Double | DataType::Unknown => {
            let total = as_f64(&parse_float(value)?);
            Ok(Value::Float(total / count as f64))
        }
        _ => Err(MappingError::type_mismatch(
            format!("类型 {} 不支持除法运算", data_type),
            value,
        )),
    }
}

/// 指定数值类型的零值
pub fn zero(data_type: DataType) -> MapResult<Value> {
    match data_type {
        DataType::Int16 | DataType::Int32 | DataType::Int64 => Ok(Value::Int(0)),
        DataType::Double | DataType::Unknown => Ok(Value::Float(0.0)),
        other => Err(MappingError::type_mismatch(
            format!("类型 {} 没有零值", other),
            "0",
        )),
    }
}

fn parse_bool(value: &Value) -> MapResult<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Int(i) => Ok(Value::Bool(*i != 0)),
        Value::Float(f) => Ok(Value::Bool(*f != 0.0)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "n" | "off" => Ok(Value::Bool(false)),
            _ => Err(MappingError::type_mismatch("无法将字符串转换为布尔值", s)),
        },
        other => Err(MappingError::type_mismatch("无法转换为布尔值", other)),
    }
}

fn parse_int(value: &Value) -> MapResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
        Value::Bool(b) => Ok(if *b { 1 } else { 0 }),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| MappingError::type_mismatch("无法将字符串转换为整数", s)),
        other => Err(MappingError::type_mismatch("无法转换为整数", other)),
    }
}

fn check_range(data_type: DataType, value: i64) -> MapResult<Value> {
    let in_range = match data_type {
        DataType::Int16 => i16::try_from(value).is_ok(),
        DataType::Int32 => i32::try_from(value).is_ok(),
        _ => true,
    };
    if in_range {
        Ok(Value::Int(value))
    } else {
        Err(MappingError::type_mismatch(
            format!("整数超出 {} 的范围", data_type),
            value,
        ))
    }
}

fn parse_float(value: &Value) -> MapResult<Value> {
    match value {
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| MappingError::type_mismatch("无法将字符串转换为浮点数", s)),
        other => Err(MappingError::type_mismatch("无法转换为浮点数", other)),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Float(f) => *f,
        Value::Int(i) => *i as f64,
        _ => 0.0,
    }
}

fn parse_date(value: &Value) -> MapResult<Value> {
    match value {
        Value::Date(d) => Ok(Value::Date(*d)),
        Value::DateTime(dt) => Ok(Value::Date(dt.date())),
        Value::String(s) => {
            let text = s.trim();
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .or_else(|| {
                    DATETIME_FORMATS
                        .iter()
                        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                        .map(|dt| dt.date())
                })
                .map(Value::Date)
                .ok_or_else(|| MappingError::type_mismatch("无法将字符串转换为日期", s))
        }
        other => Err(MappingError::type_mismatch("无法转换为日期", other)),
    }
}

fn parse_datetime(value: &Value) -> MapResult<Value> {
    match value {
        Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
        Value::Date(d) => Ok(Value::DateTime(d.and_time(NaiveTime::MIN))),
        Value::String(s) => {
            let text = s.trim();
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                        .map(|d| d.and_time(NaiveTime::MIN))
                })
                .map(Value::DateTime)
                .ok_or_else(|| MappingError::type_mismatch("无法将字符串转换为日期时间", s))
        }
        other => Err(MappingError::type_mismatch("无法转换为日期时间", other)),
    }
}
