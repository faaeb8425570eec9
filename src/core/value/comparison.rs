use std::cmp::Ordering as CmpOrdering;
use std::hash::{Hash, Hasher};

use super::types::Value;

// 手动实现PartialEq以正确处理f64比较
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => (a == b) || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => {
                std::sync::Arc::ptr_eq(a, b) || (a.column_names() == b.column_names() && a.rows == b.rows)
            }
            _ => false,
        }
    }
}

// 手动实现Eq，因为f64没有实现Eq
impl Eq for Value {}

// 手动实现Hash以处理f64哈希
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                3u8.hash(state);
                if f.is_nan() {
                    // 所有NaN值应该哈希到相同的值
                    f64::NAN.to_bits().hash(state);
                } else if *f == 0.0 {
                    // 确保+0.0和-0.0哈希到相同的值
                    0.0_f64.to_bits().hash(state);
                } else {
                    f.to_bits().hash(state);
                }
            }
            Value::String(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Date(d) => {
                5u8.hash(state);
                d.hash(state);
            }
            Value::DateTime(dt) => {
                6u8.hash(state);
                dt.hash(state);
            }
            Value::Node(table) => {
                7u8.hash(state);
                table.column_names().hash(state);
                table.rows.hash(state);
            }
        }
    }
}

impl Value {
    /// 同类值的自然顺序比较
    ///
    /// 两个值类型不同（数值之间除外）时返回 `None`，
    /// Null 排在任何非 Null 值之前。
    pub fn natural_cmp(&self, other: &Value) -> Option<CmpOrdering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(CmpOrdering::Equal),
            (Value::Null, _) => Some(CmpOrdering::Less),
            (_, Value::Null) => Some(CmpOrdering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Some(Self::cmp_f64(*a, *b)),
            (Value::Int(a), Value::Float(b)) => Some(Self::cmp_f64(*a as f64, *b)),
            (Value::Float(a), Value::Int(b)) => Some(Self::cmp_f64(*a, *b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::DateTime(b)) => Some(a.and_time(chrono::NaiveTime::MIN).cmp(b)),
            (Value::DateTime(a), Value::Date(b)) => Some(a.cmp(&b.and_time(chrono::NaiveTime::MIN))),
            _ => None,
        }
    }

    // 浮点数比较辅助函数
    fn cmp_f64(a: f64, b: f64) -> CmpOrdering {
        if a.is_nan() && b.is_nan() {
            CmpOrdering::Equal
        } else if a.is_nan() {
            CmpOrdering::Less // NaN 小于任何非NaN值
        } else if b.is_nan() {
            CmpOrdering::Greater
        } else {
            a.partial_cmp(&b).unwrap_or(CmpOrdering::Equal)
        }
    }
}
