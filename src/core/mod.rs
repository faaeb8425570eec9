pub mod cancel;
pub mod error;
pub mod table;
pub mod value;

// 错误和结果类型
pub use error::{MapResult, MappingError};

// 取消标志
pub use cancel::CancelToken;

// 核心数据类型
pub use table::{Row, SortDirection, SortField, Table, TableColumn};
pub use value::{DataType, Value};
