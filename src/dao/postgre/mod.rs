pub use self::types::{PoolOption, PoolType, QueryResult};

mod document;
mod subscription;
mod types;
