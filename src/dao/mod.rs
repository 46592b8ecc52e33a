mod memory;
mod postgre;
mod store;

pub use self::{
    memory::MemoryStore,
    postgre::{PoolOption, PoolType, QueryResult},
    store::SubscriptionStore,
};
