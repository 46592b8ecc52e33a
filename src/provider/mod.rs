pub use self::{
    database::DatabasePool,
    http::HTTP,
};

mod database;
mod http;
