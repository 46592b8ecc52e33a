use crate::{
    dao::{PoolOption, PoolType},
    error::Error,
    model::{Document, Subscription, Table},
};

#[derive(Debug)]
pub struct DatabasePool {
    pub subscription: Table<Subscription>,
    pub document: Table<Document>,
    pub pool: PoolType,
}

impl DatabasePool {
    pub async fn new(database_url: &str) -> Result<DatabasePool, Error> {
        let pool = PoolOption::new()
            .max_connections(20)
            .connect(database_url)
            .await?;

        Ok(DatabasePool {
            subscription: Table::new(pool.clone()),
            document: Table::new(pool.clone()),
            pool,
        })
    }
}
