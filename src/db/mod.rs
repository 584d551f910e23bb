//! Database layer
//!
//! Supports SQLite (default, single-file deployment) and MySQL, selected by
//! `database.driver`. The rest of the application only sees the
//! `DatabasePool` trait and the repository traits in `repositories`.
//!
//! ```ignore
//! let pool = create_pool(&config.database).await?;
//! migrations::run_migrations(&pool).await?;
//! let accounts = SqlxAccountRepository::boxed(pool.clone());
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
