use sqlx::SqlitePool;

/// Pool SQLite in memoria con schema già applicato.
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = crate::connect_pool("sqlite::memory:", 1).await.expect("memory pool");
    crate::run_migrations(&pool).await.expect("migrations");
    pool
}
