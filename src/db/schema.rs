//! Schema 初始化子模块
//!
//! ## 职责
//! - 创建/迁移 `frames` 与 `composites` 表结构与索引
//! - 设置 SQLite 运行参数（WAL、外键）
//!
//! ## 版本
//! - v1：基础表
//! - v2：`frames.is_public` 可见性标记
//!
//! ## 错误语义
//! - DDL 失败统一映射为 `AppError::Database`

use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_VERSION: i64 = 2;

fn get_user_version(conn: &Connection) -> Result<i64, AppError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| AppError::Database(format!("读取数据库版本失败: {}", e)))
}

fn set_user_version(conn: &Connection, version: i64) -> Result<(), AppError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| AppError::Database(format!("写入数据库版本失败: {}", e)))
}

fn create_base_tables(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS frames (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            storage_key TEXT NOT NULL UNIQUE,
            aperture TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS composites (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            storage_key TEXT NOT NULL UNIQUE,
            frame_id TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (frame_id) REFERENCES frames(id) ON DELETE SET NULL
        );
        CREATE INDEX IF NOT EXISTS idx_frames_owner_created ON frames(owner_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_composites_owner_created ON composites(owner_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_composites_frame_id ON composites(frame_id);"
    ).map_err(|e| AppError::Database(format!("创建基础表失败: {}", e)))
}

fn add_frame_visibility(conn: &Connection) -> Result<(), AppError> {
    let has_column: bool = conn
        .prepare("PRAGMA table_info(frames)")
        .and_then(|mut stmt| {
            let columns = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>();
            columns
        })
        .map(|columns| columns.iter().any(|c| c == "is_public"))
        .map_err(|e| AppError::Database(format!("读取 frames 表结构失败: {}", e)))?;

    if !has_column {
        conn.execute_batch(
            "ALTER TABLE frames ADD COLUMN is_public INTEGER NOT NULL DEFAULT 0 CHECK (is_public IN (0, 1));"
        ).map_err(|e| AppError::Database(format!("添加 is_public 列失败: {}", e)))?;
    }

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_frames_public_created ON frames(is_public, created_at DESC);"
    ).map_err(|e| AppError::Database(format!("创建可见性索引失败: {}", e)))
}

pub(super) fn initialize_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .ok();

    create_base_tables(conn)?;

    let mut version = get_user_version(conn)?;
    if version < 1 {
        set_user_version(conn, 1)?;
        version = 1;
    }

    if version < 2 {
        add_frame_visibility(conn)?;
        set_user_version(conn, 2)?;
        version = 2;
    }

    if version != SCHEMA_VERSION {
        return Err(AppError::Database(format!(
            "数据库版本不匹配: current={}, expected={}",
            version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn setup_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("create memory db");
    initialize_schema(&conn).expect("init schema");
    conn
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rusqlite::Connection;

    use super::initialize_schema;

    #[test]
    fn initialize_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("create memory db");

        initialize_schema(&conn).expect("first init should succeed");
        initialize_schema(&conn).expect("second init should succeed");

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('frames', 'composites')",
                [],
                |row| row.get(0),
            )
            .expect("query table count");
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("query version");

        assert_eq!(count, 2);
        assert_eq!(version, 2);
    }

    #[test]
    fn migrates_v1_database_to_visibility_column() {
        let conn = Connection::open_in_memory().expect("create memory db");
        conn.execute_batch(
            "CREATE TABLE frames (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                storage_key TEXT NOT NULL UNIQUE,
                aperture TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            INSERT INTO frames (id, owner_id, storage_key, aperture, created_at)
            VALUES ('f1', 'alice', 'alice/f1.png', '{\"kind\":\"mask_detected\"}', 1);
            PRAGMA user_version = 1;"
        ).expect("create v1 schema");

        initialize_schema(&conn).expect("migrate");

        let mut stmt = conn.prepare("PRAGMA table_info(frames)").expect("prepare table_info");
        let columns: HashSet<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query columns")
            .collect::<Result<_, _>>()
            .expect("collect columns");
        assert!(columns.contains("is_public"));

        let is_public: i64 = conn
            .query_row("SELECT is_public FROM frames WHERE id = 'f1'", [], |row| row.get(0))
            .expect("query migrated row");
        assert_eq!(is_public, 0);
    }
}
