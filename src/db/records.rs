use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::AppError;
use crate::imaging::ApertureStrategy;

use super::{CompositeRecord, FrameRecord, RecordKey, RecordKind};

const FRAME_COLUMNS: &str = "id, owner_id, storage_key, is_public, aperture, created_at";
const COMPOSITE_COLUMNS: &str = "id, owner_id, storage_key, frame_id, created_at";

fn frame_from_row(row: &Row<'_>) -> rusqlite::Result<FrameRecord> {
    let aperture_json: String = row.get(4)?;
    let aperture: ApertureStrategy = serde_json::from_str(&aperture_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(FrameRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        storage_key: row.get(2)?,
        is_public: row.get::<_, i64>(3)? != 0,
        aperture,
        created_at: row.get(5)?,
    })
}

fn composite_from_row(row: &Row<'_>) -> rusqlite::Result<CompositeRecord> {
    Ok(CompositeRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        storage_key: row.get(2)?,
        frame_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// 写入画框占位记录。
pub fn insert_frame(conn: &Connection, record: &FrameRecord) -> Result<(), AppError> {
    let aperture = serde_json::to_string(&record.aperture)
        .map_err(|e| AppError::Database(format!("序列化开口策略失败: {}", e)))?;
    conn.execute(
        "INSERT INTO frames (id, owner_id, storage_key, is_public, aperture, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.owner_id,
            record.storage_key,
            record.is_public as i64,
            aperture,
            record.created_at
        ],
    ).map_err(|e| AppError::Database(format!("插入画框记录失败: {}", e)))?;
    Ok(())
}

/// 写入合成图占位记录。
pub fn insert_composite(conn: &Connection, record: &CompositeRecord) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO composites (id, owner_id, storage_key, frame_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id,
            record.owner_id,
            record.storage_key,
            record.frame_id,
            record.created_at
        ],
    ).map_err(|e| AppError::Database(format!("插入合成记录失败: {}", e)))?;
    Ok(())
}

pub fn get_frame(conn: &Connection, id: &str) -> Result<Option<FrameRecord>, AppError> {
    conn.query_row(
        &format!("SELECT {FRAME_COLUMNS} FROM frames WHERE id = ?1"),
        params![id],
        frame_from_row,
    )
    .optional()
    .map_err(|e| AppError::Database(format!("查询画框失败: {}", e)))
}

/// 调用者可见的画框：本人所有，或已公开。
pub fn get_frame_for_owner(conn: &Connection, id: &str, owner_id: &str) -> Result<Option<FrameRecord>, AppError> {
    conn.query_row(
        &format!("SELECT {FRAME_COLUMNS} FROM frames WHERE id = ?1 AND (owner_id = ?2 OR is_public = 1)"),
        params![id, owner_id],
        frame_from_row,
    )
    .optional()
    .map_err(|e| AppError::Database(format!("查询画框失败: {}", e)))
}

pub fn list_frames_for_owner(conn: &Connection, owner_id: &str) -> Result<Vec<FrameRecord>, AppError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {FRAME_COLUMNS} FROM frames WHERE owner_id = ?1 ORDER BY created_at DESC, id"
        ))
        .map_err(|e| AppError::Database(format!("准备查询失败: {}", e)))?;

    let items = stmt
        .query_map(params![owner_id], frame_from_row)
        .map_err(|e| AppError::Database(format!("查询画框列表失败: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(format!("读取行失败: {}", e)))?;

    Ok(items)
}

pub fn list_public_frames(conn: &Connection, limit: i64) -> Result<Vec<FrameRecord>, AppError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {FRAME_COLUMNS} FROM frames WHERE is_public = 1 ORDER BY created_at DESC, id LIMIT ?1"
        ))
        .map_err(|e| AppError::Database(format!("准备查询失败: {}", e)))?;

    let items = stmt
        .query_map(params![limit], frame_from_row)
        .map_err(|e| AppError::Database(format!("查询公开画框失败: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(format!("读取行失败: {}", e)))?;

    Ok(items)
}

/// 修改画框可见性；只有所有者可以修改。返回是否命中记录。
pub fn set_frame_visibility(conn: &Connection, id: &str, owner_id: &str, is_public: bool) -> Result<bool, AppError> {
    let changed = conn
        .execute(
            "UPDATE frames SET is_public = ?1 WHERE id = ?2 AND owner_id = ?3",
            params![is_public as i64, id, owner_id],
        )
        .map_err(|e| AppError::Database(format!("更新可见性失败: {}", e)))?;
    Ok(changed > 0)
}

pub fn list_composites_for_owner(conn: &Connection, owner_id: &str) -> Result<Vec<CompositeRecord>, AppError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COMPOSITE_COLUMNS} FROM composites WHERE owner_id = ?1 ORDER BY created_at DESC, id"
        ))
        .map_err(|e| AppError::Database(format!("准备查询失败: {}", e)))?;

    let items = stmt
        .query_map(params![owner_id], composite_from_row)
        .map_err(|e| AppError::Database(format!("查询合成列表失败: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(format!("读取行失败: {}", e)))?;

    Ok(items)
}

/// 全部记录的 (种类, ID, 存储键)，合成图在前。
pub fn all_record_keys(conn: &Connection) -> Result<Vec<RecordKey>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT 'composite', id, storage_key, created_at FROM composites
             UNION ALL
             SELECT 'frame', id, storage_key, created_at FROM frames",
        )
        .map_err(|e| AppError::Database(format!("准备查询失败: {}", e)))?;

    let keys = stmt
        .query_map([], |row| {
            let kind: String = row.get(0)?;
            Ok(RecordKey {
                kind: if kind == "frame" { RecordKind::Frame } else { RecordKind::Composite },
                id: row.get(1)?,
                storage_key: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .map_err(|e| AppError::Database(format!("查询记录键失败: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(format!("读取行失败: {}", e)))?;

    Ok(keys)
}

/// 在单个事务中按主键删除记录，返回实际删除的行数。
///
/// 先删合成图再删画框；已不存在的记录不计数。
pub fn delete_records(conn: &Connection, keys: &[RecordKey]) -> Result<usize, AppError> {
    if keys.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction().map_err(|e| {
        AppError::Database(format!("开启删除事务失败: {}", e))
    })?;

    let mut deleted = 0usize;
    {
        let mut delete_composite = tx
            .prepare("DELETE FROM composites WHERE id = ?1")
            .map_err(|e| AppError::Database(format!("准备删除语句失败: {}", e)))?;
        let mut delete_frame = tx
            .prepare("DELETE FROM frames WHERE id = ?1")
            .map_err(|e| AppError::Database(format!("准备删除语句失败: {}", e)))?;

        for key in keys.iter().filter(|k| k.kind == RecordKind::Composite) {
            deleted += delete_composite
                .execute(params![key.id])
                .map_err(|e| AppError::Database(format!("删除合成记录失败: {}", e)))?;
        }
        for key in keys.iter().filter(|k| k.kind == RecordKind::Frame) {
            deleted += delete_frame
                .execute(params![key.id])
                .map_err(|e| AppError::Database(format!("删除画框记录失败: {}", e)))?;
        }
    }

    tx.commit().map_err(|e| AppError::Database(format!("提交删除事务失败: {}", e)))?;

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::setup_conn;
    use crate::imaging::ApertureInsets;

    fn frame(id: &str, owner: &str, is_public: bool, created_at: i64) -> FrameRecord {
        FrameRecord {
            id: id.to_string(),
            owner_id: owner.to_string(),
            storage_key: format!("{owner}/{id}.png"),
            is_public,
            aperture: ApertureStrategy::Fixed(ApertureInsets::default()),
            created_at,
        }
    }

    fn composite(id: &str, owner: &str, frame_id: &str, created_at: i64) -> CompositeRecord {
        CompositeRecord {
            id: id.to_string(),
            owner_id: owner.to_string(),
            storage_key: format!("{owner}/{id}.png"),
            frame_id: Some(frame_id.to_string()),
            created_at,
        }
    }

    #[test]
    fn insert_and_get_frame_roundtrips_aperture() {
        let conn = setup_conn();
        let mut record = frame("f1", "alice", false, 10);
        record.aperture = ApertureStrategy::MaskDetected;

        insert_frame(&conn, &record).expect("insert");

        assert_eq!(get_frame(&conn, "f1").expect("get"), Some(record));
        assert_eq!(get_frame(&conn, "missing").expect("get"), None);
    }

    #[test]
    fn owner_visibility_rules() {
        let conn = setup_conn();
        insert_frame(&conn, &frame("private", "alice", false, 1)).expect("insert");
        insert_frame(&conn, &frame("shared", "alice", true, 2)).expect("insert");

        assert!(get_frame_for_owner(&conn, "private", "alice").expect("query").is_some());
        assert!(get_frame_for_owner(&conn, "private", "bob").expect("query").is_none());
        assert!(get_frame_for_owner(&conn, "shared", "bob").expect("query").is_some());

        assert!(!set_frame_visibility(&conn, "private", "bob", true).expect("update"));
        assert!(set_frame_visibility(&conn, "private", "alice", true).expect("update"));

        let public: Vec<String> = list_public_frames(&conn, 10)
            .expect("list")
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(public, vec!["shared".to_string(), "private".to_string()]);
    }

    #[test]
    fn listings_are_newest_first_and_scoped_to_owner() {
        let conn = setup_conn();
        insert_frame(&conn, &frame("old", "alice", false, 1)).expect("insert");
        insert_frame(&conn, &frame("new", "alice", false, 5)).expect("insert");
        insert_frame(&conn, &frame("other", "bob", false, 3)).expect("insert");
        insert_composite(&conn, &composite("c1", "bob", "old", 7)).expect("insert");

        let ids: Vec<String> = list_frames_for_owner(&conn, "alice")
            .expect("list")
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);

        assert_eq!(list_composites_for_owner(&conn, "bob").expect("list").len(), 1);
        assert!(list_composites_for_owner(&conn, "alice").expect("list").is_empty());
    }

    #[test]
    fn deleting_frame_detaches_composites() {
        let conn = setup_conn();
        insert_frame(&conn, &frame("f1", "alice", false, 1)).expect("insert");
        insert_composite(&conn, &composite("c1", "alice", "f1", 2)).expect("insert");

        let keys: Vec<RecordKey> = all_record_keys(&conn)
            .expect("keys")
            .into_iter()
            .filter(|k| k.kind == RecordKind::Frame)
            .collect();
        assert_eq!(delete_records(&conn, &keys).expect("delete"), 1);

        let composites = list_composites_for_owner(&conn, "alice").expect("list");
        assert_eq!(composites.len(), 1);
        assert_eq!(composites[0].frame_id, None);
    }

    #[test]
    fn delete_records_counts_only_existing_rows() {
        let conn = setup_conn();
        insert_frame(&conn, &frame("f1", "alice", false, 1)).expect("insert");

        let keys = all_record_keys(&conn).expect("keys");
        assert_eq!(delete_records(&conn, &keys).expect("first delete"), 1);
        assert_eq!(delete_records(&conn, &keys).expect("second delete"), 0);
    }

    #[test]
    fn composite_requires_existing_frame() {
        let conn = setup_conn();
        let result = insert_composite(&conn, &composite("c1", "alice", "ghost", 1));
        assert!(matches!(result, Err(AppError::Database(_))));
    }
}
