//! 存储模块 - 离线优先的数据持久化层
//!
//! 本模块提供：
//! - 基于 sled 的命名集合（每个集合一棵树）
//! - 非唯一二级索引（独立索引树，复合键 `{值}\0{id}`）
//! - 数据树 + 索引树在同一个 sled 事务内更新，不留半写状态
//! - 显式版本化 schema 迁移（见 `schema` 模块）
//!
//! 记录以 JSON 字节持久化，主键为记录的 `id` 字段；
//! 存储层不理解领域语义，只负责按集合与索引存取。

use serde_json::Value;
use sled::transaction::ConflictableTransactionError;
use sled::{Transactional, Tree};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{MedibookSDKError, Result};

pub mod entities;
pub mod schema;

use schema::{IndexSpec, SchemaOp, MIGRATIONS};

/// `__meta` 树中记录当前 schema 版本的键
const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";
const META_TREE: &str = "__meta";

/// 一个集合的数据树与它的索引树
#[derive(Debug, Clone)]
struct CollectionHandle {
    data: Tree,
    indexes: Vec<(IndexSpec, Tree)>,
}

/// 本地存储 - 命名集合 + 二级索引的持久化 KV 存储
///
/// 实例由 SDK 显式构造并注入 SyncEngine，不使用进程级单例。
#[derive(Debug)]
pub struct LocalStore {
    db: sled::Db,
    collections: HashMap<&'static str, CollectionHandle>,
}

impl LocalStore {
    /// 打开（或创建）本地存储，并应用迁移表到目标版本
    ///
    /// 失败场景：
    /// - 平台无持久化能力 / 路径不可用 → `StorageUnavailable`
    /// - 已存储的 schema 版本高于目标版本（downgrade）→ `StorageUnavailable`
    pub async fn open(path: &Path, version: u32) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| MedibookSDKError::StorageUnavailable(format!("打开本地存储失败: {}", e)))?;

        let meta = db
            .open_tree(META_TREE)
            .map_err(|e| MedibookSDKError::StorageUnavailable(format!("打开元数据树失败: {}", e)))?;

        let stored_version = match meta.get(SCHEMA_VERSION_KEY)? {
            Some(bytes) => {
                let arr: [u8; 4] = bytes.as_ref().try_into().map_err(|_| {
                    MedibookSDKError::StorageUnavailable("schema 版本记录损坏".to_string())
                })?;
                u32::from_be_bytes(arr)
            }
            None => 0,
        };

        if stored_version > version {
            return Err(MedibookSDKError::StorageUnavailable(format!(
                "本地 schema 版本 {} 高于目标版本 {}，拒绝打开（防 downgrade）",
                stored_version, version
            )));
        }

        // 按版本升序应用迁移；每个操作幂等，重复打开同一版本是 no-op
        let mut collections: HashMap<&'static str, CollectionHandle> = HashMap::new();
        for migration in MIGRATIONS.iter().filter(|m| m.version <= version) {
            if migration.version > stored_version {
                info!("应用 schema 迁移: v{}", migration.version);
            }
            for op in migration.ops {
                match op {
                    SchemaOp::CreateCollection { name } => {
                        let data = db.open_tree(name)?;
                        collections.insert(
                            *name,
                            CollectionHandle {
                                data,
                                indexes: Vec::new(),
                            },
                        );
                    }
                    SchemaOp::CreateIndex { collection, index } => {
                        let tree = db.open_tree(index_tree_name(collection, index.name))?;
                        let handle = collections.get_mut(collection).ok_or_else(|| {
                            MedibookSDKError::StorageUnavailable(format!(
                                "迁移表损坏：索引 {} 引用未声明的集合 {}",
                                index.name, collection
                            ))
                        })?;
                        handle.indexes.push((*index, tree));
                    }
                }
            }
        }

        if stored_version < version {
            meta.insert(SCHEMA_VERSION_KEY, &version.to_be_bytes())?;
            meta.flush_async().await?;
        }

        info!(
            "✅ 本地存储已打开: {} 个集合, schema v{} (之前 v{})",
            collections.len(),
            version,
            stored_version
        );

        Ok(Self { db, collections })
    }

    fn handle(&self, collection: &str) -> Result<&CollectionHandle> {
        self.collections
            .get(collection)
            .ok_or_else(|| MedibookSDKError::InvalidInput(format!("未知集合: {}", collection)))
    }

    /// 新增记录；主键已存在时返回 `DuplicateKey`
    pub async fn add(&self, collection: &str, record: &Value) -> Result<String> {
        let handle = self.handle(collection)?;
        let id = record_id(record)?;
        let value_bytes = serde_json::to_vec(record)?;
        let components = index_components(handle, record);

        let trees = transaction_trees(handle);
        trees
            .as_slice()
            .transaction(|txn| {
                let data = &txn[0];
                if data.get(id.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(
                        MedibookSDKError::DuplicateKey(format!("{}/{}", collection, id)),
                    ));
                }
                data.insert(id.as_bytes(), value_bytes.clone())?;
                for (i, component) in components.iter().enumerate() {
                    if let Some(value) = component {
                        txn[i + 1].insert(index_key(value, &id), id.as_bytes())?;
                    }
                }
                Ok(())
            })
            .map_err(MedibookSDKError::from)?;

        debug!("add {}/{}", collection, id);
        Ok(id)
    }

    /// 按主键插入或替换（幂等 upsert），同事务内维护索引
    pub async fn put(&self, collection: &str, record: &Value) -> Result<String> {
        let handle = self.handle(collection)?;
        let id = record_id(record)?;
        let value_bytes = serde_json::to_vec(record)?;
        let components = index_components(handle, record);

        let trees = transaction_trees(handle);
        trees
            .as_slice()
            .transaction(|txn| {
                let data = &txn[0];
                // 替换时先摘除旧记录的索引条目，字段变化才能正确重建
                if let Some(old_bytes) = data.get(id.as_bytes())? {
                    if let Ok(old_record) = serde_json::from_slice::<Value>(&old_bytes) {
                        for (i, (spec, _)) in handle.indexes.iter().enumerate() {
                            if let Some(value) = index_component(&old_record, spec.field) {
                                txn[i + 1].remove(index_key(&value, &id))?;
                            }
                        }
                    }
                }
                data.insert(id.as_bytes(), value_bytes.clone())?;
                for (i, component) in components.iter().enumerate() {
                    if let Some(value) = component {
                        txn[i + 1].insert(index_key(value, &id), id.as_bytes())?;
                    }
                }
                Ok::<_, ConflictableTransactionError<MedibookSDKError>>(())
            })
            .map_err(MedibookSDKError::from)?;

        debug!("put {}/{}", collection, id);
        Ok(id)
    }

    /// 按主键读取
    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let handle = self.handle(collection)?;
        match handle.data.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 全量读取（存储顺序，不保证稳定）
    pub async fn get_all(&self, collection: &str) -> Result<Vec<Value>> {
        let handle = self.handle(collection)?;
        let mut records = Vec::new();
        for entry in handle.data.iter() {
            let (_, bytes) = entry?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }

    /// 按二级索引等值查询
    pub async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &str,
    ) -> Result<Vec<Value>> {
        let handle = self.handle(collection)?;
        let (_, index_tree) = handle
            .indexes
            .iter()
            .find(|(spec, _)| spec.name == index)
            .ok_or_else(|| {
                MedibookSDKError::InvalidInput(format!("集合 {} 没有索引 {}", collection, index))
            })?;

        let mut records = Vec::new();
        let prefix = index_prefix(value);
        for entry in index_tree.scan_prefix(&prefix) {
            let (_, id_bytes) = entry?;
            // clear 之后可能残留孤儿索引条目，数据树中不存在则跳过
            if let Some(bytes) = handle.data.get(&id_bytes)? {
                records.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(records)
    }

    /// 按主键删除；键不存在视为成功的 no-op
    pub async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let handle = self.handle(collection)?;

        let trees = transaction_trees(handle);
        trees
            .as_slice()
            .transaction(|txn| {
                let data = &txn[0];
                let old = match data.get(key.as_bytes())? {
                    Some(bytes) => bytes,
                    None => return Ok(()),
                };
                if let Ok(old_record) = serde_json::from_slice::<Value>(&old) {
                    for (i, (spec, _)) in handle.indexes.iter().enumerate() {
                        if let Some(value) = index_component(&old_record, spec.field) {
                            txn[i + 1].remove(index_key(&value, key))?;
                        }
                    }
                }
                data.remove(key.as_bytes())?;
                Ok::<_, ConflictableTransactionError<MedibookSDKError>>(())
            })
            .map_err(MedibookSDKError::from)?;

        debug!("delete {}/{}", collection, key);
        Ok(())
    }

    /// 清空集合（数据树单步原子清空）
    ///
    /// 索引树随后清空；两步之间崩溃只会残留孤儿索引条目，
    /// 索引查询回表时会跳过它们，不会出现"查到已删除记录"。
    pub async fn clear(&self, collection: &str) -> Result<()> {
        let handle = self.handle(collection)?;
        handle.data.clear()?;
        for (spec, tree) in &handle.indexes {
            if let Err(e) = tree.clear() {
                warn!("清空索引树失败（留待回表跳过）: {}: {}", spec.name, e);
            }
        }
        info!("集合已清空: {}", collection);
        Ok(())
    }

    /// 集合内记录数
    pub async fn count(&self, collection: &str) -> Result<usize> {
        let handle = self.handle(collection)?;
        Ok(handle.data.len())
    }

    /// 将缓冲写刷入磁盘（关闭前调用）
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

fn index_tree_name(collection: &str, index: &str) -> String {
    format!("{}__idx__{}", collection, index)
}

/// 事务参与的树：`[0]` 为数据树，其后按声明顺序为各索引树
fn transaction_trees(handle: &CollectionHandle) -> Vec<&Tree> {
    let mut trees = Vec::with_capacity(1 + handle.indexes.len());
    trees.push(&handle.data);
    for (_, tree) in &handle.indexes {
        trees.push(tree);
    }
    trees
}

/// 提取记录主键（`id` 字段，必须为非空字符串）
fn record_id(record: &Value) -> Result<String> {
    record
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| MedibookSDKError::InvalidInput("记录缺少字符串主键 id".to_string()))
}

/// 提取记录中被索引字段的值（缺失/null 的字段不建索引条目）
fn index_component(record: &Value, field: &str) -> Option<String> {
    match record.get(field) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn index_components(handle: &CollectionHandle, record: &Value) -> Vec<Option<String>> {
    handle
        .indexes
        .iter()
        .map(|(spec, _)| index_component(record, spec.field))
        .collect()
}

/// 复合索引键：`{值}\0{id}`，同值多记录按 id 排布（非唯一索引）
fn index_key(value: &str, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(value.len() + 1 + id.len());
    key.extend_from_slice(value.as_bytes());
    key.push(0);
    key.extend_from_slice(id.as_bytes());
    key
}

fn index_prefix(value: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(value.len() + 1);
    prefix.extend_from_slice(value.as_bytes());
    prefix.push(0);
    prefix
}

#[cfg(test)]
mod tests {
    use super::schema::collections::*;
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> LocalStore {
        LocalStore::open(dir.path(), schema::latest_version())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_basic_crud() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let record = json!({"id": "a_1", "doctor_id": "d_1", "patient_id": "p_1", "status": "booked"});
        store.add(APPOINTMENTS, &record).await.unwrap();

        let loaded = store.get(APPOINTMENTS, "a_1").await.unwrap().unwrap();
        assert_eq!(loaded, record);

        // put 覆盖
        let updated = json!({"id": "a_1", "doctor_id": "d_1", "patient_id": "p_1", "status": "cancelled"});
        store.put(APPOINTMENTS, &updated).await.unwrap();
        let loaded = store.get(APPOINTMENTS, "a_1").await.unwrap().unwrap();
        assert_eq!(loaded["status"], "cancelled");

        store.delete(APPOINTMENTS, "a_1").await.unwrap();
        assert!(store.get(APPOINTMENTS, "a_1").await.unwrap().is_none());

        // 删除不存在的键是成功的 no-op
        store.delete(APPOINTMENTS, "a_1").await.unwrap();
    }

    #[tokio::test]
    async fn test_add_duplicate_key() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let record = json!({"id": "a_1", "status": "booked"});
        store.add(APPOINTMENTS, &record).await.unwrap();

        let err = store.add(APPOINTMENTS, &record).await.unwrap_err();
        assert!(matches!(err, MedibookSDKError::DuplicateKey(_)));

        // put 对同一主键是合法的 upsert
        store.put(APPOINTMENTS, &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_index_lookup_and_reindex() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .put(APPOINTMENTS, &json!({"id": "a_1", "doctor_id": "d_1", "status": "booked"}))
            .await
            .unwrap();
        store
            .put(APPOINTMENTS, &json!({"id": "a_2", "doctor_id": "d_1", "status": "booked"}))
            .await
            .unwrap();
        store
            .put(APPOINTMENTS, &json!({"id": "a_3", "doctor_id": "d_2", "status": "booked"}))
            .await
            .unwrap();

        let by_doctor = store
            .get_all_by_index(APPOINTMENTS, IDX_BY_DOCTOR, "d_1")
            .await
            .unwrap();
        assert_eq!(by_doctor.len(), 2);

        // put 更换索引字段值后，旧索引条目必须被摘除
        store
            .put(APPOINTMENTS, &json!({"id": "a_2", "doctor_id": "d_2", "status": "booked"}))
            .await
            .unwrap();
        let by_doctor = store
            .get_all_by_index(APPOINTMENTS, IDX_BY_DOCTOR, "d_1")
            .await
            .unwrap();
        assert_eq!(by_doctor.len(), 1);
        assert_eq!(by_doctor[0]["id"], "a_1");

        // 前缀不会串值：查 "d" 不应命中 "d_1"
        let none = store
            .get_all_by_index(APPOINTMENTS, IDX_BY_DOCTOR, "d")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_clear_and_orphan_index_entries() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        for i in 0..5 {
            store
                .put(
                    DOCTORS,
                    &json!({"id": format!("d_{}", i), "specialty": "cardiology"}),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.count(DOCTORS).await.unwrap(), 5);

        store.clear(DOCTORS).await.unwrap();
        assert_eq!(store.count(DOCTORS).await.unwrap(), 0);
        assert!(store
            .get_all_by_index(DOCTORS, IDX_BY_SPECIALTY, "cardiology")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_migration_idempotent_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store
                .put(SETTINGS, &json!({"id": "lang", "value": "zh-CN"}))
                .await
                .unwrap();
            store.flush().await.unwrap();
        }
        // 同版本重复打开：迁移为 no-op，数据保留
        let store = open_store(&dir).await;
        let setting = store.get(SETTINGS, "lang").await.unwrap().unwrap();
        assert_eq!(setting["value"], "zh-CN");
    }

    #[tokio::test]
    async fn test_downgrade_refused() {
        let dir = TempDir::new().unwrap();
        {
            let _store = open_store(&dir).await;
        }
        let err = LocalStore::open(dir.path(), 0).await.unwrap_err();
        assert!(matches!(err, MedibookSDKError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let err = store.get_all("nope").await.unwrap_err();
        assert!(matches!(err, MedibookSDKError::InvalidInput(_)));
    }
}
