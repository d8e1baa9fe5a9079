//! 同步引擎 - 读写排空三条路径的实现
//!
//! 所有离线优先语义集中在这里：
//! - `fetch_and_cache`：远端优先读取，灌入缓存后与本地合并，失败降级
//! - `save_record`：在线直写远端，离线或失败回退到待同步队列
//! - `drain_pending`：恢复在线后按创建顺序重放待同步写入
//!
//! 排空持有按资源划分的互斥锁，同一资源不会并发排空。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{MedibookSDKError, Result};
use crate::gateway::{ListFilter, RemoteGateway};
use crate::network::NetworkMonitor;
use crate::storage::LocalStore;
use crate::sync::{generate_offline_id, merge_by_identity, DrainReport, Resource, RESOURCES};

/// 同步引擎
pub struct SyncEngine {
    store: Arc<LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    network: Arc<NetworkMonitor>,
    /// 排空锁（按资源名划分，惰性创建）
    drain_locks: Mutex<HashMap<&'static str, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        network: Arc<NetworkMonitor>,
    ) -> Self {
        Self {
            store,
            gateway,
            network,
            drain_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 读路径：远端优先 + 缓存灌入 + 按身份合并
    ///
    /// `index_lookup` 给出本地子集的索引查询条件（索引名 + 值），
    /// `None` 表示取整个集合。任何可达的失败都被降级吸收，
    /// 本方法从不向调用方抛错。
    pub async fn fetch_and_cache(
        &self,
        resource: Resource,
        filter: ListFilter,
        index_lookup: Option<(&str, &str)>,
    ) -> Vec<Value> {
        // 1. 在线时拉取远端并灌入缓存
        let remote = if self.network.is_online() {
            match self.gateway.list(resource.name, &filter).await {
                Ok(records) => {
                    debug!("📥 远端返回 {} 条 {} 记录", records.len(), resource.name);
                    let mut cached = Vec::with_capacity(records.len());
                    for mut record in records {
                        mark_synced(&mut record);
                        // 单条缓存失败只记日志，不影响本次读取结果
                        if let Err(e) = self.store.put(resource.collection, &record).await {
                            warn!("缓存 {} 记录失败（跳过）: {}", resource.name, e);
                        }
                        cached.push(record);
                    }
                    cached
                }
                Err(e) => {
                    warn!("⚠️ 远端列表 {} 失败，降级为仅缓存: {}", resource.name, e);
                    Vec::new()
                }
            }
        } else {
            debug!("当前离线，{} 读取仅走本地缓存", resource.name);
            Vec::new()
        };

        // 2. 读取本地子集（主集合 + 待同步集合）
        let mut local = match self.read_local(resource.collection, index_lookup).await {
            Ok(records) => records,
            Err(e) => {
                error!("❌ 读取本地 {} 缓存失败: {}", resource.collection, e);
                Vec::new()
            }
        };
        if let Some(pending) = resource.pending_collection {
            match self.read_local(pending, index_lookup).await {
                Ok(mut records) => local.append(&mut records),
                Err(e) => error!("❌ 读取待同步集合 {} 失败: {}", pending, e),
            }
        }

        // 3. 合并去重：远端在前，先出现者胜
        merge_by_identity(remote, local)
    }

    async fn read_local(
        &self,
        collection: &str,
        index_lookup: Option<(&str, &str)>,
    ) -> Result<Vec<Value>> {
        match index_lookup {
            Some((index, value)) => self.store.get_all_by_index(collection, index, value).await,
            None => self.store.get_all(collection).await,
        }
    }

    /// 写路径：远端优先，失败回退到待同步队列
    ///
    /// 在线且远端成功时返回服务端回显（已缓存，synced=true）；
    /// 离线或远端失败走同一条回退路径：生成本地 ID 的待同步记录
    /// 写入待同步集合（synced=false），等待下次排空重放。
    pub async fn save_record(&self, resource: Resource, payload: Value) -> Result<Value> {
        if self.network.is_online() {
            match self.gateway.create(resource.name, &payload).await {
                Ok(mut echo) => {
                    mark_synced(&mut echo);
                    // 回显缓存失败不影响写入本身：记录已在远端落地
                    if let Err(e) = self.store.put(resource.collection, &echo).await {
                        warn!("缓存 {} 回显失败: {}", resource.name, e);
                    }
                    info!("✅ {} 已在远端创建并缓存", resource.name);
                    return Ok(echo);
                }
                Err(e) => {
                    warn!("⚠️ 远端创建 {} 失败，回退到待同步队列: {}", resource.name, e);
                }
            }
        } else {
            debug!("当前离线，{} 写入进入待同步队列", resource.name);
        }

        self.save_pending(resource, payload).await
    }

    /// 构造并持久化待同步记录
    async fn save_pending(&self, resource: Resource, payload: Value) -> Result<Value> {
        let pending_collection = resource.pending_collection.ok_or_else(|| {
            MedibookSDKError::InvalidInput(format!("资源 {} 不支持离线写入", resource.name))
        })?;

        let mut record = payload;
        if let Value::Object(map) = &mut record {
            map.insert("id".to_string(), Value::String(generate_offline_id()));
            map.insert("synced".to_string(), Value::Bool(false));
            map.insert(
                "created_at".to_string(),
                Value::from(Utc::now().timestamp_millis()),
            );
        } else {
            return Err(MedibookSDKError::InvalidInput(
                "记录必须是 JSON 对象".to_string(),
            ));
        }

        match self.store.add(pending_collection, &record).await {
            Ok(_) => {
                info!("📦 {} 已进入待同步队列", resource.name);
                Ok(record)
            }
            // 本地 ID 撞车说明生成器出了问题，必须上抛
            Err(e @ MedibookSDKError::DuplicateKey(_)) => Err(e),
            Err(e) => {
                // 本地持久化也失败：记录仅存在于内存中，仍返回给调用方
                error!("❌ 待同步记录持久化失败，仅保留内存副本: {}", e);
                Ok(record)
            }
        }
    }

    /// 排空路径：按创建顺序重放单个资源的待同步写入
    ///
    /// 逐条处理，单条失败不阻塞后续条目；只有远端创建且回显缓存都
    /// 确认后才删除待同步条目（至少一次送达）。从不向调用方抛错。
    pub async fn drain_pending(&self, resource: Resource) -> DrainReport {
        let Some(pending_collection) = resource.pending_collection else {
            return DrainReport::default();
        };

        // 同一资源串行排空
        let lock = self.drain_lock(resource.name).await;
        let _guard = lock.lock().await;

        let mut pending = match self.store.get_all(pending_collection).await {
            Ok(records) => records,
            Err(e) => {
                error!("❌ 读取待同步集合 {} 失败: {}", pending_collection, e);
                return DrainReport::default();
            }
        };
        if pending.is_empty() {
            return DrainReport::default();
        }

        // FIFO：按创建时间升序重放
        pending.sort_by_key(created_at_of);

        let mut report = DrainReport {
            attempted: pending.len(),
            ..DrainReport::default()
        };
        info!("🔄 开始排空 {}：{} 条待同步", resource.name, report.attempted);

        for record in pending {
            let Some(local_id) = record.get("id").and_then(|v| v.as_str()).map(String::from)
            else {
                warn!("待同步记录缺少 id，跳过");
                continue;
            };

            // 1. 去掉本地 ID 与同步簿记字段，由服务端分配身份
            let payload = strip_local_fields(&record);

            // 2. 远端创建；失败则留在队列中等下次排空
            let mut echo = match self.gateway.create(resource.name, &payload).await {
                Ok(echo) => echo,
                Err(e) => {
                    warn!("⚠️ 重放 {} 失败（保留待同步）: {}", local_id, e);
                    continue;
                }
            };

            // 3. 回显写入主集合；未确认缓存前不删队列条目
            mark_synced(&mut echo);
            if let Err(e) = self.store.put(resource.collection, &echo).await {
                error!("❌ 缓存 {} 回显失败（保留待同步）: {}", local_id, e);
                continue;
            }

            // 4. 确认后移除队列条目。此处失败会在下次排空重复投递，
            //    这是至少一次语义的已知窗口
            if let Err(e) = self.store.delete(pending_collection, &local_id).await {
                error!("❌ 移除待同步条目 {} 失败: {}", local_id, e);
                continue;
            }

            debug!("✅ {} 已送达（本地 ID {} 退役）", resource.name, local_id);
            report.delivered += 1;
        }

        report.remaining = report.attempted - report.delivered;
        info!(
            "🔄 排空 {} 完成：尝试 {} / 送达 {} / 剩余 {}",
            resource.name, report.attempted, report.delivered, report.remaining
        );
        report
    }

    /// 排空全部带待同步集合的资源（重连任务的入口）
    pub async fn drain_all_pending(&self) -> DrainReport {
        let mut total = DrainReport::default();
        for resource in RESOURCES {
            if resource.pending_collection.is_some() {
                let report = self.drain_pending(*resource).await;
                total.merge(&report);
            }
        }
        total
    }

    async fn drain_lock(&self, resource_name: &'static str) -> Arc<Mutex<()>> {
        let mut locks = self.drain_locks.lock().await;
        locks
            .entry(resource_name)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// 标记记录为已同步；缺失的 created_at 补上当前时间
fn mark_synced(record: &mut Value) {
    if let Value::Object(map) = record {
        map.insert("synced".to_string(), Value::Bool(true));
        if !map.contains_key("created_at") {
            map.insert(
                "created_at".to_string(),
                Value::from(Utc::now().timestamp_millis()),
            );
        }
    }
}

/// 去掉本地身份与同步簿记字段，得到发往远端的载荷
fn strip_local_fields(record: &Value) -> Value {
    let mut payload = record.clone();
    if let Value::Object(map) = &mut payload {
        map.remove("id");
        map.remove("synced");
        map.remove("created_at");
    }
    payload
}

fn created_at_of(record: &Value) -> i64 {
    record
        .get("created_at")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ListFilter;
    use crate::network::{DefaultNetworkStatusListener, NetworkStatus};
    use crate::storage::schema;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tempfile::TempDir;

    /// 可编程的远端桩
    #[derive(Default)]
    struct MockGateway {
        /// list 的响应（None 表示返回网络错误）
        list_response: std::sync::Mutex<Option<Vec<Value>>>,
        /// create 时记录的载荷
        created: std::sync::Mutex<Vec<Value>>,
        next_id: AtomicU64,
        fail_all_creates: AtomicBool,
        /// title 命中则该条 create 失败（模拟部分失败）
        fail_titles: std::sync::Mutex<HashSet<String>>,
    }

    impl MockGateway {
        fn with_list(records: Vec<Value>) -> Self {
            let gateway = Self::default();
            *gateway.list_response.lock().unwrap() = Some(records);
            gateway
        }

        fn created_payloads(&self) -> Vec<Value> {
            self.created.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteGateway for MockGateway {
        async fn create(&self, _resource: &str, payload: &Value) -> Result<Value> {
            if self.fail_all_creates.load(Ordering::SeqCst) {
                return Err(MedibookSDKError::NetworkUnavailable("桩故障".to_string()));
            }
            if let Some(title) = payload.get("title").and_then(|v| v.as_str()) {
                if self.fail_titles.lock().unwrap().contains(title) {
                    return Err(MedibookSDKError::NetworkUnavailable(
                        "桩定向故障".to_string(),
                    ));
                }
            }
            let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let mut echo = payload.clone();
            echo["id"] = json!(format!("srv_{}", seq));
            self.created.lock().unwrap().push(payload.clone());
            Ok(echo)
        }

        async fn list(&self, _resource: &str, _filter: &ListFilter) -> Result<Vec<Value>> {
            match self.list_response.lock().unwrap().clone() {
                Some(records) => Ok(records),
                None => Err(MedibookSDKError::NetworkUnavailable("桩故障".to_string())),
            }
        }
    }

    async fn build_engine(
        gateway: MockGateway,
    ) -> (SyncEngine, Arc<MockGateway>, Arc<NetworkMonitor>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            LocalStore::open(dir.path(), schema::latest_version())
                .await
                .unwrap(),
        );
        let network = Arc::new(NetworkMonitor::new(Arc::new(
            DefaultNetworkStatusListener::default(),
        )));
        let gateway = Arc::new(gateway);
        let engine = SyncEngine::new(store, gateway.clone(), network.clone());
        (engine, gateway, network, dir)
    }

    fn appointment(title: &str) -> Value {
        json!({
            "title": title,
            "doctor_id": "doc_1",
            "patient_id": "pat_1",
            "date": "2026-09-01",
        })
    }

    #[tokio::test]
    async fn test_offline_save_then_drain() {
        // 场景 A：离线写入进队列，恢复在线后排空
        let (engine, _gateway, network, _dir) = build_engine(MockGateway::default()).await;
        assert!(!network.is_online());

        let saved = engine
            .save_record(super::super::APPOINTMENTS, appointment("复诊"))
            .await
            .unwrap();
        let local_id = saved["id"].as_str().unwrap().to_string();
        assert!(crate::sync::is_offline_id(&local_id));
        assert_eq!(saved["synced"], false);
        assert!(saved["created_at"].as_i64().unwrap() > 0);
        assert_eq!(
            engine
                .store
                .count(schema::collections::PENDING_APPOINTMENTS)
                .await
                .unwrap(),
            1
        );

        network.set_status(NetworkStatus::Online);
        let report = engine.drain_pending(super::super::APPOINTMENTS).await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 0);

        // 队列清空，主集合持有服务端身份的已同步记录
        assert_eq!(
            engine
                .store
                .count(schema::collections::PENDING_APPOINTMENTS)
                .await
                .unwrap(),
            0
        );
        let cached = engine
            .store
            .get(schema::collections::APPOINTMENTS, "srv_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached["synced"], true);
        assert_eq!(cached["title"], "复诊");
    }

    #[tokio::test]
    async fn test_drain_strips_local_identity() {
        let (engine, gateway, network, _dir) = build_engine(MockGateway::default()).await;
        engine
            .save_record(super::super::APPOINTMENTS, appointment("初诊"))
            .await
            .unwrap();
        network.set_status(NetworkStatus::Online);
        engine.drain_pending(super::super::APPOINTMENTS).await;

        // 发往远端的载荷不含本地 ID 与同步簿记字段
        let payloads = gateway.created_payloads();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].get("id").is_none());
        assert!(payloads[0].get("synced").is_none());
        assert!(payloads[0].get("created_at").is_none());
        assert_eq!(payloads[0]["title"], "初诊");
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_like_offline() {
        // 在线但远端故障：回退形态与离线写入完全一致
        let gateway = MockGateway::default();
        gateway.fail_all_creates.store(true, Ordering::SeqCst);
        let (engine, _gateway, network, _dir) = build_engine(gateway).await;
        network.set_status(NetworkStatus::Online);

        let saved = engine
            .save_record(super::super::APPOINTMENTS, appointment("体检"))
            .await
            .unwrap();
        assert!(crate::sync::is_offline_id(saved["id"].as_str().unwrap()));
        assert_eq!(saved["synced"], false);
        assert!(saved["created_at"].as_i64().unwrap() > 0);
        assert_eq!(
            engine
                .store
                .count(schema::collections::PENDING_APPOINTMENTS)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_fetch_merges_remote_over_cache() {
        // 场景 B：远端与缓存重叠时远端胜出，仅本地的记录保留
        let remote = vec![
            json!({"id": "1", "title": "复诊", "doctor_id": "doc_1", "patient_id": "pat_1", "date": "2026-09-01"}),
            json!({"id": "2", "title": "初诊（远端版）", "doctor_id": "doc_1", "patient_id": "pat_1", "date": "2026-09-02"}),
        ];
        let (engine, _gateway, network, _dir) = build_engine(MockGateway::with_list(remote)).await;
        network.set_status(NetworkStatus::Online);

        for record in [
            json!({"id": "2", "title": "初诊（本地版）", "doctor_id": "doc_1", "patient_id": "pat_1", "date": "2026-09-02", "synced": true}),
            json!({"id": "3", "title": "体检", "doctor_id": "doc_2", "patient_id": "pat_1", "date": "2026-09-03", "synced": true}),
        ] {
            engine
                .store
                .put(schema::collections::APPOINTMENTS, &record)
                .await
                .unwrap();
        }

        let merged = engine
            .fetch_and_cache(super::super::APPOINTMENTS, ListFilter::new(), None)
            .await;
        assert_eq!(merged.len(), 3);
        let by_id = |id: &str| merged.iter().find(|r| r["id"] == id).unwrap().clone();
        assert_eq!(by_id("2")["title"], "初诊（远端版）");
        assert_eq!(by_id("3")["title"], "体检");

        // 远端记录已灌入缓存并标记已同步
        let cached = engine
            .store
            .get(schema::collections::APPOINTMENTS, "1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached["synced"], true);
    }

    #[tokio::test]
    async fn test_fetch_degrades_to_cache_on_remote_failure() {
        // 场景 C：在线但远端故障，读取完整降级到缓存
        let (engine, _gateway, network, _dir) = build_engine(MockGateway::default()).await;
        network.set_status(NetworkStatus::Online);

        let record = json!({"id": "1", "title": "复诊", "doctor_id": "doc_1", "patient_id": "pat_1", "date": "2026-09-01", "synced": true});
        engine
            .store
            .put(schema::collections::APPOINTMENTS, &record)
            .await
            .unwrap();

        let merged = engine
            .fetch_and_cache(super::super::APPOINTMENTS, ListFilter::new(), None)
            .await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["id"], "1");
    }

    #[tokio::test]
    async fn test_fetch_includes_pending_when_offline() {
        // 离线读取合并主集合与待同步集合
        let (engine, _gateway, _network, _dir) = build_engine(MockGateway::default()).await;
        let cached = json!({"id": "1", "title": "复诊", "doctor_id": "doc_1", "patient_id": "pat_1", "date": "2026-09-01", "synced": true});
        engine
            .store
            .put(schema::collections::APPOINTMENTS, &cached)
            .await
            .unwrap();
        engine
            .save_record(super::super::APPOINTMENTS, appointment("离线新增"))
            .await
            .unwrap();

        let merged = engine
            .fetch_and_cache(super::super::APPOINTMENTS, ListFilter::new(), None)
            .await;
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|r| r["title"] == "离线新增"));
    }

    #[tokio::test]
    async fn test_drain_isolates_per_item_failure() {
        // 单条失败不阻塞其余条目，失败条留队重试
        let gateway = MockGateway::default();
        gateway
            .fail_titles
            .lock()
            .unwrap()
            .insert("坏记录".to_string());
        let (engine, _gateway, network, _dir) = build_engine(gateway).await;

        for title in ["甲", "坏记录", "乙"] {
            engine
                .save_record(super::super::APPOINTMENTS, appointment(title))
                .await
                .unwrap();
            // created_at 毫秒粒度，保证 FIFO 顺序可判定
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        network.set_status(NetworkStatus::Online);
        let report = engine.drain_pending(super::super::APPOINTMENTS).await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.remaining, 1);

        let leftover = engine
            .store
            .get_all(schema::collections::PENDING_APPOINTMENTS)
            .await
            .unwrap();
        assert_eq!(leftover.len(), 1);
        assert_eq!(leftover[0]["title"], "坏记录");
        assert_eq!(
            engine
                .store
                .count(schema::collections::APPOINTMENTS)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_drain_replays_in_creation_order() {
        let (engine, gateway, network, _dir) = build_engine(MockGateway::default()).await;

        for title in ["第一", "第二", "第三"] {
            engine
                .save_record(super::super::APPOINTMENTS, appointment(title))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        network.set_status(NetworkStatus::Online);
        engine.drain_pending(super::super::APPOINTMENTS).await;

        // 重放顺序与创建顺序一致
        let titles: Vec<String> = gateway
            .created_payloads()
            .iter()
            .map(|p| p["title"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["第一", "第二", "第三"]);
    }

    #[tokio::test]
    async fn test_drain_empty_queue_is_noop() {
        let (engine, _gateway, network, _dir) = build_engine(MockGateway::default()).await;
        network.set_status(NetworkStatus::Online);
        let report = engine.drain_pending(super::super::APPOINTMENTS).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_drain_skips_resources_without_queue() {
        let (engine, _gateway, network, _dir) = build_engine(MockGateway::default()).await;
        network.set_status(NetworkStatus::Online);
        let report = engine.drain_pending(super::super::DOCTORS).await;
        assert_eq!(report.attempted, 0);
    }
}
