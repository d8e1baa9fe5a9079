//! Medibook SDK 主入口
//!
//! 分层初始化顺序：
//! 1. 本地存储 → 2. 网络监控 → 3. 同步引擎 → 4. 重连排空任务
//!
//! 对外只暴露领域操作（预约、医生目录、资料、设置），离线优先语义
//! 全部封装在内部：调用方不需要也不应该感知缓存与队列的存在。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{MedibookSDKError, Result};
use crate::gateway::{HttpClientConfig, HttpGateway, ListFilter, RemoteGateway};
use crate::network::{DefaultNetworkStatusListener, NetworkMonitor, NetworkStatusListener};
use crate::storage::entities::{Appointment, AppointmentInput, Doctor, OwnerType, UserProfile};
use crate::storage::schema::{self, collections};
use crate::storage::LocalStore;
use crate::sync::{self, DrainReport, SyncEngine};

/// 本地存储在数据目录下的子目录名
const STORE_DIR_NAME: &str = "medibook_store";

/// 用户资料集合的固定主键（单记录集合）
const PROFILE_KEY: &str = "current";

/// Medibook SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedibookConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 远端服务 API 基础 URL，例如：https://api.medibook.example
    pub api_base_url: String,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 本地存储模式版本（通常保持默认，跟随 SDK 内置迁移表）
    pub store_version: u32,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for MedibookConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./medibook_data"),
            api_base_url: "http://localhost:3000".to_string(),
            http_client_config: HttpClientConfig::default(),
            store_version: schema::latest_version(),
            debug_mode: false,
        }
    }
}

impl MedibookConfig {
    pub fn builder() -> MedibookConfigBuilder {
        MedibookConfigBuilder::new()
    }
}

/// Medibook SDK 配置构建器
pub struct MedibookConfigBuilder {
    config: MedibookConfig,
}

impl MedibookConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MedibookConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn store_version(mut self, version: u32) -> Self {
        self.config.store_version = version;
        self
    }

    pub fn debug_mode(mut self, debug: bool) -> Self {
        self.config.debug_mode = debug;
        self
    }

    pub fn build(self) -> MedibookConfig {
        self.config
    }
}

impl Default for MedibookConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Medibook SDK 主结构
pub struct MedibookSDK {
    config: MedibookConfig,
    /// 本地存储；打开失败时为 None，SDK 降级为仅远端模式
    store: Option<Arc<LocalStore>>,
    gateway: Arc<dyn RemoteGateway>,
    network: Arc<NetworkMonitor>,
    /// 同步引擎；仅在本地存储可用时存在
    engine: Option<Arc<SyncEngine>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    /// 关闭标志；shutdown 之后的写操作被拒绝
    closed: AtomicBool,
}

impl MedibookSDK {
    /// 异步初始化 SDK（推荐方式）
    ///
    /// 使用 HTTP 网关与默认网络监听器（假设始终在线）。
    /// 实际应用应该通过 `initialize_with` 注入平台提供的网络状态监听实现。
    pub async fn initialize(config: MedibookConfig) -> Result<Arc<Self>> {
        let gateway: Arc<dyn RemoteGateway> = Arc::new(HttpGateway::new(
            &config.http_client_config,
            config.api_base_url.clone(),
        )?);
        let listener = Arc::new(DefaultNetworkStatusListener::default());
        Self::initialize_with(config, gateway, listener).await
    }

    /// 以注入的网关与网络监听器初始化（平台集成与测试入口）
    pub async fn initialize_with(
        config: MedibookConfig,
        gateway: Arc<dyn RemoteGateway>,
        listener: Arc<dyn NetworkStatusListener>,
    ) -> Result<Arc<Self>> {
        info!("正在初始化 MedibookSDK...");
        Self::validate_config(&config)?;

        // === 第1层：本地存储 ===
        // 打开失败不是致命错误：降级为仅远端模式，离线能力不可用
        let store_path = config.data_dir.join(STORE_DIR_NAME);
        let store = match LocalStore::open(&store_path, config.store_version).await {
            Ok(store) => {
                info!("✅ 本地存储已就绪: {}", store_path.display());
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!("⚠️ 本地存储不可用，降级为仅远端模式: {}", e);
                None
            }
        };

        // === 第2层：网络监控 ===
        let network = Arc::new(NetworkMonitor::new(listener));
        network.start().await?;

        // === 第3层：同步引擎 ===
        let engine = store
            .clone()
            .map(|store| Arc::new(SyncEngine::new(store, gateway.clone(), network.clone())));

        let sdk = Arc::new(Self {
            config,
            store,
            gateway,
            network,
            engine,
            reconnect_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        // === 第4层：重连排空任务 ===
        if let Some(engine) = sdk.engine.clone() {
            let mut receiver = sdk.network.subscribe();
            let handle = tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if event.new_status.is_online() {
                                info!("📶 网络恢复，触发待同步排空");
                                let report = engine.drain_all_pending().await;
                                if report.attempted > 0 {
                                    info!(
                                        "📶 重连排空完成：送达 {} / 剩余 {}",
                                        report.delivered, report.remaining
                                    );
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("网络事件滞后 {} 条，继续监听", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            *sdk.reconnect_task.lock().await = Some(handle);
        }

        info!("✅ MedibookSDK 初始化完成");
        Ok(sdk)
    }

    fn validate_config(config: &MedibookConfig) -> Result<()> {
        if config.api_base_url.is_empty() {
            return Err(MedibookSDKError::Config("api_base_url 不能为空".to_string()));
        }
        if !config.api_base_url.starts_with("http://") && !config.api_base_url.starts_with("https://")
        {
            return Err(MedibookSDKError::Config(format!(
                "api_base_url 必须是 http(s) URL: {}",
                config.api_base_url
            )));
        }
        if config.store_version == 0 || config.store_version > schema::latest_version() {
            return Err(MedibookSDKError::Config(format!(
                "store_version 超出迁移表范围: {}",
                config.store_version
            )));
        }
        Ok(())
    }

    /// 当前网络是否在线
    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// 本地存储是否可用（false 表示降级为仅远端模式）
    pub fn is_storage_supported(&self) -> bool {
        self.store.is_some()
    }

    /// 网络监控句柄（平台层据此上报网络状态变化）
    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    pub fn config(&self) -> &MedibookConfig {
        &self.config
    }

    /// SDK 版本号
    pub fn version() -> &'static str {
        crate::version::SDK_VERSION
    }

    /// 保存预约
    ///
    /// 在线时直写远端并缓存回显；离线或远端失败时进入待同步队列，
    /// 返回带本地 ID 的记录（synced=false），恢复在线后自动重放。
    pub async fn save_appointment(&self, input: AppointmentInput) -> Result<Appointment> {
        self.ensure_open()?;
        Self::validate_appointment(&input)?;
        let payload = serde_json::to_value(&input)?;

        match &self.engine {
            Some(engine) => {
                let saved = engine.save_record(sync::APPOINTMENTS, payload).await?;
                Appointment::from_value(saved)
            }
            None => {
                // 仅远端模式：离线写入无处暂存
                if !self.network.is_online() {
                    return Err(MedibookSDKError::StorageUnavailable(
                        "离线且本地存储不可用，无法保存预约".to_string(),
                    ));
                }
                let mut echo = self
                    .gateway
                    .create(sync::APPOINTMENTS.name, &payload)
                    .await?;
                if let serde_json::Value::Object(map) = &mut echo {
                    map.entry("synced").or_insert(json!(true));
                    map.entry("created_at")
                        .or_insert(json!(Utc::now().timestamp_millis()));
                }
                Appointment::from_value(echo)
            }
        }
    }

    fn validate_appointment(input: &AppointmentInput) -> Result<()> {
        for (field, value) in [
            ("title", &input.title),
            ("doctor_id", &input.doctor_id),
            ("patient_id", &input.patient_id),
            ("date", &input.date),
        ] {
            if value.trim().is_empty() {
                return Err(MedibookSDKError::InvalidInput(format!(
                    "预约字段 {} 不能为空",
                    field
                )));
            }
        }
        Ok(())
    }

    /// 列出某个用户（患者或医生）的预约
    ///
    /// 远端优先、缓存合并；任何失败都降级吸收，本方法从不抛错。
    pub async fn list_appointments(&self, owner_id: &str, owner_type: OwnerType) -> Vec<Appointment> {
        let filter = ListFilter::new().with(format!("{}_id", owner_type.as_str()), owner_id);

        let records = match &self.engine {
            Some(engine) => {
                engine
                    .fetch_and_cache(
                        sync::APPOINTMENTS,
                        filter,
                        Some((owner_type.index_name(), owner_id)),
                    )
                    .await
            }
            None => self.list_remote_only(sync::APPOINTMENTS.name, filter).await,
        };

        records
            .into_iter()
            .filter_map(|record| match Appointment::from_value(record) {
                Ok(appointment) => Some(appointment),
                Err(e) => {
                    warn!("跳过无法解析的预约记录: {}", e);
                    None
                }
            })
            .collect()
    }

    /// 列出医生目录，可按科室过滤
    pub async fn list_doctors(&self, specialty: Option<&str>) -> Vec<Doctor> {
        let mut filter = ListFilter::new();
        if let Some(specialty) = specialty {
            filter = filter.with("specialty", specialty);
        }

        let records = match &self.engine {
            Some(engine) => {
                let index_lookup = specialty.map(|s| (collections::IDX_BY_SPECIALTY, s));
                engine
                    .fetch_and_cache(sync::DOCTORS, filter, index_lookup)
                    .await
            }
            None => self.list_remote_only(sync::DOCTORS.name, filter).await,
        };

        records
            .into_iter()
            .filter_map(|record| match Doctor::from_value(record) {
                Ok(doctor) => Some(doctor),
                Err(e) => {
                    warn!("跳过无法解析的医生记录: {}", e);
                    None
                }
            })
            .collect()
    }

    /// 降级模式下的直连远端读取；离线或失败时返回空
    async fn list_remote_only(&self, resource: &str, filter: ListFilter) -> Vec<serde_json::Value> {
        if !self.network.is_online() {
            return Vec::new();
        }
        match self.gateway.list(resource, &filter).await {
            Ok(records) => records,
            Err(e) => {
                warn!("⚠️ 远端列表 {} 失败（无缓存可降级）: {}", resource, e);
                Vec::new()
            }
        }
    }

    /// 保存用户资料（仅本地，单记录集合）
    pub async fn save_profile(&self, mut profile: UserProfile) -> Result<UserProfile> {
        self.ensure_open()?;
        let store = self.require_store()?;
        profile.id = PROFILE_KEY.to_string();
        profile.updated_at = Utc::now().timestamp_millis();
        store
            .put(collections::USER_PROFILE, &serde_json::to_value(&profile)?)
            .await?;
        Ok(profile)
    }

    /// 读取用户资料
    pub async fn get_profile(&self) -> Result<Option<UserProfile>> {
        let store = self.require_store()?;
        match store.get(collections::USER_PROFILE, PROFILE_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// 写入一条本地设置（键值对，仅本地）
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        if key.trim().is_empty() {
            return Err(MedibookSDKError::InvalidInput("设置键不能为空".to_string()));
        }
        let store = self.require_store()?;
        store
            .put(collections::SETTINGS, &json!({ "id": key, "value": value }))
            .await?;
        Ok(())
    }

    /// 读取一条本地设置
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let store = self.require_store()?;
        let record = store.get(collections::SETTINGS, key).await?;
        Ok(record
            .and_then(|r| r.get("value").and_then(|v| v.as_str()).map(String::from)))
    }

    /// 手动触发一次待同步排空（正常情况由重连任务自动触发）
    pub async fn drain_pending(&self) -> DrainReport {
        match &self.engine {
            Some(engine) => engine.drain_all_pending().await,
            None => DrainReport::default(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MedibookSDKError::NotInitialized(
                "SDK 已关闭，拒绝新的写操作".to_string(),
            ));
        }
        Ok(())
    }

    fn require_store(&self) -> Result<&Arc<LocalStore>> {
        self.store.as_ref().ok_or_else(|| {
            MedibookSDKError::StorageUnavailable("本地存储不可用".to_string())
        })
    }

    /// 异步关闭 SDK
    pub async fn shutdown(&self) -> Result<()> {
        info!("正在关闭 MedibookSDK...");

        // 设置关闭标志，之后的写操作被拒绝
        self.closed.store(true, Ordering::SeqCst);

        // 1. 停止重连排空任务
        if let Some(handle) = self.reconnect_task.lock().await.take() {
            handle.abort();
        }

        // 2. 停止网络监控
        self.network.stop().await;

        // 3. 落盘本地存储
        if let Some(store) = &self.store {
            store.flush().await?;
        }

        info!("MedibookSDK 关闭完成");
        Ok(())
    }
}
