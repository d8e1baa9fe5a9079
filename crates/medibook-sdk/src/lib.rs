//! Medibook SDK - 离线优先的医疗预约 SDK
//!
//! 本 SDK 提供完整的离线优先数据同步能力，包括：
//! - 📦 本地持久化缓存：预约、医生目录、用户资料、本地设置
//! - 📡 网络状态监控：平台可注入监听器，状态变化广播通知
//! - 🔄 离线写入队列：离线创建的预约自动排队，恢复在线后重放
//! - 📥 远端优先读取：远端结果灌入缓存，与本地按身份合并去重
//! - 🛟 优雅降级：远端失败降级到缓存，存储失败降级为仅远端模式
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use medibook_sdk::{MedibookSDK, MedibookConfig, AppointmentInput, OwnerType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 配置 SDK
//!     let config = MedibookConfig::builder()
//!         .data_dir("/path/to/data")
//!         .api_base_url("https://api.medibook.example")
//!         .build();
//!
//!     // 初始化 SDK
//!     let sdk = MedibookSDK::initialize(config).await?;
//!
//!     // 保存预约（离线时自动进入待同步队列）
//!     let appointment = sdk
//!         .save_appointment(AppointmentInput {
//!             title: "年度体检".to_string(),
//!             doctor_id: "doc_42".to_string(),
//!             patient_id: "pat_7".to_string(),
//!             date: "2026-09-15".to_string(),
//!             time: Some("09:30".to_string()),
//!             notes: None,
//!         })
//!         .await?;
//!     println!("预约已保存: {} (synced={})", appointment.id, appointment.synced);
//!
//!     // 列出该患者的全部预约（远端 + 本地合并）
//!     let appointments = sdk.list_appointments("pat_7", OwnerType::Patient).await;
//!     println!("共 {} 条预约", appointments.len());
//!
//!     // 关闭 SDK
//!     sdk.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod gateway;
pub mod network;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod version;

// 重新导出核心类型，方便使用
pub use error::{MedibookSDKError, Result};
pub use gateway::{HttpClientConfig, HttpGateway, ListFilter, RemoteGateway};
pub use network::{
    DefaultNetworkStatusListener, NetworkMonitor, NetworkStatus, NetworkStatusEvent,
    NetworkStatusListener,
};
pub use sdk::{MedibookConfig, MedibookConfigBuilder, MedibookSDK};
pub use storage::entities::{Appointment, AppointmentInput, Doctor, OwnerType, UserProfile};
pub use storage::LocalStore;
pub use sync::{DrainReport, SyncEngine};
pub use version::{SDK_SCHEMA_VERSION, SDK_VERSION};
