//! 网络状态监控模块
//!
//! 本模块提供：
//! - 当前在线/离线状态（进程级共享，启动时从平台采样）
//! - 状态变化事件广播（每次切换对每个订阅者恰好投递一次）
//! - 平台监听器抽象（由 Android/iOS/桌面平台层实现）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::Result;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
}

impl NetworkStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, NetworkStatus::Online)
    }
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkStatus::Online => write!(f, "online"),
            NetworkStatus::Offline => write!(f, "offline"),
        }
    }
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    /// 事件发生时间（UTC 毫秒时间戳）
    pub timestamp: i64,
}

/// 网络状态监听器 trait（由平台层实现，如 Android/iOS/浏览器容器）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态（构造时采样用）
    async fn current_status(&self) -> NetworkStatus;

    /// 开始监听平台的状态切换信号
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatus>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 网络监控管理器
///
/// 状态读取是无锁的（AtomicBool）：布尔读视为原子操作，
/// 任何组件都可以随时读取而不需要协调；状态只由监听任务写入。
#[derive(Debug)]
pub struct NetworkMonitor {
    listener: Arc<dyn NetworkStatusListener>,
    online: Arc<AtomicBool>,
    event_sender: broadcast::Sender<NetworkStatusEvent>,
}

impl NetworkMonitor {
    pub fn new(listener: Arc<dyn NetworkStatusListener>) -> Self {
        let (event_sender, _) = broadcast::channel(64);

        Self {
            listener,
            online: Arc::new(AtomicBool::new(false)),
            event_sender,
        }
    }

    /// 启动网络监控
    ///
    /// 1. 从平台采样当前状态作为初始值
    /// 2. 订阅平台切换信号，转发为 NetworkStatusEvent 广播
    pub async fn start(&self) -> Result<()> {
        let initial = self.listener.current_status().await;
        self.online.store(initial.is_online(), Ordering::SeqCst);
        info!("网络监控已启动，初始状态: {}", initial);

        let mut receiver = self.listener.start_monitoring().await?;
        let online = self.online.clone();
        let event_sender = self.event_sender.clone();

        tokio::spawn(async move {
            while let Ok(new_status) = receiver.recv().await {
                let was_online = online.swap(new_status.is_online(), Ordering::SeqCst);
                let old_status = if was_online {
                    NetworkStatus::Online
                } else {
                    NetworkStatus::Offline
                };

                if old_status == new_status {
                    // 平台可能重复上报同一状态，不构成一次切换
                    continue;
                }

                debug!("网络状态切换: {} -> {}", old_status, new_status);
                let _ = event_sender.send(NetworkStatusEvent {
                    old_status,
                    new_status,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                });
            }
        });

        Ok(())
    }

    /// 停止监控（停止平台监听器；已注册的订阅者不再收到新事件）
    pub async fn stop(&self) {
        self.listener.stop_monitoring().await;
    }

    /// 当前是否在线（无锁读取）
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// 获取当前网络状态
    pub fn status(&self) -> NetworkStatus {
        if self.is_online() {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        }
    }

    /// 手动设置网络状态（平台胶水层或测试使用）
    pub fn set_status(&self, new_status: NetworkStatus) {
        let was_online = self.online.swap(new_status.is_online(), Ordering::SeqCst);
        let old_status = if was_online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };

        if old_status == new_status {
            return;
        }

        debug!("网络状态手动切换: {} -> {}", old_status, new_status);
        let _ = self.event_sender.send(NetworkStatusEvent {
            old_status,
            new_status,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.event_sender.subscribe()
    }
}

/// 默认网络状态监听器（假设网络始终在线）
///
/// 实际应用应该由平台层提供真实的网络状态监听实现；
/// 此实现用于桌面/测试环境，状态切换通过 `NetworkMonitor::set_status` 驱动。
#[derive(Debug, Default)]
pub struct DefaultNetworkStatusListener {
    sender: tokio::sync::RwLock<Option<broadcast::Sender<NetworkStatus>>>,
}

#[async_trait]
impl NetworkStatusListener for DefaultNetworkStatusListener {
    async fn current_status(&self) -> NetworkStatus {
        NetworkStatus::Online
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatus>> {
        // 平台无真实信号源，保留发送端但从不发送
        let (sender, receiver) = broadcast::channel(16);
        let mut guard = self.sender.write().await;
        *guard = Some(sender);
        Ok(receiver)
    }

    async fn stop_monitoring(&self) {
        let mut guard = self.sender.write().await;
        *guard = None;
    }
}
