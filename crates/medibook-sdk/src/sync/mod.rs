//! 同步模块 - 离线优先同步引擎
//!
//! 职责：
//! - 读路径：远端优先 + 缓存灌入 + 按身份合并去重，失败降级为仅缓存
//! - 写路径：远端优先 + 本地待同步队列回退（离线与失败走同一条路）
//! - 排空路径：恢复在线后按创建时间重放待同步写入，至少一次送达

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::schema::collections;

pub mod engine;
pub mod merge;

pub use engine::SyncEngine;
pub use merge::merge_by_identity;

/// 可同步资源的静态描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resource {
    /// 远端资源路径段（`POST /api/{name}`）
    pub name: &'static str,
    /// 本地主集合
    pub collection: &'static str,
    /// 离线写入的待同步集合（目录类只读资源没有）
    pub pending_collection: Option<&'static str>,
}

/// 预约：主资源，支持离线创建与排空
pub const APPOINTMENTS: Resource = Resource {
    name: "appointments",
    collection: collections::APPOINTMENTS,
    pending_collection: Some(collections::PENDING_APPOINTMENTS),
};

/// 医生目录：远端权威，本地仅缓存
pub const DOCTORS: Resource = Resource {
    name: "doctors",
    collection: collections::DOCTORS,
    pending_collection: None,
};

/// 全部已声明资源（排空任务按声明顺序处理）
pub const RESOURCES: &[Resource] = &[APPOINTMENTS, DOCTORS];

/// 离线记录本地 ID 前缀
///
/// 本地 ID 必须永不与服务端分配的 ID 冲突：前缀命名空间 + 高精度时间戳
/// + 随机后缀。排空成功后本地 ID 被服务端 ID 取代。
pub const OFFLINE_ID_PREFIX: &str = "offline_";

/// 生成离线记录的本地 ID
pub fn generate_offline_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}_{}",
        OFFLINE_ID_PREFIX,
        Utc::now().timestamp_millis(),
        &uuid[..8]
    )
}

/// 判断一个 ID 是否是离线本地 ID
pub fn is_offline_id(id: &str) -> bool {
    id.starts_with(OFFLINE_ID_PREFIX)
}

/// 一次排空的结果报告
///
/// 排空本身从不向调用方抛错；报告仅供观测，调用方可忽略。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DrainReport {
    /// 本次尝试重放的条数
    pub attempted: usize,
    /// 成功送达并从待同步集合移除的条数
    pub delivered: usize,
    /// 仍留在待同步集合中的条数（下次排空重试）
    pub remaining: usize,
}

impl DrainReport {
    pub fn merge(&mut self, other: &DrainReport) {
        self.attempted += other.attempted;
        self.delivered += other.delivered;
        self.remaining += other.remaining;
    }
}
