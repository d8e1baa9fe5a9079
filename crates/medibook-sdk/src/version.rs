//! SDK 版本与运行时元信息
//!
//! 设计原则：
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Schema Version** → `storage::schema` 的迁移表（表即版本）

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 当前 SDK 支持的最高本地 schema 版本（见 `storage::schema::MIGRATIONS`）。
/// 启动时校验：若本地 schema 版本 > 此值则拒绝打开（防 downgrade 导致不兼容）。
pub const SDK_SCHEMA_VERSION: u32 = crate::storage::schema::latest_version();
