//! 本地存储 schema - 显式的版本化迁移表
//!
//! 设计原则：
//! - schema 不是打开时隐式创建的，而是 `版本 -> 操作列表` 的显式迁移表
//! - 每个操作幂等（打开已存在的树是 no-op），按版本升序应用
//! - 已应用的 schema 版本持久化在 `__meta` 树中，防止 downgrade

/// 集合与索引名常量
pub mod collections {
    /// 主资源集合：预约
    pub const APPOINTMENTS: &str = "appointments";
    /// 离线待同步写入队列
    pub const PENDING_APPOINTMENTS: &str = "pending_appointments";
    /// 目录资源集合：医生
    pub const DOCTORS: &str = "doctors";
    /// 用户资料（单记录集合）
    pub const USER_PROFILE: &str = "user_profile";
    /// 本地设置
    pub const SETTINGS: &str = "settings";

    /// 预约按医生索引
    pub const IDX_BY_DOCTOR: &str = "by_doctor";
    /// 预约按患者索引
    pub const IDX_BY_PATIENT: &str = "by_patient";
    /// 预约按状态索引
    pub const IDX_BY_STATUS: &str = "by_status";
    /// 医生按专科索引
    pub const IDX_BY_SPECIALTY: &str = "by_specialty";
}

/// 二级索引声明（非唯一，按记录字段建立）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    /// 索引名
    pub name: &'static str,
    /// 被索引的记录字段
    pub field: &'static str,
}

/// 一次 schema 迁移中的单个操作
#[derive(Debug, Clone, Copy)]
pub enum SchemaOp {
    /// 创建集合（已存在则 no-op）
    CreateCollection { name: &'static str },
    /// 为集合创建二级索引（已存在则 no-op）
    CreateIndex {
        collection: &'static str,
        index: IndexSpec,
    },
}

/// 一个 schema 版本对应的操作列表
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub ops: &'static [SchemaOp],
}

use collections::*;

/// 迁移表（按版本升序）
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    ops: &[
        SchemaOp::CreateCollection { name: APPOINTMENTS },
        SchemaOp::CreateCollection {
            name: PENDING_APPOINTMENTS,
        },
        SchemaOp::CreateCollection { name: DOCTORS },
        SchemaOp::CreateCollection { name: USER_PROFILE },
        SchemaOp::CreateCollection { name: SETTINGS },
        SchemaOp::CreateIndex {
            collection: APPOINTMENTS,
            index: IndexSpec {
                name: IDX_BY_DOCTOR,
                field: "doctor_id",
            },
        },
        SchemaOp::CreateIndex {
            collection: APPOINTMENTS,
            index: IndexSpec {
                name: IDX_BY_PATIENT,
                field: "patient_id",
            },
        },
        SchemaOp::CreateIndex {
            collection: APPOINTMENTS,
            index: IndexSpec {
                name: IDX_BY_STATUS,
                field: "status",
            },
        },
        // 待同步集合与主集合同构建索引，读路径才能用同一查询覆盖两者
        SchemaOp::CreateIndex {
            collection: PENDING_APPOINTMENTS,
            index: IndexSpec {
                name: IDX_BY_DOCTOR,
                field: "doctor_id",
            },
        },
        SchemaOp::CreateIndex {
            collection: PENDING_APPOINTMENTS,
            index: IndexSpec {
                name: IDX_BY_PATIENT,
                field: "patient_id",
            },
        },
        SchemaOp::CreateIndex {
            collection: DOCTORS,
            index: IndexSpec {
                name: IDX_BY_SPECIALTY,
                field: "specialty",
            },
        },
    ],
}];

/// 迁移表中的最高版本（编译期求值）
pub const fn latest_version() -> u32 {
    let mut max = 0u32;
    let mut i = 0usize;
    while i < MIGRATIONS.len() {
        if MIGRATIONS[i].version > max {
            max = MIGRATIONS[i].version;
        }
        i += 1;
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_version_matches_table() {
        assert_eq!(latest_version(), 1);
    }

    #[test]
    fn test_migrations_sorted_ascending() {
        let mut prev = 0u32;
        for migration in MIGRATIONS {
            assert!(migration.version > prev, "迁移表必须按版本严格升序");
            prev = migration.version;
        }
    }

    #[test]
    fn test_index_targets_declared_collections() {
        for migration in MIGRATIONS {
            for op in migration.ops {
                if let SchemaOp::CreateIndex { collection, .. } = op {
                    let declared = MIGRATIONS.iter().flat_map(|m| m.ops.iter()).any(|op| {
                        matches!(op, SchemaOp::CreateCollection { name } if name == collection)
                    });
                    assert!(declared, "索引引用了未声明的集合: {}", collection);
                }
            }
        }
    }
}
