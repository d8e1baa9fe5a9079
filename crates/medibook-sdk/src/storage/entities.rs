//! 数据实体定义 - 类型安全的领域记录
//!
//! 引擎内部以 `serde_json::Value`（主键 `id` + 同步字段 `synced`/`created_at`）
//! 流转，门面层在边界上转回这些类型。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MedibookSDKError, Result};
use crate::storage::schema::collections::{IDX_BY_DOCTOR, IDX_BY_PATIENT};

/// 预约归属方（决定列表查询走哪个二级索引）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    /// 患者视角：我约的医生
    Patient,
    /// 医生视角：约到我的患者
    Doctor,
}

impl OwnerType {
    /// 对应的预约集合索引
    pub fn index_name(&self) -> &'static str {
        match self {
            OwnerType::Patient => IDX_BY_PATIENT,
            OwnerType::Doctor => IDX_BY_DOCTOR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::Patient => "patient",
            OwnerType::Doctor => "doctor",
        }
    }
}

impl std::str::FromStr for OwnerType {
    type Err = MedibookSDKError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "patient" => Ok(OwnerType::Patient),
            "doctor" => Ok(OwnerType::Doctor),
            other => Err(MedibookSDKError::InvalidInput(format!(
                "未知归属方类型: {}",
                other
            ))),
        }
    }
}

/// 预约输入（调用方提交；id 与同步字段由引擎生成）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentInput {
    pub title: String,
    pub doctor_id: String,
    pub patient_id: String,
    /// 预约日期（ISO 8601，如 "2026-09-01"）
    pub date: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// 预约记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub title: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub date: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    /// 是否已与远端确认（离线创建的记录为 false，直到排空成功）
    #[serde(default)]
    pub synced: bool,
    /// 创建时间（UTC 毫秒时间戳，排空时按此排序重放）
    #[serde(default)]
    pub created_at: i64,
}

fn default_status() -> String {
    "booked".to_string()
}

impl Appointment {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// 医生记录（目录资源，远端为权威源，本地仅缓存）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub name: String,
    pub specialty: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub created_at: i64,
}

impl Doctor {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// 用户资料（单记录集合，仅本地直写，不参与远端同步）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// 最近一次保存时间（UTC 毫秒时间戳）
    #[serde(default)]
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_owner_type_index_selection() {
        assert_eq!("patient".parse::<OwnerType>().unwrap(), OwnerType::Patient);
        assert_eq!(
            OwnerType::Patient.index_name(),
            crate::storage::schema::collections::IDX_BY_PATIENT
        );
        assert_eq!(
            OwnerType::Doctor.index_name(),
            crate::storage::schema::collections::IDX_BY_DOCTOR
        );
        assert!("clinic".parse::<OwnerType>().is_err());
    }

    #[test]
    fn test_appointment_defaults_from_sparse_value() {
        // 远端回显可能不带同步字段，反序列化时必须有安全默认值
        let appointment = Appointment::from_value(json!({
            "id": "srv_1",
            "title": "checkup",
            "doctor_id": "d_1",
            "patient_id": "p_1",
            "date": "2026-09-01"
        }))
        .unwrap();
        assert_eq!(appointment.status, "booked");
        assert!(!appointment.synced);
        assert_eq!(appointment.created_at, 0);
    }
}
