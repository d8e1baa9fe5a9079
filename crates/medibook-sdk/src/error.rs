use std::fmt;

#[derive(Debug)]
pub enum MedibookSDKError {
    /// 平台无持久化存储能力（致命：离线能力不可用，SDK 降级为仅在线模式）
    StorageUnavailable(String),
    /// 本地主键冲突（本地逻辑错误，ID 生成纪律保证不应出现）
    DuplicateKey(String),
    /// 传输层失败（无网络、DNS 失败等，可恢复）
    NetworkUnavailable(String),
    /// 远端拒绝请求（非 2xx，可恢复）
    RemoteRejected { status: u16, message: String },
    KvStore(String),
    Transaction(String),
    Serialization(String),
    IO(String),
    InvalidInput(String),
    Config(String),
    NotInitialized(String),
    Other(String),
}

impl fmt::Display for MedibookSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MedibookSDKError::StorageUnavailable(e) => write!(f, "Storage unavailable: {}", e),
            MedibookSDKError::DuplicateKey(e) => write!(f, "Duplicate key: {}", e),
            MedibookSDKError::NetworkUnavailable(e) => write!(f, "Network unavailable: {}", e),
            MedibookSDKError::RemoteRejected { status, message } => {
                write!(f, "Remote rejected [{}]: {}", status, message)
            }
            MedibookSDKError::KvStore(e) => write!(f, "KV store error: {}", e),
            MedibookSDKError::Transaction(e) => write!(f, "Transaction error: {}", e),
            MedibookSDKError::Serialization(e) => write!(f, "Serialization error: {}", e),
            MedibookSDKError::IO(e) => write!(f, "IO error: {}", e),
            MedibookSDKError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            MedibookSDKError::Config(e) => write!(f, "Config error: {}", e),
            MedibookSDKError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            MedibookSDKError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for MedibookSDKError {}

impl From<serde_json::Error> for MedibookSDKError {
    fn from(error: serde_json::Error) -> Self {
        MedibookSDKError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for MedibookSDKError {
    fn from(error: std::io::Error) -> Self {
        MedibookSDKError::IO(error.to_string())
    }
}

impl From<sled::Error> for MedibookSDKError {
    fn from(error: sled::Error) -> Self {
        MedibookSDKError::KvStore(error.to_string())
    }
}

impl From<sled::transaction::TransactionError<MedibookSDKError>> for MedibookSDKError {
    fn from(error: sled::transaction::TransactionError<MedibookSDKError>) -> Self {
        match error {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => {
                MedibookSDKError::Transaction(e.to_string())
            }
        }
    }
}

impl From<reqwest::Error> for MedibookSDKError {
    fn from(error: reqwest::Error) -> Self {
        // 传输层失败（连接、超时、DNS）统一归为 NetworkUnavailable，
        // 写路径据此走本地回退，读路径据此降级为仅缓存
        MedibookSDKError::NetworkUnavailable(error.to_string())
    }
}

impl MedibookSDKError {
    /// 判断是否是连通性失败（传输失败或远端拒绝）
    ///
    /// 写路径对这类失败与离线状态走完全相同的本地回退路径，
    /// 调用方永远不需要区分持久化为什么落到了本地。
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            MedibookSDKError::NetworkUnavailable(_) | MedibookSDKError::RemoteRejected { .. }
        )
    }

    /// 获取远端拒绝的 HTTP 状态码（如果这是一个 RemoteRejected 错误）
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            MedibookSDKError::RemoteRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MedibookSDKError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(MedibookSDKError::NetworkUnavailable("dns".into()).is_connectivity());
        assert!(MedibookSDKError::RemoteRejected {
            status: 500,
            message: "boom".into()
        }
        .is_connectivity());
        // 存储与本地逻辑错误不属于连通性失败，必须向上传播
        assert!(!MedibookSDKError::StorageUnavailable("no fs".into()).is_connectivity());
        assert!(!MedibookSDKError::DuplicateKey("appt_1".into()).is_connectivity());
    }

    #[test]
    fn test_remote_status() {
        let err = MedibookSDKError::RemoteRejected {
            status: 422,
            message: "bad payload".into(),
        };
        assert_eq!(err.remote_status(), Some(422));
        assert_eq!(MedibookSDKError::Other("x".into()).remote_status(), None);
    }
}
