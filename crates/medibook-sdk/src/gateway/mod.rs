//! 远端网关模块 - 与远端服务的单次请求/响应通道
//!
//! 职责刻意保持最薄：
//! - 一次资源操作翻译为一次 HTTP 交换
//! - 不重试、不缓存、不持有任何状态
//! - 传输失败 → `NetworkUnavailable`，非 2xx → `RemoteRejected`
//!
//! 重试与回退策略全部由 `sync::SyncEngine` 负责；`create` 不具幂等性，
//! 引擎只会重放从未确认成功过的 create（见 drain 路径）。

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{MedibookSDKError, Result};

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// 列表查询过滤条件（翻译为 URL query 参数）
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    params: Vec<(String, String)>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// 远端网关 trait（测试中以可编程 mock 实现）
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// 创建资源，返回远端权威记录（含服务端分配的 id）
    async fn create(&self, resource: &str, payload: &Value) -> Result<Value>;

    /// 按条件列出资源
    async fn list(&self, resource: &str, filter: &ListFilter) -> Result<Vec<Value>>;
}

/// 基于 reqwest 的 HTTP 网关实现
///
/// 端点约定：每种资源一个创建端点和一个过滤列表端点
/// - `POST {base}/api/{resource}`
/// - `GET  {base}/api/{resource}?k=v&...`
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    /// 创建新的 HTTP 网关
    pub fn new(config: &HttpClientConfig, base_url: impl Into<String>) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| MedibookSDKError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("✅ HTTP 网关已创建 (base_url: {})", base_url);

        Ok(Self { client, base_url })
    }

    fn resource_url(&self, resource: &str) -> String {
        format!("{}/api/{}", self.base_url, resource)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn create(&self, resource: &str, payload: &Value) -> Result<Value> {
        let url = self.resource_url(resource);
        debug!("远端创建: POST {}", url);

        // 传输失败（连接/超时/DNS）由 From<reqwest::Error> 映射为 NetworkUnavailable
        let response = self.client.post(&url).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "无法读取错误信息".to_string());
            return Err(MedibookSDKError::RemoteRejected {
                status: status.as_u16(),
                message,
            });
        }

        let record: Value = response
            .json()
            .await
            .map_err(|e| MedibookSDKError::Serialization(format!("解析创建响应失败: {}", e)))?;
        Ok(record)
    }

    async fn list(&self, resource: &str, filter: &ListFilter) -> Result<Vec<Value>> {
        let url = self.resource_url(resource);
        debug!("远端列表: GET {} (filter: {:?})", url, filter.params());

        let response = self
            .client
            .get(&url)
            .query(filter.params())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "无法读取错误信息".to_string());
            return Err(MedibookSDKError::RemoteRejected {
                status: status.as_u16(),
                message,
            });
        }

        let records: Vec<Value> = response
            .json()
            .await
            .map_err(|e| MedibookSDKError::Serialization(format!("解析列表响应失败: {}", e)))?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_filter_builds_params() {
        let filter = ListFilter::new()
            .with("owner_id", "u_1")
            .with("owner_type", "patient");
        assert_eq!(
            filter.params(),
            &[
                ("owner_id".to_string(), "u_1".to_string()),
                ("owner_type".to_string(), "patient".to_string())
            ]
        );
        assert!(ListFilter::new().is_empty());
    }

    #[test]
    fn test_resource_url_trims_trailing_slash() {
        let gateway =
            HttpGateway::new(&HttpClientConfig::default(), "https://api.example.com/").unwrap();
        assert_eq!(
            gateway.resource_url("appointments"),
            "https://api.example.com/api/appointments"
        );
    }
}
