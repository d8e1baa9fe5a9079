//! 按身份合并去重
//!
//! 读路径的最后一步：远端结果与本地缓存拼接后，同一 `id` 只保留
//! 首次出现的记录。远端序列排在前面，因此远端记录天然胜出。

use std::collections::HashSet;

use serde_json::Value;

/// 合并两个记录序列，按 `id` 去重，先出现者胜
///
/// `remote` 在前、`local` 在后：同一 ID 在远端与本地缓存各有一份时，
/// 远端版本进入结果；仅存在于本地的记录（含未同步的待同步写入）
/// 保留在结果尾部。没有 `id` 字段的记录不参与去重，原样保留。
pub fn merge_by_identity(remote: Vec<Value>, local: Vec<Value>) -> Vec<Value> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(remote.len() + local.len());

    for record in remote.into_iter().chain(local) {
        match record.get("id").and_then(|v| v.as_str()) {
            Some(id) => {
                if seen.insert(id.to_string()) {
                    merged.push(record);
                }
            }
            None => merged.push(record),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_remote_wins_on_overlap() {
        let remote = vec![
            json!({"id": "1", "title": "复诊", "source": "remote"}),
            json!({"id": "2", "title": "初诊", "source": "remote"}),
        ];
        let local = vec![
            json!({"id": "2", "title": "初诊", "source": "local"}),
            json!({"id": "3", "title": "体检", "source": "local"}),
        ];

        let merged = merge_by_identity(remote, local);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0]["id"], "1");
        // 重叠 ID 取远端版本
        assert_eq!(merged[1]["id"], "2");
        assert_eq!(merged[1]["source"], "remote");
        // 仅本地的记录保留在尾部
        assert_eq!(merged[2]["id"], "3");
        assert_eq!(merged[2]["source"], "local");
    }

    #[test]
    fn test_merge_empty_sides() {
        let records = vec![json!({"id": "1"})];
        assert_eq!(merge_by_identity(records.clone(), vec![]).len(), 1);
        assert_eq!(merge_by_identity(vec![], records).len(), 1);
        assert!(merge_by_identity(vec![], vec![]).is_empty());
    }

    #[test]
    fn test_merge_keeps_records_without_id() {
        let remote = vec![json!({"title": "无 ID 记录"})];
        let local = vec![json!({"id": "1"})];
        let merged = merge_by_identity(remote, local);
        assert_eq!(merged.len(), 2);
    }
}
