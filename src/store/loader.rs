//! 启动时载入线路数据（data.json → 单例快照）

use std::path::Path;

use super::models::Dataset;
use super::{ConversationStore, StoreError};

/// 读取 `{districts, bus_providers}` JSON；缺失的键按空列表处理
pub fn load_dataset_file(path: impl AsRef<Path>) -> Result<Dataset, StoreError> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let dataset: Dataset = serde_json::from_str(&raw)?;
    Ok(dataset)
}

/// 用文件内容覆盖存储中的数据集；失败时记录警告并继续（启动不因此中断）
pub async fn seed_dataset(store: &dyn ConversationStore, path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let dataset = match load_dataset_file(path) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!("Error loading dataset {:?}: {}", path, e);
            return false;
        }
    };

    let districts = dataset.districts.len();
    let providers = dataset.bus_providers.len();
    match store.replace_dataset(dataset).await {
        Ok(()) => {
            tracing::info!(districts, providers, "Dataset loaded from {:?}", path);
            true
        }
        Err(e) => {
            tracing::warn!("Failed to store dataset: {}", e);
            false
        }
    }
}
