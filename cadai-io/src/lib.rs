use std::fs;
use std::path::{Path, PathBuf};

use cadai_core::cache::{CacheDocument, CachedEntity, DrawingBounds, Summary};
use cadai_engine::client::AutomationClient;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// 默认缓存文件位置（相对当前工作目录）。
pub const CACHE_FILE: &str = "drawing_cache.json";

const LIMITS_MIN: &str = "LIMMIN";
const LIMITS_MAX: &str = "LIMMAX";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write cache file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize cache document: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("invalid cache file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 图纸缓存：遍历活动文档的模型空间，生成扁平实体记录与统计摘要并写入磁盘。
#[derive(Debug)]
pub struct DrawingCache<'a> {
    client: &'a AutomationClient,
    path: PathBuf,
    data: CacheDocument,
}

impl<'a> DrawingCache<'a> {
    pub fn new(client: &'a AutomationClient) -> Self {
        Self::with_path(client, CACHE_FILE)
    }

    pub fn with_path(client: &'a AutomationClient, path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            path: path.into(),
            data: CacheDocument::default(),
        }
    }

    /// 遍历模型空间一次。单个实体读取失败时跳过并记录日志，集合不可访问时返回空列表。
    pub fn collect_all_entities(&self) -> Vec<CachedEntity> {
        let items = match self.client.model_space() {
            Ok(items) => items,
            Err(err) => {
                error!(error = %err, "读取模型空间失败");
                return Vec::new();
            }
        };

        let mut entities = Vec::with_capacity(items.len());
        let mut skipped = 0usize;
        for item in items {
            match item {
                Ok(record) => entities.push(CachedEntity::from(&record)),
                Err(err) => {
                    skipped += 1;
                    warn!(error = %err, "跳过无法读取的实体");
                }
            }
        }
        debug!(collected = entities.len(), skipped, "模型空间遍历完成");
        entities
    }

    /// 汇总实体数量、类型与图层分布；界限读取失败时为 `None`。
    pub fn generate_summary(&self, entities: &[CachedEntity]) -> Summary {
        Summary::from_entities(entities, self.drawing_bounds())
    }

    /// 读取 `LIMMIN` / `LIMMAX` 作为图纸界限。
    pub fn drawing_bounds(&self) -> Option<DrawingBounds> {
        let read = |name: &str| match self.client.get_variable(name) {
            Ok(value) => {
                let point = value.as_point2();
                if point.is_none() {
                    debug!(variable = name, value = ?value, "系统变量不是平面点");
                }
                point
            }
            Err(err) => {
                debug!(variable = name, error = %err, "读取系统变量失败");
                None
            }
        };
        let min = read(LIMITS_MIN)?;
        let max = read(LIMITS_MAX)?;
        Some(DrawingBounds { min, max })
    }

    /// 收集 → 汇总 → 记录时间 → 整体覆盖写入缓存文件。
    pub fn update_cache(&mut self) -> Result<&CacheDocument, CacheError> {
        info!(path = %self.path.display(), "更新图纸缓存");
        let entities = self.collect_all_entities();
        let summary = self.generate_summary(&entities);
        self.data = CacheDocument {
            last_update: Some(Utc::now()),
            entities,
            summary,
        };
        write_cache(&self.path, &self.data)?;
        info!(count = self.data.entities.len(), "图纸缓存已保存");
        Ok(&self.data)
    }
}

/// 将缓存文档以缩进格式写入 `path`，覆盖原有内容。
pub fn write_cache(path: &Path, document: &CacheDocument) -> Result<(), CacheError> {
    let content = serde_json::to_string_pretty(document).map_err(CacheError::Serialize)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| CacheError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, content).map_err(|source| CacheError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// 读取缓存文件；文件不存在时返回空的默认文档。
pub fn load_cache(path: &Path) -> Result<CacheDocument, CacheError> {
    if !path.exists() {
        debug!(path = %path.display(), "缓存文件不存在，返回空文档");
        return Ok(CacheDocument::default());
    }
    let content = fs::read_to_string(path).map_err(|source| CacheError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CacheError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use cadai_engine::offline::DisabledConnector;

    use super::*;

    #[test]
    fn disconnected_client_yields_empty_snapshot() {
        let mut client = AutomationClient::new(["AutoCAD.Application"]);
        assert!(!client.connect(&DisabledConnector));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = DrawingCache::with_path(&client, &path);
        let data = cache.update_cache().expect("write cache").clone();

        assert!(data.entities.is_empty());
        assert_eq!(data.summary.total_entities, 0);
        assert!(data.summary.bounds.is_none());
        assert!(data.last_update.is_some());
        assert!(path.exists());
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_cache(&dir.path().join("absent.json")).expect("load");
        assert_eq!(loaded, CacheDocument::default());
        assert!(loaded.last_update.is_none());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_cache(&path), Err(CacheError::Parse { .. })));
    }

    #[test]
    fn legacy_empty_summary_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        fs::write(
            &path,
            r#"{"last_update": null, "entities": [], "summary": {}}"#,
        )
        .unwrap();
        let loaded = load_cache(&path).expect("load");
        assert_eq!(loaded.summary.total_entities, 0);
        assert!(loaded.summary.bounds.is_none());
    }
}
