//! 基于文件系统的类型库
//!
//! 目录结构：`<root>/<model_id>/<name>.txt`，可选 `<root>/<model_id>/_type_info.json`。
//! 写入先落到临时文件再重命名，同名写入按名称串行化。

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::models::{TypeDescriptor, TypeRecord, validate_type_name};
use crate::storage::record_format::{decode_record, encode_record};
use crate::storage::repository::{LibraryIndex, TypeRepository};

/// 检索元数据文件名
pub const CATALOG_FILE: &str = "_type_info.json";

const RECORD_EXT: &str = "txt";

/// 文件类型库
pub struct FileTypeLibrary {
    dir: PathBuf,
    joint_count: usize,
    index: RwLock<LibraryIndex>,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileTypeLibrary {
    /// 打开 `<root>/<model_id>` 命名空间并加载全部记录
    ///
    /// 目录不存在时创建空库；任何记录无法读取或校验失败都返回错误。
    pub async fn open(root: impl AsRef<Path>, model_id: &str, joint_count: usize) -> Result<Self> {
        // 模型标识是库根目录下的一级目录名，规则与类型名相同
        validate_type_name(model_id)
            .map_err(|e| AppError::Config(format!("手部模型标识无效: {}", e)))?;

        let dir = root.as_ref().join(model_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::StoreIo(format!("无法创建类型库目录 {}: {}", dir.display(), e)))?;

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!("Skipping non UTF-8 record file: {}", path.display());
                continue;
            };
            if name.starts_with('_') || name.starts_with('.') {
                continue;
            }
            files.push((name.to_string(), path));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut index = LibraryIndex::default();
        for (name, path) in files {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                AppError::StoreIo(format!("无法读取类型记录 {}: {}", path.display(), e))
            })?;
            let record = decode_record(&name, &content)?;
            record.validate(joint_count).map_err(|e| {
                AppError::StoreIo(format!("类型记录 {} 无效: {}", path.display(), e))
            })?;
            debug!("Loaded type record: {}", name);
            index.insert(record);
        }

        let catalog = load_catalog(&dir.join(CATALOG_FILE)).await;
        let catalog: Vec<TypeDescriptor> = catalog
            .into_iter()
            .filter(|d| {
                let known = index.contains(&d.name);
                if !known {
                    warn!("Catalog entry '{}' has no record, ignored", d.name);
                }
                known
            })
            .collect();
        index.set_catalog(catalog);

        info!(
            "Type library opened: {} ({} types, {} joints)",
            dir.display(),
            index.len(),
            joint_count
        );

        Ok(Self {
            dir,
            joint_count,
            index: RwLock::new(index),
            write_locks: DashMap::new(),
        })
    }

    /// 命名空间目录
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, RECORD_EXT))
    }

    fn write_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

async fn load_catalog(path: &Path) -> Vec<TypeDescriptor> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<TypeDescriptor>>(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Ignoring malformed catalog {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

#[async_trait]
impl TypeRepository for FileTypeLibrary {
    async fn get(&self, name: &str) -> Result<TypeRecord> {
        self.index.read().get(name)
    }

    async fn put(&self, record: TypeRecord) -> Result<()> {
        record.validate(self.joint_count)?;

        let lock = self.write_lock(&record.name);
        let _guard = lock.lock().await;

        let path = self.record_path(&record.name);
        let tmp = path.with_extension(format!("{}.tmp", RECORD_EXT));
        let content = encode_record(&record);

        let written = async {
            tokio::fs::write(&tmp, content.as_bytes()).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::StoreIo(format!(
                "保存类型 '{}' 失败: {}",
                record.name, e
            )));
        }

        info!(
            "Type '{}' saved to {} at {}",
            record.name,
            path.display(),
            chrono::Utc::now().to_rfc3339()
        );
        self.index.write().insert(record);
        Ok(())
    }

    async fn list_names(&self) -> Result<Vec<String>> {
        Ok(self.index.read().names())
    }

    async fn descriptors(&self) -> Result<Vec<TypeDescriptor>> {
        Ok(self.index.read().descriptors())
    }

    fn joint_count(&self) -> usize {
        self.joint_count
    }
}
