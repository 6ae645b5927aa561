use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::{TypeDescriptor, TypeRecord};

/// 类型库仓储 trait
#[async_trait]
pub trait TypeRepository: Send + Sync {
    /// 按名称精确查找（区分大小写）
    async fn get(&self, name: &str) -> Result<TypeRecord>;

    /// 插入或整体替换记录
    async fn put(&self, record: TypeRecord) -> Result<()>;

    /// 按插入/文件顺序列出类型名
    async fn list_names(&self) -> Result<Vec<String>>;

    /// 列出检索用的类型描述（与 `list_names` 同序）
    async fn descriptors(&self) -> Result<Vec<TypeDescriptor>>;

    /// 所属手部模型的关节数
    fn joint_count(&self) -> usize;
}

/// 类型库内存索引
#[derive(Debug, Default)]
pub(crate) struct LibraryIndex {
    order: Vec<String>,
    records: HashMap<String, TypeRecord>,
    catalog: HashMap<String, TypeDescriptor>,
}

impl LibraryIndex {
    pub(crate) fn get(&self, name: &str) -> Result<TypeRecord> {
        self.records
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("类型 '{}' 不存在", name)))
    }

    pub(crate) fn insert(&mut self, record: TypeRecord) {
        if !self.records.contains_key(&record.name) {
            self.order.push(record.name.clone());
        }
        self.records.insert(record.name.clone(), record);
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub(crate) fn set_catalog(&mut self, entries: Vec<TypeDescriptor>) {
        self.catalog = entries.into_iter().map(|d| (d.name.clone(), d)).collect();
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub(crate) fn descriptors(&self) -> Vec<TypeDescriptor> {
        self.order
            .iter()
            .map(|name| {
                self.catalog
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| TypeDescriptor::bare(name.clone()))
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

/// 内存类型库（测试与试运行）
pub struct MemoryTypeLibrary {
    joint_count: usize,
    index: RwLock<LibraryIndex>,
}

impl MemoryTypeLibrary {
    pub fn new(joint_count: usize) -> Self {
        Self {
            joint_count,
            index: RwLock::new(LibraryIndex::default()),
        }
    }

    /// 预置记录；任何一条校验失败都返回错误
    pub fn with_records(joint_count: usize, records: Vec<TypeRecord>) -> Result<Self> {
        let library = Self::new(joint_count);
        {
            let mut index = library.index.write();
            for record in records {
                record.validate(joint_count)?;
                index.insert(record);
            }
        }
        Ok(library)
    }

    /// 设置检索元数据
    pub fn with_catalog(self, entries: Vec<TypeDescriptor>) -> Self {
        self.index.write().set_catalog(entries);
        self
    }
}

#[async_trait]
impl TypeRepository for MemoryTypeLibrary {
    async fn get(&self, name: &str) -> Result<TypeRecord> {
        self.index.read().get(name)
    }

    async fn put(&self, record: TypeRecord) -> Result<()> {
        record.validate(self.joint_count)?;
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
