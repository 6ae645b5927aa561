//! 存储层模块
//!
//! 提供操作类型库的持久化服务：按手部模型划分命名空间，每个类型一个文件。

pub mod file_library;
pub mod record_format;
pub mod repository;

pub use file_library::{CATALOG_FILE, FileTypeLibrary};
pub use repository::{MemoryTypeLibrary, TypeRepository};
