use sqlx::migrate::Migrator;

/// 仓库根目录 `migrations/` 下的迁移脚本，编译期嵌入
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
