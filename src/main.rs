mod config;
mod generator;
mod pipeline;
mod storage;
mod utils;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use config::{AppConfig, AuthorDirectory, CategoryConfig};
use generator::{GeminiBackend, GenerationClient};
use pipeline::{CategorySelector, CategoryWeights, CycleOrchestrator, CycleRunner};
use storage::schema::{migrate_legacy, validate_collection, CollectionSchema};
use storage::{ArticleStore, Category, Database, SqliteArticleStore, SqliteStatistics, Statistics};
use utils::activity::{ActivityLog, Severity};
use utils::logger;
use utils::scheduler::GenerationScheduler;

#[derive(Parser)]
#[command(name = "farsihub")]
#[command(about = "波斯语内容站自动生成系统", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 初始化配置和数据库
    Init,
    /// 执行一次生成周期
    Generate {
        /// 指定分类，跳过随机选择
        #[arg(short, long)]
        category: Option<Category>,
    },
    /// 启动自动生成，Ctrl+C 停止
    Autopilot,
    /// 列出已发布文章
    List,
    /// 删除文章
    Delete {
        /// 文章ID
        #[arg(long)]
        id: String,
    },
    /// 从 JSON 文件导入文章，覆盖现有集合
    Import {
        #[arg(short, long)]
        file: String,
    },
    /// 导出文章为 JSON 文件
    Export {
        #[arg(short, long)]
        file: String,
    },
    /// 查看站点统计
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logger::init_logger();
    info!("farsihub 启动");

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_command().await?;
        }
        Commands::Generate { category } => {
            generate_command(category).await?;
        }
        Commands::Autopilot => {
            autopilot_command().await?;
        }
        Commands::List => {
            list_command().await?;
        }
        Commands::Delete { id } => {
            delete_command(&id).await?;
        }
        Commands::Import { file } => {
            import_command(&file).await?;
        }
        Commands::Export { file } => {
            export_command(&file).await?;
        }
        Commands::Stats => {
            stats_command().await?;
        }
    }

    Ok(())
}

/// 打开数据库并按 快照 → 本地 → 种子 的顺序加载文章
async fn open_storage(
    app_config: &AppConfig,
    authors: &AuthorDirectory,
) -> Result<(Arc<SqliteArticleStore>, Arc<SqliteStatistics>)> {
    let db_path = Path::new(&app_config.storage.database_path);
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let db = Database::new(&format!("sqlite:{}", app_config.storage.database_path)).await?;
    db.init_schema().await?;

    let store = SqliteArticleStore::new(db.clone(), authors.clone(), &app_config.storage.date_format);
    let source = store
        .bootstrap(Path::new(&app_config.storage.snapshot_path))
        .await?;
    info!("文章集合来源: {:?}", source);

    Ok((Arc::new(store), Arc::new(SqliteStatistics::new(db))))
}

async fn build_orchestrator(
    app_config: &AppConfig,
    activity: &ActivityLog,
    forced: Option<Category>,
) -> Result<CycleOrchestrator<GeminiBackend>> {
    let category_config = CategoryConfig::load()?;
    let authors = category_config.author_directory()?;
    let weights = match forced {
        Some(category) => CategoryWeights::only(category),
        None => category_config.weights()?,
    };
    let selector = CategorySelector::new(weights);
    let (store, stats) = open_storage(app_config, &authors).await?;

    let backend = GeminiBackend::new(app_config.generator.clone())?;
    if !app_config.generator.is_configured() {
        warn!("⚠️ API key 未配置。请在 config/settings.toml 中设置 [generator] api_key 或 GEMINI_API_KEY");
    }
    let client = GenerationClient::new(backend, &app_config.retry);

    Ok(CycleOrchestrator::new(selector, client, authors, store, stats, activity.clone())
        .with_date_format(&app_config.storage.date_format))
}

/// 按时间顺序输出活动日志
fn print_activity(activity: &ActivityLog) {
    for entry in activity.entries().iter().rev() {
        let time = entry.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S");
        match entry.severity {
            Severity::Error => error!("[{}] {}", time, entry.message),
            Severity::Warning => warn!("[{}] {}", time, entry.message),
            Severity::Info | Severity::Success => info!("[{}] {}", time, entry.message),
        }
    }
}

async fn init_command() -> Result<()> {
    info!("初始化系统...");

    tokio::fs::create_dir_all("data").await?;
    tokio::fs::create_dir_all("config").await?;

    // 生成默认配置文件
    let app_config = AppConfig::default();
    app_config.save("config/settings.toml")?;
    info!("已生成配置文件: config/settings.toml");

    let category_config = CategoryConfig::default();
    let category_toml = toml::to_string_pretty(&category_config)?;
    tokio::fs::write("config/categories.toml", category_toml).await?;
    info!("已生成分类配置: config/categories.toml");

    let authors = category_config.author_directory()?;
    open_storage(&app_config, &authors).await?;
    info!("数据库初始化完成");

    info!("✅ 系统初始化完成！");
    info!("下一步:");
    info!("  1. 编辑 config/settings.toml 配置API密钥");
    info!("  2. 编辑 config/categories.toml 调整分类权重与作者");
    info!("  3. 运行 'farsihub autopilot' 开始自动生成");

    Ok(())
}

async fn generate_command(category: Option<Category>) -> Result<()> {
    let app_config = AppConfig::load()?;
    let activity = ActivityLog::new();
    let orchestrator = build_orchestrator(&app_config, &activity, category).await?;

    let result = orchestrator.run().await;
    print_activity(&activity);

    let record = result?;
    info!("✅ 已发布: [{}] {}", record.id, record.title);
    Ok(())
}

async fn autopilot_command() -> Result<()> {
    let app_config = AppConfig::load()?;
    let activity = ActivityLog::new();
    let orchestrator: Arc<dyn CycleRunner> = Arc::new(build_orchestrator(&app_config, &activity, None).await?);

    let scheduler = GenerationScheduler::new(orchestrator, app_config.scheduler.cooldown(), activity.clone());
    scheduler.start();
    info!("自动生成运行中，按 Ctrl+C 停止");

    let interval = Duration::from_secs(app_config.scheduler.status_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("收到停止信号，等待当前周期结束");
                break;
            }
            _ = ticker.tick() => {
                match scheduler.next_run_eta() {
                    Some(eta) => info!("下次生成: {}s 后", eta.as_secs()),
                    None if scheduler.is_running() => info!("正在生成..."),
                    None => {}
                }
            }
        }
    }

    scheduler.shutdown().await;
    print_activity(&activity);
    info!(
        "本次运行: {} 条成功, {} 条失败",
        activity.count(Severity::Success),
        activity.count(Severity::Error)
    );
    Ok(())
}

async fn list_command() -> Result<()> {
    let app_config = AppConfig::load()?;
    let authors = CategoryConfig::load()?.author_directory()?;
    let (store, _) = open_storage(&app_config, &authors).await?;

    let records = store.list_articles().await?;
    if records.is_empty() {
        info!("还没有文章");
        return Ok(());
    }

    info!("共 {} 篇文章", records.len());
    for record in &records {
        info!("---");
        info!("ID: {}", record.id);
        info!("标题: {}", record.title);
        info!("分类: {} / 作者: {}", record.category.label(), record.author.name);
        info!("日期: {} / 阅读: {} / 浏览: {}", record.published_date_label, record.read_time_label, record.view_count);
        if !record.citations.is_empty() {
            info!("引用: {} 条", record.citations.len());
        }
    }
    Ok(())
}

async fn delete_command(id: &str) -> Result<()> {
    let app_config = AppConfig::load()?;
    let authors = CategoryConfig::load()?.author_directory()?;
    let (store, _) = open_storage(&app_config, &authors).await?;

    if store.remove_article(id).await? {
        info!("✅ 已删除文章: {}", id);
    } else {
        warn!("未找到文章: {}", id);
    }
    Ok(())
}

async fn import_command(file: &str) -> Result<()> {
    let app_config = AppConfig::load()?;
    let authors = CategoryConfig::load()?.author_directory()?;
    let (store, _) = open_storage(&app_config, &authors).await?;

    let raw = tokio::fs::read_to_string(file).await?;
    let records = match validate_collection(&raw) {
        CollectionSchema::Valid(records) => records,
        CollectionSchema::Legacy(legacy) => {
            info!("检测到旧版格式，迁移 {} 篇文章", legacy.len());
            migrate_legacy(legacy, &authors)
        }
        CollectionSchema::Corrupt(reason) => bail!("导入文件格式错误: {}", reason),
    };

    let count = records.len();
    store.replace_all(records).await?;
    info!("✅ 已导入 {} 篇文章", count);
    Ok(())
}

async fn export_command(file: &str) -> Result<()> {
    let app_config = AppConfig::load()?;
    let authors = CategoryConfig::load()?.author_directory()?;
    let (store, _) = open_storage(&app_config, &authors).await?;

    let records = store.list_articles().await?;
    let json = serde_json::to_string_pretty(&records)?;
    tokio::fs::write(file, json).await?;
    info!("✅ 已导出 {} 篇文章到 {}", records.len(), file);
    Ok(())
}

async fn stats_command() -> Result<()> {
    let app_config = AppConfig::load()?;
    let authors = CategoryConfig::load()?.author_directory()?;
    let (store, stats) = open_storage(&app_config, &authors).await?;

    let snapshot = stats.snapshot().await?;
    let records = store.list_articles().await?;

    info!("文章数: {}", records.len());
    info!("已生成: {}", snapshot.posts_generated);
    info!("总浏览: {}", snapshot.total_views);
    info!("总收入: {:.2}", snapshot.total_revenue);
    Ok(())
}
