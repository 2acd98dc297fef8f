use std::sync::Arc;

use anyhow::Result;

use edusync_client::screens::{self, App};
use edusync_client::services::api::{ApiConfig, EduSyncApi};
use edusync_client::services::progress::ProgressService;
use edusync_client::services::session::{AuthService, SessionStore};
use edusync_client::utils::get_log_path;

/// 终端被交互界面占用，日志只写文件
fn setup_logger() -> Result<()> {
    let log_path = get_log_path()?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logger()?;

    // 配置启动时装配一次，之后只读
    let config = ApiConfig::from_env();
    log::info!("EduSync client starting, backend {}", config.base_url);

    let api = Arc::new(EduSyncApi::new(config)?);
    let auth = AuthService::new(Arc::clone(&api), SessionStore::new()?);
    // 有持久化的会话就直接恢复登录态
    auth.restore();

    let app = App {
        progress: ProgressService::new(Arc::clone(&api)),
        api,
        auth,
    };

    screens::run(app).await
}
