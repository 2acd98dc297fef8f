// 工具模块
// 本地数据目录定位与共享的小工具

use std::fs;
use std::io;
use std::path::PathBuf;

/// 获取应用数据目录（可执行文件旁的 data 目录），不存在则创建
pub fn get_app_data_dir() -> io::Result<PathBuf> {
    let exe_path = std::env::current_exe()?;
    let exe_dir = exe_path.parent().unwrap_or(std::path::Path::new("."));
    let data_dir = exe_dir.join("data");

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

/// 日志文件路径
pub fn get_log_path() -> io::Result<PathBuf> {
    Ok(get_app_data_dir()?.join("edusync.log"))
}

/// 百分比得分，四舍五入；满分为 0 的脏数据按 1 处理
pub fn percentage(score: u32, max_score: u32) -> u32 {
    let max = if max_score == 0 { 1 } else { max_score };
    ((score as f64 / max as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(4, 4), 100);
        assert_eq!(percentage(0, 5), 0);
    }

    #[test]
    fn test_percentage_zero_max_guard() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(3, 0), 300);
    }
}
