use crate::{config::Config, helper::DynError};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use std::{fs::OpenOptions, str::FromStr};

/// ログファイルへの出力を初期化。
///
/// 標準エラー出力はユーザ向けのメッセージに使うので、ログはファイルにのみ書き込む。
pub fn init(config: &Config) -> Result<(), DynError> {
    let level = LevelFilter::from_str(&config.log.level)
        .map_err(|_| format!("不正なログレベル: {}", config.log.level))?;
    if level == LevelFilter::Off {
        return Ok(());
    }

    let path = config.log_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let log_config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Off)
        .build();
    WriteLogger::init(level, log_config, file)?;
    Ok(())
}
