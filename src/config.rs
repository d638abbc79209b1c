use crate::lexer::{OperatorSet, UnknownOperator};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 埋め込みのデフォルト設定
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ShellConfig {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub history_file: String,
    #[serde(default)]
    pub operators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub file: String,
}

// ── ユーザ設定（デフォルトに上書きする） ──

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    #[serde(default)]
    shell: ShellOverlay,
    #[serde(default)]
    log: LogOverlay,
}

#[derive(Debug, Deserialize, Default)]
struct ShellOverlay {
    prompt: Option<String>,
    history_file: Option<String>,
    operators: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct LogOverlay {
    level: Option<String>,
    file: Option<String>,
}

impl Config {
    /// 埋め込みのデフォルト設定を読み込む
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// デフォルト設定に<config_dir>/pipesh/config.tomlを上書きして読み込む
    pub fn load() -> Self {
        let mut config = Self::default_config();
        if let Some(overlay) = Self::load_overlay() {
            config.apply_overlay(overlay);
        }
        config
    }

    fn load_overlay() -> Option<ConfigOverlay> {
        let path = dirs::config_dir()?.join("pipesh").join("config.toml");
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(overlay) => Some(overlay),
            Err(e) => {
                eprintln!("PipeSh: 設定ファイルの読み込みに失敗: {e}");
                None
            }
        }
    }

    /// 指定された項目のみ上書き
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        let s = overlay.shell;
        if let Some(v) = s.prompt {
            self.shell.prompt = v;
        }
        if let Some(v) = s.history_file {
            self.shell.history_file = v;
        }
        if let Some(v) = s.operators {
            self.shell.operators = v;
        }

        let l = overlay.log;
        if let Some(v) = l.level {
            self.log.level = v;
        }
        if let Some(v) = l.file {
            self.log.file = v;
        }
    }

    /// 設定された演算子の集合
    pub fn operator_set(&self) -> Result<OperatorSet, UnknownOperator> {
        OperatorSet::from_strs(&self.shell.operators)
    }

    pub fn history_path(&self) -> PathBuf {
        expand_home(&self.shell.history_file)
    }

    pub fn log_path(&self) -> PathBuf {
        expand_home(&self.log.file)
    }

    #[cfg(test)]
    fn apply_overlay_str(&mut self, toml_str: &str) {
        let overlay: ConfigOverlay = toml::from_str(toml_str).unwrap();
        self.apply_overlay(overlay);
    }
}

/// 先頭の~/をホームディレクトリに展開
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => Path::new(path).to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Operator;

    #[test]
    fn default_config_parses() {
        let config = Config::default_config();
        assert_eq!(config.shell.prompt, "PipeSh");
        assert_eq!(config.log.level, "info");
        assert!(config.shell.history_file.ends_with(".pipesh_history"));
    }

    #[test]
    fn default_operators_are_complete() {
        let ops = Config::default_config().operator_set().unwrap();
        assert_eq!(ops, OperatorSet::default());
        for op in Operator::ALL {
            assert!(ops.contains(op));
        }
    }

    #[test]
    fn overlay_replaces_only_given_keys() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [shell]
            operators = ["|"]

            [log]
            level = "debug"
            "#,
        );
        assert_eq!(config.shell.prompt, "PipeSh");
        assert_eq!(config.shell.operators, vec!["|"]);
        assert_eq!(config.log.level, "debug");
        assert!(!config.log.file.is_empty());

        let ops = config.operator_set().unwrap();
        assert!(ops.contains(Operator::Pipe));
        assert!(!ops.contains(Operator::Background));
    }

    #[test]
    fn unknown_operator_in_config() {
        let mut config = Config::default_config();
        config.apply_overlay_str("[shell]\noperators = [\";\"]\n");
        assert!(config.operator_set().is_err());
    }

    #[test]
    fn home_is_expanded() {
        let absolute = expand_home("/var/log/pipesh.log");
        assert_eq!(absolute, PathBuf::from("/var/log/pipesh.log"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x/y"), home.join("x/y"));
        }
    }
}
