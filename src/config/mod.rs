use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::{MapResult, MappingError};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub mapping: MappingConfig,
}

/// 日志配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub max_file_size: u64,
    pub max_files: usize,
}

/// 映射引擎配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MappingConfig {
    /// 未被映射消费的输入列是否原样输出
    pub pass_through: bool,
    /// 函数记忆化缓存的最大条目数
    pub function_cache_capacity: usize,
    /// 周粒度序列的起始星期
    pub week_start: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            mapping: MappingConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file: "mapflow".to_string(),
            max_file_size: 100 * 1024 * 1024, // 100MB
            max_files: 5,
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            pass_through: true,
            function_cache_capacity: 10_000,
            week_start: "monday".to_string(),
        }
    }
}

impl MappingConfig {
    /// 解析周起始日
    pub fn week_start_day(&self) -> MapResult<chrono::Weekday> {
        self.week_start
            .parse::<chrono::Weekday>()
            .map_err(|_| MappingError::Config(format!("无效的周起始日: {}", self.week_start)))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> MapResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| MappingError::Config(e.to_string()))?;
        config.mapping.week_start_day()?;
        if config.mapping.function_cache_capacity == 0 {
            return Err(MappingError::Config("函数缓存容量必须大于 0".to_string()));
        }
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> MapResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| MappingError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.mapping.pass_through);
        assert_eq!(config.mapping.function_cache_capacity, 10_000);
        assert_eq!(
            config.mapping.week_start_day().ok(),
            Some(chrono::Weekday::Mon)
        );
    }

    #[test]
    fn test_config_load_save() {
        let temp_file = NamedTempFile::new().expect("Failed to create temporary file");

        let mut config = Config::default();
        config.mapping.week_start = "sunday".to_string();
        config.save(temp_file.path()).expect("Failed to save config");

        let loaded_config =
            Config::load(temp_file.path()).expect("Failed to load config from temporary file");
        assert_eq!(loaded_config.mapping.week_start, "sunday");
        assert_eq!(loaded_config.log.level, config.log.level);
    }

    #[test]
    fn test_config_partial_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        temp_file
            .write_all(b"[mapping]\npass_through = false\n")
            .expect("Failed to write TOML content to temporary file");

        let config = Config::load(temp_file.path()).expect("Failed to load config");
        assert!(!config.mapping.pass_through);
        assert_eq!(config.mapping.function_cache_capacity, 10_000);
        assert_eq!(config.log.file, "mapflow");
    }

    #[test]
    fn test_config_rejects_bad_week_start() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        temp_file
            .write_all(b"[mapping]\nweek_start = \"someday\"\n")
            .expect("Failed to write TOML content to temporary file");

        assert!(matches!(
            Config::load(temp_file.path()),
            Err(MappingError::Config(_))
        ));
    }
}
