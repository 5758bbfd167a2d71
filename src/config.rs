//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DELVE__*` 覆盖（双下划线表示嵌套，如 `DELVE__LLM__PROVIDER=mock`）。
//! API Key 不进配置文件：OpenAI 读 `OPENAI_API_KEY`，Tavily 读 `TAVILY_API_KEY`。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub search: SearchSection,
    pub research: ResearchSection,
    pub graph: GraphSection,
    pub storage: StorageSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 未设置 RUST_LOG 时使用的日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: Option<String>,
    /// 运行级模型键（见 llm::models）
    #[serde(default = "default_model")]
    pub default_model: String,
    /// 研究流程与 create_plan 使用的结构化输出模型
    #[serde(default = "default_model")]
    pub structured_model: String,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            default_model: default_model(),
            structured_model: default_model(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    crate::llm::DEFAULT_MODEL_KEY.to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）；未设置时不限
    pub request: Option<u64>,
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [search] 段：网页搜索后端
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    /// tavily / mock
    #[serde(default = "default_search_provider")]
    pub provider: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            max_results: default_max_results(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_provider() -> String {
    "tavily".to_string()
}

fn default_max_results() -> usize {
    3
}

fn default_search_timeout_secs() -> u64 {
    15
}

/// [research] 段：未设置即不限
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResearchSection {
    pub max_redo: Option<u32>,
    pub explorer_timeout_secs: Option<u64>,
}

/// [graph] 段
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSection {
    /// 单次 invoke / resume 最多执行的节点数
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

fn default_max_steps() -> usize {
    crate::graph::DEFAULT_MAX_STEPS
}

/// 检查点 / 线程存储后端
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

/// [storage] 段：file 后端的 path 是目录，sqlite 后端的 path 是数据库文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    pub path: Option<PathBuf>,
}

impl StorageSection {
    pub fn path_or_default(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| match self.backend {
            StorageBackend::Sqlite => PathBuf::from("data/delve.db"),
            _ => PathBuf::from("data/checkpoints"),
        })
    }
}

/// 从 config 目录加载配置，环境变量 DELVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DELVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DELVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.log_level, "info");
        assert_eq!(cfg.llm.default_model, "gpt-4.1-mini");
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.search.max_results, 3);
        assert_eq!(cfg.graph.max_steps, 50);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert!(cfg.research.max_redo.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[llm]\nprovider = \"mock\"\n\n[research]\nmax_redo = 2\n\n[storage]\nbackend = \"sqlite\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.research.max_redo, Some(2));
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
        assert_eq!(cfg.storage.path_or_default(), PathBuf::from("data/delve.db"));
    }
}
