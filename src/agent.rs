//! 运行时装配
//!
//! 从 AppConfig 构建 LLM、网页搜索、检查点与线程存储，再组装成 GraphRunner。
//! 未设置 API Key 时 LLM / 搜索自动退回 mock，便于离线演示。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{load_config, AppConfig, StorageBackend};
use crate::core::AgentError;
use crate::graph::{GraphDeps, GraphRunner, SYSTEM_PROMPT};
use crate::llm::{LlmClient, MockLlmClient, ModelSpec, OpenAiClient};
use crate::memory::{
    CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, MemoryThreadStore, SqliteStore,
    ThreadStore,
};
use crate::research::{ResearchPipeline, ResearchSettings};
use crate::retrieval::{DocumentRetriever, NoopRetriever};
use crate::tools::{standard_registry, MockWebSearch, TavilySearch, ToolExecutor, WebSearch};

/// 按 [llm] 段创建客户端
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_key = std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty());

    if provider == "openai" && has_key {
        tracing::info!(
            base_url = cfg.llm.base_url.as_deref().unwrap_or("default"),
            model = %cfg.llm.default_model,
            "Using OpenAI-compatible LLM"
        );
        Arc::new(
            OpenAiClient::new(cfg.llm.base_url.as_deref(), None)
                .with_timeout(cfg.llm.timeouts.request),
        )
    } else {
        if provider != "mock" {
            tracing::warn!("No OPENAI_API_KEY set or provider unknown, using Mock LLM");
        }
        Arc::new(MockLlmClient::new())
    }
}

/// 按 [search] 段创建网页搜索后端
pub fn create_search_from_config(cfg: &AppConfig) -> Arc<dyn WebSearch> {
    let provider = cfg.search.provider.to_lowercase();
    let has_key = std::env::var("TAVILY_API_KEY").is_ok_and(|k| !k.is_empty());

    if provider == "tavily" && has_key {
        tracing::info!("Using Tavily web search");
        Arc::new(TavilySearch::new(None, cfg.search.timeout_secs))
    } else {
        if provider != "mock" {
            tracing::warn!("No TAVILY_API_KEY set or provider unknown, using mock web search");
        }
        Arc::new(MockWebSearch::new())
    }
}

/// 检查点与线程存储
#[derive(Clone)]
pub struct Stores {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub threads: Arc<dyn ThreadStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            threads: Arc::new(MemoryThreadStore::new()),
        }
    }
}

/// 按 [storage] 段打开存储；file 后端的线程记录只保留在内存中
pub fn create_stores_from_config(cfg: &AppConfig) -> Result<Stores, AgentError> {
    let path = cfg.storage.path_or_default();
    let stores = match cfg.storage.backend {
        StorageBackend::Memory => Stores::in_memory(),
        StorageBackend::File => Stores {
            checkpoints: Arc::new(FileCheckpointStore::new(&path)),
            threads: Arc::new(MemoryThreadStore::new()),
        },
        StorageBackend::Sqlite => {
            let db = Arc::new(SqliteStore::open(&path)?);
            Stores {
                checkpoints: db.clone(),
                threads: db,
            }
        }
    };
    tracing::info!(backend = ?cfg.storage.backend, path = %path.display(), "storage ready");
    Ok(stores)
}

/// 组装 GraphRunner
pub fn build_runner(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn WebSearch>,
    retriever: Arc<dyn DocumentRetriever>,
    stores: Stores,
) -> GraphRunner {
    let structured_model = ModelSpec::resolve(&cfg.llm.structured_model);
    let registry = standard_registry(
        llm.clone(),
        structured_model.clone(),
        search.clone(),
        cfg.search.max_results,
    );
    let research = ResearchPipeline::new(
        llm.clone(),
        structured_model,
        search,
        ResearchSettings {
            explorer_timeout: cfg
                .research
                .explorer_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            max_redo: cfg.research.max_redo,
        },
    );
    let deps = GraphDeps {
        llm,
        tools: ToolExecutor::new(registry, cfg.tools.tool_timeout_secs),
        research,
        retriever,
        threads: stores.threads,
        system_prompt: SYSTEM_PROMPT.to_string(),
    };
    GraphRunner::new(deps, stores.checkpoints)
        .with_max_steps(cfg.graph.max_steps)
        .with_default_model(cfg.llm.default_model.clone())
}

/// 加载配置；文件缺失时使用默认值，格式错误时报 ConfigError
pub fn load_app_config(config_path: Option<PathBuf>) -> Result<AppConfig, AgentError> {
    load_config(config_path).map_err(|e| AgentError::ConfigError(e.to_string()))
}

/// 按配置一步创建 GraphRunner（无文档检索）
pub fn create_runner(cfg: &AppConfig) -> Result<GraphRunner, AgentError> {
    let stores = create_stores_from_config(cfg)?;
    Ok(build_runner(
        cfg,
        create_llm_from_config(cfg),
        create_search_from_config(cfg),
        Arc::new(NoopRetriever),
        stores,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSection;
    use crate::graph::RunHooks;

    #[tokio::test]
    async fn test_mock_runner_echoes() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.search.provider = "mock".into();
        let runner = build_runner(
            &cfg,
            create_llm_from_config(&cfg),
            create_search_from_config(&cfg),
            Arc::new(NoopRetriever),
            Stores::in_memory(),
        );
        let out = runner.invoke("t", "hello", None, RunHooks::new()).await.unwrap();
        assert_eq!(out.final_reply(), Some("Echo from Mock: hello"));
    }

    #[tokio::test]
    async fn test_default_model_applies_to_new_threads() {
        let mut cfg = AppConfig::default();
        cfg.llm.default_model = "gpt-5-nano-low".into();
        let runner = build_runner(
            &cfg,
            Arc::new(MockLlmClient::new()),
            Arc::new(MockWebSearch::new()),
            Arc::new(NoopRetriever),
            Stores::in_memory(),
        );
        let out = runner.invoke("t", "hi", None, RunHooks::new()).await.unwrap();
        assert_eq!(out.state().unwrap().model, "gpt-5-nano-low");

        // 显式指定的模型在后续轮次沿用，不被默认值覆盖
        let out = runner
            .invoke("t", "again", Some("gpt-4.1-mini"), RunHooks::new())
            .await
            .unwrap();
        assert_eq!(out.state().unwrap().model, "gpt-4.1-mini");
        let out = runner.invoke("t", "third", None, RunHooks::new()).await.unwrap();
        assert_eq!(out.state().unwrap().model, "gpt-4.1-mini");
    }

    #[tokio::test]
    async fn test_sqlite_stores_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.storage = StorageSection {
            backend: StorageBackend::Sqlite,
            path: Some(dir.path().join("delve.db")),
        };
        let stores = create_stores_from_config(&cfg).unwrap();
        assert!(stores.checkpoints.get("none").await.unwrap().is_none());
        assert!(dir.path().join("delve.db").exists());
    }
}
