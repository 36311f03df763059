//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `REACTLY__*` 覆盖（双下划线表示嵌套，如 `REACTLY__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::trace::{FormatConfig, TraceConfig};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub stage: StageSection,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsSection,
    pub trace: TraceSection,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；API Key 只决定凭据，缺失时退回离线 Oracle
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            request_timeout_secs: 60,
        }
    }
}

/// [stage] 段：每个 Stage 的默认尝试次数（解码失败时重试）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageSection {
    pub tries: usize,
}

impl Default for StageSection {
    fn default() -> Self {
        Self { tries: 3 }
    }
}

/// 工具选择的停止策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// 按评分降序一次遍历所有 score >= 阈值的工具
    #[default]
    Threshold,
    /// 同一遍历中，每次工具运行后询问 CanAnswer，为 true 即停止
    CanAnswer,
}

/// [orchestrator] 段：任务循环参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub score_threshold: f64,
    /// 单个任务最多运行的工具次数（硬上限，保证终止）
    pub max_tool_runs_per_task: usize,
    pub stop_policy: StopPolicy,
    /// 保留的历史问答轮数
    pub max_history_turns: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            max_tool_runs_per_task: 5,
            stop_policy: StopPolicy::Threshold,
            max_history_turns: 10,
        }
    }
}

/// [tools] 段：单次工具调用超时（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

/// [trace] 段：会话 id、记录文件、实时渲染选项
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceSection {
    /// 会话 id，未设置时随机生成
    pub session: Option<String>,
    /// JSONL 查询记录文件（追加写）
    pub record_file: Option<PathBuf>,
    /// 实时显示的事件 key 列表，"_all" 表示全部
    pub live_show: Vec<String>,
    pub compact: bool,
    pub colored: bool,
    pub elide_chars: usize,
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            session: None,
            record_file: None,
            live_show: Vec::new(),
            compact: true,
            colored: true,
            elide_chars: 500,
        }
    }
}

impl TraceSection {
    pub fn to_trace_config(&self) -> TraceConfig {
        let mut cfg = TraceConfig::new(self.session.clone()).with_live_format(FormatConfig {
            colored: self.colored,
            compact: self.compact,
            show: self.live_show.clone(),
            elide_chars: self.elide_chars,
        });
        if let Some(path) = &self.record_file {
            cfg = cfg.with_record_file(path.clone());
        }
        cfg
    }
}

/// 从 config 目录加载配置，环境变量 REACTLY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 REACTLY__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("REACTLY")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("trace.live_show")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
