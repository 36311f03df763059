//! 查询记录持久化
//!
//! 每个完成的查询追加一行 JSON（session / query / response / diagnostics）到记录文件；
//! 每行由一次 write_all 写出，并在进程内用互斥锁保证单写者。

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::trace::{Event, EventKind};

/// 查询诊断信息：计数器与时间点（unix 秒）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub counters: BTreeMap<String, u64>,
    pub timepoints: BTreeMap<String, f64>,
}

impl Diagnostics {
    pub fn increment_counter(&mut self, key: &str) {
        *self.counters.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn set_counter(&mut self, key: &str, value: u64) {
        self.counters.insert(key.to_string(), value);
    }

    pub fn set_timepoint(&mut self, key: &str, at: DateTime<Utc>) {
        self.timepoints
            .insert(key.to_string(), at.timestamp_micros() as f64 / 1_000_000.0);
    }

    pub fn timepoint(&self, key: &str) -> Option<f64> {
        self.timepoints.get(key).copied()
    }

    /// 从 query 子树统计：任务数、工具运行数、重试次数、失败事件数、token 用量，以及起止时间
    pub fn from_query(query: &Event, finished_at: DateTime<Utc>) -> Self {
        let mut diag = Self::default();
        let events = query.walk();
        let count = |kind: EventKind| events.iter().filter(|e| e.kind() == kind).count() as u64;
        diag.set_counter("tasks", count(EventKind::Task));
        diag.set_counter("tool_runs", count(EventKind::ToolRun));
        diag.set_counter("stages", count(EventKind::Stage));
        diag.set_counter(
            "stage_retries",
            events
                .iter()
                .filter(|e| {
                    e.kind() == EventKind::Try
                        && e.args.get("nr").and_then(|v| v.as_u64()).unwrap_or(0) > 0
                })
                .count() as u64,
        );
        diag.set_counter("failed_events", count(EventKind::Failed));
        if let Some(tokens) = query.args.get("tokens") {
            for (field, counter) in [
                ("prompt", "prompt_tokens"),
                ("completion", "completion_tokens"),
                ("total", "total_tokens"),
            ] {
                if let Some(n) = tokens.get(field).and_then(|v| v.as_u64()) {
                    diag.set_counter(counter, n);
                }
            }
        }
        diag.set_timepoint("started_at", query.time);
        diag.set_timepoint("finished_at", finished_at);
        diag
    }
}

/// 一条持久化的查询记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub session: String,
    pub query: String,
    pub response: String,
    pub diagnostics: Diagnostics,
}

/// 记录器：未配置文件时不写入
#[derive(Debug, Default)]
pub struct Recorder {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl Recorder {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 追加一行记录；父目录不存在时自动创建
    pub fn record(&self, record: &QueryRecord) -> Result<(), AgentError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut line = serde_json::to_string(record)
            .map_err(|e| AgentError::Io(std::io::Error::other(e)))?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// 读取记录文件中的全部记录（跳过无法解析的行）
    pub fn load(path: &Path) -> Result<Vec<QueryRecord>, AgentError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(query: &str) -> QueryRecord {
        let mut diagnostics = Diagnostics::default();
        diagnostics.increment_counter("tasks");
        diagnostics.set_timepoint("finished_at", Utc::now());
        QueryRecord {
            session: "s1".to_string(),
            query: query.to_string(),
            response: "answer".to_string(),
            diagnostics,
        }
    }

    #[test]
    fn test_record_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.jsonl");
        let recorder = Recorder::new(Some(path.clone()));
        recorder.record(&record("q1")).unwrap();
        recorder.record(&record("q2")).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        let loaded = Recorder::load(&path).unwrap();
        assert_eq!(loaded[0].query, "q1");
        assert_eq!(loaded[1].query, "q2");
        assert_eq!(loaded[1].diagnostics.counters.get("tasks"), Some(&1));
    }

    #[test]
    fn test_token_usage_becomes_counters() {
        let tracer = crate::trace::Tracer::default();
        let query = tracer.on("query", serde_json::json!({"user_question": "q"}));
        query.add_arg(
            "tokens",
            serde_json::json!({"prompt": 12, "completion": 3, "total": 15}),
        );
        let diag = Diagnostics::from_query(&query.export(), Utc::now());
        assert_eq!(diag.counters.get("prompt_tokens"), Some(&12));
        assert_eq!(diag.counters.get("completion_tokens"), Some(&3));
        assert_eq!(diag.counters.get("total_tokens"), Some(&15));

        let bare = tracer.on("query", serde_json::json!({"user_question": "q2"}));
        let diag = Diagnostics::from_query(&bare.export(), Utc::now());
        assert!(!diag.counters.contains_key("total_tokens"));
    }

    #[test]
    fn test_no_path_is_noop() {
        let recorder = Recorder::new(None);
        assert!(recorder.record(&record("q")).is_ok());
        assert!(recorder.path().is_none());
    }
}
