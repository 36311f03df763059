//! Tracer：不可变句柄 + 只追加的事件树
//!
//! 每个 Tracer 绑定树中的一个节点；`on(key, args)` 在该节点下追加子事件并返回绑定到子事件的新句柄，
//! 调用方自己的句柄不变。树存放在共享的 arena 中（序号即下标），修改由单个互斥锁保护，
//! 因此并行分支各持一个句柄也可安全追加。Tracer 从不返回错误：锁中毒时继续使用内部数据，缺失参数按默认值处理。

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::trace::{
    format_event, format_headline, is_key_visible, renders_as_child, Diagnostics, Event, FormatConfig,
    QueryRecord, Recorder,
};

/// Tracer 配置：会话 id、记录文件、实时渲染格式
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub session: String,
    pub record_file: Option<PathBuf>,
    pub live_format: FormatConfig,
}

impl TraceConfig {
    /// session 为 None 时生成随机 id
    pub fn new(session: Option<String>) -> Self {
        Self {
            session: session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            record_file: None,
            live_format: FormatConfig::silent(),
        }
    }

    pub fn with_record_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_file = Some(path.into());
        self
    }

    pub fn with_live_format(mut self, format: FormatConfig) -> Self {
        self.live_format = format;
        self
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Debug)]
struct Node {
    key: String,
    args: Map<String, Value>,
    children: Vec<usize>,
    time: DateTime<Utc>,
    level: usize,
    parent: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    config: TraceConfig,
    nodes: Mutex<Vec<Node>>,
    recorder: Recorder,
}

/// 绑定到单个事件的句柄（Clone 只复制句柄，不复制树）
#[derive(Debug, Clone)]
pub struct Tracer {
    shared: Arc<Shared>,
    node: usize,
}

/// 把任意参数值转为参数表：对象直接使用，其它值放在 "value" 键下
fn into_args(args: Value) -> Map<String, Value> {
    match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

impl Tracer {
    /// 新建一棵树，返回绑定到根事件（key = "root"，seq = 0）的句柄
    pub fn new(config: TraceConfig) -> Self {
        let recorder = Recorder::new(config.record_file.clone());
        let root = Node {
            key: "root".to_string(),
            args: Map::new(),
            children: Vec::new(),
            time: Utc::now(),
            level: 0,
            parent: None,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                nodes: Mutex::new(vec![root]),
                recorder,
            }),
            node: 0,
        }
    }

    fn nodes(&self) -> MutexGuard<'_, Vec<Node>> {
        self.shared.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &TraceConfig {
        &self.shared.config
    }

    pub fn session(&self) -> &str {
        &self.shared.config.session
    }

    /// 本句柄绑定事件的序号
    pub fn seq(&self) -> u64 {
        self.node as u64
    }

    pub fn key(&self) -> String {
        self.nodes()
            .get(self.node)
            .map(|n| n.key.clone())
            .unwrap_or_default()
    }

    /// 根事件句柄
    pub fn root(&self) -> Tracer {
        Tracer {
            shared: Arc::clone(&self.shared),
            node: 0,
        }
    }

    /// 追加子事件并返回绑定到子事件的新句柄
    ///
    /// - result / failed：把子事件参数复制到父事件，failed 还会在根事件上设置 flag_has_failed_event
    /// - query 下的 result：写一条查询记录
    pub fn on(&self, key: &str, args: Value) -> Tracer {
        let args = into_args(args);
        let (child, live, record) = {
            let mut nodes = self.nodes();
            let child = nodes.len();
            let (parent_key, level) = {
                let parent = &nodes[self.node];
                (parent.key.clone(), parent.level + 1)
            };
            nodes.push(Node {
                key: key.to_string(),
                args: args.clone(),
                children: Vec::new(),
                time: Utc::now(),
                level,
                parent: Some(self.node),
            });
            nodes[self.node].children.push(child);

            if key == "result" || key == "failed" {
                let parent = &mut nodes[self.node];
                for (k, v) in &args {
                    parent.args.insert(k.clone(), v.clone());
                }
            }
            if key == "failed" {
                nodes[0]
                    .args
                    .insert("flag_has_failed_event".to_string(), Value::Bool(true));
            }

            let record = (key == "result" && parent_key == "query")
                .then(|| self.query_record(&nodes, self.node));

            let live = live_line(&nodes, child, &self.shared.config.live_format);
            (child, live, record)
        };

        tracing::debug!(seq = child, key, "trace event");
        if let Some(line) = live {
            println!("{line}");
        }
        if let Some(record) = record {
            if let Err(e) = self.shared.recorder.record(&record) {
                tracing::warn!("Failed to persist query record: {}", e);
            }
        }

        Tracer {
            shared: Arc::clone(&self.shared),
            node: child,
        }
    }

    /// 在本事件上设置 / 覆盖一个参数
    pub fn add_arg(&self, name: &str, value: Value) {
        if let Some(node) = self.nodes().get_mut(self.node) {
            node.args.insert(name.to_string(), value);
        }
    }

    /// 读取本事件参数；缺失返回 Null
    pub fn arg(&self, name: &str) -> Value {
        self.nodes()
            .get(self.node)
            .and_then(|n| n.args.get(name).cloned())
            .unwrap_or(Value::Null)
    }

    /// 整棵树中是否出现过 failed 事件
    pub fn has_failed(&self) -> bool {
        self.nodes()[0]
            .args
            .get("flag_has_failed_event")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// 导出以本事件为根的子树快照
    pub fn export(&self) -> Event {
        snapshot(&self.nodes(), self.node)
    }

    /// 以 JSON 导出子树
    pub fn export_json(&self) -> Value {
        serde_json::to_value(self.export()).unwrap_or(Value::Null)
    }

    /// 按序号查找整棵树中的事件
    pub fn find(&self, seq: u64) -> Option<Event> {
        let nodes = self.nodes();
        let idx = usize::try_from(seq).ok().filter(|i| *i < nodes.len())?;
        Some(snapshot(&nodes, idx))
    }

    /// 渲染本子树
    pub fn format(&self, cfg: &FormatConfig) -> String {
        format_event(&self.export(), cfg)
    }

    /// 渲染以指定序号为根的子树
    pub fn format_seq(&self, seq: u64, cfg: &FormatConfig) -> String {
        match self.find(seq) {
            Some(event) => format_event(&event, cfg),
            None => format!("no such event with seq {seq}"),
        }
    }

    /// 父事件句柄（根返回 None）
    pub fn parent(&self) -> Option<Tracer> {
        let parent = self.nodes().get(self.node)?.parent?;
        Some(Tracer {
            shared: Arc::clone(&self.shared),
            node: parent,
        })
    }

    fn query_record(&self, nodes: &[Node], query: usize) -> QueryRecord {
        let event = snapshot(nodes, query);
        QueryRecord {
            session: self.shared.config.session.clone(),
            query: event.arg_str("user_question"),
            response: event.arg_str("result"),
            diagnostics: Diagnostics::from_query(&event, Utc::now()),
        }
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(TraceConfig::default())
    }
}

/// 事件在其 query 子树转储中是否输出：根下第一层按子树根判定，其余每一层都要作为子事件输出
fn renders_in_dump(nodes: &[Node], idx: usize, cfg: &FormatConfig) -> bool {
    let mut current = idx;
    while let Some(parent) = nodes[current].parent {
        let node = &nodes[current];
        let shown = if parent == 0 {
            is_key_visible(&node.key, "", cfg)
        } else {
            renders_as_child(&node.key, &nodes[parent].key, cfg)
        };
        if !shown {
            return false;
        }
        current = parent;
    }
    true
}

/// 新建事件的实时输出行；与 format_event 对所在子树的输出一致
fn live_line(nodes: &[Node], idx: usize, cfg: &FormatConfig) -> Option<String> {
    if idx == 0 || !renders_in_dump(nodes, idx, cfg) {
        return None;
    }
    format_headline(&snapshot(nodes, idx), nodes[idx].level, cfg)
}

fn snapshot(nodes: &[Node], idx: usize) -> Event {
    let node = &nodes[idx];
    Event {
        key: node.key.clone(),
        args: node.args.clone(),
        children: node.children.iter().map(|c| snapshot(nodes, *c)).collect(),
        time: node.time,
        seq: idx as u64,
        level: node.level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Recorder;
    use serde_json::json;

    #[test]
    fn test_on_returns_new_handle_and_keeps_caller() {
        let root = Tracer::default();
        let query = root.on("query", json!({"user_question": "q"}));
        let task = query.on("task", json!({"task": "t"}));
        assert_eq!(root.seq(), 0);
        assert_eq!(query.seq(), 1);
        assert_eq!(task.seq(), 2);
        assert_eq!(task.parent().map(|p| p.seq()), Some(1));
        let tree = root.export();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].children[0].level, 2);
    }

    #[test]
    fn test_result_copies_up() {
        let root = Tracer::default();
        let stage = root.on("stage_run_rate", json!({"name": "rate"}));
        stage.on("result", json!({"result": 0.9}));
        assert_eq!(stage.arg("result"), json!(0.9));
        assert!(!root.has_failed());
    }

    #[test]
    fn test_failed_sets_root_flag_from_any_depth() {
        let root = Tracer::default();
        let deep = root.on("query", json!({})).on("task", json!({})).on("toolrun", json!({}));
        deep.on(
            "failed",
            json!({"reason_code": "tool_error", "exception": "boom"}),
        );
        assert!(root.has_failed());
        assert_eq!(deep.arg("exception"), json!("boom"));
        assert_eq!(root.arg("flag_has_failed_event"), json!(true));
    }

    #[test]
    fn test_sequence_is_global_creation_order() {
        let root = Tracer::default();
        let a = root.on("a", json!({}));
        let b = root.on("b", json!({}));
        let a1 = a.on("a1", json!({}));
        b.add_arg("late", json!(1));
        assert_eq!((a.seq(), b.seq(), a1.seq()), (1, 2, 3));
        let seqs: Vec<u64> = root.export().walk().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 3, 2]);
    }

    #[test]
    fn test_export_round_trips_structurally() {
        let root = Tracer::default();
        let q = root.on("query", json!({"user_question": "q"}));
        q.on("task", json!({"task": "t"})).on("result", json!({"result": "r"}));
        q.on("result", json!({"result": "done"}));
        let exported = root.export();
        let back: Event = serde_json::from_value(root.export_json()).unwrap();
        assert_eq!(back, exported);
        let cfg = FormatConfig::full().plain();
        assert_eq!(format_event(&back, &cfg), root.format(&cfg));
    }

    #[test]
    fn test_query_result_persists_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let root = Tracer::new(TraceConfig::new(Some("sess".into())).with_record_file(&path));
        let q = root.on("query", json!({"user_question": "How?"}));
        q.on("task", json!({"task": "t"})).on("result", json!({"result": "not persisted"}));
        q.on("result", json!({"result": "Like this."}));
        let records = Recorder::load(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session, "sess");
        assert_eq!(records[0].query, "How?");
        assert_eq!(records[0].response, "Like this.");
        assert_eq!(records[0].diagnostics.counters.get("tasks"), Some(&1));
    }

    #[test]
    fn test_find_missing_seq() {
        let root = Tracer::default();
        assert!(root.find(42).is_none());
        assert_eq!(
            root.format_seq(42, &FormatConfig::default()),
            "no such event with seq 42"
        );
    }

    fn dumped_seqs(text: &str) -> Vec<usize> {
        text.lines()
            .filter_map(|l| l.split_whitespace().next())
            .filter_map(|t| t.strip_suffix(':'))
            .filter_map(|t| t.parse().ok())
            .collect()
    }

    #[test]
    fn test_live_output_follows_dump_rules() {
        let root = Tracer::default();
        let q = root.on("query", json!({"user_question": "q"}));
        let stage = q.on("stage_run_split", json!({"name": "split"}));
        stage.on("try", json!({"nr": 0})).on("llmcall", json!({"prompt": "p"}));
        stage.on("try", json!({"nr": 1})).on("llmcall", json!({"prompt": "p"}));
        stage.on("stage_result", json!({"result": []}));
        let task = q.on("task", json!({"task": "t"}));
        task.on("toolrun", json!({"tool": "calc"})).on("result", json!({"result": 1}));
        task.on("result", json!({"result": "one"}));
        q.on("result", json!({"result": "done"}));

        let configs = [
            FormatConfig::default().plain(),
            FormatConfig::verbose().plain(),
            FormatConfig::full().plain(),
            FormatConfig {
                show: vec!["query".into(), "task".into(), "llmcall".into()],
                ..FormatConfig::default()
            }
            .plain(),
        ];
        for cfg in configs {
            let nodes = root.nodes();
            let live: Vec<usize> = (0..nodes.len())
                .filter(|i| live_line(&nodes, *i, &cfg).is_some())
                .collect();
            drop(nodes);
            assert_eq!(live, dumped_seqs(&q.format(&cfg)), "{cfg:?}");
        }

        let nodes = root.nodes();
        let compact = FormatConfig::default().plain();
        assert!(live_line(&nodes, stage.seq() as usize, &compact).is_some());
        assert!(live_line(&nodes, 4, &compact).is_none());
    }

    #[test]
    fn test_non_object_args_are_wrapped() {
        let root = Tracer::default();
        let ev = root.on("note", json!("hello"));
        assert_eq!(ev.arg("value"), json!("hello"));
    }
}
