//! 执行树渲染
//!
//! 头行格式：`<seq>: <缩进>* <key>` + 按类别追加的细节（问题文本、stage 名与结果、工具名与结果、失败原因）。
//! 长文本按字符预算省略中段；缺失参数一律渲染为空串。

use crossterm::style::{Color, Stylize};
use serde_json::Value;

use crate::trace::{Event, EventKind};

/// 可见性列表中表示「全部显示」的标记
pub const SHOW_ALL: &str = "_all";

/// 渲染配置：颜色、紧凑模式、可见事件列表、省略预算
#[derive(Debug, Clone, PartialEq)]
pub struct FormatConfig {
    pub colored: bool,
    /// 紧凑模式下隐藏 result / llmcall 子事件（除非显式列入 show）
    pub compact: bool,
    pub show: Vec<String>,
    pub elide_chars: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            colored: true,
            compact: true,
            show: vec![SHOW_ALL.to_string()],
            elide_chars: 500,
        }
    }
}

impl FormatConfig {
    /// 不显示任何事件（实时渲染默认值）
    pub fn silent() -> Self {
        Self {
            show: Vec::new(),
            ..Self::default()
        }
    }

    /// 显示主要事件与 LLM 调用
    pub fn verbose() -> Self {
        Self {
            show: ["query", "stage", "task", "toolrun", "try", "llmcall", "failed", "result"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..Self::default()
        }
    }

    /// 显示全部细节（含 prompt），用于失败后的完整转储
    pub fn full() -> Self {
        Self {
            compact: false,
            ..Self::default()
        }
    }

    pub fn plain(mut self) -> Self {
        self.colored = false;
        self
    }

    pub fn should_show(&self, key: &str) -> bool {
        self.show.iter().any(|s| s == SHOW_ALL) || self.lists(key)
    }

    /// key（或其类别名）显式出现在列表中；"_all" 不算
    pub fn lists(&self, key: &str) -> bool {
        let kind = EventKind::of(key).name();
        self.show.iter().any(|s| s == key || s == kind)
    }

    pub fn paint(&self, text: String, color: Color) -> String {
        if self.colored {
            text.with(color).to_string()
        } else {
            text
        }
    }
}

/// 单行 JSON 文本，超过 max_chars 时保留首尾各一半
pub fn format_json_line(value: Option<&Value>, max_chars: usize) -> String {
    let text = match value {
        None | Some(Value::Null) => return String::new(),
        Some(v) => v.to_string(),
    };
    elide(&text, max_chars)
}

/// 按字符数省略中段
pub fn elide(text: &str, max_chars: usize) -> String {
    let len = text.chars().count();
    if len <= max_chars {
        return text.to_string();
    }
    let half = max_chars / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(len - half).collect();
    format!("{head}.....{tail}")
}

/// failed 事件的消息：`<reason>: <message>, <tries> tries, errtype <type>`
pub fn format_failed_message(event: &Event) -> String {
    let reason = event.arg_str("reason_code");
    let message = event.arg_str("exception");
    let tries = event.arg_str("tries");
    let errtype = event.arg_str("errtype");

    let mut out = reason.clone();
    if !reason.is_empty() && !message.is_empty() {
        out.push_str(": ");
    }
    out.push_str(&message);
    if !tries.is_empty() {
        out.push_str(&format!(", {tries} tries"));
    }
    if !message.is_empty() && !errtype.is_empty() {
        out.push_str(&format!(", errtype {errtype}"));
    }
    out
}

fn prefixed_lines(prefix: &str, text: &str) -> String {
    text.lines()
        .map(|l| format!("{prefix}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 单个事件的头行与细节（不含子事件）；返回 None 表示该事件不产生输出
pub fn format_headline(event: &Event, level: usize, cfg: &FormatConfig) -> Option<String> {
    let indent = "  ".repeat(level);
    let seq = format!("{}:", event.seq);
    let base = format!("{seq:<4} {indent}* {}", event.key);
    let budget = cfg.elide_chars;

    let line = match event.kind() {
        EventKind::Query => format!(
            "{base} {}",
            cfg.paint(
                format_json_line(event.args.get("user_question"), budget),
                Color::Yellow
            )
        ),
        EventKind::Task => format!(
            "{base} {}",
            cfg.paint(format_json_line(event.args.get("task"), budget), Color::Yellow)
        ),
        EventKind::Stage => format!(
            "{base} {} => {}",
            cfg.paint(format!("'{}'", event.arg_str("name")), Color::Yellow),
            format_json_line(event.args.get("result"), budget)
        ),
        EventKind::ToolRun => format!(
            "{base} {} => {}",
            cfg.paint(format!("'{}'", event.arg_str("tool")), Color::Yellow),
            format_json_line(event.args.get("result"), budget)
        ),
        EventKind::Try => {
            let nr = event.args.get("nr").and_then(Value::as_u64).unwrap_or(0);
            if nr == 0 {
                return None;
            }
            cfg.paint(format!("{seq:<4} {indent}* retry: {nr}"), Color::Red)
        }
        EventKind::LlmCall => {
            if cfg.compact {
                base
            } else {
                let mut out = base;
                for (prefix, name) in [("    => ", "sys_prompt"), ("    -> ", "prompt"), ("    <- ", "response")] {
                    let text = event.arg_str(name);
                    if !text.is_empty() {
                        out.push('\n');
                        out.push_str(&prefixed_lines(prefix, &text));
                    }
                }
                out
            }
        }
        EventKind::Result | EventKind::StageResult => {
            let text = match event.args.get("result") {
                Some(Value::String(s)) => elide(s, budget),
                other => format_json_line(other, budget),
            };
            format!("{base}: {}", text.replace('\n', "\n    -> "))
        }
        EventKind::Failed => cfg.paint(
            format!("{base}: {}", format_failed_message(event)),
            Color::Red,
        ),
        EventKind::Other => base,
    };
    Some(line)
}

/// 渲染整棵子树；子事件是否输出由 renders_as_child 决定，与实时渲染共用同一判定
pub fn format_event(event: &Event, cfg: &FormatConfig) -> String {
    let mut lines = Vec::new();
    if is_visible(event, "", cfg) {
        format_into(event, event.level, cfg, &mut lines);
    }
    lines.join("\n")
}

fn format_into(event: &Event, level: usize, cfg: &FormatConfig, lines: &mut Vec<String>) {
    if let Some(line) = format_headline(event, level, cfg) {
        lines.push(line);
    }
    for child in &event.children {
        if renders_as_child(&child.key, &event.key, cfg) {
            format_into(child, level + 1, cfg, lines);
        }
    }
}

/// 作为 parent_key 的子事件时是否输出：可见，且紧凑模式下 result / stage_result / llmcall
/// 只有显式列入 show 才输出
pub fn renders_as_child(key: &str, parent_key: &str, cfg: &FormatConfig) -> bool {
    if EventKind::of(key).is_outcome_detail() && cfg.compact && !cfg.lists(key) {
        return false;
    }
    is_key_visible(key, parent_key, cfg)
}

/// 可见性：key 在列表中；result 类事件还要求父事件可见
pub fn is_visible(event: &Event, parent_key: &str, cfg: &FormatConfig) -> bool {
    is_key_visible(&event.key, parent_key, cfg)
}

/// 按 key 判定可见性
pub fn is_key_visible(key: &str, parent_key: &str, cfg: &FormatConfig) -> bool {
    if !cfg.should_show(key) {
        return false;
    }
    match EventKind::of(key) {
        EventKind::Result | EventKind::StageResult if !parent_key.is_empty() => {
            cfg.should_show(parent_key)
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Map};

    fn event(key: &str, seq: u64, level: usize, args: Value) -> Event {
        Event {
            key: key.to_string(),
            args: args.as_object().cloned().unwrap_or_else(Map::new),
            children: Vec::new(),
            time: Utc::now(),
            seq,
            level,
        }
    }

    #[test]
    fn test_elide_keeps_head_and_tail() {
        assert_eq!(elide("abcdefghij", 4), "ab.....ij");
        assert_eq!(elide("short", 10), "short");
    }

    #[test]
    fn test_query_headline() {
        let ev = event("query", 1, 1, json!({"user_question": "Is 20 larger than 3?"}));
        let line = format_headline(&ev, 1, &FormatConfig::default().plain()).unwrap();
        assert_eq!(line, "1:     * query \"Is 20 larger than 3?\"");
    }

    #[test]
    fn test_failed_message_format() {
        let ev = event(
            "failed",
            5,
            2,
            json!({"reason_code": "decode_exhausted", "exception": "bad json", "tries": 3, "errtype": "DecodeError"}),
        );
        assert_eq!(
            format_failed_message(&ev),
            "decode_exhausted: bad json, 3 tries, errtype DecodeError"
        );
    }

    #[test]
    fn test_missing_args_render_as_empty() {
        let ev = event("toolrun", 3, 0, json!({}));
        let line = format_headline(&ev, 0, &FormatConfig::default().plain()).unwrap();
        assert_eq!(line, "3:   * toolrun '' => ");
    }

    #[test]
    fn test_result_hidden_when_parent_hidden() {
        let cfg = FormatConfig {
            show: vec!["result".to_string()],
            ..FormatConfig::default()
        };
        let res = event("result", 2, 2, json!({"result": "x"}));
        assert!(!is_visible(&res, "task", &cfg));
        let cfg = FormatConfig {
            show: vec!["result".to_string(), "task".to_string()],
            ..FormatConfig::default()
        };
        assert!(is_visible(&res, "task", &cfg));
    }

    #[test]
    fn test_stage_kind_matches_show_list() {
        let cfg = FormatConfig {
            show: vec!["stage".to_string()],
            ..FormatConfig::default()
        };
        assert!(cfg.should_show("stage_run_split"));
        assert!(!cfg.should_show("task"));
    }

    #[test]
    fn test_compact_hides_llmcall_children() {
        let mut stage = event("stage_run_rate", 1, 0, json!({"name": "rate", "result": 0.9}));
        stage.children.push(event("llmcall", 2, 1, json!({"prompt": "p"})));
        stage.children.push(event("stage_result", 3, 1, json!({"result": 0.9})));
        let compact = format_event(&stage, &FormatConfig::default().plain());
        assert_eq!(compact.lines().count(), 1);
        let full = format_event(&stage, &FormatConfig::full().plain());
        assert!(full.contains("* llmcall"));
        assert!(full.contains("    -> p"));
        assert!(full.contains("* stage_result: 0.9"));
    }

    #[test]
    fn test_compact_shows_details_listed_explicitly() {
        let mut stage = event("stage_run_rate", 1, 0, json!({"name": "rate", "result": 0.9}));
        stage.children.push(event("llmcall", 2, 1, json!({"prompt": "p"})));
        stage.children.push(event("stage_result", 3, 1, json!({"result": 0.9})));
        let cfg = FormatConfig {
            show: vec![SHOW_ALL.to_string(), "llmcall".to_string()],
            ..FormatConfig::default()
        }
        .plain();
        let out = format_event(&stage, &cfg);
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("* llmcall"));
        assert!(!out.contains("stage_result"));
    }
}
