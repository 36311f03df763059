//! 执行树节点
//!
//! Event 是导出 / 渲染共用的唯一表示：实时渲染与 JSON 导出都基于同一个快照结构，保证两者结构一致。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 执行树中的一个事件（query / task / stage / toolrun / llmcall / try / result / failed ...）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    pub args: Map<String, Value>,
    pub children: Vec<Event>,
    pub time: DateTime<Utc>,
    /// 全树单调递增的序号（按创建顺序，根为 0）
    pub seq: u64,
    pub level: usize,
}

/// 事件类别：用于渲染与可见性过滤（stage_run_<name> 均归为 stage）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Query,
    Task,
    Stage,
    StageResult,
    ToolRun,
    LlmCall,
    Try,
    Result,
    Failed,
    Other,
}

pub const STAGE_RUN_PREFIX: &str = "stage_run_";

impl EventKind {
    pub fn of(key: &str) -> Self {
        match key {
            "query" => EventKind::Query,
            "task" => EventKind::Task,
            "stage_result" => EventKind::StageResult,
            "toolrun" => EventKind::ToolRun,
            "llmcall" => EventKind::LlmCall,
            "try" => EventKind::Try,
            "result" => EventKind::Result,
            "failed" => EventKind::Failed,
            k if k.starts_with(STAGE_RUN_PREFIX) => EventKind::Stage,
            _ => EventKind::Other,
        }
    }

    /// 可见性列表中使用的类别名
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Query => "query",
            EventKind::Task => "task",
            EventKind::Stage => "stage",
            EventKind::StageResult => "stage_result",
            EventKind::ToolRun => "toolrun",
            EventKind::LlmCall => "llmcall",
            EventKind::Try => "try",
            EventKind::Result => "result",
            EventKind::Failed => "failed",
            EventKind::Other => "other",
        }
    }

    /// 结果类事件：紧凑模式下默认隐藏
    pub fn is_outcome_detail(self) -> bool {
        matches!(
            self,
            EventKind::Result | EventKind::StageResult | EventKind::LlmCall
        )
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        EventKind::of(&self.key)
    }

    /// 读取字符串参数；缺失时返回空串
    pub fn arg_str(&self, name: &str) -> String {
        match self.args.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// 在子树中按序号查找（含自身）
    pub fn find(&self, seq: u64) -> Option<&Event> {
        if self.seq == seq {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(seq))
    }

    /// 深度优先（先序）遍历的所有事件
    pub fn walk(&self) -> Vec<&Event> {
        let mut out = vec![self];
        for c in &self.children {
            out.extend(c.walk());
        }
        out
    }

    /// 子树中 key 类别匹配的事件数
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.walk().into_iter().filter(|e| e.kind() == kind).count()
    }
}
