//! 追踪层：执行树事件、不可变 Tracer 句柄、渲染与查询记录持久化

pub mod event;
pub mod format;
pub mod recorder;
pub mod tracer;

pub use event::{Event, EventKind, STAGE_RUN_PREFIX};
pub use format::{
    elide, format_event, format_failed_message, format_headline, format_json_line,
    is_key_visible, is_visible, renders_as_child, FormatConfig, SHOW_ALL,
};
pub use recorder::{Diagnostics, QueryRecord, Recorder};
pub use tracer::{TraceConfig, Tracer};
