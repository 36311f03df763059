//! Reactly CLI
//!
//! 带参数时回答一个问题并退出；无参数时进入 REPL（每行一个问题，/trace 打印上一次的事件树，/quit 退出）。
//! 查询失败时打印失败行、完整事件树与底层错误。

use std::io::{BufRead, Write};

use anyhow::Context;
use reactly::{
    config::load_config,
    llm::create_llm_from_config,
    observability,
    tools::{builtin_registry, BUILTIN_TOOLS},
    trace::{FormatConfig, Tracer},
    ReactlyAgent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let llm = create_llm_from_config(&cfg);
    let registry = builtin_registry(BUILTIN_TOOLS)?;
    let tracer = Tracer::new(cfg.trace.to_trace_config());
    let dump_format = FormatConfig {
        colored: cfg.trace.colored,
        elide_chars: cfg.trace.elide_chars,
        ..FormatConfig::full()
    };
    let mut agent =
        ReactlyAgent::new(llm, registry, &cfg, tracer).context("Failed to build agent")?;

    let question: Vec<String> = std::env::args().skip(1).collect();
    if !question.is_empty() {
        let ok = ask(&mut agent, &question.join(" "), &dump_format).await;
        if !ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    println!("reactly (tools: {})", agent.tool_names().join(", "));
    println!("Type a question, /trace for the last event tree, /quit to exit.");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/trace" => match agent.last_query() {
                Some(query) => println!("{}", query.format(&dump_format)),
                None => println!("no query yet"),
            },
            text => {
                ask(&mut agent, text, &dump_format).await;
            }
        }
    }
    Ok(())
}

/// 回答一个问题；失败时打印故障报告并返回 false
async fn ask(agent: &mut ReactlyAgent, text: &str, dump_format: &FormatConfig) -> bool {
    match agent.query(text).await {
        Ok(answer) => {
            println!("{answer}");
            true
        }
        Err(e) => {
            if let Some(report) = agent.failure_report(dump_format) {
                eprintln!("{report}");
            }
            eprintln!("Error: {e}");
            false
        }
    }
}
