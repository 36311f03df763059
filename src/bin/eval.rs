//! Reactly 评测程序：reactly-eval <examples.jsonl> [timeout_secs]
//!
//! 每行一个 {"question", "expected", "tools"?} 样例；逐条输出结果 JSON，最后输出汇总 JSON。

use std::time::Duration;

use anyhow::{bail, Context};
use reactly::{
    config::load_config,
    eval::{load_examples, run_evaluation},
    llm::create_llm_from_config,
    observability,
    trace::Tracer,
};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_with_default("info");

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: reactly-eval <examples.jsonl> [timeout_secs]");
    };
    let timeout_secs = match args.next() {
        Some(s) => s.parse().with_context(|| format!("invalid timeout '{s}'"))?,
        None => DEFAULT_TIMEOUT_SECS,
    };

    let cfg = load_config(None).context("Failed to load config")?;
    let examples = load_examples(&path).with_context(|| format!("Failed to read {path}"))?;
    let llm = create_llm_from_config(&cfg);
    let tracer = Tracer::new(cfg.trace.to_trace_config());

    let (outcomes, summary) = run_evaluation(
        &examples,
        llm,
        &cfg,
        &tracer,
        Duration::from_secs(timeout_secs),
    )
    .await?;

    for outcome in &outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
