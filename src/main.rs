//! delve - 对话式研究智能体
//!
//! 入口：加载配置、初始化日志、组装 GraphRunner，运行一个行式 REPL。
//! 运行挂起时打印 HITL 载荷，下一行输入作为 resume 值（JSON；不是合法 JSON 时按字符串处理）。
//! 命令：/new 开新线程，/retry 接着跑失败或中断的运行，/drop 放弃它，/quit 退出。

use std::io::Write;

use anyhow::Context;
use delve::agent::{create_runner, load_app_config};
use delve::graph::{GraphRunner, RunEvent, RunHooks, RunOutcome};
use delve::memory::Role;
use delve::AgentError;
use delve::observability;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn new_thread_id() -> String {
    format!("thread-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

fn prompt(label: &str) {
    print!("{label}> ");
    let _ = std::io::stdout().flush();
}

enum Input<'a> {
    Message(&'a str),
    Resume(&'a str),
    Retry,
}

async fn run_once(
    runner: &GraphRunner,
    thread_id: &str,
    input: Input<'_>,
) -> Result<RunOutcome, AgentError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            match ev {
                RunEvent::MessageChunk { text, .. } => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                RunEvent::MessageComplete { message } if !message.tool_calls.is_empty() => {
                    for tc in &message.tool_calls {
                        println!("\n[tool] {} {}", tc.name, tc.args);
                    }
                }
                RunEvent::MessageComplete { message } if message.role == Role::Tool => {
                    let name = message.name.as_deref().unwrap_or("tool");
                    let first = message.content.lines().next().unwrap_or_default();
                    println!("[{name}] {first}");
                }
                RunEvent::NodeStatus { node, status, subgraph: true } => {
                    println!("[research] {node} {status:?}");
                }
                RunEvent::Error { text } => eprintln!("\n[error] {text}"),
                _ => {}
            }
        }
    });

    let hooks = RunHooks::new().with_events(&tx);
    let result = match input {
        Input::Message(line) => runner.invoke(thread_id, line, None, hooks).await,
        Input::Resume(line) => {
            let value = serde_json::from_str::<Value>(line)
                .unwrap_or_else(|_| Value::String(line.to_string()));
            runner.resume(thread_id, value, hooks).await
        }
        Input::Retry => runner.continue_run(thread_id, hooks).await,
    };
    drop(tx);
    let _ = printer.await;
    result
}

fn show_interrupt(outcome: &RunOutcome) -> bool {
    let Some(interrupt) = outcome.interrupt() else {
        println!();
        return false;
    };
    let payload = &interrupt.payload;
    println!("\n== {} ({:?}) ==", payload.title(), payload.hitl_type());
    println!("{}", payload.message());
    if let Some(report) = payload.report() {
        println!("\n# {}\n{}", report.title, report.summary);
        for (i, f) in report.key_findings.iter().enumerate() {
            println!("  {}. {}", i + 1, f.insight);
        }
    }
    for opt in payload.options() {
        let mark = if opt.selected { "x" } else { " " };
        println!("  [{mark}] {} - {}", opt.id, opt.label);
    }
    println!("(reply with JSON, e.g. [\"topic_0\"] or {{\"action\": \"approve\"}})");
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_app_config(None).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);
    let runner = create_runner(&cfg).context("Failed to create runner")?;

    let name = cfg.app.name.clone().unwrap_or_else(|| "delve".to_string());
    let mut thread_id = new_thread_id();
    let mut suspended = false;
    println!("{name} ready (thread {thread_id}). /new starts a new thread, /quit exits.");
    println!("tools: {}", runner.deps().tools.tool_names().join(", "));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt("you");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" | "/exit" => break,
            "/new" => {
                thread_id = new_thread_id();
                suspended = false;
                println!("new thread {thread_id}");
            }
            "/drop" => match runner.abandon_run(&thread_id).await {
                Ok(closed) => {
                    suspended = false;
                    println!("run dropped ({closed} pending tool calls closed)");
                }
                Err(e) => eprintln!("{e}"),
            },
            _ => {
                let input = match line {
                    "/retry" => Input::Retry,
                    _ if suspended => Input::Resume(line),
                    _ => Input::Message(line),
                };
                match run_once(&runner, &thread_id, input).await {
                    Ok(outcome) => suspended = show_interrupt(&outcome),
                    Err(AgentError::RunUnfinished(_)) => {
                        eprintln!("the previous run stopped midway; /retry to continue it or /drop to abandon it")
                    }
                    Err(e) => eprintln!("run failed: {e}"),
                }
            }
        }
        prompt(if suspended { "resume" } else { "you" });
    }
    Ok(())
}
