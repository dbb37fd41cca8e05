//! bee-engine - 命令行入口
//!
//! 初始化配置与日志、构建引擎、启动编排循环与 Ctrl+C 监听线程。
//! 带参数时把参数拼成一条输入执行一次；否则进入逐行 REPL（exit / quit 退出，/reset 清空会话）。
//!
//! ```bash
//! bee-engine --always-ask "list the rust files and summarize them"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bee_engine::config::{load_config, AppConfig};
use bee_engine::core::{
    spawn_interrupt_listener, spawn_orchestrator, Command, EngineBuilder, OrchestratorHandle,
    PermissionMode, StdinPrompter,
};
use bee_engine::hooks::EngineEvent;
use bee_engine::observability;
use bee_engine::react::{RunResult, RunStatus};

const USAGE: &str = "Usage: bee-engine [--config <file>] [--always-ask | --auto-approve-all | --dangerously-skip-permissions] [prompt...]";

/// 命令行参数
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    config: Option<PathBuf>,
    mode: Option<PermissionMode>,
    prompt: Vec<String>,
    help: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dangerously-skip-permissions" => parsed.mode = Some(PermissionMode::SkipAll),
            "--auto-approve-all" => parsed.mode = Some(PermissionMode::AutoApproveAll),
            "--always-ask" => parsed.mode = Some(PermissionMode::AlwaysAsk),
            "--config" | "-c" => {
                let path = args.next().context("--config requires a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => parsed.help = true,
            "--" => parsed.prompt.extend(args.by_ref()),
            flag if flag.starts_with("--") => anyhow::bail!("unknown flag: {flag}\n{USAGE}"),
            _ => parsed.prompt.push(arg),
        }
    }
    Ok(parsed)
}

/// 把引擎事件渲染到 stderr（工具调用与结果）
fn render_event(event: &EngineEvent) {
    match event {
        EngineEvent::ToolSelected { tool, input, .. } => eprintln!("  -> {tool} {input}"),
        EngineEvent::ToolResult { tool, success, preview, .. } => {
            let mark = if *success { "ok" } else { "error" };
            let first_line = preview.lines().next().unwrap_or("");
            eprintln!("  <- {tool} [{mark}] {first_line}");
        }
        EngineEvent::ToolDenied { tool, reason, .. } => eprintln!("  xx {tool} denied: {reason}"),
        EngineEvent::Error { text } => eprintln!("  !! {text}"),
        _ => {}
    }
}

fn print_result(result: &RunResult) {
    match result.status {
        RunStatus::Completed => println!("{}", result.response.as_deref().unwrap_or("")),
        RunStatus::Cancelled => eprintln!("[cancelled] {}", result.error.as_deref().unwrap_or("")),
        RunStatus::Failed => eprintln!(
            "[failed after {} turns] {}",
            result.snapshot.turn,
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }
    tracing::debug!(
        turns = result.snapshot.turn,
        tool_calls = result.snapshot.tool_call_count,
        input_tokens = result.snapshot.tokens.input_tokens,
        output_tokens = result.snapshot.tokens.output_tokens,
        elapsed_ms = result.snapshot.elapsed_ms,
        "execution finished"
    );
}

/// 阻塞读取一行（在 blocking 线程上，与权限询问共用同一 stdin）
async fn read_line(prompt: &'static str) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(prompt.as_bytes());
        let _ = stdout.flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    })
    .await
    .ok()
    .flatten()
}

async fn submit(handle: &mut OrchestratorHandle, input: String) -> anyhow::Result<Option<RunResult>> {
    handle
        .commands
        .send(Command::Submit(input))
        .context("orchestrator stopped")?;
    Ok(handle.results.recv().await)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    }

    let mut cfg = load_config(args.config.clone()).unwrap_or_else(|e| {
        eprintln!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    observability::init(&cfg.logging.level);
    if let Some(mode) = args.mode {
        cfg.permissions.mode = mode;
    }
    tracing::info!(mode = ?cfg.permissions.mode, max_turns = cfg.agent.max_turns, "starting bee-engine");

    let mut engine = EngineBuilder::new(cfg)
        .with_prompter(Arc::new(StdinPrompter))
        .build()
        .context("Failed to build engine")?;
    let mut events = engine.events_mut().subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            render_event(&event);
        }
    });

    let mut handle = spawn_orchestrator(engine);
    let _interrupt = spawn_interrupt_listener(handle.commands.clone())
        .context("Failed to start interrupt listener")?;

    let mut exit = ExitCode::SUCCESS;
    if !args.prompt.is_empty() {
        if let Some(result) = submit(&mut handle, args.prompt.join(" ")).await? {
            print_result(&result);
            if result.status != RunStatus::Completed {
                exit = ExitCode::FAILURE;
            }
        }
    } else {
        while let Some(line) = read_line("> ").await {
            let input = line.trim();
            match input {
                "" => continue,
                "exit" | "quit" => break,
                "/reset" => {
                    handle.commands.send(Command::Reset).context("orchestrator stopped")?;
                    println!("(session cleared)");
                }
                _ => match submit(&mut handle, input.to_string()).await? {
                    Some(result) => print_result(&result),
                    None => break,
                },
            }
        }
    }

    let _ = handle.commands.send(Command::Quit);
    handle.task.await.context("orchestrator task failed")?;
    Ok(exit)
}
