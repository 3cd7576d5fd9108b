mod approval;

use anyhow::{Context, Result};
use approval::TerminalApproval;
use clap::{Parser, Subcommand};
use codeloom_agent::{FinishReason, Orchestrator, OrchestratorConfig, analysis::DependencyGraph};
use codeloom_core::config::{UserConfig, WorkspaceConfig, history_file_path};
use codeloom_core::{ExecutionContext, SafetyMode};
use codeloom_llm::{HttpLlmClient, LlmClient, LlmSettings, OfflineClient};
use codeloom_mcp::{McpManager, manager::launcher_report};
use codeloom_observe::Observer;
use codeloom_policy::SafetyPolicy;
use codeloom_tools::{
    BackupStore, CommandRunner, ToolContext, ToolExecutor, ToolRegistry, builtin_tools,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "codeloom")]
#[command(about = "Interactive CLI coding agent", long_about = None)]
struct Cli {
    /// Safety mode: dry-run, review, or auto-apply.
    #[arg(long, global = true)]
    mode: Option<String>,
    #[arg(long, global = true)]
    verbose: bool,
    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session (the default).
    Chat,
    /// One prompt, one answer, exit.
    Ask { prompt: String },
    /// List available tools, including discovered MCP tools.
    Tools,
    /// Show configured MCP servers and their launcher status.
    Mcp,
    /// Files affected by modifying the given workspace-relative path.
    Impact { path: String },
    /// List models offered by the configured endpoint.
    Models,
}

struct Session {
    orchestrator: Orchestrator,
    mcp: McpManager,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    let mode = cli
        .mode
        .as_deref()
        .map(SafetyMode::from_str_lossy)
        .unwrap_or_else(SafetyMode::from_env);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let mut session = build_session(&workspace, mode, cli.verbose, true)?;
            run_repl(&mut session)?;
            session.mcp.shutdown();
        }
        Commands::Ask { prompt } => {
            let mut session = build_session(&workspace, mode, cli.verbose, false)?;
            let outcome = session.orchestrator.run_turn(&prompt)?;
            println!("{}", outcome.final_response);
            session.mcp.shutdown();
        }
        Commands::Tools => {
            let session = build_session(&workspace, mode, cli.verbose, false)?;
            for tool in session.orchestrator.definitions() {
                let marker = if tool.safe { "safe" } else { "unsafe" };
                println!("{:<24} [{marker}] {}", tool.name, tool.description);
            }
            session.mcp.shutdown();
        }
        Commands::Mcp => {
            let config = WorkspaceConfig::load(&workspace)?;
            if config.mcp_servers.is_empty() {
                println!("no MCP servers configured in .codeloom.yml");
            }
            for (name, launcher, safe) in launcher_report(&config.mcp_servers) {
                let status = if safe { "safe launcher" } else { "needs confirmation" };
                println!("{name:<20} {launcher:<12} {status}");
            }
        }
        Commands::Impact { path } => {
            let graph = DependencyGraph::build(&workspace);
            let impacted = graph.impact_of(&path);
            if impacted.is_empty() {
                println!("nothing in the workspace imports {path}");
            } else {
                for file in impacted {
                    println!("{file}");
                }
            }
        }
        Commands::Models => {
            let llm = build_llm()?;
            for model in llm.list_models()? {
                println!("{model}");
            }
        }
    }
    Ok(())
}

fn build_llm() -> Result<Arc<dyn LlmClient>> {
    let user_config = UserConfig::load().unwrap_or_default();
    let settings = LlmSettings::from_user_config(&user_config);
    if settings.api_key.is_none() {
        eprintln!(
            "[codeloom] no API key configured ({}); running with the offline client",
            codeloom_llm::API_KEY_ENV
        );
        return Ok(Arc::new(OfflineClient));
    }
    Ok(Arc::new(HttpLlmClient::new(settings)?))
}

fn build_session(
    workspace: &PathBuf,
    mode: SafetyMode,
    verbose: bool,
    interactive: bool,
) -> Result<Session> {
    let workspace_config = WorkspaceConfig::load(workspace)?;
    let mut observer = Observer::new(workspace)?;
    observer.set_verbose(verbose);
    let observer = Arc::new(observer);

    let ctx = ExecutionContext {
        workspace: workspace.clone(),
        mode,
        verbose,
    };
    let backups = Arc::new(BackupStore::new());
    let tool_context = Arc::new(ToolContext {
        ctx: ctx.clone(),
        runner: CommandRunner::new(workspace, SafetyPolicy::new(mode)),
        backups: backups.clone(),
    });

    let mut registry = ToolRegistry::new();
    for tool in builtin_tools(&tool_context) {
        registry
            .register(tool)
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    }

    let confirm = |server: &str, command: &str| -> bool {
        print!("MCP server '{server}' uses launcher '{command}', which is not on the safe list. Start it? [y/N] ");
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    };
    let mcp = if interactive {
        McpManager::start(&workspace_config, &mut registry, Some(&confirm))
    } else {
        McpManager::start(&workspace_config, &mut registry, None)
    };
    for warning in mcp.warnings() {
        observer.warn(warning);
    }

    let registry = Arc::new(registry);
    let mut executor = ToolExecutor::new(registry.clone(), ctx);
    if interactive {
        executor = executor.with_approval(Arc::new(TerminalApproval));
    }

    let llm = build_llm()?;
    let system_prompt = format!(
        "You are codeloom, an interactive coding agent. You operate on the \
         workspace at {} and nothing outside it. Use the available tools to \
         read, modify, and verify code; explain what you did when you finish.",
        workspace.display()
    );
    let mut orchestrator = Orchestrator::new(
        llm,
        registry,
        executor,
        backups,
        workspace_config,
        workspace,
        &system_prompt,
        OrchestratorConfig::default(),
    )
    .with_observer(observer);

    if interactive {
        orchestrator.set_stream_callback(Box::new(|chunk| {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }));
    }

    Ok(Session { orchestrator, mcp })
}

fn run_repl(session: &mut Session) -> Result<()> {
    println!(
        "codeloom {} | mode: {} (/help for commands)",
        env!("CARGO_PKG_VERSION"),
        session.orchestrator.mode()
    );
    let stdin = std::io::stdin();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        append_history(input);

        if let Some(command) = input.strip_prefix('/') {
            if handle_slash_command(session, command)? {
                break;
            }
            continue;
        }

        let outcome = session.orchestrator.run_turn(input)?;
        println!();
        match outcome.finish_reason {
            FinishReason::Stop | FinishReason::DryRun => {
                // Streaming already printed the text; repeat it only when
                // nothing streamed (non-interactive fallbacks).
                if outcome.final_response.is_empty() {
                    println!("(no response)");
                }
            }
            FinishReason::UserQuit => break,
            other => println!("[{other:?}] {}", outcome.final_response),
        }
    }
    Ok(())
}

/// Returns true when the session should end.
fn handle_slash_command(session: &mut Session, command: &str) -> Result<bool> {
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "quit" | "exit" => return Ok(true),
        "mode" => match parts.next() {
            Some(raw) => {
                let mode = SafetyMode::from_str_lossy(raw);
                session.orchestrator.set_mode(mode);
                println!("mode set to {mode}");
            }
            None => println!("mode: {}", session.orchestrator.mode()),
        },
        "tools" => {
            for tool in session.orchestrator.definitions() {
                let marker = if tool.safe { "safe" } else { "unsafe" };
                println!("{:<24} [{marker}] {}", tool.name, tool.description);
            }
        }
        "help" => {
            println!("/mode [dry-run|review|auto-apply]  show or change the safety mode");
            println!("/tools                             list available tools");
            println!("/quit                              end the session");
        }
        other => println!("unknown command: /{other}"),
    }
    Ok(false)
}

fn append_history(line: &str) {
    let Some(path) = history_file_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| writeln!(f, "{line}"));
}
