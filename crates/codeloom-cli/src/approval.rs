//! The interactive approval prompt: `y` approve, `n` deny, `d` show the full
//! diff again, `q` end the session.

use codeloom_core::ToolCall;
use codeloom_tools::{ApprovalDecision, ApprovalHandler, DiffPreview};
use crossterm::style::Stylize;
use std::io::{BufRead, Write};

pub struct TerminalApproval;

impl ApprovalHandler for TerminalApproval {
    fn approve(&self, call: &ToolCall, preview: Option<&DiffPreview>) -> ApprovalDecision {
        println!();
        println!("{} {}", "tool:".bold(), call.name.clone().yellow());
        for (key, value) in &call.args {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let shortened = if rendered.chars().count() > 120 {
                let head: String = rendered.chars().take(120).collect();
                format!("{head}…")
            } else {
                rendered
            };
            println!("  {key} = {shortened}");
        }
        if let Some(preview) = preview {
            render_preview(preview);
        }

        loop {
            print!("apply? [y/n/d/q] ");
            let _ = std::io::stdout().flush();
            let mut answer = String::new();
            if std::io::stdin().lock().read_line(&mut answer).is_err() {
                return ApprovalDecision::Denied;
            }
            match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return ApprovalDecision::Approved,
                "n" | "no" => return ApprovalDecision::Denied,
                "q" | "quit" => return ApprovalDecision::Quit,
                "d" => {
                    match preview {
                        Some(p) => render_full_diff(p),
                        None => println!("(no diff preview for this tool)"),
                    }
                    // fall through and re-prompt
                }
                _ => println!("please answer y, n, d, or q"),
            }
        }
    }
}

fn render_preview(preview: &DiffPreview) {
    if preview.new_file {
        println!("  {} ({} lines)", "new file".green(), preview.added);
        return;
    }
    match &preview.full_diff {
        Some(_) => render_full_diff(preview),
        None => println!(
            "  {} {}{} {}{}",
            preview.target.clone().bold(),
            "+".green(),
            preview.added,
            "-".red(),
            preview.removed
        ),
    }
}

fn render_full_diff(preview: &DiffPreview) {
    let Some(diff) = &preview.full_diff else {
        println!(
            "  {} {}{} {}{}",
            preview.target.clone().bold(),
            "+".green(),
            preview.added,
            "-".red(),
            preview.removed
        );
        return;
    };
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            println!("{}", line.bold());
        } else if line.starts_with("@@") {
            println!("{}", line.cyan());
        } else if line.starts_with('+') {
            println!("{}", line.green());
        } else if line.starts_with('-') {
            println!("{}", line.red());
        } else {
            println!("{line}");
        }
    }
}
