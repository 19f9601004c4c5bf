//! Interactive REPL over the ChatSync path.
//!
//! Uses `rustyline` for readline-style editing. History for the model is
//! kept in memory for the session only.

use anyhow::Result;
use rustyline::DefaultEditor;
use std::sync::Arc;

use evoclaw_agent::{ChatSyncRequest, Orchestrator};
use evoclaw_core::types::ChatMessage;

use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

fn is_exit_command(input: &str) -> bool {
    EXIT_COMMANDS.iter().any(|c| input.eq_ignore_ascii_case(c))
}

/// Send one message through ChatSync and print the reply.
pub async fn run_once(orchestrator: Arc<Orchestrator>, agent_id: &str, message: &str) -> Result<()> {
    let response = orchestrator
        .chat_sync(ChatSyncRequest {
            agent_id: agent_id.into(),
            user_id: "cli".into(),
            message: message.into(),
            history: vec![],
        })
        .await?;
    helpers::print_response(agent_id, &response.response);
    Ok(())
}

/// Run the interactive loop.
pub async fn run(orchestrator: Arc<Orchestrator>, agent_id: &str) -> Result<()> {
    helpers::print_banner();
    println!("  Agent: {agent_id} — type 'exit' to quit\n");

    let mut editor = DefaultEditor::new()?;
    let mut history: Vec<ChatMessage> = Vec::new();

    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                helpers::print_error(&format!("input error: {e}"));
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_exit_command(trimmed) {
            println!("\nGoodbye! 👋");
            break;
        }
        let _ = editor.add_history_entry(&input);

        let result = orchestrator
            .chat_sync(ChatSyncRequest {
                agent_id: agent_id.into(),
                user_id: "cli".into(),
                message: trimmed.into(),
                history: history.clone(),
            })
            .await;

        match result {
            Ok(response) => {
                history.push(ChatMessage::user(trimmed));
                history.push(ChatMessage::assistant(&response.response));
                helpers::print_response(agent_id, &response.response);
            }
            Err(e) => helpers::print_error(&e.to_string()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("QUIT"));
        assert!(is_exit_command("/exit"));
        assert!(is_exit_command(":q"));
        assert!(!is_exit_command("exit please"));
        assert!(!is_exit_command("hello"));
    }
}
