//! Line-oriented chat for terminals where the full TUI is unwanted.

use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::completion::CompletionApi;
use crate::error::ChatError;
use crate::session::SessionController;
use crate::state::{Role, Transcript};

/// What a line of REPL input asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput {
    Quit,
    Clear,
    History,
    Empty,
    Message(String),
}

pub fn parse_input(line: &str) -> ReplInput {
    let trimmed = line.trim();
    match trimmed.to_lowercase().as_str() {
        "quit" | "exit" | "bye" => ReplInput::Quit,
        "clear" => ReplInput::Clear,
        "history" => ReplInput::History,
        "" => ReplInput::Empty,
        _ => ReplInput::Message(trimmed.to_string()),
    }
}

pub fn format_history(transcript: &Transcript) -> String {
    if transcript.is_empty() {
        return "No conversation history.".to_string();
    }

    let mut out = String::from("--- Conversation History ---\n");
    for (i, turn) in transcript.turns().iter().enumerate() {
        let who = match turn.role {
            Role::User => "You",
            Role::Assistant => "Bot",
        };
        out.push_str(&format!("{}. {}: {}\n\n", i + 1, who, turn.content));
    }
    out
}

fn print_banner() {
    println!("{}", "🤖 DeepSeek ChatBot".bold().cyan());
    println!("{}", "================".dimmed());
    println!("Type '{}' to exit", "quit".bold());
    println!("Type '{}' to clear conversation history", "clear".bold());
    println!("Type '{}' to show conversation history", "history".bold());
    println!("Type your message and press Enter to chat!\n");
}

pub async fn run(session: &mut SessionController, api: &dyn CompletionApi) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    print_banner();

    loop {
        let line = match editor.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("\n👋 Goodbye!");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        match parse_input(&line) {
            ReplInput::Quit => {
                println!("👋 Goodbye!");
                break;
            }
            ReplInput::Clear => {
                session.new_session(|| true);
                println!("{}", "Conversation history cleared!".yellow());
            }
            ReplInput::History => println!("{}", format_history(session.transcript())),
            ReplInput::Empty => println!("Please enter a message."),
            ReplInput::Message(text) => {
                let _ = editor.add_history_entry(text.as_str());
                match session.submit(api, &text).await {
                    Ok(_) => {
                        if let Some(reply) = session.transcript().last() {
                            println!("{} {}\n", "Bot:".bold().green(), reply.content);
                        }
                    }
                    Err(e @ ChatError::Configuration(_)) => {
                        println!("{}", e.to_string().red());
                        println!(
                            "Set it with {} or pass {}",
                            "deepseek-chat chat (Ctrl+S)".bold(),
                            "--api-key".bold()
                        );
                    }
                    Err(e) => println!("{}", format!("An error occurred: {}", e).red()),
                }
            }
        }
    }

    Ok(())
}
