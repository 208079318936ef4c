//! Interactive chat with the MSTech site assistant.
//!
//! This binary provides a streaming REPL interface for the same agent the
//! site's chat widget talks to.
//!
//! # Usage
//!
//! ```bash
//! # DIFY_API_KEY must hold the agent's API token
//! mstech-chat
//!
//! # Talk to a self-hosted agent
//! mstech-chat --base-url http://localhost:5001/v1
//!
//! # Keep a transcript and disable colors
//! mstech-chat --transcript chat.json --no-color
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/clear` - Start a new conversation
//! - `/conversation` - Show the conversation id
//! - `/save <path>` - Save the transcript
//! - `/stats` - Show session statistics
//! - `/quit` - Exit the application
//!
//! Ctrl+C while an answer is streaming cancels it.

use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mstech::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, ExchangeOutcome, PlainTextRenderer, Renderer,
    help_text, parse_command,
};

/// Main entry point for the mstech-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mstech=error")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("mstech-chat [OPTIONS]");
    let config = ChatConfig::from(args);
    let use_color = config.use_color;

    let mut session = ChatSession::from_config(config)?;
    let mut renderer = PlainTextRenderer::with_color(use_color);
    let mut rl = DefaultEditor::new()?;

    // Token for the exchange in flight; Ctrl+C cancels it.
    let current = Arc::new(Mutex::new(CancellationToken::new()));
    let current_clone = current.clone();
    ctrlc::set_handler(move || {
        if let Ok(token) = current_clone.lock() {
            token.cancel();
        }
    })?;

    println!("MSTech Chat ({})", session.stats().base_url);
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => {
                            session.reset();
                            renderer.print_info("Started a new conversation.");
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ChatCommand::Conversation => match session.conversation_handle() {
                            Some(handle) => renderer.print_info(&format!("Conversation: {handle}")),
                            None => renderer.print_info("No conversation yet."),
                        },
                        ChatCommand::SaveTranscript(path) => {
                            match session.save_transcript_to(&path) {
                                Ok(_) => {
                                    renderer.print_info(&format!("Transcript saved to {}", path))
                                }
                                Err(err) => renderer
                                    .print_error(&format!("Failed to save transcript: {}", err)),
                            }
                        }
                        ChatCommand::Stats => {
                            print_stats(&session);
                        }
                        ChatCommand::Invalid(message) => {
                            renderer.print_error(&message);
                        }
                    }
                    continue;
                }

                let cancel = CancellationToken::new();
                if let Ok(mut slot) = current.lock() {
                    *slot = cancel.clone();
                }

                println!("Assistant:");
                if let Err(e) = session.send_streaming(line, &mut renderer, cancel).await {
                    renderer.print_error(&e.to_string());
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

fn print_stats(session: &ChatSession) {
    let stats = session.stats();
    println!("    Session Statistics:");
    println!("      Endpoint: {}", stats.base_url);
    println!("      User: {}", stats.user);
    println!(
        "      Conversation: {}",
        stats.conversation_id.as_deref().unwrap_or("(none)")
    );
    println!("      Turns: {}", stats.turn_count);
    println!(
        "      Exchanges: {} ({} failed, {} cancelled)",
        stats.exchanges, stats.failed_exchanges, stats.cancelled_exchanges
    );
    println!("      Fragments received: {}", stats.fragments);
    match stats.last_exchange {
        Some(ExchangeOutcome::Completed { fragments }) => {
            println!("      Last exchange: completed ({fragments} fragments)")
        }
        Some(ExchangeOutcome::Failed { ref reason, .. }) => {
            println!("      Last exchange: failed ({reason})")
        }
        Some(ExchangeOutcome::Cancelled { fragments }) => {
            println!("      Last exchange: cancelled after {fragments} fragments")
        }
        None => println!("      Last exchange: (none)"),
    }
    match stats.transcript_path {
        Some(ref path) => println!("      Transcript file: {}", path.display()),
        None => println!("      Transcript file: (disabled)"),
    }
}
