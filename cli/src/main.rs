mod client;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use client::ControlClient;
use shared::ipc::{Command, DragPhase, Response};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "avatarctl")]
#[command(about = "Inject UI events into a running avatar runtime (avatard)")]
struct Cli {
    /// Control socket of the runtime
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Press or release the talk control
    Talk {
        #[arg(value_enum)]
        action: TalkAction,
    },
    /// Keyboard press or release
    Key {
        key: String,
        #[arg(value_enum)]
        action: TalkAction,
        /// Key auto-repeat
        #[arg(long)]
        repeat: bool,
        /// Focus is inside a text field
        #[arg(long)]
        text_focus: bool,
    },
    /// Send typed text to the agent
    Send { text: String },
    /// Switch the active character
    Character { id: String },
    /// Update the agent's system prompt
    Persona { prompt: String },
    /// Play an agent reply's audio again
    Replay { url: String },
    /// Tap the avatar
    Tap { x: f32, y: f32 },
    /// Drag the avatar
    Drag {
        #[arg(value_enum)]
        phase: Phase,
        x: f32,
        y: f32,
    },
    /// Wheel zoom; positive deltas zoom out
    Zoom {
        #[arg(allow_hyphen_values = true)]
        delta: f32,
    },
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum TalkAction {
    Press,
    Release,
}

#[derive(Clone, Copy, ValueEnum)]
enum Phase {
    Down,
    Move,
    Up,
}

impl From<Phase> for DragPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Down => DragPhase::Down,
            Phase::Move => DragPhase::Move,
            Phase::Up => DragPhase::Up,
        }
    }
}

fn to_command(command: Commands) -> Command {
    match command {
        Commands::Talk {
            action: TalkAction::Press,
        } => Command::PressTalk,
        Commands::Talk {
            action: TalkAction::Release,
        } => Command::ReleaseTalk,
        Commands::Key {
            key,
            action,
            repeat,
            text_focus,
        } => Command::Key {
            key,
            pressed: matches!(action, TalkAction::Press),
            repeat,
            text_focus,
        },
        Commands::Send { text } => Command::SendText(text),
        Commands::Character { id } => Command::SelectCharacter(id),
        Commands::Persona { prompt } => Command::UpdatePersona(prompt),
        Commands::Replay { url } => Command::Replay(url),
        Commands::Tap { x, y } => Command::Tap { x, y },
        Commands::Drag { phase, x, y } => Command::Drag {
            phase: phase.into(),
            x,
            y,
        },
        Commands::Zoom { delta } => Command::Zoom { delta },
        Commands::Status => Command::Status,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ControlClient::new(cli.socket);

    match client.send_command(to_command(cli.command)).await {
        Ok(Response::Ok) => {
            println!("Success");
        }
        Ok(Response::Status(info)) => {
            println!("Status:");
            println!("  Connection: {}", info.connection);
            println!("  Recording: {}", info.recording);
            println!("  Speaking: {}", info.speaking);
            println!("  Character: {}", info.character.as_deref().unwrap_or("-"));
            println!("  Model: {}", info.model.as_deref().unwrap_or("-"));
        }
        Ok(Response::Error(msg)) => {
            eprintln!("Error: {}", msg);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to reach avatard: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
