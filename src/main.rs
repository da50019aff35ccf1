//! Chess-Arena: chess against a skill-tiered heuristic engine.
//!
//! ## Usage
//!
//! - `chess-arena` - Play a game in the terminal
//! - `chess-arena play --difficulty hard` - Play at a chosen tier
//! - `chess-arena worker` - Serve the engine protocol as JSON lines on stdio
//! - `chess-arena demo` - Watch the engine play itself

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shakmaty::{Color, Role, Square};
use tracing_subscriber::EnvFilter;

use chess_arena::difficulty::Difficulty;
use chess_arena::engine::{Engine, ThreadSpawner};
use chess_arena::game::{Game, GameConfig, GameSnapshot, TurnOutcome};
use chess_arena::protocol::ErrorCode;
use chess_arena::rules::{parse_square, promotion_from_san, Rules, StandardRules, Variant};
use chess_arena::worker;

/// Chess-Arena: play chess against a skill-tiered engine
#[derive(Parser)]
#[command(name = "chess-arena")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a game in the terminal (moves like e2e4, e7e8n)
    Play {
        #[arg(long, default_value = "casual")]
        difficulty: Difficulty,
        #[arg(long, default_value = "standard")]
        variant: Variant,
        /// No engine; both sides are played from the terminal
        #[arg(long)]
        human_vs_human: bool,
        /// The engine plays white
        #[arg(long)]
        engine_white: bool,
        /// Minutes on each clock
        #[arg(long, default_value_t = 5)]
        minutes: u64,
        /// Reply as soon as a move is chosen
        #[arg(long)]
        no_pacing: bool,
    },
    /// Serve the engine worker protocol over stdin/stdout
    Worker {
        #[arg(long)]
        no_pacing: bool,
    },
    /// Let the engine play itself
    Demo {
        #[arg(long, default_value = "casual")]
        difficulty: Difficulty,
        /// Stop after this many plies
        #[arg(long, default_value_t = 40)]
        plies: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Play {
            difficulty,
            variant,
            human_vs_human,
            engine_white,
            minutes,
            no_pacing,
        }) => {
            let engine_side = match (human_vs_human, engine_white) {
                (true, _) => None,
                (false, true) => Some(Color::White),
                (false, false) => Some(Color::Black),
            };
            let config = GameConfig {
                difficulty,
                variant,
                engine_side,
                clock: Duration::from_secs(minutes * 60),
                pacing: !no_pacing,
                ..GameConfig::default()
            };
            run_play(config).await
        }
        Some(Commands::Worker { no_pacing }) => {
            worker::serve(!no_pacing).context("worker I/O failed")
        }
        Some(Commands::Demo { difficulty, plies }) => run_demo(difficulty, plies).await,
        None => run_play(GameConfig::default()).await,
    }
}

// =============================================================================
// Terminal game
// =============================================================================

async fn run_play(config: GameConfig) -> Result<()> {
    let game = Game::new(config)?;
    println!("Chess-Arena. Moves like e2e4 or e7e8n; also hint, undo, pgn, new, quit.\n");

    if let Some(record) = game.engine_move().await? {
        println!("Engine plays {record}");
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print_board(&game.snapshot());
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let command = line.trim();

        match command {
            "" => continue,
            "quit" | "exit" => break,
            "undo" => {
                let undone = game.undo_pair();
                println!("Took back {} plies", undone.len());
            }
            "pgn" => println!("{}", game.export_pgn()),
            "new" => {
                game.new_game()?;
                if let Some(record) = game.engine_move().await? {
                    println!("Engine plays {record}");
                }
            }
            "hint" => match game.aids()?.best_move {
                Some(hint) => println!("Try {}", hint.san),
                None => println!("No moves available"),
            },
            text => {
                let (from, to, promotion) = match parse_move(text) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                match game.make_move_with_promotion(from, to, promotion).await {
                    Ok(TurnOutcome::Ignored) => println!("Move not accepted"),
                    Ok(TurnOutcome::Answered { reply, .. }) => println!("Engine plays {reply}"),
                    Ok(TurnOutcome::NoReply {
                        reason: ErrorCode::NoMove,
                        ..
                    }) => println!("Engine has no legal move"),
                    Ok(TurnOutcome::Flagged { side, .. }) => println!("{side:?} flag fell"),
                    Ok(_) => {}
                    Err(err) => println!("Engine error: {err}"),
                }
            }
        }
    }
    Ok(())
}

/// Parse `e2e4` or `e7e8q`.
fn parse_move(text: &str) -> Result<(Square, Square, Option<Role>)> {
    if !(4..=5).contains(&text.len()) || !text.is_ascii() {
        bail!("expected a move like e2e4, got {text:?}");
    }
    let from = parse_square(&text[0..2])?;
    let to = parse_square(&text[2..4])?;
    let promotion = match text[4..].chars().next() {
        None => None,
        Some(c) => match Role::from_char(c.to_ascii_lowercase()) {
            Some(role @ (Role::Queen | Role::Rook | Role::Bishop | Role::Knight)) => Some(role),
            _ => bail!("bad promotion piece {c:?}"),
        },
    };
    Ok((from, to, promotion))
}

fn print_board(snap: &GameSnapshot) {
    let placement = snap.fen.split(' ').next().unwrap_or_default();
    println!();
    for (i, row) in placement.split('/').enumerate() {
        let mut line = format!("{} ", 8 - i);
        for c in row.chars() {
            match c.to_digit(10) {
                Some(n) => (0..n).for_each(|_| line.push_str(" .")),
                None => {
                    line.push(' ');
                    line.push(c);
                }
            }
        }
        println!("{line}");
    }
    println!("   a b c d e f g h\n");

    println!(
        "White {}  Black {}{}",
        format_clock(snap.white_time),
        format_clock(snap.black_time),
        if snap.in_check { "  check" } else { "" }
    );
    if let Some(side) = snap.flagged {
        println!("{side:?} lost on time");
    } else if snap.status.is_over() {
        println!("Game over: {:?} ({})", snap.status, snap.status.result());
    } else {
        println!("{:?} to move", snap.turn);
    }
}

fn format_clock(left: Duration) -> String {
    let secs = left.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

// =============================================================================
// Demo
// =============================================================================

async fn run_demo(difficulty: Difficulty, plies: usize) -> Result<()> {
    println!("Chess-Arena self-play at {difficulty}\n");

    let spawner = ThreadSpawner { pacing: false };
    let white = Engine::spawn_with(difficulty, Variant::Standard, &spawner);
    let black = Engine::spawn_with(difficulty, Variant::Standard, &spawner);
    let mut rules = StandardRules::new();

    for _ in 0..plies {
        if rules.is_game_over() {
            break;
        }
        let engine = match rules.turn() {
            Color::White => &white,
            Color::Black => &black,
        };
        let reply = match engine.best_move(rules.fen()).await {
            Ok(reply) => reply,
            Err(err) if err.code == ErrorCode::NoMove => break,
            Err(err) => return Err(err).context("engine failed during demo"),
        };
        let Some(record) = rules.play(reply.from, reply.to, promotion_from_san(&reply.san)) else {
            bail!("engine proposed an illegal move: {}", reply.san);
        };
        println!("{:>3}. {record}", rules.history().len());
    }

    println!("\nStatus: {:?}\n", rules.status());
    println!("{}", rules.pgn());
    Ok(())
}
