//! hexdist-ctl: command-line interface for the hexdist scheduler.

use anyhow::{Context, Result};

mod cmd;

use cmd::peer::cmd_peer;
use cmd::status::cmd_status;
use cmd::tasks::{cmd_analyze_game, cmd_calculate_move};

const DEFAULT_PORT: u16 = 8088;

fn print_usage() {
    println!("hexdist-ctl — talk to a hexdist scheduler");
    println!();
    println!("USAGE:");
    println!("  hexdist-ctl [--port N] <command>");
    println!();
    println!("COMMANDS:");
    println!("  status                                  Peers and queue counts");
    println!("  calculate-move <json>                   Request a move, e.g.");
    println!("      '{{\"game\":{{\"size\":11,\"movesHistory\":\"a1\",\"currentPlayer\":\"white\",\"swapRule\":false}},");
    println!("        \"ai\":{{\"engine\":\"mohex\",\"maxGames\":1000}}}}'");
    println!("  analyze-game <size> <moves...>          Analyze every move of a game");
    println!("  peer <host:port> [--secondary] -- <program> [args...]");
    println!("                                          Serve jobs, piping each to <program>");
    println!("  help                                    Show this message");
    println!();
    println!("OPTIONS:");
    println!("  --port N    API port (default {})", DEFAULT_PORT);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option; everything after `--` is passed through untouched.
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--" {
            remaining.extend(args[i..].iter().map(String::as_str));
            break;
        }
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd_status(port).await,
        ["calculate-move", json] => cmd_calculate_move(port, json).await,
        ["analyze-game", size, moves @ ..] if !moves.is_empty() => {
            cmd_analyze_game(port, size, moves).await
        }
        ["peer", scheduler, "--secondary", "--", program, rest @ ..] => {
            cmd_peer(scheduler, true, program, rest).await
        }
        ["peer", scheduler, "--", program, rest @ ..] => {
            cmd_peer(scheduler, false, program, rest).await
        }
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
