//! Task submission commands: calculate-move, analyze-game.

use anyhow::{Context, Result};

use hexdist_core::task::{AnalyzeGameInput, CalculateMoveInput};

use super::http::{base_url, post_json_body};

pub async fn cmd_calculate_move(port: u16, input_json: &str) -> Result<()> {
    let input: CalculateMoveInput =
        serde_json::from_str(input_json).context("invalid calculate-move input")?;
    input.validate()?;

    let result: serde_json::Value =
        post_json_body(&format!("{}/calculate-move", base_url(port)), &input).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub async fn cmd_analyze_game(port: u16, size: &str, moves: &[&str]) -> Result<()> {
    let input = AnalyzeGameInput {
        moves_history: moves.join(" "),
        size: size.parse().context("board size must be a number")?,
    };
    input.validate()?;

    let slots: Vec<serde_json::Value> =
        post_json_body(&format!("{}/analyze-game", base_url(port)), &input).await?;

    println!("═══════════════════════════════════════");
    println!("  Game Analysis ({} moves)", slots.len());
    println!("═══════════════════════════════════════");
    for (i, slot) in slots.iter().enumerate() {
        if let Some(error) = slot.get("error").and_then(|e| e.as_str()) {
            println!("  {:>3}  failed: {}", i, error);
            continue;
        }
        let played = slot["move"]["move"].as_str().unwrap_or("?");
        let before = slot["whiteWin"].as_f64().unwrap_or(f64::NAN);
        let after = slot["move"]["whiteWin"].as_f64();
        let best = slot["bestMoves"][0]["move"].as_str().unwrap_or("-");
        match after {
            Some(after) => println!(
                "  {:>3}  {:<4} white {:.3} → {:.3}  best {}",
                i, played, before, after, best
            ),
            None => println!("  {:>3}  {:<4} white {:.3}  best {}", i, played, before, best),
        }
    }
    Ok(())
}
