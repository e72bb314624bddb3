//! Task model: what gets queued, dispatched to peers, and returned.
//!
//! The scheduler treats a [`WorkerTask`] as an opaque payload. The types here
//! exist so that the API layer can validate requests and the composite
//! coordinator can split and merge game analyses.

use serde::{Deserialize, Serialize};

// ── Results ───────────────────────────────────────────────────────────────────

/// Outcome of one task, as returned by a peer.
///
/// Wire shape: `{"success": true, "data": ...}` or
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResultRepr", into = "ResultRepr")]
pub enum JobResult {
    Success(serde_json::Value),
    Failure(String),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }
}

#[derive(Serialize, Deserialize)]
struct ResultRepr {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TryFrom<ResultRepr> for JobResult {
    type Error = String;

    fn try_from(repr: ResultRepr) -> Result<Self, Self::Error> {
        if repr.success {
            Ok(JobResult::Success(repr.data.unwrap_or(serde_json::Value::Null)))
        } else {
            repr.error
                .map(JobResult::Failure)
                .ok_or_else(|| "failure result without \"error\" field".to_string())
        }
    }
}

impl From<JobResult> for ResultRepr {
    fn from(result: JobResult) -> Self {
        match result {
            JobResult::Success(data) => ResultRepr {
                success: true,
                data: Some(data),
                error: None,
            },
            JobResult::Failure(error) => ResultRepr {
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

/// A unit of work for a peer: `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum WorkerTask {
    CalculateMove(CalculateMoveInput),
    AnalyzeMove(AnalyzeMoveInput),
}

impl WorkerTask {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerTask::CalculateMove(_) => "calculate-move",
            WorkerTask::AnalyzeMove(_) => "analyze-move",
        }
    }

    /// The job every new peer must answer before it is admitted.
    /// Fixed so that elapsed times are comparable across peers.
    pub fn benchmark() -> Self {
        WorkerTask::CalculateMove(CalculateMoveInput {
            game: GameState {
                size: 9,
                moves_history: "f4".to_string(),
                current_player: PlayerColor::White,
                swap_rule: false,
            },
            ai: AiSettings::Mohex { max_games: 2000 },
        })
    }

    pub fn validate(&self) -> Result<(), TaskValidationError> {
        match self {
            WorkerTask::CalculateMove(input) => input.validate(),
            WorkerTask::AnalyzeMove(input) => check_board_size(input.size),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerColor {
    Black,
    White,
}

impl PlayerColor {
    /// Black moves first, colours alternate from there.
    pub fn for_move(move_index: usize) -> Self {
        if move_index % 2 == 0 {
            PlayerColor::Black
        } else {
            PlayerColor::White
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub size: u8,
    /// Space separated moves played so far. The next move is requested.
    pub moves_history: String,
    pub current_player: PlayerColor,
    pub swap_rule: bool,
}

/// Engine selection for move calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum AiSettings {
    Mohex {
        #[serde(rename = "maxGames")]
        max_games: u32,
    },
    Katahex {
        #[serde(rename = "treeSearch")]
        tree_search: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculateMoveInput {
    pub game: GameState,
    pub ai: AiSettings,
}

impl CalculateMoveInput {
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        check_board_size(self.game.size)?;
        if let AiSettings::Mohex { max_games: 0 } = self.ai {
            return Err(TaskValidationError::ZeroMaxGames);
        }
        Ok(())
    }
}

/// One move of a game to analyze. Produced by splitting an [`AnalyzeGameInput`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeMoveInput {
    /// 0 is the first move of the game.
    pub move_index: usize,
    /// Move played at `move_index`.
    #[serde(rename = "move")]
    pub played_move: String,
    /// Player who played `played_move`.
    pub color: PlayerColor,
    pub is_last_move_of_game: bool,
    /// Moves before `played_move`, space separated. Empty for the first move.
    pub moves_history: String,
    pub size: u8,
}

/// A whole game to analyze, one child task per move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeGameInput {
    pub moves_history: String,
    pub size: u8,
}

impl AnalyzeGameInput {
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        check_board_size(self.size)?;
        if self.moves_history.trim().len() < 2 {
            return Err(TaskValidationError::HistoryTooShort);
        }
        Ok(())
    }

    pub fn moves(&self) -> impl Iterator<Item = &str> {
        self.moves_history.split_whitespace()
    }
}

// ── Analysis output ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveAndValue {
    #[serde(rename = "move")]
    pub coord: String,
    /// Engine value relative to other moves of the same position.
    pub value: f64,
    /// White win rate of the position after this move is played.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_win: Option<f64>,
}

/// Result payload of an `analyze-move` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeMoveOutput {
    pub move_index: usize,
    /// White win rate before the move is played.
    pub white_win: f64,
    pub color: PlayerColor,
    #[serde(rename = "move")]
    pub played: MoveAndValue,
    pub best_moves: Vec<MoveAndValue>,
}

// ── Validation ────────────────────────────────────────────────────────────────

pub const MIN_BOARD_SIZE: u8 = 1;
pub const MAX_BOARD_SIZE: u8 = 32;

fn check_board_size(size: u8) -> Result<(), TaskValidationError> {
    if (MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(TaskValidationError::BoardSize(size))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskValidationError {
    #[error("board size {0} out of range {}..={}", MIN_BOARD_SIZE, MAX_BOARD_SIZE)]
    BoardSize(u8),

    #[error("maxGames must be at least 1")]
    ZeroMaxGames,

    #[error("movesHistory must contain at least one move")]
    HistoryTooShort,
}
