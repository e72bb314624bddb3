//! Composite jobs: one game analysis split into one job per move.
//!
//! Children run independently through the normal queue and distributor
//! path. Once all of them finish, results are placed by move index and a
//! backward pass copies each position's white win rate onto the move that
//! led to it, which the child analysing that move could not know.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use hexdist_core::task::{
    AnalyzeGameInput, AnalyzeMoveInput, AnalyzeMoveOutput, JobResult, PlayerColor, WorkerTask,
};

use crate::error::SchedulerError;
use crate::queue::{JobWatch, QueueBackend};

/// One slot of a merged analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MoveAnalysis {
    Analyzed(AnalyzeMoveOutput),
    Failed(FailedMove),
}

/// Marks a move whose analysis failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMove {
    pub move_index: usize,
    pub error: String,
}

impl MoveAnalysis {
    pub fn as_analyzed(&self) -> Option<&AnalyzeMoveOutput> {
        match self {
            MoveAnalysis::Analyzed(output) => Some(output),
            MoveAnalysis::Failed(_) => None,
        }
    }
}

/// One `analyze-move` input per move, in game order.
pub fn split_to_tasks(game: &AnalyzeGameInput) -> Vec<AnalyzeMoveInput> {
    let moves: Vec<&str> = game.moves().collect();
    let last = moves.len().saturating_sub(1);

    moves
        .iter()
        .enumerate()
        .map(|(i, played)| AnalyzeMoveInput {
            move_index: i,
            played_move: played.to_string(),
            color: PlayerColor::for_move(i),
            is_last_move_of_game: i == last,
            moves_history: moves[..i].join(" "),
            size: game.size,
        })
        .collect()
}

/// Back-fill the win rate after each move from the following position.
/// Only two adjacent analyzed slots are linked.
pub fn merge_results(slots: &mut [MoveAnalysis]) {
    for i in (0..slots.len().saturating_sub(1)).rev() {
        let next_white_win = match slots[i + 1].as_analyzed() {
            Some(next) => next.white_win,
            None => continue,
        };
        let MoveAnalysis::Analyzed(position) = &mut slots[i] else {
            continue;
        };

        position.played.white_win = Some(next_white_win);
        if let Some(best) = position
            .best_moves
            .iter_mut()
            .find(|m| m.coord == position.played.coord)
        {
            best.white_win = Some(next_white_win);
        }
    }
}

fn into_slot(move_index: usize, outcome: Result<JobResult, SchedulerError>) -> MoveAnalysis {
    let failed = |error: String| MoveAnalysis::Failed(FailedMove { move_index, error });
    match outcome {
        Ok(JobResult::Success(data)) => match serde_json::from_value::<AnalyzeMoveOutput>(data) {
            Ok(output) => MoveAnalysis::Analyzed(output),
            Err(e) => failed(format!("malformed analysis: {e}")),
        },
        Ok(JobResult::Failure(error)) => failed(error),
        Err(e) => failed(e.to_string()),
    }
}

#[derive(Clone)]
pub struct CompositeCoordinator {
    queue: Arc<dyn QueueBackend>,
}

impl CompositeCoordinator {
    pub fn new(queue: Arc<dyn QueueBackend>) -> Self {
        Self { queue }
    }

    /// Analyze a whole game.
    ///
    /// Failed moves are kept as [`FailedMove`] markers. If every move fails
    /// the whole analysis fails with the first error.
    pub async fn submit(&self, game: &AnalyzeGameInput) -> Result<Vec<MoveAnalysis>, SchedulerError> {
        let children = split_to_tasks(game);
        let count = children.len();

        let mut watches = Vec::with_capacity(count);
        for child in children {
            watches.push(self.queue.enqueue_watched(WorkerTask::AnalyzeMove(child)).await?);
        }
        tracing::info!(moves = count, size = game.size, "game analysis enqueued");

        let outcomes = join_all(watches.into_iter().map(JobWatch::finished)).await;
        let mut slots: Vec<MoveAnalysis> = outcomes
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| into_slot(i, outcome))
            .collect();

        let failed: Vec<&FailedMove> = slots
            .iter()
            .filter_map(|s| match s {
                MoveAnalysis::Failed(f) => Some(f),
                MoveAnalysis::Analyzed(_) => None,
            })
            .collect();
        if !failed.is_empty() {
            tracing::warn!(failed = failed.len(), moves = count, "some moves failed to analyze");
            if failed.len() == count {
                return Err(SchedulerError::Task(failed[0].error.clone()));
            }
        }

        merge_results(&mut slots);
        Ok(slots)
    }
}
