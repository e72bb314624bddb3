use crate::*;

use hexdist_core::task::AnalyzeGameInput;
use hexdist_services::{CompositeCoordinator, FailedMove, MoveAnalysis};

// ══ Game analysis ═════════════════════════════════════════════════════════════

/// Fails the analysis of one move, answers the rest like [`FakeEngine`].
struct BrokenMove {
    engine: FakeEngine,
    move_index: usize,
}

#[async_trait]
impl TaskExecutor for BrokenMove {
    async fn execute(&self, task: WorkerTask) -> Result<serde_json::Value, String> {
        if let WorkerTask::AnalyzeMove(input) = &task {
            if input.move_index == self.move_index {
                return Err("engine crashed".into());
            }
        }
        self.engine.execute(task).await
    }
}

fn played_white_win(slot: &MoveAnalysis) -> Option<f64> {
    slot.as_analyzed().and_then(|o| o.played.white_win)
}

#[tokio::test]
async fn game_analysis_is_spread_and_merged() -> Result<()> {
    let scheduler = start_scheduler(1).await?;
    let log = Arc::new(Mutex::new(Vec::new()));
    let slow = Duration::from_millis(50);
    scheduler.spawn_peer(FakeEngine::new("a", log.clone()).with_delay(slow), false);
    scheduler.spawn_peer(FakeEngine::new("b", log.clone()).with_delay(slow), false);
    scheduler.wait_for_peers(2).await?;

    let coordinator = CompositeCoordinator::new(scheduler.queue.clone());
    let slots = coordinator
        .submit(&AnalyzeGameInput {
            moves_history: "e5 f6 g7".into(),
            size: 11,
        })
        .await?;

    assert_eq!(slots.len(), 3);
    assert_eq!(log.lock().unwrap().len(), 3);
    for (i, slot) in slots.iter().enumerate() {
        assert_eq!(slot.as_analyzed().map(|o| o.move_index), Some(i));
    }

    // Each played move carries the win rate of the position it led to.
    assert_eq!(played_white_win(&slots[0]), Some(0.1 * 2.0));
    assert_eq!(played_white_win(&slots[1]), Some(0.1 * 3.0));
    assert_eq!(played_white_win(&slots[2]), None);

    let first = slots[0].as_analyzed().context("first move analyzed")?;
    assert_eq!(first.best_moves[0].coord, "e5");
    assert_eq!(first.best_moves[0].white_win, Some(0.1 * 2.0));
    assert_eq!(first.best_moves[1].white_win, Some(0.99));

    scheduler.shutdown().await
}

#[tokio::test]
async fn failed_move_leaves_a_marker() -> Result<()> {
    let scheduler = start_scheduler(1).await?;
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler.spawn_peer(
        BrokenMove {
            engine: FakeEngine::new("a", log.clone()),
            move_index: 1,
        },
        false,
    );
    scheduler.wait_for_peers(1).await?;

    let coordinator = CompositeCoordinator::new(scheduler.queue.clone());
    let slots = coordinator
        .submit(&AnalyzeGameInput {
            moves_history: "e5 f6 g7".into(),
            size: 11,
        })
        .await?;

    assert_eq!(
        slots[1],
        MoveAnalysis::Failed(FailedMove {
            move_index: 1,
            error: "engine crashed".into(),
        })
    );
    assert_eq!(played_white_win(&slots[0]), None, "no neighbour to link");
    assert_eq!(played_white_win(&slots[2]), None);
    assert_eq!(
        serde_json::to_value(&slots[1])?,
        json!({ "moveIndex": 1, "error": "engine crashed" })
    );

    scheduler.shutdown().await
}
