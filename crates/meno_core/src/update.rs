use crate::{Effect, GenerationRun, ItemStatus, RunId, RunMsg, RunRegistry};

/// Pure update function: applies a message to the registry and returns any effects.
///
/// Messages naming an unknown run or item are ignored.
pub fn update(mut state: RunRegistry, msg: RunMsg) -> (RunRegistry, Vec<Effect>) {
    let effects = match msg {
        RunMsg::RunCreated(run) => {
            let run_id = run.id();
            let stage = run.stage();
            state.insert(run);
            state.mark_dirty();
            vec![Effect::StageChanged { run_id, stage }]
        }
        RunMsg::HydrationStarted { run_id } => {
            with_run(&mut state, run_id, |run| {
                run.begin_hydration();
                Vec::new()
            })
        }
        RunMsg::ItemHydrated {
            run_id,
            item_id,
            content,
        } => with_run(&mut state, run_id, |run| {
            if run.mark_ready(&item_id, content) {
                vec![Effect::ItemSettled {
                    run_id,
                    item_id,
                    status: ItemStatus::Ready,
                }]
            } else {
                Vec::new()
            }
        }),
        RunMsg::ItemFailed {
            run_id,
            item_id,
            message,
        } => with_run(&mut state, run_id, |run| {
            if run.mark_error(&item_id, message) {
                vec![Effect::ItemSettled {
                    run_id,
                    item_id,
                    status: ItemStatus::Error,
                }]
            } else {
                Vec::new()
            }
        }),
        RunMsg::FailedItemsReset { run_id } => with_run(&mut state, run_id, |run| {
            run.reset_failed();
            Vec::new()
        }),
        RunMsg::RunRemoved { run_id } => {
            if state.remove(run_id) {
                state.mark_dirty();
                vec![Effect::CancelHydration { run_id }]
            } else {
                Vec::new()
            }
        }
        RunMsg::ItemRemoved { run_id, item_id } => {
            let Some(run) = state.run_mut(run_id) else {
                return (state, Vec::new());
            };
            let before = run.stage();
            if !run.remove_item(&item_id) {
                return (state, Vec::new());
            }
            let after = run.stage();
            let emptied = run.items().is_empty();
            state.mark_dirty();
            if emptied {
                state.remove(run_id);
                vec![Effect::CancelHydration { run_id }]
            } else if before != after {
                vec![Effect::StageChanged {
                    run_id,
                    stage: after,
                }]
            } else {
                Vec::new()
            }
        }
        RunMsg::NoOp => Vec::new(),
    };

    (state, effects)
}

/// Applies `apply` to one run, marks the registry dirty, and appends a
/// `StageChanged` effect when the run's stage moved.
fn with_run<F>(state: &mut RunRegistry, run_id: RunId, apply: F) -> Vec<Effect>
where
    F: FnOnce(&mut GenerationRun) -> Vec<Effect>,
{
    let Some(run) = state.run_mut(run_id) else {
        return Vec::new();
    };
    let before = run.stage();
    let mut effects = apply(run);
    let after = run.stage();
    if before != after {
        effects.push(Effect::StageChanged {
            run_id,
            stage: after,
        });
    }
    state.mark_dirty();
    effects
}
