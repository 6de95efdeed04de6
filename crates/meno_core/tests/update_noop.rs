use meno_core::{update, RunMsg, RunRegistry};

#[test]
fn update_is_noop() {
    let state = RunRegistry::new();
    let (next, effects) = update(state.clone(), RunMsg::NoOp);

    assert_eq!(state, next);
    assert!(effects.is_empty());
}

#[test]
fn messages_for_unknown_runs_are_ignored() {
    let (mut next, effects) = update(
        RunRegistry::new(),
        RunMsg::ItemFailed {
            run_id: 42,
            item_id: "a".into(),
            message: "boom".into(),
        },
    );
    assert!(effects.is_empty());
    assert!(next.is_empty());
    assert!(!next.consume_dirty());
}
