use super::*;

#[test]
fn successful_refresh_path() {
    let phase = RefreshPhase::Idle.on_unauthorized();
    assert_eq!(phase, RefreshPhase::Refreshing);
    let phase = phase.on_refresh(true);
    assert_eq!(phase, RefreshPhase::Retrying);
    let phase = phase.on_response();
    assert_eq!(phase, RefreshPhase::Done);
    assert!(phase.is_terminal());
}

#[test]
fn failed_refresh_is_terminal() {
    let phase = RefreshPhase::Idle.on_unauthorized().on_refresh(false);
    assert_eq!(phase, RefreshPhase::Failed);
    assert!(phase.is_terminal());
}

#[test]
fn second_unauthorized_never_refreshes_again() {
    let phase = RefreshPhase::Idle.on_unauthorized().on_refresh(true);
    assert_eq!(phase.on_unauthorized(), RefreshPhase::Failed);
}

#[test]
fn refresh_result_ignored_outside_refreshing() {
    assert_eq!(RefreshPhase::Idle.on_refresh(true), RefreshPhase::Idle);
    assert_eq!(RefreshPhase::Done.on_refresh(false), RefreshPhase::Done);
}

#[test]
fn plain_response_from_idle_is_done() {
    assert_eq!(RefreshPhase::Idle.on_response(), RefreshPhase::Done);
    assert!(!RefreshPhase::Retrying.is_terminal());
}

#[test]
fn backoff_doubles_from_base() {
    let base = Duration::from_millis(200);
    assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
    assert_eq!(backoff_delay(base, 2), Duration::from_millis(400));
    assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
}

#[test]
fn backoff_saturates_for_large_retry_counts() {
    let delay = backoff_delay(Duration::from_secs(u64::MAX / 2), 40);
    assert_eq!(delay, Duration::MAX);
}
