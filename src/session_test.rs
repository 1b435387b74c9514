use super::*;

fn temp_session_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("agora-session-test-{}", uuid::Uuid::new_v4()))
        .join("session.json")
}

fn logged_in() -> Session {
    Session {
        token: Some("tok-1".to_owned()),
        refresh_token: Some("ref-1".to_owned()),
        user_id: Some("42".to_owned()),
        username: Some("amel".to_owned()),
        avatar_url: Some("/media/avatars/42.png".to_owned()),
    }
}

#[test]
fn in_memory_store_starts_empty() {
    let store = SessionStore::in_memory();
    assert_eq!(store.snapshot(), Session::default());
    assert!(store.token().is_none());
    assert!(store.path().is_none());
}

#[test]
fn clones_share_state() {
    let store = SessionStore::in_memory();
    let other = store.clone();
    store.login(logged_in()).unwrap();
    assert_eq!(other.token().as_deref(), Some("tok-1"));
}

#[test]
fn empty_token_reads_as_absent() {
    let store = SessionStore::in_memory();
    store
        .login(Session { token: Some(String::new()), ..Session::default() })
        .unwrap();
    assert!(store.token().is_none());
    assert!(!store.snapshot().is_authenticated());
}

#[test]
fn set_tokens_keeps_refresh_token_when_not_rotated() {
    let store = SessionStore::in_memory();
    store.login(logged_in()).unwrap();
    store.set_tokens("tok-2".to_owned(), None).unwrap();
    assert_eq!(store.token().as_deref(), Some("tok-2"));
    assert_eq!(store.refresh_token().as_deref(), Some("ref-1"));

    store.set_tokens("tok-3".to_owned(), Some("ref-2".to_owned())).unwrap();
    assert_eq!(store.refresh_token().as_deref(), Some("ref-2"));
}

#[test]
fn set_profile_only_touches_given_fields() {
    let store = SessionStore::in_memory();
    store.login(logged_in()).unwrap();
    store.set_profile(Some("amel2".to_owned()), None).unwrap();
    let snapshot = store.snapshot();
    assert_eq!(snapshot.username.as_deref(), Some("amel2"));
    assert_eq!(snapshot.avatar_url.as_deref(), Some("/media/avatars/42.png"));
}

#[test]
fn file_store_survives_reopen_and_clear_removes_file() {
    let path = temp_session_path();
    let store = SessionStore::open(&path).unwrap();
    assert!(store.token().is_none());
    store.login(logged_in()).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"refreshToken\""));

    let reopened = SessionStore::open(&path).unwrap();
    assert_eq!(reopened.snapshot(), logged_in());

    reopened.clear().unwrap();
    assert!(!path.exists());
    assert_eq!(reopened.snapshot(), Session::default());

    // Clearing twice is fine.
    reopened.clear().unwrap();
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn open_rejects_corrupt_file() {
    let path = temp_session_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{not json").unwrap();
    let err = SessionStore::open(&path).unwrap_err();
    assert!(matches!(err, SessionError::Json(_)));
    assert_eq!(err.error_code(), "E_SESSION_JSON");
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
