use super::*;

#[test]
fn decode_open_and_heartbeat() {
    assert_eq!(decode_sockjs("o").expect("open"), SockJsFrame::Open);
    assert_eq!(decode_sockjs("h").expect("heartbeat"), SockJsFrame::Heartbeat);
}

#[test]
fn decode_message_array_unescapes_stomp_text() {
    let frame = decode_sockjs(r#"a["CONNECTED\nversion:1.2\n\n\u0000"]"#).expect("array");
    let SockJsFrame::Messages(messages) = frame else {
        panic!("expected messages");
    };
    assert_eq!(messages, vec!["CONNECTED\nversion:1.2\n\n\0".to_owned()]);
    let stomp = crate::decode_frame(&messages[0]).expect("stomp");
    assert_eq!(stomp.command, crate::Command::Connected);
}

#[test]
fn decode_single_message_frame() {
    assert_eq!(
        decode_sockjs(r#"m"hello""#).expect("message"),
        SockJsFrame::Messages(vec!["hello".to_owned()])
    );
}

#[test]
fn decode_close_frame() {
    assert_eq!(
        decode_sockjs(r#"c[3000,"Go away!"]"#).expect("close"),
        SockJsFrame::Close { code: 3000, reason: "Go away!".to_owned() }
    );
}

#[test]
fn decode_rejects_unknown_type_and_bad_json() {
    assert!(matches!(decode_sockjs("x"), Err(CodecError::SockJs(_))));
    assert!(matches!(decode_sockjs("a[1,2]"), Err(CodecError::SockJs(_))));
    assert!(matches!(decode_sockjs(""), Err(CodecError::SockJs(_))));
}

#[test]
fn encode_wraps_messages_in_json_array() {
    assert_eq!(encode_sockjs(&["SEND\n\n\0"]), r#"["SEND\n\n\u0000"]"#);
}

#[test]
fn websocket_path_formats_segments() {
    assert_eq!(websocket_path("123", "abcdefgh"), "/123/abcdefgh/websocket");
}
