use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;

use super::*;

fn token(claims: &str) -> String {
    format!("eyJhbGciOiJIUzI1NiJ9.{}.c2ln", URL_SAFE_NO_PAD.encode(claims))
}

#[test]
fn decodes_payload_claims() {
    let claims = decode_claims(&token(r#"{"sub":"ana","role":"ADMIN","exp":1700000000}"#)).unwrap();
    assert_eq!(claims, json!({ "sub": "ana", "role": "ADMIN", "exp": 1_700_000_000 }));
}

#[test]
fn decodes_url_safe_alphabet_and_utf8() {
    // `?>` and `é` force `-`/`_` and multi-byte characters into the encoding.
    let claims = decode_claims(&token(r#"{"name":"Zoé","q":"?>?>"}"#)).unwrap();
    assert_eq!(claims["name"], "Zoé");
}

#[test]
fn accepts_padded_payload() {
    let padded = format!("h.{}.s", base64::engine::general_purpose::URL_SAFE.encode(r#"{"role":"USER"}"#));
    assert_eq!(role(&padded).as_deref(), Some("USER"));
}

#[test]
fn role_reads_claim() {
    assert_eq!(role(&token(r#"{"role":"SELLER"}"#)).as_deref(), Some("SELLER"));
    assert_eq!(role(&token(r#"{"role":""}"#)), None);
    assert_eq!(role(&token(r#"{"sub":"ana"}"#)), None);
    assert_eq!(role(&token(r#"{"role":7}"#)), None);
}

#[test]
fn malformed_tokens_yield_none() {
    assert_eq!(decode_claims(""), None);
    assert_eq!(decode_claims("only.two"), None);
    assert_eq!(decode_claims("a.b.c.d"), None);
    assert_eq!(decode_claims("h.%%%.s"), None);
    assert_eq!(decode_claims(&token("not json")), None);
    assert_eq!(decode_claims(&token("[1,2]")), None);
}
