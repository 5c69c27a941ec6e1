use anyhow::Result;
use wshost_codec::auth::{
    AuthenticationChallenge, AuthenticationResponse, AuthenticationScheme, Identity,
    NetworkCredential, Params, create_request_digest,
};

#[rustfmt::skip]
const RFC2617: &str = concat!(
    r#"Digest username="Mufasa", realm="testrealm@host.com", "#,
    r#"nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", uri="/dir/index.html", "#,
    r#"qop=auth, nc=00000001, cnonce="0a4f113b", "#,
    r#"response="6629fae49393a05397450978507c4ef1", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
);

#[test]
fn known_digest_verifies() -> Result<()> {
    let response = AuthenticationResponse::parse(RFC2617)?;
    let Some(Identity::Digest(identity)) = response.to_identity() else {
        panic!("expected a digest identity");
    };

    assert_eq!(identity.username(), "Mufasa");
    assert!(identity.is_valid("Circle Of Life", "testrealm@host.com", "GET", &[]));
    assert!(!identity.is_valid("Circle of Life", "testrealm@host.com", "GET", &[]));
    assert!(!identity.is_valid("Circle Of Life", "testrealm@host.com", "POST", &[]));
    Ok(())
}

#[test]
fn digest_without_qop_uses_short_form() {
    let params = Params::parse(r#"username="u", realm="r", nonce="n", uri="/""#);
    let digest = create_request_digest(&params, "p", "GET", &[]);

    let ha1 = wshost_codec::crypto::md5_hex(&["u:r:p"]);
    let ha2 = wshost_codec::crypto::md5_hex(&["GET:/"]);
    assert_eq!(digest, wshost_codec::crypto::md5_hex(&[&ha1, "n", &ha2]));
}

#[test]
fn client_answer_passes_server_check() -> Result<()> {
    let challenge = AuthenticationChallenge::digest("SECRET AREA");
    let credential = NetworkCredential::new("nobita", "password");
    let answer = AuthenticationResponse::digest(&challenge, &credential, "GET", "/chat", 0);

    assert_eq!(answer.params.get("nc"), Some("00000001"));
    assert_eq!(answer.params.get("qop"), Some("auth"));

    // as seen by the server after a trip through the header
    let parsed = AuthenticationResponse::parse(&answer.to_string())?;
    let Some(Identity::Digest(identity)) = parsed.to_identity() else {
        panic!("expected a digest identity");
    };

    assert_eq!(identity.nonce(), challenge.nonce().unwrap_or_default());
    assert!(identity.is_valid("password", "SECRET AREA", "GET", &[]));
    assert!(!identity.is_valid("password", "OTHER AREA", "GET", &[]));
    Ok(())
}

#[test]
fn nonce_count_wraps() {
    let challenge = AuthenticationChallenge::digest("r");
    let credential = NetworkCredential::new("u", "p");
    let answer = AuthenticationResponse::digest(&challenge, &credential, "GET", "/", u32::MAX);

    assert_eq!(answer.params.get("nc"), Some("00000000"));
}

#[test]
fn md5_sess_and_auth_int() {
    let params = Params::parse(
        r#"username="u", realm="r", nonce="n", uri="/", algorithm=MD5-sess, qop=auth-int, nc=00000001, cnonce="c""#,
    );

    let digest = create_request_digest(&params, "p", "POST", b"body");
    assert_ne!(digest, create_request_digest(&params, "p", "POST", b"other"));
    assert_eq!(digest.len(), 32);
}

#[test]
fn basic_round_trip() -> Result<()> {
    let credential = NetworkCredential::new("Aladdin", "open sesame");
    let header = AuthenticationResponse::basic(&credential).to_string();

    assert_eq!(header, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");

    let parsed = AuthenticationResponse::parse(&header)?;
    assert_eq!(parsed.scheme, AuthenticationScheme::Basic);
    assert_eq!(
        parsed.to_identity(),
        Some(Identity::Basic {
            name: "Aladdin".to_string(),
            password: "open sesame".to_string(),
        })
    );

    Ok(())
}

#[test]
fn challenge_parse() -> Result<()> {
    let challenge = AuthenticationChallenge::parse(r#"Digest realm="a", nonce="b", qop="auth""#)?;

    assert_eq!(challenge.scheme, AuthenticationScheme::Digest);
    assert_eq!(challenge.realm(), "a");
    assert_eq!(challenge.nonce(), Some("b"));
    assert!(AuthenticationChallenge::parse("Negotiate abc").is_err());
    Ok(())
}
