//! SASL authentication over the binary protocol
//!
//! The handshake runs once per connection, right after connect:
//!
//! ```text
//! NEGOTIATING --list mechs--> MECH_SELECTED --start--> (CHALLENGING)* --> AUTHENTICATED
//!                                                                     \-> FAILED
//! ```
//!
//! Mechanisms are tried in a fixed preference order: LOGIN, PLAIN,
//! CRAM-MD5, DIGEST-MD5.

use std::collections::HashMap;
use std::fmt;

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::RngCore;
use tracing::debug;

use crate::cluster::Credentials;
use crate::utils::{AuthError, Opcode, ProtocolError, Response, Status};

/// Continue rounds tolerated before giving up on a server
pub const MAX_AUTH_ROUNDS: usize = 10;

const DIGEST_NONCE_COUNT: &str = "00000001";

type HmacMd5 = Hmac<Md5>;

/// Supported SASL mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Login,
    Plain,
    CramMd5,
    DigestMd5,
}

impl Mechanism {
    /// Selection order, most preferred first
    pub const PREFERENCE: [Mechanism; 4] = [
        Mechanism::Login,
        Mechanism::Plain,
        Mechanism::CramMd5,
        Mechanism::DigestMd5,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Mechanism::Login => "LOGIN",
            Mechanism::Plain => "PLAIN",
            Mechanism::CramMd5 => "CRAM-MD5",
            Mechanism::DigestMd5 => "DIGEST-MD5",
        }
    }

    /// First preferred mechanism the server advertises
    pub fn select<S: AsRef<str>>(advertised: &[S]) -> Option<Mechanism> {
        Self::PREFERENCE.into_iter().find(|mech| {
            advertised
                .iter()
                .any(|name| name.as_ref().eq_ignore_ascii_case(mech.name()))
        })
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handshake progress for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Negotiating,
    MechSelected(Mechanism),
    Challenging { round: usize },
    Authenticated,
    Failed,
}

/// Computes client responses for one mechanism
pub struct SaslClient<'a> {
    mechanism: Mechanism,
    credentials: &'a Credentials,
    host: &'a str,
}

impl<'a> SaslClient<'a> {
    pub fn new(mechanism: Mechanism, credentials: &'a Credentials, host: &'a str) -> Self {
        Self {
            mechanism,
            credentials,
            host,
        }
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    /// Payload sent with the start-auth request
    pub fn initial_response(&self) -> Vec<u8> {
        match self.mechanism {
            Mechanism::Plain => self.plain_payload(),
            Mechanism::Login | Mechanism::CramMd5 | Mechanism::DigestMd5 => Vec::new(),
        }
    }

    /// Answer a server challenge
    pub fn respond(&self, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
        let Credentials { username, password } = self.credentials;
        match self.mechanism {
            Mechanism::Plain => Ok(self.plain_payload()),
            Mechanism::CramMd5 => {
                let mut mac = HmacMd5::new_from_slice(password.as_bytes())
                    .map_err(|e| AuthError::Crypto(e.to_string()))?;
                mac.update(challenge);
                let digest = hex::encode(mac.finalize().into_bytes());
                Ok(format!("{} {}", username, digest).into_bytes())
            }
            Mechanism::Login => {
                let prompt = String::from_utf8_lossy(challenge)
                    .to_lowercase()
                    .replace(' ', "");
                if prompt.contains("username") {
                    Ok(username.clone().into_bytes())
                } else if prompt.contains("password") {
                    Ok(password.clone().into_bytes())
                } else {
                    Err(self.unexpected(challenge))
                }
            }
            Mechanism::DigestMd5 => {
                let challenge = String::from_utf8_lossy(challenge);
                digest_md5_response(&challenge, self.credentials, self.host, &client_nonce())
                    .map(String::into_bytes)
            }
        }
    }

    fn plain_payload(&self) -> Vec<u8> {
        format!(
            "\0{}\0{}",
            self.credentials.username, self.credentials.password
        )
        .into_bytes()
    }

    fn unexpected(&self, challenge: &[u8]) -> AuthError {
        AuthError::UnexpectedChallenge {
            mechanism: self.mechanism.name().to_string(),
            challenge: String::from_utf8_lossy(challenge).into_owned(),
        }
    }
}

/// Request/response channel the handshake runs over
///
/// Implemented by `RawConnection`; kept as a seam so the state machine can
/// be driven without a socket.
pub trait AuthChannel {
    fn exchange(&mut self, opcode: Opcode, key: &[u8], value: &[u8])
        -> Result<Response, ProtocolError>;
}

/// Drives one SASL handshake to completion
pub struct Negotiator<'a> {
    credentials: &'a Credentials,
    host: &'a str,
    state: AuthState,
}

impl<'a> Negotiator<'a> {
    pub fn new(credentials: &'a Credentials, host: &'a str) -> Self {
        Self {
            credentials,
            host,
            state: AuthState::Negotiating,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    fn transition(&mut self, next: AuthState) {
        debug!("SASL {}: {:?} -> {:?}", self.host, self.state, next);
        self.state = next;
    }

    /// Run the handshake; on error the state is left at `Failed`
    pub fn run<C: AuthChannel>(&mut self, channel: &mut C) -> Result<Mechanism, AuthError> {
        let result = self.drive(channel);
        if result.is_err() {
            self.transition(AuthState::Failed);
        }
        result
    }

    fn drive<C: AuthChannel>(&mut self, channel: &mut C) -> Result<Mechanism, AuthError> {
        let listed = channel.exchange(Opcode::SaslListMechs, b"", b"")?;
        match listed.status {
            Status::NoError => {}
            Status::UnknownCommand => return Err(AuthError::NotSupported),
            Status::Unauthorized => return Err(AuthError::Rejected),
            other => return Err(AuthError::UnexpectedStatus(other.code())),
        }

        let advertised: Vec<String> = String::from_utf8_lossy(&listed.value)
            .split_whitespace()
            .map(String::from)
            .collect();
        let mechanism =
            Mechanism::select(&advertised).ok_or(AuthError::NoSuitableMechanism(advertised))?;
        self.transition(AuthState::MechSelected(mechanism));

        let sasl = SaslClient::new(mechanism, self.credentials, self.host);
        let key = mechanism.name().as_bytes();
        let mut response = channel.exchange(Opcode::SaslAuth, key, &sasl.initial_response())?;

        let mut round = 0;
        while response.status == Status::ContinueAuth {
            round += 1;
            if round > MAX_AUTH_ROUNDS {
                return Err(AuthError::TooManyRounds(MAX_AUTH_ROUNDS));
            }
            self.transition(AuthState::Challenging { round });
            let reply = sasl.respond(&response.value)?;
            response = channel.exchange(Opcode::SaslStep, key, &reply)?;
        }

        match response.status {
            Status::NoError => {
                self.transition(AuthState::Authenticated);
                Ok(mechanism)
            }
            Status::Unauthorized => Err(AuthError::Rejected),
            other => Err(AuthError::UnexpectedStatus(other.code())),
        }
    }
}

/// Authenticate a freshly opened channel
pub fn negotiate<C: AuthChannel>(
    channel: &mut C,
    host: &str,
    credentials: &Credentials,
) -> Result<Mechanism, AuthError> {
    Negotiator::new(credentials, host).run(channel)
}

/// Random 16-hex-character client nonce
fn client_nonce() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Compute the DIGEST-MD5 reply to a server challenge
///
/// Returns an empty reply for the server's final `rspauth` round.
pub fn digest_md5_response(
    challenge: &str,
    credentials: &Credentials,
    host: &str,
    cnonce: &str,
) -> Result<String, AuthError> {
    let chal = parse_challenge(challenge);
    if chal.contains_key("rspauth") {
        return Ok(String::new());
    }

    let unexpected = || AuthError::UnexpectedChallenge {
        mechanism: Mechanism::DigestMd5.name().to_string(),
        challenge: challenge.to_string(),
    };
    let nonce = chal.get("nonce").map(String::as_str).ok_or_else(unexpected)?;
    let realm = chal.get("realm").map(String::as_str).unwrap_or("");
    let digest_uri = format!(
        "memcached/{}",
        chal.get("realm").map(String::as_str).unwrap_or(host)
    );

    let a1 = format!("{}:{}:{}", credentials.username, realm, credentials.password);
    let algorithm = chal
        .get("algorithm")
        .map(|a| a.to_ascii_lowercase())
        .unwrap_or_else(|| "md5".to_string());
    let ha1 = match algorithm.as_str() {
        "md5" => md5_hex(a1.as_bytes()),
        "md5-sess" => {
            let mut session = Md5::digest(a1.as_bytes()).to_vec();
            session.extend_from_slice(format!(":{}:{}", nonce, cnonce).as_bytes());
            md5_hex(&session)
        }
        _ => return Err(unexpected()),
    };
    let ha2 = md5_hex(format!("AUTHENTICATE:{}", digest_uri).as_bytes());

    let qop = chal
        .get("qop")
        .filter(|options| options.split(',').any(|q| q.trim() == "auth"))
        .map(|_| "auth");

    let response = match qop {
        Some(qop) => md5_hex(
            [
                ha1.as_str(),
                nonce,
                DIGEST_NONCE_COUNT,
                cnonce,
                qop,
                ha2.as_str(),
            ]
            .join(":")
            .as_bytes(),
        ),
        None => md5_hex(format!("{}:{}:{}", ha1, nonce, ha2).as_bytes()),
    };

    let mut fields: Vec<(&str, &str)> = vec![("username", credentials.username.as_str())];
    if !realm.is_empty() {
        fields.push(("realm", realm));
    }
    fields.push(("nonce", nonce));
    fields.push(("cnonce", cnonce));
    fields.push(("nc", DIGEST_NONCE_COUNT));
    if let Some(qop) = qop {
        fields.push(("qop", qop));
    }
    fields.push(("digest-uri", digest_uri.as_str()));
    fields.push(("response", response.as_str()));

    Ok(fields
        .into_iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, quote(v)))
        .collect::<Vec<_>>()
        .join(", "))
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parse an HTTP-style `k=v, k="v, with comma"` list
fn parse_challenge(challenge: &str) -> HashMap<String, String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in challenge.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => items.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    items.push(current);

    items
        .iter()
        .filter_map(|item| {
            let (key, value) = item.trim().split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key.trim().to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn creds() -> Credentials {
        Credentials::new("memcache", "secret")
    }

    fn reply(status: u16, value: &[u8]) -> Response {
        Response {
            opcode: 0,
            status: Status::from(status),
            extras: Vec::new(),
            key: Vec::new(),
            value: value.to_vec(),
            cas: 0,
        }
    }

    /// Replays canned responses and records requests
    struct Scripted {
        replies: VecDeque<Response>,
        sent: Vec<(Opcode, Vec<u8>, Vec<u8>)>,
    }

    impl Scripted {
        fn new(replies: Vec<Response>) -> Self {
            Self {
                replies: replies.into(),
                sent: Vec::new(),
            }
        }
    }

    impl AuthChannel for Scripted {
        fn exchange(
            &mut self,
            opcode: Opcode,
            key: &[u8],
            value: &[u8],
        ) -> Result<Response, ProtocolError> {
            self.sent.push((opcode, key.to_vec(), value.to_vec()));
            self.replies.pop_front().ok_or_else(|| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "script exhausted",
                ))
            })
        }
    }

    #[test]
    fn test_select_prefers_login() {
        assert_eq!(
            Mechanism::select(&["DIGEST-MD5", "CRAM-MD5", "PLAIN", "LOGIN"]),
            Some(Mechanism::Login)
        );
        assert_eq!(
            Mechanism::select(&["DIGEST-MD5", "CRAM-MD5"]),
            Some(Mechanism::CramMd5)
        );
        assert_eq!(Mechanism::select(&["GSSAPI"]), None);
    }

    #[test]
    fn test_plain_payload() {
        let creds = creds();
        let sasl = SaslClient::new(Mechanism::Plain, &creds, "host");
        assert_eq!(sasl.initial_response(), b"\0memcache\0secret");
        assert_eq!(sasl.respond(b"ignored").unwrap(), b"\0memcache\0secret");
    }

    #[test]
    fn test_cram_md5_known_answer() {
        let creds = Credentials::new("tim", "tanstaaftanstaaf");
        let sasl = SaslClient::new(Mechanism::CramMd5, &creds, "host");
        assert!(sasl.initial_response().is_empty());
        let response = sasl
            .respond(b"<1896.697170952@postoffice.reston.mci.net>")
            .unwrap();
        assert_eq!(response, b"tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn test_login_prompts() {
        let creds = creds();
        let sasl = SaslClient::new(Mechanism::Login, &creds, "host");
        assert!(sasl.initial_response().is_empty());
        assert_eq!(sasl.respond(b"User Name:").unwrap(), b"memcache");
        assert_eq!(sasl.respond(b"PASSWORD:").unwrap(), b"secret");
        assert!(matches!(
            sasl.respond(b"Favourite colour?"),
            Err(AuthError::UnexpectedChallenge { .. })
        ));
    }

    #[test]
    fn test_digest_md5_known_answer() {
        let challenge =
            r#"realm="cache.example.com",nonce="OA6MG9tEQGm2hh",qop="auth",charset=utf-8,maxbuf=65536"#;
        let response =
            digest_md5_response(challenge, &creds(), "10.0.0.5", "OA6MHXh6VqTrRk").unwrap();
        assert_eq!(
            response,
            "username=\"memcache\", realm=\"cache.example.com\", nonce=\"OA6MG9tEQGm2hh\", \
             cnonce=\"OA6MHXh6VqTrRk\", nc=\"00000001\", qop=\"auth\", \
             digest-uri=\"memcached/cache.example.com\", \
             response=\"c3f2c162d6fe7e8c6bef0b96eafc7c2a\""
        );
    }

    #[test]
    fn test_digest_md5_sess() {
        let challenge = r#"realm="cache.example.com",nonce="OA6MG9tEQGm2hh",qop="auth",algorithm=md5-sess"#;
        let response =
            digest_md5_response(challenge, &creds(), "10.0.0.5", "OA6MHXh6VqTrRk").unwrap();
        assert!(response.ends_with("response=\"26a663e648b386a5a9c308bdbd21b948\""));
    }

    #[test]
    fn test_digest_md5_without_realm_or_qop() {
        let response =
            digest_md5_response(r#"nonce="OA6MG9tEQGm2hh""#, &creds(), "10.0.0.5", "OA6MHXh6VqTrRk")
                .unwrap();
        assert!(!response.contains("realm="));
        assert!(!response.contains("qop="));
        assert!(response.contains("digest-uri=\"memcached/10.0.0.5\""));
        assert!(response.ends_with("response=\"46435bc2276517d079b3d3f99ee86de8\""));
    }

    #[test]
    fn test_digest_md5_rspauth_round_is_empty() {
        let response =
            digest_md5_response("rspauth=ea40f60335c427b5527b84dbabcdfffd", &creds(), "h", "c")
                .unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn test_digest_md5_requires_nonce() {
        assert!(digest_md5_response(r#"realm="r""#, &creds(), "h", "c").is_err());
    }

    #[test]
    fn test_digest_md5_random_cnonce() {
        let creds = creds();
        let sasl = SaslClient::new(Mechanism::DigestMd5, &creds, "host");
        let reply = String::from_utf8(sasl.respond(br#"nonce="abc",qop="auth""#).unwrap()).unwrap();
        let cnonce = parse_challenge(&reply).remove("cnonce").unwrap();
        assert_eq!(cnonce.len(), 16);
        assert!(cnonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_parse_challenge_quoted_commas() {
        let parsed = parse_challenge(r#"realm="a,b", nonce="x\"y", qop="auth,auth-int", stale=true"#);
        assert_eq!(parsed["realm"], "a,b");
        assert_eq!(parsed["nonce"], "x\"y");
        assert_eq!(parsed["qop"], "auth,auth-int");
        assert_eq!(parsed["stale"], "true");
    }

    #[test]
    fn test_negotiate_login_flow() {
        let mut channel = Scripted::new(vec![
            reply(0x00, b"CRAM-MD5 LOGIN PLAIN"),
            reply(0x21, b"Username:"),
            reply(0x21, b"Password:"),
            reply(0x00, b"Authenticated"),
        ]);
        let creds = creds();
        let mut negotiator = Negotiator::new(&creds, "host");
        assert_eq!(negotiator.state(), AuthState::Negotiating);
        assert_eq!(negotiator.run(&mut channel).unwrap(), Mechanism::Login);
        assert_eq!(negotiator.state(), AuthState::Authenticated);

        let sent = &channel.sent;
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].0, Opcode::SaslListMechs);
        assert_eq!(sent[1].0, Opcode::SaslAuth);
        assert_eq!(sent[1].1, b"LOGIN");
        assert!(sent[1].2.is_empty());
        assert_eq!(sent[2].0, Opcode::SaslStep);
        assert_eq!(sent[2].1, b"LOGIN");
        assert_eq!(sent[2].2, b"memcache");
        assert_eq!(sent[3].2, b"secret");
    }

    #[test]
    fn test_negotiate_plain_single_round() {
        let mut channel = Scripted::new(vec![reply(0x00, b"PLAIN"), reply(0x00, b"")]);
        assert_eq!(
            negotiate(&mut channel, "host", &creds()).unwrap(),
            Mechanism::Plain
        );
        assert_eq!(channel.sent[1].2, b"\0memcache\0secret");
    }

    #[test]
    fn test_negotiate_unknown_command() {
        let mut channel = Scripted::new(vec![reply(0x81, b"Unknown command")]);
        assert!(matches!(
            negotiate(&mut channel, "host", &creds()),
            Err(AuthError::NotSupported)
        ));
    }

    #[test]
    fn test_negotiate_no_suitable_mechanism() {
        let mut channel = Scripted::new(vec![reply(0x00, b"GSSAPI SCRAM-SHA-1")]);
        match negotiate(&mut channel, "host", &creds()) {
            Err(AuthError::NoSuitableMechanism(list)) => {
                assert_eq!(list, vec!["GSSAPI", "SCRAM-SHA-1"])
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_negotiate_rejected() {
        let mut channel = Scripted::new(vec![reply(0x00, b"PLAIN"), reply(0x20, b"Auth failure")]);
        let creds = creds();
        let mut negotiator = Negotiator::new(&creds, "host");
        assert!(matches!(
            negotiator.run(&mut channel),
            Err(AuthError::Rejected)
        ));
        assert_eq!(negotiator.state(), AuthState::Failed);
    }

    #[test]
    fn test_negotiate_gives_up_on_endless_challenges() {
        let mut replies = vec![reply(0x00, b"PLAIN")];
        replies.extend((0..=MAX_AUTH_ROUNDS).map(|_| reply(0x21, b"")));
        let mut channel = Scripted::new(replies);
        assert!(matches!(
            negotiate(&mut channel, "host", &creds()),
            Err(AuthError::TooManyRounds(MAX_AUTH_ROUNDS))
        ));
    }
}
