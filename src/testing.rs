//! In-process fake memcached for tests
//!
//! Speaks just enough of the binary protocol to exercise the client:
//! get/set/delete/incr/decr against an in-memory map, PLAIN auth, and
//! scripted replies for failure cases. Every request frame is recorded.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::utils::packet::encode_response;

/// One decoded request frame
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub opcode: u8,
    pub extras: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// What the fake does with a request
pub(crate) enum Reply {
    Frame(Vec<u8>),
    /// Send arbitrary bytes, e.g. a broken frame
    Raw(Vec<u8>),
    /// Never answer
    Silent,
    /// Hang up
    Close,
}

impl Reply {
    pub fn status(opcode: u8, status: u16) -> Self {
        Reply::Frame(encode_response(opcode, status, b"", b"", b""))
    }

    pub fn value(opcode: u8, status: u16, extras: &[u8], value: &[u8]) -> Self {
        Reply::Frame(encode_response(opcode, status, extras, b"", value))
    }
}

#[derive(Default)]
pub(crate) struct Session {
    pub authenticated: bool,
}

type Handler = dyn Fn(&Request, &mut Session) -> Reply + Send + Sync;

pub(crate) struct FakeServer {
    port: u16,
    requests: Arc<Mutex<Vec<Request>>>,
    connections: Arc<Mutex<usize>>,
    shutdown: Arc<AtomicBool>,
}

impl FakeServer {
    /// Serve every request with `handler`
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(Arc::new(move |request: &Request, _: &mut Session| handler(request)))
    }

    /// In-memory memcached without authentication
    pub fn memcached() -> Self {
        let store = Store::default();
        Self::spawn(Arc::new(move |request: &Request, _: &mut Session| {
            store.handle(request)
        }))
    }

    /// In-memory memcached requiring PLAIN auth with the given pair
    pub fn with_auth(username: &str, password: &str) -> Self {
        let store = Store::default();
        let expected = format!("\0{}\0{}", username, password).into_bytes();
        Self::spawn(Arc::new(move |request: &Request, session: &mut Session| {
            match request.opcode {
                0x20 => Reply::value(0x20, 0x0000, b"", b"PLAIN"),
                0x21 | 0x22 => {
                    if request.key == b"PLAIN" && request.value == expected {
                        session.authenticated = true;
                        Reply::value(request.opcode, 0x0000, b"", b"Authenticated")
                    } else {
                        Reply::value(request.opcode, 0x0020, b"", b"Auth failure")
                    }
                }
                _ if !session.authenticated => Reply::status(request.opcode, 0x0020),
                _ => store.handle(request),
            }
        }))
    }

    fn spawn(handler: Arc<Handler>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake server");
        let port = listener.local_addr().expect("local addr").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (reqs, conns, stop) = (requests.clone(), connections.clone(), shutdown.clone());
        thread::spawn(move || {
            for stream in listener.incoming() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                *conns.lock() += 1;
                let (handler, reqs) = (handler.clone(), reqs.clone());
                thread::spawn(move || serve(stream, handler, reqs));
            }
        });

        Self {
            port,
            requests,
            connections,
            shutdown,
        }
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// TCP connections accepted so far
    pub fn connections(&self) -> usize {
        *self.connections.lock()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // wake the accept loop
        let _ = TcpStream::connect(("127.0.0.1", self.port));
    }
}

fn serve(mut stream: TcpStream, handler: Arc<Handler>, requests: Arc<Mutex<Vec<Request>>>) {
    let mut session = Session::default();
    loop {
        let mut header = [0u8; 24];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let extras_len = header[4] as usize;
        let body_len =
            u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let mut body = vec![0u8; body_len];
        if stream.read_exact(&mut body).is_err() {
            return;
        }

        let value = body.split_off(extras_len + key_len);
        let key = body.split_off(extras_len);
        let request = Request {
            opcode: header[1],
            extras: body,
            key,
            value,
        };
        requests.lock().push(request.clone());

        match handler(&request, &mut session) {
            Reply::Frame(bytes) | Reply::Raw(bytes) => {
                if stream.write_all(&bytes).is_err() {
                    return;
                }
            }
            Reply::Silent => {}
            Reply::Close => {
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        }
    }
}

/// Shared key-value state behind `FakeServer::memcached`
#[derive(Default, Clone)]
struct Store {
    items: Arc<Mutex<HashMap<Vec<u8>, (u32, Vec<u8>)>>>,
}

impl Store {
    fn handle(&self, request: &Request) -> Reply {
        let op = request.opcode;
        let mut items = self.items.lock();
        match op {
            0x00 => match items.get(&request.key) {
                Some((flags, value)) => Reply::value(op, 0x0000, &flags.to_be_bytes(), value),
                None => Reply::value(op, 0x0001, b"", b"Not found"),
            },
            0x01 => {
                let flags = u32::from_be_bytes(request.extras[..4].try_into().unwrap());
                items.insert(request.key.clone(), (flags, request.value.clone()));
                Reply::status(op, 0x0000)
            }
            0x04 => match items.remove(&request.key) {
                Some(_) => Reply::status(op, 0x0000),
                None => Reply::value(op, 0x0001, b"", b"Not found"),
            },
            0x05 | 0x06 => {
                let delta = u64::from_be_bytes(request.extras[..8].try_into().unwrap());
                let initial = u64::from_be_bytes(request.extras[8..16].try_into().unwrap());
                let next = match items.get(&request.key) {
                    None => initial,
                    Some((_, current)) => {
                        let Some(current) = std::str::from_utf8(current)
                            .ok()
                            .and_then(|s| s.parse::<u64>().ok())
                        else {
                            return Reply::value(op, 0x0006, b"", b"Non-numeric server-side value");
                        };
                        if op == 0x05 {
                            current.wrapping_add(delta)
                        } else {
                            current.saturating_sub(delta)
                        }
                    }
                };
                items.insert(request.key.clone(), (0, next.to_string().into_bytes()));
                Reply::value(op, 0x0000, b"", &next.to_be_bytes())
            }
            _ => Reply::value(op, 0x0081, b"", b"Unknown command"),
        }
    }
}

/// A local port with nothing listening on it
pub(crate) fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}
