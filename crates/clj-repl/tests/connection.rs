// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

//! Connection lifecycle and session discovery against a scripted server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use clj_repl::{CljConnection, CljError, SessionKind};
use nrepl_proto::{Message, NReplError, codec};

/// Accept one connection per scripted reply, read one request, record it,
/// answer, close. Returns the bound address and the request log.
async fn start_script(replies: Vec<&'static [u8]>) -> (String, Arc<Mutex<Vec<Message>>>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("local addr").to_string();
    let log: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let server_log = log.clone();

    tokio::spawn(async move {
        for reply in replies {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };

            let mut buffer: Vec<u8> = Vec::new();
            let mut read_buf = [0u8; 1024];
            let request = loop {
                if let Ok((message, _)) = codec::decode_one(&buffer) {
                    break message;
                }
                let Ok(n) = socket.read(&mut read_buf).await else {
                    return;
                };
                if n == 0 {
                    return;
                }
                buffer.extend_from_slice(&read_buf[..n]);
            };
            server_log.lock().unwrap().push(request);

            let _ = socket.write_all(reply).await;
        }
    });

    (addr, log)
}

fn ops(log: &Arc<Mutex<Vec<Message>>>) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .map(|m| m.field_str("op").unwrap_or("?").to_string())
        .collect()
}

fn split_host_port(addr: &str) -> (String, u16) {
    let (host, port) = addr.rsplit_once(':').expect("host:port");
    (host.to_string(), port.parse().expect("port"))
}

const HANDSHAKE: [&[u8]; 2] = [
    b"d11:new-session2:h17:session4:root6:statusl4:doneee",
    b"d7:session2:h16:statusl4:done14:session-closedee",
];

#[tokio::test]
async fn connect_handshakes_with_a_throwaway_session() {
    let (addr, log) = start_script(HANDSHAKE.to_vec()).await;
    let (host, port) = split_host_port(&addr);

    let connection = CljConnection::new();
    assert!(!connection.is_connected());

    connection.connect(&host, port).await.expect("connect failed");

    assert!(connection.is_connected());
    assert_eq!(connection.current().unwrap().port, port);
    assert_eq!(ops(&log), vec!["clone", "close"]);
    assert_eq!(log.lock().unwrap()[1].session(), Some("h1"));
}

#[tokio::test]
async fn connect_fails_when_nothing_listens() {
    let connection = CljConnection::with_timeout(Duration::from_secs(2));
    let result = connection.connect("127.0.0.1", 39998).await;

    assert!(matches!(result, Err(CljError::Nrepl(_))));
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn operations_require_a_connection() {
    let connection = CljConnection::new();
    let result = connection.list_sessions().await;

    assert!(matches!(
        result,
        Err(CljError::Nrepl(NReplError::NotConnected))
    ));
}

#[tokio::test]
async fn refused_connection_drops_the_descriptor() {
    let (addr, _log) = start_script(HANDSHAKE.to_vec()).await;
    let (host, port) = split_host_port(&addr);

    let connection = CljConnection::with_timeout(Duration::from_secs(2));
    connection.connect(&host, port).await.expect("connect failed");
    assert!(connection.is_connected());

    // The script is exhausted: the listener is gone, the server is "dead".
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = connection.list_sessions().await;
    match result {
        Err(e) => assert!(e.is_connection_refused(), "got: {e:?}"),
        Ok(_) => panic!("expected connection refused"),
    }
    assert!(
        !connection.is_connected(),
        "a refused connection must tear down cached state"
    );
}

#[tokio::test]
async fn clj_files_route_to_the_default_session() {
    let (addr, log) = start_script(HANDSHAKE.to_vec()).await;
    let (host, port) = split_host_port(&addr);

    let connection = CljConnection::new();
    connection.connect(&host, port).await.expect("connect failed");

    let session = connection
        .session_for_file("src/myproject/core.clj")
        .await
        .expect("routing failed");

    assert_eq!(session.kind, SessionKind::Clojure);
    assert!(session.id.is_none());
    // No discovery traffic for Clojure files.
    assert_eq!(ops(&log), vec!["clone", "close"]);
}

#[tokio::test]
async fn cljs_files_trigger_discovery_and_cache_the_result() {
    let (addr, log) = start_script(vec![
        HANDSHAKE[0],
        HANDSHAKE[1],
        // ls-sessions: a JVM session and a ClojureScript one.
        b"d8:sessionsl5:s-jvm6:s-cljse6:statusl4:doneee",
        // Probe 1: clone of s-jvm, probe eval throws, clone closed.
        b"d11:new-session2:p17:session5:s-jvm6:statusl4:doneee",
        b"d2:ex36:class clojure.lang.ExceptionInfo: js7:session2:p16:statusl10:eval-erroree\
          d7:session2:p16:statusl4:doneee",
        b"d7:session2:p16:statusl4:done14:session-closedee",
        // Probe 2: clone of s-cljs answers 42.
        b"d11:new-session2:p27:session6:s-cljs6:statusl4:doneee",
        b"d7:session2:p25:value2:42e\
          d7:session2:p26:statusl4:doneee",
        b"d7:session2:p26:statusl4:done14:session-closedee",
    ])
    .await;
    let (host, port) = split_host_port(&addr);

    let connection = CljConnection::new();
    connection.connect(&host, port).await.expect("connect failed");

    let session = connection
        .session_for_file("src/myproject/core.cljs")
        .await
        .expect("discovery failed");

    assert_eq!(session.kind, SessionKind::ClojureScript);
    assert_eq!(session.id.as_deref(), Some("s-cljs"));
    assert_eq!(
        ops(&log),
        vec![
            "clone", "close", // handshake
            "ls-sessions",
            "clone", "eval", "close", // JVM probe
            "clone", "eval", "close", // ClojureScript probe
        ]
    );

    // Probes clone from the candidates, not from the root session.
    {
        let log = log.lock().unwrap();
        assert_eq!(log[3].session(), Some("s-jvm"));
        assert_eq!(log[6].session(), Some("s-cljs"));
    }

    // Second lookup hits the cache: the exhausted script would hang any
    // further exchange.
    let cached = connection
        .session_for_file("src/myproject/other.cljs")
        .await
        .expect("cached routing failed");
    assert_eq!(cached.id.as_deref(), Some("s-cljs"));
}
