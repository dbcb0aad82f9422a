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

//! Exchange tests against a scripted nREPL stand-in.
//!
//! The fake server accepts one connection per scripted step, reads one
//! complete bencode request, records it, and replies with the step's chunks.
//! That mirrors the real protocol shape: one socket per exchange, replies
//! fragmented however the script says.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use nrepl_proto::codec;
use nrepl_proto::{Message, NReplClient, NReplError};

struct Step {
    reply: Vec<Vec<u8>>,
    hold_open: bool,
}

impl Step {
    fn reply(chunks: &[&[u8]]) -> Self {
        Self {
            reply: chunks.iter().map(|c| c.to_vec()).collect(),
            hold_open: false,
        }
    }

    fn reply_then_stall(chunks: &[&[u8]]) -> Self {
        Self {
            hold_open: true,
            ..Self::reply(chunks)
        }
    }
}

/// Run the script on an ephemeral port. Returns the address and the log of
/// requests received, in order.
async fn start_script(steps: Vec<Step>) -> (String, Arc<Mutex<Vec<Message>>>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("local addr").to_string();
    let log: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let server_log = log.clone();

    tokio::spawn(async move {
        for step in steps {
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

            for chunk in &step.reply {
                if socket.write_all(chunk).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            if step.hold_open {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
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

#[tokio::test]
async fn eval_collects_fragmented_response_until_done() {
    let (addr, log) = start_script(vec![Step::reply(&[
        b"d7:session5:s-abc5:value184:Lorem ipsum dolor sit amet, consectetur adipiscing e",
        b"lit, sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.",
        b" Ipsum dolor sit amet consectetur adipiscing elit ut aliquam.e\
          d7:session5:s-abc6:statusl4:doneee",
    ])])
    .await;

    let client = NReplClient::new(addr);
    let outcome = client
        .eval("(clojure.string/join (repeat 3 lorem))", Some("s-abc"))
        .await
        .expect("eval failed");

    assert_eq!(outcome.messages.len(), 2);
    assert!(outcome.value().expect("value").starts_with("Lorem ipsum"));
    assert!(outcome.stacktrace.is_none());
    assert_eq!(ops(&log), vec!["eval"]);

    let log = log.lock().unwrap();
    assert_eq!(log[0].session(), Some("s-abc"));
    assert!(log[0].field_str("id").is_some());
}

#[tokio::test]
async fn clone_session_returns_new_session_id() {
    let (addr, log) = start_script(vec![Step::reply(&[
        b"d11:new-session5:s-abc7:session4:root6:statusl4:doneee",
    ])])
    .await;

    let client = NReplClient::new(addr);
    let session = client.clone_session(None).await.expect("clone failed");

    assert_eq!(session, "s-abc");
    assert_eq!(ops(&log), vec!["clone"]);
    // A root clone carries nothing but the op.
    assert!(log.lock().unwrap()[0].session().is_none());
}

#[tokio::test]
async fn clone_without_new_session_is_a_protocol_error() {
    let (addr, _log) = start_script(vec![Step::reply(&[
        b"d7:session4:root6:statusl4:doneee",
    ])])
    .await;

    let client = NReplClient::new(addr);
    let result = client.clone_session(None).await;

    assert!(matches!(result, Err(NReplError::Protocol { .. })));
}

#[tokio::test]
async fn complete_without_candidates_resolves_normally() {
    let (addr, _log) = start_script(vec![Step::reply(&[
        b"d7:session5:s-abc6:statusl4:doneee",
    ])])
    .await;

    let client = NReplClient::new(addr);
    let message = client.complete("zzz-no-such", "user").await.expect("complete failed");

    assert!(message.completions().is_none());
}

#[tokio::test]
async fn implicit_eval_closes_session_exactly_once_on_exception() {
    let (addr, log) = start_script(vec![
        Step::reply(&[b"d11:new-session5:s-abc7:session4:root6:statusl4:doneee"]),
        Step::reply(&[
            b"d2:ex25:class java.lang.Exception7:session5:s-abc6:statusl10:eval-erroree\
              d7:session5:s-abc6:statusl4:doneee",
        ]),
        Step::reply(&[
            b"d5:class19:java.lang.Exception7:session5:s-abce\
              d7:session5:s-abc6:statusl4:doneee",
        ]),
        Step::reply(&[b"d7:session5:s-abc6:statusl4:done14:session-closedee"]),
    ])
    .await;

    let client = NReplClient::new(addr);
    let outcome = client
        .eval("(throw (Exception.))", None)
        .await
        .expect("eval should resolve: an exception is data");

    assert_eq!(outcome.exception(), Some("class java.lang.Exception"));
    let stacktrace = outcome.stacktrace.expect("stacktrace fetched");
    assert_eq!(stacktrace[0].field_str("class"), Some("java.lang.Exception"));

    let observed = ops(&log);
    assert_eq!(observed, vec!["clone", "eval", "stacktrace", "close"]);
    assert_eq!(
        observed.iter().filter(|op| *op == "close").count(),
        1,
        "session must be closed exactly once"
    );

    // Every post-clone request targets the cloned session.
    let log = log.lock().unwrap();
    for request in log.iter().skip(1) {
        assert_eq!(request.session(), Some("s-abc"));
    }
}

#[tokio::test]
async fn implicit_eval_closes_session_on_success() {
    let (addr, log) = start_script(vec![
        Step::reply(&[b"d11:new-session5:s-abc7:session4:root6:statusl4:doneee"]),
        Step::reply(&[
            b"d2:ns4:user7:session5:s-abc5:value1:3e\
              d7:session5:s-abc6:statusl4:doneee",
        ]),
        Step::reply(&[b"d7:session5:s-abc6:statusl4:done14:session-closedee"]),
    ])
    .await;

    let client = NReplClient::new(addr);
    let outcome = client.eval("(+ 1 2)", None).await.expect("eval failed");

    assert_eq!(outcome.value(), Some("3"));
    assert!(outcome.stacktrace.is_none());
    assert_eq!(ops(&log), vec!["clone", "eval", "close"]);
}

#[tokio::test]
async fn exchange_times_out_when_server_never_finishes() {
    // The server sends a non-terminal message and then goes quiet with the
    // socket still open.
    let (addr, _log) = start_script(vec![Step::reply_then_stall(&[
        b"d3:out8:working\x0A7:session5:s-abce",
    ])])
    .await;

    let client = NReplClient::with_timeout(addr, Duration::from_millis(200));
    let result = client.eval("(Thread/sleep 100000)", Some("s-abc")).await;

    match result {
        Err(NReplError::Timeout { operation, .. }) => assert_eq!(operation, "eval"),
        other => panic!("expected timeout, got: {:?}", other),
    }
}

#[tokio::test]
async fn eof_before_done_is_a_transport_error() {
    let (addr, _log) = start_script(vec![Step::reply(&[
        b"d3:out8:working\x0A7:session5:s-abce",
    ])])
    .await;

    let client = NReplClient::new(addr);
    let result = client.eval("(+ 1 2)", Some("s-abc")).await;

    match result {
        Err(NReplError::Transport(e)) => {
            assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
        }
        other => panic!("expected transport error, got: {:?}", other),
    }
}

#[tokio::test]
async fn messages_after_terminal_are_dropped() {
    let (addr, _log) = start_script(vec![Step::reply(&[
        b"d7:session5:s-abc5:value1:3e\
          d7:session5:s-abc6:statusl4:doneee\
          d7:session5:s-abc3:out10:straggler e",
    ])])
    .await;

    let client = NReplClient::new(addr);
    let outcome = client.eval("(+ 1 2)", Some("s-abc")).await.expect("eval failed");

    assert_eq!(outcome.messages.len(), 2);
    assert!(outcome.output().is_empty());
}
