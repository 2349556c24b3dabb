//! End-to-end coverage: real listener, real engine, blocking client.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use lkv_client::{ClientTtl, LkvClient, RespValue};
use lkv_common::Config;
use lkv_engine::Engine;
use lkv_server::{run_timer_loop, serve, ServerState};

async fn start_server(engine: Arc<Engine>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let state = Arc::new(ServerState::new(Arc::clone(&engine)));
    tokio::spawn(serve(state, listener));
    tokio::spawn(run_timer_loop(engine));
    addr
}

async fn start_default_server() -> String {
    start_server(Arc::new(Engine::in_memory(Config::default()))).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn int_string_roundtrip() {
    let addr = start_default_server().await;
    tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&addr).unwrap();
        assert_eq!(client.ping().unwrap(), b"PONG");

        client.set(b"counter", b"100").unwrap();
        assert_eq!(client.incr_by(b"counter", 23).unwrap(), 123);
        assert_eq!(client.type_of(b"counter").unwrap(), b"int");
        assert_eq!(client.get(b"counter").unwrap().unwrap(), b"123");

        client.set(b"greeting", b"hello").unwrap();
        assert_eq!(client.type_of(b"greeting").unwrap(), b"string");
        assert_eq!(client.get(b"missing").unwrap(), None);
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_push_pop_range() {
    let addr = start_default_server().await;
    tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&addr).unwrap();
        assert_eq!(client.rpush(b"L", &[b"a", b"b", b"c", b"d"]).unwrap(), 4);
        assert_eq!(client.lpop(b"L").unwrap().unwrap(), b"a");
        assert_eq!(
            client.lrange(b"L", 0, -1).unwrap(),
            vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
        assert_eq!(
            client.lrange(b"L", -2, -1).unwrap(),
            vec![b"c".to_vec(), b"d".to_vec()]
        );
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hash_and_set_commands() {
    let addr = start_default_server().await;
    tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&addr).unwrap();
        client.hset(b"H", &[(b"a", b"1"), (b"b", b"2")]).unwrap();
        assert_eq!(client.hget(b"H", b"a").unwrap().unwrap(), b"1");
        assert_eq!(
            client.command(&[b"hdel", b"H", b"b"]).unwrap(),
            RespValue::Integer(1)
        );
        assert_eq!(
            client.command(&[b"hlen", b"H"]).unwrap(),
            RespValue::Integer(1)
        );

        assert_eq!(client.sadd(b"T", &[b"x", b"y"]).unwrap(), 2);
        assert_eq!(client.scard(b"T").unwrap(), 2);
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_type_is_an_error_reply() {
    let addr = start_default_server().await;
    tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&addr).unwrap();
        client.set(b"K", b"hello").unwrap();
        match client.command(&[b"lpush", b"K", b"x"]).unwrap() {
            RespValue::Error(message) => {
                assert!(message.starts_with(b"WRONGTYPE"));
            }
            other => panic!("expected error reply, got {other:?}"),
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expire_removes_the_key() {
    let addr = start_default_server().await;
    let addr2 = addr.clone();
    tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&addr2).unwrap();
        client.set(b"S", b"42").unwrap();
        assert!(client.expire(b"S", 1).unwrap());
        match client.ttl(b"S").unwrap() {
            ClientTtl::ExpiresIn(remaining) => assert!(remaining <= Duration::from_secs(1)),
            other => panic!("expected a ttl, got {other:?}"),
        }
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;

    tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&addr).unwrap();
        assert!(!client.exists(b"S").unwrap());
        assert_eq!(client.ttl(b"S").unwrap(), ClientTtl::Missing);
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_reaches_subscribers() {
    let addr = start_default_server().await;
    let sub_addr = addr.clone();

    let subscriber = tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&sub_addr).unwrap();
        let reply = client.command(&[b"subscribe", b"news"]).unwrap();
        assert_eq!(
            reply,
            RespValue::Array(vec![
                RespValue::Bulk(Some(b"subscribe".to_vec())),
                RespValue::Bulk(Some(b"news".to_vec())),
                RespValue::Integer(1),
            ])
        );
        // Block until the published frame arrives.
        let pushed = client.read_push().unwrap();
        assert_eq!(
            pushed,
            RespValue::Array(vec![
                RespValue::Bulk(Some(b"message".to_vec())),
                RespValue::Bulk(Some(b"news".to_vec())),
                RespValue::Bulk(Some(b"breaking".to_vec())),
            ])
        );
    });

    // Give the subscription a moment to register before publishing.
    tokio::time::sleep(Duration::from_millis(500)).await;
    tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&addr).unwrap();
        assert_eq!(
            client.command(&[b"publish", b"news", b"breaking"]).unwrap(),
            RespValue::Integer(1)
        );
    })
    .await
    .unwrap();

    subscriber.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_replays_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.dumpfile = dir.path().join("dump.aof").to_string_lossy().into_owned();

    {
        let engine = Arc::new(Engine::new(config.clone()));
        let addr = start_server(Arc::clone(&engine)).await;
        tokio::task::spawn_blocking(move || {
            let mut client = LkvClient::connect(&addr).unwrap();
            client.set(b"a", b"1").unwrap();
            client.rpush(b"L", &[b"x", b"y"]).unwrap();
            client.hset(b"H", &[(b"f", b"v")]).unwrap();
        })
        .await
        .unwrap();
        engine.flush_log().unwrap();
    }

    let engine = Arc::new(Engine::new(config));
    engine.restore().unwrap();
    let addr = start_server(engine).await;
    tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&addr).unwrap();
        assert_eq!(client.get(b"a").unwrap().unwrap(), b"1");
        assert_eq!(
            client.lrange(b"L", 0, -1).unwrap(),
            vec![b"x".to_vec(), b"y".to_vec()]
        );
        assert_eq!(client.hget(b"H", b"f").unwrap().unwrap(), b"v");
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_command_reply() {
    let addr = start_default_server().await;
    tokio::task::spawn_blocking(move || {
        let mut client = LkvClient::connect(&addr).unwrap();
        match client.command(&[b"nosuchverb"]).unwrap() {
            RespValue::Error(message) => {
                assert_eq!(message, b"ERROR unsupported command");
            }
            other => panic!("expected error, got {other:?}"),
        }
        // The session stays usable after a command error.
        assert_eq!(client.ping().unwrap(), b"PONG");
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pipelined_commands_are_answered_in_order() {
    let addr = start_default_server().await;
    tokio::task::spawn_blocking(move || {
        use std::io::{BufRead, BufReader, Write};
        let mut stream = std::net::TcpStream::connect(&addr).unwrap();
        stream
            .write_all(b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$1\r\n1\r\n*2\r\n$3\r\nget\r\n$1\r\nk\r\n")
            .unwrap();
        let mut reader = BufReader::new(stream);
        let mut first = Vec::new();
        reader.read_until(b'\n', &mut first).unwrap();
        assert_eq!(first, b"+OK\r\n");
        let mut header = Vec::new();
        reader.read_until(b'\n', &mut header).unwrap();
        assert_eq!(header, b"$1\r\n");
        let mut value = Vec::new();
        reader.read_until(b'\n', &mut value).unwrap();
        assert_eq!(value, b"1\r\n");
    })
    .await
    .unwrap();
}
