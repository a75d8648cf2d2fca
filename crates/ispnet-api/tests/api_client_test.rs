#![allow(clippy::unwrap_used)]
// Integration tests for `ApiClient` against an in-process fake router.

use std::time::Duration;

use secrecy::SecretString;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ispnet_api::routeros::menu;
use ispnet_api::{ApiClient, Error, RouterSession, Row, TransportConfig};

// ── Fake router ─────────────────────────────────────────────────────

// Test words stay under 0x80 bytes except the export body, which stays
// under 0x4000, so only the one- and two-byte length forms are needed.
fn encode(words: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for word in words {
        let len = word.len();
        if len < 0x80 {
            out.push(u8::try_from(len).unwrap());
        } else {
            let v = u16::try_from(len).unwrap() | 0x8000;
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(word.as_bytes());
    }
    out.push(0);
    out
}

async fn read_sentence(stream: &mut TcpStream) -> Option<Vec<String>> {
    let mut words = Vec::new();
    loop {
        let first = stream.read_u8().await.ok()?;
        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let second = stream.read_u8().await.ok()?;
            (usize::from(first & 0x3F) << 8) | usize::from(second)
        };
        if len == 0 {
            return Some(words);
        }
        let mut buf = vec![0; len];
        stream.read_exact(&mut buf).await.ok()?;
        words.push(String::from_utf8(buf).unwrap());
    }
}

/// Serve one connection: accept `admin`/`secret`, answer a small command set.
async fn serve(mut stream: TcpStream) {
    while let Some(words) = read_sentence(&mut stream).await {
        let reply: Vec<Vec<&str>> = match words[0].as_str() {
            "/login" if words.contains(&"=password=secret".to_string()) => vec![vec!["!done"]],
            "/login" => vec![
                vec!["!trap", "=message=invalid user name or password (6)"],
                vec!["!done"],
            ],
            "/ip/pool/print" if words.iter().any(|w| w == "?name=missing") => vec![vec!["!done"]],
            "/ip/pool/print" => vec![
                vec!["!re", "=.id=*1", "=name=pool-a", "=ranges=10.0.0.2-10.0.0.254"],
                vec!["!re", "=.id=*2", "=name=pool-b", "=ranges=10.1.0.0/24"],
                vec!["!done"],
            ],
            "/ip/pool/add" if words.iter().any(|w| w == "=name=pool-a") => vec![
                vec!["!trap", "=message=failure: already have such name"],
                vec!["!done"],
            ],
            "/ip/pool/add" => vec![vec!["!done", "=ret=*3"]],
            "/ip/pool/set" | "/ip/pool/remove" => vec![vec!["!done"]],
            "/execute" => vec![vec!["!done", "=ret=/ip pool\nadd name=pool-a"]],
            "/system/reboot" => vec![vec!["!fatal", "session terminated on request"]],
            "/slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                vec![vec!["!done"]]
            }
            _ => vec![
                vec!["!trap", "=category=0", "=message=no such command"],
                vec!["!done"],
            ],
        };
        for sentence in reply {
            if stream.write_all(&encode(&sentence)).await.is_err() {
                return;
            }
        }
    }
}

async fn spawn_router() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream));
        }
    });
    port
}

fn transport() -> TransportConfig {
    TransportConfig::default().with_timeout(Duration::from_millis(500))
}

async fn connect(port: u16) -> ApiClient {
    ApiClient::connect(
        "127.0.0.1",
        port,
        "admin",
        &SecretString::from("secret".to_string()),
        &transport(),
    )
    .await
    .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_rejected_maps_to_authentication() {
    let port = spawn_router().await;
    let result = ApiClient::connect(
        "127.0.0.1",
        port,
        "admin",
        &SecretString::from("wrong".to_string()),
        &transport(),
    )
    .await;

    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error"
    );
}

#[tokio::test]
async fn test_print_collects_re_rows_until_done() {
    let port = spawn_router().await;
    let mut client = connect(port).await;

    let rows = client.print(menu::IP_POOL, &[]).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("name"), Some("pool-b"));

    let none = client
        .print(menu::IP_POOL, &[("name", "missing")])
        .await
        .unwrap();
    assert!(none.is_empty());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_add_returns_ret_and_trap_keeps_stream_aligned() {
    let port = spawn_router().await;
    let mut client = connect(port).await;

    let dup = client
        .add(menu::IP_POOL, &Row::from([("name", "pool-a")]))
        .await;
    assert!(matches!(dup, Err(Error::Rejected { .. })));

    // The `!done` after the trap was consumed; the next reply is ours.
    let id = client
        .add(menu::IP_POOL, &Row::from([("name", "pool-c")]))
        .await
        .unwrap();
    assert_eq!(id, "*3");

    client
        .set(menu::IP_POOL, "*3", &Row::from([("comment", "x")]))
        .await
        .unwrap();
    client.remove(menu::IP_POOL, "*3").await.unwrap();
}

#[tokio::test]
async fn test_execute_reads_ret_from_done() {
    let port = spawn_router().await;
    let mut client = connect(port).await;

    let text = client.execute("/export").await.unwrap();
    assert_eq!(text, "/ip pool\nadd name=pool-a");
}

#[tokio::test]
async fn test_fatal_is_a_connection_error() {
    let port = spawn_router().await;
    let mut client = connect(port).await;

    let err = client
        .command("/system/reboot", &Row::new())
        .await
        .unwrap_err();
    assert!(err.is_connection(), "got: {err:?}");
}

#[tokio::test]
async fn test_slow_reply_times_out() {
    let port = spawn_router().await;
    let mut client = connect(port).await;

    let err = client.command("/slow", &Row::new()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "got: {err:?}");
}

#[tokio::test]
async fn test_refused_connection_is_a_connection_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = ApiClient::connect(
        "127.0.0.1",
        port,
        "admin",
        &SecretString::from("secret".to_string()),
        &transport(),
    )
    .await;
    assert!(matches!(result, Err(ref e) if e.is_connection()));
}
