// Full proxy over loopback TCP

use sockslite::{Socks5Server, UserPass};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

async fn start_proxy(auth: Option<UserPass>) -> SocketAddr {
    let mut server = Socks5Server::new("127.0.0.1:0").with_auth(auth);
    let addr = server.bind().await.unwrap();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    addr
}

fn connect_request(target: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(target) = target else {
        panic!("expected an IPv4 target");
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&target.ip().octets());
    request.extend_from_slice(&target.port().to_be_bytes());
    request
}

async fn expect_success_reply(client: &mut TcpStream) {
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
    // Bound address is the proxy's end of the outbound loopback connection
    assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
    assert_ne!(u16::from_be_bytes([reply[8], reply[9]]), 0);
}

async fn round_trip(client: &mut TcpStream, payload: &[u8]) {
    let mut echoed = vec![0u8; payload.len()];
    let (mut reader, mut writer) = client.split();

    // Read while writing so large payloads cannot fill both socket buffers
    let (written, read) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(writer.write_all(payload), reader.read_exact(&mut echoed))
    })
    .await
    .unwrap();
    written.unwrap();
    read.unwrap();
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn test_proxy_no_auth() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(None).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut selection = [0u8; 2];
    client.read_exact(&mut selection).await.unwrap();
    assert_eq!(selection, [0x05, 0x00]);

    client.write_all(&connect_request(echo)).await.unwrap();
    expect_success_reply(&mut client).await;

    round_trip(&mut client, b"ping").await;

    // Larger than one relay buffer
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    round_trip(&mut client, &payload).await;
}

#[tokio::test]
async fn test_proxy_with_auth() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(Some(UserPass {
        username: "bob".to_string(),
        password: "xyz".to_string(),
    }))
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
    let mut selection = [0u8; 2];
    client.read_exact(&mut selection).await.unwrap();
    assert_eq!(selection, [0x05, 0x02]);

    client
        .write_all(&[0x01, 0x03, b'b', b'o', b'b', 0x03, b'x', b'y', b'z'])
        .await
        .unwrap();
    let mut status = [0u8; 2];
    client.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [0x01, 0x00]);

    client.write_all(&connect_request(echo)).await.unwrap();
    expect_success_reply(&mut client).await;

    round_trip(&mut client, b"authenticated ping").await;
}

#[tokio::test]
async fn test_proxy_serves_concurrent_clients() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(None).await;

    let mut clients = Vec::new();
    for i in 0..8u8 {
        clients.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(proxy).await.unwrap();
            client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
            let mut selection = [0u8; 2];
            client.read_exact(&mut selection).await.unwrap();

            client.write_all(&connect_request(echo)).await.unwrap();
            expect_success_reply(&mut client).await;

            round_trip(&mut client, &[i; 64]).await;
        }));
    }

    for client in clients {
        client.await.unwrap();
    }
}

#[tokio::test]
async fn test_proxy_closes_when_target_closes() {
    // Target that accepts and immediately hangs up
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let proxy = start_proxy(None).await;
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut selection = [0u8; 2];
    client.read_exact(&mut selection).await.unwrap();

    client.write_all(&connect_request(target)).await.unwrap();
    expect_success_reply(&mut client).await;

    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}
