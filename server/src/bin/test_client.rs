use bincode::{deserialize, serialize};
use shared::{Packet, PROTOCOL_VERSION};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

async fn send(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    packet: &Packet,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    socket.send_to(&data, server_addr).await?;
    Ok(())
}

/// Prints everything the server sends until it goes quiet for `wait`
async fn drain(socket: &UdpSocket, buf: &mut [u8], wait: Duration) {
    while let Ok(Ok((len, _))) = timeout(wait, socket.recv_from(buf)).await {
        match deserialize::<Packet>(&buf[0..len]) {
            Ok(Packet::Ack {
                request_id,
                sequence,
            }) => println!("  Request {} queued as sequence {}", request_id, sequence),
            Ok(Packet::Rejected { request_id, reason }) => {
                println!("  Request {} rejected: {}", request_id, reason)
            }
            Ok(Packet::ServerEvent {
                tick_id,
                type_identifier,
                payload_json,
            }) => println!("  Tick {}: {} {}", tick_id, type_identifier, payload_json),
            Ok(other) => println!("  Unexpected packet: {:?}", other),
            Err(e) => println!("  Failed to deserialize packet: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let server_addr = "127.0.0.1:8080".parse::<SocketAddr>()?;
    let player_id = format!("tester-{}", socket.local_addr()?.port());

    let join = Packet::Join {
        client_version: PROTOCOL_VERSION,
        player_id: player_id.clone(),
        device_id: None,
        is_guest: true,
        metadata: BTreeMap::new(),
    };
    println!("Joining {} as {}", server_addr, player_id);
    send(&socket, server_addr, &join).await?;

    let mut buf = [0u8; 4096];
    let (len, addr) = socket.recv_from(&mut buf).await?;
    println!("Received {} bytes from {}", len, addr);

    match deserialize::<Packet>(&buf[0..len])? {
        Packet::Joined {
            player_id,
            client_id,
            session_id,
        } => {
            println!(
                "Joined as {} (client {}, session {})",
                player_id, client_id, session_id
            );

            let mut request_id = 1;

            // Walk in a circle, chatting every few steps
            for i in 0..10 {
                let angle = i as f32 / 5.0;
                let move_to = serde_json::json!({
                    "x": 400.0 + 150.0 * angle.sin(),
                    "y": 300.0 + 150.0 * angle.cos(),
                });
                let action = Packet::Action {
                    request_id,
                    type_identifier: "MoveTo".to_string(),
                    payload_json: move_to.to_string(),
                };
                println!("Sending action {}: {:?}", request_id, action);
                send(&socket, server_addr, &action).await?;
                request_id += 1;

                if i % 3 == 0 {
                    let chat = Packet::ClientEvent {
                        request_id,
                        type_identifier: "Chat".to_string(),
                        payload_json: serde_json::json!({ "text": format!("step {}", i) })
                            .to_string(),
                    };
                    send(&socket, server_addr, &chat).await?;
                    request_id += 1;
                }

                send(&socket, server_addr, &Packet::Heartbeat).await?;
                drain(&socket, &mut buf, Duration::from_millis(200)).await;

                sleep(Duration::from_secs(1)).await;
            }

            println!("Sending leave");
            send(&socket, server_addr, &Packet::Leave).await?;
            drain(&socket, &mut buf, Duration::from_millis(500)).await;

            println!("Test client finished");
        }
        Packet::Disconnected { reason } => println!("Join refused: {}", reason),
        other => println!("Expected Joined but got: {:?}", other),
    }

    Ok(())
}
