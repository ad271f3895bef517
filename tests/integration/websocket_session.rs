//! Real-time sessions over TCP against a fake RESP server

use crate::fixtures::{answer_for_round, token_for, FakeRespServer, WsTestClient, TEST_SECRET};
use serde_json::json;
use social_arena::config::AppConfig;
use social_arena::service::AppState;
use social_arena::store::{StoreEndpoint, TcpRespClient, DEFAULT_KEY_PREFIX};
use social_arena::types::{JoinStatus, ServerEvent, UserId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const PATH: &str = "/ws/match";

async fn start_service(store: &FakeRespServer) -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.service.host = "127.0.0.1".to_string();
    config.service.http_port = 0;
    config.transport.ws_port = 0;
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.store.url = store.url();

    let endpoint = StoreEndpoint::parse(&config.store.url).unwrap();
    let transport = Arc::new(TcpRespClient::new(endpoint, Duration::from_secs(2)));
    let state = Arc::new(AppState::with_transport(config, transport).unwrap());
    state.start().await.unwrap();
    state
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_upgrade_rejections() {
    let store = FakeRespServer::start().await;
    let state = start_service(&store).await;
    let addr = state.ws_addr().unwrap();

    let wrong_path = format!("/other?token={}", token_for(1));
    assert_eq!(WsTestClient::connect(addr, &wrong_path).await.err(), Some(404));
    assert_eq!(WsTestClient::connect(addr, PATH).await.err(), Some(401));
    assert_eq!(
        WsTestClient::connect(addr, &format!("{}?token=garbage", PATH))
            .await
            .err(),
        Some(401)
    );

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_message_keeps_connection_open() {
    let store = FakeRespServer::start().await;
    let state = start_service(&store).await;
    let addr = state.ws_addr().unwrap();

    let mut client = WsTestClient::connect_as(addr, PATH, 7).await;
    client.send_text("not json").await;
    assert_eq!(
        client.expect_event("error").await,
        ServerEvent::error("Invalid message")
    );

    client.send("dance", json!({})).await;
    assert_eq!(
        client.expect_event("error").await,
        ServerEvent::error("Unsupported event: dance")
    );

    client.send("joinQueue", json!({ "mode": "free" })).await;
    match client.expect_event("joinQueue").await {
        ServerEvent::JoinQueue(outcome) => {
            assert_eq!(outcome.status, JoinStatus::Queued);
            assert_eq!(outcome.players_needed, Some(9));
        }
        other => panic!("unexpected event {:?}", other),
    }

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_match_over_websocket() {
    let store = FakeRespServer::start().await;
    let state = start_service(&store).await;
    let addr = state.ws_addr().unwrap();
    let http = state.http_addr().unwrap();

    let players: Vec<UserId> = (1..=10).collect();
    let mut clients = Vec::new();
    for &player in &players {
        clients.push(WsTestClient::connect_as(addr, PATH, player).await);
    }

    for client in clients.iter_mut().take(9) {
        client.send("joinQueue", json!({ "mode": "free" })).await;
        match client.expect_event("joinQueue").await {
            ServerEvent::JoinQueue(outcome) => assert_eq!(outcome.status, JoinStatus::Queued),
            other => panic!("unexpected event {:?}", other),
        }
    }
    clients[9]
        .send("joinQueue", json!({ "mode": "free" }))
        .await;

    let mut game = None;
    for client in clients.iter_mut() {
        match client.expect_event("matchFound").await {
            ServerEvent::MatchFound { matched } => game = Some(matched),
            other => panic!("unexpected event {:?}", other),
        }
        match client.expect_event("roundState").await {
            ServerEvent::RoundState(state) => {
                assert_eq!(state.round_number, 1);
                assert_eq!(state.players_answered, 0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    let game = game.unwrap();
    assert_eq!(game.player_ids, players);

    for round_index in 0..5 {
        for (client, &player) in clients.iter_mut().zip(&players) {
            let answer = answer_for_round(&game, round_index, player);
            client
                .send(
                    "submitAnswer",
                    json!({ "matchId": game.id, "answer": answer }),
                )
                .await;
        }
        for client in clients.iter_mut() {
            match client.expect_event("roundResult").await {
                ServerEvent::RoundResult(result) => {
                    assert_eq!(result.round_number, round_index as u32 + 1)
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    for client in clients.iter_mut() {
        match client.expect_event("matchResult").await {
            ServerEvent::MatchResult(result) => {
                assert_eq!(result.winners, vec![1]);
                assert_eq!(result.scores[&1], 17);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    clients[1]
        .send(
            "chatMessage",
            json!({ "matchId": game.id, "message": "  good game  " }),
        )
        .await;
    for client in clients.iter_mut() {
        match client.expect_event("chatMessage").await {
            ServerEvent::ChatMessage(chat) => {
                assert_eq!(chat.from_user_id, 2);
                assert_eq!(chat.message, "good game");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    let mut outsider = WsTestClient::connect_as(addr, PATH, 42).await;
    outsider
        .send("chatMessage", json!({ "matchId": game.id, "message": "hi" }))
        .await;
    assert_eq!(
        outsider.expect_event("error").await,
        ServerEvent::error("Chat is allowed only for match participants")
    );

    let expected_key = format!("{}{}", DEFAULT_KEY_PREFIX, game.id);
    assert!(store.stored_keys().contains(&expected_key));

    let ready = http_get(http, "/ready").await;
    assert!(ready.starts_with("HTTP/1.1 200"), "{}", ready);
    let fetched = http_get(http, &format!("/social-tournament/matches/{}", game.id)).await;
    assert!(fetched.starts_with("HTTP/1.1 200"), "{}", fetched);
    assert!(fetched.contains("\"completed\":true"));

    state.shutdown().await.unwrap();
    assert!(clients[0].next_event().await.is_none());
}
