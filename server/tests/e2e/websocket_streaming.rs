//! End-to-end tests for the WebSocket streaming endpoint
//! Tests: WebSocket connection -> JSON request -> PCM chunks -> completion

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use crate::common::*;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What arrived for one request cycle.
#[derive(Debug)]
enum Frame {
    Audio(Vec<u8>),
    Control(Value),
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/stream")).await.unwrap();
    ws
}

async fn send(ws: &mut Client, body: Value) {
    ws.send(Message::Text(body.to_string().into())).await.unwrap();
}

async fn next_frame(ws: &mut Client) -> Frame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap();
        match msg {
            Message::Binary(data) => return Frame::Audio(data.to_vec()),
            Message::Text(text) => return Frame::Control(serde_json::from_str(text.as_str()).unwrap()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Read audio frames until the first control message.
async fn read_cycle(ws: &mut Client) -> (Vec<Vec<u8>>, Value) {
    let mut chunks = Vec::new();
    loop {
        match next_frame(ws).await {
            Frame::Audio(data) => chunks.push(data),
            Frame::Control(value) => return (chunks, value),
        }
    }
}

#[tokio::test]
async fn test_hello_streams_two_one_second_chunks() {
    let addr = spawn_server(StubModel::new()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"text": "Hello", "voice": "Vivian", "language": "English"})).await;
    let (chunks, done) = read_cycle(&mut ws).await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].len(), 24_000 * 2);
    assert_eq!(chunks[1].len(), 24_000 * 2);
    assert_eq!(done, json!({"done": true, "duration": 2.0, "sample_rate": 24000}));
}

#[tokio::test]
async fn test_chunks_reconstruct_waveform() {
    let addr = spawn_server(StubModel::new()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"text": "len:61000"})).await;
    let (chunks, done) = read_cycle(&mut ws).await;

    let sizes: Vec<usize> = chunks.iter().map(|c| c.len() / 2).collect();
    assert_eq!(sizes, vec![24_000, 24_000, 13_000]);

    let joined: Vec<i16> = chunks.iter().flat_map(|c| le_bytes_to_pcm(c)).collect();
    assert_eq!(joined, tts_core::to_pcm16(&waveform(61_000)));
    assert_eq!(done["duration"], json!(2.54));
}

#[tokio::test]
async fn test_empty_text_reports_error_and_keeps_connection() {
    let model = StubModel::new();
    let addr = spawn_server(model.clone()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"text": ""})).await;
    let (chunks, reply) = read_cycle(&mut ws).await;
    assert!(chunks.is_empty());
    assert_eq!(reply, json!({"error": "missing text"}));

    send(&mut ws, json!({"voice": "Vivian"})).await;
    let (_, reply) = read_cycle(&mut ws).await;
    assert_eq!(reply, json!({"error": "missing text"}));
    assert!(model.calls().is_empty());

    // same connection still serves requests
    send(&mut ws, json!({"text": "len:100"})).await;
    let (chunks, done) = read_cycle(&mut ws).await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(done["done"], json!(true));
}

#[tokio::test]
async fn test_sequential_requests_do_not_interleave() {
    let model = StubModel::new();
    let addr = spawn_server(model.clone()).await;
    let mut ws = connect(addr).await;

    // Second request is sent before the first one has been answered.
    send(&mut ws, json!({"text": "len:30000"})).await;
    send(&mut ws, json!({"text": "len:50000", "voice": "Ryan"})).await;

    let (first, first_done) = read_cycle(&mut ws).await;
    let (second, second_done) = read_cycle(&mut ws).await;

    assert_eq!(first.iter().map(|c| c.len() / 2).sum::<usize>(), 30_000);
    assert_eq!(first_done["duration"], json!(1.25));
    assert_eq!(second.iter().map(|c| c.len() / 2).sum::<usize>(), 50_000);
    assert_eq!(second_done["duration"], json!(2.08));

    let voices: Vec<String> = model.calls().into_iter().map(|r| r.voice).collect();
    assert_eq!(voices, vec!["Vivian".to_string(), "Ryan".to_string()]);
}

#[tokio::test]
async fn test_generation_failure_reports_error_and_recovers() {
    let addr = spawn_server(StubModel::new()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"text": FAIL_TEXT})).await;
    let (chunks, reply) = read_cycle(&mut ws).await;
    assert!(chunks.is_empty());
    assert!(reply["error"].as_str().unwrap().contains("stub model exploded"));

    send(&mut ws, json!({"text": "Hello"})).await;
    let (chunks, done) = read_cycle(&mut ws).await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(done["sample_rate"], json!(24000));
}

#[tokio::test]
async fn test_malformed_messages_are_answered_in_band() {
    let addr = spawn_server(StubModel::new()).await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    let (_, reply) = read_cycle(&mut ws).await;
    assert!(reply["error"].as_str().unwrap().starts_with("invalid request"));

    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    let (_, reply) = read_cycle(&mut ws).await;
    assert_eq!(reply, json!({"error": "expected a JSON text message"}));

    send(&mut ws, json!({"text": "len:10"})).await;
    let (chunks, _) = read_cycle(&mut ws).await;
    assert_eq!(chunks, vec![tts_core::pcm_to_le_bytes(&tts_core::to_pcm16(&waveform(10)))]);
}

#[tokio::test]
async fn test_stream_matches_generate_endpoint() {
    let model = StubModel::new();
    let addr = spawn_server(model.clone()).await;
    let mut ws = connect(addr).await;

    let body = json!({"text": "len:30001", "voice": "Vivian", "language": "English"});
    send(&mut ws, body.clone()).await;
    let (chunks, _) = read_cycle(&mut ws).await;
    let streamed: Vec<u8> = chunks.concat();

    let response = create_test_app(model)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/generate")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let wav = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav.to_vec())).unwrap();
    let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(tts_core::pcm_to_le_bytes(&decoded), streamed);
}

#[tokio::test]
async fn test_connections_are_independent() {
    let addr = spawn_server(StubModel::new()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    send(&mut a, json!({"text": "len:24000"})).await;
    send(&mut b, json!({"text": ""})).await;

    let (_, b_reply) = read_cycle(&mut b).await;
    assert_eq!(b_reply, json!({"error": "missing text"}));
    let (a_chunks, a_done) = read_cycle(&mut a).await;
    assert_eq!(a_chunks.len(), 1);
    assert_eq!(a_done["duration"], json!(1.0));

    a.close(None).await.unwrap();
    // closing one peer leaves the other usable
    send(&mut b, json!({"text": "len:5"})).await;
    let (b_chunks, _) = read_cycle(&mut b).await;
    assert_eq!(b_chunks.len(), 1);
}

#[tokio::test]
async fn test_zero_sample_rate_reports_error() {
    let addr = spawn_server(StubModel::new()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"text": ZERO_RATE_TEXT})).await;
    let (chunks, reply) = read_cycle(&mut ws).await;
    assert!(chunks.is_empty());
    assert_eq!(
        reply,
        json!({"error": "generation failed: model returned a zero sample rate"})
    );

    send(&mut ws, json!({"text": "len:10"})).await;
    let (chunks, done) = read_cycle(&mut ws).await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(done["sample_rate"], json!(24000));
}

#[tokio::test]
async fn test_disconnect_mid_generation_lets_generation_finish() {
    let model = StubModel::new();
    let addr = spawn_server(model.clone()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"text": "slow:300"})).await;
    // wait until the request has reached the model, then walk away
    tokio::time::timeout(Duration::from_secs(10), async {
        while model.calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request never reached the model");
    drop(ws);

    tokio::time::timeout(Duration::from_secs(10), async {
        while model.completed() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("generation did not run to completion");

    // the server keeps serving new peers
    let mut other = connect(addr).await;
    send(&mut other, json!({"text": "len:24000"})).await;
    let (chunks, done) = read_cycle(&mut other).await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(done["duration"], json!(1.0));
    assert_eq!(model.completed(), 2);
}
