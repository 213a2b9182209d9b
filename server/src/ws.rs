//! `/ws/stream`: chunked PCM delivery over a persistent WebSocket.
//!
//! Each connection loops through awaiting a JSON request, generating the
//! whole waveform, then sending it as one-second little-endian i16 frames
//! followed by a `{"done": true, ...}` marker. Requests on one connection
//! are handled strictly one after another. Bad requests and failed
//! generations are answered with `{"error": ...}` and the connection stays
//! open; only the peer going away ends it.

use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use tts_core::{frame_audio, parse_stream_request, AudioResult, ModelSession, StreamError};

use crate::{run_generation, AppState};

pub async fn stream_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_session(socket, state.model))
}

/// Drive one connection until the peer disconnects.
pub async fn stream_session(mut socket: WebSocket, model: ModelSession) {
    let session_id = uuid::Uuid::new_v4();
    info!(%session_id, "Stream connection opened");

    loop {
        let text = match socket.recv().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                if send_json(&mut socket, &StreamError::new("expected a JSON text message"))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(%session_id, "WebSocket receive error: {e}");
                break;
            }
        };

        let request = match parse_stream_request(text.as_str()) {
            Ok(request) => request,
            Err(reply) => {
                warn!(%session_id, "Rejected stream request: {}", reply.error);
                if send_json(&mut socket, &reply).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let voice = request.voice.clone();
        let t0 = Instant::now();
        let audio = match run_generation(model.clone(), request).await {
            Ok(audio) => audio,
            Err(e) => {
                error!(%session_id, "Stream generation failed: {e}");
                if send_json(&mut socket, &StreamError::new(e.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };
        let t_gen = t0.elapsed().as_secs_f64();
        info!(
            %session_id,
            "Stream: {:.2}s audio in {:.2}s voice={}",
            audio.duration_secs(),
            t_gen,
            voice
        );

        if let Err(e) = send_audio(&mut socket, &audio).await {
            warn!(%session_id, "Failed to send WS message: {e}");
            break;
        }
    }

    info!(%session_id, "Stream connection closed");
}

/// Send every PCM window in order, then the completion marker.
async fn send_audio(socket: &mut WebSocket, audio: &AudioResult) -> Result<(), axum::Error> {
    let (frames, done) = frame_audio(audio);
    let total = frames.len();
    for (i, frame) in frames.into_iter().enumerate() {
        debug!("Sending chunk {}/{} ({} bytes)", i + 1, total, frame.len());
        socket.send(Message::Binary(frame.into())).await?;
    }
    send_json(socket, &done).await
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, msg: &T) -> Result<(), axum::Error> {
    let body = serde_json::to_string(msg).map_err(axum::Error::new)?;
    socket.send(Message::Text(body.into())).await
}
