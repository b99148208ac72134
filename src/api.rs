//! WebSocket relay for browser clients
//!
//! Translates `{"type", "payload"}` JSON messages into engine commands and
//! forwards every engine notification to each connected client.
//! Default port: 8765

use crate::engine::{ChangeOrigin, EngineError, EngineHandle};
use crate::preset::Preset;
use crate::state::{EffectSlot, PresetSlot};
use crate::sysex::RecordKind;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default relay port
pub const DEFAULT_API_PORT: u16 = 8765;

/// Shared state for relay handlers
pub struct ApiState {
    pub engine: EngineHandle,
}

/// Client message envelope
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ParameterChangePayload {
    domain: u8,
    param: u8,
    value: u16,
}

#[derive(Debug, Deserialize)]
struct IndexPayload {
    index: u8,
}

#[derive(Debug, Deserialize)]
struct LoadPresetPayload {
    id: u8,
    kind: RecordKind,
    #[serde(default)]
    slot: EffectSlot,
}

#[derive(Debug, Deserialize)]
struct SavePresetPayload {
    preset_data: Value,
    index: u8,
    preset_type: RecordKind,
}

#[derive(Debug, Deserialize)]
struct ConnectMidiPayload {
    input_port: String,
    output_port: String,
}

#[derive(Debug, Deserialize)]
struct TimeCodeUpdatePayload {
    id: u32,
    #[serde(default)]
    event: Value,
}

#[derive(Debug, Deserialize)]
struct TimeCodeDeletePayload {
    id: u32,
}

/// Build the relay router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws", get(relay_ws))
        .route("/api/health", get(health_check))
        .with_state(state)
}

/// GET /ws - bidirectional relay
async fn relay_ws(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(mut socket: WebSocket, state: Arc<ApiState>) {
    debug!("WebSocket client connected");

    // Subscribe before the snapshot so nothing falls between the two
    let mut rx = state.engine.subscribe();

    for msg in initial_messages(&state.engine).await {
        if send_json(&mut socket, &msg).await.is_err() {
            debug!("WebSocket client disconnected during initial state");
            return;
        }
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let Ok(msg) = serde_json::to_value(&event) else {
                            continue;
                        };
                        if send_json(&mut socket, &msg).await.is_err() {
                            debug!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Engine event channel closed");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {} events", n);
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        let replies = handle_client_message(&state.engine, text.as_str()).await;
                        for reply in replies {
                            if send_json(&mut socket, &reply).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        // Binary and pong frames carry nothing for us
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string().into())).await
}

/// Messages every client gets right after connecting
pub async fn initial_messages(engine: &EngineHandle) -> Vec<Value> {
    let mut messages = Vec::with_capacity(3);

    match engine.status().await {
        Ok(status) => messages.push(serde_json::to_value(status).unwrap_or(Value::Null)),
        Err(e) => messages.push(error_message(&e.to_string())),
    }
    match engine.full_state().await {
        Ok(state) => messages.push(json!({"type": "full_state", "payload": state})),
        Err(e) => messages.push(error_message(&e.to_string())),
    }
    match engine.list_presets().await {
        Ok(presets) => messages.push(json!({"type": "all_presets", "payload": presets})),
        Err(e) => messages.push(error_message(&e.to_string())),
    }

    messages.retain(|m| !m.is_null());
    messages
}

/// Error notification attributed to the relay
pub fn error_message(message: &str) -> Value {
    json!({
        "type": "error",
        "payload": {"source": "ws_server", "message": message}
    })
}

fn parse_payload<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, Value> {
    serde_json::from_value(payload).map_err(|e| {
        warn!("Invalid {} payload: {}", kind, e);
        error_message(&format!("Invalid {} payload", kind))
    })
}

fn engine_reply(result: Result<(), EngineError>) -> Vec<Value> {
    match result {
        Ok(()) => Vec::new(),
        Err(e) => vec![error_message(&e.to_string())],
    }
}

/// Handle one text frame from a client
///
/// Returns the messages to send back to that client only. Broadcast
/// notifications caused by the command reach it through its subscription.
pub async fn handle_client_message(engine: &EngineHandle, text: &str) -> Vec<Value> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Malformed client message: {}", e);
            return vec![error_message("Invalid JSON message")];
        }
    };
    debug!("Client message: {}", msg.kind);

    macro_rules! payload {
        ($ty:ty) => {
            match parse_payload::<$ty>(&msg.kind, msg.payload) {
                Ok(p) => p,
                Err(reply) => return vec![reply],
            }
        };
    }

    match msg.kind.as_str() {
        "parameter_change" => {
            let p = payload!(ParameterChangePayload);
            engine_reply(
                engine
                    .send_parameter_change(p.domain, p.param, p.value, ChangeOrigin::Client)
                    .await,
            )
        }
        "request_active_state" => engine_reply(engine.request_active_state().await),
        "request_stored_setup" => {
            let p = payload!(IndexPayload);
            engine_reply(engine.request_stored_setup(p.index).await)
        }
        "request_stored_effect" => {
            let p = payload!(IndexPayload);
            engine_reply(engine.request_stored_effect(p.index).await)
        }
        "request_all_presets" => match engine.list_presets().await {
            Ok(presets) => vec![json!({"type": "all_presets", "payload": presets})],
            Err(e) => vec![error_message(&e.to_string())],
        },
        "load_preset" => {
            let p = payload!(LoadPresetPayload);
            load_preset(engine, p).await
        }
        "save_preset" => {
            let p = payload!(SavePresetPayload);
            let preset = match Preset::from_dict(p.preset_type, &p.preset_data) {
                Ok(preset) => preset,
                Err(e) => return vec![error_message(&format!("Error saving preset: {}", e))],
            };
            info!("Saving {} preset to register {}", p.preset_type, p.index);
            match engine.save_preset_to_register(preset, p.index).await {
                Ok(_) => Vec::new(),
                Err(e) => vec![error_message(&format!("Error saving preset: {}", e))],
            }
        }
        "connect_midi" => {
            let p = payload!(ConnectMidiPayload);
            // Status reaches every client through the midi_status event
            match engine
                .connect(Some(p.input_port), Some(p.output_port))
                .await
            {
                Ok(_) => Vec::new(),
                Err(e) => vec![error_message(&e.to_string())],
            }
        }
        "disconnect_midi" => engine_reply(engine.disconnect().await),
        "get_midi_ports" => match engine.list_ports().await {
            Ok(ports) => vec![json!({"type": "midi_ports", "payload": {"ports": ports}})],
            Err(e) => vec![error_message(&e.to_string())],
        },
        "request_mod_matrix" => match engine.request_mod_matrix().await {
            Ok(matrix) => vec![json!({"type": "mod_matrix", "payload": matrix})],
            Err(e) => vec![error_message(&e.to_string())],
        },
        "add_mod_route" | "update_mod_route" | "delete_mod_route" => {
            engine_reply(engine.send_mod_route_update(msg.payload).await)
        }
        "request_time_code_events" => match engine.request_time_code_events().await {
            Ok(events) => vec![json!({"type": "time_code_events", "payload": events})],
            Err(e) => vec![error_message(&e.to_string())],
        },
        "add_time_code_event" => engine_reply(engine.add_time_code_event(msg.payload).await),
        "update_time_code_event" => {
            let p = payload!(TimeCodeUpdatePayload);
            engine_reply(engine.update_time_code_event(p.id, p.event).await)
        }
        "delete_time_code_event" => {
            let p = payload!(TimeCodeDeletePayload);
            engine_reply(engine.delete_time_code_event(p.id).await)
        }
        other => {
            warn!("Unknown client message type: {}", other);
            vec![error_message("Unknown command type")]
        }
    }
}

async fn load_preset(engine: &EngineHandle, p: LoadPresetPayload) -> Vec<Value> {
    let slot = match p.kind {
        RecordKind::Setup => PresetSlot::StoredSetup(p.id),
        RecordKind::Effect => PresetSlot::StoredEffect(p.id),
    };
    let preset = match engine.get_preset(slot).await {
        Ok(Some(preset)) => preset,
        Ok(None) => {
            warn!("Preset {} not found in device state", slot);
            return vec![error_message(&format!("Preset ID {} not found", p.id))];
        }
        Err(e) => return vec![error_message(&e.to_string())],
    };

    info!("Loading {} into the active {}", slot, p.kind);
    match engine.send_preset_to_active(preset, p.slot).await {
        Ok(_) => Vec::new(),
        Err(e) => vec![error_message(&e.to_string())],
    }
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Start the relay server
pub async fn start_server(state: Arc<ApiState>, host: &str, port: u16) -> Result<()> {
    let router = build_router(state);

    let addr = format!("{}:{}", host, port);
    info!("Starting WebSocket relay on ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind relay server on {}", addr))?;

    axum::serve(listener, router)
        .await
        .context("Relay server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, ProtocolEngine, ReconnectPolicy};
    use crate::preset::{PresetRecord, SetupPreset};
    use crate::state::DeviceState;
    use crate::sysex::{build_bulk_frame, build_parameter_frame, BulkType};
    use crate::transport::MockTransport;
    use std::time::Duration;
    use tokio::time::sleep;

    fn make_test_engine(state: DeviceState) -> (EngineHandle, MockTransport) {
        let mock = MockTransport::new();
        let options = EngineOptions {
            request_spacing: Duration::from_millis(2),
            stored_effects_settle: Duration::from_millis(5),
            reconnect: ReconnectPolicy {
                max_retries: 0,
                retry_delay: Duration::from_millis(20),
            },
            ..EngineOptions::default()
        };
        let handle = ProtocolEngine::spawn(mock.clone(), state, options, None);
        (handle, mock)
    }

    async fn make_connected_engine(state: DeviceState) -> (EngineHandle, MockTransport) {
        let (handle, mock) = make_test_engine(state);
        handle.connect(None, None).await.unwrap();
        sleep(Duration::from_millis(60)).await;
        mock.take_writes();
        (handle, mock)
    }

    fn make_test_state() -> DeviceState {
        let mut state = DeviceState::new();
        let mut setup = SetupPreset::default();
        setup.name = "Stage".to_string();
        assert!(state.store_preset(PresetSlot::StoredSetup(3), Preset::Setup(setup)));
        state
    }

    #[tokio::test]
    async fn test_initial_messages() {
        let (engine, _mock) = make_test_engine(make_test_state());
        let messages = initial_messages(&engine).await;

        let types: Vec<&str> = messages
            .iter()
            .filter_map(|m| m["type"].as_str())
            .collect();
        assert_eq!(types, vec!["midi_status", "full_state", "all_presets"]);
        assert_eq!(messages[0]["payload"]["connected"], false);
        assert_eq!(messages[2]["payload"][0]["name"], "Stage");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages() {
        let (engine, _mock) = make_test_engine(DeviceState::new());

        let replies = handle_client_message(&engine, "not json").await;
        assert_eq!(replies[0]["payload"]["source"], "ws_server");

        let replies = handle_client_message(&engine, r#"{"type": "dance"}"#).await;
        assert_eq!(replies[0]["payload"]["message"], "Unknown command type");

        let replies =
            handle_client_message(&engine, r#"{"type": "parameter_change", "payload": {}}"#).await;
        assert_eq!(
            replies[0]["payload"]["message"],
            "Invalid parameter_change payload"
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_parameter_change_is_echo_suppressed() {
        let (engine, mock) = make_connected_engine(DeviceState::new()).await;
        let mut rx = engine.subscribe();

        let replies = handle_client_message(
            &engine,
            r#"{"type": "parameter_change", "payload": {"domain": 3, "param": 5, "value": 996}}"#,
        )
        .await;
        assert!(replies.is_empty());
        assert_eq!(
            mock.writes(),
            vec![build_parameter_frame(3, 5, 996, 1)]
        );
        // Client-originated changes are neither mirrored nor re-broadcast
        assert_eq!(engine.get_parameter(3, 5).await.unwrap(), None);
        assert!(rx.try_recv().is_err());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_parameter_change_while_disconnected() {
        let (engine, _mock) = make_test_engine(DeviceState::new());
        let replies = handle_client_message(
            &engine,
            r#"{"type": "parameter_change", "payload": {"domain": 1, "param": 0, "value": 10}}"#,
        )
        .await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], "error");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_stored_setup() {
        let (engine, mock) = make_connected_engine(make_test_state()).await;

        let replies = handle_client_message(
            &engine,
            r#"{"type": "load_preset", "payload": {"id": 3, "kind": "setup"}}"#,
        )
        .await;
        assert!(replies.is_empty());

        let writes = mock.writes();
        assert_eq!(writes.len(), 1);
        let preset = engine.get_preset(PresetSlot::StoredSetup(3)).await.unwrap().unwrap();
        let expected =
            build_bulk_frame(&preset.to_bytes(), BulkType::ActiveSetup.type_byte(), 0, 1).unwrap();
        assert_eq!(writes[0], expected);
        assert_eq!(
            engine
                .get_preset(PresetSlot::ActiveSetup)
                .await
                .unwrap()
                .map(|p| p.name().to_string()),
            Some("Stage".to_string())
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_missing_preset() {
        let (engine, mock) = make_connected_engine(DeviceState::new()).await;
        let replies = handle_client_message(
            &engine,
            r#"{"type": "load_preset", "payload": {"id": 9, "kind": "effect", "slot": "B"}}"#,
        )
        .await;
        assert_eq!(replies[0]["payload"]["message"], "Preset ID 9 not found");
        assert!(mock.writes().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_save_setup_preset() {
        let (engine, mock) = make_connected_engine(DeviceState::new()).await;
        let data = SetupPreset::default().to_dict();
        let text = json!({
            "type": "save_preset",
            "payload": {"preset_data": data, "index": 7, "preset_type": "setup"}
        })
        .to_string();

        let replies = handle_client_message(&engine, &text).await;
        assert!(replies.is_empty());
        assert_eq!(mock.writes().len(), 1);
        assert!(engine
            .get_preset(PresetSlot::StoredSetup(7))
            .await
            .unwrap()
            .is_some());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_midi_ports() {
        let (engine, _mock) = make_test_engine(DeviceState::new());
        let replies = handle_client_message(&engine, r#"{"type": "get_midi_ports"}"#).await;
        assert_eq!(replies[0]["type"], "midi_ports");
        assert_eq!(replies[0]["payload"]["ports"]["inputs"][0], "M300 In");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_features_report_errors() {
        let (engine, _mock) = make_test_engine(DeviceState::new());
        for text in [
            r#"{"type": "request_mod_matrix"}"#,
            r#"{"type": "request_time_code_events"}"#,
            r#"{"type": "delete_time_code_event", "payload": {"id": 1}}"#,
        ] {
            let replies = handle_client_message(&engine, text).await;
            assert_eq!(replies.len(), 1, "{}", text);
            assert_eq!(replies[0]["type"], "error");
        }
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_parameter_reaches_subscribers() {
        let (engine, mock) = make_connected_engine(DeviceState::new()).await;
        let mut rx = engine.subscribe();

        assert!(mock.inject(&build_parameter_frame(2, 4, 77, 1)));
        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["type"], "parameter_update");
        assert_eq!(value["payload"]["value"], 77);
        engine.shutdown().await;
    }
}
