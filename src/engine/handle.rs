//! EngineHandle - Public API for the ProtocolEngine
//!
//! Wraps command passing with async methods. Every method resolves once the
//! engine has processed the command, with the same error the engine saw.

use super::commands::{ChangeOrigin, EngineCommand, Reply};
use super::connection::ConnectionState;
use super::error::EngineError;
use super::events::EngineEvent;
use crate::preset::Preset;
use crate::state::{EffectSlot, FullState, PresetListing, PresetSlot};
use crate::transport::{OpenPorts, PortList};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Handle for interacting with the ProtocolEngine
///
/// Cheap to clone; all clones talk to the same engine task.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub(super) fn new(
        cmd_tx: mpsc::Sender<EngineCommand>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self { cmd_tx, events }
    }

    /// Receive every notification published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Open the device ports and start the initial sync
    ///
    /// `None` keeps the configured port name (or alias).
    pub async fn connect(
        &self,
        input: Option<String>,
        output: Option<String>,
    ) -> Result<OpenPorts, EngineError> {
        self.call(|reply| EngineCommand::Connect {
            input,
            output,
            reply,
        })
        .await
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::Disconnect { reply }).await
    }

    pub async fn list_ports(&self) -> Result<PortList, EngineError> {
        self.call(|reply| EngineCommand::ListPorts { reply }).await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState, EngineError> {
        self.call(|reply| EngineCommand::GetConnectionState { reply })
            .await
    }

    /// Connection state and open ports, shaped like the status notification
    pub async fn status(&self) -> Result<EngineEvent, EngineError> {
        self.call(|reply| EngineCommand::GetStatus { reply }).await
    }

    // =========================================================================
    // Device requests
    // =========================================================================

    pub async fn request_active_state(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::RequestActiveState { reply })
            .await
    }

    pub async fn request_stored_setup(&self, index: u8) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::RequestStoredSetup { index, reply })
            .await
    }

    pub async fn request_stored_effect(&self, index: u8) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::RequestStoredEffect { index, reply })
            .await
    }

    pub async fn request_all_stored_setups(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::RequestAllStoredSetups { reply })
            .await
    }

    pub async fn request_all_stored_effects(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::RequestAllStoredEffects { reply })
            .await
    }

    pub async fn request_parameter_value(&self, domain: u8, param: u8) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::RequestParameterValue {
            domain,
            param,
            reply,
        })
        .await
    }

    // =========================================================================
    // Outbound changes
    // =========================================================================

    pub async fn send_parameter_change(
        &self,
        domain: u8,
        param: u8,
        value: u16,
        origin: ChangeOrigin,
    ) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::SendParameterChange {
            domain,
            param,
            value,
            origin,
            reply,
        })
        .await
    }

    /// Load a preset into the active setup, or effect slot A/B
    pub async fn send_preset_to_active(
        &self,
        preset: Preset,
        slot: EffectSlot,
    ) -> Result<PresetSlot, EngineError> {
        self.call(|reply| EngineCommand::SendPresetToActive {
            preset,
            slot,
            reply,
        })
        .await
    }

    /// Write a preset into a stored register (0-49)
    pub async fn save_preset_to_register(
        &self,
        preset: Preset,
        index: u8,
    ) -> Result<PresetSlot, EngineError> {
        self.call(|reply| EngineCommand::SavePresetToRegister {
            preset,
            index,
            reply,
        })
        .await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn full_state(&self) -> Result<FullState, EngineError> {
        self.call(|reply| EngineCommand::GetFullState { reply }).await
    }

    pub async fn get_parameter(&self, domain: u8, param: u8) -> Result<Option<u16>, EngineError> {
        self.call(|reply| EngineCommand::GetParameter {
            domain,
            param,
            reply,
        })
        .await
    }

    pub async fn get_preset(&self, slot: PresetSlot) -> Result<Option<Preset>, EngineError> {
        self.call(|reply| EngineCommand::GetPreset { slot, reply })
            .await
    }

    pub async fn list_presets(&self) -> Result<Vec<PresetListing>, EngineError> {
        self.call(|reply| EngineCommand::ListPresets { reply }).await
    }

    // =========================================================================
    // Not yet wired to the device
    // =========================================================================

    pub async fn request_mod_matrix(&self) -> Result<Value, EngineError> {
        Err(EngineError::Unsupported("Modulation matrix request"))
    }

    pub async fn send_mod_route_update(&self, _route: Value) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("Modulation route update"))
    }

    pub async fn request_time_code_events(&self) -> Result<Value, EngineError> {
        Err(EngineError::Unsupported("Time code event request"))
    }

    pub async fn add_time_code_event(&self, _event: Value) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("Adding time code events"))
    }

    pub async fn update_time_code_event(&self, _id: u32, _event: Value) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("Updating time code events"))
    }

    pub async fn delete_time_code_event(&self, _id: u32) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("Deleting time code events"))
    }

    /// Stop the engine and wait for it to close the transport
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(EngineCommand::Shutdown { done })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, ProtocolEngine, ReconnectPolicy};
    use crate::preset::{EffectPreset, PresetRecord, SetupPreset};
    use crate::state::{DeviceState, PersistenceActor, PresetSnapshot};
    use crate::sysex::{
        build_bulk_frame, build_parameter_frame, build_request_frame, BulkType, RequestOpcode,
    };
    use crate::transport::MockTransport;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn make_test_options() -> EngineOptions {
        EngineOptions {
            request_spacing: Duration::from_millis(2),
            stored_effects_settle: Duration::from_millis(5),
            reconnect: ReconnectPolicy {
                max_retries: 2,
                retry_delay: Duration::from_millis(20),
            },
            ..EngineOptions::default()
        }
    }

    fn make_test_engine() -> (EngineHandle, MockTransport) {
        let mock = MockTransport::new();
        let handle = ProtocolEngine::spawn(
            mock.clone(),
            DeviceState::new(),
            make_test_options(),
            None,
        );
        (handle, mock)
    }

    async fn make_connected_engine() -> (EngineHandle, MockTransport) {
        let (handle, mock) = make_test_engine();
        handle.connect(None, None).await.unwrap();
        // Let the initial sync drain
        sleep(Duration::from_millis(60)).await;
        mock.take_writes();
        (handle, mock)
    }

    async fn next_event(rx: &mut broadcast::Receiver<EngineEvent>) -> EngineEvent {
        timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn request(opcode: RequestOpcode) -> Vec<u8> {
        build_request_frame(opcode, None, None, 1).unwrap()
    }

    #[tokio::test]
    async fn test_connect_runs_initial_sync_in_order() {
        let (handle, mock) = make_test_engine();
        let ports = handle.connect(None, None).await.unwrap();
        assert_eq!(ports.input, "M300");

        sleep(Duration::from_millis(60)).await;
        assert_eq!(
            mock.writes(),
            vec![
                request(RequestOpcode::ActiveSetup),
                request(RequestOpcode::ActiveEffectA),
                request(RequestOpcode::ActiveEffectB),
                request(RequestOpcode::AllStoredSetups),
                request(RequestOpcode::AllStoredEffects),
            ]
        );
        assert_eq!(
            handle.connection_state().await.unwrap(),
            ConnectionState::Connected
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_resolves_port_alias() {
        let mock = MockTransport::new();
        let mut options = make_test_options();
        options
            .midi
            .port_aliases
            .insert("lexicon".to_string(), "USB MIDI".to_string());
        let handle = ProtocolEngine::spawn(mock, DeviceState::new(), options, None);

        let ports = handle
            .connect(Some("lexicon".to_string()), Some("Other Out".to_string()))
            .await
            .unwrap();
        assert_eq!(ports.input, "USB MIDI");
        assert_eq!(ports.output, "Other Out");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_parameter_frame_notifies_on_change() {
        let (handle, mock) = make_connected_engine().await;
        let mut events = handle.subscribe();

        let frame = build_parameter_frame(3, 7, 300, 1);
        assert!(mock.inject(&frame));
        match next_event(&mut events).await {
            EngineEvent::ParameterChanged {
                domain,
                param,
                value,
            } => assert_eq!((domain, param, value), (3, 7, 300)),
            other => panic!("unexpected event {:?}", other),
        }

        // Same value again: no notification, the next event is the new value
        mock.inject(&frame);
        mock.inject(&build_parameter_frame(3, 7, 301, 1));
        match next_event(&mut events).await {
            EngineEvent::ParameterChanged { value, .. } => assert_eq!(value, 301),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(handle.get_parameter(3, 7).await.unwrap(), Some(301));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_nrpn_sequence() {
        let (handle, mock) = make_connected_engine().await;
        let mut events = handle.subscribe();

        for (cc, value) in [(99, 3), (98, 5), (6, 7), (38, 100)] {
            mock.inject(&[0xB0, cc, value]);
        }

        match next_event(&mut events).await {
            EngineEvent::ParameterChanged {
                domain,
                param,
                value,
            } => assert_eq!((domain, param, value), (3, 5, 996)),
            other => panic!("unexpected event {:?}", other),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_bulk_with_bad_checksum_is_applied() {
        let (handle, mock) = make_connected_engine().await;
        let mut events = handle.subscribe();

        let mut setup = SetupPreset::default();
        setup.name = "Stage".to_string();
        let mut frame =
            build_bulk_frame(&setup.to_bytes(), BulkType::ActiveSetup.type_byte(), 0, 1).unwrap();
        let checksum_pos = frame.len() - 2;
        frame[checksum_pos] ^= 0x01;
        mock.inject(&frame);

        match next_event(&mut events).await {
            EngineEvent::PresetUpdated { slot, preset, .. } => {
                assert_eq!(slot, PresetSlot::ActiveSetup);
                assert_eq!(preset.name(), "Stage");
            }
            other => panic!("unexpected event {:?}", other),
        }

        let state = handle.full_state().await.unwrap();
        assert!(state.connected);
        assert_eq!(state.active_setup.map(|p| p.name), Some("Stage".to_string()));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_reports_and_continues() {
        let (handle, mock) = make_connected_engine().await;
        let mut events = handle.subscribe();

        // Parameter frame missing its value bytes
        mock.inject(&[0xF0, 0x06, 0x03, 0x20, 0x02, 0x01, 0xF7]);
        match next_event(&mut events).await {
            EngineEvent::FrameError { source, .. } => assert_eq!(source, "parameter"),
            other => panic!("unexpected event {:?}", other),
        }

        // Foreign SysEx is ignored silently
        mock.inject(&[0xF0, 0x41, 0x10, 0x42, 0x12, 0xF7]);
        mock.inject(&build_parameter_frame(2, 1, 9, 1));
        match next_event(&mut events).await {
            EngineEvent::ParameterChanged { value, .. } => assert_eq!(value, 9),
            other => panic!("unexpected event {:?}", other),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_parameter_change_origins() {
        let (handle, mock) = make_connected_engine().await;

        handle
            .send_parameter_change(4, 2, 1000, ChangeOrigin::Client)
            .await
            .unwrap();
        assert_eq!(mock.take_writes(), vec![build_parameter_frame(4, 2, 1000, 1)]);
        assert_eq!(handle.get_parameter(4, 2).await.unwrap(), None);

        handle
            .send_parameter_change(4, 2, 1000, ChangeOrigin::Local)
            .await
            .unwrap();
        assert_eq!(handle.get_parameter(4, 2).await.unwrap(), Some(1000));

        let err = handle
            .send_parameter_change(7, 0, 0, ChangeOrigin::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
        let err = handle
            .send_parameter_change(0, 0, 16384, ChangeOrigin::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let (handle, mock) = make_test_engine();
        assert_eq!(
            handle.request_stored_setup(3).await,
            Err(EngineError::NotConnected)
        );
        assert_eq!(
            handle
                .send_parameter_change(0, 0, 0, ChangeOrigin::Local)
                .await,
            Err(EngineError::NotConnected)
        );
        assert!(mock.writes().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stored_requests() {
        let (handle, mock) = make_connected_engine().await;

        handle.request_stored_effect(12).await.unwrap();
        handle.request_parameter_value(3, 9).await.unwrap();
        assert_eq!(
            mock.take_writes(),
            vec![
                build_request_frame(RequestOpcode::StoredEffect, Some(12), None, 1).unwrap(),
                build_request_frame(RequestOpcode::ParameterValue, Some(9), Some(3), 1).unwrap(),
            ]
        );

        assert_eq!(
            handle.request_stored_setup(50).await,
            Err(EngineError::InvalidIndex(50))
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_requests_spaced_from_previous_send() {
        let mut options = make_test_options();
        options.request_spacing = Duration::from_millis(150);
        options.stored_effects_settle = Duration::ZERO;
        let mock = MockTransport::new();
        let handle = ProtocolEngine::spawn(mock.clone(), DeviceState::new(), options, None);
        handle.connect(None, None).await.unwrap();
        sleep(Duration::from_millis(750)).await;
        assert_eq!(mock.take_writes().len(), 5);

        handle.request_stored_setup(3).await.unwrap();
        handle.request_active_state().await.unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(
            mock.writes(),
            vec![build_request_frame(RequestOpcode::StoredSetup, Some(3), None, 1).unwrap()]
        );

        sleep(Duration::from_millis(500)).await;
        assert_eq!(
            mock.take_writes(),
            vec![
                build_request_frame(RequestOpcode::StoredSetup, Some(3), None, 1).unwrap(),
                request(RequestOpcode::ActiveSetup),
                request(RequestOpcode::ActiveEffectA),
                request(RequestOpcode::ActiveEffectB),
            ]
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_setup_to_active() {
        let (handle, mock) = make_connected_engine().await;
        let mut setup = SetupPreset::default();
        setup.name = "Front".to_string();

        let slot = handle
            .send_preset_to_active(setup.clone().into(), EffectSlot::B)
            .await
            .unwrap();
        assert_eq!(slot, PresetSlot::ActiveSetup);

        let writes = mock.take_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0][3], 0x00);
        assert_eq!(writes[0][4], 0x32);

        let stored = handle.get_preset(PresetSlot::ActiveSetup).await.unwrap();
        assert_eq!(stored, Some(Preset::Setup(setup)));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_effect_send_exceeds_byte_count() {
        let (handle, mock) = make_connected_engine().await;

        let err = handle
            .send_preset_to_active(EffectPreset::default().into(), EffectSlot::A)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Frame(crate::sysex::FrameError::PayloadTooLarge(209))
        );
        assert!(mock.writes().is_empty());
        assert!(handle
            .get_preset(PresetSlot::ActiveEffectA)
            .await
            .unwrap()
            .is_none());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_save_to_register_validates() {
        let (handle, mock) = make_connected_engine().await;

        let err = handle
            .save_preset_to_register(SetupPreset::default().into(), 50)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidIndex(50));

        let mut bad = SetupPreset::default();
        bad.machine_config = 9;
        let err = handle
            .save_preset_to_register(bad.into(), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(mock.writes().is_empty());

        let slot = handle
            .save_preset_to_register(SetupPreset::default().into(), 4)
            .await
            .unwrap();
        assert_eq!(slot, PresetSlot::StoredSetup(4));
        assert_eq!(mock.take_writes()[0][4], 0x20);
        assert_eq!(handle.list_presets().await.unwrap().len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_failure_disconnects_and_reconnects() {
        let (handle, mock) = make_connected_engine().await;
        assert_eq!(mock.open_count(), 1);

        mock.set_fail_send(true);
        let err = handle
            .send_parameter_change(0, 0, 1, ChangeOrigin::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
        assert_eq!(
            handle.connection_state().await.unwrap(),
            ConnectionState::Disconnected
        );

        mock.set_fail_send(false);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.open_count(), 2);
        assert_eq!(
            handle.connection_state().await.unwrap(),
            ConnectionState::Connected
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_retries() {
        let (handle, mock) = make_test_engine();
        mock.set_fail_open(true);
        assert!(handle.connect(None, None).await.is_err());

        // Two retries 20ms apart, then nothing more
        sleep(Duration::from_millis(150)).await;
        mock.set_fail_open(false);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.open_count(), 0);
        assert_eq!(
            handle.connection_state().await.unwrap(),
            ConnectionState::Disconnected
        );

        // An explicit connect still works
        handle.connect(None, None).await.unwrap();
        assert_eq!(mock.open_count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_does_not_retry() {
        let (handle, mock) = make_connected_engine().await;
        handle.disconnect().await.unwrap();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(mock.open_count(), 1);
        assert!(!handle.full_state().await.unwrap().connected);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_placeholders() {
        let (handle, _mock) = make_test_engine();
        assert!(matches!(
            handle.request_mod_matrix().await,
            Err(EngineError::Unsupported(_))
        ));
        assert!(matches!(
            handle.request_time_code_events().await,
            Err(EngineError::Unsupported(_))
        ));
        assert!(matches!(
            handle.delete_time_code_event(1).await,
            Err(EngineError::Unsupported(_))
        ));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let (handle, _mock) = make_test_engine();
        handle.shutdown().await;
        assert_eq!(handle.full_state().await, Err(EngineError::Closed));
    }

    #[tokio::test]
    async fn test_received_presets_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.json");
        let persistence = PersistenceActor::spawn(&path, 0);

        let mock = MockTransport::new();
        let handle = ProtocolEngine::spawn(
            mock.clone(),
            DeviceState::new(),
            make_test_options(),
            Some(persistence.clone()),
        );
        handle.connect(None, None).await.unwrap();

        let mut setup = SetupPreset::default();
        setup.name = "Saved".to_string();
        let frame =
            build_bulk_frame(&setup.to_bytes(), BulkType::StoredSetup.type_byte(), 8, 1).unwrap();
        mock.inject(&frame);

        sleep(Duration::from_millis(100)).await;
        persistence.flush().await.unwrap();

        let snapshot = PresetSnapshot::load_from_file(&path).await.unwrap();
        assert_eq!(snapshot.stored_setups["8"]["name"], "Saved");
        handle.shutdown().await;
        persistence.shutdown();
    }
}
