//! ProtocolEngine - single owner of the transport and the device mirror
//!
//! All inbound traffic, commands, scheduled requests and reconnect timers
//! are serialized through one `tokio::select!` loop, so the mirror never
//! sees concurrent writers. The transport's receive callback only pushes raw
//! bytes into the inbound channel.

use super::commands::{ChangeOrigin, EngineCommand};
use super::connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
use super::error::EngineError;
use super::events::EngineEvent;
use super::handle::EngineHandle;
use crate::config::{AppConfig, MidiConfig};
use crate::midi::{format_hex, MidiMessage};
use crate::nrpn::NrpnParser;
use crate::preset::Preset;
use crate::state::{
    DeviceState, PersistenceActorHandle, PresetSlot, PresetSnapshot, MAX_PARAM_NUMBER,
};
use crate::sysex::{
    build_bulk_frame, build_parameter_frame, build_request_frame, domain_name, is_device_frame,
    parse_frame, BulkRecord, Frame, MessageClass, ParameterChange, RecordKind, RequestOpcode,
    MAX_DOMAIN, MAX_PARAM_VALUE, STORED_BANK_SIZE,
};
use crate::transport::{OpenPorts, Transport};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

const INBOUND_CAPACITY: usize = 1024;
const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Engine settings, usually derived from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Port names, aliases and device channel
    pub midi: MidiConfig,
    pub request_spacing: Duration,
    pub stored_effects_settle: Duration,
    pub reconnect: ReconnectPolicy,
}

impl EngineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            midi: config.midi.clone(),
            request_spacing: config.engine.request_spacing(),
            stored_effects_settle: config.engine.stored_effects_settle(),
            reconnect: ReconnectPolicy::from(&config.engine.reconnect),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

struct ScheduledRequest {
    due: Instant,
    opcode: RequestOpcode,
}

pub struct ProtocolEngine<T: Transport> {
    transport: T,
    state: DeviceState,
    nrpn: NrpnParser,
    connection: ConnectionManager,
    options: EngineOptions,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    inbound_rx: mpsc::Receiver<Vec<u8>>,
    command_rx: mpsc::Receiver<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
    persistence: Option<PersistenceActorHandle>,
    scheduled: VecDeque<ScheduledRequest>,
    last_request_at: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl<T: Transport + 'static> ProtocolEngine<T> {
    /// Spawn the engine task
    ///
    /// The engine starts disconnected; call [`EngineHandle::connect`] to
    /// open the device ports.
    pub fn spawn(
        transport: T,
        state: DeviceState,
        options: EngineOptions,
        persistence: Option<PersistenceActorHandle>,
    ) -> EngineHandle {
        let (cmd_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let engine = ProtocolEngine {
            transport,
            state,
            nrpn: NrpnParser::new(),
            connection: ConnectionManager::new(options.reconnect),
            options,
            inbound_tx,
            inbound_rx,
            command_rx,
            events: events.clone(),
            persistence,
            scheduled: VecDeque::new(),
            last_request_at: None,
            reconnect_at: None,
        };

        tokio::spawn(engine.run());

        EngineHandle::new(cmd_tx, events)
    }
}

impl<T: Transport> ProtocolEngine<T> {
    async fn run(mut self) {
        info!("Protocol engine started (channel {})", self.options.midi.channel);

        loop {
            let next_request = self.scheduled.front().map(|r| r.due);

            tokio::select! {
                Some(bytes) = self.inbound_rx.recv() => {
                    self.handle_inbound(&bytes);
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd) {
                                return;
                            }
                        }
                        None => {
                            self.shutdown();
                            return;
                        }
                    }
                }
                _ = sleep_until_opt(next_request) => {
                    self.send_next_scheduled();
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    info!(
                        "Reconnect attempt {} of {}",
                        self.connection.failures(),
                        self.options.reconnect.max_retries
                    );
                    if let Err(e) = self.connect() {
                        warn!("Reconnect failed: {}", e);
                    }
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.scheduled.clear();
        self.reconnect_at = None;
        while let Ok(bytes) = self.inbound_rx.try_recv() {
            self.handle_inbound(&bytes);
        }
        self.transport.close();
        info!("Protocol engine stopped");
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    fn handle_inbound(&mut self, bytes: &[u8]) {
        match MidiMessage::parse(bytes) {
            Some(MidiMessage::SysEx { data }) => self.handle_sysex(&data),
            Some(MidiMessage::ControlChange { cc, value, .. }) => {
                if let Some(update) = self.nrpn.feed(cc, value) {
                    self.apply_parameter(update.domain, update.param, update.value);
                }
            }
            Some(other) => trace!("Ignoring {}", other),
            None => debug!("Unparseable MIDI: {}", format_hex(bytes)),
        }
    }

    fn handle_sysex(&mut self, data: &[u8]) {
        if !is_device_frame(data) {
            trace!("Ignoring foreign SysEx ({} bytes)", data.len());
            return;
        }

        let frame = match parse_frame(data) {
            Ok(frame) => frame,
            Err(e) => return self.report_frame_error("sysex", e.to_string()),
        };

        if frame.class.is_bulk() {
            self.handle_bulk(&frame);
            return;
        }

        match frame.class {
            MessageClass::Parameter => match ParameterChange::from_frame(&frame) {
                Ok(change) => self.apply_parameter(change.domain, change.param, change.value),
                Err(e) => self.report_frame_error("parameter", e.to_string()),
            },
            class => debug!(
                "Ignoring {} frame type 0x{:02X} ({} payload bytes)",
                class,
                frame.type_byte,
                frame.payload.len()
            ),
        }
    }

    fn handle_bulk(&mut self, frame: &Frame) {
        let record = match BulkRecord::from_frame(frame) {
            Ok(record) => record,
            Err(e) => return self.report_frame_error("bulk", e.to_string()),
        };

        for warning in &record.warnings {
            warn!("{} index {}: {}", record.label(), record.index, warning);
        }

        match self.state.apply_bulk_record(&record) {
            Some((slot, preset)) => {
                info!("Received {} '{}'", slot, preset.name());
                self.emit(EngineEvent::PresetUpdated {
                    kind: slot.kind(),
                    slot,
                    preset,
                });
                self.persist();
            }
            None => {
                if let Some(bulk_type) = record.bulk_type {
                    let preset = Preset::decode(bulk_type.record_kind(), &record.data);
                    debug!(
                        "{} index {} '{}' not mirrored",
                        bulk_type,
                        record.index,
                        preset.name()
                    );
                }
            }
        }
    }

    fn apply_parameter(&mut self, domain: u8, param: u8, value: u16) {
        if self.state.set_parameter(domain, param, value) {
            debug!(
                "Parameter {}:{} = {}",
                domain_name(domain).unwrap_or("?"),
                param,
                value
            );
            self.emit(EngineEvent::ParameterChanged {
                domain,
                param,
                value,
            });
        }
    }

    fn report_frame_error(&mut self, source: &str, message: String) {
        warn!("Dropped {} frame: {}", source, message);
        self.emit(EngineEvent::FrameError {
            source: source.to_string(),
            message,
        });
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Returns false once the engine should stop
    fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Connect {
                input,
                output,
                reply,
            } => {
                if let Some(input) = input {
                    self.options.midi.input_port = input;
                }
                if let Some(output) = output {
                    self.options.midi.output_port = output;
                }
                self.connection.reset_failures();
                let _ = reply.send(self.connect());
            }
            EngineCommand::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(Ok(()));
            }
            EngineCommand::ListPorts { reply } => {
                let _ = reply.send(self.transport.list_ports().map_err(EngineError::from));
            }
            EngineCommand::GetConnectionState { reply } => {
                let _ = reply.send(Ok(self.connection.state()));
            }
            EngineCommand::GetStatus { reply } => {
                let _ = reply.send(Ok(self.status_event()));
            }
            EngineCommand::RequestActiveState { reply } => {
                let result = self.require_connected().map(|()| {
                    self.schedule(&[
                        RequestOpcode::ActiveSetup,
                        RequestOpcode::ActiveEffectA,
                        RequestOpcode::ActiveEffectB,
                    ])
                });
                let _ = reply.send(result);
            }
            EngineCommand::RequestStoredSetup { index, reply } => {
                let result = check_index(index)
                    .and_then(|()| self.request(RequestOpcode::StoredSetup, Some(index), None));
                let _ = reply.send(result);
            }
            EngineCommand::RequestStoredEffect { index, reply } => {
                let result = check_index(index)
                    .and_then(|()| self.request(RequestOpcode::StoredEffect, Some(index), None));
                let _ = reply.send(result);
            }
            EngineCommand::RequestAllStoredSetups { reply } => {
                let _ = reply.send(self.request(RequestOpcode::AllStoredSetups, None, None));
            }
            EngineCommand::RequestAllStoredEffects { reply } => {
                let _ = reply.send(self.request(RequestOpcode::AllStoredEffects, None, None));
            }
            EngineCommand::RequestParameterValue {
                domain,
                param,
                reply,
            } => {
                let result = check_parameter(domain, param, 0).and_then(|()| {
                    self.request(RequestOpcode::ParameterValue, Some(param), Some(domain))
                });
                let _ = reply.send(result);
            }
            EngineCommand::SendParameterChange {
                domain,
                param,
                value,
                origin,
                reply,
            } => {
                let _ = reply.send(self.send_parameter_change(domain, param, value, origin));
            }
            EngineCommand::SendPresetToActive {
                preset,
                slot,
                reply,
            } => {
                let target = match preset.kind() {
                    RecordKind::Setup => PresetSlot::ActiveSetup,
                    RecordKind::Effect => PresetSlot::active_effect(slot),
                };
                let _ = reply.send(self.send_preset(target, preset));
            }
            EngineCommand::SavePresetToRegister {
                preset,
                index,
                reply,
            } => {
                let result = check_index(index).and_then(|()| {
                    let target = match preset.kind() {
                        RecordKind::Setup => PresetSlot::StoredSetup(index),
                        RecordKind::Effect => PresetSlot::StoredEffect(index),
                    };
                    self.send_preset(target, preset)
                });
                let _ = reply.send(result);
            }
            EngineCommand::GetFullState { reply } => {
                let _ = reply.send(Ok(self.state.full_state(self.connection.is_connected())));
            }
            EngineCommand::GetParameter {
                domain,
                param,
                reply,
            } => {
                let _ = reply.send(Ok(self.state.get_parameter(domain, param)));
            }
            EngineCommand::GetPreset { slot, reply } => {
                let _ = reply.send(Ok(self.state.preset(slot)));
            }
            EngineCommand::ListPresets { reply } => {
                let _ = reply.send(Ok(self.state.list_stored()));
            }
            EngineCommand::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn send_parameter_change(
        &mut self,
        domain: u8,
        param: u8,
        value: u16,
        origin: ChangeOrigin,
    ) -> Result<(), EngineError> {
        check_parameter(domain, param, value)?;
        let frame = build_parameter_frame(domain, param, value, self.options.midi.channel);
        self.send_frame(&frame)?;

        if origin == ChangeOrigin::Local {
            self.apply_parameter(domain, param, value);
        }
        Ok(())
    }

    /// Validate, encode and send a preset, then mirror it into `slot`
    fn send_preset(&mut self, slot: PresetSlot, preset: Preset) -> Result<PresetSlot, EngineError> {
        preset.validate()?;
        let frame = build_bulk_frame(
            &preset.to_bytes(),
            slot.bulk_type().type_byte(),
            slot.index(),
            self.options.midi.channel,
        )?;
        self.send_frame(&frame)?;

        info!("Sent '{}' to {}", preset.name(), slot);
        if self.state.store_preset(slot, preset.clone()) {
            self.emit(EngineEvent::PresetUpdated {
                kind: slot.kind(),
                slot,
                preset,
            });
            self.persist();
        }
        Ok(slot)
    }

    fn request(
        &mut self,
        opcode: RequestOpcode,
        value: Option<u8>,
        domain: Option<u8>,
    ) -> Result<(), EngineError> {
        let frame = build_request_frame(
            opcode,
            value.map(u16::from),
            domain,
            self.options.midi.channel,
        )?;
        debug!("Requesting {}", opcode);
        self.send_frame(&frame)?;
        self.last_request_at = Some(Instant::now());
        Ok(())
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), EngineError> {
        self.require_connected()?;
        if let Err(e) = self.transport.send(frame) {
            error!("Transport send failed: {}", e);
            self.on_transport_failure();
            return Err(e.into());
        }
        Ok(())
    }

    fn require_connected(&self) -> Result<(), EngineError> {
        if self.connection.is_connected() && self.transport.is_open() {
            Ok(())
        } else {
            Err(EngineError::NotConnected)
        }
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    fn connect(&mut self) -> Result<OpenPorts, EngineError> {
        self.transport.close();
        self.scheduled.clear();
        self.nrpn.reset();
        self.reconnect_at = None;

        self.connection.begin_connect();
        self.emit_status();

        let midi = &self.options.midi;
        let input = midi.resolve_port(&midi.input_port).to_string();
        let output = midi.resolve_port(&midi.output_port).to_string();

        match self.transport.open(&input, &output, self.inbound_tx.clone()) {
            Ok(ports) => {
                self.connection.mark_connected(ports.clone());
                self.emit_status();
                self.schedule_initial_sync();
                Ok(ports)
            }
            Err(e) => {
                error!("Failed to open device ports: {}", e);
                self.schedule_reconnect();
                self.emit_status();
                Err(e.into())
            }
        }
    }

    fn disconnect(&mut self) {
        self.transport.close();
        self.scheduled.clear();
        self.nrpn.reset();
        self.reconnect_at = None;
        self.connection.mark_closed();
        self.emit_status();
    }

    fn on_transport_failure(&mut self) {
        self.transport.close();
        self.scheduled.clear();
        self.nrpn.reset();
        self.schedule_reconnect();
        self.emit_status();
    }

    fn schedule_reconnect(&mut self) {
        match self.connection.mark_failed() {
            Some(delay) => {
                info!("Reconnecting in {:?}", delay);
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                warn!(
                    "Giving up after {} reconnect attempts",
                    self.options.reconnect.max_retries
                );
                self.reconnect_at = None;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Scheduled requests
    // -------------------------------------------------------------------------

    /// Active state, then both stored banks, with the effects bank last
    fn schedule_initial_sync(&mut self) {
        self.schedule(&[
            RequestOpcode::ActiveSetup,
            RequestOpcode::ActiveEffectA,
            RequestOpcode::ActiveEffectB,
            RequestOpcode::AllStoredSetups,
        ]);
        let settle = self.options.stored_effects_settle;
        let due = self.next_slot() + settle;
        self.scheduled.push_back(ScheduledRequest {
            due,
            opcode: RequestOpcode::AllStoredEffects,
        });
    }

    /// Queue requests `request_spacing` apart after anything already queued
    fn schedule(&mut self, opcodes: &[RequestOpcode]) {
        for &opcode in opcodes {
            let due = self.next_slot();
            self.scheduled.push_back(ScheduledRequest { due, opcode });
        }
    }

    /// Spacing also holds across an empty queue, measured from the last request sent
    fn next_slot(&self) -> Instant {
        let spacing = self.options.request_spacing;
        match (self.scheduled.back(), self.last_request_at) {
            (Some(last), _) => last.due + spacing,
            (None, Some(sent)) => (sent + spacing).max(Instant::now()),
            (None, None) => Instant::now(),
        }
    }

    fn send_next_scheduled(&mut self) {
        let Some(next) = self.scheduled.pop_front() else {
            return;
        };
        if let Err(e) = self.request(next.opcode, None, None) {
            warn!("Scheduled {} request failed: {}", next.opcode, e);
        }
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn status_event(&self) -> EngineEvent {
        let ports = self.connection.ports();
        EngineEvent::ConnectionChanged {
            state: self.connection.state(),
            connected: self.connection.state() == ConnectionState::Connected,
            input: ports.map(|p| p.input.clone()),
            output: ports.map(|p| p.output.clone()),
        }
    }

    fn emit_status(&self) {
        self.emit(self.status_event());
    }

    fn persist(&self) {
        if let Some(persistence) = &self.persistence {
            persistence.request_save(PresetSnapshot::from_state(&self.state));
        }
    }
}

fn check_index(index: u8) -> Result<(), EngineError> {
    if index < STORED_BANK_SIZE {
        Ok(())
    } else {
        Err(EngineError::InvalidIndex(index))
    }
}

fn check_parameter(domain: u8, param: u8, value: u16) -> Result<(), EngineError> {
    if domain > MAX_DOMAIN {
        return Err(EngineError::InvalidParameter(format!(
            "domain {} out of range (0-{})",
            domain, MAX_DOMAIN
        )));
    }
    if param > MAX_PARAM_NUMBER {
        return Err(EngineError::InvalidParameter(format!(
            "parameter {} out of range (0-{})",
            param, MAX_PARAM_NUMBER
        )));
    }
    if value > MAX_PARAM_VALUE {
        return Err(EngineError::InvalidParameter(format!(
            "value {} out of range (0-{})",
            value, MAX_PARAM_VALUE
        )));
    }
    Ok(())
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
