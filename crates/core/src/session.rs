//! The realtime session manager.
//!
//! Owns the one live connection to the speech service and everything hanging
//! off it: session configuration, audio streaming both ways, conversation
//! reconciliation, tool dispatch, and interruption semantics. A driver task
//! per connection `select!`s over the outbound command channel and the inbound
//! event stream, so server events apply in strict arrival order.

use crate::audio::{AudioCapture, AudioPlayback, TrackOffset, bytes_from_base64, encode_pcm16_base64};
use crate::builtin::ConsoleState;
use crate::conversation::{Conversation, ConversationItem};
use crate::error::SessionError;
use crate::events::{Direction, EventDispatcher, EventLog, LogEntry, SessionEvent, SubscriptionId};
use crate::tools::{ToolDefinition, ToolHandler, ToolRegistry};
use parlance_realtime::{Connector, EventSink, EventStream};
use parlance_realtime_types::{
    self as wire, ClientEvent, Inbound, ServerEvent, SessionConfig, Transcription, TurnDetection,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How the end of a user speech segment is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDetectionMode {
    /// Explicit push-to-talk: the caller brackets capture with
    /// `start_recording`/`stop_recording`.
    Manual,
    /// The service detects speech boundaries; capture runs continuously.
    ServerVad,
}

/// Session configuration owned by the manager and pushed on every
/// `session.update`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub instructions: String,
    pub voice: String,
    pub transcription_model: String,
    pub turn_detection: TurnDetectionMode,
    /// Sent as a user text item right after connecting, when set.
    pub greeting: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            voice: "alloy".to_string(),
            transcription_model: "whisper-1".to_string(),
            turn_detection: TurnDetectionMode::Manual,
            greeting: Some("Hello!".to_string()),
        }
    }
}

/// Partial configuration change; unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct SessionConfigUpdate {
    pub instructions: Option<String>,
    pub transcription_model: Option<String>,
    pub turn_detection: Option<TurnDetectionMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnecting,
}

struct Live {
    outbound: mpsc::Sender<ClientEvent>,
    driver: JoinHandle<()>,
    forwarder: Option<JoinHandle<()>>,
}

enum Phase {
    Uninitialized,
    Connecting,
    Connected(Live),
    Disconnecting,
}

struct ManagerState {
    phase: Phase,
    options: SessionOptions,
    /// Bumped on every connect and disconnect; async completions carry the
    /// generation they started under and are discarded on mismatch.
    generation: u64,
    recording: bool,
}

struct Inner {
    connector: Arc<dyn Connector>,
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn AudioPlayback>,
    tools: Arc<ToolRegistry>,
    console: Arc<ConsoleState>,
    dispatcher: EventDispatcher,
    conversation: Mutex<Conversation>,
    log: Mutex<EventLog>,
    state: Mutex<ManagerState>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        capture: Arc<dyn AudioCapture>,
        playback: Arc<dyn AudioPlayback>,
        tools: Arc<ToolRegistry>,
        console: Arc<ConsoleState>,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                capture,
                playback,
                tools,
                console,
                dispatcher: EventDispatcher::new(),
                conversation: Mutex::new(Conversation::new()),
                log: Mutex::new(EventLog::default()),
                state: Mutex::new(ManagerState {
                    phase: Phase::Uninitialized,
                    options,
                    generation: 0,
                    recording: false,
                }),
            }),
        }
    }

    // ---- lifecycle -------------------------------------------------------

    /// Establishes the session if not already connected and applies the
    /// current configuration. In `ServerVad` mode capture starts immediately.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let my_generation = {
            let mut state = self.lock_state();
            match state.phase {
                Phase::Connected(_) => return Ok(()),
                Phase::Connecting | Phase::Disconnecting => {
                    return Err(SessionError::NotReady("connect"));
                }
                Phase::Uninitialized => {
                    state.phase = Phase::Connecting;
                    state.generation += 1;
                    state.generation
                }
            }
        };

        let (sink, stream) = match self.inner.connector.connect().await {
            Ok(pair) => pair,
            Err(e) => {
                let mut state = self.lock_state();
                if state.generation == my_generation {
                    state.phase = Phase::Uninitialized;
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.inner.playback.connect() {
            warn!(error = %e, "playback device failed to connect; audio output disabled");
        }

        // Fresh session, fresh state.
        self.inner.conversation.lock().expect("conversation lock poisoned").clear();
        self.inner.log.lock().expect("event log lock poisoned").clear();

        let (outbound_tx, outbound_rx) = mpsc::channel(128);
        let driver = tokio::spawn(run_driver(self.inner.clone(), my_generation, sink, stream, outbound_rx));

        {
            let mut state = self.lock_state();
            if state.generation != my_generation {
                // A disconnect raced the handshake; this session is stale.
                driver.abort();
                return Ok(());
            }
            state.phase = Phase::Connected(Live {
                outbound: outbound_tx,
                driver,
                forwarder: None,
            });
        }
        info!("session connected");

        self.push_session_config().await?;

        let (greeting, server_vad) = {
            let state = self.lock_state();
            (
                state.options.greeting.clone(),
                state.options.turn_detection == TurnDetectionMode::ServerVad,
            )
        };
        if let Some(text) = greeting {
            self.send_user_text(&text).await?;
        }
        if server_vad {
            self.begin_capture()?;
        }
        Ok(())
    }

    /// Idempotent teardown. Stops capture, releases playback, clears the
    /// conversation, event log, and session-scoped console state. Safe to
    /// call at any time, from any state.
    pub async fn disconnect(&self) {
        let live = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.recording = false;
            match std::mem::replace(&mut state.phase, Phase::Disconnecting) {
                Phase::Connected(live) => Some(live),
                _ => None,
            }
        };

        if let Some(live) = live {
            if let Some(forwarder) = live.forwarder {
                forwarder.abort();
            }
            live.driver.abort();
        }
        if let Err(e) = self.inner.capture.pause() {
            debug!(error = %e, "capture pause during disconnect");
        }
        if let Err(e) = self.inner.capture.end() {
            debug!(error = %e, "capture end during disconnect");
        }
        self.inner.playback.interrupt();

        self.inner.conversation.lock().expect("conversation lock poisoned").clear();
        self.inner.log.lock().expect("event log lock poisoned").clear();
        self.inner.console.reset();

        self.lock_state().phase = Phase::Uninitialized;
        info!("session disconnected");
    }

    /// Silent reconnect after the host regains foreground focus; covers
    /// transport drops while backgrounded. Failure is logged, never fatal.
    pub async fn handle_focus_regained(&self) {
        if self.connection_state() != ConnectionState::Connected {
            return;
        }
        info!("focus regained; refreshing realtime session");
        self.disconnect().await;
        if let Err(e) = self.connect().await {
            warn!(error = %e, "silent reconnect after focus regain failed");
        }
    }

    // ---- configuration ---------------------------------------------------

    /// Applies a configuration change. Switching to manual turn handling
    /// while capture is live pauses capture *before* the config message goes
    /// out; switching to server VAD while connected resumes capture after.
    pub async fn update_session_config(&self, update: SessionConfigUpdate) -> Result<(), SessionError> {
        let (to_manual_while_recording, to_server_vad, connected) = {
            let mut state = self.lock_state();
            if matches!(state.phase, Phase::Connecting | Phase::Disconnecting) {
                return Err(SessionError::NotReady("update_session_config"));
            }
            if let Some(instructions) = update.instructions {
                state.options.instructions = instructions;
            }
            if let Some(model) = update.transcription_model {
                state.options.transcription_model = model;
            }
            let mut to_manual_while_recording = false;
            let mut to_server_vad = false;
            if let Some(mode) = update.turn_detection
                && mode != state.options.turn_detection
            {
                state.options.turn_detection = mode;
                match mode {
                    TurnDetectionMode::Manual => to_manual_while_recording = state.recording,
                    TurnDetectionMode::ServerVad => to_server_vad = true,
                }
            }
            (
                to_manual_while_recording,
                to_server_vad,
                matches!(state.phase, Phase::Connected(_)),
            )
        };

        if to_manual_while_recording {
            self.pause_capture();
        }
        if connected {
            self.push_session_config().await?;
            if to_server_vad {
                self.begin_capture()?;
            }
        }
        Ok(())
    }

    /// Adds or replaces a tool; re-advertises the tool surface immediately
    /// when connected.
    pub async fn register_tool(&self, definition: ToolDefinition, handler: ToolHandler) {
        self.inner.tools.register(definition, handler);
        if self.connection_state() == ConnectionState::Connected
            && let Err(e) = self.push_session_config().await
        {
            warn!(error = %e, "failed to re-advertise tools");
        }
    }

    async fn push_session_config(&self) -> Result<(), SessionError> {
        let session = {
            let state = self.lock_state();
            build_session_config(&state.options, &self.inner.tools)
        };
        self.send_event(ClientEvent::SessionUpdate { session }).await
    }

    // ---- conversation commands -------------------------------------------

    /// Enqueues a user text item and asks for a reply.
    pub async fn send_user_text(&self, text: &str) -> Result<(), SessionError> {
        self.send_event(ClientEvent::ConversationItemCreate {
            previous_item_id: None,
            item: wire::Item::message(wire::ItemRole::User, text),
        })
        .await?;
        self.send_event(ClientEvent::ResponseCreate).await
    }

    /// Explicit turn-end signal in manual mode.
    pub async fn create_response(&self) -> Result<(), SessionError> {
        self.send_event(ClientEvent::ResponseCreate).await
    }

    /// Removes an item locally and, when connected, on the remote session.
    /// Returns whether a local item was removed.
    pub async fn delete_item(&self, item_id: &str) -> bool {
        let removed = self
            .inner
            .conversation
            .lock()
            .expect("conversation lock poisoned")
            .remove(item_id);
        if let Some((outbound, _)) = self.outbound() {
            let _ = outbound
                .send(ClientEvent::ConversationItemDelete {
                    item_id: item_id.to_string(),
                })
                .await;
        }
        removed
    }

    /// Forwards one PCM16 capture frame. A no-op when not connected or not
    /// recording, so a racing capture callback cannot corrupt session state.
    pub async fn append_audio_frame(&self, frame: &[i16]) -> Result<(), SessionError> {
        let outbound = {
            let state = self.lock_state();
            if !state.recording {
                return Ok(());
            }
            match &state.phase {
                Phase::Connected(live) => live.outbound.clone(),
                _ => return Ok(()),
            }
        };
        // A send failure here means the session tore down mid-frame; the
        // frame is simply dropped with it.
        let _ = outbound
            .send(ClientEvent::InputAudioBufferAppend {
                audio: encode_pcm16_base64(frame),
            })
            .await;
        Ok(())
    }

    /// Stops playback and reports the interruption offset to the service so
    /// its notion of "what the user heard" matches reality.
    pub async fn interrupt_playback(&self) -> Option<TrackOffset> {
        self.inner.interrupt_and_report()
    }

    // ---- push-to-talk ----------------------------------------------------

    /// Begins a manual speech segment: ensures the session is live
    /// (reconnecting if needed), barges in on any in-flight playback, then
    /// starts forwarding capture frames.
    pub async fn start_recording(&self) -> Result<(), SessionError> {
        match self.connection_state() {
            ConnectionState::Connected => {}
            ConnectionState::Uninitialized => self.connect().await?,
            _ => return Err(SessionError::NotReady("start_recording")),
        }
        self.inner.interrupt_and_report();
        self.begin_capture()
    }

    /// Ends the manual speech segment and prompts the service to reply.
    pub async fn stop_recording(&self) -> Result<(), SessionError> {
        self.pause_capture();
        self.send_event(ClientEvent::InputAudioBufferCommit).await?;
        self.send_event(ClientEvent::ResponseCreate).await
    }

    fn begin_capture(&self) -> Result<(), SessionError> {
        self.inner
            .capture
            .begin()
            .map_err(|e| SessionError::Device(e.to_string()))?;
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<i16>>(64);
        self.inner
            .capture
            .record(frame_tx)
            .map_err(|e| SessionError::Device(e.to_string()))?;

        let manager = self.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let _ = manager.append_audio_frame(&frame).await;
            }
        });

        let mut state = self.lock_state();
        match &mut state.phase {
            Phase::Connected(live) => {
                if let Some(old) = live.forwarder.replace(forwarder) {
                    old.abort();
                }
                state.recording = true;
                Ok(())
            }
            _ => {
                forwarder.abort();
                let _ = self.inner.capture.pause();
                Err(SessionError::NotReady("begin_capture"))
            }
        }
    }

    fn pause_capture(&self) {
        if let Err(e) = self.inner.capture.pause() {
            warn!(error = %e, "capture pause failed");
        }
        self.lock_state().recording = false;
    }

    // ---- read surface ----------------------------------------------------

    pub fn connection_state(&self) -> ConnectionState {
        match self.lock_state().phase {
            Phase::Uninitialized => ConnectionState::Uninitialized,
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Connected(_) => ConnectionState::Connected,
            Phase::Disconnecting => ConnectionState::Disconnecting,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn is_recording(&self) -> bool {
        self.lock_state().recording
    }

    pub fn turn_detection(&self) -> TurnDetectionMode {
        self.lock_state().options.turn_detection
    }

    pub fn conversation_snapshot(&self) -> Arc<Vec<ConversationItem>> {
        self.inner
            .conversation
            .lock()
            .expect("conversation lock poisoned")
            .snapshot()
    }

    pub fn event_log_snapshot(&self) -> Arc<Vec<LogEntry>> {
        self.inner.log.lock().expect("event log lock poisoned").snapshot()
    }

    pub fn last_assistant_message(&self) -> Option<String> {
        self.inner
            .conversation
            .lock()
            .expect("conversation lock poisoned")
            .last_assistant_message()
            .map(str::to_string)
    }

    pub fn last_user_message(&self) -> Option<String> {
        self.inner
            .conversation
            .lock()
            .expect("conversation lock poisoned")
            .last_user_message()
            .map(str::to_string)
    }

    pub fn console_state(&self) -> Arc<ConsoleState> {
        self.inner.console.clone()
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        self.inner.dispatcher.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.dispatcher.unsubscribe(id);
    }

    // ---- internals -------------------------------------------------------

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.inner.state.lock().expect("session state lock poisoned")
    }

    fn outbound(&self) -> Option<(mpsc::Sender<ClientEvent>, u64)> {
        let state = self.lock_state();
        match &state.phase {
            Phase::Connected(live) => Some((live.outbound.clone(), state.generation)),
            _ => None,
        }
    }

    async fn send_event(&self, event: ClientEvent) -> Result<(), SessionError> {
        let (outbound, _) = self
            .outbound()
            .ok_or(SessionError::NotReady("send_event"))?;
        outbound
            .send(event)
            .await
            .map_err(|_| SessionError::NotReady("send_event"))
    }
}

fn build_session_config(options: &SessionOptions, tools: &ToolRegistry) -> SessionConfig {
    SessionConfig {
        instructions: Some(options.instructions.clone()),
        voice: Some(options.voice.clone()),
        input_audio_transcription: Some(Transcription {
            model: Some(options.transcription_model.clone()),
        }),
        turn_detection: match options.turn_detection {
            TurnDetectionMode::Manual => None,
            TurnDetectionMode::ServerVad => Some(TurnDetection::server_vad()),
        },
        tools: tools.specs(),
        ..Default::default()
    }
}

impl Inner {
    fn current_outbound(&self, generation: u64) -> Option<mpsc::Sender<ClientEvent>> {
        let state = self.state.lock().expect("session state lock poisoned");
        if state.generation != generation {
            return None;
        }
        match &state.phase {
            Phase::Connected(live) => Some(live.outbound.clone()),
            _ => None,
        }
    }

    fn generation(&self) -> u64 {
        self.state.lock().expect("session state lock poisoned").generation
    }

    /// Stops playback; when a track was mid-play, truncates it locally and
    /// notifies the service of the exact heard offset. Returns the offset, or
    /// `None` when nothing was playing or the device cannot report one.
    fn interrupt_and_report(&self) -> Option<TrackOffset> {
        let offset = self.playback.interrupt()?;
        debug!(track = %offset.track_id, samples = offset.sample_offset, "playback interrupted");

        let snapshot = self
            .conversation
            .lock()
            .expect("conversation lock poisoned")
            .truncate(&offset.track_id, offset.offset_ms());
        if let Some(item) = snapshot {
            self.dispatcher.emit(SessionEvent::ConversationUpdated {
                item,
                audio_delta: None,
            });
        }

        let generation = self.generation();
        if let Some(outbound) = self.current_outbound(generation) {
            // try_send: this may run on the driver task itself, which also
            // drains the channel, so a blocking send could deadlock.
            let _ = outbound.try_send(ClientEvent::ResponseCancel);
            let _ = outbound.try_send(ClientEvent::ConversationItemTruncate {
                item_id: offset.track_id.clone(),
                content_index: 0,
                audio_end_ms: offset.offset_ms(),
            });
        }
        Some(offset)
    }

    /// Drops the session to `Uninitialized` after a fatal transport error,
    /// if it is still the same session.
    fn fatal_disconnect(&self, generation: u64) {
        let live = {
            let mut state = self.state.lock().expect("session state lock poisoned");
            if state.generation != generation {
                return;
            }
            state.generation += 1;
            state.recording = false;
            match std::mem::replace(&mut state.phase, Phase::Uninitialized) {
                Phase::Connected(live) => Some(live),
                _ => None,
            }
        };
        if let Some(live) = live
            && let Some(forwarder) = live.forwarder
        {
            forwarder.abort();
        }
        if let Err(e) = self.capture.pause() {
            debug!(error = %e, "capture pause after transport loss");
        }
        self.playback.interrupt();
        warn!("session dropped after transport failure");
    }

    fn log_event(&self, direction: Direction, event_type: &str, payload: serde_json::Value) {
        self.log
            .lock()
            .expect("event log lock poisoned")
            .push(direction, event_type, payload.clone());
        self.dispatcher.emit(SessionEvent::Realtime {
            direction,
            event_type: event_type.to_string(),
            payload,
        });
    }
}

async fn run_driver(
    inner: Arc<Inner>,
    generation: u64,
    mut sink: Box<dyn EventSink>,
    mut stream: Box<dyn EventStream>,
    mut outbound: mpsc::Receiver<ClientEvent>,
) {
    loop {
        tokio::select! {
            biased;
            maybe_command = outbound.recv() => match maybe_command {
                Some(event) => {
                    inner.log_event(
                        Direction::Client,
                        event.event_type(),
                        serde_json::to_value(&event).unwrap_or(serde_json::Value::Null),
                    );
                    if let Err(e) = sink.send(event).await {
                        inner.dispatcher.emit(SessionEvent::Error { message: e.to_string() });
                        inner.fatal_disconnect(generation);
                        break;
                    }
                }
                // All senders dropped: orderly disconnect.
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            maybe_event = stream.next() => match maybe_event {
                Some(Ok(inbound)) => handle_server_event(&inner, generation, inbound),
                Some(Err(e)) => {
                    inner.dispatcher.emit(SessionEvent::Error { message: e.to_string() });
                    inner.fatal_disconnect(generation);
                    break;
                }
                None => {
                    inner.dispatcher.emit(SessionEvent::Error {
                        message: "connection closed by peer".to_string(),
                    });
                    inner.fatal_disconnect(generation);
                    break;
                }
            },
        }
    }
    debug!(generation, "driver task finished");
}

fn handle_server_event(inner: &Arc<Inner>, generation: u64, inbound: Inbound) {
    let Inbound { event, raw } = inbound;
    inner.log_event(Direction::Server, event.event_type(), raw);

    let emit_update = |snapshot, audio_delta| {
        if let Some(item) = snapshot {
            inner.dispatcher.emit(SessionEvent::ConversationUpdated { item, audio_delta });
        }
    };
    let conversation = || inner.conversation.lock().expect("conversation lock poisoned");

    match event {
        ServerEvent::Error { error } => {
            warn!(code = ?error.code, "service error: {}", error.message);
            inner.dispatcher.emit(SessionEvent::Error { message: error.message });
        }

        ServerEvent::ConversationItemCreated { item, .. }
        | ServerEvent::ResponseOutputItemAdded { item } => {
            emit_update(conversation().upsert(&item), None);
        }
        ServerEvent::ResponseOutputItemDone { item } => {
            let snapshot = {
                let mut guard = conversation();
                guard.upsert(&item);
                item.id.as_deref().and_then(|id| guard.complete(id))
            };
            emit_update(snapshot, None);
        }
        ServerEvent::ConversationItemDeleted { item_id } => {
            conversation().remove(&item_id);
        }
        ServerEvent::ConversationItemTruncated { item_id, audio_end_ms } => {
            emit_update(conversation().truncate(&item_id, audio_end_ms), None);
        }

        ServerEvent::ResponseAudioDelta { item_id, delta } => match bytes_from_base64(&delta) {
            Ok(bytes) => {
                let samples: Vec<i16> = bytes
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect();
                inner.playback.add_pcm16(&item_id, &samples);
                emit_update(conversation().append_audio(&item_id, &bytes), Some(samples));
            }
            Err(e) => warn!(item_id, error = %e, "undecodable audio delta"),
        },
        ServerEvent::ResponseAudioTranscriptDelta { item_id, delta } => {
            emit_update(conversation().append_transcript_delta(&item_id, &delta), None);
        }
        ServerEvent::ResponseAudioTranscriptDone { item_id, transcript } => {
            emit_update(conversation().set_transcript(&item_id, &transcript), None);
        }
        ServerEvent::ResponseTextDelta { item_id, delta } => {
            emit_update(conversation().append_text_delta(&item_id, &delta), None);
        }
        ServerEvent::ResponseTextDone { item_id, text } => {
            emit_update(conversation().set_text(&item_id, &text), None);
        }
        ServerEvent::InputAudioTranscriptionDelta { item_id, delta } => {
            emit_update(conversation().append_transcript_delta(&item_id, &delta), None);
        }
        ServerEvent::InputAudioTranscriptionCompleted { item_id, transcript } => {
            emit_update(conversation().set_transcript(&item_id, &transcript), None);
        }

        ServerEvent::SpeechStarted { .. } => {
            // The user is talking over the assistant: cut playback, report
            // the heard offset, and tell subscribers the turn was cut short.
            inner.interrupt_and_report();
            inner.dispatcher.emit(SessionEvent::ConversationInterrupted);
        }

        ServerEvent::FunctionCallArgumentsDelta { call_id, delta } => {
            emit_update(conversation().append_tool_arguments(&call_id, &delta), None);
        }
        ServerEvent::FunctionCallArgumentsDone { call_id, name, arguments, .. } => {
            let snapshot = conversation().set_tool_arguments(&call_id, &arguments);
            emit_update(snapshot, None);
            let name = name.or_else(|| conversation().tool_name_for_call(&call_id));
            match name {
                Some(name) => spawn_tool_call(inner, generation, call_id, name, arguments),
                None => {
                    warn!(call_id, "function call without a resolvable name");
                    respond_to_call(
                        inner,
                        generation,
                        call_id,
                        json!({ "error": "function call had no name" }),
                    );
                }
            }
        }

        ServerEvent::Unknown { event_type, .. } => {
            debug!(%event_type, "ignoring unknown server event");
        }

        // Lifecycle events that only matter to the log.
        ServerEvent::SessionCreated { .. }
        | ServerEvent::SessionUpdated { .. }
        | ServerEvent::SpeechStopped { .. }
        | ServerEvent::InputAudioBufferCommitted { .. }
        | ServerEvent::ResponseCreated { .. }
        | ServerEvent::ResponseContentPartAdded { .. }
        | ServerEvent::ResponseAudioDone { .. }
        | ServerEvent::ResponseDone { .. }
        | ServerEvent::RateLimitsUpdated { .. } => {}
    }
}

/// Runs the tool off the driver task and feeds its output back, unless the
/// session it belongs to is gone by the time it finishes.
fn spawn_tool_call(inner: &Arc<Inner>, generation: u64, call_id: String, name: String, arguments: String) {
    let inner = inner.clone();
    tokio::spawn(async move {
        debug!(tool = %name, call_id, "dispatching tool call");
        let output = inner.tools.invoke(&name, &arguments).await;
        if inner.generation() != generation {
            debug!(tool = %name, "discarding tool result for a stale session");
            return;
        }
        respond_to_call(&inner, generation, call_id, output);
    });
}

fn respond_to_call(inner: &Arc<Inner>, generation: u64, call_id: String, output: serde_json::Value) {
    let Some(outbound) = inner.current_outbound(generation) else {
        return;
    };
    tokio::spawn(async move {
        let item = wire::Item::function_call_output(call_id, output.to_string());
        if outbound
            .send(ClientEvent::ConversationItemCreate { previous_item_id: None, item })
            .await
            .is_err()
        {
            debug!("session closed before tool output could be sent");
            return;
        }
        let _ = outbound.send(ClientEvent::ResponseCreate).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ItemStatus;
    use crate::error::ToolError;
    use async_trait::async_trait;
    use parlance_realtime::{ConnectError, TransportError};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    type Ops = Arc<Mutex<Vec<String>>>;
    type Sent = Arc<Mutex<Vec<ClientEvent>>>;

    fn push_op(ops: &Ops, op: &str) {
        ops.lock().unwrap().push(op.to_string());
    }

    struct SessionHandle {
        sent: Sent,
        server_tx: mpsc::UnboundedSender<Inbound>,
    }

    struct FakeConnector {
        ops: Ops,
        sessions: Mutex<Vec<SessionHandle>>,
        fail_next: AtomicBool,
        missing_credential: bool,
    }

    impl FakeConnector {
        fn new(ops: Ops) -> Arc<Self> {
            Arc::new(Self {
                ops,
                sessions: Mutex::new(Vec::new()),
                fail_next: AtomicBool::new(false),
                missing_credential: false,
            })
        }

        fn session_count(&self) -> usize {
            self.sessions.lock().unwrap().len()
        }

        fn session(&self, index: usize) -> (Sent, mpsc::UnboundedSender<Inbound>) {
            let sessions = self.sessions.lock().unwrap();
            let handle = &sessions[index];
            (handle.sent.clone(), handle.server_tx.clone())
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventStream>), ConnectError> {
            if self.missing_credential {
                return Err(ConnectError::MissingCredential);
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ConnectError::Transport(TransportError::Handshake(
                    "connection refused".to_string(),
                )));
            }
            let sent: Sent = Arc::new(Mutex::new(Vec::new()));
            let (server_tx, server_rx) = mpsc::unbounded_channel();
            self.sessions.lock().unwrap().push(SessionHandle {
                sent: sent.clone(),
                server_tx,
            });
            Ok((
                Box::new(FakeSink { ops: self.ops.clone(), sent }),
                Box::new(FakeStream { rx: server_rx }),
            ))
        }
    }

    struct FakeSink {
        ops: Ops,
        sent: Sent,
    }

    #[async_trait]
    impl EventSink for FakeSink {
        async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
            push_op(&self.ops, &format!("send:{}", event.event_type()));
            self.sent.lock().unwrap().push(event);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct FakeStream {
        rx: mpsc::UnboundedReceiver<Inbound>,
    }

    #[async_trait]
    impl EventStream for FakeStream {
        async fn next(&mut self) -> Option<Result<Inbound, TransportError>> {
            self.rx.recv().await.map(Ok)
        }
    }

    struct FakeCapture {
        ops: Ops,
    }

    impl AudioCapture for FakeCapture {
        fn begin(&self) -> anyhow::Result<()> {
            push_op(&self.ops, "capture.begin");
            Ok(())
        }

        fn record(&self, _sink: mpsc::Sender<Vec<i16>>) -> anyhow::Result<()> {
            push_op(&self.ops, "capture.record");
            Ok(())
        }

        fn pause(&self) -> anyhow::Result<()> {
            push_op(&self.ops, "capture.pause");
            Ok(())
        }

        fn end(&self) -> anyhow::Result<()> {
            push_op(&self.ops, "capture.end");
            Ok(())
        }
    }

    /// Tracks appended samples per track and reports interruption at the
    /// halfway point of whatever was appended.
    #[derive(Default)]
    struct PlaybackState {
        appended: HashMap<String, usize>,
        current: Option<String>,
    }

    #[derive(Default)]
    struct FakePlayback {
        state: Mutex<PlaybackState>,
    }

    impl FakePlayback {
        fn appended_to(&self, track_id: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .appended
                .get(track_id)
                .copied()
                .unwrap_or(0)
        }
    }

    impl AudioPlayback for FakePlayback {
        fn connect(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn add_pcm16(&self, track_id: &str, frames: &[i16]) {
            let mut state = self.state.lock().unwrap();
            *state.appended.entry(track_id.to_string()).or_default() += frames.len();
            state.current = Some(track_id.to_string());
        }

        fn interrupt(&self) -> Option<TrackOffset> {
            let mut state = self.state.lock().unwrap();
            let track_id = state.current.take()?;
            let appended = state.appended.get(&track_id).copied().unwrap_or(0);
            Some(TrackOffset {
                track_id,
                sample_offset: appended / 2,
            })
        }

        fn frequencies(&self, bins: usize) -> Vec<f32> {
            vec![0.0; bins]
        }
    }

    struct Harness {
        manager: SessionManager,
        connector: Arc<FakeConnector>,
        playback: Arc<FakePlayback>,
        ops: Ops,
    }

    fn harness(options: SessionOptions) -> Harness {
        let ops: Ops = Arc::new(Mutex::new(Vec::new()));
        let connector = FakeConnector::new(ops.clone());
        let playback = Arc::new(FakePlayback::default());
        let manager = SessionManager::new(
            connector.clone(),
            Arc::new(FakeCapture { ops: ops.clone() }),
            playback.clone(),
            Arc::new(ToolRegistry::new()),
            Arc::new(ConsoleState::new()),
            options,
        );
        Harness {
            manager,
            connector,
            playback,
            ops,
        }
    }

    fn quiet_options() -> SessionOptions {
        SessionOptions {
            greeting: None,
            ..Default::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not met within timeout");
    }

    fn inbound(event: ServerEvent) -> Inbound {
        let raw = json!({ "type": event.event_type() });
        Inbound { event, raw }
    }

    fn assistant_item(id: &str, status: wire::ItemStatus) -> wire::Item {
        wire::Item {
            id: Some(id.to_string()),
            kind: Some(wire::ItemType::Message),
            status: Some(status),
            role: Some(wire::ItemRole::Assistant),
            content: Some(Vec::new()),
            ..Default::default()
        }
    }

    fn user_text_item(id: &str, text: &str) -> wire::Item {
        wire::Item {
            id: Some(id.to_string()),
            status: Some(wire::ItemStatus::Completed),
            ..wire::Item::message(wire::ItemRole::User, text)
        }
    }

    fn function_call_item(id: &str, call_id: &str, name: &str) -> wire::Item {
        wire::Item {
            id: Some(id.to_string()),
            kind: Some(wire::ItemType::FunctionCall),
            status: Some(wire::ItemStatus::InProgress),
            call_id: Some(call_id.to_string()),
            name: Some(name.to_string()),
            arguments: Some(String::new()),
            ..Default::default()
        }
    }

    fn echo_tool() -> ToolDefinition {
        ToolDefinition {
            name: "remember".to_string(),
            description: "test tool".to_string(),
            parameters: json!({ "type": "object", "properties": { "key": { "type": "string" } } }),
            required: vec![],
        }
    }

    #[tokio::test]
    async fn connect_pushes_config_then_greeting() {
        let h = harness(SessionOptions {
            instructions: "Be brief.".to_string(),
            greeting: Some("Hello!".to_string()),
            ..Default::default()
        });
        h.manager.connect().await.unwrap();
        assert!(h.manager.is_connected());

        let (sent, _server) = h.connector.session(0);
        wait_until(|| sent.lock().unwrap().len() >= 3).await;
        let events = sent.lock().unwrap().clone();

        match &events[0] {
            ClientEvent::SessionUpdate { session } => {
                assert_eq!(session.instructions.as_deref(), Some("Be brief."));
                // Manual mode: explicit null turn detection.
                assert!(session.turn_detection.is_none());
            }
            other => panic!("expected session.update first, got {other:?}"),
        }
        match &events[1] {
            ClientEvent::ConversationItemCreate { item, .. } => {
                let text = item.content.as_ref().unwrap()[0].text.as_deref();
                assert_eq!(text, Some("Hello!"));
            }
            other => panic!("expected greeting item, got {other:?}"),
        }
        assert!(matches!(events[2], ClientEvent::ResponseCreate));
    }

    #[tokio::test]
    async fn connect_without_credential_is_an_authentication_error() {
        let ops: Ops = Arc::new(Mutex::new(Vec::new()));
        let connector = Arc::new(FakeConnector {
            ops: ops.clone(),
            sessions: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
            missing_credential: true,
        });
        let manager = SessionManager::new(
            connector,
            Arc::new(FakeCapture { ops: ops.clone() }),
            Arc::new(FakePlayback::default()),
            Arc::new(ToolRegistry::new()),
            Arc::new(ConsoleState::new()),
            quiet_options(),
        );

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::Authentication));
        assert_eq!(manager.connection_state(), ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn connect_twice_keeps_one_session() {
        let h = harness(quiet_options());
        h.manager.connect().await.unwrap();
        h.manager.connect().await.unwrap();
        assert_eq!(h.connector.session_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_restores_initial_state() {
        let h = harness(quiet_options());

        // Disconnect before any connect: no error, state untouched.
        h.manager.disconnect().await;
        assert_eq!(h.manager.connection_state(), ConnectionState::Uninitialized);

        h.manager.connect().await.unwrap();
        let (_, server) = h.connector.session(0);
        server
            .send(inbound(ServerEvent::ConversationItemCreated {
                previous_item_id: None,
                item: user_text_item("u1", "hello"),
            }))
            .unwrap();
        wait_until(|| !h.manager.conversation_snapshot().is_empty()).await;
        h.manager.console_state().memory.set("k", "v");

        h.manager.disconnect().await;
        h.manager.disconnect().await;

        assert_eq!(h.manager.connection_state(), ConnectionState::Uninitialized);
        assert!(h.manager.conversation_snapshot().is_empty());
        assert!(h.manager.event_log_snapshot().is_empty());
        assert!(h.manager.console_state().memory.snapshot().is_empty());
        assert!(!h.manager.is_recording());
    }

    #[tokio::test]
    async fn audio_deltas_stream_to_playback_and_decode_once_on_completion() {
        let h = harness(quiet_options());
        h.manager.connect().await.unwrap();
        let (_, server) = h.connector.session(0);

        server
            .send(inbound(ServerEvent::ConversationItemCreated {
                previous_item_id: None,
                item: assistant_item("a1", wire::ItemStatus::InProgress),
            }))
            .unwrap();
        server
            .send(inbound(ServerEvent::ResponseAudioDelta {
                item_id: "a1".to_string(),
                delta: encode_pcm16_base64(&[1, 2]),
            }))
            .unwrap();
        server
            .send(inbound(ServerEvent::ResponseAudioDelta {
                item_id: "a1".to_string(),
                delta: encode_pcm16_base64(&[3, 4]),
            }))
            .unwrap();
        server
            .send(inbound(ServerEvent::ResponseOutputItemDone {
                item: assistant_item("a1", wire::ItemStatus::Completed),
            }))
            .unwrap();

        wait_until(|| {
            h.manager
                .conversation_snapshot()
                .first()
                .is_some_and(|item| item.artifact.is_some())
        })
        .await;

        let snapshot = h.manager.conversation_snapshot();
        let item = &snapshot[0];
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.artifact.as_ref().unwrap().samples, vec![1, 2, 3, 4]);
        // Every delta also went straight to the playback device.
        assert_eq!(h.playback.appended_to("a1"), 4);
    }

    #[tokio::test]
    async fn switching_to_manual_pauses_capture_before_the_config_update() {
        let h = harness(SessionOptions {
            turn_detection: TurnDetectionMode::ServerVad,
            greeting: None,
            ..Default::default()
        });
        h.manager.connect().await.unwrap();
        wait_until(|| {
            let ops = h.ops.lock().unwrap();
            ops.contains(&"capture.record".to_string())
                && ops.contains(&"send:session.update".to_string())
        })
        .await;
        assert!(h.manager.is_recording());

        h.manager
            .update_session_config(SessionConfigUpdate {
                turn_detection: Some(TurnDetectionMode::Manual),
                ..Default::default()
            })
            .await
            .unwrap();
        wait_until(|| {
            h.ops
                .lock()
                .unwrap()
                .iter()
                .filter(|op| *op == "send:session.update")
                .count()
                >= 2
        })
        .await;

        let ops = h.ops.lock().unwrap().clone();
        let pause_at = ops.iter().position(|op| op == "capture.pause").unwrap();
        let last_update_at = ops
            .iter()
            .rposition(|op| op == "send:session.update")
            .unwrap();
        assert!(
            pause_at < last_update_at,
            "capture must pause before the config change goes out: {ops:?}"
        );
        assert!(!h.manager.is_recording());

        // No frame may be forwarded until recording is explicitly restarted.
        h.manager.append_audio_frame(&[0i16; 160]).await.unwrap();
        let (sent, _) = h.connector.session(0);
        let appends = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ClientEvent::InputAudioBufferAppend { .. }))
            .count();
        assert_eq!(appends, 0);

        let last_update = sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|e| match e {
                ClientEvent::SessionUpdate { session } => Some(session.clone()),
                _ => None,
            })
            .unwrap();
        assert!(last_update.turn_detection.is_none());
    }

    #[tokio::test]
    async fn barge_in_reports_the_heard_offset() {
        let h = harness(quiet_options());
        h.manager.connect().await.unwrap();
        let (sent, server) = h.connector.session(0);

        server
            .send(inbound(ServerEvent::ConversationItemCreated {
                previous_item_id: None,
                item: assistant_item("a1", wire::ItemStatus::InProgress),
            }))
            .unwrap();
        server
            .send(inbound(ServerEvent::ResponseAudioDelta {
                item_id: "a1".to_string(),
                delta: encode_pcm16_base64(&vec![0i16; 4800]),
            }))
            .unwrap();
        wait_until(|| h.playback.appended_to("a1") == 4800).await;

        server
            .send(inbound(ServerEvent::SpeechStarted {
                audio_start_ms: Some(10),
                item_id: None,
            }))
            .unwrap();

        wait_until(|| {
            sent.lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, ClientEvent::ConversationItemTruncate { .. }))
        })
        .await;

        let events = sent.lock().unwrap().clone();
        assert!(events.iter().any(|e| matches!(e, ClientEvent::ResponseCancel)));
        let truncate = events
            .iter()
            .find_map(|e| match e {
                ClientEvent::ConversationItemTruncate { item_id, audio_end_ms, .. } => {
                    Some((item_id.clone(), *audio_end_ms))
                }
                _ => None,
            })
            .unwrap();
        // The fake plays half of what was appended: 2400 samples = 100 ms.
        assert_eq!(truncate, ("a1".to_string(), 100));

        wait_until(|| {
            h.manager
                .conversation_snapshot()
                .first()
                .is_some_and(|item| item.status == ItemStatus::Truncated)
        })
        .await;
    }

    #[tokio::test]
    async fn interrupting_idle_playback_reports_nothing() {
        let h = harness(quiet_options());
        h.manager.connect().await.unwrap();
        assert!(h.manager.interrupt_playback().await.is_none());

        let (sent, _) = h.connector.session(0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(
            !sent
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, ClientEvent::ResponseCancel))
        );
    }

    #[tokio::test]
    async fn tool_calls_round_trip_to_function_output() {
        let h = harness(quiet_options());
        h.manager
            .register_tool(
                echo_tool(),
                Arc::new(|args| Box::pin(async move { Ok(json!({ "ok": true, "args": args })) })),
            )
            .await;
        h.manager.connect().await.unwrap();
        let (sent, server) = h.connector.session(0);

        // The advertised tool surface includes the registration.
        wait_until(|| !sent.lock().unwrap().is_empty()).await;
        match &sent.lock().unwrap()[0] {
            ClientEvent::SessionUpdate { session } => {
                assert_eq!(session.tools.len(), 1);
                assert_eq!(session.tools[0].name, "remember");
            }
            other => panic!("expected session.update, got {other:?}"),
        }

        server
            .send(inbound(ServerEvent::ConversationItemCreated {
                previous_item_id: None,
                item: function_call_item("f1", "call_1", "remember"),
            }))
            .unwrap();
        // `name` is deliberately absent: it must resolve via the item.
        server
            .send(inbound(ServerEvent::FunctionCallArgumentsDone {
                call_id: "call_1".to_string(),
                name: None,
                arguments: r#"{"key":"x"}"#.to_string(),
                item_id: Some("f1".to_string()),
            }))
            .unwrap();

        let is_output = |e: &ClientEvent| {
            matches!(
                e,
                ClientEvent::ConversationItemCreate { item, .. }
                    if item.kind == Some(wire::ItemType::FunctionCallOutput)
            )
        };
        // Wait for the output item and the event that follows it.
        wait_until(|| {
            let events = sent.lock().unwrap();
            events
                .iter()
                .position(is_output)
                .is_some_and(|at| events.len() > at + 1)
        })
        .await;

        let events = sent.lock().unwrap().clone();
        let output_at = events.iter().position(is_output).unwrap();
        match &events[output_at] {
            ClientEvent::ConversationItemCreate { item, .. } => {
                assert_eq!(item.call_id.as_deref(), Some("call_1"));
                let output: serde_json::Value =
                    serde_json::from_str(item.output.as_deref().unwrap()).unwrap();
                assert_eq!(output["ok"], true);
                assert_eq!(output["args"]["key"], "x");
            }
            _ => unreachable!(),
        }
        // The output is followed by a response.create so the assistant can
        // react to the result.
        assert!(matches!(events[output_at + 1], ClientEvent::ResponseCreate));
    }

    #[tokio::test]
    async fn failing_tool_reports_a_structured_error() {
        let h = harness(quiet_options());
        h.manager
            .register_tool(
                echo_tool(),
                Arc::new(|_| {
                    Box::pin(async { Err(ToolError::Handler("weather provider offline".into())) })
                }),
            )
            .await;
        h.manager.connect().await.unwrap();
        let (sent, server) = h.connector.session(0);

        server
            .send(inbound(ServerEvent::FunctionCallArgumentsDone {
                call_id: "call_9".to_string(),
                name: Some("remember".to_string()),
                arguments: "{}".to_string(),
                item_id: None,
            }))
            .unwrap();

        wait_until(|| {
            sent.lock().unwrap().iter().any(|e| {
                matches!(
                    e,
                    ClientEvent::ConversationItemCreate { item, .. }
                        if item.output.as_deref().is_some_and(|o| o.contains("weather provider offline"))
                )
            })
        })
        .await;
        assert!(h.manager.is_connected(), "a failing tool must not drop the session");
    }

    #[tokio::test]
    async fn stale_tool_results_are_discarded_after_disconnect() {
        let h = harness(quiet_options());
        h.manager
            .register_tool(
                echo_tool(),
                Arc::new(|_| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!({ "ok": true }))
                    })
                }),
            )
            .await;
        h.manager.connect().await.unwrap();
        let (sent, server) = h.connector.session(0);

        server
            .send(inbound(ServerEvent::FunctionCallArgumentsDone {
                call_id: "call_1".to_string(),
                name: Some("remember".to_string()),
                arguments: "{}".to_string(),
                item_id: None,
            }))
            .unwrap();
        // Tear the session down while the handler is still running.
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.manager.disconnect().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outputs = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    ClientEvent::ConversationItemCreate { item, .. }
                        if item.kind == Some(wire::ItemType::FunctionCallOutput)
                )
            })
            .count();
        assert_eq!(outputs, 0, "stale tool result must be discarded");
    }

    #[tokio::test]
    async fn unknown_events_are_logged_and_not_fatal() {
        let h = harness(quiet_options());
        h.manager.connect().await.unwrap();
        let (_, server) = h.connector.session(0);

        server
            .send(Inbound {
                event: ServerEvent::Unknown {
                    event_type: "response.experimental_thing".to_string(),
                    payload: json!({ "type": "response.experimental_thing" }),
                },
                raw: json!({ "type": "response.experimental_thing" }),
            })
            .unwrap();
        server
            .send(inbound(ServerEvent::ConversationItemCreated {
                previous_item_id: None,
                item: user_text_item("u1", "still alive"),
            }))
            .unwrap();

        wait_until(|| !h.manager.conversation_snapshot().is_empty()).await;
        assert!(h.manager.is_connected());
        assert!(
            h.manager
                .event_log_snapshot()
                .iter()
                .any(|entry| entry.event_type == "response.experimental_thing")
        );
    }

    #[tokio::test]
    async fn push_to_talk_brackets_a_speech_segment() {
        let h = harness(quiet_options());
        h.manager.connect().await.unwrap();
        let (sent, _) = h.connector.session(0);

        h.manager.start_recording().await.unwrap();
        assert!(h.manager.is_recording());
        assert!(h.ops.lock().unwrap().contains(&"capture.begin".to_string()));

        h.manager.append_audio_frame(&[5i16; 160]).await.unwrap();
        wait_until(|| {
            sent.lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, ClientEvent::InputAudioBufferAppend { .. }))
        })
        .await;

        h.manager.stop_recording().await.unwrap();
        assert!(!h.manager.is_recording());
        wait_until(|| {
            let events = sent.lock().unwrap();
            events
                .iter()
                .any(|e| matches!(e, ClientEvent::InputAudioBufferCommit))
                && matches!(events.last(), Some(ClientEvent::ResponseCreate))
        })
        .await;
    }

    #[tokio::test]
    async fn start_recording_aborts_cleanly_when_reconnect_fails() {
        let h = harness(quiet_options());
        h.connector.fail_next.store(true, Ordering::SeqCst);

        let err = h.manager.start_recording().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(h.manager.connection_state(), ConnectionState::Uninitialized);
        assert!(!h.manager.is_recording());
        // No capture side effects before the connection was ensured.
        assert!(!h.ops.lock().unwrap().contains(&"capture.begin".to_string()));
    }

    #[tokio::test]
    async fn focus_regain_refreshes_a_connected_session() {
        let h = harness(quiet_options());

        // Not connected: nothing happens.
        h.manager.handle_focus_regained().await;
        assert_eq!(h.connector.session_count(), 0);

        h.manager.connect().await.unwrap();
        h.manager.handle_focus_regained().await;
        assert_eq!(h.connector.session_count(), 2);
        assert!(h.manager.is_connected());
    }

    #[tokio::test]
    async fn last_messages_follow_the_transcript() {
        let h = harness(quiet_options());
        h.manager.connect().await.unwrap();
        let (_, server) = h.connector.session(0);

        server
            .send(inbound(ServerEvent::ConversationItemCreated {
                previous_item_id: None,
                item: user_text_item("u1", "what's the weather"),
            }))
            .unwrap();
        server
            .send(inbound(ServerEvent::ConversationItemCreated {
                previous_item_id: None,
                item: assistant_item("a1", wire::ItemStatus::InProgress),
            }))
            .unwrap();
        server
            .send(inbound(ServerEvent::ResponseAudioTranscriptDelta {
                item_id: "a1".to_string(),
                delta: "Sunny and ".to_string(),
            }))
            .unwrap();
        server
            .send(inbound(ServerEvent::ResponseAudioTranscriptDelta {
                item_id: "a1".to_string(),
                delta: "22 degrees.".to_string(),
            }))
            .unwrap();

        wait_until(|| h.manager.last_assistant_message().is_some()).await;
        assert_eq!(
            h.manager.last_assistant_message().as_deref(),
            Some("Sunny and 22 degrees.")
        );
        assert_eq!(
            h.manager.last_user_message().as_deref(),
            Some("what's the weather")
        );
    }

    #[tokio::test]
    async fn repeated_event_types_collapse_in_the_log() {
        let h = harness(quiet_options());
        h.manager.connect().await.unwrap();
        let (_, server) = h.connector.session(0);

        for _ in 0..5 {
            server
                .send(inbound(ServerEvent::ResponseAudioDelta {
                    item_id: "missing".to_string(),
                    delta: encode_pcm16_base64(&[0]),
                }))
                .unwrap();
        }
        wait_until(|| {
            h.manager
                .event_log_snapshot()
                .iter()
                .any(|entry| entry.event_type == "response.audio.delta" && entry.count == 5)
        })
        .await;
    }
}
