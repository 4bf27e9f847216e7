use crate::config::ClientConfig;
use crate::prediction::ClientPrediction;
use crate::sync::StateSynchronizer;
use crate::world::LocalState;
use log::{debug, error, info, warn};
use shared::codec::{recv_message, send_message};
use shared::protocol::sanitize_name;
use shared::{
    ChatMessage, HandshakeError, LobbyState, Message, MessageTag, NetError, PlayerId, PlayerView,
    RaceResults, PROTOCOL_VERSION,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Events held for the caller before the oldest undelivered ones are dropped
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// How long `disconnect` waits for a task before aborting it
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected { player_id: PlayerId },
    Chat(ChatMessage),
    LobbyState(LobbyState),
    Results(RaceResults),
    Disconnected { reason: String },
}

/// One connection to a race server
///
/// Created by [`NetworkClient::connect`], which returns only after the join
/// handshake succeeded. Two background tasks then run until
/// [`NetworkClient::disconnect`] or until the server goes away:
/// - the receive task feeds snapshots into the [`StateSynchronizer`]
/// - the send task transmits the latest [`LocalState`] at `send_rate`, plus
///   any chat or ready messages
pub struct NetworkClient {
    player_id: PlayerId,
    connected: Arc<AtomicBool>,
    synchronizer: Arc<Mutex<StateSynchronizer>>,
    prediction: Arc<Mutex<ClientPrediction>>,
    local_state: watch::Sender<LocalState>,
    outbound: mpsc::UnboundedSender<Message>,
    events: Option<mpsc::Receiver<ClientEvent>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NetworkClient {
    /// Connects, joins and starts the background tasks
    ///
    /// Any failure leaves nothing running; there is no retry.
    pub async fn connect(config: ClientConfig) -> Result<Self, NetError> {
        info!("Connecting to {}...", config.server);

        let stream = timeout(config.connect_timeout(), TcpStream::connect(&config.server))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle: {}", e);
        }

        let (mut reader, mut writer) = stream.into_split();

        let join = Message::Join {
            name: sanitize_name(&config.name),
            version: PROTOCOL_VERSION,
        };
        send_message(&mut writer, &join).await?;

        let player_id = timeout(config.handshake_timeout(), await_join_response(&mut reader))
            .await
            .map_err(|_| HandshakeError::Timeout)??;
        info!("Connected! Player ID: {}", player_id);

        let connected = Arc::new(AtomicBool::new(true));
        let synchronizer = Arc::new(Mutex::new(StateSynchronizer::new(config.interpolation_delay)));
        let prediction = Arc::new(Mutex::new(ClientPrediction::default()));
        let (local_state, local_state_rx) = watch::channel(LocalState::default());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let _ = events_tx.try_send(ClientEvent::Connected {
            player_id: player_id.clone(),
        });

        let receive_task = tokio::spawn(receive_loop(
            reader,
            ReceiveContext {
                player_id: player_id.clone(),
                connected: Arc::clone(&connected),
                synchronizer: Arc::clone(&synchronizer),
                prediction: Arc::clone(&prediction),
                events: events_tx,
            },
            shutdown_rx.clone(),
        ));

        let send_task = tokio::spawn(send_loop(
            writer,
            SendContext {
                player_id: player_id.clone(),
                connected: Arc::clone(&connected),
                prediction: Arc::clone(&prediction),
                local_state: local_state_rx,
                outbound: outbound_rx,
                config,
            },
            shutdown_rx,
        ));

        Ok(Self {
            player_id,
            connected,
            synchronizer,
            prediction,
            local_state,
            outbound,
            events: Some(events),
            shutdown,
            tasks: vec![receive_task, send_task],
        })
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Hands out the event stream; only the first call returns it
    ///
    /// The stream holds at most [`EVENT_QUEUE_CAPACITY`] events. While it is
    /// full, including when it was never taken, new events are dropped.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.events.take()
    }

    /// Publishes the controls and pose the send task transmits next
    pub fn set_local_state(&self, state: LocalState) {
        let _ = self.local_state.send(state);
    }

    /// Queues a chat line; text the server would drop is rejected here
    pub fn send_chat(&self, text: &str) -> Result<(), NetError> {
        let chat = ChatMessage {
            name: String::new(),
            text: text.to_string(),
            timestamp: shared::timestamp(),
        };
        chat.validate()?;
        self.queue(Message::Chat(chat))
    }

    pub fn set_ready(&self, ready: bool) -> Result<(), NetError> {
        self.queue(Message::Ready { ready })
    }

    fn queue(&self, message: Message) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(HandshakeError::Closed.into());
        }
        self.outbound
            .send(message)
            .map_err(|_| NetError::from(HandshakeError::Closed))
    }

    /// Interpolated poses of every other player at the current time
    pub async fn remote_players(&self) -> Vec<PlayerView> {
        self.synchronizer
            .lock()
            .await
            .remote_players(shared::timestamp(), &self.player_id)
    }

    pub fn synchronizer(&self) -> Arc<Mutex<StateSynchronizer>> {
        Arc::clone(&self.synchronizer)
    }

    pub fn prediction(&self) -> Arc<Mutex<ClientPrediction>> {
        Arc::clone(&self.prediction)
    }

    /// Stops both tasks, closes the connection and waits for the tasks
    ///
    /// A task that does not stop within a short grace period is aborted.
    /// Safe to call more than once.
    pub async fn disconnect(&mut self) {
        if self.tasks.is_empty() {
            return;
        }

        info!("Disconnecting from server");
        let _ = self.shutdown.send(true);
        self.connected.store(false, Ordering::SeqCst);

        for mut task in self.tasks.drain(..) {
            match timeout(DISCONNECT_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Client task failed: {}", e),
                Err(_) => {
                    warn!("Client task did not stop in time, aborting it");
                    task.abort();
                }
            }
        }
    }
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Waits for the single `JoinResponse` that completes the handshake
async fn await_join_response(reader: &mut OwnedReadHalf) -> Result<PlayerId, NetError> {
    match recv_message(reader).await? {
        Some(Message::JoinResponse { player_id }) => Ok(player_id),
        Some(other) => Err(HandshakeError::UnexpectedMessage {
            expected: MessageTag::JoinResponse,
            received: other.tag(),
        }
        .into()),
        None => Err(HandshakeError::Closed.into()),
    }
}

struct ReceiveContext {
    player_id: PlayerId,
    connected: Arc<AtomicBool>,
    synchronizer: Arc<Mutex<StateSynchronizer>>,
    prediction: Arc<Mutex<ClientPrediction>>,
    events: mpsc::Sender<ClientEvent>,
}

impl ReceiveContext {
    fn emit(&self, event: ClientEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            debug!("Event queue full, dropping {:?}", event);
        }
    }

    async fn handle_message(&self, message: Message) {
        match message {
            Message::StateSnapshot(snapshot) => {
                if let Some(local) = snapshot.player(&self.player_id) {
                    self.prediction.lock().await.reconcile(local.clone());
                }
                self.synchronizer.lock().await.add_snapshot(snapshot);
            }
            Message::Chat(chat) => {
                info!("[chat] {}: {}", chat.name, chat.text);
                self.emit(ClientEvent::Chat(chat));
            }
            Message::LobbyState(lobby) => {
                debug!(
                    "Lobby on {}: {} players, {} ready",
                    lobby.track,
                    lobby.players.len(),
                    lobby.ready_count
                );
                self.emit(ClientEvent::LobbyState(lobby));
            }
            Message::Results(results) => {
                self.emit(ClientEvent::Results(results));
            }
            Message::JoinResponse { player_id } => {
                warn!("Ignoring extra join response for {}", player_id);
            }
            other @ (Message::Join { .. } | Message::Input(_) | Message::Ready { .. }) => {
                debug!("Ignoring client-bound {}", other.tag());
            }
        }
    }
}

async fn receive_loop(mut reader: OwnedReadHalf, context: ReceiveContext, mut shutdown: watch::Receiver<bool>) {
    let reason = loop {
        tokio::select! {
            received = recv_message(&mut reader) => match received {
                Ok(Some(message)) => context.handle_message(message).await,
                Ok(None) => break "server closed the connection".to_string(),
                Err(e) if !e.is_fatal() => {
                    warn!("Dropped malformed message from server: {}", e);
                }
                Err(e) => break e.to_string(),
            },

            _ = shutdown.changed() => break "disconnected by client".to_string(),
        }
    };

    context.connected.store(false, Ordering::SeqCst);
    warn!("Disconnected: {}", reason);
    context.emit(ClientEvent::Disconnected { reason });
}

struct SendContext {
    player_id: PlayerId,
    connected: Arc<AtomicBool>,
    prediction: Arc<Mutex<ClientPrediction>>,
    local_state: watch::Receiver<LocalState>,
    outbound: mpsc::UnboundedReceiver<Message>,
    config: ClientConfig,
}

async fn send_loop(mut writer: OwnedWriteHalf, mut context: SendContext, mut shutdown: watch::Receiver<bool>) {
    let send_interval = context.config.send_interval();
    let dt = send_interval.as_secs_f32();
    let mut ticker = interval(send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let message = tokio::select! {
            _ = ticker.tick() => {
                if !context.connected.load(Ordering::SeqCst) {
                    break;
                }
                let input = context
                    .local_state
                    .borrow()
                    .to_input(&context.player_id, shared::timestamp());
                context.prediction.lock().await.predict(input.clone(), dt);
                Message::Input(input)
            }

            queued = context.outbound.recv() => match queued {
                Some(message) => message,
                None => break,
            },

            _ = shutdown.changed() => break,
        };

        // A peer that stopped reading can block the write; shutdown still wins
        let sent = tokio::select! {
            sent = send_message(&mut writer, &message) => sent,
            _ = shutdown.changed() => break,
        };

        match sent {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => {
                warn!("Failed to send {}: {}", message.tag(), e);
            }
            Err(e) => {
                error!("Connection lost while sending {}: {}", message.tag(), e);
                context.connected.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Error closing connection: {}", e);
    }
}
