//! Server network layer: accepting connections and running their sessions

use crate::config::{ConfigError, ServerConfig};
use crate::game::{run_game_loop, ServerState};
use crate::player_table::{Frame, Outbound};
use log::{debug, error, info, warn};
use shared::codec::{recv_message, write_frame};
use shared::{HandshakeError, Message, MessageTag, NetError, PlayerId, PROTOCOL_VERSION};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Frames a session may have queued before it counts as failing
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Race server accepting TCP connections and driving the game loop
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Validates the configuration and binds the listening socket
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            state: Arc::new(ServerState::new(config)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Runs until the process is stopped
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop and the game loop until `shutdown` resolves
    ///
    /// On shutdown the game loop and every session task are cancelled and
    /// all players are dropped, which closes their connections.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let game = tokio::spawn(run_game_loop(Arc::clone(&self.state)));
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&self.state);
                        sessions.spawn(handle_connection(stream, addr, state));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },

                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!("Session task failed: {}", e);
                    }
                },

                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        game.abort();
        sessions.shutdown().await;
        self.state.disconnect_all().await;
    }
}

/// Runs one connection from handshake to cleanup
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<ServerState>) {
    info!("Client connected from {}", addr);
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", addr, e);
    }

    let (mut reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let (outbound, mut evicted) = Outbound::new(outbound_tx);
    let mut writer_task = tokio::spawn(write_loop(writer, outbound_rx));

    let player_id = match handshake(&mut reader, addr, &state, outbound).await {
        Ok(player_id) => player_id,
        Err(e) => {
            warn!("Closing connection from {}: {}", addr, e);
            let _ = writer_task.await;
            return;
        }
    };

    let mut writer_done = false;
    loop {
        tokio::select! {
            received = recv_message(&mut reader) => match received {
                Ok(Some(message)) => {
                    if let Err(e) = state.handle_message(&player_id, message).await {
                        warn!("Dropped message from {}: {}", player_id, e);
                    }
                }
                Ok(None) => {
                    info!("Player {} closed the connection", player_id);
                    break;
                }
                Err(e) if !e.is_fatal() => {
                    warn!("Dropped malformed message from {}: {}", player_id, e);
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", player_id, e);
                    break;
                }
            },

            finished = &mut writer_task => {
                writer_done = true;
                match finished {
                    Ok(Ok(())) => debug!("Outbound queue for {} closed", player_id),
                    Ok(Err(e)) => warn!("Failed to write to {}: {}", player_id, e),
                    Err(e) => error!("Writer task for {} failed: {}", player_id, e),
                }
                break;
            }

            _ = &mut evicted => {
                info!("Closing connection to removed player {}", player_id);
                break;
            }
        }
    }

    state.leave(&player_id).await;
    if !writer_done {
        writer_task.abort();
    }
    info!("Player {} disconnected", player_id);
}

/// Waits for the first message, which must be a `Join`
async fn handshake(
    reader: &mut OwnedReadHalf,
    addr: SocketAddr,
    state: &ServerState,
    outbound: Outbound,
) -> Result<PlayerId, NetError> {
    let first = timeout(state.config().handshake_timeout(), recv_message(reader))
        .await
        .map_err(|_| HandshakeError::Timeout)??;

    match first {
        Some(Message::Join { name, version }) => {
            if version != PROTOCOL_VERSION {
                return Err(HandshakeError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    remote: version,
                }
                .into());
            }
            Ok(state.join(&name, addr, outbound).await?)
        }
        Some(other) => Err(HandshakeError::UnexpectedMessage {
            expected: MessageTag::Join,
            received: other.tag(),
        }
        .into()),
        None => Err(HandshakeError::Closed.into()),
    }
}

/// Drains a session's outbound queue onto the socket
///
/// Ends when every sender is gone, which happens once the player's row is
/// removed from the table. A write blocked on a peer that stopped reading
/// never gets there; the session aborts this task when it is evicted.
async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::Receiver<Frame>) -> Result<(), NetError> {
    while let Some(frame) = outbound.recv().await {
        write_frame(&mut writer, &frame).await?;
    }
    writer.shutdown().await?;
    Ok(())
}
