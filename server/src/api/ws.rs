//! WebSocket connection handlers.
//!
//! Every connection splits its socket: inbound frames are handled on the
//! connection task, outbound frames go through a bounded mpsc queue
//! drained by a writer task with a send timeout, so one stuck client can
//! never block a room.
//!
//! Channel contract per socket: binary frames carry the packet stream
//! (clients send without a player-index prefix; frames relayed to the
//! opponent carry the sender's index), text frames carry JSON commands
//! and server bookkeeping.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State as AxumState};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use tetrion_engine::{persist_solo_game, MultiplayerRoom, PuzzleRoom, RoomId, SoloRoom};
use tetrion_types::{Packet, PacketAssembler, PacketDisassembler, PlayerRole, ProtocolError};

use crate::{
    process_room_events, remove_room_if_abandoned, MatchRoomHandle, MatchSlot, Server,
    ServerMessage, WS_OUTBOUND_CAPACITY,
};

const WS_SEND_TIMEOUT: Duration = Duration::from_millis(2_000);

#[derive(Deserialize)]
pub(super) struct SoloParams {
    user: String,
}

#[derive(Deserialize)]
pub(super) struct MatchParams {
    user: String,
    #[serde(default)]
    ranked: bool,
    /// Room to re-attach to after a dropped connection.
    room: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct PuzzleParams {
    user: String,
    puzzle: String,
}

/// Commands arriving on the text side of the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum ClientCommand {
    SelectLevel { level: u8 },
    SubmitPuzzle { solved: bool },
}

fn spawn_writer(
    mut sender: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            match timeout(WS_SEND_TIMEOUT, sender.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    debug!("send failed, client disconnected");
                    break;
                }
                Err(_) => {
                    warn!("send timed out, closing connection");
                    break;
                }
            }
        }
        let _ = sender.close().await;
    })
}

pub(super) async fn solo_ws(
    AxumState(server): AxumState<Arc<Server>>,
    Query(params): Query<SoloParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_solo(socket, server, params.user))
}

async fn handle_solo(socket: WebSocket, server: Arc<Server>, user: String) {
    info!(%user, "solo connection opened");
    let (sender, mut receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(WS_OUTBOUND_CAPACITY);
    let _writer = spawn_writer(sender, out_rx);

    let mut room = SoloRoom::new(&user);
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Binary(bytes)) => {
                if let Err(error) = handle_solo_frame(&server, &mut room, &bytes) {
                    warn!(%user, %error, "desynchronized solo stream, dropping connection");
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = out_tx.try_send(Message::Pong(data));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    if let Some(game) = room.on_disconnect() {
        persist_solo_game(server.store(), &user, &game);
    }
    info!(%user, "solo connection closed");
}

fn handle_solo_frame(
    server: &Arc<Server>,
    room: &mut SoloRoom,
    bytes: &[u8],
) -> Result<(), ProtocolError> {
    let mut disassembler = PacketDisassembler::new(bytes, false)?;
    while disassembler.has_more_packets() {
        let received = disassembler.next_packet()?;
        if let Some(game) = room.on_packet(&received.packet) {
            persist_solo_game(server.store(), room.user_id(), &game);
        }
    }
    Ok(())
}

pub(super) async fn match_ws(
    AxumState(server): AxumState<Arc<Server>>,
    Query(params): Query<MatchParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_match(socket, server, params))
}

async fn handle_match(socket: WebSocket, server: Arc<Server>, params: MatchParams) {
    let (sender, mut receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(WS_OUTBOUND_CAPACITY);
    let _writer = spawn_writer(sender, out_rx);

    let rejoining = params.room.is_some();
    let Some((handle, role)) =
        resolve_room(&server, &params, &mut receiver, &out_tx).await
    else {
        return;
    };
    info!(room = %handle.id, user = %params.user, ?role, rejoining, "match connection attached");

    handle.attach(role, out_tx.clone());
    let _ = out_tx.try_send(
        ServerMessage::Assigned {
            room_id: handle.id.to_string(),
            player_index: role.index(),
        }
        .to_message(),
    );
    {
        let mut room = handle.room.lock().await;
        if rejoining {
            match room.handle_reconnect(role) {
                Ok(events) => process_room_events(&server, &handle, &room, &events),
                Err(error) => debug!(room = %handle.id, %error, "rejected reconnect"),
            }
        } else {
            let snapshot = room.snapshot();
            handle.send_to(role, ServerMessage::Snapshot { snapshot: &snapshot }.to_message());
        }
    }

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Binary(bytes)) => {
                if let Err(error) = handle_match_frame(&server, &handle, role, &bytes).await {
                    warn!(room = %handle.id, ?role, %error, "desynchronized match stream, dropping connection");
                    break;
                }
            }
            Ok(Message::Text(text)) => handle_match_command(&server, &handle, role, &text).await,
            Ok(Message::Ping(data)) => {
                let _ = out_tx.try_send(Message::Pong(data));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    handle.detach(role);
    let mut room = handle.room.lock().await;
    let now_ms = server.now_ms();
    match room.handle_disconnect(role, now_ms) {
        Ok(events) => process_room_events(&server, &handle, &room, &events),
        Err(error) => debug!(room = %handle.id, %error, "disconnect bookkeeping rejected"),
    }
    remove_room_if_abandoned(&server, &handle, &room);
    info!(room = %handle.id, user = %params.user, "match connection closed");
}

/// Find the room and player slot for this connection: either a rejoin of
/// an existing room or a trip through the matchmaking queue.
async fn resolve_room(
    server: &Arc<Server>,
    params: &MatchParams,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    out_tx: &mpsc::Sender<Message>,
) -> Option<(Arc<MatchRoomHandle>, PlayerRole)> {
    if let Some(room_param) = &params.room {
        let handle = room_param
            .parse::<RoomId>()
            .ok()
            .and_then(|id| server.room(id));
        let Some(handle) = handle else {
            warn!(user = %params.user, room = %room_param, "rejoin of unknown room");
            return None;
        };
        let role = {
            let room = handle.room.lock().await;
            seat_of(&room, &params.user)
        };
        let Some(role) = role else {
            warn!(room = %handle.id, user = %params.user, "rejoin by a stranger to the room");
            return None;
        };
        return Some((handle, role));
    }

    match server.join_match_queue(&params.user, params.ranked).await {
        MatchSlot::Paired(handle) => Some((handle, PlayerRole::Player2)),
        MatchSlot::Waiting(mut slot) => loop {
            // Parked until an opponent shows up; keep answering pings and
            // notice the client giving up.
            tokio::select! {
                paired = &mut slot => {
                    break paired.ok().map(|handle| (handle, PlayerRole::Player1));
                }
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = out_tx.try_send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        debug!(user = %params.user, "left the queue before pairing");
                        server.leave_match_queue(&params.user).await;
                        break None;
                    }
                    Some(Ok(_)) => {}
                },
            }
        },
    }
}

fn seat_of(room: &MultiplayerRoom, user: &str) -> Option<PlayerRole> {
    [PlayerRole::Player1, PlayerRole::Player2]
        .into_iter()
        .find(|role| room.seat(*role).user_id == user)
}

/// One binary frame from a match player: decode, feed the state machine,
/// then relay the stream to the opponent with the sender's index prefix.
async fn handle_match_frame(
    server: &Arc<Server>,
    handle: &Arc<MatchRoomHandle>,
    role: PlayerRole,
    bytes: &[u8],
) -> Result<(), ProtocolError> {
    // Decode fully before taking the room lock.
    let mut disassembler = PacketDisassembler::new(bytes, false)?;
    let mut packets = Vec::new();
    while disassembler.has_more_packets() {
        packets.push(disassembler.next_packet()?.packet);
    }

    let now_ms = server.now_ms();
    {
        let mut room = handle.room.lock().await;
        let mut events = Vec::new();
        for packet in &packets {
            let result = match packet {
                Packet::Ready(ready) if ready.ready => room.handle_ready(role, now_ms),
                Packet::Ready(_) => room.handle_unready(role),
                Packet::Topout(topout) => room.handle_topout(role, topout.score, topout.forfeit),
                Packet::GameRecovery(recovery) => room.update_score(role, recovery.score),
                _ => Ok(Vec::new()),
            };
            match result {
                Ok(batch) => events.extend(batch),
                // A lone misbehaving (or merely late) packet is dropped;
                // the stream stays up.
                Err(error) => {
                    debug!(room = %handle.id, ?role, %error, "rejected room transition");
                }
            }
        }
        process_room_events(server, handle, &room, &events);
    }

    let mut assembler = PacketAssembler::new();
    for packet in &packets {
        assembler.add_packet(packet)?;
    }
    if assembler.has_packets() {
        let relay = assembler.encode(Some(role.index()))?;
        handle.send_to(role.other(), Message::Binary(relay));
    }
    Ok(())
}

async fn handle_match_command(
    server: &Arc<Server>,
    handle: &Arc<MatchRoomHandle>,
    role: PlayerRole,
    text: &str,
) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(error) => {
            debug!(room = %handle.id, %error, "unparseable command");
            return;
        }
    };
    match command {
        ClientCommand::SelectLevel { level } => {
            let mut room = handle.room.lock().await;
            match room.select_level(role, level) {
                Ok(events) => process_room_events(server, handle, &room, &events),
                Err(error) => debug!(room = %handle.id, ?role, %error, "rejected level pick"),
            }
        }
        ClientCommand::SubmitPuzzle { .. } => {
            debug!(room = %handle.id, "puzzle command on a match socket");
        }
    }
}

pub(super) async fn puzzle_ws(
    AxumState(server): AxumState<Arc<Server>>,
    Query(params): Query<PuzzleParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_puzzle(socket, server, params))
}

async fn handle_puzzle(socket: WebSocket, server: Arc<Server>, params: PuzzleParams) {
    info!(user = %params.user, puzzle = %params.puzzle, "puzzle connection opened");
    let (sender, mut receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(WS_OUTBOUND_CAPACITY);
    let _writer = spawn_writer(sender, out_rx);

    let mut room = PuzzleRoom::new(
        &params.user,
        &params.puzzle,
        server.rating_of(&params.user),
        server.puzzle_rating_of(&params.puzzle),
    );

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let solved = match serde_json::from_str(&text) {
                    Ok(ClientCommand::SubmitPuzzle { solved }) => solved,
                    Ok(_) => {
                        debug!(room = %room.id(), "non-puzzle command on a puzzle socket");
                        continue;
                    }
                    Err(error) => {
                        debug!(room = %room.id(), %error, "unparseable command");
                        continue;
                    }
                };
                match room.submit(solved) {
                    Ok(attempt) => {
                        server.set_rating(&params.user, attempt.player.applied(attempt.delta_player));
                        server.set_puzzle_rating(
                            &params.puzzle,
                            attempt.puzzle.applied(attempt.delta_puzzle),
                        );
                        if let Err(error) =
                            server.store().apply_rating_delta(&params.user, attempt.delta_player)
                        {
                            warn!(%error, "failed to persist puzzle rating delta");
                        }
                        let _ = out_tx.try_send(
                            ServerMessage::PuzzleResult {
                                solved: attempt.solved,
                                delta_player: attempt.delta_player,
                                delta_puzzle: attempt.delta_puzzle,
                            }
                            .to_message(),
                        );
                    }
                    Err(error) => debug!(room = %room.id(), %error, "rejected puzzle submission"),
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = out_tx.try_send(Message::Pong(data));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    info!(user = %params.user, "puzzle connection closed");
}
