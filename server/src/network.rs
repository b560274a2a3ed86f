//! Server network layer handling UDP communications and game loop coordination

use crate::authority::DEFAULT_MAX_INPUT_STARVATION;
use crate::client_manager::ClientManager;
use crate::game::GameState;
use log::{debug, error, info, warn};
use shared::{
    decode, encode, MovementConfig, Packet, StatePayload, TickConfig, MAX_PACKET_SIZE,
    PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { packet: Packet },
}

/// Everything the server needs to know before binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick: TickConfig,
    pub movement: MovementConfig,
    pub max_clients: usize,
    pub client_timeout: Duration,
    pub max_input_starvation: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick: TickConfig::default(),
            movement: MovementConfig::default(),
            max_clients: 16,
            client_timeout: Duration::from_secs(5),
            max_input_starvation: DEFAULT_MAX_INPUT_STARVATION,
        }
    }
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    tick: TickConfig,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(addr: &str, config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.movement.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!(
            "Server listening on {} at {}Hz",
            socket.local_addr()?,
            config.tick.tick_rate
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let mut game_state = GameState::new(config.movement, config.tick.dt());
        game_state.set_max_input_starvation(config.max_input_starvation);

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            game_state,
            tick: config.tick,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.addresses()
                        };

                        for (client_id, addr) in client_addrs {
                            if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.expire_idle()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet) {
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { packet })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Processes an incoming packet. Inputs are only queued here; they are
    /// simulated at the next tick.
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let client_id = {
            let mut clients = self.clients.write().await;
            clients.touch(addr)
        };

        match packet {
            Packet::Connect { client_version } => {
                info!("Client connecting from {} (version: {})", addr, client_version);

                if client_version != PROTOCOL_VERSION {
                    warn!(
                        "Rejecting {}: protocol version {} (expected {})",
                        addr, client_version, PROTOCOL_VERSION
                    );
                    let reason = format!("Unsupported protocol version {}", client_version);
                    self.send_packet(Packet::Disconnected { reason }, addr);
                    return;
                }

                // A repeated connect from a known address gets the same reply
                if let Some(existing_id) = client_id {
                    match self.game_state.entity(existing_id).map(|entity| *entity.current()) {
                        Some(state) => {
                            debug!("Client {} connected again, resending reply", existing_id);
                            self.send_packet(self.connected_reply(existing_id, state), addr);
                            return;
                        }
                        None => {
                            self.clients.write().await.close_session(existing_id);
                        }
                    }
                }

                let new_id = self.clients.write().await.open_session(addr);
                match new_id {
                    Some(new_id) => {
                        let spawn = self.game_state.spawn(new_id);
                        self.send_packet(self.connected_reply(new_id, spawn), addr);
                    }
                    None => {
                        let reason = "Server full".to_string();
                        self.send_packet(Packet::Disconnected { reason }, addr);
                    }
                }
            }

            Packet::Input { sample } => {
                if let Some(client_id) = client_id {
                    self.game_state.queue_input(client_id, sample);
                    self.clients.write().await.record_input(client_id, sample.tick);
                }
            }

            Packet::OverrideAck { override_id } => {
                if let Some(client_id) = client_id {
                    if self.game_state.acknowledge_override(client_id, override_id) {
                        self.clients.write().await.record_ack(client_id);
                        debug!("Client {} acknowledged override {}", client_id, override_id);
                    }
                }
            }

            Packet::Disconnect => {
                if let Some(client_id) = client_id {
                    self.clients.write().await.close_session(client_id);
                    self.game_state.despawn(client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    fn connected_reply(&self, client_id: u32, spawn: StatePayload) -> Packet {
        Packet::Connected {
            client_id,
            tick_rate: self.tick.tick_rate,
            movement: *self.game_state.movement(),
            spawn,
        }
    }

    /// Sends every client its own snapshot and any unacknowledged override,
    /// then broadcasts where everyone is.
    async fn send_tick_updates(&self) {
        let addrs: HashMap<u32, SocketAddr> = {
            let clients = self.clients.read().await;
            clients.addresses().into_iter().collect()
        };
        if addrs.is_empty() {
            return;
        }

        for (client_id, state, gameplay) in self.game_state.snapshots() {
            if let Some(addr) = addrs.get(&client_id) {
                self.send_packet(Packet::Snapshot { state, gameplay }, *addr);
            }
        }

        for (client_id, correction) in self.game_state.pending_overrides() {
            if let Some(addr) = addrs.get(&client_id) {
                self.send_packet(Packet::Override { correction }, *addr);
            }
        }

        let packet = Packet::WorldState {
            server_tick: self.game_state.tick,
            entities: self.game_state.remote_entities(),
        };
        self.broadcast_packet(packet);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick.duration());
        // Every tick runs, late ones back to back
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            self.game_state.despawn(client_id);
                        },
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let advanced = self.game_state.step();
                    self.send_tick_updates().await;

                    if self.game_state.tick % self.tick.tick_rate == 0 && !self.game_state.is_empty() {
                        debug!(
                            "Tick {}: {} entities, {} advanced, {} overrides pending",
                            self.game_state.tick,
                            self.game_state.len(),
                            advanced.len(),
                            self.game_state.pending_overrides().len()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

async fn send_packet_impl(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = encode(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{InputSample, Quat, Vec2};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_test::assert_ok;

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080)
    }

    async fn test_server() -> Server {
        assert_ok!(Server::new("127.0.0.1:0", ServerConfig::default()).await)
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.tick.tick_rate, 60);
        assert_eq!(config.max_clients, 16);
        assert_eq!(config.max_input_starvation, DEFAULT_MAX_INPUT_STARVATION);
    }

    #[tokio::test]
    async fn test_invalid_movement_config_is_rejected() {
        let config = ServerConfig {
            movement: MovementConfig {
                run_speed: -1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(Server::new("127.0.0.1:0", config).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_spawns_entity_and_replies() {
        let mut server = test_server().await;
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };

        server.handle_packet(packet, test_addr()).await;

        assert_eq!(server.clients.read().await.len(), 1);
        assert!(server.game_state.entity(1).is_some());
        match server.game_rx.try_recv().unwrap() {
            GameMessage::SendPacket {
                packet: Packet::Connected { client_id, tick_rate, .. },
                addr,
            } => {
                assert_eq!(client_id, 1);
                assert_eq!(tick_rate, 60);
                assert_eq!(addr, test_addr());
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_protocol_version_is_rejected() {
        let mut server = test_server().await;
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION + 1,
        };

        server.handle_packet(packet, test_addr()).await;

        assert!(server.clients.read().await.is_empty());
        assert!(matches!(
            server.game_rx.try_recv().unwrap(),
            GameMessage::SendPacket {
                packet: Packet::Disconnected { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_input_is_queued_not_simulated() {
        let mut server = test_server().await;
        server
            .handle_packet(Packet::Connect { client_version: PROTOCOL_VERSION }, test_addr())
            .await;

        let sample = InputSample::new(0, Vec2::new(0.0, 1.0), Quat::IDENTITY);
        server.handle_packet(Packet::Input { sample }, test_addr()).await;

        let entity = server.game_state.entity(1).unwrap();
        assert_eq!(entity.queued_inputs(), 1);
        assert_eq!(entity.next_tick(), 0);
    }

    #[tokio::test]
    async fn test_input_from_unknown_address_is_ignored() {
        let mut server = test_server().await;
        let sample = InputSample::new(0, Vec2::new(0.0, 1.0), Quat::IDENTITY);

        server.handle_packet(Packet::Input { sample }, test_addr()).await;
        assert!(server.game_state.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_despawns_entity() {
        let mut server = test_server().await;
        server
            .handle_packet(Packet::Connect { client_version: PROTOCOL_VERSION }, test_addr())
            .await;
        server.handle_packet(Packet::Disconnect, test_addr()).await;

        assert!(server.clients.read().await.is_empty());
        assert!(server.game_state.is_empty());
    }

    #[tokio::test]
    async fn test_tick_updates_resend_pending_override() {
        let mut server = test_server().await;
        server
            .handle_packet(Packet::Connect { client_version: PROTOCOL_VERSION }, test_addr())
            .await;
        let _connected = server.game_rx.try_recv().unwrap();

        let correction = server
            .game_state
            .force(1, shared::Vec3::new(2.0, 0.0, 2.0), Quat::IDENTITY)
            .unwrap();

        for _ in 0..2 {
            server.send_tick_updates().await;
            let mut overrides = 0;
            while let Ok(message) = server.game_rx.try_recv() {
                if let GameMessage::SendPacket {
                    packet: Packet::Override { correction: sent },
                    ..
                } = message
                {
                    assert_eq!(sent, correction);
                    overrides += 1;
                }
            }
            assert_eq!(overrides, 1);
        }

        server
            .handle_packet(Packet::OverrideAck { override_id: correction.id }, test_addr())
            .await;
        assert!(server.game_state.pending_overrides().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_connect_keeps_session() {
        let mut server = test_server().await;
        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        server.handle_packet(connect.clone(), test_addr()).await;
        let sample = InputSample::new(0, Vec2::new(0.0, 1.0), Quat::IDENTITY);
        server.handle_packet(Packet::Input { sample }, test_addr()).await;
        server.handle_packet(connect, test_addr()).await;

        assert_eq!(server.clients.read().await.len(), 1);
        assert_eq!(server.game_state.len(), 1);
        assert_eq!(server.game_state.entity(1).unwrap().queued_inputs(), 1);

        let mut replies = Vec::new();
        while let Ok(GameMessage::SendPacket {
            packet: Packet::Connected { client_id, .. },
            ..
        }) = server.game_rx.try_recv()
        {
            replies.push(client_id);
        }
        assert_eq!(replies, vec![1, 1]);
    }
}
