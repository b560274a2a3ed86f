use crate::game::ClientGameState;
use crate::input::{InputPattern, InputSampler};
use crate::latency::DelayQueue;
use crate::prediction::ReconcileOutcome;
use log::{debug, error, info, warn};
use shared::{
    decode, encode, MovementSimulator, Packet, TickConfig, MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, interval_at, Interval, MissedTickBehavior};

/// Headless client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    /// Simulated round trip in milliseconds, split evenly between directions
    pub fake_ping_ms: u64,
    /// Tick rate used until the server announces its own
    pub tick: TickConfig,
    pub pattern: InputPattern,
    pub seed: u64,
    /// Stop after this long; run until disconnected when unset
    pub run_for: Option<Duration>,
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    client_id: Option<u32>,
    connected: bool,
    shutdown: bool,

    game_state: ClientGameState,
    sampler: InputSampler,
    tick: TickConfig,
    pattern: InputPattern,
    seed: u64,
    run_for: Option<Duration>,

    fake_ping_ms: u64,
    inbound: DelayQueue<Packet>,
    outbound: DelayQueue<Packet>,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = config.server.parse()?;
        let one_way = Duration::from_millis(config.fake_ping_ms / 2);

        Ok(Client {
            socket,
            server_addr,
            client_id: None,
            connected: false,
            shutdown: false,
            game_state: ClientGameState::new(),
            sampler: InputSampler::scripted(config.pattern, config.tick.tick_rate, config.seed),
            tick: config.tick,
            pattern: config.pattern,
            seed: config.seed,
            run_for: config.run_for,
            fake_ping_ms: config.fake_ping_ms,
            inbound: DelayQueue::new(one_way),
            outbound: DelayQueue::new(one_way),
        })
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server at {}...", self.server_addr);
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet_now(&packet).await
    }

    async fn send_packet_now(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = encode(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Queues a packet behind the simulated uplink delay.
    fn queue_packet(&mut self, packet: Packet) {
        self.outbound.push(packet, Instant::now());
    }

    async fn flush_outbound(&mut self) {
        for packet in self.outbound.drain_ready(Instant::now()) {
            if let Err(e) = self.send_packet_now(&packet).await {
                error!("Error sending packet: {}", e);
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            Packet::Connected {
                client_id,
                tick_rate,
                movement,
                spawn,
            } => {
                if self.client_id == Some(client_id) {
                    return Ok(());
                }
                movement.validate()?;
                self.tick = TickConfig::new(tick_rate)?;

                info!("Connected! Client ID: {} ({}Hz)", client_id, tick_rate);
                self.client_id = Some(client_id);
                self.connected = true;
                self.sampler = InputSampler::scripted(self.pattern, tick_rate, self.seed);
                self.game_state
                    .spawn(client_id, MovementSimulator::new(movement, self.tick.dt()), spawn);
            }

            Packet::Snapshot { state, gameplay } => {
                self.game_state.on_snapshot(state, gameplay);
            }

            Packet::WorldState {
                server_tick,
                entities,
            } => {
                self.game_state.apply_world_state(server_tick, entities);
            }

            Packet::Override { correction } => {
                if let Some(override_id) = self.game_state.on_override(&correction) {
                    self.queue_packet(Packet::OverrideAck { override_id });
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.client_id = None;
                self.game_state.despawn();
                self.shutdown = true;
            }

            _ => {
                warn!("Unexpected packet type from server");
            }
        }
        Ok(())
    }

    /// One client tick: apply everything received since the last one, then
    /// reconcile, predict and send this tick's input.
    async fn on_tick(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        for packet in self.inbound.drain_ready(Instant::now()) {
            self.handle_packet(packet)?;
        }

        let sampler = &mut self.sampler;
        if let Some((outcome, sample, state)) = self.game_state.tick(|tick| sampler.sample(tick)) {
            if let ReconcileOutcome::HardResync { tick } = outcome {
                debug!("Timeline restarted after tick {}", tick);
            }
            self.queue_packet(Packet::Input { sample });

            if state.tick % (self.tick.tick_rate * 5) == 0 {
                self.log_stats();
            }
        }

        self.flush_outbound().await;
        Ok(())
    }

    fn log_stats(&self) {
        if let Some(predictor) = self.game_state.predictor() {
            let stats = predictor.stats();
            let position = predictor.current().position;
            debug!(
                "Tick {}: pos ({:.2}, {:.2}, {:.2}), {} predicted, {} accepted, {} corrected ({} replayed), {} resyncs, {} overrides, max error {:.3}",
                predictor.current().tick,
                position.x,
                position.y,
                position.z,
                stats.predictions,
                stats.accepted,
                stats.corrections,
                stats.replayed_ticks,
                stats.hard_resyncs,
                stats.overrides,
                stats.max_position_error
            );
        }
    }

    fn tick_interval(&self) -> Interval {
        let mut tick_interval = interval(self.tick.duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        tick_interval
    }

    /// Connect resends while unanswered. The first one fires a full period
    /// after the initial connect.
    fn connect_retry_interval() -> Interval {
        let period = Duration::from_secs(1);
        interval_at(tokio::time::Instant::now() + period, period)
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            info!("Simulating {}ms round trip", self.fake_ping_ms);
        }
        self.connect().await?;

        let mut tick_interval = self.tick_interval();
        let mut connect_retry = Self::connect_retry_interval();
        let started = Instant::now();
        let mut buffer = [0u8; MAX_PACKET_SIZE];

        while !self.shutdown {
            if self.run_for.is_some_and(|limit| started.elapsed() >= limit) {
                info!("Run time elapsed, stopping");
                break;
            }

            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) if addr == self.server_addr => match decode(&buffer[..len]) {
                            Ok(packet) => self.inbound.push(packet, Instant::now()),
                            Err(e) => warn!("Dropping packet from server: {}", e),
                        },
                        Ok((_, addr)) => warn!("Ignoring packet from unknown sender {}", addr),
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = connect_retry.tick(), if !self.connected => {
                    self.connect().await?;
                },

                _ = tick_interval.tick() => {
                    let tick_rate = self.tick.tick_rate;
                    self.on_tick().await?;
                    if self.tick.tick_rate != tick_rate {
                        tick_interval = self.tick_interval();
                    }
                },
            }
        }

        if self.connected {
            self.send_packet_now(&Packet::Disconnect).await?;
        }
        if let Some(predictor) = self.game_state.predictor() {
            let stats = predictor.stats();
            info!(
                "Finished: {} ticks predicted, {:.1}% corrected, {} hard resyncs",
                stats.predictions,
                stats.correction_rate() * 100.0,
                stats.hard_resyncs
            );
        }

        Ok(())
    }
}
