//! Client connection management for the server
//!
//! Tracks who is connected, from where, and when they were last heard from.
//! Each client owns exactly one entity whose id equals the client id; the
//! entity itself lives in [`crate::game::GameState`].

use log::{info, warn};
use shared::Tick;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One connected client and what it has sent so far
#[derive(Debug)]
pub struct Session {
    /// Client id, also the id of the entity it controls
    pub id: u32,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    pub last_seen: Instant,
    pub inputs_received: u64,
    /// Highest input tick received, in any order
    pub newest_input_tick: Option<Tick>,
    pub overrides_acked: u32,
}

impl Session {
    fn open(id: u32, addr: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            addr,
            connected_at: now,
            last_seen: now,
            inputs_received: 0,
            newest_input_tick: None,
            overrides_acked: 0,
        }
    }

    pub fn is_idle_since(&self, cutoff: Instant) -> bool {
        self.last_seen < cutoff
    }
}

/// Session table keyed by client id, with a reverse index by address
///
/// Ids start at 1 and are never reused while the server runs. Sessions are
/// kept in id order so every broadcast walks clients the same way.
pub struct ClientManager {
    sessions: BTreeMap<u32, Session>,
    by_addr: HashMap<SocketAddr, u32>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            sessions: BTreeMap::new(),
            by_addr: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Opens a session for `addr`, or returns `None` when the server is full.
    pub fn open_session(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.sessions.len() >= self.max_clients {
            warn!("Rejecting {}: server full ({} clients)", addr, self.max_clients);
            return None;
        }

        let id = self.next_client_id;
        self.next_client_id += 1;
        self.sessions.insert(id, Session::open(id, addr, Instant::now()));
        self.by_addr.insert(addr, id);

        info!("Client {} connected from {}", id, addr);
        Some(id)
    }

    pub fn close_session(&mut self, id: u32) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.by_addr.remove(&session.addr);
        info!(
            "Client {} left after {:.1}s ({} inputs, newest tick {:?}, {} overrides acked)",
            id,
            session.connected_at.elapsed().as_secs_f32(),
            session.inputs_received,
            session.newest_input_tick,
            session.overrides_acked
        );
        Some(session)
    }

    pub fn id_for(&self, addr: SocketAddr) -> Option<u32> {
        self.by_addr.get(&addr).copied()
    }

    /// Marks the session at `addr` as alive and returns its id
    pub fn touch(&mut self, addr: SocketAddr) -> Option<u32> {
        let id = self.id_for(addr)?;
        let session = self.sessions.get_mut(&id)?;
        session.last_seen = Instant::now();
        Some(id)
    }

    pub fn record_input(&mut self, id: u32, tick: Tick) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.inputs_received += 1;
            session.newest_input_tick = Some(session.newest_input_tick.map_or(tick, |t| t.max(tick)));
        }
    }

    pub fn record_ack(&mut self, id: u32) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.overrides_acked += 1;
        }
    }

    /// Closes sessions not heard from within the timeout and returns their
    /// ids so their entities can be despawned.
    pub fn expire_idle(&mut self) -> Vec<u32> {
        let Some(cutoff) = Instant::now().checked_sub(self.timeout) else {
            return Vec::new();
        };
        let expired: Vec<u32> = self
            .sessions
            .values()
            .filter(|session| session.is_idle_since(cutoff))
            .map(|session| session.id)
            .collect();

        for id in &expired {
            warn!("Client {} timed out", id);
            self.close_session(*id);
        }
        expired
    }

    /// Every session's id and address, in id order
    pub fn addresses(&self) -> Vec<(u32, SocketAddr)> {
        self.sessions
            .values()
            .map(|session| (session.id, session.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
