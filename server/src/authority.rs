//! Authoritative simulation of a single client-controlled entity.
//!
//! Inputs are queued in arrival order as datagrams come in and consumed only
//! at the next server tick, where they are replayed in tick order. The state
//! produced for the highest tick processed becomes the published
//! authoritative snapshot.
//!
//! Ticks the authority runs on its own while starved stay provisional: if
//! input for one of them shows up later, the entity rewinds to the state
//! before the first of them and resimulates with the real input.

use log::{debug, warn};
use shared::{
    GameplayState, InputSample, MovementSimulator, Quat, RingBuffer, StateOverride, StatePayload,
    Tick, Vec3, WorldQueries, BUFFER_SIZE,
};
use std::collections::VecDeque;

/// Server ticks without any input before the entity advances on its own.
pub const DEFAULT_MAX_INPUT_STARVATION: u32 = 30;

/// Authority over one entity's timeline.
#[derive(Debug)]
pub struct EntityAuthority {
    id: u32,
    /// Received samples in arrival order
    pending: VecDeque<InputSample>,
    states: RingBuffer<StatePayload>,
    current: StatePayload,
    next_tick: Tick,
    last_orientation: Quat,
    published: Option<StatePayload>,
    gameplay: GameplayState,
    starved_ticks: u32,
    max_input_starvation: u32,
    /// First tick simulated without input during starvation, with the state
    /// before it. Cleared once real input is simulated.
    provisional: Option<(Tick, StatePayload)>,
    pending_override: Option<StateOverride>,
    next_override_id: u32,
}

impl EntityAuthority {
    /// Allocates the entity's buffers. Its timeline starts at tick zero, with
    /// `spawn` as the state before the first tick.
    pub fn spawn(id: u32, spawn: StatePayload, max_input_starvation: u32) -> Self {
        Self {
            id,
            pending: VecDeque::new(),
            states: RingBuffer::new(BUFFER_SIZE),
            current: StatePayload { tick: 0, ..spawn },
            next_tick: 0,
            last_orientation: spawn.rotation,
            published: None,
            gameplay: GameplayState::default(),
            starved_ticks: 0,
            max_input_starvation,
            provisional: None,
            pending_override: None,
            next_override_id: 1,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Most recent simulated (or forced) state.
    pub fn current(&self) -> &StatePayload {
        &self.current
    }

    /// The authoritative snapshot for the highest tick processed so far.
    pub fn published(&self) -> Option<&StatePayload> {
        self.published.as_ref()
    }

    /// Simulated state for `tick`, if it is still in the history.
    pub fn state_at(&self, tick: Tick) -> Option<&StatePayload> {
        self.states.get(tick)
    }

    /// The tick the next simulation step will produce.
    pub fn next_tick(&self) -> Tick {
        self.next_tick
    }

    pub fn gameplay(&self) -> &GameplayState {
        &self.gameplay
    }

    pub fn set_gameplay(&mut self, gameplay: GameplayState) {
        self.gameplay = gameplay;
    }

    pub fn pending_override(&self) -> Option<&StateOverride> {
        self.pending_override.as_ref()
    }

    pub fn queued_inputs(&self) -> usize {
        self.pending.len()
    }

    /// Queues a received sample. Never simulates.
    pub fn enqueue(&mut self, sample: InputSample) {
        self.pending.push_back(sample);
    }

    /// Drains the queue and simulates everything it holds in tick order.
    ///
    /// Returns the newly published snapshot, or `None` if the entity did not
    /// advance this tick.
    pub fn tick<W: WorldQueries + ?Sized>(
        &mut self,
        simulator: &MovementSimulator,
        world: &W,
    ) -> Option<StatePayload> {
        let batch = self.drain_in_tick_order();
        self.reclaim_starved_ticks(&batch);
        let mut advanced = false;

        for sample in batch {
            if sample.tick < self.next_tick {
                debug!(
                    "Entity {}: dropping late input for tick {} (at {})",
                    self.id, sample.tick, self.next_tick
                );
                continue;
            }

            let gap = sample.tick - self.next_tick;
            if gap as usize >= BUFFER_SIZE {
                warn!(
                    "Entity {}: input jumped {} ticks ahead, skipping to tick {}",
                    self.id, gap, sample.tick
                );
                self.next_tick = sample.tick;
            }

            // Lost inputs become idle ticks
            while self.next_tick < sample.tick {
                let filler = InputSample::idle(self.next_tick, self.last_orientation);
                self.advance(simulator, &filler, world);
            }

            if sample.orientation.try_normalize().is_some() {
                self.last_orientation = sample.orientation;
            }
            self.advance(simulator, &sample, world);
            self.provisional = None;
            advanced = true;
        }

        if advanced {
            self.starved_ticks = 0;
        } else {
            self.starved_ticks += 1;
            if self.starved_ticks > self.max_input_starvation {
                if self.provisional.is_none() {
                    self.provisional = Some((self.next_tick, self.current));
                }
                let filler = InputSample::idle(self.next_tick, self.last_orientation);
                self.advance(simulator, &filler, world);
                advanced = true;
            }
        }

        if advanced {
            self.published = Some(self.current);
            self.published
        } else {
            None
        }
    }

    /// Rewinds ticks simulated during starvation when the batch carries real
    /// input for one of them, so the client's inputs are not dropped as late.
    fn reclaim_starved_ticks(&mut self, batch: &[InputSample]) {
        let Some((first, before)) = self.provisional else {
            return;
        };
        let reclaims = batch
            .iter()
            .any(|sample| sample.tick >= first && sample.tick < self.next_tick);
        if !reclaims {
            return;
        }

        debug!(
            "Entity {}: input arrived for starved ticks {}..{}, rewinding",
            self.id, first, self.next_tick
        );
        let oldest_kept = self.next_tick.saturating_sub(BUFFER_SIZE as Tick);
        for tick in first.max(oldest_kept)..self.next_tick {
            self.states.remove(tick);
        }
        self.current = before;
        self.next_tick = first;
        self.provisional = None;
    }

    /// Sorts the queue by tick, keeping the latest arrival when a tick was
    /// received more than once.
    fn drain_in_tick_order(&mut self) -> Vec<InputSample> {
        let mut batch: Vec<InputSample> = self.pending.drain(..).collect();
        // Stable, so duplicates stay in arrival order
        batch.sort_by_key(|sample| sample.tick);

        let mut ordered: Vec<InputSample> = Vec::with_capacity(batch.len());
        for sample in batch {
            match ordered.last_mut() {
                Some(last) if last.tick == sample.tick => *last = sample,
                _ => ordered.push(sample),
            }
        }
        ordered
    }

    fn advance<W: WorldQueries + ?Sized>(
        &mut self,
        simulator: &MovementSimulator,
        sample: &InputSample,
        world: &W,
    ) {
        let state = simulator.step(&self.current, sample, &self.gameplay, world);
        self.states.insert(state);
        self.current = state;
        self.next_tick = sample.tick.wrapping_add(1);
    }

    /// Forces the entity to a position and rotation at its latest tick.
    ///
    /// The correction stays pending, and is resent to the client, until
    /// [`EntityAuthority::acknowledge`] is called with its id. A newer force
    /// replaces an unacknowledged one.
    pub fn force(&mut self, position: Vec3, rotation: Quat) -> StateOverride {
        let correction = StateOverride {
            id: self.next_override_id,
            tick: self.next_tick.saturating_sub(1),
            position,
            rotation,
        };
        self.next_override_id += 1;

        let state = correction.to_state();
        self.states.insert(state);
        self.current = state;
        self.last_orientation = rotation;
        // A forced state is final; starved ticks before it are never rewound
        self.provisional = None;
        if self.published.is_some() {
            self.published = Some(state);
        }
        self.pending_override = Some(correction);

        debug!(
            "Entity {}: override {} at tick {} to ({:.2}, {:.2}, {:.2})",
            self.id, correction.id, correction.tick, position.x, position.y, position.z
        );
        correction
    }

    /// Clears the pending override if `override_id` matches it. Stale or
    /// repeated acknowledgements change nothing.
    pub fn acknowledge(&mut self, override_id: u32) -> bool {
        match self.pending_override {
            Some(pending) if pending.id == override_id => {
                self.pending_override = None;
                true
            }
            _ => false,
        }
    }
}
