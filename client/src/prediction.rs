//! Client-side prediction and server reconciliation for the controlled
//! entity.
//!
//! The predictor runs the shared simulator every local tick, keeping every
//! input it used and every state it produced in tick-indexed ring buffers.
//! When an authoritative state arrives it is compared with the prediction for
//! the same tick; on divergence the authoritative state is written into the
//! history and the buffered inputs are replayed up to the present.

use log::{debug, warn};
use shared::{
    GameplayState, InputSample, MovementSimulator, RingBuffer, StateOverride, StatePayload, Tick,
    Ticked, WorldQueries, BUFFER_SIZE,
};

/// An input together with the gameplay flags it was simulated under, so a
/// replay sees exactly what the first run saw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedInput {
    pub sample: InputSample,
    pub gameplay: GameplayState,
}

impl Ticked for RecordedInput {
    fn tick(&self) -> Tick {
        self.sample.tick
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorPhase {
    Predicting,
    /// An authoritative state is waiting for the next tick boundary.
    Reconciling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    NoNewState,
    /// Prediction matched within tolerance.
    Accepted { tick: Tick },
    /// Prediction diverged; history was rewritten from `tick`.
    Corrected { tick: Tick, replayed: u32, error: f32 },
    /// History could not be used; the timeline restarts after `tick`.
    HardResync { tick: Tick },
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PredictionStats {
    pub predictions: u64,
    pub accepted: u64,
    pub corrections: u64,
    pub replayed_ticks: u64,
    pub hard_resyncs: u64,
    pub overrides: u64,
    pub max_position_error: f32,
}

impl PredictionStats {
    /// Share of reconciled snapshots that needed a correction.
    pub fn correction_rate(&self) -> f32 {
        let reconciled = self.accepted + self.corrections + self.hard_resyncs;
        if reconciled == 0 {
            0.0
        } else {
            (self.corrections + self.hard_resyncs) as f32 / reconciled as f32
        }
    }
}

#[derive(Debug)]
pub struct ClientPredictor {
    simulator: MovementSimulator,
    inputs: RingBuffer<RecordedInput>,
    states: RingBuffer<StatePayload>,
    current: StatePayload,
    next_tick: Tick,
    /// Newest authoritative state not yet reconciled
    latest_server_state: Option<StatePayload>,
    last_accepted_tick: Option<Tick>,
    last_override_id: u32,
    gameplay: GameplayState,
    phase: PredictorPhase,
    stats: PredictionStats,
}

impl ClientPredictor {
    pub fn new(simulator: MovementSimulator, spawn: StatePayload) -> Self {
        Self::with_capacity(simulator, spawn, BUFFER_SIZE)
    }

    pub fn with_capacity(simulator: MovementSimulator, spawn: StatePayload, capacity: usize) -> Self {
        Self {
            simulator,
            inputs: RingBuffer::new(capacity),
            states: RingBuffer::new(capacity),
            current: StatePayload { tick: 0, ..spawn },
            next_tick: 0,
            latest_server_state: None,
            last_accepted_tick: None,
            last_override_id: 0,
            gameplay: GameplayState::default(),
            phase: PredictorPhase::Predicting,
            stats: PredictionStats::default(),
        }
    }

    /// The tick the next call to [`ClientPredictor::predict`] simulates.
    pub fn next_tick(&self) -> Tick {
        self.next_tick
    }

    /// The visible state of the entity.
    pub fn current(&self) -> &StatePayload {
        &self.current
    }

    pub fn state_at(&self, tick: Tick) -> Option<&StatePayload> {
        self.states.get(tick)
    }

    pub fn input_at(&self, tick: Tick) -> Option<&RecordedInput> {
        self.inputs.get(tick)
    }

    pub fn latest_server_state(&self) -> Option<&StatePayload> {
        self.latest_server_state.as_ref()
    }

    pub fn last_accepted_tick(&self) -> Option<Tick> {
        self.last_accepted_tick
    }

    pub fn phase(&self) -> PredictorPhase {
        self.phase
    }

    pub fn stats(&self) -> &PredictionStats {
        &self.stats
    }

    pub fn capacity(&self) -> usize {
        self.states.capacity()
    }

    pub fn simulator(&self) -> &MovementSimulator {
        &self.simulator
    }

    /// Gameplay flags applied to newly predicted ticks.
    pub fn gameplay(&self) -> &GameplayState {
        &self.gameplay
    }

    /// Runs one local tick. The sample is stamped with the predictor's next
    /// tick whatever tick it carried.
    pub fn predict<W: WorldQueries + ?Sized>(&mut self, sample: InputSample, world: &W) -> StatePayload {
        let sample = InputSample {
            tick: self.next_tick,
            ..sample
        };
        let recorded = RecordedInput {
            sample,
            gameplay: self.gameplay,
        };
        self.inputs.insert(recorded);

        let state = self.simulator.step(&self.current, &sample, &self.gameplay, world);
        self.states.insert(state);
        self.current = state;
        self.next_tick = self.next_tick.wrapping_add(1);
        self.stats.predictions += 1;
        state
    }

    /// Caches an authoritative state for the next tick boundary.
    ///
    /// Only a state newer than everything seen so far is kept; returns false
    /// when `state` was discarded as old or duplicate.
    pub fn on_server_state(&mut self, state: StatePayload, gameplay: GameplayState) -> bool {
        let newest = self
            .latest_server_state
            .map(|pending| pending.tick)
            .or(self.last_accepted_tick);
        if newest.is_some_and(|tick| state.tick <= tick) {
            return false;
        }

        self.latest_server_state = Some(state);
        self.gameplay = gameplay;
        self.phase = PredictorPhase::Reconciling;
        true
    }

    /// Checks the cached authoritative state against the prediction for its
    /// tick and corrects the history if they disagree.
    pub fn reconcile<W: WorldQueries + ?Sized>(&mut self, world: &W) -> ReconcileOutcome {
        let Some(server) = self.latest_server_state.take() else {
            return ReconcileOutcome::NoNewState;
        };
        self.phase = PredictorPhase::Predicting;
        self.last_accepted_tick = Some(server.tick);

        let predicted = self
            .states
            .get(server.tick)
            .copied()
            .filter(|_| self.within_window(server.tick));
        let Some(predicted) = predicted else {
            return self.hard_resync(server);
        };

        let error = predicted.position_error(&server);
        self.stats.max_position_error = self.stats.max_position_error.max(error);

        let config = self.simulator.config();
        if error <= config.position_epsilon
            && predicted.rotation_error(&server) <= config.rotation_epsilon_degrees
        {
            self.stats.accepted += 1;
            return ReconcileOutcome::Accepted { tick: server.tick };
        }

        self.states.insert(server);
        match self.replay_from(server, world) {
            Some(replayed) => {
                self.stats.corrections += 1;
                self.stats.replayed_ticks += replayed as u64;
                debug!(
                    "Corrected tick {}: error {:.3}, replayed {} ticks",
                    server.tick, error, replayed
                );
                ReconcileOutcome::Corrected {
                    tick: server.tick,
                    replayed,
                    error,
                }
            }
            None => self.hard_resync(server),
        }
    }

    /// Applies a forced correction immediately.
    ///
    /// Returns false for an override that is not newer than the last one
    /// applied. The caller acknowledges either way.
    pub fn apply_override<W: WorldQueries + ?Sized>(
        &mut self,
        correction: &StateOverride,
        world: &W,
    ) -> bool {
        if correction.id <= self.last_override_id {
            return false;
        }
        self.last_override_id = correction.id;
        self.stats.overrides += 1;

        let state = correction.to_state();

        // Anything at or before the override is superseded by it
        if self
            .latest_server_state
            .is_some_and(|pending| pending.tick <= correction.tick)
        {
            self.latest_server_state = None;
            self.phase = PredictorPhase::Predicting;
        }
        self.last_accepted_tick = Some(
            self.last_accepted_tick
                .map_or(correction.tick, |tick| tick.max(correction.tick)),
        );

        if !self.within_window(correction.tick) {
            self.hard_resync(state);
            return true;
        }

        self.states.insert(state);
        if self.replay_from(state, world).is_none() {
            self.hard_resync(state);
        }
        debug!(
            "Applied override {} at tick {}",
            correction.id, correction.tick
        );
        true
    }

    /// Whether `tick` has been predicted and is still inside the history.
    fn within_window(&self, tick: Tick) -> bool {
        tick < self.next_tick && (self.next_tick - tick) as usize <= self.states.capacity()
    }

    /// Re-simulates every tick after `from` up to the present with the
    /// buffered inputs. Returns the number of ticks replayed, or `None` if an
    /// input was missing.
    fn replay_from<W: WorldQueries + ?Sized>(&mut self, from: StatePayload, world: &W) -> Option<u32> {
        let mut prior = from;
        let mut replayed = 0;
        let mut tick = from.tick.wrapping_add(1);
        while tick < self.next_tick {
            let recorded = *self.inputs.get(tick)?;
            prior = self
                .simulator
                .step(&prior, &recorded.sample, &recorded.gameplay, world);
            self.states.insert(prior);
            replayed += 1;
            tick += 1;
        }
        self.current = prior;
        Some(replayed)
    }

    /// Snaps to `state` and restarts the local timeline right after it.
    fn hard_resync(&mut self, state: StatePayload) -> ReconcileOutcome {
        warn!(
            "Hard resync at tick {} (local tick {})",
            state.tick, self.next_tick
        );
        self.inputs.clear();
        self.states.clear();
        self.states.insert(state);
        self.current = state;
        self.next_tick = state.tick.wrapping_add(1);
        self.stats.hard_resyncs += 1;
        ReconcileOutcome::HardResync { tick: state.tick }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{CollisionWorld, MovementConfig, Quat, Vec2, Vec3};

    const DT: f32 = 1.0 / 60.0;

    fn predictor() -> ClientPredictor {
        let simulator = MovementSimulator::new(MovementConfig::default(), DT);
        ClientPredictor::new(simulator, StatePayload::spawn(0, Vec3::ZERO, Quat::IDENTITY))
    }

    fn forward() -> InputSample {
        InputSample::new(0, Vec2::new(1.0, 0.0), Quat::IDENTITY)
    }

    fn run(predictor: &mut ClientPredictor, ticks: u32, world: &CollisionWorld) {
        for _ in 0..ticks {
            predictor.predict(forward(), world);
        }
    }

    #[test]
    fn test_predict_advances_timeline() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();

        let state = predictor.predict(forward(), &world);
        assert_eq!(state.tick, 0);
        assert_eq!(predictor.next_tick(), 1);
        assert_approx_eq!(state.position.x, 6.0 * DT, 1e-6);
        assert_eq!(predictor.input_at(0).unwrap().sample.move_vector, Vec2::new(1.0, 0.0));
        assert_eq!(predictor.state_at(0), Some(&state));
    }

    #[test]
    fn test_predict_restamps_sample_tick() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        let sample = InputSample::new(500, Vec2::ZERO, Quat::IDENTITY);

        assert_eq!(predictor.predict(sample, &world).tick, 0);
    }

    #[test]
    fn test_matching_state_is_accepted() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 3, &world);

        let server = *predictor.state_at(1).unwrap();
        assert!(predictor.on_server_state(server, GameplayState::default()));
        assert_eq!(predictor.phase(), PredictorPhase::Reconciling);

        assert_eq!(
            predictor.reconcile(&world),
            ReconcileOutcome::Accepted { tick: 1 }
        );
        assert_eq!(predictor.phase(), PredictorPhase::Predicting);
        assert_eq!(predictor.stats().accepted, 1);
    }

    #[test]
    fn test_no_new_state() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        assert_eq!(predictor.reconcile(&world), ReconcileOutcome::NoNewState);
    }

    #[test]
    fn test_old_and_duplicate_states_are_ignored() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 5, &world);

        let newer = *predictor.state_at(3).unwrap();
        let older = *predictor.state_at(2).unwrap();
        assert!(predictor.on_server_state(newer, GameplayState::default()));
        assert!(!predictor.on_server_state(older, GameplayState::default()));
        assert_eq!(predictor.latest_server_state(), Some(&newer));

        predictor.reconcile(&world);
        assert!(!predictor.on_server_state(newer, GameplayState::default()));
        assert_eq!(predictor.reconcile(&world), ReconcileOutcome::NoNewState);
    }

    #[test]
    fn test_divergence_replays_to_present() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 11, &world);
        let before = *predictor.current();

        let mut server = *predictor.state_at(5).unwrap();
        server.position.z += 1.0;
        predictor.on_server_state(server, GameplayState::default());

        match predictor.reconcile(&world) {
            ReconcileOutcome::Corrected { tick, replayed, error } => {
                assert_eq!(tick, 5);
                assert_eq!(replayed, 5);
                assert_approx_eq!(error, 1.0, 1e-5);
            }
            other => panic!("Expected correction, got {:?}", other),
        }

        let after = predictor.current();
        assert_eq!(after.tick, 10);
        assert_approx_eq!(after.position.x, before.position.x, 1e-5);
        assert_approx_eq!(after.position.z, before.position.z + 1.0, 1e-5);
        assert_eq!(predictor.state_at(5), Some(&server));
        assert_eq!(predictor.next_tick(), 11);
    }

    #[test]
    fn test_rotation_divergence_is_corrected() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 4, &world);

        let mut server = *predictor.state_at(2).unwrap();
        server.rotation = Quat::from_yaw(0.5);
        predictor.on_server_state(server, GameplayState::default());

        assert!(matches!(
            predictor.reconcile(&world),
            ReconcileOutcome::Corrected { tick: 2, replayed: 1, .. }
        ));
    }

    #[test]
    fn test_state_ahead_of_timeline_resyncs() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 2, &world);

        let server = StatePayload::spawn(10, Vec3::new(3.0, 0.0, 0.0), Quat::IDENTITY);
        predictor.on_server_state(server, GameplayState::default());

        assert_eq!(
            predictor.reconcile(&world),
            ReconcileOutcome::HardResync { tick: 10 }
        );
        assert_eq!(predictor.next_tick(), 11);
        assert_eq!(predictor.current().position, server.position);
        assert!(predictor.input_at(1).is_none());
    }

    #[test]
    fn test_too_far_behind_resyncs() {
        let world = CollisionWorld::flat();
        let simulator = MovementSimulator::new(MovementConfig::default(), DT);
        let spawn = StatePayload::spawn(0, Vec3::ZERO, Quat::IDENTITY);
        let mut predictor = ClientPredictor::with_capacity(simulator, spawn, 16);
        run(&mut predictor, 40, &world);

        let server = StatePayload::spawn(3, Vec3::ZERO, Quat::IDENTITY);
        predictor.on_server_state(server, GameplayState::default());

        assert_eq!(
            predictor.reconcile(&world),
            ReconcileOutcome::HardResync { tick: 3 }
        );
        assert_eq!(predictor.next_tick(), 4);
        assert_eq!(predictor.stats().hard_resyncs, 1);
    }

    #[test]
    fn test_override_replays_inputs() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 10, &world);

        let correction = StateOverride {
            id: 1,
            tick: 4,
            position: Vec3::new(0.0, 0.0, 5.0),
            rotation: Quat::IDENTITY,
        };
        assert!(predictor.apply_override(&correction, &world));

        let current = predictor.current();
        assert_eq!(current.tick, 9);
        assert_approx_eq!(current.position.z, 5.0, 1e-5);
        assert_approx_eq!(current.position.x, 5.0 * 6.0 * DT, 1e-5);
        assert_eq!(predictor.last_accepted_tick(), Some(4));
    }

    #[test]
    fn test_override_is_idempotent() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 10, &world);

        let correction = StateOverride {
            id: 3,
            tick: 4,
            position: Vec3::new(0.0, 0.0, 5.0),
            rotation: Quat::IDENTITY,
        };
        assert!(predictor.apply_override(&correction, &world));
        let once = *predictor.current();

        assert!(!predictor.apply_override(&correction, &world));
        let older = StateOverride { id: 2, ..correction };
        assert!(!predictor.apply_override(&older, &world));

        assert_eq!(*predictor.current(), once);
        assert_eq!(predictor.stats().overrides, 1);
    }

    #[test]
    fn test_override_supersedes_pending_state() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 10, &world);

        let stale = *predictor.state_at(3).unwrap();
        predictor.on_server_state(stale, GameplayState::default());

        let correction = StateOverride {
            id: 1,
            tick: 5,
            position: Vec3::new(0.0, 0.0, 5.0),
            rotation: Quat::IDENTITY,
        };
        predictor.apply_override(&correction, &world);

        assert_eq!(predictor.reconcile(&world), ReconcileOutcome::NoNewState);
        assert!(!predictor.on_server_state(correction.to_state(), GameplayState::default()));
    }

    #[test]
    fn test_override_outside_window_resyncs() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 3, &world);

        let correction = StateOverride {
            id: 1,
            tick: 20,
            position: Vec3::new(1.0, 0.0, 1.0),
            rotation: Quat::IDENTITY,
        };
        assert!(predictor.apply_override(&correction, &world));
        assert_eq!(predictor.next_tick(), 21);
        assert_eq!(predictor.current().position, correction.position);
    }

    #[test]
    fn test_gameplay_flags_are_recorded_per_tick() {
        let world = CollisionWorld::flat();
        let mut predictor = predictor();
        run(&mut predictor, 2, &world);

        let rooted = GameplayState {
            rooted: true,
            ..Default::default()
        };
        let server = *predictor.state_at(1).unwrap();
        predictor.on_server_state(server, rooted);
        predictor.reconcile(&world);
        run(&mut predictor, 2, &world);

        assert!(!predictor.input_at(1).unwrap().gameplay.rooted);
        assert!(predictor.input_at(2).unwrap().gameplay.rooted);
        let moved = predictor.state_at(3).unwrap().position.x - predictor.state_at(2).unwrap().position.x;
        assert_eq!(moved, 0.0);
    }

    #[test]
    fn test_correction_rate() {
        let stats = PredictionStats {
            accepted: 3,
            corrections: 1,
            ..Default::default()
        };
        assert_approx_eq!(stats.correction_rate(), 0.25, 1e-6);
        assert_eq!(PredictionStats::default().correction_rate(), 0.0);
    }
}
