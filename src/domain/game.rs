use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::domain::drawing::DrawingPhase;
use crate::domain::phase::{Phase, PhaseInput, PhasePlayer, Prepared};
use crate::domain::stats::{GameMetrics, PlayerStats};
use crate::domain::target::{TargetPhase, TargetSettings};
use crate::error::GameError;
use crate::imaging::ImageAssetSource;
use crate::state::events::{Envelope, Outbound, SessionId};
use crate::utils::config::Config;

/// Drives one game through its ordered phases.
///
/// The active index only moves forward, one step per `advance`. Once it
/// passes the last phase the game is terminal and every further call is
/// rejected with `GameError::Terminal`.
pub struct GameOrchestrator {
    phases: Vec<Box<dyn Phase>>,
    active: usize,
    roster: Vec<PhasePlayer>,
    metrics: GameMetrics,
    completed: bool,
}

impl GameOrchestrator {
    pub fn new(roster: Vec<PhasePlayer>, phases: Vec<Box<dyn Phase>>) -> Self {
        Self {
            phases,
            active: 0,
            roster,
            metrics: GameMetrics::default(),
            completed: false,
        }
    }

    /// Drawing phase followed by the target phase
    pub fn standard(
        roster: Vec<PhasePlayer>,
        config: &Config,
        assets: Arc<dyn ImageAssetSource>,
    ) -> Self {
        let phases: Vec<Box<dyn Phase>> = vec![
            Box::new(DrawingPhase::new(
                roster.clone(),
                assets.clone(),
                config.drawing_assets_dir.clone(),
            )),
            Box::new(TargetPhase::new(
                roster.clone(),
                TargetSettings::from(config),
                assets,
                config.background_image.clone(),
            )),
        ];
        Self::new(roster, phases)
    }

    pub fn start(&mut self) -> Result<Vec<Outbound>, GameError> {
        if self.completed {
            return Err(GameError::Terminal);
        }
        if self.phases.is_empty() {
            self.completed = true;
            return Ok(vec![self.completion_event()]);
        }
        log::info!("Game starting with {} players", self.roster.len());
        self.phases[0].start(None)
    }

    /// Let the active phase split off work that can run outside the lobby
    /// lock. Needs only shared access.
    pub fn prepare(&self, player: SessionId, input: PhaseInput) -> Result<Prepared, GameError> {
        if self.completed {
            return Err(GameError::Terminal);
        }
        let phase = self.phases.get(self.active).ok_or(GameError::Terminal)?;
        if phase.is_finished() {
            return Ok(Prepared::Ready(input));
        }
        Ok(phase.prepare(player, input))
    }

    /// Forward one input to the active phase. A finished phase takes no more
    /// input; the sender is told it ended and the caller has to `advance`.
    pub fn receive(
        &mut self,
        player: SessionId,
        input: PhaseInput,
    ) -> Result<Vec<Outbound>, GameError> {
        if self.completed {
            return Err(GameError::Terminal);
        }
        let phase = self
            .phases
            .get_mut(self.active)
            .ok_or(GameError::Terminal)?;
        if phase.is_finished() {
            return Ok(vec![Outbound::to_one(
                player,
                Envelope::new(
                    "phase_end",
                    json!({ "phase": phase.number(), "difficulty": phase.next_difficulty() }),
                ),
            )]);
        }
        Ok(phase.receive(player, input))
    }

    /// Close the finished active phase and start the next one, or end the
    /// game after the last. An unfinished phase is left untouched.
    pub fn advance(&mut self) -> Result<Vec<Outbound>, GameError> {
        if self.completed {
            return Err(GameError::Terminal);
        }
        let current = self.phases.get(self.active).ok_or(GameError::Terminal)?;
        if !current.is_finished() {
            return Err(GameError::NotFinished {
                phase: current.number(),
            });
        }

        let finished = current.number();
        let difficulty = current.next_difficulty();
        let ended = Outbound::to_many(
            self.sessions(),
            Envelope::new(
                "phase_end",
                json!({ "phase": finished, "difficulty": difficulty }),
            ),
        );
        let metrics = current.metrics();

        let mut events = vec![ended];
        match self.phases.get_mut(self.active + 1) {
            Some(next) => {
                // the index only moves once the next phase is running
                let started = next.start(difficulty)?;
                log::info!(
                    "Phase {} finished (difficulty {:?}), phase {} started",
                    finished,
                    difficulty,
                    next.number()
                );
                self.metrics.push(metrics);
                self.active += 1;
                events.extend(started);
            }
            None => {
                self.metrics.push(metrics);
                self.completed = true;
                log::info!("Game complete after {} phases", self.phases.len());
                events.push(self.completion_event());
            }
        }
        Ok(events)
    }

    pub fn remove_player(&mut self, player: SessionId) {
        self.roster.retain(|p| p.session != player);
        if !self.completed {
            for phase in self.phases.iter_mut().skip(self.active) {
                phase.remove_player(player);
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// True when the active phase is done and waiting for `advance`
    pub fn active_finished(&self) -> bool {
        !self.completed
            && self
                .phases
                .get(self.active)
                .map(|p| p.is_finished())
                .unwrap_or(false)
    }

    pub fn summary(&self) -> BTreeMap<String, PlayerStats> {
        self.metrics.summary(&self.roster)
    }

    fn sessions(&self) -> Vec<SessionId> {
        self.roster.iter().map(|p| p.session).collect()
    }

    fn completion_event(&self) -> Outbound {
        Outbound::to_many(
            self.sessions(),
            Envelope::new("game_complete", json!({ "metrics": self.summary() })),
        )
    }
}
