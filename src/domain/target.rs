use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use serde_json::json;

use crate::domain::phase::{Difficulty, Phase, PhaseInput, PhasePlayer, PhaseState};
use crate::domain::stats::PhaseMetrics;
use crate::error::GameError;
use crate::imaging::{transfer, ImageAssetSource};
use crate::state::events::{Envelope, Outbound, SessionId};
use crate::utils::config::Config;

const PHASE_NUMBER: usize = 2;

/// Generation parameters for the target field
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSettings {
    pub count: usize,
    pub separation: f64,
    pub plane: f64,
    pub max_attempts: u32,
    pub start_delay_secs: i64,
    pub start_jitter_secs: i64,
    pub window_min_secs: i64,
    pub window_max_secs: i64,
}

impl From<&Config> for TargetSettings {
    fn from(config: &Config) -> Self {
        Self {
            count: config.target_count,
            separation: config.target_separation,
            plane: config.target_plane,
            max_attempts: config.target_max_attempts,
            start_delay_secs: config.target_start_delay_secs,
            start_jitter_secs: config.target_start_jitter_secs,
            window_min_secs: config.target_window_min_secs,
            window_max_secs: config.target_window_max_secs,
        }
    }
}

/// A clickable target. Times are unix milliseconds; the window is sent to
/// clients but not enforced server side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub start_time: i64,
    pub end_time: i64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Draw `count` points on the plane until a whole batch keeps every pair
/// further apart than `separation`. Gives up after `max_attempts` batches.
pub fn place_targets<R: Rng>(
    settings: &TargetSettings,
    now_ms: i64,
    rng: &mut R,
) -> Result<Vec<Target>, GameError> {
    for _ in 0..settings.max_attempts {
        let points: Vec<(f64, f64)> = (0..settings.count)
            .map(|_| {
                (
                    round2(rng.gen::<f64>() * settings.plane),
                    round2(rng.gen::<f64>() * settings.plane),
                )
            })
            .collect();

        let spaced = points.iter().enumerate().all(|(i, a)| {
            points[i + 1..]
                .iter()
                .all(|b| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt() > settings.separation)
        });
        if !spaced {
            continue;
        }

        let targets = points
            .into_iter()
            .enumerate()
            .map(|(id, (x, y))| {
                let delay = settings.start_delay_secs
                    + rng.gen_range(0..=settings.start_jitter_secs.max(0));
                let window_max = settings.window_max_secs.max(settings.window_min_secs);
                let window = rng.gen_range(settings.window_min_secs..=window_max);
                let start_time = now_ms + delay * 1000;
                Target {
                    id: id as u32,
                    x,
                    y,
                    start_time,
                    end_time: start_time + window * 1000,
                }
            })
            .collect();
        return Ok(targets);
    }

    Err(GameError::TargetPlacement {
        attempts: settings.max_attempts,
    })
}

/// Shared target field. Any player may clear any target; the phase ends
/// when none are left.
pub struct TargetPhase {
    players: Vec<PhasePlayer>,
    settings: TargetSettings,
    targets: BTreeMap<u32, Target>,
    state: PhaseState,
    assets: Arc<dyn ImageAssetSource>,
    background: PathBuf,
}

impl TargetPhase {
    pub fn new(
        players: Vec<PhasePlayer>,
        settings: TargetSettings,
        assets: Arc<dyn ImageAssetSource>,
        background: impl Into<PathBuf>,
    ) -> Self {
        Self {
            players,
            settings,
            targets: BTreeMap::new(),
            state: PhaseState::Pending,
            assets,
            background: background.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.targets.len()
    }

    pub fn target_ids(&self) -> Vec<u32> {
        self.targets.keys().copied().collect()
    }

    fn recipients(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.players.iter().map(|p| p.session)
    }
}

impl Phase for TargetPhase {
    fn number(&self) -> usize {
        PHASE_NUMBER
    }

    fn state(&self) -> PhaseState {
        self.state
    }

    fn start(&mut self, difficulty: Difficulty) -> Result<Vec<Outbound>, GameError> {
        log::debug!("Target phase starting, difficulty {:?}", difficulty);

        let background = self.assets.load_background_image(&self.background)?;
        let image = transfer::encode_png_base64(&background)?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let targets = place_targets(&self.settings, now_ms, &mut rand::thread_rng())?;

        let envelope = Envelope::new(
            "phase_start",
            json!({ "phase": PHASE_NUMBER, "image": image, "locations": targets }),
        );

        self.targets = targets.into_iter().map(|t| (t.id, t)).collect();
        self.state = if self.targets.is_empty() {
            PhaseState::Finished
        } else {
            PhaseState::Running
        };
        Ok(vec![Outbound::to_many(self.recipients(), envelope)])
    }

    fn receive(&mut self, player: SessionId, input: PhaseInput) -> Vec<Outbound> {
        let PhaseInput::Target { id } = input else {
            return Vec::new();
        };
        if self.state != PhaseState::Running {
            return Vec::new();
        }

        if self.targets.remove(&id).is_none() {
            return vec![Outbound::to_one(
                player,
                Envelope::error("phase_update", "id", "target not found"),
            )];
        }
        if self.targets.is_empty() {
            self.state = PhaseState::Finished;
        }

        vec![Outbound::to_many(
            self.recipients(),
            Envelope::new(
                "phase_update",
                json!({ "phase": PHASE_NUMBER, "status": "remove", "target": id }),
            ),
        )]
    }

    /// This phase is not scored
    fn next_difficulty(&self) -> Difficulty {
        None
    }

    fn remove_player(&mut self, player: SessionId) {
        self.players.retain(|p| p.session != player);
    }

    fn metrics(&self) -> PhaseMetrics {
        self.players.iter().map(|p| (p.session, None)).collect()
    }
}
