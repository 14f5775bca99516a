use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::domain::phase::PhasePlayer;
use crate::state::events::SessionId;
use crate::state::lobby::LobbyToken;

/// Per-player scalar recorded by one phase (None when the phase keeps none
/// or the player never submitted)
pub type PhaseMetrics = BTreeMap<SessionId, Option<f64>>;

/// One row of the end-of-game summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStats {
    pub nickname: String,
    pub phases: Vec<Option<f64>>,
}

/// Metrics of every completed phase, in phase order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameMetrics {
    pub phases: Vec<PhaseMetrics>,
}

impl GameMetrics {
    pub fn push(&mut self, metrics: PhaseMetrics) {
        self.phases.push(metrics);
    }

    /// Per-player rows keyed by nickname. Players missing from a phase get a
    /// null entry so every row has one value per completed phase.
    pub fn summary(&self, roster: &[PhasePlayer]) -> BTreeMap<String, PlayerStats> {
        roster
            .iter()
            .map(|player| {
                let phases = self
                    .phases
                    .iter()
                    .map(|phase| phase.get(&player.session).copied().flatten())
                    .collect();
                (
                    player.nickname.clone(),
                    PlayerStats {
                        nickname: player.nickname.clone(),
                        phases,
                    },
                )
            })
            .collect()
    }
}

/// Receives the summary of every finished game
pub trait StatsSink: Send + Sync {
    fn record(&self, lobby: &LobbyToken, summary: &BTreeMap<String, PlayerStats>);
}

/// Writes summaries to the log
#[derive(Debug, Default)]
pub struct LogStatsSink;

impl StatsSink for LogStatsSink {
    fn record(&self, lobby: &LobbyToken, summary: &BTreeMap<String, PlayerStats>) {
        for (nickname, stats) in summary {
            log::info!("Game stats [{}] {}: {:?}", lobby, nickname, stats.phases);
        }
    }
}

/// Keeps summaries in memory, mostly for tests
#[derive(Debug, Default)]
pub struct MemoryStatsSink {
    records: Mutex<Vec<(LobbyToken, BTreeMap<String, PlayerStats>)>>,
}

impl MemoryStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(LobbyToken, BTreeMap<String, PlayerStats>)> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StatsSink for MemoryStatsSink {
    fn record(&self, lobby: &LobbyToken, summary: &BTreeMap<String, PlayerStats>) {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push((lobby.clone(), summary.clone()));
    }
}
