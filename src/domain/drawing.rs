use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use rand::seq::SliceRandom;
use serde_json::json;

use crate::domain::phase::{Difficulty, Phase, PhaseInput, PhasePlayer, PhaseState, Prepared};
use crate::domain::stats::PhaseMetrics;
use crate::error::{GameError, ImageError};
use crate::imaging::{codec, transfer, ImageAssetSource};
use crate::state::events::{Envelope, Outbound, SessionId};

const PHASE_NUMBER: usize = 1;

/// Per-player bookkeeping. `metric` is written once, after `submitted`.
#[derive(Debug, Clone)]
pub struct Submission {
    pub reference: DynamicImage,
    pub submitted: Option<DynamicImage>,
    pub metric: Option<f64>,
}

/// Every player gets one patch of a shared source drawing and has to
/// reproduce it. Score is the shape distance to the patch.
pub struct DrawingPhase {
    players: Vec<PhasePlayer>,
    records: BTreeMap<SessionId, Submission>,
    state: PhaseState,
    assets: Arc<dyn ImageAssetSource>,
    assets_dir: PathBuf,
}

impl DrawingPhase {
    pub fn new(
        players: Vec<PhasePlayer>,
        assets: Arc<dyn ImageAssetSource>,
        assets_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            players,
            records: BTreeMap::new(),
            state: PhaseState::Pending,
            assets,
            assets_dir: assets_dir.into(),
        }
    }

    pub fn submission(&self, player: SessionId) -> Option<&Submission> {
        self.records.get(&player)
    }

    fn pick_source(&self) -> Result<DynamicImage, ImageError> {
        let candidates = self.assets.list_candidate_images(&self.assets_dir)?;
        let path = candidates.choose(&mut rand::thread_rng()).ok_or_else(|| {
            ImageError::Asset(format!("no drawings in {}", self.assets_dir.display()))
        })?;
        log::debug!("Drawing phase source {}", path.display());
        self.assets.load_image(path)
    }

    fn score(reference: &DynamicImage, drawing: &DynamicImage) -> Result<f64, ImageError> {
        let (reference, drawing) = codec::resize_to_match(reference, drawing);
        codec::similarity(&reference, &drawing)
    }

    fn refresh_state(&mut self) {
        if self.state == PhaseState::Running && self.records.values().all(|r| r.metric.is_some()) {
            self.state = PhaseState::Finished;
        }
    }
}

impl Phase for DrawingPhase {
    fn number(&self) -> usize {
        PHASE_NUMBER
    }

    fn state(&self) -> PhaseState {
        self.state
    }

    fn start(&mut self, _difficulty: Difficulty) -> Result<Vec<Outbound>, GameError> {
        let source = codec::to_single_channel(&self.pick_source()?);
        let patches = codec::split(&source, self.players.len())?;

        let mut events = Vec::with_capacity(self.players.len());
        let mut records = BTreeMap::new();
        for (player, patch) in self.players.iter().zip(patches) {
            let encoded = transfer::encode_png_base64(&patch)?;
            events.push(Outbound::to_one(
                player.session,
                Envelope::new(
                    "phase_start",
                    json!({ "phase": PHASE_NUMBER, "image": encoded }),
                ),
            ));
            records.insert(
                player.session,
                Submission {
                    reference: patch,
                    submitted: None,
                    metric: None,
                },
            );
        }

        self.records = records;
        self.state = PhaseState::Running;
        Ok(events)
    }

    fn prepare(&self, player: SessionId, input: PhaseInput) -> Prepared {
        let PhaseInput::Drawing(drawing) = input else {
            return Prepared::Ready(input);
        };
        let reference = match self.records.get(&player) {
            Some(record) if self.state == PhaseState::Running && record.metric.is_none() => {
                record.reference.clone()
            }
            _ => return Prepared::Ready(PhaseInput::Drawing(drawing)),
        };
        Prepared::Deferred(Box::new(move || {
            let metric = Self::score(&reference, &drawing);
            PhaseInput::ScoredDrawing { drawing, metric }
        }))
    }

    fn receive(&mut self, player: SessionId, input: PhaseInput) -> Vec<Outbound> {
        let (drawing, scored) = match input {
            PhaseInput::Drawing(drawing) => (drawing, None),
            PhaseInput::ScoredDrawing { drawing, metric } => (drawing, Some(metric)),
            PhaseInput::Target { .. } => return Vec::new(),
        };
        if self.state != PhaseState::Running {
            return Vec::new();
        }
        let Some(record) = self.records.get_mut(&player) else {
            return Vec::new();
        };
        // first submission wins
        if record.metric.is_some() {
            return Vec::new();
        }

        let scored = scored.unwrap_or_else(|| Self::score(&record.reference, &drawing));
        let metric = match scored {
            Ok(metric) => metric,
            Err(e) => {
                log::debug!("Rejected drawing from session {}: {}", player, e);
                return vec![Outbound::to_one(
                    player,
                    Envelope::error("phase_1", "image", &e.to_string()),
                )];
            }
        };

        record.submitted = Some(drawing);
        record.metric = Some(metric);
        self.refresh_state();

        vec![Outbound::to_one(
            player,
            Envelope::new(
                "phase_update",
                json!({ "phase": PHASE_NUMBER, "status": "received" }),
            ),
        )]
    }

    fn next_difficulty(&self) -> Difficulty {
        if self.state != PhaseState::Finished {
            return None;
        }
        let metrics: Vec<f64> = self.records.values().filter_map(|r| r.metric).collect();
        if metrics.is_empty() {
            return Some(1.0);
        }
        let mean = metrics.iter().sum::<f64>() / metrics.len() as f64;
        Some(mean.max(1.0))
    }

    fn remove_player(&mut self, player: SessionId) {
        self.players.retain(|p| p.session != player);
        self.records.remove(&player);
        self.refresh_state();
    }

    fn metrics(&self) -> PhaseMetrics {
        self.records
            .iter()
            .map(|(session, record)| (*session, record.metric))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::MemoryAssetSource;
    use image::{GrayImage, Luma};
    use std::path::Path;

    fn source_image() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |x, y| {
            if (x / 8 + y / 8) % 3 == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        }))
    }

    fn players(n: u64) -> Vec<PhasePlayer> {
        (1..=n).map(|i| PhasePlayer::new(i, format!("p{}", i))).collect()
    }

    fn phase(n: u64) -> DrawingPhase {
        let assets = MemoryAssetSource::new();
        assets.insert("drawings/one.png", source_image());
        DrawingPhase::new(players(n), Arc::new(assets), Path::new("drawings"))
    }

    fn started(n: u64) -> DrawingPhase {
        let mut phase = phase(n);
        phase.start(None).unwrap();
        phase
    }

    fn reference_of(phase: &DrawingPhase, player: SessionId) -> DynamicImage {
        phase.submission(player).unwrap().reference.clone()
    }

    #[test]
    fn test_start_sends_one_patch_per_player() {
        let mut phase = phase(4);
        assert_eq!(phase.state(), PhaseState::Pending);

        let events = phase.start(None).unwrap();
        assert_eq!(events.len(), 4);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.to.as_slice(), &[i as u64 + 1]);
            assert_eq!(event.envelope.kind, "phase_start");
        }
        assert_eq!(phase.state(), PhaseState::Running);
        assert!(!phase.is_finished());
    }

    #[test]
    fn test_start_without_assets_fails() {
        let mut phase = DrawingPhase::new(
            players(2),
            Arc::new(MemoryAssetSource::new()),
            Path::new("drawings"),
        );
        assert!(matches!(
            phase.start(None),
            Err(GameError::Image(ImageError::Asset(_)))
        ));
        assert_eq!(phase.state(), PhaseState::Pending);
    }

    #[test]
    fn test_finished_when_everyone_submitted() {
        let mut phase = started(3);
        for player in 1..=3 {
            assert!(!phase.is_finished());
            let drawing = reference_of(&phase, player);
            let events = phase.receive(player, PhaseInput::Drawing(drawing));
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].envelope.kind, "phase_update");
        }
        assert!(phase.is_finished());
        // identical drawings score 0, so the difficulty floor applies
        assert_eq!(phase.next_difficulty(), Some(1.0));
    }

    #[test]
    fn test_resubmission_and_unknown_player_are_ignored() {
        let mut phase = started(2);
        let reference = reference_of(&phase, 1);
        phase.receive(1, PhaseInput::Drawing(reference));
        let first = phase.submission(1).unwrap().metric;

        let other = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([255])));
        assert!(phase.receive(1, PhaseInput::Drawing(other.clone())).is_empty());
        assert_eq!(phase.submission(1).unwrap().metric, first);

        let before = phase.metrics();
        assert!(phase.receive(42, PhaseInput::Drawing(other)).is_empty());
        assert_eq!(phase.metrics(), before);
        assert!(!phase.is_finished());
    }

    #[test]
    fn test_color_submission_is_rejected_to_sender() {
        let mut phase = started(2);
        let events = phase.receive(2, PhaseInput::Drawing(DynamicImage::new_rgb8(8, 8)));
        assert_eq!(events.len(), 1);
        assert!(events[0].envelope.is_error());
        assert!(events[0].is_for(2));
        assert_eq!(phase.submission(2).unwrap().metric, None);
    }

    #[test]
    fn test_difficulty_is_mean_when_above_floor() {
        let mut phase = started(2);
        for record in phase.records.values_mut() {
            record.submitted = Some(record.reference.clone());
        }
        phase.records.get_mut(&1).unwrap().metric = Some(2.0);
        phase.records.get_mut(&2).unwrap().metric = Some(4.0);
        phase.refresh_state();
        assert!(phase.is_finished());
        assert_eq!(phase.next_difficulty(), Some(3.0));
    }

    #[test]
    fn test_departed_player_no_longer_blocks() {
        let mut phase = started(2);
        let reference = reference_of(&phase, 1);
        phase.receive(1, PhaseInput::Drawing(reference));
        assert!(!phase.is_finished());

        phase.remove_player(2);
        assert!(phase.is_finished());
        assert_eq!(phase.metrics().len(), 1);
    }

    #[test]
    fn test_prepared_scoring_leaves_phase_untouched() {
        let phase = started(2);
        let drawing = reference_of(&phase, 1);

        let prepared = phase.prepare(1, PhaseInput::Drawing(drawing));
        assert!(prepared.is_deferred());
        assert_eq!(phase.submission(1).unwrap().metric, None);

        match prepared.resolve() {
            PhaseInput::ScoredDrawing { metric, .. } => assert_eq!(metric, Ok(0.0)),
            other => panic!("unexpected input {:?}", other),
        }
        assert_eq!(phase.submission(1).unwrap().metric, None);
    }

    #[test]
    fn test_prepared_submissions_keep_first_one() {
        let mut phase = started(2);
        let reference = reference_of(&phase, 1);
        let other = DynamicImage::ImageLuma8(GrayImage::from_fn(20, 20, |x, _| {
            if x < 5 {
                Luma([255])
            } else {
                Luma([0])
            }
        }));

        // both scored before either is applied
        let first = phase.prepare(1, PhaseInput::Drawing(reference)).resolve();
        let second = phase.prepare(1, PhaseInput::Drawing(other)).resolve();

        assert_eq!(phase.receive(1, first).len(), 1);
        assert_eq!(phase.submission(1).unwrap().metric, Some(0.0));
        assert!(phase.receive(1, second).is_empty());
        assert_eq!(phase.submission(1).unwrap().metric, Some(0.0));
    }

    #[test]
    fn test_prepare_skips_already_scored_player() {
        let mut phase = started(2);
        let reference = reference_of(&phase, 1);
        phase.receive(1, PhaseInput::Drawing(reference.clone()));

        assert!(!phase.prepare(1, PhaseInput::Drawing(reference.clone())).is_deferred());
        assert!(!phase.prepare(42, PhaseInput::Drawing(reference)).is_deferred());
        assert!(!phase.prepare(2, PhaseInput::Target { id: 0 }).is_deferred());
    }

    #[test]
    fn test_prepared_color_drawing_is_rejected_to_sender() {
        let mut phase = started(2);
        let input = phase
            .prepare(2, PhaseInput::Drawing(DynamicImage::new_rgb8(8, 8)))
            .resolve();
        let events = phase.receive(2, input);
        assert_eq!(events.len(), 1);
        assert!(events[0].envelope.is_error());
        assert_eq!(phase.submission(2).unwrap().metric, None);
    }

    #[test]
    fn test_target_input_is_ignored() {
        let mut phase = started(2);
        assert!(phase.receive(1, PhaseInput::Target { id: 0 }).is_empty());
    }
}
