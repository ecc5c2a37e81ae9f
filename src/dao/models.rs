use std::{fmt, time::SystemTime};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use thiserror::Error;
use utoipa::ToSchema;

/// One of the three timed stages of a match.
///
/// Serialized as its number; DTO fields document it with `value_type = u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    /// Phase 1: drafting the essay.
    Writing = 1,
    /// Phase 2: reviewing other players' drafts.
    PeerFeedback = 2,
    /// Phase 3: revising the draft using the feedback received.
    Revision = 3,
}

impl Phase {
    /// Every phase, in match order.
    pub const ALL: [Phase; 3] = [Phase::Writing, Phase::PeerFeedback, Phase::Revision];

    /// Numeric identifier (1, 2 or 3).
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Phase following this one, `None` after the revision phase.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Writing => Some(Phase::PeerFeedback),
            Phase::PeerFeedback => Some(Phase::Revision),
            Phase::Revision => None,
        }
    }

    /// Field name used for this phase inside player and timing records.
    pub fn key(self) -> &'static str {
        match self {
            Phase::Writing => "phase1",
            Phase::PeerFeedback => "phase2",
            Phase::Revision => "phase3",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Raised when an integer does not name one of the three phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid phase `{0}` (expected 1, 2 or 3)")]
pub struct InvalidPhase(pub u8);

impl TryFrom<u8> for Phase {
    type Error = InvalidPhase;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::Writing),
            2 => Ok(Phase::PeerFeedback),
            3 => Ok(Phase::Revision),
            other => Err(InvalidPhase(other)),
        }
    }
}

impl From<Phase> for u8 {
    fn from(value: Phase) -> Self {
        value.number()
    }
}

/// Kind of match the session was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// Solo or unranked practice.
    Practice,
    /// Casual match between queued players.
    QuickMatch,
    /// Match that affects player ranks.
    Ranked,
}

/// Lifecycle state of a session document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Lobby finalized, match not started yet.
    Forming,
    /// A phase is running.
    Active,
    /// Some real players have submitted the current phase, others have not.
    Waiting,
    /// Reserved for clients that render an in-between screen.
    Transitioning,
    /// All three phases are done.
    Completed,
    /// Stopped by an external timeout or disconnect handler.
    Abandoned,
}

impl SessionStatus {
    /// Completed and abandoned sessions accept no further phase mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

/// Connection status reported by player heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Heartbeats are arriving.
    Connected,
    /// The client left or stopped sending heartbeats.
    Disconnected,
}

/// Match configuration carried by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfigEntity {
    /// Writing trait the match is graded on (e.g. "organization").
    #[serde(rename = "trait")]
    pub writing_trait: String,
    /// Prompt every player writes about.
    pub prompt_id: String,
    /// Prompt genre, e.g. "narrative".
    pub prompt_type: String,
    /// Current phase; never decreases.
    pub phase: Phase,
    /// Duration of the current phase in seconds.
    pub phase_duration: u32,
}

/// Server-recorded start timestamps of each phase.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTimingEntity {
    /// Set once by `start_session`.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub phase1_start_time: Option<SystemTime>,
    /// Set when phase 1 completes.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub phase2_start_time: Option<SystemTime>,
    /// Set when phase 2 completes.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub phase3_start_time: Option<SystemTime>,
}

impl SessionTimingEntity {
    /// Start time recorded for `phase`, if it started.
    pub fn start_of(&self, phase: Phase) -> Option<SystemTime> {
        match phase {
            Phase::Writing => self.phase1_start_time,
            Phase::PeerFeedback => self.phase2_start_time,
            Phase::Revision => self.phase3_start_time,
        }
    }

    /// Record the start time of `phase`.
    pub fn mark_started(&mut self, phase: Phase, at: SystemTime) {
        let slot = match phase {
            Phase::Writing => &mut self.phase1_start_time,
            Phase::PeerFeedback => &mut self.phase2_start_time,
            Phase::Revision => &mut self.phase3_start_time,
        };
        *slot = Some(at);
    }
}

/// Shared coordination counters reset on every phase change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationEntity {
    /// Real players who submitted the current phase.
    pub ready_count: u32,
    /// Whether `ready_count` covers every real player.
    pub all_players_ready: bool,
}

/// One player's submission record for one phase.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseDataEntity {
    /// Once true for a phase, never reset.
    pub submitted: bool,
    /// Storage server time of the submission.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub submitted_at: Option<SystemTime>,
    /// Essay text (phases 1 and 3).
    #[serde(default)]
    pub content: Option<String>,
    /// Peer feedback answers keyed by question (phase 2).
    #[serde(default)]
    pub responses: Option<IndexMap<String, String>>,
    /// Whitespace-separated words across the submission.
    #[serde(default)]
    pub word_count: u32,
    /// Score assigned by the grading collaborator (0-100).
    #[serde(default)]
    pub score: Option<f64>,
}

/// Per-phase submission records of a player, absent until the player acts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerPhasesEntity {
    /// Writing.
    #[serde(default)]
    pub phase1: Option<PhaseDataEntity>,
    /// Peer feedback.
    #[serde(default)]
    pub phase2: Option<PhaseDataEntity>,
    /// Revision.
    #[serde(default)]
    pub phase3: Option<PhaseDataEntity>,
}

impl PlayerPhasesEntity {
    /// Submission record for `phase`.
    pub fn get(&self, phase: Phase) -> Option<&PhaseDataEntity> {
        match phase {
            Phase::Writing => self.phase1.as_ref(),
            Phase::PeerFeedback => self.phase2.as_ref(),
            Phase::Revision => self.phase3.as_ref(),
        }
    }

    /// Mutable slot for `phase`.
    pub fn slot_mut(&mut self, phase: Phase) -> &mut Option<PhaseDataEntity> {
        match phase {
            Phase::Writing => &mut self.phase1,
            Phase::PeerFeedback => &mut self.phase2,
            Phase::Revision => &mut self.phase3,
        }
    }

    /// Whether the player has submitted `phase`.
    pub fn is_submitted(&self, phase: Phase) -> bool {
        self.get(phase).is_some_and(|data| data.submitted)
    }
}

/// One participant's state within a session.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPlayerEntity {
    /// Key of the player in [`SessionEntity::players`].
    pub user_id: String,
    /// Name shown to the other participants.
    pub display_name: String,
    /// Avatar URL or emoji.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Rank string such as "Silver III".
    #[serde(default)]
    pub rank: Option<String>,
    /// AI players are excluded from readiness and the aggregate rank.
    pub is_ai: bool,
    /// Presence as last reported.
    pub status: ConnectionStatus,
    /// Storage server time of the last heartbeat.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub last_heartbeat: Option<SystemTime>,
    /// SSE connection the last heartbeat came from.
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Per-phase submissions.
    #[serde(default)]
    pub phases: PlayerPhasesEntity,
}

/// Aggregate session document persisted by the storage layer.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: String,
    /// Lobby/party record this session belongs to.
    pub match_id: String,
    /// Kind of match.
    pub mode: SessionMode,
    /// Assignment, current phase and its duration.
    pub config: SessionConfigEntity,
    /// Participants keyed by user id.
    pub players: IndexMap<String, SessionPlayerEntity>,
    /// Lifecycle state.
    pub state: SessionStatus,
    /// Phase start times.
    #[serde(default)]
    pub timing: SessionTimingEntity,
    /// Readiness counters of the current phase.
    #[serde(default)]
    pub coordination: CoordinationEntity,
    /// Storage server time of creation.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    /// Storage server time of the last transactional write.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub updated_at: SystemTime,
}

impl SessionEntity {
    /// Iterate over non-AI participants.
    pub fn real_players(&self) -> impl Iterator<Item = &SessionPlayerEntity> {
        self.players.values().filter(|player| !player.is_ai)
    }
}

/// Subset of a session returned by listings.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionListItemEntity {
    /// Session identifier.
    pub id: String,
    /// Lobby/party record.
    pub match_id: String,
    /// Kind of match.
    pub mode: SessionMode,
    /// Current phase.
    pub phase: Phase,
    /// Lifecycle state.
    pub state: SessionStatus,
    /// Participants, AI included.
    pub player_count: usize,
    /// Time of the last transactional write.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub updated_at: SystemTime,
}

impl From<&SessionEntity> for SessionListItemEntity {
    fn from(entity: &SessionEntity) -> Self {
        Self {
            id: entity.id.clone(),
            match_id: entity.match_id.clone(),
            mode: entity.mode,
            phase: entity.config.phase,
            state: entity.state,
            player_count: entity.players.len(),
            updated_at: entity.updated_at,
        }
    }
}

/// Partial update of a single player's subtree (`players.<uid>.*`).
///
/// Patches from different players touch disjoint fields and can be applied
/// concurrently without a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerPatch {
    /// Record a phase submission. Rejected if the phase was already submitted.
    Submit { phase: Phase, data: PhaseDataEntity },
    /// Attach a grading score to an already submitted phase.
    Score { phase: Phase, score: f64 },
    /// Update connection status.
    Presence {
        status: ConnectionStatus,
        at: SystemTime,
        connection_id: Option<String>,
    },
}

/// Why a [`PlayerPatch`] could not be merged into a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// No player with this id in the session.
    #[error("player `{0}` is not part of the session")]
    UnknownPlayer(String),
    /// Submissions are final.
    #[error("player `{user_id}` already submitted phase {phase}")]
    AlreadySubmitted { user_id: String, phase: Phase },
    /// Scores can only be attached to a submitted phase.
    #[error("player `{user_id}` has not submitted phase {phase}")]
    NotSubmitted { user_id: String, phase: Phase },
    /// The session is not accepting this phase right now.
    #[error("phase {phase} is not open for submissions (session is {state:?} in phase {current})")]
    PhaseClosed {
        phase: Phase,
        current: Phase,
        state: SessionStatus,
    },
}

impl SessionEntity {
    /// Whether players may currently submit `phase`.
    pub fn accepts_submission(&self, phase: Phase) -> bool {
        matches!(self.state, SessionStatus::Active | SessionStatus::Waiting)
            && self.config.phase == phase
    }

    /// Structurally merge a per-player patch into the session.
    pub fn apply_player_patch(&mut self, user_id: &str, patch: PlayerPatch) -> Result<(), PatchError> {
        if let PlayerPatch::Submit { phase, .. } = &patch {
            if !self.accepts_submission(*phase) {
                return Err(PatchError::PhaseClosed {
                    phase: *phase,
                    current: self.config.phase,
                    state: self.state,
                });
            }
        }

        let player = self
            .players
            .get_mut(user_id)
            .ok_or_else(|| PatchError::UnknownPlayer(user_id.to_owned()))?;

        match patch {
            PlayerPatch::Submit { phase, data } => {
                if player.phases.is_submitted(phase) {
                    return Err(PatchError::AlreadySubmitted {
                        user_id: user_id.to_owned(),
                        phase,
                    });
                }
                *player.phases.slot_mut(phase) = Some(data);
            }
            PlayerPatch::Score { phase, score } => match player.phases.slot_mut(phase) {
                Some(data) if data.submitted => data.score = Some(score),
                _ => {
                    return Err(PatchError::NotSubmitted {
                        user_id: user_id.to_owned(),
                        phase,
                    });
                }
            },
            PlayerPatch::Presence {
                status,
                at,
                connection_id,
            } => {
                player.status = status;
                player.last_heartbeat = Some(at);
                if connection_id.is_some() {
                    player.connection_id = connection_id;
                }
            }
        }

        Ok(())
    }
}
