use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dao::models::{
        ConnectionStatus, CoordinationEntity, PhaseDataEntity, PlayerPhasesEntity,
        SessionConfigEntity, SessionEntity, SessionListItemEntity, SessionMode,
        SessionPlayerEntity, SessionStatus, SessionTimingEntity,
    },
    dto::{
        format_system_time,
        validation::{validate_id, validate_not_blank},
    },
};

/// Payload used to create a session once the lobby is finalized.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Session identifier. Generated when omitted.
    #[serde(default)]
    pub id: Option<String>,
    /// Lobby/party record this session belongs to.
    pub match_id: String,
    pub mode: SessionMode,
    /// Writing trait the match is graded on.
    #[serde(rename = "trait")]
    pub writing_trait: String,
    pub prompt_id: String,
    pub prompt_type: String,
    pub players: Vec<PlayerInput>,
}

impl Validate for CreateSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Some(ref id) = self.id {
            if let Err(e) = validate_id(id) {
                errors.add("id", e);
            }
        }
        if let Err(e) = validate_id(&self.match_id) {
            errors.add("match_id", e);
        }
        for (field, value) in [
            ("trait", &self.writing_trait),
            ("prompt_id", &self.prompt_id),
            ("prompt_type", &self.prompt_type),
        ] {
            if let Err(e) = validate_not_blank(value) {
                errors.add(field, e);
            }
        }

        if self.players.is_empty() {
            let mut err = ValidationError::new("players_empty");
            err.message = Some("A session needs at least one player".into());
            errors.add("players", err);
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = self
            .players
            .iter()
            .find(|player| !seen.insert(player.user_id.as_str()))
        {
            let mut err = ValidationError::new("players_duplicate");
            err.message = Some(format!("Player `{}` is listed twice", duplicate.user_id).into());
            errors.add("players", err);
        }

        for player in &self.players {
            if let Err(player_errors) = player.validate() {
                errors.merge_self("players", Err(player_errors));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Participant definition supplied at session creation.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct PlayerInput {
    /// Stable identifier of the player, unique within the session.
    #[validate(custom(function = "validate_id"))]
    pub user_id: String,
    /// Name shown to the other participants.
    #[validate(length(min = 1, max = 64))]
    pub display_name: String,
    /// Avatar URL or emoji.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Rank string such as "Silver III".
    #[serde(default)]
    #[validate(length(max = 64))]
    pub rank: Option<String>,
    /// AI players never block readiness.
    #[serde(default)]
    pub is_ai: bool,
}

impl From<PlayerInput> for SessionPlayerEntity {
    fn from(input: PlayerInput) -> Self {
        Self {
            user_id: input.user_id,
            display_name: input.display_name,
            avatar: input.avatar,
            rank: input.rank,
            is_ai: input.is_ai,
            status: ConnectionStatus::Connected,
            last_heartbeat: None,
            connection_id: None,
            phases: PlayerPhasesEntity::default(),
        }
    }
}

/// Full session snapshot returned by REST and pushed over SSE.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionView {
    /// Session identifier.
    pub id: String,
    /// Matchmaking id the session was created for.
    pub match_id: String,
    /// Game mode.
    pub mode: SessionMode,
    /// Writing assignment and current phase.
    pub config: SessionConfigView,
    /// Participants in join order.
    pub players: Vec<PlayerView>,
    /// Lifecycle state.
    pub state: SessionStatus,
    /// Server start times of each phase reached so far.
    pub timing: SessionTimingView,
    /// Readiness counters for the current phase.
    pub coordination: CoordinationView,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 time of the last write.
    pub updated_at: String,
}

/// Writing assignment of a session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionConfigView {
    /// Writing trait being practised, serialized as `trait`.
    #[serde(rename = "trait")]
    pub writing_trait: String,
    /// Identifier of the prompt shown to every player.
    pub prompt_id: String,
    /// Prompt genre, e.g. "narrative".
    pub prompt_type: String,
    /// Current phase (1, 2 or 3).
    pub phase: u8,
    /// Duration of the current phase in seconds.
    pub phase_duration: u32,
}

/// RFC 3339 start time of each phase; absent until the phase starts.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionTimingView {
    /// Start of the writing phase.
    pub phase1_start_time: Option<String>,
    /// Start of the peer feedback phase.
    pub phase2_start_time: Option<String>,
    /// Start of the revision phase.
    pub phase3_start_time: Option<String>,
}

/// Readiness of the current phase.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CoordinationView {
    /// Real players who submitted the current phase.
    pub ready_count: u32,
    /// Whether every real player submitted the current phase.
    pub all_players_ready: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Public projection of a participant.
pub struct PlayerView {
    /// Player identifier.
    pub user_id: String,
    /// Name shown to the other participants.
    pub display_name: String,
    /// Avatar URL or emoji.
    pub avatar: Option<String>,
    /// Rank string as supplied at creation.
    pub rank: Option<String>,
    /// Whether the player is an AI opponent.
    pub is_ai: bool,
    /// Presence as last reported.
    pub status: ConnectionStatus,
    /// RFC 3339 time of the last heartbeat.
    pub last_heartbeat: Option<String>,
    /// Per-phase submissions.
    pub phases: PlayerPhasesView,
}

/// Submissions of one player, one slot per phase.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerPhasesView {
    /// Writing phase.
    pub phase1: Option<PhaseDataView>,
    /// Peer feedback phase.
    pub phase2: Option<PhaseDataView>,
    /// Revision phase.
    pub phase3: Option<PhaseDataView>,
}

/// One phase submission.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PhaseDataView {
    /// Whether the player submitted this phase.
    pub submitted: bool,
    /// RFC 3339 server time of the submission.
    pub submitted_at: Option<String>,
    /// Essay text for phases 1 and 3.
    pub content: Option<String>,
    /// Feedback answers keyed by question for phase 2.
    pub responses: Option<IndexMap<String, String>>,
    /// Whitespace-separated words in the submission.
    pub word_count: u32,
    /// Grade between 0 and 100, once scored.
    pub score: Option<f64>,
}

/// Row returned by the session listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListItem {
    /// Session identifier.
    pub id: String,
    /// Matchmaking id the session was created for.
    pub match_id: String,
    /// Game mode.
    pub mode: SessionMode,
    /// Current phase number.
    pub phase: u8,
    /// Lifecycle state.
    pub state: SessionStatus,
    /// Number of participants, AI included.
    pub player_count: usize,
    /// RFC 3339 time of the last write.
    pub updated_at: String,
}

impl From<SessionEntity> for SessionView {
    fn from(session: SessionEntity) -> Self {
        Self {
            id: session.id,
            match_id: session.match_id,
            mode: session.mode,
            config: session.config.into(),
            players: session.players.into_values().map(Into::into).collect(),
            state: session.state,
            timing: session.timing.into(),
            coordination: session.coordination.into(),
            created_at: format_system_time(session.created_at),
            updated_at: format_system_time(session.updated_at),
        }
    }
}

impl From<SessionConfigEntity> for SessionConfigView {
    fn from(config: SessionConfigEntity) -> Self {
        Self {
            writing_trait: config.writing_trait,
            prompt_id: config.prompt_id,
            prompt_type: config.prompt_type,
            phase: config.phase.number(),
            phase_duration: config.phase_duration,
        }
    }
}

impl From<SessionTimingEntity> for SessionTimingView {
    fn from(timing: SessionTimingEntity) -> Self {
        Self {
            phase1_start_time: timing.phase1_start_time.map(format_system_time),
            phase2_start_time: timing.phase2_start_time.map(format_system_time),
            phase3_start_time: timing.phase3_start_time.map(format_system_time),
        }
    }
}

impl From<CoordinationEntity> for CoordinationView {
    fn from(coordination: CoordinationEntity) -> Self {
        Self {
            ready_count: coordination.ready_count,
            all_players_ready: coordination.all_players_ready,
        }
    }
}

impl From<SessionPlayerEntity> for PlayerView {
    fn from(player: SessionPlayerEntity) -> Self {
        Self {
            user_id: player.user_id,
            display_name: player.display_name,
            avatar: player.avatar,
            rank: player.rank,
            is_ai: player.is_ai,
            status: player.status,
            last_heartbeat: player.last_heartbeat.map(format_system_time),
            phases: PlayerPhasesView {
                phase1: player.phases.phase1.map(Into::into),
                phase2: player.phases.phase2.map(Into::into),
                phase3: player.phases.phase3.map(Into::into),
            },
        }
    }
}

impl From<PhaseDataEntity> for PhaseDataView {
    fn from(data: PhaseDataEntity) -> Self {
        Self {
            submitted: data.submitted,
            submitted_at: data.submitted_at.map(format_system_time),
            content: data.content,
            responses: data.responses,
            word_count: data.word_count,
            score: data.score,
        }
    }
}

impl From<SessionListItemEntity> for SessionListItem {
    fn from(item: SessionListItemEntity) -> Self {
        Self {
            id: item.id,
            match_id: item.match_id,
            mode: item.mode,
            phase: item.phase.number(),
            state: item.state,
            player_count: item.player_count,
            updated_at: format_system_time(item.updated_at),
        }
    }
}
