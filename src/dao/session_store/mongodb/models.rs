use std::time::{SystemTime, UNIX_EPOCH};

use mongodb::bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};

use crate::dao::models::{
    ConnectionStatus, PhaseDataEntity, PlayerPatch, SessionEntity, SessionStatus,
};

/// Session document as stored in the `sessions` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    /// Same as the session id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Incremented on every write; commits are filtered on it.
    pub revision: i64,
    /// Session fields, stored inline next to `_id`.
    #[serde(flatten)]
    pub session: SessionEntity,
}

impl MongoSessionDocument {
    /// Wrap `session` at `revision`.
    pub fn new(session: SessionEntity, revision: i64) -> Self {
        Self {
            id: session.id.clone(),
            revision,
            session,
        }
    }
}

/// `_id` filter for one session.
pub fn doc_id(id: &str) -> Document {
    doc! {"_id": id}
}

/// Filter guard and update document for a single-player patch.
///
/// The filter only matches while the patch is still valid, so a zero match
/// count means either a missing document or a rejected patch.
pub struct PlayerUpdate {
    /// Matches the session only while the patch still applies.
    pub filter: Document,
    /// `$set` of the player's subtree, plus `updated_at`.
    pub update: Document,
}

impl PlayerUpdate {
    /// Translate `patch` for `user_id` into a guarded `update_one`.
    pub fn new(id: &str, user_id: &str, patch: &PlayerPatch) -> Self {
        let player = format!("players.{user_id}");
        let mut filter = doc_id(id);
        filter.insert(player.as_str(), doc! {"$exists": true});

        let set = match patch {
            PlayerPatch::Submit { phase, data } => {
                let slot = format!("{player}.phases.{}", phase.key());
                filter.insert(format!("{slot}.submitted"), doc! {"$ne": true});
                filter.insert("config.phase", i32::from(phase.number()));
                filter.insert(
                    "state",
                    doc! {"$in": [status_name(SessionStatus::Active), status_name(SessionStatus::Waiting)]},
                );
                doc! { slot: phase_data(data) }
            }
            PlayerPatch::Score { phase, score } => {
                let slot = format!("{player}.phases.{}", phase.key());
                filter.insert(format!("{slot}.submitted"), true);
                doc! { format!("{slot}.score"): *score }
            }
            PlayerPatch::Presence {
                status,
                at,
                connection_id,
            } => {
                let mut set = doc! {
                    format!("{player}.status"): connection_name(*status),
                    format!("{player}.last_heartbeat"): millis(*at),
                };
                if let Some(connection_id) = connection_id {
                    set.insert(format!("{player}.connection_id"), connection_id.as_str());
                }
                set
            }
        };

        Self {
            filter,
            update: doc! {"$set": set, "$inc": {"revision": 1_i64}},
        }
    }
}

fn phase_data(data: &PhaseDataEntity) -> Document {
    let responses = data.responses.as_ref().map(|responses| {
        responses
            .iter()
            .map(|(question, answer)| (question.clone(), Bson::String(answer.clone())))
            .collect::<Document>()
    });
    doc! {
        "submitted": data.submitted,
        "submitted_at": data.submitted_at.map(millis),
        "content": data.content.clone(),
        "responses": responses,
        "word_count": i64::from(data.word_count),
        "score": data.score,
    }
}

fn millis(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

fn status_name(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Forming => "forming",
        SessionStatus::Active => "active",
        SessionStatus::Waiting => "waiting",
        SessionStatus::Transitioning => "transitioning",
        SessionStatus::Completed => "completed",
        SessionStatus::Abandoned => "abandoned",
    }
}

fn connection_name(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Disconnected => "disconnected",
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::models::{Phase, fixtures};

    #[test]
    fn submission_guard_pins_phase_and_state() {
        let patch = PlayerPatch::Submit {
            phase: Phase::PeerFeedback,
            data: fixtures::submitted("two words"),
        };
        let PlayerUpdate { filter, update } = PlayerUpdate::new("s1", "alice", &patch);

        assert_eq!(filter.get_str("_id").unwrap(), "s1");
        assert_eq!(filter.get_i32("config.phase").unwrap(), 2);
        assert_eq!(
            filter.get_document("players.alice.phases.phase2.submitted").unwrap(),
            &doc! {"$ne": true}
        );
        assert_eq!(
            filter.get_document("state").unwrap(),
            &doc! {"$in": ["active", "waiting"]}
        );

        let set = update.get_document("$set").unwrap();
        let data = set.get_document("players.alice.phases.phase2").unwrap();
        assert!(data.get_bool("submitted").unwrap());
        assert_eq!(data.get_i64("word_count").unwrap(), 2);
        assert_eq!(data.get_i64("submitted_at").unwrap(), 0);
        assert_eq!(
            update.get_document("$inc").unwrap(),
            &doc! {"revision": 1_i64}
        );
    }

    #[test]
    fn presence_keeps_connection_id_when_absent() {
        let patch = PlayerPatch::Presence {
            status: ConnectionStatus::Disconnected,
            at: UNIX_EPOCH + Duration::from_millis(1_500),
            connection_id: None,
        };
        let PlayerUpdate { filter, update } = PlayerUpdate::new("s1", "bob", &patch);

        assert!(filter.get_document("players.bob").is_ok());
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("players.bob.status").unwrap(), "disconnected");
        assert_eq!(set.get_i64("players.bob.last_heartbeat").unwrap(), 1_500);
        assert!(!set.contains_key("players.bob.connection_id"));
    }

    #[test]
    fn status_names_match_serialized_form() {
        for status in [SessionStatus::Active, SessionStatus::Waiting] {
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                status_name(status)
            );
        }
    }
}
