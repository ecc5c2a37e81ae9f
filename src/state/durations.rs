//! Rank-based phase durations and the aggregate rank that drives them.

use indexmap::IndexMap;

use crate::dao::models::{Phase, SessionPlayerEntity};

/// Per-phase durations in seconds, indexed by phase number minus one.
pub type PhaseDurations = [u32; 3];

/// Global defaults used when no rank is known.
pub const DEFAULT_PHASE_DURATIONS: PhaseDurations = [300, 180, 240];
/// Tier used when a rank's leading word is not in the table.
pub const DEFAULT_FALLBACK_TIER: &str = "Silver";

/// Lookup table mapping rank tiers to phase durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDurationTable {
    defaults: PhaseDurations,
    fallback_tier: String,
    tiers: IndexMap<String, PhaseDurations>,
}

impl PhaseDurationTable {
    /// Build a table. The fallback tier must be present in `tiers`.
    pub fn new(
        defaults: PhaseDurations,
        fallback_tier: impl Into<String>,
        tiers: IndexMap<String, PhaseDurations>,
    ) -> Option<Self> {
        let fallback_tier = fallback_tier.into();
        let all_positive = defaults
            .iter()
            .chain(tiers.values().flatten())
            .all(|seconds| *seconds > 0);

        (all_positive && tiers.contains_key(&fallback_tier)).then_some(Self {
            defaults,
            fallback_tier,
            tiers,
        })
    }

    /// Duration in seconds of `phase` for a participant of the given rank.
    ///
    /// The tier is the first word of the rank (`"Gold I"` -> `"Gold"`). Unknown
    /// or malformed tiers (including a blank rank) use the fallback tier; only a
    /// missing rank uses the defaults.
    pub fn duration_for(&self, rank: Option<&str>, phase: Phase) -> u32 {
        let index = usize::from(phase.number() - 1);
        let Some(rank) = rank else {
            return self.defaults[index];
        };

        rank.split_whitespace()
            .next()
            .and_then(|tier| self.tiers.get(tier))
            .or_else(|| self.tiers.get(&self.fallback_tier))
            .map(|durations| durations[index])
            .unwrap_or(self.defaults[index])
    }

    /// Configured tier names.
    pub fn tiers(&self) -> impl Iterator<Item = &str> {
        self.tiers.keys().map(String::as_str)
    }
}

impl Default for PhaseDurationTable {
    fn default() -> Self {
        let tiers = IndexMap::from([
            ("Bronze".to_owned(), [180, 180, 180]),
            ("Silver".to_owned(), [240, 180, 180]),
            ("Gold".to_owned(), [300, 180, 240]),
            ("Platinum".to_owned(), [360, 180, 240]),
        ]);
        Self {
            defaults: DEFAULT_PHASE_DURATIONS,
            fallback_tier: DEFAULT_FALLBACK_TIER.to_owned(),
            tiers,
        }
    }
}

/// Representative rank of the group's real players.
///
/// Non-empty ranks of non-AI players are sorted as plain strings and the one
/// at index `n / 2` is returned. This orders ranks alphabetically, not by
/// skill ("Gold" < "Platinum" < "Silver").
pub fn aggregate_rank<'a, I>(players: I) -> Option<String>
where
    I: IntoIterator<Item = &'a SessionPlayerEntity>,
{
    let mut ranks: Vec<&str> = players
        .into_iter()
        .filter(|player| !player.is_ai)
        .filter_map(|player| player.rank.as_deref())
        .filter(|rank| !rank.is_empty())
        .collect();

    if ranks.is_empty() {
        return None;
    }

    ranks.sort_unstable();
    Some(ranks[ranks.len() / 2].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::fixtures::player;

    #[test]
    fn missing_rank_uses_global_defaults() {
        let table = PhaseDurationTable::default();
        assert_eq!(table.duration_for(None, Phase::Writing), 300);
        assert_eq!(table.duration_for(None, Phase::PeerFeedback), 180);
        assert_eq!(table.duration_for(None, Phase::Revision), 240);
    }

    #[test]
    fn blank_rank_is_malformed_not_missing() {
        let table = PhaseDurationTable::default();
        assert_eq!(table.duration_for(Some("   "), Phase::Writing), 240);
        assert_eq!(table.duration_for(Some(""), Phase::Writing), 240);
        assert_eq!(table.duration_for(Some(""), Phase::Revision), 180);
    }

    #[test]
    fn unknown_tier_falls_back_to_silver() {
        let table = PhaseDurationTable::default();
        assert_eq!(table.duration_for(Some("Unknown Rank"), Phase::Writing), 240);
        assert_eq!(table.duration_for(Some("Diamond II"), Phase::Writing), 240);
        assert_eq!(table.duration_for(Some("gold I"), Phase::Writing), 240);
    }

    #[test]
    fn tier_is_the_leading_word() {
        let table = PhaseDurationTable::default();
        assert_eq!(table.duration_for(Some("Bronze I"), Phase::Writing), 180);
        assert_eq!(table.duration_for(Some("Platinum"), Phase::Writing), 360);
        assert_eq!(table.duration_for(Some("Gold I"), Phase::Writing), 300);
        assert_eq!(table.duration_for(Some("Silver III"), Phase::Writing), 240);
        assert_eq!(table.duration_for(Some("Gold II"), Phase::Revision), 240);
        assert_eq!(table.duration_for(Some("Bronze III"), Phase::PeerFeedback), 180);
    }

    #[test]
    fn table_rejects_zero_durations_and_missing_fallback() {
        let tiers = IndexMap::from([("Silver".to_owned(), [240, 180, 180])]);
        assert!(PhaseDurationTable::new([300, 180, 240], "Silver", tiers.clone()).is_some());
        assert!(PhaseDurationTable::new([300, 0, 240], "Silver", tiers.clone()).is_none());
        assert!(PhaseDurationTable::new([300, 180, 240], "Gold", tiers).is_none());
    }

    #[test]
    fn aggregate_rank_is_the_lexicographic_median() {
        let players = [
            player("a", Some("Silver I"), false),
            player("b", Some("Gold II"), false),
            player("c", Some("Platinum"), false),
        ];
        // Sorted: Gold II, Platinum, Silver I
        assert_eq!(aggregate_rank(&players), Some("Platinum".into()));

        let pair = [
            player("a", Some("Bronze I"), false),
            player("b", Some("Gold I"), false),
        ];
        assert_eq!(aggregate_rank(&pair), Some("Gold I".into()));
    }

    #[test]
    fn aggregate_rank_ignores_ai_and_blank_ranks() {
        let players = [
            player("a", Some("Bronze I"), false),
            player("b", None, false),
            player("c", Some(""), false),
            player("bot", Some("Platinum"), true),
        ];
        assert_eq!(aggregate_rank(&players), Some("Bronze I".into()));

        // Only empty ranks are dropped; whitespace sorts first like any other string.
        let padded = [
            player("a", Some("   "), false),
            player("b", Some("Gold I"), false),
            player("c", Some("Silver I"), false),
        ];
        assert_eq!(aggregate_rank(&padded), Some("Gold I".into()));

        let bots = [player("bot", Some("Gold"), true)];
        assert_eq!(aggregate_rank(&bots), None);
        assert_eq!(aggregate_rank(std::iter::empty()), None);
    }
}
