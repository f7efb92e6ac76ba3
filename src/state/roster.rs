use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::state::ids::PlayerId;

/// Player known to the session: stable id plus the name shown on leaderboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Stable identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
}

impl Player {
    /// Build a player from an id and a display name.
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Read-only capability exposing which players are currently present.
pub trait PresenceSource {
    /// Present player ids, in presence order.
    fn present_ids(&self) -> Vec<PlayerId>;
}

/// Rejected host assignment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// Only present players can hold the host role.
    #[error("player `{0}` is not present and cannot become host")]
    NotPresent(PlayerId),
}

/// Presence, participation and per-question answer bookkeeping.
///
/// Every operation is total: unknown ids read as absent and mutations on them
/// are no-ops, never errors (host assignment aside).
#[derive(Debug, Clone, Default)]
pub struct PlayerRoster {
    present: IndexMap<PlayerId, String>,
    opted_out: HashSet<PlayerId>,
    answered: IndexSet<PlayerId>,
    answer_choice: HashMap<PlayerId, usize>,
    host: Option<PlayerId>,
}

impl PlayerRoster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player to the present set, refreshing the display name when already present.
    ///
    /// Returns `true` when the player was not present before.
    pub fn join(&mut self, player: Player) -> bool {
        self.present.insert(player.id, player.name).is_none()
    }

    /// Replace the present set wholesale.
    ///
    /// Opt-outs, answers and host are left untouched; the ids that disappeared are
    /// returned so the caller can purge them with [`PlayerRoster::remove_player`].
    pub fn set_present(&mut self, players: impl IntoIterator<Item = Player>) -> Vec<PlayerId> {
        let next: IndexMap<PlayerId, String> = players
            .into_iter()
            .map(|player| (player.id, player.name))
            .collect();
        let departed = self
            .present
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        self.present = next;
        departed
    }

    /// Whether `id` is currently present.
    pub fn is_present(&self, id: &PlayerId) -> bool {
        self.present.contains_key(id)
    }

    /// Display name of a present player.
    pub fn name_of(&self, id: &PlayerId) -> Option<&str> {
        self.present.get(id).map(String::as_str)
    }

    /// Opt `id` out of answering.
    ///
    /// When the player had already answered this question, the answer is withdrawn
    /// and its choice returned so tallies can be corrected.
    pub fn opt_out(&mut self, id: &PlayerId) -> Option<usize> {
        self.opted_out.insert(id.clone());
        if self.answered.shift_remove(id) {
            self.answer_choice.remove(id)
        } else {
            None
        }
    }

    /// Let `id` answer again after an opt-out.
    pub fn rejoin(&mut self, id: &PlayerId) {
        self.opted_out.remove(id);
    }

    /// Whether `id` has opted out.
    pub fn is_opted_out(&self, id: &PlayerId) -> bool {
        self.opted_out.contains(id)
    }

    /// Record an answer for the current question.
    ///
    /// Answers from absent players and from opted-out players (other than the local
    /// fallback client) are dropped. Returns whether the answer was recorded.
    pub fn record_answer(&mut self, id: &PlayerId, choice: Option<usize>) -> bool {
        if !self.is_present(id) {
            return false;
        }
        if !id.is_local() && self.opted_out.contains(id) {
            return false;
        }

        self.answered.insert(id.clone());
        if let Some(choice) = choice {
            self.answer_choice.insert(id.clone(), choice);
        }
        true
    }

    /// Whether `id` answered the current question.
    pub fn has_answered(&self, id: &PlayerId) -> bool {
        self.answered.contains(id)
    }

    /// Choice recorded for `id` on the current question.
    pub fn answer_choice(&self, id: &PlayerId) -> Option<usize> {
        self.answer_choice.get(id).copied()
    }

    /// Forget answers of the current question. Opt-outs and host survive.
    pub fn clear_round(&mut self) {
        self.answered.clear();
        self.answer_choice.clear();
    }

    /// Hand the host role to `id`, returning the previous host.
    ///
    /// The last successful call wins; the previous host keeps every other piece of state.
    pub fn set_host(&mut self, id: &PlayerId) -> Result<Option<PlayerId>, HostError> {
        if !self.is_present(id) {
            return Err(HostError::NotPresent(id.clone()));
        }
        Ok(self.host.replace(id.clone()))
    }

    /// Drop the host role, returning whoever held it.
    pub fn clear_host(&mut self) -> Option<PlayerId> {
        self.host.take()
    }

    /// Whether `id` holds the host role.
    pub fn is_host(&self, id: &PlayerId) -> bool {
        self.host.as_ref() == Some(id)
    }

    /// Current host, if any.
    pub fn host(&self) -> Option<&PlayerId> {
        self.host.as_ref()
    }

    /// Purge every trace of `id`. Must run on each departure.
    ///
    /// Returns `true` when the player was the host.
    pub fn remove_player(&mut self, id: &PlayerId) -> bool {
        self.present.shift_remove(id);
        self.opted_out.remove(id);
        self.answered.shift_remove(id);
        self.answer_choice.remove(id);
        if self.is_host(id) {
            self.host = None;
            true
        } else {
            false
        }
    }

    /// Number of present players.
    pub fn count(&self) -> usize {
        self.present.len()
    }

    /// Number of present players that have not opted out.
    pub fn active_count(&self) -> usize {
        self.present
            .keys()
            .filter(|id| !self.opted_out.contains(*id))
            .count()
    }

    /// Number of answers recorded for the current question.
    pub fn answered_count(&self) -> usize {
        self.answered.len()
    }

    /// Present players in presence order.
    pub fn players(&self) -> Vec<Player> {
        self.present
            .iter()
            .map(|(id, name)| Player::new(id.clone(), name.clone()))
            .collect()
    }

    /// Present players that have not opted out, in presence order.
    pub fn active_ids(&self) -> Vec<PlayerId> {
        self.present
            .keys()
            .filter(|id| !self.opted_out.contains(*id))
            .cloned()
            .collect()
    }

    /// Opted-out players (present or not).
    pub fn opted_out_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<_> = self.opted_out.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Players that answered the current question, in answer order.
    pub fn answered_ids(&self) -> Vec<PlayerId> {
        self.answered.iter().cloned().collect()
    }

    /// Whether every active player has answered. False when nobody is active.
    pub fn all_active_answered(&self) -> bool {
        let active = self.active_ids();
        !active.is_empty() && active.iter().all(|id| self.answered.contains(id))
    }
}

impl PresenceSource for PlayerRoster {
    fn present_ids(&self) -> Vec<PlayerId> {
        self.present.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn roster_with(ids: &[&str]) -> PlayerRoster {
        let mut roster = PlayerRoster::new();
        for id in ids {
            roster.join(Player::new(*id, id.to_uppercase()));
        }
        roster
    }

    fn answered_is_subset_of_present(roster: &PlayerRoster) -> bool {
        roster
            .answered_ids()
            .iter()
            .all(|id| roster.is_present(id))
    }

    #[test]
    fn answered_stays_within_present_for_random_sequences() {
        let ids: Vec<PlayerId> = ["a", "b", "c", "ghost", PlayerId::LOCAL]
            .into_iter()
            .map(PlayerId::from)
            .collect();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let mut roster = roster_with(&["a", "b", "c"]);
            for _ in 0..40 {
                let id = &ids[rng.random_range(0..ids.len())];
                match rng.random_range(0..3) {
                    0 => {
                        roster.opt_out(id);
                    }
                    1 => roster.rejoin(id),
                    _ => {
                        roster.record_answer(id, Some(rng.random_range(0..4)));
                    }
                }
                assert!(answered_is_subset_of_present(&roster));
            }
        }
    }

    #[test]
    fn remove_player_resets_every_read() {
        let mut roster = roster_with(&["a", "b"]);
        let a = PlayerId::from("a");
        assert_eq!(roster.name_of(&a), Some("A"));
        roster.record_answer(&a, Some(2));
        roster.set_host(&a).unwrap();
        roster.opt_out(&a);

        assert!(roster.remove_player(&a));

        assert!(!roster.is_present(&a));
        assert!(!roster.has_answered(&a));
        assert!(!roster.is_host(&a));
        assert!(!roster.is_opted_out(&a));
        assert_eq!(roster.answer_choice(&a), None);
        assert_eq!(roster.name_of(&a), None);
        assert_eq!(roster.host(), None);
        assert_eq!(roster.count(), 1);
    }

    #[test]
    fn opt_out_returns_withdrawn_choice_once() {
        let mut roster = roster_with(&["a"]);
        let a = PlayerId::from("a");
        assert!(roster.record_answer(&a, Some(3)));

        assert_eq!(roster.opt_out(&a), Some(3));
        assert_eq!(roster.opt_out(&a), None);
        assert!(!roster.has_answered(&a));
        assert_eq!(roster.answered_count(), 0);
    }

    #[test]
    fn opted_out_answers_are_dropped_unless_local() {
        let mut roster = roster_with(&["a", PlayerId::LOCAL]);
        let a = PlayerId::from("a");
        let local = PlayerId::local();
        roster.opt_out(&a);
        roster.opt_out(&local);

        assert!(!roster.record_answer(&a, Some(1)));
        assert!(roster.record_answer(&local, Some(1)));
        assert!(!roster.has_answered(&a));
        assert!(roster.has_answered(&local));

        roster.rejoin(&a);
        assert!(roster.record_answer(&a, Some(0)));
    }

    #[test]
    fn absent_players_cannot_answer() {
        let mut roster = roster_with(&["a"]);
        assert!(!roster.record_answer(&PlayerId::from("stranger"), Some(0)));
        assert!(!roster.record_answer(&PlayerId::local(), Some(0)));
        assert_eq!(roster.answered_count(), 0);
    }

    #[test]
    fn clear_round_keeps_presence_and_opt_outs() {
        let mut roster = roster_with(&["a", "b", "c"]);
        for (choice, id) in ["a", "b", "c"].iter().enumerate() {
            assert!(roster.record_answer(&PlayerId::from(*id), Some(choice)));
        }
        assert!(roster.all_active_answered());

        roster.clear_round();

        assert_eq!(roster.answered_count(), 0);
        assert!(roster.answered_ids().is_empty());
        assert_eq!(roster.answer_choice(&PlayerId::from("a")), None);
        assert_eq!(roster.count(), 3);
        assert!(roster.opted_out_ids().is_empty());
    }

    #[test]
    fn set_present_reports_departures_without_touching_other_sets() {
        let mut roster = roster_with(&["a", "b"]);
        let b = PlayerId::from("b");
        roster.set_host(&b).unwrap();
        roster.opt_out(&PlayerId::from("a"));

        let departed = roster.set_present(vec![Player::new("a", "A"), Player::new("c", "C")]);

        assert_eq!(departed, vec![b.clone()]);
        assert_eq!(roster.present_ids(), vec![PlayerId::from("a"), PlayerId::from("c")]);
        assert!(roster.is_host(&b));
        assert!(roster.is_opted_out(&PlayerId::from("a")));
        assert_eq!(roster.active_count(), 1);
    }

    #[test]
    fn host_requires_presence_and_last_call_wins() {
        let mut roster = roster_with(&["a", "b"]);
        let a = PlayerId::from("a");
        let b = PlayerId::from("b");

        assert_eq!(
            roster.set_host(&PlayerId::from("z")),
            Err(HostError::NotPresent(PlayerId::from("z")))
        );
        assert_eq!(roster.set_host(&a), Ok(None));
        assert_eq!(roster.set_host(&b), Ok(Some(a.clone())));
        assert!(roster.is_host(&b));
        assert!(!roster.is_host(&a));
        assert_eq!(roster.clear_host(), Some(b));
        assert_eq!(roster.host(), None);
    }
}
