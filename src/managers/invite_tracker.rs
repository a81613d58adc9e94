use parking_lot::Mutex;
use poise::serenity_prelude::{GuildId, Http, RichInvite};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

/// Use count of one guild invite
#[derive(Debug, Clone, PartialEq)]
pub struct InviteUse {
    pub code: String,
    pub uses: u64,
    /// 0 means unlimited
    pub max_uses: u64,
    pub inviter_id: Option<u64>,
}

impl From<&RichInvite> for InviteUse {
    fn from(invite: &RichInvite) -> Self {
        Self {
            code: invite.code.clone(),
            uses: invite.uses,
            max_uses: u64::from(invite.max_uses),
            inviter_id: invite.inviter.as_ref().map(|user| user.id.get()),
        }
    }
}

/// Remembers invite use counts so a new member can be attributed to the
/// invite whose counter went up.
#[derive(Debug, Default)]
pub struct InviteTracker {
    known: Mutex<HashMap<String, InviteUse>>,
}

pub type SharedInviteTracker = Arc<InviteTracker>;

impl InviteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remembered counts with `current`
    pub fn replace(&self, current: Vec<InviteUse>) {
        let mut known = self.known.lock();
        *known = current
            .into_iter()
            .map(|invite| (invite.code.clone(), invite))
            .collect();
    }

    /// First invite of `current` used more often than last time
    pub fn find_used(&self, current: &[InviteUse]) -> Option<InviteUse> {
        let known = self.known.lock();
        current
            .iter()
            .find(|invite| {
                known
                    .get(&invite.code)
                    .is_some_and(|before| invite.uses > before.uses)
            })
            .cloned()
    }

    /// Fetch the guild invites and remember them. Returns the fetched list.
    pub async fn refresh(&self, http: &Http, guild_id: GuildId) -> Result<Vec<InviteUse>> {
        let invites: Vec<InviteUse> = guild_id
            .invites(http)
            .await?
            .iter()
            .map(InviteUse::from)
            .collect();
        debug!("Tracking {} invites of guild {}", invites.len(), guild_id);
        self.replace(invites.clone());
        Ok(invites)
    }

    /// Fetch invites, attribute a join to the invite that was used, and
    /// remember the new counts
    pub async fn attribute_join(&self, http: &Http, guild_id: GuildId) -> Result<Option<InviteUse>> {
        let current: Vec<InviteUse> = guild_id
            .invites(http)
            .await?
            .iter()
            .map(InviteUse::from)
            .collect();
        let used = self.find_used(&current);
        self.replace(current);
        Ok(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite(code: &str, uses: u64) -> InviteUse {
        InviteUse {
            code: code.to_string(),
            uses,
            max_uses: 0,
            inviter_id: Some(7),
        }
    }

    #[test]
    fn test_find_used_invite() {
        let tracker = InviteTracker::new();
        tracker.replace(vec![invite("abc", 3), invite("xyz", 1)]);

        let used = tracker.find_used(&[invite("abc", 3), invite("xyz", 2)]);
        assert_eq!(used.map(|i| i.code), Some("xyz".to_string()));
    }

    #[test]
    fn test_unknown_or_unchanged_invites_are_not_attributed() {
        let tracker = InviteTracker::new();
        tracker.replace(vec![invite("abc", 3)]);

        // A code created after the last refresh cannot be compared
        assert_eq!(tracker.find_used(&[invite("abc", 3), invite("new", 1)]), None);

        tracker.replace(vec![invite("abc", 3), invite("new", 1)]);
        assert_eq!(
            tracker.find_used(&[invite("new", 2)]).map(|i| i.uses),
            Some(2)
        );
    }
}
