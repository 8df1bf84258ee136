//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

//! The ordered index of the messages of one mailbox.
//!
//! A `MessageIndex` knows nothing about locking or id allocation; the message
//! store wraps each index in its own mutex and performs every operation on it
//! inside that exclusive section.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use crate::store::model::*;
use crate::support::error::Error;

#[derive(Clone, Debug, Default)]
pub struct MessageIndex {
    messages: BTreeMap<Uid, MailboxMessage>,
    /// Exactly the UIDs of the messages currently carrying `\Recent`.
    recent: BTreeSet<Uid>,
    /// The number of messages lacking `\Seen`.
    unseen_count: usize,
    /// Set once the mailbox has been deleted; the index stays empty.
    retired: bool,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly stamped message.
    ///
    /// Fails with `UidCollision` if the UID is already present; the index is
    /// unchanged in that case.
    pub fn insert(&mut self, message: MailboxMessage) -> Result<(), Error> {
        let uid = message.uid();
        if self.messages.contains_key(&uid) {
            return Err(Error::UidCollision(uid.raw()));
        }

        self.track(message.flags(), uid, true);
        self.messages.insert(uid, message);
        Ok(())
    }

    /// Remove the message with the given UID, returning it if it was present.
    pub fn remove(&mut self, uid: Uid) -> Option<MailboxMessage> {
        let message = self.messages.remove(&uid)?;
        self.track(message.flags(), uid, false);
        Some(message)
    }

    pub fn get(&self, uid: Uid) -> Option<&MailboxMessage> {
        self.messages.get(&uid)
    }

    /// Iterate the messages within `range` in ascending UID order, yielding
    /// at most `limit` of them (`None` meaning unlimited).
    pub fn scan(
        &self,
        range: MessageRange,
        limit: Option<usize>,
    ) -> impl Iterator<Item = &MailboxMessage> + '_ {
        range
            .bounds()
            .into_iter()
            .flat_map(move |bounds| self.messages.range(bounds))
            .map(|(_, message)| message)
            .take(limit.unwrap_or(usize::MAX))
    }

    /// The UIDs within `range` whose messages carry `\Deleted`.
    pub fn deleted_in(&self, range: MessageRange) -> Vec<Uid> {
        self.scan(range, None)
            .filter(|m| m.flags().contains_system(SystemFlags::DELETED))
            .map(MailboxMessage::uid)
            .collect()
    }

    /// Replace the flags of the message with the given UID and stamp it with
    /// `mod_seq`, returning the previous flags.
    ///
    /// Returns `None` and does nothing if the UID is absent.
    pub fn replace_flags(
        &mut self,
        uid: Uid,
        new_flags: Flags,
        mod_seq: Modseq,
    ) -> Option<Flags> {
        let old_flags = self.messages.get(&uid)?.flags().clone();
        self.track(&old_flags, uid, false);
        self.track(&new_flags, uid, true);
        if let Some(message) = self.messages.get_mut(&uid) {
            message.set_flags(new_flags, mod_seq);
        }
        Some(old_flags)
    }

    /// Remove every message, returning them in UID order, and mark the
    /// index as belonging to a deleted mailbox.
    pub fn retire(&mut self) -> Vec<MailboxMessage> {
        self.retired = true;
        self.recent.clear();
        self.unseen_count = 0;
        mem::take(&mut self.messages)
            .into_iter()
            .map(|(_, message)| message)
            .collect()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn unseen_count(&self) -> usize {
        self.unseen_count
    }

    pub fn recent_uids(&self) -> Vec<Uid> {
        self.recent.iter().copied().collect()
    }

    pub fn first_unseen_uid(&self) -> Option<Uid> {
        self.messages
            .values()
            .find(|m| !m.flags().contains_system(SystemFlags::SEEN))
            .map(MailboxMessage::uid)
    }

    pub fn messages(&self) -> impl Iterator<Item = &MailboxMessage> + '_ {
        self.messages.values()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Add (`present`) or retract the contribution of a message with the
    /// given flags to the derived counters.
    fn track(&mut self, flags: &Flags, uid: Uid, present: bool) {
        if !flags.contains_system(SystemFlags::SEEN) {
            if present {
                self.unseen_count += 1;
            } else {
                self.unseen_count -= 1;
            }
        }

        if flags.contains_system(SystemFlags::RECENT) {
            if present {
                self.recent.insert(uid);
            } else {
                self.recent.remove(&uid);
            }
        }
    }
}
