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

use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crossbeam::channel::{self, Receiver, Sender};
use regex::Regex;

use crate::store::model::*;
use crate::support::error::Error;
use crate::support::safe_name::is_safe_name;

/// The registry of mailboxes.
///
/// The message store resolves every mailbox it is handed through the
/// directory, so a mailbox deleted here becomes unusable for message
/// operations immediately. Deleted mailboxes are also announced to
/// deletion subscribers, which is how the store learns to drop their
/// messages.
pub trait MailboxDirectory: Send + Sync {
    /// Persist `mailbox`, assigning it an id if it does not have one yet.
    ///
    /// Fails with `NxMailbox` if `mailbox` carries an id the directory does
    /// not hold, such as the id of a deleted mailbox. Ids are never reused.
    fn save(&self, mailbox: &mut Mailbox) -> Result<MailboxId, Error>;

    fn find_mailbox_by_path(&self, path: &MailboxPath)
        -> Result<Mailbox, Error>;

    fn find_mailbox_by_id(&self, id: MailboxId) -> Result<Mailbox, Error>;

    /// Find the mailboxes of the same owner as `pattern` whose name matches
    /// `pattern.name`, where `%` matches any run of characters.
    fn find_mailbox_with_path_like(
        &self,
        pattern: &MailboxPath,
    ) -> Result<Vec<Mailbox>, Error>;

    fn has_children(
        &self,
        mailbox: &Mailbox,
        delimiter: char,
    ) -> Result<bool, Error>;

    fn delete(&self, mailbox: &Mailbox) -> Result<(), Error>;

    fn delete_all(&self) -> Result<(), Error>;

    fn list(&self) -> Result<Vec<Mailbox>, Error>;

    /// Receive every mailbox deleted from now on, in deletion order.
    fn subscribe_deletions(&self) -> Receiver<Mailbox>;
}

#[derive(Debug)]
pub struct InMemoryMailboxDirectory {
    next_id: AtomicU64,
    mailboxes: RwLock<BTreeMap<MailboxId, Mailbox>>,
    deletion_subscribers: Mutex<Vec<Sender<Mailbox>>>,
}

impl Default for InMemoryMailboxDirectory {
    fn default() -> Self {
        InMemoryMailboxDirectory {
            next_id: AtomicU64::new(1),
            mailboxes: RwLock::new(BTreeMap::new()),
            deletion_subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryMailboxDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce `deleted` to every subscriber, forgetting subscribers whose
    /// receiver is gone.
    ///
    /// Called with the mailbox table still write-locked so that subscribers
    /// see deletions in the order they happened.
    fn announce_deletions(&self, deleted: &[Mailbox]) {
        if deleted.is_empty() {
            return;
        }

        self.deletion_subscribers.lock().unwrap().retain(|subscriber| {
            deleted.iter().all(|m| subscriber.send(m.clone()).is_ok())
        });
    }
}

fn path_like_regex(name: &str) -> Result<Regex, Error> {
    let body = name
        .split('%')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Ok(Regex::new(&format!("^{}$", body))?)
}

impl MailboxDirectory for InMemoryMailboxDirectory {
    fn save(&self, mailbox: &mut Mailbox) -> Result<MailboxId, Error> {
        if !is_safe_name(&mailbox.path.name) {
            return Err(Error::UnsafeName);
        }

        let mut mailboxes = self.mailboxes.write().unwrap();
        let existing = mailboxes
            .values()
            .find(|m| m.path == mailbox.path)
            .and_then(|m| m.id().ok());
        let id = match (mailbox.id().ok(), existing) {
            (Some(mine), Some(theirs)) if mine != theirs => {
                return Err(Error::MailboxExists)
            }
            (None, Some(_)) => return Err(Error::MailboxExists),
            (Some(mine), _) if !mailboxes.contains_key(&mine) => {
                return Err(Error::NxMailbox(mailbox.path.to_string()))
            }
            (Some(mine), _) => mine,
            (None, None) => {
                MailboxId(self.next_id.fetch_add(1, Ordering::SeqCst))
            }
        };

        mailbox.set_id(id);
        mailboxes.insert(id, mailbox.clone());
        Ok(id)
    }

    fn find_mailbox_by_path(
        &self,
        path: &MailboxPath,
    ) -> Result<Mailbox, Error> {
        self.mailboxes
            .read()
            .unwrap()
            .values()
            .find(|m| &m.path == path)
            .cloned()
            .ok_or_else(|| Error::NxMailbox(path.to_string()))
    }

    fn find_mailbox_by_id(&self, id: MailboxId) -> Result<Mailbox, Error> {
        self.mailboxes
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NxMailbox(format!("id {}", id)))
    }

    fn find_mailbox_with_path_like(
        &self,
        pattern: &MailboxPath,
    ) -> Result<Vec<Mailbox>, Error> {
        let regex = path_like_regex(&pattern.name)?;
        Ok(self
            .mailboxes
            .read()
            .unwrap()
            .values()
            .filter(|m| m.path.same_owner(pattern))
            .filter(|m| regex.is_match(&m.path.name))
            .cloned()
            .collect())
    }

    fn has_children(
        &self,
        mailbox: &Mailbox,
        delimiter: char,
    ) -> Result<bool, Error> {
        let prefix = format!("{}{}", mailbox.path.name, delimiter);
        Ok(self.mailboxes.read().unwrap().values().any(|m| {
            m.path.same_owner(&mailbox.path) && m.path.name.starts_with(&prefix)
        }))
    }

    fn delete(&self, mailbox: &Mailbox) -> Result<(), Error> {
        let id = mailbox.id()?;
        let mut mailboxes = self.mailboxes.write().unwrap();
        let deleted = mailboxes
            .remove(&id)
            .ok_or_else(|| Error::NxMailbox(mailbox.path.to_string()))?;
        self.announce_deletions(&[deleted]);
        Ok(())
    }

    fn delete_all(&self) -> Result<(), Error> {
        let mut mailboxes = self.mailboxes.write().unwrap();
        let deleted = mem::take(&mut *mailboxes)
            .into_iter()
            .map(|(_, m)| m)
            .collect::<Vec<_>>();
        self.announce_deletions(&deleted);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Mailbox>, Error> {
        Ok(self.mailboxes.read().unwrap().values().cloned().collect())
    }

    fn subscribe_deletions(&self) -> Receiver<Mailbox> {
        let (sender, receiver) = channel::unbounded();
        self.deletion_subscribers.lock().unwrap().push(sender);
        receiver
    }
}
