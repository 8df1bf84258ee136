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

//! UID and MODSEQ allocation.
//!
//! Each mailbox owns a pair of counters. Allocation is a single atomic
//! read-modify-write, so concurrent callers never observe the same value and
//! values handed out are strictly increasing in allocation order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::store::model::*;
use crate::support::error::Error;

pub trait UidProvider: Send + Sync {
    /// Allocate the next UID of `mailbox`.
    ///
    /// Fails with `MailboxFull` once the UID space is exhausted.
    fn next_uid(&self, mailbox: &Mailbox) -> Result<Uid, Error>;

    /// The most recently allocated UID, or `None` if none was ever
    /// allocated.
    fn last_uid(&self, mailbox: &Mailbox) -> Result<Option<Uid>, Error>;
}

pub trait ModseqProvider: Send + Sync {
    /// Allocate the next MODSEQ of `mailbox`.
    fn next_modseq(&self, mailbox: &Mailbox) -> Result<Modseq, Error>;

    /// The most recently allocated MODSEQ, or `Modseq::PRIMORDIAL`.
    fn highest_modseq(&self, mailbox: &Mailbox) -> Result<Modseq, Error>;
}

/// Owns both counters of every mailbox.
pub trait IdProvider: UidProvider + ModseqProvider {
    /// Drop the counters of a deleted mailbox.
    ///
    /// The caller must ensure that no further ids are allocated for
    /// `mailbox`; the directory never hands out a deleted mailbox id again.
    fn forget(&self, mailbox: MailboxId);
}

#[derive(Debug, Default)]
struct MailboxCounters {
    last_uid: AtomicU32,
    highest_modseq: AtomicU64,
}

/// Keeps both counters of every mailbox in memory.
#[derive(Debug, Default)]
pub struct InMemoryIdProvider {
    counters: Mutex<HashMap<MailboxId, Arc<MailboxCounters>>>,
}

impl InMemoryIdProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counters of `mailbox`, created on first allocation.
    fn counters(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Arc<MailboxCounters>, Error> {
        let id = mailbox.id()?;
        Ok(Arc::clone(
            self.counters.lock().unwrap().entry(id).or_default(),
        ))
    }

    /// The counters of `mailbox`, if anything was ever allocated for it.
    fn existing_counters(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Option<Arc<MailboxCounters>>, Error> {
        let id = mailbox.id()?;
        Ok(self.counters.lock().unwrap().get(&id).cloned())
    }
}

impl IdProvider for InMemoryIdProvider {
    fn forget(&self, mailbox: MailboxId) {
        self.counters.lock().unwrap().remove(&mailbox);
    }
}

impl UidProvider for InMemoryIdProvider {
    fn next_uid(&self, mailbox: &Mailbox) -> Result<Uid, Error> {
        let counters = self.counters(mailbox)?;
        let prev = counters
            .last_uid
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                last.checked_add(1)
            })
            .map_err(|_| Error::MailboxFull)?;
        // prev + 1 cannot overflow or be zero, fetch_update checked that
        Uid::of(prev + 1).ok_or(Error::MailboxFull)
    }

    fn last_uid(&self, mailbox: &Mailbox) -> Result<Option<Uid>, Error> {
        Ok(self
            .existing_counters(mailbox)?
            .and_then(|c| Uid::of(c.last_uid.load(Ordering::SeqCst))))
    }
}

impl ModseqProvider for InMemoryIdProvider {
    fn next_modseq(&self, mailbox: &Mailbox) -> Result<Modseq, Error> {
        let counters = self.counters(mailbox)?;
        let prev = counters
            .highest_modseq
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                last.checked_add(1)
            })
            .map_err(|_| Error::MailboxFull)?;
        Modseq(prev).next().ok_or(Error::MailboxFull)
    }

    fn highest_modseq(&self, mailbox: &Mailbox) -> Result<Modseq, Error> {
        Ok(self
            .existing_counters(mailbox)?
            .map_or(Modseq::PRIMORDIAL, |c| {
                Modseq(c.highest_modseq.load(Ordering::SeqCst))
            }))
    }
}
