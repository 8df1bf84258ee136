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

//! Notification of mailbox changes.
//!
//! The message store dispatches one event per successful mutation, while it
//! still holds the exclusive section of the mailbox concerned. Listeners of
//! one mailbox therefore see events in mutation order. Listeners run on the
//! mutating thread and must not call back into the store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, warn};

use crate::store::model::*;
use crate::support::error::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum MailboxEvent {
    MailboxAdded {
        mailbox_id: MailboxId,
        path: MailboxPath,
    },
    MailboxDeleted {
        mailbox_id: MailboxId,
        path: MailboxPath,
    },
    Added {
        mailbox_id: MailboxId,
        path: MailboxPath,
        uids: BTreeMap<Uid, MessageMetaData>,
    },
    Expunged {
        mailbox_id: MailboxId,
        path: MailboxPath,
        uids: BTreeMap<Uid, MessageMetaData>,
    },
    FlagsUpdated {
        mailbox_id: MailboxId,
        path: MailboxPath,
        updated: Vec<UpdatedFlags>,
    },
}

impl MailboxEvent {
    pub fn mailbox_id(&self) -> MailboxId {
        match *self {
            MailboxEvent::MailboxAdded { mailbox_id, .. }
            | MailboxEvent::MailboxDeleted { mailbox_id, .. }
            | MailboxEvent::Added { mailbox_id, .. }
            | MailboxEvent::Expunged { mailbox_id, .. }
            | MailboxEvent::FlagsUpdated { mailbox_id, .. } => mailbox_id,
        }
    }
}

pub trait MailboxListener: Send + Sync {
    fn event(&self, event: &MailboxEvent) -> Result<(), Error>;
}

/// Forwards every event into a channel, for consumers living on other
/// threads.
pub struct ChannelListener {
    sender: Sender<MailboxEvent>,
}

impl ChannelListener {
    pub fn new(sender: Sender<MailboxEvent>) -> Self {
        ChannelListener { sender }
    }
}

impl MailboxListener for ChannelListener {
    fn event(&self, event: &MailboxEvent) -> Result<(), Error> {
        self.sender
            .send(event.clone())
            .map_err(|_| Error::ListenerGone)
    }
}

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn MailboxListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn MailboxListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Register a new channel listener and return its receiving end.
    pub fn subscribe(&self) -> Receiver<MailboxEvent> {
        let (sender, receiver) = channel::unbounded();
        self.add_listener(Arc::new(ChannelListener::new(sender)));
        receiver
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap().len()
    }

    /// Deliver `event` to every listener.
    ///
    /// Failures are logged and otherwise ignored; the mutation that produced
    /// the event has already happened. Listeners failing with `ListenerGone`
    /// are dropped.
    pub fn dispatch(
        &self,
        log_prefix: &dyn fmt::Display,
        event: &MailboxEvent,
    ) {
        let mut gone = Vec::new();
        for listener in self.listeners.read().unwrap().iter() {
            match listener.event(event) {
                Ok(()) => (),
                Err(Error::ListenerGone) => gone.push(Arc::clone(listener)),
                Err(e) => warn!(
                    "{} Failed to deliver event for mailbox {}: {}",
                    log_prefix,
                    event.mailbox_id(),
                    e
                ),
            }
        }

        if !gone.is_empty() {
            debug!(
                "{} Dropping {} disconnected listener(s)",
                log_prefix,
                gone.len()
            );
            self.listeners
                .write()
                .unwrap()
                .retain(|l| !gone.iter().any(|g| Arc::ptr_eq(l, g)));
        }
    }
}
