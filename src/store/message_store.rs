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

//! The message store facade.
//!
//! Every operation resolves its mailbox through the directory, then works on
//! that mailbox's `MessageIndex` while holding the index's mutex. Mutations
//! run in a fixed order: allocate ids, mutate the index, report to quota and
//! listeners, return. Nothing is allocated before the mutex is taken, so the
//! order in which UIDs and MODSEQs are handed out equals the order in which
//! the index observes them.
//!
//! Quota and listener failures are logged and never undo a mutation.
//!
//! Mailbox deletion cascades to messages through the directory's deletion
//! feed. Pending deletions are applied before any other work of each
//! operation: the index of a deleted mailbox is emptied and retired under its
//! mutex, so an operation racing with the deletion either completes before
//! it (and its messages are removed with the rest) or fails with
//! `NxMailbox`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam::channel::Receiver;
use log::{debug, error, info, warn};

use crate::services::attachment::{AttachmentStore, InMemoryAttachmentStore};
use crate::services::directory::{
    InMemoryMailboxDirectory, MailboxDirectory,
};
use crate::services::events::{EventBus, MailboxEvent};
use crate::services::quota::{
    CurrentQuotaManager, InMemoryCurrentQuotaManager, QuotaRoot,
};
use crate::store::applicable_flags::compute_applicable_flags;
use crate::store::flags_update::{FlagsUpdateCalculator, FlagsUpdateMode};
use crate::store::ids::{IdProvider, InMemoryIdProvider};
use crate::store::message_index::MessageIndex;
use crate::store::metadata::{FetchGroup, MailboxMetaData};
use crate::store::model::*;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::StoreConfig;

pub struct MessageStore {
    config: StoreConfig,
    log_prefix: LogPrefix,
    directory: Arc<dyn MailboxDirectory>,
    ids: Arc<dyn IdProvider>,
    attachments: Arc<dyn AttachmentStore>,
    quota: Arc<dyn CurrentQuotaManager>,
    events: EventBus,
    indices: Mutex<HashMap<MailboxId, Arc<Mutex<MessageIndex>>>>,
    deletions: Mutex<Receiver<Mailbox>>,
}

impl MessageStore {
    /// Create a store over `directory`, using in-memory implementations for
    /// every other collaborator.
    pub fn new(
        config: StoreConfig,
        directory: Arc<dyn MailboxDirectory>,
    ) -> Self {
        let deletions = Mutex::new(directory.subscribe_deletions());
        MessageStore {
            config,
            log_prefix: LogPrefix::new("store".to_owned()),
            directory,
            ids: Arc::new(InMemoryIdProvider::new()),
            attachments: Arc::new(InMemoryAttachmentStore::new()),
            quota: Arc::new(InMemoryCurrentQuotaManager::new()),
            events: EventBus::new(),
            indices: Mutex::new(HashMap::new()),
            deletions,
        }
    }

    /// A fully in-memory store with the default configuration.
    pub fn in_memory() -> Self {
        MessageStore::new(
            StoreConfig::default(),
            Arc::new(InMemoryMailboxDirectory::new()),
        )
    }

    pub fn with_id_provider(mut self, ids: Arc<dyn IdProvider>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_attachment_store(
        mut self,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_quota_manager(
        mut self,
        quota: Arc<dyn CurrentQuotaManager>,
    ) -> Self {
        self.quota = quota;
        self
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    pub fn directory(&self) -> &Arc<dyn MailboxDirectory> {
        &self.directory
    }

    pub fn attachments(&self) -> &Arc<dyn AttachmentStore> {
        &self.attachments
    }

    pub fn quota(&self) -> &Arc<dyn CurrentQuotaManager> {
        &self.quota
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Save `mailbox` in the directory, announcing it if it is new.
    pub fn register_mailbox(
        &self,
        mailbox: &mut Mailbox,
    ) -> Result<MailboxId, Error> {
        let is_new = !mailbox.is_saved();
        let id = self.directory.save(mailbox)?;
        if is_new {
            info!(
                "{} Created mailbox {} with id {}",
                self.log_prefix, mailbox.path, id
            );
            self.emit(MailboxEvent::MailboxAdded {
                mailbox_id: id,
                path: mailbox.path.clone(),
            });
        }
        Ok(id)
    }

    /// Delete `mailbox` from the directory along with all of its messages.
    ///
    /// Deleting through the directory directly has the same effect, applied
    /// at the start of the next store operation.
    pub fn purge_mailbox(&self, mailbox: &Mailbox) -> Result<(), Error> {
        let mailbox = self.resolve(mailbox)?;
        self.directory.delete(&mailbox)?;
        self.reap_deleted();
        Ok(())
    }

    /// Apply every deletion the directory has announced so far.
    ///
    /// Holding `deletions` while reaping means that once this returns, every
    /// deletion announced before the call has been fully applied, whichever
    /// thread picked it up.
    fn reap_deleted(&self) {
        let deletions = self.deletions.lock().unwrap();
        for mailbox in deletions.try_iter() {
            if let Ok(id) = mailbox.id() {
                self.retire(id, mailbox);
            }
        }
    }

    fn retire(&self, id: MailboxId, mailbox: Mailbox) {
        let index = self.index(id);
        let mut index = index.lock().unwrap();
        if index.is_retired() {
            return;
        }

        let removed = index.retire();
        let size = removed.iter().map(MailboxMessage::size).sum::<u64>();
        self.report_quota(&mailbox, -(removed.len() as i64), size);
        self.ids.forget(id);

        info!(
            "{} Deleted mailbox {} with {} message(s)",
            self.log_prefix,
            mailbox.path,
            removed.len()
        );
        self.emit(MailboxEvent::MailboxDeleted {
            mailbox_id: id,
            path: mailbox.path,
        });
    }

    /// Add a new message to `mailbox`.
    ///
    /// The message is stamped with a fresh UID and the new highest MODSEQ of
    /// the mailbox; its flags are stored as given.
    pub fn add(
        &self,
        mailbox: &Mailbox,
        message: NewMessage,
    ) -> Result<MessageMetaData, Error> {
        message.content.validate()?;
        self.insert_new(
            mailbox,
            message.flags,
            Arc::new(message.content),
            "Added",
        )
    }

    /// Copy `original` into `mailbox`.
    ///
    /// The copy shares the original's content but gets its own UID and
    /// MODSEQ, and is flagged `\Recent` unless configured otherwise. The
    /// original is not touched.
    pub fn copy(
        &self,
        mailbox: &Mailbox,
        original: &MailboxMessage,
    ) -> Result<MessageMetaData, Error> {
        let mut flags = original.flags().clone();
        if self.config.store.copy_marks_recent {
            flags.insert_system(SystemFlags::RECENT);
        }

        self.insert_new(
            mailbox,
            flags,
            Arc::clone(original.shared_content()),
            "Copied",
        )
    }

    fn insert_new(
        &self,
        mailbox: &Mailbox,
        flags: Flags,
        content: Arc<MessageContent>,
        verb: &str,
    ) -> Result<MessageMetaData, Error> {
        let mailbox = self.resolve(mailbox)?;
        mailbox.require_writable()?;
        let id = mailbox.id()?;

        let index = self.index(id);
        let mut index = self.lock(&mailbox, &index)?;

        let uid = self.ids.next_uid(&mailbox)?;
        let mod_seq = self.ids.next_modseq(&mailbox)?;
        let message = MailboxMessage::new(id, uid, mod_seq, flags, content);
        let metadata = message.metadata();
        index
            .insert(message)
            .map_err(|e| self.invariant_violation(&mailbox, e))?;

        debug!(
            "{} {} message to {} as UID {} (modseq {})",
            self.log_prefix, verb, mailbox.path, uid, mod_seq
        );

        self.report_quota(&mailbox, 1, metadata.size);
        let mut uids = BTreeMap::new();
        uids.insert(uid, metadata.clone());
        self.emit(MailboxEvent::Added {
            mailbox_id: id,
            path: mailbox.path.clone(),
            uids,
        });

        Ok(metadata)
    }

    /// Remove `message` from `mailbox` unconditionally.
    ///
    /// Removing a message that is not (or no longer) in the mailbox does
    /// nothing.
    pub fn delete(
        &self,
        mailbox: &Mailbox,
        message: &MailboxMessage,
    ) -> Result<(), Error> {
        let mailbox = self.resolve(mailbox)?;
        mailbox.require_writable()?;
        let id = mailbox.id()?;

        if message.mailbox_id() != id {
            debug!(
                "{} Ignoring delete of UID {} from {}: message belongs to \
                 mailbox {}",
                self.log_prefix,
                message.uid(),
                mailbox.path,
                message.mailbox_id()
            );
            return Ok(());
        }

        let index = self.index(id);
        let mut index = self.lock(&mailbox, &index)?;
        self.remove_locked(&mailbox, &mut index, vec![message.uid()])?;
        Ok(())
    }

    /// Remove every message within `range` that carries `\Deleted`,
    /// returning what was removed.
    pub fn expunge_marked_for_deletion_in_mailbox(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
    ) -> Result<BTreeMap<Uid, MessageMetaData>, Error> {
        let mailbox = self.resolve(mailbox)?;
        mailbox.require_writable()?;

        let index = self.index(mailbox.id()?);
        let mut index = self.lock(&mailbox, &index)?;
        let doomed = index.deleted_in(range);
        self.remove_locked(&mailbox, &mut index, doomed)
    }

    fn remove_locked(
        &self,
        mailbox: &Mailbox,
        index: &mut MessageIndex,
        uids: Vec<Uid>,
    ) -> Result<BTreeMap<Uid, MessageMetaData>, Error> {
        let uids = uids
            .into_iter()
            .filter(|&uid| index.get(uid).is_some())
            .collect::<Vec<_>>();
        if uids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mod_seq = self.ids.next_modseq(mailbox)?;
        let removed = uids
            .into_iter()
            .filter_map(|uid| index.remove(uid))
            .map(|m| (m.uid(), m.metadata()))
            .collect::<BTreeMap<_, _>>();

        debug!(
            "{} Expunged {} message(s) from {} (modseq {})",
            self.log_prefix,
            removed.len(),
            mailbox.path,
            mod_seq
        );

        let size = removed.values().map(|m| m.size).sum::<u64>();
        self.report_quota(mailbox, -(removed.len() as i64), size);
        self.emit(MailboxEvent::Expunged {
            mailbox_id: mailbox.id()?,
            path: mailbox.path.clone(),
            uids: removed.clone(),
        });

        Ok(removed)
    }

    /// Apply `calculator` to every message within `range`.
    ///
    /// All affected messages share one new MODSEQ. Every matched message is
    /// reported, whether or not its flags actually changed.
    pub fn update_flags(
        &self,
        mailbox: &Mailbox,
        calculator: &FlagsUpdateCalculator,
        range: MessageRange,
    ) -> Result<Vec<UpdatedFlags>, Error> {
        let mailbox = self.resolve(mailbox)?;
        mailbox.require_writable()?;

        let index = self.index(mailbox.id()?);
        let mut index = self.lock(&mailbox, &index)?;
        let targets = index
            .scan(range, None)
            .map(MailboxMessage::uid)
            .collect::<Vec<_>>();
        self.update_flags_locked(&mailbox, &mut index, calculator, targets)
    }

    fn update_flags_locked(
        &self,
        mailbox: &Mailbox,
        index: &mut MessageIndex,
        calculator: &FlagsUpdateCalculator,
        targets: Vec<Uid>,
    ) -> Result<Vec<UpdatedFlags>, Error> {
        let new_flags = targets
            .into_iter()
            .filter_map(|uid| {
                index
                    .get(uid)
                    .map(|m| (uid, calculator.build_new_flags(m.flags())))
            })
            .collect::<Vec<_>>();
        if new_flags.is_empty() {
            return Ok(Vec::new());
        }

        let mod_seq = self.ids.next_modseq(mailbox)?;
        let mut updated = Vec::with_capacity(new_flags.len());
        for (uid, new_flags) in new_flags {
            let old_flags = index
                .replace_flags(uid, new_flags.clone(), mod_seq)
                .ok_or_else(|| {
                    self.invariant_violation(
                        mailbox,
                        format!("UID {} vanished during flag update", uid),
                    )
                })?;
            updated.push(UpdatedFlags {
                uid,
                mod_seq,
                old_flags,
                new_flags,
            });
        }

        debug!(
            "{} Updated flags of {} message(s) in {} (modseq {})",
            self.log_prefix,
            updated.len(),
            mailbox.path,
            mod_seq
        );

        self.emit(MailboxEvent::FlagsUpdated {
            mailbox_id: mailbox.id()?,
            path: mailbox.path.clone(),
            updated: updated.clone(),
        });

        Ok(updated)
    }

    /// Return the messages within `range` in ascending UID order, at most
    /// `limit` of them (`None` meaning no limit).
    ///
    /// The result is a snapshot: later mutations do not show through it.
    pub fn find_in_mailbox(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
        fetch_type: FetchType,
        limit: Option<usize>,
    ) -> Result<Vec<MailboxMessage>, Error> {
        let mailbox = self.resolve(mailbox)?;
        let index = self.index(mailbox.id()?);
        let mut found = self
            .lock(&mailbox, &index)?
            .scan(range, limit)
            .map(|m| m.materialise(fetch_type))
            .collect::<Vec<_>>();

        if FetchType::Full == fetch_type {
            for message in &mut found {
                if message.attachment_ids().is_empty() {
                    continue;
                }

                let attachments = self
                    .attachments
                    .get_attachments(message.attachment_ids())?;
                message.set_attachments(attachments);
            }
        }

        Ok(found)
    }

    /// Fetch the single message with the given UID.
    pub fn find_message(
        &self,
        mailbox: &Mailbox,
        uid: Uid,
        fetch_type: FetchType,
    ) -> Result<MailboxMessage, Error> {
        self.find_in_mailbox(mailbox, uid.to_range(), fetch_type, Some(1))?
            .pop()
            .ok_or(Error::NxMessage)
    }

    pub fn count_messages_in_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<usize, Error> {
        self.read(mailbox, |_, index| Ok(index.message_count()))
    }

    pub fn count_unseen_messages_in_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<usize, Error> {
        self.read(mailbox, |_, index| Ok(index.unseen_count()))
    }

    /// Both counts, consistent with each other.
    pub fn get_mailbox_counters(
        &self,
        mailbox: &Mailbox,
    ) -> Result<MessageCounts, Error> {
        self.read(mailbox, |_, index| {
            Ok(MessageCounts {
                count: index.message_count(),
                unseen: index.unseen_count(),
            })
        })
    }

    pub fn find_recent_message_uids_in_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Vec<Uid>, Error> {
        self.read(mailbox, |_, index| Ok(index.recent_uids()))
    }

    pub fn find_first_unseen_message_uid(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Option<Uid>, Error> {
        self.read(mailbox, |_, index| Ok(index.first_unseen_uid()))
    }

    pub fn get_highest_modseq(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Modseq, Error> {
        self.read(mailbox, |mailbox, _| self.ids.highest_modseq(mailbox))
    }

    pub fn get_last_uid(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Option<Uid>, Error> {
        self.read(mailbox, |mailbox, _| self.ids.last_uid(mailbox))
    }

    pub fn get_applicable_flag(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Flags, Error> {
        self.read(mailbox, |_, index| {
            Ok(compute_applicable_flags(index.messages()))
        })
    }

    /// Summarise `mailbox`.
    ///
    /// If `reset_recent` is set and the mailbox is writable, `\Recent` is
    /// cleared from the reported messages within the same exclusive section.
    pub fn get_meta_data(
        &self,
        mailbox: &Mailbox,
        reset_recent: bool,
        fetch_group: FetchGroup,
    ) -> Result<MailboxMetaData, Error> {
        let mailbox = self.resolve(mailbox)?;
        let index = self.index(mailbox.id()?);
        let mut index = self.lock(&mailbox, &index)?;

        let recent = index.recent_uids();
        if reset_recent && !mailbox.read_only && !recent.is_empty() {
            let calculator = FlagsUpdateCalculator::new(
                Flags::from_system(SystemFlags::RECENT),
                FlagsUpdateMode::Remove,
            );
            self.update_flags_locked(
                &mailbox,
                &mut index,
                &calculator,
                recent.clone(),
            )?;
        }

        Ok(MailboxMetaData::build(
            &mailbox,
            &index,
            fetch_group,
            recent,
            self.ids.last_uid(&mailbox)?,
            self.ids.highest_modseq(&mailbox)?,
        ))
    }

    /// Run `f` against the current index of `mailbox` while holding its
    /// mutex.
    fn read<R>(
        &self,
        mailbox: &Mailbox,
        f: impl FnOnce(&Mailbox, &MessageIndex) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mailbox = self.resolve(mailbox)?;
        let index = self.index(mailbox.id()?);
        let index = self.lock(&mailbox, &index)?;
        f(&mailbox, &index)
    }

    /// Look `mailbox` up in the directory, after applying pending deletions.
    fn resolve(&self, mailbox: &Mailbox) -> Result<Mailbox, Error> {
        self.reap_deleted();
        self.directory.find_mailbox_by_id(mailbox.id()?)
    }

    /// The index of mailbox `id`. Indices of deleted mailboxes stay in place,
    /// retired, so a late caller cannot bring a fresh one into existence.
    fn index(&self, id: MailboxId) -> Arc<Mutex<MessageIndex>> {
        Arc::clone(self.indices.lock().unwrap().entry(id).or_default())
    }

    /// Enter the exclusive section of `index`, failing if the mailbox was
    /// deleted since it was resolved.
    fn lock<'a>(
        &self,
        mailbox: &Mailbox,
        index: &'a Mutex<MessageIndex>,
    ) -> Result<MutexGuard<'a, MessageIndex>, Error> {
        let index = index.lock().unwrap();
        if index.is_retired() {
            return Err(Error::NxMailbox(mailbox.path.to_string()));
        }
        Ok(index)
    }

    fn invariant_violation(
        &self,
        mailbox: &Mailbox,
        what: impl ToString,
    ) -> Error {
        let what = what.to_string();
        error!("{} {}: {}", self.log_prefix, mailbox.path, what);
        Error::ConcurrencyViolation(what)
    }

    /// Report a usage delta; `count` is negative for removals.
    fn report_quota(&self, mailbox: &Mailbox, count: i64, size: u64) {
        if !self.config.quota.enabled || 0 == count {
            return;
        }

        let root = QuotaRoot::for_mailbox(&mailbox.path);
        let size = size as i64;
        let result = if count > 0 {
            self.quota.increase(&root, count, size)
        } else {
            self.quota.decrease(&root, -count, size)
        };

        if let Err(e) = result {
            warn!(
                "{} Failed to update quota {} after change to {}: {}",
                self.log_prefix, root, mailbox.path, e
            );
        }
    }

    fn emit(&self, event: MailboxEvent) {
        if self.config.events.enabled {
            self.events.dispatch(&self.log_prefix, &event);
        }
    }
}
