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

use std::collections::BTreeSet;
use std::fmt;
use std::iter::FromIterator;
use std::num::NonZeroU32;
use std::ops::Bound::{self, Included, Unbounded};
use std::str::FromStr;
use std::sync::Arc;

use bitflags::bitflags;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use crate::services::attachment::{Attachment, AttachmentId};
use crate::support::error::Error;
use crate::support::safe_name::is_valid_keyword;

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs start at 1 and increase monotonically as messages are added to the
/// mailbox. UIDs are never reused, not even after the message bearing one is
/// expunged.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl Uid {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { Uid(NonZeroU32::new_unchecked(1)) };
    pub const MAX: Self = unsafe { Uid(NonZeroU32::new_unchecked(u32::MAX)) };

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn next(self) -> Option<Self> {
        self.0.get().checked_add(1).and_then(Uid::of)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }

    pub fn to_range(self) -> MessageRange {
        MessageRange::One(self)
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

/// A modification sequence number.
///
/// Every mutation of a mailbox is stamped with a fresh `Modseq` strictly
/// greater than any the mailbox has seen before. A mailbox that has never
/// been mutated reports `Modseq::PRIMORDIAL`.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct Modseq(pub u64);

impl Modseq {
    pub const PRIMORDIAL: Self = Modseq(0);

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Modseq)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Modseq {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a mailbox within its directory.
///
/// Ids are assigned by the directory when a mailbox is first saved and are
/// never reused, so a re-created mailbox gets a fresh UID space.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct MailboxId(pub u64);

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailboxPath {
    pub namespace: String,
    pub user: Option<String>,
    pub name: String,
}

impl MailboxPath {
    pub const PRIVATE_NAMESPACE: &'static str = "#private";

    pub fn new(
        namespace: impl Into<String>,
        user: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        MailboxPath {
            namespace: namespace.into(),
            user,
            name: name.into(),
        }
    }

    /// A mailbox in the private namespace of `user`.
    pub fn for_user(user: &str, name: &str) -> Self {
        MailboxPath::new(
            MailboxPath::PRIVATE_NAMESPACE,
            Some(user.to_owned()),
            name,
        )
    }

    pub fn inbox(user: &str) -> Self {
        MailboxPath::for_user(user, "INBOX")
    }

    /// Whether `other` lives in the same namespace and belongs to the same
    /// user as `self`.
    pub fn same_owner(&self, other: &MailboxPath) -> bool {
        self.namespace == other.namespace && self.user == other.user
    }
}

impl fmt::Display for MailboxPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.namespace,
            self.user.as_deref().unwrap_or(""),
            self.name
        )
    }
}

/// A mailbox as known to the directory.
///
/// The message store only ever reads the id, path, UID validity and
/// writability; everything else about mailbox hierarchy is the directory's
/// business.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mailbox {
    id: Option<MailboxId>,
    pub path: MailboxPath,
    pub uid_validity: u32,
    pub read_only: bool,
}

impl Mailbox {
    /// Create an unsaved mailbox with a random, non-zero UID validity.
    pub fn new(path: MailboxPath) -> Self {
        let uid_validity = NonZeroU32::new(rand::random::<u32>())
            .map_or(1, NonZeroU32::get);
        Mailbox::with_uid_validity(path, uid_validity)
    }

    pub fn with_uid_validity(path: MailboxPath, uid_validity: u32) -> Self {
        Mailbox {
            id: None,
            path,
            uid_validity,
            read_only: false,
        }
    }

    /// The directory-assigned id, or `UnsavedMailbox` if this mailbox was
    /// never saved.
    pub fn id(&self) -> Result<MailboxId, Error> {
        self.id.ok_or(Error::UnsavedMailbox)
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    pub(crate) fn set_id(&mut self, id: MailboxId) {
        self.id = Some(id);
    }

    pub fn require_writable(&self) -> Result<(), Error> {
        if self.read_only {
            Err(Error::MailboxReadOnly)
        } else {
            Ok(())
        }
    }
}

bitflags! {
    /// The system flags of a message.
    ///
    /// `RECENT` is session state maintained by the store and `USER` is a
    /// marker meaning "keywords are present/permitted"; neither is ever
    /// stored as a keyword string.
    #[derive(Default)]
    pub struct SystemFlags: u32 {
        const ANSWERED = 1 << 0;
        const DELETED = 1 << 1;
        const DRAFT = 1 << 2;
        const FLAGGED = 1 << 3;
        const RECENT = 1 << 4;
        const SEEN = 1 << 5;
        const USER = 1 << 6;
    }
}

/// A single message flag.
///
/// The `Display` format of this type is the exact string that is sent over
/// the wire. `FromStr` does the reverse conversion, and also understands
/// non-standard casing of the system flags.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Recent,
    Seen,
    User,
    Keyword(String),
}

impl Flag {
    fn system(&self) -> Option<SystemFlags> {
        match *self {
            Flag::Answered => Some(SystemFlags::ANSWERED),
            Flag::Deleted => Some(SystemFlags::DELETED),
            Flag::Draft => Some(SystemFlags::DRAFT),
            Flag::Flagged => Some(SystemFlags::FLAGGED),
            Flag::Recent => Some(SystemFlags::RECENT),
            Flag::Seen => Some(SystemFlags::SEEN),
            Flag::User => Some(SystemFlags::USER),
            Flag::Keyword(_) => None,
        }
    }

    fn all_system() -> [(SystemFlags, Flag); 7] {
        [
            (SystemFlags::ANSWERED, Flag::Answered),
            (SystemFlags::DELETED, Flag::Deleted),
            (SystemFlags::DRAFT, Flag::Draft),
            (SystemFlags::FLAGGED, Flag::Flagged),
            (SystemFlags::RECENT, Flag::Recent),
            (SystemFlags::SEEN, Flag::Seen),
            (SystemFlags::USER, Flag::User),
        ]
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Recent => write!(f, "\\Recent"),
            Flag::Seen => write!(f, "\\Seen"),
            Flag::User => write!(f, "\\*"),
            Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\recent") {
            Ok(Flag::Recent)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if s == "\\*" {
            Ok(Flag::User)
        } else if s.starts_with('\\') {
            Err(Error::NxFlag)
        } else if is_valid_keyword(s) {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(Error::UnsafeName)
        }
    }
}

/// A set of flags: system flags plus arbitrary keywords.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Flags {
    system: SystemFlags,
    keywords: BTreeSet<String>,
}

impl Flags {
    pub fn new() -> Self {
        Flags::default()
    }

    pub fn from_system(system: SystemFlags) -> Self {
        Flags {
            system,
            keywords: BTreeSet::new(),
        }
    }

    pub fn system(&self) -> SystemFlags {
        self.system
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> + '_ {
        self.keywords.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.keywords.is_empty()
    }

    pub fn contains(&self, flag: &Flag) -> bool {
        match (flag.system(), flag) {
            (Some(sys), _) => self.system.contains(sys),
            (None, &Flag::Keyword(ref kw)) => self.keywords.contains(kw),
            (None, _) => false,
        }
    }

    pub fn contains_system(&self, system: SystemFlags) -> bool {
        self.system.contains(system)
    }

    /// Add `flag`, returning whether it was absent before.
    pub fn insert(&mut self, flag: Flag) -> bool {
        match (flag.system(), flag) {
            (Some(sys), _) => {
                let was = self.system.contains(sys);
                self.system.insert(sys);
                !was
            }
            (None, Flag::Keyword(kw)) => self.keywords.insert(kw),
            (None, _) => false,
        }
    }

    /// Remove `flag`, returning whether it was present before.
    pub fn remove(&mut self, flag: &Flag) -> bool {
        match (flag.system(), flag) {
            (Some(sys), _) => {
                let was = self.system.contains(sys);
                self.system.remove(sys);
                was
            }
            (None, &Flag::Keyword(ref kw)) => self.keywords.remove(kw),
            (None, _) => false,
        }
    }

    pub fn insert_system(&mut self, system: SystemFlags) {
        self.system.insert(system);
    }

    pub fn remove_system(&mut self, system: SystemFlags) {
        self.system.remove(system);
    }

    /// Add every flag of `other` to `self` in place.
    pub fn union_with(&mut self, other: &Flags) {
        self.system |= other.system;
        for keyword in &other.keywords {
            if !self.keywords.contains(keyword) {
                self.keywords.insert(keyword.clone());
            }
        }
    }

    pub fn union(&self, other: &Flags) -> Flags {
        Flags {
            system: self.system | other.system,
            keywords: self.keywords.union(&other.keywords).cloned().collect(),
        }
    }

    pub fn difference(&self, other: &Flags) -> Flags {
        Flags {
            system: self.system - other.system,
            keywords: self
                .keywords
                .difference(&other.keywords)
                .cloned()
                .collect(),
        }
    }

    pub fn with(mut self, flag: Flag) -> Self {
        self.insert(flag);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = Flag> + '_ {
        let system = self.system;
        Flag::all_system()
            .to_vec()
            .into_iter()
            .filter(move |&(bit, _)| system.contains(bit))
            .map(|(_, flag)| flag)
            .chain(self.keywords.iter().cloned().map(Flag::Keyword))
    }
}

impl From<SystemFlags> for Flags {
    fn from(system: SystemFlags) -> Self {
        Flags::from_system(system)
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        let mut flags = Flags::new();
        flags.extend(iter);
        flags
    }
}

impl Extend<Flag> for Flags {
    fn extend<I: IntoIterator<Item = Flag>>(&mut self, iter: I) {
        for flag in iter {
            self.insert(flag);
        }
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (ix, flag) in self.iter().enumerate() {
            if ix > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", flag)?;
        }
        write!(f, ")")
    }
}

/// Selects a subset of a mailbox's messages by UID.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRange {
    One(Uid),
    /// Both ends inclusive. A range whose start is after its end selects
    /// nothing.
    Range(Uid, Uid),
    From(Uid),
    All,
}

impl MessageRange {
    pub fn range(start: Uid, end: Uid) -> Self {
        if start == end {
            MessageRange::One(start)
        } else {
            MessageRange::Range(start, end)
        }
    }

    pub fn contains(&self, uid: Uid) -> bool {
        match *self {
            MessageRange::One(u) => u == uid,
            MessageRange::Range(start, end) => start <= uid && uid <= end,
            MessageRange::From(start) => start <= uid,
            MessageRange::All => true,
        }
    }

    /// The bounds to hand to an ordered map, or `None` if the range is empty.
    pub(crate) fn bounds(&self) -> Option<(Bound<Uid>, Bound<Uid>)> {
        match *self {
            MessageRange::One(u) => Some((Included(u), Included(u))),
            MessageRange::Range(start, end) if start <= end => {
                Some((Included(start), Included(end)))
            }
            MessageRange::Range(..) => None,
            MessageRange::From(start) => Some((Included(start), Unbounded)),
            MessageRange::All => Some((Unbounded, Unbounded)),
        }
    }
}

/// How much of each message a fetch materialises.
///
/// Each level includes everything the previous one does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FetchType {
    Metadata,
    Headers,
    Body,
    Full,
}

/// An arbitrary MIME-derived property attached to a message.
///
/// Properties are ordered and the same key may occur more than once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub namespace: String,
    pub local_name: String,
    pub value: String,
}

impl Property {
    pub fn new(
        namespace: impl Into<String>,
        local_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Property {
            namespace: namespace.into(),
            local_name: local_name.into(),
            value: value.into(),
        }
    }
}

/// The immutable payload of a message.
///
/// It is shared between a message and all of its copies.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageContent {
    pub internal_date: DateTime<Utc>,
    /// Offset of the first octet of the body; everything before is the
    /// header block.
    pub body_start_octet: usize,
    pub media_type: Option<String>,
    pub sub_type: Option<String>,
    pub textual_line_count: Option<u64>,
    pub properties: Vec<Property>,
    pub content: Vec<u8>,
    pub attachment_ids: Vec<AttachmentId>,
}

impl MessageContent {
    pub fn new(
        internal_date: DateTime<Utc>,
        body_start_octet: usize,
        content: Vec<u8>,
    ) -> Self {
        MessageContent {
            internal_date,
            body_start_octet,
            media_type: None,
            sub_type: None,
            textual_line_count: None,
            properties: Vec::new(),
            content,
            attachment_ids: Vec::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn header_bytes(&self) -> &[u8] {
        &self.content[..self.body_start_octet.min(self.content.len())]
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.content[self.body_start_octet.min(self.content.len())..]
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.content.is_empty() {
            return Err(Error::MalformedMessage("empty content".to_owned()));
        }

        if self.body_start_octet > self.content.len() {
            return Err(Error::MalformedMessage(format!(
                "body starts at {} but content is {} bytes",
                self.body_start_octet,
                self.content.len()
            )));
        }

        Ok(())
    }
}

/// A message about to be added to a mailbox.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub flags: Flags,
    pub content: MessageContent,
}

impl NewMessage {
    pub fn new(flags: Flags, content: MessageContent) -> Self {
        NewMessage { flags, content }
    }
}

/// A message as stored in, and read back from, a mailbox.
///
/// Which parts of the content are visible depends on the `FetchType` the
/// message was materialised with; the accessors return `None` for anything
/// the fetch did not ask for.
#[derive(Clone, Debug)]
pub struct MailboxMessage {
    mailbox_id: MailboxId,
    uid: Uid,
    mod_seq: Modseq,
    flags: Flags,
    content: Arc<MessageContent>,
    fetch_type: FetchType,
    attachments: Vec<Attachment>,
}

impl MailboxMessage {
    pub(crate) fn new(
        mailbox_id: MailboxId,
        uid: Uid,
        mod_seq: Modseq,
        flags: Flags,
        content: Arc<MessageContent>,
    ) -> Self {
        MailboxMessage {
            mailbox_id,
            uid,
            mod_seq,
            flags,
            content,
            fetch_type: FetchType::Full,
            attachments: Vec::new(),
        }
    }

    /// Produce an independent snapshot limited to `fetch_type`.
    pub(crate) fn materialise(&self, fetch_type: FetchType) -> Self {
        MailboxMessage {
            mailbox_id: self.mailbox_id,
            uid: self.uid,
            mod_seq: self.mod_seq,
            flags: self.flags.clone(),
            content: Arc::clone(&self.content),
            fetch_type,
            attachments: Vec::new(),
        }
    }

    pub(crate) fn set_attachments(&mut self, attachments: Vec<Attachment>) {
        self.attachments = attachments;
    }

    pub(crate) fn set_flags(&mut self, flags: Flags, mod_seq: Modseq) {
        self.flags = flags;
        self.mod_seq = mod_seq;
    }

    pub(crate) fn shared_content(&self) -> &Arc<MessageContent> {
        &self.content
    }

    pub fn mailbox_id(&self) -> MailboxId {
        self.mailbox_id
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn mod_seq(&self) -> Modseq {
        self.mod_seq
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn size(&self) -> u64 {
        self.content.size()
    }

    pub fn internal_date(&self) -> DateTime<Utc> {
        self.content.internal_date
    }

    pub fn fetch_type(&self) -> FetchType {
        self.fetch_type
    }

    fn fetched(&self, level: FetchType) -> Option<&MessageContent> {
        if self.fetch_type >= level {
            Some(&*self.content)
        } else {
            None
        }
    }

    pub fn header_content(&self) -> Option<&[u8]> {
        self.fetched(FetchType::Headers).map(MessageContent::header_bytes)
    }

    pub fn body_content(&self) -> Option<&[u8]> {
        self.fetched(FetchType::Body).map(MessageContent::body_bytes)
    }

    pub fn full_content(&self) -> Option<&[u8]> {
        self.fetched(FetchType::Body).map(|c| &c.content[..])
    }

    pub fn body_start_octet(&self) -> Option<usize> {
        self.fetched(FetchType::Headers).map(|c| c.body_start_octet)
    }

    pub fn properties(&self) -> Option<&[Property]> {
        self.fetched(FetchType::Body).map(|c| &c.properties[..])
    }

    pub fn media_type(&self) -> Option<&str> {
        self.fetched(FetchType::Body)
            .and_then(|c| c.media_type.as_deref())
    }

    pub fn sub_type(&self) -> Option<&str> {
        self.fetched(FetchType::Body).and_then(|c| c.sub_type.as_deref())
    }

    pub fn textual_line_count(&self) -> Option<u64> {
        self.fetched(FetchType::Body)
            .and_then(|c| c.textual_line_count)
    }

    pub fn attachment_ids(&self) -> &[AttachmentId] {
        &self.content.attachment_ids
    }

    pub fn attachments(&self) -> Option<&[Attachment]> {
        if FetchType::Full == self.fetch_type {
            Some(&self.attachments)
        } else {
            None
        }
    }

    pub fn metadata(&self) -> MessageMetaData {
        MessageMetaData {
            uid: self.uid,
            mod_seq: self.mod_seq,
            flags: self.flags.clone(),
            size: self.size(),
            internal_date: self.internal_date(),
        }
    }
}

/// What the store reports about a message it just added or removed.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageMetaData {
    pub uid: Uid,
    pub mod_seq: Modseq,
    pub flags: Flags,
    pub size: u64,
    pub internal_date: DateTime<Utc>,
}

/// The outcome of a flag update on a single message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdatedFlags {
    pub uid: Uid,
    pub mod_seq: Modseq,
    pub old_flags: Flags,
    pub new_flags: Flags,
}

impl UpdatedFlags {
    pub fn is_changed(&self) -> bool {
        self.old_flags != self.new_flags
    }

    pub fn is_modified_to_set(&self, flag: &Flag) -> bool {
        !self.old_flags.contains(flag) && self.new_flags.contains(flag)
    }

    pub fn is_modified_to_unset(&self, flag: &Flag) -> bool {
        self.old_flags.contains(flag) && !self.new_flags.contains(flag)
    }
}

/// Message and unseen counts read in one atomic step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub count: usize,
    pub unseen: usize,
}
