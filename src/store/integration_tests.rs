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

//! End-to-end tests of the message store against its in-memory
//! collaborators.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::prelude::*;
use proptest::prelude::*;
use rayon::prelude::*;

use crate::services::attachment::Attachment;
use crate::services::directory::InMemoryMailboxDirectory;
use crate::services::events::MailboxEvent;
use crate::services::quota::{CurrentQuotaManager, QuotaRoot};
use crate::store::flags_update::{FlagsUpdateCalculator, FlagsUpdateMode};
use crate::store::message_store::MessageStore;
use crate::store::metadata::FetchGroup;
use crate::store::model::*;
use crate::support::error::{Error, ErrorKind};
use crate::support::system_config::StoreConfig;

struct TestFixture {
    store: MessageStore,
    mailbox: Mailbox,
}

impl TestFixture {
    fn new() -> Self {
        TestFixture::with_config(StoreConfig::default())
    }

    fn with_config(config: StoreConfig) -> Self {
        crate::init_test_log();

        let store = MessageStore::new(
            config,
            Arc::new(InMemoryMailboxDirectory::new()),
        );
        store.log_prefix().set_label("user".to_owned());
        let mailbox = TestFixture::create_in(&store, "INBOX");
        TestFixture { store, mailbox }
    }

    fn create_in(store: &MessageStore, name: &str) -> Mailbox {
        let mut mailbox =
            Mailbox::with_uid_validity(MailboxPath::for_user("user", name), 42);
        store.register_mailbox(&mut mailbox).unwrap();
        mailbox
    }

    fn create(&self, name: &str) -> Mailbox {
        TestFixture::create_in(&self.store, name)
    }

    fn add(&self, flags: Flags) -> MessageMetaData {
        self.add_to(&self.mailbox, flags)
    }

    fn add_to(&self, mailbox: &Mailbox, flags: Flags) -> MessageMetaData {
        self.store
            .add(mailbox, NewMessage::new(flags, content("hello")))
            .unwrap()
    }

    fn uids(&self, mailbox: &Mailbox) -> Vec<u32> {
        self.store
            .find_in_mailbox(
                mailbox,
                MessageRange::All,
                FetchType::Metadata,
                None,
            )
            .unwrap()
            .into_iter()
            .map(|m| m.uid().raw())
            .collect()
    }

    fn get(&self, uid: Uid) -> MailboxMessage {
        self.store
            .find_message(&self.mailbox, uid, FetchType::Full)
            .unwrap()
    }

    fn update(
        &self,
        flags: Flags,
        mode: FlagsUpdateMode,
        range: MessageRange,
    ) -> Vec<UpdatedFlags> {
        self.store
            .update_flags(
                &self.mailbox,
                &FlagsUpdateCalculator::new(flags, mode),
                range,
            )
            .unwrap()
    }

    fn highest_modseq(&self) -> Modseq {
        self.store.get_highest_modseq(&self.mailbox).unwrap()
    }
}

fn content(body: &str) -> MessageContent {
    let header = "Subject: test\r\n\r\n";
    let mut content = MessageContent::new(
        Utc::now(),
        header.len(),
        format!("{}{}", header, body).into_bytes(),
    );
    content.media_type = Some("text".to_owned());
    content.sub_type = Some("plain".to_owned());
    content.textual_line_count = Some(1);
    content
}

fn seen() -> Flags {
    Flags::new().with(Flag::Seen)
}

#[test]
fn virgin_mailbox() {
    let fixture = TestFixture::new();
    let mb = &fixture.mailbox;
    assert_eq!(None, fixture.store.get_last_uid(mb).unwrap());
    assert_eq!(Modseq::PRIMORDIAL, fixture.highest_modseq());
    assert_eq!(0, fixture.store.count_messages_in_mailbox(mb).unwrap());
    assert!(fixture.uids(mb).is_empty());
    assert!(fixture.store.get_applicable_flag(mb).unwrap().is_empty());
    assert_eq!(None, fixture.store.find_first_unseen_message_uid(mb).unwrap());
}

#[test]
fn add_stamps_uid_and_modseq() {
    let fixture = TestFixture::new();
    let first = fixture.add(Flags::new());
    let second = fixture.add(Flags::new().with(Flag::Recent));

    assert_eq!(Uid::u(1), first.uid);
    assert_eq!(Modseq(1), first.mod_seq);
    assert_eq!(Uid::u(2), second.uid);
    assert_eq!(Modseq(2), second.mod_seq);
    assert_eq!(content("hello").size(), second.size);

    assert_eq!(
        Some(Uid::u(2)),
        fixture.store.get_last_uid(&fixture.mailbox).unwrap()
    );
    assert_eq!(Modseq(2), fixture.highest_modseq());
    // Append leaves \Recent alone
    assert_eq!(
        vec![Uid::u(2)],
        fixture
            .store
            .find_recent_message_uids_in_mailbox(&fixture.mailbox)
            .unwrap()
    );
}

#[test]
fn uids_are_never_reused() {
    let fixture = TestFixture::new();
    for _ in 0..3 {
        fixture.add(Flags::new());
    }
    let third = fixture.get(Uid::u(3));
    fixture.store.delete(&fixture.mailbox, &third).unwrap();

    assert_eq!(Uid::u(4), fixture.add(Flags::new()).uid);
    assert_eq!(vec![1, 2, 4], fixture.uids(&fixture.mailbox));
}

#[test]
fn expunge_removes_only_deleted_in_range() {
    let fixture = TestFixture::new();
    for _ in 0..5 {
        fixture.add(Flags::new());
    }
    let deleted = Flags::new().with(Flag::Deleted);
    fixture.update(
        deleted.clone(),
        FlagsUpdateMode::Replace,
        MessageRange::One(Uid::u(1)),
    );
    fixture.update(
        deleted,
        FlagsUpdateMode::Replace,
        MessageRange::One(Uid::u(4)),
    );

    let expunged = fixture
        .store
        .expunge_marked_for_deletion_in_mailbox(
            &fixture.mailbox,
            MessageRange::All,
        )
        .unwrap();
    assert_eq!(
        vec![Uid::u(1), Uid::u(4)],
        expunged.keys().copied().collect::<Vec<_>>()
    );
    assert!(expunged[&Uid::u(4)].flags.contains(&Flag::Deleted));

    assert_eq!(vec![2, 3, 5], fixture.uids(&fixture.mailbox));
    assert_eq!(
        3,
        fixture
            .store
            .count_messages_in_mailbox(&fixture.mailbox)
            .unwrap()
    );
}

#[test]
fn expunge_respects_range_and_tolerates_nothing_to_do() {
    let fixture = TestFixture::new();
    for _ in 0..4 {
        fixture.add(Flags::new().with(Flag::Deleted));
    }

    let before = fixture.highest_modseq();
    let none = fixture
        .store
        .expunge_marked_for_deletion_in_mailbox(
            &fixture.mailbox,
            MessageRange::From(Uid::u(10)),
        )
        .unwrap();
    assert!(none.is_empty());
    assert_eq!(before, fixture.highest_modseq());

    let some = fixture
        .store
        .expunge_marked_for_deletion_in_mailbox(
            &fixture.mailbox,
            MessageRange::Range(Uid::u(2), Uid::u(3)),
        )
        .unwrap();
    assert_eq!(2, some.len());
    assert!(before < fixture.highest_modseq());
    assert_eq!(vec![1, 4], fixture.uids(&fixture.mailbox));
}

#[test]
fn add_seen_to_answered() {
    let fixture = TestFixture::new();
    fixture.add(Flags::new().with(Flag::Answered));
    let previous = fixture.highest_modseq();

    let updated = fixture.update(
        seen(),
        FlagsUpdateMode::Add,
        MessageRange::One(Uid::u(1)),
    );
    assert_eq!(
        vec![UpdatedFlags {
            uid: Uid::u(1),
            mod_seq: Modseq(previous.raw() + 1),
            old_flags: Flags::new().with(Flag::Answered),
            new_flags: Flags::new().with(Flag::Answered).with(Flag::Seen),
        }],
        updated
    );
    assert!(updated[0].is_modified_to_set(&Flag::Seen));
    assert!(!updated[0].is_modified_to_unset(&Flag::Answered));
    assert_eq!(previous.next().unwrap(), fixture.highest_modseq());
    assert_eq!(fixture.highest_modseq(), fixture.get(Uid::u(1)).mod_seq());
}

#[test]
fn update_shares_one_modseq_and_reports_no_ops() {
    let fixture = TestFixture::new();
    fixture.add(seen());
    fixture.add(Flags::new());
    fixture.add(seen());

    let updated =
        fixture.update(seen(), FlagsUpdateMode::Add, MessageRange::All);
    assert_eq!(3, updated.len());
    assert_eq!(
        vec![Uid::u(1), Uid::u(2), Uid::u(3)],
        updated.iter().map(|u| u.uid).collect::<Vec<_>>()
    );
    let mod_seq = updated[0].mod_seq;
    assert!(updated.iter().all(|u| u.mod_seq == mod_seq));
    assert!(!updated[0].is_changed());
    assert!(updated[1].is_changed());
    assert_eq!(Modseq(4), mod_seq);
    assert_eq!(
        0,
        fixture
            .store
            .count_unseen_messages_in_mailbox(&fixture.mailbox)
            .unwrap()
    );
}

#[test]
fn update_of_nothing_is_empty_and_free() {
    let fixture = TestFixture::new();
    fixture.add(Flags::new());
    let before = fixture.highest_modseq();
    assert!(fixture
        .update(seen(), FlagsUpdateMode::Add, MessageRange::From(Uid::u(2)))
        .is_empty());
    assert_eq!(before, fixture.highest_modseq());
}

#[test]
fn replace_and_remove_keywords() {
    let fixture = TestFixture::new();
    fixture.add(
        Flags::new()
            .with(Flag::Keyword("a".to_owned()))
            .with(Flag::Keyword("b".to_owned())),
    );

    fixture.update(
        Flags::new().with(Flag::Keyword("a".to_owned())),
        FlagsUpdateMode::Remove,
        MessageRange::All,
    );
    assert_eq!(
        &Flags::new().with(Flag::Keyword("b".to_owned())),
        fixture.get(Uid::u(1)).flags()
    );

    fixture.update(
        Flags::new().with(Flag::Flagged),
        FlagsUpdateMode::Replace,
        MessageRange::All,
    );
    assert_eq!(
        &Flags::new().with(Flag::Flagged),
        fixture.get(Uid::u(1)).flags()
    );
}

#[test]
fn copy_marks_recent_and_leaves_source_alone() {
    let fixture = TestFixture::new();
    let other = fixture.create("Archive");
    fixture.add(Flags::new().with(Flag::Recent).with(Flag::Seen));
    fixture.add_to(&other, Flags::new());
    fixture.add(Flags::new().with(Flag::Flagged));

    let source = fixture.get(Uid::u(1));
    let into_other = fixture.store.copy(&other, &source).unwrap();
    assert_eq!(Uid::u(2), into_other.uid);
    assert!(into_other.flags.contains(&Flag::Recent));
    assert!(into_other.flags.contains(&Flag::Seen));

    let into_same = fixture.store.copy(&fixture.mailbox, &source).unwrap();
    assert_eq!(Uid::u(3), into_same.uid);
    assert!(into_same.flags.contains(&Flag::Recent));

    // A non-recent source still yields a recent copy
    let plain = fixture.get(Uid::u(2));
    let copied = fixture.store.copy(&other, &plain).unwrap();
    assert!(copied.flags.contains(&Flag::Recent));
    assert!(copied.flags.contains(&Flag::Flagged));
    assert!(!fixture.get(Uid::u(2)).flags().contains(&Flag::Recent));

    assert_eq!(source.flags(), fixture.get(Uid::u(1)).flags());
    let copy = fixture
        .store
        .find_message(&other, into_other.uid, FetchType::Body)
        .unwrap();
    assert_eq!(source.full_content(), copy.full_content());
    assert_eq!(other.id().unwrap(), copy.mailbox_id());
}

#[test]
fn copy_can_preserve_flags_verbatim() {
    let mut config = StoreConfig::default();
    config.store.copy_marks_recent = false;
    let fixture = TestFixture::with_config(config);
    fixture.add(seen());

    let source = fixture.get(Uid::u(1));
    let copied = fixture.store.copy(&fixture.mailbox, &source).unwrap();
    assert_eq!(seen(), copied.flags);
}

#[test]
fn delete_is_idempotent() {
    let fixture = TestFixture::new();
    fixture.add(Flags::new());
    fixture.add(Flags::new());
    let first = fixture.get(Uid::u(1));

    fixture.store.delete(&fixture.mailbox, &first).unwrap();
    let modseq = fixture.highest_modseq();
    fixture.store.delete(&fixture.mailbox, &first).unwrap();

    assert_eq!(modseq, fixture.highest_modseq());
    assert_eq!(vec![2], fixture.uids(&fixture.mailbox));
    assert_eq!(
        1,
        fixture
            .store
            .count_messages_in_mailbox(&fixture.mailbox)
            .unwrap()
    );
}

#[test]
fn delete_ignores_messages_of_other_mailboxes() {
    let fixture = TestFixture::new();
    let other = fixture.create("Other");
    fixture.add(Flags::new());
    fixture.add_to(&other, Flags::new());

    let foreign = fixture
        .store
        .find_message(&other, Uid::u(1), FetchType::Metadata)
        .unwrap();
    fixture.store.delete(&fixture.mailbox, &foreign).unwrap();
    assert_eq!(vec![1], fixture.uids(&fixture.mailbox));
}

#[test]
fn find_limits_and_fetch_types() {
    let fixture = TestFixture::new();
    for _ in 0..5 {
        fixture.add(Flags::new());
    }

    let limited = fixture
        .store
        .find_in_mailbox(
            &fixture.mailbox,
            MessageRange::From(Uid::u(2)),
            FetchType::Headers,
            Some(2),
        )
        .unwrap();
    assert_eq!(
        vec![Uid::u(2), Uid::u(3)],
        limited.iter().map(MailboxMessage::uid).collect::<Vec<_>>()
    );
    assert_eq!(
        Some(&b"Subject: test\r\n\r\n"[..]),
        limited[0].header_content()
    );
    assert_eq!(None, limited[0].body_content());

    let body = fixture
        .store
        .find_message(&fixture.mailbox, Uid::u(5), FetchType::Body)
        .unwrap();
    assert_eq!(Some(&b"hello"[..]), body.body_content());
    assert_eq!(Some("text"), body.media_type());
    assert_eq!(Some("plain"), body.sub_type());
    assert_eq!(Some(1), body.textual_line_count());

    assert!(fixture
        .store
        .find_in_mailbox(
            &fixture.mailbox,
            MessageRange::Range(Uid::u(4), Uid::u(2)),
            FetchType::Metadata,
            None,
        )
        .unwrap()
        .is_empty());
}

#[test]
fn find_message_requires_a_match() {
    let fixture = TestFixture::new();
    let err = fixture
        .store
        .find_message(&fixture.mailbox, Uid::u(1), FetchType::Metadata)
        .unwrap_err();
    assert_matches!(Error::NxMessage, err);
    assert_eq!(ErrorKind::NotFound, err.kind());
}

#[test]
fn properties_survive_storage() {
    let fixture = TestFixture::new();
    let mut content = content("body");
    content.properties = vec![
        Property::new("ns", "charset", "utf-8"),
        Property::new("ns", "charset", "us-ascii"),
        Property::new("ns", "boundary", "x"),
    ];
    fixture
        .store
        .add(&fixture.mailbox, NewMessage::new(Flags::new(), content.clone()))
        .unwrap();

    let message = fixture.get(Uid::u(1));
    assert_eq!(Some(&content.properties[..]), message.properties());
}

#[test]
fn full_fetch_resolves_attachments() {
    let fixture = TestFixture::new();
    let stored = Attachment::new(b"%PDF".to_vec(), "application/pdf");
    fixture
        .store
        .attachments()
        .store_attachment(stored.clone())
        .unwrap();

    let mut content = content("see attached");
    content.attachment_ids = vec![
        stored.id().clone(),
        Attachment::new(b"lost".to_vec(), "text/plain").id().clone(),
    ];
    fixture
        .store
        .add(&fixture.mailbox, NewMessage::new(Flags::new(), content))
        .unwrap();

    let full = fixture.get(Uid::u(1));
    assert_eq!(Some(&[stored][..]), full.attachments());
    assert_eq!(2, full.attachment_ids().len());

    let body = fixture
        .store
        .find_message(&fixture.mailbox, Uid::u(1), FetchType::Body)
        .unwrap();
    assert_eq!(None, body.attachments());
}

#[test]
fn malformed_messages_are_rejected() {
    let fixture = TestFixture::new();
    let empty = MessageContent::new(Utc::now(), 0, Vec::new());
    let err = fixture
        .store
        .add(&fixture.mailbox, NewMessage::new(Flags::new(), empty))
        .unwrap_err();
    assert_eq!(ErrorKind::InvalidArgument, err.kind());

    let overrun = MessageContent::new(Utc::now(), 50, b"short".to_vec());
    assert_matches!(
        Err(Error::MalformedMessage(..)),
        fixture
            .store
            .add(&fixture.mailbox, NewMessage::new(Flags::new(), overrun))
    );

    // Nothing was allocated for the rejected messages
    assert_eq!(None, fixture.store.get_last_uid(&fixture.mailbox).unwrap());
}

#[test]
fn unresolvable_mailboxes() {
    let fixture = TestFixture::new();
    let unsaved = Mailbox::new(MailboxPath::for_user("user", "Nowhere"));
    assert_matches!(
        Err(Error::UnsavedMailbox),
        fixture.store.count_messages_in_mailbox(&unsaved)
    );

    let gone = fixture.create("Gone");
    fixture.store.directory().delete(&gone).unwrap();
    let err = fixture.store.get_last_uid(&gone).unwrap_err();
    assert_eq!(ErrorKind::NotFound, err.kind());
    assert_matches!(
        Err(Error::NxMailbox(..)),
        fixture.store.add(&gone, NewMessage::new(Flags::new(), content("x")))
    );
}

#[test]
fn read_only_mailboxes_refuse_mutation() {
    let fixture = TestFixture::new();
    fixture.add(Flags::new().with(Flag::Recent));

    let mut mailbox = fixture.mailbox.clone();
    mailbox.read_only = true;
    fixture.store.directory().save(&mut mailbox).unwrap();

    assert_matches!(
        Err(Error::MailboxReadOnly),
        fixture
            .store
            .add(&mailbox, NewMessage::new(Flags::new(), content("x")))
    );
    assert_matches!(
        Err(Error::MailboxReadOnly),
        fixture.store.update_flags(
            &mailbox,
            &FlagsUpdateCalculator::new(seen(), FlagsUpdateMode::Add),
            MessageRange::All,
        )
    );

    let meta = fixture
        .store
        .get_meta_data(&mailbox, true, FetchGroup::NoCount)
        .unwrap();
    assert!(!meta.writable);
    assert_eq!(vec![Uid::u(1)], meta.recent);
    // Nothing was reset
    assert_eq!(
        vec![Uid::u(1)],
        fixture
            .store
            .find_recent_message_uids_in_mailbox(&mailbox)
            .unwrap()
    );
}

#[test]
fn applicable_flags_shrink_after_expunge() {
    let fixture = TestFixture::new();
    fixture.add(
        Flags::new()
            .with(Flag::Recent)
            .with(Flag::User)
            .with(Flag::Keyword("X".to_owned())),
    );
    fixture.add(Flags::new().with(Flag::Deleted).with(Flag::Draft));

    let applicable =
        fixture.store.get_applicable_flag(&fixture.mailbox).unwrap();
    assert!(applicable.contains(&Flag::Keyword("X".to_owned())));
    assert!(applicable.contains(&Flag::Draft));
    assert!(!applicable.contains(&Flag::Recent));
    assert!(!applicable.contains(&Flag::User));

    fixture
        .store
        .expunge_marked_for_deletion_in_mailbox(
            &fixture.mailbox,
            MessageRange::All,
        )
        .unwrap();
    let applicable =
        fixture.store.get_applicable_flag(&fixture.mailbox).unwrap();
    assert!(!applicable.contains(&Flag::Draft));
}

#[test]
fn counters_and_first_unseen() {
    let fixture = TestFixture::new();
    fixture.add(seen());
    fixture.add(Flags::new());
    fixture.add(Flags::new());

    assert_eq!(
        MessageCounts {
            count: 3,
            unseen: 2
        },
        fixture.store.get_mailbox_counters(&fixture.mailbox).unwrap()
    );
    assert_eq!(
        Some(Uid::u(2)),
        fixture
            .store
            .find_first_unseen_message_uid(&fixture.mailbox)
            .unwrap()
    );
}

#[test]
fn meta_data_resets_recent_atomically() {
    let fixture = TestFixture::new();
    fixture.add(Flags::new().with(Flag::Recent));
    fixture.add(seen());
    fixture.add(Flags::new().with(Flag::Recent));
    let before = fixture.highest_modseq();

    let meta = fixture
        .store
        .get_meta_data(&fixture.mailbox, true, FetchGroup::FirstUnseen)
        .unwrap();
    assert_eq!(vec![Uid::u(1), Uid::u(3)], meta.recent);
    assert_eq!(Some(3), meta.message_count);
    assert_eq!(Some(Uid::u(1)), meta.first_unseen);
    assert_eq!(Some(Uid::u(4)), meta.uid_next);
    assert_eq!(42, meta.uid_validity);
    assert_eq!(before.next(), Some(meta.highest_modseq));

    assert!(fixture
        .store
        .find_recent_message_uids_in_mailbox(&fixture.mailbox)
        .unwrap()
        .is_empty());
    // The message that was not recent kept its modseq
    assert_eq!(Modseq(2), fixture.get(Uid::u(2)).mod_seq());

    let again = fixture
        .store
        .get_meta_data(&fixture.mailbox, true, FetchGroup::UnseenCount)
        .unwrap();
    assert!(again.recent.is_empty());
    assert_eq!(Some(2), again.unseen_count);
    assert_eq!(meta.highest_modseq, again.highest_modseq);
}

#[test]
fn quota_follows_mutations() {
    let fixture = TestFixture::new();
    let root = QuotaRoot::for_mailbox(&fixture.mailbox.path);
    let size = content("hello").size() as i64;
    let quota = fixture.store.quota();

    fixture.add(Flags::new());
    fixture.add(Flags::new().with(Flag::Deleted));
    let source = fixture.get(Uid::u(1));
    fixture.store.copy(&fixture.mailbox, &source).unwrap();
    assert_eq!(3, quota.current_message_count(&root).unwrap());
    assert_eq!(3 * size, quota.current_storage(&root).unwrap());

    fixture
        .store
        .expunge_marked_for_deletion_in_mailbox(
            &fixture.mailbox,
            MessageRange::All,
        )
        .unwrap();
    fixture.store.delete(&fixture.mailbox, &source).unwrap();
    assert_eq!(1, quota.current_message_count(&root).unwrap());
    assert_eq!(size, quota.current_storage(&root).unwrap());
}

struct BrokenQuota;

impl CurrentQuotaManager for BrokenQuota {
    fn increase(&self, _: &QuotaRoot, _: i64, _: i64) -> Result<(), Error> {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "quota backend down",
        )))
    }

    fn decrease(&self, root: &QuotaRoot, c: i64, s: i64) -> Result<(), Error> {
        self.increase(root, c, s)
    }

    fn current_message_count(&self, _: &QuotaRoot) -> Result<i64, Error> {
        Ok(0)
    }

    fn current_storage(&self, _: &QuotaRoot) -> Result<i64, Error> {
        Ok(0)
    }
}

#[test]
fn quota_failures_do_not_unwind_mutations() {
    crate::init_test_log();
    let store = MessageStore::in_memory()
        .with_quota_manager(Arc::new(BrokenQuota));
    let mailbox = TestFixture::create_in(&store, "INBOX");

    let added = store
        .add(&mailbox, NewMessage::new(Flags::new(), content("x")))
        .unwrap();
    assert_eq!(1, store.count_messages_in_mailbox(&mailbox).unwrap());

    let message = store
        .find_message(&mailbox, added.uid, FetchType::Metadata)
        .unwrap();
    store.delete(&mailbox, &message).unwrap();
    assert_eq!(0, store.count_messages_in_mailbox(&mailbox).unwrap());
}

#[test]
fn disabled_quota_reports_nothing() {
    let mut config = StoreConfig::default();
    config.quota.enabled = false;
    let fixture = TestFixture::with_config(config);
    fixture.add(Flags::new());

    let root = QuotaRoot::for_mailbox(&fixture.mailbox.path);
    assert_eq!(
        0,
        fixture.store.quota().current_message_count(&root).unwrap()
    );
}

#[test]
fn events_follow_mutation_order() {
    let fixture = TestFixture::new();
    let events = fixture.store.events().subscribe();
    let id = fixture.mailbox.id().unwrap();

    fixture.add(Flags::new().with(Flag::Deleted));
    fixture.update(seen(), FlagsUpdateMode::Add, MessageRange::All);
    fixture
        .store
        .expunge_marked_for_deletion_in_mailbox(
            &fixture.mailbox,
            MessageRange::All,
        )
        .unwrap();
    let archive = fixture.create("Archive");
    fixture.store.purge_mailbox(&archive).unwrap();

    let received = events.try_iter().collect::<Vec<_>>();
    assert_eq!(5, received.len());
    match received[0] {
        MailboxEvent::Added { ref uids, .. } => {
            assert_eq!(
                vec![Uid::u(1)],
                uids.keys().copied().collect::<Vec<_>>()
            );
        }
        ref e => panic!("Unexpected event: {:?}", e),
    }
    match received[1] {
        MailboxEvent::FlagsUpdated { ref updated, .. } => {
            assert_eq!(1, updated.len());
            assert!(updated[0].is_modified_to_set(&Flag::Seen));
        }
        ref e => panic!("Unexpected event: {:?}", e),
    }
    assert_matches!(MailboxEvent::Expunged { .. }, &received[2]);
    assert_eq!(id, received[2].mailbox_id());
    assert_matches!(MailboxEvent::MailboxAdded { .. }, &received[3]);
    assert_matches!(MailboxEvent::MailboxDeleted { .. }, &received[4]);
    assert_eq!(archive.id().unwrap(), received[4].mailbox_id());
}

#[test]
fn disabled_events_are_not_dispatched() {
    let mut config = StoreConfig::default();
    config.events.enabled = false;
    let fixture = TestFixture::with_config(config);
    let events = fixture.store.events().subscribe();
    fixture.add(Flags::new());
    assert!(events.try_recv().is_err());
}

#[test]
fn purge_drops_messages_and_counters() {
    let fixture = TestFixture::new();
    let doomed = fixture.create("Doomed");
    fixture.add_to(&doomed, Flags::new());
    fixture.add_to(&doomed, Flags::new());
    fixture.add(Flags::new());

    let root = QuotaRoot::for_mailbox(&fixture.mailbox.path);
    assert_eq!(
        3,
        fixture.store.quota().current_message_count(&root).unwrap()
    );

    fixture.store.purge_mailbox(&doomed).unwrap();
    assert_eq!(
        1,
        fixture.store.quota().current_message_count(&root).unwrap()
    );
    assert_matches!(
        Err(Error::NxMailbox(..)),
        fixture.store.count_messages_in_mailbox(&doomed)
    );

    // A new mailbox at the same path starts with a fresh UID space
    let reborn = fixture.create("Doomed");
    assert_ne!(doomed.id().unwrap(), reborn.id().unwrap());
    assert_eq!(Uid::u(1), fixture.add_to(&reborn, Flags::new()).uid);
}

#[test]
fn purged_mailbox_cannot_be_reregistered() {
    let fixture = TestFixture::new();
    let doomed = fixture.create("Doomed");
    let first = fixture.add_to(&doomed, Flags::new());
    fixture.store.purge_mailbox(&doomed).unwrap();

    let mut stale = doomed.clone();
    assert_matches!(
        Err(Error::NxMailbox(..)),
        fixture.store.register_mailbox(&mut stale)
    );
    assert_matches!(
        Err(Error::NxMailbox(..)),
        fixture.store.add(&doomed, NewMessage::new(Flags::new(), content("x")))
    );

    let mut reborn = Mailbox::new(doomed.path.clone());
    fixture.store.register_mailbox(&mut reborn).unwrap();
    assert!(doomed.id().unwrap() < reborn.id().unwrap());
    // Only a new mailbox id starts a new UID space
    let second = fixture
        .store
        .add(&reborn, NewMessage::new(Flags::new(), content("y")))
        .unwrap();
    assert_eq!(first.uid, second.uid);
}

#[test]
fn directory_deletion_cascades_to_messages() {
    let fixture = TestFixture::new();
    let events = fixture.store.events().subscribe();
    let doomed = fixture.create("Doomed");
    fixture.add_to(&doomed, Flags::new());
    fixture.add_to(&doomed, Flags::new());
    fixture.add(Flags::new());

    fixture.store.directory().delete(&doomed).unwrap();
    assert_eq!(
        1,
        fixture
            .store
            .count_messages_in_mailbox(&fixture.mailbox)
            .unwrap()
    );

    let root = QuotaRoot::for_mailbox(&fixture.mailbox.path);
    assert_eq!(
        1,
        fixture.store.quota().current_message_count(&root).unwrap()
    );
    let deleted = events
        .try_iter()
        .filter(|e| match *e {
            MailboxEvent::MailboxDeleted { .. } => true,
            _ => false,
        })
        .map(|e| e.mailbox_id())
        .collect::<Vec<_>>();
    assert_eq!(vec![doomed.id().unwrap()], deleted);

    // The old messages never come back
    let mut stale = doomed.clone();
    assert_matches!(
        Err(Error::NxMailbox(..)),
        fixture.store.directory().save(&mut stale)
    );
    let reborn = fixture.create("Doomed");
    assert_eq!(0, fixture.store.count_messages_in_mailbox(&reborn).unwrap());

    fixture.store.directory().delete_all().unwrap();
    assert_matches!(
        Err(Error::NxMailbox(..)),
        fixture.store.count_messages_in_mailbox(&fixture.mailbox)
    );
    assert_eq!(
        0,
        fixture.store.quota().current_message_count(&root).unwrap()
    );
}

#[test]
fn purge_racing_with_adds() {
    let fixture = TestFixture::new();
    let events = fixture.store.events().subscribe();
    let doomed = fixture.create("Doomed");
    let doomed_id = doomed.id().unwrap();

    let added = (0..200)
        .into_par_iter()
        .map(|i| {
            if 100 == i {
                fixture.store.purge_mailbox(&doomed).unwrap();
                return 0;
            }

            match fixture
                .store
                .add(&doomed, NewMessage::new(Flags::new(), content("x")))
            {
                Ok(_) => 1,
                Err(Error::NxMailbox(..)) => 0,
                Err(e) => panic!("Unexpected error: {}", e),
            }
        })
        .sum::<usize>();

    // Whatever got in before the purge went out with it
    let root = QuotaRoot::for_mailbox(&doomed.path);
    assert_eq!(
        0,
        fixture.store.quota().current_message_count(&root).unwrap()
    );

    let received = events
        .try_iter()
        .filter(|e| e.mailbox_id() == doomed_id)
        .collect::<Vec<_>>();
    assert_matches!(
        Some(MailboxEvent::MailboxDeleted { .. }),
        received.last()
    );
    assert_eq!(
        added,
        received
            .iter()
            .filter(|e| match **e {
                MailboxEvent::Added { .. } => true,
                _ => false,
            })
            .count()
    );
    assert_matches!(
        Err(Error::NxMailbox(..)),
        fixture.store.get_last_uid(&doomed)
    );
}

#[test]
fn concurrent_adds_across_mailboxes() {
    let fixture = TestFixture::new();
    let other = fixture.create("Other");

    let uids = (0..400)
        .into_par_iter()
        .map(|i| {
            let mailbox = if i % 2 == 0 { &fixture.mailbox } else { &other };
            (i % 2, fixture.add_to(mailbox, Flags::new()).uid)
        })
        .collect::<Vec<_>>();

    for parity in 0..2 {
        let set = uids
            .iter()
            .filter(|&&(p, _)| p == parity)
            .map(|&(_, uid)| uid.raw())
            .collect::<BTreeSet<_>>();
        assert_eq!((1..=200).collect::<BTreeSet<_>>(), set);
    }

    assert_eq!(
        (1..=200).collect::<Vec<_>>(),
        fixture.uids(&fixture.mailbox)
    );
    assert_eq!(Modseq(200), fixture.store.get_highest_modseq(&other).unwrap());
}

#[test]
fn concurrent_flag_updates_stay_consistent() {
    let fixture = TestFixture::new();
    for _ in 0..50 {
        fixture.add(Flags::new());
    }

    let modseqs = (0..100u32)
        .into_par_iter()
        .map(|i| {
            let mode = if i % 2 == 0 {
                FlagsUpdateMode::Add
            } else {
                FlagsUpdateMode::Remove
            };
            let updated = fixture.update(
                seen(),
                mode,
                MessageRange::One(Uid::u(i % 50 + 1)),
            );
            assert_eq!(1, updated.len());
            updated[0].mod_seq
        })
        .collect::<BTreeSet<_>>();

    // Every call got its own modseq
    assert_eq!(100, modseqs.len());
    assert_eq!(Modseq(150), fixture.highest_modseq());

    let unseen = fixture
        .store
        .find_in_mailbox(
            &fixture.mailbox,
            MessageRange::All,
            FetchType::Metadata,
            None,
        )
        .unwrap()
        .iter()
        .filter(|m| !m.flags().contains(&Flag::Seen))
        .count();
    assert_eq!(
        unseen,
        fixture
            .store
            .count_unseen_messages_in_mailbox(&fixture.mailbox)
            .unwrap()
    );
}

#[derive(Clone, Debug)]
enum Op {
    Add(bool),
    Delete(u32),
    ToggleSeen(u32, bool),
    MarkDeleted(u32),
    Expunge,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::bool::ANY.prop_map(Op::Add),
        (1u32..30).prop_map(Op::Delete),
        (1u32..30, prop::bool::ANY).prop_map(|(u, s)| Op::ToggleSeen(u, s)),
        (1u32..30).prop_map(Op::MarkDeleted),
        Just(Op::Expunge),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn counts_match_contents(ops in prop::collection::vec(arb_op(), 1..60)) {
        let fixture = TestFixture::new();
        let mut last_uid = None;
        let mut last_modseq = Modseq::PRIMORDIAL;

        for op in ops {
            match op {
                Op::Add(is_seen) => {
                    let flags = if is_seen { seen() } else { Flags::new() };
                    let uid = fixture.add(flags).uid;
                    prop_assert!(last_uid.map_or(true, |l| l < uid));
                    last_uid = Some(uid);
                }
                Op::Delete(uid) => {
                    if let Ok(m) = fixture.store.find_message(
                        &fixture.mailbox, Uid::u(uid), FetchType::Metadata)
                    {
                        fixture.store.delete(&fixture.mailbox, &m).unwrap();
                    }
                }
                Op::ToggleSeen(uid, set) => {
                    let mode = if set {
                        FlagsUpdateMode::Add
                    } else {
                        FlagsUpdateMode::Remove
                    };
                    fixture.update(
                        seen(), mode, MessageRange::One(Uid::u(uid)));
                }
                Op::MarkDeleted(uid) => {
                    fixture.update(
                        Flags::new().with(Flag::Deleted),
                        FlagsUpdateMode::Add,
                        MessageRange::One(Uid::u(uid)));
                }
                Op::Expunge => {
                    fixture.store.expunge_marked_for_deletion_in_mailbox(
                        &fixture.mailbox, MessageRange::All).unwrap();
                }
            }

            let modseq = fixture.highest_modseq();
            prop_assert!(last_modseq <= modseq);
            last_modseq = modseq;

            let all = fixture.store.find_in_mailbox(
                &fixture.mailbox, MessageRange::All,
                FetchType::Metadata, None).unwrap();
            let counts = fixture.store
                .get_mailbox_counters(&fixture.mailbox).unwrap();
            prop_assert_eq!(all.len(), counts.count);
            prop_assert_eq!(
                all.iter().filter(|m| !m.flags().contains(&Flag::Seen)).count(),
                counts.unseen);
            prop_assert_eq!(
                all.iter().find(|m| !m.flags().contains(&Flag::Seen))
                    .map(MailboxMessage::uid),
                fixture.store
                    .find_first_unseen_message_uid(&fixture.mailbox).unwrap());
        }
    }
}
