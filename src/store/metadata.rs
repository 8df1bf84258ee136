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

use crate::store::message_index::MessageIndex;
use crate::store::model::*;

/// Which counters a metadata request computes.
///
/// Counting is the expensive part of a status request, so callers only ask
/// for what they will report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchGroup {
    /// Neither message nor unseen counts.
    NoCount,
    /// The message count only.
    NoUnseen,
    /// The message count and the number of unseen messages.
    UnseenCount,
    /// The message count and the UID of the first unseen message.
    FirstUnseen,
}

/// A point-in-time summary of a mailbox, as needed to answer `SELECT`,
/// `EXAMINE` and `STATUS`.
#[derive(Clone, Debug, PartialEq)]
pub struct MailboxMetaData {
    /// The UIDs carrying `\Recent` at the time of the request, even if the
    /// request reset them.
    pub recent: Vec<Uid>,
    pub permanent_flags: Flags,
    pub uid_validity: u32,
    /// `None` once the UID space is exhausted.
    pub uid_next: Option<Uid>,
    pub highest_modseq: Modseq,
    pub message_count: Option<usize>,
    pub unseen_count: Option<usize>,
    pub first_unseen: Option<Uid>,
    pub writable: bool,
    /// Whether MODSEQs survive a restart. Never true for an in-memory store.
    pub modseq_permanent: bool,
}

impl MailboxMetaData {
    /// Every system flag a client may store, plus the `\*` marker: keywords
    /// can be created freely.
    pub fn permanent_flags() -> Flags {
        Flags::from_system(SystemFlags::all() - SystemFlags::RECENT)
    }

    pub(crate) fn build(
        mailbox: &Mailbox,
        index: &MessageIndex,
        fetch_group: FetchGroup,
        recent: Vec<Uid>,
        last_uid: Option<Uid>,
        highest_modseq: Modseq,
    ) -> Self {
        let message_count = match fetch_group {
            FetchGroup::NoCount => None,
            _ => Some(index.message_count()),
        };
        let unseen_count = match fetch_group {
            FetchGroup::UnseenCount => Some(index.unseen_count()),
            _ => None,
        };
        let first_unseen = match fetch_group {
            FetchGroup::FirstUnseen => index.first_unseen_uid(),
            _ => None,
        };

        MailboxMetaData {
            recent,
            permanent_flags: MailboxMetaData::permanent_flags(),
            uid_validity: mailbox.uid_validity,
            uid_next: last_uid.map_or(Some(Uid::MIN), Uid::next),
            highest_modseq,
            message_count,
            unseen_count,
            first_unseen,
            writable: !mailbox.read_only,
            modseq_permanent: false,
        }
    }
}
