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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Mailbox not found: {0}")]
    NxMailbox(String),
    #[error("Message not found")]
    NxMessage,
    #[error("Attachment not found")]
    NxAttachment,
    #[error("Mailbox has not been saved to the directory")]
    UnsavedMailbox,
    #[error("Mailbox already exists")]
    MailboxExists,
    #[error("Mailbox is read-only")]
    MailboxReadOnly,
    #[error("Mailbox full")]
    MailboxFull,
    #[error("UID {0} is already present in the mailbox")]
    UidCollision(u32),
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Quota deltas must be strictly positive")]
    NonPositiveQuotaDelta,
    #[error("Invalid mailbox pattern")]
    InvalidPattern(#[from] regex::Error),
    #[error("Unsafe keyword or mailbox name")]
    UnsafeName,
    #[error("Non-existent system flag")]
    NxFlag,
    #[error("Internal invariant violated: {0}")]
    ConcurrencyViolation(String),
    #[error("Event listener disconnected")]
    ListenerGone,
    #[error("Failed to initialise logging: {0}")]
    Logging(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// The coarse classification callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The mailbox, message or attachment does not exist.
    NotFound,
    /// The caller passed something the store refuses to accept.
    InvalidArgument,
    /// An internal invariant broke; the operation was abandoned.
    ConcurrencyViolation,
    /// The environment (I/O, configuration, capacity) failed.
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match *self {
            Error::NxMailbox(..) | Error::NxMessage | Error::NxAttachment => {
                ErrorKind::NotFound
            }

            Error::UnsavedMailbox
            | Error::MailboxExists
            | Error::UidCollision(..)
            | Error::MalformedMessage(..)
            | Error::NonPositiveQuotaDelta
            | Error::InvalidPattern(..)
            | Error::UnsafeName
            | Error::NxFlag => ErrorKind::InvalidArgument,

            Error::ConcurrencyViolation(..) => {
                ErrorKind::ConcurrencyViolation
            }

            Error::MailboxReadOnly
            | Error::MailboxFull
            | Error::ListenerGone
            | Error::Logging(..)
            | Error::Io(..)
            | Error::Toml(..) => ErrorKind::Storage,
        }
    }
}
