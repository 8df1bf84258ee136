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

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::{Arc, RwLock};

use tiny_keccak::{Hasher, Sha3};

use crate::support::error::Error;

/// Identifies an attachment by its content.
///
/// The id is the lowercase hex SHA3-256 of the payload, so storing the same
/// bytes twice yields the same id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttachmentId(String);

impl AttachmentId {
    pub fn for_payload(bytes: &[u8]) -> Self {
        let mut sha3 = Sha3::v256();
        sha3.update(bytes);
        let mut hash = [0u8; 32];
        sha3.finalize(&mut hash);

        let mut id = String::with_capacity(2 * hash.len());
        for &b in &hash {
            let _ = write!(id, "{:02x}", b);
        }
        AttachmentId(id)
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        AttachmentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AttachmentId({})", self.0)
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    id: AttachmentId,
    content_type: String,
    bytes: Arc<[u8]>,
}

impl Attachment {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Attachment {
            id: AttachmentId::for_payload(&bytes),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn id(&self) -> &AttachmentId {
        &self.id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Content-addressed storage of message attachments.
pub trait AttachmentStore: Send + Sync {
    /// Fails with `NxAttachment` if nothing is stored under `id`.
    fn get_attachment(&self, id: &AttachmentId) -> Result<Attachment, Error>;

    /// Fetch every known attachment among `ids`; unknown ids are skipped.
    fn get_attachments(
        &self,
        ids: &[AttachmentId],
    ) -> Result<Vec<Attachment>, Error>;

    fn store_attachment(&self, attachment: Attachment) -> Result<(), Error>;

    fn store_attachments(
        &self,
        attachments: Vec<Attachment>,
    ) -> Result<(), Error> {
        for attachment in attachments {
            self.store_attachment(attachment)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAttachmentStore {
    attachments: RwLock<HashMap<AttachmentId, Attachment>>,
}

impl InMemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttachmentStore for InMemoryAttachmentStore {
    fn get_attachment(&self, id: &AttachmentId) -> Result<Attachment, Error> {
        self.attachments
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(Error::NxAttachment)
    }

    fn get_attachments(
        &self,
        ids: &[AttachmentId],
    ) -> Result<Vec<Attachment>, Error> {
        let attachments = self.attachments.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| attachments.get(id))
            .cloned()
            .collect())
    }

    fn store_attachment(&self, attachment: Attachment) -> Result<(), Error> {
        self.attachments
            .write()
            .unwrap()
            .insert(attachment.id().clone(), attachment);
        Ok(())
    }
}
