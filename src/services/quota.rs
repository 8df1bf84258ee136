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

//! Quota accounting.
//!
//! The message store only reports usage deltas; it never consults the limits.
//! Limits and usage are combined by `quota_usage` for whoever wants to
//! enforce or display them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::store::model::MailboxPath;
use crate::support::error::Error;
use crate::support::system_config::QuotaConfig;

/// The unit quotas are accounted against: one per user and namespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuotaRoot(String);

impl QuotaRoot {
    pub fn new(root: impl Into<String>) -> Self {
        QuotaRoot(root.into())
    }

    pub fn for_mailbox(path: &MailboxPath) -> Self {
        QuotaRoot(format!(
            "{}&{}",
            path.namespace,
            path.user.as_deref().unwrap_or("")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuotaRoot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracks current usage per quota root.
pub trait CurrentQuotaManager: Send + Sync {
    /// Both `count` and `size` must be strictly positive.
    fn increase(
        &self,
        root: &QuotaRoot,
        count: i64,
        size: i64,
    ) -> Result<(), Error>;

    /// Both `count` and `size` must be strictly positive.
    fn decrease(
        &self,
        root: &QuotaRoot,
        count: i64,
        size: i64,
    ) -> Result<(), Error>;

    fn current_message_count(&self, root: &QuotaRoot) -> Result<i64, Error>;
    fn current_storage(&self, root: &QuotaRoot) -> Result<i64, Error>;
}

#[derive(Debug, Default)]
struct Usage {
    count: AtomicI64,
    size: AtomicI64,
}

#[derive(Debug, Default)]
pub struct InMemoryCurrentQuotaManager {
    usage: Mutex<HashMap<QuotaRoot, Arc<Usage>>>,
}

impl InMemoryCurrentQuotaManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn usage(&self, root: &QuotaRoot) -> Arc<Usage> {
        Arc::clone(
            self.usage
                .lock()
                .unwrap()
                .entry(root.clone())
                .or_default(),
        )
    }

    fn apply(
        &self,
        root: &QuotaRoot,
        count: i64,
        size: i64,
        sign: i64,
    ) -> Result<(), Error> {
        if count <= 0 || size <= 0 {
            return Err(Error::NonPositiveQuotaDelta);
        }

        let usage = self.usage(root);
        usage.count.fetch_add(sign * count, Ordering::SeqCst);
        usage.size.fetch_add(sign * size, Ordering::SeqCst);
        Ok(())
    }
}

impl CurrentQuotaManager for InMemoryCurrentQuotaManager {
    fn increase(
        &self,
        root: &QuotaRoot,
        count: i64,
        size: i64,
    ) -> Result<(), Error> {
        self.apply(root, count, size, 1)
    }

    fn decrease(
        &self,
        root: &QuotaRoot,
        count: i64,
        size: i64,
    ) -> Result<(), Error> {
        self.apply(root, count, size, -1)
    }

    fn current_message_count(&self, root: &QuotaRoot) -> Result<i64, Error> {
        Ok(self.usage(root).count.load(Ordering::SeqCst))
    }

    fn current_storage(&self, root: &QuotaRoot) -> Result<i64, Error> {
        Ok(self.usage(root).size.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaLimit {
    Unlimited,
    Limited(u64),
}

impl QuotaLimit {
    pub fn is_exceeded_by(self, used: i64) -> bool {
        match self {
            QuotaLimit::Unlimited => false,
            QuotaLimit::Limited(max) => used > 0 && used as u64 > max,
        }
    }
}

/// Holds the configured limits per quota root.
///
/// A root without its own limit falls back to the default, and without a
/// default it is unlimited.
pub trait MaxQuotaManager: Send + Sync {
    fn set_max_message(
        &self,
        root: &QuotaRoot,
        limit: QuotaLimit,
    ) -> Result<(), Error>;
    fn set_max_storage(
        &self,
        root: &QuotaRoot,
        limit: QuotaLimit,
    ) -> Result<(), Error>;
    fn set_default_max_message(&self, limit: QuotaLimit) -> Result<(), Error>;
    fn set_default_max_storage(&self, limit: QuotaLimit) -> Result<(), Error>;

    fn max_message(&self, root: &QuotaRoot) -> Result<QuotaLimit, Error>;
    fn max_storage(&self, root: &QuotaRoot) -> Result<QuotaLimit, Error>;
    fn default_max_message(&self) -> Result<QuotaLimit, Error>;
    fn default_max_storage(&self) -> Result<QuotaLimit, Error>;
}

#[derive(Debug, Default)]
struct Limits {
    default_message: Option<QuotaLimit>,
    default_storage: Option<QuotaLimit>,
    message: HashMap<QuotaRoot, QuotaLimit>,
    storage: HashMap<QuotaRoot, QuotaLimit>,
}

#[derive(Debug, Default)]
pub struct InMemoryMaxQuotaManager {
    limits: RwLock<Limits>,
}

impl InMemoryMaxQuotaManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        InMemoryMaxQuotaManager {
            limits: RwLock::new(Limits {
                default_message: config
                    .default_max_messages
                    .map(QuotaLimit::Limited),
                default_storage: config
                    .default_max_storage
                    .map(QuotaLimit::Limited),
                ..Limits::default()
            }),
        }
    }
}

impl MaxQuotaManager for InMemoryMaxQuotaManager {
    fn set_max_message(
        &self,
        root: &QuotaRoot,
        limit: QuotaLimit,
    ) -> Result<(), Error> {
        self.limits
            .write()
            .unwrap()
            .message
            .insert(root.clone(), limit);
        Ok(())
    }

    fn set_max_storage(
        &self,
        root: &QuotaRoot,
        limit: QuotaLimit,
    ) -> Result<(), Error> {
        self.limits
            .write()
            .unwrap()
            .storage
            .insert(root.clone(), limit);
        Ok(())
    }

    fn set_default_max_message(&self, limit: QuotaLimit) -> Result<(), Error> {
        self.limits.write().unwrap().default_message = Some(limit);
        Ok(())
    }

    fn set_default_max_storage(&self, limit: QuotaLimit) -> Result<(), Error> {
        self.limits.write().unwrap().default_storage = Some(limit);
        Ok(())
    }

    fn max_message(&self, root: &QuotaRoot) -> Result<QuotaLimit, Error> {
        let limits = self.limits.read().unwrap();
        Ok(limits
            .message
            .get(root)
            .copied()
            .or(limits.default_message)
            .unwrap_or(QuotaLimit::Unlimited))
    }

    fn max_storage(&self, root: &QuotaRoot) -> Result<QuotaLimit, Error> {
        let limits = self.limits.read().unwrap();
        Ok(limits
            .storage
            .get(root)
            .copied()
            .or(limits.default_storage)
            .unwrap_or(QuotaLimit::Unlimited))
    }

    fn default_max_message(&self) -> Result<QuotaLimit, Error> {
        Ok(self
            .limits
            .read()
            .unwrap()
            .default_message
            .unwrap_or(QuotaLimit::Unlimited))
    }

    fn default_max_storage(&self) -> Result<QuotaLimit, Error> {
        Ok(self
            .limits
            .read()
            .unwrap()
            .default_storage
            .unwrap_or(QuotaLimit::Unlimited))
    }
}

/// Current usage of one quota root alongside its limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaUsage {
    pub message_count: i64,
    pub max_message: QuotaLimit,
    pub storage: i64,
    pub max_storage: QuotaLimit,
}

impl QuotaUsage {
    pub fn is_over_limit(&self) -> bool {
        self.max_message.is_exceeded_by(self.message_count)
            || self.max_storage.is_exceeded_by(self.storage)
    }
}

pub fn quota_usage(
    current: &dyn CurrentQuotaManager,
    max: &dyn MaxQuotaManager,
    root: &QuotaRoot,
) -> Result<QuotaUsage, Error> {
    Ok(QuotaUsage {
        message_count: current.current_message_count(root)?,
        max_message: max.max_message(root)?,
        storage: current.current_storage(root)?,
        max_storage: max.max_storage(root)?,
    })
}
