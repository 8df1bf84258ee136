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

use crate::store::model::*;

/// How a requested flag set combines with the flags a message already has.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagsUpdateMode {
    /// `+FLAGS`: set every listed flag, keep everything else.
    Add,
    /// `-FLAGS`: clear every listed flag, keep everything else.
    Remove,
    /// `FLAGS`: the message ends up with exactly the listed flags.
    Replace,
}

/// Computes the new flags of a message from its current ones.
///
/// The calculation covers system flags and keywords alike, and is a pure
/// function of its inputs.
#[derive(Clone, Debug)]
pub struct FlagsUpdateCalculator {
    provided: Flags,
    mode: FlagsUpdateMode,
}

impl FlagsUpdateCalculator {
    pub fn new(provided: Flags, mode: FlagsUpdateMode) -> Self {
        FlagsUpdateCalculator { provided, mode }
    }

    pub fn provided(&self) -> &Flags {
        &self.provided
    }

    pub fn mode(&self) -> FlagsUpdateMode {
        self.mode
    }

    pub fn build_new_flags(&self, old: &Flags) -> Flags {
        match self.mode {
            FlagsUpdateMode::Add => old.union(&self.provided),
            FlagsUpdateMode::Remove => old.difference(&self.provided),
            FlagsUpdateMode::Replace => self.provided.clone(),
        }
    }
}
