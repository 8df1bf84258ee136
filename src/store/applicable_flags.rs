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

/// The flags a client may see as applicable to a mailbox.
///
/// This is the union of every flag present on `messages`, except for the
/// session-scoped `\Recent` and the `\*` keyword marker, which are never
/// reported.
pub fn compute_applicable_flags<'a>(
    messages: impl IntoIterator<Item = &'a MailboxMessage>,
) -> Flags {
    let mut applicable = Flags::new();
    for message in messages {
        applicable.union_with(message.flags());
    }
    applicable.remove_system(SystemFlags::RECENT | SystemFlags::USER);
    applicable
}
