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

/// Determine whether the given name is "safe" to use as a mailbox name.
///
/// It excludes empty names, names that begin with characters that are special
/// in IMAP (`#` introduces a namespace, `.` would make the name look like a
/// hierarchy separator on its own) and anything containing the IMAP list
/// wildcards or control characters.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().next() != Some('.')
        && name.chars().next() != Some('#')
        && name.find('/').is_none()
        && name.find('\\').is_none()
        && name.find(|c| c < ' ' || c == '\x7F').is_none()
        && name.find(|c| c == '*' || c == '%').is_none()
}

/// Determine whether the given string can be used as a user-defined flag
/// keyword.
///
/// Keywords are IMAP atoms, so on top of the rules for safe names, none of
/// the atom-specials may appear and the backslash prefix is reserved for
/// system flags.
pub fn is_valid_keyword(keyword: &str) -> bool {
    is_safe_name(keyword)
        && keyword
            .find(|c: char| {
                c == ' '
                    || c == '('
                    || c == ')'
                    || c == '{'
                    || c == ']'
                    || c == '"'
            })
            .is_none()
}
