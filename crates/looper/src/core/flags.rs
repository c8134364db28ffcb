// Copyright 2024 Shingo OKAWA and a number of other contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! This module contains the implementation of `Flags` which represents the behaviours a `Looper`
//! is constructed with.

use std::{fmt, ops};

/// Represents a set of looper behaviours. This struct is created by combining the constants:
///
/// - Flags::AUTO_QUIT
/// - Flags::ASYNC
#[derive(Default, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Flags(u8);

const AUTO_QUIT: u8 = 0b0001;

const ASYNC: u8 = 0b0010;

impl Flags {
    /// Returns an empty `Flags` set.
    pub const NONE: Flags = Flags(0);

    /// Quit the looper once its queue has no pending entries.
    pub const AUTO_QUIT: Flags = Flags(AUTO_QUIT);

    /// Treat every posted entry as async, i.e., dispatch it to the looper's executor.
    pub const ASYNC: Flags = Flags(ASYNC);

    /// Adds together two `Flags`. This does the same thing as the `BitOr` implementation, but is a
    /// constant function.
    pub const fn add(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }

    /// Returns true if every flag of `other` is set in `self`.
    pub const fn contains(self, other: Flags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Returns true if the value includes the auto-quit behaviour.
    pub const fn is_auto_quit(self) -> bool {
        (self.0 & AUTO_QUIT) != 0
    }

    /// Returns true if the value includes the async-by-default behaviour.
    pub const fn is_async(self) -> bool {
        (self.0 & ASYNC) != 0
    }
}

impl ops::BitOr for Flags {
    type Output = Self;

    #[inline]
    fn bitor(self, other: Self) -> Self {
        self.add(other)
    }
}

impl ops::BitOrAssign for Flags {
    #[inline]
    fn bitor_assign(&mut self, other: Self) {
        self.0 = (*self | other).0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut is_flagged = false;
        if self.is_auto_quit() {
            write!(fmt, "AUTO_QUIT")?;
            is_flagged = true;
        }
        if self.is_async() {
            if is_flagged {
                write!(fmt, " | ")?;
            }
            write!(fmt, "ASYNC")?;
            is_flagged = true;
        }
        if !is_flagged {
            write!(fmt, "NONE")?;
        }
        Ok(())
    }
}
