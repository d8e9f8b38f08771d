// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging shims, contingent on the `defmt` feature.
//!
//! Keep these off the clocking paths; they are for cold events like bus
//! resets and rejected commands.

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($args)*)
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($args)*)
    };
}
