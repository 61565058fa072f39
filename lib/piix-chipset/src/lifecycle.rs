// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::migrate::Migrator;

/// General trait for emulated devices in the chipset.
pub trait Lifecycle: Send + Sync + 'static {
    /// Unique name for devices for a given type
    ///
    /// Intended to be `const` once stabilized for trait functions.
    fn type_name(&self) -> &'static str;

    /// Directs this device to reset itself to the state it would have on a cold
    /// start.
    fn reset(&self) {}

    /// Return the Migrator object that will be used to export/import
    /// this device's state.
    ///
    /// By default, we return a simple impl that assumes the device
    /// has no state that needs to be exported/imported.
    fn migrate(&'_ self) -> Migrator<'_> {
        Migrator::Empty
    }
}
