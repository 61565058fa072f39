// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors encountered while trying to export/import device state.
#[derive(Debug, Error)]
pub enum MigrateStateError {
    /// Encountered an error trying to deserialize the device state during import.
    #[error("could not deserialize device state: {0}")]
    DeserializationFailed(String),

    /// The device could not produce its state for export.
    #[error("failed to export device state: {0}")]
    ExportFailed(String),

    /// The device failed to import the deserialized device state.
    #[error("failed to apply deserialized device state: {0}")]
    ImportFailed(String),

    /// State of kind/version suitable for import not found
    #[error("failed to find suitable import payload")]
    DataMissing,

    /// The kind and/or version of payload was not expected
    #[error("kind/version of payload not expected: {0} v{1}")]
    UnexpectedPayload(String, u32),
}

impl From<erased_serde::Error> for MigrateStateError {
    fn from(err: erased_serde::Error) -> Self {
        MigrateStateError::DeserializationFailed(err.to_string())
    }
}

/// Type representing the snapshot support (if any) for a given device.
pub enum Migrator<'a> {
    /// No device specific logic is needed
    Empty,

    /// Saved state for the device consists of a single payload.
    Single(&'a dyn MigrateSingle),

    /// Saved state for the device consists of multiple payloads, as is the
    /// case when a device carries state beyond its config space.
    Multi(&'a dyn MigrateMulti),
}

/// A device which can be saved and restored using a single typed payload.
pub trait MigrateSingle: Send + Sync + 'static {
    fn export(&self) -> Result<PayloadOutput, MigrateStateError>;
    fn import(&self, offer: PayloadOffer) -> Result<(), MigrateStateError>;
}

/// A device which can be saved and restored using multiple differently-typed
/// payloads.
pub trait MigrateMulti: Send + Sync {
    fn export(
        &self,
        output: &mut PayloadOutputs,
    ) -> Result<(), MigrateStateError>;
    fn import(
        &self,
        offer: &mut PayloadOffers,
    ) -> Result<(), MigrateStateError>;
}

/// Device state payload (of a given kind/version) offered to the import logic
/// for that device during a restore.
pub struct PayloadOffer<'a> {
    pub kind: &'a str,
    pub version: u32,
    pub payload: Box<dyn erased_serde::Deserializer<'a> + 'a>,
}
impl<'a> PayloadOffer<'a> {
    /// Attempt to parse the data in this payload if the offer matches the
    /// kind/version of a specified Schema
    pub fn parse<T: Schema<'a>>(&mut self) -> Result<T, MigrateStateError> {
        if !self.matches::<T>() {
            return Err(MigrateStateError::UnexpectedPayload(
                self.kind.into(),
                self.version,
            ));
        }
        let res = erased_serde::deserialize(&mut self.payload)?;
        Ok(res)
    }

    fn matches<'x, T: Schema<'x>>(&self) -> bool {
        let id = T::id();
        id.0 == self.kind && id.1 == self.version
    }
}

/// Collection of [`PayloadOffer`] instances, as provided to device state import
/// logic during a restore.
pub struct PayloadOffers<'a>(Vec<PayloadOffer<'a>>);
impl<'a> PayloadOffers<'a> {
    pub fn new(items: impl IntoIterator<Item = PayloadOffer<'a>>) -> Self {
        Self(Vec::from_iter(items))
    }

    /// Attempt to take a payload from the contained offers, provided that it
    /// matches the specified [`Schema`](trait@Schema).
    pub fn take<T: Schema<'a>>(&mut self) -> Result<T, MigrateStateError> {
        self.take_schema(T::id())
            .ok_or_else(|| MigrateStateError::DataMissing)?
            .parse()
    }

    /// Returns `true` if all of the payload offers been consumed via
    /// [`Self::take()`].
    pub fn is_consumed(&self) -> bool {
        self.0.is_empty()
    }

    fn take_schema(&mut self, id: SchemaId) -> Option<PayloadOffer<'a>> {
        let mut search = self.0.iter().enumerate().filter(|(_idx, offer)| {
            offer.kind == id.0 && offer.version == id.1
        });

        // Success if we find one, and only one, matching the criteria
        if let (Some((idx, _offer)), None) = (search.next(), search.next()) {
            return Some(self.0.remove(idx));
        }

        None
    }
}

/// Device state payload (of a given kind/version) output as part of the export
/// logic for that device.
///
/// Easiest to safely instantiate via the [`From`] trait implemented for
/// [`Schema`] to ensure that the kind/version matches the serialized payload.
pub struct PayloadOutput {
    pub kind: &'static str,
    pub version: u32,
    pub payload: Box<dyn erased_serde::Serialize>,
}

pub struct PayloadOutputs(Vec<PayloadOutput>);
impl PayloadOutputs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(
        &mut self,
        output: PayloadOutput,
    ) -> Result<(), MigrateStateError> {
        self.0.push(output);
        Ok(())
    }
}
impl Default for PayloadOutputs {
    fn default() -> Self {
        Self::new()
    }
}
impl IntoIterator for PayloadOutputs {
    type Item = PayloadOutput;
    type IntoIter = std::vec::IntoIter<PayloadOutput>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Combination of kind (`&str`) and version (u32) which identifies a specific
/// data schema for device state.
pub type SchemaId = (&'static str, u32);

/// Define the type (kind) and version for a saved-state data structure.
pub trait Schema<'de>: Serialize + Deserialize<'de> + Sized + 'static {
    fn id() -> SchemaId;
}

impl<'a, T: Schema<'a>> From<T> for PayloadOutput {
    fn from(value: T) -> Self {
        let id = T::id();
        PayloadOutput { kind: id.0, version: id.1, payload: Box::new(value) }
    }
}
