// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Save and restore chipset device state as JSON, keyed by device name.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use slog::info;

use piix_chipset::migrate::{
    Migrator, PayloadOffer, PayloadOffers, PayloadOutputs,
};
use piix_chipset::Piix;

#[derive(Deserialize, Serialize)]
pub(crate) struct SnapshotDevice {
    pub name: String,
    pub payload: Vec<SnapshotDevicePayload>,
}
#[derive(Deserialize, Serialize)]
pub(crate) struct SnapshotDevicePayload {
    pub kind: String,
    pub version: u32,
    pub data: Vec<u8>,
}

pub(crate) fn export_devices(
    chipset: &Piix,
) -> anyhow::Result<Vec<SnapshotDevice>> {
    let mut device_states = Vec::new();
    for (name, dev) in chipset.devices() {
        let payload = match dev.migrate() {
            Migrator::Empty => continue,
            Migrator::Single(mech) => {
                let output = mech.export()?;
                vec![SnapshotDevicePayload {
                    kind: output.kind.to_owned(),
                    version: output.version,
                    data: serde_json::to_vec(&output.payload)?,
                }]
            }
            Migrator::Multi(mech) => {
                let mut outputs = PayloadOutputs::new();
                mech.export(&mut outputs)?;

                let mut payloads = Vec::new();
                for part in outputs {
                    payloads.push(SnapshotDevicePayload {
                        kind: part.kind.to_owned(),
                        version: part.version,
                        data: serde_json::to_vec(&part.payload)?,
                    });
                }
                payloads
            }
        };
        device_states.push(SnapshotDevice { name: name.to_owned(), payload });
    }
    Ok(device_states)
}

pub(crate) fn import_devices(
    chipset: &Piix,
    devices: Vec<SnapshotDevice>,
) -> anyhow::Result<()> {
    for snap_dev in devices {
        let name = snap_dev.name.as_str();
        let (_, dev) = chipset
            .devices()
            .into_iter()
            .find(|(dev_name, _)| *dev_name == name)
            .ok_or_else(|| {
                anyhow::anyhow!("unknown device in snapshot {}", name)
            })?;

        match dev.migrate() {
            Migrator::Empty => {
                anyhow::bail!("unexpected device state for {} in snapshot", name)
            }
            Migrator::Single(mech) => {
                if snap_dev.payload.len() != 1 {
                    anyhow::bail!(
                        "Unexpected payload count {}",
                        snap_dev.payload.len()
                    );
                }
                let payload = &snap_dev.payload[0];
                let mut deser_data =
                    serde_json::Deserializer::from_slice(&payload.data);
                let offer = PayloadOffer {
                    kind: &payload.kind,
                    version: payload.version,
                    payload: Box::new(<dyn erased_serde::Deserializer>::erase(
                        &mut deser_data,
                    )),
                };
                mech.import(offer).with_context(|| {
                    format!("Failed to restore device state for {}", name)
                })?;
            }
            Migrator::Multi(mech) => {
                let mut payload_desers: Vec<
                    serde_json::Deserializer<serde_json::de::SliceRead>,
                > = snap_dev
                    .payload
                    .iter()
                    .map(|p| serde_json::Deserializer::from_slice(&p.data))
                    .collect();
                let offer_iter = snap_dev
                    .payload
                    .iter()
                    .zip(payload_desers.iter_mut())
                    .map(|(meta, deser)| PayloadOffer {
                        kind: &meta.kind,
                        version: meta.version,
                        payload: Box::new(
                            <dyn erased_serde::Deserializer>::erase(deser),
                        ),
                    });

                let mut offer = PayloadOffers::new(offer_iter);
                mech.import(&mut offer).with_context(|| {
                    format!("Failed to restore device state for {}", name)
                })?;
                if !offer.is_consumed() {
                    anyhow::bail!("Device {} had remaining payload(s)", name);
                }
            }
        }
    }
    Ok(())
}

/// Write the state of every chipset device to `path`.
pub(crate) fn save(
    path: &str,
    chipset: &Piix,
    log: &slog::Logger,
) -> anyhow::Result<()> {
    info!(log, "saving chipset snapshot to {}", path);
    let devices = export_devices(chipset)?;
    let data = serde_json::to_vec(&devices)?;
    std::fs::write(path, data)
        .with_context(|| format!("Failed to write snapshot {}", path))
}

/// Load device state previously written by [save].
pub(crate) fn restore(
    path: &str,
    chipset: &Piix,
    log: &slog::Logger,
) -> anyhow::Result<()> {
    info!(log, "restoring chipset snapshot from {}", path);
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read snapshot {}", path))?;
    let devices: Vec<SnapshotDevice> = serde_json::from_slice(&data)
        .context("Failed to deserialize device state")?;
    import_devices(chipset, devices)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;

    use piix_chipset::hv::LogHypervisor;
    use piix_chipset::pio::PioBus;
    use slog::{Discard, Logger};

    fn chipset() -> (Piix, PioBus) {
        let log = Logger::root(Discard, slog::o!());
        let hv = Arc::new(LogHypervisor::new(log.clone()));
        let chipset = Piix::create(hv, log.clone()).unwrap();
        let pio = PioBus::new(log);
        chipset.attach(&pio).unwrap();
        (chipset, pio)
    }

    #[test]
    fn round_trip() {
        let (src, src_pio) = chipset();
        src_pio.handle_out(0xcf8, 4, 0x8000_0860).unwrap();
        src_pio.handle_out(0xcfc, 4, 0x8a0b_0a09).unwrap();

        let devices = export_devices(&src).unwrap();
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["i440FX", "PIIX3"]);
        let data = serde_json::to_vec(&devices).unwrap();

        let (dst, dst_pio) = chipset();
        import_devices(&dst, serde_json::from_slice(&data).unwrap()).unwrap();
        assert_eq!(dst.hb.cfg_addr(), 0x8000_0860);
        assert_eq!(dst.isa.link_routes(), [0x09, 0x0a, 0x0b, 0x8a]);
        assert_eq!(dst_pio.handle_in(0xcfc, 4).unwrap(), 0x8a0b_0a09);
    }

    #[test]
    fn unknown_device() {
        let (dst, _pio) = chipset();
        let devices = vec![SnapshotDevice {
            name: "PIIX4".to_string(),
            payload: Vec::new(),
        }];
        assert!(import_devices(&dst, devices).is_err());
    }

    #[test]
    fn leftover_payload() {
        let (src, _pio) = chipset();
        let mut devices = export_devices(&src).unwrap();
        let extra = SnapshotDevicePayload {
            kind: "extra".to_string(),
            version: 1,
            data: b"null".to_vec(),
        };
        // host bridge is exported first
        devices[0].payload.push(extra);

        let (dst, _pio) = chipset();
        assert!(import_devices(&dst, devices).is_err());
    }
}
