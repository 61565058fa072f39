// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use slog::{error, info, o, warn, Drain};

use piix_chipset::hv::LogHypervisor;
use piix_chipset::hw::chipset::Chipset;
use piix_chipset::hw::pci::{Bdf, INTxPinID};
use piix_chipset::intr_pins::IntrPin;
use piix_chipset::pio::PioBus;
use piix_chipset::Piix;

mod config;
mod snapshot;

use config::{Config, IoOp};

fn build_log() -> (slog::Logger, slog_async::AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    (slog::Logger::root(drain.fuse(), o!()), guard)
}

/// Replays scripted guest I/O against an emulated chipset.
struct Replay<'a> {
    chipset: &'a Piix,
    pio: &'a PioBus,
    pins: BTreeMap<(Bdf, u8), Arc<dyn IntrPin>>,
    strict: bool,
    log: slog::Logger,
}
impl Replay<'_> {
    fn run(&mut self, ops: &[IoOp]) -> anyhow::Result<()> {
        for (idx, op) in ops.iter().enumerate() {
            self.step(op).with_context(|| format!("io[{idx}] {op:?}"))?;
        }
        Ok(())
    }

    fn step(&mut self, op: &IoOp) -> anyhow::Result<()> {
        match op {
            IoOp::Out { port, width, value } => {
                if let Err(e) = self.pio.handle_out(*port, *width, *value) {
                    if self.strict {
                        return Err(e.into());
                    }
                    warn!(self.log, "port write had errors";
                        "port" => port, "value" => value, "error" => %e);
                }
            }
            IoOp::In { port, width, expect } => {
                let val = self.pio.handle_in(*port, *width)?;
                info!(self.log, "port read";
                    "port" => port, "width" => width, "value" => val);
                if let Some(expect) = expect {
                    if val != *expect {
                        anyhow::bail!(
                            "read {:#x} from port {:#x}, expected {:#x}",
                            val,
                            port,
                            expect
                        );
                    }
                }
            }
            IoOp::Intx { bdf, pin, level } => {
                let bdf: Bdf = bdf.parse()?;
                let pin = INTxPinID::from(*pin);
                let chipset = self.chipset;
                let line = self
                    .pins
                    .entry((bdf, pin.line()))
                    .or_insert_with(|| chipset.intx_pin(bdf, pin));
                line.set_state(*level);
            }
            IoOp::Reset => {
                info!(self.log, "chipset reset");
                self.chipset.reset();
            }
        }
        Ok(())
    }
}

#[derive(clap::Parser)]
/// Replay guest configuration-space I/O against an i440FX/PIIX3 chipset.
struct Args {
    /// Chipset config and I/O script
    #[clap(value_name = "CONFIG", action)]
    config: String,

    /// Save device state to this file once the replay is done.
    #[clap(short, long, action)]
    snapshot: Option<String>,

    /// Restore device state from this file before replaying.
    #[clap(short, long, action)]
    restore: Option<String>,
}

fn run(args: Args, log: &slog::Logger) -> anyhow::Result<()> {
    let config: Config = config::parse(&args.config)?;
    let log = log.new(o!("name" => config.main.name.clone()));

    let hv = Arc::new(LogHypervisor::new(log.new(o!("component" => "hv"))));
    let chipset =
        Piix::create(hv, log.clone()).context("Failed to create chipset")?;
    let pio = PioBus::new(log.new(o!("component" => "pio")));
    chipset.attach(&pio).context("Failed to attach chipset ports")?;

    if let Some(path) = args.restore.as_deref() {
        snapshot::restore(path, &chipset, &log)?;
    }

    info!(log, "replaying {} I/O operations", config.io.len());
    let mut replay = Replay {
        chipset: &chipset,
        pio: &pio,
        pins: BTreeMap::new(),
        strict: config.chipset.strict,
        log: log.clone(),
    };
    replay.run(&config.io)?;

    if config.chipset.reset_after {
        chipset.reset();
    }
    if let Some(path) = args.snapshot.as_deref() {
        snapshot::save(path, &chipset, &log)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (log, _log_async_guard) = build_log();

    let res = run(args, &log);
    if let Err(e) = res.as_ref() {
        error!(log, "replay failed"; "error" => format!("{e:#}"));
    }
    res
}
