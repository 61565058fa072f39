// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use piix_chipset::hw::pci::{Bdf, INTxPinID};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub main: Main,

    #[serde(default)]
    pub chipset: ChipsetOpts,

    /// Guest I/O to replay, in order
    #[serde(default)]
    pub io: Vec<IoOp>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Main {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ChipsetOpts {
    /// Reset the chipset once the replay has finished
    ///
    /// Default: false
    #[serde(default)]
    pub reset_after: bool,

    /// Stop at the first port write whose side effects fail, rather than
    /// logging it and carrying on
    ///
    /// Default: false
    #[serde(default)]
    pub strict: bool,
}

#[derive(Copy, Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntxPin {
    A,
    B,
    C,
    D,
}
impl From<IntxPin> for INTxPinID {
    fn from(value: IntxPin) -> Self {
        match value {
            IntxPin::A => INTxPinID::IntA,
            IntxPin::B => INTxPinID::IntB,
            IntxPin::C => INTxPinID::IntC,
            IntxPin::D => INTxPinID::IntD,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum IoOp {
    /// Port read of `width` bytes, optionally checked against `expect`
    In { port: u16, width: u8, expect: Option<u32> },
    /// Port write of `width` bytes
    Out { port: u16, width: u8, value: u32 },
    /// Drive the INTx line of a PCI function
    Intx { bdf: String, pin: IntxPin, level: bool },
    /// Chipset reset
    Reset,
}

pub fn parse(path: &str) -> anyhow::Result<Config> {
    let file_data =
        std::fs::read(path).context("Failed to read given config.toml")?;
    parse_str(
        std::str::from_utf8(&file_data)
            .context("config should be valid utf-8")?,
    )
}

pub fn parse_str(data: &str) -> anyhow::Result<Config> {
    let config = toml::from_str::<Config>(data)?;
    for (idx, op) in config.io.iter().enumerate() {
        if let IoOp::Intx { bdf, .. } = op {
            bdf.parse::<Bdf>()
                .with_context(|| format!("io[{idx}]: bad intx bdf"))?;
        }
    }
    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_script() {
        let config = parse_str(
            r#"
            [main]
            name = "replay"

            [chipset]
            reset_after = true

            [[io]]
            op = "out"
            port = 0xcf8
            width = 4
            value = 0x80000860

            [[io]]
            op = "in"
            port = 0xcfd
            width = 1
            expect = 0x80

            [[io]]
            op = "intx"
            bdf = "0.3.0"
            pin = "B"
            level = true

            [[io]]
            op = "reset"
            "#,
        )
        .unwrap();

        assert_eq!(config.main.name, "replay");
        assert!(config.chipset.reset_after);
        assert!(!config.chipset.strict);
        assert_eq!(
            config.io,
            vec![
                IoOp::Out { port: 0xcf8, width: 4, value: 0x8000_0860 },
                IoOp::In { port: 0xcfd, width: 1, expect: Some(0x80) },
                IoOp::Intx {
                    bdf: "0.3.0".to_string(),
                    pin: IntxPin::B,
                    level: true
                },
                IoOp::Reset,
            ]
        );
    }

    #[test]
    fn defaults() {
        let config = parse_str("[main]\nname = \"bare\"\n").unwrap();
        assert!(!config.chipset.reset_after);
        assert!(config.io.is_empty());
    }

    #[test]
    fn rejects_bad_bdf() {
        let res = parse_str(
            r#"
            [main]
            name = "bad"

            [[io]]
            op = "intx"
            bdf = "0.40.0"
            pin = "A"
            level = true
            "#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn rejects_unknown_op() {
        let res = parse_str(
            r#"
            [main]
            name = "bad"

            [[io]]
            op = "mmio"
            "#,
        );
        assert!(res.is_err());
    }
}
