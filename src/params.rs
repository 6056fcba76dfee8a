//! Network consensus parameters relevant to header verification.
use bitcoin::{hashes::Hash, BlockHash};
use primitive_types::U256;

use crate::{error::HeaderError, header::Header, pow::Target};

/// Networks this crate knows parameters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Production network.
    Mainnet,
    /// Public test network.
    Testnet,
    /// Local regression-test network.
    Regtest,
}

impl Network {
    /// Consensus parameters for this network.
    pub fn params(self) -> Params {
        match self {
            Network::Mainnet => Params {
                network: self,
                genesis: hash_from_display([
                    0xff, 0x9f, 0x1c, 0x01, 0x16, 0xd1, 0x9d, 0xe7, 0xc9, 0x96, 0x38, 0x45, 0xe1,
                    0x29, 0xf9, 0xed, 0x1b, 0xfc, 0x0b, 0x37, 0x6e, 0xb5, 0x4f, 0xd7, 0xaf, 0xa4,
                    0x2e, 0x0d, 0x41, 0x8c, 0x8b, 0xb6,
                ]),
                pow_limit: limit(0x1e, 0x0f_ffff),
                retarget_interval: 2016,
                moving_average_height: 450_000,
                moving_average_window: 24,
                pow_target_spacing: 90,
                no_retargeting: false,
                checkpoints: MAINNET_CHECKPOINTS,
            },
            Network::Testnet => Params {
                network: self,
                genesis: hash_from_display([
                    0xa2, 0xb1, 0x06, 0xce, 0xba, 0x3b, 0xe0, 0xc6, 0xd0, 0x97, 0xb2, 0xa6, 0xa6,
                    0xaa, 0xcf, 0x9d, 0x63, 0x8b, 0xa8, 0x25, 0x8a, 0xe4, 0x78, 0x15, 0x8f, 0x44,
                    0x9c, 0x32, 0x10, 0x61, 0xe0, 0xb2,
                ]),
                pow_limit: limit(0x1e, 0x0f_ffff),
                retarget_interval: 2016,
                moving_average_height: 1,
                moving_average_window: 24,
                pow_target_spacing: 90,
                // min-difficulty blocks make per-height targets meaningless here
                no_retargeting: true,
                checkpoints: &[],
            },
            Network::Regtest => Params {
                network: self,
                genesis: hash_from_display([
                    0x0f, 0x91, 0x88, 0xf1, 0x3c, 0xb7, 0xb2, 0xc7, 0x1f, 0x2a, 0x33, 0x5e, 0x3a,
                    0x4f, 0xc3, 0x28, 0xbf, 0x5b, 0xeb, 0x43, 0x60, 0x12, 0xaf, 0xca, 0x59, 0x0b,
                    0x1a, 0x11, 0x46, 0x6e, 0x22, 0x06,
                ]),
                pow_limit: limit(0x20, 0x7f_ffff),
                retarget_interval: 2016,
                moving_average_height: 1,
                moving_average_window: 24,
                pow_target_spacing: 90,
                no_retargeting: true,
                checkpoints: &[],
            },
        }
    }
}

/// A raw header the client trusts without verifying history below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Height of the header; always the last height of a retarget period.
    pub height: u32,
    /// Hex-encoded 80-byte header.
    pub raw: &'static str,
}

/// Mainnet retarget-boundary headers.
const MAINNET_CHECKPOINTS: &[Checkpoint] = &[
    Checkpoint {
        height: 2_015,
        raw: "0200000022060190f339e2f357d22d63cda6ef5b0afc57ae327ef8618fe996f905a2cbf910571d300d37ccfb4b9ad7ba3124e4b83c195fa9fb811ddf7251962bf6c168af8163c3528f77091e00047e2e",
    },
    Checkpoint {
        height: 461_663,
        raw: "030000007078d995fd09e73367ab8f1297f955d84d74b97069491786c1ae1777e2f1879c3b6ca87e6b24c2364f0045a6f393b6ecacf2c407ce57b0a1142bb91a00e9227fc46518564298001cef290e00",
    },
];

/// Consensus parameters for one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Network these parameters describe.
    pub network: Network,
    /// Hash of the height-0 header.
    pub genesis: BlockHash,
    /// Easiest target any header may carry.
    pub pow_limit: Target,
    /// Blocks per legacy retarget period.
    pub retarget_interval: u32,
    /// First height governed by the moving-average rule.
    pub moving_average_height: u32,
    /// Headers averaged by the moving-average rule.
    pub moving_average_window: u32,
    /// Expected seconds between blocks.
    pub pow_target_spacing: u64,
    /// Every header's required target is the proof-of-work limit.
    pub no_retargeting: bool,
    /// Trusted headers, ascending by height.
    pub checkpoints: &'static [Checkpoint],
}

impl Params {
    /// Height of the highest checkpoint, 0 if there are none.
    pub fn max_checkpoint_height(&self) -> u32 {
        self.checkpoints.last().map_or(0, |c| c.height)
    }

    /// Whether `height` closes a legacy retarget period.
    pub fn is_retarget_boundary(&self, height: u32) -> bool {
        (height + 1) % self.retarget_interval == 0
    }

    /// Decode the checkpoint headers.
    pub fn checkpoint_headers(&self) -> Result<Vec<Header>, HeaderError> {
        self.checkpoints
            .iter()
            .map(|c| Header::from_hex(c.raw, c.height))
            .collect()
    }
}

/// Target `mantissa * 256^(exponent - 3)` for compile-time-known limits.
fn limit(exponent: u32, mantissa: u32) -> Target {
    Target::new(U256::from(mantissa) << (8 * (exponent as usize - 3)))
}

/// Hash from its conventional (byte-reversed) display order.
fn hash_from_display(mut bytes: [u8; 32]) -> BlockHash {
    bytes.reverse();
    BlockHash::from_byte_array(bytes)
}
