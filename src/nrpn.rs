//! NRPN accumulator
//!
//! Rebuilds 14-bit parameter updates from the four-message Control Change
//! sequence the M300 sends when a parameter moves:
//!
//! | CC | meaning          | effect                                   |
//! |----|------------------|------------------------------------------|
//! | 99 | NRPN MSB         | select domain, clear LSB and data MSB    |
//! | 98 | NRPN LSB         | select parameter (only after an MSB)     |
//! |  6 | Data Entry MSB   | hold the upper 7 bits                    |
//! | 38 | Data Entry LSB   | emit `(domain, param, value)` and consume the data MSB |

pub const CC_NRPN_MSB: u8 = 99;
pub const CC_NRPN_LSB: u8 = 98;
pub const CC_DATA_ENTRY_MSB: u8 = 6;
pub const CC_DATA_ENTRY_LSB: u8 = 38;

/// A completed NRPN update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NrpnUpdate {
    pub domain: u8,
    pub param: u8,
    pub value: u16,
}

/// Accumulates CC messages into [`NrpnUpdate`]s
#[derive(Debug, Default, Clone)]
pub struct NrpnParser {
    msb: Option<u8>,
    lsb: Option<u8>,
    data_msb: Option<u8>,
}

impl NrpnParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one Control Change; returns an update when a data-entry pair completes
    pub fn feed(&mut self, cc: u8, value: u8) -> Option<NrpnUpdate> {
        let value = value & 0x7F;
        match cc {
            CC_NRPN_MSB => {
                self.msb = Some(value);
                self.lsb = None;
                self.data_msb = None;
                None
            }
            CC_NRPN_LSB => {
                if self.msb.is_some() {
                    self.lsb = Some(value);
                }
                None
            }
            CC_DATA_ENTRY_MSB => {
                self.data_msb = Some(value);
                None
            }
            CC_DATA_ENTRY_LSB => {
                let (domain, param) = (self.msb?, self.lsb?);
                let data_msb = self.data_msb.take()?;
                Some(NrpnUpdate {
                    domain,
                    param,
                    value: ((data_msb as u16) << 7) | value as u16,
                })
            }
            _ => None,
        }
    }

    /// Forget any partial sequence
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
