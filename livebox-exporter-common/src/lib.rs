#[cfg(feature = "serde")]
extern crate serde;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Flag marking a WAN-facing interface.
pub const WAN_FLAG: &str = "wan";
/// Flag marking a WLAN access point (one per SSID).
pub const WLAN_FLAG: &str = "wlanvap";

/// Converts B/s to Mbit/s.
pub fn bytes_per_sec_to_mbits(bytes: f64) -> f64 {
    bytes * 8.0 / 1_000_000.0
}

/// Cumulative tx/rx byte counters of an interface or station.
///
/// Counters only grow while the device is up; a decrease means the device
/// reset them (reboot, interface re-init).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Counters {
    pub tx: u64, // bytes sent
    pub rx: u64, // bytes received
}

impl Counters {
    pub fn new(tx: u64, rx: u64) -> Self {
        Self { tx, rx }
    }

    /// Exchanges tx and rx.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.tx, &mut self.rx);
    }

    /// Returns a copy with tx and rx exchanged.
    pub fn swapped(self) -> Self {
        Self {
            tx: self.rx,
            rx: self.tx,
        }
    }
}

/// A single channel bitrate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BitrateSpec {
    /// Bitrate in Mbit/s. Always 0 when `reset` is true.
    pub value: f64,
    /// True when the counter went backwards since the previous sample.
    pub reset: bool,
}

impl BitrateSpec {
    pub fn rate(value: f64) -> Self {
        Self {
            value,
            reset: false,
        }
    }

    pub fn reset() -> Self {
        Self {
            value: 0.0,
            reset: true,
        }
    }

    /// The value if it can be published (present and not a reset).
    pub fn publishable(spec: Option<BitrateSpec>) -> Option<f64> {
        match spec {
            Some(s) if !s.reset => Some(s.value),
            _ => None,
        }
    }
}

/// Tx and rx bitrates. A channel is `None` when no rate could be computed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bitrates {
    pub tx: Option<BitrateSpec>,
    pub rx: Option<BitrateSpec>,
}

impl Bitrates {
    pub fn is_empty(&self) -> bool {
        self.tx.is_none() && self.rx.is_none()
    }
}

/// A network interface of the device with its capability flags.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interface {
    pub name: String,
    pub flags: String,
}

impl Interface {
    pub fn new(name: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: flags.into(),
        }
    }

    /// Returns true if this interface is a WAN interface.
    pub fn is_wan(&self) -> bool {
        self.flags.contains(WAN_FLAG)
    }

    /// Returns true if this interface is a WLAN interface.
    pub fn is_wlan(&self) -> bool {
        self.flags.contains(WLAN_FLAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_is_involution() {
        for c in [
            Counters::new(0, 0),
            Counters::new(1, 2),
            Counters::new(u64::MAX, 7),
        ] {
            let mut twice = c;
            twice.swap();
            twice.swap();
            assert_eq!(twice, c);
            assert_eq!(c.swapped().swapped(), c);
        }
    }

    #[test]
    fn test_swap_exchanges_channels() {
        let mut c = Counters::new(10, 20);
        c.swap();
        assert_eq!(c, Counters::new(20, 10));
    }

    #[test]
    fn test_interface_roles() {
        let wan = Interface::new("veip0", "wan netdev statmon enabled");
        assert!(wan.is_wan());
        assert!(!wan.is_wlan());

        let wlan = Interface::new("wl0", "wlanvap netdev statmon enabled");
        assert!(wlan.is_wlan());
        assert!(!wlan.is_wan());

        let lan = Interface::new("eth1", "eth netdev statmon enabled");
        assert!(!lan.is_wan());
        assert!(!lan.is_wlan());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(bytes_per_sec_to_mbits(125_000.0), 1.0);
        assert_eq!(bytes_per_sec_to_mbits(0.0), 0.0);
    }

    #[test]
    fn test_publishable_skips_resets() {
        assert_eq!(BitrateSpec::publishable(None), None);
        assert_eq!(BitrateSpec::publishable(Some(BitrateSpec::reset())), None);
        assert_eq!(
            BitrateSpec::publishable(Some(BitrateSpec::rate(1.5))),
            Some(1.5)
        );
    }
}
