use core::fmt;

use fpvlink_core::{FreqBand, InterfaceIndex, LinkId, LogicalRadioLink, PhysicalRadioInterface, RemoteRadioInterface};

use crate::VehicleInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Flags break the disabled/usable invariants
    InconsistentFlags,
    /// Frequency lies outside every known band
    UnsupportedFrequency,
    /// Downlink enabled but no local interface can receive it
    NoLocalReceiver,
    /// Uplink enabled but no local interface can transmit it
    NoLocalTransmitter,
    NoVehicleTransmitter,
    NoVehicleReceiver,
    /// A local interface is assigned to a link that does not exist
    UnknownLinkAssignment(InterfaceIndex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyViolation {
    pub link: LinkId,
    pub kind: ViolationKind,
}

impl fmt::Display for TopologyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::UnknownLinkAssignment(idx) => write!(f, "interface {} assigned to missing link {}", idx, self.link),
            kind => write!(f, "link {}: {:?}", self.link, kind),
        }
    }
}

/// Which directions of a link a set of interfaces can serve.
/// `dl` is vehicle to controller, `ul` is controller to vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coverage {
    pub dl: bool,
    pub ul: bool,
}

impl Coverage {
    pub const FULL: Coverage = Coverage { dl: true, ul: true };

    /// True when every direction enabled on the link is served
    pub fn serves(&self, link: &LogicalRadioLink) -> bool {
        (!link.flags.can_tx || self.dl) && (!link.flags.can_rx || self.ul)
    }
}

/// Coverage by local interfaces. Downlink needs a receiver, uplink a transmitter.
pub fn local_coverage<'a>(ifaces: impl IntoIterator<Item = &'a PhysicalRadioInterface>, band: FreqBand) -> Coverage {
    let mut c = Coverage::default();
    for i in ifaces.into_iter().filter(|i| i.supports_band(band)) {
        c.dl |= i.effective_rx();
        c.ul |= i.effective_tx();
    }
    c
}

/// Coverage by vehicle interfaces. Downlink needs a transmitter, uplink a receiver.
pub fn vehicle_coverage<'a>(ifaces: impl IntoIterator<Item = &'a RemoteRadioInterface>, band: FreqBand) -> Coverage {
    let mut c = Coverage::default();
    for i in ifaces.into_iter().filter(|i| i.enabled && i.bands.contains(&band)) {
        c.dl |= i.can_tx;
        c.ul |= i.can_rx;
    }
    c
}

/// Checks one link against the interfaces assigned to it on both ends.
/// Disabled and relay links only need consistent flags.
pub fn check_link(
    link: &LogicalRadioLink,
    local: &[&PhysicalRadioInterface],
    vehicle: Option<&VehicleInfo>,
    out: &mut Vec<TopologyViolation>,
) {
    let mut push = |kind| out.push(TopologyViolation { link: link.id, kind });

    if !link.flags.is_consistent() {
        push(ViolationKind::InconsistentFlags);
        return;
    }
    if !link.usable() || link.flags.is_relay {
        return;
    }
    let Some(band) = link.frequency.band() else {
        push(ViolationKind::UnsupportedFrequency);
        return;
    };

    let lc = local_coverage(local.iter().copied(), band);
    if link.flags.can_tx && !lc.dl {
        push(ViolationKind::NoLocalReceiver);
    }
    if link.flags.can_rx && !lc.ul {
        push(ViolationKind::NoLocalTransmitter);
    }

    if let Some(vehicle) = vehicle {
        let vc = vehicle_coverage(vehicle.interfaces_for_link(link.id), band);
        if link.flags.can_tx && !vc.dl {
            push(ViolationKind::NoVehicleTransmitter);
        }
        if link.flags.can_rx && !vc.ul {
            push(ViolationKind::NoVehicleReceiver);
        }
    }
}

/// Lists every violation of the topology. Never fails.
pub fn validate<'a>(
    links: impl IntoIterator<Item = &'a LogicalRadioLink>,
    interfaces: &[&PhysicalRadioInterface],
    vehicle: Option<&VehicleInfo>,
) -> Vec<TopologyViolation> {
    let mut out = Vec::new();
    let mut ids = Vec::new();
    for link in links {
        ids.push(link.id);
        let local: Vec<&PhysicalRadioInterface> = interfaces.iter().copied().filter(|i| i.link == Some(link.id)).collect();
        check_link(link, &local, vehicle, &mut out);
    }
    for iface in interfaces {
        if let Some(id) = iface.link {
            if !ids.contains(&id) {
                out.push(TopologyViolation {
                    link: id,
                    kind: ViolationKind::UnknownLinkAssignment(iface.index),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpvlink_core::{Frequency, InterfaceKind, LinkFlags, RadioModulation, TxRxMode};

    fn wifi(index: u16, link: LinkId) -> PhysicalRadioInterface {
        let mut i = PhysicalRadioInterface::new(index, format!("00:11:22:33:44:{:02x}", index), InterfaceKind::Wifi, vec![FreqBand::Band2G4, FreqBand::Band5G8]);
        i.link = Some(link);
        i
    }

    fn link(id: LinkId, mhz: u32) -> LogicalRadioLink {
        LogicalRadioLink {
            id,
            frequency: Frequency(mhz),
            flags: LinkFlags {
                can_tx: true,
                can_rx: true,
                used_for_video: true,
                used_for_data: true,
                ..Default::default()
            },
            modulation: RadioModulation::default(),
        }
    }

    #[test]
    fn test_valid_topology() {
        let a = wifi(0, 0);
        let links = [link(0, 5800)];
        assert!(validate(&links, &[&a], None).is_empty());
    }

    #[test]
    fn test_rx_only_interface_cannot_serve_uplink() {
        let mut a = wifi(0, 0);
        a.overrides.mode = TxRxMode::RxOnly;
        let links = [link(0, 5800)];
        let v = validate(&links, &[&a], None);
        assert_eq!(v, vec![TopologyViolation { link: 0, kind: ViolationKind::NoLocalTransmitter }]);
    }

    #[test]
    fn test_band_and_assignment() {
        let a = wifi(0, 0);
        let b = wifi(1, 7);
        let links = [link(0, 915)];
        let v = validate(&links, &[&a, &b], None);
        assert!(v.contains(&TopologyViolation { link: 0, kind: ViolationKind::NoLocalReceiver }));
        assert!(v.contains(&TopologyViolation { link: 7, kind: ViolationKind::UnknownLinkAssignment(1) }));
    }

    #[test]
    fn test_vehicle_side() {
        let a = wifi(0, 0);
        let vehicle = VehicleInfo {
            name: "quad".into(),
            interfaces: vec![RemoteRadioInterface {
                index: 0,
                kind: InterfaceKind::Wifi,
                bands: vec![FreqBand::Band5G8],
                enabled: true,
                can_tx: true,
                can_rx: false,
                link: Some(0),
            }],
        };
        let links = [link(0, 5800)];
        let v = validate(&links, &[&a], Some(&vehicle));
        assert_eq!(v, vec![TopologyViolation { link: 0, kind: ViolationKind::NoVehicleReceiver }]);
    }
}
