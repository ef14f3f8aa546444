use std::collections::BTreeMap;

use fpvlink_config::CfgInterfaceOverride;
use fpvlink_core::{ErrorKind, InterfaceIndex, InterfaceKind, LinkId, LogicalRadioLink, PhysicalRadioInterface, TxRxMode};
use fpvlink_msgs::links::TxCardSelection;

use super::scanner::InterfaceScanner;
use crate::links::topology::local_coverage;

/// Physical radio interfaces of the controller and their user overrides
pub struct InterfaceRegistry {
    interfaces: BTreeMap<InterfaceIndex, PhysicalRadioInterface>,
    /// Persisted overrides, re-applied when an interface appears
    overrides: Vec<CfgInterfaceOverride>,
}

impl InterfaceRegistry {
    pub fn new(overrides: Vec<CfgInterfaceOverride>) -> Self {
        Self {
            interfaces: BTreeMap::new(),
            overrides,
        }
    }

    /// Replaces the interface set with a fresh scan. A failing scan leaves
    /// the registry empty. Returns the number of interfaces found.
    pub fn enumerate(&mut self, scanner: &mut dyn InterfaceScanner) -> usize {
        self.interfaces.clear();
        let found = match scanner.scan() {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("enumerate: interface scan failed: {}", e);
                return 0;
            }
        };
        for iface in found {
            self.insert(iface);
        }
        tracing::info!("enumerate: {} radio interfaces", self.interfaces.len());
        self.interfaces.len()
    }

    fn insert(&mut self, mut iface: PhysicalRadioInterface) {
        if let Some(o) = self.overrides.iter().find(|o| o.index == iface.index) {
            if let Some(disabled) = o.disabled {
                iface.overrides.disabled = disabled;
            }
            if let Some(mode) = o.mode {
                iface.overrides.mode = mode;
            }
            if let Some(rank) = o.preferred_tx {
                iface.overrides.preferred_tx = rank;
            }
            if let Some(internal) = o.internal {
                iface.overrides.internal = internal;
            }
        }
        self.interfaces.insert(iface.index, iface);
    }

    pub fn get(&self, index: InterfaceIndex) -> Option<&PhysicalRadioInterface> {
        self.interfaces.get(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhysicalRadioInterface> {
        self.interfaces.values()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn interfaces_for_link(&self, link: LinkId) -> impl Iterator<Item = &PhysicalRadioInterface> {
        self.interfaces.values().filter(move |i| i.link == Some(link))
    }

    /// SiK modems assigned to a link
    pub fn sik_for_link(&self, link: LinkId) -> impl Iterator<Item = &PhysicalRadioInterface> {
        self.interfaces_for_link(link).filter(|i| i.kind == InterfaceKind::Sik)
    }

    fn get_mut(&mut self, index: InterfaceIndex) -> Result<&mut PhysicalRadioInterface, ErrorKind> {
        self.interfaces.get_mut(&index).ok_or(ErrorKind::UnknownInterface(index))
    }

    /// Applies `change` to a copy of the interface and accepts it only if no
    /// link loses its last interface for a direction it could serve before.
    /// `links` may hold several versions of a link (current and pending);
    /// every version is checked.
    fn mutate_checked(
        &mut self,
        index: InterfaceIndex,
        links: &[LogicalRadioLink],
        change: impl FnOnce(&mut PhysicalRadioInterface),
    ) -> Result<(), ErrorKind> {
        let current = self.get_mut(index)?.clone();
        let mut candidate = current.clone();
        change(&mut candidate);

        let affected = [current.link, candidate.link];
        for link in links.iter().filter(|l| affected.contains(&Some(l.id))) {
            let link_id = link.id;
            if !link.usable() {
                continue;
            }
            let Some(band) = link.frequency.band() else {
                continue;
            };
            let others: Vec<&PhysicalRadioInterface> = self.interfaces_for_link(link_id).filter(|i| i.index != index).collect();
            let before = local_coverage(others.iter().copied().chain((current.link == Some(link_id)).then_some(&current)), band);
            let after = local_coverage(others.iter().copied().chain((candidate.link == Some(link_id)).then_some(&candidate)), band);

            let loses_dl = link.flags.can_tx && before.dl && !after.dl;
            let loses_ul = link.flags.can_rx && before.ul && !after.ul;
            if loses_dl || loses_ul {
                tracing::info!("interface {}: change would orphan link {} (dl {} ul {})", index, link_id, loses_dl, loses_ul);
                return Err(ErrorKind::WouldOrphanLink(link_id));
            }
        }

        *self.get_mut(index)? = candidate;
        Ok(())
    }

    pub fn set_disabled(&mut self, index: InterfaceIndex, disabled: bool, links: &[LogicalRadioLink]) -> Result<(), ErrorKind> {
        self.mutate_checked(index, links, |i| i.overrides.disabled = disabled)
    }

    pub fn set_tx_rx_only(&mut self, index: InterfaceIndex, mode: TxRxMode, links: &[LogicalRadioLink]) -> Result<(), ErrorKind> {
        self.mutate_checked(index, links, |i| i.overrides.mode = mode)
    }

    /// Rank 0 = auto. Does not affect coverage.
    pub fn set_preferred_tx(&mut self, index: InterfaceIndex, rank: u8) -> Result<(), ErrorKind> {
        self.get_mut(index)?.overrides.preferred_tx = rank;
        Ok(())
    }

    pub fn set_internal(&mut self, index: InterfaceIndex, internal: bool) -> Result<(), ErrorKind> {
        self.get_mut(index)?.overrides.internal = internal;
        Ok(())
    }

    /// Moves an interface to a link (or unassigns it), with the orphan check
    pub fn assign(&mut self, index: InterfaceIndex, link: Option<LinkId>, links: &[LogicalRadioLink]) -> Result<(), ErrorKind> {
        if let Some(id) = link {
            if !links.iter().any(|l| l.id == id) {
                return Err(ErrorKind::UnknownLink(id));
            }
        }
        self.mutate_checked(index, links, |i| i.link = link)
    }

    /// Assignment during startup, without orphan checks
    pub fn assign_initial(&mut self, index: InterfaceIndex, link: LinkId) -> bool {
        match self.interfaces.get_mut(&index) {
            Some(i) => {
                i.link = Some(link);
                true
            }
            None => false,
        }
    }

    /// Lowest non-zero preferred-TX rank among the link's interfaces that may transmit
    pub fn select_auto_tx_card(&self, link: LinkId) -> TxCardSelection {
        self.interfaces_for_link(link)
            .filter(|i| i.enabled() && i.overrides.mode != TxRxMode::RxOnly && i.overrides.preferred_tx > 0)
            .min_by_key(|i| (i.overrides.preferred_tx, i.index))
            .map_or(TxCardSelection::Auto, |i| TxCardSelection::Fixed(i.index))
    }

    /// Hot-plug: a known interface keeps its link and overrides when the hardware id matches
    pub fn on_interface_added(&mut self, mut iface: PhysicalRadioInterface) {
        if let Some(old) = self.interfaces.get(&iface.index) {
            if old.hw_id == iface.hw_id {
                iface.link = old.link;
                iface.overrides = old.overrides;
                self.interfaces.insert(iface.index, iface);
                return;
            }
        }
        tracing::info!("interface {} added: {:?} {}", iface.index, iface.kind, iface.hw_id);
        self.insert(iface);
    }

    pub fn on_interface_removed(&mut self, index: InterfaceIndex) -> Option<PhysicalRadioInterface> {
        let removed = self.interfaces.remove(&index);
        if let Some(ref i) = removed {
            tracing::info!("interface {} removed: {}, was on link {:?}", index, i.hw_id, i.link);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::subcomp::scanner::StaticScanner;
    use fpvlink_core::{FreqBand, Frequency, LinkFlags, RadioModulation};

    fn iface(index: u16) -> PhysicalRadioInterface {
        PhysicalRadioInterface::new(index, format!("mac{}", index), InterfaceKind::Wifi, vec![FreqBand::Band5G8])
    }

    fn links() -> Vec<LogicalRadioLink> {
        vec![LogicalRadioLink {
            id: 0,
            frequency: Frequency(5800),
            flags: LinkFlags {
                can_tx: true,
                can_rx: true,
                used_for_video: true,
                used_for_data: true,
                ..Default::default()
            },
            modulation: RadioModulation::default(),
        }]
    }

    fn registry(n: u16) -> InterfaceRegistry {
        let overrides = vec![CfgInterfaceOverride {
            index: 1,
            preferred_tx: Some(2),
            ..Default::default()
        }];
        let mut r = InterfaceRegistry::new(overrides);
        r.enumerate(&mut StaticScanner((0..n).map(iface).collect()));
        for i in 0..n {
            r.assign_initial(i, 0);
        }
        r
    }

    #[test]
    fn test_overrides_applied() {
        let r = registry(2);
        assert_eq!(r.get(1).unwrap().overrides.preferred_tx, 2);
        assert_eq!(r.select_auto_tx_card(0), TxCardSelection::Fixed(1));
    }

    #[test]
    fn test_orphan_rejected() {
        let links = links();
        let mut r = registry(2);
        assert!(r.set_disabled(0, true, &links).is_ok());
        assert_eq!(r.set_disabled(1, true, &links), Err(ErrorKind::WouldOrphanLink(0)));
        assert_eq!(r.set_tx_rx_only(1, TxRxMode::RxOnly, &links), Err(ErrorKind::WouldOrphanLink(0)));
        assert!(r.set_disabled(0, false, &links).is_ok());
        assert!(r.set_tx_rx_only(1, TxRxMode::RxOnly, &links).is_ok());
        // Interface 1 is RX-only now, so it no longer counts for the tx card
        assert_eq!(r.select_auto_tx_card(0), TxCardSelection::Auto);
        assert_eq!(r.set_disabled(9, true, &links), Err(ErrorKind::UnknownInterface(9)));
    }

    #[test]
    fn test_every_link_version_checked() {
        let mut r = registry(2);
        r.on_interface_added(PhysicalRadioInterface::new(0, "mac0", InterfaceKind::Wifi, vec![FreqBand::Band2G4, FreqBand::Band5G8]));
        let mut views = links();
        let mut pending = views[0].clone();
        pending.frequency = Frequency(2412);
        views.push(pending);

        // Interface 1 covers 5.8 GHz alone, but only interface 0 does 2.4 GHz
        assert_eq!(r.set_tx_rx_only(0, TxRxMode::RxOnly, &views), Err(ErrorKind::WouldOrphanLink(0)));
        assert!(r.set_tx_rx_only(0, TxRxMode::RxOnly, &links()).is_ok());
    }

    #[test]
    fn test_tx_card_ranking() {
        let links = links();
        let mut r = registry(3);
        r.set_preferred_tx(2, 1).unwrap();
        assert_eq!(r.select_auto_tx_card(0), TxCardSelection::Fixed(2));
        r.set_disabled(2, true, &links).unwrap();
        assert_eq!(r.select_auto_tx_card(0), TxCardSelection::Fixed(1));
    }

    #[test]
    fn test_hotplug_keeps_assignment() {
        let mut r = registry(1);
        r.on_interface_added(iface(0));
        assert_eq!(r.get(0).unwrap().link, Some(0));
        r.on_interface_added(iface(5));
        assert_eq!(r.get(5).unwrap().link, None);
        assert!(r.on_interface_removed(5).is_some());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_failed_scan_is_empty() {
        struct Broken;
        impl InterfaceScanner for Broken {
            fn scan(&mut self) -> std::io::Result<Vec<PhysicalRadioInterface>> {
                Err(std::io::Error::other("no sysfs"))
            }
        }
        let mut r = registry(2);
        assert_eq!(r.enumerate(&mut Broken), 0);
        assert!(r.is_empty());
    }
}
