use std::collections::BTreeMap;

use fpvlink_config::SharedConfig;
use fpvlink_core::{
    ApplyTarget, ChannelWidth, CoreEntity, DataRate, DisplayValue, ErrorKind, Frequency, InterfaceIndex, LinkDirection, LinkFlags, LinkId,
    LinkUsage, LogicalRadioLink, LoopTime, PhysicalRadioInterface, RadioFlags, RadioModulation, SettingValue, TxRxMode, MAX_MCS_INDEX,
};
use fpvlink_msgs::command::{CommandId, CommandOutcome, CommandResult};
use fpvlink_msgs::links::{InterfaceHotplug, LocalRadioApply, TopologySnapshot, TxCardSelection};
use fpvlink_msgs::notify::{RouterNotification, UserWarning, WarningKind};
use fpvlink_msgs::sik::{SikPort, SikReinitRequest};
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use crate::links::subcomp::interface_registry::InterfaceRegistry;
use crate::links::subcomp::scanner::InterfaceScanner;
use crate::links::topology::{self, TopologyViolation, local_coverage, vehicle_coverage};
use crate::vehicle::command_tracker::CommandTracker;
use crate::{CoreEntityTrait, MessageQueue, PairingContext};

const USAGE_OPTIONS: &[&str] = &["Disabled", "Video + data", "Video only", "Data only"];
const DIRECTION_OPTIONS: &[&str] = &["Bidirectional", "Downlink only", "Uplink only"];
const WIDTH_OPTIONS: &[&str] = &["20 MHz", "40 MHz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    /// Change is in effect
    Applied,
    /// Sent to the vehicle, takes effect once acknowledged
    PendingConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyOutcome {
    pub status: ChangeStatus,
    /// Some interfaces of the link do not support the new band
    pub partial_coverage: bool,
}

/// Link change waiting for the vehicle's acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingLinkChange {
    Frequency(Frequency),
    Capabilities(LinkFlags),
    /// Vehicle-side modulation
    Modulation(RadioModulation),
}

/// Owns the logical radio links and the physical interfaces serving them.
/// All changes requested by the user go through here; changes that involve
/// the vehicle only take effect once the vehicle acknowledges them.
pub struct LinkManager {
    config: SharedConfig,
    scanner: Box<dyn InterfaceScanner>,
    registry: InterfaceRegistry,
    links: BTreeMap<LinkId, LogicalRadioLink>,
    /// Last modulation acknowledged by the vehicle, per link
    vehicle_modulation: BTreeMap<LinkId, RadioModulation>,
    commands: CommandTracker<(LinkId, PendingLinkChange)>,
    preferred_uplink: Option<LinkId>,
    violations: Vec<TopologyViolation>,

    /// Topology changed, publish at end of tick
    dirty: bool,
    started: bool,
    was_paired: bool,
    ts: LoopTime,
}

impl LinkManager {
    pub fn new(config: SharedConfig, mut scanner: Box<dyn InterfaceScanner>) -> Self {
        let cfg = config.config();
        let mut registry = InterfaceRegistry::new(cfg.interfaces.clone());
        registry.enumerate(scanner.as_mut());

        let mut links = BTreeMap::new();
        let mut vehicle_modulation = BTreeMap::new();
        for l in &cfg.links {
            let keep = LinkFlags {
                is_relay: l.relay,
                use_lowest_datarate_for_data: l.use_lowest_datarate_for_data,
                ..Default::default()
            };
            let flags = LinkFlags::from_usage(l.usage, l.direction, &keep).unwrap_or_else(|e| {
                tracing::warn!("link {}: {}, starting disabled", l.id, e);
                LinkFlags { disabled: true, ..keep }
            });
            links.insert(
                l.id,
                LogicalRadioLink {
                    id: l.id,
                    frequency: l.frequency,
                    flags,
                    modulation: l.modulation,
                },
            );
            vehicle_modulation.insert(l.id, l.modulation);
            for &idx in &l.interfaces {
                if !registry.assign_initial(idx, l.id) {
                    tracing::warn!("link {}: configured interface {} not present", l.id, idx);
                }
            }
        }

        Self {
            config,
            scanner,
            registry,
            links,
            vehicle_modulation,
            commands: CommandTracker::new(CoreEntity::LinkManager),
            preferred_uplink: None,
            violations: Vec::new(),
            dirty: true,
            started: false,
            was_paired: false,
            ts: LoopTime::default(),
        }
    }

    pub fn link(&self, id: LinkId) -> Option<&LogicalRadioLink> {
        self.links.get(&id)
    }

    pub fn links(&self) -> impl Iterator<Item = &LogicalRadioLink> {
        self.links.values()
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.registry
    }

    pub fn vehicle_modulation(&self, id: LinkId) -> Option<&RadioModulation> {
        self.vehicle_modulation.get(&id)
    }

    /// Violations found at the last publish
    pub fn last_violations(&self) -> &[TopologyViolation] {
        &self.violations
    }

    pub fn has_pending(&self, id: LinkId) -> bool {
        self.commands.pending().any(|p| p.change.0 == id)
    }

    fn link_ref(&self, id: LinkId) -> Result<&LogicalRadioLink, ErrorKind> {
        self.links.get(&id).ok_or(ErrorKind::UnknownLink(id))
    }

    /// The link as it is now and as it will be once any combination of its
    /// pending frequency and capability changes is acknowledged
    fn link_views(&self, id: LinkId) -> Vec<LogicalRadioLink> {
        let Some(link) = self.links.get(&id) else {
            return Vec::new();
        };
        let mut frequencies = vec![link.frequency];
        let mut flags = vec![link.flags];
        for p in self.commands.pending().filter(|p| p.change.0 == id) {
            match p.change.1 {
                PendingLinkChange::Frequency(f) => frequencies.push(f),
                PendingLinkChange::Capabilities(f) => flags.push(f),
                PendingLinkChange::Modulation(_) => {}
            }
        }
        frequencies
            .iter()
            .flat_map(|&frequency| flags.iter().map(move |&flags| LogicalRadioLink { frequency, flags, ..link.clone() }))
            .collect()
    }

    /// Every link view interface overrides must keep served
    fn guarded_links(&self) -> Vec<LogicalRadioLink> {
        self.links.keys().flat_map(|&id| self.link_views(id)).collect()
    }

    /// Side that cannot serve every enabled direction of `candidate`, if any.
    /// Disabled and relay links are not checked.
    fn uncovered_side(&self, ctx: &PairingContext, candidate: &LogicalRadioLink) -> Option<&'static str> {
        if !candidate.usable() || candidate.flags.is_relay {
            return None;
        }
        let band = candidate.frequency.band()?;
        if !local_coverage(self.registry.interfaces_for_link(candidate.id), band).serves(candidate) {
            return Some("local");
        }
        if let Some(vehicle) = &ctx.vehicle {
            if !vehicle_coverage(vehicle.interfaces_for_link(candidate.id), band).serves(candidate) {
                return Some("vehicle");
            }
        }
        None
    }

    /// Rescans the system for interfaces. Link assignments are lost for
    /// interfaces whose index changed.
    pub fn rescan(&mut self) -> usize {
        let assigned: Vec<(InterfaceIndex, String, LinkId)> = self
            .registry
            .iter()
            .filter_map(|i| i.link.map(|l| (i.index, i.hw_id.clone(), l)))
            .collect();
        let n = self.registry.enumerate(self.scanner.as_mut());
        for (idx, hw_id, link) in assigned {
            if self.registry.get(idx).is_some_and(|i| i.hw_id == hw_id) {
                self.registry.assign_initial(idx, link);
            }
        }
        self.dirty = true;
        n
    }

    /// Changes the frequency of a link. Fails with UnsupportedBand when the
    /// interfaces supporting the band, on either side, cannot serve every
    /// direction the link has enabled.
    pub fn set_link_frequency(
        &mut self,
        queue: &mut MessageQueue,
        ctx: &PairingContext,
        id: LinkId,
        frequency: Frequency,
    ) -> Result<FrequencyOutcome, ErrorKind> {
        self.link_ref(id)?;
        let band = frequency.band().ok_or(ErrorKind::UnsupportedBand)?;

        let local: Vec<&PhysicalRadioInterface> = self.registry.interfaces_for_link(id).filter(|i| i.enabled()).collect();
        let local_ok = local.iter().filter(|i| i.supports_band(band)).count();
        if local_ok == 0 {
            tracing::info!("set_link_frequency: link {} has no local interface for {}", id, frequency);
            return Err(ErrorKind::UnsupportedBand);
        }
        let mut partial = local_ok < local.len();

        if let Some(vehicle) = &ctx.vehicle {
            let remote: Vec<_> = vehicle.interfaces_for_link(id).filter(|i| i.enabled).collect();
            let remote_ok = remote.iter().filter(|i| i.bands.contains(&band)).count();
            if remote_ok == 0 {
                tracing::info!("set_link_frequency: link {} has no vehicle interface for {}", id, frequency);
                return Err(ErrorKind::UnsupportedBand);
            }
            partial |= remote_ok < remote.len();
        }

        for view in self.link_views(id) {
            let candidate = LogicalRadioLink { frequency, ..view };
            if let Some(side) = self.uncovered_side(ctx, &candidate) {
                tracing::info!("set_link_frequency: link {} {} interfaces on {} cannot serve {:?}", id, side, frequency, candidate.flags.direction());
                return Err(ErrorKind::UnsupportedBand);
            }
        }

        let status = if ctx.is_paired() {
            self.commands.issue(
                queue,
                self.ts,
                CommandId::SetRadioLinkFrequency,
                Some(id),
                frequency.mhz() as i32,
                vec![id],
                (id, PendingLinkChange::Frequency(frequency)),
            )?;
            ChangeStatus::PendingConfirmation
        } else {
            self.apply_frequency(queue, id, frequency);
            ChangeStatus::Applied
        };

        if partial {
            self.warn(queue, UserWarning::once(WarningKind::PartialCoverage, format!("link {}: not every interface supports {}", id, frequency)));
        }
        Ok(FrequencyOutcome {
            status,
            partial_coverage: partial,
        })
    }

    /// Changes usage and direction of a link. Directions the assigned
    /// interfaces cannot serve are rejected.
    pub fn set_link_capabilities(
        &mut self,
        queue: &mut MessageQueue,
        ctx: &PairingContext,
        id: LinkId,
        usage: LinkUsage,
        direction: LinkDirection,
    ) -> Result<ChangeStatus, ErrorKind> {
        let link = self.link_ref(id)?;
        let flags = LinkFlags::from_usage(usage, direction, &link.flags)?;

        let unchanged = flags == link.flags;

        for view in self.link_views(id) {
            let candidate = LogicalRadioLink { flags, ..view };
            match self.uncovered_side(ctx, &candidate) {
                Some("local") => return Err(ErrorKind::InvalidCapabilityCombination("direction not supported by local interfaces")),
                Some(_) => return Err(ErrorKind::InvalidCapabilityCombination("direction not supported by vehicle interfaces")),
                None => {}
            }
        }

        if unchanged {
            return Ok(ChangeStatus::Applied);
        }

        if ctx.is_paired() {
            self.commands.issue(
                queue,
                self.ts,
                CommandId::SetRadioLinkCapabilities,
                Some(id),
                flags.to_bits() as i32,
                vec![id],
                (id, PendingLinkChange::Capabilities(flags)),
            )?;
            Ok(ChangeStatus::PendingConfirmation)
        } else {
            self.apply_capabilities(queue, id, flags);
            Ok(ChangeStatus::Applied)
        }
    }

    /// Changes data rate and modulation flags. MCS rates must say where to apply.
    /// The controller side applies at once, the vehicle side on acknowledgment.
    pub fn set_link_radio_flags(
        &mut self,
        queue: &mut MessageQueue,
        ctx: &PairingContext,
        id: LinkId,
        flags: RadioFlags,
    ) -> Result<ChangeStatus, ErrorKind> {
        self.link_ref(id)?;
        let m = flags.modulation;
        if let DataRate::Mcs(idx) = m.data_rate {
            if idx > MAX_MCS_INDEX {
                return Err(ErrorKind::InvalidParameter {
                    field: "data_rate",
                    reason: "MCS index out of range",
                });
            }
        }
        let target = match (m.data_rate.is_mcs(), flags.apply_target) {
            (_, Some(t)) => t,
            (true, None) => {
                return Err(ErrorKind::InvalidParameter {
                    field: "apply_target",
                    reason: "MCS rates need an apply target",
                });
            }
            (false, None) => ApplyTarget::Both,
        };

        let mut status = ChangeStatus::Applied;
        if target.includes_vehicle() {
            if ctx.is_paired() {
                self.commands.issue(
                    queue,
                    self.ts,
                    CommandId::SetRadioLinkFlags,
                    Some(id),
                    m.data_rate.to_raw(),
                    vec![id, m.flag_bits()],
                    (id, PendingLinkChange::Modulation(m)),
                )?;
                status = ChangeStatus::PendingConfirmation;
            } else if target == ApplyTarget::Vehicle {
                return Err(ErrorKind::NoVehicle);
            } else {
                tracing::debug!("set_link_radio_flags: link {} vehicle side skipped, not paired", id);
            }
        }

        if target.includes_controller() {
            if let Some(link) = self.links.get_mut(&id) {
                link.modulation = m;
            }
            self.emit_local_apply(queue, id);
            self.dirty = true;
            self.notify_router(queue);
        }
        Ok(status)
    }

    pub fn validate_topology(&self, ctx: &PairingContext) -> Vec<TopologyViolation> {
        let ifaces: Vec<&PhysicalRadioInterface> = self.registry.iter().collect();
        topology::validate(self.links.values(), &ifaces, ctx.vehicle.as_ref())
    }

    /// Explicit preference if it can still carry uplink, else the lowest such link id
    pub fn preferred_uplink(&self) -> Option<LinkId> {
        let carries_uplink = |l: &LogicalRadioLink| l.usable() && l.flags.can_rx;
        if let Some(id) = self.preferred_uplink {
            if self.links.get(&id).is_some_and(carries_uplink) {
                return Some(id);
            }
        }
        self.links.values().find(|&l| carries_uplink(l)).map(|l| l.id)
    }

    pub fn set_preferred_uplink(&mut self, id: Option<LinkId>) -> Result<(), ErrorKind> {
        if let Some(id) = id {
            self.link_ref(id)?;
        }
        self.preferred_uplink = id;
        self.dirty = true;
        Ok(())
    }

    /// Lowest-id usable link carrying video downlink
    pub fn video_link(&self) -> Option<LinkId> {
        self.links
            .values()
            .find(|l| l.usable() && l.flags.can_tx && l.flags.used_for_video)
            .map(|l| l.id)
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot {
            links: self.links.values().cloned().collect(),
            video_link: self.video_link(),
            preferred_uplink: self.preferred_uplink(),
        }
    }

    pub fn values_to_display(&self, id: LinkId) -> Result<Vec<DisplayValue>, ErrorKind> {
        let link = self.link_ref(id)?;
        let f = &link.flags;
        let usage = match f.usage() {
            LinkUsage::Disabled => 0,
            LinkUsage::VideoAndData => 1,
            LinkUsage::VideoOnly => 2,
            LinkUsage::DataOnly => 3,
        };
        let direction = match (f.can_tx, f.can_rx) {
            (true, false) => 1,
            (false, true) => 2,
            _ => 0,
        };
        let m = &link.modulation;
        let tx_card = match self.registry.select_auto_tx_card(id) {
            TxCardSelection::Auto => "auto".to_string(),
            TxCardSelection::Fixed(idx) => format!("interface {}", idx),
        };
        let ifaces: Vec<String> = self.registry.interfaces_for_link(id).map(|i| i.index.to_string()).collect();

        Ok(vec![
            ("frequency", SettingValue::Text(link.frequency.to_string())),
            ("usage", SettingValue::EnumSelect { selected: usage, options: USAGE_OPTIONS }),
            ("direction", SettingValue::EnumSelect { selected: direction, options: DIRECTION_OPTIONS }),
            ("data_rate", SettingValue::Text(m.data_rate.to_string())),
            (
                "channel_width",
                SettingValue::EnumSelect {
                    selected: (m.width == ChannelWidth::W40) as usize,
                    options: WIDTH_OPTIONS,
                },
            ),
            ("ldpc", SettingValue::Toggle(m.ldpc)),
            ("sgi", SettingValue::Toggle(m.sgi)),
            ("stbc", SettingValue::Toggle(m.stbc)),
            ("relay", SettingValue::Toggle(f.is_relay)),
            ("lowest_datarate_for_data", SettingValue::Toggle(f.use_lowest_datarate_for_data)),
            ("tx_card", SettingValue::Text(tx_card)),
            ("interfaces", SettingValue::Text(ifaces.join(", "))),
            ("pending", SettingValue::Toggle(self.has_pending(id))),
        ])
    }

    pub fn set_interface_disabled(&mut self, queue: &mut MessageQueue, index: InterfaceIndex, disabled: bool) -> Result<(), ErrorKind> {
        self.registry.set_disabled(index, disabled, &self.guarded_links())?;
        self.after_interface_change(queue, index);
        Ok(())
    }

    pub fn set_interface_tx_rx_only(&mut self, queue: &mut MessageQueue, index: InterfaceIndex, mode: TxRxMode) -> Result<(), ErrorKind> {
        self.registry.set_tx_rx_only(index, mode, &self.guarded_links())?;
        self.after_interface_change(queue, index);
        Ok(())
    }

    pub fn set_interface_preferred_tx(&mut self, queue: &mut MessageQueue, index: InterfaceIndex, rank: u8) -> Result<(), ErrorKind> {
        self.registry.set_preferred_tx(index, rank)?;
        self.after_interface_change(queue, index);
        Ok(())
    }

    pub fn assign_interface(&mut self, queue: &mut MessageQueue, index: InterfaceIndex, link: Option<LinkId>) -> Result<(), ErrorKind> {
        let previous = self.registry.get(index).and_then(|i| i.link);
        self.registry.assign(index, link, &self.guarded_links())?;
        if let Some(prev) = previous {
            if Some(prev) != link {
                self.emit_local_apply(queue, prev);
            }
        }
        self.after_interface_change(queue, index);
        Ok(())
    }

    fn after_interface_change(&mut self, queue: &mut MessageQueue, index: InterfaceIndex) {
        if let Some(link) = self.registry.get(index).and_then(|i| i.link) {
            self.emit_local_apply(queue, link);
        }
        self.dirty = true;
        self.notify_router(queue);
    }

    fn apply_frequency(&mut self, queue: &mut MessageQueue, id: LinkId, frequency: Frequency) {
        let Some(link) = self.links.get_mut(&id) else {
            return;
        };
        tracing::info!("link {}: frequency {} -> {}", id, link.frequency, frequency);
        link.frequency = frequency;
        self.emit_local_apply(queue, id);
        self.request_sik_reinit(queue, id, frequency);
        self.dirty = true;
        self.notify_router(queue);
    }

    fn apply_capabilities(&mut self, queue: &mut MessageQueue, id: LinkId, flags: LinkFlags) {
        let Some(link) = self.links.get_mut(&id) else {
            return;
        };
        tracing::info!("link {}: usage {:?} direction {:?}", id, flags.usage(), flags.direction());
        link.flags = flags;

        let usage = flags.usage();
        if usage != LinkUsage::Disabled {
            let same: Vec<String> = self
                .links
                .values()
                .filter(|l| l.usable() && l.flags.usage() == usage)
                .map(|l| l.id.to_string())
                .collect();
            if same.len() > 1 {
                let text = format!("links {} all carry {:?}", same.join(", "), usage);
                self.warn(queue, UserWarning::once(WarningKind::MultipleLinksSameUsage, text));
            }
        }
        self.emit_local_apply(queue, id);
        self.dirty = true;
        self.notify_router(queue);
    }

    fn apply_change(&mut self, queue: &mut MessageQueue, id: LinkId, change: PendingLinkChange) {
        match change {
            PendingLinkChange::Frequency(f) => self.apply_frequency(queue, id, f),
            PendingLinkChange::Capabilities(flags) => self.apply_capabilities(queue, id, flags),
            PendingLinkChange::Modulation(m) => {
                tracing::info!("link {}: vehicle modulation {}", id, m.data_rate);
                self.vehicle_modulation.insert(id, m);
                self.dirty = true;
                self.notify_router(queue);
            }
        }
    }

    fn emit_local_apply(&self, queue: &mut MessageQueue, id: LinkId) {
        let Some(link) = self.links.get(&id) else {
            return;
        };
        let apply = LocalRadioApply {
            link: id,
            interfaces: self.registry.interfaces_for_link(id).filter(|i| i.enabled()).map(|i| i.index).collect(),
            frequency: link.frequency,
            modulation: link.modulation,
            tx_card: self.registry.select_auto_tx_card(id),
        };
        queue.push_back(CoreMsg::new(CoreEntity::LinkManager, CoreEntity::RadioStack, self.ts, CoreMsgInner::LocalRadioApply(apply)));
    }

    fn request_sik_reinit(&self, queue: &mut MessageQueue, id: LinkId, frequency: Frequency) {
        let ports: Vec<SikPort> = self
            .registry
            .sik_for_link(id)
            .filter(|i| i.enabled())
            .map(|i| SikPort {
                interface: i.index,
                port: i.hw_id.clone(),
            })
            .collect();
        if ports.is_empty() {
            return;
        }
        tracing::debug!("link {}: SiK reinit of {} modems", id, ports.len());
        queue.push_back(CoreMsg::new(
            CoreEntity::LinkManager,
            CoreEntity::SikRadio,
            self.ts,
            CoreMsgInner::SikReinitRequest(SikReinitRequest { ports, frequency }),
        ));
    }

    fn notify_router(&self, queue: &mut MessageQueue) {
        queue.push_back(CoreMsg::new(
            CoreEntity::LinkManager,
            CoreEntity::Router,
            self.ts,
            CoreMsgInner::NotifyRouter(RouterNotification::ControllerSettingsChanged),
        ));
    }

    fn warn(&self, queue: &mut MessageQueue, warning: UserWarning) {
        queue.push_back(CoreMsg::new(CoreEntity::LinkManager, CoreEntity::Warnings, self.ts, CoreMsgInner::Warning(warning)));
    }

    fn rx_command_result(&mut self, queue: &mut MessageQueue, result: CommandResult) {
        let Some(pending) = self.commands.resolve(result.token) else {
            tracing::debug!("rx_command_result: unknown token {} for {}", result.token, result.id);
            return;
        };
        let (id, change) = pending.change;
        match result.outcome {
            CommandOutcome::Acked => self.apply_change(queue, id, change),
            outcome => {
                tracing::warn!("link {}: {} failed: {:?}", id, pending.id, outcome);
                self.warn(queue, UserWarning::once(WarningKind::CommandFailed, format!("link {}: {} {:?}", id, pending.id, outcome)));
            }
        }
    }

    fn rx_hotplug(&mut self, queue: &mut MessageQueue, event: InterfaceHotplug) {
        match event {
            InterfaceHotplug::Added(iface) => {
                let index = iface.index;
                self.registry.on_interface_added(iface);
                self.after_interface_change(queue, index);
            }
            InterfaceHotplug::Removed(index) => {
                if let Some(link) = self.registry.on_interface_removed(index).and_then(|i| i.link) {
                    self.emit_local_apply(queue, link);
                }
                self.dirty = true;
                self.notify_router(queue);
            }
        }
    }
}

impl CoreEntityTrait for LinkManager {
    fn entity(&self) -> CoreEntity {
        CoreEntity::LinkManager
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.config = config;
    }

    fn rx_prim(&mut self, queue: &mut MessageQueue, _ctx: &PairingContext, message: CoreMsg) {
        tracing::debug!("rx_prim: {} from {:?}", message.kind(), message.src);
        match message.msg {
            CoreMsgInner::CommandResult(r) => self.rx_command_result(queue, r),
            CoreMsgInner::InterfaceHotplug(h) => self.rx_hotplug(queue, h),
            _ => {
                tracing::warn!("LinkManager: unexpected message {}", message.kind());
            }
        }
    }

    fn tick_start(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, ts: LoopTime) {
        self.ts = ts;

        if !self.started {
            self.started = true;
            let ids: Vec<LinkId> = self.links.values().filter(|l| l.usable()).map(|l| l.id).collect();
            for id in ids {
                self.emit_local_apply(queue, id);
            }
        }
        if ctx.is_paired() != self.was_paired {
            self.was_paired = ctx.is_paired();
            self.dirty = true;
        }

        let timeout = self.config.config().controller.command_timeout_ms;
        for expired in self.commands.expire(ts, timeout) {
            let (id, _) = expired.change;
            tracing::warn!("link {}: {} timed out", id, expired.id);
            self.warn(queue, UserWarning::once(WarningKind::CommandFailed, format!("link {}: {} timed out", id, expired.id)));
        }
    }

    fn tick_end(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, ts: LoopTime) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;

        let violations = self.validate_topology(ctx);
        self.config.state_write().topology_violations = violations.len();
        if violations != self.violations {
            if !violations.is_empty() {
                let text = violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; ");
                tracing::warn!("topology inconsistent: {}", text);
                self.warn(queue, UserWarning::once(WarningKind::LinkTopologyInconsistent, text));
            }
            self.violations = violations;
        }

        let snapshot = self.snapshot();
        for dest in [CoreEntity::Adaptive, CoreEntity::Retransmit] {
            queue.push_back(CoreMsg::new(CoreEntity::LinkManager, dest, ts, CoreMsgInner::TopologyUpdate(snapshot.clone())));
        }
        true
    }
}
