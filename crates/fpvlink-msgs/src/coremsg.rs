use fpvlink_core::{CoreEntity, LoopTime};

use crate::clocksync::*;
use crate::command::*;
use crate::links::*;
use crate::notify::*;
use crate::sik::*;
use crate::video::*;

/// Exhaustive list of message payloads passed between entities
#[derive(Debug)]
pub enum CoreMsgInner {
    // Vehicle command channel
    VehicleCommand(VehicleCommand),
    CommandResult(CommandResult),
    VehicleAck(VehicleAck),
    LinkActivity(LinkActivity),

    // Radio stack and link topology
    LocalRadioApply(LocalRadioApply),
    InterfaceHotplug(InterfaceHotplug),
    ReopenInterfaces(ReopenInterfaces),
    TopologyUpdate(TopologySnapshot),
    LinkQuality(LinkQualitySample),

    // Video
    VideoPacket(FecPacket),
    RetransmissionRequest(RetransmissionRequest),
    VideoBlock(VideoBlockOut),
    ActiveProfileChanged(ActiveProfile),

    // Clock sync
    ClockSyncPing(ClockSyncPing),
    ClockSyncPong(ClockSyncPong),
    RttMeasured(RttMeasured),

    // SiK modems
    SikReinitRequest(SikReinitRequest),
    SikHelperTool(SikHelperTool),

    // User-visible and out-of-process notifications
    Warning(UserWarning),
    NotifyRouter(RouterNotification),
}

#[derive(Debug)]
pub struct CoreMsg {
    pub src: CoreEntity,
    pub dest: CoreEntity,
    pub ts: LoopTime,
    pub msg: CoreMsgInner,
}

impl CoreMsg {
    pub fn new(src: CoreEntity, dest: CoreEntity, ts: LoopTime, msg: CoreMsgInner) -> Self {
        Self { src, dest, ts, msg }
    }

    pub fn get_source(&self) -> &CoreEntity {
        &self.src
    }

    pub fn get_dest(&self) -> &CoreEntity {
        &self.dest
    }

    /// Short name of the payload variant, for logging
    pub fn kind(&self) -> &'static str {
        match &self.msg {
            CoreMsgInner::VehicleCommand(_) => "VehicleCommand",
            CoreMsgInner::CommandResult(_) => "CommandResult",
            CoreMsgInner::VehicleAck(_) => "VehicleAck",
            CoreMsgInner::LinkActivity(_) => "LinkActivity",
            CoreMsgInner::LocalRadioApply(_) => "LocalRadioApply",
            CoreMsgInner::InterfaceHotplug(_) => "InterfaceHotplug",
            CoreMsgInner::ReopenInterfaces(_) => "ReopenInterfaces",
            CoreMsgInner::TopologyUpdate(_) => "TopologyUpdate",
            CoreMsgInner::LinkQuality(_) => "LinkQuality",
            CoreMsgInner::VideoPacket(_) => "VideoPacket",
            CoreMsgInner::RetransmissionRequest(_) => "RetransmissionRequest",
            CoreMsgInner::VideoBlock(_) => "VideoBlock",
            CoreMsgInner::ActiveProfileChanged(_) => "ActiveProfileChanged",
            CoreMsgInner::ClockSyncPing(_) => "ClockSyncPing",
            CoreMsgInner::ClockSyncPong(_) => "ClockSyncPong",
            CoreMsgInner::RttMeasured(_) => "RttMeasured",
            CoreMsgInner::SikReinitRequest(_) => "SikReinitRequest",
            CoreMsgInner::SikHelperTool(_) => "SikHelperTool",
            CoreMsgInner::Warning(_) => "Warning",
            CoreMsgInner::NotifyRouter(_) => "NotifyRouter",
        }
    }
}
