use std::collections::HashMap;

use fpvlink_config::SharedConfig;
use fpvlink_core::{CoreEntity, LoopTime};
use fpvlink_msgs::command::{CommandId, CommandOutcome, CommandResult, LinkActivity, VehicleAck, VehicleCommand};
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use crate::{CoreEntityTrait, MessageQueue, PairingContext};

/// Command channel to the vehicle. Returns whether the command was accepted
/// for sending, not whether it was applied.
pub trait CommandChannel: Send {
    fn send_command(&mut self, id: CommandId, param: i32, payload: &[u8], wire_token: u32) -> bool;
}

/// Channel used when no transport to the vehicle is available. Refuses everything.
pub struct DetachedChannel;

impl CommandChannel for DetachedChannel {
    fn send_command(&mut self, id: CommandId, param: i32, _payload: &[u8], _wire_token: u32) -> bool {
        tracing::debug!("DetachedChannel: dropping {} param {}", id, param);
        false
    }
}

struct Outstanding {
    issuer: CoreEntity,
    issuer_token: u32,
    id: CommandId,
    sent: LoopTime,
}

/// Forwards commands from core entities to the vehicle and routes
/// acknowledgments back to whoever issued the command. Every acknowledgment
/// proves the command link is alive and is reported to the retransmission
/// coordinator.
pub struct VehicleLink {
    config: SharedConfig,
    channel: Box<dyn CommandChannel>,
    outstanding: HashMap<u32, Outstanding>,
    next_wire_token: u32,
    ts: LoopTime,
}

impl VehicleLink {
    pub fn new(config: SharedConfig, channel: Box<dyn CommandChannel>) -> Self {
        Self {
            config,
            channel,
            outstanding: HashMap::new(),
            // Random start so acks for a previous session never match
            next_wire_token: rand::random::<u32>() | 1,
            ts: LoopTime::default(),
        }
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    fn rx_command(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, issuer: CoreEntity, cmd: VehicleCommand) {
        let accepted = if ctx.is_paired() {
            let wire_token = self.next_wire_token;
            self.next_wire_token = self.next_wire_token.wrapping_add(1);
            let ok = self.channel.send_command(cmd.id, cmd.param, &cmd.payload, wire_token);
            if ok {
                self.outstanding.insert(
                    wire_token,
                    Outstanding {
                        issuer,
                        issuer_token: cmd.token,
                        id: cmd.id,
                        sent: self.ts,
                    },
                );
            }
            ok
        } else {
            tracing::debug!("VehicleLink: no vehicle paired, not sending {}", cmd.id);
            false
        };

        if !accepted {
            tracing::warn!("VehicleLink: {} from {:?} not accepted for sending", cmd.id, issuer);
            queue.push_back(CoreMsg::new(
                CoreEntity::Vehicle,
                issuer,
                self.ts,
                CoreMsgInner::CommandResult(CommandResult {
                    id: cmd.id,
                    token: cmd.token,
                    outcome: CommandOutcome::NotSent,
                }),
            ));
        }
    }

    fn rx_ack(&mut self, queue: &mut MessageQueue, ack: VehicleAck) {
        queue.push_back(CoreMsg::new(
            CoreEntity::Vehicle,
            CoreEntity::Retransmit,
            self.ts,
            CoreMsgInner::LinkActivity(LinkActivity { last_ack: self.ts }),
        ));

        let Some(out) = self.outstanding.remove(&ack.token) else {
            tracing::debug!("VehicleLink: ack for unknown token {} ({})", ack.token, ack.id);
            return;
        };
        if out.id != ack.id {
            tracing::warn!("VehicleLink: ack token {} for {} but sent {}", ack.token, ack.id, out.id);
        }
        let outcome = if ack.success { CommandOutcome::Acked } else { CommandOutcome::Nacked };
        tracing::debug!("<- VehicleLink {} {:?} for {:?}", out.id, outcome, out.issuer);
        queue.push_back(CoreMsg::new(
            CoreEntity::Vehicle,
            out.issuer,
            self.ts,
            CoreMsgInner::CommandResult(CommandResult {
                id: out.id,
                token: out.issuer_token,
                outcome,
            }),
        ));
    }
}

impl CoreEntityTrait for VehicleLink {
    fn entity(&self) -> CoreEntity {
        CoreEntity::Vehicle
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.config = config;
    }

    fn tick_start(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, ts: LoopTime) {
        self.ts = ts;

        // Issuers time out their own commands; forget ours well after that
        let forget_after = self.config.config().controller.command_timeout_ms * 4;
        self.outstanding.retain(|token, out| {
            let keep = !out.sent.elapsed_at_least(ts, forget_after);
            if !keep {
                tracing::debug!("VehicleLink: forgetting {} token {} from {:?}", out.id, token, out.issuer);
            }
            keep
        });
    }

    fn rx_prim(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, message: CoreMsg) {
        match message.msg {
            CoreMsgInner::VehicleCommand(cmd) => self.rx_command(queue, ctx, message.src, cmd),
            CoreMsgInner::VehicleAck(ack) => self.rx_ack(queue, ack),
            _ => {
                tracing::warn!("VehicleLink: unexpected message {}", message.kind());
            }
        }
    }
}
