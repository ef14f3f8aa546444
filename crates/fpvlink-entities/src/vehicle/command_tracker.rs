use fpvlink_core::{CoreEntity, ErrorKind, LinkId, LoopTime};
use fpvlink_msgs::command::{CommandId, CommandKey, VehicleCommand};
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use crate::MessageQueue;

/// A command sent to the vehicle that has not been acknowledged yet.
/// `change` is what the issuer applies once the vehicle confirms.
#[derive(Debug)]
pub struct PendingCommand<T> {
    pub key: CommandKey,
    pub id: CommandId,
    pub token: u32,
    pub issued: LoopTime,
    pub change: T,
}

/// Tracks outstanding vehicle commands of one issuing entity.
/// At most one command per class (and link) may be pending.
pub struct CommandTracker<T> {
    owner: CoreEntity,
    pending: Vec<PendingCommand<T>>,
    next_token: u32,
}

impl<T> CommandTracker<T> {
    pub fn new(owner: CoreEntity) -> Self {
        Self {
            owner,
            pending: Vec::new(),
            next_token: 1,
        }
    }

    pub fn is_pending(&self, key: CommandKey) -> bool {
        self.pending.iter().any(|p| p.key == key)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingCommand<T>> {
        self.pending.iter()
    }

    /// Hands a command to the Vehicle entity and remembers it as pending.
    /// Fails with CommandInProgress when a command of the same class is outstanding.
    pub fn issue(
        &mut self,
        queue: &mut MessageQueue,
        ts: LoopTime,
        id: CommandId,
        link: Option<LinkId>,
        param: i32,
        payload: Vec<u8>,
        change: T,
    ) -> Result<u32, ErrorKind> {
        let key = CommandKey::new(id, link);
        if self.is_pending(key) {
            tracing::debug!("{:?}: {} still pending, rejecting", self.owner, id);
            return Err(ErrorKind::CommandInProgress);
        }

        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1).max(1);

        tracing::debug!("-> {:?} issuing {} param {} token {}", self.owner, id, param, token);
        queue.push_back(CoreMsg::new(
            self.owner,
            CoreEntity::Vehicle,
            ts,
            CoreMsgInner::VehicleCommand(VehicleCommand { id, param, payload, token }),
        ));
        self.pending.push(PendingCommand {
            key,
            id,
            token,
            issued: ts,
            change,
        });
        Ok(token)
    }

    /// Removes and returns the pending command with the given token
    pub fn resolve(&mut self, token: u32) -> Option<PendingCommand<T>> {
        let pos = self.pending.iter().position(|p| p.token == token)?;
        Some(self.pending.remove(pos))
    }

    /// Removes and returns all commands older than `timeout_ms`
    pub fn expire(&mut self, now: LoopTime, timeout_ms: u64) -> Vec<PendingCommand<T>> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].issued.elapsed_at_least(now, timeout_ms) {
                expired.push(self.pending.remove(i));
            } else {
                i += 1;
            }
        }
        expired
    }
}
