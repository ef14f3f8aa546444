//! Fire-and-forget notifications to the sibling router process

use fpvlink_core::{CoreEntity, LoopTime};
use fpvlink_msgs::notify::RouterNotification;
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use crate::{CoreEntityTrait, MessageQueue, PairingContext};

/// Local control channel to the router process
pub trait NotificationSink: Send {
    fn notify(&mut self, notification: RouterNotification);
}

/// Sink that only logs, for running without a router process
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&mut self, notification: RouterNotification) {
        tracing::info!("router notification: {:?}", notification);
    }
}

/// Collects notifications during a tick and forwards each distinct one once
pub struct RouterNotifier {
    sink: Box<dyn NotificationSink>,
    pending: Vec<RouterNotification>,
    sent: u64,
}

impl RouterNotifier {
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self {
            sink,
            pending: Vec::new(),
            sent: 0,
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.sent
    }
}

impl CoreEntityTrait for RouterNotifier {
    fn entity(&self) -> CoreEntity {
        CoreEntity::Router
    }

    fn rx_prim(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, message: CoreMsg) {
        match message.msg {
            CoreMsgInner::NotifyRouter(n) => {
                if !self.pending.contains(&n) {
                    self.pending.push(n);
                }
            }
            _ => {
                tracing::warn!("RouterNotifier: unexpected message {}", message.kind());
            }
        }
    }

    fn tick_end(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, _ts: LoopTime) -> bool {
        let had_work = !self.pending.is_empty();
        for n in self.pending.drain(..) {
            self.sink.notify(n);
            self.sent += 1;
        }
        had_work
    }
}
