//! User-visible warnings and persistent alerts

use std::collections::VecDeque;

use fpvlink_config::SharedConfig;
use fpvlink_core::{CoreEntity, LoopTime};
use fpvlink_msgs::notify::{UserWarning, WarningKind};
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use crate::{CoreEntityTrait, MessageQueue, PairingContext};

const MAX_RECENT: usize = 32;

/// A persistent alert, shown until the user dismisses it
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: u32,
    pub kind: WarningKind,
    pub text: String,
    pub since: LoopTime,
}

/// Shows each distinct warning once per change. A warning identical to the
/// last one of its kind is not shown again until something different was reported.
pub struct WarningBoard {
    config: SharedConfig,
    recent: VecDeque<(LoopTime, UserWarning)>,
    last_by_kind: Vec<(WarningKind, String)>,
    alerts: Vec<Alert>,
    next_alert_id: u32,
    ts: LoopTime,
}

impl WarningBoard {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            recent: VecDeque::new(),
            last_by_kind: Vec::new(),
            alerts: Vec::new(),
            next_alert_id: 1,
            ts: LoopTime::default(),
        }
    }

    /// One-shot warnings not yet consumed by the UI
    pub fn take_recent(&mut self) -> Vec<UserWarning> {
        self.recent.drain(..).map(|(_, w)| w).collect()
    }

    pub fn recent(&self) -> impl Iterator<Item = &UserWarning> {
        self.recent.iter().map(|(_, w)| w)
    }

    pub fn active_alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Returns false if no alert with that id exists
    pub fn dismiss(&mut self, id: u32) -> bool {
        let before = self.alerts.len();
        self.alerts.retain(|a| a.id != id);
        let removed = self.alerts.len() != before;
        if removed && !self.alerts.iter().any(|a| a.kind == WarningKind::SikWorkerFailed) {
            self.config.state_write().sik_failed = false;
        }
        removed
    }

    fn post(&mut self, warning: UserWarning) {
        if warning.persistent {
            if self.alerts.iter().any(|a| a.kind == warning.kind && a.text == warning.text) {
                return;
            }
            tracing::error!("alert: {}: {}", warning.kind, warning.text);
            self.alerts.push(Alert {
                id: self.next_alert_id,
                kind: warning.kind,
                text: warning.text,
                since: self.ts,
            });
            self.next_alert_id += 1;
            return;
        }

        if let Some(entry) = self.last_by_kind.iter_mut().find(|(k, _)| *k == warning.kind) {
            if entry.1 == warning.text {
                tracing::trace!("warning suppressed, unchanged: {}", warning.text);
                return;
            }
            entry.1 = warning.text.clone();
        } else {
            self.last_by_kind.push((warning.kind, warning.text.clone()));
        }

        tracing::warn!("warning: {}: {}", warning.kind, warning.text);
        self.recent.push_back((self.ts, warning));
        while self.recent.len() > MAX_RECENT {
            self.recent.pop_front();
        }
    }
}

impl CoreEntityTrait for WarningBoard {
    fn entity(&self) -> CoreEntity {
        CoreEntity::Warnings
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.config = config;
    }

    fn tick_start(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, ts: LoopTime) {
        self.ts = ts;
    }

    fn rx_prim(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, message: CoreMsg) {
        match message.msg {
            CoreMsgInner::Warning(w) => self.post(w),
            _ => {
                tracing::warn!("WarningBoard: unexpected message {}", message.kind());
            }
        }
    }
}
