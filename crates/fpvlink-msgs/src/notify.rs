use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    PartialCoverage,
    MultipleLinksSameUsage,
    LinkTopologyInconsistent,
    BlockUnrecoverable,
    CommandFailed,
    SikWorkerFailed,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Warning surfaced to the user. Persistent warnings stay until dismissed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserWarning {
    pub kind: WarningKind,
    pub text: String,
    pub persistent: bool,
}

impl UserWarning {
    pub fn once(kind: WarningKind, text: impl Into<String>) -> Self {
        Self { kind, text: text.into(), persistent: false }
    }

    pub fn persistent(kind: WarningKind, text: impl Into<String>) -> Self {
        Self { kind, text: text.into(), persistent: true }
    }
}

/// Fire-and-forget notifications for the router process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterNotification {
    ControllerSettingsChanged,
    ModelChanged,
}
