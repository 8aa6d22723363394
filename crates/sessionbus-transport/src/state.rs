/// Lifecycle of a [`crate::PollingTransport`].
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl TransportState {
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}
