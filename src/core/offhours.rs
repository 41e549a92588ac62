use chrono::{DateTime, Local};

/// Admission-gate signal. Produced outside the client; the UI only renders it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffHoursStatus {
    pub blocked: bool,
    pub unblock_at: Option<DateTime<Local>>,
    pub message: String,
}

impl OffHoursStatus {
    pub fn open() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn blocked(message: impl Into<String>, unblock_at: Option<DateTime<Local>>) -> Self {
        Self {
            blocked: true,
            unblock_at,
            message: message.into(),
        }
    }
}

/// Source of off-hours decisions, polled periodically by the terminal driver.
pub trait OffHoursSource: Send + Sync {
    fn check(&self) -> OffHoursStatus;
}

/// Used when no off-hours policy is configured.
pub struct Unrestricted;

impl OffHoursSource for Unrestricted {
    fn check(&self) -> OffHoursStatus {
        OffHoursStatus::open()
    }
}
