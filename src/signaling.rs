//! Annotation-based signaling between the plan controller and node agents.

pub mod filter;
pub mod v2;

pub use filter::SignalEventFilter;
#[allow(unused_imports)]
pub use v2::{
    AirgapUpdateItem, K0sUpdateItem, SIGNAL_DATA_ANNOTATION, SIGNAL_VERSION,
    SIGNAL_VERSION_ANNOTATION, SignalCommand, SignalData, SignalStatus, is_signaling_present,
};

/// Status values written by node agents into `SignalData.status`.
pub mod status {
    pub const DOWNLOADING: &str = "Downloading";
    pub const CORDONING: &str = "Cordoning";
    pub const APPLYING_UPDATE: &str = "ApplyingUpdate";
    pub const RESTART: &str = "Restart";
    pub const UNCORDONING: &str = "UnCordoning";
    pub const COMPLETED: &str = "Completed";
    pub const FAILED: &str = "Failed";
    pub const FAILED_DOWNLOAD: &str = "FailedDownload";
    pub const FAILED_UPDATE: &str = "FailedUpdate";
}
