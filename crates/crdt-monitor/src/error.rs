use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("sampling is already running")]
    AlreadySampling,

    #[error("sampling is not running")]
    NotSampling,
}
