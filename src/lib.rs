pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod push;

pub use config::PushConfig;
pub use error::{PushError, Result};
pub use push::{
    ApnsChannel, DeliveryOutcome, DeliveryQueue, FeedbackListener, Notification, NotificationQueue,
    PushChannel, SendResult, WindowsPhoneChannel,
};
