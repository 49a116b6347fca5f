pub mod channel;
pub mod classifier;
pub mod feedback;
pub mod queue;
pub mod result;
pub mod types;

pub use channel::{ApnsChannel, PushChannel, WindowsPhoneChannel};
pub use classifier::{classify_apns_status, classify_windows_phone_status, WindowsPhoneMessageStatus};
pub use feedback::{FeedbackListener, FeedbackSession};
pub use queue::{DeliveryQueue, NotificationQueue};
pub use result::{DeliveryOutcome, SendResult};
pub use types::{
    AppleNotification, ApplePushType, BatchingInterval, FeedbackRecord, Notification, PushVendor,
    WindowsPhoneKind, WindowsPhoneNotification,
};
