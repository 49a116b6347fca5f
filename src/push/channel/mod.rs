pub mod apns;
pub mod apns_token;
pub mod channel_trait;
pub mod windows_phone;

pub use apns::ApnsChannel;
pub use apns_token::{ApnsTokenSigner, AuthToken, AuthTokenCache};
pub use channel_trait::PushChannel;
pub use windows_phone::WindowsPhoneChannel;
