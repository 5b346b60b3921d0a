use std::sync::LazyLock;

use crate::protocol::ClientSdkInfo;

/// The version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The user agent sent along with envelopes by the default transports.
pub const USER_AGENT: &str = concat!("tracelet.rust/", env!("CARGO_PKG_VERSION"));

/// The SDK information attached to every event and transaction.
pub static SDK_INFO: LazyLock<ClientSdkInfo> = LazyLock::new(|| ClientSdkInfo {
    name: "tracelet.rust".into(),
    version: VERSION.into(),
});
