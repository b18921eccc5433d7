//! Request/response channel between embedded web content and the native host.
//!
//! - [`BridgeClient`]: content side. Correlates responses to requests by
//!   callback id, with a bounded wait.
//! - [`HostDispatcher`]: host side. Routes `(type, action)` pairs to
//!   capability handlers and injects the replies as scripts.
//! - [`serve_lines`]: NDJSON transport over any async reader.

mod client;
mod error;
mod handlers;
mod host;
mod loopback;
mod protocol;
mod stdio;

pub use client::{BridgeClient, BridgeConfig, ChannelEmitter, MessageEmitter, DEFAULT_REQUEST_TIMEOUT};
pub use error::{BridgeError, BridgeResult};
pub use handlers::{
    register_device_handlers, CameraDevice, CaptureOptions, CapturedImage, DeviceError,
    DeviceInfo, DeviceInfoProvider, Devices, FixedLocation, HostDeviceInfo, LocationProvider,
    PermissionStatus, Position, SessionTokenSource,
};
pub use host::{Capability, ChannelInjector, HandlerFn, HostDispatcher, ScriptInjector};
pub use loopback::Loopback;
pub use protocol::{
    new_callback_id, parse_dispatch_script, render_dispatch_script, salvage_callback_id,
    BridgeOutcome, BridgeRequest, BridgeResponseEvent, RESPONSE_EVENT,
};
pub use stdio::{serve_lines, spawn_script_writer};
