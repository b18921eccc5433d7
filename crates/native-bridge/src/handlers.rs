//! Device capability handlers.
//!
//! Each device sits behind a trait so hosts can plug in platform services.
//! [`register_device_handlers`] wires whatever is available into a
//! [`HostDispatcher`]; missing devices stay unsupported.

use crate::{Capability, HostDispatcher};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Failure reported by a device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("{0} permission denied")]
    PermissionDenied(String),

    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOptions {
    #[serde(default)]
    pub quality: Option<f64>,
    #[serde(default)]
    pub facing: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedImage {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    pub os_version: String,
    pub model: String,
    pub app_version: String,
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> Result<PermissionStatus, DeviceError>;
    async fn current_position(&self) -> Result<Position, DeviceError>;
}

#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn request_permission(&self) -> Result<PermissionStatus, DeviceError>;
    async fn capture(&self, options: CaptureOptions) -> Result<CapturedImage, DeviceError>;
}

pub trait DeviceInfoProvider: Send + Sync {
    fn info(&self) -> DeviceInfo;
}

/// Source of the current access token for `AUTH/GET_SESSION_TOKEN`.
#[async_trait]
pub trait SessionTokenSource: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// Devices available to the host.
#[derive(Default, Clone)]
pub struct Devices {
    pub location: Option<Arc<dyn LocationProvider>>,
    pub camera: Option<Arc<dyn CameraDevice>>,
    pub device_info: Option<Arc<dyn DeviceInfoProvider>>,
    pub session: Option<Arc<dyn SessionTokenSource>>,
}

fn to_value<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn permission_value(status: PermissionStatus) -> Result<Value, String> {
    Ok(serde_json::json!({ "status": status }))
}

/// Serializes access to one camera. Captures ask for permission first.
struct CameraGate {
    camera: Arc<dyn CameraDevice>,
    busy: Mutex<()>,
}

impl CameraGate {
    async fn request_permission(&self) -> Result<PermissionStatus, DeviceError> {
        let _guard = self.busy.lock().await;
        self.camera.request_permission().await
    }

    async fn capture(&self, options: CaptureOptions) -> Result<CapturedImage, DeviceError> {
        let _guard = self.busy.lock().await;
        match self.camera.request_permission().await? {
            PermissionStatus::Granted => {}
            _ => return Err(DeviceError::PermissionDenied("Camera".to_string())),
        }
        debug!(quality = ?options.quality, "Capturing image");
        self.camera.capture(options).await
    }
}

/// Register a handler for every device in `devices`.
pub fn register_device_handlers(dispatcher: &mut HostDispatcher, devices: Devices) {
    if let Some(location) = devices.location {
        let provider = location.clone();
        dispatcher.register(Capability::LocationGetCurrent, move |_| {
            let provider = provider.clone();
            async move {
                let position = provider.current_position().await.map_err(|e| e.to_string())?;
                to_value(position)
            }
        });
        dispatcher.register(Capability::LocationRequestPermission, move |_| {
            let provider = location.clone();
            async move {
                let status = provider.request_permission().await.map_err(|e| e.to_string())?;
                permission_value(status)
            }
        });
    }

    if let Some(camera) = devices.camera {
        let gate = Arc::new(CameraGate {
            camera,
            busy: Mutex::new(()),
        });
        let permission_gate = gate.clone();
        dispatcher.register(Capability::CameraRequestPermission, move |_| {
            let gate = permission_gate.clone();
            async move {
                let status = gate.request_permission().await.map_err(|e| e.to_string())?;
                permission_value(status)
            }
        });
        dispatcher.register(Capability::CameraCapture, move |payload| {
            let gate = gate.clone();
            async move {
                let options = match payload {
                    Some(payload) => serde_json::from_value(payload)
                        .map_err(|e| format!("Invalid capture options: {e}"))?,
                    None => CaptureOptions::default(),
                };
                let image = gate.capture(options).await.map_err(|e| e.to_string())?;
                to_value(image)
            }
        });
    }

    if let Some(device_info) = devices.device_info {
        dispatcher.register(Capability::DeviceGetInfo, move |_| {
            let info = device_info.info();
            async move { to_value(info) }
        });
    }

    if let Some(session) = devices.session {
        dispatcher.register(Capability::AuthGetSessionToken, move |_| {
            let session = session.clone();
            async move {
                match session.access_token().await {
                    Some(token) => Ok(serde_json::json!({ "accessToken": token })),
                    None => Err("No active session".to_string()),
                }
            }
        });
    }
}

/// Location source that always reports the same position.
pub struct FixedLocation {
    position: Position,
    permission: PermissionStatus,
}

impl FixedLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            position: Position {
                latitude,
                longitude,
                accuracy: None,
            },
            permission: PermissionStatus::Granted,
        }
    }

    #[must_use]
    pub fn with_permission(mut self, permission: PermissionStatus) -> Self {
        self.permission = permission;
        self
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn request_permission(&self) -> Result<PermissionStatus, DeviceError> {
        Ok(self.permission)
    }

    async fn current_position(&self) -> Result<Position, DeviceError> {
        match self.permission {
            PermissionStatus::Granted => Ok(self.position),
            _ => Err(DeviceError::PermissionDenied("Location".to_string())),
        }
    }
}

/// Device info for the machine running the host.
pub struct HostDeviceInfo {
    app_version: String,
}

impl HostDeviceInfo {
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            app_version: app_version.into(),
        }
    }
}

impl DeviceInfoProvider for HostDeviceInfo {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            platform: std::env::consts::OS.to_string(),
            os_version: std::env::consts::FAMILY.to_string(),
            model: std::env::consts::ARCH.to_string(),
            app_version: self.app_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BridgeRequest, ChannelInjector};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingCamera {
        permission: PermissionStatus,
        active: AtomicUsize,
        max_active: AtomicUsize,
        captures: AtomicUsize,
    }

    impl CountingCamera {
        fn new(permission: PermissionStatus) -> Self {
            Self {
                permission,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                captures: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CameraDevice for CountingCamera {
        async fn request_permission(&self) -> Result<PermissionStatus, DeviceError> {
            Ok(self.permission)
        }

        async fn capture(&self, _options: CaptureOptions) -> Result<CapturedImage, DeviceError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            let n = self.captures.fetch_add(1, Ordering::SeqCst);
            Ok(CapturedImage {
                uri: format!("file:///tmp/capture-{n}.jpg"),
                width: 640,
                height: 480,
                mime_type: "image/jpeg".to_string(),
            })
        }
    }

    fn dispatcher(devices: Devices) -> HostDispatcher {
        let (injector, _rx) = ChannelInjector::new();
        let mut dispatcher = HostDispatcher::new(Arc::new(injector));
        register_device_handlers(&mut dispatcher, devices);
        dispatcher
    }

    #[tokio::test]
    async fn test_location_reports_position() {
        let dispatcher = dispatcher(Devices {
            location: Some(Arc::new(FixedLocation::new(37.5, 127.0))),
            ..Devices::default()
        });

        let reply = dispatcher
            .dispatch(BridgeRequest::new("LOCATION", "GET_CURRENT"))
            .await;
        assert_eq!(
            reply.response.data,
            Some(json!({"latitude": 37.5, "longitude": 127.0}))
        );

        let reply = dispatcher
            .dispatch(BridgeRequest::new("LOCATION", "REQUEST_PERMISSION"))
            .await;
        assert_eq!(reply.response.data, Some(json!({"status": "granted"})));
    }

    #[tokio::test]
    async fn test_location_denied() {
        let dispatcher = dispatcher(Devices {
            location: Some(Arc::new(
                FixedLocation::new(0.0, 0.0).with_permission(PermissionStatus::Denied),
            )),
            ..Devices::default()
        });

        let reply = dispatcher
            .dispatch(BridgeRequest::new("LOCATION", "GET_CURRENT"))
            .await;
        assert_eq!(
            reply.response.error.as_deref(),
            Some("Location permission denied")
        );
    }

    #[tokio::test]
    async fn test_camera_captures_are_serialized() {
        let camera = Arc::new(CountingCamera::new(PermissionStatus::Granted));
        let dispatcher = Arc::new(dispatcher(Devices {
            camera: Some(camera.clone()),
            ..Devices::default()
        }));

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(BridgeRequest::new("CAMERA", "CAPTURE"))
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().response.success);
        }

        assert_eq!(camera.captures.load(Ordering::SeqCst), 3);
        assert_eq!(camera.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_without_permission_fails() {
        let camera = Arc::new(CountingCamera::new(PermissionStatus::Denied));
        let dispatcher = dispatcher(Devices {
            camera: Some(camera.clone()),
            ..Devices::default()
        });

        let reply = dispatcher
            .dispatch(BridgeRequest::new("CAMERA", "CAPTURE"))
            .await;
        assert_eq!(
            reply.response.error.as_deref(),
            Some("Camera permission denied")
        );
        assert_eq!(camera.captures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_session_token_handler() {
        struct NoSession;

        #[async_trait]
        impl SessionTokenSource for NoSession {
            async fn access_token(&self) -> Option<String> {
                None
            }
        }

        let dispatcher = dispatcher(Devices {
            session: Some(Arc::new(NoSession)),
            ..Devices::default()
        });
        let reply = dispatcher
            .dispatch(BridgeRequest::new("AUTH", "GET_SESSION_TOKEN"))
            .await;
        assert_eq!(reply.response.error.as_deref(), Some("No active session"));
    }

    #[tokio::test]
    async fn test_device_info_uses_host_constants() {
        let dispatcher = dispatcher(Devices {
            device_info: Some(Arc::new(HostDeviceInfo::new("1.2.3"))),
            ..Devices::default()
        });
        let reply = dispatcher
            .dispatch(BridgeRequest::new("DEVICE", "GET_INFO"))
            .await;
        let data = reply.response.data.unwrap();
        assert_eq!(data["platform"], std::env::consts::OS);
        assert_eq!(data["appVersion"], "1.2.3");
    }

    #[tokio::test]
    async fn test_panicking_device_info_becomes_failure() {
        struct BrokenInfo;

        impl DeviceInfoProvider for BrokenInfo {
            fn info(&self) -> DeviceInfo {
                panic!("no device registry")
            }
        }

        let dispatcher = dispatcher(Devices {
            device_info: Some(Arc::new(BrokenInfo)),
            ..Devices::default()
        });
        let reply = dispatcher
            .dispatch(BridgeRequest::new("DEVICE", "GET_INFO").with_callback_id("cb_1"))
            .await;
        assert_eq!(
            reply.response.error.as_deref(),
            Some("Handler panicked: no device registry")
        );
        assert_eq!(reply.callback_id.as_deref(), Some("cb_1"));
    }
}
