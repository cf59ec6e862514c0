use serde::{Deserialize, Serialize};

/// Body accepted from callers.
#[derive(Debug, Deserialize)]
pub struct ForwardRequest {
    /// Base64 images, with or without a `data:image/...;base64,` prefix.
    pub images: Option<Vec<String>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub similar_images: Option<bool>,
}

/// Body sent to Plant.id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamPayload {
    pub images: Vec<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub similar_images: bool,
}
