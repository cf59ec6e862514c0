//! Image encoding normalization.

/// Prefix every recognised image data URI starts with.
pub const DATA_URI_IMAGE_PREFIX: &str = "data:image/";

/// Prefix assumed for bare base64. The bytes are not inspected.
pub const DEFAULT_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Prepend the default JPEG data-URI prefix unless the string already carries an
/// image data URI. Prefixed input is returned unchanged.
pub fn normalize_image(image: &str) -> String {
    if image.starts_with(DATA_URI_IMAGE_PREFIX) {
        image.to_string()
    } else {
        format!("{}{}", DEFAULT_DATA_URI_PREFIX, image)
    }
}

pub fn normalize_images(images: &[String]) -> Vec<String> {
    images.iter().map(|image| normalize_image(image)).collect()
}
