pub mod metrics;
pub mod plant_id;

pub use self::metrics::{get_metrics, init_metrics};
pub use plant_id::{PlantIdClient, UpstreamClient, UpstreamError, UpstreamReply};
