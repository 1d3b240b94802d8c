pub mod provider;
pub mod providers;
pub mod segmentation;

pub use provider::{VisionError, VisionProvider};
pub use providers::create_provider;
pub use providers::gemini::GeminiVisionProvider;
pub use segmentation::{parse_segments, SegmentRecord};
