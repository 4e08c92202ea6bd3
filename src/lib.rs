pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod stream;

mod util;

pub use config::{load_config, AppConfig, NormalizerConfig};
pub use error::NormalizeError;
pub use protocol::canonical::{CanonicalUsage, FinishReason, StreamEvent, UnifiedFinishReason};
pub use stream::{
    normalize, normalize_json_response, normalize_response, normalize_sse_stream, EventStream,
    ResponseSource,
};
