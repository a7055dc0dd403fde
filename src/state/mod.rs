pub mod app_state;
pub mod registry;
pub mod shared;
pub mod source;

pub use app_state::{AppState, MediaEvent};
pub use registry::{Registry, RegistrySnapshot};
pub use shared::SharedArbiter;
pub use source::{PlaybackStatus, Source, SourceId, TrackInfo};
