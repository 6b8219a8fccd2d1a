mod load;
mod types;

pub use load::{expand_path, get_weft_data_dir, load_config, load_default};
pub use types::{
    AppConfig, CheckpointConfig, EventsOutConfig, ExecutorConfig, LoggingConfig, RouteConfig,
    RouteKind,
};
