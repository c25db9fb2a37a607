pub mod coordinator;
pub mod error;
pub mod http_client;
pub mod models;
pub mod pod_view;
pub mod prober;
pub mod queue;
pub mod reducer;
pub mod url_resolver;
pub mod watch;

pub use coordinator::Coordinator;
pub use error::{
    CoreError,
    WatchError,
};
