pub mod server;

pub use server::{
    CartServer, CartServerHandle, ServerConfig, ServerError, ServerMetricsSnapshot,
    DEFAULT_BIND_ADDRESS,
};
