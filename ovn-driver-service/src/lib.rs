//! ovn-driver-service: remote network-driver plugin
//!
//! Exposes the OVN driver to the container engine over the plugin socket.

pub mod plugin_api;
pub mod server;

pub use plugin_api::{create_router, ApiError, PLUGIN_CONTENT_TYPE};
pub use server::PluginServer;
