pub mod backend;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod errors;
pub mod exec;
pub mod fetch;
pub mod games;
pub mod logging;
pub mod paths;
pub mod registry;
pub mod state;
pub mod types;
