pub mod cache;
pub mod category;
pub mod complaint;
pub mod config;
pub mod error;
pub mod event;
pub mod financial;
pub mod hierarchy;
pub mod identity;
pub mod inflation;
pub mod interval;
pub mod overrides;
pub mod pipeline;
pub mod quarter;
pub mod reconcile;
pub mod registry;
pub mod regulation;
pub mod store;
pub mod table;
pub mod types;
