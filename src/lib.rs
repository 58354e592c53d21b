pub mod feed;
pub mod fullness;
pub mod geo;
pub mod output;
pub mod registry;
pub mod settings;
pub mod snapshot;
pub mod store;
pub mod trends;
