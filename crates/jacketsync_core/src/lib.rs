pub mod config;
pub mod decode;
pub mod images;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod records;
pub mod runtime;
pub mod scrape;
pub mod store;
pub mod wiki;
