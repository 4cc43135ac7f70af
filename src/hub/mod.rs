pub mod archive;
pub mod attachments;
pub mod audit;
pub mod config;
pub mod dispatch;
pub mod identity;
pub mod paths;
pub mod pipeline;
pub mod platform;
pub mod progress;
pub mod records;
pub mod relocation;
pub mod scanner;
pub mod store;
pub mod text;
pub mod util;
