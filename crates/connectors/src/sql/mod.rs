pub mod client;
pub mod dialect;
pub mod driver;
pub mod drivers;
pub mod reader;
pub mod redshift;
pub mod schema;
pub mod table;
pub mod types;
pub mod writer;
