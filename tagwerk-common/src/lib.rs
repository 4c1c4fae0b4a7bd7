pub mod feed;
pub mod model;
pub mod snowflake;
pub mod util;
