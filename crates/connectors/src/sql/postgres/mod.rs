pub mod cursor;
pub mod params;
pub mod utils;
