pub mod db;
pub mod interval;
pub mod utils;
