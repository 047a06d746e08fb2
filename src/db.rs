pub mod ons;
pub mod prod_db;
