//! Open data published by ONS (Operador Nacional do Sistema Elétrico).
//! https://dados.ons.org.br/

pub mod config;
pub mod download;
pub mod error;
pub mod normalize;
pub mod plant_availability_archive;
pub mod stage;
