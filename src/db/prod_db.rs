use std::path::PathBuf;

use crate::db::ons::config::PipelineConfig;
use crate::interval::month::Month;

pub struct ProdDb {}

impl ProdDb {
    /// Hourly plant availability, one CSV file per month.
    /// https://dados.ons.org.br/dataset/disponibilidade_usina_ho
    pub fn ons_plant_availability() -> PipelineConfig {
        PipelineConfig {
            periods: [(2025, 7), (2025, 8), (2025, 9)]
                .into_iter()
                .filter_map(|(y, m)| Month::new(y, m).ok())
                .collect(),
            url_template: "https://ons-aws-prod-opendata.s3.amazonaws.com/dataset/disponibilidade_usina_ho/DISPONIBILIDADE_USINA_{month}.csv".to_string(),
            connection_id: "warehouse_dev".to_string(),
            database: "ons".to_string(),
            schema: "STAGING".to_string(),
            table: "DISPONIBILIDADE_USINA".to_string(),
            stage_root: PathBuf::from("/data/Archive/Ons/Stage"),
            tmp_root: None,
            timeout_secs: 60,
        }
    }
}
