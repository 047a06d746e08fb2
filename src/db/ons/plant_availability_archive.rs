// Hourly availability of the power plants dispatched by ONS.
// https://dados.ons.org.br/dataset/disponibilidade_usina_ho

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use duckdb::{types::ValueRef, AccessMode, Connection};
use itertools::Itertools;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;

use super::config::PipelineConfig;
use super::download::{download_file, remove_file_quietly};
use super::error::IngestError;
use super::normalize::{cleaned_path, log_sample, normalize_file, EXPECTED_COLUMNS};
use super::stage::{Stage, StagedFile};
use crate::interval::month::Month;
use crate::utils::lib_duckdb::{connection_env_var, open_with_retry, resolve_connection};

/// Type of the measurement columns in the table.
pub const NUMERIC_TYPE: &str = "DECIMAL(18,6)";

const NUMERIC_COLUMNS: [&str; 3] = [
    "VAL_POTENCIAINSTALADA",
    "VAL_DISPOPERACIONAL",
    "VAL_DISPSINCRONIZADA",
];

fn sql_type(column: &str) -> &'static str {
    if NUMERIC_COLUMNS.contains(&column) {
        NUMERIC_TYPE
    } else {
        "VARCHAR"
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub subsystem_id: Option<String>,
    pub subsystem_name: Option<String>,
    pub state_id: Option<String>,
    pub state_name: Option<String>,
    pub plant_name: Option<String>,
    pub instant: Option<String>,
    pub installed_capacity: Option<Decimal>,
    pub operational_availability: Option<Decimal>,
    pub synchronized_availability: Option<Decimal>,
    pub fuel_type_name: Option<String>,
    pub plant_type_id: Option<String>,
    pub ons_id: Option<String>,
    pub ceg: Option<String>,
}

/// Where a period got to.  `Failed` can follow any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PeriodState {
    Pending,
    Downloaded,
    Normalized,
    Staged,
    Loaded,
    Cleaned,
    Failed,
}

impl fmt::Display for PeriodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PeriodState::*;
        let s = match self {
            Pending => "PENDING",
            Downloaded => "DOWNLOADED",
            Normalized => "NORMALIZED",
            Staged => "STAGED",
            Loaded => "LOADED",
            Cleaned => "CLEANED",
            Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Data rows in the staged file
    pub rows_in_file: usize,
    /// Rows the CSV reader could parse
    pub rows_parsed: usize,
    pub rows_loaded: usize,
}

impl LoadSummary {
    pub fn rows_rejected(&self) -> usize {
        self.rows_in_file.saturating_sub(self.rows_loaded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodReport {
    pub month: Month,
    pub state: PeriodState,
    /// Last step completed, the same as `state` unless the period failed
    pub last_completed: PeriodState,
    pub summary: Option<LoadSummary>,
    pub error: Option<String>,
}

impl PeriodReport {
    fn new(month: Month) -> PeriodReport {
        PeriodReport {
            month,
            state: PeriodState::Pending,
            last_completed: PeriodState::Pending,
            summary: None,
            error: None,
        }
    }

    fn advance(&mut self, state: PeriodState) {
        info!("{} {} -> {}", self.month, self.state, state);
        self.state = state;
        self.last_completed = state;
    }

    fn fail(&mut self, e: &IngestError) {
        error!("{} failed after {}: {}", self.month, self.last_completed, e);
        self.state = PeriodState::Failed;
        self.error = Some(e.to_string());
    }

    pub fn is_success(&self) -> bool {
        self.state == PeriodState::Cleaned
    }
}

#[derive(Debug, Clone)]
pub struct PlantAvailabilityArchive {
    pub config: PipelineConfig,
    pub duckdb_path: String,
}

impl PlantAvailabilityArchive {
    /// Resolve the named connection of the config from the environment.
    pub fn from_config(config: PipelineConfig) -> Result<PlantAvailabilityArchive, IngestError> {
        config.validate()?;
        let duckdb_path = resolve_connection(&config.connection_id).ok_or_else(|| {
            IngestError::Config(format!(
                "Unknown connection {}, set {}",
                config.connection_id,
                connection_env_var(&config.connection_id)
            ))
        })?;
        Ok(PlantAvailabilityArchive {
            config,
            duckdb_path,
        })
    }

    pub fn stage(&self) -> Stage {
        Stage::for_table(
            &self.config.stage_root,
            &self.config.database,
            &self.config.schema,
            &self.config.table,
        )
    }

    /// Open a read-write connection, creating the parent directory of the file
    /// if needed.
    pub fn connect(&self) -> Result<Connection, IngestError> {
        if let Some(parent) = Path::new(&self.duckdb_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
            }
        }
        open_with_retry(
            &self.duckdb_path,
            8,
            Duration::from_millis(25),
            AccessMode::ReadWrite,
        )
        .map_err(|source| IngestError::Connection {
            path: self.duckdb_path.clone(),
            source,
        })
    }

    pub fn create_table_sql(&self) -> String {
        let columns = EXPECTED_COLUMNS
            .iter()
            .map(|c| format!("    {} {}", c, sql_type(c)))
            .join(",\n");
        format!(
            r#"
CREATE SCHEMA IF NOT EXISTS {};
CREATE TABLE IF NOT EXISTS {} (
{}
);
"#,
            self.config.schema,
            self.config.qualified_table(),
            columns
        )
    }

    /// Create the destination table if it doesn't exist.
    pub fn create_table(&self, conn: &Connection) -> Result<(), IngestError> {
        conn.execute_batch(&self.create_table_sql())
            .map_err(|source| IngestError::Schema {
                table: self.config.qualified_table(),
                source,
            })
    }

    /// Name of the temporary table holding the raw file, unique for each month.
    fn tmp_table(&self, month: &Month) -> String {
        format!("tmp_{}_{}", self.config.table.to_lowercase(), month.token())
    }

    /// Insert the staged file into the table, matching columns by name.  Rows
    /// the CSV reader can't parse, and rows with a value that isn't a number in
    /// a numeric column, are skipped.  The staged file is purged after a
    /// successful load.
    pub fn copy_into(
        &self,
        conn: &Connection,
        month: &Month,
        stage: &Stage,
        staged: &StagedFile,
        rows_in_file: usize,
    ) -> Result<LoadSummary, IngestError> {
        let load_error = |source| IngestError::Load {
            table: self.config.qualified_table(),
            source,
        };
        let tmp = self.tmp_table(month);
        let sql = format!(
            r#"
CREATE OR REPLACE TEMPORARY TABLE {} AS
SELECT * FROM read_csv('{}',
    delim = ';',
    header = true,
    quote = '"',
    escape = '"',
    nullstr = ['', 'NULL'],
    all_varchar = true,
    null_padding = true,
    strict_mode = false,
    ignore_errors = true
);
"#,
            tmp,
            staged.path.to_string_lossy().replace('\'', "''")
        );
        conn.execute_batch(&sql).map_err(load_error)?;

        let file_columns: Vec<String> = {
            let mut stmt = conn
                .prepare(&format!("SELECT name FROM pragma_table_info('{}');", tmp))
                .map_err(load_error)?;
            let names = stmt
                .query_map([], |row| row.get::<usize, String>(0))
                .map_err(load_error)?;
            names.collect::<Result<_, _>>().map_err(load_error)?
        };
        let matched = match_columns(&file_columns);
        let unmatched: Vec<&String> = file_columns
            .iter()
            .filter(|c| !matched.iter().flatten().any(|m| m == *c))
            .collect();
        if !unmatched.is_empty() {
            info!("ignoring file columns {}", unmatched.iter().join(", "));
        }

        let rows_parsed: usize = conn
            .query_row(&format!("SELECT count(*) FROM {};", tmp), [], |row| {
                row.get::<usize, i64>(0)
            })
            .map_err(load_error)? as usize;

        let rows_loaded = conn
            .execute(&self.insert_sql(&tmp, &matched), [])
            .map_err(load_error)?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", tmp))
            .map_err(load_error)?;

        if let Err(e) = stage.purge(&staged.name) {
            warn!("Failed to purge {} from the stage: {}", staged.name, e);
        }

        let summary = LoadSummary {
            rows_in_file,
            rows_parsed,
            rows_loaded,
        };
        info!(
            "loaded {} rows into {} for {}, {} rejected",
            summary.rows_loaded,
            self.config.qualified_table(),
            month,
            summary.rows_rejected()
        );
        Ok(summary)
    }

    fn insert_sql(&self, tmp: &str, matched: &[Option<String>]) -> String {
        let select = EXPECTED_COLUMNS
            .iter()
            .zip(matched)
            .map(|(column, source)| match source {
                Some(source) => format!(
                    "    TRY_CAST({} AS {}) AS {}",
                    quote_ident(source),
                    sql_type(column),
                    column
                ),
                None => format!("    NULL::{} AS {}", sql_type(column), column),
            })
            .join(",\n");
        let bad_numbers = EXPECTED_COLUMNS
            .iter()
            .zip(matched)
            .filter(|(column, _)| NUMERIC_COLUMNS.contains(*column))
            .filter_map(|(_, source)| source.as_ref())
            .map(|source| {
                format!(
                    "({} IS NOT NULL AND TRY_CAST({} AS {}) IS NULL)",
                    quote_ident(source),
                    quote_ident(source),
                    NUMERIC_TYPE
                )
            })
            .collect::<Vec<_>>();
        let filter = if bad_numbers.is_empty() {
            String::new()
        } else {
            format!("WHERE NOT ({})", bad_numbers.join(" OR "))
        };
        format!(
            r#"
INSERT INTO {} ({})
SELECT
{}
FROM {}
{};
"#,
            self.config.qualified_table(),
            EXPECTED_COLUMNS.join(", "),
            select,
            tmp,
            filter
        )
    }

    /// Normalize a downloaded file, stage it and load it.  Doesn't remove the
    /// local files, see [`Self::cleanup`].
    pub fn load_file(
        &self,
        raw: &Path,
        month: &Month,
        report: &mut PeriodReport,
    ) -> Result<LoadSummary, IngestError> {
        let normalized = normalize_file(raw)?;
        report.advance(PeriodState::Normalized);
        log_sample(&normalized.path);

        let conn = self.connect()?;
        self.create_table(&conn)?;

        let stage = self.stage();
        let staged = stage.put(&normalized.path)?;
        report.advance(PeriodState::Staged);
        match stage.list() {
            Ok(files) => info!(
                "staged files: {}",
                files
                    .iter()
                    .map(|f| format!("{} ({} bytes)", f.name, f.size))
                    .join(", ")
            ),
            Err(e) => warn!("Could not list stage {}: {}", stage.dir().display(), e),
        }

        let summary = self.copy_into(&conn, month, &stage, &staged, normalized.rows)?;
        report.advance(PeriodState::Loaded);
        Ok(summary)
    }

    /// Remove the cleaned file, the downloaded file and their directory.
    /// Failures are logged, never returned.
    pub fn cleanup(raw: &Path) {
        remove_file_quietly(&cleaned_path(raw));
        remove_file_quietly(raw);
        if let Some(dir) = raw.parent() {
            if let Err(e) = fs::remove_dir(dir) {
                warn!("Failed to remove directory {}: {}", dir.display(), e);
            }
        }
    }

    /// Download, normalize, stage and load one month.  Errors are reported in
    /// the returned value, they don't stop other months.
    pub fn run_period(&self, month: Month) -> PeriodReport {
        let mut report = PeriodReport::new(month);
        info!("processing {} ...", month);

        let raw = match download_file(
            &self.config.url(&month),
            &self.config.basename(&month),
            self.config.timeout(),
            self.config.tmp_root.as_deref(),
        ) {
            Ok(path) => path,
            Err(e) => {
                report.fail(&e);
                return report;
            }
        };
        report.advance(PeriodState::Downloaded);

        let res = self.load_file(&raw, &month, &mut report);
        Self::cleanup(&raw);
        match res {
            Ok(summary) => {
                report.summary = Some(summary);
                report.advance(PeriodState::Cleaned);
            }
            Err(e) => report.fail(&e),
        }
        report
    }

    /// Process all the configured months, one after the other.
    pub fn run(&self) -> Vec<PeriodReport> {
        self.config
            .periods
            .iter()
            .map(|month| self.run_period(*month))
            .collect()
    }

    /// Rows with an instant in the given month.
    pub fn get_data(&self, conn: &Connection, month: &Month) -> Result<Vec<Row>, duckdb::Error> {
        let query = format!(
            r#"
SELECT {}
FROM {}
WHERE DIN_INSTANTE LIKE '{}%'
ORDER BY NOM_USINA, DIN_INSTANTE;
"#,
            EXPECTED_COLUMNS.join(", "),
            self.config.qualified_table(),
            month
        );
        let mut stmt = conn.prepare(&query)?;
        let decimal = |value: ValueRef| match value {
            ValueRef::Decimal(v) => Some(v),
            _ => None,
        };
        let rows = stmt.query_map([], |row| {
            Ok(Row {
                subsystem_id: row.get(0)?,
                subsystem_name: row.get(1)?,
                state_id: row.get(2)?,
                state_name: row.get(3)?,
                plant_name: row.get(4)?,
                instant: row.get(5)?,
                installed_capacity: decimal(row.get_ref(6)?),
                operational_availability: decimal(row.get_ref(7)?),
                synchronized_availability: decimal(row.get_ref(8)?),
                fuel_type_name: row.get(9)?,
                plant_type_id: row.get(10)?,
                ons_id: row.get(11)?,
                ceg: row.get(12)?,
            })
        })?;
        rows.collect()
    }
}

/// For each table column, the file column with the same name ignoring case.
pub fn match_columns(file_columns: &[String]) -> Vec<Option<String>> {
    EXPECTED_COLUMNS
        .iter()
        .map(|expected| {
            file_columns
                .iter()
                .find(|c| c.trim_start_matches('\u{feff}').trim().eq_ignore_ascii_case(expected))
                .cloned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::error::Error;
    use std::path::PathBuf;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::db::ons::test_server::{serve, Reply};
    use crate::db::prod_db::ProdDb;

    const HEADER: &str = "ID_SUBSISTEMA;NOM_SUBSISTEMA;ID_ESTADO;NOM_ESTADO;NOM_USINA;DIN_INSTANTE;VAL_POTENCIAINSTALADA;VAL_DISPOPERACIONAL;VAL_DISPSINCRONIZADA;NOM_TIPOCOMBUSTIVEL;ID_TIPOUSINA;ID_ONS;CEG";

    fn test_archive(root: &Path, base_url: &str) -> PlantAvailabilityArchive {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
        let mut config = ProdDb::ons_plant_availability();
        config.url_template = format!("{}/DISPONIBILIDADE_USINA_{{month}}.csv", base_url);
        config.stage_root = root.join("stage");
        config.tmp_root = Some(root.join("tmp"));
        config.timeout_secs = 5;
        fs::create_dir_all(root.join("tmp")).unwrap();
        PlantAvailabilityArchive {
            config,
            duckdb_path: root.join("db").join("ons.duckdb").to_string_lossy().to_string(),
        }
    }

    fn stage_file(archive: &PlantAvailabilityArchive, dir: &Path, content: &str) -> StagedFile {
        let local = dir.join("DISPONIBILIDADE_USINA_2025_07_cleaned.csv");
        fs::write(&local, content).unwrap();
        archive.stage().put(&local).unwrap()
    }

    fn count(conn: &Connection, archive: &PlantAvailabilityArchive) -> i64 {
        conn.query_row(
            &format!("SELECT count(*) FROM {}", archive.config.qualified_table()),
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn match_columns_ignores_case_and_order() {
        let file_columns: Vec<String> = ["ceg", "Extra", "\u{feff}id_subsistema", "Nom_Usina"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let matched = match_columns(&file_columns);
        assert_eq!(matched.len(), 13);
        assert_eq!(matched[0], Some("\u{feff}id_subsistema".to_string()));
        assert_eq!(matched[4], Some("Nom_Usina".to_string()));
        assert_eq!(matched[12], Some("ceg".to_string()));
        assert_eq!(matched.iter().flatten().count(), 3);
    }

    #[test]
    fn create_table_is_idempotent() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = test_archive(dir.path(), "http://127.0.0.1:1");
        let conn = archive.connect()?;
        archive.create_table(&conn)?;
        archive.create_table(&conn)?;
        let types: Vec<(String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = 'STAGING' AND table_name = 'DISPONIBILIDADE_USINA' \
                 ORDER BY ordinal_position",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        let names: Vec<&str> = types.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, EXPECTED_COLUMNS);
        assert_eq!(types[5].1, "VARCHAR");
        assert_eq!(types[6].1, "DECIMAL(18,6)");
        assert_eq!(types[12].1, "VARCHAR");
        Ok(())
    }

    #[test]
    fn copy_into_nulls_and_bad_rows() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = test_archive(dir.path(), "http://127.0.0.1:1");
        let content = format!(
            "\u{feff}{}\n\
             SE;SUDESTE;RJ;RIO DE JANEIRO;Angra 1;2025-07-01 00:00:00;640;NULL;;Nuclear;UTE;RJUSAN1;CEG1\n\
             SE;SUDESTE;RJ;RIO DE JANEIRO;Angra 2;2025-07-01 00:00:00;abc;1350;1350;Nuclear;UTE;RJUSAN2;CEG2\n\
             S;SUL;PR;PARANA;\"Itaipu; 60Hz\";2025-07-01 00:00:00;7000.5;7000;6999.25;Hídrica;UHE;PRITAI;CEG3\n",
            HEADER
        );
        let staged = stage_file(&archive, dir.path(), &content);
        let month: Month = "2025_07".parse()?;
        let conn = archive.connect()?;
        archive.create_table(&conn)?;
        let summary = archive.copy_into(&conn, &month, &archive.stage(), &staged, 3)?;

        assert_eq!(summary.rows_parsed, 3);
        assert_eq!(summary.rows_loaded, 2);
        assert_eq!(summary.rows_rejected(), 1);
        // staged file was purged
        assert!(archive.stage().list()?.is_empty());

        let rows = archive.get_data(&conn, &month)?;
        assert_eq!(rows.len(), 2);
        let angra = &rows[0];
        assert_eq!(angra.plant_name.as_deref(), Some("Angra 1"));
        assert_eq!(angra.installed_capacity, Some(dec!(640)));
        assert_eq!(angra.operational_availability, None);
        assert_eq!(angra.synchronized_availability, None);
        assert_eq!(angra.ceg.as_deref(), Some("CEG1"));
        let itaipu = &rows[1];
        assert_eq!(itaipu.plant_name.as_deref(), Some("Itaipu; 60Hz"));
        assert_eq!(itaipu.synchronized_availability, Some(dec!(6999.25)));
        assert_eq!(itaipu.fuel_type_name.as_deref(), Some("Hídrica"));
        Ok(())
    }

    #[test]
    fn copy_into_matches_by_name() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = test_archive(dir.path(), "http://127.0.0.1:1");
        // lower case, shuffled, an extra column, most columns missing
        let content = "ceg;extra;nom_usina;din_instante;val_dispoperacional\n\
                       CEG9;x;Tucurui;2025-07-02 10:00:00;8370\n";
        let staged = stage_file(&archive, dir.path(), content);
        let month: Month = "2025_07".parse()?;
        let conn = archive.connect()?;
        archive.create_table(&conn)?;
        let summary = archive.copy_into(&conn, &month, &archive.stage(), &staged, 1)?;
        assert_eq!(summary.rows_loaded, 1);

        let rows = archive.get_data(&conn, &month)?;
        assert_eq!(rows[0].plant_name.as_deref(), Some("Tucurui"));
        assert_eq!(rows[0].ceg.as_deref(), Some("CEG9"));
        assert_eq!(rows[0].operational_availability, Some(dec!(8370)));
        assert_eq!(rows[0].subsystem_id, None);
        assert_eq!(rows[0].installed_capacity, None);
        Ok(())
    }

    #[test]
    fn copy_into_tolerates_extra_field() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = test_archive(dir.path(), "http://127.0.0.1:1");
        let content = format!(
            "{}\n\
             N;NORTE;PA;PARA;Belo Monte;2025-07-01 00:00:00;11233;11000;10000;Hídrica;UHE;PABMT;CEG1;UNEXPECTED\n\
             N;NORTE;PA;PARA;Tucurui;2025-07-01 00:00:00;8370;8000;7000;Hídrica;UHE;PATUC;CEG2\n\
             N;NORTE;PA;PARA;Curua-Una;2025-07-01 00:00:00;42;40;30;Hídrica;UHE;PACUR;CEG3\n",
            HEADER
        );
        let staged = stage_file(&archive, dir.path(), &content);
        let month: Month = "2025_07".parse()?;
        let conn = archive.connect()?;
        archive.create_table(&conn)?;
        let summary = archive.copy_into(&conn, &month, &archive.stage(), &staged, 3)?;

        // the trailing field is ignored, the row is kept
        assert_eq!(summary.rows_loaded, 3);
        assert_eq!(summary.rows_rejected(), 0);
        let plants: Vec<String> = archive
            .get_data(&conn, &month)?
            .into_iter()
            .filter_map(|r| r.plant_name)
            .collect();
        assert!(plants.contains(&"Belo Monte".to_string()));
        assert!(plants.contains(&"Tucurui".to_string()));
        assert!(plants.contains(&"Curua-Una".to_string()));
        Ok(())
    }

    #[test]
    fn report_as_json() -> Result<(), Box<dyn Error>> {
        let mut report = PeriodReport::new("2025_07".parse()?);
        report.advance(PeriodState::Loaded);
        report.summary = Some(LoadSummary {
            rows_in_file: 3,
            rows_parsed: 3,
            rows_loaded: 2,
        });
        report.fail(&IngestError::Config("bad".to_string()));
        let value = serde_json::to_value(&report)?;
        assert_eq!(value["month"], "2025_07");
        assert_eq!(value["state"], "Failed");
        assert_eq!(value["last_completed"], "Loaded");
        assert_eq!(value["summary"]["rows_loaded"], 2);
        assert_eq!(value["error"], report.error.clone().unwrap());
        Ok(())
    }

    #[test]
    fn copy_into_missing_staged_file_fails() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = test_archive(dir.path(), "http://127.0.0.1:1");
        let staged = stage_file(&archive, dir.path(), &format!("{}\n", HEADER));
        archive.stage().purge(&staged.name)?;
        let month: Month = "2025_07".parse()?;
        let conn = archive.connect()?;
        archive.create_table(&conn)?;
        let res = archive.copy_into(&conn, &month, &archive.stage(), &staged, 0);
        assert!(matches!(res, Err(IngestError::Load { .. })));
        Ok(())
    }

    #[test]
    fn run_two_months() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let july = "id_subsistema,nom_subsistema,id_estado,nom_estado,nom_usina,din_instante,val_potenciainstalada,val_dispoperacional,val_dispsincronizada,nom_tipocombustivel,id_tipousina,id_ons,ceg\n\
                    SE,SUDESTE,RJ,RIO DE JANEIRO,Angra 1,2025-07-01 00:00:00,640,640,640,Nuclear,UTE,RJUSAN1,CEG1\n\
                    SE,SUDESTE,RJ,RIO DE JANEIRO,Angra 1,2025-07-01 01:00:00,640,600,NULL,Nuclear,UTE,RJUSAN1,CEG1\n";
        let august = format!(
            "\u{feff}{}\nS;SUL;PR;PARANA;Itaipu;2025-08-01 00:00:00;14000;13000;12000;Hídrica;UHE;PRITAI;CEG3\n",
            HEADER.to_lowercase()
        );
        let base = serve(vec![
            Reply::ok("/DISPONIBILIDADE_USINA_2025_07.csv", july),
            Reply::ok("/DISPONIBILIDADE_USINA_2025_08.csv", &august),
        ]);
        let mut archive = test_archive(dir.path(), &base);
        archive.config.periods = vec!["2025_07".parse()?, "2025_08".parse()?];

        let reports = archive.run();
        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert!(report.is_success(), "{:?}", report);
            assert_eq!(report.state, PeriodState::Cleaned);
            assert_eq!(report.error, None);
        }
        assert_eq!(reports[0].summary.map(|s| s.rows_loaded), Some(2));
        assert_eq!(reports[1].summary.map(|s| s.rows_loaded), Some(1));

        // temporary files are gone, stage is empty
        let tmp: Vec<PathBuf> = fs::read_dir(dir.path().join("tmp"))?
            .map(|e| e.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        assert!(tmp.is_empty(), "{:?}", tmp);
        assert!(archive.stage().list()?.is_empty());

        let conn = archive.connect()?;
        let july_rows = archive.get_data(&conn, &"2025_07".parse()?)?;
        assert_eq!(july_rows.len(), 2);
        assert_eq!(july_rows[1].synchronized_availability, None);
        assert_eq!(july_rows[1].operational_availability, Some(dec!(600)));
        assert_eq!(count(&conn, &archive), 3);

        // no duplicate guard, a rerun appends again
        drop(conn);
        let reports = archive.run();
        assert!(reports.iter().all(|r| r.is_success()));
        let conn = archive.connect()?;
        assert_eq!(count(&conn, &archive), 6);
        Ok(())
    }

    #[test]
    fn run_missing_month_fails_without_load() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let july = format!(
            "{}\nSE;SUDESTE;RJ;RIO DE JANEIRO;Angra 1;2025-07-01 00:00:00;640;640;640;Nuclear;UTE;RJUSAN1;CEG1\n",
            HEADER
        );
        let base = serve(vec![Reply::ok("/DISPONIBILIDADE_USINA_2025_07.csv", &july)]);
        let mut archive = test_archive(dir.path(), &base);
        archive.config.periods = vec!["2099_01".parse()?, "2025_07".parse()?];

        let reports = archive.run();
        assert_eq!(reports[0].state, PeriodState::Failed);
        assert_eq!(reports[0].last_completed, PeriodState::Pending);
        assert!(reports[0].error.as_deref().unwrap().contains("404"));
        assert_eq!(reports[0].summary, None);
        // other months are not affected
        assert!(reports[1].is_success());

        let conn = archive.connect()?;
        assert!(archive.get_data(&conn, &"2099_01".parse()?)?.is_empty());
        assert_eq!(count(&conn, &archive), 1);
        Ok(())
    }

    #[test]
    fn run_undecodable_file_fails_and_cleans_up() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let base = serve(vec![Reply {
            path: "/DISPONIBILIDADE_USINA_2025_07.csv".to_string(),
            status: 200,
            body: b"nom_usina;val\n\xe3\xe3;1\n".to_vec(),
        }]);
        let mut archive = test_archive(dir.path(), &base);
        archive.config.periods = vec!["2025_07".parse()?];

        let reports = archive.run();
        assert_eq!(reports[0].state, PeriodState::Failed);
        assert_eq!(reports[0].last_completed, PeriodState::Downloaded);
        assert_eq!(fs::read_dir(dir.path().join("tmp"))?.count(), 0);
        Ok(())
    }

    #[test]
    fn from_config_needs_connection() -> Result<(), Box<dyn Error>> {
        let mut config = ProdDb::ons_plant_availability();
        config.connection_id = "archive_test_unset".to_string();
        assert!(matches!(
            PlantAvailabilityArchive::from_config(config.clone()),
            Err(IngestError::Config(_))
        ));
        config.connection_id = "archive_test_set".to_string();
        env::set_var("ARCHIVE_TEST_SET_DUCKDB_PATH", "/tmp/archive_test.duckdb");
        let archive = PlantAvailabilityArchive::from_config(config)?;
        assert_eq!(archive.duckdb_path, "/tmp/archive_test.duckdb");
        Ok(())
    }

    #[ignore]
    #[test]
    fn update_db() -> Result<(), Box<dyn Error>> {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
        let config = ProdDb::ons_plant_availability().with_periods(vec!["2025_07".parse()?]);
        let archive = PlantAvailabilityArchive::from_config(config)?;
        let reports = archive.run();
        assert!(reports[0].is_success());
        Ok(())
    }
}
