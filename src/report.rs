//! CSV output of a run: the per-tick statistics series and dumps of the agent table.
//!
//! A report type is any `Serialize` row struct registered with [`define_report!`]. After
//! `add_report::<T>("name")`, every `send_report(row)` of type `T` appends one row to
//! `<directory>/<file_prefix>name.csv`. The directory, prefix and overwrite policy come from
//! [`ReportOptions`].
use std::any::TypeId;
use std::cell::RefCell;
use std::fs::{create_dir_all, File};
use std::path::PathBuf;

use csv::Writer;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::define_data_plugin;
use crate::error::ContagionError;
use crate::log::trace;
use crate::population::Agent;
use crate::HashMap;

pub trait Report: 'static {
    // Returns report type
    fn type_id(&self) -> TypeId;
    // Serializes the data with the correct writer
    fn serialize(&self, writer: &mut Writer<File>) -> Result<(), csv::Error>;
}

/// Use this macro to define a unique report type
#[macro_export]
macro_rules! define_report {
    ($name:ident) => {
        impl $crate::report::Report for $name {
            fn type_id(&self) -> std::any::TypeId {
                std::any::TypeId::of::<$name>()
            }

            fn serialize(
                &self,
                writer: &mut $crate::csv::Writer<std::fs::File>,
            ) -> Result<(), $crate::csv::Error> {
                writer.serialize(self)
            }
        }
    };
}
pub use define_report;

/// Where report files go and whether existing files may be replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    pub file_prefix: String,
    pub directory: PathBuf,
    pub overwrite: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            file_prefix: String::new(),
            directory: PathBuf::from("."),
            overwrite: false,
        }
    }
}

impl ReportOptions {
    pub fn file_prefix(&mut self, file_prefix: String) -> &mut ReportOptions {
        self.file_prefix = file_prefix;
        self
    }

    pub fn directory(&mut self, directory: PathBuf) -> &mut ReportOptions {
        self.directory = directory;
        self
    }

    pub fn overwrite(&mut self, overwrite: bool) -> &mut ReportOptions {
        self.overwrite = overwrite;
        self
    }

    /// Full path of the report called `short_name`.
    pub fn path_for(&self, short_name: &str) -> PathBuf {
        self.directory
            .join(format!("{}{short_name}.csv", self.file_prefix))
    }
}

/// One row of the statistics report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub tick: u64,
    pub susceptible: usize,
    pub infectious: usize,
    pub recovered: usize,
    pub fatalities: usize,
    pub in_treatment: usize,
}

define_report!(StatisticsReport);

struct ReportData {
    file_writers: RefCell<HashMap<TypeId, Writer<File>>>,
    config: ReportOptions,
}

// Registers a data container that stores
// * file_writers: Maps report type to file writer
// * config: The file naming options
define_data_plugin!(
    ReportPlugin,
    ReportData,
    ReportData {
        file_writers: RefCell::new(HashMap::default()),
        config: ReportOptions::default(),
    }
);

// Creates the file and all parent directories if they do not exist. Refuses to replace an
// existing file unless `overwrite` is set.
fn create_report_file(options: &ReportOptions, short_name: &str) -> Result<File, ContagionError> {
    let path = options.path_for(short_name);
    if path.exists() && !options.overwrite {
        return Err(ContagionError::ReportError(format!(
            "{} already exists; set overwrite to replace it",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    trace!("creating report file {}", path.display());
    Ok(File::create(path)?)
}

pub trait ContextReportExt {
    /// Returns the options used to name report files, for modification.
    fn report_options(&mut self) -> &mut ReportOptions;

    /// Opens the file for report type `T` under `short_name`.
    ///
    /// # Errors
    ///
    /// Returns a `ContagionError` if the file exists and overwriting is off, or it cannot be
    /// created.
    fn add_report<T: Report>(&mut self, short_name: &str) -> Result<(), ContagionError>;

    /// Writes a new row with columns following items in the report struct
    /// to the report file associated with the report type struct.
    ///
    /// # Errors
    ///
    /// Returns a `ContagionError` if no report of this type was added or the write fails.
    fn send_report<T: Report>(&self, report: T) -> Result<(), ContagionError>;

    /// Writes every row of `agents` to a new file called `short_name`.
    fn write_agent_table(&self, short_name: &str, agents: &[Agent])
        -> Result<(), ContagionError>;
}

impl ContextReportExt for Context {
    fn report_options(&mut self) -> &mut ReportOptions {
        &mut self.get_data_container_mut(ReportPlugin).config
    }

    fn add_report<T: Report>(&mut self, short_name: &str) -> Result<(), ContagionError> {
        let data_container = self.get_data_container_mut(ReportPlugin);
        let file = create_report_file(&data_container.config, short_name)?;
        let writer = Writer::from_writer(file);
        data_container
            .file_writers
            .borrow_mut()
            .insert(TypeId::of::<T>(), writer);
        Ok(())
    }

    fn send_report<T: Report>(&self, report: T) -> Result<(), ContagionError> {
        let no_writer =
            || ContagionError::ReportError("No writer found for the report type".to_string());
        // No data container will exist if no reports have been added
        let data_container = self.get_data_container(ReportPlugin).ok_or_else(no_writer)?;
        let mut writers = data_container
            .file_writers
            .try_borrow_mut()
            .map_err(|_| ContagionError::ReportError("report writers are busy".to_string()))?;
        let writer = writers.get_mut(&report.type_id()).ok_or_else(no_writer)?;
        report.serialize(writer)?;
        writer.flush()?;
        Ok(())
    }

    fn write_agent_table(
        &self,
        short_name: &str,
        agents: &[Agent],
    ) -> Result<(), ContagionError> {
        let options = self
            .get_data_container(ReportPlugin)
            .map(|data| data.config.clone())
            .unwrap_or_default();
        let mut writer = Writer::from_writer(create_report_file(&options, short_name)?);
        for agent in agents {
            writer.serialize(agent)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::{AgentId, HealthStatus};
    use tempfile::tempdir;

    #[derive(Serialize, Deserialize)]
    struct SampleReport {
        id: u32,
        value: String,
    }

    define_report!(SampleReport);

    fn context_in(directory: PathBuf) -> Context {
        let mut context = Context::new();
        context.report_options().directory(directory);
        context
    }

    #[test]
    fn add_and_send_report() {
        let temp_dir = tempdir().unwrap();
        let mut context = context_in(temp_dir.path().to_path_buf());
        context.add_report::<SampleReport>("sample_report").unwrap();
        context
            .send_report(SampleReport {
                id: 1,
                value: "Value,1".to_string(),
            })
            .unwrap();
        context
            .send_report(SampleReport {
                id: 2,
                value: "Value\n2".to_string(),
            })
            .unwrap();

        let file_path = temp_dir.path().join("sample_report.csv");
        let mut reader = csv::Reader::from_path(file_path).unwrap();
        let records: Vec<SampleReport> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, "Value,1");
        assert_eq!(records[1].id, 2);
        assert_eq!(records[1].value, "Value\n2");
    }

    #[test]
    fn prefix_and_nested_directory() {
        let temp_dir = tempdir().unwrap();
        let mut context = context_in(temp_dir.path().join("nested").join("run"));
        context.report_options().file_prefix("sim_".to_string());
        context.add_report::<StatisticsReport>("statistics").unwrap();
        assert!(temp_dir
            .path()
            .join("nested/run/sim_statistics.csv")
            .exists());
    }

    #[test]
    fn existing_file_needs_overwrite() {
        let temp_dir = tempdir().unwrap();
        let mut context = context_in(temp_dir.path().to_path_buf());
        context.add_report::<SampleReport>("sample_report").unwrap();

        let mut context = context_in(temp_dir.path().to_path_buf());
        assert!(matches!(
            context.add_report::<SampleReport>("sample_report"),
            Err(ContagionError::ReportError(_))
        ));
        context.report_options().overwrite(true);
        assert!(context.add_report::<SampleReport>("sample_report").is_ok());
    }

    #[test]
    fn send_report_without_adding_report() {
        let context = Context::new();
        let result = context.send_report(SampleReport {
            id: 1,
            value: "Test Value".to_string(),
        });
        assert!(matches!(result, Err(ContagionError::ReportError(_))));
    }

    #[test]
    fn agent_table_has_one_row_per_agent() {
        let temp_dir = tempdir().unwrap();
        let context = context_in(temp_dir.path().to_path_buf());
        let mut sick = Agent::new(AgentId(1));
        sick.status = HealthStatus::Infected;
        sick.infected_since = Some(4);
        context
            .write_agent_table("population", &[Agent::new(AgentId(0)), sick])
            .unwrap();

        let mut reader = csv::Reader::from_path(temp_dir.path().join("population.csv")).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "id");
        assert!(headers.iter().any(|header| header == "recovery_threshold"));
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        let status = headers.iter().position(|h| h == "status").unwrap();
        let since = headers.iter().position(|h| h == "infected_since").unwrap();
        assert_eq!(&rows[0][status], "Healthy");
        assert_eq!(&rows[0][since], "");
        assert_eq!(&rows[1][status], "Infected");
        assert_eq!(&rows[1][since], "4");
    }
}
