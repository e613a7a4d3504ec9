use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tempfile::TempDir;

use crate::config::Settings;
use crate::domain::{ErrorRecord, MintId, OutputRecord};
use crate::error::GibError;

/// Paths for one invocation, all derived from the mint list name.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: Utf8PathBuf,
    run_name: String,
    success_dataset: String,
    error_dataset: String,
    image_dir: String,
    image_extension: String,
}

impl RunLayout {
    pub fn new(list_path: &Utf8Path, root: Utf8PathBuf, settings: &Settings) -> Self {
        Self {
            root,
            run_name: run_name(list_path),
            success_dataset: settings.success_dataset.clone(),
            error_dataset: settings.error_dataset.clone(),
            image_dir: settings.image_dir.clone(),
            image_extension: settings.image_extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn run_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.run_name)
    }

    pub fn image_dir(&self) -> Utf8PathBuf {
        self.run_dir().join(&self.image_dir)
    }

    pub fn artifact_path(&self, mint: &MintId) -> Utf8PathBuf {
        self.run_dir().join(format!("{mint}.json"))
    }

    pub fn image_path(&self, mint: &MintId) -> Utf8PathBuf {
        self.image_dir()
            .join(format!("{mint}.{}", self.image_extension))
    }

    pub fn success_base(&self) -> Utf8PathBuf {
        self.root
            .join(format!("{} - {}", self.run_name, self.success_dataset))
    }

    pub fn error_base(&self) -> Utf8PathBuf {
        self.root
            .join(format!("{} - {}", self.run_name, self.error_dataset))
    }

    pub fn success_dataset(&self, zone: Zone) -> Dataset {
        Dataset::new(self.success_base(), OutputRecord::HEADER, zone)
    }

    pub fn error_dataset(&self, zone: Zone) -> Dataset {
        Dataset::new(self.error_base(), ErrorRecord::HEADER, zone)
    }

    pub fn ensure_run_dir(&self) -> Result<Utf8PathBuf, GibError> {
        let dir = self.run_dir();
        ensure_dir(&dir)?;
        Ok(dir)
    }

    pub fn ensure_image_dir(&self) -> Result<Utf8PathBuf, GibError> {
        let dir = self.image_dir();
        ensure_dir(&dir)?;
        Ok(dir)
    }

    /// Opens a staging area inside the run directory so that commits are
    /// plain renames on the same filesystem.
    pub fn stage(&self) -> Result<Staging, GibError> {
        let dir = tempfile::Builder::new()
            .prefix(".metagib-staging")
            .tempdir_in(self.run_dir().as_std_path())
            .map_err(|err| GibError::Persistence(format!("staging dir: {err}")))?;
        Ok(Staging {
            dir,
            moves: Vec::new(),
        })
    }
}

/// File name up to its first `.`, or a UTC timestamp when that is empty.
pub fn run_name(list_path: &Utf8Path) -> String {
    let file_name = list_path.file_name().unwrap_or_default();
    let stem = file_name.split('.').next().unwrap_or_default();
    if stem.is_empty() {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    } else {
        stem.to_string()
    }
}

/// Creates `path` and its parents; an existing directory is fine.
pub fn ensure_dir(path: &Utf8Path) -> Result<(), GibError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| GibError::Directory(format!("{path}: {err}")))
}

/// Files written for one mint that only become visible on [`Staging::commit`].
/// Dropping an uncommitted staging area deletes everything in it.
pub struct Staging {
    dir: TempDir,
    moves: Vec<(PathBuf, Utf8PathBuf)>,
}

impl Staging {
    pub fn write(&mut self, destination: Utf8PathBuf, content: &[u8]) -> Result<(), GibError> {
        let staged = self.reserve(destination);
        fs::write(&staged, content)
            .map_err(|err| GibError::Persistence(format!("{}: {err}", staged.display())))
    }

    /// Returns a staging path to fill in; it is moved to `destination` on commit.
    pub fn reserve(&mut self, destination: Utf8PathBuf) -> PathBuf {
        let staged = self
            .dir
            .path()
            .join(format!("{}.part", self.moves.len()));
        self.moves.push((staged.clone(), destination));
        staged
    }

    pub fn commit(self) -> Result<Vec<Utf8PathBuf>, GibError> {
        let mut committed = Vec::with_capacity(self.moves.len());
        for (staged, destination) in self.moves {
            replace_file(&staged, &destination)
                .map_err(|err| GibError::Persistence(format!("{destination}: {err}")))?;
            committed.push(destination);
        }
        Ok(committed)
    }
}

fn replace_file(from: &std::path::Path, to: &Utf8Path) -> io::Result<()> {
    if to.as_std_path().exists() {
        fs::remove_file(to.as_std_path())?;
    }
    fs::rename(from, to.as_std_path())
}

/// Clock used to pick the dated file.
#[derive(Debug, Clone, Copy)]
pub enum Zone {
    Named(Tz),
    Local,
}

impl Zone {
    pub fn resolve(name: &str) -> Self {
        match name.parse::<Tz>() {
            Ok(tz) => Zone::Named(tz),
            Err(_) => {
                tracing::warn!(timezone = name, "unknown time zone, using local time");
                Zone::Local
            }
        }
    }

    pub fn today(&self) -> NaiveDate {
        match self {
            Zone::Named(tz) => Utc::now().with_timezone(tz).date_naive(),
            Zone::Local => chrono::Local::now().date_naive(),
        }
    }
}

/// An append-only CSV file rotated by calendar day.
#[derive(Debug, Clone)]
pub struct Dataset {
    base: Utf8PathBuf,
    header: &'static str,
    zone: Zone,
}

impl Dataset {
    pub fn new(base: Utf8PathBuf, header: &'static str, zone: Zone) -> Self {
        Self { base, header, zone }
    }

    pub fn path_for(&self, date: NaiveDate) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{} - {}.csv", self.base, date.format("%Y-%m-%d")))
    }

    pub fn current_path(&self) -> Utf8PathBuf {
        self.path_for(self.zone.today())
    }

    pub fn append(&self, fields: &[&str]) -> Result<Utf8PathBuf, GibError> {
        self.append_on(self.zone.today(), fields)
    }

    /// The first writer of the day creates the file and its header.
    pub fn append_on(&self, date: NaiveDate, fields: &[&str]) -> Result<Utf8PathBuf, GibError> {
        let path = self.path_for(date);
        let line = csv_line(fields);
        let persist_err = |err: io::Error| GibError::Persistence(format!("{path}: {err}"));

        match OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(path.as_std_path())
        {
            Ok(mut file) => {
                let content = format!("{}\n{line}\n", self.header);
                file.write_all(content.as_bytes()).map_err(persist_err)?;
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let mut file = OpenOptions::new()
                    .append(true)
                    .open(path.as_std_path())
                    .map_err(persist_err)?;
                file.write_all(format!("{line}\n").as_bytes())
                    .map_err(persist_err)?;
            }
            Err(err) => return Err(persist_err(err)),
        }
        Ok(path)
    }
}

pub fn csv_line(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
