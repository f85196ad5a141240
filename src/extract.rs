use crate::error::Error;
use filetime::{set_file_mtime, FileTime};
use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader};
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use unrar::Archive as RarArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZ,
    Rar,
}

/// Magic prefixes checked in order. Rar v5 comes before v4 because the v4
/// signature is a prefix of the v5 one.
const MAGIC_PAIRS: &[(&[u8], ArchiveFormat)] = &[
    (&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C], ArchiveFormat::SevenZ),
    (
        &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00],
        ArchiveFormat::Rar,
    ),
    (
        &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00],
        ArchiveFormat::Rar,
    ),
    (b"PK\x03\x04", ArchiveFormat::Zip),
    (b"PK\x05\x06", ArchiveFormat::Zip),
    (b"PK\x07\x08", ArchiveFormat::Zip),
];

/// Identifies the payload by leading magic bytes. File extensions are never
/// consulted; origins routinely serve mislabeled downloads.
pub fn sniff_format(payload: &[u8]) -> Option<ArchiveFormat> {
    MAGIC_PAIRS
        .iter()
        .find(|(magic, _)| payload.starts_with(magic))
        .map(|(_, format)| *format)
}

/// Extracts an in-memory archive into `dest`, which is expected to be a fresh
/// scratch directory. Existing files are never overwritten and entry paths
/// that would escape `dest` are rejected.
pub fn extract(payload: &[u8], dest: &Path) -> Result<(), Error> {
    match sniff_format(payload) {
        Some(ArchiveFormat::Zip) => extract_zip(payload, dest),
        Some(ArchiveFormat::SevenZ) => extract_7z(payload, dest),
        Some(ArchiveFormat::Rar) => extract_rar(payload, dest),
        None => Err(Error::UnsupportedFormat),
    }
}

fn corrupt(context: &str, err: impl Display) -> Error {
    Error::ArchiveCorrupt(format!("{context}: {err}"))
}

/// Joins an entry path onto `dest`, refusing absolute paths and `..`
/// components.
fn entry_path(dest: &Path, raw: &Path) -> Result<PathBuf, Error> {
    let mut clean = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::ArchiveCorrupt(format!(
                    "unsafe entry path {}",
                    raw.display()
                )))
            }
        }
    }
    Ok(dest.join(clean))
}

/// Exclusive-create open. A collision means the archive carries duplicate
/// entries or the destination was not a fresh directory; either way the
/// extraction must fail rather than clobber.
fn create_file(path: &Path) -> Result<fs::File, Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| corrupt("create entry directory", err))?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                Error::ArchiveCorrupt(format!(
                    "refusing to overwrite existing file {}",
                    path.display()
                ))
            } else {
                corrupt(&format!("create {}", path.display()), err)
            }
        })
}

fn extract_zip(payload: &[u8], dest: &Path) -> Result<(), Error> {
    let mut archive = zip::ZipArchive::new(Cursor::new(payload))
        .map_err(|err| corrupt("read zip archive", err))?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| corrupt("read zip entry", err))?;
        let Some(rel_path) = entry.enclosed_name() else {
            return Err(Error::ArchiveCorrupt(format!(
                "unsafe entry path {}",
                entry.name()
            )));
        };
        let out_path = dest.join(rel_path);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|err| corrupt("create entry directory", err))?;
            continue;
        }
        let mut file = create_file(&out_path)?;
        io::copy(&mut entry, &mut file)
            .map_err(|err| corrupt(&format!("extract {}", entry.name()), err))?;
        if let Some(modified) = entry.last_modified() {
            if let Some(mtime) = zip_time_to_unix(modified) {
                let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
            }
        }
    }
    Ok(())
}

fn extract_7z(payload: &[u8], dest: &Path) -> Result<(), Error> {
    let len = payload.len() as u64;
    let mut archive = SevenZReader::new(Cursor::new(payload), len, Password::empty())
        .map_err(|err| corrupt("read 7z archive", err))?;
    // Write failures stop the walk early and take precedence over whatever
    // error the aborted reader reports.
    let mut failure: Option<Error> = None;
    let walk = archive.for_each_entries(|entry, reader| match write_7z_entry(dest, entry, reader) {
        Ok(()) => Ok(true),
        Err(err) => {
            failure = Some(err);
            Ok(false)
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    walk.map_err(|err| corrupt("extract 7z archive", err))?;
    Ok(())
}

fn write_7z_entry(
    dest: &Path,
    entry: &SevenZArchiveEntry,
    reader: &mut dyn Read,
) -> Result<(), Error> {
    let out_path = entry_path(dest, Path::new(entry.name()))?;
    if entry.is_directory() {
        fs::create_dir_all(&out_path).map_err(|err| corrupt("create entry directory", err))?;
        return Ok(());
    }
    let mut file = create_file(&out_path)?;
    io::copy(reader, &mut file).map_err(|err| corrupt(&format!("extract {}", entry.name()), err))?;
    Ok(())
}

fn extract_rar(payload: &[u8], dest: &Path) -> Result<(), Error> {
    // unrar only reads from the filesystem, so spool the payload out first.
    let mut spool =
        tempfile::NamedTempFile::new().map_err(|err| corrupt("stage rar payload", err))?;
    spool
        .write_all(payload)
        .map_err(|err| corrupt("stage rar payload", err))?;
    let mut archive = RarArchive::new(spool.path())
        .open_for_processing()
        .map_err(|err| corrupt("read rar archive", err))?;
    while let Some(header) = archive
        .read_header()
        .map_err(|err| corrupt("read rar header", err))?
    {
        let entry_name = header.entry().filename.clone();
        let out_path = entry_path(dest, &entry_name)?;
        archive = if header.entry().is_file() {
            let (data, rest) = header
                .read()
                .map_err(|err| corrupt(&format!("extract {}", entry_name.display()), err))?;
            let mut file = create_file(&out_path)?;
            file.write_all(&data)
                .map_err(|err| corrupt(&format!("extract {}", entry_name.display()), err))?;
            rest
        } else {
            fs::create_dir_all(&out_path).map_err(|err| corrupt("create entry directory", err))?;
            header
                .skip()
                .map_err(|err| corrupt("skip rar entry", err))?
        };
    }
    Ok(())
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let date =
        Date::from_calendar_date(dt.year() as i32, Month::try_from(dt.month()).ok()?, dt.day())
            .ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}
