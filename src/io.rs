use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::time::Instant;

use camino::Utf8Path;
use console::Style;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::config::Paths;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Force-delete the temp and dist trees. A path that is already gone is not
/// an error, so running this twice in a row succeeds both times.
pub fn clean(paths: &Paths) -> std::io::Result<()> {
    let s = Instant::now();

    for dir in [&paths.temp, &paths.dist] {
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    tracing::info!("cleaned {} and {} {}", paths.temp, paths.dist, as_overhead(s));
    Ok(())
}

/// Total size in bytes of every file under `dir`, recursively. A missing
/// directory counts as empty.
pub fn dir_size(dir: &Utf8Path) -> std::io::Result<u64> {
    let mut total = 0;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            if let Ok(sub) = camino::Utf8PathBuf::try_from(entry.path()) {
                total += dir_size(&sub)?;
            }
        } else {
            total += meta.len();
        }
    }

    Ok(total)
}

/// Sum of the gzip-compressed sizes of every file under `dir`. Mirrors what
/// the artifacts would weigh on the wire.
pub fn dir_size_gzip(dir: &Utf8Path) -> std::io::Result<u64> {
    let mut total = 0;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            if let Ok(sub) = camino::Utf8PathBuf::try_from(entry.path()) {
                total += dir_size_gzip(&sub)?;
            }
        } else {
            let data = fs::read(entry.path())?;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            total += encoder.finish()?.len() as u64;
        }
    }

    Ok(total)
}

/// Log the total weight of a directory, optionally with gzip totals next to
/// the raw bytes.
pub fn report_size(title: &str, dir: &Utf8Path, gzip: bool) -> std::io::Result<()> {
    let raw = dir_size(dir)?;

    if gzip {
        let zipped = dir_size_gzip(dir)?;
        tracing::info!(
            "{title}: {} ({} gzipped)",
            human_size(raw),
            human_size(zipped)
        );
    } else {
        tracing::info!("{title}: {}", human_size(raw));
    }

    Ok(())
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
