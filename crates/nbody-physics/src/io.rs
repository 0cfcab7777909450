//! Plain-text particle files
//!
//! One particle per line as five whitespace-separated numbers:
//! `pos.x pos.y vel.x vel.y mass`. Blank lines and lines starting with `#` are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use glam::Vec2;

use crate::error::{Error, Result};
use crate::particle::Particle;

fn is_record(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

fn parse_record(line: &str, line_number: usize) -> Result<Particle> {
    let mut values = [0.0f32; 5];
    let mut fields = line.split_whitespace();
    for (i, value) in values.iter_mut().enumerate() {
        let field = fields.next().ok_or_else(|| Error::Parse {
            line: line_number,
            message: format!("expected 5 fields, found {i}"),
        })?;
        *value = field.parse().map_err(|e| Error::Parse {
            line: line_number,
            message: format!("invalid number `{field}`: {e}"),
        })?;
    }
    if fields.next().is_some() {
        return Err(Error::Parse {
            line: line_number,
            message: "expected 5 fields, found more".into(),
        });
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(Error::Parse {
            line: line_number,
            message: format!("non-finite value {bad}"),
        });
    }
    if values[4] < 0.0 {
        return Err(Error::Parse {
            line: line_number,
            message: format!("negative mass {}", values[4]),
        });
    }

    let [px, py, vx, vy, mass] = values;
    Ok(Particle::new(Vec2::new(px, py), Vec2::new(vx, vy), mass))
}

fn read_error(source: std::io::Error) -> Error {
    Error::Io {
        path: "<reader>".into(),
        source,
    }
}

/// Parse every record from `reader`
pub fn read_particles<R: BufRead>(reader: R) -> Result<Vec<Particle>> {
    let mut particles = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(read_error)?;
        if is_record(&line) {
            particles.push(parse_record(&line, index + 1)?);
        }
    }
    Ok(particles)
}

/// Count records without keeping them
pub fn count_particles<R: BufRead>(reader: R) -> Result<usize> {
    let mut count = 0;
    for line in reader.lines() {
        if is_record(&line.map_err(read_error)?) {
            count += 1;
        }
    }
    Ok(count)
}

/// Write one record per particle. `f32` formatting round-trips exactly.
pub fn write_particles<W: Write>(mut writer: W, particles: &[Particle]) -> std::io::Result<()> {
    for p in particles {
        writeln!(
            writer,
            "{} {} {} {} {}",
            p.position[0], p.position[1], p.velocity[0], p.velocity[1], p.mass
        )?;
    }
    writer.flush()
}

/// Load a particle file, rejecting files without any particle
pub fn load_particles(path: impl AsRef<Path>) -> Result<Vec<Particle>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let particles = read_particles(BufReader::new(file)).map_err(|e| match e {
        Error::Io { source, .. } => Error::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    if particles.is_empty() {
        return Err(Error::config(format!(
            "{} contains no particles",
            path.display()
        )));
    }
    log::info!("Loaded {} particles from {}", particles.len(), path.display());
    Ok(particles)
}

/// Save particles, padding excluded by the caller
pub fn save_particles(path: impl AsRef<Path>, particles: &[Particle]) -> Result<()> {
    let path = path.as_ref();
    let io_error = |source: std::io::Error| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_error)?;
    write_particles(BufWriter::new(file), particles).map_err(io_error)?;
    log::info!("Saved {} particles to {}", particles.len(), path.display());
    Ok(())
}
