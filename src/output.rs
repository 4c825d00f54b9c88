use anyhow::{Context, Result};
use epidemic_common::{EpochAssumption, OutputConfig, PopulationSnapshot};
use log::{error, info};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Serialization format of recorded population snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Bincode,
    MessagePack,
}

impl OutputFormat {
    /// Unknown names fall back to JSON.
    pub fn parse(name: Option<&str>) -> Self {
        match name.unwrap_or("json") {
            "json" => OutputFormat::Json,
            "bincode" => OutputFormat::Bincode,
            "messagepack" => OutputFormat::MessagePack,
            other => {
                error!("Unknown output format: {}. Using JSON instead.", other);
                OutputFormat::Json
            }
        }
    }

    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Bincode => "bin",
            OutputFormat::MessagePack => "msgpack",
        }
    }
}

/// Collects published epochs for writing once the run ends.
#[derive(Debug, Default)]
pub struct Recorder {
    keep_snapshots: bool,
    assumptions: Vec<EpochAssumption>,
    snapshots: Vec<PopulationSnapshot>,
    last_population: Option<PopulationSnapshot>,
}

impl Recorder {
    pub fn new(keep_snapshots: bool) -> Self {
        Recorder {
            keep_snapshots,
            ..Default::default()
        }
    }

    pub fn record_assumption(&mut self, assumption: EpochAssumption) {
        self.assumptions.push(assumption);
    }

    pub fn record_population(&mut self, snapshot: PopulationSnapshot) {
        if self.keep_snapshots {
            self.snapshots.push(snapshot.clone());
        }
        self.last_population = Some(snapshot);
    }

    pub fn assumptions(&self) -> &[EpochAssumption] {
        &self.assumptions
    }

    /// Writes every output enabled in `output`.
    pub fn save(&self, output: &OutputConfig) -> Result<()> {
        let base = &output.base_filename;

        if output.save_assumptions {
            let path = write_assumptions_csv(base, &self.assumptions)?;
            info!("Assumption history ({} epochs) saved to {}", self.assumptions.len(), path.display());
        } else {
            info!("Skipping assumption history as per config.");
        }

        if output.save_snapshots {
            let format = OutputFormat::parse(output.format.as_deref());
            let path = write_snapshots(base, format, &self.snapshots)?;
            info!("All snapshots saved to {} ({:?} format)", path.display(), format);
        }

        if output.save_final_population {
            match &self.last_population {
                Some(snapshot) => {
                    let path = write_final_population_csv(base, snapshot)?;
                    info!("Final population saved to {}", path.display());
                }
                None => info!("No epoch was recorded; skipping final population."),
            }
        }
        Ok(())
    }
}

pub fn write_assumptions_csv(base: &str, assumptions: &[EpochAssumption]) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}_assumptions.csv", base));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Error creating assumption file '{}'", path.display()))?;
    writer.write_record(["epoch", "healthy", "sick", "immune", "dead"])?;
    for a in assumptions {
        writer.write_record(&[
            a.epoch.to_string(),
            a.healthy().to_string(),
            a.sick.to_string(),
            a.immune.to_string(),
            a.dead.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path)
}

pub fn write_final_population_csv(base: &str, snapshot: &PopulationSnapshot) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}_final_population.csv", base));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Error creating population file '{}'", path.display()))?;
    writer.write_record(["id", "x", "y", "state"])?;
    for agent in &snapshot.agents {
        writer.write_record(&[
            agent.id.to_string(),
            format!("{:.4}", agent.x),
            format!("{:.4}", agent.y),
            agent.category.as_str().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path)
}

pub fn write_snapshots(base: &str, format: OutputFormat, snapshots: &[PopulationSnapshot]) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}_snapshots.{}", base, format.extension()));
    let file = File::create(&path)
        .with_context(|| format!("Error creating snapshot file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);

    match format {
        OutputFormat::Json => serde_json::to_writer(&mut writer, snapshots)
            .context("Error serializing snapshots to JSON")?,
        OutputFormat::Bincode => bincode::serialize_into(&mut writer, snapshots)
            .context("Error serializing snapshots to bincode")?,
        OutputFormat::MessagePack => rmp_serde::encode::write(&mut writer, snapshots)
            .context("Error serializing snapshots to MessagePack")?,
    }
    writer.flush()?;
    Ok(path)
}
