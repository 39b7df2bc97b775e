use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use microcosm::{
    record, with, ComponentDef, Record, Schedule, SnapshotWriter, StoreMode, System, Value,
    World, WorldConfig,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Grazing-herd demo on the microcosm runtime")]
struct Cli {
    /// Path to a world config YAML file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of steps to simulate
    #[arg(long, default_value_t = 20)]
    ticks: u64,

    /// Simulated seconds per step
    #[arg(long, default_value_t = 1.0)]
    dt: f64,

    /// Storage backend override: "associative" or "columnar"
    #[arg(long)]
    store_mode: Option<StoreMode>,

    /// Write a snapshot every N steps (0 disables)
    #[arg(long, default_value_t = 0)]
    snapshot_every: u64,

    /// Directory for snapshot files
    #[arg(long, default_value = "snapshots")]
    snapshot_dir: PathBuf,

    /// Number of grazers to spawn
    #[arg(long, default_value_t = 12)]
    grazers: u32,
}

struct Movement {
    position: ComponentDef,
    velocity: ComponentDef,
}

impl System for Movement {
    fn name(&self) -> &str {
        "movement"
    }

    fn run(&mut self, world: &mut World, dt: f64) -> Result<()> {
        let moving = world.query(&[with(&self.position), with(&self.velocity)]);
        for row in &moving {
            let vx = row.records[1].get("x").and_then(Value::as_float).unwrap_or(0.0);
            let vy = row.records[1].get("y").and_then(Value::as_float).unwrap_or(0.0);
            if let Some(mut view) = world.view_mut(row.id, &self.position) {
                let x = view.get("x").and_then(Value::as_float).unwrap_or(0.0);
                let y = view.get("y").and_then(Value::as_float).unwrap_or(0.0);
                view.set("x", x + vx * dt);
                view.set("y", y + vy * dt);
            }
        }
        Ok(())
    }
}

struct Wander {
    velocity: ComponentDef,
}

impl System for Wander {
    fn name(&self) -> &str {
        "wander"
    }

    fn run(&mut self, world: &mut World, _dt: f64) -> Result<()> {
        let mut rng = world.rng_stream("wander");
        for id in world.query(&[with(&self.velocity)]).ids() {
            if rng.gen_bool(0.2) {
                // Mid-step, so the new heading lands at this step's flush.
                world.set(
                    id,
                    &self.velocity,
                    record! {
                        "x" => rng.gen_range(-1.0..1.0),
                        "y" => rng.gen_range(-1.0..1.0),
                    },
                )?;
            }
        }
        Ok(())
    }
}

struct Decay {
    energy: ComponentDef,
    rate: f64,
}

impl System for Decay {
    fn name(&self) -> &str {
        "decay"
    }

    fn run(&mut self, world: &mut World, dt: f64) -> Result<()> {
        let alive = world.query(&[with(&self.energy)]);
        for row in &alive {
            let level = row.records[0]
                .get("level")
                .and_then(Value::as_float)
                .unwrap_or(0.0);
            let next = level - self.rate * dt;
            if next <= 0.0 {
                world.destroy(row.id)?;
            } else {
                world.mutate(row.id, &self.energy, move |energy| {
                    energy.insert("level".to_string(), Value::Float(next));
                })?;
            }
        }
        Ok(())
    }
}

struct Census {
    grazer: ComponentDef,
}

impl System for Census {
    fn name(&self) -> &str {
        "census"
    }

    fn run(&mut self, world: &mut World, _dt: f64) -> Result<()> {
        let herd = world.query(&[with(&self.grazer)]).count();
        info!(step = world.step(), herd, "census");
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => WorldConfig::load(path)?,
        None => WorldConfig::default(),
    };
    if let Some(mode) = cli.store_mode {
        config.store_mode = mode;
    }

    let position = ComponentDef::new("Position", record! { "x" => 0.0, "y" => 0.0 });
    let velocity = ComponentDef::new("Velocity", record! { "x" => 0.0, "y" => 0.0 });
    let energy = ComponentDef::new("Energy", record! { "level" => 100.0 }).with_validator(
        |record| {
            record
                .get("level")
                .and_then(Value::as_float)
                .is_some_and(f64::is_finite)
        },
    );
    let grazer = ComponentDef::tag("Grazer");

    let mut world = World::from_config(&config);
    info!(
        seed = world.seed(),
        store_mode = %world.store_mode(),
        grazers = cli.grazers,
        "world ready"
    );

    let mut spawn_rng = world.rng_stream("spawn");
    for _ in 0..cli.grazers {
        let id = world.create()?;
        world.add(
            id,
            &position,
            record! {
                "x" => spawn_rng.gen_range(-20.0..20.0),
                "y" => spawn_rng.gen_range(-20.0..20.0),
            },
        )?;
        world.add(
            id,
            &velocity,
            record! {
                "x" => spawn_rng.gen_range(-1.0..1.0),
                "y" => spawn_rng.gen_range(-1.0..1.0),
            },
        )?;
        world.add(
            id,
            &energy,
            record! { "level" => spawn_rng.gen_range(40.0..100.0) },
        )?;
        world.add(id, &grazer, Record::new())?;
    }

    Schedule::new()
        .with_system(Movement {
            position: position.clone(),
            velocity: velocity.clone(),
        })
        .with_system_after(
            Wander {
                velocity: velocity.clone(),
            },
            &["movement"],
        )
        .with_system_after(
            Decay {
                energy: energy.clone(),
                rate: 4.0,
            },
            &["movement"],
        )
        .with_system_after(
            Census {
                grazer: grazer.clone(),
            },
            &["decay"],
        )
        .install(&mut world)?;

    let writer = (cli.snapshot_every > 0)
        .then(|| SnapshotWriter::new(&cli.snapshot_dir, cli.snapshot_every));

    for _ in 0..cli.ticks {
        let report = world.tick(cli.dt)?;
        if let Some(error) = &report.scheduler_error {
            info!(step = report.step, error = %error, "step finished with a failing system");
        }
        if let Some(writer) = &writer {
            if let Some(path) = writer.maybe_write(&world)? {
                info!(path = %path.display(), "snapshot written");
            }
        }
    }

    let survivors = world.query(&[with(&grazer)]).count();
    println!(
        "Simulated {} steps ({:.1}s of world time). {survivors} of {} grazers remain.",
        world.step(),
        world.elapsed(),
        cli.grazers
    );
    Ok(())
}
