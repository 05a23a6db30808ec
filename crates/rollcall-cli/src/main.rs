use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::face::crop_face;
use image::RgbImage;
use rollcall_core::{
    BoundingBox, EmbeddingStore, EnrollmentBuilder, EnrollmentSet, EuclideanMatcher,
    FaceDetector, FaceEmbedder, MatchResult, Matcher,
};
use rollcall_vision::{default_data_dir, default_model_dir, FaceModelKind};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn submit_image(&self, image: Vec<u8>) -> zbus::Result<String>;
    fn attendance(&self, date: &str) -> zbus::Result<String>;
    fn export_csv(&self) -> zbus::Result<String>;
    fn count_today(&self) -> zbus::Result<u32>;
    fn latest_frame(&self) -> zbus::Result<Vec<u8>>;
    fn status(&self) -> zbus::Result<String>;
    fn list_identities(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the embedding store from a directory of per-person photos
    Enroll {
        /// Directory with one sub-directory of photos per person
        #[arg(short, long, default_value = "database")]
        database: PathBuf,
        /// Where to write the store (default: data dir/embeddings.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, default_value_t = FaceModelKind::default())]
        model: FaceModelKind,
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// Identify faces in an image locally without recording attendance
    Identify {
        image: PathBuf,
        #[arg(short, long)]
        store: Option<PathBuf>,
        #[arg(short, long, default_value_t = 4.0)]
        threshold: f32,
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// Send an image to the daemon for identification and recording
    Submit { image: PathBuf },
    /// Show attendance records
    Attendance {
        /// Only records for today
        #[arg(long, conflicts_with = "date")]
        today: bool,
        /// Only records for this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// Write the attendance ledger as CSV
    Export { output: PathBuf },
    /// Save the daemon's latest annotated frame as JPEG
    Snapshot { output: PathBuf },
    /// List enrolled identities
    List,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enroll { database, output, model, model_dir } => {
            let output = output.unwrap_or_else(|| default_data_dir().join("embeddings.json"));
            let model_dir = model_dir.unwrap_or_else(default_model_dir);
            enroll(&database, &output, model, &model_dir)?;
        }
        Commands::Identify { image, store, threshold, model_dir } => {
            let store = store.unwrap_or_else(|| default_data_dir().join("embeddings.json"));
            let model_dir = model_dir.unwrap_or_else(default_model_dir);
            identify(&image, &store, threshold, &model_dir)?;
        }
        Commands::Submit { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("cannot read {}", image.display()))?;
            let proxy = connect(cli.system).await?;
            let report: serde_json::Value = serde_json::from_str(&proxy.submit_image(bytes).await?)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Attendance { today, date } => {
            let date = if today {
                chrono::Local::now().date_naive().to_string()
            } else {
                date.unwrap_or_default()
            };
            let proxy = connect(cli.system).await?;
            let records: Vec<serde_json::Value> =
                serde_json::from_str(&proxy.attendance(&date).await?)?;
            if records.is_empty() {
                println!("No attendance recorded");
            }
            for r in &records {
                println!(
                    "{}  {}  {}",
                    r["date"].as_str().unwrap_or("?"),
                    r["time"].as_str().unwrap_or("?"),
                    r["name"].as_str().unwrap_or("?")
                );
            }
        }
        Commands::Export { output } => {
            let proxy = connect(cli.system).await?;
            let csv = proxy.export_csv().await?;
            std::fs::write(&output, csv)
                .with_context(|| format!("cannot write {}", output.display()))?;
            println!("Ledger exported to {}", output.display());
        }
        Commands::Snapshot { output } => {
            let proxy = connect(cli.system).await?;
            let jpeg = proxy.latest_frame().await?;
            if jpeg.is_empty() {
                bail!("daemon has not processed any image yet");
            }
            std::fs::write(&output, jpeg)
                .with_context(|| format!("cannot write {}", output.display()))?;
            println!("Frame saved to {}", output.display());
        }
        Commands::List => {
            let proxy = connect(cli.system).await?;
            let names: Vec<String> = serde_json::from_str(&proxy.list_identities().await?)?;
            if names.is_empty() {
                println!("No identities enrolled");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Status => {
            let proxy = connect(cli.system).await?;
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            println!("present today: {}", proxy.count_today().await?);
        }
    }

    Ok(())
}

async fn connect(system: bool) -> Result<AttendanceProxy<'static>> {
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("cannot connect to D-Bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")
}

fn enroll(
    database: &Path,
    output: &Path,
    model: FaceModelKind,
    model_dir: &Path,
) -> Result<()> {
    let set = EnrollmentSet::scan(database)?;
    println!(
        "Found {} people, {} images in {}",
        set.people.len(),
        set.image_count(),
        database.display()
    );

    let (mut detector, embedder) = rollcall_vision::load_models(model_dir, model)?;
    let faces = set.load_faces(&mut detector);

    let store = EnrollmentBuilder::new(model.name(), embedder).build(faces)?;
    for name in set.people.keys() {
        if store.get(name).is_none() {
            println!("  {name}: no usable face, not enrolled");
        }
    }
    store.save(output)?;
    println!(
        "Enrolled {} identities ({} dimensions) into {}",
        store.len(),
        store.dimensions(),
        output.display()
    );
    Ok(())
}

fn identify(
    image: &Path,
    store_path: &Path,
    threshold: f32,
    model_dir: &Path,
) -> Result<()> {
    let store = EmbeddingStore::load(store_path)
        .with_context(|| format!("cannot load {}", store_path.display()))?;
    let kind: FaceModelKind = store.model().parse()?;
    let (mut detector, mut embedder) = rollcall_vision::load_models(model_dir, kind)?;

    let frame = image::open(image)
        .with_context(|| format!("cannot open {}", image.display()))?
        .to_rgb8();
    let faces = detector.detect(&frame)?;
    if faces.is_empty() {
        println!("No faces detected");
        return Ok(());
    }

    for (bbox, result) in match_faces(&frame, &faces, &mut embedder, &store, threshold)? {
        println!(
            "face at ({:.0}, {:.0}): {} (distance {:.3})",
            bbox.x,
            bbox.y,
            result.label(),
            result.distance
        );
    }
    Ok(())
}

/// Embed and match each detected face. Faces that cannot be cropped or
/// embedded are skipped with a warning.
fn match_faces<E: FaceEmbedder>(
    frame: &RgbImage,
    faces: &[BoundingBox],
    embedder: &mut E,
    store: &EmbeddingStore,
    threshold: f32,
) -> Result<Vec<(BoundingBox, MatchResult)>> {
    let mut matches = Vec::with_capacity(faces.len());
    for bbox in faces {
        let Some(crop) = crop_face(frame, bbox) else {
            continue;
        };
        let embedding = match embedder.embed(&crop) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(x = bbox.x, y = bbox.y, error = %e, "embedding failed; skipping face");
                continue;
            }
        };
        matches.push((*bbox, EuclideanMatcher.compare(&embedding, store, threshold)?));
    }
    Ok(matches)
}
