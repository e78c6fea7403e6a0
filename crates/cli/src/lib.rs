use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use geo_client::{HttpRecordSink, NominatimGeocoder, RecordSink, ReverseGeocoder};
use map_model::{
    AddressRecord, Annotation, AnnotationId, LatLng, MapSettings, SaveRecord, ShapeKind,
};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use storage::{AnnotationStore, FileKeyValueStore, Storage};
use zonemap_core::{
    export_annotations_csv, CsvExportConfig, Outline, RecordingWidget, ShapeDraft,
    ShapeSyncController, SyncOptions,
};

type Controller = ShapeSyncController<FileKeyValueStore, RecordingWidget>;

#[derive(Debug, Parser)]
#[command(name = "zonemap-cli")]
#[command(about = "Zonemap CLI")]
pub struct Cli {
    /// Data directory holding settings and stored annotations.
    #[arg(long, global = true, env = "ZONEMAP_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print stored annotations as JSON.
    List,
    /// Place a marker.
    AddMarker {
        #[arg(long, value_name = "LAT,LNG", allow_hyphen_values = true)]
        at: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Draw a polygon from three or more vertices.
    AddPolygon {
        #[arg(
            long = "vertex",
            value_name = "LAT,LNG",
            allow_hyphen_values = true,
            required = true
        )]
        vertices: Vec<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Replace the note of a marker.
    Note {
        #[arg(value_name = "ID")]
        id: u64,
        #[arg(value_name = "TEXT")]
        text: String,
    },
    /// Remove annotations by id, or every marker at a position.
    Remove {
        #[arg(value_name = "ID", required_unless_present = "at")]
        ids: Vec<u64>,
        #[arg(
            long,
            value_name = "LAT,LNG",
            allow_hyphen_values = true,
            conflicts_with = "ids"
        )]
        at: Option<String>,
    },
    /// Print, one JSON object per line, the commands a map receives on startup.
    Hydrate,
    /// Write stored annotations as CSV.
    ExportCsv {
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// List zone presets.
    Zones,
    /// Look up the street address of a point.
    Geocode {
        #[arg(long, value_name = "LAT,LNG", allow_hyphen_values = true)]
        at: String,
    },
    /// Send the address of a point to the remote save endpoint.
    SaveAddress {
        #[arg(long, value_name = "LAT,LNG", allow_hyphen_values = true)]
        at: String,
        /// Send only the coordinates without looking up the address.
        #[arg(long)]
        skip_geocode: bool,
        /// Print the record instead of sending it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Marker,
    Polygon,
}

impl From<KindArg> for ShapeKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Marker => ShapeKind::Marker,
            KindArg::Polygon => ShapeKind::Polygon,
        }
    }
}

struct Session {
    storage: Storage,
    settings: MapSettings,
}

impl Session {
    fn open(data_dir: Option<PathBuf>) -> Result<Self> {
        let storage = match data_dir {
            Some(dir) => Storage::with_root(dir),
            None => Storage::from_default_project().context("failed to resolve data directory")?,
        };
        let settings = storage.load_settings().context("failed to load settings")?;
        log::debug!("using data directory {}", storage.root().display());

        Ok(Self { storage, settings })
    }

    fn annotations(&self) -> AnnotationStore<FileKeyValueStore> {
        self.storage.open_annotations(&self.settings)
    }

    fn controller(&self) -> Controller {
        let store = AnnotationStore::with_key(
            self.storage.key_value_store(),
            self.settings.storage_key.clone(),
        );
        let options = SyncOptions::from(&self.settings);
        let mut controller = ShapeSyncController::new(store, RecordingWidget::new(), options);
        controller.hydrate();
        controller
    }
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let session = Session::open(cli.data_dir)?;

    match cli.command {
        Commands::List => run_list(&session),
        Commands::AddMarker { at, note } => run_add_marker(&session, &at, note),
        Commands::AddPolygon { vertices, color } => run_add_polygon(&session, &vertices, color),
        Commands::Note { id, text } => run_note(&session, AnnotationId(id), text),
        Commands::Remove { ids, at } => run_remove(&session, ids, at.as_deref()),
        Commands::Hydrate => run_hydrate(&session),
        Commands::ExportCsv { output, kind } => {
            run_export_csv(&session, output.as_deref(), kind.map(ShapeKind::from))
        }
        Commands::Zones => run_zones(&session),
        Commands::Geocode { at } => run_geocode(&session, &at),
        Commands::SaveAddress { at, skip_geocode, dry_run } => {
            run_save_address(&session, &at, skip_geocode, dry_run)
        }
        Commands::Version => Ok(()),
    }
}

fn run_list(session: &Session) -> Result<()> {
    let store = session.annotations();
    print_json(store.annotations())
}

fn run_add_marker(session: &Session, at: &str, note: Option<String>) -> Result<()> {
    let position = parse_point(at)?;

    let mut controller = session.controller();
    let handle = controller.widget_mut().draw();
    let annotation = controller
        .on_shape_created(handle, ShapeDraft::Marker { position, note })
        .context("failed to add marker")?;

    print_json(&annotation)
}

fn run_add_polygon(session: &Session, vertices: &[String], color: Option<String>) -> Result<()> {
    let vertices = vertices.iter().map(|vertex| parse_point(vertex)).collect::<Result<Vec<_>>>()?;

    let mut controller = session.controller();
    let handle = controller.widget_mut().draw();
    let annotation = controller
        .on_shape_created(handle, ShapeDraft::Polygon { vertices, color })
        .context("failed to add polygon")?;

    print_json(&annotation)
}

fn run_note(session: &Session, id: AnnotationId, text: String) -> Result<()> {
    let mut controller = session.controller();
    let handle =
        controller.handle_for(id).with_context(|| format!("no annotation with id {id}"))?;

    let annotation = controller.commit_note(handle, text).context("failed to update note")?;

    print_json(&annotation)
}

fn run_remove(session: &Session, ids: Vec<u64>, at: Option<&str>) -> Result<()> {
    let mut controller = session.controller();

    let targets: Vec<Annotation> = match at {
        Some(at) => {
            let position = parse_point(at)?;
            controller
                .store()
                .annotations()
                .iter()
                .filter(|annotation| annotation.position() == Some(position))
                .cloned()
                .collect()
        }
        None => ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|id| {
                let id = AnnotationId(id);
                controller
                    .store()
                    .get(id)
                    .cloned()
                    .with_context(|| format!("no annotation with id {id}"))
            })
            .collect::<Result<_>>()?,
    };

    let mut deleted = Vec::with_capacity(targets.len());
    for annotation in &targets {
        let handle = controller
            .handle_for(annotation.id)
            .with_context(|| format!("annotation {} is not on the map", annotation.id))?;
        deleted.push(controller.widget_mut().delete(handle, Outline::of(annotation)));
    }

    let removed = controller.on_shape_deleted(&deleted).context("failed to remove annotations")?;
    for annotation in &removed {
        log::info!("removed {} {}", annotation.kind(), annotation.id);
    }
    println!("removed {}", removed.len());

    Ok(())
}

fn run_hydrate(session: &Session) -> Result<()> {
    let controller = session.controller();

    for command in controller.widget().commands() {
        println!("{}", serde_json::to_string(command)?);
    }

    Ok(())
}

fn run_export_csv(session: &Session, output: Option<&Path>, kind: Option<ShapeKind>) -> Result<()> {
    let store = session.annotations();
    let config = CsvExportConfig { kind_filter: kind, ..CsvExportConfig::default() };

    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            export_annotations_csv(file, store.annotations(), &config)
                .with_context(|| format!("failed to write CSV to {}", path.display()))?;
            println!("{}", path.display());
        }
        None => {
            export_annotations_csv(io::stdout().lock(), store.annotations(), &config)
                .context("failed to write CSV")?;
        }
    }

    Ok(())
}

fn run_zones(session: &Session) -> Result<()> {
    for zone in &session.settings.zones {
        println!("{}\t{}\t{}", zone.name, zone.center, zone.zoom);
    }
    Ok(())
}

fn run_geocode(session: &Session, at: &str) -> Result<()> {
    let point = parse_point(at)?;
    let address = NominatimGeocoder::from_settings(&session.settings)
        .reverse(point)
        .context("failed to reverse geocode")?;

    print_json(&address)
}

fn run_save_address(session: &Session, at: &str, skip_geocode: bool, dry_run: bool) -> Result<()> {
    let point = parse_point(at)?;

    let address = if skip_geocode {
        AddressRecord { coordinates: point.to_string(), ..AddressRecord::default() }
    } else {
        NominatimGeocoder::from_settings(&session.settings)
            .reverse(point)
            .context("failed to reverse geocode")?
    };
    let record = SaveRecord::from(&address);

    if dry_run {
        return print_json(&record);
    }

    let ack = HttpRecordSink::from_settings(&session.settings)
        .save(&record)
        .context("failed to save record")?;

    match ack.id {
        Some(id) => println!("{} (id {id})", ack.message),
        None => println!("{}", ack.message),
    }

    Ok(())
}

fn parse_point(input: &str) -> Result<LatLng> {
    LatLng::parse_pair(input).with_context(|| format!("invalid coordinates '{input}'"))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
