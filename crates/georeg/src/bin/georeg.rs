//! georeg CLI: edit and solve a registration session stored as JSON.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use georeg::geodesy::{read_prj, read_world_file};
use georeg::{
    ConstraintKind, CoordinateMode, ErrorUnit, Georef, GlobalModel, Session, SessionConfig,
    WarpModel,
};
use nalgebra::Point2;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "georeg")]
#[command(about = "Human-assisted georeferencing of scanned documents against a reference raster")]
#[command(version)]
struct Cli {
    /// Session file; created on first write if it does not exist.
    #[arg(long, global = true, default_value = "georeg-session.json")]
    session: PathBuf,

    /// JSON config used when a new session is created.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a source/reference point pair.
    AddPoint(AddPointArgs),

    /// Delete a constraint (and the relations that reference it).
    Delete {
        #[arg(long)]
        id: u64,
    },

    /// List constraints.
    List {
        /// Print the constraint list as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Robust global solve.
    Solve(SolveArgs),

    /// Local warp on top of the last global solve.
    SolveLocal {
        #[arg(long, value_enum, default_value_t = WarpArg::Tps)]
        model: WarpArg,
        /// Smoothing weight (0 interpolates exactly).
        #[arg(long, default_value = "0.0")]
        lambda: f64,
    },

    /// Print the PROJ pipeline for a global model.
    Proj {
        #[arg(long, value_enum, default_value_t = ModelArg::Affine)]
        model: ModelArg,
    },

    /// Convert a reference pixel.
    PixelTo {
        #[arg(long, allow_hyphen_values = true)]
        u: f64,
        #[arg(long, allow_hyphen_values = true)]
        v: f64,
        #[arg(long, value_enum, default_value_t = ModeArg::Pixel)]
        mode: ModeArg,
    },

    /// Set or clear the reference georeference.
    SetGeoref(SetGeorefArgs),

    /// Write pixel-to-world exports of the current solution.
    Export(ExportArgs),
}

#[derive(Debug, Clone, Args)]
struct AddPointArgs {
    /// Source pixel as `x,y`.
    #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
    src: Point2<f64>,

    /// Reference pixel as `x,y`.
    #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
    dst: Point2<f64>,

    #[arg(long, default_value = "1.0")]
    weight: f64,

    /// Explicit id; must not be below the next free id.
    #[arg(long)]
    id: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct SolveArgs {
    #[arg(long, value_enum, default_value_t = ModelArg::Affine)]
    model: ModelArg,

    #[arg(long, value_enum, default_value_t = UnitArg::Pixels)]
    unit: UnitArg,

    /// Map scale denominator, required for `--unit mapmm`.
    #[arg(long)]
    map_scale: Option<f64>,

    /// Print the full metrics as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct SetGeorefArgs {
    /// ESRI world file of the reference raster.
    #[arg(long, conflicts_with_all = ["image", "clear"])]
    world: Option<PathBuf>,

    /// Optional `.prj` sidecar with the reference CRS.
    #[arg(long, requires = "world")]
    prj: Option<PathBuf>,

    /// Reference image; its world file and `.prj` sidecars are loaded.
    #[arg(long, conflicts_with = "clear")]
    image: Option<PathBuf>,

    /// Remove the reference georeference.
    #[arg(long)]
    clear: bool,
}

#[derive(Debug, Clone, Args)]
struct ExportArgs {
    #[arg(long)]
    world_file: Option<PathBuf>,

    #[arg(long)]
    prj: Option<PathBuf>,

    /// Print the GeoTIFF ModelTransformationTag.
    #[arg(long)]
    tag: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    Similarity,
    Affine,
}

impl ModelArg {
    fn to_solver(self) -> GlobalModel {
        match self {
            Self::Similarity => GlobalModel::Similarity,
            Self::Affine => GlobalModel::Affine,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UnitArg {
    Pixels,
    Meters,
    Mapmm,
}

impl UnitArg {
    fn to_solver(self) -> ErrorUnit {
        match self {
            Self::Pixels => ErrorUnit::Pixels,
            Self::Meters => ErrorUnit::Meters,
            Self::Mapmm => ErrorUnit::MapMillimeters,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WarpArg {
    Tps,
    Ffd,
}

impl WarpArg {
    fn to_solver(self) -> WarpModel {
        match self {
            Self::Tps => WarpModel::Tps,
            Self::Ffd => WarpModel::Ffd,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Pixel,
    Lonlat,
    #[value(name = "local_m")]
    LocalM,
    Utm,
}

impl ModeArg {
    fn to_geodesy(self) -> CoordinateMode {
        match self {
            Self::Pixel => CoordinateMode::Pixel,
            Self::Lonlat => CoordinateMode::LonLat,
            Self::LocalM => CoordinateMode::LocalMeters,
            Self::Utm => CoordinateMode::Utm,
        }
    }
}

fn parse_point(raw: &str) -> Result<Point2<f64>, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{raw}`"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|err| format!("bad coordinate `{s}`: {err}"))
    };
    Ok(Point2::new(parse(x)?, parse(y)?))
}

fn init_logging() {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        georeg::core::init_tracing(false);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = georeg::core::init_from_env();
    }
}

fn open_session(path: &Path, config: Option<&Path>) -> CliResult<Session> {
    if path.is_file() {
        return Ok(Session::load_json(path)?);
    }
    let config = match config {
        Some(p) => SessionConfig::load_json(p)?,
        None => SessionConfig::default(),
    };
    log::info!("creating new session {}", path.display());
    Ok(Session::new(config))
}

fn main() -> CliResult<()> {
    init_logging();
    let cli = Cli::parse();
    let mut session = open_session(&cli.session, cli.config.as_deref())?;

    let dirty = match cli.command {
        Commands::AddPoint(args) => run_add_point(&mut session, &args)?,
        Commands::Delete { id } => {
            let left = session.delete_constraint(id)?;
            println!("deleted {id} ({} constraints)", left.len());
            true
        }
        Commands::List { json } => {
            run_list(&session, json)?;
            false
        }
        Commands::Solve(args) => run_solve(&mut session, &args)?,
        Commands::SolveLocal { model, lambda } => {
            let (stack, metrics) = session.solve_local(model.to_solver(), lambda)?;
            println!("stages {}", stack.len());
            print_metrics(&metrics);
            true
        }
        Commands::Proj { model } => {
            println!("{}", session.get_proj_string(model.to_solver())?);
            false
        }
        Commands::PixelTo { u, v, mode } => {
            let c = session.pixel_to(u, v, mode.to_geodesy())?;
            let flag = if c.low_confidence { " (low confidence)" } else { "" };
            println!("{} {}{flag}", c.x, c.y);
            false
        }
        Commands::SetGeoref(args) => run_set_georef(&mut session, &args)?,
        Commands::Export(args) => {
            run_export(&session, &args)?;
            false
        }
    };

    if dirty {
        session.save_json(&cli.session)?;
    }
    Ok(())
}

// ---- commands ----------------------------------------------------------------

fn run_add_point(session: &mut Session, args: &AddPointArgs) -> CliResult<bool> {
    let kind = ConstraintKind::PointPair {
        src: args.src,
        dst: args.dst,
        dst_real: None,
        dst_local: None,
        weight: args.weight,
    };
    let list = match args.id {
        Some(id) => session.add_constraint_with_id(id, kind)?,
        None => session.add_constraint(kind)?,
    };
    if let Some(last) = list.last() {
        println!("added {} ({} constraints)", last.id, list.len());
    }
    Ok(true)
}

fn run_list(session: &Session, json: bool) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(session.constraints())?);
        return Ok(());
    }
    for c in session.constraints() {
        match &c.kind {
            ConstraintKind::PointPair {
                src, dst, weight, ..
            } => println!(
                "{}\tpoint_pair\t{},{} -> {},{}\tw={weight}",
                c.id, src.x, src.y, dst.x, dst.y
            ),
            other => println!("{}\t{}", c.id, other.label()),
        }
    }
    Ok(())
}

fn run_solve(session: &mut Session, args: &SolveArgs) -> CliResult<bool> {
    let (_stack, metrics) =
        session.solve_global(args.model.to_solver(), args.unit.to_solver(), args.map_scale)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        print_metrics(&metrics);
    }
    Ok(true)
}

fn print_metrics(metrics: &georeg::QualityMetrics) {
    let unit = metrics.unit.label();
    println!("rmse {:.6} {unit}", metrics.rmse);
    println!("p90 {:.6} {unit}", metrics.p90_error);
    for (id, r) in &metrics.residuals_by_id {
        let note = if metrics.excluded_ids.contains(id) {
            " (masked)"
        } else {
            ""
        };
        println!("  #{id}: {r:.6}{note}");
    }
    for w in &metrics.warnings {
        println!("warning: {w}");
    }
}

fn run_set_georef(session: &mut Session, args: &SetGeorefArgs) -> CliResult<bool> {
    if args.clear {
        session.set_reference_georef(None);
        return Ok(true);
    }
    if let Some(image) = &args.image {
        session.load_reference_sidecars(image)?;
        return Ok(true);
    }
    let Some(world) = &args.world else {
        return Err("set-georef needs --world, --image or --clear".into());
    };
    let affine = read_world_file(world)?;
    let wkt = args.prj.as_deref().map(read_prj).transpose()?;
    session.set_reference_georef(Some(Georef::new(affine, wkt)));
    if let Some(info) = session.reference_crs_info() {
        println!("reference CRS: {}", info.name);
    }
    Ok(true)
}

fn run_export(session: &Session, args: &ExportArgs) -> CliResult<()> {
    if let Some(path) = &args.world_file {
        session.export_world_file(path)?;
        println!("wrote {}", path.display());
    }
    if let Some(path) = &args.prj {
        session.export_prj(path)?;
        println!("wrote {}", path.display());
    }
    if args.tag {
        let tag = session.model_transformation_tag()?;
        let text: Vec<String> = tag.iter().map(f64::to_string).collect();
        println!("{}", text.join(" "));
    }
    Ok(())
}
