use anyhow::{bail, Context, Result};
use calci_lib::{
    config::{AnalysisConfig, RatioSelection},
    io::{
        text as text_io,
        worksheet::{even_rows, pair_time, read_worksheet, BackgroundMode, CellLine, Workbook},
    },
    metrics::kinetics::ColumnMetrics,
    pipeline::{analyze_column, ColumnAnalysis},
    plot::{figure_from_analysis, AxisLimits, Figure, PlotBackend, Series},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use plotters::{coord::Shift, prelude::*};
use rayon::prelude::*;
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};

const PROCESSED_HEADER: [&str; 21] = [
    "Sheet",
    "Cell Line Name",
    "Cell Line #",
    "Min",
    "Max",
    "Amplitude",
    "Beat Rate",
    "Beat Variation",
    "Rise Time",
    "Rise Velocity",
    "Y0",
    "A",
    "RC",
    "Tau",
    "RC1d",
    "RC2d",
    "Goodness of Fit",
    "Decay Time",
    "Decay Time 36%",
    "Curve Fit Decay Time 36%",
    "Curve Fit Decay Value 36%",
];

const PANEL_WIDTH: u32 = 960;
const PANEL_HEIGHT: u32 = 480;
const MAX_PLOT_POINTS: usize = 4096;

#[derive(Parser)]
#[command(
    name = "calci",
    version,
    about = "Process ratiometric calcium fluorescence decay data"
)]
struct Cli {
    /// Log values as they are calculated
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BgReduce {
    Average,
    Point,
    None,
}

impl From<BgReduce> for BackgroundMode {
    fn from(mode: BgReduce) -> Self {
        match mode {
            BgReduce::Average => BackgroundMode::Average,
            BgReduce::Point => BackgroundMode::Point,
            BgReduce::None => BackgroundMode::None,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RatioBy {
    Time,
    Amplitude,
}

impl From<RatioBy> for RatioSelection {
    fn from(by: RatioBy) -> Self {
        match by {
            RatioBy::Time => RatioSelection::Time,
            RatioBy::Amplitude => RatioSelection::Amplitude,
        }
    }
}

/// Analysis settings. Flags override values from `--config`.
#[derive(Args, Debug)]
struct AnalysisArgs {
    /// TOML file with analysis settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Peak detection look-ahead in samples (default 30)
    #[arg(long)]
    lookahead: Option<usize>,
    /// Peak detection minimum prominence (default 0)
    #[arg(long)]
    delta: Option<f64>,
    /// Invert the waveform (special cases only)
    #[arg(long)]
    invert: bool,
    /// Method for choosing which ratio to use
    #[arg(long)]
    ratio_by: Option<RatioBy>,
    /// Relative amplitude from the peak where the fitted decay starts (default 1.0)
    #[arg(long)]
    decay_start: Option<f64>,
    /// Relative amplitude from the peak where the fitted decay ends (default 0.0)
    #[arg(long)]
    decay_end: Option<f64>,
    /// Bound the fit to non-negative values around the start and end of each decay
    #[arg(long)]
    bounds: bool,
    /// Average metrics over the first N cycles only
    #[arg(long)]
    limit: Option<usize>,
    /// Residual evaluation budget per decay fit (default 20000)
    #[arg(long)]
    max_evaluations: Option<usize>,
}

impl AnalysisArgs {
    fn resolve(&self) -> Result<AnalysisConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                toml::from_str::<AnalysisConfig>(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => AnalysisConfig::default(),
        };
        if let Some(lookahead) = self.lookahead {
            cfg.lookahead = lookahead;
        }
        if let Some(delta) = self.delta {
            cfg.delta = delta;
        }
        cfg.invert |= self.invert;
        if let Some(by) = self.ratio_by {
            cfg.ratio_selection = by.into();
        }
        if let Some(start) = self.decay_start {
            cfg.decay_start = start;
        }
        if let Some(end) = self.decay_end {
            cfg.decay_end = end;
        }
        cfg.use_bounds |= self.bounds;
        if self.limit.is_some() {
            cfg.range_limit = self.limit;
        }
        if let Some(budget) = self.max_evaluations {
            cfg.fit.max_evaluations = budget;
        }
        cfg.validate().context("invalid analysis settings")?;
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze worksheet CSV exports (a file or a directory of sheets)
    Process {
        /// Worksheet CSV file, or a directory whose CSV files are the sheets
        input: PathBuf,
        /// Directory for the processed CSV and the charts
        #[arg(short = 'O', long, default_value = ".")]
        outputdir: PathBuf,
        /// Process only the sheet with this name
        #[arg(long, conflicts_with = "sheetnum")]
        sheetname: Option<String>,
        /// Process only the sheet at this position (0-based)
        #[arg(long)]
        sheetnum: Option<usize>,
        /// Process only this cell-line column (0-based); needs a single sheet
        #[arg(long)]
        column: Option<usize>,
        /// Method for reducing background data
        #[arg(long, value_enum, default_value = "average")]
        bgreduce: BgReduce,
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[arg(long)]
        xmin: Option<f64>,
        #[arg(long)]
        xmax: Option<f64>,
        #[arg(long)]
        ymin: Option<f64>,
        #[arg(long)]
        ymax: Option<f64>,
        /// Skip chart rendering
        #[arg(long)]
        no_plot: bool,
        /// Print every column analysis as a JSON line
        #[arg(long)]
        json: bool,
    },
    /// Analyze one interleaved raw column read from stdin or --input
    Analyze {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Row spacing when the input has no time column
        #[arg(long, default_value_t = 0.01)]
        dt: f64,
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
}

struct SheetFilter {
    name: Option<String>,
    number: Option<usize>,
    column: Option<usize>,
}

struct ProcessOptions {
    outputdir: PathBuf,
    background: BackgroundMode,
    limits: AxisLimits,
    plot: bool,
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Process {
            input,
            outputdir,
            sheetname,
            sheetnum,
            column,
            bgreduce,
            analysis,
            xmin,
            xmax,
            ymin,
            ymax,
            no_plot,
            json,
        } => {
            let cfg = analysis.resolve()?;
            let filter = SheetFilter {
                name: sheetname,
                number: sheetnum,
                column,
            };
            let options = ProcessOptions {
                outputdir,
                background: bgreduce.into(),
                limits: axis_limits(xmin, xmax, ymin, ymax)?,
                plot: !no_plot,
                json,
            };
            cmd_process(&input, &filter, &options, &cfg)?
        }
        Commands::Analyze {
            input,
            dt,
            analysis,
        } => cmd_analyze(input.as_deref(), dt, &analysis.resolve()?)?,
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn axis_limits(
    xmin: Option<f64>,
    xmax: Option<f64>,
    ymin: Option<f64>,
    ymax: Option<f64>,
) -> Result<AxisLimits> {
    Ok(AxisLimits {
        x: axis_range("x", xmin, xmax)?,
        y: axis_range("y", ymin, ymax)?,
    })
}

/// A fixed range needs both ends; a single end is ignored with a warning.
fn axis_range(axis: &str, min: Option<f64>, max: Option<f64>) -> Result<Option<(f64, f64)>> {
    match (min, max) {
        (Some(min), Some(max)) if max <= min => {
            bail!("--{axis}max ({max}) must be greater than --{axis}min ({min})")
        }
        (Some(min), Some(max)) => Ok(Some((min, max))),
        (None, None) => Ok(None),
        _ => {
            warn!("--{axis}min and --{axis}max must be given together; using the data range");
            Ok(None)
        }
    }
}

fn select_sheets(workbook: &Workbook, filter: &SheetFilter) -> Result<Vec<PathBuf>> {
    if filter.column.is_some() && filter.name.is_none() && filter.number.is_none() {
        bail!("--column requires either --sheetname or --sheetnum");
    }
    let names = workbook.sheet_names();
    if let Some(name) = &filter.name {
        let index = names
            .iter()
            .position(|n| n == name)
            .with_context(|| format!("worksheet {name} does not exist in {}", workbook.name))?;
        return Ok(vec![workbook.sheets[index].clone()]);
    }
    if let Some(number) = filter.number {
        let sheet = workbook
            .sheets
            .get(number)
            .with_context(|| format!("worksheet number {number} does not exist in {}", workbook.name))?;
        return Ok(vec![sheet.clone()]);
    }
    Ok(workbook.sheets.clone())
}

fn cmd_process(
    input: &Path,
    filter: &SheetFilter,
    options: &ProcessOptions,
    cfg: &AnalysisConfig,
) -> Result<()> {
    let workbook = Workbook::open(input)?;
    let sheets = select_sheets(&workbook, filter)?;
    std::fs::create_dir_all(&options.outputdir)
        .with_context(|| format!("creating {}", options.outputdir.display()))?;

    let csv_path = options
        .outputdir
        .join(format!("{}_Processed.csv", workbook.name));
    let mut writer = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("creating {}", csv_path.display()))?;
    writer.write_record(PROCESSED_HEADER)?;

    for sheet_path in &sheets {
        let sheet = read_worksheet(sheet_path)?;
        info!("Processing: {} - {}", input.display(), sheet.name);
        if !sheet.is_analyzable() {
            warn!(
                "skipping sheet {}: {} columns, need at least 7",
                sheet.name, sheet.width
            );
            continue;
        }

        let time = sheet.ratio_time();
        let lines: Vec<CellLine> = sheet
            .column_selection(filter.column)
            .into_iter()
            .filter_map(|i| sheet.cell_line(i, options.background))
            .collect();
        let results: Vec<Result<ColumnAnalysis>> = lines
            .par_iter()
            .map(|line| {
                analyze_column(&line.raw, &time, cfg)
                    .with_context(|| format!("column {} of sheet {}", line.name, sheet.name))
            })
            .collect();

        let mut figures = Vec::with_capacity(lines.len());
        for (line, result) in lines.iter().zip(results) {
            let analysis = result?;
            writer.write_record(processed_record(&sheet.name, line, &analysis.metrics))?;
            if options.json {
                println!("{}", serde_json::to_string(&analysis)?);
            }
            if options.plot {
                figures.push(figure_from_analysis(
                    &line.name,
                    &analysis,
                    options.limits,
                    MAX_PLOT_POINTS,
                ));
            }
        }

        if options.plot && !figures.is_empty() {
            let chart_path = options
                .outputdir
                .join(format!("{}_{}.png", workbook.name, sheet.name));
            let title = format!("{} - {}", input.display(), sheet.name);
            draw_chart(&chart_path, &title, &figures)
                .with_context(|| format!("drawing {}", chart_path.display()))?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn processed_record(sheet: &str, line: &CellLine, m: &ColumnMetrics) -> Vec<String> {
    let mut record = vec![
        sheet.to_string(),
        line.name.clone(),
        (line.index + 1).to_string(),
    ];
    record.extend(
        [
            m.minima_mean,
            m.maxima_mean,
            m.amplitude,
            m.beat_rate,
            m.beat_variation,
            m.rise_time,
            m.rise_velocity,
            m.y0,
            m.a,
            m.rc,
            m.tau,
            m.rc_1d,
            m.rc_2d,
            m.goodness_of_fit,
            m.decay_time,
            m.decay_time_36,
            m.curve_fit_decay_time_36,
            m.curve_fit_decay_value_36,
        ]
        .iter()
        .map(f64::to_string),
    );
    record
}

fn read_trace(input: Option<&Path>) -> Result<text_io::RawTrace> {
    match input {
        Some(path) => text_io::read_raw_trace(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_raw_trace(&buf)
        }
    }
}

fn cmd_analyze(input: Option<&Path>, dt: f64, cfg: &AnalysisConfig) -> Result<()> {
    if !(dt.is_finite() && dt > 0.0) {
        bail!("--dt must be a positive number, got {dt}");
    }
    let trace = read_trace(input)?;
    let time = pair_time(&trace.row_time(dt));
    let mut raw = trace.raw;
    raw.truncate(even_rows(raw.len()));
    let analysis = analyze_column(&raw, &time, cfg)?;
    println!("{}", serde_json::to_string(&analysis)?);
    Ok(())
}

/// Lay the panels out two per row (a single panel fills the chart) and save as PNG.
fn draw_chart(path: &Path, title: &str, figures: &[Figure]) -> Result<()> {
    let columns = if figures.len() == 1 { 1 } else { 2 };
    let rows = figures.len().div_ceil(columns);
    let size = (PANEL_WIDTH * 2, PANEL_HEIGHT * rows as u32 + 40);
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let body = root.titled(title, ("sans-serif", 24))?;
    for (figure, area) in figures.iter().zip(body.split_evenly((rows, columns))) {
        Panel { area: &area }.draw(figure)?;
    }
    root.present()?;
    Ok(())
}

struct Panel<'a, 'b> {
    area: &'a DrawingArea<BitMapBackend<'b>, Shift>,
}

impl PlotBackend for Panel<'_, '_> {
    fn draw(&mut self, fig: &Figure) -> Result<()> {
        let ((x_min, x_max), (y_min, y_max)) = fig.bounds();
        let mut chart = ChartBuilder::on(self.area)
            .margin(10)
            .caption(
                fig.title.clone().unwrap_or_else(|| "Plot".into()),
                ("sans-serif", 20),
            )
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
        let mut mesh = chart.configure_mesh();
        if let Some(label) = &fig.x.label {
            mesh.x_desc(label.as_str());
        }
        if let Some(label) = &fig.y.label {
            mesh.y_desc(label.as_str());
        }
        mesh.draw()?;

        for series in &fig.series {
            match series {
                Series::Line(line) => {
                    let (r, g, b) = line.style.color.rgb();
                    let style = RGBColor(r, g, b).stroke_width(line.style.width.round() as u32);
                    chart.draw_series(LineSeries::new(
                        line.points.iter().map(|p| (p[0], p[1])),
                        style,
                    ))?;
                }
                Series::Points(points) => {
                    let (r, g, b) = points.color.rgb();
                    let radius = points.radius;
                    chart.draw_series(points.points.iter().map(|p| {
                        Circle::new((p[0], p[1]), radius, RGBColor(r, g, b).filled())
                    }))?;
                }
            }
        }
        Ok(())
    }
}
