use std::{path::PathBuf, str::FromStr};

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use outline::config::{JournalTitleFormat, OutlinerConfig};
use outline::core::{BlockId, CommandKind, HeadingChoice, Timestamp};
use outline::graph::Graph;
use outline::menu::{TemplateSubmit, render_menu};
use outline::outliner::Outliner;
use outline::repeater::{self, journal_title, parse_interval, parse_time_of_day};
use outline::resolver::{
    BlockRefContext, COLLAPSE_TOGGLE_CLASS, Direction, EventTarget, PageTitleContext, PointerEvent,
};
use outline::services::{EditorCommand, EditorOps};
use outline::session::SessionTarget;
use outline::submit::CommitOutcome;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "outline",
    about = "Context menus and scheduling timestamps for a block outline",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// TOML config file (defaults to $OUTLINE_CONFIG, then built-in settings).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve a right-click and print the menu it opens.
    Menu(MenuArgs),

    /// Open a menu and activate items in it, saving the graph afterwards.
    Activate(ActivateArgs),

    /// Set the SCHEDULED or DEADLINE timestamp of a block.
    Schedule(ScheduleArgs),

    /// Encode or decode scheduling timestamps.
    #[command(subcommand)]
    Timestamp(TimestampCommand),

    /// Print the journal page reference for a date.
    JournalRef(JournalRefArgs),
}

/// Where the right-click lands and what the editor state is at that moment.
#[derive(Debug, Args)]
struct TargetArgs {
    /// Graph JSON file.
    #[arg(long)]
    graph: PathBuf,
    /// `blockid` attribute of the clicked element (not validated).
    #[arg(long)]
    block: Option<String>,
    /// Currently selected blocks, comma separated.
    #[arg(long, value_delimiter = ',')]
    selection: Vec<BlockId>,
    /// Page title under the pointer.
    #[arg(long)]
    page: Option<String>,
    /// Block reference under the pointer, as OWNER:REF.
    #[arg(long, value_parser = parse_ref_pair)]
    block_ref: Option<(BlockId, BlockId)>,
    /// The click landed on the collapse/expand bullet.
    #[arg(long)]
    bullet: bool,
}

#[derive(Debug, Args)]
struct MenuArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Emit JSON instead of the text layout.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ActivateArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Items to activate in order: a menu key, `color:NAME|none`,
    /// `heading:N|auto|none` or `template:NAME`.
    #[arg(long = "item", required = true)]
    items: Vec<ItemSpec>,
    /// Create templates without their parent block.
    #[arg(long)]
    template_without_parent: bool,
    /// Do not write the graph back.
    #[arg(long)]
    dry_run: bool,
    /// Emit the resulting workbench state as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ScheduleArgs {
    /// Graph JSON file.
    #[arg(long)]
    graph: PathBuf,
    /// Block to schedule.
    #[arg(long)]
    block: BlockId,
    #[arg(long, value_enum, default_value_t = KindArg::Scheduled)]
    kind: KindArg,
    /// Date (YYYY-MM-DD). Defaults to the existing date, else today.
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Clock time (HH:MM).
    #[arg(long)]
    time: Option<String>,
    /// Repeat interval such as `2d` or `1w`.
    #[arg(long)]
    repeat: Option<String>,
    /// Drop the existing clock time.
    #[arg(long, conflicts_with = "time")]
    clear_time: bool,
    /// Drop the existing repeater.
    #[arg(long, conflicts_with = "repeat")]
    clear_repeat: bool,
    /// Commit through the edit buffer, as if the block were being edited.
    #[arg(long)]
    edit: bool,
    /// Do not write the graph back.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KindArg {
    Scheduled,
    Deadline,
}

impl From<KindArg> for CommandKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Scheduled => CommandKind::Scheduled,
            KindArg::Deadline => CommandKind::Deadline,
        }
    }
}

#[derive(Debug, Subcommand)]
enum TimestampCommand {
    /// Encode a date, optional time and optional repeat interval.
    Format {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        repeat: Option<String>,
    },
    /// Decode a timestamp such as `<2024-03-05 Tue 09:30 .+2d>`.
    Parse {
        text: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct JournalRefArgs {
    /// Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Overrides the configured journal title format.
    #[arg(long, value_enum)]
    format: Option<TitleFormatArg>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TitleFormatArg {
    MonthOrdinal,
    Iso,
    Underscored,
    Weekday,
}

impl From<TitleFormatArg> for JournalTitleFormat {
    fn from(format: TitleFormatArg) -> Self {
        match format {
            TitleFormatArg::MonthOrdinal => JournalTitleFormat::MonthOrdinalYear,
            TitleFormatArg::Iso => JournalTitleFormat::IsoDate,
            TitleFormatArg::Underscored => JournalTitleFormat::Underscored,
            TitleFormatArg::Weekday => JournalTitleFormat::WeekdayMonthOrdinalYear,
        }
    }
}

/// One `--item` of `activate`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemSpec {
    Key(String),
    Color(Option<String>),
    /// `None` removes the heading.
    Heading(Option<HeadingChoice>),
    Template(String),
}

impl FromStr for ItemSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((kind, value)) = s.split_once(':') else {
            return Ok(ItemSpec::Key(s.to_string()));
        };
        match kind {
            "color" if value == "none" => Ok(ItemSpec::Color(None)),
            "color" => Ok(ItemSpec::Color(Some(value.to_string()))),
            "heading" => match value {
                "none" => Ok(ItemSpec::Heading(None)),
                "auto" => Ok(ItemSpec::Heading(Some(HeadingChoice::Auto))),
                n => n
                    .parse::<u8>()
                    .map(|n| ItemSpec::Heading(Some(HeadingChoice::Level(n))))
                    .map_err(|_| format!("bad heading level {n:?}")),
            },
            "template" if value.trim().is_empty() => Err("template name is empty".into()),
            "template" => Ok(ItemSpec::Template(value.to_string())),
            _ => Ok(ItemSpec::Key(s.to_string())),
        }
    }
}

fn parse_ref_pair(s: &str) -> Result<(BlockId, BlockId), String> {
    let (owner, target) = s
        .split_once(':')
        .ok_or_else(|| format!("expected OWNER:REF, got {s:?}"))?;
    let owner = owner.parse::<BlockId>().map_err(|e| e.to_string())?;
    let target = target.parse::<BlockId>().map_err(|e| e.to_string())?;
    Ok((owner, target))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = OutlinerConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Menu(args) => handle_menu(args, config),
        Commands::Activate(args) => handle_activate(args, config),
        Commands::Schedule(args) => handle_schedule(args, config),
        Commands::Timestamp(cmd) => handle_timestamp(cmd),
        Commands::JournalRef(args) => handle_journal_ref(args, &config),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the graph, prime the interaction context and resolve the click.
fn open_menu(target: &TargetArgs, config: OutlinerConfig) -> Result<Outliner<Graph>> {
    let graph = Graph::load(&target.graph)?;
    let mut outliner = Outliner::new(config, graph);
    let ctx = outliner.context_mut();
    for id in &target.selection {
        ctx.selection.add(*id, Direction::Down);
    }
    ctx.page_title = target.page.clone().map(|page| PageTitleContext { page });
    ctx.block_ref = target
        .block_ref
        .map(|(owner, block_ref)| BlockRefContext { owner, block_ref });

    let event = PointerEvent {
        target: EventTarget {
            block_id: target.block.clone(),
            classes: if target.bullet {
                vec![COLLAPSE_TOGGLE_CLASS.to_string()]
            } else {
                vec![]
            },
            enclosing_block: target.block.as_deref().and_then(BlockId::parse),
        },
    };
    if outliner.resolve_and_dispatch(&event).is_none() {
        bail!("nothing to act on at that position");
    }
    Ok(outliner)
}

fn handle_menu(args: MenuArgs, config: OutlinerConfig) -> Result<()> {
    let outliner = open_menu(&args.target, config)?;
    let menu = outliner.menu().context("menu was closed")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(menu)?);
    } else {
        println!("{}", render_menu(menu));
    }
    Ok(())
}

fn handle_activate(args: ActivateArgs, config: OutlinerConfig) -> Result<()> {
    let mut outliner = open_menu(&args.target, config)?;
    for item in &args.items {
        debug!(?item, "activating");
        match item {
            ItemSpec::Key(key) => outliner.activate(key)?,
            ItemSpec::Color(Some(color)) => outliner.choose_color(color)?,
            ItemSpec::Color(None) => outliner.remove_color()?,
            ItemSpec::Heading(Some(HeadingChoice::Level(n))) => outliner.choose_heading(*n)?,
            ItemSpec::Heading(Some(HeadingChoice::Auto)) => outliner.set_default_heading()?,
            ItemSpec::Heading(None) => outliner.remove_heading()?,
            ItemSpec::Template(name) => {
                outliner.open_template_form()?;
                outliner.set_template_name(name)?;
                if args.template_without_parent {
                    outliner.set_template_include_parent(false)?;
                }
                match outliner.submit_template()? {
                    TemplateSubmit::Created(_) => {}
                    TemplateSubmit::Duplicate(_) => bail!("template {name:?} already exists"),
                    TemplateSubmit::Ignored => bail!("template name is empty"),
                }
            }
        }
    }

    let graph = outliner.into_services();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&graph.workbench)?);
    } else {
        print_workbench(&graph);
    }
    if !args.dry_run {
        graph.save(&args.target.graph)?;
    }
    Ok(())
}

fn print_workbench(graph: &Graph) {
    let wb = &graph.workbench;
    if let Some(clip) = &wb.clipboard {
        println!("clipboard:\n{clip}");
    }
    if let Some(modal) = &wb.modal {
        println!("modal: {modal:?}");
    }
    for item in &wb.sidebar {
        println!("sidebar: {item:?}");
    }
    for note in &wb.notifications {
        println!("{:?}: {}", note.level, note.message);
    }
}

fn handle_schedule(args: ScheduleArgs, config: OutlinerConfig) -> Result<()> {
    let mut graph = Graph::load(&args.graph)?;
    if args.edit {
        graph.start_editing(args.block)?;
    }
    let kind = CommandKind::from(args.kind);
    let mut outliner = Outliner::new(config, graph);
    outliner.open_timestamp_editor(SessionTarget::Block(args.block), Some(kind), None, None);

    let editor = outliner.timestamps_mut();
    if let Some(date) = args.date {
        editor.set_date(date);
    }
    if let Some(time) = &args.time {
        if parse_time_of_day(time).is_none() {
            bail!("invalid time {time:?} (expected HH:MM)");
        }
        editor.set_time(time);
    }
    if args.clear_time {
        editor.clear_time();
    }
    if let Some(repeat) = &args.repeat {
        let (num, unit) = parse_interval(repeat)?;
        editor.add_repeater();
        editor.set_repeater_num(&num.to_string());
        editor.set_repeater_unit(unit);
    }
    if args.clear_repeat {
        editor.clear_repeater();
    }

    match outliner.submit_timestamp() {
        CommitOutcome::Committed { text, path, .. } => {
            debug!(?path, "committed");
            println!("{} {}", kind.marker(), text);
        }
        CommitOutcome::Skipped { reason } => bail!("timestamp not written: {reason:?}"),
    }

    let mut graph = outliner.into_services();
    if args.edit {
        graph.apply(EditorCommand::ClearEdit);
    }
    if !args.dry_run {
        graph.save(&args.graph)?;
    }
    Ok(())
}

fn handle_timestamp(cmd: TimestampCommand) -> Result<()> {
    match cmd {
        TimestampCommand::Format { date, time, repeat } => {
            println!("{}", format_timestamp(date, time.as_deref(), repeat.as_deref())?);
        }
        TimestampCommand::Parse { text, json } => {
            let ts = repeater::parse_timestamp(&text).with_context(|| format!("parsing {text:?}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ts)?);
            } else {
                println!("{}", repeater::serialize(&ts));
            }
        }
    }
    Ok(())
}

fn format_timestamp(date: NaiveDate, time: Option<&str>, repeat: Option<&str>) -> Result<String> {
    let time = match time {
        Some(t) => Some(parse_time_of_day(t).with_context(|| format!("invalid time {t:?}"))?),
        None => None,
    };
    let repeater = match repeat {
        Some(r) => {
            let (num, unit) = parse_interval(r)?;
            repeater::complete_repeater(Some(num), Some(unit))
        }
        None => None,
    };
    Ok(repeater::serialize(&Timestamp {
        date,
        time,
        repeater,
    }))
}

fn handle_journal_ref(args: JournalRefArgs, config: &OutlinerConfig) -> Result<()> {
    let date = args.date.unwrap_or_else(|| Local::now().date_naive());
    let format = args
        .format
        .map(JournalTitleFormat::from)
        .unwrap_or(config.journal.title_format);
    println!("{}", outline::core::page_ref(&journal_title(date, format)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use outline::services::BlockLookup;
    use std::{fs, path::Path};

    fn write_graph(dir: &Path) -> (PathBuf, BlockId, BlockId) {
        let mut graph = Graph::new("notes");
        let a = graph.insert_block("Inbox", None, "alpha");
        let b = graph.insert_block("Inbox", Some(a), "beta");
        let path = dir.join("graph.json");
        graph.save(&path).expect("save graph");
        (path, a, b)
    }

    fn target(path: &Path) -> TargetArgs {
        TargetArgs {
            graph: path.to_path_buf(),
            block: None,
            selection: vec![],
            page: None,
            block_ref: None,
            bullet: false,
        }
    }

    #[test]
    fn item_specs_parse() {
        assert_eq!("cut".parse::<ItemSpec>(), Ok(ItemSpec::Key("cut".into())));
        assert_eq!("color:red".parse::<ItemSpec>(), Ok(ItemSpec::Color(Some("red".into()))));
        assert_eq!("color:none".parse::<ItemSpec>(), Ok(ItemSpec::Color(None)));
        assert_eq!(
            "heading:auto".parse::<ItemSpec>(),
            Ok(ItemSpec::Heading(Some(HeadingChoice::Auto)))
        );
        assert_eq!(
            "heading:3".parse::<ItemSpec>(),
            Ok(ItemSpec::Heading(Some(HeadingChoice::Level(3))))
        );
        assert!("heading:big".parse::<ItemSpec>().is_err());
        assert!("template: ".parse::<ItemSpec>().is_err());
    }

    #[test]
    fn ref_pairs_need_two_ids() {
        let (a, b) = (BlockId::new(), BlockId::new());
        assert_eq!(parse_ref_pair(&format!("{a}:{b}")), Ok((a, b)));
        assert!(parse_ref_pair(&a.to_string()).is_err());
    }

    #[test]
    fn format_timestamp_derives_repeater_kind() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).expect("date");
        assert_eq!(
            format_timestamp(date, Some("09:30"), Some("2d")).expect("format"),
            "<2024-03-05 Tue 09:30 .+2d>"
        );
        assert_eq!(
            format_timestamp(date, None, Some("1w")).expect("format"),
            "<2024-03-05 Tue ++1w>"
        );
        assert!(format_timestamp(date, Some("9h"), None).is_err());
    }

    #[test]
    fn activate_applies_heading_and_saves_graph() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (path, a, b) = write_graph(tmp.path());
        let mut target = target(&path);
        target.selection = vec![a, b];

        handle_activate(
            ActivateArgs {
                target,
                items: vec![ItemSpec::Heading(Some(HeadingChoice::Level(2)))],
                template_without_parent: false,
                dry_run: false,
                json: false,
            },
            OutlinerConfig::default(),
        )
        .expect("activate");

        let graph = Graph::load(&path).expect("reload");
        for id in [a, b] {
            assert_eq!(
                graph.block(id).and_then(|blk| blk.heading()),
                Some(HeadingChoice::Level(2))
            );
        }
    }

    #[test]
    fn activate_rejects_unknown_items() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (path, a, _) = write_graph(tmp.path());
        let mut target = target(&path);
        target.block = Some(a.to_string());
        let err = handle_activate(
            ActivateArgs {
                target,
                items: vec![ItemSpec::Key("frobnicate".into())],
                template_without_parent: false,
                dry_run: true,
                json: false,
            },
            OutlinerConfig::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn activate_rejects_heading_outside_offered_levels() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (path, a, _) = write_graph(tmp.path());
        let mut target = target(&path);
        target.block = Some(a.to_string());
        let err = handle_activate(
            ActivateArgs {
                target,
                items: vec![ItemSpec::Heading(Some(HeadingChoice::Level(0)))],
                template_without_parent: false,
                dry_run: false,
                json: false,
            },
            OutlinerConfig::default(),
        )
        .expect_err("level 0 is not offered");
        assert!(format!("{err:#}").contains("outside 1..=6"));

        let graph = Graph::load(&path).expect("reload");
        assert_eq!(graph.block(a).and_then(|blk| blk.heading()), None);
    }

    #[test]
    fn menu_needs_a_resolvable_target() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (path, ..) = write_graph(tmp.path());
        let mut target = target(&path);
        target.block = Some("garbage".into());
        assert!(open_menu(&target, OutlinerConfig::default()).is_err());
    }

    #[test]
    fn schedule_writes_marker_line() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (path, a, _) = write_graph(tmp.path());
        handle_schedule(
            ScheduleArgs {
                graph: path.clone(),
                block: a,
                kind: KindArg::Deadline,
                date: NaiveDate::from_ymd_opt(2024, 3, 5),
                time: Some("18:00".into()),
                repeat: Some("1m".into()),
                clear_time: false,
                clear_repeat: false,
                edit: false,
                dry_run: false,
            },
            OutlinerConfig::default(),
        )
        .expect("schedule");

        let saved = fs::read_to_string(&path).expect("read graph");
        let graph = Graph::from_json_str(&saved).expect("parse graph");
        assert_eq!(
            graph.block(a).map(|blk| blk.content.as_str()),
            Some("alpha\nDEADLINE: <2024-03-05 Tue 18:00 .+1m>")
        );
    }

    #[test]
    fn schedule_through_edit_buffer_saves_block() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (path, a, _) = write_graph(tmp.path());
        handle_schedule(
            ScheduleArgs {
                graph: path.clone(),
                block: a,
                kind: KindArg::Scheduled,
                date: NaiveDate::from_ymd_opt(2024, 3, 6),
                time: None,
                repeat: None,
                clear_time: false,
                clear_repeat: false,
                edit: true,
                dry_run: false,
            },
            OutlinerConfig::default(),
        )
        .expect("schedule");

        let graph = Graph::load(&path).expect("reload");
        assert_eq!(graph.workbench.editing, None);
        assert_eq!(
            graph.block(a).map(|blk| blk.content.as_str()),
            Some("alpha\nSCHEDULED: <2024-03-06 Wed>")
        );
    }
}
