//! Interaction core for a block outliner: resolves pointer events into the entity the
//! user means (page title, block reference, selection, single block), builds the
//! contextual action menu for it, and edits the recurring scheduling timestamps that
//! blocks carry.
//!
//! Everything here is headless and synchronous. Collaborators that actually mutate or
//! store blocks are reached through the traits in [`services`]; [`graph`] ships an
//! in-memory implementation of them.

pub mod core {
    use chrono::{NaiveDate, NaiveTime};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use serde_with::{DisplayFromStr, serde_as};
    use std::{fmt, str::FromStr};
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct BlockId(pub Uuid);

    impl BlockId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }

        /// Lenient parse used for DOM-style `blockid` attributes: anything that is not a
        /// UUID yields `None` instead of an error.
        pub fn parse(raw: &str) -> Option<Self> {
            Uuid::parse_str(raw.trim()).ok().map(Self)
        }
    }

    impl fmt::Display for BlockId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.fmt(f)
        }
    }

    impl FromStr for BlockId {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Self::parse(s).ok_or_else(|| DomainError::InvalidBlockId(s.to_string()))
        }
    }

    /* ------------------------------ Blocks ------------------------------ */

    /// Property keys the menu and template editor write.
    pub mod props {
        pub const BACKGROUND_COLOR: &str = "background-color";
        pub const HEADING: &str = "heading";
        pub const TEMPLATE: &str = "template";
        pub const TEMPLATE_INCLUDING_PARENT: &str = "template-including-parent";
    }

    /// Tag that turns a block into a flashcard.
    pub const CARD_TAG: &str = "#card";

    /// A single outline node.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Block {
        pub id: BlockId,
        /// Name of the page the block lives on.
        pub page: String,
        #[serde(default)]
        pub parent: Option<BlockId>,
        #[serde(default)]
        pub children: Vec<BlockId>,
        /// Raw block text, including scheduling marker lines.
        #[serde(default)]
        pub content: String,
        #[serde(default)]
        pub properties: IndexMap<String, PropertyValue>,
        #[serde(default)]
        pub collapsed: bool,
    }

    impl Block {
        pub fn new(page: impl Into<String>, content: impl Into<String>) -> Self {
            Self {
                id: BlockId::new(),
                page: page.into(),
                parent: None,
                children: vec![],
                content: content.into(),
                properties: IndexMap::new(),
                collapsed: false,
            }
        }

        pub fn property(&self, key: &str) -> Option<&PropertyValue> {
            self.properties.get(key)
        }

        pub fn heading(&self) -> Option<HeadingChoice> {
            self.property(props::HEADING)
                .and_then(HeadingChoice::from_property)
        }

        pub fn is_card(&self) -> bool {
            self.content
                .split_whitespace()
                .any(|word| word == CARD_TAG || word == "#[[card]]")
        }
    }

    /// Property values as they appear in `key:: value` pairs.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum PropertyValue {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    impl PropertyValue {
        pub fn as_text(&self) -> Option<&str> {
            match self {
                PropertyValue::Text(s) => Some(s),
                _ => None,
            }
        }
    }

    impl fmt::Display for PropertyValue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                PropertyValue::Bool(b) => write!(f, "{b}"),
                PropertyValue::Int(n) => write!(f, "{n}"),
                PropertyValue::Text(s) => f.write_str(s),
            }
        }
    }

    impl From<&str> for PropertyValue {
        fn from(s: &str) -> Self {
            Self::Text(s.to_string())
        }
    }

    /// Heading property: `true` means "auto" (render by outline depth), an integer is
    /// an explicit level.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum HeadingChoice {
        Auto,
        Level(u8),
    }

    impl HeadingChoice {
        pub fn to_property(self) -> PropertyValue {
            match self {
                HeadingChoice::Auto => PropertyValue::Bool(true),
                HeadingChoice::Level(n) => PropertyValue::Int(i64::from(n)),
            }
        }

        pub fn from_property(value: &PropertyValue) -> Option<Self> {
            match value {
                PropertyValue::Bool(true) => Some(HeadingChoice::Auto),
                PropertyValue::Int(n) => u8::try_from(*n).ok().map(HeadingChoice::Level),
                _ => None,
            }
        }
    }

    /* --------------------------- Scheduling kinds --------------------------- */

    /// Which scheduling keyword a timestamp is written under.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum CommandKind {
        Deadline,
        Scheduled,
    }

    impl CommandKind {
        /// Interpret an editor command name; only the scheduling keywords qualify.
        pub fn from_command(name: &str) -> Option<Self> {
            match name.trim().to_ascii_lowercase().as_str() {
                "deadline" => Some(CommandKind::Deadline),
                "scheduled" => Some(CommandKind::Scheduled),
                _ => None,
            }
        }

        /// Keyword used on the marker line inside block content.
        pub fn marker(self) -> &'static str {
            match self {
                CommandKind::Deadline => "DEADLINE",
                CommandKind::Scheduled => "SCHEDULED",
            }
        }
    }

    impl fmt::Display for CommandKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                CommandKind::Deadline => f.write_str("deadline"),
                CommandKind::Scheduled => f.write_str("scheduled"),
            }
        }
    }

    /* ---------------------------- Temporal value ---------------------------- */

    /// Repeater interval unit (`h`, `d`, `w`, `m`, `y`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum DurationUnit {
        #[serde(rename = "h")]
        Hour,
        #[serde(rename = "d")]
        Day,
        #[serde(rename = "w")]
        Week,
        #[serde(rename = "m")]
        Month,
        #[serde(rename = "y")]
        Year,
    }

    impl DurationUnit {
        pub const ALL: [DurationUnit; 5] = [
            DurationUnit::Hour,
            DurationUnit::Day,
            DurationUnit::Week,
            DurationUnit::Month,
            DurationUnit::Year,
        ];

        pub fn letter(self) -> char {
            match self {
                DurationUnit::Hour => 'h',
                DurationUnit::Day => 'd',
                DurationUnit::Week => 'w',
                DurationUnit::Month => 'm',
                DurationUnit::Year => 'y',
            }
        }

        pub fn from_letter(c: char) -> Option<Self> {
            Self::ALL.into_iter().find(|unit| unit.letter() == c)
        }
    }

    impl fmt::Display for DurationUnit {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.letter())
        }
    }

    impl FromStr for DurationUnit {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let mut chars = s.trim().chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Self::from_letter(c),
                _ => None,
            }
            .ok_or_else(|| DomainError::UnknownDurationUnit(s.to_string()))
        }
    }

    /// `+` (from last occurrence), `++` (next future occurrence counted from the
    /// base date), `.+` (counted from the day it was completed).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum RepeaterKind {
        FromLast,
        FromBase,
        FromNow,
    }

    impl RepeaterKind {
        pub fn marker(self) -> &'static str {
            match self {
                RepeaterKind::FromLast => "+",
                RepeaterKind::FromBase => "++",
                RepeaterKind::FromNow => ".+",
            }
        }
    }

    impl fmt::Display for RepeaterKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.marker())
        }
    }

    impl FromStr for RepeaterKind {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim() {
                "+" => Ok(RepeaterKind::FromLast),
                "++" => Ok(RepeaterKind::FromBase),
                ".+" => Ok(RepeaterKind::FromNow),
                other => Err(DomainError::UnknownRepeaterKind(other.to_string())),
            }
        }
    }

    /// A complete repeat rule. Partial rules only exist in the editing draft.
    #[serde_as]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Repeater {
        pub num: u32,
        #[serde_as(as = "DisplayFromStr")]
        pub unit: DurationUnit,
        #[serde_as(as = "DisplayFromStr")]
        pub kind: RepeaterKind,
    }

    impl fmt::Display for Repeater {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}{}{}", self.kind, self.num, self.unit)
        }
    }

    /// Date, optional clock time and optional repeater attached to a block.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Timestamp {
        pub date: NaiveDate,
        pub time: Option<NaiveTime>,
        pub repeater: Option<Repeater>,
    }

    impl Timestamp {
        pub fn on(date: NaiveDate) -> Self {
            Self {
                date,
                time: None,
                repeater: None,
            }
        }
    }

    /* ------------------------------ Text refs ------------------------------ */

    pub fn page_ref(name: &str) -> String {
        format!("[[{name}]]")
    }

    pub fn block_ref(id: BlockId) -> String {
        format!("(({id}))")
    }

    pub fn block_embed(id: BlockId) -> String {
        format!("{{{{embed (({id}))}}}}")
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum DomainError {
        #[error("invalid block id {0:?}")]
        InvalidBlockId(String),
        #[error("invalid timestamp: {0}")]
        InvalidTimestamp(String),
        #[error("unknown duration unit {0:?} (expected one of h, d, w, m, y)")]
        UnknownDurationUnit(String),
        #[error("unknown repeater kind {0:?}")]
        UnknownRepeaterKind(String),
        #[error("block {0} not found")]
        BlockNotFound(BlockId),
        #[error("no context menu is open")]
        NoOpenMenu,
        #[error("menu has no item {0:?}")]
        UnknownMenuItem(String),
        #[error("menu has no {0} picker")]
        NoPicker(&'static str),
        #[error("color {0:?} is not in the palette")]
        ColorNotInPalette(String),
        #[error("heading level {level} is outside 1..={levels}")]
        HeadingLevelOutOfRange { level: u8, levels: u8 },
        #[error("menu has no template editor")]
        NoTemplateEditor,
        #[error("no plugin command {action_id:?} registered by {plugin_id:?}")]
        UnknownPluginCommand {
            plugin_id: String,
            action_id: String,
        },
    }

}

pub mod config {
    //! Runtime configuration, read from TOML.
    //!
    //! Lookup order: explicit path, then `$OUTLINE_CONFIG`, then built-in defaults.
    //! Every section is optional; missing keys fall back to their defaults.

    use anyhow::{Context, Result};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::{fs, path::Path};
    use tracing::debug;

    pub const CONFIG_ENV: &str = "OUTLINE_CONFIG";

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct OutlinerConfig {
        pub features: Features,
        pub journal: JournalSettings,
        pub menu: MenuSettings,
        /// Shortcut hints keyed by shortcut id (e.g. `editor/cut`).
        pub shortcuts: IndexMap<String, String>,
    }

    impl Default for OutlinerConfig {
        fn default() -> Self {
            Self {
                features: Features::default(),
                journal: JournalSettings::default(),
                menu: MenuSettings::default(),
                shortcuts: default_shortcuts(),
            }
        }
    }

    impl OutlinerConfig {
        pub fn from_toml_str(text: &str) -> Result<Self> {
            toml::from_str(text).context("parsing outline config")
        }

        /// Load from `path`, or from `$OUTLINE_CONFIG`, or fall back to defaults.
        pub fn load(path: Option<&Path>) -> Result<Self> {
            let env_path = std::env::var_os(CONFIG_ENV);
            let Some(path) = path.or(env_path.as_deref().map(Path::new)) else {
                debug!("no config file given; using defaults");
                return Ok(Self::default());
            };
            let text =
                fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            debug!(?path, "loaded config");
            Self::from_toml_str(&text).with_context(|| format!("in {:?}", path))
        }

        pub fn shortcut(&self, id: &str) -> Option<String> {
            self.shortcuts.get(id).cloned()
        }
    }

    /// Feature switches queried while building menus.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Features {
        pub flashcards: bool,
        pub developer_mode: bool,
        /// Running inside the desktop shell (enables app URLs).
        pub desktop: bool,
    }

    impl Default for Features {
        fn default() -> Self {
            Self {
                flashcards: true,
                developer_mode: false,
                desktop: false,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct JournalSettings {
        pub title_format: JournalTitleFormat,
    }

    /// How journal page names are derived from a date.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub enum JournalTitleFormat {
        /// `Mar 5th, 2024`
        #[default]
        #[serde(rename = "MMM do, yyyy")]
        MonthOrdinalYear,
        /// `2024-03-05`
        #[serde(rename = "yyyy-MM-dd")]
        IsoDate,
        /// `2024_03_05`
        #[serde(rename = "yyyy_MM_dd")]
        Underscored,
        /// `Tuesday, Mar 5th, 2024`
        #[serde(rename = "EEEE, MMM do, yyyy")]
        WeekdayMonthOrdinalYear,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct MenuSettings {
        /// Background colors offered by the color picker, in display order.
        pub palette: Vec<String>,
        /// Highest heading level offered by the heading picker.
        pub heading_levels: u8,
    }

    impl Default for MenuSettings {
        fn default() -> Self {
            Self {
                palette: ["yellow", "red", "pink", "green", "blue", "purple", "gray"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                heading_levels: 6,
            }
        }
    }

    fn default_shortcuts() -> IndexMap<String, String> {
        [
            ("editor/cut", "mod+x"),
            ("editor/copy", "mod+c"),
            ("editor/delete", "backspace"),
            ("editor/cycle-todo", "mod+enter"),
            ("editor/expand-block-children", "mod+down"),
            ("editor/collapse-block-children", "mod+up"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn partial_toml_keeps_defaults() {
            let cfg = OutlinerConfig::from_toml_str(
                r#"
[features]
developer_mode = true

[journal]
title_format = "yyyy-MM-dd"
"#,
            )
            .expect("parse");
            assert!(cfg.features.developer_mode);
            assert!(cfg.features.flashcards);
            assert!(!cfg.features.desktop);
            assert_eq!(cfg.journal.title_format, JournalTitleFormat::IsoDate);
            assert_eq!(cfg.menu.heading_levels, 6);
            assert_eq!(cfg.shortcut("editor/cut").as_deref(), Some("mod+x"));
        }

        #[test]
        fn rejects_unknown_title_format() {
            let err = OutlinerConfig::from_toml_str("[journal]\ntitle_format = \"dd.MM.yy\"\n");
            assert!(err.is_err());
        }

        #[test]
        fn load_reads_explicit_path() {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("outline.toml");
            fs::write(&path, "[menu]\nheading_levels = 3\npalette = [\"red\"]\n").expect("write");
            let cfg = OutlinerConfig::load(Some(&path)).expect("load");
            assert_eq!(cfg.menu.heading_levels, 3);
            assert_eq!(cfg.menu.palette, vec!["red".to_string()]);
        }
    }
}

pub mod repeater {
    //! Encoding of scheduling timestamps.
    //!
    //! Text form consumed by the agenda engine:
    //! `<YYYY-MM-DD Www[ HH:MM][ KIND NUM UNIT]>`, e.g. `<2024-03-05 Tue 09:30 .+2d>`.
    //! The repeater kind is never taken from user input: it is derived from the unit
    //! when the timestamp is finalized.

    use crate::config::JournalTitleFormat;
    use crate::core::*;
    use anyhow::{Result, anyhow};
    use chrono::{Datelike, NaiveDate, NaiveTime};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while_m_n},
        character::complete::{alpha1, char, digit1, one_of, space0, space1},
        combinator::{map_res, opt, value, verify},
        error::VerboseError,
        sequence::{preceded, separated_pair, tuple},
    };

    pub const TIME_FORMAT: &str = "%H:%M";

    /* ----------------------------- Derivation ----------------------------- */

    /// Weekly repeats shift to the next future occurrence (`++`); every other unit
    /// repeats relative to the original date (`.+`).
    pub fn derive_kind(unit: DurationUnit) -> RepeaterKind {
        match unit {
            DurationUnit::Week => RepeaterKind::FromBase,
            _ => RepeaterKind::FromNow,
        }
    }

    /// Build a repeater from possibly-partial input. Missing or zero `num`, or a
    /// missing unit, yields no repeater at all.
    pub fn complete_repeater(num: Option<u32>, unit: Option<DurationUnit>) -> Option<Repeater> {
        match (num, unit) {
            (Some(num), Some(unit)) if num > 0 => Some(Repeater {
                num,
                unit,
                kind: derive_kind(unit),
            }),
            _ => None,
        }
    }

    /// Parse a compact interval such as `2d` or `1w` into its count and unit.
    pub fn parse_interval(text: &str) -> Result<(u32, DurationUnit), DomainError> {
        let text = text.trim();
        let split = text
            .char_indices()
            .last()
            .map(|(idx, _)| idx)
            .ok_or_else(|| DomainError::UnknownDurationUnit(text.to_string()))?;
        let (num, unit) = text.split_at(split);
        let unit = unit.parse::<DurationUnit>()?;
        let num = num
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| DomainError::InvalidTimestamp(format!("bad repeat count in {text:?}")))?;
        Ok((num, unit))
    }

    pub fn format_time(time: NaiveTime) -> String {
        time.format(TIME_FORMAT).to_string()
    }

    /// Blank or malformed input means "no time".
    pub fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        NaiveTime::parse_from_str(text, TIME_FORMAT).ok()
    }

    /* ---------------------------- Serialization ---------------------------- */

    pub fn serialize(ts: &Timestamp) -> String {
        let mut buf = String::from("<");
        buf.push_str(&ts.date.format("%Y-%m-%d %a").to_string());
        if let Some(time) = ts.time {
            buf.push(' ');
            buf.push_str(&format_time(time));
        }
        if let Some(repeater) = &ts.repeater {
            buf.push(' ');
            buf.push_str(&repeater.to_string());
        }
        buf.push('>');
        buf
    }

    /* ------------------------------- Parsing ------------------------------- */

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// Parse an active (`<...>`) or inactive (`[...]`) timestamp.
    pub fn parse_timestamp(input: &str) -> Result<Timestamp> {
        match timestamp(input.trim()) {
            Ok(("", ts)) => Ok(ts),
            Ok((rest, _)) => Err(anyhow!(DomainError::InvalidTimestamp(format!(
                "trailing input {:?}",
                rest
            )))),
            Err(nom::Err::Error(ve)) | Err(nom::Err::Failure(ve)) => {
                let at = ve
                    .errors
                    .first()
                    .map(|(frag, kind)| format!("at {:?}: {:?}", frag, kind))
                    .unwrap_or_default();
                Err(anyhow!(DomainError::InvalidTimestamp(at)))
            }
            Err(nom::Err::Incomplete(_)) => Err(anyhow!(DomainError::InvalidTimestamp(
                "incomplete input".into()
            ))),
        }
    }

    fn timestamp(i: &str) -> PResult<'_, Timestamp> {
        let (i, open) = alt((char('<'), char('[')))(i)?;
        let (i, date) = date(i)?;
        // Day-of-week is redundant with the date; accepted and ignored.
        let (i, _) = opt(preceded(space1, alpha1))(i)?;
        let (i, time) = opt(preceded(space1, time_of_day))(i)?;
        let (i, repeater) = opt(preceded(space1, repeater))(i)?;
        let (i, _) = space0(i)?;
        let (i, _) = char(if open == '<' { '>' } else { ']' })(i)?;
        Ok((
            i,
            Timestamp {
                date,
                time,
                repeater,
            },
        ))
    }

    fn date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((
                take_while_m_n(4, 4, is_digit),
                char('-'),
                take_while_m_n(2, 2, is_digit),
                char('-'),
                take_while_m_n(2, 2, is_digit),
            )),
            |(y, _, m, _, d): (&str, char, &str, char, &str)| {
                let y = y.parse::<i32>().map_err(|_| "year")?;
                let m = m.parse::<u32>().map_err(|_| "month")?;
                let d = d.parse::<u32>().map_err(|_| "day")?;
                NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid date")
            },
        )(i)
    }

    fn time_of_day(i: &str) -> PResult<'_, NaiveTime> {
        map_res(
            separated_pair(
                take_while_m_n(1, 2, is_digit),
                char(':'),
                take_while_m_n(2, 2, is_digit),
            ),
            |(h, m): (&str, &str)| {
                let h = h.parse::<u32>().map_err(|_| "hour")?;
                let m = m.parse::<u32>().map_err(|_| "minute")?;
                NaiveTime::from_hms_opt(h, m, 0).ok_or("invalid time")
            },
        )(i)
    }

    fn repeater(i: &str) -> PResult<'_, Repeater> {
        let (i, kind) = alt((
            value(RepeaterKind::FromBase, tag("++")),
            value(RepeaterKind::FromNow, tag(".+")),
            value(RepeaterKind::FromLast, tag("+")),
        ))(i)?;
        let (i, num) = verify(map_res(digit1, |s: &str| s.parse::<u32>()), |n: &u32| {
            *n > 0
        })(i)?;
        let (i, unit) = map_res(one_of("hdwmy"), |c: char| {
            DurationUnit::from_letter(c).ok_or("unit")
        })(i)?;
        Ok((i, Repeater { num, unit, kind }))
    }

    fn is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    /* --------------------------- Marker lines --------------------------- */

    /// `SCHEDULED: <...>` / `DEADLINE: <...>` line for `kind`.
    pub fn marker_line(kind: CommandKind, text: &str) -> String {
        format!("{}: {}", kind.marker(), text)
    }

    /// Timestamp stored under `kind` in block content, if any.
    pub fn find_marker(content: &str, kind: CommandKind) -> Option<Timestamp> {
        let prefix = format!("{}:", kind.marker());
        content
            .lines()
            .filter_map(|line| line.trim_start().strip_prefix(prefix.as_str()))
            .find_map(|rest| parse_timestamp(rest).ok())
    }

    /// Replace (or append) the `kind` marker line in `content`.
    pub fn rewrite_marker(content: &str, kind: CommandKind, text: &str) -> String {
        let prefix = format!("{}:", kind.marker());
        let marker = marker_line(kind, text);
        let mut lines: Vec<&str> = content
            .lines()
            .filter(|line| !line.trim_start().starts_with(prefix.as_str()))
            .collect();
        lines.push(&marker);
        lines.join("\n")
    }

    /* ---------------------------- Journal pages ---------------------------- */

    /// Name of the journal page for `date`.
    pub fn journal_title(date: NaiveDate, format: JournalTitleFormat) -> String {
        match format {
            JournalTitleFormat::MonthOrdinalYear => format!(
                "{} {}, {}",
                date.format("%b"),
                ordinal(date.day()),
                date.year()
            ),
            JournalTitleFormat::IsoDate => date.format("%Y-%m-%d").to_string(),
            JournalTitleFormat::Underscored => date.format("%Y_%m_%d").to_string(),
            JournalTitleFormat::WeekdayMonthOrdinalYear => format!(
                "{}, {} {}, {}",
                date.format("%A"),
                date.format("%b"),
                ordinal(date.day()),
                date.year()
            ),
        }
    }

    fn ordinal(day: u32) -> String {
        let suffix = match (day % 10, day % 100) {
            (_, 11..=13) => "th",
            (1, _) => "st",
            (2, _) => "nd",
            (3, _) => "rd",
            _ => "th",
        };
        format!("{day}{suffix}")
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).unwrap()
        }

        #[test]
        fn only_weekly_repeats_are_hard() {
            for unit in DurationUnit::ALL {
                let expected = if unit == DurationUnit::Week {
                    RepeaterKind::FromBase
                } else {
                    RepeaterKind::FromNow
                };
                assert_eq!(derive_kind(unit), expected, "unit {unit}");
            }
        }

        #[test]
        fn partial_repeaters_are_dropped() {
            assert_eq!(complete_repeater(Some(2), None), None);
            assert_eq!(complete_repeater(None, Some(DurationUnit::Day)), None);
            assert_eq!(complete_repeater(Some(0), Some(DurationUnit::Day)), None);
            assert_eq!(
                complete_repeater(Some(3), Some(DurationUnit::Week)),
                Some(Repeater {
                    num: 3,
                    unit: DurationUnit::Week,
                    kind: RepeaterKind::FromBase,
                })
            );
        }

        #[test]
        fn serializes_fields_in_fixed_order() {
            let mut ts = Timestamp::on(ymd(2024, 3, 5));
            assert_eq!(serialize(&ts), "<2024-03-05 Tue>");

            ts.time = NaiveTime::from_hms_opt(9, 30, 0);
            ts.repeater = complete_repeater(Some(2), Some(DurationUnit::Day));
            assert_eq!(serialize(&ts), "<2024-03-05 Tue 09:30 .+2d>");

            ts.repeater = complete_repeater(Some(2), Some(DurationUnit::Week));
            assert_eq!(serialize(&ts), "<2024-03-05 Tue 09:30 ++2w>");
        }

        #[test]
        fn serialized_timestamps_parse_back() {
            let ts = Timestamp {
                date: ymd(2024, 3, 5),
                time: NaiveTime::from_hms_opt(9, 30, 0),
                repeater: Some(Repeater {
                    num: 2,
                    unit: DurationUnit::Day,
                    kind: RepeaterKind::FromNow,
                }),
            };
            let parsed = parse_timestamp(&serialize(&ts)).expect("parse");
            assert_eq!(parsed, ts);
        }

        #[test]
        fn parses_foreign_forms() {
            let ts = parse_timestamp("[2025-11-15]").expect("inactive");
            assert_eq!(ts, Timestamp::on(ymd(2025, 11, 15)));

            let ts = parse_timestamp("<2025-01-02 Thu +1m>").expect("plain plus");
            let r = ts.repeater.expect("repeater");
            assert_eq!(r.kind, RepeaterKind::FromLast);
            assert_eq!(r.unit, DurationUnit::Month);

            let ts = parse_timestamp("<2025-01-02 8:05>").expect("no weekday");
            assert_eq!(ts.time, NaiveTime::from_hms_opt(8, 5, 0));
        }

        #[test]
        fn rejects_malformed_timestamps() {
            assert!(parse_timestamp("2024-03-05").is_err());
            assert!(parse_timestamp("<2024-13-05>").is_err());
            assert!(parse_timestamp("<2024-03-05 .+0d>").is_err());
            assert!(parse_timestamp("<2024-03-05]").is_err());
            assert!(parse_timestamp("<2024-03-05> extra").is_err());
        }

        #[test]
        fn interval_parsing() {
            assert_eq!(parse_interval("2d").unwrap(), (2, DurationUnit::Day));
            assert_eq!(parse_interval(" 10w ").unwrap(), (10, DurationUnit::Week));
            assert!(parse_interval("d").is_err());
            assert!(parse_interval("0y").is_err());
            assert!(parse_interval("3x").is_err());
            assert!(parse_interval("").is_err());
        }

        #[test]
        fn time_input_is_lenient() {
            assert_eq!(parse_time_of_day(" "), None);
            assert_eq!(parse_time_of_day("25:00"), None);
            assert_eq!(parse_time_of_day("07:45"), NaiveTime::from_hms_opt(7, 45, 0));
        }

        #[test]
        fn marker_lines_are_replaced_not_duplicated() {
            let content = "Pay rent\nSCHEDULED: <2024-03-01 Fri>";
            let out = rewrite_marker(content, CommandKind::Scheduled, "<2024-04-01 Mon .+1m>");
            assert_eq!(out, "Pay rent\nSCHEDULED: <2024-04-01 Mon .+1m>");

            let out = rewrite_marker(&out, CommandKind::Deadline, "<2024-04-05 Fri>");
            assert_eq!(
                out,
                "Pay rent\nSCHEDULED: <2024-04-01 Mon .+1m>\nDEADLINE: <2024-04-05 Fri>"
            );
            let found = find_marker(&out, CommandKind::Scheduled).expect("scheduled");
            assert_eq!(found.date, ymd(2024, 4, 1));
            assert_eq!(find_marker("nothing", CommandKind::Deadline), None);
        }

        #[test]
        fn journal_titles() {
            let d = ymd(2024, 3, 5);
            assert_eq!(journal_title(d, JournalTitleFormat::MonthOrdinalYear), "Mar 5th, 2024");
            assert_eq!(journal_title(d, JournalTitleFormat::IsoDate), "2024-03-05");
            assert_eq!(journal_title(d, JournalTitleFormat::Underscored), "2024_03_05");
            assert_eq!(
                journal_title(d, JournalTitleFormat::WeekdayMonthOrdinalYear),
                "Tuesday, Mar 5th, 2024"
            );
            assert_eq!(ordinal(1), "1st");
            assert_eq!(ordinal(12), "12th");
            assert_eq!(ordinal(22), "22nd");
            assert_eq!(ordinal(23), "23rd");
        }
    }
}

pub mod services {
    //! Contracts of the collaborators this crate drives but does not own: the editor
    //! operations service, block lookup, the template index and the page menu.
    //!
    //! Every mutation is expressed as an [`EditorCommand`] value so menus can carry
    //! their actions as plain data.

    use crate::core::*;
    use crate::menu::MenuItem;
    use crate::repeater;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum NoticeLevel {
        Info,
        Warning,
        Error,
    }

    /// What kind of entity a sidebar entry was opened for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum SidebarKind {
        Block,
        BlockRef,
    }

    /// A request to the editor operations service. Commands carrying a block list
    /// must be no-ops when the list is empty.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "op", rename_all = "kebab-case")]
    pub enum EditorCommand {
        SetProperty {
            blocks: Vec<BlockId>,
            key: String,
            value: PropertyValue,
        },
        RemoveProperty {
            blocks: Vec<BlockId>,
            key: String,
        },
        SetHeading {
            blocks: Vec<BlockId>,
            heading: HeadingChoice,
        },
        RemoveHeading {
            blocks: Vec<BlockId>,
        },
        Cut {
            blocks: Vec<BlockId>,
        },
        Copy {
            blocks: Vec<BlockId>,
        },
        Delete {
            blocks: Vec<BlockId>,
        },
        /// Open the export dialog for the blocks.
        CopyAs {
            blocks: Vec<BlockId>,
        },
        CopyBlockRefs {
            blocks: Vec<BlockId>,
        },
        CopyBlockEmbeds {
            blocks: Vec<BlockId>,
        },
        CopyBlockUrl {
            block: BlockId,
        },
        CycleTodos {
            blocks: Vec<BlockId>,
        },
        ExpandAll {
            blocks: Vec<BlockId>,
        },
        CollapseAll {
            blocks: Vec<BlockId>,
        },
        MakeCards {
            blocks: Vec<BlockId>,
        },
        PreviewCard {
            block: BlockId,
        },
        OpenInSidebar {
            block: BlockId,
            kind: SidebarKind,
        },
        CopyRef {
            block_ref: BlockId,
        },
        DeleteRef {
            owner: BlockId,
            block_ref: BlockId,
        },
        ReplaceRefWithText {
            owner: BlockId,
            block_ref: BlockId,
        },
        ReplaceRefWithEmbed {
            owner: BlockId,
            block_ref: BlockId,
        },
        OpenPageInSidebar {
            page: String,
        },
        ToggleFavorite {
            page: String,
        },
        CopyPageRef {
            page: String,
        },
        ShowBlockData {
            block: BlockId,
        },
        ShowBlockAst {
            block: BlockId,
        },
        /// Rewrite the scheduling marker inside the live edit buffer.
        SetEditingTimestamp {
            kind: CommandKind,
            text: String,
        },
        /// Rewrite the scheduling marker of a stored block.
        SetBlockTimestamp {
            block: BlockId,
            kind: CommandKind,
            text: String,
        },
        /// Insert `[[page]]` at the edit cursor.
        InsertPageRef {
            page: String,
        },
        /// Leave text editing, saving the buffer.
        ClearEdit,
        HideMenu,
        Notify {
            level: NoticeLevel,
            message: String,
        },
    }

    impl EditorCommand {
        /// Block list of the batch commands.
        pub fn blocks(&self) -> Option<&[BlockId]> {
            use EditorCommand::*;
            match self {
                SetProperty { blocks, .. }
                | RemoveProperty { blocks, .. }
                | SetHeading { blocks, .. }
                | RemoveHeading { blocks }
                | Cut { blocks }
                | Copy { blocks }
                | Delete { blocks }
                | CopyAs { blocks }
                | CopyBlockRefs { blocks }
                | CopyBlockEmbeds { blocks }
                | CycleTodos { blocks }
                | ExpandAll { blocks }
                | CollapseAll { blocks }
                | MakeCards { blocks } => Some(blocks.as_slice()),
                _ => None,
            }
        }
    }

    pub trait EditorOps {
        fn apply(&mut self, command: EditorCommand);
    }

    /// Recording sink, handy for callers that batch or inspect commands.
    impl EditorOps for Vec<EditorCommand> {
        fn apply(&mut self, command: EditorCommand) {
            self.push(command);
        }
    }

    /// Read access to the block graph and the editor's focus.
    pub trait BlockLookup {
        fn block(&self, id: BlockId) -> Option<&Block>;

        /// Block whose text is currently being edited, if any.
        fn editing_block(&self) -> Option<BlockId>;

        fn block_exists(&self, id: BlockId) -> bool {
            self.block(id).is_some()
        }

        fn has_children(&self, id: BlockId) -> bool {
            self.block(id).is_some_and(|b| !b.children.is_empty())
        }

        fn is_card(&self, id: BlockId) -> bool {
            self.block(id).is_some_and(Block::is_card)
        }

        fn property(&self, id: BlockId, key: &str) -> Option<&PropertyValue> {
            self.block(id).and_then(|b| b.property(key))
        }

        /// Current text of a block. Implementors with an edit buffer answer from
        /// it for the block under editing.
        fn live_content(&self, id: BlockId) -> Option<&str> {
            self.block(id).map(|b| b.content.as_str())
        }

        /// Scheduling marker of the given kind already written in the block.
        fn scheduled(&self, id: BlockId, kind: CommandKind) -> Option<Timestamp> {
            self.live_content(id)
                .and_then(|text| repeater::find_marker(text, kind))
        }
    }

    pub trait TemplateIndex {
        fn template_exists(&self, name: &str) -> bool;
    }

    /// One titled group of the page-title menu.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct PageMenuGroup {
        pub title: String,
        pub items: Vec<MenuItem>,
    }

    pub trait PageMenuProvider {
        fn page_menu(&self, page: &str) -> Vec<PageMenuGroup>;
    }

    /// Everything the outliner needs from its host.
    pub trait Services: EditorOps + BlockLookup + TemplateIndex + PageMenuProvider {}

    impl<T> Services for T where T: EditorOps + BlockLookup + TemplateIndex + PageMenuProvider {}
}

pub mod session {
    //! The timestamp edit store: one session at a time, owned by [`TimestampEditor`].

    use crate::core::*;
    use crate::repeater::{self, complete_repeater, format_time};
    use chrono::{NaiveDate, NaiveTime};
    use serde::Serialize;
    use std::{cell::Cell, fmt, rc::Rc};
    use tracing::debug;

    /// Block a session writes to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(tag = "type", content = "block", rename_all = "kebab-case")]
    pub enum SessionTarget {
        Block(BlockId),
        /// Whatever block is being edited when the session commits.
        EditingBlock,
    }

    /// Visibility handle of the popover hosting the picker. Clones share the flag.
    #[derive(Debug, Clone, Default)]
    pub struct Popover(Rc<Cell<bool>>);

    impl Popover {
        pub fn shown() -> Self {
            Self(Rc::new(Cell::new(true)))
        }

        pub fn is_open(&self) -> bool {
            self.0.get()
        }

        pub fn close(&self) {
            self.0.set(false);
        }
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
    pub struct RepeaterDraft {
        pub num: Option<u32>,
        pub unit: Option<DurationUnit>,
        pub kind: Option<RepeaterKind>,
    }

    impl RepeaterDraft {
        /// Seed used by "Add repeater": every day, from now.
        pub fn seeded() -> Self {
            Self {
                num: Some(1),
                unit: Some(DurationUnit::Day),
                kind: Some(RepeaterKind::FromNow),
            }
        }

        pub fn is_complete(&self) -> bool {
            self.num.is_some() && self.unit.is_some() && self.kind.is_some()
        }
    }

    impl From<Repeater> for RepeaterDraft {
        fn from(r: Repeater) -> Self {
            Self {
                num: Some(r.num),
                unit: Some(r.unit),
                kind: Some(r.kind),
            }
        }
    }

    /// Uncommitted time and repeater input. The time stays as typed text.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct TimestampDraft {
        pub time: String,
        pub repeater: RepeaterDraft,
    }

    #[derive(Debug, Clone)]
    pub struct EditSession {
        target: SessionTarget,
        kind: Option<CommandKind>,
        date: NaiveDate,
        draft: TimestampDraft,
        show_time: bool,
        show_repeater: bool,
        popover: Option<Popover>,
    }

    impl EditSession {
        pub fn target(&self) -> SessionTarget {
            self.target
        }

        pub fn kind(&self) -> Option<CommandKind> {
            self.kind
        }

        pub fn date(&self) -> NaiveDate {
            self.date
        }

        pub fn draft(&self) -> &TimestampDraft {
            &self.draft
        }

        pub fn show_time(&self) -> bool {
            self.show_time
        }

        pub fn show_repeater(&self) -> bool {
            self.show_repeater
        }

        pub fn popover(&self) -> Option<&Popover> {
            self.popover.as_ref()
        }

        /// Committed value: blank or malformed time becomes no time, a partial
        /// repeater becomes no repeater and the repeater kind is re-derived.
        pub fn finalize(&self) -> Timestamp {
            let r = self.draft.repeater;
            Timestamp {
                date: self.date,
                time: repeater::parse_time_of_day(&self.draft.time),
                repeater: complete_repeater(r.num, r.unit),
            }
        }

        /// Non-blank time text that does not read as `HH:MM`.
        pub fn unreadable_time(&self) -> Option<&str> {
            let time = self.draft.time.trim();
            (!time.is_empty() && repeater::parse_time_of_day(time).is_none()).then_some(time)
        }

        pub(crate) fn release_popover(&mut self) {
            if let Some(p) = self.popover.take() {
                p.close();
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SessionEvent {
        Opened,
        Updated,
        Committed { text: String },
        Cancelled,
        Reset,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SubscriptionId(u64);

    /* ------------------------------- View ------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum TimeField {
        AddLink,
        Input { text: String },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum RepeaterField {
        AddLink,
        Input {
            num: Option<u32>,
            unit: Option<DurationUnit>,
        },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct TimeRepeaterPanel {
        pub time: TimeField,
        pub repeater: RepeaterField,
    }

    /// What the date picker shows for the current session.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct PickerView {
        pub date: NaiveDate,
        /// Only present for deadline/scheduled sessions.
        pub panel: Option<TimeRepeaterPanel>,
    }

    /* ----------------------------- Controller ----------------------------- */

    type Listener = Box<dyn FnMut(&SessionEvent)>;

    #[derive(Default)]
    pub struct TimestampEditor {
        session: Option<EditSession>,
        listeners: Vec<(SubscriptionId, Listener)>,
        next_id: u64,
    }

    impl fmt::Debug for TimestampEditor {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("TimestampEditor")
                .field("session", &self.session)
                .field("listeners", &self.listeners.len())
                .finish()
        }
    }

    impl TimestampEditor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn session(&self) -> Option<&EditSession> {
            self.session.as_ref()
        }

        pub fn is_open(&self) -> bool {
            self.session.is_some()
        }

        /// Start a session, discarding any open one first.
        pub fn open(
            &mut self,
            target: SessionTarget,
            kind: Option<CommandKind>,
            existing: Option<Timestamp>,
            today: NaiveDate,
            popover: Option<Popover>,
        ) {
            if self.session.take().is_some() {
                self.notify(&SessionEvent::Reset);
            }
            let (date, draft) = match existing {
                Some(ts) => (
                    ts.date,
                    TimestampDraft {
                        time: ts.time.map(format_time).unwrap_or_default(),
                        repeater: ts.repeater.map(RepeaterDraft::from).unwrap_or_default(),
                    },
                ),
                None => (today, TimestampDraft::default()),
            };
            debug!(?target, ?kind, %date, "timestamp session opened");
            self.session = Some(EditSession {
                target,
                kind,
                date,
                show_time: !draft.time.trim().is_empty(),
                show_repeater: draft.repeater.is_complete(),
                draft,
                popover,
            });
            self.notify(&SessionEvent::Opened);
        }

        /// Show the time input, seeded with `now`.
        pub fn add_time(&mut self, now: NaiveTime) {
            self.update(|s| {
                s.show_time = true;
                s.draft.time = format_time(now);
            });
        }

        pub fn set_time(&mut self, text: &str) {
            self.update(|s| s.draft.time = text.to_string());
        }

        pub fn clear_time(&mut self) {
            self.update(|s| {
                s.show_time = false;
                s.draft.time.clear();
            });
        }

        pub fn add_repeater(&mut self) {
            self.update(|s| {
                s.show_repeater = true;
                s.draft.repeater = RepeaterDraft::seeded();
            });
        }

        /// Non-numeric or zero input leaves the count unset.
        pub fn set_repeater_num(&mut self, text: &str) {
            let num = text.trim().parse::<u32>().ok().filter(|n| *n > 0);
            self.update(|s| s.draft.repeater.num = num);
        }

        pub fn set_repeater_unit(&mut self, unit: DurationUnit) {
            self.update(|s| s.draft.repeater.unit = Some(unit));
        }

        pub fn clear_repeater(&mut self) {
            self.update(|s| {
                s.show_repeater = false;
                s.draft.repeater = RepeaterDraft::default();
            });
        }

        pub fn set_date(&mut self, date: NaiveDate) {
            self.update(|s| s.date = date);
        }

        /// Drop the session without writing anything.
        pub fn cancel(&mut self) {
            if let Some(mut s) = self.session.take() {
                s.release_popover();
                debug!("timestamp session cancelled");
                self.notify(&SessionEvent::Cancelled);
            }
        }

        pub fn view(&self, effective_kind: Option<CommandKind>) -> Option<PickerView> {
            let s = self.session.as_ref()?;
            let panel = effective_kind.map(|_| {
                let time = if s.show_time || !s.draft.time.trim().is_empty() {
                    TimeField::Input {
                        text: s.draft.time.clone(),
                    }
                } else {
                    TimeField::AddLink
                };
                let r = s.draft.repeater;
                let repeater = if s.show_repeater || r.is_complete() {
                    RepeaterField::Input {
                        num: r.num,
                        unit: r.unit,
                    }
                } else {
                    RepeaterField::AddLink
                };
                TimeRepeaterPanel { time, repeater }
            });
            Some(PickerView {
                date: s.date,
                panel,
            })
        }

        pub fn subscribe(&mut self, listener: impl FnMut(&SessionEvent) + 'static) -> SubscriptionId {
            let id = SubscriptionId(self.next_id);
            self.next_id += 1;
            self.listeners.push((id, Box::new(listener)));
            id
        }

        pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
            let before = self.listeners.len();
            self.listeners.retain(|(sid, _)| *sid != id);
            self.listeners.len() != before
        }

        pub(crate) fn take_session(&mut self) -> Option<EditSession> {
            self.session.take()
        }

        pub(crate) fn notify(&mut self, event: &SessionEvent) {
            for (_, listener) in self.listeners.iter_mut() {
                listener(event);
            }
        }

        fn update(&mut self, f: impl FnOnce(&mut EditSession)) {
            match self.session.as_mut() {
                Some(s) => {
                    f(s);
                    self.notify(&SessionEvent::Updated);
                }
                None => debug!("no timestamp session open; edit ignored"),
            }
        }
    }

}

pub mod submit {
    //! Committing a timestamp session to a block, and the calendar-only path that
    //! inserts a journal page reference instead.

    use crate::config::JournalTitleFormat;
    use crate::core::*;
    use crate::repeater::{self, journal_title};
    use crate::services::{EditorCommand, EditorOps, NoticeLevel};
    use crate::session::{SessionEvent, SessionTarget, TimestampEditor};
    use chrono::NaiveDate;
    use serde::Serialize;
    use tracing::{debug, info, warn};

    /// Editor state read at commit time.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SubmitContext {
        /// Block whose text is being edited, if any.
        pub editing_block: Option<BlockId>,
        /// Name of the slash command that opened the picker, if any.
        pub current_command: Option<String>,
    }

    impl SubmitContext {
        pub fn command_kind(&self) -> Option<CommandKind> {
            self.current_command
                .as_deref()
                .and_then(CommandKind::from_command)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum CommitPath {
        /// Written into the live edit buffer.
        EditBuffer,
        StoredBlock,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum SkipReason {
        NotOpen,
        NoTargetBlock,
        NoCommandKind,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "outcome", rename_all = "kebab-case")]
    pub enum CommitOutcome {
        Committed {
            block: BlockId,
            kind: CommandKind,
            text: String,
            path: CommitPath,
        },
        Skipped { reason: SkipReason },
    }

    /// Finalize the open session and hand the encoded text to `ops`.
    ///
    /// The session is reset and its popover closed whether or not anything was
    /// written.
    pub fn submit(
        editor: &mut TimestampEditor,
        ctx: &SubmitContext,
        ops: &mut dyn EditorOps,
    ) -> CommitOutcome {
        let Some(mut session) = editor.take_session() else {
            debug!("submit without an open timestamp session");
            return CommitOutcome::Skipped {
                reason: SkipReason::NotOpen,
            };
        };
        session.release_popover();

        let text = repeater::serialize(&session.finalize());
        let target = match session.target() {
            SessionTarget::Block(id) => Some(id),
            SessionTarget::EditingBlock => ctx.editing_block,
        };
        let kind = ctx.command_kind().or(session.kind());

        let outcome = match (target, kind) {
            (None, _) => {
                warn!(%text, "timestamp not written: no target block");
                CommitOutcome::Skipped {
                    reason: SkipReason::NoTargetBlock,
                }
            }
            (Some(block), None) => {
                warn!(%block, %text, "timestamp not written: no scheduling command");
                CommitOutcome::Skipped {
                    reason: SkipReason::NoCommandKind,
                }
            }
            (Some(block), Some(kind)) => {
                let path = if ctx.editing_block == Some(block) {
                    ops.apply(EditorCommand::SetEditingTimestamp {
                        kind,
                        text: text.clone(),
                    });
                    CommitPath::EditBuffer
                } else {
                    ops.apply(EditorCommand::SetBlockTimestamp {
                        block,
                        kind,
                        text: text.clone(),
                    });
                    CommitPath::StoredBlock
                };
                if let Some(time) = session.unreadable_time() {
                    warn!(%block, time, "unreadable time left out of timestamp");
                    ops.apply(EditorCommand::Notify {
                        level: NoticeLevel::Warning,
                        message: format!("time {time:?} is not HH:MM and was left out"),
                    });
                }
                info!(%block, %kind, %text, ?path, "timestamp committed");
                CommitOutcome::Committed {
                    block,
                    kind,
                    text,
                    path,
                }
            }
        };

        let event = match &outcome {
            CommitOutcome::Committed { text, .. } => SessionEvent::Committed { text: text.clone() },
            CommitOutcome::Skipped { .. } => SessionEvent::Reset,
        };
        editor.notify(&event);
        outcome
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "pick", content = "value", rename_all = "kebab-case")]
    pub enum DatePick {
        /// Date recorded in the session, waiting for submit.
        Stored(NaiveDate),
        /// Journal page reference inserted at the cursor.
        PageRef(String),
        NotOpen,
    }

    /// A date was chosen in the calendar.
    pub fn pick_date(
        editor: &mut TimestampEditor,
        date: NaiveDate,
        ctx: &mut SubmitContext,
        format: JournalTitleFormat,
        ops: &mut dyn EditorOps,
    ) -> DatePick {
        let Some(session) = editor.session() else {
            return DatePick::NotOpen;
        };
        if ctx.command_kind().or(session.kind()).is_some() {
            editor.set_date(date);
            return DatePick::Stored(date);
        }

        let page = journal_title(date, format);
        ops.apply(EditorCommand::InsertPageRef { page: page.clone() });
        editor.cancel();
        ctx.current_command = None;
        debug!(%page, "journal reference inserted");
        DatePick::PageRef(page)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::session::Popover;
        use std::{cell::RefCell, rc::Rc};

        fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).unwrap()
        }

        #[test]
        fn commits_into_edit_buffer_when_target_is_being_edited() {
            let block = BlockId::new();
            let mut ed = TimestampEditor::new();
            let popover = Popover::shown();
            ed.open(
                SessionTarget::EditingBlock,
                None,
                None,
                ymd(2024, 3, 5),
                Some(popover.clone()),
            );
            ed.set_time("09:30");
            ed.add_repeater();
            ed.set_repeater_num("2");

            let ctx = SubmitContext {
                editing_block: Some(block),
                current_command: Some("Scheduled".into()),
            };
            let mut ops: Vec<EditorCommand> = vec![];
            let outcome = submit(&mut ed, &ctx, &mut ops);

            let text = "<2024-03-05 Tue 09:30 .+2d>".to_string();
            assert_eq!(
                outcome,
                CommitOutcome::Committed {
                    block,
                    kind: CommandKind::Scheduled,
                    text: text.clone(),
                    path: CommitPath::EditBuffer,
                }
            );
            assert_eq!(
                ops,
                vec![EditorCommand::SetEditingTimestamp {
                    kind: CommandKind::Scheduled,
                    text
                }]
            );
            assert!(!popover.is_open());
            assert!(!ed.is_open());
        }

        #[test]
        fn commits_to_stored_block_with_session_kind() {
            let block = BlockId::new();
            let mut ed = TimestampEditor::new();
            ed.open(
                SessionTarget::Block(block),
                Some(CommandKind::Deadline),
                None,
                ymd(2024, 3, 5),
                None,
            );
            ed.add_repeater();
            ed.set_repeater_unit(DurationUnit::Week);

            let ctx = SubmitContext {
                editing_block: Some(BlockId::new()),
                current_command: None,
            };
            let mut ops: Vec<EditorCommand> = vec![];
            submit(&mut ed, &ctx, &mut ops);
            assert_eq!(
                ops,
                vec![EditorCommand::SetBlockTimestamp {
                    block,
                    kind: CommandKind::Deadline,
                    text: "<2024-03-05 Tue ++1w>".into(),
                }]
            );
        }

        #[test]
        fn unreadable_time_is_dropped_with_a_warning() {
            let block = BlockId::new();
            let mut ed = TimestampEditor::new();
            ed.open(
                SessionTarget::Block(block),
                Some(CommandKind::Scheduled),
                None,
                ymd(2024, 3, 5),
                None,
            );
            ed.set_time("9.30");

            let mut ops: Vec<EditorCommand> = vec![];
            let outcome = submit(&mut ed, &SubmitContext::default(), &mut ops);
            assert!(matches!(
                outcome,
                CommitOutcome::Committed { ref text, .. } if text == "<2024-03-05 Tue>"
            ));
            assert_eq!(ops.len(), 2);
            assert!(matches!(
                &ops[1],
                EditorCommand::Notify { level: NoticeLevel::Warning, message } if message.contains("9.30")
            ));
        }

        #[test]
        fn skipped_commits_still_reset() {
            let events = Rc::new(RefCell::new(Vec::new()));
            let sink = events.clone();
            let mut ed = TimestampEditor::new();
            ed.subscribe(move |e| sink.borrow_mut().push(e.clone()));
            let mut ops: Vec<EditorCommand> = vec![];

            let outcome = submit(&mut ed, &SubmitContext::default(), &mut ops);
            assert_eq!(
                outcome,
                CommitOutcome::Skipped {
                    reason: SkipReason::NotOpen
                }
            );

            ed.open(
                SessionTarget::EditingBlock,
                Some(CommandKind::Scheduled),
                None,
                ymd(2024, 3, 5),
                None,
            );
            let outcome = submit(&mut ed, &SubmitContext::default(), &mut ops);
            assert_eq!(
                outcome,
                CommitOutcome::Skipped {
                    reason: SkipReason::NoTargetBlock
                }
            );

            ed.open(
                SessionTarget::Block(BlockId::new()),
                None,
                None,
                ymd(2024, 3, 5),
                None,
            );
            let outcome = submit(&mut ed, &SubmitContext::default(), &mut ops);
            assert_eq!(
                outcome,
                CommitOutcome::Skipped {
                    reason: SkipReason::NoCommandKind
                }
            );

            assert!(ops.is_empty());
            assert!(!ed.is_open());
            assert_eq!(
                *events.borrow(),
                vec![
                    SessionEvent::Opened,
                    SessionEvent::Reset,
                    SessionEvent::Opened,
                    SessionEvent::Reset,
                ]
            );
        }

        #[test]
        fn calendar_only_pick_inserts_journal_reference() {
            let mut ed = TimestampEditor::new();
            ed.open(SessionTarget::EditingBlock, None, None, ymd(2024, 3, 1), None);
            let mut ctx = SubmitContext {
                editing_block: Some(BlockId::new()),
                current_command: Some("Date picker".into()),
            };
            let mut ops: Vec<EditorCommand> = vec![];
            let pick = pick_date(
                &mut ed,
                ymd(2024, 3, 5),
                &mut ctx,
                JournalTitleFormat::MonthOrdinalYear,
                &mut ops,
            );
            assert_eq!(pick, DatePick::PageRef("Mar 5th, 2024".into()));
            assert_eq!(
                ops,
                vec![EditorCommand::InsertPageRef {
                    page: "Mar 5th, 2024".into()
                }]
            );
            assert_eq!(ctx.current_command, None);
            assert!(!ed.is_open());
        }

        #[test]
        fn scheduling_pick_stores_date() {
            let mut ed = TimestampEditor::new();
            ed.open(SessionTarget::EditingBlock, None, None, ymd(2024, 3, 1), None);
            let mut ctx = SubmitContext {
                editing_block: None,
                current_command: Some("deadline".into()),
            };
            let mut ops: Vec<EditorCommand> = vec![];
            let pick = pick_date(
                &mut ed,
                ymd(2024, 3, 9),
                &mut ctx,
                JournalTitleFormat::IsoDate,
                &mut ops,
            );
            assert_eq!(pick, DatePick::Stored(ymd(2024, 3, 9)));
            assert!(ops.is_empty());
            assert_eq!(ed.session().unwrap().date(), ymd(2024, 3, 9));
            assert_eq!(ctx.current_command.as_deref(), Some("deadline"));
        }
    }
}

pub mod resolver {
    //! Turns a pointer event plus editor context into the entity the user is acting on.

    use crate::core::BlockId;
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    /// CSS class of the collapse/expand affordance. Right-clicking it never acts on
    /// the selection.
    pub const COLLAPSE_TOGGLE_CLASS: &str = "bullet";

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EventTarget {
        /// Raw `blockid` attribute of the element, unvalidated.
        #[serde(default)]
        pub block_id: Option<String>,
        #[serde(default)]
        pub classes: Vec<String>,
        /// Nearest enclosing block element, if the host found one.
        #[serde(default)]
        pub enclosing_block: Option<BlockId>,
    }

    impl EventTarget {
        pub fn has_class(&self, class: &str) -> bool {
            self.classes.iter().any(|c| c == class)
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PointerEvent {
        pub target: EventTarget,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Direction {
        Up,
        #[default]
        Down,
    }

    /// Currently selected blocks, in selection order.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Selection {
        blocks: Vec<BlockId>,
        direction: Option<Direction>,
    }

    impl Selection {
        pub fn clear(&mut self) {
            self.blocks.clear();
            self.direction = None;
        }

        pub fn add(&mut self, block: BlockId, direction: Direction) {
            if !self.blocks.contains(&block) {
                self.blocks.push(block);
            }
            self.direction = Some(direction);
        }

        pub fn ids(&self) -> &[BlockId] {
            &self.blocks
        }

        pub fn direction(&self) -> Option<Direction> {
            self.direction
        }

        pub fn is_empty(&self) -> bool {
            self.blocks.is_empty()
        }
    }

    /// Set while the pointer is over a block reference rendered inside `owner`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BlockRefContext {
        pub owner: BlockId,
        pub block_ref: BlockId,
    }

    /// Set while the pointer is over a page title.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PageTitleContext {
        pub page: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct InteractionContext {
        #[serde(default)]
        pub selection: Selection,
        #[serde(default)]
        pub block_ref: Option<BlockRefContext>,
        #[serde(default)]
        pub page_title: Option<PageTitleContext>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "type", rename_all = "kebab-case")]
    pub enum ResolvedTarget {
        PageTitle { page: String },
        BlockReference { owner: BlockId, block_ref: BlockId },
        MultiBlockSelection { blocks: Vec<BlockId> },
        SingleBlock { block: BlockId },
    }

    impl ResolvedTarget {
        pub fn name(&self) -> &'static str {
            match self {
                ResolvedTarget::PageTitle { .. } => "page-title",
                ResolvedTarget::BlockReference { .. } => "block-reference",
                ResolvedTarget::MultiBlockSelection { .. } => "selection",
                ResolvedTarget::SingleBlock { .. } => "block",
            }
        }
    }

    type Rule = fn(&PointerEvent, &mut InteractionContext) -> Option<ResolvedTarget>;

    /// Checked in order; the first rule that yields a target wins.
    static RULES: &[(&str, Rule)] = &[
        ("page-title", page_title),
        ("block-reference", block_reference),
        ("selection", selection),
        ("block", single_block),
    ];

    /// Resolve `event` to at most one target. `None` means the host's native menu
    /// should be left alone.
    pub fn resolve(event: &PointerEvent, ctx: &mut InteractionContext) -> Option<ResolvedTarget> {
        for (name, rule) in RULES {
            if let Some(target) = rule(event, ctx) {
                debug!(rule = *name, "pointer event resolved");
                return Some(target);
            }
        }
        debug!(block_id = ?event.target.block_id, "pointer event not resolved");
        None
    }

    fn consume_contexts(ctx: &mut InteractionContext) {
        ctx.page_title = None;
        ctx.block_ref = None;
    }

    fn page_title(_: &PointerEvent, ctx: &mut InteractionContext) -> Option<ResolvedTarget> {
        let page = ctx.page_title.take()?.page;
        consume_contexts(ctx);
        Some(ResolvedTarget::PageTitle { page })
    }

    fn block_reference(_: &PointerEvent, ctx: &mut InteractionContext) -> Option<ResolvedTarget> {
        let BlockRefContext { owner, block_ref } = ctx.block_ref.take()?;
        consume_contexts(ctx);
        Some(ResolvedTarget::BlockReference { owner, block_ref })
    }

    fn selection(event: &PointerEvent, ctx: &mut InteractionContext) -> Option<ResolvedTarget> {
        if ctx.selection.is_empty() || event.target.has_class(COLLAPSE_TOGGLE_CLASS) {
            return None;
        }
        Some(ResolvedTarget::MultiBlockSelection {
            blocks: ctx.selection.ids().to_vec(),
        })
    }

    fn single_block(event: &PointerEvent, ctx: &mut InteractionContext) -> Option<ResolvedTarget> {
        let block = event.target.block_id.as_deref().and_then(BlockId::parse)?;
        if let Some(enclosing) = event.target.enclosing_block {
            ctx.selection.clear();
            ctx.selection.add(enclosing, Direction::Down);
        }
        Some(ResolvedTarget::SingleBlock { block })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn on_block(id: Option<String>, classes: &[&str]) -> PointerEvent {
            PointerEvent {
                target: EventTarget {
                    block_id: id,
                    classes: classes.iter().map(|c| c.to_string()).collect(),
                    enclosing_block: None,
                },
            }
        }

        #[test]
        fn page_title_wins_and_contexts_are_consumed() {
            let mut ctx = InteractionContext {
                page_title: Some(PageTitleContext { page: "Inbox".into() }),
                block_ref: Some(BlockRefContext {
                    owner: BlockId::new(),
                    block_ref: BlockId::new(),
                }),
                ..Default::default()
            };
            ctx.selection.add(BlockId::new(), Direction::Down);
            let event = on_block(Some(BlockId::new().to_string()), &[]);

            assert_eq!(
                resolve(&event, &mut ctx),
                Some(ResolvedTarget::PageTitle { page: "Inbox".into() })
            );
            assert_eq!(ctx.page_title, None);
            assert_eq!(ctx.block_ref, None);
            assert!(matches!(
                resolve(&event, &mut ctx),
                Some(ResolvedTarget::MultiBlockSelection { .. })
            ));
        }

        #[test]
        fn block_reference_beats_selection() {
            let (owner, block_ref) = (BlockId::new(), BlockId::new());
            let mut ctx = InteractionContext {
                block_ref: Some(BlockRefContext { owner, block_ref }),
                ..Default::default()
            };
            ctx.selection.add(BlockId::new(), Direction::Down);
            let got = resolve(&on_block(None, &[]), &mut ctx);
            assert_eq!(got, Some(ResolvedTarget::BlockReference { owner, block_ref }));
            assert_eq!(ctx.block_ref, None);
        }

        #[test]
        fn selection_is_copied_unless_on_bullet() {
            let (a, b) = (BlockId::new(), BlockId::new());
            let mut ctx = InteractionContext::default();
            ctx.selection.add(a, Direction::Down);
            ctx.selection.add(b, Direction::Down);

            let got = resolve(&on_block(None, &["block-content"]), &mut ctx);
            assert_eq!(got, Some(ResolvedTarget::MultiBlockSelection { blocks: vec![a, b] }));
            assert_eq!(ctx.selection.ids(), &[a, b]);

            let clicked = BlockId::new();
            let got = resolve(&on_block(Some(clicked.to_string()), &["bullet"]), &mut ctx);
            assert_eq!(got, Some(ResolvedTarget::SingleBlock { block: clicked }));
        }

        #[test]
        fn single_block_reseeds_selection_from_enclosing_block() {
            let (clicked, enclosing) = (BlockId::new(), BlockId::new());
            let mut ctx = InteractionContext::default();
            let mut event = on_block(Some(clicked.to_string()), &[]);
            event.target.enclosing_block = Some(enclosing);

            let got = resolve(&event, &mut ctx);
            assert_eq!(got, Some(ResolvedTarget::SingleBlock { block: clicked }));
            assert_eq!(ctx.selection.ids(), &[enclosing]);
            assert_eq!(ctx.selection.direction(), Some(Direction::Down));
        }

        #[test]
        fn single_block_without_enclosing_leaves_selection() {
            let clicked = BlockId::new();
            let mut ctx = InteractionContext::default();
            let got = resolve(&on_block(Some(clicked.to_string()), &[]), &mut ctx);
            assert_eq!(got, Some(ResolvedTarget::SingleBlock { block: clicked }));
            assert!(ctx.selection.is_empty());
        }

        #[test]
        fn bad_or_missing_ids_resolve_to_nothing() {
            let mut ctx = InteractionContext::default();
            assert_eq!(resolve(&on_block(Some("abc".into()), &[]), &mut ctx), None);
            assert_eq!(resolve(&on_block(None, &[]), &mut ctx), None);
        }
    }
}

pub mod plugins {
    //! Commands contributed by plugins, grouped by extension point.

    use crate::core::{BlockId, DomainError};
    use indexmap::IndexMap;
    use std::{fmt, rc::Rc};
    use tracing::debug;

    /// Extension point for items appended to the single-block menu.
    pub const BLOCK_CONTEXT_MENU_ITEM: &str = "block-context-menu-item";

    /// Argument handed to a plugin handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PluginContext {
        pub block: BlockId,
    }

    pub type Handler = Rc<dyn Fn(&PluginContext)>;

    #[derive(Clone)]
    pub struct PluginCommand {
        pub plugin_id: String,
        pub action_id: String,
        pub key: String,
        pub label: String,
        pub handler: Handler,
    }

    impl fmt::Debug for PluginCommand {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("PluginCommand")
                .field("plugin_id", &self.plugin_id)
                .field("action_id", &self.action_id)
                .field("key", &self.key)
                .field("label", &self.label)
                .finish_non_exhaustive()
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct PluginRegistry {
        points: IndexMap<String, Vec<PluginCommand>>,
    }

    impl PluginRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a command under `point`. Re-registering the same plugin/action pair
        /// replaces it without changing its position.
        pub fn register(&mut self, point: &str, command: PluginCommand) {
            let commands = self.points.entry(point.to_string()).or_default();
            match commands
                .iter_mut()
                .find(|c| c.plugin_id == command.plugin_id && c.action_id == command.action_id)
            {
                Some(slot) => *slot = command,
                None => commands.push(command),
            }
        }

        /// Commands for `point` in registration order.
        pub fn commands(&self, point: &str) -> &[PluginCommand] {
            self.points.get(point).map(Vec::as_slice).unwrap_or_default()
        }

        pub fn execute(
            &self,
            plugin_id: &str,
            action_id: &str,
            ctx: &PluginContext,
        ) -> Result<(), DomainError> {
            let command = self
                .points
                .values()
                .flatten()
                .find(|c| c.plugin_id == plugin_id && c.action_id == action_id)
                .ok_or_else(|| DomainError::UnknownPluginCommand {
                    plugin_id: plugin_id.to_string(),
                    action_id: action_id.to_string(),
                })?;
            debug!(plugin_id, action_id, block = %ctx.block, "running plugin command");
            (command.handler)(ctx);
            Ok(())
        }

        /// Drop every command a plugin contributed.
        pub fn unregister_plugin(&mut self, plugin_id: &str) {
            for commands in self.points.values_mut() {
                commands.retain(|c| c.plugin_id != plugin_id);
            }
        }
    }

}

pub mod menu {
    //! Contextual menus: what can be done to a resolved target.
    //!
    //! A [`Menu`] is plain data. Item actions are lists of [`EditorCommand`]s (or a
    //! plugin invocation) that the caller executes when the item is activated.

    use crate::config::OutlinerConfig;
    use crate::core::*;
    use crate::plugins::{BLOCK_CONTEXT_MENU_ITEM, PluginRegistry};
    use crate::resolver::ResolvedTarget;
    use crate::services::{
        BlockLookup, EditorCommand, NoticeLevel, PageMenuProvider, SidebarKind, TemplateIndex,
    };
    use serde::Serialize;
    use tracing::debug;

    /// Shortcut hint shown next to "open in sidebar".
    pub const SIDEBAR_SHORTCUT: &str = "⇧+click";

    pub const TEMPLATE_EXISTS_WARNING: &str = "context-menu/template-exists-warning";

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "type", content = "commands", rename_all = "kebab-case")]
    pub enum MenuAction {
        Editor(Vec<EditorCommand>),
        Plugin {
            plugin_id: String,
            action_id: String,
            block: BlockId,
        },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct MenuItem {
        pub key: String,
        /// i18n key, or a plugin-supplied label.
        pub label: String,
        pub shortcut: Option<String>,
        pub action: MenuAction,
    }

    impl MenuItem {
        pub fn new(key: &str, label: &str, commands: Vec<EditorCommand>) -> Self {
            Self {
                key: key.to_string(),
                label: label.to_string(),
                shortcut: None,
                action: MenuAction::Editor(commands),
            }
        }

        pub fn with_shortcut(mut self, shortcut: Option<String>) -> Self {
            self.shortcut = shortcut;
            self
        }
    }

    /* ------------------------------ Pickers ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct ColorPicker {
        pub targets: Vec<BlockId>,
        pub palette: Vec<String>,
        /// Background color of the first target.
        pub current: Option<String>,
    }

    impl ColorPicker {
        pub fn choose(&self, color: &str) -> Result<Vec<EditorCommand>, DomainError> {
            if !self.palette.iter().any(|c| c == color) {
                return Err(DomainError::ColorNotInPalette(color.to_string()));
            }
            Ok(vec![EditorCommand::SetProperty {
                blocks: self.targets.clone(),
                key: props::BACKGROUND_COLOR.to_string(),
                value: color.into(),
            }])
        }

        pub fn remove(&self) -> Vec<EditorCommand> {
            vec![EditorCommand::RemoveProperty {
                blocks: self.targets.clone(),
                key: props::BACKGROUND_COLOR.to_string(),
            }]
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct HeadingPicker {
        pub targets: Vec<BlockId>,
        /// Levels `1..=levels` are offered.
        pub levels: u8,
        pub current: Option<HeadingChoice>,
    }

    impl HeadingPicker {
        pub fn choose(&self, level: u8) -> Result<Vec<EditorCommand>, DomainError> {
            if !(1..=self.levels).contains(&level) {
                return Err(DomainError::HeadingLevelOutOfRange {
                    level,
                    levels: self.levels,
                });
            }
            Ok(self.set(HeadingChoice::Level(level)))
        }

        /// Heading follows the block's depth.
        pub fn set_default(&self) -> Vec<EditorCommand> {
            self.set(HeadingChoice::Auto)
        }

        pub fn remove(&self) -> Vec<EditorCommand> {
            vec![EditorCommand::RemoveHeading {
                blocks: self.targets.clone(),
            }]
        }

        fn set(&self, heading: HeadingChoice) -> Vec<EditorCommand> {
            vec![EditorCommand::SetHeading {
                blocks: self.targets.clone(),
                heading,
            }]
        }
    }

    /* -------------------------- Template sub-editor -------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "state", rename_all = "kebab-case")]
    pub enum TemplateState {
        Link,
        Form {
            name: String,
            /// Only meaningful (and only shown) when the block has children.
            include_parent: Option<bool>,
        },
    }

    /// "Make a template" entry of the single-block menu.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct TemplateEditor {
        pub block: BlockId,
        pub has_children: bool,
        state: TemplateState,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "result", content = "commands", rename_all = "kebab-case")]
    pub enum TemplateSubmit {
        /// Blank name, nothing happens.
        Ignored,
        /// Name already taken; the form stays open.
        Duplicate(Vec<EditorCommand>),
        Created(Vec<EditorCommand>),
    }

    impl TemplateSubmit {
        pub fn commands(&self) -> &[EditorCommand] {
            match self {
                TemplateSubmit::Ignored => &[],
                TemplateSubmit::Duplicate(c) | TemplateSubmit::Created(c) => c,
            }
        }
    }

    impl TemplateEditor {
        pub fn new(block: BlockId, has_children: bool) -> Self {
            Self {
                block,
                has_children,
                state: TemplateState::Link,
            }
        }

        pub fn state(&self) -> &TemplateState {
            &self.state
        }

        /// Switch from the link to the name form. Text editing has to stop while the
        /// form has focus.
        pub fn open(&mut self) -> Vec<EditorCommand> {
            if self.state == TemplateState::Link {
                self.state = TemplateState::Form {
                    name: String::new(),
                    include_parent: self.has_children.then_some(true),
                };
            }
            vec![EditorCommand::ClearEdit]
        }

        pub fn set_name(&mut self, value: &str) -> bool {
            match &mut self.state {
                TemplateState::Form { name, .. } => {
                    *name = value.to_string();
                    true
                }
                TemplateState::Link => false,
            }
        }

        pub fn set_include_parent(&mut self, value: bool) -> bool {
            match &mut self.state {
                TemplateState::Form { include_parent, .. } if self.has_children => {
                    *include_parent = Some(value);
                    true
                }
                _ => false,
            }
        }

        pub fn submit(&self, index: &dyn TemplateIndex) -> TemplateSubmit {
            let TemplateState::Form {
                name,
                include_parent,
            } = &self.state
            else {
                return TemplateSubmit::Ignored;
            };
            let title = name.trim();
            if title.is_empty() {
                return TemplateSubmit::Ignored;
            }
            if index.template_exists(title) {
                debug!(template = title, "template name already taken");
                return TemplateSubmit::Duplicate(vec![EditorCommand::Notify {
                    level: NoticeLevel::Error,
                    message: TEMPLATE_EXISTS_WARNING.to_string(),
                }]);
            }
            let blocks = vec![self.block];
            let mut commands = vec![EditorCommand::SetProperty {
                blocks: blocks.clone(),
                key: props::TEMPLATE.to_string(),
                value: title.into(),
            }];
            if *include_parent == Some(false) {
                commands.push(EditorCommand::SetProperty {
                    blocks,
                    key: props::TEMPLATE_INCLUDING_PARENT.to_string(),
                    value: PropertyValue::Bool(false),
                });
            }
            commands.push(EditorCommand::HideMenu);
            TemplateSubmit::Created(commands)
        }
    }

    /* -------------------------------- Menu -------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "entry", rename_all = "kebab-case")]
    pub enum MenuEntry {
        Item(MenuItem),
        Separator,
        ColorPicker(ColorPicker),
        HeadingPicker(HeadingPicker),
        Template(TemplateEditor),
        Group { title: String, items: Vec<MenuItem> },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Menu {
        pub target: ResolvedTarget,
        pub entries: Vec<MenuEntry>,
    }

    impl Menu {
        /// Every activatable item, grouped ones included, in display order.
        pub fn items(&self) -> impl Iterator<Item = &MenuItem> {
            self.entries.iter().flat_map(|entry| match entry {
                MenuEntry::Item(item) => std::slice::from_ref(item),
                MenuEntry::Group { items, .. } => items.as_slice(),
                _ => &[][..],
            })
        }

        pub fn item(&self, key: &str) -> Option<&MenuItem> {
            self.items().find(|item| item.key == key)
        }

        pub fn keys(&self) -> Vec<&str> {
            self.items().map(|item| item.key.as_str()).collect()
        }

        pub fn color_picker(&self) -> Option<&ColorPicker> {
            self.entries.iter().find_map(|entry| match entry {
                MenuEntry::ColorPicker(p) => Some(p),
                _ => None,
            })
        }

        pub fn heading_picker(&self) -> Option<&HeadingPicker> {
            self.entries.iter().find_map(|entry| match entry {
                MenuEntry::HeadingPicker(p) => Some(p),
                _ => None,
            })
        }

        pub fn template(&self) -> Option<&TemplateEditor> {
            self.entries.iter().find_map(|entry| match entry {
                MenuEntry::Template(t) => Some(t),
                _ => None,
            })
        }

        pub fn template_mut(&mut self) -> Option<&mut TemplateEditor> {
            self.entries.iter_mut().find_map(|entry| match entry {
                MenuEntry::Template(t) => Some(t),
                _ => None,
            })
        }
    }

    /* ------------------------------ Building ------------------------------ */

    /// What menu building reads besides the target.
    pub struct MenuEnv<'a> {
        pub config: &'a OutlinerConfig,
        pub lookup: &'a dyn BlockLookup,
        pub pages: &'a dyn PageMenuProvider,
        pub plugins: &'a PluginRegistry,
    }

    pub fn build_menu(target: &ResolvedTarget, env: &MenuEnv<'_>) -> Menu {
        let entries = match target {
            ResolvedTarget::PageTitle { page } => page_entries(page, env),
            ResolvedTarget::BlockReference { owner, block_ref } => block_ref_entries(*owner, *block_ref),
            ResolvedTarget::MultiBlockSelection { blocks } => selection_entries(blocks, env),
            ResolvedTarget::SingleBlock { block } => block_entries(*block, env),
        };
        debug!(kind = target.name(), entries = entries.len(), "menu built");
        Menu {
            target: target.clone(),
            entries,
        }
    }

    fn pickers(blocks: &[BlockId], env: &MenuEnv<'_>) -> [MenuEntry; 2] {
        let first = blocks.first().and_then(|id| env.lookup.block(*id));
        [
            MenuEntry::ColorPicker(ColorPicker {
                targets: blocks.to_vec(),
                palette: env.config.menu.palette.clone(),
                current: first
                    .and_then(|b| b.property(props::BACKGROUND_COLOR))
                    .map(PropertyValue::to_string),
            }),
            MenuEntry::HeadingPicker(HeadingPicker {
                targets: blocks.to_vec(),
                levels: env.config.menu.heading_levels,
                current: first.and_then(Block::heading),
            }),
        ]
    }

    fn item(key: &str, label: &str, commands: Vec<EditorCommand>) -> MenuEntry {
        MenuEntry::Item(MenuItem::new(key, label, commands))
    }

    fn item_with_shortcut(
        env: &MenuEnv<'_>,
        key: &str,
        label: &str,
        shortcut_id: &str,
        commands: Vec<EditorCommand>,
    ) -> MenuEntry {
        MenuEntry::Item(MenuItem::new(key, label, commands).with_shortcut(env.config.shortcut(shortcut_id)))
    }

    fn selection_entries(blocks: &[BlockId], env: &MenuEnv<'_>) -> Vec<MenuEntry> {
        let ids = || blocks.to_vec();
        let mut entries = Vec::from(pickers(blocks, env));
        entries.extend([
            MenuEntry::Separator,
            item_with_shortcut(env, "cut", "editor/cut", "editor/cut", vec![
                EditorCommand::Cut { blocks: ids() },
            ]),
            item_with_shortcut(env, "delete", "editor/delete-selection", "editor/delete", vec![
                EditorCommand::Delete { blocks: ids() },
                EditorCommand::HideMenu,
            ]),
            item_with_shortcut(env, "copy", "editor/copy", "editor/copy", vec![
                EditorCommand::Copy { blocks: ids() },
            ]),
            item("copy-as", "content/copy-export-as", vec![EditorCommand::CopyAs {
                blocks: ids(),
            }]),
            item("copy-block-refs", "content/copy-block-ref", vec![
                EditorCommand::CopyBlockRefs { blocks: ids() },
            ]),
            item("copy-block-embeds", "content/copy-block-embed", vec![
                EditorCommand::CopyBlockEmbeds { blocks: ids() },
            ]),
            MenuEntry::Separator,
        ]);
        if env.config.features.flashcards {
            entries.push(item("make-card", "context-menu/make-a-flashcard", vec![
                EditorCommand::MakeCards { blocks: ids() },
            ]));
        }
        entries.extend([
            item_with_shortcut(env, "cycle-todos", "editor/cycle-todo", "editor/cycle-todo", vec![
                EditorCommand::CycleTodos { blocks: ids() },
            ]),
            MenuEntry::Separator,
            item_with_shortcut(
                env,
                "expand-all",
                "editor/expand-block-children",
                "editor/expand-block-children",
                vec![EditorCommand::ExpandAll { blocks: ids() }],
            ),
            item_with_shortcut(
                env,
                "collapse-all",
                "editor/collapse-block-children",
                "editor/collapse-block-children",
                vec![EditorCommand::CollapseAll { blocks: ids() }],
            ),
        ]);
        entries
    }

    fn block_entries(block: BlockId, env: &MenuEnv<'_>) -> Vec<MenuEntry> {
        let features = env.config.features;
        let mut entries = Vec::from(pickers(&[block], env));
        entries.extend([
            MenuEntry::Separator,
            MenuEntry::Item(
                MenuItem::new("open-in-sidebar", "content/open-in-sidebar", vec![
                    EditorCommand::OpenInSidebar {
                        block,
                        kind: SidebarKind::Block,
                    },
                ])
                .with_shortcut(Some(SIDEBAR_SHORTCUT.to_string())),
            ),
            MenuEntry::Separator,
            item("copy-block-ref", "content/copy-block-ref", vec![
                EditorCommand::CopyBlockRefs { blocks: vec![block] },
            ]),
            item("copy-block-embed", "content/copy-block-embed", vec![
                EditorCommand::CopyBlockEmbeds { blocks: vec![block] },
            ]),
        ]);
        if features.desktop {
            entries.push(item("copy-block-url", "content/copy-block-url", vec![
                EditorCommand::CopyBlockUrl { block },
            ]));
        }
        entries.extend([
            item("copy-as", "content/copy-export-as", vec![EditorCommand::CopyAs {
                blocks: vec![block],
            }]),
            item_with_shortcut(env, "cut", "editor/cut", "editor/cut", vec![EditorCommand::Cut {
                blocks: vec![block],
            }]),
            item_with_shortcut(env, "delete", "editor/delete-selection", "editor/delete", vec![
                EditorCommand::Delete { blocks: vec![block] },
            ]),
            MenuEntry::Separator,
            MenuEntry::Template(TemplateEditor::new(block, env.lookup.has_children(block))),
        ]);
        if env.lookup.is_card(block) {
            entries.push(item("preview-card", "context-menu/preview-flashcard", vec![
                EditorCommand::PreviewCard { block },
            ]));
        } else if features.flashcards {
            entries.push(item("make-card", "context-menu/make-a-flashcard", vec![
                EditorCommand::MakeCards { blocks: vec![block] },
            ]));
        }
        entries.extend([
            MenuEntry::Separator,
            item_with_shortcut(
                env,
                "expand-all",
                "editor/expand-block-children",
                "editor/expand-block-children",
                vec![EditorCommand::ExpandAll { blocks: vec![block] }],
            ),
            item_with_shortcut(
                env,
                "collapse-all",
                "editor/collapse-block-children",
                "editor/collapse-block-children",
                vec![EditorCommand::CollapseAll { blocks: vec![block] }],
            ),
        ]);
        entries.extend(env.plugins.commands(BLOCK_CONTEXT_MENU_ITEM).iter().map(|c| {
            MenuEntry::Item(MenuItem {
                key: c.key.clone(),
                label: c.label.clone(),
                shortcut: None,
                action: MenuAction::Plugin {
                    plugin_id: c.plugin_id.clone(),
                    action_id: c.action_id.clone(),
                    block,
                },
            })
        }));
        if features.developer_mode {
            entries.extend([
                item("dev-show-block-data", "dev/show-block-data", vec![
                    EditorCommand::ShowBlockData { block },
                ]),
                item("dev-show-block-ast", "dev/show-block-ast", vec![
                    EditorCommand::ShowBlockAst { block },
                ]),
            ]);
        }
        entries
    }

    fn block_ref_entries(owner: BlockId, block_ref: BlockId) -> Vec<MenuEntry> {
        vec![
            MenuEntry::Item(
                MenuItem::new("open-in-sidebar", "content/open-in-sidebar", vec![
                    EditorCommand::OpenInSidebar {
                        block: block_ref,
                        kind: SidebarKind::BlockRef,
                    },
                ])
                .with_shortcut(Some(SIDEBAR_SHORTCUT.to_string())),
            ),
            item("copy", "content/copy-ref", vec![EditorCommand::CopyRef { block_ref }]),
            item("delete", "content/delete-ref", vec![EditorCommand::DeleteRef {
                owner,
                block_ref,
            }]),
            item("replace-with-text", "content/replace-with-text", vec![
                EditorCommand::ReplaceRefWithText { owner, block_ref },
            ]),
            item("replace-with-embed", "content/replace-with-embed", vec![
                EditorCommand::ReplaceRefWithEmbed { owner, block_ref },
            ]),
        ]
    }

    fn page_entries(page: &str, env: &MenuEnv<'_>) -> Vec<MenuEntry> {
        env.pages
            .page_menu(page)
            .into_iter()
            .map(|group| MenuEntry::Group {
                title: group.title,
                items: group.items,
            })
            .collect()
    }

    /* ------------------------------ Text layout ------------------------------ */

    /// One line per entry; group items are indented under their title.
    pub fn render_menu(menu: &Menu) -> String {
        let mut lines = Vec::new();
        for entry in &menu.entries {
            match entry {
                MenuEntry::Item(item) => lines.push(render_item(item, "")),
                MenuEntry::Separator => lines.push("-".repeat(32)),
                MenuEntry::ColorPicker(p) => {
                    let mut line = format!("content/background-color: {} [x]", p.palette.join(" "));
                    if let Some(current) = &p.current {
                        line.push_str(&format!(" (current: {current})"));
                    }
                    lines.push(line);
                }
                MenuEntry::HeadingPicker(p) => {
                    let levels: Vec<String> = (1..=p.levels).map(|n| format!("h{n}")).collect();
                    let mut line =
                        format!("content/heading: {} content/default [x]", levels.join(" "));
                    match p.current {
                        Some(HeadingChoice::Level(n)) => line.push_str(&format!(" (current: h{n})")),
                        Some(HeadingChoice::Auto) => line.push_str(" (current: auto)"),
                        None => {}
                    }
                    lines.push(line);
                }
                MenuEntry::Template(t) => match t.state() {
                    TemplateState::Link => {
                        lines.push(format!("{:<24}{}", "make-template", "context-menu/make-a-template"))
                    }
                    TemplateState::Form {
                        name,
                        include_parent,
                    } => {
                        lines.push(format!("context-menu/input-template-name: [{name}]"));
                        if let Some(include) = include_parent {
                            lines.push(format!(
                                "context-menu/template-include-parent-block: {}",
                                if *include { "on" } else { "off" }
                            ));
                        }
                    }
                },
                MenuEntry::Group { title, items } => {
                    lines.push(format!("{title}:"));
                    lines.extend(items.iter().map(|item| render_item(item, "  ")));
                }
            }
        }
        lines.join("\n")
    }

    fn render_item(item: &MenuItem, indent: &str) -> String {
        let mut line = format!("{indent}{:<24}{}", item.key, item.label);
        if let Some(shortcut) = &item.shortcut {
            line.push_str(&format!("  [{shortcut}]"));
        }
        line
    }

}

pub mod graph {
    //! In-memory block graph implementing every collaborator trait in [`services`].
    //!
    //! Persisted as JSON. Editor-side state that a real host would keep elsewhere
    //! (edit buffer, clipboard, sidebar, notifications, open modal) lives in
    //! [`Workbench`] so commands have somewhere observable to land.
    //!
    //! [`services`]: crate::services

    use crate::core::*;
    use crate::menu::MenuItem;
    use crate::repeater;
    use crate::services::*;
    use anyhow::{Context, Result};
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::{fs, path::Path};
    use tracing::{debug, warn};

    /// Task markers cycled by "cycle todo", in order.
    const TODO_CYCLE: [&str; 3] = ["TODO", "DOING", "DONE"];

    /* ------------------------------- Data ------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Page {
        pub name: String,
        /// Set for journal pages.
        #[serde(default)]
        pub journal_day: Option<NaiveDate>,
        #[serde(default)]
        pub roots: Vec<BlockId>,
    }

    /// Text of the block being edited. `cursor` counts chars.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EditBuffer {
        pub block: BlockId,
        pub text: String,
        pub cursor: usize,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "kebab-case")]
    pub enum SidebarItem {
        Block { block: BlockId, kind: SidebarKind },
        Page { page: String },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Notification {
        pub level: NoticeLevel,
        pub message: String,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "kebab-case")]
    pub enum Modal {
        Export { blocks: Vec<BlockId> },
        BlockData { block: BlockId },
        ContentAst { block: BlockId },
        CardPreview { block: BlockId },
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Workbench {
        pub editing: Option<EditBuffer>,
        pub clipboard: Option<String>,
        pub sidebar: Vec<SidebarItem>,
        pub notifications: Vec<Notification>,
        pub modal: Option<Modal>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Graph {
        /// Name of the graph, used in app URLs.
        pub repo: String,
        #[serde(default)]
        pub pages: IndexMap<String, Page>,
        #[serde(default)]
        pub blocks: IndexMap<BlockId, Block>,
        #[serde(default)]
        pub favorites: Vec<String>,
        #[serde(default)]
        pub workbench: Workbench,
    }

    impl Graph {
        pub fn new(repo: impl Into<String>) -> Self {
            Self {
                repo: repo.into(),
                pages: IndexMap::new(),
                blocks: IndexMap::new(),
                favorites: vec![],
                workbench: Workbench::default(),
            }
        }

        pub fn from_json_str(text: &str) -> Result<Self> {
            serde_json::from_str(text).context("parsing graph JSON")
        }

        pub fn load(path: &Path) -> Result<Self> {
            let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            Self::from_json_str(&text).with_context(|| format!("in {:?}", path))
        }

        pub fn save(&self, path: &Path) -> Result<()> {
            let text = serde_json::to_string_pretty(self).context("serializing graph")?;
            fs::write(path, text).with_context(|| format!("writing {:?}", path))
        }

        /// Append a block under `parent`, or as a top-level block of `page`.
        pub fn insert_block(&mut self, page: &str, parent: Option<BlockId>, content: &str) -> BlockId {
            let mut block = Block::new(page, content);
            block.parent = parent.filter(|p| self.blocks.contains_key(p));
            let id = block.id;
            let page_entry = self.pages.entry(page.to_string()).or_insert_with(|| Page {
                name: page.to_string(),
                journal_day: None,
                roots: vec![],
            });
            match block.parent.and_then(|p| self.blocks.get_mut(&p)) {
                Some(parent) => parent.children.push(id),
                None => page_entry.roots.push(id),
            }
            self.blocks.insert(id, block);
            id
        }

        pub fn start_editing(&mut self, id: BlockId) -> Result<(), DomainError> {
            let block = self.blocks.get(&id).ok_or(DomainError::BlockNotFound(id))?;
            self.workbench.editing = Some(EditBuffer {
                block: id,
                text: block.content.clone(),
                cursor: block.content.chars().count(),
            });
            Ok(())
        }

        /// All blocks below `id`, depth first.
        pub fn descendants(&self, id: BlockId) -> Vec<BlockId> {
            let mut out = vec![];
            let mut stack: Vec<BlockId> = self
                .blocks
                .get(&id)
                .map(|b| b.children.iter().rev().copied().collect())
                .unwrap_or_default();
            while let Some(next) = stack.pop() {
                out.push(next);
                if let Some(b) = self.blocks.get(&next) {
                    stack.extend(b.children.iter().rev().copied());
                }
            }
            out
        }

        /// Drop ids whose ancestor is also listed.
        pub fn top_level(&self, ids: &[BlockId]) -> Vec<BlockId> {
            ids.iter()
                .copied()
                .filter(|id| {
                    let mut cur = self.blocks.get(id).and_then(|b| b.parent);
                    while let Some(p) = cur {
                        if ids.contains(&p) {
                            return false;
                        }
                        cur = self.blocks.get(&p).and_then(|b| b.parent);
                    }
                    true
                })
                .collect()
        }

        /// Outline text of `ids` and their subtrees.
        pub fn export_text(&self, ids: &[BlockId]) -> String {
            let mut lines = vec![];
            for id in self.top_level(ids) {
                self.export_into(id, 0, &mut lines);
            }
            lines.join("\n")
        }

        fn export_into(&self, id: BlockId, depth: usize, lines: &mut Vec<String>) {
            let Some(block) = self.blocks.get(&id) else {
                return;
            };
            let indent = "\t".repeat(depth);
            let mut content = block.content.lines();
            lines.push(format!("{indent}- {}", content.next().unwrap_or_default()));
            lines.extend(content.map(|line| format!("{indent}  {line}")));
            for child in &block.children {
                self.export_into(*child, depth + 1, lines);
            }
        }

        pub fn block_url(&self, id: BlockId) -> String {
            format!("outline://graph/{}?block-id={}", self.repo, id)
        }

        fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
            self.workbench.notifications.push(Notification {
                level,
                message: message.into(),
            });
        }

        fn for_each_block(&mut self, ids: &[BlockId], mut f: impl FnMut(&mut Block)) {
            for id in ids {
                match self.blocks.get_mut(id) {
                    Some(block) => f(block),
                    None => warn!(block = %id, "command targets unknown block"),
                }
            }
        }

        fn delete_blocks(&mut self, ids: &[BlockId]) {
            for id in self.top_level(ids) {
                let doomed = self.descendants(id);
                let Some(block) = self.blocks.shift_remove(&id) else {
                    continue;
                };
                match block.parent.and_then(|p| self.blocks.get_mut(&p)) {
                    Some(parent) => parent.children.retain(|c| *c != id),
                    None => {
                        if let Some(page) = self.pages.get_mut(&block.page) {
                            page.roots.retain(|c| *c != id);
                        }
                    }
                }
                for d in &doomed {
                    self.blocks.shift_remove(d);
                }
                if self
                    .workbench
                    .editing
                    .as_ref()
                    .is_some_and(|e| e.block == id || doomed.contains(&e.block))
                {
                    self.workbench.editing = None;
                }
            }
        }

        /// Live text of `id`: the edit buffer when it is being edited.
        fn text_mut(&mut self, id: BlockId) -> Option<&mut String> {
            match &mut self.workbench.editing {
                Some(buf) if buf.block == id => Some(&mut buf.text),
                _ => self.blocks.get_mut(&id).map(|b| &mut b.content),
            }
        }

        fn replace_ref(&mut self, owner: BlockId, block_ref_id: BlockId, with: &str) {
            let needle = block_ref(block_ref_id);
            match self.text_mut(owner) {
                Some(text) => *text = text.replace(&needle, with),
                None => warn!(block = %owner, "reference owner not found"),
            }
        }

        fn insert_at_cursor(&mut self, snippet: &str) -> bool {
            let Some(buf) = self.workbench.editing.as_mut() else {
                return false;
            };
            let at = buf
                .text
                .char_indices()
                .nth(buf.cursor)
                .map(|(i, _)| i)
                .unwrap_or(buf.text.len());
            buf.text.insert_str(at, snippet);
            buf.cursor += snippet.chars().count();
            true
        }
    }

    fn cycle_marker(content: &str) -> String {
        let (head, tail) = content.split_once(' ').unwrap_or((content, ""));
        let (next, body) = match TODO_CYCLE.iter().position(|m| *m == head) {
            Some(i) => (TODO_CYCLE.get(i + 1).copied(), tail),
            None => (Some(TODO_CYCLE[0]), content),
        };
        match next {
            Some(marker) if body.is_empty() => marker.to_string(),
            Some(marker) => format!("{marker} {body}"),
            None => body.to_string(),
        }
    }

    /* --------------------------- Collaborator impls --------------------------- */

    impl EditorOps for Graph {
        fn apply(&mut self, command: EditorCommand) {
            if command.blocks().is_some_and(|ids| ids.is_empty()) {
                debug!(?command, "empty block list; nothing to do");
                return;
            }
            use EditorCommand as C;
            match command {
                C::SetProperty { blocks, key, value } => self.for_each_block(&blocks, |b| {
                    b.properties.insert(key.clone(), value.clone());
                }),
                C::RemoveProperty { blocks, key } => self.for_each_block(&blocks, |b| {
                    b.properties.shift_remove(&key);
                }),
                C::SetHeading { blocks, heading } => self.for_each_block(&blocks, |b| {
                    b.properties
                        .insert(props::HEADING.to_string(), heading.to_property());
                }),
                C::RemoveHeading { blocks } => self.for_each_block(&blocks, |b| {
                    b.properties.shift_remove(props::HEADING);
                }),
                C::Cut { blocks } => {
                    self.workbench.clipboard = Some(self.export_text(&blocks));
                    self.delete_blocks(&blocks);
                }
                C::Copy { blocks } => self.workbench.clipboard = Some(self.export_text(&blocks)),
                C::Delete { blocks } => self.delete_blocks(&blocks),
                C::CopyAs { blocks } => {
                    self.workbench.modal = Some(Modal::Export {
                        blocks: self.top_level(&blocks),
                    })
                }
                C::CopyBlockRefs { blocks } => {
                    let refs: Vec<String> = blocks.into_iter().map(block_ref).collect();
                    self.workbench.clipboard = Some(refs.join("\n"));
                }
                C::CopyBlockEmbeds { blocks } => {
                    let embeds: Vec<String> = blocks.into_iter().map(block_embed).collect();
                    self.workbench.clipboard = Some(embeds.join("\n"));
                }
                C::CopyBlockUrl { block } => self.workbench.clipboard = Some(self.block_url(block)),
                C::CycleTodos { blocks } => self.for_each_block(&blocks, |b| {
                    b.content = cycle_marker(&b.content);
                }),
                C::ExpandAll { blocks } => {
                    let all: Vec<BlockId> = blocks
                        .iter()
                        .flat_map(|id| std::iter::once(*id).chain(self.descendants(*id)))
                        .collect();
                    self.for_each_block(&all, |b| b.collapsed = false);
                }
                C::CollapseAll { blocks } => {
                    let all: Vec<BlockId> = blocks
                        .iter()
                        .flat_map(|id| std::iter::once(*id).chain(self.descendants(*id)))
                        .collect();
                    self.for_each_block(&all, |b| b.collapsed = !b.children.is_empty());
                }
                C::MakeCards { blocks } => self.for_each_block(&blocks, |b| {
                    if !b.is_card() {
                        b.content = format!("{} {CARD_TAG}", b.content.trim_end());
                    }
                }),
                C::PreviewCard { block } => self.workbench.modal = Some(Modal::CardPreview { block }),
                C::OpenInSidebar { block, kind } => {
                    let item = SidebarItem::Block { block, kind };
                    if !self.workbench.sidebar.contains(&item) {
                        self.workbench.sidebar.push(item);
                    }
                }
                C::CopyRef { block_ref: id } => self.workbench.clipboard = Some(block_ref(id)),
                C::DeleteRef { owner, block_ref } => self.replace_ref(owner, block_ref, ""),
                C::ReplaceRefWithText { owner, block_ref } => {
                    let text = self
                        .blocks
                        .get(&block_ref)
                        .and_then(|b| b.content.lines().next())
                        .unwrap_or_default()
                        .to_string();
                    self.replace_ref(owner, block_ref, &text);
                }
                C::ReplaceRefWithEmbed { owner, block_ref } => {
                    self.replace_ref(owner, block_ref, &block_embed(block_ref))
                }
                C::OpenPageInSidebar { page } => {
                    let item = SidebarItem::Page { page };
                    if !self.workbench.sidebar.contains(&item) {
                        self.workbench.sidebar.push(item);
                    }
                }
                C::ToggleFavorite { page } => match self.favorites.iter().position(|p| *p == page) {
                    Some(i) => {
                        self.favorites.remove(i);
                    }
                    None => self.favorites.push(page),
                },
                C::CopyPageRef { page } => self.workbench.clipboard = Some(page_ref(&page)),
                C::ShowBlockData { block } => self.workbench.modal = Some(Modal::BlockData { block }),
                C::ShowBlockAst { block } => self.workbench.modal = Some(Modal::ContentAst { block }),
                C::SetEditingTimestamp { kind, text } => match self.workbench.editing.as_mut() {
                    Some(buf) => {
                        buf.text = repeater::rewrite_marker(&buf.text, kind, &text);
                        buf.cursor = buf.text.chars().count();
                    }
                    None => {
                        warn!(%kind, "no block is being edited; timestamp dropped");
                        self.notify(NoticeLevel::Warning, "no block is being edited");
                    }
                },
                C::SetBlockTimestamp { block, kind, text } => self.for_each_block(&[block], |b| {
                    b.content = repeater::rewrite_marker(&b.content, kind, &text);
                }),
                C::InsertPageRef { page } => {
                    if !self.insert_at_cursor(&page_ref(&page)) {
                        warn!(%page, "no block is being edited; page reference dropped");
                        self.notify(NoticeLevel::Warning, "no block is being edited");
                    }
                }
                C::ClearEdit => {
                    if let Some(buf) = self.workbench.editing.take() {
                        if let Some(block) = self.blocks.get_mut(&buf.block) {
                            block.content = buf.text;
                        }
                    }
                }
                C::HideMenu => debug!("menu hidden"),
                C::Notify { level, message } => self.notify(level, message),
            }
        }
    }

    impl BlockLookup for Graph {
        fn block(&self, id: BlockId) -> Option<&Block> {
            self.blocks.get(&id)
        }

        fn editing_block(&self) -> Option<BlockId> {
            self.workbench.editing.as_ref().map(|e| e.block)
        }

        fn live_content(&self, id: BlockId) -> Option<&str> {
            match &self.workbench.editing {
                Some(buffer) if buffer.block == id => Some(buffer.text.as_str()),
                _ => self.blocks.get(&id).map(|b| b.content.as_str()),
            }
        }
    }

    impl TemplateIndex for Graph {
        fn template_exists(&self, name: &str) -> bool {
            self.blocks.values().any(|b| {
                b.property(props::TEMPLATE)
                    .and_then(PropertyValue::as_text)
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case(name.trim()))
            })
        }
    }

    impl PageMenuProvider for Graph {
        fn page_menu(&self, page: &str) -> Vec<PageMenuGroup> {
            if !self.pages.contains_key(page) {
                return vec![];
            }
            let favorite = if self.favorites.iter().any(|p| p == page) {
                MenuItem::new("unfavorite", "page/unfavorite", vec![EditorCommand::ToggleFavorite {
                    page: page.to_string(),
                }])
            } else {
                MenuItem::new("favorite", "page/add-to-favorites", vec![
                    EditorCommand::ToggleFavorite {
                        page: page.to_string(),
                    },
                ])
            };
            vec![
                PageMenuGroup {
                    title: "page/favorites".into(),
                    items: vec![favorite],
                },
                PageMenuGroup {
                    title: "page/actions".into(),
                    items: vec![
                        MenuItem::new("open-in-sidebar", "content/open-in-sidebar", vec![
                            EditorCommand::OpenPageInSidebar {
                                page: page.to_string(),
                            },
                        ]),
                        MenuItem::new("copy-page-ref", "page/copy-page-ref", vec![
                            EditorCommand::CopyPageRef {
                                page: page.to_string(),
                            },
                        ]),
                    ],
                },
            ]
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn sample() -> (Graph, BlockId, BlockId, BlockId) {
            let mut g = Graph::new("notes");
            let root = g.insert_block("Inbox", None, "Groceries");
            let child = g.insert_block("Inbox", Some(root), "milk");
            let other = g.insert_block("Inbox", None, "TODO call mom");
            (g, root, child, other)
        }

        #[test]
        fn insert_links_parents_and_pages() {
            let (g, root, child, other) = sample();
            assert_eq!(g.pages["Inbox"].roots, vec![root, other]);
            assert_eq!(g.blocks[&root].children, vec![child]);
            assert_eq!(g.blocks[&child].parent, Some(root));
            assert_eq!(g.descendants(root), vec![child]);
            assert_eq!(g.top_level(&[child, root]), vec![root]);
        }

        #[test]
        fn empty_batches_are_noops() {
            let (mut g, ..) = sample();
            let before = g.clone();
            g.apply(EditorCommand::Delete { blocks: vec![] });
            g.apply(EditorCommand::SetProperty {
                blocks: vec![],
                key: "x".into(),
                value: "y".into(),
            });
            assert_eq!(g, before);
        }

        #[test]
        fn cut_copies_subtree_then_deletes_it() {
            let (mut g, root, child, other) = sample();
            g.apply(EditorCommand::Cut { blocks: vec![root] });
            assert_eq!(g.workbench.clipboard.as_deref(), Some("- Groceries\n\t- milk"));
            assert!(!g.blocks.contains_key(&root));
            assert!(!g.blocks.contains_key(&child));
            assert_eq!(g.pages["Inbox"].roots, vec![other]);
        }

        #[test]
        fn todo_markers_cycle() {
            assert_eq!(cycle_marker("buy milk"), "TODO buy milk");
            assert_eq!(cycle_marker("TODO buy milk"), "DOING buy milk");
            assert_eq!(cycle_marker("DOING buy milk"), "DONE buy milk");
            assert_eq!(cycle_marker("DONE buy milk"), "buy milk");
            assert_eq!(cycle_marker(""), "TODO");
        }

        #[test]
        fn collapse_and_expand_touch_whole_subtree() {
            let (mut g, root, child, _) = sample();
            g.apply(EditorCommand::CollapseAll { blocks: vec![root] });
            assert!(g.blocks[&root].collapsed);
            assert!(!g.blocks[&child].collapsed);
            g.apply(EditorCommand::ExpandAll { blocks: vec![root] });
            assert!(!g.blocks[&root].collapsed);
        }

        #[test]
        fn reference_rewrites_use_edit_buffer_when_editing() {
            let (mut g, root, _, other) = sample();
            g.blocks[&other].content = format!("see {}", block_ref(root));
            g.apply(EditorCommand::ReplaceRefWithText {
                owner: other,
                block_ref: root,
            });
            assert_eq!(g.blocks[&other].content, "see Groceries");

            g.blocks[&other].content = format!("see {}", block_ref(root));
            g.start_editing(other).unwrap();
            g.apply(EditorCommand::ReplaceRefWithEmbed {
                owner: other,
                block_ref: root,
            });
            let expected = format!("see {}", block_embed(root));
            assert_eq!(g.workbench.editing.as_ref().unwrap().text, expected);
            g.apply(EditorCommand::ClearEdit);
            assert_eq!(g.blocks[&other].content, expected);
        }

        #[test]
        fn page_refs_insert_at_cursor_or_warn() {
            let (mut g, root, ..) = sample();
            g.apply(EditorCommand::InsertPageRef {
                page: "Mar 5th, 2024".into(),
            });
            assert_eq!(g.workbench.notifications.len(), 1);

            g.start_editing(root).unwrap();
            if let Some(buf) = g.workbench.editing.as_mut() {
                buf.cursor = 0;
            }
            g.apply(EditorCommand::InsertPageRef { page: "Today".into() });
            assert_eq!(g.workbench.editing.as_ref().unwrap().text, "[[Today]]Groceries");
        }

        #[test]
        fn templates_match_case_insensitively() {
            let (mut g, root, ..) = sample();
            g.apply(EditorCommand::SetProperty {
                blocks: vec![root],
                key: props::TEMPLATE.into(),
                value: "Shopping".into(),
            });
            assert!(g.template_exists("shopping"));
            assert!(!g.template_exists("travel"));
        }

        #[test]
        fn page_menu_reflects_favorites() {
            let (mut g, ..) = sample();
            assert!(g.page_menu("Nowhere").is_empty());
            assert_eq!(g.page_menu("Inbox")[0].items[0].key, "favorite");
            g.apply(EditorCommand::ToggleFavorite { page: "Inbox".into() });
            assert_eq!(g.favorites, vec!["Inbox".to_string()]);
            assert_eq!(g.page_menu("Inbox")[0].items[0].key, "unfavorite");
        }

        #[test]
        fn json_round_trip_through_file() {
            let (mut g, root, ..) = sample();
            g.apply(EditorCommand::SetBlockTimestamp {
                block: root,
                kind: CommandKind::Deadline,
                text: "<2024-03-05 Tue>".into(),
            });
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("graph.json");
            g.save(&path).expect("save");
            let loaded = Graph::load(&path).expect("load");
            assert_eq!(loaded, g);
            assert_eq!(
                loaded.scheduled(root, CommandKind::Deadline).map(|ts| ts.date),
                NaiveDate::from_ymd_opt(2024, 3, 5)
            );
        }
    }
}

pub mod outliner {
    //! Entry point for hosts: owns the interaction context, the open menu, the plugin
    //! registry and the timestamp editor, and routes everything to the collaborators.

    use crate::config::OutlinerConfig;
    use crate::core::*;
    use crate::menu::{Menu, MenuAction, MenuEnv, TemplateSubmit, build_menu};
    use crate::plugins::{PluginContext, PluginRegistry};
    use crate::resolver::{InteractionContext, PointerEvent, resolve};
    use crate::services::{BlockLookup, EditorCommand, Services};
    use crate::session::{PickerView, Popover, SessionTarget, TimestampEditor};
    use crate::submit::{self, CommitOutcome, DatePick, SubmitContext};
    use chrono::{Local, NaiveDate};
    use tracing::debug;

    pub struct Outliner<S: Services> {
        config: OutlinerConfig,
        services: S,
        context: InteractionContext,
        timestamps: TimestampEditor,
        plugins: PluginRegistry,
        menu: Option<Menu>,
        current_command: Option<String>,
    }

    impl<S: Services> Outliner<S> {
        pub fn new(config: OutlinerConfig, services: S) -> Self {
            Self {
                config,
                services,
                context: InteractionContext::default(),
                timestamps: TimestampEditor::new(),
                plugins: PluginRegistry::new(),
                menu: None,
                current_command: None,
            }
        }

        pub fn config(&self) -> &OutlinerConfig {
            &self.config
        }

        pub fn services(&self) -> &S {
            &self.services
        }

        pub fn services_mut(&mut self) -> &mut S {
            &mut self.services
        }

        pub fn into_services(self) -> S {
            self.services
        }

        /// Hover/selection state the host keeps up to date between events.
        pub fn context_mut(&mut self) -> &mut InteractionContext {
            &mut self.context
        }

        pub fn context(&self) -> &InteractionContext {
            &self.context
        }

        pub fn plugins_mut(&mut self) -> &mut PluginRegistry {
            &mut self.plugins
        }

        pub fn timestamps(&self) -> &TimestampEditor {
            &self.timestamps
        }

        pub fn timestamps_mut(&mut self) -> &mut TimestampEditor {
            &mut self.timestamps
        }

        pub fn menu(&self) -> Option<&Menu> {
            self.menu.as_ref()
        }

        pub fn close_menu(&mut self) {
            self.menu = None;
        }

        pub fn current_command(&self) -> Option<&str> {
            self.current_command.as_deref()
        }

        /// Record the slash command that is about to open the date picker.
        pub fn set_current_command(&mut self, command: Option<String>) {
            self.current_command = command;
        }

        /* ------------------------------- Menus ------------------------------- */

        /// Resolve a right-click and open the matching menu. `None` means the host
        /// should let its native menu through.
        pub fn resolve_and_dispatch(&mut self, event: &PointerEvent) -> Option<&Menu> {
            self.menu = resolve(event, &mut self.context).map(|target| {
                let env = MenuEnv {
                    config: &self.config,
                    lookup: &self.services,
                    pages: &self.services,
                    plugins: &self.plugins,
                };
                build_menu(&target, &env)
            });
            self.menu.as_ref()
        }

        fn open_menu(&self) -> Result<&Menu, DomainError> {
            self.menu.as_ref().ok_or(DomainError::NoOpenMenu)
        }

        pub fn activate(&mut self, key: &str) -> Result<(), DomainError> {
            let item = self
                .open_menu()?
                .item(key)
                .cloned()
                .ok_or_else(|| DomainError::UnknownMenuItem(key.to_string()))?;
            debug!(key, label = %item.label, "menu item activated");
            match item.action {
                MenuAction::Editor(commands) => self.execute(commands),
                MenuAction::Plugin {
                    plugin_id,
                    action_id,
                    block,
                } => self
                    .plugins
                    .execute(&plugin_id, &action_id, &PluginContext { block })?,
            }
            Ok(())
        }

        /// Send commands to the editor service. `HideMenu` also closes the open menu.
        pub fn execute(&mut self, commands: Vec<EditorCommand>) {
            for command in commands {
                if command == EditorCommand::HideMenu {
                    self.menu = None;
                }
                self.services.apply(command);
            }
        }

        pub fn choose_color(&mut self, color: &str) -> Result<(), DomainError> {
            let commands = self.color_picker()?.choose(color)?;
            self.execute(commands);
            Ok(())
        }

        pub fn remove_color(&mut self) -> Result<(), DomainError> {
            let commands = self.color_picker()?.remove();
            self.execute(commands);
            Ok(())
        }

        pub fn choose_heading(&mut self, level: u8) -> Result<(), DomainError> {
            let commands = self.heading_picker()?.choose(level)?;
            self.execute(commands);
            Ok(())
        }

        pub fn set_default_heading(&mut self) -> Result<(), DomainError> {
            let commands = self.heading_picker()?.set_default();
            self.execute(commands);
            Ok(())
        }

        pub fn remove_heading(&mut self) -> Result<(), DomainError> {
            let commands = self.heading_picker()?.remove();
            self.execute(commands);
            Ok(())
        }

        fn color_picker(&self) -> Result<&crate::menu::ColorPicker, DomainError> {
            self.open_menu()?
                .color_picker()
                .ok_or(DomainError::NoPicker("color"))
        }

        fn heading_picker(&self) -> Result<&crate::menu::HeadingPicker, DomainError> {
            self.open_menu()?
                .heading_picker()
                .ok_or(DomainError::NoPicker("heading"))
        }

        pub fn open_template_form(&mut self) -> Result<(), DomainError> {
            let commands = self
                .menu
                .as_mut()
                .ok_or(DomainError::NoOpenMenu)?
                .template_mut()
                .ok_or(DomainError::NoTemplateEditor)?
                .open();
            self.execute(commands);
            Ok(())
        }

        pub fn set_template_name(&mut self, name: &str) -> Result<bool, DomainError> {
            Ok(self.template_editor_mut()?.set_name(name))
        }

        pub fn set_template_include_parent(&mut self, include: bool) -> Result<bool, DomainError> {
            Ok(self.template_editor_mut()?.set_include_parent(include))
        }

        pub fn submit_template(&mut self) -> Result<TemplateSubmit, DomainError> {
            let result = self
                .open_menu()?
                .template()
                .ok_or(DomainError::NoTemplateEditor)?
                .submit(&self.services);
            self.execute(result.commands().to_vec());
            Ok(result)
        }

        fn template_editor_mut(&mut self) -> Result<&mut crate::menu::TemplateEditor, DomainError> {
            self.menu
                .as_mut()
                .ok_or(DomainError::NoOpenMenu)?
                .template_mut()
                .ok_or(DomainError::NoTemplateEditor)
        }

        /* ----------------------------- Timestamps ----------------------------- */

        /// Open the timestamp editor for today. Without `existing`, the block's current
        /// marker of `kind` (if any) seeds the session.
        pub fn open_timestamp_editor(
            &mut self,
            target: SessionTarget,
            kind: Option<CommandKind>,
            existing: Option<Timestamp>,
            popover: Option<Popover>,
        ) {
            let today = Local::now().date_naive();
            self.open_timestamp_editor_on(target, kind, existing, popover, today);
        }

        pub fn open_timestamp_editor_on(
            &mut self,
            target: SessionTarget,
            kind: Option<CommandKind>,
            existing: Option<Timestamp>,
            popover: Option<Popover>,
            today: NaiveDate,
        ) {
            let block = match target {
                SessionTarget::Block(id) => Some(id),
                SessionTarget::EditingBlock => self.services.editing_block(),
            };
            let existing = existing.or_else(|| {
                let kind = kind.or_else(|| self.command_kind())?;
                self.services.scheduled(block?, kind)
            });
            self.timestamps.open(target, kind, existing, today, popover);
        }

        pub fn timestamp_view(&self) -> Option<PickerView> {
            let kind = self
                .command_kind()
                .or_else(|| self.timestamps.session().and_then(|s| s.kind()));
            self.timestamps.view(kind)
        }

        pub fn submit_timestamp(&mut self) -> CommitOutcome {
            let ctx = self.submit_context();
            let outcome = submit::submit(&mut self.timestamps, &ctx, &mut self.services);
            self.current_command = None;
            outcome
        }

        pub fn pick_date(&mut self, date: NaiveDate) -> DatePick {
            let mut ctx = self.submit_context();
            let pick = submit::pick_date(
                &mut self.timestamps,
                date,
                &mut ctx,
                self.config.journal.title_format,
                &mut self.services,
            );
            self.current_command = ctx.current_command;
            pick
        }

        fn command_kind(&self) -> Option<CommandKind> {
            self.current_command
                .as_deref()
                .and_then(CommandKind::from_command)
        }

        fn submit_context(&self) -> SubmitContext {
            SubmitContext {
                editing_block: self.services.editing_block(),
                current_command: self.current_command.clone(),
            }
        }
    }

}
