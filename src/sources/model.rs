//! Data source descriptors and the types that hang off them.
//!
//! A [`DataSource`] is a single imported file or declared relational table,
//! together with whatever schema metadata has been discovered for it so far.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status message stored for sources whose reader cannot be inferred.
pub const UNSUPPORTED_TYPE: &str = "unsupported type";

/// Opaque identifier of a data source, stable for the source's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of thing a source points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    RelationalTable,
}

/// Strategy used by the query engine to read a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderKind {
    Csv,
    Excel,
    Ndjson,
    Parquet,
    Tsv,
    Relational,
}

impl ReaderKind {
    /// Infer a reader from a file extension (case-insensitive, without the dot).
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "csv" => Some(ReaderKind::Csv),
            "xlsx" | "xls" => Some(ReaderKind::Excel),
            "json" | "ndjson" => Some(ReaderKind::Ndjson),
            "parquet" => Some(ReaderKind::Parquet),
            "tsv" => Some(ReaderKind::Tsv),
            _ => None,
        }
    }

    /// Infer a reader from a file path.
    pub fn from_path(path: &str) -> Option<Self> {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Name of the table function the engine exposes for this reader.
    pub fn function_name(&self) -> &'static str {
        match self {
            ReaderKind::Csv => "read_csv",
            ReaderKind::Excel => "read_excel",
            ReaderKind::Ndjson => "read_ndjson",
            ReaderKind::Parquet => "read_parquet",
            ReaderKind::Tsv => "read_tsv",
            ReaderKind::Relational => "read_mysql",
        }
    }

    /// Whether the reader needs a sub-resource (sheet) selected before reading.
    pub fn supports_sub_resources(&self) -> bool {
        matches!(self, ReaderKind::Excel)
    }
}

/// Resolution status of a source. Exactly one holds at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceStatus {
    Loading,
    Ready,
    Failed { message: String },
}

impl SourceStatus {
    pub fn failed(message: impl Into<String>) -> Self {
        SourceStatus::Failed {
            message: message.into(),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SourceStatus::Loading)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SourceStatus::Failed { message } => Some(message),
            _ => None,
        }
    }
}

/// Key into a source's alias map.
///
/// The default entry is a distinct variant rather than a magic string, so a
/// sheet that happens to be called `"__default"` is just another sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AliasKey {
    Default,
    Sheet(String),
}

impl AliasKey {
    pub fn sheet(name: impl Into<String>) -> Self {
        AliasKey::Sheet(name.into())
    }
}

/// User-facing aliases of a source: one mandatory default plus one per sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasMap {
    default: String,
    #[serde(default)]
    sheets: BTreeMap<String, String>,
}

impl AliasMap {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            sheets: BTreeMap::new(),
        }
    }

    pub fn default_alias(&self) -> &str {
        &self.default
    }

    pub fn get(&self, key: &AliasKey) -> Option<&str> {
        match key {
            AliasKey::Default => Some(&self.default),
            AliasKey::Sheet(name) => self.sheets.get(name).map(String::as_str),
        }
    }

    /// Alias for a sheet, falling back to the default alias.
    pub fn resolve(&self, sheet: Option<&str>) -> &str {
        sheet
            .and_then(|name| self.sheets.get(name))
            .map(String::as_str)
            .unwrap_or(&self.default)
    }

    pub fn set(&mut self, key: AliasKey, value: String) {
        match key {
            AliasKey::Default => self.default = value,
            AliasKey::Sheet(name) => {
                self.sheets.insert(name, value);
            }
        }
    }

    pub fn contains(&self, key: &AliasKey) -> bool {
        match key {
            AliasKey::Default => true,
            AliasKey::Sheet(name) => self.sheets.contains_key(name),
        }
    }

    /// Add `sheet -> sheet` for every sheet without an alias yet.
    pub fn seed_sheets<'a>(&mut self, sheets: impl IntoIterator<Item = &'a String>) {
        for sheet in sheets {
            self.sheets
                .entry(sheet.clone())
                .or_insert_with(|| sheet.clone());
        }
    }
}

/// Descriptor handed to the registry when a source is imported or declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    File {
        path: String,
    },
    RelationalTable {
        table: String,
        connection: String,
        alias: Option<String>,
    },
}

/// One imported or declared data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: SourceId,
    pub kind: SourceKind,
    pub locator: String,
    pub reader_kind: Option<ReaderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<String>,
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub sheet_options: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    pub aliases: AliasMap,
    pub status: SourceStatus,
}

impl DataSource {
    /// Build a fresh record for a descriptor. Never fails: a source whose reader
    /// cannot be inferred is created already `Failed` so it stays visible.
    pub fn from_descriptor(descriptor: SourceDescriptor) -> Self {
        let (kind, locator, reader_kind, connection_info, alias) = match descriptor {
            SourceDescriptor::File { path } => {
                let reader = ReaderKind::from_path(&path);
                let alias = file_base_name(&path);
                (SourceKind::File, path, reader, None, alias)
            }
            SourceDescriptor::RelationalTable {
                table,
                connection,
                alias,
            } => {
                let alias = alias
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| table.clone());
                (
                    SourceKind::RelationalTable,
                    table,
                    Some(ReaderKind::Relational),
                    Some(connection),
                    alias,
                )
            }
        };

        let status = if reader_kind.is_some() {
            SourceStatus::Loading
        } else {
            SourceStatus::failed(UNSUPPORTED_TYPE)
        };

        Self {
            id: SourceId::new(),
            kind,
            locator,
            reader_kind,
            connection_info,
            sheet_name: None,
            sheet_options: Vec::new(),
            columns: Vec::new(),
            aliases: AliasMap::new(alias),
            status,
        }
    }

    /// Alias shown for the source as a whole.
    pub fn alias(&self) -> &str {
        self.aliases.default_alias()
    }

    /// Alias a blank edit falls back to.
    pub fn default_alias_for(&self, key: &AliasKey) -> String {
        match key {
            AliasKey::Sheet(name) => name.clone(),
            AliasKey::Default => match self.kind {
                SourceKind::RelationalTable => self.locator.clone(),
                SourceKind::File => file_base_name(&self.locator),
            },
        }
    }

    /// Connection info, only meaningful for the relational reader.
    pub fn relational_connection(&self) -> Option<&str> {
        match self.reader_kind {
            Some(ReaderKind::Relational) => self.connection_info.as_deref(),
            _ => None,
        }
    }

    /// Selected sheet, only meaningful for readers with sub-resources.
    pub fn selected_sheet(&self) -> Option<&str> {
        match self.reader_kind {
            Some(reader) if reader.supports_sub_resources() => self.sheet_name.as_deref(),
            _ => None,
        }
    }

    /// Table-function call that reads this source, if a reader is known.
    pub fn read_expression(&self) -> Option<String> {
        self.reader_kind.map(|reader| {
            read_expression(
                reader,
                &self.locator,
                self.selected_sheet(),
                self.relational_connection(),
            )
        })
    }

    pub(crate) fn apply(&mut self, patch: SourcePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(sheet_name) = patch.sheet_name {
            self.sheet_name = sheet_name;
        }
        if let Some(sheet_options) = patch.sheet_options {
            self.sheet_options = sheet_options;
        }
        if let Some(columns) = patch.columns {
            self.columns = columns;
        }
        if let Some(aliases) = patch.aliases {
            self.aliases = aliases;
        }
        if let Some(connection_info) = patch.connection_info {
            self.connection_info = connection_info;
        }
    }
}

/// Partial update merged into an existing [`DataSource`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePatch {
    pub status: Option<SourceStatus>,
    pub sheet_name: Option<Option<String>>,
    pub sheet_options: Option<Vec<String>>,
    pub columns: Option<Vec<String>>,
    pub aliases: Option<AliasMap>,
    pub connection_info: Option<Option<String>>,
}

impl SourcePatch {
    pub fn status(status: SourceStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_sheet_name(mut self, sheet_name: Option<String>) -> Self {
        self.sheet_name = Some(sheet_name);
        self
    }

    pub fn with_sheet_options(mut self, sheet_options: Vec<String>) -> Self {
        self.sheet_options = Some(sheet_options);
        self
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn with_aliases(mut self, aliases: AliasMap) -> Self {
        self.aliases = Some(aliases);
        self
    }
}

/// Build `read_xxx('<locator>'[, sheet_name => '..'][, conn => '..'])`.
///
/// The sheet clause is only emitted for the Excel reader and the connection
/// clause only for the relational reader.
pub fn read_expression(
    reader: ReaderKind,
    locator: &str,
    sheet: Option<&str>,
    connection: Option<&str>,
) -> String {
    let mut clauses = Vec::new();
    if let Some(sheet) = sheet.filter(|_| reader == ReaderKind::Excel) {
        clauses.push(format!("sheet_name => '{}'", escape_sql_string(sheet)));
    }
    if let Some(connection) = connection.filter(|_| reader == ReaderKind::Relational) {
        clauses.push(format!("conn => '{}'", escape_sql_string(connection)));
    }

    let clause_text = if clauses.is_empty() {
        String::new()
    } else {
        format!(", {}", clauses.join(", "))
    };
    format!(
        "{}('{}'{})",
        reader.function_name(),
        escape_sql_string(locator),
        clause_text
    )
}

/// Escape a value for use inside a single-quoted SQL literal.
pub fn escape_sql_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "''")
}

/// Last path component, accepting both `/` and `\` separators.
pub fn file_base_name(path: &str) -> String {
    path.rsplit(|c| c == '/' || c == '\\')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(path)
        .to_string()
}
