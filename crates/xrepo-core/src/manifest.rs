//! Dependency manifest parsing and single-declaration rewriting.
//!
//! The manifest is scanned line by line into [`Declaration`] records, keeping
//! the byte span of every field. A rewrite edits only the spans of the one
//! matched declaration, so every other byte of the document (comments,
//! formatting, unrelated declarations, line endings) survives untouched.
//!
//! Recognised declaration forms inside a dependency table:
//!
//! ```toml
//! [dependencies]
//! upstream = { git = "https://example.com/org/upstream", branch = "main" }
//!
//! [dependencies.upstream]
//! git = "https://example.com/org/upstream"
//! branch = "main"
//! ```

use std::fmt::Write as _;
use std::ops::Range;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::PatchError;
use crate::trigger::OverrideTarget;

/// Keys that pin a git dependency to a revision. Cargo accepts at most one.
const PIN_KEYS: [&str; 3] = ["branch", "tag", "rev"];

const DEPENDENCY_TABLES: [&str; 5] = [
    "dependencies",
    "dev-dependencies",
    "build-dependencies",
    "dev_dependencies",
    "build_dependencies",
];

/// Full text of a dependency manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    text: String,
}

impl ManifestDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read a manifest from disk.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), bytes = text.len(), "Loaded manifest");
        Ok(Self { text })
    }

    /// Write the manifest back to disk, replacing the file.
    pub fn persist(&self, path: &Path) -> crate::Result<()> {
        std::fs::write(path, &self.text)?;
        debug!(path = %path.display(), bytes = self.text.len(), "Persisted manifest");
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// SHA-256 of the manifest text, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Parse every dependency declaration in the document.
    pub fn declarations(&self) -> Vec<Declaration> {
        parse_declarations(&self.text)
    }
}

/// How a declaration is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationForm {
    /// `name = { key = value, ... }`
    Inline,
    /// `[<table>.name]` followed by `key = value` lines.
    Table,
    /// `name = "1.0"` or any other non-table value.
    Simple,
    /// `name.key = value`
    Dotted,
    /// An inline table we could not read.
    Malformed(String),
}

/// One `key = value` pair of a declaration, with absolute byte spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: String,
    pub raw_value: String,
    pub line: usize,
    key_span: Range<usize>,
    value_span: Range<usize>,
    /// Offset just past the line holding this field, including its line ending.
    line_end: usize,
    indent: String,
    line_ending: LineEnding,
}

impl Field {
    /// The value as a string, when it is a single-line TOML string.
    pub fn string_value(&self) -> Option<String> {
        decode_string(&self.raw_value)
    }
}

/// A dependency declaration located in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    /// Key path of the containing dependency table, e.g. `["workspace", "dependencies"]`.
    pub table: Vec<String>,
    /// 1-based line of the key (inline/simple/dotted) or of the table header.
    pub line: usize,
    pub form: DeclarationForm,
    pub fields: Vec<Field>,
}

impl Declaration {
    pub fn table_name(&self) -> String {
        self.table.join(".")
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// Line-level summary of what a patch changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PatchSummary {
    /// 1-based line where the changed hunk starts.
    pub first_line: usize,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

impl PatchSummary {
    /// Compute the single changed hunk between two texts.
    pub fn between(before: &str, after: &str) -> Self {
        let old: Vec<&str> = before.split_inclusive('\n').collect();
        let new: Vec<&str> = after.split_inclusive('\n').collect();

        let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
        let suffix = old[prefix..]
            .iter()
            .rev()
            .zip(new[prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .count();

        let strip = |l: &&str| l.trim_end_matches(&['\n', '\r'][..]).to_string();
        Self {
            first_line: prefix + 1,
            removed: old[prefix..old.len() - suffix].iter().map(strip).collect(),
            added: new[prefix..new.len() - suffix].iter().map(strip).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    /// Render as a small unified-diff style hunk.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "(no changes)\n".to_string();
        }
        let mut out = format!("@@ line {} @@\n", self.first_line);
        for line in &self.removed {
            let _ = writeln!(out, "-{line}");
        }
        for line in &self.added {
            let _ = writeln!(out, "+{line}");
        }
        out
    }
}

/// Result of a successful patch.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub document: ManifestDocument,
    pub declaration: Declaration,
    pub summary: PatchSummary,
}

/// Rewrites the source of one named dependency.
#[derive(Debug, Clone)]
pub struct ManifestPatcher {
    dependency: String,
    table: Option<String>,
}

impl ManifestPatcher {
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            table: None,
        }
    }

    /// Only consider declarations in the given table (e.g. `workspace.dependencies`).
    pub fn in_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Locate the single matching declaration.
    pub fn locate(&self, document: &ManifestDocument) -> Result<Declaration, PatchError> {
        let mut matches: Vec<Declaration> = document
            .declarations()
            .into_iter()
            .filter(|d| d.name == self.dependency)
            .filter(|d| self.table.as_deref().map_or(true, |t| d.table_name() == t))
            .collect();

        match matches.len() {
            0 => Err(PatchError::NotFound {
                name: self.dependency.clone(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(PatchError::Ambiguous {
                name: self.dependency.clone(),
                lines: matches.iter().map(|d| d.line).collect(),
            }),
        }
    }

    /// Point the dependency at `target`, returning the new document.
    ///
    /// `document` is never modified; on error nothing is applied.
    pub fn patch(
        &self,
        document: &ManifestDocument,
        target: &OverrideTarget,
    ) -> Result<PatchOutcome, PatchError> {
        let declaration = self.locate(document)?;
        let edits = plan_edits(&declaration, target, line_ending_of(&document.text))?;

        let mut text = document.text.clone();
        for edit in edits.iter().rev() {
            text.replace_range(edit.span.clone(), &edit.replacement);
        }

        verify_read_back(&document.text, &text, &declaration, target)?;

        let summary = PatchSummary::between(&document.text, &text);
        info!(
            dependency = %declaration.name,
            table = %declaration.table_name(),
            line = declaration.line,
            changed = !summary.is_empty(),
            "Patched dependency declaration"
        );

        Ok(PatchOutcome {
            document: ManifestDocument { text },
            declaration,
            summary,
        })
    }
}

/// Rewrite `dependency_name` in `document` to point at `target`.
pub fn patch(
    document: &ManifestDocument,
    dependency_name: &str,
    target: &OverrideTarget,
) -> Result<ManifestDocument, PatchError> {
    ManifestPatcher::new(dependency_name)
        .patch(document, target)
        .map(|outcome| outcome.document)
}

#[derive(Debug)]
struct Edit {
    span: Range<usize>,
    replacement: String,
}

fn plan_edits(
    decl: &Declaration,
    target: &OverrideTarget,
    document_ending: LineEnding,
) -> Result<Vec<Edit>, PatchError> {
    let unsupported = |reason: &str| PatchError::UnsupportedForm {
        name: decl.name.clone(),
        line: decl.line,
        reason: reason.to_string(),
    };

    match &decl.form {
        DeclarationForm::Inline | DeclarationForm::Table => {}
        DeclarationForm::Simple => {
            return Err(PatchError::NotGitDependency {
                name: decl.name.clone(),
                line: decl.line,
            })
        }
        DeclarationForm::Dotted => return Err(unsupported("dotted-key declaration")),
        DeclarationForm::Malformed(reason) => return Err(unsupported(reason)),
    }

    let git = decl.field("git").ok_or_else(|| PatchError::NotGitDependency {
        name: decl.name.clone(),
        line: decl.line,
    })?;
    if git.string_value().is_none() {
        return Err(unsupported("`git` is not a single-line string"));
    }

    let pins: Vec<&Field> = decl
        .fields
        .iter()
        .filter(|f| PIN_KEYS.contains(&f.key.as_str()))
        .collect();
    if pins.len() > 1 {
        return Err(unsupported("more than one of `branch`, `tag` and `rev`"));
    }

    let branch = toml_basic_string(&target.branch_name);
    let mut edits = vec![Edit {
        span: git.value_span.clone(),
        replacement: toml_basic_string(&target.repository_url),
    }];

    match pins.first() {
        Some(pin) => {
            if pin.string_value().is_none() {
                return Err(unsupported("pin value is not a single-line string"));
            }
            if pin.key != "branch" {
                edits.push(Edit {
                    span: pin.key_span.clone(),
                    replacement: "branch".to_string(),
                });
            }
            edits.push(Edit {
                span: pin.value_span.clone(),
                replacement: branch,
            });
        }
        None if decl.form == DeclarationForm::Inline => {
            let at = git.value_span.end;
            edits.push(Edit {
                span: at..at,
                replacement: format!(", branch = {branch}"),
            });
        }
        None => {
            let at = git.line_end;
            let replacement = match git.line_ending {
                LineEnding::None => format!(
                    "{}{}branch = {branch}",
                    document_ending.as_str(),
                    git.indent
                ),
                ending => format!("{}branch = {branch}{}", git.indent, ending.as_str()),
            };
            edits.push(Edit {
                span: at..at,
                replacement,
            });
        }
    }

    edits.sort_by_key(|e| e.span.start);
    Ok(edits)
}

/// Re-read the patched text as TOML and check the declaration now carries the target.
///
/// Skipped when the original text is not strict TOML.
fn verify_read_back(
    original: &str,
    patched: &str,
    decl: &Declaration,
    target: &OverrideTarget,
) -> Result<(), PatchError> {
    if toml::from_str::<toml::Table>(original).is_err() {
        debug!("Original manifest is not strict TOML; skipping read-back check");
        return Ok(());
    }

    let root: toml::Table = toml::from_str(patched)
        .map_err(|e| PatchError::Verification(format!("patched manifest is not valid TOML: {e}")))?;

    let mut node = &root;
    for segment in &decl.table {
        node = node
            .get(segment)
            .and_then(toml::Value::as_table)
            .ok_or_else(|| {
                PatchError::Verification(format!("table `{}` disappeared", decl.table_name()))
            })?;
    }
    let entry = node
        .get(&decl.name)
        .and_then(toml::Value::as_table)
        .ok_or_else(|| {
            PatchError::Verification(format!("declaration `{}` disappeared", decl.name))
        })?;

    let git = entry.get("git").and_then(toml::Value::as_str);
    let branch = entry.get("branch").and_then(toml::Value::as_str);
    if git != Some(target.repository_url.as_str()) || branch != Some(target.branch_name.as_str()) {
        return Err(PatchError::Verification(format!(
            "`{}` reads back as git={git:?} branch={branch:?}",
            decl.name
        )));
    }
    Ok(())
}

// ── scanning ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnding {
    None,
    Lf,
    CrLf,
}

impl LineEnding {
    fn as_str(&self) -> &'static str {
        match self {
            LineEnding::None => "",
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// The line ending most lines of `text` use; `Lf` when there are none.
fn line_ending_of(text: &str) -> LineEnding {
    let lines = text.matches('\n').count();
    let crlf = text.matches("\r\n").count();
    if crlf > 0 && crlf * 2 >= lines {
        LineEnding::CrLf
    } else {
        LineEnding::Lf
    }
}

/// Lexical state carried between lines: open multi-line strings and
/// unbalanced brackets (multi-line arrays).
#[derive(Debug, Default, Clone, Copy)]
struct ScanState {
    multiline: Option<u8>,
    depth: usize,
}

impl ScanState {
    fn at_top_level(&self) -> bool {
        self.multiline.is_none() && self.depth == 0
    }
}

enum Context {
    Other,
    DependencyTable(Vec<String>),
    TableDeclaration(usize),
}

fn parse_declarations(text: &str) -> Vec<Declaration> {
    let mut decls: Vec<Declaration> = Vec::new();
    let mut ctx = Context::Other;
    let mut state = ScanState::default();
    let mut offset = 0;

    for (idx, raw_line) in text.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        let line_start = offset;
        offset += raw_line.len();

        if !state.at_top_level() {
            scan(raw_line, 0, &mut state);
            continue;
        }

        let (content, ending) = split_line_ending(raw_line);
        let bytes = content.as_bytes();
        let body = skip_ws(bytes, 0);

        match bytes.get(body) {
            None | Some(b'#') => continue,
            Some(b'[') => {
                ctx = parse_header(content, body, line_no, &mut decls);
                state = ScanState::default();
                continue;
            }
            _ => {}
        }

        let Some((segments, key_end)) = parse_key_path(content, body) else {
            scan(raw_line, body, &mut state);
            continue;
        };
        let eq = skip_ws(bytes, key_end);
        if bytes.get(eq) != Some(&b'=') {
            scan(raw_line, body, &mut state);
            continue;
        }
        let value_start = skip_ws(bytes, eq + 1);

        match &ctx {
            Context::DependencyTable(table) => {
                let name = segments[0].clone();
                if segments.len() > 1 {
                    let seen = decls.iter().any(|d| {
                        d.form == DeclarationForm::Dotted && d.name == name && &d.table == table
                    });
                    if !seen {
                        decls.push(Declaration {
                            name,
                            table: table.clone(),
                            line: line_no,
                            form: DeclarationForm::Dotted,
                            fields: Vec::new(),
                        });
                    }
                } else if bytes.get(value_start) == Some(&b'{') {
                    let (form, fields) =
                        match parse_inline_table(&text[line_start..], value_start, line_start, line_no) {
                            Ok(fields) => (DeclarationForm::Inline, fields),
                            Err(reason) => (DeclarationForm::Malformed(reason), Vec::new()),
                        };
                    decls.push(Declaration {
                        name,
                        table: table.clone(),
                        line: line_no,
                        form,
                        fields,
                    });
                } else {
                    decls.push(Declaration {
                        name,
                        table: table.clone(),
                        line: line_no,
                        form: DeclarationForm::Simple,
                        fields: Vec::new(),
                    });
                }
            }
            Context::TableDeclaration(index) if segments.len() == 1 => {
                let value_end = plain_value_end(bytes, value_start);
                decls[*index].fields.push(Field {
                    key: segments[0].clone(),
                    raw_value: content[value_start..value_end].to_string(),
                    line: line_no,
                    key_span: line_start + body..line_start + key_end,
                    value_span: line_start + value_start..line_start + value_end,
                    line_end: line_start + raw_line.len(),
                    indent: content[..body].to_string(),
                    line_ending: ending,
                });
            }
            _ => {}
        }

        scan(raw_line, value_start, &mut state);
    }

    decls
}

fn split_line_ending(line: &str) -> (&str, LineEnding) {
    if let Some(rest) = line.strip_suffix("\r\n") {
        (rest, LineEnding::CrLf)
    } else if let Some(rest) = line.strip_suffix('\n') {
        (rest, LineEnding::Lf)
    } else {
        (line, LineEnding::None)
    }
}

/// Interpret a `[...]` header line and return the new context.
fn parse_header(
    content: &str,
    open: usize,
    line_no: usize,
    decls: &mut Vec<Declaration>,
) -> Context {
    let bytes = content.as_bytes();
    if bytes.get(open + 1) == Some(&b'[') {
        return Context::Other;
    }
    let Some((path, end)) = parse_key_path(content, open + 1) else {
        return Context::Other;
    };
    if bytes.get(skip_ws(bytes, end)) != Some(&b']') {
        return Context::Other;
    }

    if is_dependency_table(&path) {
        return Context::DependencyTable(path);
    }
    if let Some((name, table)) = path.split_last() {
        if is_dependency_table(table) {
            decls.push(Declaration {
                name: name.clone(),
                table: table.to_vec(),
                line: line_no,
                form: DeclarationForm::Table,
                fields: Vec::new(),
            });
            return Context::TableDeclaration(decls.len() - 1);
        }
    }
    Context::Other
}

fn is_dependency_table(path: &[String]) -> bool {
    let is_deps = |s: &String| DEPENDENCY_TABLES.contains(&s.as_str());
    match path {
        [single] => is_deps(single),
        [first, second] if first == "workspace" => second == "dependencies",
        [first, _source] if first == "patch" => true,
        [first, _cfg, last] if first == "target" => is_deps(last),
        _ => false,
    }
}

/// Parse `{ key = value, ... }` starting at the `{` at `open`.
///
/// `rest` runs from the start of the declaring line to the end of the
/// document. Between fields the table must stay on one line, but a value may
/// continue across lines inside an array or a multi-line string.
fn parse_inline_table(
    rest: &str,
    open: usize,
    base: usize,
    line_no: usize,
) -> Result<Vec<Field>, String> {
    let bytes = rest.as_bytes();
    let mut fields = Vec::new();
    let mut i = open + 1;

    loop {
        i = skip_ws(bytes, i);
        match bytes.get(i) {
            None | Some(b'\n' | b'\r') => {
                return Err(format!(
                    "inline table is not closed at {}",
                    position(rest, i, line_no)
                ))
            }
            Some(b'}') => return Ok(fields),
            _ => {}
        }

        let key_start = i;
        let (segments, key_end) = parse_key_path(rest, i)
            .ok_or_else(|| format!("unreadable key at {}", position(rest, i, line_no)))?;
        let eq = skip_ws(bytes, key_end);
        if bytes.get(eq) != Some(&b'=') {
            return Err(format!("expected `=` at {}", position(rest, eq, line_no)));
        }

        let value_start = skip_ws(bytes, eq + 1);
        let stop = inline_value_end(bytes, value_start)
            .map_err(|(reason, at)| format!("{reason} at {}", position(rest, at, line_no)))?;
        let value_end = trim_end_ws(bytes, value_start, stop);
        let line_end = bytes[value_end..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |pos| value_end + pos + 1);

        fields.push(Field {
            key: segments.join("."),
            raw_value: rest[value_start..value_end].to_string(),
            line: line_no + newlines(&bytes[..key_start]),
            key_span: base + key_start..base + key_end,
            value_span: base + value_start..base + value_end,
            line_end: base + line_end,
            indent: String::new(),
            line_ending: LineEnding::None,
        });

        i = stop;
        match bytes.get(i) {
            Some(b',') => i += 1,
            Some(b'}') => return Ok(fields),
            _ => return Err(format!("unexpected input at {}", position(rest, i, line_no))),
        }
    }
}

fn newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b == b'\n').count()
}

/// `line L, column C` of byte `at` in text whose first line is `first_line`.
fn position(text: &str, at: usize, first_line: usize) -> String {
    let before = &text.as_bytes()[..at.min(text.len())];
    let column = before.iter().rev().take_while(|&&b| b != b'\n').count() + 1;
    format!("line {}, column {column}", first_line + newlines(before))
}

/// Index of the `,` or `}` that ends an inline-table value.
///
/// Errors carry the offending offset.
fn inline_value_end(bytes: &[u8], start: usize) -> Result<usize, (&'static str, usize)> {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                let end = if bytes[i..].starts_with(&[quote, quote, quote]) {
                    skip_multiline_string(bytes, i)
                } else {
                    skip_string(bytes, i)
                };
                i = end.ok_or(("unterminated string", i))?;
                continue;
            }
            b'[' | b'{' => depth += 1,
            b']' if depth > 0 => depth -= 1,
            b'}' if depth > 0 => depth -= 1,
            b'}' | b',' if depth == 0 => return Ok(i),
            b']' => return Err(("unbalanced `]`", i)),
            b'#' if depth > 0 => {
                // comment inside a multi-line array
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'#' => return Err(("comment inside inline table", i)),
            b'\n' | b'\r' if depth == 0 => {
                return Err(("line break outside a value", i))
            }
            _ => {}
        }
        i += 1;
    }
    Err(("inline table is not closed", bytes.len()))
}

/// Index just past the `"""` or `'''` string opening at `start`.
fn skip_multiline_string(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 3;
    while i < bytes.len() {
        if quote == b'"' && bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i..].starts_with(&[quote, quote, quote]) {
            i += 3;
            // A closing delimiter may be followed by up to two quote characters.
            let mut extra = 0;
            while extra < 2 && i < bytes.len() && bytes[i] == quote {
                i += 1;
                extra += 1;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// End of a value on a `key = value` line, excluding a trailing comment.
fn plain_value_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => match skip_string(bytes, i) {
                Some(next) => {
                    i = next;
                    continue;
                }
                None => return trim_end_ws(bytes, start, bytes.len()),
            },
            b'#' => break,
            _ => {}
        }
        i += 1;
    }
    trim_end_ws(bytes, start, i)
}

/// Advance `state` across `line` starting at `from`.
fn scan(line: &str, from: usize, state: &mut ScanState) {
    let bytes = line.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if let Some(quote) = state.multiline {
            if quote == b'"' && bytes[i] == b'\\' {
                i += 2;
                continue;
            }
            if bytes[i..].starts_with(&[quote, quote, quote]) {
                state.multiline = None;
                i += 3;
                // A closing delimiter may be followed by up to two quote characters.
                while i < bytes.len() && bytes[i] == quote {
                    i += 1;
                }
                continue;
            }
            i += 1;
            continue;
        }

        match bytes[i] {
            b'#' => return,
            quote @ (b'"' | b'\'') => {
                if bytes[i..].starts_with(&[quote, quote, quote]) {
                    state.multiline = Some(quote);
                    i += 3;
                } else {
                    i = skip_string(bytes, i).unwrap_or(bytes.len());
                }
                continue;
            }
            b'[' | b'{' => state.depth += 1,
            b']' | b'}' => state.depth = state.depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
}

/// Index just past the single-line string opening at `start`.
fn skip_string(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote == b'"' => i += 2,
            b'\n' | b'\r' => return None,
            b if b == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Parse a (possibly dotted, possibly quoted) key starting at `start`.
fn parse_key_path(content: &str, start: usize) -> Option<(Vec<String>, usize)> {
    let bytes = content.as_bytes();
    let mut segments = Vec::new();
    let mut i = start;

    loop {
        i = skip_ws(bytes, i);
        match bytes.get(i) {
            Some(&quote) if quote == b'"' || quote == b'\'' => {
                let end = skip_string(bytes, i)?;
                let inner = &content[i + 1..end - 1];
                segments.push(if quote == b'"' {
                    unescape_basic(inner)
                } else {
                    inner.to_string()
                });
                i = end;
            }
            Some(b) if is_bare_key_byte(*b) => {
                let seg_start = i;
                while i < bytes.len() && is_bare_key_byte(bytes[i]) {
                    i += 1;
                }
                segments.push(content[seg_start..i].to_string());
            }
            _ => return None,
        }

        let next = skip_ws(bytes, i);
        if bytes.get(next) == Some(&b'.') {
            i = next + 1;
        } else {
            return Some((segments, i));
        }
    }
}

fn is_bare_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    i
}

fn trim_end_ws(bytes: &[u8], start: usize, mut end: usize) -> usize {
    while end > start && (bytes[end - 1] == b' ' || bytes[end - 1] == b'\t') {
        end -= 1;
    }
    end
}

/// Decode a single-line TOML string literal.
fn decode_string(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let quote = *bytes.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    if bytes.starts_with(&[quote, quote, quote]) {
        return None;
    }
    if skip_string(bytes, 0)? != bytes.len() {
        return None;
    }
    let inner = &raw[1..raw.len() - 1];
    Some(if quote == b'"' {
        unescape_basic(inner)
    } else {
        inner.to_string()
    })
}

fn unescape_basic(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Some(decoded) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(decoded);
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Encode `value` as a TOML basic string.
fn toml_basic_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> OverrideTarget {
        OverrideTarget {
            repository_url: "https://example.com/alice/upstream".to_string(),
            branch_name: "feature-x".to_string(),
        }
    }

    #[test]
    fn test_inline_declaration_rewrites_git_and_branch() {
        let doc = ManifestDocument::new(
            "[dependencies]\nupstream = { git = \"https://example.com/org/upstream\", branch = \"main\" }\n",
        );
        let out = patch(&doc, "upstream", &target()).unwrap();
        assert_eq!(
            out.as_str(),
            "[dependencies]\nupstream = { git = \"https://example.com/alice/upstream\", branch = \"feature-x\" }\n"
        );
    }

    #[test]
    fn test_inline_keeps_other_fields_and_comment() {
        let doc = ManifestDocument::new(
            "[dependencies]\nupstream = { git = 'https://example.com/org/upstream', default-features = false, features = [\"std\", \"x\"], tag = \"v1\" } # pinned\n",
        );
        let out = patch(&doc, "upstream", &target()).unwrap();
        assert_eq!(
            out.as_str(),
            "[dependencies]\nupstream = { git = \"https://example.com/alice/upstream\", default-features = false, features = [\"std\", \"x\"], branch = \"feature-x\" } # pinned\n"
        );
    }

    #[test]
    fn test_inline_without_pin_inserts_branch_after_git() {
        let doc = ManifestDocument::new(
            "[dependencies]\nupstream = { git = \"https://example.com/org/upstream\", features = [\"a\"] }\n",
        );
        let out = patch(&doc, "upstream", &target()).unwrap();
        assert!(out.as_str().contains(
            "{ git = \"https://example.com/alice/upstream\", branch = \"feature-x\", features = [\"a\"] }"
        ));
    }

    #[test]
    fn test_table_form_declaration() {
        let doc = ManifestDocument::new(
            "[package]\nname = \"demo\"\n\n[dependencies.upstream]\ngit = \"https://example.com/org/upstream\"  # source\nrev = \"abc123\"\nfeatures = [\n  \"std\",\n]\n",
        );
        let out = patch(&doc, "upstream", &target()).unwrap();
        assert_eq!(
            out.as_str(),
            "[package]\nname = \"demo\"\n\n[dependencies.upstream]\ngit = \"https://example.com/alice/upstream\"  # source\nbranch = \"feature-x\"\nfeatures = [\n  \"std\",\n]\n"
        );
    }

    #[test]
    fn test_table_form_without_pin_inserts_line() {
        let doc = ManifestDocument::new(
            "[dependencies.upstream]\r\n  git = \"https://example.com/org/upstream\"\r\n  optional = true\r\n",
        );
        let out = patch(&doc, "upstream", &target()).unwrap();
        assert_eq!(
            out.as_str(),
            "[dependencies.upstream]\r\n  git = \"https://example.com/alice/upstream\"\r\n  branch = \"feature-x\"\r\n  optional = true\r\n"
        );
    }

    #[test]
    fn test_table_form_git_on_last_line_without_newline() {
        let doc = ManifestDocument::new("[dependencies.upstream]\ngit = \"https://example.com/org/upstream\"");
        let out = patch(&doc, "upstream", &target()).unwrap();
        assert_eq!(
            out.as_str(),
            "[dependencies.upstream]\ngit = \"https://example.com/alice/upstream\"\nbranch = \"feature-x\""
        );
    }

    #[test]
    fn test_crlf_table_form_git_on_last_line_without_newline() {
        let doc = ManifestDocument::new(
            "[dependencies.upstream]\r\n  git = \"https://example.com/org/upstream\"",
        );
        let out = patch(&doc, "upstream", &target()).unwrap();
        assert_eq!(
            out.as_str(),
            "[dependencies.upstream]\r\n  git = \"https://example.com/alice/upstream\"\r\n  branch = \"feature-x\""
        );
    }

    #[test]
    fn test_inline_table_with_multiline_array() {
        let doc = ManifestDocument::new(concat!(
            "[dependencies]\n",
            "upstream = { git = \"https://example.com/org/upstream\", features = [\n",
            "  \"a\", # default on\n",
            "  \"b\",\n",
            "], branch = \"main\" }\n",
            "serde = \"1\"\n",
        ));
        let outcome = ManifestPatcher::new("upstream").patch(&doc, &target()).unwrap();
        assert_eq!(outcome.declaration.form, DeclarationForm::Inline);
        assert_eq!(outcome.declaration.field("branch").unwrap().line, 5);
        assert_eq!(
            outcome.document.as_str(),
            concat!(
                "[dependencies]\n",
                "upstream = { git = \"https://example.com/alice/upstream\", features = [\n",
                "  \"a\", # default on\n",
                "  \"b\",\n",
                "], branch = \"feature-x\" }\n",
                "serde = \"1\"\n",
            )
        );
    }

    #[test]
    fn test_inline_table_broken_across_lines_is_malformed() {
        let decls = ManifestDocument::new(concat!(
            "[dependencies]\n",
            "upstream = { git = \"https://example.com/org/upstream\",\n",
            "  branch = \"main\" }\n",
        ))
        .declarations();
        assert_eq!(decls.len(), 1);
        assert!(matches!(&decls[0].form, DeclarationForm::Malformed(reason) if reason.contains("line 2")));
    }

    #[test]
    fn test_similar_names_and_comments_do_not_match() {
        let doc = ManifestDocument::new(concat!(
            "# upstream = { git = \"https://example.com/old\", branch = \"x\" }\n",
            "[package]\n",
            "description = \"\"\"\n",
            "upstream = { git = \"https://example.com/inside-string\" }\n",
            "\"\"\"\n",
            "[dependencies]\n",
            "upstream-extra = { git = \"https://example.com/org/extra\", branch = \"main\" }\n",
            "upstream = { git = \"https://example.com/org/upstream\", branch = \"main\" }\n",
        ));
        let outcome = ManifestPatcher::new("upstream").patch(&doc, &target()).unwrap();
        assert_eq!(outcome.declaration.line, 8);
        assert_eq!(outcome.summary.first_line, 8);
        assert_eq!(outcome.summary.removed.len(), 1);
        assert!(outcome
            .document
            .as_str()
            .contains("upstream-extra = { git = \"https://example.com/org/extra\", branch = \"main\" }"));
    }

    #[test]
    fn test_multiline_array_contents_are_not_keys() {
        let decls = ManifestDocument::new(concat!(
            "[dependencies]\n",
            "other = { version = \"1\", features = [\"a\"] }\n",
            "[features]\n",
            "default = [\n",
            "  \"upstream\",\n",
            "]\n",
        ))
        .declarations();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "other");
    }

    #[test]
    fn test_missing_declaration_is_not_found() {
        let doc = ManifestDocument::new("[dependencies]\nserde = \"1\"\n");
        let before = doc.clone();
        let err = patch(&doc, "upstream", &target()).unwrap_err();
        assert_eq!(
            err,
            PatchError::NotFound {
                name: "upstream".to_string()
            }
        );
        assert_eq!(doc, before);
    }

    #[test]
    fn test_duplicate_declarations_are_ambiguous() {
        let doc = ManifestDocument::new(concat!(
            "[dependencies]\n",
            "upstream = { git = \"https://example.com/org/upstream\", branch = \"main\" }\n",
            "[dev-dependencies]\n",
            "upstream = { git = \"https://example.com/org/upstream\", branch = \"main\" }\n",
        ));
        let err = patch(&doc, "upstream", &target()).unwrap_err();
        assert_eq!(
            err,
            PatchError::Ambiguous {
                name: "upstream".to_string(),
                lines: vec![2, 4]
            }
        );

        let narrowed = ManifestPatcher::new("upstream")
            .in_table("dev-dependencies")
            .patch(&doc, &target())
            .unwrap();
        assert_eq!(narrowed.declaration.line, 4);
        assert!(narrowed
            .document
            .as_str()
            .starts_with("[dependencies]\nupstream = { git = \"https://example.com/org/upstream\""));
    }

    #[test]
    fn test_version_dependency_is_not_git() {
        let doc = ManifestDocument::new("[dependencies]\nupstream = \"1.2\"\n");
        let err = patch(&doc, "upstream", &target()).unwrap_err();
        assert!(matches!(err, PatchError::NotGitDependency { line: 2, .. }));
    }

    #[test]
    fn test_dotted_declaration_is_unsupported() {
        let doc = ManifestDocument::new(
            "[dependencies]\nupstream.git = \"https://example.com/org/upstream\"\nupstream.branch = \"main\"\n",
        );
        let err = patch(&doc, "upstream", &target()).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedForm { line: 2, .. }));
    }

    #[test]
    fn test_multiple_pins_are_rejected() {
        let doc = ManifestDocument::new(
            "[dependencies]\nupstream = { git = \"https://example.com/o/u\", branch = \"a\", rev = \"b\" }\n",
        );
        let err = patch(&doc, "upstream", &target()).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedForm { .. }));
    }

    #[test]
    fn test_workspace_and_target_tables() {
        let doc = ManifestDocument::new(concat!(
            "[workspace.dependencies]\n",
            "upstream = { git = \"https://example.com/org/upstream\", branch = \"main\" }\n",
            "[target.'cfg(unix)'.dependencies]\n",
            "libc = \"0.2\"\n",
        ));
        let decls = doc.declarations();
        assert_eq!(decls[0].table_name(), "workspace.dependencies");
        assert_eq!(decls[1].table_name(), "target.cfg(unix).dependencies");
        assert!(patch(&doc, "upstream", &target()).is_ok());
    }

    #[test]
    fn test_values_are_escaped() {
        let odd = OverrideTarget {
            repository_url: "https://example.com/a/\"quoted\"".to_string(),
            branch_name: "main".to_string(),
        };
        let doc = ManifestDocument::new(
            "[dependencies]\nupstream = { git = \"https://example.com/o/u\", branch = \"x\" }\n",
        );
        let out = patch(&doc, "upstream", &odd).unwrap();
        assert!(out
            .as_str()
            .contains(r#"git = "https://example.com/a/\"quoted\"""#));
    }

    #[test]
    fn test_summary_render() {
        let summary = PatchSummary::between("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(summary.first_line, 2);
        assert_eq!(summary.render(), "@@ line 2 @@\n-b\n+B\n");
        assert!(PatchSummary::between("same\n", "same\n").is_empty());
    }

    #[test]
    fn test_digest_is_stable() {
        let doc = ManifestDocument::new("[dependencies]\n");
        assert_eq!(doc.digest(), doc.clone().digest());
        assert_eq!(doc.digest().len(), 64);
    }
}
