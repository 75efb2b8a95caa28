//! Notebook documents: raw JSON access for metadata rewrites, and a typed cell
//! model for rendering.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{bail, Context};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// nbformat 3 stored mime data under short keys directly on the output.
const V3_MIME_KEYS: &[(&str, &str)] = &[
    ("text", "text/plain"),
    ("html", "text/html"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpeg", "image/jpeg"),
    ("latex", "text/latex"),
    ("json", "application/json"),
    ("javascript", "application/javascript"),
];

pub(crate) fn read_json(path: &Path) -> anyhow::Result<Value> {
    let fd = File::open(path).with_context(|| format!("while opening {path:?}"))?;
    let reader = BufReader::new(fd);
    serde_json::from_reader(reader).with_context(|| format!("while parsing {path:?}"))
}

/// Writes `doc` the way Jupyter lays notebooks out on disk.
pub(crate) fn write_json(path: &Path, doc: &Value) -> anyhow::Result<()> {
    let fd = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("while writing {path:?}"))?;
    let mut writer = BufWriter::new(fd);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
    doc.serialize(&mut ser)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    Ok(())
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// The top-level metadata mapping of a raw document, created when absent.
pub(crate) fn metadata_mut(doc: &mut Value) -> anyhow::Result<&mut Map<String, Value>> {
    let kind = json_kind(doc);
    let Some(nb) = doc.as_object_mut() else {
        bail!("notebook is {kind}, not a mapping");
    };
    match nb
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(metadata) => Ok(metadata),
        other => bail!("notebook metadata must be a mapping, found {}", json_kind(other)),
    }
}

/// Text stored either as one string or as a list of lines.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub(crate) enum MultilineString {
    Single(String),
    Lines(Vec<String>),
}

impl fmt::Display for MultilineString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(s) => f.write_str(s),
            Self::Lines(lines) => lines.iter().try_for_each(|l| f.write_str(l)),
        }
    }
}

/// Reads a mime-bundle entry as text.
pub(crate) fn mime_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(lines) => lines
            .iter()
            .map(|l| l.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|lines| lines.concat()),
        _ => None,
    }
}

pub(crate) type MimeBundle = Map<String, Value>;

#[derive(Deserialize, Debug)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub(crate) enum Output {
    Stream {
        name: String,
        text: MultilineString,
    },
    ExecuteResult {
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        execution_count: Option<u64>,
    },
    DisplayData {
        #[serde(default)]
        data: MimeBundle,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub(crate) enum Cell {
    Markdown {
        source: MultilineString,
    },
    Code {
        source: MultilineString,
        #[serde(default)]
        execution_count: Option<u64>,
        #[serde(default)]
        outputs: Vec<Output>,
    },
    Raw {
        source: MultilineString,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug)]
pub(crate) struct Notebook {
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Notebook {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        Self::from_value(read_json(path)?).with_context(|| format!("while loading {path:?}"))
    }

    /// Builds the typed model, upgrading older schema versions first.
    pub fn from_value(mut doc: Value) -> anyhow::Result<Self> {
        let version = doc.get("nbformat").and_then(Value::as_u64).unwrap_or(4);
        match version {
            4 => {}
            3 => {
                debug!("upgrading nbformat 3 document");
                upgrade_v3(&mut doc)?;
            }
            v => bail!("unsupported nbformat version {v}"),
        }
        if !doc.is_object() {
            bail!("notebook is {}, not a mapping", json_kind(&doc));
        }
        serde_json::from_value(doc).context("invalid notebook structure")
    }

    pub fn language(&self) -> &str {
        self.metadata
            .get("language_info")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .or_else(|| {
                self.metadata
                    .get("kernelspec")
                    .and_then(|spec| spec.get("language"))
                    .and_then(Value::as_str)
            })
            .unwrap_or("python")
    }
}

fn upgrade_v3(doc: &mut Value) -> anyhow::Result<()> {
    let Some(nb) = doc.as_object_mut() else {
        bail!("notebook is not a mapping");
    };

    let cells: Vec<Value> = match nb.remove("worksheets") {
        Some(Value::Array(worksheets)) => worksheets
            .into_iter()
            .filter_map(|mut ws| ws.get_mut("cells").map(Value::take))
            .flat_map(|cells| match cells {
                Value::Array(cells) => cells,
                _ => vec![],
            })
            .map(upgrade_v3_cell)
            .collect(),
        Some(other) => bail!("worksheets must be a list, found {}", json_kind(&other)),
        None => vec![],
    };

    nb.insert("cells".to_string(), Value::Array(cells));
    nb.insert("nbformat".to_string(), json!(4));
    nb.insert("nbformat_minor".to_string(), json!(0));
    Ok(())
}

fn upgrade_v3_cell(mut cell: Value) -> Value {
    let Some(obj) = cell.as_object_mut() else {
        return cell;
    };
    let cell_type = obj
        .get("cell_type")
        .and_then(Value::as_str)
        .map(str::to_owned);

    match cell_type.as_deref() {
        Some("heading") => {
            let level = obj
                .get("level")
                .and_then(Value::as_u64)
                .unwrap_or(1)
                .clamp(1, 6) as usize;
            let text = obj
                .get("source")
                .and_then(mime_text)
                .unwrap_or_default()
                .replace('\n', " ");
            json!({
                "cell_type": "markdown",
                "metadata": obj.remove("metadata").unwrap_or_else(|| json!({})),
                "source": format!("{} {}", "#".repeat(level), text),
            })
        }
        Some("code") => {
            if let Some(input) = obj.remove("input") {
                obj.insert("source".to_string(), input);
            }
            let count = match obj.remove("prompt_number") {
                Some(n @ Value::Number(_)) => n,
                _ => Value::Null,
            };
            let outputs = match obj.remove("outputs") {
                Some(Value::Array(outputs)) => outputs
                    .into_iter()
                    .map(|o| upgrade_v3_output(o, &count))
                    .collect(),
                _ => vec![],
            };
            obj.remove("language");
            obj.remove("collapsed");
            obj.insert("execution_count".to_string(), count);
            obj.insert("outputs".to_string(), Value::Array(outputs));
            cell
        }
        _ => cell,
    }
}

fn upgrade_v3_output(mut output: Value, execution_count: &Value) -> Value {
    let Some(obj) = output.as_object_mut() else {
        return output;
    };
    let output_type = obj
        .get("output_type")
        .and_then(Value::as_str)
        .map(str::to_owned);

    match output_type.as_deref() {
        Some(kind @ ("pyout" | "display_data")) => {
            let mut data = Map::new();
            for (short, mime) in V3_MIME_KEYS {
                if let Some(value) = obj.remove(*short) {
                    data.insert(mime.to_string(), value);
                }
            }
            obj.insert("data".to_string(), Value::Object(data));
            if kind == "pyout" {
                obj.remove("prompt_number");
                obj.insert("output_type".to_string(), json!("execute_result"));
                obj.insert("execution_count".to_string(), execution_count.clone());
            }
        }
        Some("pyerr") => {
            obj.insert("output_type".to_string(), json!("error"));
        }
        Some("stream") => {
            if let Some(name) = obj.remove("stream") {
                obj.insert("name".to_string(), name);
            }
        }
        _ => {}
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_v4_cells() {
        let nb = Notebook::from_value(json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {"language_info": {"name": "julia"}},
            "cells": [
                {"cell_type": "markdown", "id": "a", "metadata": {}, "source": ["# Hi\n", "there"]},
                {"cell_type": "code", "id": "b", "metadata": {}, "execution_count": 2,
                 "source": "1 + 1",
                 "outputs": [{"output_type": "execute_result", "execution_count": 2,
                              "metadata": {}, "data": {"text/plain": ["2"]}}]},
                {"cell_type": "raw", "metadata": {}, "source": "raw"}
            ]
        }))
        .unwrap();

        assert_eq!(nb.cells.len(), 3);
        assert_eq!(nb.language(), "julia");
        match &nb.cells[0] {
            Cell::Markdown { source } => assert_eq!(source.to_string(), "# Hi\nthere"),
            other => panic!("unexpected cell {other:?}"),
        }
        match &nb.cells[1] {
            Cell::Code {
                execution_count,
                outputs,
                ..
            } => {
                assert_eq!(*execution_count, Some(2));
                assert!(matches!(outputs[0], Output::ExecuteResult { .. }));
            }
            other => panic!("unexpected cell {other:?}"),
        }
    }

    #[test]
    fn upgrades_v3_worksheets() {
        let nb = Notebook::from_value(json!({
            "nbformat": 3,
            "nbformat_minor": 0,
            "metadata": {"name": "old"},
            "worksheets": [{
                "cells": [
                    {"cell_type": "heading", "level": 2, "metadata": {}, "source": ["Intro"]},
                    {"cell_type": "code", "language": "python", "collapsed": false,
                     "input": ["print('x')"], "prompt_number": 7, "metadata": {},
                     "outputs": [
                         {"output_type": "stream", "stream": "stdout", "text": ["x\n"]},
                         {"output_type": "pyout", "prompt_number": 7, "text": ["'x'"], "metadata": {}},
                         {"output_type": "pyerr", "ename": "E", "evalue": "bad", "traceback": []}
                     ]}
                ]
            }]
        }))
        .unwrap();

        assert_eq!(nb.cells.len(), 2);
        match &nb.cells[0] {
            Cell::Markdown { source } => assert_eq!(source.to_string(), "## Intro"),
            other => panic!("unexpected cell {other:?}"),
        }
        let Cell::Code {
            source,
            execution_count,
            outputs,
        } = &nb.cells[1]
        else {
            panic!("expected code cell");
        };
        assert_eq!(source.to_string(), "print('x')");
        assert_eq!(*execution_count, Some(7));
        assert!(matches!(&outputs[0], Output::Stream { name, .. } if name == "stdout"));
        match &outputs[1] {
            Output::ExecuteResult {
                data,
                execution_count,
            } => {
                assert_eq!(*execution_count, Some(7));
                assert_eq!(mime_text(&data["text/plain"]).unwrap(), "'x'");
            }
            other => panic!("unexpected output {other:?}"),
        }
        assert!(matches!(&outputs[2], Output::Error { ename, .. } if ename == "E"));
    }

    #[test]
    fn rejects_ancient_versions() {
        let err = Notebook::from_value(json!({"nbformat": 2, "worksheets": []})).unwrap_err();
        assert!(err.to_string().contains("unsupported nbformat version 2"));
    }

    #[test]
    fn tolerates_unknown_cell_and_output_types() {
        let nb = Notebook::from_value(json!({
            "nbformat": 4,
            "cells": [
                {"cell_type": "mystery", "source": ""},
                {"cell_type": "code", "source": "", "outputs": [{"output_type": "update_display_data"}]}
            ]
        }))
        .unwrap();
        assert!(matches!(nb.cells[0], Cell::Unknown));
        assert_eq!(nb.language(), "python");
    }

    #[test]
    fn metadata_must_be_a_mapping() {
        let mut doc = json!({"metadata": [1, 2]});
        let err = metadata_mut(&mut doc).unwrap_err();
        assert!(err.to_string().contains("must be a mapping"));

        let mut doc = json!({"cells": []});
        metadata_mut(&mut doc).unwrap().insert("k".into(), json!(1));
        assert_eq!(doc["metadata"]["k"], json!(1));
    }

    #[test]
    fn writes_jupyter_layout_and_keeps_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb.ipynb");
        let doc = json!({"cells": [], "metadata": {"z": 1, "a": 2}, "nbformat": 4});
        write_json(&path, &doc).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "{\n \"cells\": [],\n \"metadata\": {\n  \"z\": 1,\n  \"a\": 2\n },\n \"nbformat\": 4\n}\n"
        );
        assert_eq!(read_json(&path).unwrap(), doc);
    }

    #[test]
    fn mime_text_joins_lines() {
        assert_eq!(mime_text(&json!(["a\n", "b"])).unwrap(), "a\nb");
        assert_eq!(mime_text(&json!("x")).unwrap(), "x");
        assert!(mime_text(&json!({"k": 1})).is_none());
    }
}
