//! JSONL task and result files.
//!
//! Three line formats, each one JSON object per line keyed by the task id:
//!
//! - tasks:   `{"7": {"instruction": "...", "input": "..."}}`
//! - results: `{"7": "generated text"}`, or `{"7": null}` when every attempt
//!   failed
//! - merged:  `{"7": {"instruction": "...", "input": "...", "output": ...}}`
//!
//! Results go through [`JsonlSink`], which appends one line per finished task
//! and scrubs null records when it opens an existing file so failed ids run
//! again. Rewrites use a temp file + rename so a crash mid-write cannot
//! corrupt the results recorded so far.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::{Error, Result};
use completion::Prompt;
use dispatch::ResultSink;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One line of a merged file: a prompt joined with its generated output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedRecord {
    pub instruction: String,
    pub input: String,
    pub output: Option<String>,
}

/// Read a task file into id order. A duplicate id keeps the last record.
pub async fn read_tasks(path: &Path) -> Result<BTreeMap<u64, Prompt>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut tasks = BTreeMap::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (id, prompt) = parse_line::<Prompt>(line, index + 1)?;
        tasks.insert(id, prompt);
    }
    Ok(tasks)
}

/// Read a result file. A duplicate id keeps the last record.
pub async fn read_results(path: &Path) -> Result<BTreeMap<u64, Option<String>>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut results = BTreeMap::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (id, text) = parse_line::<Option<String>>(line, index + 1)?;
        results.insert(id, text);
    }
    Ok(results)
}

/// Rewrite a result file in id order, one record per id.
///
/// Null records survive compaction; [`JsonlSink::open`] drops them on the
/// next run instead, so the file stays an honest account of this run.
pub async fn compact(path: &Path) -> Result<()> {
    let results = read_results(path).await?;
    write_records(path, &results).await?;
    debug!(path = %path.display(), records = results.len(), "compacted result file");
    Ok(())
}

/// Count null records, the tasks that burned every attempt.
pub async fn count_nulls(path: &Path) -> Result<usize> {
    let results = read_results(path).await?;
    Ok(results.values().filter(|text| text.is_none()).count())
}

/// Join a task file with its result file by id, writing `merged` in id order.
///
/// A task with no recorded output merges with `output: null`. Results whose
/// id is missing from the task file are dropped.
pub async fn merge(input: &Path, output: &Path, merged: &Path) -> Result<usize> {
    let tasks = read_tasks(input).await?;
    let results = read_results(output).await?;

    let orphans = results.keys().filter(|id| !tasks.contains_key(id)).count();
    if orphans > 0 {
        warn!(orphans, "result ids with no matching task were dropped");
    }

    let records: BTreeMap<u64, MergedRecord> = tasks
        .into_iter()
        .map(|(id, prompt)| {
            let output = results.get(&id).cloned().flatten();
            let record = MergedRecord {
                instruction: prompt.instruction,
                input: prompt.input,
                output,
            };
            (id, record)
        })
        .collect();

    write_records(merged, &records).await?;
    Ok(records.len())
}

/// Append-order result file that doubles as the resume ledger.
pub struct JsonlSink {
    file: Mutex<File>,
    recorded: BTreeSet<u64>,
}

impl JsonlSink {
    /// Open `path` for appending.
    ///
    /// Null records left by a previous run are scrubbed first so those ids
    /// run again; ids that kept a completion are reported via
    /// `existing_ids` and skipped by the dispatcher.
    pub async fn open(path: &Path) -> Result<Self> {
        let mut recorded = BTreeSet::new();
        if path.exists() {
            let results = read_results(path).await?;
            let nulls = results.values().filter(|text| text.is_none()).count();
            let kept: BTreeMap<u64, Option<String>> = results
                .into_iter()
                .filter(|(_, text)| text.is_some())
                .collect();
            if nulls > 0 {
                info!(path = %path.display(), dropped = nulls, "scrubbed null records from a previous run");
                write_records(path, &kept).await?;
            }
            recorded = kept.keys().copied().collect();
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;

        Ok(Self {
            file: Mutex::new(file),
            recorded,
        })
    }

    /// Ids holding a non-null completion when the sink was opened.
    pub fn completed(&self) -> &BTreeSet<u64> {
        &self.recorded
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

impl ResultSink for JsonlSink {
    fn existing_ids<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeSet<u64>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.recorded.clone()) })
    }

    fn append<'a>(
        &'a self,
        id: u64,
        text: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let line = render_line(id, &text)?;
            self.write_line(&line).await
        })
    }
}

fn parse_line<T: DeserializeOwned>(line: &str, lineno: usize) -> Result<(u64, T)> {
    let record: HashMap<String, T> = serde_json::from_str(line)
        .map_err(|err| Error::Record(format!("line {lineno}: {err}")))?;

    let mut entries = record.into_iter();
    let (id, value) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(Error::Record(format!(
                "line {lineno}: expected a single {{\"<id>\": ...}} object"
            )));
        }
    };

    let id = id.parse::<u64>().map_err(|_| {
        Error::Record(format!(
            "line {lineno}: id {id:?} is not an unsigned integer"
        ))
    })?;
    Ok((id, value))
}

fn render_line<T: Serialize>(id: u64, value: &T) -> Result<String> {
    let record = BTreeMap::from([(id.to_string(), value)]);
    Ok(serde_json::to_string(&record)?)
}

/// Write records to a temporary file in the same directory, then rename it
/// over the target. A crash mid-write leaves the original intact.
async fn write_records<T: Serialize>(path: &Path, records: &BTreeMap<u64, T>) -> Result<()> {
    let mut contents = String::new();
    for (id, value) in records {
        contents.push_str(&render_line(*id, value)?);
        contents.push('\n');
    }

    let tmp = tmp_path(path)?;
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> Result<PathBuf> {
    let dir = path.parent().ok_or_else(|| {
        Error::Io(std::io::Error::other(format!(
            "{} has no parent directory",
            path.display()
        )))
    })?;
    let name = path.file_name().ok_or_else(|| {
        Error::Io(std::io::Error::other(format!(
            "{} has no file name",
            path.display()
        )))
    })?;
    Ok(dir.join(format!(
        ".{}.tmp.{}",
        name.to_string_lossy(),
        std::process::id()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn write_file(path: &Path, contents: &str) {
        tokio::fs::write(path, contents).await.unwrap();
    }

    #[tokio::test]
    async fn reads_tasks_skipping_blanks_and_keeping_the_last_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        write_file(
            &path,
            concat!(
                "{\"3\": {\"instruction\": \"Summarize\", \"input\": \"first\"}}\n",
                "\n",
                "{\"1\": {\"instruction\": \"Translate\", \"input\": \"bonjour\"}}\n",
                "{\"3\": {\"instruction\": \"Summarize\", \"input\": \"second\"}}\n",
            ),
        )
        .await;

        let tasks = read_tasks(&path).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[&1].input, "bonjour");
        assert_eq!(tasks[&3].input, "second");
    }

    #[tokio::test]
    async fn task_ids_must_be_unsigned_integers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        write_file(
            &path,
            "{\"seven\": {\"instruction\": \"a\", \"input\": \"b\"}}\n",
        )
        .await;

        let err = read_tasks(&path).await.unwrap_err();
        assert!(matches!(err, Error::Record(_)), "got: {err:?}");
        assert!(err.to_string().contains("line 1"), "got: {err}");
    }

    #[tokio::test]
    async fn a_line_with_two_ids_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        write_file(
            &path,
            "{\"1\": {\"instruction\": \"a\", \"input\": \"b\"}, \"2\": {\"instruction\": \"c\", \"input\": \"d\"}}\n",
        )
        .await;

        let err = read_tasks(&path).await.unwrap_err();
        assert!(err.to_string().contains("single"), "got: {err}");
    }

    #[tokio::test]
    async fn sink_records_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let sink = JsonlSink::open(&path).await.unwrap();
        assert!(sink.completed().is_empty());
        sink.append(7, Some("seven")).await.unwrap();
        sink.append(2, Some("two")).await.unwrap();
        drop(sink);

        let sink = JsonlSink::open(&path).await.unwrap();
        assert_eq!(
            sink.completed().iter().copied().collect::<Vec<_>>(),
            vec![2, 7]
        );
    }

    #[tokio::test]
    async fn null_records_are_scrubbed_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        write_file(
            &path,
            concat!(
                "{\"1\": \"kept\"}\n",
                "{\"2\": null}\n",
                "{\"5\": \"also kept\"}\n",
            ),
        )
        .await;

        let sink = JsonlSink::open(&path).await.unwrap();
        assert_eq!(
            sink.completed().iter().copied().collect::<Vec<_>>(),
            vec![1, 5]
        );
        drop(sink);

        let results = read_results(&path).await.unwrap();
        assert_eq!(results.len(), 2, "the null line must be gone from disk");
        assert!(!results.contains_key(&2));
    }

    #[tokio::test]
    async fn appends_are_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let sink = JsonlSink::open(&path).await.unwrap();
        sink.append(4, Some("附近的餐厅")).await.unwrap();
        sink.append(9, None).await.unwrap();
        drop(sink);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["{\"4\":\"附近的餐厅\"}", "{\"9\":null}"]);
    }

    #[tokio::test]
    async fn compaction_sorts_and_collapses_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        write_file(
            &path,
            concat!(
                "{\"9\": \"nine\"}\n",
                "{\"2\": \"stale\"}\n",
                "{\"4\": null}\n",
                "{\"2\": \"fresh\"}\n",
            ),
        )
        .await;

        compact(&path).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec!["{\"2\":\"fresh\"}", "{\"4\":null}", "{\"9\":\"nine\"}"]
        );
        assert_eq!(count_nulls(&path).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn merge_joins_prompts_with_outputs_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = dir.path().join("tasks.jsonl");
        let results = dir.path().join("out.jsonl");
        let merged = dir.path().join("merged.jsonl");
        write_file(
            &tasks,
            concat!(
                "{\"5\": {\"instruction\": \"Summarize\", \"input\": \"long text\"}}\n",
                "{\"1\": {\"instruction\": \"Translate\", \"input\": \"bonjour\"}}\n",
                "{\"3\": {\"instruction\": \"Classify\", \"input\": \"spam?\"}}\n",
            ),
        )
        .await;
        write_file(
            &results,
            concat!(
                "{\"3\": \"ham\"}\n",
                "{\"1\": \"hello\"}\n",
                "{\"8\": \"orphaned\"}\n",
            ),
        )
        .await;

        let count = merge(&tasks, &results, &merged).await.unwrap();
        assert_eq!(count, 3);

        let contents = tokio::fs::read_to_string(&merged).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["1"]["output"], "hello");
        assert_eq!(lines[1]["3"]["output"], "ham");
        assert_eq!(lines[2]["5"]["output"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn concurrent_appends_dont_corrupt_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let sink = Arc::new(JsonlSink::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for id in 0..10u64 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                let text = format!("result {id}");
                sink.append(id, Some(&text)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drop(sink);

        let sink = JsonlSink::open(&path).await.unwrap();
        assert_eq!(sink.completed().len(), 10);
    }
}
