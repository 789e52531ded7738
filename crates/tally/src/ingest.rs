//! JSON-lines task change event replay.
//!
//! Each line is one `{"old": ..., "new": ...}` event, matching the
//! engine's entry point: insert omits `old`, delete omits `new`.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use miette::Result;
use serde::Deserialize;
use tracing::info;

use tally_model::{MapDirectory, TaskRow};
use tally_store::{SummaryEngine, SummaryStore};

#[derive(Debug, Deserialize)]
struct ChangeEvent {
    #[serde(default)]
    old: Option<TaskRow>,
    #[serde(default)]
    new: Option<TaskRow>,
}

pub fn run(db: &Path, grants: Option<&Path>, file: &Path) -> Result<()> {
    let directory = match grants {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .map_err(|e| miette::miette!("reading grants {}: {}", path.display(), e))?;
            serde_json::from_str::<MapDirectory>(&data)
                .map_err(|e| miette::miette!("parsing grants {}: {}", path.display(), e))?
        }
        None => MapDirectory::new(),
    };

    let store = SummaryStore::open(db).map_err(|e| miette::miette!("{}", e))?;
    let engine = SummaryEngine::new(store, directory);

    let reader: Box<dyn BufRead> = if file == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(file).map_err(|e| {
            miette::miette!("opening {}: {}", file.display(), e)
        })?))
    };

    let mut events = 0usize;
    let mut entries = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| miette::miette!("line {}: {}", line_no + 1, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ChangeEvent = serde_json::from_str(&line)
            .map_err(|e| miette::miette!("line {}: {}", line_no + 1, e))?;
        entries += engine
            .task_changed(event.old.as_ref(), event.new.as_ref())
            .map_err(|e| miette::miette!("line {}: {}", line_no + 1, e))?;
        events += 1;
    }

    info!(events, entries, "ingest complete");
    println!("{events} events -> {entries} journal entries");
    Ok(())
}
