//! Editing of the submodule tracking file (`.gitmodules`).
//!
//! A stanza starts at a header line (`[submodule "..."]`) and runs until the
//! next header line or the next blank line, whichever comes first. The
//! terminating line itself is kept.

use std::fs;
use std::io;
use std::path::Path;

/// Drop every stanza whose header names `plugin`. Returns the new text and
/// how many stanzas were removed.
pub fn remove_stanza(content: &str, plugin: &str) -> (String, usize) {
    let mut out = String::with_capacity(content.len());
    let mut removed = 0;
    let mut skipping = false;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            skipping = header_names(trimmed, plugin);
            if skipping {
                removed += 1;
                continue;
            }
        } else if trimmed.is_empty() {
            skipping = false;
        }

        if !skipping {
            out.push_str(line);
        }
    }

    (out, removed)
}

/// Rewrite the tracking file in place. A missing file is left alone.
pub fn remove_stanza_from_file(path: &Path, plugin: &str) -> io::Result<usize> {
    if !path.is_file() {
        return Ok(0);
    }

    let content = fs::read_to_string(path)?;
    let (updated, removed) = remove_stanza(&content, plugin);
    if removed > 0 {
        fs::write(path, updated)?;
    }
    Ok(removed)
}

fn header_names(header: &str, plugin: &str) -> bool {
    let Some(start) = header.find('"') else {
        return false;
    };
    let Some(end) = header.rfind('"').filter(|end| *end > start) else {
        return false;
    };

    let name = &header[start + 1..end];
    let tracked = format!("Plugins/{plugin}");
    name == plugin || name == tracked || name.ends_with(&format!("/{tracked}"))
}
