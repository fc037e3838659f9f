//! Parsing of `bench --site <site> list-apps` output.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::AppRecord;

/// `name [version] [(commit)] [[branch]]`
static APP_LINE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(\w+)\s+([\w.\-]+)?\s*(?:\(([\da-f]+)\))?\s*(?:\[(.+)\])?$").ok()
});

/// Parse the full listing, skipping blank lines. Order follows the output.
#[must_use]
pub fn parse_app_listing(output: &str) -> Vec<AppRecord> {
    output.lines().filter_map(parse_app_line).collect()
}

/// Parse one listing line. Returns `None` for blank lines.
#[must_use]
pub fn parse_app_line(line: &str) -> Option<AppRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let structured = APP_LINE_PATTERN
        .as_ref()
        .and_then(|re| re.captures(line))
        .and_then(|caps| {
            let field = |i| caps.get(i).map(|m| m.as_str().to_owned());
            let (version, commit, branch) = (field(2), field(3), field(4));
            if version.is_none() && commit.is_none() && branch.is_none() {
                return None;
            }
            Some(AppRecord::Structured {
                name: field(1)?,
                version,
                commit,
                branch,
                raw: line.to_owned(),
            })
        });

    structured.or_else(|| {
        line.split_whitespace().next().map(|name| AppRecord::NameOnly {
            name: name.to_owned(),
            raw: line.to_owned(),
        })
    })
}
