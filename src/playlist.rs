//! M3U playlist rendering and the line-level edits used to refresh an existing file

/// One channel: its `#EXTINF` line, player options and the stream URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub tvg_id: String,
    pub tvg_name: Option<String>,
    pub logo: String,
    pub group: String,
    pub title: String,
    /// Emitted as `#EXTVLCOPT:<option>` lines
    pub vlc_options: Vec<String>,
    pub url: String,
}

impl PlaylistEntry {
    #[must_use]
    pub fn to_lines(&self) -> Vec<String> {
        let tvg_name = self
            .tvg_name
            .as_ref()
            .map(|n| format!(r#" tvg-name="{n}""#))
            .unwrap_or_default();

        let mut lines = Vec::with_capacity(self.vlc_options.len() + 2);
        lines.push(format!(
            r#"#EXTINF:-1 tvg-id="{}"{tvg_name} tvg-logo="{}" group-title="{}",{}"#,
            self.tvg_id, self.logo, self.group, self.title
        ));
        lines.extend(self.vlc_options.iter().map(|o| format!("#EXTVLCOPT:{o}")));
        lines.push(self.url.clone());
        lines
    }
}

#[must_use]
pub fn header(epg_url: &str) -> String {
    format!(r#"#EXTM3U url-tvg="{epg_url}""#)
}

#[must_use]
pub fn render(header: String, entries: &[PlaylistEntry]) -> String {
    std::iter::once(header)
        .chain(entries.iter().flat_map(PlaylistEntry::to_lines))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drops every `#EXTM3U` line and puts `header` first
#[must_use]
pub fn replace_header(lines: Vec<String>, header: String) -> Vec<String> {
    std::iter::once(header)
        .chain(lines.into_iter().filter(|l| !l.trim().starts_with("#EXTM3U")))
        .collect()
}

/// Swaps the n-th URL line for the n-th replacement.
///
/// A `None` replacement keeps the existing URL, so channels that could not be
/// resolved this run keep their previous stream.
#[must_use]
pub fn replace_urls_in_order(lines: Vec<String>, replacements: &[Option<String>]) -> Vec<String> {
    let mut replacements = replacements.iter();
    lines
        .into_iter()
        .map(|line| {
            if !line.trim().starts_with("http") {
                return line;
            }
            match replacements.next() {
                Some(Some(url)) => url.clone(),
                Some(None) | None => line,
            }
        })
        .collect()
}

/// Drops standard-definition channels: any `#EXTINF` mentioning `SD`, and the line after it
#[must_use]
pub fn remove_sd_entries(lines: Vec<String>) -> Vec<String> {
    drop_entries(lines, |extinf| extinf.to_uppercase().contains("SD"))
}

/// Removes every entry belonging to one of `groups` and appends `entries` in their place
#[must_use]
pub fn replace_groups(lines: Vec<String>, groups: &[String], entries: &[PlaylistEntry]) -> Vec<String> {
    let mut lines = drop_entries(lines, |extinf| groups.iter().any(|g| extinf.contains(g.as_str())));
    lines.extend(entries.iter().flat_map(PlaylistEntry::to_lines));
    lines
}

fn drop_entries(lines: Vec<String>, matches: impl Fn(&str) -> bool) -> Vec<String> {
    let mut kept = Vec::with_capacity(lines.len());
    let mut skip_next = false;

    for line in lines {
        if skip_next {
            skip_next = false;
            continue;
        }
        if line.trim().starts_with("#EXTINF") && matches(&line) {
            skip_next = true;
            continue;
        }
        kept.push(line);
    }

    kept
}
