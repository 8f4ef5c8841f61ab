//! `thetvapp.to`: refreshes an existing playlist in place.
//!
//! Channel URLs are swapped positionally, standard-definition duplicates are
//! dropped, and the sport sections are replaced wholesale by tonight's events.

use std::{path::Path, sync::LazyLock, time::Duration};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::{PageTarget, ResolvedMap, read_until_found, resolve_batch};
use crate::{
    browser::{BrowserPage, PageOpener},
    discovery::{DiscoveryPolicy, Validator, resolve_in_fresh_page},
    playlist::{self, PlaylistEntry},
    util::jittered_pause,
};

pub const BASE_URL: &str = "https://thetvapp.to";
pub const CHANNEL_LIST_PATH: &str = "/tv";
pub const EPG_URL: &str = "https://raw.githubusercontent.com/DrewLiveTemp/DrewskiTemp24/main/DrewLive.xml.gz";

const GROUP_PREFIX: &str = "TheTVApp - ";
const CHANNEL_GROUP: &str = "TV";

const LIST_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(15);
/// How long a listing page gets to render its links
const LINK_WAIT: Duration = Duration::from_secs(5);

/// Pause after every this many channels
const CHANNEL_PAUSE_EVERY: usize = 12;
const PAUSE_SECS: (f64, f64) = (1.2, 1.8);

/// A sport section: its path, playlist group and the heading its event list sits under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub path: &'static str,
    pub group: &'static str,
    pub heading: &'static str,
}

pub static SECTIONS: &[Section] = &[
    Section { path: "/nba", group: "NBA", heading: "NBA Streams" },
    Section { path: "/mlb", group: "MLB", heading: "MLB Streams" },
    Section { path: "/wnba", group: "WNBA", heading: "WNBA Streams" },
    Section { path: "/nfl", group: "NFL", heading: "NFL Streams" },
    Section { path: "/ncaaf", group: "NCAAF", heading: "College Football Streams" },
    Section { path: "/ncaab", group: "NCAAB", heading: "College Basketball Streams" },
    Section { path: "/soccer", group: "Soccer", heading: "Soccer Streams" },
    Section { path: "/ppv", group: "PPV", heading: "PPV Events" },
    Section { path: "/events", group: "Events", heading: "Events" },
    Section { path: "/nhl", group: "NHL", heading: "NHL Streams" },
];

/// `(group, tvg_id, logo)` for sections that have EPG metadata
pub static SPORTS_METADATA: &[(&str, &str, &str)] = &[
    ("MLB", "MLB.Baseball.Dummy.us", "http://drewlive24.duckdns.org:9000/Logos/Baseball-2.png"),
    ("PPV", "PPV.EVENTS.Dummy.us", "http://drewlive24.duckdns.org:9000/Logos/PPV.png"),
    ("NFL", "NFL.Dummy.us", "http://drewlive24.duckdns.org:9000/Logos/NFL.png"),
    ("NCAAF", "NCAA.Football.Dummy.us", "http://drewlive24.duckdns.org:9000/Logos/CFB.png"),
    ("NBA", "NBA.Basketball.Dummy.us", "http://drewlive24.duckdns.org:9000/Logos/NBA.png"),
    ("NHL", "NHL.Hockey.Dummy.us", "http://drewlive24.duckdns.org:9000/Logos/Hockey.png"),
];

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\r?\n\s*").unwrap());

/// An anchor found on a listing page: `(href, raw text)`
pub type Link = (String, String);

/// Collapses a multi-line link text into `"line one - line two"` without commas
#[must_use]
pub fn clean_title(raw: &str) -> String {
    LINE_BREAK
        .split(raw)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" - ")
        .replace(',', "")
}

fn links_under<'a>(root: impl Iterator<Item = ElementRef<'a>>, selector: &Selector) -> Vec<Link> {
    root.flat_map(|el| el.select(selector).collect::<Vec<_>>())
        .filter_map(|a| {
            let href = a.value().attr("href").filter(|h| !h.is_empty())?;
            Some((href.to_string(), a.text().collect::<String>()))
        })
        .collect()
}

/// Every channel link of the `/tv` list
#[must_use]
pub fn parse_channel_links(html: &str) -> Vec<Link> {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("ol.list-group a") else {
        return Vec::new();
    };
    links_under(std::iter::once(doc.root_element()), &selector)
}

/// Event links listed under the `<h3>` whose text is exactly `heading`.
///
/// Only anchors directly inside an `ol.list-group` within the `div`s that follow the
/// heading count.
#[must_use]
pub fn parse_section_links(html: &str, heading: &str) -> Vec<Link> {
    let doc = Html::parse_document(html);
    let (Ok(h3), Ok(anchors)) = (Selector::parse("h3"), Selector::parse("ol.list-group > a")) else {
        return Vec::new();
    };

    doc.select(&h3)
        .filter(|h| h.text().collect::<String>().trim() == heading)
        .flat_map(|h| {
            let following_divs = h
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().name() == "div");
            links_under(following_divs, &anchors)
        })
        .collect()
}

/// Loads a listing page and waits for `extract` to find links on it
async fn scrape_links<P>(page: &P, url: &str, extract: impl Fn(&str) -> Vec<Link>) -> Result<Vec<Link>>
where
    P: BrowserPage + ?Sized,
{
    match timeout(LIST_NAVIGATION_TIMEOUT, page.navigate(url)).await {
        Ok(res) => res?,
        Err(_) => bail!("Loading {url} timed out"),
    }

    read_until_found(page, LINK_WAIT, extract).await
}

async fn scrape_listing<O>(opener: &O, url: &str, extract: impl Fn(&str) -> Vec<Link>) -> Result<Vec<Link>>
where
    O: PageOpener + ?Sized,
{
    let page = opener.open_page().await?;
    let links = scrape_links(&page, url, extract).await;
    if let Err(e) = page.close_page().await {
        warn!("Unable to close page: {e:#}");
    }
    links
}

/// One target per link, blank titles included
fn targets_from_links(links: Vec<Link>, group: &str) -> Vec<PageTarget> {
    links
        .into_iter()
        .map(|(href, title)| PageTarget {
            page_url: format!("{BASE_URL}{href}"),
            name: clean_title(&title),
            group: group.to_string(),
            poster: None,
            starts_at: None,
            clock: String::new(),
        })
        .collect()
}

/// Resolves every channel of the `/tv` list, in list order
///
/// There is one slot per listed link, so slots line up with the playlist's URL lines.
/// Each slot holds the channel's manifest, or `None` when it could not be resolved.
///
/// # Errors
/// Errors when the channel list itself cannot be loaded
#[instrument(skip_all)]
pub async fn resolve_channels<O>(
    opener: &O,
    validator: &Validator,
    ct: &CancellationToken,
) -> Result<Vec<Option<String>>>
where
    O: PageOpener + ?Sized,
{
    info!("Loading {CHANNEL_LIST_PATH} channel list");
    let links = scrape_listing(opener, &format!("{BASE_URL}{CHANNEL_LIST_PATH}"), parse_channel_links)
        .await
        .context("Loading channel list")?;
    let targets = targets_from_links(links, CHANNEL_GROUP);
    info!("Found {} channels", targets.len());

    let policy = DiscoveryPolicy::CHANNEL;
    let mut resolved = ResolvedMap::new();
    resolve_batch(&targets, &mut resolved, ct, |idx, target| {
        let url = target.page_url.clone();
        let (policy, validator) = (&policy, validator);
        async move {
            let manifest = resolve_in_fresh_page(opener, &url, policy, validator).await;
            if (idx + 1) % CHANNEL_PAUSE_EVERY == 0 {
                jittered_pause(PAUSE_SECS.0, PAUSE_SECS.1, ct).await;
            }
            manifest
        }
    })
    .await;

    Ok(targets
        .iter()
        .map(|t| resolved.get(&t.key()).map(|m| m.url.clone()))
        .collect())
}

/// Resolves tonight's events of every sport section. A failing section is skipped.
#[instrument(skip_all)]
pub async fn resolve_sections<O>(
    opener: &O,
    validator: &Validator,
    ct: &CancellationToken,
) -> Vec<PlaylistEntry>
where
    O: PageOpener + ?Sized,
{
    let policy = DiscoveryPolicy::SECTION;
    let mut entries = Vec::new();

    for section in SECTIONS {
        if ct.is_cancelled() {
            break;
        }

        let url = format!("{BASE_URL}{}", section.path);
        info!("Loading {url} (looking for heading '{}')", section.heading);
        let links = match scrape_listing(opener, &url, |html| parse_section_links(html, section.heading)).await {
            Ok(links) => links,
            Err(e) => {
                warn!("Skipped {}: {e:#}", section.group);
                continue;
            }
        };
        info!("Found {} links for '{}'", links.len(), section.group);
        if links.is_empty() {
            continue;
        }

        let titled = links.into_iter().filter(|(_, title)| !title.trim().is_empty()).collect();
        let targets = targets_from_links(titled, section.group);
        let mut resolved = ResolvedMap::new();
        resolve_batch(&targets, &mut resolved, ct, |_, target| {
            let url = target.page_url.clone();
            let (policy, validator) = (&policy, validator);
            async move { resolve_in_fresh_page(opener, &url, policy, validator).await }
        })
        .await;

        entries.extend(
            targets
                .iter()
                .filter_map(|t| resolved.get(&t.key()).map(|m| section_entry(section.group, &t.name, &m.url))),
        );

        jittered_pause(PAUSE_SECS.0, PAUSE_SECS.1, ct).await;
    }

    entries
}

/// Playlist entry of a sport event, titled `"<title> HD"`
#[must_use]
pub fn section_entry(group: &str, title: &str, url: &str) -> PlaylistEntry {
    let (tvg_id, logo) = SPORTS_METADATA
        .iter()
        .find(|(g, _, _)| *g == group)
        .map_or(("", ""), |(_, id, logo)| (*id, *logo));
    let title = format!("{title} HD");

    PlaylistEntry {
        tvg_id: tvg_id.to_string(),
        tvg_name: Some(title.clone()),
        logo: logo.to_string(),
        group: format!("{GROUP_PREFIX}{group}"),
        title,
        vlc_options: Vec::new(),
        url: url.to_string(),
    }
}

/// Header carrying the refresh time, so players notice the file changed
#[must_use]
pub fn timestamped_header(unix_secs: i64) -> String {
    format!("{} # Updated: {unix_secs}", playlist::header(EPG_URL))
}

/// Applies a run's results to the lines of an existing playlist
#[must_use]
pub fn merge(
    lines: Vec<String>,
    header: String,
    channel_urls: &[Option<String>],
    section_entries: &[PlaylistEntry],
) -> Vec<String> {
    let mut lines = playlist::replace_header(lines, header);
    if channel_urls.iter().any(Option::is_some) {
        lines = playlist::replace_urls_in_order(lines, channel_urls);
    }
    lines = playlist::remove_sd_entries(lines);
    if !section_entries.is_empty() {
        let groups = SECTIONS
            .iter()
            .map(|s| format!("{GROUP_PREFIX}{}", s.group))
            .collect::<Vec<_>>();
        lines = playlist::replace_groups(lines, &groups, section_entries);
    }
    lines
}

/// Refreshes the playlist at `playlist_path` with freshly resolved channels and events
///
/// # Errors
/// Errors when the playlist is missing or cannot be rewritten
pub async fn run<O>(
    opener: &O,
    client: &reqwest::Client,
    playlist_path: &Path,
    ct: &CancellationToken,
) -> Result<()>
where
    O: PageOpener + ?Sized,
{
    if !tokio::fs::try_exists(playlist_path).await.unwrap_or(false) {
        bail!("Missing file: {}", playlist_path.display());
    }
    let lines = tokio::fs::read_to_string(playlist_path)
        .await
        .with_context(|| format!("Reading {}", playlist_path.display()))?
        .lines()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let validator = Validator::new(client.clone());

    info!("Updating TV URLs");
    let channel_urls = match resolve_channels(opener, &validator, ct).await {
        Ok(urls) => urls,
        Err(e) => {
            warn!("Keeping existing TV URLs: {e:#}");
            Vec::new()
        }
    };

    info!("Updating sports sections");
    let section_entries = resolve_sections(opener, &validator, ct).await;

    let merged = merge(
        lines,
        timestamped_header(Utc::now().timestamp()),
        &channel_urls,
        &section_entries,
    );
    tokio::fs::write(playlist_path, merged.join("\n"))
        .await
        .with_context(|| format!("Writing {}", playlist_path.display()))?;

    info!(
        "Done! {} channels and {} events refreshed",
        channel_urls.iter().flatten().count(),
        section_entries.len()
    );
    Ok(())
}
