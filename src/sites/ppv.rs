//! `ppv.to`: event list from its JSON API plus the "Live Now" cards on the landing page.
//! The playlist is rebuilt from scratch on every run.

use std::{collections::HashSet, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use chrono_tz::{America, Europe, Tz};
use scraper::{Html, Selector};
use serde::Deserialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::{PageTarget, ResolvedMap, read_until_found, resolve_batch};
use crate::{
    browser::{BrowserPage, PageOpener},
    discovery::{DiscoveryPolicy, Validator, resolve},
    playlist::{self, PlaylistEntry},
};

pub const API_URL: &str = "https://ppv.to/api/streams";
pub const BASE_URL: &str = "https://ppv.to/";
pub const EPG_URL: &str = "https://epgshare01.online/epgshare01/epg_ripper_DUMMY_CHANNELS.xml.gz";

const ROUND_THE_CLOCK: &str = "24/7 Streams";
const LIVE_NOW: &str = "Live Now";
const AMERICAN_FOOTBALL: &str = "American Football";

const LANDING_TIMEOUT: Duration = Duration::from_secs(20);
const LANDING_SETTLE: Duration = Duration::from_secs(3);
/// Extra time the "Live Now" strip gets to render after the settle
const LIVE_CARDS_WAIT: Duration = Duration::from_secs(10);

pub const VLC_OPTIONS: &[&str] = &[
    "http-origin=https://ppv.to",
    "http-referrer=https://ppv.to/",
    "http-user-agent=Mozilla/5.0",
];

/// How a site category is presented in the playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryStyle {
    pub group: &'static str,
    pub logo: &'static str,
    pub tvg_id: &'static str,
}

macro_rules! style {
    ($group:literal, $logo:literal, $tvg:literal) => {
        CategoryStyle {
            group: $group,
            logo: concat!("http://drewlive24.duckdns.org:9000/Logos/", $logo),
            tvg_id: $tvg,
        }
    };
}

pub static CATEGORY_STYLES: &[(&str, CategoryStyle)] = &[
    ("24/7 Streams", style!("PPVLand - Live Channels 24/7", "247.png", "24.7.Dummy.us")),
    ("Wrestling", style!("PPVLand - Wrestling Events", "Wrestling.png", "PPV.EVENTS.Dummy.us")),
    ("Football", style!("PPVLand - Global Football Streams", "Football.png", "Soccer.Dummy.us")),
    ("Basketball", style!("PPVLand - Basketball Hub", "Basketball.png", "Basketball.Dummy.us")),
    ("Baseball", style!("PPVLand - MLB", "Baseball.png", "MLB.Baseball.Dummy.us")),
    ("American Football", style!("PPVLand - NFL Action", "NFL3.png", "NFL.Dummy.us")),
    ("Combat Sports", style!("PPVLand - Combat Sports", "CombatSports2.png", "PPV.EVENTS.Dummy.us")),
    ("Darts", style!("PPVLand - Darts", "Darts.png", "Darts.Dummy.us")),
    ("Motorsports", style!("PPVLand - Racing Action", "Motorsports2.png", "Racing.Dummy.us")),
    ("Live Now", style!("PPVLand - Live Now", "DrewLiveSports.png", "24.7.Dummy.us")),
    ("Ice Hockey", style!("PPVLand - NHL Action", "Hockey.png", "NHL.Hockey.Dummy.us")),
];

const FALLBACK_GROUP: &str = "PPVLand - Random Events";
const FALLBACK_TVG_ID: &str = "24.7.Dummy.us";

const NFL_GROUP: (&str, &str) = ("PPVLand - NFL Action", "NFL.Dummy.us");
const COLLEGE_GROUP: (&str, &str) = ("PPVLand - College Football", "NCAA.Football.Dummy.us");

pub static NFL_TEAMS: &[&str] = &[
    "arizona cardinals", "atlanta falcons", "baltimore ravens", "buffalo bills",
    "carolina panthers", "chicago bears", "cincinnati bengals", "cleveland browns",
    "dallas cowboys", "denver broncos", "detroit lions", "green bay packers",
    "houston texans", "indianapolis colts", "jacksonville jaguars", "kansas city chiefs",
    "las vegas raiders", "los angeles chargers", "los angeles rams", "miami dolphins",
    "minnesota vikings", "new england patriots", "new orleans saints", "new york giants",
    "new york jets", "philadelphia eagles", "pittsburgh steelers", "san francisco 49ers",
    "seattle seahawks", "tampa bay buccaneers", "tennessee titans", "washington commanders",
];

pub static COLLEGE_TEAMS: &[&str] = &[
    "alabama crimson tide", "auburn tigers", "arkansas razorbacks", "georgia bulldogs",
    "florida gators", "lsu tigers", "ole miss rebels", "mississippi state bulldogs",
    "tennessee volunteers", "texas longhorns", "oklahoma sooners", "oklahoma state cowboys",
    "baylor bears", "tcu horned frogs", "kansas jayhawks", "kansas state wildcats",
    "iowa state cyclones", "iowa hawkeyes", "michigan wolverines", "ohio state buckeyes",
    "penn state nittany lions", "michigan state spartans", "wisconsin badgers",
    "minnesota golden gophers", "illinois fighting illini", "northwestern wildcats",
    "indiana hoosiers", "notre dame fighting irish", "usc trojans", "ucla bruins",
    "oregon ducks", "oregon state beavers", "washington huskies", "washington state cougars",
    "arizona wildcats", "stanford cardinal", "california golden bears", "colorado buffaloes",
    "florida state seminoles", "miami hurricanes", "clemson tigers", "north carolina tar heels",
    "duke blue devils", "nc state wolfpack", "wake forest demon deacons", "syracuse orange",
    "virginia cavaliers", "virginia tech hokies", "louisville cardinals", "pittsburgh panthers",
    "maryland terrapins", "rutgers scarlet knights", "nebraska cornhuskers", "purdue boilermakers",
    "texas a&m aggies", "kentucky wildcats", "missouri tigers", "vanderbilt commodores",
    "houston cougars", "utah utes", "byu cougars", "boise state broncos", "san diego state aztecs",
    "cincinnati bearcats", "memphis tigers", "ucf knights", "south florida bulls", "smu mustangs",
    "tulsa golden hurricane", "tulane green wave", "navy midshipmen", "army black knights",
    "arizona state sun devils", "texas tech red raiders", "florida atlantic owls",
];

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    streams: Vec<ApiCategory>,
}

#[derive(Debug, Deserialize)]
struct ApiCategory {
    #[serde(default)]
    category: String,
    #[serde(default)]
    streams: Vec<ApiStream>,
}

#[derive(Debug, Deserialize)]
struct ApiStream {
    name: Option<String>,
    iframe: Option<String>,
    poster: Option<String>,
    starts_at: Option<f64>,
}

/// Fetches the category list and flattens it into resolvable targets
///
/// # Errors
/// Errors on network failure, a non-200 answer or an unexpected body
#[instrument(skip(client))]
pub async fn fetch_targets(client: &reqwest::Client) -> Result<Vec<PageTarget>> {
    info!("Fetching streams from {API_URL}");
    let res = client
        .get(API_URL)
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .context("Fetching PPV stream list")?;

    let status = res.status();
    info!("Response status: {status}");
    if status != reqwest::StatusCode::OK {
        let body = res.text().await.unwrap_or_default();
        bail!("PPV API answered {status}: {body}");
    }

    let body = res
        .json::<StreamsResponse>()
        .await
        .context("Parsing PPV stream list")?;
    info!("Found {} categories", body.streams.len());

    Ok(targets_from_api(body))
}

fn targets_from_api(body: StreamsResponse) -> Vec<PageTarget> {
    let targets = body
        .streams
        .into_iter()
        .flat_map(|cat| {
            let category = cat.category;
            cat.streams.into_iter().filter_map(move |s| {
                let (Some(name), Some(iframe)) = (s.name, s.iframe) else {
                    return None;
                };
                let starts_at = s.starts_at.map_or(0, |t| t as i64);
                let round_the_clock = category == ROUND_THE_CLOCK;

                Some(PageTarget {
                    page_url: iframe,
                    name,
                    group: category.clone(),
                    poster: s.poster.filter(|p| !p.is_empty()),
                    starts_at: (!round_the_clock).then_some(starts_at),
                    clock: if round_the_clock {
                        String::new()
                    } else {
                        display_time(starts_at)
                    },
                })
            })
        })
        .collect();

    order_targets(targets)
}

/// Keeps the first target per case-insensitive name, then puts events in start order
/// ahead of round-the-clock channels
fn order_targets(targets: Vec<PageTarget>) -> Vec<PageTarget> {
    let mut seen = HashSet::new();
    let mut unique = targets
        .into_iter()
        .filter(|t| seen.insert(t.name.to_lowercase()))
        .collect::<Vec<_>>();

    unique.sort_by_key(|t| (t.starts_at.is_none(), t.starts_at));
    unique
}

/// Start time as `"05:13 PM ET / 03:13 PM MT / 22:13 UK"`, empty for unknown times
#[must_use]
pub fn display_time(timestamp: i64) -> String {
    if timestamp <= 0 {
        return String::new();
    }
    let Some(utc) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
        return String::new();
    };
    let at = |tz: Tz, fmt: &str| utc.with_timezone(&tz).format(fmt).to_string();

    format!(
        "{} / {} / {}",
        at(America::New_York, "%I:%M %p ET"),
        at(America::Denver, "%I:%M %p MT"),
        at(Europe::London, "%H:%M UK"),
    )
}

/// Reads the cards of the "Live Now" strip
#[must_use]
pub fn parse_live_cards(html: &str, base_url: &str) -> Vec<PageTarget> {
    let doc = Html::parse_document(html);
    let (Ok(card_sel), Ok(title_sel), Ok(poster_sel)) = (
        Selector::parse("#livecards a.item-card"),
        Selector::parse(".card-title"),
        Selector::parse("img.card-img-top"),
    ) else {
        return Vec::new();
    };
    let base = base_url.trim_end_matches('/');

    doc.select(&card_sel)
        .filter_map(|card| {
            let href = card.value().attr("href").filter(|h| !h.is_empty())?;
            let name = card
                .select(&title_sel)
                .next()
                .map_or_else(|| "Unnamed Live".to_string(), |t| t.text().collect::<String>());
            let poster = card
                .select(&poster_sel)
                .next()
                .and_then(|img| img.value().attr("src"))
                .filter(|src| !src.is_empty())
                .map(str::to_string);

            Some(PageTarget {
                page_url: format!("{base}{href}"),
                name: name.trim().to_string(),
                group: LIVE_NOW.to_string(),
                poster,
                starts_at: None,
                clock: "LIVE".to_string(),
            })
        })
        .collect()
}

/// Loads the landing page and scrapes its "Live Now" strip. Failures yield an empty list.
#[instrument(skip(page))]
pub async fn scrape_live_now<P>(page: &P) -> Vec<PageTarget>
where
    P: BrowserPage + ?Sized,
{
    info!("Scraping 'Live Now' streams from HTML");

    match timeout(LANDING_TIMEOUT, page.navigate(BASE_URL)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("Failed scraping 'Live Now': {e:#}");
            return Vec::new();
        }
        Err(_) => {
            warn!("Failed scraping 'Live Now': landing page timed out");
            return Vec::new();
        }
    }
    tokio::time::sleep(LANDING_SETTLE).await;

    let live = match read_until_found(page, LIVE_CARDS_WAIT, |html| parse_live_cards(html, BASE_URL)).await {
        Ok(live) => live,
        Err(e) => {
            warn!("Failed scraping 'Live Now': {e:#}");
            Vec::new()
        }
    };

    info!("Found {} 'Live Now' streams", live.len());
    live
}

fn style_for(category: &str) -> Option<&'static CategoryStyle> {
    CATEGORY_STYLES
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, style)| style)
}

/// `(group, tvg_id)` for an American Football event, by the teams in its name
fn football_group(name_lower: &str) -> Option<(&'static str, &'static str)> {
    let mut group = None;
    if NFL_TEAMS.iter().any(|t| name_lower.contains(t)) {
        group = Some(NFL_GROUP);
    }
    if COLLEGE_TEAMS.iter().any(|t| name_lower.contains(t)) {
        group = Some(COLLEGE_GROUP);
    }
    group
}

/// Builds the playlist entry of a resolved target
#[must_use]
pub fn entry_for(target: &PageTarget, url: &str) -> PlaylistEntry {
    let style = style_for(&target.group);
    let name_lower = target.name.trim().to_lowercase();

    let (mut group, mut tvg_id) = style.map_or((FALLBACK_GROUP, FALLBACK_TVG_ID), |s| (s.group, s.tvg_id));
    if target.group == AMERICAN_FOOTBALL {
        if let Some((g, id)) = football_group(&name_lower) {
            (group, tvg_id) = (g, id);
        }
    }

    let logo = target
        .poster
        .clone()
        .or_else(|| style.map(|s| s.logo.to_string()))
        .unwrap_or_default();

    let title = match target.clock.as_str() {
        _ if target.group == ROUND_THE_CLOCK => target.name.clone(),
        "" => target.name.clone(),
        "LIVE" => format!("{} [LIVE]", target.name),
        clock => format!("{} [{clock}]", target.name),
    };

    PlaylistEntry {
        tvg_id: tvg_id.to_string(),
        tvg_name: None,
        logo,
        group: group.to_string(),
        title,
        vlc_options: VLC_OPTIONS.iter().map(ToString::to_string).collect(),
        url: url.to_string(),
    }
}

/// Renders every resolved target once, skipping repeated names and unresolved pages
#[must_use]
pub fn build_playlist(targets: &[PageTarget], resolved: &ResolvedMap) -> String {
    let mut seen = HashSet::new();
    let entries = targets
        .iter()
        .filter(|t| seen.insert(t.name.trim().to_lowercase()))
        .filter_map(|t| resolved.get(&t.key()).map(|m| entry_for(t, &m.url)))
        .collect::<Vec<_>>();

    playlist::render(playlist::header(EPG_URL), &entries)
}

/// Resolves every API event and "Live Now" card on one reused page, then writes the playlist
///
/// # Errors
/// Errors when the stream list cannot be fetched, no page can be opened, or the
/// playlist cannot be written
pub async fn run<O>(
    opener: &O,
    client: &reqwest::Client,
    output: &Path,
    ct: &CancellationToken,
) -> Result<()>
where
    O: PageOpener + ?Sized,
{
    let targets = fetch_targets(client).await?;
    info!("{} unique streams, events first and 24/7 last", targets.len());

    let page = opener.open_page().await?;
    let validator = Validator::new(client.clone());
    let policy = DiscoveryPolicy::EMBED;
    let mut resolved = ResolvedMap::new();

    let total = targets.len();
    resolve_batch(&targets, &mut resolved, ct, |idx, target| {
        info!("Scraping stream {}/{total}: {} [{}]", idx + 1, target.name, target.group);
        let url = target.page_url.clone();
        let (page, policy, validator) = (&page, &policy, &validator);
        async move { resolve(page, &url, policy, validator).await }
    })
    .await;

    let live_now = if ct.is_cancelled() {
        Vec::new()
    } else {
        scrape_live_now(&page).await
    };
    resolve_batch(&live_now, &mut resolved, ct, |_, target| {
        let url = target.page_url.clone();
        let (page, policy, validator) = (&page, &policy, &validator);
        async move { resolve(page, &url, policy, validator).await }
    })
    .await;

    if let Err(e) = page.close_page().await {
        warn!("Unable to close page: {e:#}");
    }

    let all = live_now.into_iter().chain(targets).collect::<Vec<_>>();
    info!("Writing final playlist to {}", output.display());
    tokio::fs::write(output, build_playlist(&all, &resolved))
        .await
        .with_context(|| format!("Writing {}", output.display()))?;

    info!(
        "Done! {} of {} streams resolved at {} UTC",
        resolved.len(),
        all.len(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}
