use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::UpstreamConfig;
use crate::models::Launch;

const USER_AGENT: &str = concat!("launch-watch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bad upstream url: {0}")]
    Url(String),
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
    #[error("incomplete upstream result set: {0}")]
    Truncated(String),
}

#[derive(Debug, Deserialize)]
pub struct LaunchPage {
    #[serde(default)]
    pub count: Option<u64>,
    pub next: Option<String>,
    #[serde(default)]
    pub results: Vec<LaunchDoc>,
}

#[derive(Debug, Deserialize)]
pub struct LaunchDoc {
    id: String,
    #[serde(default)]
    name: String,
    net: Option<String>,
    last_updated: Option<String>,
    image: Option<String>,
    launch_service_provider: Option<NamedDoc>,
    pad: Option<PadDoc>,
}

#[derive(Debug, Deserialize)]
struct NamedDoc {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PadDoc {
    location: Option<NamedDoc>,
}

/// Source of raw upstream pages, keyed by absolute URL.
pub trait PageSource {
    fn get_page(&self, url: &Url) -> Result<String, FetchError>;
}

pub struct LaunchFetcher {
    client: Client,
    config: UpstreamConfig,
}

impl LaunchFetcher {
    pub fn new(config: UpstreamConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, config })
    }

    /// Walks the upcoming-launch pages and returns each launch once.
    pub fn fetch_upcoming(&self) -> Result<Vec<Launch>, FetchError> {
        let first = first_page_url(&self.config)?;
        collect_pages(self, first, self.config.max_pages)
    }
}

impl PageSource for LaunchFetcher {
    fn get_page(&self, url: &Url) -> Result<String, FetchError> {
        Ok(self
            .client
            .get(url.clone())
            .send()?
            .error_for_status()?
            .text()?)
    }
}

pub fn first_page_url(config: &UpstreamConfig) -> Result<Url, FetchError> {
    let base = config.base_url.trim_end_matches('/');
    Url::parse_with_params(
        &format!("{base}/launch/upcoming/"),
        [
            ("limit", config.page_size.to_string()),
            ("mode", "detailed".to_string()),
        ],
    )
    .map_err(|err| FetchError::Url(format!("{base}: {err}")))
}

/// Follows `next` links from `first`. A result set that would be cut off by
/// `max_pages` or by an unusable `next` link is an error, never a short batch.
pub fn collect_pages(
    source: &impl PageSource,
    first: Url,
    max_pages: u32,
) -> Result<Vec<Launch>, FetchError> {
    let mut seen = HashSet::new();
    let mut launches = Vec::new();
    let mut pages = 0;
    let mut next_url = Some(first);

    while let Some(page_url) = next_url.take() {
        if pages >= max_pages {
            return Err(FetchError::Truncated(format!(
                "more launches remain after {max_pages} pages, next page {page_url}"
            )));
        }
        pages += 1;

        debug!(url = %page_url, "fetching launch page");
        let page = parse_page(&source.get_page(&page_url)?)?;

        for doc in page.results {
            let launch = doc.into_launch()?;
            if seen.insert(launch.id.clone()) {
                launches.push(launch);
            } else {
                debug!(id = %launch.id, "duplicate launch across pages");
            }
        }

        next_url = match page.next {
            Some(next) => Some(
                Url::parse(&next).map_err(|err| FetchError::Url(format!("next page {next:?}: {err}")))?,
            ),
            None => None,
        };
    }

    info!(launches = launches.len(), pages, "fetched upcoming launches");
    Ok(launches)
}

pub fn parse_page(body: &str) -> Result<LaunchPage, FetchError> {
    serde_json::from_str(body).map_err(|err| FetchError::Malformed(err.to_string()))
}

impl LaunchDoc {
    pub fn into_launch(self) -> Result<Launch, FetchError> {
        let net = self
            .net
            .as_deref()
            .ok_or_else(|| FetchError::Malformed(format!("launch {} has no net", self.id)))?;
        let scheduled_time = parse_timestamp(net, &self.id, "net")?;
        // a missing last_updated is reported as the scheduled time
        let upstream_last_modified = match self.last_updated.as_deref() {
            Some(raw) => parse_timestamp(raw, &self.id, "last_updated")?,
            None => scheduled_time,
        };

        Ok(Launch {
            id: self.id,
            name: self.name,
            provider_name: self
                .launch_service_provider
                .map(|provider| provider.name)
                .unwrap_or_default(),
            location_name: self
                .pad
                .and_then(|pad| pad.location)
                .map(|location| location.name)
                .unwrap_or_default(),
            image_url: self.image.unwrap_or_default(),
            scheduled_time,
            upstream_last_modified,
        })
    }
}

fn parse_timestamp(raw: &str, id: &str, field: &str) -> Result<DateTime<Utc>, FetchError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| FetchError::Malformed(format!("launch {id} has bad {field} {raw:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    const SAMPLE_PAGE: &str = r#"
    {
        "count": 2,
        "next": "https://ll.thespacedevs.com/2.2.0/launch/upcoming/?limit=2&mode=detailed&offset=2",
        "previous": null,
        "results": [
            {
                "id": "f059d0a4-5a9c-4b55-8a3f-7c2e4c7d0c6e",
                "name": "Falcon 9 Block 5 | Starlink Group 10-7",
                "net": "2026-10-18T03:15:00Z",
                "last_updated": "2026-10-15T21:02:11Z",
                "image": "https://example.com/falcon9.jpeg",
                "launch_service_provider": { "id": 121, "name": "SpaceX" },
                "pad": {
                    "name": "Space Launch Complex 40",
                    "location": { "id": 12, "name": "Cape Canaveral SFS, FL, USA" }
                }
            },
            {
                "id": "7a2f5c44-01d1-4b7a-9c46-2b7d4f1c9e11",
                "name": "Electron | Unknown Payload",
                "net": "2026-10-21T00:00:00+02:00",
                "last_updated": null,
                "image": null,
                "launch_service_provider": null,
                "pad": null
            }
        ]
    }
    "#;

    #[test]
    fn parses_launch_page() {
        let page = parse_page(SAMPLE_PAGE).expect("parse page");
        assert_eq!(page.count, Some(2));
        assert!(page.next.is_some());
        assert_eq!(page.results.len(), 2);

        let launches: Vec<Launch> = page
            .results
            .into_iter()
            .map(|doc| doc.into_launch().expect("convert"))
            .collect();

        let first = &launches[0];
        assert_eq!(first.name, "Falcon 9 Block 5 | Starlink Group 10-7");
        assert_eq!(first.provider_name, "SpaceX");
        assert_eq!(first.location_name, "Cape Canaveral SFS, FL, USA");
        assert_eq!(first.image_url, "https://example.com/falcon9.jpeg");
        assert_eq!(
            first.scheduled_time,
            Utc.with_ymd_and_hms(2026, 10, 18, 3, 15, 0).unwrap()
        );
        assert_eq!(
            first.upstream_last_modified,
            Utc.with_ymd_and_hms(2026, 10, 15, 21, 2, 11).unwrap()
        );

        let second = &launches[1];
        assert_eq!(second.provider_name, "");
        assert_eq!(second.location_name, "");
        assert_eq!(second.image_url, "");
        assert_eq!(
            second.scheduled_time,
            Utc.with_ymd_and_hms(2026, 10, 20, 22, 0, 0).unwrap()
        );
        assert_eq!(second.upstream_last_modified, second.scheduled_time);
    }

    #[test]
    fn launch_without_net_is_malformed() {
        let body = r#"{"next": null, "results": [{"id": "x", "name": "No date", "net": null}]}"#;
        let page = parse_page(body).unwrap();
        let doc = page.results.into_iter().next().unwrap();
        assert!(matches!(doc.into_launch(), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn bad_timestamp_is_malformed() {
        let body = r#"{"next": null, "results": [{"id": "x", "name": "Soon", "net": "next tuesday"}]}"#;
        let doc = parse_page(body).unwrap().results.into_iter().next().unwrap();
        let err = doc.into_launch().unwrap_err();
        assert!(err.to_string().contains("next tuesday"));
    }

    struct FixturePages(HashMap<String, String>);

    impl FixturePages {
        fn new(pages: &[(&str, String)]) -> Self {
            Self(
                pages
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.clone()))
                    .collect(),
            )
        }
    }

    impl PageSource for FixturePages {
        fn get_page(&self, url: &Url) -> Result<String, FetchError> {
            self.0
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| FetchError::Url(format!("no fixture for {url}")))
        }
    }

    const PAGE_ONE: &str = "https://ll.example.com/launch/upcoming/?limit=2";
    const PAGE_TWO: &str = "https://ll.example.com/launch/upcoming/?limit=2&offset=2";

    fn page(next: Option<&str>, ids: &[&str]) -> String {
        let results: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"id": "{id}", "name": "{id}", "net": "2026-10-20T12:00:00Z"}}"#))
            .collect();
        let next = next.map_or("null".to_string(), |url| format!("\"{url}\""));
        format!(r#"{{"next": {next}, "results": [{}]}}"#, results.join(","))
    }

    fn first() -> Url {
        Url::parse(PAGE_ONE).unwrap()
    }

    #[test]
    fn follows_next_links_and_dedups() {
        let source = FixturePages::new(&[
            (PAGE_ONE, page(Some(PAGE_TWO), &["a", "b"])),
            (PAGE_TWO, page(None, &["b", "c"])),
        ]);
        let launches = collect_pages(&source, first(), 5).expect("all pages");
        let ids: Vec<&str> = launches.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn page_limit_with_more_pages_left_is_an_error() {
        let source = FixturePages::new(&[
            (PAGE_ONE, page(Some(PAGE_TWO), &["a", "b"])),
            (PAGE_TWO, page(None, &["c"])),
        ]);
        let err = collect_pages(&source, first(), 1).unwrap_err();
        assert!(matches!(err, FetchError::Truncated(_)));
    }

    #[test]
    fn page_limit_reached_on_last_page_is_fine() {
        let source = FixturePages::new(&[
            (PAGE_ONE, page(Some(PAGE_TWO), &["a"])),
            (PAGE_TWO, page(None, &["b"])),
        ]);
        assert_eq!(collect_pages(&source, first(), 2).unwrap().len(), 2);
    }

    #[test]
    fn unparsable_next_link_is_an_error() {
        let source = FixturePages::new(&[(PAGE_ONE, page(Some("not a url"), &["a"]))]);
        let err = collect_pages(&source, first(), 5).unwrap_err();
        assert!(matches!(err, FetchError::Url(_)));
    }

    #[test]
    fn first_url_carries_page_size() {
        let config = UpstreamConfig {
            base_url: "https://ll.example.com/2.2.0/".to_string(),
            page_size: 25,
            ..UpstreamConfig::default()
        };
        let url = first_page_url(&config).unwrap();
        assert_eq!(
            url.as_str(),
            "https://ll.example.com/2.2.0/launch/upcoming/?limit=25&mode=detailed"
        );
    }

    #[test]
    fn non_json_body_is_malformed() {
        assert!(matches!(
            parse_page("<html>rate limited</html>"),
            Err(FetchError::Malformed(_))
        ));
    }
}
