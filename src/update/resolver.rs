use reqwest::{Client, StatusCode, Url};
use regex::Regex;
use serde_json::Value;
use log::{debug, info, warn, error};

use super::models::{ChecksumType, FirmwareRelease, ReleaseChecksum};
use crate::config::{find_source, FirmwareSource, ReleaseSettings};

/// Looks up firmware releases on the GitHub release feed of a firmware source
pub struct ReleaseResolver {
    client: Client,
    settings: ReleaseSettings,
}

impl ReleaseResolver {
    /// The client is shared with the rest of the process; it only pools connections.
    pub fn new(client: Client, settings: ReleaseSettings) -> Self {
        Self { client, settings }
    }

    /// Most recent release of `source`, or `None` when unavailable
    pub async fn latest(&self, source: &str) -> Option<FirmwareRelease> {
        self.resolve(source, None).await
    }

    /// Release published under exactly `tag`, or `None` when it does not exist
    pub async fn by_tag(&self, source: &str, tag: &str) -> Option<FirmwareRelease> {
        self.resolve(source, Some(tag)).await
    }

    async fn resolve(&self, source_key: &str, tag: Option<&str>) -> Option<FirmwareRelease> {
        let Some(source) = find_source(source_key) else {
            error!("Unknown firmware source: {}", source_key);
            return None;
        };

        let url = release_url(&self.settings.api_base, source, tag)?;

        let data = self.fetch_release(url.as_str(), source, tag).await?;
        parse_release(&data, source, tag)
    }

    /// GET a release document, backing off on rate limiting
    async fn fetch_release(&self, url: &str, source: &FirmwareSource, tag: Option<&str>) -> Option<Value> {
        let max_retries = self.settings.max_retries;

        for attempt in 0..=max_retries {
            debug!("Fetching release metadata from: {}", url);

            let response = match self.client
                .get(url)
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", self.settings.user_agent.as_str())
                .timeout(self.settings.request_timeout())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    error!("Timeout fetching release metadata from {}", url);
                    return None;
                }
                Err(e) => {
                    error!("Error fetching release metadata from {}: {}", url, e);
                    return None;
                }
            };

            match response.status() {
                StatusCode::OK => {
                    return match response.json::<Value>().await {
                        Ok(data) => Some(data),
                        Err(e) => {
                            error!("Invalid release metadata from {}: {}", url, e);
                            None
                        }
                    };
                }
                StatusCode::NOT_FOUND if tag.is_some() => {
                    warn!(
                        "Version {} not found for {}",
                        tag.unwrap_or_default(),
                        source.repo
                    );
                    return None;
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt < max_retries {
                        let delay = self.settings.retry_base_delay() * 2u32.pow(attempt);
                        warn!(
                            "GitHub API rate limit hit (429). Retrying in {:?} (attempt {}/{})",
                            delay,
                            attempt + 1,
                            max_retries
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    error!(
                        "GitHub API rate limit exceeded after {} retries. Please wait before trying again.",
                        max_retries
                    );
                    return None;
                }
                status => {
                    error!("Failed to fetch release metadata from {}: HTTP {}", url, status);
                    return None;
                }
            }
        }

        None
    }
}

/// Endpoint for the latest release, or for `tag` as a single encoded path segment
pub fn release_url(api_base: &str, source: &FirmwareSource, tag: Option<&str>) -> Option<Url> {
    if let Some(tag) = tag {
        if matches!(tag.trim(), "" | "." | "..") {
            error!("Invalid release tag: '{}'", tag);
            return None;
        }
    }

    let mut url = match Url::parse(api_base) {
        Ok(url) => url,
        Err(e) => {
            error!("Invalid release API base {}: {}", api_base, e);
            return None;
        }
    };

    {
        let Ok(mut segments) = url.path_segments_mut() else {
            error!("Release API base cannot carry a path: {}", api_base);
            return None;
        };
        segments.pop_if_empty();
        segments.push("repos");
        segments.extend(source.repo.split('/'));
        segments.push("releases");
        match tag {
            Some(tag) => {
                segments.push("tags");
                segments.push(tag);
            }
            None => {
                segments.push("latest");
            }
        }
    }
    Some(url)
}

/// Build a [`FirmwareRelease`] from a GitHub release document
pub fn parse_release(data: &Value, source: &FirmwareSource, requested_tag: Option<&str>) -> Option<FirmwareRelease> {
    let pattern = match Regex::new(&format!("^(?:{})", source.asset_pattern)) {
        Ok(pattern) => pattern,
        Err(e) => {
            error!("Invalid asset pattern for source {}: {}", source.key, e);
            return None;
        }
    };

    let version = data["tag_name"]
        .as_str()
        .or(requested_tag)
        .unwrap_or("unknown")
        .to_string();

    let assets = data["assets"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    let Some((filename, download_url)) = select_asset(assets, &pattern) else {
        warn!("No matching firmware binary found in release {}", version);
        return None;
    };

    let release_notes = data["body"].as_str().map(str::to_string);
    let checksum = release_notes
        .as_deref()
        .and_then(|notes| extract_checksum(notes, filename));

    let published_at = data["published_at"].as_str().and_then(|raw| {
        chrono::DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| debug!("Ignoring unparsable published_at '{}': {}", raw, e))
            .ok()
    });

    info!(
        "Resolved {} release {} (asset {}, checksum: {})",
        source.key,
        version,
        filename,
        checksum.as_ref().map(|c| c.kind.as_str()).unwrap_or("none")
    );

    Some(FirmwareRelease {
        version,
        download_url: download_url.to_string(),
        release_url: data["html_url"].as_str().unwrap_or_default().to_string(),
        release_notes,
        published_at,
        checksum,
    })
}

/// First asset, in feed order, whose filename matches `pattern`.
/// Returns `(filename, download_url)`.
pub fn select_asset<'a>(assets: &'a [Value], pattern: &Regex) -> Option<(&'a str, &'a str)> {
    assets.iter().find_map(|asset| {
        let name = asset["name"].as_str()?;
        let url = asset["browser_download_url"].as_str()?;
        pattern.is_match(name).then_some((name, url))
    })
}

/// Find a checksum for `filename` in free-text release notes.
///
/// Recognised, in order: `<64 hex> <filename>`, `SHA256(<filename>)= <64 hex>`
/// and `<128 hex> <filename>`.
pub fn extract_checksum(notes: &str, filename: &str) -> Option<ReleaseChecksum> {
    if notes.is_empty() || filename.is_empty() {
        return None;
    }
    let name = regex::escape(filename);

    let candidates = [
        (format!(r"\b([a-fA-F0-9]{{64}})\s+{}", name), ChecksumType::Sha256),
        (format!(r"(?i)SHA256\s*\(\s*{}\s*\)\s*=\s*([a-f0-9]{{64}})\b", name), ChecksumType::Sha256),
        (format!(r"\b([a-fA-F0-9]{{128}})\s+{}", name), ChecksumType::Sha512),
    ];

    for (pattern, kind) in candidates {
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if let Some(captures) = re.captures(notes) {
            let value = captures[1].to_ascii_lowercase();
            debug!("Extracted {} checksum for {} from release notes", kind, filename);
            return Some(ReleaseChecksum { value, kind });
        }
    }

    debug!(
        "No checksum found in release notes for {}. Firmware will be validated by size only.",
        filename
    );
    None
}
