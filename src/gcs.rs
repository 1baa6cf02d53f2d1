use crate::gcp::GcpAuth;
use crate::store::{self, DayStore, MessageRecord};
use anyhow::Context as _;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const STORAGE_UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Day partitions land as `<date>/<channel-id>.jsonl`.
static DAY_OBJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})/").expect("day prefix regex"));

#[derive(Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ObjectEntry {
    name: String,
}

/// `gs://` URLs of one day's published renderings.
#[derive(Debug, Clone)]
pub struct SummaryUrls {
    pub json: String,
    pub markdown: String,
    pub text: String,
}

/// Blob-store collaborator over the GCS JSON API.
pub struct GcsClient {
    client: reqwest::Client,
    auth: GcpAuth,
    bucket: String,
}

impl GcsClient {
    pub fn new(client: reqwest::Client, auth: GcpAuth, bucket: impl Into<String>) -> Self {
        Self {
            client,
            auth,
            bucket: bucket.into(),
        }
    }

    /// Upload every buffered `<date>/<channel-id>.jsonl` partition file.
    /// Returns the number of files uploaded; an empty or missing local
    /// buffer is a no-op returning 0.
    pub async fn upload_day_files(&self, local: &DayStore) -> anyhow::Result<usize> {
        let day_dirs = local.day_dirs()?;
        if day_dirs.is_empty() {
            info!("{} has no buffered days; nothing to upload.", local.base().display());
            return Ok(0);
        }

        let mut uploaded = 0;
        for day_dir in day_dirs {
            let Some(day) = day_dir.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            let mut files: Vec<_> = std::fs::read_dir(&day_dir)
                .with_context(|| format!("reading day dir {}", day_dir.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
                .collect();
            files.sort();

            for path in files {
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let object = format!("{day}/{file_name}");
                let body = std::fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                self.upload_object(&object, body, "application/json").await?;
                uploaded += 1;
                info!(
                    "Uploaded {} -> gs://{}/{}",
                    path.display(),
                    self.bucket,
                    object
                );
            }
        }
        Ok(uploaded)
    }

    /// All dates with stored partition objects, sorted ascending, found by
    /// scanning object names for the `YYYY-MM-DD/` prefix.
    pub async fn list_dates(&self) -> anyhow::Result<Vec<NaiveDate>> {
        let names = self.list_object_names(None).await?;
        Ok(dates_from_names(&names))
    }

    /// Every record across all of a date's partition objects. Partition
    /// order follows object-name order; malformed lines are skipped with a
    /// warning.
    pub async fn load_day(&self, date: NaiveDate) -> anyhow::Result<Vec<MessageRecord>> {
        let prefix = format!("{date}/");
        let mut names = self.list_object_names(Some(&prefix)).await?;
        names.retain(|n| n.ends_with(".jsonl"));
        names.sort();

        if names.is_empty() {
            warn!("No JSONL files found for date {}", date);
            return Ok(Vec::new());
        }
        info!("Found {} JSONL files for {}", names.len(), date);

        let mut records = Vec::new();
        for name in &names {
            let content = self.download_object(name).await?;
            records.extend(store::parse_jsonl(&content, name));
        }
        info!("Loaded {} messages for {}", records.len(), date);
        Ok(records)
    }

    /// Publish the three renderings at their fixed logical paths,
    /// overwriting any prior renderings for the date.
    pub async fn publish_summaries(
        &self,
        date: NaiveDate,
        json: &str,
        markdown: &str,
        text: &str,
    ) -> anyhow::Result<SummaryUrls> {
        let renderings = [
            (format!("summaries/{date}.json"), json, "application/json"),
            (format!("summaries/{date}.md"), markdown, "text/markdown"),
            (format!("summaries/{date}.txt"), text, "text/plain"),
        ];

        let mut urls = Vec::with_capacity(renderings.len());
        for (object, content, content_type) in renderings {
            self.upload_object(&object, content.as_bytes().to_vec(), content_type)
                .await?;
            let url = format!("gs://{}/{}", self.bucket, object);
            info!("Saved summary: {}", url);
            urls.push(url);
        }

        let mut urls = urls.into_iter();
        Ok(SummaryUrls {
            json: urls.next().unwrap_or_default(),
            markdown: urls.next().unwrap_or_default(),
            text: urls.next().unwrap_or_default(),
        })
    }

    async fn upload_object(
        &self,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> anyhow::Result<()> {
        let token = self.auth.token().await?;
        let url = format!("{STORAGE_UPLOAD_API}/b/{}/o", self.bucket);
        let response = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", name)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .with_context(|| format!("uploading gs://{}/{}", self.bucket, name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("upload of gs://{}/{name} failed ({status}): {body}", self.bucket);
        }
        Ok(())
    }

    async fn download_object(&self, name: &str) -> anyhow::Result<String> {
        let token = self.auth.token().await?;
        let url = format!(
            "{STORAGE_API}/b/{}/o/{}",
            self.bucket,
            urlencoding::encode(name)
        );
        let response = self
            .client
            .get(&url)
            .query(&[("alt", "media")])
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("downloading gs://{}/{}", self.bucket, name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "download of gs://{}/{name} failed ({status}): {body}",
                self.bucket
            );
        }
        Ok(response.text().await?)
    }

    async fn list_object_names(&self, prefix: Option<&str>) -> anyhow::Result<Vec<String>> {
        let url = format!("{STORAGE_API}/b/{}/o", self.bucket);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.auth.token().await?;
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(token)
                .query(&[("fields", "items(name),nextPageToken")]);
            if let Some(prefix) = prefix {
                request = request.query(&[("prefix", prefix)]);
            }
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("listing gs://{}", self.bucket))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("listing gs://{} failed ({status}): {body}", self.bucket);
            }

            let page: ObjectList = response.json().await?;
            names.extend(page.items.into_iter().map(|o| o.name));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(names)
    }
}

/// Distinct `YYYY-MM-DD` prefixes among `.jsonl` object names, sorted.
fn dates_from_names(names: &[String]) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = names
        .iter()
        .filter(|name| name.ends_with(".jsonl"))
        .filter_map(|name| DAY_OBJECT_RE.captures(name))
        .filter_map(|cap| cap[1].parse().ok())
        .collect();
    dates.sort();
    dates.dedup();
    dates
}
