use crate::config::{PortalConfig, PORTAL_API_HEADER};
use crate::core::normalize;
use crate::domain::model::{HeiRecord, ProgramRecord};
use crate::domain::ports::CacheStore;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Fixed cache key for the institution directory (global, not parameterized).
const INSTITUTIONS_CACHE_KEY: &str = "portal:institutions";

fn program_records_key(inst_code: &str) -> String {
    format!("portal:program-records:{}", inst_code)
}

fn programs_key(inst_code: &str) -> String {
    format!("portal:programs:{}", inst_code)
}

fn majors_key(inst_code: &str, program_name: &str) -> String {
    format!("portal:majors:{}:{}", inst_code, program_name)
}

/// Read-through cached façade over the upstream HEI/program directory.
///
/// The portal is a best-effort enrichment source, not a system of record:
/// every operation resolves upstream or cache trouble to an empty result
/// instead of raising. Each of the three query shapes keeps its own cache
/// key and TTL window; they are never derived from one shared cache and do
/// not invalidate together.
pub struct PortalGateway<C: CacheStore> {
    config: PortalConfig,
    cache: C,
    client: Client,
}

impl<C: CacheStore> PortalGateway<C> {
    pub fn new(config: PortalConfig, cache: C) -> Self {
        // fires the one-time missing-secret diagnostic at startup
        let _ = config.api_key();
        Self {
            config,
            cache,
            client: Client::new(),
        }
    }

    /// All institutions known to the portal, unique by `instCode` and
    /// sorted case-insensitively by name for stable UI ordering. Empty on
    /// any upstream failure; only successful results are cached.
    pub async fn fetch_all_institutions(&self) -> Vec<HeiRecord> {
        if let Some(cached) = self
            .cache_lookup::<Vec<HeiRecord>>(INSTITUTIONS_CACHE_KEY)
            .await
        {
            return cached;
        }

        let Some(rows) = self.fetch_institution_rows().await else {
            return Vec::new();
        };

        let mut institutions: Vec<HeiRecord> = rows.iter().filter_map(hei_from_row).collect();
        institutions.sort_by(|a, b| normalize::natural_cmp(&a.inst_name, &b.inst_name));

        self.cache_store(INSTITUTIONS_CACHE_KEY, &institutions).await;
        institutions
    }

    /// Raw program rows for one institution, no field projection. Callers
    /// pick whatever fields they need.
    pub async fn fetch_program_records(&self, inst_code: &str) -> Vec<ProgramRecord> {
        let inst_code = inst_code.trim();
        if inst_code.is_empty() {
            return Vec::new();
        }

        self.load_program_records(inst_code).await.unwrap_or_default()
    }

    /// Distinct program names for one institution. Display order for this
    /// call is not guaranteed; dedup uses set semantics.
    pub async fn fetch_programs(&self, inst_code: &str) -> Vec<String> {
        let inst_code = inst_code.trim();
        if inst_code.is_empty() {
            return Vec::new();
        }

        let cache_key = programs_key(inst_code);
        if let Some(cached) = self.cache_lookup::<Vec<String>>(&cache_key).await {
            return cached;
        }

        let Some(records) = self.load_program_records(inst_code).await else {
            return Vec::new();
        };

        let programs: Vec<String> = records
            .iter()
            .filter_map(|record| record.program_name())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.cache_store(&cache_key, &programs).await;
        programs
    }

    /// Distinct major names under one program of one institution. Record
    /// program names are trimmed before the comparison; the match itself is
    /// exact and case-sensitive.
    pub async fn fetch_majors(&self, inst_code: &str, program_name: &str) -> Vec<String> {
        let inst_code = inst_code.trim();
        if inst_code.is_empty() || program_name.is_empty() {
            return Vec::new();
        }

        let cache_key = majors_key(inst_code, program_name);
        if let Some(cached) = self.cache_lookup::<Vec<String>>(&cache_key).await {
            return cached;
        }

        let Some(records) = self.load_program_records(inst_code).await else {
            return Vec::new();
        };

        let majors: Vec<String> = records
            .iter()
            .filter(|record| record.program_name().as_deref() == Some(program_name))
            .filter_map(|record| record.major_name())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.cache_store(&cache_key, &majors).await;
        majors
    }

    /// Cache-or-fetch for the raw program rows. `None` means the upstream
    /// call failed, which callers must not cache as an empty result.
    async fn load_program_records(&self, inst_code: &str) -> Option<Vec<ProgramRecord>> {
        let cache_key = program_records_key(inst_code);
        if let Some(cached) = self.cache_lookup::<Vec<ProgramRecord>>(&cache_key).await {
            return Some(cached);
        }

        let rows = self.fetch_program_rows(inst_code).await?;
        let records: Vec<ProgramRecord> = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(ProgramRecord::new(map.into_iter().collect())),
                _ => None,
            })
            .collect();

        self.cache_store(&cache_key, &records).await;
        Some(records)
    }

    async fn fetch_institution_rows(&self) -> Option<Vec<Value>> {
        let api_key = self.config.api_key()?;
        let request = self
            .client
            .get(self.config.institutions_url())
            .header(PORTAL_API_HEADER, api_key)
            .header(ACCEPT, "application/json")
            .timeout(self.config.timeout());

        let body = self.send_with_retry(request, "list-institutions").await?;
        let rows = normalize::parse_record_array(&body);
        if rows.is_none() {
            tracing::warn!("❌ list-institutions: portal returned an unparseable body");
        }
        rows
    }

    async fn fetch_program_rows(&self, inst_code: &str) -> Option<Vec<Value>> {
        let api_key = self.config.api_key()?;
        let request = self
            .client
            .post(self.config.programs_url())
            .header(PORTAL_API_HEADER, api_key)
            .header(ACCEPT, "application/json")
            .form(&[("instCode", inst_code)])
            .timeout(self.config.timeout());

        let body = self
            .send_with_retry(request, "list-programs-by-institution")
            .await?;
        let rows = normalize::parse_record_array(&body);
        if rows.is_none() {
            tracing::warn!(
                "❌ list-programs-by-institution: portal returned an unparseable body for '{}'",
                inst_code
            );
        }
        rows
    }

    /// One logical portal call: up to `1 + retry_attempts` HTTP attempts
    /// with a fixed backoff between them. `None` once every attempt failed.
    async fn send_with_retry(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Option<String> {
        let attempts = 1 + self.config.retry_attempts;
        for attempt in 1..=attempts {
            let Some(req) = request.try_clone() else {
                tracing::warn!("❌ {}: request body is not retryable", operation);
                return None;
            };

            tracing::debug!("📡 {}: attempt {}/{}", operation, attempt, attempts);
            match req.send().await {
                Ok(response) if response.status().is_success() => {
                    match response.text().await {
                        Ok(body) => return Some(body),
                        Err(e) => {
                            tracing::warn!("❌ {}: failed to read response body: {}", operation, e)
                        }
                    }
                }
                Ok(response) => tracing::warn!(
                    "❌ {}: portal responded with status {}",
                    operation,
                    response.status()
                ),
                Err(e) => tracing::warn!("❌ {}: portal request failed: {}", operation, e),
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }
        None
    }

    async fn cache_lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("❌ cache entry for '{}' is unreadable: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                // treated as a miss so a flaky cache backend never breaks reads
                tracing::warn!("❌ cache read for '{}' failed: {}", key, e);
                None
            }
        }
    }

    async fn cache_store<T: Serialize>(&self, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("❌ cache encode for '{}' failed: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.cache.set(key, bytes, self.config.cache_ttl()).await {
            tracing::warn!("❌ cache write for '{}' failed: {}", key, e);
        }
    }
}

fn hei_from_row(row: &Value) -> Option<HeiRecord> {
    let obj = row.as_object()?;
    let inst_code = normalize::coerce_text(obj.get("instCode")?)?;
    let inst_name = normalize::coerce_text(obj.get("instName")?)?;
    Some(HeiRecord {
        inst_code,
        inst_name,
    })
}
